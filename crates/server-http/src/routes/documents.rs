// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! `/{db}/{collection}/documents`: list, insert, get, replace, delete.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use blite_auth::User;
use blite_cache::CacheVariant;
use blite_core::Error;
use blite_core::value::DocId;
use blite_query::QueryDescriptor;
use blite_runtime::ServerContext;
use blite_runtime::ops::{documents, queries};
use serde::Deserialize;
use serde_json::Value as Json_;

use crate::json::{document_to_json, json_to_document, value_to_json};
use crate::problem::ApiResult;

#[derive(Deserialize)]
pub(crate) struct ListParams {
	#[serde(default)]
	skip: Option<i64>,
	#[serde(default)]
	limit: Option<i64>,
}

pub(crate) async fn list(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection)): Path<(String, String)>,
	Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Json_>>> {
	let database = ctx.resolve_database(&user, &db)?;
	let mut descriptor = QueryDescriptor::new(&collection);
	descriptor.skip = params.skip;
	descriptor.take = params.limit;

	let cache_params = format!("{}:{}", params.skip.unwrap_or(0), params.limit.unwrap_or(-1));
	let hits = queries::run(&ctx, &user, &database, descriptor, CacheVariant::List, cache_params.as_bytes())
		.await?
		.into_hits()
		.await?;
	render_hits(&ctx, &database, hits).await
}

pub(crate) async fn insert(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection)): Path<(String, String)>,
	Json(body): Json<Json_>,
) -> ApiResult<(StatusCode, Json<Json_>)> {
	let database = ctx.resolve_database(&user, &db)?;
	let doc = json_to_document(&body)?;
	if doc.is_empty() {
		return Err(Error::invalid_input("document body is empty").into());
	}
	let id = documents::insert(&ctx, &user, &database, &collection, doc, None).await?;
	Ok((StatusCode::CREATED, Json(serde_json::json!({ "_id": value_to_json(&id.to_value()) }))))
}

pub(crate) async fn fetch(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection, id)): Path<(String, String, String)>,
) -> ApiResult<Json<Json_>> {
	let database = ctx.resolve_database(&user, &db)?;
	let id = DocId::parse_lossy(&id);
	let bytes = documents::find_by_id(&ctx, &user, &database, &collection, id)
		.await?
		.ok_or_else(|| Error::not_found("document does not exist"))?;
	let dictionary = queries::dictionary(&ctx, &database).await?;
	let doc = blite_codec::decode(&bytes, &dictionary).map_err(Error::from)?;
	Ok(Json(document_to_json(&doc)))
}

pub(crate) async fn replace(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection, id)): Path<(String, String, String)>,
	Json(body): Json<Json_>,
) -> ApiResult<Json<Json_>> {
	let database = ctx.resolve_database(&user, &db)?;
	let id = DocId::parse_lossy(&id);
	let mut doc = json_to_document(&body)?;
	if doc.is_empty() {
		return Err(Error::invalid_input("document body is empty").into());
	}
	// The path id is authoritative; any `_id` in the body is replaced.
	doc.set_id(&id);
	let applied = documents::update(&ctx, &user, &database, &collection, doc, None).await?;
	if !applied {
		return Err(Error::not_found("document does not exist").into());
	}
	Ok(Json(serde_json::json!({ "replaced": true })))
}

pub(crate) async fn remove(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection, id)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
	let database = ctx.resolve_database(&user, &db)?;
	let id = DocId::parse_lossy(&id);
	let applied = documents::delete(&ctx, &user, &database, &collection, id, None).await?;
	if !applied {
		return Err(Error::not_found("document does not exist").into());
	}
	Ok(StatusCode::NO_CONTENT)
}

/// Decodes hit buffers into their JSON form.
pub(crate) async fn render_hits(
	ctx: &ServerContext,
	database: &str,
	hits: Vec<blite_query::QueryHit>,
) -> ApiResult<Json<Vec<Json_>>> {
	let dictionary = queries::dictionary(ctx, database).await?;
	let mut out = Vec::with_capacity(hits.len());
	for hit in hits {
		let doc = blite_codec::decode(&hit.bytes, &dictionary).map_err(Error::from)?;
		out.push(document_to_json(&doc));
	}
	Ok(Json(out))
}
