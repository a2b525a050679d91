// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! `/{db}/{collection}/vector-search` and the vector-source config.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, State};
use blite_auth::User;
use blite_core::Error;
use blite_engine::{VectorSourceConfig, VectorSourceField};
use blite_runtime::ServerContext;
use blite_runtime::ops::{collections, queries};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json_;

use crate::json::document_to_json;
use crate::problem::ApiResult;

#[derive(Deserialize)]
pub(crate) struct SearchBody {
	vector: Vec<f32>,
	#[serde(default = "default_k")]
	k: usize,
	#[serde(rename = "indexName", default)]
	index_name: Option<String>,
}

fn default_k() -> usize {
	10
}

#[derive(Serialize)]
pub(crate) struct SearchHit {
	score: f64,
	document: Json_,
}

/// Exact nearest-neighbour search. 422 when the collection has no
/// vector index.
pub(crate) async fn search(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection)): Path<(String, String)>,
	Json(body): Json<SearchBody>,
) -> ApiResult<Json<Vec<SearchHit>>> {
	let database = ctx.resolve_database(&user, &db)?;
	let matches =
		queries::vector_search(&ctx, &user, &database, &collection, body.index_name, body.k, body.vector).await?;

	let dictionary = queries::dictionary(&ctx, &database).await?;
	let mut out = Vec::with_capacity(matches.len());
	for found in matches {
		let doc = blite_codec::decode(&found.bytes, &dictionary).map_err(Error::from)?;
		out.push(SearchHit { score: found.score, document: document_to_json(&doc) });
	}
	Ok(Json(out))
}

#[derive(Serialize, Deserialize)]
pub(crate) struct SourceView {
	separator: String,
	fields: Vec<SourceFieldView>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct SourceFieldView {
	path: String,
	#[serde(default)]
	prefix: Option<String>,
	#[serde(default)]
	suffix: Option<String>,
}

pub(crate) async fn get_source(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection)): Path<(String, String)>,
) -> ApiResult<Json<Option<SourceView>>> {
	let database = ctx.resolve_database(&user, &db)?;
	let source = collections::get_vector_source(&ctx, &user, &database, &collection).await?;
	Ok(Json(source.map(|config| SourceView {
		separator: config.separator,
		fields: config
			.fields
			.into_iter()
			.map(|f| SourceFieldView { path: f.path, prefix: f.prefix, suffix: f.suffix })
			.collect(),
	})))
}

/// PUT with a config body sets the recipe; an explicit `null` clears it.
pub(crate) async fn set_source(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection)): Path<(String, String)>,
	Json(body): Json<Option<SourceView>>,
) -> ApiResult<Json<Json_>> {
	let database = ctx.resolve_database(&user, &db)?;
	let config = body.map(|view| VectorSourceConfig {
		separator: view.separator,
		fields: view
			.fields
			.into_iter()
			.map(|f| VectorSourceField { path: f.path.to_lowercase(), prefix: f.prefix, suffix: f.suffix })
			.collect(),
	});
	collections::set_vector_source(&ctx, &user, &database, &collection, config).await?;
	Ok(Json(serde_json::json!({ "updated": true })))
}
