// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! `/{db}/collections` and the dictionary sync routes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use blite_auth::User;
use blite_runtime::ServerContext;
use blite_runtime::ops::{collections, metadata};
use serde::Deserialize;

use crate::problem::ApiResult;

pub(crate) async fn list(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path(db): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
	let database = ctx.resolve_database(&user, &db)?;
	Ok(Json(collections::list(&ctx, &user, &database).await?))
}

#[derive(Deserialize)]
pub(crate) struct CreateCollectionBody {
	name: String,
}

pub(crate) async fn create(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path(db): Path<String>,
	Json(body): Json<CreateCollectionBody>,
) -> ApiResult<StatusCode> {
	let database = ctx.resolve_database(&user, &db)?;
	collections::create(&ctx, &user, &database, &body.name).await?;
	Ok(StatusCode::CREATED)
}

pub(crate) async fn drop(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
	let database = ctx.resolve_database(&user, &db)?;
	collections::drop(&ctx, &user, &database, &collection).await?;
	Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn key_map(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection)): Path<(String, String)>,
) -> ApiResult<Json<BTreeMap<String, u32>>> {
	let database = ctx.resolve_database(&user, &db)?;
	Ok(Json(metadata::get_key_map(&ctx, &user, &database, &collection).await?))
}

#[derive(Deserialize)]
pub(crate) struct RegisterKeysBody {
	names: Vec<String>,
}

pub(crate) async fn register_keys(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection)): Path<(String, String)>,
	Json(body): Json<RegisterKeysBody>,
) -> ApiResult<Json<BTreeMap<String, u32>>> {
	let database = ctx.resolve_database(&user, &db)?;
	let assigned = metadata::register_keys(&ctx, &user, &database, &collection, body.names).await?;
	Ok(Json(assigned.into_iter().collect()))
}
