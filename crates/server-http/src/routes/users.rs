// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! `/users`: list, create, delete, permission updates, key rotation and
//! revocation. All of it sits behind the admin gate in the runtime.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use blite_auth::{OpMask, PermissionEntry, User};
use blite_core::{Error, Result};
use blite_runtime::ServerContext;
use blite_runtime::ops::admin;
use serde::{Deserialize, Serialize};

use crate::problem::ApiResult;

#[derive(Serialize)]
pub(crate) struct UserView {
	name: String,
	active: bool,
	#[serde(rename = "createdAt")]
	created_at: i64,
	permissions: Vec<PermissionView>,
	namespace: Option<String>,
	#[serde(rename = "restrictedDatabase")]
	restricted_database: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct PermissionView {
	collection: String,
	ops: Vec<String>,
}

impl From<&User> for UserView {
	fn from(user: &User) -> Self {
		Self {
			name: user.name.clone(),
			active: user.active,
			created_at: user.created_at.millis(),
			permissions: user.permissions.iter().map(PermissionView::from).collect(),
			namespace: user.namespace.clone(),
			restricted_database: user.restricted_database.clone(),
		}
	}
}

impl From<&PermissionEntry> for PermissionView {
	fn from(entry: &PermissionEntry) -> Self {
		let mut ops = Vec::new();
		for (bit, name) in OP_NAMES {
			if entry.ops.contains(*bit) {
				ops.push((*name).to_string());
			}
		}
		Self { collection: entry.collection.clone(), ops }
	}
}

const OP_NAMES: &[(OpMask, &str)] = &[
	(OpMask::QUERY, "query"),
	(OpMask::INSERT, "insert"),
	(OpMask::UPDATE, "update"),
	(OpMask::DELETE, "delete"),
	(OpMask::DROP, "drop"),
	(OpMask::ADMIN, "admin"),
];

fn parse_ops(names: &[String]) -> Result<OpMask> {
	let mut mask = OpMask::empty();
	for name in names {
		mask |= match name.as_str() {
			"query" => OpMask::QUERY,
			"insert" => OpMask::INSERT,
			"update" => OpMask::UPDATE,
			"delete" => OpMask::DELETE,
			"drop" => OpMask::DROP,
			"admin" => OpMask::ADMIN,
			"write" => OpMask::WRITE,
			"all" => OpMask::ALL,
			other => return Err(Error::invalid_input(format!("unknown operation '{other}'"))),
		};
	}
	Ok(mask)
}

fn parse_permissions(views: Vec<PermissionView>) -> Result<Vec<PermissionEntry>> {
	views
		.into_iter()
		.map(|view| Ok(PermissionEntry::new(view.collection, parse_ops(&view.ops)?)))
		.collect()
}

pub(crate) async fn list(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
) -> ApiResult<Json<Vec<UserView>>> {
	let users = admin::list_users(&ctx, &user)?;
	Ok(Json(users.iter().map(UserView::from).collect()))
}

#[derive(Deserialize)]
pub(crate) struct CreateUserBody {
	name: String,
	#[serde(default)]
	permissions: Vec<PermissionView>,
	#[serde(default)]
	namespace: Option<String>,
	#[serde(rename = "restrictedDatabase", default)]
	restricted_database: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct CreatedUser {
	user: UserView,
	/// Returned exactly once; only a hash is stored.
	#[serde(rename = "apiKey")]
	api_key: String,
}

pub(crate) async fn create(
	State(ctx): State<Arc<ServerContext>>,
	Extension(caller): Extension<User>,
	Json(body): Json<CreateUserBody>,
) -> ApiResult<(StatusCode, Json<CreatedUser>)> {
	let permissions = parse_permissions(body.permissions)?;
	let (user, api_key) =
		admin::create_user(&ctx, &caller, &body.name, permissions, body.namespace, body.restricted_database)
			.await?;
	Ok((StatusCode::CREATED, Json(CreatedUser { user: UserView::from(&user), api_key })))
}

pub(crate) async fn remove(
	State(ctx): State<Arc<ServerContext>>,
	Extension(caller): Extension<User>,
	Path(name): Path<String>,
) -> ApiResult<StatusCode> {
	admin::delete_user(&ctx, &caller, &name).await?;
	Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(crate) struct UpdatePermissionsBody {
	permissions: Vec<PermissionView>,
}

pub(crate) async fn update_permissions(
	State(ctx): State<Arc<ServerContext>>,
	Extension(caller): Extension<User>,
	Path(name): Path<String>,
	Json(body): Json<UpdatePermissionsBody>,
) -> ApiResult<Json<UserView>> {
	let permissions = parse_permissions(body.permissions)?;
	let updated = admin::update_permissions(&ctx, &caller, &name, permissions).await?;
	Ok(Json(UserView::from(&updated)))
}

#[derive(Serialize)]
pub(crate) struct RotatedKey {
	#[serde(rename = "apiKey")]
	api_key: String,
}

pub(crate) async fn rotate_key(
	State(ctx): State<Arc<ServerContext>>,
	Extension(caller): Extension<User>,
	Path(name): Path<String>,
) -> ApiResult<Json<RotatedKey>> {
	let api_key = admin::rotate_key(&ctx, &caller, &name).await?;
	Ok(Json(RotatedKey { api_key }))
}

pub(crate) async fn revoke(
	State(ctx): State<Arc<ServerContext>>,
	Extension(caller): Extension<User>,
	Path(name): Path<String>,
) -> ApiResult<StatusCode> {
	admin::revoke_user(&ctx, &caller, &name).await?;
	Ok(StatusCode::NO_CONTENT)
}
