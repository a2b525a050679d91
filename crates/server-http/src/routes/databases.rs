// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! `/databases`: tenant lifecycle and the ZIP backup stream.

use std::io::Write;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use blite_auth::User;
use blite_core::Error;
use blite_runtime::ServerContext;
use blite_runtime::ops::admin;
use serde::{Deserialize, Serialize};

use crate::problem::ApiResult;

#[derive(Serialize)]
pub(crate) struct TenantView {
	id: String,
	active: bool,
}

pub(crate) async fn list(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
) -> ApiResult<Json<Vec<TenantView>>> {
	let tenants = admin::list_tenants(&ctx, &user).await?;
	Ok(Json(tenants.into_iter().map(|t| TenantView { id: t.id, active: t.active }).collect()))
}

#[derive(Deserialize)]
pub(crate) struct ProvisionBody {
	id: String,
}

pub(crate) async fn provision(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Json(body): Json<ProvisionBody>,
) -> ApiResult<StatusCode> {
	admin::provision_tenant(&ctx, &user, &body.id).await?;
	Ok(StatusCode::CREATED)
}

#[derive(Deserialize)]
pub(crate) struct DeprovisionParams {
	#[serde(rename = "deleteFiles", default)]
	delete_files: bool,
}

pub(crate) async fn deprovision(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path(id): Path<String>,
	Query(params): Query<DeprovisionParams>,
) -> ApiResult<StatusCode> {
	admin::deprovision_tenant(&ctx, &user, &id, params.delete_files).await?;
	Ok(StatusCode::NO_CONTENT)
}

/// Streams a ZIP archive holding one `{label}.db` entry: the engine's
/// backup written to a temporary file, zipped, then unlinked.
pub(crate) async fn backup(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path(id): Path<String>,
) -> ApiResult<Response> {
	let database = ctx.resolve_database(&user, &id)?;
	let (path, label) = admin::backup_database(&ctx, &user, &database).await?;

	let archive_label = label.clone();
	let archive = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, Error> {
		let bytes = std::fs::read(&path)?;
		std::fs::remove_file(&path)?;

		let mut cursor = std::io::Cursor::new(Vec::new());
		let mut writer = zip::ZipWriter::new(&mut cursor);
		writer
			.start_file(archive_label, zip::write::SimpleFileOptions::default())
			.map_err(|e| Error::internal(format!("zip entry failed: {e}")))?;
		writer.write_all(&bytes)?;
		writer.finish().map_err(|e| Error::internal(format!("zip finish failed: {e}")))?;
		Ok(cursor.into_inner())
	})
	.await
	.map_err(|e| Error::internal(format!("backup archive task failed: {e}")))??;

	let filename = format!("{}.zip", label.trim_end_matches(".db"));
	let response = (
		[
			(header::CONTENT_TYPE, "application/zip".to_string()),
			(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
		],
		archive,
	)
		.into_response();
	Ok(response)
}
