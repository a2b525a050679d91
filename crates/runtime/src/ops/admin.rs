// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The admin surface: user lifecycle and tenant lifecycle. Every call
//! requires admin rights (`ADMIN` on `*` or `_admin`).

use std::path::PathBuf;
use std::sync::Arc;

use blite_auth::{PermissionEntry, User, guard};
use blite_core::{Error, Result, database_label};
use blite_engine::TenantInfo;
use tracing::instrument;

use crate::ServerContext;

pub async fn create_user(
	ctx: &ServerContext,
	caller: &User,
	name: &str,
	permissions: Vec<PermissionEntry>,
	namespace: Option<String>,
	restricted_database: Option<String>,
) -> Result<(User, String)> {
	guard::check_admin(caller)?;
	let identity = Arc::clone(&ctx.identity);
	let name = name.to_string();
	tokio::task::spawn_blocking(move || identity.create_user(&name, permissions, namespace, restricted_database))
		.await
		.map_err(|e| Error::internal(format!("user creation task failed: {e}")))?
}

pub async fn revoke_user(ctx: &ServerContext, caller: &User, name: &str) -> Result<()> {
	guard::check_admin(caller)?;
	let identity = Arc::clone(&ctx.identity);
	let name = name.to_string();
	tokio::task::spawn_blocking(move || identity.revoke(&name))
		.await
		.map_err(|e| Error::internal(format!("user revocation task failed: {e}")))?
}

pub async fn delete_user(ctx: &ServerContext, caller: &User, name: &str) -> Result<()> {
	guard::check_admin(caller)?;
	let identity = Arc::clone(&ctx.identity);
	let name = name.to_string();
	tokio::task::spawn_blocking(move || identity.delete(&name))
		.await
		.map_err(|e| Error::internal(format!("user deletion task failed: {e}")))?
}

pub async fn rotate_key(ctx: &ServerContext, caller: &User, name: &str) -> Result<String> {
	guard::check_admin(caller)?;
	let identity = Arc::clone(&ctx.identity);
	let name = name.to_string();
	tokio::task::spawn_blocking(move || identity.rotate_key(&name))
		.await
		.map_err(|e| Error::internal(format!("key rotation task failed: {e}")))?
}

pub async fn update_permissions(
	ctx: &ServerContext,
	caller: &User,
	name: &str,
	permissions: Vec<PermissionEntry>,
) -> Result<User> {
	guard::check_admin(caller)?;
	let identity = Arc::clone(&ctx.identity);
	let name = name.to_string();
	tokio::task::spawn_blocking(move || identity.update_permissions(&name, permissions))
		.await
		.map_err(|e| Error::internal(format!("permission update task failed: {e}")))?
}

pub fn list_users(ctx: &ServerContext, caller: &User) -> Result<Vec<User>> {
	guard::check_admin(caller)?;
	Ok(ctx.identity.list())
}

#[instrument(skip(ctx, caller), fields(user = %caller.name))]
pub async fn provision_tenant(ctx: &ServerContext, caller: &User, id: &str) -> Result<()> {
	guard::check_admin(caller)?;
	let registry = Arc::clone(&ctx.registry);
	let id = id.to_string();
	tokio::task::spawn_blocking(move || registry.provision(&id).map(|_| ()))
		.await
		.map_err(|e| Error::internal(format!("provision task failed: {e}")))?
		.map_err(Error::from)
}

/// Deprovisions a tenant and invalidates every cached result for it.
#[instrument(skip(ctx, caller), fields(user = %caller.name))]
pub async fn deprovision_tenant(ctx: &ServerContext, caller: &User, id: &str, delete_files: bool) -> Result<()> {
	guard::check_admin(caller)?;
	let registry = Arc::clone(&ctx.registry);
	let canonical = blite_core::canonical_database_id(id);
	let target = canonical.clone();
	tokio::task::spawn_blocking(move || registry.deprovision(&target, delete_files))
		.await
		.map_err(|e| Error::internal(format!("deprovision task failed: {e}")))?
		.map_err(Error::from)?;
	ctx.cache.invalidate_database(&canonical);
	Ok(())
}

pub async fn list_tenants(ctx: &ServerContext, caller: &User) -> Result<Vec<TenantInfo>> {
	guard::check_admin(caller)?;
	let registry = Arc::clone(&ctx.registry);
	tokio::task::spawn_blocking(move || registry.list())
		.await
		.map_err(|e| Error::internal(format!("tenant list task failed: {e}")))?
		.map_err(Error::from)
}

/// Runs the engine's backup into a temporary file and returns its path
/// with the archive entry label (`{label}.db`). The caller streams and
/// unlinks the file.
#[instrument(skip(ctx, caller), fields(user = %caller.name))]
pub async fn backup_database(ctx: &ServerContext, caller: &User, database: &str) -> Result<(PathBuf, String)> {
	guard::check_admin(caller)?;
	guard::check_database(caller, database)?;

	let label = database_label(database).to_string();
	let engine = ctx.engine(database).await?;
	let path = std::env::temp_dir().join(format!("blite-backup-{}-{}.tmp", label, uuid::Uuid::new_v4()));
	let target = path.clone();
	tokio::task::spawn_blocking(move || engine.backup_to(&target).map(|_| ()))
		.await
		.map_err(|e| Error::internal(format!("backup task failed: {e}")))?
		.map_err(Error::from)?;
	Ok((path, format!("{label}.db")))
}
