// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Shared request operations.
//!
//! Every mutation follows the same flow: database restriction → access
//! guard (which resolves the physical name) → optional transaction
//! session lookup → engine mutation → cache invalidation or dirty-mark.
//! Reads follow: restriction → guard → cache probe → engine.

pub mod admin;
pub mod collections;
pub mod documents;
pub mod metadata;
pub mod queries;
pub mod transactions;

use std::sync::Arc;

use blite_auth::User;
use blite_core::{Error, ErrorKind, Result};
use blite_engine::{Engine, EngineError, EngineTxn};
use uuid::Uuid;

use crate::ServerContext;

/// Runs an engine mutation, routed through a transaction session when a
/// transaction id is supplied. Ad-hoc writes invalidate the cache for
/// the physical collection before acknowledging; session writes mark the
/// dirty set instead and invalidation happens at commit.
pub(crate) async fn engine_write<R, F>(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	physical: &str,
	txn_id: Option<Uuid>,
	f: F,
) -> Result<R>
where
	R: Send + 'static,
	F: FnOnce(&Engine, Option<&EngineTxn>) -> std::result::Result<R, EngineError> + Send + 'static,
{
	match txn_id {
		Some(id) => {
			let session = ctx.coordinator.require(id, &user.name)?;
			if session.database() != database {
				return Err(Error::new(
					ErrorKind::SemanticFailure,
					format!(
						"transaction {id} is bound to database '{}'",
						blite_core::database_label(session.database())
					),
				));
			}
			let run_session = Arc::clone(&session);
			let result = tokio::task::spawn_blocking(move || {
				f(run_session.engine(), Some(run_session.txn()))
			})
			.await
			.map_err(|e| Error::internal(format!("engine write task failed: {e}")))?
			.map_err(Error::from)?;
			session.mark_dirty(physical);
			Ok(result)
		}
		None => {
			let engine = ctx.engine(database).await?;
			let result = tokio::task::spawn_blocking(move || f(&engine, None))
				.await
				.map_err(|e| Error::internal(format!("engine write task failed: {e}")))?
				.map_err(Error::from)?;
			ctx.cache.invalidate(database, physical);
			Ok(result)
		}
	}
}

/// Runs a blocking engine call off the async runtime. Descriptor-level
/// mutations (DDL) go through here too; they commit ad-hoc inside the
/// engine and need no transaction routing.
pub(crate) async fn engine_call<R, F>(ctx: &ServerContext, database: &str, f: F) -> Result<R>
where
	R: Send + 'static,
	F: FnOnce(&Engine) -> std::result::Result<R, EngineError> + Send + 'static,
{
	let engine = ctx.engine(database).await?;
	tokio::task::spawn_blocking(move || f(&engine))
		.await
		.map_err(|e| Error::internal(format!("engine read task failed: {e}")))?
		.map_err(Error::from)
}
