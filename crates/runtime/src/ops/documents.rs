// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Document CRUD shared by the dynamic and typed services and the HTTP
//! document routes.

use blite_auth::{OpMask, User, guard};
use blite_core::Result;
use blite_core::value::{DocId, Document};
use tracing::instrument;
use uuid::Uuid;

use super::{engine_call, engine_write};
use crate::ServerContext;

#[instrument(skip(ctx, user, doc), fields(user = %user.name))]
pub async fn insert(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	doc: Document,
	txn_id: Option<Uuid>,
) -> Result<DocId> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::INSERT)?;
	let target = physical.clone();
	engine_write(ctx, user, database, &physical, txn_id, move |engine, txn| {
		engine.insert(&target, doc, txn)
	})
	.await
}

#[instrument(skip(ctx, user, docs), fields(user = %user.name, count = docs.len()))]
pub async fn insert_many(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	docs: Vec<Document>,
	txn_id: Option<Uuid>,
) -> Result<Vec<DocId>> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::INSERT)?;
	let target = physical.clone();
	engine_write(ctx, user, database, &physical, txn_id, move |engine, txn| {
		engine.insert_many(&target, docs, txn)
	})
	.await
}

/// Returns the raw document buffer, or None for a miss.
#[instrument(skip(ctx, user, id), fields(user = %user.name))]
pub async fn find_by_id(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	id: DocId,
) -> Result<Option<Vec<u8>>> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::QUERY)?;
	engine_call(ctx, database, move |engine| engine.find(&physical, &id)).await
}

/// Replaces the document carrying the same `_id`. False when missing.
#[instrument(skip(ctx, user, doc), fields(user = %user.name))]
pub async fn update(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	doc: Document,
	txn_id: Option<Uuid>,
) -> Result<bool> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::UPDATE)?;
	let target = physical.clone();
	engine_write(ctx, user, database, &physical, txn_id, move |engine, txn| {
		engine.update(&target, doc, txn)
	})
	.await
}

#[instrument(skip(ctx, user, docs), fields(user = %user.name, count = docs.len()))]
pub async fn update_many(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	docs: Vec<Document>,
	txn_id: Option<Uuid>,
) -> Result<u64> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::UPDATE)?;
	let target = physical.clone();
	engine_write(ctx, user, database, &physical, txn_id, move |engine, txn| {
		let mut updated = 0u64;
		for doc in docs {
			if engine.update(&target, doc, txn)? {
				updated += 1;
			}
		}
		Ok(updated)
	})
	.await
}

#[instrument(skip(ctx, user, id), fields(user = %user.name))]
pub async fn delete(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	id: DocId,
	txn_id: Option<Uuid>,
) -> Result<bool> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::DELETE)?;
	let target = physical.clone();
	engine_write(ctx, user, database, &physical, txn_id, move |engine, txn| {
		engine.delete(&target, &id, txn)
	})
	.await
}

#[instrument(skip(ctx, user, ids), fields(user = %user.name, count = ids.len()))]
pub async fn delete_many(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	ids: Vec<DocId>,
	txn_id: Option<Uuid>,
) -> Result<u64> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::DELETE)?;
	let target = physical.clone();
	engine_write(ctx, user, database, &physical, txn_id, move |engine, txn| {
		let mut deleted = 0u64;
		for id in &ids {
			if engine.delete(&target, id, txn)? {
				deleted += 1;
			}
		}
		Ok(deleted)
	})
	.await
}
