// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Collection lifecycle, secondary indexes, schema history, time-series
//! and vector-source configuration.

use blite_auth::{OpMask, User, guard};
use blite_core::{Error, Result};
use blite_engine::{
	CollectionDescriptor, IndexDescriptor, IndexKind, SchemaField, SchemaVersion, TimeSeriesConfig,
	VectorSourceConfig,
};
use tracing::instrument;

use super::engine_call;
use crate::ServerContext;

/// Collections visible to the caller: namespace-stripped, filtered to
/// names the caller may query.
#[instrument(skip(ctx, user), fields(user = %user.name))]
pub async fn list(ctx: &ServerContext, user: &User, database: &str) -> Result<Vec<String>> {
	guard::check_database(user, database)?;
	if !user.active {
		return Err(Error::inactive_user(&user.name));
	}
	let physical_names = engine_call(ctx, database, |engine| Ok(engine.list_collections())).await?;

	let mut visible = Vec::new();
	for physical in physical_names {
		if physical.starts_with('_') {
			continue; // system collections stay internal
		}
		let Some(logical) = guard::strip_namespace(user, &physical) else {
			continue;
		};
		if guard::check(user, &logical, OpMask::QUERY).is_ok() {
			visible.push(logical);
		}
	}
	visible.sort();
	Ok(visible)
}

#[instrument(skip(ctx, user), fields(user = %user.name))]
pub async fn create(ctx: &ServerContext, user: &User, database: &str, collection: &str) -> Result<()> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::INSERT)?;
	engine_call(ctx, database, move |engine| engine.create_collection(&physical)).await
}

/// Drops the collection and invalidates its cache pair. NotFound when
/// the collection does not exist.
#[instrument(skip(ctx, user), fields(user = %user.name))]
pub async fn drop(ctx: &ServerContext, user: &User, database: &str, collection: &str) -> Result<()> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::DROP)?;
	let target = physical.clone();
	let dropped = engine_call(ctx, database, move |engine| engine.drop_collection(&target)).await?;
	if !dropped {
		return Err(Error::not_found(format!("collection '{collection}' does not exist")));
	}
	ctx.cache.invalidate(database, &physical);
	Ok(())
}

/// Full descriptor for config read paths. Requires query access.
pub async fn descriptor(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
) -> Result<CollectionDescriptor> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::QUERY)?;
	engine_call(ctx, database, move |engine| {
		engine
			.descriptor(&physical)
			.ok_or_else(|| blite_engine::EngineError::CollectionNotFound(physical.clone()))
	})
	.await
}

#[instrument(skip(ctx, user, index), fields(user = %user.name, index = %index.name))]
pub async fn create_index(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	index: IndexDescriptor,
) -> Result<()> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::ADMIN)?;
	if index.kind == IndexKind::Vector && index.dimensions.is_none() {
		return Err(Error::invalid_input("vector indexes require dimensions"));
	}
	let is_vector = index.kind == IndexKind::Vector;
	engine_call(ctx, database, move |engine| engine.create_index(&physical, index)).await?;
	if is_vector {
		// A vector index may complete an embeddable collection.
		let _ = ctx.populator.resync();
	}
	Ok(())
}

#[instrument(skip(ctx, user), fields(user = %user.name))]
pub async fn drop_index(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	index_name: &str,
) -> Result<()> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::ADMIN)?;
	let name = index_name.to_string();
	engine_call(ctx, database, move |engine| engine.drop_index(&physical, &name)).await?;
	let _ = ctx.populator.resync();
	Ok(())
}

pub async fn list_indexes(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
) -> Result<Vec<IndexDescriptor>> {
	Ok(descriptor(ctx, user, database, collection).await?.indexes)
}

#[instrument(skip(ctx, user, fields), fields(user = %user.name))]
pub async fn set_schema(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	fields: Vec<SchemaField>,
) -> Result<SchemaVersion> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::ADMIN)?;
	engine_call(ctx, database, move |engine| engine.set_schema(&physical, fields)).await
}

pub async fn get_schema(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
) -> Result<Vec<SchemaVersion>> {
	Ok(descriptor(ctx, user, database, collection).await?.schema)
}

#[instrument(skip(ctx, user, config), fields(user = %user.name))]
pub async fn set_time_series(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	config: Option<TimeSeriesConfig>,
) -> Result<()> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::ADMIN)?;
	engine_call(ctx, database, move |engine| engine.set_time_series(&physical, config)).await
}

pub async fn get_time_series(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
) -> Result<Option<TimeSeriesConfig>> {
	Ok(descriptor(ctx, user, database, collection).await?.time_series)
}

/// Sets or clears the vector-source recipe and resyncs the embedding
/// populator's subscriptions.
#[instrument(skip(ctx, user, config), fields(user = %user.name))]
pub async fn set_vector_source(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	config: Option<VectorSourceConfig>,
) -> Result<()> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::ADMIN)?;
	engine_call(ctx, database, move |engine| engine.set_vector_source(&physical, config)).await?;
	let _ = ctx.populator.resync();
	Ok(())
}

pub async fn get_vector_source(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
) -> Result<Option<VectorSourceConfig>> {
	Ok(descriptor(ctx, user, database, collection).await?.vector_source)
}
