// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Query, count and vector-search execution with the cache in front.
//!
//! A cached read is served only when the cache is enabled and no
//! transaction is active on the database. When a result is cacheable the
//! stream is materialised first, so a later cache hit replays the exact
//! sequence of encoded buffers.

use std::sync::Arc;

use blite_auth::{OpMask, User, guard};
use blite_cache::{CacheVariant, CachedValue};
use blite_core::value::DocId;
use blite_core::{Error, Result};
use blite_query::{DocumentStream, QueryDescriptor, QueryHit, execute};
use tracing::{debug, instrument};

use super::engine_call;
use crate::ServerContext;

/// Either a live lazy stream, or a materialised result (cache hit, or a
/// fresh result that was materialised to become cacheable).
#[derive(Debug)]
pub enum QueryOutcome {
	Stream(DocumentStream),
	Materialised(Vec<QueryHit>),
}

impl QueryOutcome {
	/// Collapses the outcome into a vector; surfaces that do not stream
	/// use this.
	pub async fn into_hits(self) -> Result<Vec<QueryHit>> {
		match self {
			QueryOutcome::Stream(stream) => stream.collect_hits().await,
			QueryOutcome::Materialised(hits) => Ok(hits),
		}
	}
}

/// Runs a descriptor. `variant` and `cache_params` identify the request
/// shape for the cache key; pass the canonical bytes the surface hashed.
#[instrument(skip(ctx, user, descriptor, cache_params), fields(user = %user.name, collection = %descriptor.collection))]
pub async fn run(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	mut descriptor: QueryDescriptor,
	variant: CacheVariant,
	cache_params: &[u8],
) -> Result<QueryOutcome> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, &descriptor.collection, OpMask::QUERY)?;
	descriptor.collection = physical.clone();

	let cacheable = ctx.cache.enabled() && !ctx.coordinator.has_active(database);
	let key = if cacheable { ctx.cache.key_for(database, &physical, variant, cache_params) } else { None };

	if let Some(key) = &key {
		if let Some(CachedValue::Hits(cached)) = ctx.cache.get(key) {
			debug!("query served from cache");
			let hits = cached
				.into_iter()
				.map(|(id, bytes)| Ok(QueryHit { id: DocId::from_bytes(&id)?, bytes }))
				.collect::<Result<Vec<_>>>()?;
			return Ok(QueryOutcome::Materialised(hits));
		}
	}

	let engine = ctx.engine(database).await?;
	let stream = execute(engine, descriptor)?;

	match key {
		None => Ok(QueryOutcome::Stream(stream)),
		Some(key) => {
			// Materialise so the same encoded sequence can replay later.
			let hits = stream.collect_hits().await?;
			if hits.len() <= ctx.cache.max_result_set_size() {
				let value = CachedValue::Hits(
					hits.iter().map(|hit| (hit.id.to_bytes(), hit.bytes.clone())).collect(),
				);
				ctx.cache.set(&key, value, database, &physical);
			}
			Ok(QueryOutcome::Materialised(hits))
		}
	}
}

/// Counts matches for a descriptor (filter honoured, paging ignored).
#[instrument(skip(ctx, user, descriptor, cache_params), fields(user = %user.name))]
pub async fn count(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	mut descriptor: QueryDescriptor,
	cache_params: &[u8],
) -> Result<u64> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, &descriptor.collection, OpMask::QUERY)?;
	descriptor.collection = physical.clone();
	descriptor.skip = None;
	descriptor.take = None;
	descriptor.order_by.clear();
	descriptor.select = None;

	let cacheable = ctx.cache.enabled() && !ctx.coordinator.has_active(database);
	let key =
		if cacheable { ctx.cache.key_for(database, &physical, CacheVariant::Count, cache_params) } else { None };
	if let Some(key) = &key {
		if let Some(CachedValue::Scalar(raw)) = ctx.cache.get(key) {
			if let Ok(count) = raw.parse() {
				return Ok(count);
			}
		}
	}

	let count = match &descriptor.filter {
		None => {
			let physical = physical.clone();
			engine_call(ctx, database, move |engine| engine.count(&physical)).await?
		}
		Some(_) => {
			let engine = ctx.engine(database).await?;
			let mut stream = execute(engine, descriptor)?;
			let mut count = 0u64;
			while let Some(item) = stream.next().await {
				item?;
				count += 1;
			}
			count
		}
	};

	if let Some(key) = &key {
		ctx.cache.set(key, CachedValue::Scalar(count.to_string()), database, &physical);
	}
	Ok(count)
}

/// A vector-search match with its decodable buffer.
#[derive(Debug, Clone)]
pub struct VectorMatch {
	pub id: DocId,
	pub score: f64,
	pub bytes: Vec<u8>,
}

/// Exact k-nearest search over the collection's vector index.
#[instrument(skip(ctx, user, query), fields(user = %user.name, k))]
pub async fn vector_search(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	collection: &str,
	index_name: Option<String>,
	k: usize,
	query: Vec<f32>,
) -> Result<Vec<VectorMatch>> {
	guard::check_database(user, database)?;
	let physical = guard::check(user, collection, OpMask::QUERY)?;
	if query.is_empty() {
		return Err(Error::invalid_input("query vector is empty"));
	}
	if k == 0 {
		return Ok(Vec::new());
	}

	let hits = engine_call(ctx, database, move |engine| {
		engine.vector_search(&physical, index_name.as_deref(), &query, k)
	})
	.await?;
	Ok(hits
		.into_iter()
		.map(|hit| VectorMatch { id: hit.id, score: hit.score, bytes: hit.bytes })
		.collect())
}

/// Decodes descriptor bytes from the wire and runs them; the binary RPC
/// query path.
pub async fn run_wire(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	descriptor_bytes: &[u8],
) -> Result<QueryOutcome> {
	let descriptor = blite_query::decode_descriptor(descriptor_bytes).map_err(Error::from)?;
	run(ctx, user, database, descriptor, CacheVariant::Descriptor, descriptor_bytes).await
}

/// Engine handle helper shared with surfaces needing decode access.
pub async fn dictionary(ctx: &ServerContext, database: &str) -> Result<Arc<blite_codec::FieldDictionary>> {
	let engine = ctx.engine(database).await?;
	Ok(Arc::clone(engine.dictionary()))
}
