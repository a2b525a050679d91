// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The query result cache.
//!
//! Entries are keyed by `(database, physical collection, variant,
//! parameter hash)` and tagged with a per-`(database, collection)`
//! invalidation token. Invalidation atomically removes and cancels the
//! token, making every tagged entry unreachable at once; there is no
//! prefix scanning. When disabled, every call is a no-op and no key is
//! computed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use blite_core::config::QueryCacheConfig;
use blite_core::database_label;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};
use xxhash_rust::xxh3::xxh3_64;

/// Which request shape produced a cached value. Part of the key, so the
/// same parameters from different endpoints never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheVariant {
	/// Collection or document listings.
	List,
	/// HTTP JSON-filter queries (body hash).
	JsonQuery,
	/// HTTP query-string queries (concatenated parameter hash).
	ParamQuery,
	/// Count queries.
	Count,
	/// Binary RPC queries (descriptor-bytes hash).
	Descriptor,
}

impl CacheVariant {
	fn code(&self) -> &'static str {
		match self {
			CacheVariant::List => "list",
			CacheVariant::JsonQuery => "qjson",
			CacheVariant::ParamQuery => "qparams",
			CacheVariant::Count => "count",
			CacheVariant::Descriptor => "qdesc",
		}
	}
}

/// A materialised result: pre-encoded document buffers with their ids,
/// or a small JSON-shaped scalar (counts, name lists).
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
	Hits(Vec<(Vec<u8>, Vec<u8>)>),
	Scalar(String),
}

impl CachedValue {
	fn byte_size(&self) -> usize {
		match self {
			CachedValue::Hits(hits) => hits.iter().map(|(id, doc)| id.len() + doc.len()).sum(),
			CachedValue::Scalar(s) => s.len(),
		}
	}

	fn element_count(&self) -> usize {
		match self {
			CachedValue::Hits(hits) => hits.len(),
			CachedValue::Scalar(_) => 1,
		}
	}
}

/// Cancellation handle shared by every entry tagged with one
/// `(database, collection)` pair.
#[derive(Debug, Default)]
struct InvalidationToken {
	cancelled: AtomicBool,
}

struct CacheEntry {
	value: CachedValue,
	token: Arc<InvalidationToken>,
	inserted_at: Instant,
	last_access: Mutex<Instant>,
	bytes: usize,
}

pub struct QueryCache {
	config: QueryCacheConfig,
	entries: DashMap<String, CacheEntry>,
	tokens: DashMap<(String, String), Arc<InvalidationToken>>,
	total_bytes: AtomicUsize,
}

impl std::fmt::Debug for QueryCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("QueryCache")
			.field("enabled", &self.config.enabled)
			.field("entries", &self.entries.len())
			.finish()
	}
}

impl QueryCache {
	pub fn new(config: QueryCacheConfig) -> Self {
		Self { config, entries: DashMap::new(), tokens: DashMap::new(), total_bytes: AtomicUsize::new(0) }
	}

	pub fn enabled(&self) -> bool {
		self.config.enabled
	}

	pub fn max_result_set_size(&self) -> usize {
		self.config.max_result_set_size
	}

	/// Deterministic key, or None when the cache is disabled.
	pub fn key_for(&self, database: &str, collection: &str, variant: CacheVariant, params: &[u8]) -> Option<String> {
		if !self.config.enabled {
			return None;
		}
		Some(format!(
			"{}:{}:{}:{:016x}",
			database_label(database),
			collection,
			variant.code(),
			xxh3_64(params)
		))
	}

	pub fn get(&self, key: &str) -> Option<CachedValue> {
		if !self.config.enabled {
			return None;
		}
		let now = Instant::now();
		let (value, dead) = {
			let entry = self.entries.get(key)?;
			if entry.token.cancelled.load(Ordering::Acquire) || self.expired(&entry, now) {
				(None, true)
			} else {
				*entry.last_access.lock() = now;
				(Some(entry.value.clone()), false)
			}
		};
		if dead {
			self.remove_entry(key);
		}
		trace!(key, hit = value.is_some(), "cache probe");
		value
	}

	/// Stores a value tagged with the `(database, collection)` token.
	/// Returns false when the value was refused (oversized result set or
	/// byte budget exhausted).
	pub fn set(&self, key: &str, value: CachedValue, database: &str, collection: &str) -> bool {
		if !self.config.enabled {
			return false;
		}
		if value.element_count() > self.config.max_result_set_size {
			debug!(key, "cache refuses oversized result set");
			return false;
		}
		let bytes = value.byte_size();
		if self.total_bytes.load(Ordering::Relaxed) + bytes > self.config.max_size_bytes {
			self.purge_dead();
			if self.total_bytes.load(Ordering::Relaxed) + bytes > self.config.max_size_bytes {
				debug!(key, bytes, "cache byte budget exhausted");
				return false;
			}
		}

		let token = self
			.tokens
			.entry((database.to_string(), collection.to_string()))
			.or_insert_with(Arc::default)
			.clone();
		let now = Instant::now();
		let entry = CacheEntry { value, token, inserted_at: now, last_access: Mutex::new(now), bytes };
		if let Some(previous) = self.entries.insert(key.to_string(), entry) {
			self.total_bytes.fetch_sub(previous.bytes, Ordering::Relaxed);
		}
		self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
		true
	}

	/// Atomically removes and cancels the token for the pair; every entry
	/// tagged with it becomes unreachable.
	pub fn invalidate(&self, database: &str, collection: &str) {
		if !self.config.enabled {
			return;
		}
		if let Some((_, token)) = self.tokens.remove(&(database.to_string(), collection.to_string())) {
			token.cancelled.store(true, Ordering::Release);
			debug!(database = database_label(database), collection, "cache invalidated");
		}
	}

	/// Invalidates every collection pair of one database.
	pub fn invalidate_database(&self, database: &str) {
		if !self.config.enabled {
			return;
		}
		let pairs: Vec<(String, String)> = self
			.tokens
			.iter()
			.filter(|entry| entry.key().0 == database)
			.map(|entry| entry.key().clone())
			.collect();
		for (db, collection) in pairs {
			self.invalidate(&db, &collection);
		}
	}

	fn expired(&self, entry: &CacheEntry, now: Instant) -> bool {
		let sliding = Duration::from_secs(self.config.sliding_expiration_seconds);
		let absolute = Duration::from_secs(self.config.absolute_expiration_seconds);
		now.duration_since(*entry.last_access.lock()) > sliding
			|| now.duration_since(entry.inserted_at) > absolute
	}

	fn remove_entry(&self, key: &str) {
		if let Some((_, entry)) = self.entries.remove(key) {
			self.total_bytes.fetch_sub(entry.bytes, Ordering::Relaxed);
		}
	}

	/// Drops cancelled and expired entries to reclaim budget.
	fn purge_dead(&self) {
		let now = Instant::now();
		let dead: Vec<String> = self
			.entries
			.iter()
			.filter(|entry| entry.token.cancelled.load(Ordering::Acquire) || self.expired(entry, now))
			.map(|entry| entry.key().clone())
			.collect();
		for key in dead {
			self.remove_entry(&key);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn enabled_config() -> QueryCacheConfig {
		QueryCacheConfig { enabled: true, ..QueryCacheConfig::default() }
	}

	fn hits(n: usize) -> CachedValue {
		CachedValue::Hits((0..n).map(|i| (vec![i as u8], vec![0u8; 8])).collect())
	}

	#[test]
	fn disabled_cache_is_a_no_op() {
		let cache = QueryCache::new(QueryCacheConfig::default());
		assert!(cache.key_for("", "orders", CacheVariant::List, b"").is_none());
		assert!(!cache.set("k", hits(1), "", "orders"));
		assert!(cache.get("k").is_none());
	}

	#[test]
	fn keys_isolate_tenants_and_variants() {
		let cache = QueryCache::new(enabled_config());
		let a = cache.key_for("", "orders", CacheVariant::List, b"p").unwrap();
		let b = cache.key_for("tenant-a", "orders", CacheVariant::List, b"p").unwrap();
		let c = cache.key_for("", "orders", CacheVariant::Count, b"p").unwrap();
		let d = cache.key_for("", "orders", CacheVariant::List, b"q").unwrap();
		assert!(a.starts_with("_system:"));
		assert_ne!(a, b);
		assert_ne!(a, c);
		assert_ne!(a, d);
	}

	#[test]
	fn set_get_and_tag_invalidation() {
		let cache = QueryCache::new(enabled_config());
		assert!(cache.set("k1", hits(2), "", "orders"));
		assert!(cache.set("k2", hits(1), "", "orders"));
		assert!(cache.set("k3", hits(1), "", "other"));

		assert_eq!(cache.get("k1"), Some(hits(2)));

		cache.invalidate("", "orders");
		assert!(cache.get("k1").is_none());
		assert!(cache.get("k2").is_none());
		assert_eq!(cache.get("k3"), Some(hits(1)), "other collection is untouched");

		// A fresh token is installed on the next set for the pair.
		assert!(cache.set("k1", hits(1), "", "orders"));
		assert_eq!(cache.get("k1"), Some(hits(1)));
	}

	#[test]
	fn database_invalidation_sweeps_every_collection() {
		let cache = QueryCache::new(enabled_config());
		cache.set("a", hits(1), "tenant-a", "col1");
		cache.set("b", hits(1), "tenant-a", "col2");
		cache.set("c", hits(1), "tenant-b", "col1");

		cache.invalidate_database("tenant-a");
		assert!(cache.get("a").is_none());
		assert!(cache.get("b").is_none());
		assert!(cache.get("c").is_some());
	}

	#[test]
	fn oversized_result_sets_are_refused() {
		let config = QueryCacheConfig { enabled: true, max_result_set_size: 2, ..QueryCacheConfig::default() };
		let cache = QueryCache::new(config);
		assert!(!cache.set("big", hits(3), "", "orders"));
		assert!(cache.set("ok", hits(2), "", "orders"));
	}

	#[test]
	fn byte_budget_refuses_when_full_of_live_entries() {
		let config = QueryCacheConfig { enabled: true, max_size_bytes: 30, ..QueryCacheConfig::default() };
		let cache = QueryCache::new(config);
		assert!(cache.set("a", hits(2), "", "orders"));
		assert!(!cache.set("b", hits(2), "", "orders"), "live entries fill the budget");

		// Invalidated entries are purged to make room.
		cache.invalidate("", "orders");
		assert!(cache.set("b", hits(2), "", "orders"));
	}

	#[test]
	fn absolute_expiry_evicts() {
		let config = QueryCacheConfig {
			enabled: true,
			sliding_expiration_seconds: 0,
			absolute_expiration_seconds: 0,
			..QueryCacheConfig::default()
		};
		let cache = QueryCache::new(config);
		cache.set("k", hits(1), "", "orders");
		std::thread::sleep(Duration::from_millis(5));
		assert!(cache.get("k").is_none());
	}
}
