// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

use std::sync::Arc;
use std::time::Duration;

use blite_auth::{IdentityStore, User};
use blite_cache::QueryCache;
use blite_core::config::ServerConfig;
use blite_core::{Result, canonical_database_id};
use blite_embedding::{EmbedderSlot, EmbeddingPopulator, EmbeddingQueue, EmbeddingWorker, embedder_from_config};
use blite_engine::{Engine, EngineRegistry};
use blite_txn::TransactionCoordinator;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

/// Everything a request handler needs, wired once at startup.
pub struct ServerContext {
	pub config: ServerConfig,
	pub registry: Arc<EngineRegistry>,
	pub identity: Arc<IdentityStore>,
	pub cache: Arc<QueryCache>,
	pub coordinator: Arc<TransactionCoordinator>,
	pub queue: Arc<EmbeddingQueue>,
	pub populator: Arc<EmbeddingPopulator>,
	pub embedder_slot: Arc<EmbedderSlot>,
	root_key: Option<String>,
}

impl std::fmt::Debug for ServerContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServerContext").finish_non_exhaustive()
	}
}

impl ServerContext {
	/// Opens the engines, loads identities and builds the singletons.
	/// Blocking; call before entering the async serve loops (or from a
	/// blocking task).
	#[instrument(skip(config))]
	pub fn open(config: ServerConfig) -> Result<Arc<Self>> {
		config.validate()?;

		let registry = Arc::new(EngineRegistry::open(&config.server.data_dir).map_err(blite_core::Error::from)?);
		let (identity, root_key) = IdentityStore::open(registry.system())?;
		let cache = Arc::new(QueryCache::new(config.query_cache.clone()));
		let coordinator = Arc::new(TransactionCoordinator::new(
			Arc::clone(&registry),
			Arc::clone(&cache),
			config.transactions.clone(),
		));
		let queue = Arc::new(EmbeddingQueue::new(
			registry.system(),
			Duration::from_secs(config.embedding_worker.stale_timeout_minutes * 60),
		));
		let populator = Arc::new(EmbeddingPopulator::new(Arc::clone(&registry), Arc::clone(&queue)));
		let embedder_slot = Arc::new(EmbedderSlot::new());
		embedder_slot.swap(embedder_from_config(&config.embedding)?);

		info!("server context ready");
		Ok(Arc::new(Self {
			config,
			registry,
			identity: Arc::new(identity),
			cache,
			coordinator,
			queue,
			populator,
			embedder_slot,
			root_key,
		}))
	}

	/// Root's plaintext key, present only on the startup that minted it.
	pub fn take_root_key(&self) -> Option<&str> {
		self.root_key.as_deref()
	}

	/// Per-request authentication: header value → user. The user is
	/// re-resolved on every request so revocation applies immediately.
	pub fn authenticate(&self, presented: Option<&str>) -> Result<User> {
		self.identity.authenticate(presented)
	}

	/// Canonicalises a database id from a URL path and enforces the
	/// caller's database restriction.
	pub fn resolve_database(&self, user: &User, raw: &str) -> Result<String> {
		let id = canonical_database_id(raw);
		blite_auth::guard::check_database(user, &id)?;
		Ok(id)
	}

	/// The database an RPC call targets: the user's restricted database,
	/// or the system database.
	pub fn default_database(&self, user: &User) -> String {
		user.restricted_database.clone().unwrap_or_default()
	}

	pub async fn engine(&self, database: &str) -> Result<Arc<Engine>> {
		let registry = Arc::clone(&self.registry);
		let database = database.to_string();
		tokio::task::spawn_blocking(move || registry.get(&database))
			.await
			.map_err(|e| blite_core::Error::internal(format!("engine lookup failed: {e}")))?
			.map_err(blite_core::Error::from)
	}

	/// Spawns the background tasks owned by the process root: the
	/// transaction sweeper and, when enabled, the embedding worker loop.
	pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
		let mut handles = vec![TransactionCoordinator::spawn_sweeper(Arc::clone(&self.coordinator))];
		if self.config.embedding_worker.enabled {
			let worker = Arc::new(EmbeddingWorker::new(
				Arc::clone(&self.registry),
				Arc::clone(&self.queue),
				Arc::clone(&self.embedder_slot),
				Arc::clone(&self.cache),
				self.config.embedding_worker.clone(),
				self.config.embedding.max_tokens,
			));
			handles.push(EmbeddingWorker::spawn(worker, Arc::clone(&self.populator)));
		}
		handles
	}
}
