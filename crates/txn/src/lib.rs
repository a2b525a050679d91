// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The transaction coordinator.
//!
//! At most one explicit transaction is active per database, enforced by
//! a one-permit semaphore per database id. Sessions are process-wide,
//! keyed by an opaque uuid, track the collections they dirtied, and are
//! rolled back by the sweeper once idle past the configured threshold.
//! Commit invalidates the cache for every dirtied collection before the
//! permit is released; rollback invalidates nothing.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use blite_cache::QueryCache;
use blite_core::config::TransactionsConfig;
use blite_core::value::Timestamp;
use blite_core::{Error, ErrorKind, Result};
use blite_engine::{Engine, EngineRegistry, EngineTxn};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// How long a swept transaction id stays distinguishable from one that
/// never existed.
const SWEPT_MEMORY_MILLIS: i64 = 10 * 60 * 1000;

/// An active explicit transaction pinned to one database.
pub struct Session {
	id: Uuid,
	user: String,
	database: String,
	engine: Arc<Engine>,
	started_at: Timestamp,
	last_activity: AtomicI64,
	txn: EngineTxn,
	dirty: Mutex<HashSet<String>>,
	permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl Session {
	pub fn id(&self) -> Uuid {
		self.id
	}

	pub fn user(&self) -> &str {
		&self.user
	}

	pub fn database(&self) -> &str {
		&self.database
	}

	pub fn engine(&self) -> &Arc<Engine> {
		&self.engine
	}

	pub fn started_at(&self) -> Timestamp {
		self.started_at
	}

	/// The engine transaction handle writes are routed through.
	pub fn txn(&self) -> &EngineTxn {
		&self.txn
	}

	/// Records a written physical collection and refreshes the idle
	/// clock. Idempotent.
	pub fn mark_dirty(&self, physical_collection: &str) {
		self.dirty.lock().insert(physical_collection.to_string());
		self.touch();
	}

	pub fn touch(&self) {
		self.last_activity.store(Timestamp::now().millis(), Ordering::Relaxed);
	}

	fn idle_millis(&self) -> i64 {
		Timestamp::now().millis() - self.last_activity.load(Ordering::Relaxed)
	}

	fn release(&self) {
		self.permit.lock().take();
	}
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("user", &self.user)
			.field("database", &self.database)
			.finish()
	}
}

pub struct TransactionCoordinator {
	registry: Arc<EngineRegistry>,
	cache: Arc<QueryCache>,
	config: TransactionsConfig,
	sessions: DashMap<Uuid, Arc<Session>>,
	slots: DashMap<String, Arc<Semaphore>>,
	swept: DashMap<Uuid, i64>,
}

impl std::fmt::Debug for TransactionCoordinator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransactionCoordinator").field("sessions", &self.sessions.len()).finish()
	}
}

impl TransactionCoordinator {
	pub fn new(registry: Arc<EngineRegistry>, cache: Arc<QueryCache>, config: TransactionsConfig) -> Self {
		Self {
			registry,
			cache,
			config,
			sessions: DashMap::new(),
			slots: DashMap::new(),
			swept: DashMap::new(),
		}
	}

	/// Opens a transaction on the given database for the given user.
	/// Waits a bounded time for the database's single transaction slot.
	#[instrument(skip(self))]
	pub async fn begin(&self, username: &str, database_id: &str) -> Result<Arc<Session>> {
		let registry = Arc::clone(&self.registry);
		let db = database_id.to_string();
		let engine = tokio::task::spawn_blocking(move || registry.get(&db))
			.await
			.map_err(|e| Error::internal(format!("engine resolution failed: {e}")))?
			.map_err(Error::from)?;

		let slot = self
			.slots
			.entry(database_id.to_string())
			.or_insert_with(|| Arc::new(Semaphore::new(1)))
			.clone();
		let wait = Duration::from_secs(self.config.begin_wait_seconds);
		let permit = match tokio::time::timeout(wait, slot.acquire_owned()).await {
			Ok(Ok(permit)) => permit,
			Ok(Err(_)) => return Err(Error::internal("transaction slot closed")),
			Err(_) => {
				return Err(Error::new(
					ErrorKind::SemanticFailure,
					format!("another transaction is active on database '{}'", blite_core::database_label(database_id)),
				));
			}
		};

		let begin_engine = Arc::clone(&engine);
		let txn = tokio::task::spawn_blocking(move || begin_engine.begin())
			.await
			.map_err(|e| Error::internal(format!("transaction begin failed: {e}")))?
			.map_err(Error::from)?;

		let session = Arc::new(Session {
			id: Uuid::new_v4(),
			user: username.to_string(),
			database: database_id.to_string(),
			engine,
			started_at: Timestamp::now(),
			last_activity: AtomicI64::new(Timestamp::now().millis()),
			txn,
			dirty: Mutex::new(HashSet::new()),
			permit: Mutex::new(Some(permit)),
		});
		self.sessions.insert(session.id, Arc::clone(&session));
		info!(id = %session.id, database = blite_core::database_label(&session.database), "transaction started");
		Ok(session)
	}

	/// Looks up a session and checks ownership. Swept sessions are
	/// reported distinctly from unknown ids.
	pub fn require(&self, id: Uuid, caller: &str) -> Result<Arc<Session>> {
		if let Some(session) = self.sessions.get(&id) {
			if session.user != caller {
				return Err(Error::permission_denied(format!(
					"transaction {id} belongs to another user"
				)));
			}
			return Ok(Arc::clone(&session));
		}
		if self.swept.contains_key(&id) {
			return Err(Error::new(
				ErrorKind::SemanticFailure,
				format!("transaction {id} was rolled back after idle timeout"),
			));
		}
		Err(Error::not_found(format!("transaction {id} does not exist")))
	}

	/// Commits: engine commit, cache invalidation for every dirtied
	/// collection, then slot release and session removal. A failed commit
	/// rolls back at the engine and still releases the slot.
	#[instrument(skip(self))]
	pub async fn commit(&self, id: Uuid, caller: &str) -> Result<()> {
		let session = self.require(id, caller)?;
		self.sessions.remove(&id);

		let commit_session = Arc::clone(&session);
		let result = tokio::task::spawn_blocking(move || commit_session.engine.commit(commit_session.txn()))
			.await
			.map_err(|e| Error::internal(format!("commit task failed: {e}")))?;

		match result {
			Ok(()) => {
				for collection in session.dirty.lock().drain() {
					self.cache.invalidate(&session.database, &collection);
				}
				session.release();
				info!(%id, "transaction committed");
				Ok(())
			}
			Err(err) => {
				// The engine rolled the write back when the commit failed;
				// nothing became visible, so the cache stands.
				session.release();
				warn!(%id, %err, "transaction commit failed");
				Err(Error::from(err))
			}
		}
	}

	/// Rolls back and releases. The cache is untouched: the writes never
	/// became visible.
	#[instrument(skip(self))]
	pub async fn rollback(&self, id: Uuid, caller: &str) -> Result<()> {
		let session = self.require(id, caller)?;
		self.sessions.remove(&id);
		self.finish_rollback(session).await
	}

	async fn finish_rollback(&self, session: Arc<Session>) -> Result<()> {
		let rollback_session = Arc::clone(&session);
		let result = tokio::task::spawn_blocking(move || rollback_session.engine.rollback(rollback_session.txn()))
			.await
			.map_err(|e| Error::internal(format!("rollback task failed: {e}")))?;
		session.release();
		info!(id = %session.id, "transaction rolled back");
		result.map_err(Error::from)
	}

	/// True iff any session is active on the database; the read path uses
	/// this to bypass the cache while a transaction is in flight.
	pub fn has_active(&self, database_id: &str) -> bool {
		self.sessions.iter().any(|entry| entry.database == database_id)
	}

	/// Rolls back sessions idle past the configured threshold, as if the
	/// client had called rollback.
	pub async fn sweep(&self) {
		let threshold = (self.config.timeout_seconds * 1000) as i64;
		let expired: Vec<Arc<Session>> = self
			.sessions
			.iter()
			.filter(|entry| entry.idle_millis() > threshold)
			.map(|entry| Arc::clone(&entry))
			.collect();

		for session in expired {
			let id = session.id;
			if self.sessions.remove(&id).is_none() {
				continue; // finished concurrently
			}
			warn!(%id, user = session.user, "sweeping idle transaction");
			self.swept.insert(id, Timestamp::now().millis());
			if let Err(err) = self.finish_rollback(session).await {
				warn!(%id, %err, "idle rollback failed");
			}
		}

		let cutoff = Timestamp::now().millis() - SWEPT_MEMORY_MILLIS;
		self.swept.retain(|_, at| *at > cutoff);
	}

	/// Background task driving [`sweep`](Self::sweep) once a second.
	pub fn spawn_sweeper(coordinator: Arc<Self>) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut tick = tokio::time::interval(Duration::from_secs(1));
			tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				tick.tick().await;
				coordinator.sweep().await;
			}
		})
	}
}
