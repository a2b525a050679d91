// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The persistent work queue, backed by the system database.
//!
//! One document per pending embedding, keyed by the dedup string
//! `"{db}:{collection}:{docId}"`. Enqueuing supersedes any existing row
//! for the key; claims mark rows `in_progress` and stale claims are
//! re-claimable after the configured threshold. The queue file is owned
//! by a single server process, so batch claims serialise on an
//! in-process lock.

use std::sync::Arc;
use std::time::Duration;

use blite_core::value::{DocId, Document, Timestamp, Value};
use blite_core::{Error, Result};
use blite_engine::Engine;
use parking_lot::Mutex;
use tracing::{debug, instrument};

/// System collection holding the task documents.
pub const QUEUE_COLLECTION: &str = "_emb_queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
	Todo,
	InProgress,
	Done,
}

impl TaskState {
	fn as_str(&self) -> &'static str {
		match self {
			TaskState::Todo => "todo",
			TaskState::InProgress => "in_progress",
			TaskState::Done => "done",
		}
	}

	fn parse(raw: &str) -> Option<Self> {
		match raw {
			"todo" => Some(TaskState::Todo),
			"in_progress" => Some(TaskState::InProgress),
			"done" => Some(TaskState::Done),
			_ => None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct EmbeddingTask {
	/// Dedup key, also the row's document id.
	pub key: String,
	/// Target database id; empty for the system database.
	pub database: String,
	pub collection: String,
	pub doc_id: DocId,
	pub enqueued_at: Timestamp,
	pub state_changed_at: Timestamp,
	pub state: TaskState,
}

impl EmbeddingTask {
	pub fn dedup_key(database: &str, collection: &str, doc_id: &DocId) -> String {
		format!("{database}:{collection}:{doc_id}")
	}

	/// Derived staleness: `in_progress` with a state change older than
	/// the threshold. Any worker may re-claim a stale task.
	pub fn is_stale(&self, threshold: Duration) -> bool {
		self.state == TaskState::InProgress
			&& Timestamp::now().millis() - self.state_changed_at.millis() > threshold.as_millis() as i64
	}

	fn to_document(&self) -> Document {
		let mut doc = Document::new();
		doc.set_id(&DocId::String(self.key.clone()));
		doc.insert("database", Value::String(self.database.clone()));
		doc.insert("collection", Value::String(self.collection.clone()));
		doc.insert("doc_id", Value::Bytes(self.doc_id.to_bytes()));
		doc.insert("enqueued_at", Value::Timestamp(self.enqueued_at));
		doc.insert("state_changed_at", Value::Timestamp(self.state_changed_at));
		doc.insert("state", Value::String(self.state.as_str().to_string()));
		doc
	}

	fn from_document(doc: &Document) -> Result<Self> {
		let Some(DocId::String(key)) = doc.id() else {
			return Err(Error::internal("embedding task row lacks a string id"));
		};
		let string = |field: &str| match doc.get(field) {
			Some(Value::String(s)) => Ok(s.clone()),
			_ => Err(Error::internal(format!("embedding task row lacks '{field}'"))),
		};
		let timestamp = |field: &str| match doc.get(field) {
			Some(Value::Timestamp(t)) => *t,
			_ => Timestamp(0),
		};
		let doc_id = match doc.get("doc_id") {
			Some(Value::Bytes(bytes)) => DocId::from_bytes(bytes)?,
			_ => return Err(Error::internal("embedding task row lacks 'doc_id'")),
		};
		let state = TaskState::parse(&string("state")?)
			.ok_or_else(|| Error::internal("embedding task row has unknown state"))?;

		Ok(Self {
			key,
			database: string("database")?,
			collection: string("collection")?,
			doc_id,
			enqueued_at: timestamp("enqueued_at"),
			state_changed_at: timestamp("state_changed_at"),
			state,
		})
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
	pub todo: usize,
	pub in_progress: usize,
	pub stale: usize,
	pub done: usize,
}

pub struct EmbeddingQueue {
	system: Arc<Engine>,
	stale_after: Duration,
	claim_guard: Mutex<()>,
}

impl std::fmt::Debug for EmbeddingQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EmbeddingQueue").field("stale_after", &self.stale_after).finish()
	}
}

impl EmbeddingQueue {
	pub fn new(system: Arc<Engine>, stale_after: Duration) -> Self {
		Self { system, stale_after, claim_guard: Mutex::new(()) }
	}

	pub fn stale_after(&self) -> Duration {
		self.stale_after
	}

	/// Enqueues work for a document. Any existing row for the key is
	/// superseded: deleted and re-inserted with fresh timestamps.
	#[instrument(skip(self, doc_id), fields(%doc_id))]
	pub fn enqueue(&self, database: &str, collection: &str, doc_id: &DocId) -> Result<()> {
		let key = EmbeddingTask::dedup_key(database, collection, doc_id);
		let now = Timestamp::now();
		let task = EmbeddingTask {
			key: key.clone(),
			database: database.to_string(),
			collection: collection.to_string(),
			doc_id: doc_id.clone(),
			enqueued_at: now,
			state_changed_at: now,
			state: TaskState::Todo,
		};

		self.system
			.delete(QUEUE_COLLECTION, &DocId::String(key), None)
			.map_err(Error::from)?;
		self.system.insert(QUEUE_COLLECTION, task.to_document(), None).map_err(Error::from)?;
		Ok(())
	}

	/// Atomically claims up to `n` tasks whose raw state is `todo` or
	/// whose derived state is stale, oldest enqueue first. Claimed rows
	/// flip to `in_progress` with a fresh state-change timestamp.
	#[instrument(skip(self))]
	pub fn take_batch(&self, n: usize) -> Result<Vec<EmbeddingTask>> {
		let _claim = self.claim_guard.lock();

		let mut candidates: Vec<EmbeddingTask> = self
			.load_all()?
			.into_iter()
			.filter(|task| task.state == TaskState::Todo || task.is_stale(self.stale_after))
			.collect();
		candidates.sort_by_key(|task| task.enqueued_at);
		candidates.truncate(n);
		if candidates.is_empty() {
			return Ok(Vec::new());
		}

		// One engine transaction so a batch claim is all-or-nothing.
		let txn = self.system.begin().map_err(Error::from)?;
		let now = Timestamp::now();
		for task in &mut candidates {
			task.state = TaskState::InProgress;
			task.state_changed_at = now;
			self.system
				.update(QUEUE_COLLECTION, task.to_document(), Some(&txn))
				.map_err(Error::from)?;
		}
		self.system.commit(&txn).map_err(Error::from)?;

		debug!(claimed = candidates.len(), "claimed embedding batch");
		Ok(candidates)
	}

	/// Marks tasks done with a fresh state-change timestamp.
	#[instrument(skip(self, keys), fields(count = keys.len()))]
	pub fn complete(&self, keys: &[String]) -> Result<()> {
		let now = Timestamp::now();
		for key in keys {
			let Some(doc) = self
				.system
				.find_decoded(QUEUE_COLLECTION, &DocId::String(key.clone()))
				.map_err(Error::from)?
			else {
				continue; // superseded while in flight
			};
			let mut task = EmbeddingTask::from_document(&doc)?;
			task.state = TaskState::Done;
			task.state_changed_at = now;
			self.system.update(QUEUE_COLLECTION, task.to_document(), None).map_err(Error::from)?;
		}
		Ok(())
	}

	/// Counts per state, with derived staleness split out of
	/// `in_progress`.
	pub fn stats(&self) -> Result<QueueStats> {
		let mut stats = QueueStats::default();
		for task in self.load_all()? {
			match task.state {
				TaskState::Todo => stats.todo += 1,
				TaskState::Done => stats.done += 1,
				TaskState::InProgress => {
					if task.is_stale(self.stale_after) {
						stats.stale += 1;
					} else {
						stats.in_progress += 1;
					}
				}
			}
		}
		Ok(stats)
	}

	fn load_all(&self) -> Result<Vec<EmbeddingTask>> {
		let dictionary = Arc::clone(self.system.dictionary());
		let mut tasks = Vec::new();
		for (_, bytes) in self.system.scan_all(QUEUE_COLLECTION).map_err(Error::from)? {
			let doc = blite_codec::decode(&bytes, &dictionary).map_err(Error::from)?;
			tasks.push(EmbeddingTask::from_document(&doc)?);
		}
		Ok(tasks)
	}
}
