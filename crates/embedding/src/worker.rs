// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The batched background worker.
//!
//! Each tick claims a batch, groups it by database, computes vectors
//! (phase A), persists them in one engine transaction per database
//! (phase B), and marks the successful tasks done. A failed commit
//! leaves its tasks `in_progress`; they go stale and are retried.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use blite_cache::QueryCache;
use blite_core::config::EmbeddingWorkerConfig;
use blite_core::value::{Document, Value};
use blite_core::{Error, Result};
use blite_engine::{Engine, EngineRegistry, VectorSourceConfig};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::model::EmbedderSlot;
use crate::populator::EmbeddingPopulator;
use crate::queue::{EmbeddingQueue, EmbeddingTask};

pub struct EmbeddingWorker {
	registry: Arc<EngineRegistry>,
	queue: Arc<EmbeddingQueue>,
	slot: Arc<EmbedderSlot>,
	cache: Arc<QueryCache>,
	config: EmbeddingWorkerConfig,
	max_tokens: usize,
}

struct ComputedVector {
	task: EmbeddingTask,
	field: String,
	vector: Vec<f32>,
}

impl std::fmt::Debug for EmbeddingWorker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EmbeddingWorker").field("config", &self.config).finish()
	}
}

impl EmbeddingWorker {
	pub fn new(
		registry: Arc<EngineRegistry>,
		queue: Arc<EmbeddingQueue>,
		slot: Arc<EmbedderSlot>,
		cache: Arc<QueryCache>,
		config: EmbeddingWorkerConfig,
		max_tokens: usize,
	) -> Self {
		Self { registry, queue, slot, cache, config, max_tokens }
	}

	/// Background loop: resync the populator and process one batch every
	/// interval.
	pub fn spawn(worker: Arc<Self>, populator: Arc<EmbeddingPopulator>) -> JoinHandle<()> {
		let interval = Duration::from_secs(worker.config.interval_seconds.max(1));
		info!(?interval, batch = worker.config.batch_size, "embedding worker started");
		tokio::spawn(async move {
			let mut tick = tokio::time::interval(interval);
			tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				tick.tick().await;
				if let Err(err) = populator.resync() {
					warn!(%err, "embedding populator resync failed");
				}
				match worker.tick().await {
					Ok(0) => {}
					Ok(processed) => debug!(processed, "embedding batch processed"),
					Err(err) => warn!(%err, "embedding tick failed"),
				}
			}
		})
	}

	/// Processes one batch. Returns the number of tasks marked done.
	#[instrument(skip(self))]
	pub async fn tick(&self) -> Result<usize> {
		if !self.config.enabled {
			return Ok(0);
		}
		let Some(embedder) = self.slot.get() else {
			return Ok(0);
		};

		let queue = Arc::clone(&self.queue);
		let batch_size = self.config.batch_size;
		let batch = tokio::task::spawn_blocking(move || queue.take_batch(batch_size))
			.await
			.map_err(|e| Error::internal(format!("batch claim task failed: {e}")))??;
		if batch.is_empty() {
			return Ok(0);
		}

		let mut by_database: BTreeMap<String, Vec<EmbeddingTask>> = BTreeMap::new();
		for task in batch {
			by_database.entry(task.database.clone()).or_default().push(task);
		}

		let mut completed: Vec<String> = Vec::new();
		for (database, tasks) in by_database {
			let registry = Arc::clone(&self.registry);
			let cache = Arc::clone(&self.cache);
			let slot_embedder = Arc::clone(&embedder);
			let max_tokens = self.max_tokens;
			let db = database.clone();

			let done = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
				let engine = registry.get(&db).map_err(Error::from)?;
				process_database(&engine, &cache, &db, tasks, slot_embedder.as_ref(), max_tokens)
			})
			.await
			.map_err(|e| Error::internal(format!("embedding task failed: {e}")))?;

			match done {
				Ok(keys) => completed.extend(keys),
				Err(err) => warn!(database = blite_core::database_label(&database), %err, "embedding batch failed"),
			}
		}

		let count = completed.len();
		if !completed.is_empty() {
			let queue = Arc::clone(&self.queue);
			tokio::task::spawn_blocking(move || queue.complete(&completed))
				.await
				.map_err(|e| Error::internal(format!("completion task failed: {e}")))??;
		}
		Ok(count)
	}
}

/// Phase A then phase B for one database's tasks. Returns the keys to
/// mark done.
fn process_database(
	engine: &Engine,
	cache: &QueryCache,
	database: &str,
	tasks: Vec<EmbeddingTask>,
	embedder: &dyn crate::model::TextEmbedder,
	max_tokens: usize,
) -> Result<Vec<String>> {
	let mut completed: Vec<String> = Vec::new();
	let mut computed: Vec<ComputedVector> = Vec::new();

	// Phase A: compute. Tasks with nothing to embed short-circuit
	// straight to the completed list.
	for task in tasks {
		let Some(descriptor) = engine.descriptor(&task.collection) else {
			completed.push(task.key);
			continue;
		};
		let (Some(source), Some(index)) = (descriptor.vector_source.clone(), descriptor.vector_index(None))
		else {
			completed.push(task.key);
			continue;
		};
		let field = index.field.clone();
		let Some(doc) = engine.find_decoded(&task.collection, &task.doc_id).map_err(Error::from)? else {
			completed.push(task.key);
			continue;
		};
		let text = build_source_text(&doc, &source, max_tokens);
		if text.is_empty() {
			completed.push(task.key);
			continue;
		}
		match embedder.embed(&text) {
			Ok(vector) => computed.push(ComputedVector { task, field, vector }),
			Err(err) => {
				// Left in_progress; the stale threshold will retry it.
				warn!(key = %task.key, %err, "embedding computation failed");
			}
		}
	}

	if computed.is_empty() {
		return Ok(completed);
	}

	// Phase B: persist. One transaction per database; a failed commit
	// leaves every task of the batch to the stale retry.
	let txn = engine.begin().map_err(Error::from)?;
	let mut touched: Vec<String> = Vec::new();
	let mut write = || -> Result<()> {
		for item in &computed {
			let Some(mut doc) = engine.find_decoded(&item.task.collection, &item.task.doc_id).map_err(Error::from)?
			else {
				continue; // deleted while computing
			};
			doc.set_path(&item.field, Value::from_vector(&item.vector))?;
			engine.update(&item.task.collection, doc, Some(&txn)).map_err(Error::from)?;
			if !touched.contains(&item.task.collection) {
				touched.push(item.task.collection.clone());
			}
		}
		Ok(())
	};
	if let Err(err) = write() {
		let _ = engine.rollback(&txn);
		return Err(err);
	}
	engine.commit(&txn).map_err(Error::from)?;

	for collection in touched {
		cache.invalidate(database, &collection);
	}
	completed.extend(computed.into_iter().map(|item| item.task.key));
	Ok(completed)
}

/// Ordered concatenation of the source fields with per-field prefix and
/// suffix, joined by the configured separator, truncated to a token
/// budget.
fn build_source_text(doc: &Document, source: &VectorSourceConfig, max_tokens: usize) -> String {
	let mut parts: Vec<String> = Vec::new();
	for field in &source.fields {
		let Some(value) = doc.get_path(&field.path) else {
			continue;
		};
		let Some(text) = value_text(value) else {
			continue;
		};
		if text.is_empty() {
			continue;
		}
		let mut part = String::new();
		if let Some(prefix) = &field.prefix {
			part.push_str(prefix);
		}
		part.push_str(&text);
		if let Some(suffix) = &field.suffix {
			part.push_str(suffix);
		}
		parts.push(part);
	}
	let joined = parts.join(&source.separator);
	truncate_tokens(&joined, max_tokens)
}

fn value_text(value: &Value) -> Option<String> {
	match value {
		Value::String(s) => Some(s.clone()),
		Value::Int32(v) => Some(v.to_string()),
		Value::Int64(v) => Some(v.to_string()),
		Value::Float64(v) => Some(v.to_string()),
		Value::Decimal(v) => Some(v.to_string()),
		Value::Bool(v) => Some(v.to_string()),
		_ => None,
	}
}

fn truncate_tokens(text: &str, max_tokens: usize) -> String {
	if max_tokens == 0 {
		return text.to_string();
	}
	let mut end = 0;
	let mut count = 0;
	let mut in_token = false;
	for (offset, ch) in text.char_indices() {
		if ch.is_whitespace() {
			in_token = false;
		} else if !in_token {
			in_token = true;
			count += 1;
			if count > max_tokens {
				return text[..end].trim_end().to_string();
			}
		}
		end = offset + ch.len_utf8();
	}
	text.to_string()
}

#[cfg(test)]
mod tests {
	use blite_engine::VectorSourceField;

	use super::*;

	#[test]
	fn source_text_applies_prefix_suffix_and_separator() {
		let mut doc = Document::new();
		doc.insert("title", Value::String("hello".into()));
		doc.insert("rating", Value::Int32(5));
		doc.insert("ignored", Value::Bytes(vec![1]));

		let source = VectorSourceConfig {
			separator: " | ".into(),
			fields: vec![
				VectorSourceField { path: "title".into(), prefix: Some("title: ".into()), suffix: None },
				VectorSourceField { path: "rating".into(), prefix: None, suffix: Some(" stars".into()) },
				VectorSourceField { path: "missing".into(), prefix: None, suffix: None },
				VectorSourceField { path: "ignored".into(), prefix: None, suffix: None },
			],
		};
		assert_eq!(build_source_text(&doc, &source, 0), "title: hello | 5 stars");
	}

	#[test]
	fn token_truncation() {
		assert_eq!(truncate_tokens("a b c d", 2), "a b");
		assert_eq!(truncate_tokens("a b", 5), "a b");
		assert_eq!(truncate_tokens("", 3), "");
	}
}
