// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

use std::sync::Arc;
use std::time::Duration;

use blite_cache::QueryCache;
use blite_core::config::{EmbeddingWorkerConfig, QueryCacheConfig};
use blite_core::value::{DocId, Document, Value};
use blite_embedding::{
	EmbedderSlot, EmbeddingPopulator, EmbeddingQueue, EmbeddingWorker, HashingEmbedder, TaskState,
};
use blite_engine::{
	DistanceMetric, EngineRegistry, IndexDescriptor, IndexKind, VectorSourceConfig, VectorSourceField,
};

const STALE: Duration = Duration::from_secs(600);

fn registry(dir: &tempfile::TempDir) -> Arc<EngineRegistry> {
	Arc::new(EngineRegistry::open(dir.path()).unwrap())
}

fn queue(registry: &Arc<EngineRegistry>) -> Arc<EmbeddingQueue> {
	Arc::new(EmbeddingQueue::new(registry.system(), STALE))
}

fn configure_docs_collection(registry: &Arc<EngineRegistry>) {
	let system = registry.system();
	system.create_collection("docs").unwrap();
	system
		.set_vector_source(
			"docs",
			Some(VectorSourceConfig {
				separator: " ".into(),
				fields: vec![VectorSourceField { path: "title".into(), prefix: None, suffix: None }],
			}),
		)
		.unwrap();
	system
		.create_index(
			"docs",
			IndexDescriptor {
				name: "vec_idx".into(),
				field: "vec".into(),
				kind: IndexKind::Vector,
				unique: false,
				dimensions: Some(4),
				metric: Some(DistanceMetric::Cosine),
			},
		)
		.unwrap();
}

fn worker(registry: &Arc<EngineRegistry>, queue: &Arc<EmbeddingQueue>, dimensions: usize) -> Arc<EmbeddingWorker> {
	let slot = Arc::new(EmbedderSlot::new());
	slot.swap(Some(Arc::new(HashingEmbedder::new(dimensions))));
	let cache = Arc::new(QueryCache::new(QueryCacheConfig::default()));
	Arc::new(EmbeddingWorker::new(
		Arc::clone(registry),
		Arc::clone(queue),
		slot,
		cache,
		EmbeddingWorkerConfig { enabled: true, interval_seconds: 1, batch_size: 32, stale_timeout_minutes: 10 },
		256,
	))
}

#[test]
fn enqueue_dedups_by_key() {
	let dir = tempfile::tempdir().unwrap();
	let registry = registry(&dir);
	let queue = queue(&registry);

	let id = DocId::Int32(7);
	queue.enqueue("", "docs", &id).unwrap();
	queue.enqueue("", "docs", &id).unwrap();
	queue.enqueue("", "docs", &DocId::Int32(8)).unwrap();

	let stats = queue.stats().unwrap();
	assert_eq!(stats.todo, 2, "same key collapses to one task");
	assert_eq!(stats.in_progress + stats.done + stats.stale, 0);
}

#[test]
fn take_batch_claims_oldest_first_and_hides_claimed() {
	let dir = tempfile::tempdir().unwrap();
	let registry = registry(&dir);
	let queue = queue(&registry);

	for i in 0..5 {
		queue.enqueue("", "docs", &DocId::Int32(i)).unwrap();
		std::thread::sleep(Duration::from_millis(2));
	}

	let first = queue.take_batch(3).unwrap();
	assert_eq!(first.len(), 3);
	assert!(first.iter().all(|t| t.state == TaskState::InProgress));

	// A second worker must not see the same tasks.
	let second = queue.take_batch(10).unwrap();
	assert_eq!(second.len(), 2);
	let first_keys: Vec<&String> = first.iter().map(|t| &t.key).collect();
	assert!(second.iter().all(|t| !first_keys.contains(&&t.key)));

	queue.complete(&first.iter().map(|t| t.key.clone()).collect::<Vec<_>>()).unwrap();
	let stats = queue.stats().unwrap();
	assert_eq!(stats.done, 3);
	assert_eq!(stats.in_progress, 2);
	assert!(queue.take_batch(10).unwrap().is_empty());
}

#[test]
fn stale_in_progress_tasks_are_reclaimed() {
	let dir = tempfile::tempdir().unwrap();
	let registry = registry(&dir);
	// Zero threshold: anything in_progress is immediately stale.
	let queue = Arc::new(EmbeddingQueue::new(registry.system(), Duration::ZERO));

	queue.enqueue("", "docs", &DocId::Int32(1)).unwrap();
	let claimed = queue.take_batch(1).unwrap();
	assert_eq!(claimed.len(), 1);

	std::thread::sleep(Duration::from_millis(5));
	let reclaimed = queue.take_batch(1).unwrap();
	assert_eq!(reclaimed.len(), 1, "stale in_progress tasks are re-claimable");
	assert_eq!(reclaimed[0].key, claimed[0].key);
}

#[test]
fn enqueue_supersedes_done_rows() {
	let dir = tempfile::tempdir().unwrap();
	let registry = registry(&dir);
	let queue = queue(&registry);

	let id = DocId::Int32(1);
	queue.enqueue("", "docs", &id).unwrap();
	let batch = queue.take_batch(1).unwrap();
	queue.complete(&[batch[0].key.clone()]).unwrap();
	assert_eq!(queue.stats().unwrap().done, 1);

	// A later write re-activates the key.
	queue.enqueue("", "docs", &id).unwrap();
	let stats = queue.stats().unwrap();
	assert_eq!(stats.todo, 1);
	assert_eq!(stats.done, 0, "the done row was superseded, not duplicated");
}

#[tokio::test]
async fn worker_tick_writes_vectors_and_completes_tasks() {
	let dir = tempfile::tempdir().unwrap();
	let registry = registry(&dir);
	let queue = queue(&registry);
	configure_docs_collection(&registry);
	let system = registry.system();

	let mut doc = Document::new();
	doc.insert("title", Value::String("hello".into()));
	let id = system.insert("docs", doc, None).unwrap();
	queue.enqueue("", "docs", &id).unwrap();

	let worker = worker(&registry, &queue, 4);
	let processed = worker.tick().await.unwrap();
	assert_eq!(processed, 1);

	// The document now carries a 4-float vector and is searchable.
	let stored = system.find_decoded("docs", &id).unwrap().unwrap();
	let vector = stored.get("vec").and_then(Value::as_vector).expect("vector written");
	assert_eq!(vector.len(), 4);

	let probe = HashingEmbedder::new(4);
	let query = blite_embedding::TextEmbedder::embed(&probe, "hello").unwrap();
	let hits = system.vector_search("docs", None, &query, 1).unwrap();
	assert_eq!(hits.len(), 1);
	assert_eq!(hits[0].id, id);
	assert!(hits[0].score > 0.99, "identical text embeds to the same vector");

	assert_eq!(queue.stats().unwrap().done, 1);
}

#[tokio::test]
async fn worker_short_circuits_unembeddable_tasks() {
	let dir = tempfile::tempdir().unwrap();
	let registry = registry(&dir);
	let queue = queue(&registry);
	configure_docs_collection(&registry);
	let system = registry.system();

	// Missing document.
	queue.enqueue("", "docs", &DocId::Int32(404)).unwrap();
	// Document with no source text.
	let mut empty = Document::new();
	empty.insert("other", Value::Int32(1));
	let empty_id = system.insert("docs", empty, None).unwrap();
	queue.enqueue("", "docs", &empty_id).unwrap();
	// Collection without vector config.
	let mut plain = Document::new();
	plain.insert("title", Value::String("x".into()));
	let plain_id = system.insert("plain", plain, None).unwrap();
	queue.enqueue("", "plain", &plain_id).unwrap();

	let worker = worker(&registry, &queue, 4);
	let processed = worker.tick().await.unwrap();
	assert_eq!(processed, 3, "unembeddable tasks complete without vectors");
	assert_eq!(queue.stats().unwrap().done, 3);

	let stored = system.find_decoded("docs", &empty_id).unwrap().unwrap();
	assert!(stored.get("vec").is_none());
}

#[tokio::test]
async fn populator_subscribes_configured_collections_and_enqueues_writes() {
	let dir = tempfile::tempdir().unwrap();
	let registry = registry(&dir);
	let queue = queue(&registry);
	configure_docs_collection(&registry);
	let system = registry.system();

	// An unconfigured collection exists too; it must not subscribe.
	system.create_collection("plain").unwrap();

	let populator = Arc::new(EmbeddingPopulator::new(Arc::clone(&registry), Arc::clone(&queue)));
	populator.resync().unwrap();
	assert_eq!(populator.subscription_count(), 1);
	populator.resync().unwrap();
	assert_eq!(populator.subscription_count(), 1, "resync is idempotent");

	let mut doc = Document::new();
	doc.insert("title", Value::String("streamed".into()));
	let id = system.insert("docs", doc, None).unwrap();

	// The subscription enqueues asynchronously.
	let mut waited = 0;
	loop {
		let stats = queue.stats().unwrap();
		if stats.todo == 1 {
			break;
		}
		waited += 1;
		assert!(waited < 100, "populator never enqueued the write");
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	let batch = queue.take_batch(1).unwrap();
	assert_eq!(batch[0].doc_id, id);

	// Removing the vector source drops the subscription on resync.
	system.set_vector_source("docs", None).unwrap();
	populator.resync().unwrap();
	assert_eq!(populator.subscription_count(), 0);
}
