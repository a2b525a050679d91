// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Change-capture subscriptions feeding the queue.
//!
//! One long-lived task per `(database, collection)` whose collection has
//! both a vector-source config and a vector index. `resync` reconciles
//! running subscriptions with the current descriptors; it runs at
//! startup, after vector-source or index mutations, and on every worker
//! tick so newly provisioned tenants are picked up.

use std::collections::HashMap;
use std::sync::Arc;

use blite_core::{Result, SYSTEM_DATABASE};
use blite_engine::{ChangeOp, EngineRegistry};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::queue::EmbeddingQueue;

pub struct EmbeddingPopulator {
	registry: Arc<EngineRegistry>,
	queue: Arc<EmbeddingQueue>,
	subscriptions: Mutex<HashMap<(String, String), JoinHandle<()>>>,
}

impl std::fmt::Debug for EmbeddingPopulator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EmbeddingPopulator")
			.field("subscriptions", &self.subscriptions.lock().len())
			.finish()
	}
}

impl EmbeddingPopulator {
	pub fn new(registry: Arc<EngineRegistry>, queue: Arc<EmbeddingQueue>) -> Self {
		Self { registry, queue, subscriptions: Mutex::new(HashMap::new()) }
	}

	/// Reconciles subscriptions with the current set of embeddable
	/// collections. Safe to call repeatedly.
	pub fn resync(self: &Arc<Self>) -> Result<()> {
		let mut wanted: Vec<(String, String)> = Vec::new();

		let mut databases = vec![SYSTEM_DATABASE.to_string()];
		for tenant in self.registry.list().map_err(blite_core::Error::from)? {
			if tenant.active {
				databases.push(tenant.id);
			}
		}
		for database in databases {
			let Ok(engine) = self.registry.get(&database) else {
				continue;
			};
			for collection in engine.list_collections() {
				let Some(descriptor) = engine.descriptor(&collection) else {
					continue;
				};
				if descriptor.vector_source.is_some() && descriptor.vector_index(None).is_some() {
					wanted.push((database.clone(), collection));
				}
			}
		}

		let mut subscriptions = self.subscriptions.lock();
		subscriptions.retain(|key, handle| {
			let keep = wanted.contains(key) && !handle.is_finished();
			if !keep {
				handle.abort();
				debug!(database = %key.0, collection = %key.1, "embedding subscription dropped");
			}
			keep
		});
		for key in wanted {
			if subscriptions.contains_key(&key) {
				continue;
			}
			let handle = self.subscribe(key.clone());
			subscriptions.insert(key, handle);
		}
		Ok(())
	}

	pub fn subscription_count(&self) -> usize {
		self.subscriptions.lock().len()
	}

	fn subscribe(self: &Arc<Self>, key: (String, String)) -> JoinHandle<()> {
		let (database, collection) = key;
		let registry = Arc::clone(&self.registry);
		let queue = Arc::clone(&self.queue);
		info!(database = blite_core::database_label(&database), collection, "embedding subscription started");

		tokio::spawn(async move {
			let mut rx = match registry.subscribe_change(&database, &collection) {
				Ok(rx) => rx,
				Err(err) => {
					warn!(%err, "embedding subscription failed to attach");
					return;
				}
			};
			loop {
				match rx.recv().await {
					Ok(event) => {
						if matches!(event.op, ChangeOp::Insert | ChangeOp::Update) {
							let enqueue_queue = Arc::clone(&queue);
							let db = database.clone();
							let col = collection.clone();
							let result = tokio::task::spawn_blocking(move || {
								enqueue_queue.enqueue(&db, &col, &event.id)
							})
							.await;
							match result {
								Ok(Ok(())) => {}
								Ok(Err(err)) => warn!(%err, "embedding enqueue failed"),
								Err(err) => warn!(%err, "embedding enqueue task failed"),
							}
						}
					}
					Err(RecvError::Lagged(missed)) => {
						// Writers outran this subscriber. Re-enqueue the whole
						// collection rather than lose documents.
						warn!(missed, collection, "embedding subscription lagged; rescanning");
						let rescan_registry = Arc::clone(&registry);
						let rescan_queue = Arc::clone(&queue);
						let db = database.clone();
						let col = collection.clone();
						let result = tokio::task::spawn_blocking(move || -> Result<()> {
							let engine = rescan_registry.get(&db).map_err(blite_core::Error::from)?;
							for (id, _) in engine.scan_all(&col).map_err(blite_core::Error::from)? {
								rescan_queue.enqueue(&db, &col, &id)?;
							}
							Ok(())
						})
						.await;
						match result {
							Ok(Ok(())) => {}
							Ok(Err(err)) => warn!(%err, "embedding rescan failed"),
							Err(err) => warn!(%err, "embedding rescan task failed"),
						}
					}
					Err(RecvError::Closed) => break,
				}
			}
		})
	}
}
