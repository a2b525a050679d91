// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The asynchronous embedding pipeline.
//!
//! Three cooperating actors over the system engine's `_emb_queue`
//! collection: the populator turns change-capture events on configured
//! collections into persisted tasks, the queue hands out deduplicated
//! batches with stale-retry, and the worker computes vectors and writes
//! them back in one engine transaction per database.

pub use model::{EmbedderSlot, HashingEmbedder, TextEmbedder, embedder_from_config};
pub use populator::EmbeddingPopulator;
pub use queue::{EmbeddingQueue, EmbeddingTask, QUEUE_COLLECTION, QueueStats, TaskState};
pub use worker::EmbeddingWorker;

mod model;
mod populator;
mod queue;
mod worker;
