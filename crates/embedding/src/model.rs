// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Embedder providers and the hot-swappable model slot.

use std::sync::Arc;

use blite_core::config::{EmbeddingConfig, EmbeddingProvider};
use blite_core::{Error, Result};
use parking_lot::RwLock;
use xxhash_rust::xxh3::xxh3_64;

/// A text→vector function. Implementations must be thread-safe; the
/// worker embeds from blocking tasks.
pub trait TextEmbedder: Send + Sync {
	fn embed(&self, text: &str) -> Result<Vec<f32>>;
	fn dimensions(&self) -> usize;
}

/// Reader/writer slot holding the active model: many concurrent `embed`
/// readers, exclusive hot-swap writer.
#[derive(Default)]
pub struct EmbedderSlot {
	inner: RwLock<Option<Arc<dyn TextEmbedder>>>,
}

impl EmbedderSlot {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn swap(&self, embedder: Option<Arc<dyn TextEmbedder>>) {
		*self.inner.write() = embedder;
	}

	pub fn get(&self) -> Option<Arc<dyn TextEmbedder>> {
		self.inner.read().clone()
	}

	pub fn is_loaded(&self) -> bool {
		self.inner.read().is_some()
	}
}

impl std::fmt::Debug for EmbedderSlot {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EmbedderSlot").field("loaded", &self.is_loaded()).finish()
	}
}

/// Deterministic feature-hash projection: each whitespace token hashes
/// to one signed component, the sum is L2-normalised. No model files,
/// stable across processes; the always-available provider.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
	dimensions: usize,
}

impl HashingEmbedder {
	pub fn new(dimensions: usize) -> Self {
		Self { dimensions: dimensions.max(1) }
	}
}

impl TextEmbedder for HashingEmbedder {
	fn embed(&self, text: &str) -> Result<Vec<f32>> {
		let mut vector = vec![0f32; self.dimensions];
		for token in text.split_whitespace() {
			let hash = xxh3_64(token.to_lowercase().as_bytes());
			let index = (hash % self.dimensions as u64) as usize;
			let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
			vector[index] += sign;
		}
		let norm: f32 = vector.iter().map(|c| c * c).sum::<f32>().sqrt();
		if norm > 0.0 {
			for component in &mut vector {
				*component /= norm;
			}
		}
		Ok(vector)
	}

	fn dimensions(&self) -> usize {
		self.dimensions
	}
}

/// Builds the configured provider. `None` means no model: the worker
/// idles even when enabled.
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Option<Arc<dyn TextEmbedder>>> {
	match config.provider {
		EmbeddingProvider::None => Ok(None),
		EmbeddingProvider::Hashing => Ok(Some(Arc::new(HashingEmbedder::new(config.dimensions)))),
		EmbeddingProvider::Onnx => Err(Error::semantic(
			"the onnx embedding provider requires a build with onnx runtime support",
		)),
	}
}
