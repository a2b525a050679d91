// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Server configuration: TOML file with defaulted sections.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
	pub server: ServerSection,
	pub query_cache: QueryCacheConfig,
	pub transactions: TransactionsConfig,
	pub embedding: EmbeddingConfig,
	pub embedding_worker: EmbeddingWorkerConfig,
}

impl ServerConfig {
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let raw = std::fs::read_to_string(path)
			.map_err(|e| Error::invalid_input(format!("cannot read config {}: {e}", path.display())))?;
		let config: ServerConfig = toml::from_str(&raw)
			.map_err(|e| Error::invalid_input(format!("invalid config {}: {e}", path.display())))?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		if self.query_cache.enabled && self.query_cache.max_result_set_size == 0 {
			return Err(Error::invalid_input("query_cache.max_result_set_size must be positive"));
		}
		if self.transactions.timeout_seconds == 0 {
			return Err(Error::invalid_input("transactions.timeout_seconds must be positive"));
		}
		if self.embedding_worker.enabled && self.embedding_worker.batch_size == 0 {
			return Err(Error::invalid_input("embedding_worker.batch_size must be positive"));
		}
		if self.embedding.provider == EmbeddingProvider::Onnx && self.embedding.model_directory.is_empty() {
			return Err(Error::invalid_input("embedding.model_directory is required for the onnx provider"));
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
	/// Directory holding `system.blite` and `tenants/*.blite`.
	pub data_dir: PathBuf,
	pub rpc_addr: String,
	pub http_addr: String,
}

impl Default for ServerSection {
	fn default() -> Self {
		Self {
			data_dir: PathBuf::from("./data"),
			rpc_addr: "127.0.0.1:7641".to_string(),
			http_addr: "127.0.0.1:7640".to_string(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryCacheConfig {
	pub enabled: bool,
	pub sliding_expiration_seconds: u64,
	pub absolute_expiration_seconds: u64,
	pub max_size_bytes: usize,
	pub max_result_set_size: usize,
}

impl Default for QueryCacheConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			sliding_expiration_seconds: 60,
			absolute_expiration_seconds: 300,
			max_size_bytes: 64 * 1024 * 1024,
			max_result_set_size: 1000,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransactionsConfig {
	/// Idle rollback threshold enforced by the sweeper.
	pub timeout_seconds: u64,
	/// Bounded wait for the per-database transaction slot.
	pub begin_wait_seconds: u64,
}

impl Default for TransactionsConfig {
	fn default() -> Self {
		Self { timeout_seconds: 60, begin_wait_seconds: 5 }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
	/// No model; the worker idles even when enabled.
	None,
	/// Deterministic feature-hash projection. No model files needed.
	Hashing,
	/// ONNX model directory. Requires the `onnx` build feature.
	Onnx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
	pub provider: EmbeddingProvider,
	pub model_directory: String,
	pub max_tokens: usize,
	/// Output dimensionality for the hashing provider.
	pub dimensions: usize,
}

impl Default for EmbeddingConfig {
	fn default() -> Self {
		Self {
			provider: EmbeddingProvider::None,
			model_directory: String::new(),
			max_tokens: 256,
			dimensions: 384,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingWorkerConfig {
	pub enabled: bool,
	pub interval_seconds: u64,
	pub batch_size: usize,
	/// Minutes after which an `in_progress` task counts as stale and may be
	/// re-claimed.
	pub stale_timeout_minutes: u64,
}

impl Default for EmbeddingWorkerConfig {
	fn default() -> Self {
		Self { enabled: false, interval_seconds: 5, batch_size: 32, stale_timeout_minutes: 10 }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_valid() {
		ServerConfig::default().validate().unwrap();
	}

	#[test]
	fn load_round_trips_partial_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("blite.toml");
		std::fs::write(
			&path,
			"[query_cache]\nenabled = true\n\n[embedding_worker]\nenabled = true\ninterval_seconds = 1\n",
		)
		.unwrap();

		let config = ServerConfig::load(&path).unwrap();
		assert!(config.query_cache.enabled);
		assert_eq!(config.query_cache.max_result_set_size, 1000);
		assert_eq!(config.embedding_worker.interval_seconds, 1);
		assert_eq!(config.embedding_worker.stale_timeout_minutes, 10);
	}

	#[test]
	fn unknown_sections_are_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("blite.toml");
		std::fs::write(&path, "[not_a_section]\nx = 1\n").unwrap();
		assert!(ServerConfig::load(&path).is_err());
	}

	#[test]
	fn onnx_provider_requires_model_directory() {
		let mut config = ServerConfig::default();
		config.embedding.provider = EmbeddingProvider::Onnx;
		assert!(config.validate().is_err());
		config.embedding.model_directory = "/models/minilm".into();
		config.validate().unwrap();
	}
}
