// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Collection descriptors persisted in the engine's meta table.

use serde::{Deserialize, Serialize};

use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
	Btree,
	Vector,
	Spatial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
	Cosine,
	L2,
	Dot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
	pub name: String,
	/// Dot-separated, lowercased field path.
	pub field: String,
	pub kind: IndexKind,
	pub unique: bool,
	pub dimensions: Option<u32>,
	pub metric: Option<DistanceMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
	pub name: String,
	pub type_code: u8,
	pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
	pub version: u32,
	pub fields: Vec<SchemaField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesConfig {
	pub ttl_field: String,
	pub retention_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSourceField {
	pub path: String,
	pub prefix: Option<String>,
	pub suffix: Option<String>,
}

/// Recipe for synthesising the embedding-input string from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSourceConfig {
	pub separator: String,
	pub fields: Vec<VectorSourceField>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollectionDescriptor {
	pub name: String,
	pub indexes: Vec<IndexDescriptor>,
	/// Append-only version history.
	pub schema: Vec<SchemaVersion>,
	pub time_series: Option<TimeSeriesConfig>,
	pub vector_source: Option<VectorSourceConfig>,
}

impl CollectionDescriptor {
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into(), ..Default::default() }
	}

	pub fn index(&self, name: &str) -> Option<&IndexDescriptor> {
		self.indexes.iter().find(|ix| ix.name == name)
	}

	pub fn btree_index_on(&self, field: &str) -> Option<&IndexDescriptor> {
		self.indexes.iter().find(|ix| ix.kind == IndexKind::Btree && ix.field == field)
	}

	/// The vector index to search: named when requested, otherwise the
	/// first vector index on the collection.
	pub fn vector_index(&self, name: Option<&str>) -> Option<&IndexDescriptor> {
		match name {
			Some(name) => self.indexes.iter().find(|ix| ix.kind == IndexKind::Vector && ix.name == name),
			None => self.indexes.iter().find(|ix| ix.kind == IndexKind::Vector),
		}
	}
}

/// Collection names are lowercased and limited to a conservative charset;
/// `/` separates a namespace prefix, `_` prefixes system collections.
pub fn validate_collection_name(name: &str) -> Result<(), EngineError> {
	let ok = !name.is_empty()
		&& name.len() <= 120
		&& name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '/'));
	if ok { Ok(()) } else { Err(EngineError::InvalidName(name.to_string())) }
}

/// Database ids are lowercased, trimmed, and must be file-name safe.
pub fn validate_database_id(id: &str) -> Result<(), EngineError> {
	let ok = !id.is_empty()
		&& id.len() <= 64
		&& id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'));
	if ok { Ok(()) } else { Err(EngineError::InvalidName(id.to_string())) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn vector_index_prefers_named_match() {
		let mut desc = CollectionDescriptor::new("docs");
		desc.indexes.push(IndexDescriptor {
			name: "vec_a".into(),
			field: "a".into(),
			kind: IndexKind::Vector,
			unique: false,
			dimensions: Some(4),
			metric: Some(DistanceMetric::Cosine),
		});
		desc.indexes.push(IndexDescriptor {
			name: "vec_b".into(),
			field: "b".into(),
			kind: IndexKind::Vector,
			unique: false,
			dimensions: Some(4),
			metric: Some(DistanceMetric::L2),
		});

		assert_eq!(desc.vector_index(None).unwrap().name, "vec_a");
		assert_eq!(desc.vector_index(Some("vec_b")).unwrap().name, "vec_b");
		assert!(desc.vector_index(Some("missing")).is_none());
	}

	#[test]
	fn name_validation() {
		assert!(validate_collection_name("orders").is_ok());
		assert!(validate_collection_name("ns/orders").is_ok());
		assert!(validate_collection_name("_emb_queue").is_ok());
		assert!(validate_collection_name("Orders").is_err());
		assert!(validate_collection_name("").is_err());

		assert!(validate_database_id("tenant-1").is_ok());
		assert!(validate_database_id("Tenant").is_err());
		assert!(validate_database_id("a/b").is_err());
	}
}
