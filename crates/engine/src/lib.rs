// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The embedded per-database storage engine and the registry that owns
//! the set of engines.
//!
//! One redb file per database. The engine carries the field dictionary,
//! collection descriptors (secondary indexes, schema history, time-series
//! and vector-source configs), explicit transactions, a change-capture
//! hub and backup. The server-side coordination layers never touch redb
//! directly; everything goes through [`Engine`].

pub use change::{ChangeEvent, ChangeOp};
pub use meta::{
	CollectionDescriptor, DistanceMetric, IndexDescriptor, IndexKind, SchemaField, SchemaVersion,
	TimeSeriesConfig, VectorSourceConfig, VectorSourceField,
};
pub use registry::{EngineRegistry, TenantInfo};
pub use store::{Engine, VectorHit};
pub use txn::EngineTxn;

mod change;
mod meta;
mod registry;
mod store;
mod txn;

use blite_core::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
	#[error("storage error: {0}")]
	Storage(String),
	#[error("collection '{0}' does not exist")]
	CollectionNotFound(String),
	#[error("collection '{0}' already exists")]
	CollectionExists(String),
	#[error("index '{0}' does not exist on '{1}'")]
	IndexNotFound(String, String),
	#[error("index '{0}' already exists on '{1}'")]
	IndexExists(String, String),
	#[error("unique index '{index}' rejected duplicate value on '{collection}'")]
	UniqueViolation { collection: String, index: String },
	#[error("collection '{0}' has no vector index")]
	NoVectorIndex(String),
	#[error("document has no usable identifier")]
	MissingId,
	#[error("database '{0}' does not exist")]
	DatabaseNotFound(String),
	#[error("database '{0}' already exists")]
	DatabaseExists(String),
	#[error("invalid name '{0}'")]
	InvalidName(String),
	#[error(transparent)]
	Codec(#[from] blite_codec::CodecError),
	#[error("{0}")]
	Core(#[from] blite_core::Error),
}

impl From<redb::Error> for EngineError {
	fn from(err: redb::Error) -> Self {
		EngineError::Storage(err.to_string())
	}
}

macro_rules! from_redb {
	($($ty:ty),*) => {
		$(impl From<$ty> for EngineError {
			fn from(err: $ty) -> Self {
				EngineError::Storage(err.to_string())
			}
		})*
	};
}

from_redb!(
	redb::DatabaseError,
	redb::TransactionError,
	redb::TableError,
	redb::StorageError,
	redb::CommitError
);

impl From<EngineError> for blite_core::Error {
	fn from(err: EngineError) -> Self {
		let kind = match &err {
			EngineError::CollectionNotFound(_)
			| EngineError::IndexNotFound(..)
			| EngineError::DatabaseNotFound(_) => ErrorKind::NotFound,
			EngineError::CollectionExists(_)
			| EngineError::IndexExists(..)
			| EngineError::DatabaseExists(_)
			| EngineError::UniqueViolation { .. } => ErrorKind::Conflict,
			EngineError::NoVectorIndex(_) => ErrorKind::SemanticFailure,
			EngineError::MissingId | EngineError::InvalidName(_) => ErrorKind::InvalidInput,
			EngineError::Codec(_) => ErrorKind::InvalidInput,
			EngineError::Core(inner) => inner.kind,
			EngineError::Storage(_) => ErrorKind::Internal,
		};
		blite_core::Error::new(kind, err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, EngineError>;
