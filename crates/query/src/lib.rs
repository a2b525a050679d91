// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The query layer: a serialisable, language-neutral descriptor both
//! protocol surfaces compile into, its wire framing, and the executor
//! that runs a descriptor against an engine with push-down of filter,
//! sort, projection and paging.

pub use descriptor::{CompareOp, FilterNode, FilterValue, Projection, QueryDescriptor, SortKey};
pub use executor::{DocumentStream, QueryHit, execute, project, sort_hits};
pub use filter::matches;
pub use wire::{decode_descriptor, encode_descriptor};

mod descriptor;
mod executor;
mod filter;
mod wire;

use blite_core::ErrorKind;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
	/// The descriptor bytes could not be parsed.
	#[error("malformed query descriptor: {0}")]
	Wire(String),
	/// The descriptor parsed but is semantically invalid.
	#[error("invalid query: {0}")]
	Validation(String),
}

impl From<QueryError> for blite_core::Error {
	fn from(err: QueryError) -> Self {
		let kind = match &err {
			QueryError::Wire(_) => ErrorKind::InvalidInput,
			QueryError::Validation(_) => ErrorKind::SemanticFailure,
		};
		blite_core::Error::new(kind, err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, QueryError>;
