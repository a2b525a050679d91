// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The per-engine field-name dictionary and the compact document codec
//! layered over it.
//!
//! Field names never travel inside document buffers; small integer ids
//! assigned by the dictionary do. Clients sync their copy of the mapping
//! through the metadata surface before encoding or decoding.

pub use dictionary::{FieldDictionary, RegisterOutcome};
pub use format::{decode, decode_id, encode, register_and_encode};

mod dictionary;
mod format;

use blite_core::ErrorKind;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
	#[error("field '{0}' has no dictionary id")]
	UnregisteredField(String),
	#[error("field id {0} is not in the dictionary")]
	UnknownFieldId(u32),
	#[error("document buffer is truncated")]
	Truncated,
	#[error("document buffer has a bad magic header")]
	BadMagic,
	#[error("unsupported document format version {0}")]
	UnsupportedVersion(u8),
	#[error("unknown value type tag {0}")]
	UnknownTag(u8),
	#[error("invalid utf-8 in {0} payload")]
	InvalidUtf8(&'static str),
	#[error("invalid decimal payload")]
	InvalidDecimal,
}

impl From<CodecError> for blite_core::Error {
	fn from(err: CodecError) -> Self {
		blite_core::Error::new(ErrorKind::InvalidInput, err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, CodecError>;
