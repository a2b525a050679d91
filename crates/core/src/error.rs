// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// The error kinds every request path can surface.
///
/// Both protocol surfaces map these to their status channel: the HTTP
/// surface to RFC-9457 problem responses, the RPC surface to terminal
/// status frames. Leaf crates define their own `thiserror` enums and
/// convert into [`Error`] at the runtime boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
	/// No or blank credential header.
	MissingKey,
	/// A revoked user attempted an operation.
	InactiveUser,
	/// User lacks the operation on the collection, or is outside its
	/// restricted database.
	PermissionDenied,
	/// Database, collection, document, user or transaction missing.
	NotFound,
	/// Creating a user or database that already exists.
	Conflict,
	/// Malformed body, bad id syntax, unknown query operator.
	InvalidInput,
	/// Semantically invalid request, e.g. vector search without a vector
	/// index.
	SemanticFailure,
	/// Anything else. The message is kept short; detail stays in the logs.
	Internal,
}

impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			ErrorKind::MissingKey => "missing key",
			ErrorKind::InactiveUser => "inactive user",
			ErrorKind::PermissionDenied => "permission denied",
			ErrorKind::NotFound => "not found",
			ErrorKind::Conflict => "conflict",
			ErrorKind::InvalidInput => "invalid input",
			ErrorKind::SemanticFailure => "semantic failure",
			ErrorKind::Internal => "internal",
		};
		f.write_str(name)
	}
}

/// Error carried across crate boundaries: a kind plus a short,
/// client-presentable message.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct Error {
	pub kind: ErrorKind,
	pub message: String,
}

impl Error {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self { kind, message: message.into() }
	}

	pub fn missing_key() -> Self {
		Self::new(ErrorKind::MissingKey, "missing or blank API key")
	}

	pub fn inactive_user(name: &str) -> Self {
		Self::new(ErrorKind::InactiveUser, format!("user '{name}' is revoked"))
	}

	pub fn permission_denied(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::PermissionDenied, message)
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::NotFound, message)
	}

	pub fn conflict(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Conflict, message)
	}

	pub fn invalid_input(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::InvalidInput, message)
	}

	pub fn semantic(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::SemanticFailure, message)
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Internal, message)
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Error::internal(format!("i/o error: {err}"))
	}
}
