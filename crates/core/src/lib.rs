// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Shared foundations for BLite Server: the error model every crate maps
//! into, the document value model both protocol surfaces shuttle around,
//! and the server configuration.

pub use error::{Error, ErrorKind};

pub mod config;
mod error;
pub mod value;

pub type Result<T> = std::result::Result<T, Error>;

/// Canonical in-process id of the system database.
///
/// URL paths spell it `default`; the backup route labels it `_system`.
/// Everywhere inside the process it is the empty string.
pub const SYSTEM_DATABASE: &str = "";

/// Maps a database id as it appears in a URL path to its in-process form.
pub fn canonical_database_id(raw: &str) -> String {
	let id = raw.trim().to_lowercase();
	if id == "default" || id == "_system" { SYSTEM_DATABASE.to_string() } else { id }
}

/// Label used for the system database where an empty string is not
/// presentable, e.g. backup file names and cache keys.
pub fn database_label(id: &str) -> &str {
	if id.is_empty() { "_system" } else { id }
}
