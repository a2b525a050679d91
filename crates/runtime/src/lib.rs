// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The server-side coordination layer.
//!
//! [`ServerContext`] bundles the process-wide singletons (engine
//! registry, identity store, cache, transaction coordinator, embedding
//! pipeline), constructed once in the process root and passed explicitly
//! to every handler. The `ops` modules are the shared request
//! operations: both the binary RPC surface and the HTTP surface compile
//! their requests into these calls, so guard checks, namespace
//! resolution, transaction routing, cache invalidation and change
//! capture happen identically on both.

pub use context::ServerContext;

mod context;
pub mod ops;

pub use blite_core::{Error, ErrorKind, Result};
