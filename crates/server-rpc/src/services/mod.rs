// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! One module per service; each exposes a `handle` routing its request
//! enum into the shared runtime operations.

pub(crate) mod admin;
pub(crate) mod document;
pub(crate) mod dynamic;
pub(crate) mod metadata;
pub(crate) mod transaction;
