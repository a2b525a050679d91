// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Dictionary sync: the metadata surface clients negotiate field ids
//! through before encoding or decoding documents.

use std::collections::{BTreeMap, HashMap};

use blite_auth::{OpMask, User, guard};
use blite_core::Result;
use tracing::instrument;

use super::engine_call;
use crate::ServerContext;

/// Full name→id snapshot. Requires query access on the anchor
/// collection.
#[instrument(skip(ctx, user), fields(user = %user.name))]
pub async fn get_key_map(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	anchor_collection: &str,
) -> Result<BTreeMap<String, u32>> {
	guard::check_database(user, database)?;
	guard::check(user, anchor_collection, OpMask::QUERY)?;
	engine_call(ctx, database, |engine| Ok(engine.dictionary().snapshot())).await
}

/// Registers names idempotently and returns assignments for the
/// requested names only. Requires insert access on the anchor.
#[instrument(skip(ctx, user, names), fields(user = %user.name, count = names.len()))]
pub async fn register_keys(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	anchor_collection: &str,
	names: Vec<String>,
) -> Result<HashMap<String, u32>> {
	guard::check_database(user, database)?;
	guard::check(user, anchor_collection, OpMask::INSERT)?;
	engine_call(ctx, database, move |engine| engine.register_fields(names)).await
}
