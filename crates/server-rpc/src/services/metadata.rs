// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

use blite_auth::User;
use blite_core::Result;
use blite_runtime::ServerContext;
use blite_runtime::ops::metadata;

use crate::dispatch::Handled;
use crate::proto::{MetadataRequest, Response};

pub(crate) async fn handle(ctx: &ServerContext, user: &User, request: MetadataRequest) -> Result<Handled> {
	let database = ctx.default_database(user);
	let response = match request {
		MetadataRequest::GetKeyMap { collection } => {
			let entries = metadata::get_key_map(ctx, user, &database, &collection).await?;
			Response::KeyMap { entries }
		}
		MetadataRequest::RegisterKeys { collection, names } => {
			let entries = metadata::register_keys(ctx, user, &database, &collection, names).await?;
			Response::KeysRegistered { entries: entries.into_iter().collect() }
		}
	};
	Ok(Handled::Unary(response))
}
