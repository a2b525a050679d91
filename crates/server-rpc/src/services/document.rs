// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Typed CRUD: the dynamic semantics with an advisory `type_name` hint
//! echoed on responses.

use blite_auth::User;
use blite_core::Result;
use blite_runtime::ServerContext;
use blite_runtime::ops::documents;

use crate::dispatch::{Handled, ReplySink};
use crate::proto::{DocumentRequest, Response};
use crate::services::dynamic::{decode_payload, stream_query};

pub(crate) async fn handle(
	ctx: &ServerContext,
	user: &User,
	request: DocumentRequest,
	sink: &ReplySink,
) -> Result<Handled> {
	let database = ctx.default_database(user);
	let response = match request {
		DocumentRequest::Insert { collection, payload, type_name: _, transaction_id } => {
			let doc = decode_payload(ctx, &database, &payload).await?;
			let id = documents::insert(ctx, user, &database, &collection, doc, transaction_id).await?;
			Response::Inserted { id }
		}
		DocumentRequest::FindById { collection, id, type_name } => {
			let payload = documents::find_by_id(ctx, user, &database, &collection, id).await?;
			Response::Document { found: payload.is_some(), payload, type_name: Some(type_name) }
		}
		DocumentRequest::Update { collection, payload, type_name: _, transaction_id } => {
			let doc = decode_payload(ctx, &database, &payload).await?;
			let applied = documents::update(ctx, user, &database, &collection, doc, transaction_id).await?;
			Response::Applied { applied }
		}
		DocumentRequest::Delete { collection, id, type_name: _, transaction_id } => {
			let applied = documents::delete(ctx, user, &database, &collection, id, transaction_id).await?;
			Response::Applied { applied }
		}
		DocumentRequest::Query { descriptor, type_name } => {
			stream_query(ctx, user, &database, &descriptor, Some(type_name), sink).await?;
			return Ok(Handled::Streamed);
		}
	};
	Ok(Handled::Unary(response))
}
