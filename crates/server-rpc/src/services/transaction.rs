// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

use blite_auth::User;
use blite_core::Result;
use blite_runtime::ServerContext;
use blite_runtime::ops::transactions;

use crate::dispatch::Handled;
use crate::proto::{Response, TransactionRequest};

pub(crate) async fn handle(ctx: &ServerContext, user: &User, request: TransactionRequest) -> Result<Handled> {
	let response = match request {
		TransactionRequest::Begin => {
			let id = transactions::begin(ctx, user).await?;
			Response::TransactionStarted { id }
		}
		TransactionRequest::Commit { id } => {
			transactions::commit(ctx, user, id).await?;
			Response::Ack
		}
		TransactionRequest::Rollback { id } => {
			transactions::rollback(ctx, user, id).await?;
			Response::Ack
		}
	};
	Ok(Handled::Unary(response))
}
