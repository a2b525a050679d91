// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Per-request dispatch: authenticate, route to the service table,
//! map errors to terminal status frames.

use blite_runtime::ServerContext;
use tokio::sync::mpsc;
use tracing::debug;

use crate::proto::{ReplyBody, RequestBody, Response, ServerFrame, StatusCode, StreamItem};
use crate::services;

/// Reply channel for one request id.
pub(crate) struct ReplySink {
	id: u64,
	tx: mpsc::Sender<ServerFrame>,
}

impl ReplySink {
	pub(crate) async fn unary(&self, response: Response) {
		let _ = self.tx.send(ServerFrame::Reply { id: self.id, body: ReplyBody::Unary(response) }).await;
	}

	/// Sends one stream element. False when the connection is gone; the
	/// producer stops.
	pub(crate) async fn item(&self, item: StreamItem) -> bool {
		self.tx.send(ServerFrame::Reply { id: self.id, body: ReplyBody::Item(item) }).await.is_ok()
	}

	pub(crate) async fn end(&self) {
		let _ = self.tx.send(ServerFrame::Reply { id: self.id, body: ReplyBody::End }).await;
	}

	pub(crate) async fn status(&self, code: StatusCode, message: String) {
		let _ = self.tx.send(ServerFrame::Reply { id: self.id, body: ReplyBody::Status { code, message } }).await;
	}
}

/// Outcome of a service handler: a unary response, or the stream was
/// already written (handler sent items and End).
pub(crate) enum Handled {
	Unary(Response),
	Streamed,
}

pub(crate) async fn handle_request(
	ctx: &ServerContext,
	api_key: &str,
	id: u64,
	body: RequestBody,
	tx: &mpsc::Sender<ServerFrame>,
) {
	let sink = ReplySink { id, tx: tx.clone() };

	// Every request resolves the user afresh.
	let user = match ctx.authenticate(Some(api_key)) {
		Ok(user) => user,
		Err(err) => {
			sink.status(StatusCode::from(err.kind), err.message).await;
			return;
		}
	};

	let result = match body {
		RequestBody::Metadata(request) => services::metadata::handle(ctx, &user, request).await,
		RequestBody::Dynamic(request) => services::dynamic::handle(ctx, &user, request, &sink).await,
		RequestBody::Document(request) => services::document::handle(ctx, &user, request, &sink).await,
		RequestBody::Transaction(request) => services::transaction::handle(ctx, &user, request).await,
		RequestBody::Admin(request) => services::admin::handle(ctx, &user, request).await,
	};

	match result {
		Ok(Handled::Unary(response)) => sink.unary(response).await,
		Ok(Handled::Streamed) => {}
		Err(err) => {
			debug!(request = id, %err, "request failed");
			sink.status(StatusCode::from(err.kind), err.message).await;
		}
	}
}
