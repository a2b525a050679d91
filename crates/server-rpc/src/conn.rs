// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Connection handling: Hello handshake, request multiplexing, per-
//! request tasks, and cancellation.

use std::sync::Arc;

use blite_runtime::ServerContext;
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch;
use crate::proto::{ClientFrame, PROTOCOL_VERSION, ReplyBody, ServerFrame, StatusCode, read_frame, write_frame};

/// Frames queued towards one connection's writer task.
const WRITE_QUEUE_DEPTH: usize = 64;

pub struct RpcServer {
	ctx: Arc<ServerContext>,
}

impl RpcServer {
	pub fn new(ctx: Arc<ServerContext>) -> Self {
		Self { ctx }
	}

	/// Accept loop. Runs until the listener fails.
	pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
		let addr = listener.local_addr()?;
		info!(%addr, "rpc surface listening");
		loop {
			let (socket, peer) = listener.accept().await?;
			let ctx = Arc::clone(&self.ctx);
			tokio::spawn(async move {
				debug!(%peer, "rpc connection opened");
				if let Err(err) = handle_connection(ctx, socket).await {
					debug!(%peer, %err, "rpc connection closed");
				}
			});
		}
	}
}

async fn handle_connection(ctx: Arc<ServerContext>, socket: TcpStream) -> Result<(), blite_core::Error> {
	let (mut reader, mut writer) = socket.into_split();

	// The handshake carries the API key for the whole connection. The
	// key is only stored, not resolved: every request re-authenticates.
	let api_key = match read_frame::<ClientFrame, _>(&mut reader).await? {
		Some(ClientFrame::Hello { protocol, api_key }) => {
			if protocol != PROTOCOL_VERSION {
				let frame = ServerFrame::Reply {
					id: 0,
					body: ReplyBody::Status {
						code: StatusCode::InvalidArgument,
						message: format!("unsupported protocol version {protocol}"),
					},
				};
				let _ = write_frame(&mut writer, &frame).await;
				return Ok(());
			}
			api_key
		}
		Some(_) => {
			return Err(blite_core::Error::invalid_input("connection must open with Hello"));
		}
		None => return Ok(()),
	};

	let (tx, mut rx) = mpsc::channel::<ServerFrame>(WRITE_QUEUE_DEPTH);
	let writer_task = tokio::spawn(async move {
		while let Some(frame) = rx.recv().await {
			if write_frame(&mut writer, &frame).await.is_err() {
				break;
			}
		}
	});
	tx.send(ServerFrame::Welcome { protocol: PROTOCOL_VERSION })
		.await
		.map_err(|_| blite_core::Error::internal("connection writer closed"))?;

	let in_flight: Arc<DashMap<u64, JoinHandle<()>>> = Arc::new(DashMap::new());

	while let Some(frame) = read_frame::<ClientFrame, _>(&mut reader).await? {
		match frame {
			ClientFrame::Hello { .. } => {
				warn!("duplicate Hello frame; closing connection");
				break;
			}
			ClientFrame::Request { id, body } => {
				let ctx = Arc::clone(&ctx);
				let tx = tx.clone();
				let api_key = api_key.clone();
				let in_flight_for_task = Arc::clone(&in_flight);
				let handle = tokio::spawn(async move {
					dispatch::handle_request(&ctx, &api_key, id, body, &tx).await;
					in_flight_for_task.remove(&id);
				});
				in_flight.insert(id, handle);
			}
			ClientFrame::Cancel { id } => {
				if let Some((_, handle)) = in_flight.remove(&id) {
					handle.abort();
					// Cancellation is not an error; the stream just ends.
					let _ = tx.send(ServerFrame::Reply { id, body: ReplyBody::End }).await;
				}
			}
		}
	}

	// Connection gone: stop whatever is still producing.
	for entry in in_flight.iter() {
		entry.value().abort();
	}
	drop(tx);
	let _ = writer_task.await;
	Ok(())
}
