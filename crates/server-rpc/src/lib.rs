// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The streaming binary RPC surface.
//!
//! Length-prefixed postcard frames over TCP. A connection opens with a
//! `Hello` carrying the API key; the key is re-resolved on every request
//! so revocation applies immediately. Requests are multiplexed by id and
//! dispatched to hand-written service tables; replies are unary, or a
//! stream of items ended by `End`, or a terminal `Status`.

pub use conn::RpcServer;
pub use proto::{
	AdminRequest, ClientFrame, DocumentRequest, DynamicRequest, MetadataRequest, ReplyBody, RequestBody,
	Response, ServerFrame, StatusCode, StreamItem, TransactionRequest, WirePermission, WireTenant, WireUser,
	read_frame, write_frame,
};

mod conn;
mod dispatch;
mod proto;
mod services;
