// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The HTTP/JSON surface.
//!
//! All routes sit under `/api/v1` behind the authentication middleware;
//! routes carrying a `{collection}` segment pass the permission
//! middleware for their operation. Errors render as RFC-9457 problem
//! responses. The `default` sentinel in database path position maps to
//! the system database; `_system` maps to it on the backup route.

use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use blite_auth::OpMask;
use blite_runtime::ServerContext;
use tower_http::trace::TraceLayer;
use tracing::info;

mod auth;
mod json;
mod problem;
mod routes;

pub use problem::{ApiError, ApiResult};

pub fn router(ctx: Arc<ServerContext>) -> Router {
	let api = Router::new()
		// Database lifecycle and backup.
		.route("/databases", get(routes::databases::list).post(routes::databases::provision))
		.route("/databases/{id}", delete(routes::databases::deprovision))
		.route("/databases/{id}/backup", get(routes::databases::backup))
		// Users.
		.route("/users", get(routes::users::list).post(routes::users::create))
		.route("/users/{name}", delete(routes::users::remove))
		.route("/users/{name}/permissions", put(routes::users::update_permissions))
		.route("/users/{name}/rotate-key", post(routes::users::rotate_key))
		.route("/users/{name}/revoke", post(routes::users::revoke))
		// Collections.
		.route(
			"/{db}/collections",
			get(routes::collections::list)
				.post(routes::collections::create)
				.route_layer(require(&[(Method::GET, OpMask::QUERY), (Method::POST, OpMask::INSERT)])),
		)
		.route(
			"/{db}/collections/{collection}",
			delete(routes::collections::drop).route_layer(require(&[(Method::DELETE, OpMask::DROP)])),
		)
		// Dictionary sync.
		.route(
			"/{db}/{collection}/keys",
			get(routes::collections::key_map)
				.post(routes::collections::register_keys)
				.route_layer(require(&[(Method::GET, OpMask::QUERY), (Method::POST, OpMask::INSERT)])),
		)
		// Documents.
		.route(
			"/{db}/{collection}/documents",
			get(routes::documents::list)
				.post(routes::documents::insert)
				.route_layer(require(&[(Method::GET, OpMask::QUERY), (Method::POST, OpMask::INSERT)])),
		)
		.route(
			"/{db}/{collection}/documents/{id}",
			get(routes::documents::fetch)
				.put(routes::documents::replace)
				.delete(routes::documents::remove)
				.route_layer(require(&[
					(Method::GET, OpMask::QUERY),
					(Method::PUT, OpMask::UPDATE),
					(Method::DELETE, OpMask::DELETE),
				])),
		)
		// Queries.
		.route(
			"/{db}/{collection}/query",
			get(routes::query::query_params)
				.post(routes::query::query_json)
				.route_layer(require(&[(Method::GET, OpMask::QUERY), (Method::POST, OpMask::QUERY)])),
		)
		.route(
			"/{db}/{collection}/count",
			post(routes::query::count).route_layer(require(&[(Method::POST, OpMask::QUERY)])),
		)
		// Vector search and source config.
		.route(
			"/{db}/{collection}/vector-search",
			post(routes::vector::search).route_layer(require(&[(Method::POST, OpMask::QUERY)])),
		)
		.route(
			"/{db}/{collection}/vector-source",
			get(routes::vector::get_source)
				.put(routes::vector::set_source)
				.route_layer(require(&[(Method::GET, OpMask::QUERY), (Method::PUT, OpMask::ADMIN)])),
		)
		.layer(middleware::from_fn_with_state(Arc::clone(&ctx), auth::authenticate))
		.with_state(ctx);

	Router::new().nest("/api/v1", api).layer(TraceLayer::new_for_http())
}

/// Permission middleware for routes carrying a `{collection}` segment
/// (falling back to `*` where none is present), keyed by method.
fn require(ops: &'static [(Method, OpMask)]) -> auth::RequireOp {
	auth::RequireOp::new(ops)
}

pub async fn serve(ctx: Arc<ServerContext>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
	let addr = listener.local_addr()?;
	info!(%addr, "http surface listening");
	axum::serve(listener, router(ctx)).await
}
