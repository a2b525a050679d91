// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Authentication middleware and the per-route permission layer.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{FromRequestParts, RawPathParams, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use blite_auth::{OpMask, User, guard};
use blite_runtime::ServerContext;
use tower::{Layer, Service};

use crate::problem::ApiError;

/// Reads `x-api-key` or `Authorization: Bearer …`, resolves the user
/// and stores it in the request extensions.
pub(crate) async fn authenticate(
	State(ctx): State<Arc<ServerContext>>,
	mut request: Request,
	next: Next,
) -> Response {
	let headers = request.headers();
	let presented = headers
		.get("x-api-key")
		.and_then(|value| value.to_str().ok())
		.or_else(|| {
			headers
				.get(axum::http::header::AUTHORIZATION)
				.and_then(|value| value.to_str().ok())
				.and_then(|value| value.strip_prefix("Bearer "))
		})
		.map(str::to_string);

	match ctx.authenticate(presented.as_deref()) {
		Ok(user) => {
			request.extensions_mut().insert(user);
			next.run(request).await
		}
		Err(err) => ApiError::from(err).into_response(),
	}
}

/// Route layer enforcing the operation a method requires against the
/// `{collection}` route value, falling back to `*`. Methods without an
/// entry pass through to the handler, whose runtime op still checks.
#[derive(Clone)]
pub(crate) struct RequireOp {
	ops: &'static [(axum::http::Method, OpMask)],
}

impl RequireOp {
	pub(crate) fn new(ops: &'static [(axum::http::Method, OpMask)]) -> Self {
		Self { ops }
	}
}

impl<S> Layer<S> for RequireOp {
	type Service = RequireOpService<S>;

	fn layer(&self, inner: S) -> Self::Service {
		RequireOpService { inner, ops: self.ops }
	}
}

#[derive(Clone)]
pub(crate) struct RequireOpService<S> {
	inner: S,
	ops: &'static [(axum::http::Method, OpMask)],
}

impl<S> Service<Request> for RequireOpService<S>
where
	S: Service<Request, Response = Response> + Clone + Send + 'static,
	S::Future: Send,
{
	type Response = Response;
	type Error = S::Error;
	type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), S::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, request: Request) -> Self::Future {
		let op = self
			.ops
			.iter()
			.find(|(method, _)| *method == *request.method())
			.map(|(_, op)| *op);
		// Per tower convention the clone takes over; self keeps the
		// ready instance.
		let clone = self.inner.clone();
		let mut inner = std::mem::replace(&mut self.inner, clone);

		Box::pin(async move {
			let Some(op) = op else {
				return inner.call(request).await;
			};
			let (mut parts, body) = request.into_parts();
			let collection = match RawPathParams::from_request_parts(&mut parts, &()).await {
				Ok(params) => params
					.iter()
					.find(|(name, _)| *name == "collection")
					.map(|(_, value)| value.to_string())
					.unwrap_or_else(|| "*".to_string()),
				Err(_) => "*".to_string(),
			};
			let Some(user) = parts.extensions.get::<User>().cloned() else {
				return Ok(ApiError::from(blite_core::Error::missing_key()).into_response());
			};
			if let Err(err) = guard::check(&user, &collection, op) {
				return Ok(ApiError::from(err).into_response());
			}
			inner.call(Request::from_parts(parts, body)).await
		})
	}
}
