// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! RFC-9457 problem responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use blite_core::ErrorKind;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ProblemDetails {
	#[serde(rename = "type")]
	type_uri: &'static str,
	title: &'static str,
	status: u16,
	detail: String,
}

#[derive(Debug)]
pub struct ApiError(pub blite_core::Error);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<blite_core::Error> for ApiError {
	fn from(err: blite_core::Error) -> Self {
		ApiError(err)
	}
}

fn mapping(kind: ErrorKind) -> (StatusCode, &'static str, &'static str) {
	match kind {
		ErrorKind::MissingKey => (StatusCode::UNAUTHORIZED, "about:blank#unauthorized", "Unauthorized"),
		ErrorKind::InactiveUser | ErrorKind::PermissionDenied => {
			(StatusCode::FORBIDDEN, "about:blank#forbidden", "Forbidden")
		}
		ErrorKind::NotFound => (StatusCode::NOT_FOUND, "about:blank#not-found", "Not Found"),
		ErrorKind::Conflict => (StatusCode::CONFLICT, "about:blank#conflict", "Conflict"),
		ErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, "about:blank#validation", "Validation Failure"),
		ErrorKind::SemanticFailure => {
			(StatusCode::UNPROCESSABLE_ENTITY, "about:blank#semantic", "Unprocessable Request")
		}
		ErrorKind::Internal => {
			(StatusCode::INTERNAL_SERVER_ERROR, "about:blank#internal", "Internal Server Error")
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, type_uri, title) = mapping(self.0.kind);
		// Internal detail stays in the logs; clients get the short form.
		let detail = if self.0.kind == ErrorKind::Internal {
			tracing::error!(error = %self.0, "internal error");
			"internal error".to_string()
		} else {
			self.0.message
		};
		let body = ProblemDetails { type_uri, title, status: status.as_u16(), detail };
		let mut response = (status, Json(body)).into_response();
		response.headers_mut().insert(
			axum::http::header::CONTENT_TYPE,
			axum::http::HeaderValue::from_static("application/problem+json"),
		);
		response
	}
}
