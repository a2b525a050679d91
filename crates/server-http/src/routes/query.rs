// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The JSON-filter query endpoints and the query-string variant.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Extension, Path, Query, State};
use blite_auth::User;
use blite_cache::CacheVariant;
use blite_core::value::Value;
use blite_core::{Error, Result};
use blite_query::{CompareOp, FilterNode, QueryDescriptor};
use blite_runtime::ServerContext;
use blite_runtime::ops::queries;
use serde_json::Value as Json_;

use crate::json::QueryBody;
use crate::problem::ApiResult;
use crate::routes::documents::render_hits;

/// POST `/query`: the JSON filter dialect. The cache key hashes the raw
/// body bytes.
pub(crate) async fn query_json(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection)): Path<(String, String)>,
	body: Bytes,
) -> ApiResult<Json<Vec<Json_>>> {
	let database = ctx.resolve_database(&user, &db)?;
	let descriptor = parse_body(&body, &collection)?;
	let hits = queries::run(&ctx, &user, &database, descriptor, CacheVariant::JsonQuery, &body)
		.await?
		.into_hits()
		.await?;
	render_hits(&ctx, &database, hits).await
}

/// POST `/count`: same body shape; paging and projection are ignored.
pub(crate) async fn count(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection)): Path<(String, String)>,
	body: Bytes,
) -> ApiResult<Json<Json_>> {
	let database = ctx.resolve_database(&user, &db)?;
	let descriptor =
		if body.is_empty() { QueryDescriptor::new(&collection) } else { parse_body(&body, &collection)? };
	let count = queries::count(&ctx, &user, &database, descriptor, &body).await?;
	Ok(Json(serde_json::json!({ "count": count })))
}

/// GET `/query`: equality filters from query parameters, with `_sort`
/// (`-field` for descending), `_skip` and `_limit`. The cache key hashes
/// the concatenated parameters.
pub(crate) async fn query_params(
	State(ctx): State<Arc<ServerContext>>,
	Extension(user): Extension<User>,
	Path((db, collection)): Path<(String, String)>,
	Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<Json_>>> {
	let database = ctx.resolve_database(&user, &db)?;
	let descriptor = descriptor_from_params(&collection, &params)?;

	let concatenated =
		params.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
	let hits = queries::run(&ctx, &user, &database, descriptor, CacheVariant::ParamQuery, concatenated.as_bytes())
		.await?
		.into_hits()
		.await?;
	render_hits(&ctx, &database, hits).await
}

fn parse_body(body: &[u8], collection: &str) -> Result<QueryDescriptor> {
	if body.is_empty() {
		return Err(Error::invalid_input("query body is required"));
	}
	let parsed: QueryBody = serde_json::from_slice(body)
		.map_err(|e| Error::invalid_input(format!("malformed query body: {e}")))?;
	parsed.into_descriptor(collection)
}

fn descriptor_from_params(collection: &str, params: &[(String, String)]) -> Result<QueryDescriptor> {
	let mut descriptor = QueryDescriptor::new(collection);
	let mut conditions = Vec::new();
	for (key, raw) in params {
		match key.as_str() {
			"_sort" => {
				let (field, descending) = match raw.strip_prefix('-') {
					Some(field) => (field, true),
					None => (raw.as_str(), false),
				};
				descriptor = descriptor.order_by(field.to_lowercase(), descending);
			}
			"_skip" => {
				descriptor.skip = Some(
					raw.parse().map_err(|_| Error::invalid_input("_skip must be an integer"))?,
				);
			}
			"_limit" => {
				descriptor.take = Some(
					raw.parse().map_err(|_| Error::invalid_input("_limit must be an integer"))?,
				);
			}
			key if key.starts_with('_') => {
				return Err(Error::invalid_input(format!("unknown query parameter '{key}'")));
			}
			field => {
				conditions.push(FilterNode::compare(field.to_lowercase(), CompareOp::Eq, parse_scalar(raw)));
			}
		}
	}
	if !conditions.is_empty() {
		descriptor.filter = Some(if conditions.len() == 1 {
			conditions.remove(0)
		} else {
			FilterNode::All(conditions)
		});
	}
	Ok(descriptor)
}

/// Query-string values are typed by shape: integers, floats and bools
/// before falling back to strings.
fn parse_scalar(raw: &str) -> Value {
	if let Ok(v) = raw.parse::<i32>() {
		return Value::Int32(v);
	}
	if let Ok(v) = raw.parse::<i64>() {
		return Value::Int64(v);
	}
	if let Ok(v) = raw.parse::<f64>() {
		return Value::Float64(v);
	}
	match raw {
		"true" => Value::Bool(true),
		"false" => Value::Bool(false),
		_ => Value::String(raw.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn params_build_descriptor() {
		let params = vec![
			("tag".to_string(), "x".to_string()),
			("score".to_string(), "30".to_string()),
			("_sort".to_string(), "-score".to_string()),
			("_limit".to_string(), "2".to_string()),
		];
		let descriptor = descriptor_from_params("orders", &params).unwrap();
		descriptor.validate().unwrap();
		assert!(matches!(descriptor.filter, Some(FilterNode::All(ref nodes)) if nodes.len() == 2));
		assert!(descriptor.order_by[0].descending);
		assert_eq!(descriptor.effective_take(), Some(2));

		assert!(descriptor_from_params("orders", &[("_bogus".into(), "1".into())]).is_err());
	}

	#[test]
	fn scalar_typing_by_shape() {
		assert_eq!(parse_scalar("42"), Value::Int32(42));
		assert_eq!(parse_scalar("3.5"), Value::Float64(3.5));
		assert_eq!(parse_scalar("true"), Value::Bool(true));
		assert_eq!(parse_scalar("alice"), Value::String("alice".into()));
	}
}
