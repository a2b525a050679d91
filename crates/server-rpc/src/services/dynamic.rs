// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Schema-less CRUD over opaque codec buffers, plus the streaming query
//! and vector-search endpoints.

use blite_auth::User;
use blite_core::{Error, Result};
use blite_runtime::ServerContext;
use blite_runtime::ops::{collections, documents, queries};
use blite_runtime::ops::queries::QueryOutcome;

use crate::dispatch::{Handled, ReplySink};
use crate::proto::{DynamicRequest, Response, StreamItem};

pub(crate) async fn handle(
	ctx: &ServerContext,
	user: &User,
	request: DynamicRequest,
	sink: &ReplySink,
) -> Result<Handled> {
	let database = ctx.default_database(user);
	let response = match request {
		DynamicRequest::Insert { collection, payload, transaction_id } => {
			let doc = decode_payload(ctx, &database, &payload).await?;
			let id = documents::insert(ctx, user, &database, &collection, doc, transaction_id).await?;
			Response::Inserted { id }
		}
		DynamicRequest::InsertMany { collection, payloads, transaction_id } => {
			let mut docs = Vec::with_capacity(payloads.len());
			for payload in &payloads {
				docs.push(decode_payload(ctx, &database, payload).await?);
			}
			let ids = documents::insert_many(ctx, user, &database, &collection, docs, transaction_id).await?;
			Response::InsertedMany { ids }
		}
		DynamicRequest::FindById { collection, id } => {
			let payload = documents::find_by_id(ctx, user, &database, &collection, id).await?;
			Response::Document { found: payload.is_some(), payload, type_name: None }
		}
		DynamicRequest::Update { collection, payload, transaction_id } => {
			let doc = decode_payload(ctx, &database, &payload).await?;
			let applied = documents::update(ctx, user, &database, &collection, doc, transaction_id).await?;
			Response::Applied { applied }
		}
		DynamicRequest::UpdateMany { collection, payloads, transaction_id } => {
			let mut docs = Vec::with_capacity(payloads.len());
			for payload in &payloads {
				docs.push(decode_payload(ctx, &database, payload).await?);
			}
			let count = documents::update_many(ctx, user, &database, &collection, docs, transaction_id).await?;
			Response::AppliedMany { count }
		}
		DynamicRequest::Delete { collection, id, transaction_id } => {
			let applied = documents::delete(ctx, user, &database, &collection, id, transaction_id).await?;
			Response::Applied { applied }
		}
		DynamicRequest::DeleteMany { collection, ids, transaction_id } => {
			let count = documents::delete_many(ctx, user, &database, &collection, ids, transaction_id).await?;
			Response::AppliedMany { count }
		}
		DynamicRequest::Query { descriptor } => {
			stream_query(ctx, user, &database, &descriptor, None, sink).await?;
			return Ok(Handled::Streamed);
		}
		DynamicRequest::VectorSearch { collection, index_name, k, ef_search: _, query } => {
			let matches =
				queries::vector_search(ctx, user, &database, &collection, index_name, k as usize, query).await?;
			for found in matches {
				let item = StreamItem {
					payload: Some(found.bytes),
					found: true,
					id: Some(found.id),
					score: Some(found.score),
					..StreamItem::default()
				};
				if !sink.item(item).await {
					return Ok(Handled::Streamed);
				}
			}
			sink.end().await;
			return Ok(Handled::Streamed);
		}
		DynamicRequest::ListCollections => {
			let names = collections::list(ctx, user, &database).await?;
			Response::Collections { names }
		}
		DynamicRequest::DropCollection { collection } => {
			collections::drop(ctx, user, &database, &collection).await?;
			Response::Ack
		}
		DynamicRequest::CreateIndex { collection, index } => {
			collections::create_index(ctx, user, &database, &collection, index).await?;
			Response::Ack
		}
		DynamicRequest::DropIndex { collection, name } => {
			collections::drop_index(ctx, user, &database, &collection, &name).await?;
			Response::Ack
		}
		DynamicRequest::ListIndexes { collection } => {
			let indexes = collections::list_indexes(ctx, user, &database, &collection).await?;
			Response::Indexes { indexes }
		}
		DynamicRequest::SetVectorSource { collection, source } => {
			collections::set_vector_source(ctx, user, &database, &collection, source).await?;
			Response::Ack
		}
		DynamicRequest::GetVectorSource { collection } => {
			let source = collections::get_vector_source(ctx, user, &database, &collection).await?;
			Response::VectorSource { source }
		}
		DynamicRequest::SetSchema { collection, fields } => {
			let version = collections::set_schema(ctx, user, &database, &collection, fields).await?;
			Response::SchemaSet { version: version.version }
		}
		DynamicRequest::GetSchema { collection } => {
			let versions = collections::get_schema(ctx, user, &database, &collection).await?;
			Response::Schema { versions }
		}
		DynamicRequest::ConfigureTimeSeries { collection, config } => {
			collections::set_time_series(ctx, user, &database, &collection, config).await?;
			Response::Ack
		}
		DynamicRequest::GetTimeSeriesInfo { collection } => {
			let config = collections::get_time_series(ctx, user, &database, &collection).await?;
			Response::TimeSeries { config }
		}
	};
	Ok(Handled::Unary(response))
}

/// Shared by the dynamic and typed query endpoints: run the descriptor
/// and stream `{payload, found}` items ended by End.
pub(crate) async fn stream_query(
	ctx: &ServerContext,
	user: &User,
	database: &str,
	descriptor_bytes: &[u8],
	type_name: Option<String>,
	sink: &ReplySink,
) -> Result<()> {
	let outcome = queries::run_wire(ctx, user, database, descriptor_bytes).await?;
	match outcome {
		QueryOutcome::Materialised(hits) => {
			for hit in hits {
				let item = StreamItem {
					payload: Some(hit.bytes),
					found: true,
					id: Some(hit.id),
					type_name: type_name.clone(),
					..StreamItem::default()
				};
				if !sink.item(item).await {
					return Ok(());
				}
			}
		}
		QueryOutcome::Stream(mut stream) => {
			while let Some(next) = stream.next().await {
				let hit = next?;
				let item = StreamItem {
					payload: Some(hit.bytes),
					found: true,
					id: Some(hit.id),
					type_name: type_name.clone(),
					..StreamItem::default()
				};
				if !sink.item(item).await {
					return Ok(());
				}
			}
		}
	}
	sink.end().await;
	Ok(())
}

/// Dynamic payloads are codec buffers; decoding validates them against
/// the target engine's dictionary before any guard-side work happens.
pub(crate) async fn decode_payload(
	ctx: &ServerContext,
	database: &str,
	payload: &[u8],
) -> Result<blite_core::value::Document> {
	let dictionary = queries::dictionary(ctx, database).await?;
	blite_codec::decode(payload, &dictionary).map_err(Error::from)
}
