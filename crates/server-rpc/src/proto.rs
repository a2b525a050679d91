// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Wire types and framing.
//!
//! A frame is a `u32 LE` length followed by the postcard encoding of
//! [`ClientFrame`] or [`ServerFrame`]. Document identifiers travel in
//! their tagged canonical form; index, schema, time-series and
//! vector-source descriptors reuse the engine's serialisable types.

use std::collections::BTreeMap;

use blite_auth::{OpMask, PermissionEntry, User};
use blite_core::value::DocId;
use blite_core::{Error, ErrorKind};
use blite_engine::{IndexDescriptor, SchemaField, SchemaVersion, TenantInfo, TimeSeriesConfig, VectorSourceConfig};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

pub const PROTOCOL_VERSION: u8 = 1;

/// Upper bound on a single frame; anything larger is a protocol error.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
	Unauthenticated,
	PermissionDenied,
	NotFound,
	AlreadyExists,
	InvalidArgument,
	FailedPrecondition,
	Internal,
}

impl From<ErrorKind> for StatusCode {
	fn from(kind: ErrorKind) -> Self {
		match kind {
			ErrorKind::MissingKey => StatusCode::Unauthenticated,
			ErrorKind::InactiveUser | ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
			ErrorKind::NotFound => StatusCode::NotFound,
			ErrorKind::Conflict => StatusCode::AlreadyExists,
			ErrorKind::InvalidInput => StatusCode::InvalidArgument,
			ErrorKind::SemanticFailure => StatusCode::FailedPrecondition,
			ErrorKind::Internal => StatusCode::Internal,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientFrame {
	/// First frame on a connection.
	Hello { protocol: u8, api_key: String },
	Request { id: u64, body: RequestBody },
	/// Stops a server-streaming request. Not an error; the reply stream
	/// ends without a status.
	Cancel { id: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerFrame {
	Welcome { protocol: u8 },
	Reply { id: u64, body: ReplyBody },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplyBody {
	/// Terminal single response.
	Unary(Response),
	/// One element of a server stream.
	Item(StreamItem),
	/// Terminal end of a server stream.
	End,
	/// Terminal failure.
	Status { code: StatusCode, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestBody {
	Metadata(MetadataRequest),
	Dynamic(DynamicRequest),
	Document(DocumentRequest),
	Transaction(TransactionRequest),
	Admin(AdminRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetadataRequest {
	GetKeyMap { collection: String },
	RegisterKeys { collection: String, names: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DynamicRequest {
	Insert { collection: String, payload: Vec<u8>, transaction_id: Option<Uuid> },
	InsertMany { collection: String, payloads: Vec<Vec<u8>>, transaction_id: Option<Uuid> },
	FindById { collection: String, id: DocId },
	Update { collection: String, payload: Vec<u8>, transaction_id: Option<Uuid> },
	UpdateMany { collection: String, payloads: Vec<Vec<u8>>, transaction_id: Option<Uuid> },
	Delete { collection: String, id: DocId, transaction_id: Option<Uuid> },
	DeleteMany { collection: String, ids: Vec<DocId>, transaction_id: Option<Uuid> },
	/// Server-streaming. The payload is the serialised query descriptor.
	Query { descriptor: Vec<u8> },
	ListCollections,
	DropCollection { collection: String },
	CreateIndex { collection: String, index: IndexDescriptor },
	DropIndex { collection: String, name: String },
	ListIndexes { collection: String },
	SetVectorSource { collection: String, source: Option<VectorSourceConfig> },
	GetVectorSource { collection: String },
	SetSchema { collection: String, fields: Vec<SchemaField> },
	GetSchema { collection: String },
	ConfigureTimeSeries { collection: String, config: Option<TimeSeriesConfig> },
	GetTimeSeriesInfo { collection: String },
	/// Server-streaming: the k nearest documents, best first.
	VectorSearch {
		collection: String,
		index_name: Option<String>,
		k: u32,
		ef_search: Option<u32>,
		query: Vec<f32>,
	},
}

/// Typed mirror of the dynamic CRUD surface. The `type_name` hint is
/// echoed on responses so client libraries can dispatch mapper
/// deserialisation; the server never enforces a schema from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DocumentRequest {
	Insert { collection: String, payload: Vec<u8>, type_name: String, transaction_id: Option<Uuid> },
	FindById { collection: String, id: DocId, type_name: String },
	Update { collection: String, payload: Vec<u8>, type_name: String, transaction_id: Option<Uuid> },
	Delete { collection: String, id: DocId, type_name: String, transaction_id: Option<Uuid> },
	Query { descriptor: Vec<u8>, type_name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransactionRequest {
	Begin,
	Commit { id: Uuid },
	Rollback { id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AdminRequest {
	CreateUser {
		name: String,
		permissions: Vec<WirePermission>,
		namespace: Option<String>,
		restricted_database: Option<String>,
	},
	RevokeUser { name: String },
	RotateKey { name: String },
	ListUsers,
	UpdatePerms { name: String, permissions: Vec<WirePermission> },
	ProvisionTenant { id: String },
	DeprovisionTenant { id: String, delete_files: bool },
	ListTenants,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
	KeyMap { entries: BTreeMap<String, u32> },
	KeysRegistered { entries: BTreeMap<String, u32> },
	Inserted { id: DocId },
	InsertedMany { ids: Vec<DocId> },
	Applied { applied: bool },
	AppliedMany { count: u64 },
	Document { payload: Option<Vec<u8>>, found: bool, type_name: Option<String> },
	Collections { names: Vec<String> },
	Indexes { indexes: Vec<IndexDescriptor> },
	VectorSource { source: Option<VectorSourceConfig> },
	Schema { versions: Vec<SchemaVersion> },
	SchemaSet { version: u32 },
	TimeSeries { config: Option<TimeSeriesConfig> },
	Ack,
	TransactionStarted { id: Uuid },
	Users { users: Vec<WireUser> },
	User { user: WireUser },
	UserCreated { user: WireUser, api_key: String },
	KeyRotated { api_key: String },
	Tenants { tenants: Vec<WireTenant> },
}

/// One element of a server stream. `error` carries non-fatal
/// per-message failures; fatal errors terminate the stream with a
/// status frame instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamItem {
	pub payload: Option<Vec<u8>>,
	pub found: bool,
	pub id: Option<DocId>,
	pub score: Option<f64>,
	pub type_name: Option<String>,
	pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePermission {
	pub collection: String,
	pub ops: u32,
}

impl From<&PermissionEntry> for WirePermission {
	fn from(entry: &PermissionEntry) -> Self {
		Self { collection: entry.collection.clone(), ops: entry.ops.bits() }
	}
}

impl From<&WirePermission> for PermissionEntry {
	fn from(wire: &WirePermission) -> Self {
		PermissionEntry::new(wire.collection.clone(), OpMask::from_bits_truncate(wire.ops))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireUser {
	pub name: String,
	pub active: bool,
	pub created_at: i64,
	pub permissions: Vec<WirePermission>,
	pub namespace: Option<String>,
	pub restricted_database: Option<String>,
}

impl From<&User> for WireUser {
	fn from(user: &User) -> Self {
		Self {
			name: user.name.clone(),
			active: user.active,
			created_at: user.created_at.millis(),
			permissions: user.permissions.iter().map(WirePermission::from).collect(),
			namespace: user.namespace.clone(),
			restricted_database: user.restricted_database.clone(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTenant {
	pub id: String,
	pub active: bool,
}

impl From<TenantInfo> for WireTenant {
	fn from(info: TenantInfo) -> Self {
		Self { id: info.id, active: info.active }
	}
}

/// Reads one length-prefixed frame. `Ok(None)` is a clean end of
/// stream.
pub async fn read_frame<T, R>(reader: &mut R) -> Result<Option<T>, Error>
where
	T: serde::de::DeserializeOwned,
	R: tokio::io::AsyncRead + Unpin,
{
	let mut len_bytes = [0u8; 4];
	match reader.read_exact(&mut len_bytes).await {
		Ok(_) => {}
		Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(Error::internal(format!("frame read failed: {e}"))),
	}
	let len = u32::from_le_bytes(len_bytes) as usize;
	if len > MAX_FRAME_BYTES {
		return Err(Error::invalid_input(format!("frame of {len} bytes exceeds the limit")));
	}
	let mut payload = vec![0u8; len];
	reader
		.read_exact(&mut payload)
		.await
		.map_err(|e| Error::internal(format!("frame read failed: {e}")))?;
	let frame = postcard::from_bytes(&payload)
		.map_err(|e| Error::invalid_input(format!("malformed frame: {e}")))?;
	Ok(Some(frame))
}

pub async fn write_frame<T, W>(writer: &mut W, frame: &T) -> Result<(), Error>
where
	T: Serialize,
	W: tokio::io::AsyncWrite + Unpin,
{
	let payload = postcard::to_allocvec(frame).map_err(|e| Error::internal(format!("frame encode failed: {e}")))?;
	writer
		.write_all(&(payload.len() as u32).to_le_bytes())
		.await
		.map_err(|e| Error::internal(format!("frame write failed: {e}")))?;
	writer
		.write_all(&payload)
		.await
		.map_err(|e| Error::internal(format!("frame write failed: {e}")))?;
	writer.flush().await.map_err(|e| Error::internal(format!("frame write failed: {e}")))?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn frames_round_trip_over_a_duplex_pipe() {
		let (mut a, mut b) = tokio::io::duplex(1024);

		let frame = ClientFrame::Request {
			id: 7,
			body: RequestBody::Dynamic(DynamicRequest::FindById {
				collection: "orders".into(),
				id: DocId::Int32(42),
			}),
		};
		write_frame(&mut a, &frame).await.unwrap();
		drop(a);

		let read: ClientFrame = read_frame(&mut b).await.unwrap().unwrap();
		match read {
			ClientFrame::Request { id, body: RequestBody::Dynamic(DynamicRequest::FindById { collection, id: doc_id }) } => {
				assert_eq!(id, 7);
				assert_eq!(collection, "orders");
				assert_eq!(doc_id, DocId::Int32(42));
			}
			other => panic!("unexpected frame {other:?}"),
		}

		// Clean end of stream after the sender hung up.
		assert!(read_frame::<ClientFrame, _>(&mut b).await.unwrap().is_none());
	}

	#[test]
	fn status_codes_cover_every_error_kind() {
		assert_eq!(StatusCode::from(ErrorKind::MissingKey), StatusCode::Unauthenticated);
		assert_eq!(StatusCode::from(ErrorKind::InactiveUser), StatusCode::PermissionDenied);
		assert_eq!(StatusCode::from(ErrorKind::Conflict), StatusCode::AlreadyExists);
		assert_eq!(StatusCode::from(ErrorKind::SemanticFailure), StatusCode::FailedPrecondition);
	}
}
