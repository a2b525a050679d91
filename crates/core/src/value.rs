// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The document value model.
//!
//! Documents are ordered maps from lowercased field names to [`Value`]s.
//! The scalar set is fixed by the wire contract; arrays and nested
//! documents recurse. Every document carries its identifier in the `_id`
//! field in addition to being addressable by it.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use bigdecimal::BigDecimal;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Reserved field holding the document identifier.
pub const ID_FIELD: &str = "_id";

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Self {
		let millis = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_millis() as i64)
			.unwrap_or(0);
		Timestamp(millis)
	}

	pub fn millis(&self) -> i64 {
		self.0
	}
}

/// 12-byte object identifier: 4 bytes of seconds, 5 random bytes fixed per
/// process, 3 bytes of counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub [u8; 12]);

static OID_COUNTER: AtomicU32 = AtomicU32::new(0);

impl ObjectId {
	pub fn new() -> Self {
		let mut bytes = [0u8; 12];
		let secs = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_secs() as u32)
			.unwrap_or(0);
		bytes[..4].copy_from_slice(&secs.to_be_bytes());
		rand::rng().fill(&mut bytes[4..9]);
		let count = OID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
		bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
		ObjectId(bytes)
	}

	pub fn to_hex(&self) -> String {
		self.0.iter().map(|b| format!("{b:02x}")).collect()
	}

	pub fn parse_hex(hex: &str) -> Result<Self> {
		if hex.len() != 24 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
			return Err(Error::invalid_input(format!("'{hex}' is not a valid object id")));
		}
		let mut bytes = [0u8; 12];
		for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
			let s = std::str::from_utf8(chunk).expect("hex digits are ascii");
			bytes[i] = u8::from_str_radix(s, 16).expect("validated hex digits");
		}
		Ok(ObjectId(bytes))
	}
}

impl Default for ObjectId {
	fn default() -> Self {
		Self::new()
	}
}

impl Display for ObjectId {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.to_hex())
	}
}

/// A document value. Scalars carry a fixed wire tag in the codec; arrays
/// and nested documents recurse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
	Null,
	Bool(bool),
	Int32(i32),
	Int64(i64),
	Float64(f64),
	Decimal(BigDecimal),
	String(String),
	Timestamp(Timestamp),
	Uuid(Uuid),
	ObjectId(ObjectId),
	Bytes(Vec<u8>),
	Array(Vec<Value>),
	Document(Document),
}

impl Value {
	pub fn type_name(&self) -> &'static str {
		match self {
			Value::Null => "null",
			Value::Bool(_) => "bool",
			Value::Int32(_) => "int32",
			Value::Int64(_) => "int64",
			Value::Float64(_) => "float64",
			Value::Decimal(_) => "decimal",
			Value::String(_) => "string",
			Value::Timestamp(_) => "timestamp",
			Value::Uuid(_) => "uuid",
			Value::ObjectId(_) => "objectid",
			Value::Bytes(_) => "bytes",
			Value::Array(_) => "array",
			Value::Document(_) => "document",
		}
	}

	/// Cross-type ordering used by filters and sorts. Numeric kinds are
	/// mutually comparable; all other kinds compare only within their own
	/// kind. `None` means the pair is incomparable.
	pub fn compare(&self, other: &Value) -> Option<Ordering> {
		use Value::*;
		match (self, other) {
			(Null, Null) => Some(Ordering::Equal),
			(Bool(a), Bool(b)) => Some(a.cmp(b)),
			(String(a), String(b)) => Some(a.cmp(b)),
			(Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
			(Uuid(a), Uuid(b)) => Some(a.cmp(b)),
			(ObjectId(a), ObjectId(b)) => Some(a.cmp(b)),
			(Bytes(a), Bytes(b)) => Some(a.cmp(b)),
			(Decimal(a), Decimal(b)) => Some(a.cmp(b)),
			(Decimal(a), b) => b.to_decimal().map(|b| a.cmp(&b)),
			(a, Decimal(b)) => a.to_decimal().map(|a| a.cmp(b)),
			(a, b) => match (a.to_f64(), b.to_f64()) {
				(Some(x), Some(y)) => x.partial_cmp(&y),
				_ => None,
			},
		}
	}

	pub fn to_f64(&self) -> Option<f64> {
		match self {
			Value::Int32(v) => Some(*v as f64),
			Value::Int64(v) => Some(*v as f64),
			Value::Float64(v) => Some(*v),
			_ => None,
		}
	}

	fn to_decimal(&self) -> Option<BigDecimal> {
		match self {
			Value::Decimal(d) => Some(d.clone()),
			Value::Int32(v) => Some(BigDecimal::from(*v)),
			Value::Int64(v) => Some(BigDecimal::from(*v)),
			Value::Float64(v) => BigDecimal::try_from(*v).ok(),
			_ => None,
		}
	}

	/// Interprets the value as a vector of f32 components, as stored by the
	/// embedding pipeline and consumed by vector search.
	pub fn as_vector(&self) -> Option<Vec<f32>> {
		match self {
			Value::Array(items) => {
				let mut out = Vec::with_capacity(items.len());
				for item in items {
					out.push(item.to_f64()? as f32);
				}
				Some(out)
			}
			_ => None,
		}
	}

	pub fn from_vector(vector: &[f32]) -> Value {
		Value::Array(vector.iter().map(|c| Value::Float64(*c as f64)).collect())
	}
}

/// Ordered map of lowercased field names to values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, Value>);

impl Document {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a field, lowercasing the name to keep the dictionary
	/// invariant (field names are registered lowercase).
	pub fn insert(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
		self.0.insert(name.into().to_lowercase(), value);
		self
	}

	pub fn remove(&mut self, name: &str) -> Option<Value> {
		self.0.remove(name)
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	/// Resolves a dot-separated path through nested documents.
	pub fn get_path(&self, path: &str) -> Option<&Value> {
		let mut segments = path.split('.');
		let mut current = self.get(segments.next()?)?;
		for segment in segments {
			match current {
				Value::Document(doc) => current = doc.get(segment)?,
				_ => return None,
			}
		}
		Some(current)
	}

	/// Writes a value at a dot-separated path, creating intermediate
	/// documents. Fails if an intermediate segment exists and is not a
	/// document.
	pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
		let segments: Vec<&str> = path.split('.').collect();
		if segments.iter().any(|s| s.is_empty()) {
			return Err(Error::invalid_input(format!("invalid field path '{path}'")));
		}
		let mut current = &mut self.0;
		for segment in &segments[..segments.len() - 1] {
			let entry = current
				.entry(segment.to_lowercase())
				.or_insert_with(|| Value::Document(Document::new()));
			match entry {
				Value::Document(doc) => current = &mut doc.0,
				other => {
					return Err(Error::invalid_input(format!(
						"path '{path}' crosses non-document field of type {}",
						other.type_name()
					)));
				}
			}
		}
		current.insert(segments[segments.len() - 1].to_lowercase(), value);
		Ok(())
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
		self.0.iter()
	}

	/// Every field name in the document, recursing into nested documents
	/// with dot-joined paths. Used to register names before encoding.
	pub fn field_names(&self) -> Vec<String> {
		fn walk(doc: &Document, out: &mut Vec<String>) {
			for (name, value) in doc.iter() {
				out.push(name.clone());
				if let Value::Document(nested) = value {
					walk(nested, out);
				}
			}
		}
		let mut out = Vec::new();
		walk(self, &mut out);
		out
	}

	pub fn id(&self) -> Option<DocId> {
		self.get(ID_FIELD).and_then(DocId::from_value)
	}

	pub fn set_id(&mut self, id: &DocId) {
		self.insert(ID_FIELD, id.to_value());
	}
}

impl FromIterator<(String, Value)> for Document {
	fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
		let mut doc = Document::new();
		for (name, value) in iter {
			doc.insert(name, value);
		}
		doc
	}
}

/// Document identifier, tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocId {
	ObjectId(ObjectId),
	String(String),
	Int32(i32),
	Int64(i64),
	Uuid(Uuid),
}

impl DocId {
	pub fn generate() -> Self {
		DocId::ObjectId(ObjectId::new())
	}

	pub fn kind(&self) -> &'static str {
		match self {
			DocId::ObjectId(_) => "objectId",
			DocId::String(_) => "string",
			DocId::Int32(_) => "int32",
			DocId::Int64(_) => "int64",
			DocId::Uuid(_) => "uuid",
		}
	}

	/// Canonical wire encoding: one tag byte followed by the kind's fixed
	/// payload (strings are the remaining bytes).
	pub fn to_bytes(&self) -> Vec<u8> {
		match self {
			DocId::ObjectId(oid) => {
				let mut out = vec![1u8];
				out.extend_from_slice(&oid.0);
				out
			}
			DocId::String(s) => {
				let mut out = vec![2u8];
				out.extend_from_slice(s.as_bytes());
				out
			}
			DocId::Int32(v) => {
				let mut out = vec![3u8];
				out.extend_from_slice(&v.to_be_bytes());
				out
			}
			DocId::Int64(v) => {
				let mut out = vec![4u8];
				out.extend_from_slice(&v.to_be_bytes());
				out
			}
			DocId::Uuid(u) => {
				let mut out = vec![5u8];
				out.extend_from_slice(u.as_bytes());
				out
			}
		}
	}

	pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
		let (tag, rest) = bytes
			.split_first()
			.ok_or_else(|| Error::invalid_input("empty document id"))?;
		match tag {
			1 => {
				let arr: [u8; 12] = rest
					.try_into()
					.map_err(|_| Error::invalid_input("object id must be 12 bytes"))?;
				Ok(DocId::ObjectId(ObjectId(arr)))
			}
			2 => Ok(DocId::String(
				String::from_utf8(rest.to_vec())
					.map_err(|_| Error::invalid_input("string id is not utf-8"))?,
			)),
			3 => {
				let arr: [u8; 4] =
					rest.try_into().map_err(|_| Error::invalid_input("int32 id must be 4 bytes"))?;
				Ok(DocId::Int32(i32::from_be_bytes(arr)))
			}
			4 => {
				let arr: [u8; 8] =
					rest.try_into().map_err(|_| Error::invalid_input("int64 id must be 8 bytes"))?;
				Ok(DocId::Int64(i64::from_be_bytes(arr)))
			}
			5 => {
				let arr: [u8; 16] =
					rest.try_into().map_err(|_| Error::invalid_input("uuid id must be 16 bytes"))?;
				Ok(DocId::Uuid(Uuid::from_bytes(arr)))
			}
			other => Err(Error::invalid_input(format!("unknown id kind tag {other}"))),
		}
	}

	pub fn to_value(&self) -> Value {
		match self {
			DocId::ObjectId(oid) => Value::ObjectId(*oid),
			DocId::String(s) => Value::String(s.clone()),
			DocId::Int32(v) => Value::Int32(*v),
			DocId::Int64(v) => Value::Int64(*v),
			DocId::Uuid(u) => Value::Uuid(*u),
		}
	}

	pub fn from_value(value: &Value) -> Option<Self> {
		match value {
			Value::ObjectId(oid) => Some(DocId::ObjectId(*oid)),
			Value::String(s) => Some(DocId::String(s.clone())),
			Value::Int32(v) => Some(DocId::Int32(*v)),
			Value::Int64(v) => Some(DocId::Int64(*v)),
			Value::Uuid(u) => Some(DocId::Uuid(*u)),
			_ => None,
		}
	}

	/// Parses an id from its URL path form. Tries object-id hex, then uuid,
	/// then integers, falling back to a string id.
	pub fn parse_lossy(raw: &str) -> Self {
		if let Ok(oid) = ObjectId::parse_hex(raw) {
			return DocId::ObjectId(oid);
		}
		if let Ok(uuid) = Uuid::parse_str(raw) {
			return DocId::Uuid(uuid);
		}
		if let Ok(v) = raw.parse::<i32>() {
			return DocId::Int32(v);
		}
		if let Ok(v) = raw.parse::<i64>() {
			return DocId::Int64(v);
		}
		DocId::String(raw.to_string())
	}
}

impl Display for DocId {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			DocId::ObjectId(oid) => write!(f, "{oid}"),
			DocId::String(s) => f.write_str(s),
			DocId::Int32(v) => write!(f, "{v}"),
			DocId::Int64(v) => write!(f, "{v}"),
			DocId::Uuid(u) => write!(f, "{u}"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn object_ids_are_unique_and_round_trip_hex() {
		let a = ObjectId::new();
		let b = ObjectId::new();
		assert_ne!(a, b);
		assert_eq!(ObjectId::parse_hex(&a.to_hex()).unwrap(), a);
	}

	#[test]
	fn doc_id_round_trips_canonical_bytes() {
		let ids = [
			DocId::ObjectId(ObjectId::new()),
			DocId::String("order-17".into()),
			DocId::Int32(-5),
			DocId::Int64(1 << 40),
			DocId::Uuid(Uuid::new_v4()),
		];
		for id in ids {
			assert_eq!(DocId::from_bytes(&id.to_bytes()).unwrap(), id);
		}
	}

	#[test]
	fn parse_lossy_prefers_specific_kinds() {
		assert!(matches!(DocId::parse_lossy("0102030405060708090a0b0c"), DocId::ObjectId(_)));
		assert!(matches!(DocId::parse_lossy("42"), DocId::Int32(42)));
		assert!(matches!(DocId::parse_lossy("9999999999"), DocId::Int64(_)));
		assert!(matches!(DocId::parse_lossy("alice"), DocId::String(_)));
	}

	#[test]
	fn path_access_descends_nested_documents() {
		let mut doc = Document::new();
		doc.set_path("customer.address.city", Value::String("oslo".into())).unwrap();
		assert_eq!(doc.get_path("customer.address.city"), Some(&Value::String("oslo".into())));
		assert_eq!(doc.get_path("customer.missing"), None);

		let err = doc.set_path("customer.address.city.zip", Value::Int32(1)).unwrap_err();
		assert_eq!(err.kind, crate::ErrorKind::InvalidInput);
	}

	#[test]
	fn insert_lowercases_field_names() {
		let mut doc = Document::new();
		doc.insert("Name", Value::String("alice".into()));
		assert!(doc.get("name").is_some());
		assert!(doc.get("Name").is_none());
	}

	#[test]
	fn numeric_kinds_compare_across_types() {
		assert_eq!(Value::Int32(3).compare(&Value::Float64(3.0)), Some(Ordering::Equal));
		assert_eq!(Value::Int64(4).compare(&Value::Int32(3)), Some(Ordering::Greater));
		assert_eq!(
			Value::Decimal("2.5".parse().unwrap()).compare(&Value::Int32(3)),
			Some(Ordering::Less)
		);
		assert_eq!(Value::String("a".into()).compare(&Value::Int32(1)), None);
	}

	#[test]
	fn field_names_include_nested_paths_components() {
		let mut doc = Document::new();
		doc.set_path("a.b", Value::Int32(1)).unwrap();
		doc.insert("c", Value::Bool(true));
		let names = doc.field_names();
		assert!(names.contains(&"a".to_string()));
		assert!(names.contains(&"b".to_string()));
		assert!(names.contains(&"c".to_string()));
	}
}
