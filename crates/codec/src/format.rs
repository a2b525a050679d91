// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Binary document format.
//!
//! Layout: `0xB1 0x17` magic, `u8` version, then the document body. A body
//! is a `u16 LE` field count followed by `(u32 LE field id, u8 type tag,
//! payload)` triples. Numerics are fixed-width little-endian; strings,
//! bytes and decimals are `u32 LE` length-prefixed; arrays and nested
//! documents recurse. Field names never appear in the buffer.

use blite_core::value::{DocId, Document, ObjectId, Timestamp, Value};
use uuid::Uuid;

use crate::{CodecError, FieldDictionary, Result};

const MAGIC: [u8; 2] = [0xB1, 0x17];
const VERSION: u8 = 1;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT32: u8 = 2;
const TAG_INT64: u8 = 3;
const TAG_FLOAT64: u8 = 4;
const TAG_DECIMAL: u8 = 5;
const TAG_STRING: u8 = 6;
const TAG_TIMESTAMP: u8 = 7;
const TAG_UUID: u8 = 8;
const TAG_OBJECT_ID: u8 = 9;
const TAG_BYTES: u8 = 10;
const TAG_ARRAY: u8 = 11;
const TAG_DOCUMENT: u8 = 12;

/// Encodes a document. Fails if any field name (including nested ones)
/// lacks a dictionary id.
pub fn encode(doc: &Document, dict: &FieldDictionary) -> Result<Vec<u8>> {
	let mut out = Vec::with_capacity(64);
	out.extend_from_slice(&MAGIC);
	out.push(VERSION);
	encode_body(doc, dict, &mut out)?;
	Ok(out)
}

/// Decodes a buffer. Fails if any id in the buffer lacks a dictionary
/// name, or the buffer is malformed.
pub fn decode(bytes: &[u8], dict: &FieldDictionary) -> Result<Document> {
	let mut reader = Reader { bytes, pos: 0 };
	if reader.take(2)? != MAGIC {
		return Err(CodecError::BadMagic);
	}
	let version = reader.u8()?;
	if version != VERSION {
		return Err(CodecError::UnsupportedVersion(version));
	}
	let doc = decode_body(&mut reader, dict)?;
	Ok(doc)
}

fn encode_body(doc: &Document, dict: &FieldDictionary, out: &mut Vec<u8>) -> Result<()> {
	out.extend_from_slice(&(doc.len() as u16).to_le_bytes());
	for (name, value) in doc.iter() {
		let id = dict.id_of(name).ok_or_else(|| CodecError::UnregisteredField(name.clone()))?;
		out.extend_from_slice(&id.to_le_bytes());
		encode_value(value, dict, out)?;
	}
	Ok(())
}

fn encode_value(value: &Value, dict: &FieldDictionary, out: &mut Vec<u8>) -> Result<()> {
	match value {
		Value::Null => out.push(TAG_NULL),
		Value::Bool(v) => {
			out.push(TAG_BOOL);
			out.push(*v as u8);
		}
		Value::Int32(v) => {
			out.push(TAG_INT32);
			out.extend_from_slice(&v.to_le_bytes());
		}
		Value::Int64(v) => {
			out.push(TAG_INT64);
			out.extend_from_slice(&v.to_le_bytes());
		}
		Value::Float64(v) => {
			out.push(TAG_FLOAT64);
			out.extend_from_slice(&v.to_le_bytes());
		}
		Value::Decimal(v) => {
			out.push(TAG_DECIMAL);
			put_bytes(out, v.to_string().as_bytes());
		}
		Value::String(v) => {
			out.push(TAG_STRING);
			put_bytes(out, v.as_bytes());
		}
		Value::Timestamp(v) => {
			out.push(TAG_TIMESTAMP);
			out.extend_from_slice(&v.0.to_le_bytes());
		}
		Value::Uuid(v) => {
			out.push(TAG_UUID);
			out.extend_from_slice(v.as_bytes());
		}
		Value::ObjectId(v) => {
			out.push(TAG_OBJECT_ID);
			out.extend_from_slice(&v.0);
		}
		Value::Bytes(v) => {
			out.push(TAG_BYTES);
			put_bytes(out, v);
		}
		Value::Array(items) => {
			out.push(TAG_ARRAY);
			out.extend_from_slice(&(items.len() as u16).to_le_bytes());
			for item in items {
				encode_value(item, dict, out)?;
			}
		}
		Value::Document(nested) => {
			out.push(TAG_DOCUMENT);
			encode_body(nested, dict, out)?;
		}
	}
	Ok(())
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
	out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
	out.extend_from_slice(bytes);
}

fn decode_body(reader: &mut Reader<'_>, dict: &FieldDictionary) -> Result<Document> {
	let count = reader.u16()?;
	let mut doc = Document::new();
	for _ in 0..count {
		let id = reader.u32()?;
		let name = dict.name_of(id).ok_or(CodecError::UnknownFieldId(id))?;
		let value = decode_value(reader, dict)?;
		doc.insert(name, value);
	}
	Ok(doc)
}

fn decode_value(reader: &mut Reader<'_>, dict: &FieldDictionary) -> Result<Value> {
	let tag = reader.u8()?;
	let value = match tag {
		TAG_NULL => Value::Null,
		TAG_BOOL => Value::Bool(reader.u8()? != 0),
		TAG_INT32 => Value::Int32(i32::from_le_bytes(reader.array()?)),
		TAG_INT64 => Value::Int64(i64::from_le_bytes(reader.array()?)),
		TAG_FLOAT64 => Value::Float64(f64::from_le_bytes(reader.array()?)),
		TAG_DECIMAL => {
			let raw = reader.length_prefixed()?;
			let text = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8("decimal"))?;
			Value::Decimal(text.parse::<bigdecimal::BigDecimal>().map_err(|_| CodecError::InvalidDecimal)?)
		}
		TAG_STRING => {
			let raw = reader.length_prefixed()?;
			let text = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8("string"))?;
			Value::String(text.to_string())
		}
		TAG_TIMESTAMP => Value::Timestamp(Timestamp(i64::from_le_bytes(reader.array()?))),
		TAG_UUID => Value::Uuid(Uuid::from_bytes(reader.array()?)),
		TAG_OBJECT_ID => Value::ObjectId(ObjectId(reader.array()?)),
		TAG_BYTES => Value::Bytes(reader.length_prefixed()?.to_vec()),
		TAG_ARRAY => {
			let count = reader.u16()?;
			let mut items = Vec::with_capacity(count as usize);
			for _ in 0..count {
				items.push(decode_value(reader, dict)?);
			}
			Value::Array(items)
		}
		TAG_DOCUMENT => Value::Document(decode_body(reader, dict)?),
		other => return Err(CodecError::UnknownTag(other)),
	};
	Ok(value)
}

/// Registers every field name a document uses (nested included) and
/// encodes it. The write path uses this so a fresh document never hits
/// [`CodecError::UnregisteredField`].
pub fn register_and_encode(doc: &Document, dict: &FieldDictionary) -> Result<(Vec<u8>, Vec<(String, u32)>)> {
	let outcome = dict.register(doc.field_names());
	let bytes = encode(doc, dict)?;
	Ok((bytes, outcome.newly_assigned))
}

/// Convenience for buffers that are known to hold an `_id` field.
pub fn decode_id(bytes: &[u8], dict: &FieldDictionary) -> Result<Option<DocId>> {
	Ok(decode(bytes, dict)?.id())
}

struct Reader<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	fn take(&mut self, n: usize) -> Result<&'a [u8]> {
		if self.pos + n > self.bytes.len() {
			return Err(CodecError::Truncated);
		}
		let slice = &self.bytes[self.pos..self.pos + n];
		self.pos += n;
		Ok(slice)
	}

	fn u8(&mut self) -> Result<u8> {
		Ok(self.take(1)?[0])
	}

	fn u16(&mut self) -> Result<u16> {
		Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("length checked")))
	}

	fn u32(&mut self) -> Result<u32> {
		Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("length checked")))
	}

	fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
		Ok(self.take(N)?.try_into().expect("length checked"))
	}

	fn length_prefixed(&mut self) -> Result<&'a [u8]> {
		let len = self.u32()? as usize;
		self.take(len)
	}
}
