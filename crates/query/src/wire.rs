// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Descriptor wire framing.
//!
//! Layout: `u8` version, `u8` flags (bit 0 = zstd), `u32 LE` payload
//! length, then the postcard payload. The version byte gates the whole
//! frame; adding operators or scalar kinds is a postcard-compatible
//! extension within one version.

use crate::{QueryDescriptor, QueryError, Result};

const VERSION: u8 = 1;
const FLAG_ZSTD: u8 = 0b0000_0001;

/// Payloads above this size are compressed.
const COMPRESS_THRESHOLD: usize = 512;

pub fn encode_descriptor(descriptor: &QueryDescriptor) -> Result<Vec<u8>> {
	let payload = postcard::to_allocvec(descriptor).map_err(|e| QueryError::Wire(e.to_string()))?;
	let (payload, flags) = if payload.len() >= COMPRESS_THRESHOLD {
		let compressed =
			zstd::encode_all(payload.as_slice(), 0).map_err(|e| QueryError::Wire(e.to_string()))?;
		(compressed, FLAG_ZSTD)
	} else {
		(payload, 0)
	};

	let mut out = Vec::with_capacity(6 + payload.len());
	out.push(VERSION);
	out.push(flags);
	out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
	out.extend_from_slice(&payload);
	Ok(out)
}

pub fn decode_descriptor(bytes: &[u8]) -> Result<QueryDescriptor> {
	if bytes.len() < 6 {
		return Err(QueryError::Wire("descriptor frame is truncated".into()));
	}
	let version = bytes[0];
	if version != VERSION {
		return Err(QueryError::Wire(format!("unsupported descriptor version {version}")));
	}
	let flags = bytes[1];
	let len = u32::from_le_bytes(bytes[2..6].try_into().expect("length checked")) as usize;
	let payload = bytes.get(6..6 + len).ok_or_else(|| QueryError::Wire("descriptor frame is truncated".into()))?;

	let payload = if flags & FLAG_ZSTD != 0 {
		zstd::decode_all(payload).map_err(|e| QueryError::Wire(e.to_string()))?
	} else {
		payload.to_vec()
	};
	postcard::from_bytes(&payload).map_err(|e| QueryError::Wire(e.to_string()))
}
