// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! API-key material: minting, hashing and verification.
//!
//! A key is `bl_<key id>.<secret>`, both parts base58. The server stores
//! the key id and an Argon2id PHC string of the secret; the plaintext is
//! returned exactly once from create/rotate.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{Error as PasswordHashError, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use blite_core::{Error, Result};
use rand::Rng;

const KEY_PREFIX: &str = "bl_";
const KEY_ID_BYTES: usize = 8;
const SECRET_BYTES: usize = 24;

/// OWASP-recommended Argon2id parameters:
/// 19 MiB memory, 2 iterations, parallelism 1, 32-byte output.
fn argon2_instance() -> Argon2<'static> {
	let params = Params::new(19 * 1024, 2, 1, Some(32)).expect("valid Argon2 params");
	Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

#[derive(Debug, Clone)]
pub(crate) struct MintedKey {
	pub key_id: String,
	pub phc: String,
	/// The full plaintext key, surfaced to the caller once.
	pub plaintext: String,
}

pub(crate) fn mint() -> Result<MintedKey> {
	let mut id_bytes = [0u8; KEY_ID_BYTES];
	let mut secret_bytes = [0u8; SECRET_BYTES];
	rand::rng().fill(&mut id_bytes);
	rand::rng().fill(&mut secret_bytes);

	let key_id = bs58::encode(id_bytes).into_string();
	let secret = bs58::encode(secret_bytes).into_string();

	let salt = SaltString::generate(&mut OsRng);
	let phc = argon2_instance()
		.hash_password(secret.as_bytes(), &salt)
		.map_err(|e| Error::internal(format!("key hashing failed: {e}")))?
		.to_string();

	Ok(MintedKey { plaintext: format!("{KEY_PREFIX}{key_id}.{secret}"), key_id, phc })
}

/// Splits a presented key into `(key id, secret)`.
pub(crate) fn split(presented: &str) -> Option<(&str, &str)> {
	let rest = presented.strip_prefix(KEY_PREFIX)?;
	let (key_id, secret) = rest.split_once('.')?;
	if key_id.is_empty() || secret.is_empty() {
		return None;
	}
	Some((key_id, secret))
}

/// Verifies a secret against the stored PHC string. `Ok(false)` is a
/// wrong secret; `Err` is corrupt stored material.
pub(crate) fn verify(phc: &str, secret: &str) -> Result<bool> {
	let parsed = PasswordHash::new(phc)
		.map_err(|e| Error::internal(format!("stored key hash is invalid: {e}")))?;
	match argon2_instance().verify_password(secret.as_bytes(), &parsed) {
		Ok(()) => Ok(true),
		Err(PasswordHashError::Password) => Ok(false),
		Err(e) => Err(Error::internal(format!("key verification failed: {e}"))),
	}
}
