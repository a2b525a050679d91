// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Users persisted in the system database's `_users` collection, with an
//! in-memory registry for per-request authentication.

use std::sync::Arc;

use blite_core::value::{DocId, Document, Timestamp, Value};
use blite_core::{Error, Result};
use blite_engine::Engine;
use dashmap::DashMap;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

use crate::keys;
use crate::permissions::{OpMask, PermissionEntry};
use crate::{ROOT_USER, USERS_COLLECTION};

#[derive(Debug, Clone)]
pub struct User {
	pub name: String,
	pub active: bool,
	pub created_at: Timestamp,
	pub permissions: Vec<PermissionEntry>,
	pub namespace: Option<String>,
	pub restricted_database: Option<String>,
	pub(crate) key_id: String,
	pub(crate) key_phc: String,
}

impl User {
	fn to_document(&self) -> Document {
		let permissions = self
			.permissions
			.iter()
			.map(|entry| {
				let mut doc = Document::new();
				doc.insert("collection", Value::String(entry.collection.clone()));
				doc.insert("ops", Value::Int64(entry.ops.bits() as i64));
				Value::Document(doc)
			})
			.collect();

		let mut doc = Document::new();
		doc.set_id(&DocId::String(self.name.clone()));
		doc.insert("name", Value::String(self.name.clone()));
		doc.insert("active", Value::Bool(self.active));
		doc.insert("created_at", Value::Timestamp(self.created_at));
		doc.insert("permissions", Value::Array(permissions));
		doc.insert(
			"namespace",
			self.namespace.clone().map(Value::String).unwrap_or(Value::Null),
		);
		doc.insert(
			"restricted_database",
			self.restricted_database.clone().map(Value::String).unwrap_or(Value::Null),
		);
		doc.insert("key_id", Value::String(self.key_id.clone()));
		doc.insert("key_phc", Value::String(self.key_phc.clone()));
		doc
	}

	fn from_document(doc: &Document) -> Result<Self> {
		let string = |field: &str| -> Result<String> {
			match doc.get(field) {
				Some(Value::String(s)) => Ok(s.clone()),
				_ => Err(Error::internal(format!("user document lacks '{field}'"))),
			}
		};
		let optional_string = |field: &str| match doc.get(field) {
			Some(Value::String(s)) => Some(s.clone()),
			_ => None,
		};

		let mut permissions = Vec::new();
		if let Some(Value::Array(entries)) = doc.get("permissions") {
			for entry in entries {
				let Value::Document(entry) = entry else {
					continue;
				};
				let (Some(Value::String(collection)), Some(Value::Int64(bits))) =
					(entry.get("collection"), entry.get("ops"))
				else {
					continue;
				};
				permissions.push(PermissionEntry::new(
					collection.clone(),
					OpMask::from_bits_truncate(*bits as u32),
				));
			}
		}

		Ok(User {
			name: string("name")?,
			active: matches!(doc.get("active"), Some(Value::Bool(true))),
			created_at: match doc.get("created_at") {
				Some(Value::Timestamp(t)) => *t,
				_ => Timestamp(0),
			},
			permissions,
			namespace: optional_string("namespace"),
			restricted_database: optional_string("restricted_database"),
			key_id: string("key_id")?,
			key_phc: string("key_phc")?,
		})
	}
}

/// In-memory user registry backed by the system engine. Authentication
/// verifies the Argon2 hash once per `(key id, secret)` and thereafter
/// compares the cached secret in constant time.
pub struct IdentityStore {
	system: Arc<Engine>,
	users: DashMap<String, User>,
	key_index: DashMap<String, String>,
	verified: DashMap<String, String>,
}

impl std::fmt::Debug for IdentityStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("IdentityStore").field("users", &self.users.len()).finish()
	}
}

impl IdentityStore {
	/// Loads users from the system database, bootstrapping `root` on
	/// first startup. The returned string is root's plaintext key, present
	/// only when it was just minted.
	#[instrument(skip(system))]
	pub fn open(system: Arc<Engine>) -> Result<(Self, Option<String>)> {
		let store = Self {
			system,
			users: DashMap::new(),
			key_index: DashMap::new(),
			verified: DashMap::new(),
		};

		let dictionary = Arc::clone(store.system.dictionary());
		for (_, bytes) in store.system.scan_all(USERS_COLLECTION).map_err(Error::from)? {
			let doc = blite_codec::decode(&bytes, &dictionary)?;
			match User::from_document(&doc) {
				Ok(user) => store.index(user),
				Err(err) => warn!(%err, "skipping malformed user document"),
			}
		}

		let root_key = if store.users.contains_key(ROOT_USER) {
			None
		} else {
			let minted = keys::mint()?;
			let root = User {
				name: ROOT_USER.to_string(),
				active: true,
				created_at: Timestamp::now(),
				permissions: vec![PermissionEntry::wildcard(OpMask::ALL)],
				namespace: None,
				restricted_database: None,
				key_id: minted.key_id.clone(),
				key_phc: minted.phc.clone(),
			};
			store.persist(&root, true)?;
			store.index(root);
			info!("bootstrap root user created");
			Some(minted.plaintext)
		};

		info!(users = store.users.len(), "identity store loaded");
		Ok((store, root_key))
	}

	/// Resolves the user behind a presented API key.
	pub fn authenticate(&self, presented: Option<&str>) -> Result<User> {
		let presented = presented.map(str::trim).filter(|s| !s.is_empty()).ok_or_else(Error::missing_key)?;
		let (key_id, secret) =
			keys::split(presented).ok_or_else(|| Error::new(blite_core::ErrorKind::MissingKey, "invalid API key"))?;

		let name = self
			.key_index
			.get(key_id)
			.map(|entry| entry.clone())
			.ok_or_else(|| Error::new(blite_core::ErrorKind::MissingKey, "invalid API key"))?;
		let user = self
			.users
			.get(&name)
			.map(|entry| entry.clone())
			.ok_or_else(|| Error::new(blite_core::ErrorKind::MissingKey, "invalid API key"))?;

		let cached_ok = self
			.verified
			.get(key_id)
			.map(|known| known.as_bytes().ct_eq(secret.as_bytes()).into())
			.unwrap_or(false);
		if !cached_ok {
			if !keys::verify(&user.key_phc, secret)? {
				return Err(Error::new(blite_core::ErrorKind::MissingKey, "invalid API key"));
			}
			self.verified.insert(key_id.to_string(), secret.to_string());
		}

		if !user.active {
			return Err(Error::inactive_user(&user.name));
		}
		Ok(user)
	}

	#[instrument(skip(self, permissions))]
	pub fn create_user(
		&self,
		name: &str,
		permissions: Vec<PermissionEntry>,
		namespace: Option<String>,
		restricted_database: Option<String>,
	) -> Result<(User, String)> {
		let name = name.trim().to_lowercase();
		if name.is_empty() {
			return Err(Error::invalid_input("user name is empty"));
		}
		if self.users.contains_key(&name) {
			return Err(Error::conflict(format!("user '{name}' already exists")));
		}

		let minted = keys::mint()?;
		let user = User {
			name: name.clone(),
			active: true,
			created_at: Timestamp::now(),
			permissions,
			namespace: namespace.filter(|ns| !ns.is_empty()).map(|ns| ns.to_lowercase()),
			restricted_database: restricted_database.filter(|db| !db.is_empty()).map(|db| db.to_lowercase()),
			key_id: minted.key_id,
			key_phc: minted.phc,
		};
		self.persist(&user, true)?;
		self.index(user.clone());
		info!(user = %name, "user created");
		Ok((user, minted.plaintext))
	}

	pub fn get(&self, name: &str) -> Result<User> {
		self.users
			.get(&name.to_lowercase())
			.map(|entry| entry.clone())
			.ok_or_else(|| Error::not_found(format!("user '{name}' does not exist")))
	}

	pub fn list(&self) -> Vec<User> {
		let mut users: Vec<User> = self.users.iter().map(|entry| entry.clone()).collect();
		users.sort_by(|a, b| a.name.cmp(&b.name));
		users
	}

	/// Marks the user inactive. Root cannot be revoked.
	#[instrument(skip(self))]
	pub fn revoke(&self, name: &str) -> Result<()> {
		let mut user = self.get(name)?;
		if user.name == ROOT_USER {
			return Err(Error::permission_denied("the root user cannot be revoked"));
		}
		user.active = false;
		self.persist(&user, false)?;
		self.index(user);
		Ok(())
	}

	/// Removes the user entirely. Root cannot be deleted.
	#[instrument(skip(self))]
	pub fn delete(&self, name: &str) -> Result<()> {
		let user = self.get(name)?;
		if user.name == ROOT_USER {
			return Err(Error::permission_denied("the root user cannot be deleted"));
		}
		self.system
			.delete(USERS_COLLECTION, &DocId::String(user.name.clone()), None)
			.map_err(Error::from)?;
		self.users.remove(&user.name);
		self.key_index.remove(&user.key_id);
		self.verified.remove(&user.key_id);
		Ok(())
	}

	/// Mints a fresh key, invalidating the old one immediately.
	#[instrument(skip(self))]
	pub fn rotate_key(&self, name: &str) -> Result<String> {
		let mut user = self.get(name)?;
		let minted = keys::mint()?;
		self.key_index.remove(&user.key_id);
		self.verified.remove(&user.key_id);
		user.key_id = minted.key_id;
		user.key_phc = minted.phc;
		self.persist(&user, false)?;
		self.index(user);
		Ok(minted.plaintext)
	}

	#[instrument(skip(self, permissions))]
	pub fn update_permissions(&self, name: &str, permissions: Vec<PermissionEntry>) -> Result<User> {
		let mut user = self.get(name)?;
		user.permissions = permissions;
		self.persist(&user, false)?;
		self.index(user.clone());
		Ok(user)
	}

	fn index(&self, user: User) {
		self.key_index.insert(user.key_id.clone(), user.name.clone());
		self.users.insert(user.name.clone(), user);
	}

	fn persist(&self, user: &User, fresh: bool) -> Result<()> {
		let doc = user.to_document();
		if fresh {
			self.system.insert(USERS_COLLECTION, doc, None).map_err(Error::from)?;
		} else {
			let replaced = self.system.update(USERS_COLLECTION, doc, None).map_err(Error::from)?;
			if !replaced {
				return Err(Error::not_found(format!("user '{}' does not exist", user.name)));
			}
		}
		Ok(())
	}
}
