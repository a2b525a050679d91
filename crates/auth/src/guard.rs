// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Stateless allow/deny predicates and logical↔physical collection name
//! resolution.
//!
//! Logical names are what the user says; physical names are what the
//! engine stores. A user with namespace `ns` works on `ns/`-prefixed
//! physical names and never sees the prefix (or foreign names) in
//! listings.

use blite_core::{Error, Result};

use crate::permissions::OpMask;
use crate::{ROOT_USER, User};

/// Collection that grants admin rights when an `ADMIN` entry names it.
pub const ADMIN_COLLECTION: &str = "_admin";

/// Maps a logical collection name to its physical form under the user's
/// namespace. `*` and already-prefixed names pass through.
pub fn resolve_physical(user: &User, logical: &str) -> String {
	let logical = logical.to_lowercase();
	match &user.namespace {
		Some(ns) if logical != "*" && !logical.starts_with(&format!("{ns}/")) => {
			format!("{ns}/{logical}")
		}
		_ => logical,
	}
}

/// Inverse of [`resolve_physical`] for listings: strips the caller's
/// namespace prefix, and hides names outside the namespace entirely.
pub fn strip_namespace(user: &User, physical: &str) -> Option<String> {
	match &user.namespace {
		Some(ns) => physical.strip_prefix(&format!("{ns}/")).map(str::to_string),
		None => Some(physical.to_string()),
	}
}

/// Allow iff the user is active and some permission entry matches the
/// resolved physical name with the op bit set. Returns the physical name
/// so callers never resolve twice.
pub fn check(user: &User, logical: &str, op: OpMask) -> Result<String> {
	if !user.active {
		return Err(Error::inactive_user(&user.name));
	}
	let physical = resolve_physical(user, logical);
	if user.permissions.iter().any(|entry| entry.allows(&physical, op)) {
		Ok(physical)
	} else {
		Err(Error::permission_denied(format!(
			"user '{}' lacks {} on '{}'",
			user.name, op, logical
		)))
	}
}

/// Database-scope restriction: a restricted user may only target its own
/// database (case-insensitive).
pub fn check_database(user: &User, database_id: &str) -> Result<()> {
	match &user.restricted_database {
		Some(restricted) if !restricted.eq_ignore_ascii_case(database_id) => {
			Err(Error::permission_denied(format!(
				"user '{}' is restricted to database '{}'",
				user.name, restricted
			)))
		}
		_ => Ok(()),
	}
}

/// Admin surface gate: `ADMIN` on `*` or on the `_admin` collection.
pub fn check_admin(user: &User) -> Result<()> {
	if !user.active {
		return Err(Error::inactive_user(&user.name));
	}
	let allowed = user.name == ROOT_USER
		|| user
			.permissions
			.iter()
			.any(|entry| {
				(entry.collection == "*" || entry.collection == ADMIN_COLLECTION)
					&& entry.ops.contains(OpMask::ADMIN)
			});
	if allowed {
		Ok(())
	} else {
		Err(Error::permission_denied(format!("user '{}' lacks admin rights", user.name)))
	}
}

#[cfg(test)]
mod tests {
	use blite_core::ErrorKind;
	use blite_core::value::Timestamp;

	use super::*;
	use crate::PermissionEntry;

	fn user(namespace: Option<&str>, permissions: Vec<PermissionEntry>) -> User {
		User {
			name: "alice".into(),
			active: true,
			created_at: Timestamp::now(),
			permissions,
			namespace: namespace.map(str::to_string),
			restricted_database: None,
			key_id: "k".into(),
			key_phc: "p".into(),
		}
	}

	#[test]
	fn namespace_resolution_round_trips() {
		let u = user(Some("a"), vec![]);
		assert_eq!(resolve_physical(&u, "orders"), "a/orders");
		assert_eq!(resolve_physical(&u, "a/orders"), "a/orders");
		assert_eq!(resolve_physical(&u, "*"), "*");
		assert_eq!(strip_namespace(&u, "a/orders"), Some("orders".into()));
		assert_eq!(strip_namespace(&u, "b/orders"), None);

		let plain = user(None, vec![]);
		assert_eq!(resolve_physical(&plain, "Orders"), "orders");
		assert_eq!(strip_namespace(&plain, "anything"), Some("anything".into()));
	}

	#[test]
	fn check_requires_matching_entry_and_bit() {
		let u = user(None, vec![PermissionEntry::new("orders", OpMask::QUERY | OpMask::INSERT)]);
		assert_eq!(check(&u, "orders", OpMask::QUERY).unwrap(), "orders");
		assert_eq!(check(&u, "orders", OpMask::DELETE).unwrap_err().kind, ErrorKind::PermissionDenied);
		assert_eq!(check(&u, "other", OpMask::QUERY).unwrap_err().kind, ErrorKind::PermissionDenied);

		let wild = user(None, vec![PermissionEntry::wildcard(OpMask::ALL)]);
		assert!(check(&wild, "anything", OpMask::DROP).is_ok());
	}

	#[test]
	fn check_matches_against_physical_name() {
		// The entry names the physical collection, namespace included.
		let u = user(Some("a"), vec![PermissionEntry::new("a/orders", OpMask::QUERY)]);
		assert_eq!(check(&u, "orders", OpMask::QUERY).unwrap(), "a/orders");

		// An entry for the bare logical name does not match.
		let wrong = user(Some("a"), vec![PermissionEntry::new("orders", OpMask::QUERY)]);
		assert!(check(&wrong, "orders", OpMask::QUERY).is_err());
	}

	#[test]
	fn inactive_users_are_rejected_everywhere() {
		let mut u = user(None, vec![PermissionEntry::wildcard(OpMask::ALL)]);
		u.active = false;
		assert_eq!(check(&u, "orders", OpMask::QUERY).unwrap_err().kind, ErrorKind::InactiveUser);
		assert_eq!(check_admin(&u).unwrap_err().kind, ErrorKind::InactiveUser);
	}

	#[test]
	fn database_restriction() {
		let mut u = user(None, vec![]);
		assert!(check_database(&u, "any").is_ok());

		u.restricted_database = Some("tenant-a".into());
		assert!(check_database(&u, "tenant-a").is_ok());
		assert!(check_database(&u, "Tenant-A").is_ok());
		let err = check_database(&u, "tenant-b").unwrap_err();
		assert_eq!(err.kind, ErrorKind::PermissionDenied);
		assert!(err.message.contains("restricted to"));
	}

	#[test]
	fn admin_gate() {
		let via_wildcard = user(None, vec![PermissionEntry::wildcard(OpMask::ADMIN)]);
		assert!(check_admin(&via_wildcard).is_ok());

		let via_admin_collection = user(None, vec![PermissionEntry::new(ADMIN_COLLECTION, OpMask::ADMIN)]);
		assert!(check_admin(&via_admin_collection).is_ok());

		let plain = user(None, vec![PermissionEntry::wildcard(OpMask::WRITE | OpMask::QUERY)]);
		assert!(check_admin(&plain).is_err());
	}
}
