// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

/// Result of a [`FieldDictionary::register`] call.
#[derive(Debug, Clone, Default)]
pub struct RegisterOutcome {
	/// Assignments for the requested names only (lowercased).
	pub requested: HashMap<String, u32>,
	/// Names that received a fresh id during this call, in assignment
	/// order. The engine persists exactly these.
	pub newly_assigned: Vec<(String, u32)>,
}

/// Append-only mapping from lowercased field name to a small unsigned id.
///
/// Ids are assigned from 0 upward on first registration and never reused
/// or re-assigned. Reads take the shared lock; assignment re-checks under
/// the exclusive lock so concurrent registrations of the same new name
/// resolve to a single id.
#[derive(Debug, Default)]
pub struct FieldDictionary {
	inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
	forward: HashMap<String, u32>,
	reverse: HashMap<u32, String>,
	next: u32,
}

impl FieldDictionary {
	pub fn new() -> Self {
		Self::default()
	}

	/// Restores a dictionary from persisted `(name, id)` entries.
	///
	/// Gaps in the id sequence are tolerated: a rolled-back transaction may
	/// have consumed ids whose rows never reached the meta table. Assignment
	/// resumes past the highest persisted id.
	pub fn restore(entries: impl IntoIterator<Item = (String, u32)>) -> Self {
		let mut inner = Inner::default();
		for (name, id) in entries {
			inner.next = inner.next.max(id + 1);
			inner.forward.insert(name.clone(), id);
			inner.reverse.insert(id, name);
		}
		Self { inner: RwLock::new(inner) }
	}

	/// Registers names idempotently, lowercasing each, and returns the
	/// assignments for the requested names only.
	pub fn register<I, S>(&self, names: I) -> RegisterOutcome
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_lowercase()).collect();
		let mut outcome = RegisterOutcome::default();

		// Fast path: everything already known under the shared lock.
		{
			let inner = self.inner.read();
			if names.iter().all(|n| inner.forward.contains_key(n)) {
				for name in &names {
					outcome.requested.insert(name.clone(), inner.forward[name]);
				}
				return outcome;
			}
		}

		let mut inner = self.inner.write();
		for name in &names {
			let id = match inner.forward.get(name) {
				Some(id) => *id,
				None => {
					let id = inner.next;
					inner.next += 1;
					inner.forward.insert(name.clone(), id);
					inner.reverse.insert(id, name.clone());
					outcome.newly_assigned.push((name.clone(), id));
					id
				}
			};
			outcome.requested.insert(name.clone(), id);
		}
		outcome
	}

	pub fn id_of(&self, name: &str) -> Option<u32> {
		self.inner.read().forward.get(name).copied()
	}

	pub fn name_of(&self, id: u32) -> Option<String> {
		self.inner.read().reverse.get(&id).cloned()
	}

	/// Point-in-time copy of the whole mapping, for bulk client sync.
	pub fn snapshot(&self) -> BTreeMap<String, u32> {
		self.inner.read().forward.iter().map(|(n, id)| (n.clone(), *id)).collect()
	}

	pub fn len(&self) -> usize {
		self.inner.read().forward.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;

	#[test]
	fn register_is_idempotent_and_monotonic() {
		let dict = FieldDictionary::new();
		let first = dict.register(["name", "value"]);
		assert_eq!(first.requested["name"], 0);
		assert_eq!(first.requested["value"], 1);
		assert_eq!(first.newly_assigned.len(), 2);

		let second = dict.register(["value", "tag"]);
		assert_eq!(second.requested["value"], 1);
		assert_eq!(second.requested["tag"], 2);
		assert_eq!(second.newly_assigned, vec![("tag".to_string(), 2)]);

		// Only the requested names come back.
		assert!(!second.requested.contains_key("name"));
	}

	#[test]
	fn names_are_lowercased() {
		let dict = FieldDictionary::new();
		let outcome = dict.register(["Name", "NAME"]);
		assert_eq!(outcome.requested.len(), 1);
		assert_eq!(dict.id_of("name"), Some(0));
		assert_eq!(dict.id_of("Name"), None);
	}

	#[test]
	fn restore_resumes_past_id_gaps() {
		let dict = FieldDictionary::restore([("a".to_string(), 0), ("c".to_string(), 4)]);
		assert_eq!(dict.id_of("c"), Some(4));
		let outcome = dict.register(["d"]);
		assert_eq!(outcome.requested["d"], 5);
	}

	#[test]
	fn restore_round_trips_snapshot() {
		let dict = FieldDictionary::new();
		dict.register(["a", "b", "c"]);
		let restored = FieldDictionary::restore(dict.snapshot());
		assert_eq!(restored.snapshot(), dict.snapshot());
		assert_eq!(restored.name_of(1), Some("b".to_string()));
	}

	#[test]
	fn concurrent_registration_of_same_name_yields_single_id() {
		let dict = Arc::new(FieldDictionary::new());
		let mut handles = Vec::new();
		for i in 0..8 {
			let dict = Arc::clone(&dict);
			handles.push(std::thread::spawn(move || {
				let mut seen = Vec::new();
				for round in 0..50 {
					let name = format!("field{}", round % 10);
					let outcome = dict.register([name.as_str(), "shared"]);
					seen.push((name, outcome.requested["shared"], i));
				}
				seen
			}));
		}

		let shared_id = dict.id_of("shared");
		let mut all = Vec::new();
		for handle in handles {
			all.extend(handle.join().unwrap());
		}
		let shared_id = shared_id.or(dict.id_of("shared")).unwrap();
		for (name, observed_shared, _) in all {
			assert_eq!(observed_shared, shared_id);
			// Once observed, the id for a name never changes.
			assert_eq!(dict.id_of(&name), dict.register([name.as_str()]).requested.get(&name).copied());
		}
		assert_eq!(dict.len(), 11);
	}
}
