// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Lifecycle of the set of engines: the well-known system engine plus
//! zero or more tenants.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use blite_core::SYSTEM_DATABASE;
use blite_core::value::DocId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::change::ChangeEvent;
use crate::meta::validate_database_id;
use crate::store::Engine;
use crate::{EngineError, Result};

const TENANT_EXTENSION: &str = "blite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantInfo {
	pub id: String,
	/// False when the file is present on disk but the engine is not open.
	pub active: bool,
}

/// Concurrent map `database id → engine`. The system engine lives at the
/// empty id and is always open; tenants open lazily on first access.
pub struct EngineRegistry {
	data_dir: PathBuf,
	system: Arc<Engine>,
	tenants: DashMap<String, Arc<Engine>>,
}

impl std::fmt::Debug for EngineRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EngineRegistry")
			.field("data_dir", &self.data_dir)
			.field("tenants", &self.tenants.len())
			.finish()
	}
}

impl EngineRegistry {
	#[instrument(skip(data_dir), fields(data_dir = %data_dir.as_ref().display()))]
	pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
		let data_dir = data_dir.as_ref().to_path_buf();
		std::fs::create_dir_all(data_dir.join("tenants"))
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		let system = Arc::new(Engine::open(SYSTEM_DATABASE, data_dir.join("system.blite"))?);
		info!("engine registry opened");
		Ok(Self { data_dir, system, tenants: DashMap::new() })
	}

	pub fn system(&self) -> Arc<Engine> {
		Arc::clone(&self.system)
	}

	/// Resolves an engine by canonical database id (`""` is the system
	/// database). A tenant that is known on disk but not yet open is
	/// opened here; per-id creation is serialised by the map entry.
	pub fn get(&self, id: &str) -> Result<Arc<Engine>> {
		if id.is_empty() {
			return Ok(self.system());
		}
		if let Some(engine) = self.tenants.get(id) {
			return Ok(Arc::clone(&engine));
		}
		let path = self.tenant_path(id);
		if !path.exists() {
			return Err(EngineError::DatabaseNotFound(id.to_string()));
		}
		match self.tenants.entry(id.to_string()) {
			Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
			Entry::Vacant(entry) => {
				let engine = Arc::new(Engine::open(id, &path)?);
				entry.insert(Arc::clone(&engine));
				Ok(engine)
			}
		}
	}

	/// Known tenants with their active flag. The system database is not a
	/// tenant and is not listed.
	pub fn list(&self) -> Result<Vec<TenantInfo>> {
		let mut out = Vec::new();
		let dir = self.data_dir.join("tenants");
		let entries = std::fs::read_dir(&dir).map_err(|e| EngineError::Storage(e.to_string()))?;
		for entry in entries {
			let entry = entry.map_err(|e| EngineError::Storage(e.to_string()))?;
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some(TENANT_EXTENSION) {
				continue;
			}
			let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
				continue;
			};
			out.push(TenantInfo { id: id.to_string(), active: self.tenants.contains_key(id) });
		}
		out.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(out)
	}

	#[instrument(skip(self))]
	pub fn provision(&self, id: &str) -> Result<Arc<Engine>> {
		let id = id.trim().to_lowercase();
		validate_database_id(&id)?;
		let path = self.tenant_path(&id);
		if self.tenants.contains_key(&id) || path.exists() {
			return Err(EngineError::DatabaseExists(id));
		}
		match self.tenants.entry(id.clone()) {
			Entry::Occupied(_) => Err(EngineError::DatabaseExists(id)),
			Entry::Vacant(entry) => {
				let engine = Arc::new(Engine::open(&id, &path)?);
				entry.insert(Arc::clone(&engine));
				info!(database = %id, "tenant provisioned");
				Ok(engine)
			}
		}
	}

	/// Closes the tenant engine; with `delete_files` the on-disk file is
	/// removed as well. The system database cannot be deprovisioned.
	#[instrument(skip(self))]
	pub fn deprovision(&self, id: &str, delete_files: bool) -> Result<()> {
		let id = id.trim().to_lowercase();
		if id.is_empty() {
			return Err(EngineError::InvalidName("the system database cannot be deprovisioned".into()));
		}
		let path = self.tenant_path(&id);
		let was_open = self.tenants.remove(&id).is_some();
		if !was_open && !path.exists() {
			return Err(EngineError::DatabaseNotFound(id));
		}
		if delete_files && path.exists() {
			std::fs::remove_file(&path).map_err(|e| EngineError::Storage(e.to_string()))?;
		}
		info!(database = %id, delete_files, "tenant deprovisioned");
		Ok(())
	}

	/// Bounded stream of change events from the engine's change-capture
	/// facility. Dropping the receiver detaches without loss to other
	/// subscribers.
	pub fn subscribe_change(&self, id: &str, collection: &str) -> Result<broadcast::Receiver<ChangeEvent>> {
		Ok(self.get(id)?.subscribe(collection))
	}

	fn tenant_path(&self, id: &str) -> PathBuf {
		self.data_dir.join("tenants").join(format!("{id}.{TENANT_EXTENSION}"))
	}
}

/// Convenience re-export so callers can name the event payload without
/// importing the change module.
pub type ChangeStream = broadcast::Receiver<ChangeEvent>;

#[allow(dead_code)]
fn _assert_send_sync() {
	fn check<T: Send + Sync>() {}
	check::<EngineRegistry>();
	check::<ChangeEvent>();
	check::<DocId>();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn provision_get_list_deprovision() {
		let dir = tempfile::tempdir().unwrap();
		let registry = EngineRegistry::open(dir.path()).unwrap();

		// Ids are lowercased and trimmed before use.
		registry.provision(" Tenant-A ").unwrap();
		let err = registry.provision("tenant-a").unwrap_err();
		assert!(matches!(err, EngineError::DatabaseExists(_)));
		assert!(matches!(registry.provision("no/slash"), Err(EngineError::InvalidName(_))));

		let engine = registry.get("tenant-a").unwrap();
		assert_eq!(engine.database_id(), "tenant-a");

		let listed = registry.list().unwrap();
		assert_eq!(listed, vec![TenantInfo { id: "tenant-a".into(), active: true }]);

		registry.deprovision("tenant-a", true).unwrap();
		assert!(registry.list().unwrap().is_empty());
		assert!(matches!(registry.get("tenant-a"), Err(EngineError::DatabaseNotFound(_))));
		assert!(matches!(registry.deprovision("tenant-a", false), Err(EngineError::DatabaseNotFound(_))));
	}

	#[test]
	fn inactive_tenants_are_listed_and_reopen_lazily() {
		let dir = tempfile::tempdir().unwrap();
		{
			let registry = EngineRegistry::open(dir.path()).unwrap();
			registry.provision("tenant-b").unwrap();
		}
		let registry = EngineRegistry::open(dir.path()).unwrap();
		assert_eq!(registry.list().unwrap(), vec![TenantInfo { id: "tenant-b".into(), active: false }]);

		registry.get("tenant-b").unwrap();
		assert_eq!(registry.list().unwrap(), vec![TenantInfo { id: "tenant-b".into(), active: true }]);
	}

	#[test]
	fn empty_id_resolves_to_system() {
		let dir = tempfile::tempdir().unwrap();
		let registry = EngineRegistry::open(dir.path()).unwrap();
		assert_eq!(registry.get("").unwrap().database_id(), "");
	}
}
