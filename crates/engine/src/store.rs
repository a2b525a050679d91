// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The per-database embedded store.
//!
//! One redb file per database. Layout:
//!
//! - `meta` table: collection name → postcard-encoded descriptor.
//! - `dictionary` table: field id → field name.
//! - `d:{collection}` tables: canonical document-id bytes → document buffer.
//! - `i:{collection}:{index}` tables: length-prefixed value bytes followed
//!   by document-id bytes → document-id bytes, so equal values sort
//!   adjacently and equality lookups are a prefix range.
//!
//! redb has a single writer per database; an open explicit transaction
//! therefore holds off ad-hoc writers at the storage layer, while readers
//! keep seeing the last committed state through MVCC snapshots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use blite_codec::{FieldDictionary, decode, register_and_encode};
use blite_core::value::{DocId, Document, Timestamp, Value};
use parking_lot::RwLock;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use tracing::{debug, info, instrument, warn};

use crate::change::{ChangeEvent, ChangeHub, ChangeOp};
use crate::meta::{
	CollectionDescriptor, DistanceMetric, IndexDescriptor, IndexKind, SchemaField, SchemaVersion,
	TimeSeriesConfig, VectorSourceConfig, validate_collection_name,
};
use crate::txn::EngineTxn;
use crate::{EngineError, Result};

const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const DICTIONARY: TableDefinition<u32, &str> = TableDefinition::new("dictionary");

/// Cap on documents pruned per mutation on a time-series collection.
const TTL_PRUNE_LIMIT: usize = 256;

/// A vector-search match, best first.
#[derive(Debug, Clone)]
pub struct VectorHit {
	pub id: DocId,
	pub score: f64,
	pub bytes: Vec<u8>,
}

pub struct Engine {
	id: String,
	path: PathBuf,
	db: Database,
	dictionary: Arc<FieldDictionary>,
	descriptors: RwLock<HashMap<String, CollectionDescriptor>>,
	changes: ChangeHub,
}

impl std::fmt::Debug for Engine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Engine").field("id", &self.id).field("path", &self.path).finish()
	}
}

impl Engine {
	/// Opens or creates the database file and loads the dictionary and
	/// collection descriptors.
	#[instrument(name = "engine::open", skip_all, fields(path = %path.as_ref().display()))]
	pub fn open(id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
		let id = id.into();
		let path = path.as_ref().to_path_buf();
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).map_err(|e| EngineError::Storage(e.to_string()))?;
		}
		let db = Database::create(&path)?;

		// Bootstrap the fixed tables so later reads never miss them.
		let wt = db.begin_write()?;
		{
			let _ = wt.open_table(META)?;
			let _ = wt.open_table(DICTIONARY)?;
		}
		wt.commit()?;

		let rt = db.begin_read()?;
		let mut dict_entries = Vec::new();
		{
			let table = rt.open_table(DICTIONARY)?;
			for entry in table.iter()? {
				let (id, name) = entry?;
				dict_entries.push((name.value().to_string(), id.value()));
			}
		}
		let mut descriptors = HashMap::new();
		{
			let table = rt.open_table(META)?;
			for entry in table.iter()? {
				let (name, raw) = entry?;
				let desc: CollectionDescriptor = postcard::from_bytes(raw.value())
					.map_err(|e| EngineError::Storage(format!("corrupt descriptor: {e}")))?;
				descriptors.insert(name.value().to_string(), desc);
			}
		}
		drop(rt);

		info!(collections = descriptors.len(), fields = dict_entries.len(), "engine opened");
		Ok(Self {
			id,
			path,
			db,
			dictionary: Arc::new(FieldDictionary::restore(dict_entries)),
			descriptors: RwLock::new(descriptors),
			changes: ChangeHub::default(),
		})
	}

	pub fn database_id(&self) -> &str {
		&self.id
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn dictionary(&self) -> &Arc<FieldDictionary> {
		&self.dictionary
	}

	/// Registers field names (metadata surface) and persists any fresh
	/// assignments immediately.
	pub fn register_fields<I, S>(&self, names: I) -> Result<HashMap<String, u32>>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let outcome = self.dictionary.register(names);
		if !outcome.newly_assigned.is_empty() {
			let wt = self.db.begin_write()?;
			{
				let mut table = wt.open_table(DICTIONARY)?;
				for (name, id) in &outcome.newly_assigned {
					table.insert(*id, name.as_str())?;
				}
			}
			wt.commit()?;
		}
		Ok(outcome.requested)
	}

	// --- collections ---------------------------------------------------

	pub fn list_collections(&self) -> Vec<String> {
		let mut names: Vec<String> = self.descriptors.read().keys().cloned().collect();
		names.sort();
		names
	}

	pub fn has_collection(&self, name: &str) -> bool {
		self.descriptors.read().contains_key(name)
	}

	pub fn descriptor(&self, name: &str) -> Option<CollectionDescriptor> {
		self.descriptors.read().get(name).cloned()
	}

	#[instrument(skip(self))]
	pub fn create_collection(&self, name: &str) -> Result<()> {
		validate_collection_name(name)?;
		if self.has_collection(name) {
			return Err(EngineError::CollectionExists(name.to_string()));
		}
		let desc = CollectionDescriptor::new(name);
		let wt = self.db.begin_write()?;
		{
			let data_name = data_table_name(name);
			let _ = wt.open_table(TableDefinition::<&[u8], &[u8]>::new(&data_name))?;
			persist_descriptor(&wt, &desc)?;
		}
		wt.commit()?;
		self.descriptors.write().insert(name.to_string(), desc);
		Ok(())
	}

	#[instrument(skip(self))]
	pub fn drop_collection(&self, name: &str) -> Result<bool> {
		let Some(desc) = self.descriptor(name) else {
			return Ok(false);
		};
		let wt = self.db.begin_write()?;
		{
			let data_name = data_table_name(name);
			let _ = wt.delete_table(TableDefinition::<&[u8], &[u8]>::new(&data_name))?;
			for index in &desc.indexes {
				let index_name = index_table_name(name, &index.name);
				let _ = wt.delete_table(TableDefinition::<&[u8], &[u8]>::new(&index_name))?;
			}
			let mut meta = wt.open_table(META)?;
			meta.remove(name)?;
		}
		wt.commit()?;
		self.descriptors.write().remove(name);
		self.changes.drop_collection(name);
		Ok(true)
	}

	// --- descriptor mutations ------------------------------------------

	#[instrument(skip(self, index))]
	pub fn create_index(&self, collection: &str, index: IndexDescriptor) -> Result<()> {
		let mut desc = self
			.descriptor(collection)
			.ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
		if desc.index(&index.name).is_some() {
			return Err(EngineError::IndexExists(index.name.clone(), collection.to_string()));
		}

		let wt = self.db.begin_write()?;
		{
			if index.kind == IndexKind::Btree {
				self.build_btree_index(&wt, collection, &index)?;
			}
			desc.indexes.push(index);
			persist_descriptor(&wt, &desc)?;
		}
		wt.commit()?;
		self.descriptors.write().insert(collection.to_string(), desc);
		Ok(())
	}

	#[instrument(skip(self))]
	pub fn drop_index(&self, collection: &str, index_name: &str) -> Result<()> {
		let mut desc = self
			.descriptor(collection)
			.ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
		let position = desc
			.indexes
			.iter()
			.position(|ix| ix.name == index_name)
			.ok_or_else(|| EngineError::IndexNotFound(index_name.to_string(), collection.to_string()))?;
		let removed = desc.indexes.remove(position);

		let wt = self.db.begin_write()?;
		{
			if removed.kind == IndexKind::Btree {
				let table_name = index_table_name(collection, index_name);
				let _ = wt.delete_table(TableDefinition::<&[u8], &[u8]>::new(&table_name))?;
			}
			persist_descriptor(&wt, &desc)?;
		}
		wt.commit()?;
		self.descriptors.write().insert(collection.to_string(), desc);
		Ok(())
	}

	/// Appends a schema version. History is append-only.
	pub fn set_schema(&self, collection: &str, fields: Vec<SchemaField>) -> Result<SchemaVersion> {
		self.update_descriptor(collection, |desc| {
			let version = SchemaVersion { version: desc.schema.len() as u32 + 1, fields };
			desc.schema.push(version.clone());
			Ok(version)
		})
	}

	pub fn set_time_series(&self, collection: &str, config: Option<TimeSeriesConfig>) -> Result<()> {
		self.update_descriptor(collection, |desc| {
			desc.time_series = config;
			Ok(())
		})
	}

	pub fn set_vector_source(&self, collection: &str, config: Option<VectorSourceConfig>) -> Result<()> {
		self.update_descriptor(collection, |desc| {
			desc.vector_source = config;
			Ok(())
		})
	}

	fn update_descriptor<R>(
		&self,
		collection: &str,
		f: impl FnOnce(&mut CollectionDescriptor) -> Result<R>,
	) -> Result<R> {
		let mut desc = self
			.descriptor(collection)
			.ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
		let result = f(&mut desc)?;
		let wt = self.db.begin_write()?;
		persist_descriptor(&wt, &desc)?;
		wt.commit()?;
		self.descriptors.write().insert(collection.to_string(), desc);
		Ok(result)
	}

	// --- documents -----------------------------------------------------

	/// Inserts a document, assigning an object id when the document has
	/// none. The collection is created implicitly on first write.
	pub fn insert(&self, collection: &str, mut doc: Document, txn: Option<&EngineTxn>) -> Result<DocId> {
		validate_collection_name(collection)?;
		let id = match doc.id() {
			Some(id) => id,
			None => {
				let id = DocId::generate();
				doc.set_id(&id);
				id
			}
		};
		self.ensure_collection(collection, txn)?;
		let desc = self.descriptor(collection).expect("collection ensured above");

		self.with_write(txn, |wt, events| {
			let (bytes, newly) = register_and_encode(&doc, &self.dictionary)?;
			persist_dictionary(wt, &newly)?;

			let key = id.to_bytes();
			let data_name = data_table_name(collection);
			{
				let mut table = wt.open_table(TableDefinition::<&[u8], &[u8]>::new(&data_name))?;
				if table.get(key.as_slice())?.is_some() {
					return Err(EngineError::UniqueViolation {
						collection: collection.to_string(),
						index: "_id".to_string(),
					});
				}
				table.insert(key.as_slice(), bytes.as_slice())?;
			}
			self.index_document(wt, collection, &desc, &id, None, Some(&doc))?;
			self.prune_expired(wt, collection, &desc)?;
			events.push((collection.to_string(), ChangeEvent { op: ChangeOp::Insert, id: id.clone() }));
			Ok(())
		})?;
		Ok(id)
	}

	pub fn insert_many(
		&self,
		collection: &str,
		docs: Vec<Document>,
		txn: Option<&EngineTxn>,
	) -> Result<Vec<DocId>> {
		let mut ids = Vec::with_capacity(docs.len());
		for doc in docs {
			ids.push(self.insert(collection, doc, txn)?);
		}
		Ok(ids)
	}

	/// Replaces the document with the same `_id`. Returns false when the
	/// document does not exist.
	pub fn update(&self, collection: &str, doc: Document, txn: Option<&EngineTxn>) -> Result<bool> {
		let id = doc.id().ok_or(EngineError::MissingId)?;
		let Some(desc) = self.descriptor(collection) else {
			return Ok(false);
		};

		self.with_write(txn, |wt, events| {
			let key = id.to_bytes();
			let data_name = data_table_name(collection);
			let old_bytes = {
				let table = wt.open_table(TableDefinition::<&[u8], &[u8]>::new(&data_name))?;
				table.get(key.as_slice())?.map(|guard| guard.value().to_vec())
			};
			let Some(old_bytes) = old_bytes else {
				return Ok(false);
			};
			let old_doc = decode(&old_bytes, &self.dictionary)?;

			let (bytes, newly) = register_and_encode(&doc, &self.dictionary)?;
			persist_dictionary(wt, &newly)?;
			{
				let mut table = wt.open_table(TableDefinition::<&[u8], &[u8]>::new(&data_name))?;
				table.insert(key.as_slice(), bytes.as_slice())?;
			}
			self.index_document(wt, collection, &desc, &id, Some(&old_doc), Some(&doc))?;
			self.prune_expired(wt, collection, &desc)?;
			events.push((collection.to_string(), ChangeEvent { op: ChangeOp::Update, id: id.clone() }));
			Ok(true)
		})
	}

	pub fn delete(&self, collection: &str, id: &DocId, txn: Option<&EngineTxn>) -> Result<bool> {
		let Some(desc) = self.descriptor(collection) else {
			return Ok(false);
		};
		self.with_write(txn, |wt, events| {
			let key = id.to_bytes();
			let data_name = data_table_name(collection);
			let old_bytes = {
				let mut table = wt.open_table(TableDefinition::<&[u8], &[u8]>::new(&data_name))?;
				table.remove(key.as_slice())?.map(|guard| guard.value().to_vec())
			};
			let Some(old_bytes) = old_bytes else {
				return Ok(false);
			};
			let old_doc = decode(&old_bytes, &self.dictionary)?;
			self.index_document(wt, collection, &desc, id, Some(&old_doc), None)?;
			events.push((collection.to_string(), ChangeEvent { op: ChangeOp::Delete, id: id.clone() }));
			Ok(true)
		})
	}

	pub fn find(&self, collection: &str, id: &DocId) -> Result<Option<Vec<u8>>> {
		if !self.has_collection(collection) {
			return Ok(None);
		}
		let rt = self.db.begin_read()?;
		let data_name = data_table_name(collection);
		let table = match rt.open_table(TableDefinition::<&[u8], &[u8]>::new(&data_name)) {
			Ok(table) => table,
			Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		Ok(table.get(id.to_bytes().as_slice())?.map(|guard| guard.value().to_vec()))
	}

	pub fn find_decoded(&self, collection: &str, id: &DocId) -> Result<Option<Document>> {
		match self.find(collection, id)? {
			Some(bytes) => Ok(Some(decode(&bytes, &self.dictionary)?)),
			None => Ok(None),
		}
	}

	pub fn count(&self, collection: &str) -> Result<u64> {
		if !self.has_collection(collection) {
			return Ok(0);
		}
		let rt = self.db.begin_read()?;
		let data_name = data_table_name(collection);
		match rt.open_table(TableDefinition::<&[u8], &[u8]>::new(&data_name)) {
			Ok(table) => Ok(table.len()?),
			Err(redb::TableError::TableDoesNotExist(_)) => Ok(0),
			Err(e) => Err(e.into()),
		}
	}

	/// Iterates the collection in id order, pulling one document at a
	/// time. The callback returns false to stop early.
	pub fn for_each(
		&self,
		collection: &str,
		f: &mut dyn FnMut(DocId, &[u8]) -> bool,
	) -> Result<()> {
		if !self.has_collection(collection) {
			return Ok(());
		}
		let rt = self.db.begin_read()?;
		let data_name = data_table_name(collection);
		let table = match rt.open_table(TableDefinition::<&[u8], &[u8]>::new(&data_name)) {
			Ok(table) => table,
			Err(redb::TableError::TableDoesNotExist(_)) => return Ok(()),
			Err(e) => return Err(e.into()),
		};
		for entry in table.iter()? {
			let (key, value) = entry?;
			let id = DocId::from_bytes(key.value())?;
			if !f(id, value.value()) {
				break;
			}
		}
		Ok(())
	}

	pub fn scan_all(&self, collection: &str) -> Result<Vec<(DocId, Vec<u8>)>> {
		let mut out = Vec::new();
		self.for_each(collection, &mut |id, bytes| {
			out.push((id, bytes.to_vec()));
			true
		})?;
		Ok(out)
	}

	/// Equality lookup through a b-tree index. `Ok(None)` means no usable
	/// index covers the field or the value kind is not indexable; the
	/// caller falls back to a scan.
	pub fn index_lookup(&self, collection: &str, field: &str, value: &Value) -> Result<Option<Vec<DocId>>> {
		let Some(desc) = self.descriptor(collection) else {
			return Ok(Some(Vec::new()));
		};
		let Some(index) = desc.btree_index_on(field) else {
			return Ok(None);
		};
		let Some(value_bytes) = index_value_bytes(value) else {
			return Ok(None);
		};

		let rt = self.db.begin_read()?;
		let table_name = index_table_name(collection, &index.name);
		let table = match rt.open_table(TableDefinition::<&[u8], &[u8]>::new(&table_name)) {
			Ok(table) => table,
			Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Some(Vec::new())),
			Err(e) => return Err(e.into()),
		};

		let prefix = index_key_prefix(&value_bytes);
		let mut ids = Vec::new();
		let range = match upper_bound(&prefix) {
			Some(hi) => table.range::<&[u8]>(prefix.as_slice()..hi.as_slice())?,
			None => table.range::<&[u8]>(prefix.as_slice()..)?,
		};
		for entry in range {
			let (key, value) = entry?;
			if !key.value().starts_with(&prefix) {
				break;
			}
			ids.push(DocId::from_bytes(value.value())?);
		}
		Ok(Some(ids))
	}

	/// Exact nearest-neighbour search over the collection's vector index.
	pub fn vector_search(
		&self,
		collection: &str,
		index_name: Option<&str>,
		query: &[f32],
		k: usize,
	) -> Result<Vec<VectorHit>> {
		let desc = self
			.descriptor(collection)
			.ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
		let index = desc
			.vector_index(index_name)
			.ok_or_else(|| EngineError::NoVectorIndex(collection.to_string()))?
			.clone();
		let metric = index.metric.unwrap_or(DistanceMetric::Cosine);

		let mut hits: Vec<VectorHit> = Vec::new();
		let field = index.field.clone();
		let dictionary = Arc::clone(&self.dictionary);
		self.for_each(collection, &mut |id, bytes| {
			let Ok(doc) = decode(bytes, &dictionary) else {
				warn!(collection, %id, "skipping undecodable document in vector scan");
				return true;
			};
			let Some(vector) = doc.get_path(&field).and_then(Value::as_vector) else {
				return true;
			};
			if vector.len() != query.len() {
				return true;
			}
			let score = match metric {
				DistanceMetric::Cosine => cosine_similarity(query, &vector),
				DistanceMetric::Dot => dot_product(query, &vector),
				DistanceMetric::L2 => -l2_distance(query, &vector),
			};
			hits.push(VectorHit { id, score, bytes: bytes.to_vec() });
			true
		})?;

		hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
		hits.truncate(k);
		// L2 scores were negated for the shared best-first sort.
		if metric == DistanceMetric::L2 {
			for hit in &mut hits {
				hit.score = -hit.score;
			}
		}
		Ok(hits)
	}

	// --- transactions --------------------------------------------------

	/// Opens an explicit transaction. Blocks while another writer (an
	/// ad-hoc write or another explicit transaction) holds the file.
	pub fn begin(&self) -> Result<EngineTxn> {
		Ok(EngineTxn::new(self.db.begin_write()?))
	}

	#[instrument(skip(self, txn))]
	pub fn commit(&self, txn: &EngineTxn) -> Result<()> {
		let wt = txn.take()?;
		wt.commit()?;
		for (collection, event) in txn.pending_events.lock().drain(..) {
			self.changes.publish(&collection, event);
		}
		Ok(())
	}

	#[instrument(skip(self, txn))]
	pub fn rollback(&self, txn: &EngineTxn) -> Result<()> {
		let wt = txn.take()?;
		wt.abort()?;
		// Collections implicitly created inside the transaction must not
		// survive its rollback; re-sync the cached descriptors.
		self.reload_descriptors()?;
		Ok(())
	}

	// --- change capture ------------------------------------------------

	pub fn subscribe(&self, collection: &str) -> tokio::sync::broadcast::Receiver<ChangeEvent> {
		self.changes.subscribe(collection)
	}

	// --- backup --------------------------------------------------------

	/// Copies the database file to `target`. Holding the writer for the
	/// duration keeps the copy consistent with the last commit.
	#[instrument(skip(self, target), fields(target = %target.as_ref().display()))]
	pub fn backup_to(&self, target: impl AsRef<Path>) -> Result<u64> {
		let wt = self.db.begin_write()?;
		let copied = std::fs::copy(&self.path, target.as_ref())
			.map_err(|e| EngineError::Storage(format!("backup copy failed: {e}")))?;
		wt.abort()?;
		debug!(bytes = copied, "backup written");
		Ok(copied)
	}

	// --- internals -----------------------------------------------------

	fn ensure_collection(&self, name: &str, txn: Option<&EngineTxn>) -> Result<()> {
		if self.has_collection(name) {
			return Ok(());
		}
		let desc = CollectionDescriptor::new(name);
		self.with_write(txn, |wt, _| {
			persist_descriptor(wt, &desc)?;
			Ok(())
		})?;
		self.descriptors.write().insert(name.to_string(), desc);
		Ok(())
	}

	/// Runs `f` against either the session's open transaction or a fresh
	/// ad-hoc one. Ad-hoc commits publish the recorded change events;
	/// session writes buffer them until the session commits.
	fn with_write<R>(
		&self,
		txn: Option<&EngineTxn>,
		f: impl FnOnce(&WriteTransaction, &mut Vec<(String, ChangeEvent)>) -> Result<R>,
	) -> Result<R> {
		let mut events = Vec::new();
		match txn {
			Some(session) => {
				let guard = session.inner.lock();
				let wt = guard
					.as_ref()
					.ok_or_else(|| EngineError::Storage("transaction already completed".to_string()))?;
				let result = f(wt, &mut events)?;
				drop(guard);
				for (collection, event) in events {
					session.record(&collection, event);
				}
				Ok(result)
			}
			None => {
				let wt = self.db.begin_write()?;
				match f(&wt, &mut events) {
					Ok(result) => {
						wt.commit()?;
						for (collection, event) in events {
							self.changes.publish(&collection, event);
						}
						Ok(result)
					}
					Err(e) => {
						let _ = wt.abort();
						Err(e)
					}
				}
			}
		}
	}

	fn reload_descriptors(&self) -> Result<()> {
		let rt = self.db.begin_read()?;
		let table = rt.open_table(META)?;
		let mut fresh = HashMap::new();
		for entry in table.iter()? {
			let (name, raw) = entry?;
			let desc: CollectionDescriptor = postcard::from_bytes(raw.value())
				.map_err(|e| EngineError::Storage(format!("corrupt descriptor: {e}")))?;
			fresh.insert(name.value().to_string(), desc);
		}
		*self.descriptors.write() = fresh;
		Ok(())
	}

	/// Maintains b-tree index entries for one document transition.
	fn index_document(
		&self,
		wt: &WriteTransaction,
		collection: &str,
		desc: &CollectionDescriptor,
		id: &DocId,
		old: Option<&Document>,
		new: Option<&Document>,
	) -> Result<()> {
		let id_bytes = id.to_bytes();
		for index in desc.indexes.iter().filter(|ix| ix.kind == IndexKind::Btree) {
			let table_name = index_table_name(collection, &index.name);
			let mut table = wt.open_table(TableDefinition::<&[u8], &[u8]>::new(&table_name))?;

			if let Some(old_value) = old.and_then(|doc| doc.get_path(&index.field)) {
				if let Some(value_bytes) = index_value_bytes(old_value) {
					let key = index_entry_key(&value_bytes, &id_bytes);
					table.remove(key.as_slice())?;
				}
			}
			if let Some(new_value) = new.and_then(|doc| doc.get_path(&index.field)) {
				if let Some(value_bytes) = index_value_bytes(new_value) {
					if index.unique {
						let prefix = index_key_prefix(&value_bytes);
						let range = match upper_bound(&prefix) {
							Some(hi) => table.range::<&[u8]>(prefix.as_slice()..hi.as_slice())?,
							None => table.range::<&[u8]>(prefix.as_slice()..)?,
						};
						for entry in range {
							let (key, existing) = entry?;
							if !key.value().starts_with(&prefix) {
								break;
							}
							if existing.value() != id_bytes.as_slice() {
								return Err(EngineError::UniqueViolation {
									collection: collection.to_string(),
									index: index.name.clone(),
								});
							}
						}
					}
					let key = index_entry_key(&value_bytes, &id_bytes);
					table.insert(key.as_slice(), id_bytes.as_slice())?;
				}
			}
		}
		Ok(())
	}

	/// Builds a fresh b-tree index over the existing documents.
	fn build_btree_index(&self, wt: &WriteTransaction, collection: &str, index: &IndexDescriptor) -> Result<()> {
		let data_name = data_table_name(collection);
		let entries: Vec<(Vec<u8>, Vec<u8>)> = {
			let data = match wt.open_table(TableDefinition::<&[u8], &[u8]>::new(&data_name)) {
				Ok(table) => table,
				Err(redb::TableError::TableDoesNotExist(_)) => return Ok(()),
				Err(e) => return Err(e.into()),
			};
			let mut entries = Vec::new();
			for entry in data.iter()? {
				let (key, value) = entry?;
				let doc = decode(value.value(), &self.dictionary)?;
				if let Some(field_value) = doc.get_path(&index.field) {
					if let Some(value_bytes) = index_value_bytes(field_value) {
						entries.push((value_bytes, key.value().to_vec()));
					}
				}
			}
			entries
		};

		let table_name = index_table_name(collection, &index.name);
		let mut table = wt.open_table(TableDefinition::<&[u8], &[u8]>::new(&table_name))?;
		let mut last_unique: Option<Vec<u8>> = None;
		let mut sorted = entries;
		sorted.sort();
		for (value_bytes, id_bytes) in sorted {
			if index.unique {
				if last_unique.as_deref() == Some(value_bytes.as_slice()) {
					return Err(EngineError::UniqueViolation {
						collection: collection.to_string(),
						index: index.name.clone(),
					});
				}
				last_unique = Some(value_bytes.clone());
			}
			let key = index_entry_key(&value_bytes, &id_bytes);
			table.insert(key.as_slice(), id_bytes.as_slice())?;
		}
		Ok(())
	}

	/// Best-effort TTL pruning for time-series collections, run inside the
	/// mutating transaction.
	fn prune_expired(&self, wt: &WriteTransaction, collection: &str, desc: &CollectionDescriptor) -> Result<()> {
		let Some(ts) = &desc.time_series else {
			return Ok(());
		};
		let cutoff = Timestamp::now().millis() - (ts.retention_seconds as i64) * 1000;
		let data_name = data_table_name(collection);

		let expired: Vec<(Vec<u8>, Document)> = {
			let table = wt.open_table(TableDefinition::<&[u8], &[u8]>::new(&data_name))?;
			let mut expired = Vec::new();
			for entry in table.iter()? {
				let (key, value) = entry?;
				let doc = decode(value.value(), &self.dictionary)?;
				let is_expired = matches!(
					doc.get_path(&ts.ttl_field),
					Some(Value::Timestamp(stamp)) if stamp.millis() < cutoff
				);
				if is_expired {
					expired.push((key.value().to_vec(), doc));
					if expired.len() >= TTL_PRUNE_LIMIT {
						break;
					}
				}
			}
			expired
		};

		if expired.is_empty() {
			return Ok(());
		}
		debug!(collection, count = expired.len(), "pruning expired time-series documents");
		{
			let mut table = wt.open_table(TableDefinition::<&[u8], &[u8]>::new(&data_name))?;
			for (key, _) in &expired {
				table.remove(key.as_slice())?;
			}
		}
		for (key, doc) in &expired {
			let id = DocId::from_bytes(key)?;
			self.index_document(wt, collection, desc, &id, Some(doc), None)?;
		}
		Ok(())
	}
}

fn data_table_name(collection: &str) -> String {
	format!("d:{collection}")
}

fn index_table_name(collection: &str, index: &str) -> String {
	format!("i:{collection}:{index}")
}

fn persist_descriptor(wt: &WriteTransaction, desc: &CollectionDescriptor) -> Result<()> {
	let raw = postcard::to_allocvec(desc).map_err(|e| EngineError::Storage(e.to_string()))?;
	let mut table = wt.open_table(META)?;
	table.insert(desc.name.as_str(), raw.as_slice())?;
	Ok(())
}

fn persist_dictionary(wt: &WriteTransaction, newly: &[(String, u32)]) -> Result<()> {
	if newly.is_empty() {
		return Ok(());
	}
	let mut table = wt.open_table(DICTIONARY)?;
	for (name, id) in newly {
		table.insert(*id, name.as_str())?;
	}
	Ok(())
}

/// Index entry key: `u32 BE` value length, the value bytes, then the
/// document-id bytes. The length prefix makes the value part an
/// unambiguous range prefix.
fn index_entry_key(value_bytes: &[u8], id_bytes: &[u8]) -> Vec<u8> {
	let mut key = index_key_prefix(value_bytes);
	key.extend_from_slice(id_bytes);
	key
}

fn index_key_prefix(value_bytes: &[u8]) -> Vec<u8> {
	let mut key = Vec::with_capacity(4 + value_bytes.len());
	key.extend_from_slice(&(value_bytes.len() as u32).to_be_bytes());
	key.extend_from_slice(value_bytes);
	key
}

/// Smallest byte string strictly greater than every string with this
/// prefix, or None when the prefix is all 0xFF.
fn upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
	let mut hi = prefix.to_vec();
	while let Some(last) = hi.last_mut() {
		if *last < 0xFF {
			*last += 1;
			return Some(hi);
		}
		hi.pop();
	}
	None
}

/// Canonical equality-key bytes for an indexable scalar. Numerics that
/// represent the same number map to the same key regardless of their
/// stored kind; decimals keep their own tag and only match decimals.
pub(crate) fn index_value_bytes(value: &Value) -> Option<Vec<u8>> {
	fn exact_i64(value: &Value) -> Option<i64> {
		match value {
			Value::Int32(v) => Some(*v as i64),
			Value::Int64(v) => Some(*v),
			Value::Float64(v) if v.fract() == 0.0 && v.abs() < (1i64 << 53) as f64 => Some(*v as i64),
			_ => None,
		}
	}

	let mut out = Vec::new();
	match value {
		Value::Null => out.push(0x00),
		Value::Bool(v) => {
			out.push(0x05);
			out.push(*v as u8);
		}
		Value::Int32(_) | Value::Int64(_) | Value::Float64(_) => match exact_i64(value) {
			Some(v) => {
				out.push(0x01);
				let mut bytes = v.to_be_bytes();
				bytes[0] ^= 1 << 7;
				out.extend_from_slice(&bytes);
			}
			None => {
				let v = value.to_f64().expect("numeric kinds convert");
				out.push(0x02);
				out.extend_from_slice(&v.to_be_bytes());
			}
		},
		Value::Decimal(d) => {
			out.push(0x03);
			out.extend_from_slice(d.normalized().to_string().as_bytes());
		}
		Value::String(s) => {
			out.push(0x04);
			out.extend_from_slice(s.as_bytes());
		}
		Value::Timestamp(t) => {
			out.push(0x06);
			let mut bytes = t.0.to_be_bytes();
			bytes[0] ^= 1 << 7;
			out.extend_from_slice(&bytes);
		}
		Value::Uuid(u) => {
			out.push(0x07);
			out.extend_from_slice(u.as_bytes());
		}
		Value::ObjectId(oid) => {
			out.push(0x08);
			out.extend_from_slice(&oid.0);
		}
		Value::Bytes(_) | Value::Array(_) | Value::Document(_) => return None,
	}
	Some(out)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
	let dot = dot_product(a, b);
	let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
	let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
	if norm_a == 0.0 || norm_b == 0.0 { 0.0 } else { dot / (norm_a * norm_b) }
}

fn dot_product(a: &[f32], b: &[f32]) -> f64 {
	a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
}

fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
	a.iter().zip(b).map(|(x, y)| ((*x - *y) as f64).powi(2)).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn index_value_bytes_unifies_numeric_kinds() {
		let a = index_value_bytes(&Value::Int32(3)).unwrap();
		let b = index_value_bytes(&Value::Int64(3)).unwrap();
		let c = index_value_bytes(&Value::Float64(3.0)).unwrap();
		assert_eq!(a, b);
		assert_eq!(b, c);
		assert_ne!(a, index_value_bytes(&Value::Float64(3.5)).unwrap());
	}

	#[test]
	fn upper_bound_handles_carry() {
		assert_eq!(upper_bound(&[1, 2, 3]), Some(vec![1, 2, 4]));
		assert_eq!(upper_bound(&[1, 0xFF]), Some(vec![2]));
		assert_eq!(upper_bound(&[0xFF, 0xFF]), None);
	}

	#[test]
	fn unindexable_values_are_skipped() {
		assert!(index_value_bytes(&Value::Array(vec![])).is_none());
		assert!(index_value_bytes(&Value::Bytes(vec![1])).is_none());
	}
}
