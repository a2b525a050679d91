// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Descriptor execution against an engine.
//!
//! The executor validates first, then streams matches through a bounded
//! channel: the blocking side pulls one document at a time from the
//! engine, so an unsorted query never materialises the collection, and a
//! dropped stream cancels the scan at the next send. Sorted queries
//! materialise the match set, order it deterministically, then page.
//!
//! Push-down: when the filter (or one conjunct of a top-level `All`) is
//! an equality on a b-tree-indexed field, candidates come from the index
//! instead of a scan; the full filter still runs over each candidate.

use std::cmp::Ordering;
use std::sync::Arc;

use blite_codec::encode;
use blite_core::value::{DocId, Document, Value};
use blite_engine::Engine;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{CompareOp, FilterNode, FilterValue, QueryDescriptor, SortKey, filter};

/// Channel depth between the engine-side producer and the stream.
const STREAM_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
	pub id: DocId,
	/// The document in its framed encoding; narrowed when the descriptor
	/// carries a projection.
	pub bytes: Vec<u8>,
}

/// Lazy, cancellable sequence of matches. Dropping the stream stops the
/// producing scan at its next emission.
#[derive(Debug)]
pub struct DocumentStream {
	rx: mpsc::Receiver<Result<QueryHit, blite_core::Error>>,
}

impl DocumentStream {
	pub async fn next(&mut self) -> Option<Result<QueryHit, blite_core::Error>> {
		self.rx.recv().await
	}

	/// Drains the stream into a vector; used by the cache materialisation
	/// path and by tests.
	pub async fn collect_hits(mut self) -> Result<Vec<QueryHit>, blite_core::Error> {
		let mut hits = Vec::new();
		while let Some(item) = self.next().await {
			hits.push(item?);
		}
		Ok(hits)
	}
}

/// Validates the descriptor and begins streaming matches.
pub fn execute(engine: Arc<Engine>, descriptor: QueryDescriptor) -> Result<DocumentStream, blite_core::Error> {
	descriptor.validate().map_err(blite_core::Error::from)?;
	let (tx, rx) = mpsc::channel(STREAM_DEPTH);
	tokio::task::spawn_blocking(move || {
		if let Err(err) = run_blocking(&engine, &descriptor, &tx) {
			// The receiver may already be gone; that is cancellation.
			let _ = tx.blocking_send(Err(err));
		}
	});
	Ok(DocumentStream { rx })
}

fn run_blocking(
	engine: &Engine,
	descriptor: &QueryDescriptor,
	tx: &mpsc::Sender<Result<QueryHit, blite_core::Error>>,
) -> Result<(), blite_core::Error> {
	let dictionary = Arc::clone(engine.dictionary());
	let decode = |bytes: &[u8]| -> Result<Document, blite_core::Error> {
		blite_codec::decode(bytes, &dictionary).map_err(blite_core::Error::from)
	};
	let keep = |doc: &Document| descriptor.filter.as_ref().is_none_or(|f| filter::matches(f, doc));

	let candidates = index_candidates(engine, descriptor)?;

	if descriptor.order_by.is_empty() {
		let skip = descriptor.effective_skip();
		let take = descriptor.effective_take();
		let mut skipped = 0usize;
		let mut emitted = 0usize;
		let mut emit = |id: DocId, doc: Document, bytes: &[u8]| -> Result<bool, blite_core::Error> {
			if take == Some(0) {
				return Ok(false);
			}
			if skipped < skip {
				skipped += 1;
				return Ok(true);
			}
			let hit = materialise(descriptor, &dictionary, id, doc, bytes)?;
			if tx.blocking_send(Ok(hit)).is_err() {
				return Ok(false); // cancelled
			}
			emitted += 1;
			Ok(take.is_none_or(|t| emitted < t))
		};

		match candidates {
			Some(ids) => {
				for id in ids {
					let Some(bytes) = engine.find(&descriptor.collection, &id)? else {
						continue;
					};
					let doc = decode(&bytes)?;
					if keep(&doc) && !emit(id, doc, &bytes)? {
						break;
					}
				}
			}
			None => {
				let mut failure: Option<blite_core::Error> = None;
				engine.for_each(&descriptor.collection, &mut |id, bytes| {
					let doc = match decode(bytes) {
						Ok(doc) => doc,
						Err(err) => {
							failure = Some(err);
							return false;
						}
					};
					if !keep(&doc) {
						return true;
					}
					match emit(id, doc, bytes) {
						Ok(proceed) => proceed,
						Err(err) => {
							failure = Some(err);
							false
						}
					}
				})?;
				if let Some(err) = failure {
					return Err(err);
				}
			}
		}
		return Ok(());
	}

	// Sorted path: materialise matches, order, then page.
	let mut matched: Vec<(DocId, Document, Vec<u8>)> = Vec::new();
	match candidates {
		Some(ids) => {
			for id in ids {
				let Some(bytes) = engine.find(&descriptor.collection, &id)? else {
					continue;
				};
				let doc = decode(&bytes)?;
				if keep(&doc) {
					matched.push((id, doc, bytes));
				}
			}
		}
		None => {
			let mut failure: Option<blite_core::Error> = None;
			engine.for_each(&descriptor.collection, &mut |id, bytes| {
				match decode(bytes) {
					Ok(doc) => {
						if keep(&doc) {
							matched.push((id, doc, bytes.to_vec()));
						}
						true
					}
					Err(err) => {
						failure = Some(err);
						false
					}
				}
			})?;
			if let Some(err) = failure {
				return Err(err);
			}
		}
	}

	matched.sort_by(|a, b| compare_in_order(&descriptor.order_by, (&a.1, &a.0), (&b.1, &b.0)));
	let skip = descriptor.effective_skip().min(matched.len());
	let end = match descriptor.effective_take() {
		Some(take) => skip.saturating_add(take).min(matched.len()),
		None => matched.len(),
	};
	debug!(collection = %descriptor.collection, matched = matched.len(), window = end - skip, "sorted query window");
	for (id, doc, bytes) in matched.drain(..).skip(skip).take(end - skip) {
		let hit = materialise(descriptor, &dictionary, id, doc, &bytes)?;
		if tx.blocking_send(Ok(hit)).is_err() {
			break;
		}
	}
	Ok(())
}

/// Candidate ids from an equality push-down, or None when a scan is
/// required. The empty-id case still means "use the index" (no matches).
fn index_candidates(engine: &Engine, descriptor: &QueryDescriptor) -> Result<Option<Vec<DocId>>, blite_core::Error> {
	let Some(filter) = &descriptor.filter else {
		return Ok(None);
	};
	for (path, value) in eq_conjuncts(filter) {
		if let Some(ids) = engine.index_lookup(&descriptor.collection, path, value)? {
			debug!(collection = %descriptor.collection, field = path, candidates = ids.len(), "index push-down");
			return Ok(Some(ids));
		}
	}
	Ok(None)
}

fn eq_conjuncts(node: &FilterNode) -> Vec<(&str, &Value)> {
	match node {
		FilterNode::Compare { path, op: CompareOp::Eq, value: FilterValue::Scalar(scalar) } => {
			vec![(path.as_str(), scalar)]
		}
		FilterNode::All(children) => children.iter().flat_map(eq_conjuncts).collect(),
		_ => Vec::new(),
	}
}

fn materialise(
	descriptor: &QueryDescriptor,
	dictionary: &blite_codec::FieldDictionary,
	id: DocId,
	doc: Document,
	bytes: &[u8],
) -> Result<QueryHit, blite_core::Error> {
	match &descriptor.select {
		None => Ok(QueryHit { id, bytes: bytes.to_vec() }),
		Some(projection) => {
			let narrowed = project(&doc, &projection.fields);
			let bytes = encode(&narrowed, dictionary).map_err(blite_core::Error::from)?;
			Ok(QueryHit { id, bytes })
		}
	}
}

/// Narrows a document to the named fields, preserving dot paths.
pub fn project(doc: &Document, fields: &[String]) -> Document {
	let mut out = Document::new();
	for path in fields {
		if let Some(value) = doc.get_path(path) {
			// Paths were validated non-empty; set_path on a fresh document
			// cannot cross a non-document field.
			out.set_path(path, value.clone()).expect("projection into empty document");
		}
	}
	out
}

/// Deterministic ordering under a sort-key list: key comparisons first,
/// mutually incomparable kinds fall back to a fixed type rank, and the
/// canonical id bytes break remaining ties.
pub fn compare_in_order(order_by: &[SortKey], a: (&Document, &DocId), b: (&Document, &DocId)) -> Ordering {
	for key in order_by {
		let av = a.0.get_path(&key.field).unwrap_or(&Value::Null);
		let bv = b.0.get_path(&key.field).unwrap_or(&Value::Null);
		let ordering = av.compare(bv).unwrap_or_else(|| type_rank(av).cmp(&type_rank(bv)));
		let ordering = if key.descending { ordering.reverse() } else { ordering };
		if ordering != Ordering::Equal {
			return ordering;
		}
	}
	a.1.to_bytes().cmp(&b.1.to_bytes())
}

/// Sorts `(id, document)` pairs the way the executor sorts hits; shared
/// with the naive evaluator the equivalence tests run against.
pub fn sort_hits(items: &mut [(DocId, Document)], order_by: &[SortKey]) {
	items.sort_by(|a, b| compare_in_order(order_by, (&a.1, &a.0), (&b.1, &b.0)));
}

fn type_rank(value: &Value) -> u8 {
	match value {
		Value::Null => 0,
		Value::Bool(_) => 1,
		Value::Int32(_) | Value::Int64(_) | Value::Float64(_) | Value::Decimal(_) => 2,
		Value::String(_) => 3,
		Value::Timestamp(_) => 4,
		Value::Uuid(_) => 5,
		Value::ObjectId(_) => 6,
		Value::Bytes(_) => 7,
		Value::Array(_) => 8,
		Value::Document(_) => 9,
	}
}
