// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

use parking_lot::Mutex;
use redb::WriteTransaction;

use crate::change::ChangeEvent;
use crate::{EngineError, Result};

/// An explicit engine transaction.
///
/// Holds the single redb writer until committed or rolled back; the
/// transaction coordinator guarantees at most one of these per database.
/// Change events raised by writes inside the transaction are buffered and
/// only published at commit.
pub struct EngineTxn {
	pub(crate) inner: Mutex<Option<WriteTransaction>>,
	pub(crate) pending_events: Mutex<Vec<(String, ChangeEvent)>>,
}

impl EngineTxn {
	pub(crate) fn new(txn: WriteTransaction) -> Self {
		Self { inner: Mutex::new(Some(txn)), pending_events: Mutex::new(Vec::new()) }
	}

	pub(crate) fn record(&self, collection: &str, event: ChangeEvent) {
		self.pending_events.lock().push((collection.to_string(), event));
	}

	pub(crate) fn take(&self) -> Result<WriteTransaction> {
		self.inner
			.lock()
			.take()
			.ok_or_else(|| EngineError::Storage("transaction already completed".to_string()))
	}
}

impl std::fmt::Debug for EngineTxn {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EngineTxn")
			.field("open", &self.inner.lock().is_some())
			.field("pending_events", &self.pending_events.lock().len())
			.finish()
	}
}
