// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Per-collection change capture.
//!
//! Fanout is a bounded broadcast channel per collection: producers never
//! block, per-collection order is preserved, and a slow subscriber
//! observes a lag error instead of holding up writers.

use blite_core::value::DocId;
use dashmap::DashMap;
use tokio::sync::broadcast;

/// Capacity of each per-collection broadcast channel.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
	Insert,
	Update,
	Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
	pub op: ChangeOp,
	pub id: DocId,
}

#[derive(Debug, Default)]
pub(crate) struct ChangeHub {
	channels: DashMap<String, broadcast::Sender<ChangeEvent>>,
}

impl ChangeHub {
	pub(crate) fn subscribe(&self, collection: &str) -> broadcast::Receiver<ChangeEvent> {
		self.channels
			.entry(collection.to_string())
			.or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
			.subscribe()
	}

	pub(crate) fn publish(&self, collection: &str, event: ChangeEvent) {
		if let Some(sender) = self.channels.get(collection) {
			// No subscribers is fine; send only fails when nobody listens.
			let _ = sender.send(event);
		}
	}

	pub(crate) fn drop_collection(&self, collection: &str) {
		self.channels.remove(collection);
	}
}

#[cfg(test)]
mod tests {
	use blite_core::value::DocId;

	use super::*;

	#[tokio::test]
	async fn events_preserve_per_collection_order() {
		let hub = ChangeHub::default();
		let mut rx = hub.subscribe("orders");

		for i in 0..5 {
			hub.publish("orders", ChangeEvent { op: ChangeOp::Insert, id: DocId::Int32(i) });
		}
		hub.publish("other", ChangeEvent { op: ChangeOp::Delete, id: DocId::Int32(99) });

		for i in 0..5 {
			let event = rx.recv().await.unwrap();
			assert_eq!(event.id, DocId::Int32(i));
			assert_eq!(event.op, ChangeOp::Insert);
		}
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn detaching_one_subscriber_does_not_affect_others() {
		let hub = ChangeHub::default();
		let rx_dropped = hub.subscribe("orders");
		let mut rx_kept = hub.subscribe("orders");
		drop(rx_dropped);

		hub.publish("orders", ChangeEvent { op: ChangeOp::Update, id: DocId::Int32(1) });
		assert_eq!(rx_kept.recv().await.unwrap().id, DocId::Int32(1));
	}
}
