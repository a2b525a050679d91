// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

use blite_core::value::{DocId, Document, Timestamp, Value};
use blite_engine::{
	ChangeOp, DistanceMetric, Engine, EngineError, IndexDescriptor, IndexKind, TimeSeriesConfig,
};

fn open_engine(dir: &tempfile::TempDir) -> Engine {
	Engine::open("test", dir.path().join("test.blite")).unwrap()
}

fn doc(fields: &[(&str, Value)]) -> Document {
	let mut doc = Document::new();
	for (name, value) in fields {
		doc.insert(*name, value.clone());
	}
	doc
}

#[test]
fn crud_round_trip() {
	let dir = tempfile::tempdir().unwrap();
	let engine = open_engine(&dir);

	let id = engine
		.insert(
			"orders",
			doc(&[
				("name", Value::String("alice".into())),
				("value", Value::Int32(10)),
				("tag", Value::String("a".into())),
			]),
			None,
		)
		.unwrap();

	let found = engine.find_decoded("orders", &id).unwrap().unwrap();
	assert_eq!(found.get("name"), Some(&Value::String("alice".into())));
	assert_eq!(found.get("value"), Some(&Value::Int32(10)));
	assert_eq!(found.get("tag"), Some(&Value::String("a".into())));

	let mut updated = found.clone();
	updated.insert("name", Value::String("bob".into()));
	assert!(engine.update("orders", updated, None).unwrap());

	let found = engine.find_decoded("orders", &id).unwrap().unwrap();
	assert_eq!(found.get("name"), Some(&Value::String("bob".into())));
	assert_eq!(found.get("value"), Some(&Value::Int32(10)));
	assert_eq!(found.get("tag"), Some(&Value::String("a".into())));

	assert!(engine.delete("orders", &id, None).unwrap());
	assert!(engine.find("orders", &id).unwrap().is_none());
	assert!(!engine.delete("orders", &id, None).unwrap());
}

#[test]
fn insert_rejects_duplicate_id() {
	let dir = tempfile::tempdir().unwrap();
	let engine = open_engine(&dir);

	let mut first = doc(&[("x", Value::Int32(1))]);
	first.set_id(&DocId::Int32(7));
	engine.insert("orders", first.clone(), None).unwrap();
	let err = engine.insert("orders", first, None).unwrap_err();
	assert!(matches!(err, EngineError::UniqueViolation { .. }));
}

#[test]
fn documents_survive_reopen() {
	let dir = tempfile::tempdir().unwrap();
	let id = {
		let engine = open_engine(&dir);
		engine.insert("orders", doc(&[("name", Value::String("carol".into()))]), None).unwrap()
	};
	let engine = open_engine(&dir);
	let found = engine.find_decoded("orders", &id).unwrap().unwrap();
	assert_eq!(found.get("name"), Some(&Value::String("carol".into())));
	assert_eq!(engine.list_collections(), vec!["orders".to_string()]);
}

#[test]
fn rollback_hides_writes_and_commit_reveals_them() {
	let dir = tempfile::tempdir().unwrap();
	let engine = open_engine(&dir);

	// Rolled back insert is not visible.
	let txn = engine.begin().unwrap();
	let id = engine.insert("orders", doc(&[("key", Value::String("x".into()))]), Some(&txn)).unwrap();
	engine.rollback(&txn).unwrap();
	assert!(engine.find("orders", &id).unwrap().is_none());

	// Committed multi-collection writes are both visible.
	let txn = engine.begin().unwrap();
	let id1 = engine.insert("col1", doc(&[("a", Value::Int32(1))]), Some(&txn)).unwrap();
	let id2 = engine.insert("col2", doc(&[("b", Value::Int32(2))]), Some(&txn)).unwrap();
	engine.commit(&txn).unwrap();
	assert!(engine.find("col1", &id1).unwrap().is_some());
	assert!(engine.find("col2", &id2).unwrap().is_some());
}

#[test]
fn uncommitted_writes_are_invisible_to_readers() {
	let dir = tempfile::tempdir().unwrap();
	let engine = open_engine(&dir);
	let before = engine.insert("orders", doc(&[("n", Value::Int32(0))]), None).unwrap();

	let txn = engine.begin().unwrap();
	let staged = engine.insert("orders", doc(&[("n", Value::Int32(1))]), Some(&txn)).unwrap();

	// Reads outside the transaction see the last committed state.
	assert!(engine.find("orders", &before).unwrap().is_some());
	assert!(engine.find("orders", &staged).unwrap().is_none());
	assert_eq!(engine.count("orders").unwrap(), 1);

	engine.commit(&txn).unwrap();
	assert!(engine.find("orders", &staged).unwrap().is_some());
	assert_eq!(engine.count("orders").unwrap(), 2);
}

#[test]
fn btree_index_lookup_and_unique_enforcement() {
	let dir = tempfile::tempdir().unwrap();
	let engine = open_engine(&dir);

	for (name, score) in [("a", 10), ("b", 20), ("c", 20)] {
		engine
			.insert("players", doc(&[("name", Value::String(name.into())), ("score", Value::Int32(score))]), None)
			.unwrap();
	}

	engine
		.create_index(
			"players",
			IndexDescriptor {
				name: "ix_score".into(),
				field: "score".into(),
				kind: IndexKind::Btree,
				unique: false,
				dimensions: None,
				metric: None,
			},
		)
		.unwrap();

	let hits = engine.index_lookup("players", "score", &Value::Int32(20)).unwrap().unwrap();
	assert_eq!(hits.len(), 2);
	// Numeric kinds unify: an int64 probe matches int32-stored values.
	let hits = engine.index_lookup("players", "score", &Value::Int64(20)).unwrap().unwrap();
	assert_eq!(hits.len(), 2);
	// Unindexed field reports no usable index.
	assert!(engine.index_lookup("players", "name", &Value::String("a".into())).unwrap().is_none());

	// A unique index over duplicated values cannot be built.
	let err = engine
		.create_index(
			"players",
			IndexDescriptor {
				name: "ux_score".into(),
				field: "score".into(),
				kind: IndexKind::Btree,
				unique: true,
				dimensions: None,
				metric: None,
			},
		)
		.unwrap_err();
	assert!(matches!(err, EngineError::UniqueViolation { .. }));

	// A unique index on names holds, then rejects a duplicate insert.
	engine
		.create_index(
			"players",
			IndexDescriptor {
				name: "ux_name".into(),
				field: "name".into(),
				kind: IndexKind::Btree,
				unique: true,
				dimensions: None,
				metric: None,
			},
		)
		.unwrap();
	let err = engine
		.insert("players", doc(&[("name", Value::String("a".into())), ("score", Value::Int32(99))]), None)
		.unwrap_err();
	assert!(matches!(err, EngineError::UniqueViolation { .. }));
}

#[test]
fn index_entries_follow_updates_and_deletes() {
	let dir = tempfile::tempdir().unwrap();
	let engine = open_engine(&dir);
	engine.create_collection("items").unwrap();
	engine
		.create_index(
			"items",
			IndexDescriptor {
				name: "ix_tag".into(),
				field: "tag".into(),
				kind: IndexKind::Btree,
				unique: false,
				dimensions: None,
				metric: None,
			},
		)
		.unwrap();

	let id = engine.insert("items", doc(&[("tag", Value::String("old".into()))]), None).unwrap();
	assert_eq!(engine.index_lookup("items", "tag", &Value::String("old".into())).unwrap().unwrap(), vec![id.clone()]);

	let mut updated = doc(&[("tag", Value::String("new".into()))]);
	updated.set_id(&id);
	engine.update("items", updated, None).unwrap();
	assert!(engine.index_lookup("items", "tag", &Value::String("old".into())).unwrap().unwrap().is_empty());
	assert_eq!(engine.index_lookup("items", "tag", &Value::String("new".into())).unwrap().unwrap(), vec![id.clone()]);

	engine.delete("items", &id, None).unwrap();
	assert!(engine.index_lookup("items", "tag", &Value::String("new".into())).unwrap().unwrap().is_empty());
}

#[test]
fn vector_search_orders_by_metric() {
	let dir = tempfile::tempdir().unwrap();
	let engine = open_engine(&dir);

	for (name, vector) in [
		("east", vec![1.0f32, 0.0]),
		("north", vec![0.0, 1.0]),
		("northeast", vec![0.7, 0.7]),
	] {
		let mut d = doc(&[("name", Value::String(name.into()))]);
		d.insert("vec", Value::from_vector(&vector));
		engine.insert("places", d, None).unwrap();
	}

	// Without a vector index the search is a semantic failure.
	let err = engine.vector_search("places", None, &[1.0, 0.0], 2).unwrap_err();
	assert!(matches!(err, EngineError::NoVectorIndex(_)));

	engine
		.create_index(
			"places",
			IndexDescriptor {
				name: "vec_idx".into(),
				field: "vec".into(),
				kind: IndexKind::Vector,
				unique: false,
				dimensions: Some(2),
				metric: Some(DistanceMetric::Cosine),
			},
		)
		.unwrap();

	let hits = engine.vector_search("places", None, &[1.0, 0.0], 2).unwrap();
	assert_eq!(hits.len(), 2);
	let dict = engine.dictionary();
	let top = blite_codec::decode(&hits[0].bytes, dict).unwrap();
	assert_eq!(top.get("name"), Some(&Value::String("east".into())));
	assert!(hits[0].score > hits[1].score);
}

#[test]
fn change_capture_reports_writes_in_order() {
	let dir = tempfile::tempdir().unwrap();
	let engine = open_engine(&dir);
	let mut rx = engine.subscribe("orders");

	let id = engine.insert("orders", doc(&[("n", Value::Int32(1))]), None).unwrap();
	let mut updated = doc(&[("n", Value::Int32(2))]);
	updated.set_id(&id);
	engine.update("orders", updated, None).unwrap();
	engine.delete("orders", &id, None).unwrap();

	assert_eq!(rx.try_recv().unwrap().op, ChangeOp::Insert);
	assert_eq!(rx.try_recv().unwrap().op, ChangeOp::Update);
	assert_eq!(rx.try_recv().unwrap().op, ChangeOp::Delete);
}

#[test]
fn transactional_events_fire_only_on_commit() {
	let dir = tempfile::tempdir().unwrap();
	let engine = open_engine(&dir);
	engine.create_collection("orders").unwrap();
	let mut rx = engine.subscribe("orders");

	let txn = engine.begin().unwrap();
	engine.insert("orders", doc(&[("n", Value::Int32(1))]), Some(&txn)).unwrap();
	assert!(rx.try_recv().is_err());
	engine.commit(&txn).unwrap();
	assert_eq!(rx.try_recv().unwrap().op, ChangeOp::Insert);

	let txn = engine.begin().unwrap();
	engine.insert("orders", doc(&[("n", Value::Int32(2))]), Some(&txn)).unwrap();
	engine.rollback(&txn).unwrap();
	assert!(rx.try_recv().is_err());
}

#[test]
fn time_series_collections_prune_expired_documents() {
	let dir = tempfile::tempdir().unwrap();
	let engine = open_engine(&dir);
	engine.create_collection("metrics").unwrap();
	engine
		.set_time_series(
			"metrics",
			Some(TimeSeriesConfig { ttl_field: "at".into(), retention_seconds: 3600 }),
		)
		.unwrap();

	let stale = Timestamp(Timestamp::now().millis() - 2 * 3600 * 1000);
	let old_id = engine.insert("metrics", doc(&[("at", Value::Timestamp(stale))]), None).unwrap();
	let fresh_id = engine
		.insert("metrics", doc(&[("at", Value::Timestamp(Timestamp::now()))]), None)
		.unwrap();
	// The next write sweeps anything past retention.
	engine.insert("metrics", doc(&[("at", Value::Timestamp(Timestamp::now()))]), None).unwrap();

	assert!(engine.find("metrics", &old_id).unwrap().is_none());
	assert!(engine.find("metrics", &fresh_id).unwrap().is_some());
}

#[test]
fn backup_copy_opens_as_a_database() {
	let dir = tempfile::tempdir().unwrap();
	let engine = open_engine(&dir);
	let id = engine.insert("orders", doc(&[("n", Value::Int32(1))]), None).unwrap();

	let backup_path = dir.path().join("backup.blite");
	engine.backup_to(&backup_path).unwrap();

	let restored = Engine::open("restored", &backup_path).unwrap();
	assert!(restored.find("orders", &id).unwrap().is_some());
}

#[test]
fn schema_history_is_append_only() {
	let dir = tempfile::tempdir().unwrap();
	let engine = open_engine(&dir);
	engine.create_collection("typed").unwrap();

	let v1 = engine
		.set_schema(
			"typed",
			vec![blite_engine::SchemaField { name: "name".into(), type_code: 6, nullable: false }],
		)
		.unwrap();
	assert_eq!(v1.version, 1);
	let v2 = engine
		.set_schema(
			"typed",
			vec![
				blite_engine::SchemaField { name: "name".into(), type_code: 6, nullable: false },
				blite_engine::SchemaField { name: "age".into(), type_code: 2, nullable: true },
			],
		)
		.unwrap();
	assert_eq!(v2.version, 2);
	assert_eq!(engine.descriptor("typed").unwrap().schema.len(), 2);
}
