// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

use std::sync::Arc;

use blite_auth::{OpMask, PermissionEntry, User};
use blite_cache::CacheVariant;
use blite_core::ErrorKind;
use blite_core::config::ServerConfig;
use blite_core::value::{Document, Value};
use blite_query::QueryDescriptor;
use blite_runtime::ServerContext;
use blite_runtime::ops::{admin, collections, documents, metadata, queries, transactions};

struct Fixture {
	ctx: Arc<ServerContext>,
	root: User,
	_dir: tempfile::TempDir,
}

fn fixture(cache_enabled: bool) -> Fixture {
	let dir = tempfile::tempdir().unwrap();
	let mut config = ServerConfig::default();
	config.server.data_dir = dir.path().to_path_buf();
	config.query_cache.enabled = cache_enabled;
	config.transactions.begin_wait_seconds = 1;

	let ctx = ServerContext::open(config).unwrap();
	let root_key = ctx.take_root_key().unwrap().to_string();
	let root = ctx.authenticate(Some(&root_key)).unwrap();
	Fixture { ctx, root, _dir: dir }
}

fn doc(fields: &[(&str, Value)]) -> Document {
	let mut doc = Document::new();
	for (name, value) in fields {
		doc.insert(*name, value.clone());
	}
	doc
}

async fn query_names(f: &Fixture, user: &User, collection: &str) -> Vec<String> {
	let hits = queries::run(
		&f.ctx,
		user,
		"",
		QueryDescriptor::new(collection).order_by("name", false),
		CacheVariant::JsonQuery,
		b"all",
	)
	.await
	.unwrap()
	.into_hits()
	.await
	.unwrap();

	let mut names = Vec::new();
	for hit in hits {
		let dictionary = queries::dictionary(&f.ctx, "").await.unwrap();
		let doc = blite_codec::decode(&hit.bytes, &dictionary).unwrap();
		if let Some(Value::String(name)) = doc.get("name") {
			names.push(name.clone());
		}
	}
	names
}

#[tokio::test]
async fn crud_round_trip_through_the_runtime() {
	let f = fixture(false);
	let id = documents::insert(
		&f.ctx,
		&f.root,
		"",
		"orders",
		doc(&[("name", Value::String("alice".into())), ("value", Value::Int32(10)), ("tag", Value::String("a".into()))]),
		None,
	)
	.await
	.unwrap();

	let bytes = documents::find_by_id(&f.ctx, &f.root, "", "orders", id.clone()).await.unwrap().unwrap();
	let dictionary = queries::dictionary(&f.ctx, "").await.unwrap();
	let mut fetched = blite_codec::decode(&bytes, &dictionary).unwrap();
	assert_eq!(fetched.get("value"), Some(&Value::Int32(10)));

	fetched.insert("name", Value::String("bob".into()));
	assert!(documents::update(&f.ctx, &f.root, "", "orders", fetched, None).await.unwrap());

	let bytes = documents::find_by_id(&f.ctx, &f.root, "", "orders", id.clone()).await.unwrap().unwrap();
	let fetched = blite_codec::decode(&bytes, &dictionary).unwrap();
	assert_eq!(fetched.get("name"), Some(&Value::String("bob".into())));
	assert_eq!(fetched.get("tag"), Some(&Value::String("a".into())));

	assert!(documents::delete(&f.ctx, &f.root, "", "orders", id.clone(), None).await.unwrap());
	assert!(documents::find_by_id(&f.ctx, &f.root, "", "orders", id).await.unwrap().is_none());
}

#[tokio::test]
async fn namespace_isolation_between_users() {
	let f = fixture(false);
	let (_, key_a) = admin::create_user(
		&f.ctx,
		&f.root,
		"usera",
		vec![PermissionEntry::wildcard(OpMask::ALL & !OpMask::ADMIN)],
		Some("a".into()),
		None,
	)
	.await
	.unwrap();
	let (_, key_b) = admin::create_user(
		&f.ctx,
		&f.root,
		"userb",
		vec![PermissionEntry::wildcard(OpMask::ALL & !OpMask::ADMIN)],
		Some("b".into()),
		None,
	)
	.await
	.unwrap();
	let user_a = f.ctx.authenticate(Some(&key_a)).unwrap();
	let user_b = f.ctx.authenticate(Some(&key_b)).unwrap();

	let id_a = documents::insert(&f.ctx, &user_a, "", "orders", doc(&[("n", Value::Int32(1))]), None)
		.await
		.unwrap();
	let id_b = documents::insert(&f.ctx, &user_b, "", "orders", doc(&[("n", Value::Int32(2))]), None)
		.await
		.unwrap();

	// Both see a collection called `orders`, and only theirs.
	assert_eq!(collections::list(&f.ctx, &user_a, "").await.unwrap(), vec!["orders".to_string()]);
	assert_eq!(collections::list(&f.ctx, &user_b, "").await.unwrap(), vec!["orders".to_string()]);

	// A cannot reach B's document: the lookup lands in a's namespace.
	assert!(documents::find_by_id(&f.ctx, &user_a, "", "orders", id_b).await.unwrap().is_none());
	assert!(documents::find_by_id(&f.ctx, &user_b, "", "orders", id_a).await.unwrap().is_none());

	// Root has no namespace and sees the physical names.
	let all = collections::list(&f.ctx, &f.root, "").await.unwrap();
	assert_eq!(all, vec!["a/orders".to_string(), "b/orders".to_string()]);
}

#[tokio::test]
async fn permission_bits_gate_each_operation() {
	let f = fixture(false);
	let (_, key) = admin::create_user(
		&f.ctx,
		&f.root,
		"reader",
		vec![PermissionEntry::new("orders", OpMask::QUERY)],
		None,
		None,
	)
	.await
	.unwrap();
	let reader = f.ctx.authenticate(Some(&key)).unwrap();

	documents::insert(&f.ctx, &f.root, "", "orders", doc(&[("n", Value::Int32(1))]), None).await.unwrap();

	// Query allowed, writes denied, other collections denied.
	assert!(queries::run(&f.ctx, &reader, "", QueryDescriptor::new("orders"), CacheVariant::JsonQuery, b"x")
		.await
		.is_ok());
	let err = documents::insert(&f.ctx, &reader, "", "orders", doc(&[]), None).await.unwrap_err();
	assert_eq!(err.kind, ErrorKind::PermissionDenied);
	let err = collections::drop(&f.ctx, &reader, "", "orders").await.unwrap_err();
	assert_eq!(err.kind, ErrorKind::PermissionDenied);
	let err = queries::run(&f.ctx, &reader, "", QueryDescriptor::new("other"), CacheVariant::JsonQuery, b"x")
		.await
		.unwrap_err();
	assert_eq!(err.kind, ErrorKind::PermissionDenied);

	// Admin surface denied without the admin bit.
	assert_eq!(admin::list_users(&f.ctx, &reader).unwrap_err().kind, ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn restricted_user_cannot_leave_its_database() {
	let f = fixture(false);
	admin::provision_tenant(&f.ctx, &f.root, "tenant-a").await.unwrap();
	let (_, key) = admin::create_user(
		&f.ctx,
		&f.root,
		"tenant-user",
		vec![PermissionEntry::wildcard(OpMask::QUERY | OpMask::WRITE)],
		None,
		Some("tenant-a".into()),
	)
	.await
	.unwrap();
	let user = f.ctx.authenticate(Some(&key)).unwrap();

	documents::insert(&f.ctx, &user, "tenant-a", "orders", doc(&[("n", Value::Int32(1))]), None)
		.await
		.unwrap();

	let err = documents::insert(&f.ctx, &user, "", "orders", doc(&[("n", Value::Int32(1))]), None)
		.await
		.unwrap_err();
	assert_eq!(err.kind, ErrorKind::PermissionDenied);
	assert!(err.message.contains("restricted to"));
}

#[tokio::test]
async fn transaction_rollback_and_atomic_commit() {
	let f = fixture(false);

	// Rollback: the insert never becomes visible.
	let txn = transactions::begin(&f.ctx, &f.root).await.unwrap();
	let id = documents::insert(&f.ctx, &f.root, "", "orders", doc(&[("key", Value::String("x".into()))]), Some(txn))
		.await
		.unwrap();
	transactions::rollback(&f.ctx, &f.root, txn).await.unwrap();
	assert!(documents::find_by_id(&f.ctx, &f.root, "", "orders", id).await.unwrap().is_none());

	// Atomic multi-collection commit.
	let txn = transactions::begin(&f.ctx, &f.root).await.unwrap();
	let id1 = documents::insert(&f.ctx, &f.root, "", "col1", doc(&[("a", Value::Int32(1))]), Some(txn))
		.await
		.unwrap();
	let id2 = documents::insert(&f.ctx, &f.root, "", "col2", doc(&[("b", Value::Int32(2))]), Some(txn))
		.await
		.unwrap();
	transactions::commit(&f.ctx, &f.root, txn).await.unwrap();
	assert!(documents::find_by_id(&f.ctx, &f.root, "", "col1", id1).await.unwrap().is_some());
	assert!(documents::find_by_id(&f.ctx, &f.root, "", "col2", id2).await.unwrap().is_some());
}

#[tokio::test]
async fn commit_invalidates_cache_rollback_preserves_it() {
	let f = fixture(true);
	documents::insert(&f.ctx, &f.root, "", "orders", doc(&[("name", Value::String("alice".into()))]), None)
		.await
		.unwrap();

	// Prime the cache.
	assert_eq!(query_names(&f, &f.root, "orders").await, vec!["alice"]);

	// A transaction that commits a write invalidates the pair.
	let txn = transactions::begin(&f.ctx, &f.root).await.unwrap();
	documents::insert(&f.ctx, &f.root, "", "orders", doc(&[("name", Value::String("bob".into()))]), Some(txn))
		.await
		.unwrap();
	transactions::commit(&f.ctx, &f.root, txn).await.unwrap();
	assert_eq!(query_names(&f, &f.root, "orders").await, vec!["alice", "bob"]);

	// Re-prime, then roll a write back: the cached result still stands.
	assert_eq!(query_names(&f, &f.root, "orders").await, vec!["alice", "bob"]);
	let txn = transactions::begin(&f.ctx, &f.root).await.unwrap();
	documents::insert(&f.ctx, &f.root, "", "orders", doc(&[("name", Value::String("carol".into()))]), Some(txn))
		.await
		.unwrap();
	transactions::rollback(&f.ctx, &f.root, txn).await.unwrap();
	assert_eq!(query_names(&f, &f.root, "orders").await, vec!["alice", "bob"]);
}

#[tokio::test]
async fn active_transaction_bypasses_the_cache() {
	let f = fixture(true);
	documents::insert(&f.ctx, &f.root, "", "orders", doc(&[("name", Value::String("alice".into()))]), None)
		.await
		.unwrap();
	assert_eq!(query_names(&f, &f.root, "orders").await, vec!["alice"]);

	// Mutate the engine directly, skipping runtime invalidation, to make
	// a cache hit observable as staleness.
	let engine = f.ctx.registry.system();
	engine.insert("orders", doc(&[("name", Value::String("zed".into()))]), None).unwrap();

	// Without a transaction the stale cached result is served.
	assert_eq!(query_names(&f, &f.root, "orders").await, vec!["alice"]);

	// With a transaction active on the database, reads re-execute.
	let txn = transactions::begin(&f.ctx, &f.root).await.unwrap();
	assert_eq!(query_names(&f, &f.root, "orders").await, vec!["alice", "zed"]);
	transactions::rollback(&f.ctx, &f.root, txn).await.unwrap();
}

#[tokio::test]
async fn count_and_metadata_sync() {
	let f = fixture(false);
	for i in 0..4 {
		documents::insert(&f.ctx, &f.root, "", "orders", doc(&[("score", Value::Int32(i * 10))]), None)
			.await
			.unwrap();
	}

	let total = queries::count(&f.ctx, &f.root, "", QueryDescriptor::new("orders"), b"all").await.unwrap();
	assert_eq!(total, 4);

	let filtered = queries::count(
		&f.ctx,
		&f.root,
		"",
		QueryDescriptor::new("orders").filter(blite_query::FilterNode::compare(
			"score",
			blite_query::CompareOp::Gte,
			Value::Int32(20),
		)),
		b"gte20",
	)
	.await
	.unwrap();
	assert_eq!(filtered, 2);

	let assigned = metadata::register_keys(
		&f.ctx,
		&f.root,
		"",
		"orders",
		vec!["Extra".to_string(), "score".to_string()],
	)
	.await
	.unwrap();
	assert_eq!(assigned.len(), 2);
	let snapshot = metadata::get_key_map(&f.ctx, &f.root, "", "orders").await.unwrap();
	assert_eq!(snapshot.get("extra"), assigned.get("extra"));
	assert!(snapshot.contains_key("score"));
}

#[tokio::test]
async fn tenant_lifecycle_and_isolation() {
	let f = fixture(false);
	admin::provision_tenant(&f.ctx, &f.root, "tenant-a").await.unwrap();
	let err = admin::provision_tenant(&f.ctx, &f.root, "tenant-a").await.unwrap_err();
	assert_eq!(err.kind, ErrorKind::Conflict);

	let id = documents::insert(&f.ctx, &f.root, "tenant-a", "orders", doc(&[("n", Value::Int32(1))]), None)
		.await
		.unwrap();
	// The same id does not exist in the system database.
	assert!(documents::find_by_id(&f.ctx, &f.root, "", "orders", id.clone()).await.unwrap().is_none());
	assert!(documents::find_by_id(&f.ctx, &f.root, "tenant-a", "orders", id).await.unwrap().is_some());

	let tenants = admin::list_tenants(&f.ctx, &f.root).await.unwrap();
	assert_eq!(tenants.len(), 1);
	assert!(tenants[0].active);

	admin::deprovision_tenant(&f.ctx, &f.root, "tenant-a", true).await.unwrap();
	assert!(admin::list_tenants(&f.ctx, &f.root).await.unwrap().is_empty());
	let err = admin::deprovision_tenant(&f.ctx, &f.root, "tenant-a", true).await.unwrap_err();
	assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn backup_produces_an_openable_copy() {
	let f = fixture(false);
	let id = documents::insert(&f.ctx, &f.root, "", "orders", doc(&[("n", Value::Int32(1))]), None)
		.await
		.unwrap();

	let (path, label) = admin::backup_database(&f.ctx, &f.root, "").await.unwrap();
	assert_eq!(label, "_system.db");

	let restored = blite_engine::Engine::open("restored", &path).unwrap();
	assert!(restored.find("orders", &id).unwrap().is_some());
	std::fs::remove_file(path).unwrap();
}
