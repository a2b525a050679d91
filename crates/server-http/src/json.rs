// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! JSON document representation and the minimal MongoDB-style filter
//! dialect.
//!
//! Scalars JSON can express natively stay native; the rest use single-
//! key wrapper objects: `{"$oid": hex}`, `{"$uuid": str}`,
//! `{"$date": millis}`, `{"$decimal": str}`, `{"$bytes": hex}`.

use blite_core::value::{Document, ObjectId, Timestamp, Value};
use blite_core::{Error, Result};
use blite_query::{CompareOp, FilterNode, FilterValue, QueryDescriptor, SortKey};
use serde::Deserialize;
use serde_json::{Map, Value as Json, json};
use uuid::Uuid;

pub(crate) fn value_to_json(value: &Value) -> Json {
	match value {
		Value::Null => Json::Null,
		Value::Bool(v) => json!(v),
		Value::Int32(v) => json!(v),
		Value::Int64(v) => json!(v),
		Value::Float64(v) => json!(v),
		Value::Decimal(v) => json!({ "$decimal": v.to_string() }),
		Value::String(v) => json!(v),
		Value::Timestamp(v) => json!({ "$date": v.millis() }),
		Value::Uuid(v) => json!({ "$uuid": v.to_string() }),
		Value::ObjectId(v) => json!({ "$oid": v.to_hex() }),
		Value::Bytes(v) => json!({ "$bytes": hex(v) }),
		Value::Array(items) => Json::Array(items.iter().map(value_to_json).collect()),
		Value::Document(doc) => document_to_json(doc),
	}
}

pub(crate) fn document_to_json(doc: &Document) -> Json {
	let mut map = Map::new();
	for (name, value) in doc.iter() {
		map.insert(name.clone(), value_to_json(value));
	}
	Json::Object(map)
}

pub(crate) fn json_to_value(json: &Json) -> Result<Value> {
	Ok(match json {
		Json::Null => Value::Null,
		Json::Bool(v) => Value::Bool(*v),
		Json::Number(number) => number_to_value(number)?,
		Json::String(v) => Value::String(v.clone()),
		Json::Array(items) => {
			Value::Array(items.iter().map(json_to_value).collect::<Result<Vec<_>>>()?)
		}
		Json::Object(map) => {
			if let Some(value) = wrapper_to_value(map)? {
				value
			} else {
				Value::Document(json_to_document_map(map)?)
			}
		}
	})
}

pub(crate) fn json_to_document(json: &Json) -> Result<Document> {
	match json {
		Json::Object(map) => json_to_document_map(map),
		_ => Err(Error::invalid_input("document body must be a JSON object")),
	}
}

fn json_to_document_map(map: &Map<String, Json>) -> Result<Document> {
	let mut doc = Document::new();
	for (name, value) in map {
		doc.insert(name.clone(), json_to_value(value)?);
	}
	Ok(doc)
}

fn number_to_value(number: &serde_json::Number) -> Result<Value> {
	if let Some(v) = number.as_i64() {
		if let Ok(small) = i32::try_from(v) {
			return Ok(Value::Int32(small));
		}
		return Ok(Value::Int64(v));
	}
	number
		.as_f64()
		.map(Value::Float64)
		.ok_or_else(|| Error::invalid_input(format!("unrepresentable number {number}")))
}

fn wrapper_to_value(map: &Map<String, Json>) -> Result<Option<Value>> {
	if map.len() != 1 {
		return Ok(None);
	}
	let (key, raw) = map.iter().next().expect("length checked");
	let value = match (key.as_str(), raw) {
		("$oid", Json::String(hex)) => Value::ObjectId(ObjectId::parse_hex(hex)?),
		("$uuid", Json::String(text)) => Value::Uuid(
			Uuid::parse_str(text).map_err(|_| Error::invalid_input(format!("'{text}' is not a uuid")))?,
		),
		("$date", Json::Number(millis)) => Value::Timestamp(Timestamp(
			millis.as_i64().ok_or_else(|| Error::invalid_input("$date must be integer millis"))?,
		)),
		("$decimal", Json::String(text)) => Value::Decimal(
			text.parse::<bigdecimal::BigDecimal>()
				.map_err(|_| Error::invalid_input(format!("'{text}' is not a decimal")))?,
		),
		("$bytes", Json::String(text)) => Value::Bytes(unhex(text)?),
		(key, _) if key.starts_with('$') => {
			return Err(Error::invalid_input(format!("unknown wrapper '{key}'")));
		}
		_ => return Ok(None),
	};
	Ok(Some(value))
}

fn hex(bytes: &[u8]) -> String {
	bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn unhex(text: &str) -> Result<Vec<u8>> {
	if text.len() % 2 != 0 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
		return Err(Error::invalid_input("$bytes must be an even-length hex string"));
	}
	Ok(text
		.as_bytes()
		.chunks(2)
		.map(|chunk| {
			let s = std::str::from_utf8(chunk).expect("hex is ascii");
			u8::from_str_radix(s, 16).expect("validated hex digits")
		})
		.collect())
}

/// Body accepted by the `/query` and `/count` endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct QueryBody {
	#[serde(default)]
	pub filter: Option<Json>,
	#[serde(default)]
	pub sort: Vec<SortSpec>,
	#[serde(default)]
	pub skip: Option<i64>,
	#[serde(default)]
	pub limit: Option<i64>,
	#[serde(default)]
	pub select: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SortSpec {
	pub field: String,
	#[serde(default)]
	pub descending: bool,
}

impl QueryBody {
	pub(crate) fn into_descriptor(self, collection: &str) -> Result<QueryDescriptor> {
		let mut descriptor = QueryDescriptor::new(collection);
		if let Some(filter) = &self.filter {
			descriptor.filter = Some(parse_filter(filter)?);
		}
		descriptor.order_by =
			self.sort.into_iter().map(|s| SortKey { field: s.field.to_lowercase(), descending: s.descending }).collect();
		descriptor.skip = self.skip;
		descriptor.take = self.limit;
		if let Some(fields) = self.select {
			descriptor = descriptor.select(fields.into_iter().map(|f| f.to_lowercase()).collect());
		}
		Ok(descriptor)
	}
}

/// `{field: scalar}`, `{field: {"$op": value}}`, `$and`/`$or`/`$not`.
/// Multiple members of one object conjoin.
pub(crate) fn parse_filter(json: &Json) -> Result<FilterNode> {
	let Json::Object(map) = json else {
		return Err(Error::invalid_input("filter must be a JSON object"));
	};

	let mut nodes = Vec::new();
	for (key, raw) in map {
		match key.as_str() {
			"$and" | "$or" => {
				let Json::Array(children) = raw else {
					return Err(Error::invalid_input(format!("{key} expects an array")));
				};
				let parsed = children.iter().map(parse_filter).collect::<Result<Vec<_>>>()?;
				nodes.push(if key == "$and" { FilterNode::All(parsed) } else { FilterNode::Any(parsed) });
			}
			"$not" => nodes.push(FilterNode::Not(Box::new(parse_filter(raw)?))),
			key if key.starts_with('$') => {
				return Err(Error::invalid_input(format!("unknown query operator '{key}'")));
			}
			field => nodes.push(parse_field_condition(field, raw)?),
		}
	}

	Ok(match nodes.len() {
		0 => FilterNode::All(Vec::new()),
		1 => nodes.remove(0),
		_ => FilterNode::All(nodes),
	})
}

fn parse_field_condition(field: &str, raw: &Json) -> Result<FilterNode> {
	let path = field.to_lowercase();
	if let Json::Object(map) = raw {
		let operator_keys = map.keys().any(|k| k.starts_with('$'));
		if operator_keys {
			let mut nodes = Vec::new();
			for (op_key, operand) in map {
				let node = match op_key.as_str() {
					"$eq" => compare(&path, CompareOp::Eq, operand)?,
					"$ne" => compare(&path, CompareOp::Ne, operand)?,
					"$gt" => compare(&path, CompareOp::Gt, operand)?,
					"$gte" => compare(&path, CompareOp::Gte, operand)?,
					"$lt" => compare(&path, CompareOp::Lt, operand)?,
					"$lte" => compare(&path, CompareOp::Lte, operand)?,
					"$startsWith" => compare(&path, CompareOp::StartsWith, operand)?,
					"$contains" => compare(&path, CompareOp::Contains, operand)?,
					"$in" => {
						let Json::Array(items) = operand else {
							return Err(Error::invalid_input("$in expects an array"));
						};
						let values =
							items.iter().map(json_to_value).collect::<Result<Vec<_>>>()?;
						FilterNode::Compare {
							path: path.clone(),
							op: CompareOp::In,
							value: FilterValue::List(values),
						}
					}
					other => {
						return Err(Error::invalid_input(format!("unknown query operator '{other}'")));
					}
				};
				nodes.push(node);
			}
			return Ok(if nodes.len() == 1 { nodes.remove(0) } else { FilterNode::All(nodes) });
		}
	}
	compare(&path, CompareOp::Eq, raw)
}

fn compare(path: &str, op: CompareOp, operand: &Json) -> Result<FilterNode> {
	Ok(FilterNode::Compare {
		path: path.to_string(),
		op,
		value: FilterValue::Scalar(json_to_value(operand)?),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn document_round_trips_through_json() {
		let mut doc = Document::new();
		doc.insert("name", Value::String("alice".into()));
		doc.insert("value", Value::Int32(10));
		doc.insert("big", Value::Int64(1 << 40));
		doc.insert("ratio", Value::Float64(0.5));
		doc.insert("id", Value::ObjectId(ObjectId::new()));
		doc.insert("ref", Value::Uuid(Uuid::new_v4()));
		doc.insert("at", Value::Timestamp(Timestamp(1234)));
		doc.insert("price", Value::Decimal("9.95".parse().unwrap()));
		doc.insert("raw", Value::Bytes(vec![1, 2, 255]));
		doc.insert("tags", Value::Array(vec![Value::String("a".into())]));

		let json = document_to_json(&doc);
		let back = json_to_document(&json).unwrap();
		assert_eq!(back, doc);
	}

	#[test]
	fn filter_dialect_parses() {
		let filter = json!({
			"$or": [
				{ "score": { "$gt": 30 } },
				{ "name": { "$startsWith": "a" }, "tag": "x" }
			]
		});
		let node = parse_filter(&filter).unwrap();
		let FilterNode::Any(children) = node else {
			panic!("expected $or to parse as Any");
		};
		assert_eq!(children.len(), 2);
		assert!(matches!(&children[0], FilterNode::Compare { op: CompareOp::Gt, .. }));
		assert!(matches!(&children[1], FilterNode::All(pair) if pair.len() == 2));
	}

	#[test]
	fn unknown_operators_are_rejected() {
		assert!(parse_filter(&json!({ "$nor": [] })).is_err());
		assert!(parse_filter(&json!({ "a": { "$regex": "x" } })).is_err());
		assert!(parse_filter(&json!(42)).is_err());
	}

	#[test]
	fn in_and_not_parse() {
		let node = parse_filter(&json!({ "tag": { "$in": ["a", "b"] } })).unwrap();
		assert!(matches!(node, FilterNode::Compare { op: CompareOp::In, .. }));

		let node = parse_filter(&json!({ "$not": { "tag": "a" } })).unwrap();
		assert!(matches!(node, FilterNode::Not(_)));
	}

	#[test]
	fn query_body_builds_descriptor() {
		let body: QueryBody = serde_json::from_value(json!({
			"filter": { "score": { "$gte": 10 } },
			"sort": [ { "field": "Score", "descending": true } ],
			"skip": 1,
			"limit": 2,
			"select": ["Name", "score"]
		}))
		.unwrap();
		let descriptor = body.into_descriptor("orders").unwrap();
		descriptor.validate().unwrap();
		assert_eq!(descriptor.order_by[0].field, "score");
		assert!(descriptor.order_by[0].descending);
		assert_eq!(descriptor.effective_skip(), 1);
		assert_eq!(descriptor.effective_take(), Some(2));
		assert_eq!(descriptor.select.as_ref().unwrap().fields, vec!["name", "score"]);
	}
}
