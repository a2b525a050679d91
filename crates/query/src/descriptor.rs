// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! The language-neutral query IR.

use blite_core::value::Value;
use serde::{Deserialize, Serialize};

use crate::{QueryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
	Eq,
	Ne,
	Lt,
	Lte,
	Gt,
	Gte,
	StartsWith,
	Contains,
	In,
}

/// A tagged scalar, or a list of scalars for [`CompareOp::In`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
	Scalar(Value),
	List(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterNode {
	/// `{field path, op, value}`; paths are dot-separated and lowercase.
	Compare { path: String, op: CompareOp, value: FilterValue },
	/// n-ary conjunction. Child order is preserved.
	All(Vec<FilterNode>),
	/// n-ary disjunction. Child order is preserved.
	Any(Vec<FilterNode>),
	Not(Box<FilterNode>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
	pub field: String,
	pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
	/// Ordered field names; dot paths are preserved in the output.
	pub fields: Vec<String>,
	/// Opaque result-type hint, echoed to typed clients.
	pub type_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
	pub collection: String,
	pub filter: Option<FilterNode>,
	pub select: Option<Projection>,
	pub order_by: Vec<SortKey>,
	pub skip: Option<i64>,
	pub take: Option<i64>,
}

impl QueryDescriptor {
	pub fn new(collection: impl Into<String>) -> Self {
		Self {
			collection: collection.into(),
			filter: None,
			select: None,
			order_by: Vec::new(),
			skip: None,
			take: None,
		}
	}

	pub fn filter(mut self, node: FilterNode) -> Self {
		self.filter = Some(node);
		self
	}

	pub fn select(mut self, fields: Vec<String>) -> Self {
		self.select = Some(Projection { fields, type_hint: None });
		self
	}

	pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
		self.order_by.push(SortKey { field: field.into(), descending });
		self
	}

	pub fn skip(mut self, skip: i64) -> Self {
		self.skip = Some(skip);
		self
	}

	pub fn take(mut self, take: i64) -> Self {
		self.take = Some(take);
		self
	}

	/// Negative skip/take are clamped to zero.
	pub fn effective_skip(&self) -> usize {
		self.skip.unwrap_or(0).max(0) as usize
	}

	pub fn effective_take(&self) -> Option<usize> {
		self.take.map(|t| t.max(0) as usize)
	}

	/// Semantic validation, run before any streaming begins.
	pub fn validate(&self) -> Result<()> {
		if self.collection.is_empty() {
			return Err(QueryError::Validation("collection name is empty".into()));
		}
		if let Some(filter) = &self.filter {
			validate_node(filter)?;
		}
		for key in &self.order_by {
			if key.field.is_empty() {
				return Err(QueryError::Validation("order-by field path is empty".into()));
			}
		}
		if let Some(select) = &self.select {
			if select.fields.is_empty() {
				return Err(QueryError::Validation("projection selects no fields".into()));
			}
			if select.fields.iter().any(|f| f.is_empty()) {
				return Err(QueryError::Validation("projection field path is empty".into()));
			}
		}
		Ok(())
	}
}

fn validate_node(node: &FilterNode) -> Result<()> {
	match node {
		FilterNode::Compare { path, op, value } => {
			if path.is_empty() || path.split('.').any(|s| s.is_empty()) {
				return Err(QueryError::Validation("filter field path is empty".into()));
			}
			match (op, value) {
				(CompareOp::In, FilterValue::List(items)) => {
					for item in items {
						validate_scalar(item)?;
					}
					Ok(())
				}
				(CompareOp::In, FilterValue::Scalar(_)) => {
					Err(QueryError::Validation("'in' requires a list of scalars".into()))
				}
				(_, FilterValue::List(_)) => {
					Err(QueryError::Validation("only 'in' accepts a list value".into()))
				}
				(CompareOp::StartsWith | CompareOp::Contains, FilterValue::Scalar(scalar)) => {
					if matches!(scalar, Value::String(_)) {
						Ok(())
					} else {
						Err(QueryError::Validation(format!(
							"string operator applied to {} value",
							scalar.type_name()
						)))
					}
				}
				(_, FilterValue::Scalar(scalar)) => validate_scalar(scalar),
			}
		}
		FilterNode::All(children) | FilterNode::Any(children) => {
			for child in children {
				validate_node(child)?;
			}
			Ok(())
		}
		FilterNode::Not(child) => validate_node(child),
	}
}

fn validate_scalar(value: &Value) -> Result<()> {
	match value {
		Value::Array(_) | Value::Document(_) | Value::Bytes(_) => Err(QueryError::Validation(format!(
			"{} is not a filterable scalar",
			value.type_name()
		))),
		_ => Ok(()),
	}
}

/// Shorthand constructors used by surfaces and tests.
impl FilterNode {
	pub fn compare(path: impl Into<String>, op: CompareOp, value: Value) -> Self {
		FilterNode::Compare { path: path.into(), op, value: FilterValue::Scalar(value) }
	}

	pub fn is_in(path: impl Into<String>, values: Vec<Value>) -> Self {
		FilterNode::Compare { path: path.into(), op: CompareOp::In, value: FilterValue::List(values) }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builder_produces_valid_descriptor() {
		let descriptor = QueryDescriptor::new("orders")
			.filter(FilterNode::compare("score", CompareOp::Gt, Value::Int32(30)))
			.order_by("score", true)
			.take(2);
		descriptor.validate().unwrap();
		assert_eq!(descriptor.effective_take(), Some(2));
		assert_eq!(descriptor.effective_skip(), 0);
	}

	#[test]
	fn negative_paging_is_clamped() {
		let descriptor = QueryDescriptor::new("orders").skip(-4).take(-1);
		assert_eq!(descriptor.effective_skip(), 0);
		assert_eq!(descriptor.effective_take(), Some(0));
	}

	#[test]
	fn validation_rejects_malformed_filters() {
		let empty_path = QueryDescriptor::new("orders")
			.filter(FilterNode::compare("", CompareOp::Eq, Value::Int32(1)));
		assert!(empty_path.validate().is_err());

		let list_for_eq = QueryDescriptor::new("orders").filter(FilterNode::Compare {
			path: "a".into(),
			op: CompareOp::Eq,
			value: FilterValue::List(vec![]),
		});
		assert!(list_for_eq.validate().is_err());

		let scalar_for_in = QueryDescriptor::new("orders").filter(FilterNode::Compare {
			path: "a".into(),
			op: CompareOp::In,
			value: FilterValue::Scalar(Value::Int32(1)),
		});
		assert!(scalar_for_in.validate().is_err());

		let starts_with_number = QueryDescriptor::new("orders")
			.filter(FilterNode::compare("a", CompareOp::StartsWith, Value::Int32(1)));
		assert!(starts_with_number.validate().is_err());

		let nested_bad = QueryDescriptor::new("orders").filter(FilterNode::All(vec![
			FilterNode::compare("ok", CompareOp::Eq, Value::Int32(1)),
			FilterNode::Not(Box::new(FilterNode::compare("", CompareOp::Eq, Value::Null))),
		]));
		assert!(nested_bad.validate().is_err());
	}
}
