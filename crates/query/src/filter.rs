// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Filter-tree evaluation over decoded documents.

use std::cmp::Ordering;

use blite_core::value::{Document, Value};

use crate::{CompareOp, FilterNode, FilterValue};

/// Evaluates a filter node against a document. Missing fields behave as
/// `Null`; incomparable pairs fail ordering comparisons and satisfy `Ne`.
pub fn matches(node: &FilterNode, doc: &Document) -> bool {
	match node {
		FilterNode::Compare { path, op, value } => {
			let field = doc.get_path(path).unwrap_or(&Value::Null);
			match (op, value) {
				(CompareOp::In, FilterValue::List(items)) => {
					items.iter().any(|item| scalar_eq(field, item))
				}
				(CompareOp::In, FilterValue::Scalar(_)) => false,
				(_, FilterValue::List(_)) => false,
				(op, FilterValue::Scalar(scalar)) => compare_scalar(field, *op, scalar),
			}
		}
		FilterNode::All(children) => children.iter().all(|child| matches(child, doc)),
		FilterNode::Any(children) => children.iter().any(|child| matches(child, doc)),
		FilterNode::Not(child) => !matches(child, doc),
	}
}

fn scalar_eq(field: &Value, scalar: &Value) -> bool {
	field.compare(scalar) == Some(Ordering::Equal)
}

fn compare_scalar(field: &Value, op: CompareOp, scalar: &Value) -> bool {
	match op {
		CompareOp::Eq => scalar_eq(field, scalar),
		CompareOp::Ne => !scalar_eq(field, scalar),
		CompareOp::Lt => field.compare(scalar) == Some(Ordering::Less),
		CompareOp::Lte => matches!(field.compare(scalar), Some(Ordering::Less | Ordering::Equal)),
		CompareOp::Gt => field.compare(scalar) == Some(Ordering::Greater),
		CompareOp::Gte => matches!(field.compare(scalar), Some(Ordering::Greater | Ordering::Equal)),
		CompareOp::StartsWith => match (field, scalar) {
			(Value::String(a), Value::String(b)) => a.starts_with(b.as_str()),
			_ => false,
		},
		CompareOp::Contains => match (field, scalar) {
			(Value::String(a), Value::String(b)) => a.contains(b.as_str()),
			_ => false,
		},
		CompareOp::In => false,
	}
}
