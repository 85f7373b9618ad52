//! Query evaluation for in-memory documents.
//!
//! This module matches filters, applies update operators, projects and sorts documents.
//! Values are compared through [`Comparable`], which follows the MongoDB ordering of
//! BSON types: numbers of any width compare by value and values of different types
//! order by type.

use std::cmp::Ordering;

use bson::{Bson, Document, datetime::DateTime};

use odmlayer_core::{error::OdmResult, field, operator};

use crate::{
    error::{invalid, unsupported},
    pipeline::{eval_expr, is_truthy},
};

/// Type-erased, comparable representation of BSON values.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    MinKey,
    Null,
    /// All integers and floats normalized to f64
    Number(f64),
    String(&'a str),
    Map(Vec<(&'a str, Comparable<'a>)>),
    Array(Vec<Comparable<'a>>),
    Binary(&'a [u8]),
    ObjectId([u8; 12]),
    Bool(bool),
    DateTime(DateTime),
    Timestamp(u32, u32),
    MaxKey,
    /// Types without a useful ordering
    Other,
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::MinKey => Comparable::MinKey,
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Symbol(value) => Comparable::String(value),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<Vec<_>>()
            ),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Binary(binary) => Comparable::Binary(&binary.bytes),
            Bson::ObjectId(oid) => Comparable::ObjectId(oid.bytes()),
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::Timestamp(ts) => Comparable::Timestamp(ts.time, ts.increment),
            Bson::MaxKey => Comparable::MaxKey,
            _ => Comparable::Other,
        }
    }
}

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::MinKey => 0,
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Binary(_) => 6,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
            Comparable::Timestamp(..) => 10,
            Comparable::MaxKey => 11,
            Comparable::Other => 12,
        }
    }

    /// Returns `true` when both values belong to the same type class.
    pub(crate) fn same_type(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Comparable<'_> {}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Comparable<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Comparable::String(a), Comparable::String(b)) => a.cmp(b),
            (Comparable::Map(a), Comparable::Map(b)) => {
                for ((left_key, left), (right_key, right)) in a.iter().zip(b.iter()) {
                    let ordering = left_key
                        .cmp(right_key)
                        .then_with(|| left.cmp(right));

                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }

                a.len().cmp(&b.len())
            },
            (Comparable::Array(a), Comparable::Array(b)) => a.cmp(b),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.cmp(b),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.cmp(b),
            (Comparable::Timestamp(a_time, a_inc), Comparable::Timestamp(b_time, b_inc)) => {
                (a_time, a_inc).cmp(&(b_time, b_inc))
            },
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Compares two values in MongoDB order.
pub(crate) fn compare_values(left: &Bson, right: &Bson) -> Ordering {
    Comparable::from(left).cmp(&Comparable::from(right))
}

/// Returns `true` when two values are equal, treating numbers of any width alike.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Resolves a dotted path through embedded documents and array indexes.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;

    for part in parts {
        current = match current {
            Bson::Document(doc) => doc.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Sets the value at a dotted path, creating intermediate documents as needed.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        },
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }

            if let Some(Bson::Document(child)) = document.get_mut(head) {
                set_path(child, rest, value);
            }
        },
    }
}

/// Removes the value at a dotted path.
pub(crate) fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(child)) => remove_path(child, rest),
            _ => None,
        },
    }
}

/// Returns `true` when `document` satisfies `filter`.
pub(crate) fn matches(document: &Document, filter: &Document) -> OdmResult<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            operator::AND => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            },
            operator::OR => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            },
            operator::NOR => {
                let mut none = true;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            },
            operator::EXPR => is_truthy(&eval_expr(document, condition)?),
            op if op.starts_with('$') => return Err(unsupported("query operator", op)),
            path => matches_condition(lookup(document, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn clauses<'a>(key: &str, condition: &'a Bson) -> OdmResult<Vec<&'a Document>> {
    match condition {
        Bson::Array(items) => items
            .iter()
            .map(|item| match item {
                Bson::Document(doc) => Ok(doc),
                _ => Err(invalid(format!("{key} expects an array of documents"))),
            })
            .collect(),
        _ => Err(invalid(format!("{key} expects an array"))),
    }
}

fn is_operator_keyed(document: &Document) -> bool {
    document.keys().next().is_some_and(|key| key.starts_with('$'))
}

fn is_operator_document(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(doc) if is_operator_keyed(doc) => Some(doc),
        _ => None,
    }
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> OdmResult<bool> {
    let Some(operators) = is_operator_document(condition) else {
        return Ok(equality_match(value, condition));
    };

    for (op, operand) in operators {
        let matched = match op.as_str() {
            operator::EQ => equality_match(value, operand),
            operator::NE => !equality_match(value, operand),
            operator::GT => ordering_match(value, operand, |o| o == Ordering::Greater),
            operator::GTE => ordering_match(value, operand, |o| o != Ordering::Less),
            operator::LT => ordering_match(value, operand, |o| o == Ordering::Less),
            operator::LTE => ordering_match(value, operand, |o| o != Ordering::Greater),
            operator::IN => in_match(value, op, operand)?,
            operator::NIN => !in_match(value, op, operand)?,
            operator::EXISTS => is_truthy(operand) == value.is_some(),
            op => return Err(unsupported("query operator", op)),
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Equality with array semantics: an array field matches when any element matches.
fn equality_match(value: Option<&Bson>, operand: &Bson) -> bool {
    match value {
        None => matches!(operand, Bson::Null),
        Some(Bson::Array(items)) => {
            items.iter().any(|item| values_equal(item, operand)) || values_equal(&Bson::Array(items.clone()), operand)
        },
        Some(value) => values_equal(value, operand),
    }
}

fn ordering_match(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let compare = |item: &Bson| {
        let left = Comparable::from(item);
        let right = Comparable::from(operand);
        left.same_type(&right) && accept(left.cmp(&right))
    };

    match value {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(compare),
        Some(value) => compare(value),
    }
}

fn in_match(value: Option<&Bson>, op: &str, operand: &Bson) -> OdmResult<bool> {
    match operand {
        Bson::Array(candidates) => Ok(candidates
            .iter()
            .any(|candidate| equality_match(value, candidate))),
        _ => Err(invalid(format!("{op} expects an array"))),
    }
}

/// Applies an update document in place.
///
/// A document without operator keys replaces every field except `_id`.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> OdmResult<()> {
    if !is_operator_keyed(update) {
        let id = document.get(field::ID).cloned();
        *document = update.clone();

        if let Some(id) = id {
            document.insert(field::ID, id);
        }

        return Ok(());
    }

    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(invalid(format!("{op} expects a document")));
        };

        match op.as_str() {
            operator::SET => {
                for (path, value) in fields {
                    set_path(document, path, value.clone());
                }
            },
            operator::UNSET => {
                for (path, _) in fields {
                    remove_path(document, path);
                }
            },
            operator::INC => {
                for (path, amount) in fields {
                    let current = lookup(document, path).cloned().unwrap_or(Bson::Int32(0));
                    let sum = add_numbers(&current, amount)?;

                    set_path(document, path, sum);
                }
            },
            op => return Err(unsupported("update operator", op)),
        }
    }

    Ok(())
}

/// Adds two numbers, widening the result the way MongoDB does.
///
/// A 64-bit overflow is an error rather than a wrapped value.
pub(crate) fn add_numbers(left: &Bson, right: &Bson) -> OdmResult<Bson> {
    let overflow = || invalid(format!("integer overflow adding {left} and {right}"));

    match (left, right) {
        (Bson::Int32(a), Bson::Int32(b)) => Ok(a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(i64::from(*a) + i64::from(*b)))),
        (Bson::Int32(a), Bson::Int64(b)) => i64::from(*a)
            .checked_add(*b)
            .map(Bson::Int64)
            .ok_or_else(overflow),
        (Bson::Int64(a), Bson::Int32(b)) => a
            .checked_add(i64::from(*b))
            .map(Bson::Int64)
            .ok_or_else(overflow),
        (Bson::Int64(a), Bson::Int64(b)) => a.checked_add(*b).map(Bson::Int64).ok_or_else(overflow),
        _ => match (as_f64(left), as_f64(right)) {
            (Some(a), Some(b)) => Ok(Bson::Double(a + b)),
            _ => Err(invalid(format!("cannot add non-numeric values {left} and {right}"))),
        },
    }
}

pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

/// Reads a non-negative count such as a `$skip` or `$limit` argument.
pub(crate) fn as_count(value: &Bson) -> Option<u64> {
    match value {
        Bson::Int32(value) if *value >= 0 => Some(*value as u64),
        Bson::Int64(value) if *value >= 0 => Some(*value as u64),
        Bson::Double(value) if *value >= 0.0 && value.fract() == 0.0 => Some(*value as u64),
        _ => None,
    }
}

/// Builds the document inserted by an upsert from the equality fields of `filter`.
pub(crate) fn upsert_seed(filter: &Document) -> Document {
    let mut seed = Document::new();

    for (path, condition) in filter {
        if path.starts_with('$') {
            continue;
        }

        match is_operator_document(condition) {
            Some(operators) => {
                if let Some(value) = operators.get(operator::EQ) {
                    set_path(&mut seed, path, value.clone());
                }
            },
            None => set_path(&mut seed, path, condition.clone()),
        }
    }

    seed
}

/// Sorts documents by a `{field: 1 | -1}` specification.
pub(crate) fn sort_documents(documents: &mut [Document], order: &Document) -> OdmResult<()> {
    let keys = order
        .iter()
        .map(|(path, direction)| match as_f64(direction) {
            Some(direction) if direction < 0.0 => Ok((path.as_str(), true)),
            Some(_) => Ok((path.as_str(), false)),
            None => Err(invalid(format!("invalid sort direction for {path}"))),
        })
        .collect::<OdmResult<Vec<_>>>()?;

    let null = Bson::Null;

    documents.sort_by(|a, b| {
        for (path, descending) in &keys {
            let left = lookup(a, path).unwrap_or(&null);
            let right = lookup(b, path).unwrap_or(&null);
            let ordering = compare_values(left, right);

            if ordering != Ordering::Equal {
                return if *descending { ordering.reverse() } else { ordering };
            }
        }

        Ordering::Equal
    });

    Ok(())
}

/// Applies a find projection of inclusion or exclusion flags.
pub(crate) fn project(document: &Document, projection: &Document) -> OdmResult<Document> {
    let mut include_id = true;
    let mut included = Vec::new();
    let mut excluded = Vec::new();

    for (path, flag) in projection {
        let keep = match flag {
            Bson::Boolean(keep) => *keep,
            flag => match as_f64(flag) {
                Some(value) => value != 0.0,
                None => return Err(invalid(format!("unsupported projection value for {path}"))),
            },
        };

        match (path.as_str(), keep) {
            (field::ID, keep) => include_id = keep,
            (path, true) => included.push(path),
            (path, false) => excluded.push(path),
        }
    }

    if !included.is_empty() && !excluded.is_empty() {
        return Err(invalid("cannot mix inclusion and exclusion in a projection"));
    }

    if included.is_empty() {
        let mut projected = document.clone();

        for path in excluded {
            remove_path(&mut projected, path);
        }

        if !include_id {
            projected.remove(field::ID);
        }

        return Ok(projected);
    }

    let mut projected = Document::new();

    if include_id {
        if let Some(id) = document.get(field::ID) {
            projected.insert(field::ID, id.clone());
        }
    }

    for path in included {
        if let Some(value) = lookup(document, path) {
            set_path(&mut projected, path, value.clone());
        }
    }

    Ok(projected)
}
