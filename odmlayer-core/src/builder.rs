//! Aggregation pipeline stage builders.
//!
//! Every builder returns an [`Operator`], a single `key: value` pair such as
//! `"$group": { "_id": "$age" }`. Operators are turned into stage documents with
//! [`stage`] or handed to the collection's aggregation helpers directly, mixed with raw
//! stage documents through [`StageInput`].
//!
//! Optional parameters that are `None` are left out of the produced document entirely.
//! MongoDB treats a missing field and a `null` field differently, so no builder ever
//! emits a `null` placeholder.
//!
//! # Example
//!
//! ```ignore
//! use odmlayer::{builder, bson::doc, field};
//!
//! let pipeline = builder::pipeline([
//!     builder::match_(doc! { "age": { "$gt": 20 } }).into(),
//!     builder::lookup("authors", "author_id", field::ID, "author").into(),
//!     builder::StageInput::from(doc! { "$limit": 10 }),
//! ]);
//! ```

use bson::{Bson, Document, doc};

use crate::operator;

/// A single aggregation operator: one key mapped to one value.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    key: String,
    value: Bson,
}

impl Operator {
    /// Creates an operator with an arbitrary key.
    pub fn new(key: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns the operator key, e.g. `$group`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the operator value.
    pub fn value(&self) -> &Bson {
        &self.value
    }

    /// Wraps this operator into a single-key stage document.
    pub fn into_stage(self) -> Document {
        stage([self])
    }
}

impl From<Operator> for Bson {
    fn from(operator: Operator) -> Self {
        Bson::Document(operator.into_stage())
    }
}

/// One element of a pipeline handed to the aggregation helpers.
#[derive(Debug, Clone, PartialEq)]
pub enum StageInput {
    /// A builder output, normalized to `{ key: value }`.
    Operator(Operator),
    /// A stage document passed through unchanged.
    Raw(Document),
}

impl StageInput {
    /// Normalizes this input into a pipeline stage document.
    pub fn into_stage(self) -> Document {
        match self {
            StageInput::Operator(operator) => operator.into_stage(),
            StageInput::Raw(document) => document,
        }
    }
}

impl From<Operator> for StageInput {
    fn from(operator: Operator) -> Self {
        StageInput::Operator(operator)
    }
}

impl From<Document> for StageInput {
    fn from(document: Document) -> Self {
        StageInput::Raw(document)
    }
}

/// Folds operators into one stage document, keeping their order.
pub fn stage(operators: impl IntoIterator<Item = Operator>) -> Document {
    operators
        .into_iter()
        .map(|operator| (operator.key, operator.value))
        .collect()
}

/// Builds a pipeline from stage inputs, preserving their order.
pub fn pipeline<I>(stages: I) -> Vec<Document>
where
    I: IntoIterator,
    I::Item: Into<StageInput>,
{
    stages
        .into_iter()
        .map(|input| input.into().into_stage())
        .collect()
}

/// Inserts `key` only when `value` is present.
fn append_if_some<V: Into<Bson>>(document: &mut Document, key: &str, value: Option<V>) {
    if let Some(value) = value {
        document.insert(key, value.into());
    }
}

/// `$addFields` stage.
pub fn add_fields(fields: Document) -> Operator {
    Operator::new(operator::ADD_FIELDS, fields)
}

/// `$bucket` stage.
pub fn bucket(
    group_by: impl Into<Bson>,
    boundaries: Vec<Bson>,
    default: Option<Bson>,
    output: Option<Document>,
) -> Operator {
    let mut body = doc! {
        "groupBy": group_by.into(),
        "boundaries": boundaries,
    };
    append_if_some(&mut body, "default", default);
    append_if_some(&mut body, "output", output);

    Operator::new(operator::BUCKET, body)
}

/// `$bucketAuto` stage.
pub fn bucket_auto(
    group_by: impl Into<Bson>,
    buckets: i32,
    output: Option<Document>,
    granularity: Option<&str>,
) -> Operator {
    let mut body = doc! {
        "groupBy": group_by.into(),
        "buckets": buckets,
    };
    append_if_some(&mut body, "output", output);
    append_if_some(&mut body, "granularity", granularity);

    Operator::new(operator::BUCKET_AUTO, body)
}

/// `$collStats` stage.
pub fn coll_stats(
    latency_stats: Option<Document>,
    storage_stats: Option<Document>,
    count: Option<Document>,
) -> Operator {
    let mut body = Document::new();
    append_if_some(&mut body, "latencyStats", latency_stats);
    append_if_some(&mut body, "storageStats", storage_stats);
    append_if_some(&mut body, "count", count);

    Operator::new(operator::COLL_STATS, body)
}

/// `$count` stage writing the count into `field`.
pub fn count(field: &str) -> Operator {
    Operator::new(operator::COUNT, field)
}

/// `$facet` stage; each entry maps an output field to a sub-pipeline.
pub fn facet<I>(facets: impl IntoIterator<Item = (String, I)>) -> Operator
where
    I: IntoIterator,
    I::Item: Into<StageInput>,
{
    let body: Document = facets
        .into_iter()
        .map(|(name, stages)| {
            let stages = pipeline(stages)
                .into_iter()
                .map(Bson::Document)
                .collect::<Vec<_>>();
            (name, Bson::Array(stages))
        })
        .collect();

    Operator::new(operator::FACET, body)
}

/// Options of the [`graph_lookup`] stage that may be omitted.
#[derive(Debug, Clone, Default)]
pub struct GraphLookupOptions {
    pub max_depth: Option<i32>,
    pub depth_field: Option<String>,
    pub restrict_search_with_match: Option<Document>,
}

/// `$graphLookup` stage.
pub fn graph_lookup(
    from: &str,
    start_with: impl Into<Bson>,
    connect_from_field: &str,
    connect_to_field: &str,
    as_field: &str,
    options: GraphLookupOptions,
) -> Operator {
    let mut body = doc! {
        "from": from,
        "startWith": start_with.into(),
        "connectFromField": connect_from_field,
        "connectToField": connect_to_field,
        "as": as_field,
    };
    append_if_some(&mut body, "maxDepth", options.max_depth);
    append_if_some(&mut body, "depthField", options.depth_field);
    append_if_some(
        &mut body,
        "restrictSearchWithMatch",
        options.restrict_search_with_match,
    );

    Operator::new(operator::GRAPH_LOOKUP, body)
}

/// `$group` stage. `accumulators` are merged after the `_id` key.
///
/// `group("$_id", None)` leaves every document's identity unchanged.
pub fn group(id: impl Into<Bson>, accumulators: Option<Document>) -> Operator {
    let mut body = doc! { "_id": id.into() };
    for (key, value) in accumulators.unwrap_or_default() {
        body.insert(key, value);
    }

    Operator::new(operator::GROUP, body)
}

/// `$limit` stage.
pub fn limit(n: i64) -> Operator {
    Operator::new(operator::LIMIT, n)
}

/// `$lookup` stage joining on a local and a foreign field.
pub fn lookup(from: &str, local_field: &str, foreign_field: &str, as_field: &str) -> Operator {
    Operator::new(
        operator::LOOKUP,
        doc! {
            "from": from,
            "localField": local_field,
            "foreignField": foreign_field,
            "as": as_field,
        },
    )
}

/// `$lookup` stage running a sub-pipeline, optionally with `let` variables.
pub fn lookup_pipeline<I>(from: &str, let_vars: Option<Document>, stages: I, as_field: &str) -> Operator
where
    I: IntoIterator,
    I::Item: Into<StageInput>,
{
    let mut body = doc! { "from": from };
    append_if_some(&mut body, "let", let_vars);
    body.insert("pipeline", pipeline(stages));
    body.insert("as", as_field);

    Operator::new(operator::LOOKUP, body)
}

/// `$match` stage.
pub fn match_(filter: Document) -> Operator {
    Operator::new(operator::MATCH, filter)
}

/// `$project` stage.
pub fn project(fields: Document) -> Operator {
    Operator::new(operator::PROJECT, fields)
}

/// `$replaceRoot` stage.
pub fn replace_root(new_root: impl Into<Bson>) -> Operator {
    Operator::new(operator::REPLACE_ROOT, doc! { "newRoot": new_root.into() })
}

/// `$sample` stage.
pub fn sample(size: i64) -> Operator {
    Operator::new(operator::SAMPLE, doc! { "size": size })
}

/// `$set` stage, an alias of `$addFields`.
pub fn set(fields: Document) -> Operator {
    Operator::new(operator::SET, fields)
}

/// `$skip` stage.
pub fn skip(n: i64) -> Operator {
    Operator::new(operator::SKIP, n)
}

/// `$sort` stage.
pub fn sort(fields: Document) -> Operator {
    Operator::new(operator::SORT, fields)
}

/// `$sortByCount` stage.
pub fn sort_by_count(expression: impl Into<Bson>) -> Operator {
    Operator::new(operator::SORT_BY_COUNT, expression.into())
}

/// `$unset` stage.
pub fn unset<S: AsRef<str>>(fields: impl IntoIterator<Item = S>) -> Operator {
    Operator::new(
        operator::UNSET,
        fields
            .into_iter()
            .map(|field| Bson::String(field.as_ref().to_string()))
            .collect::<Vec<_>>(),
    )
}

/// `$unwind` stage.
pub fn unwind(
    path: &str,
    include_array_index: Option<&str>,
    preserve_null_and_empty_arrays: Option<bool>,
) -> Operator {
    let mut body = doc! { "path": path };
    append_if_some(&mut body, "includeArrayIndex", include_array_index);
    append_if_some(
        &mut body,
        "preserveNullAndEmptyArrays",
        preserve_null_and_empty_arrays,
    );

    Operator::new(operator::UNWIND, body)
}

/// `$cond` expression.
pub fn cond(if_: impl Into<Bson>, then: impl Into<Bson>, else_: impl Into<Bson>) -> Operator {
    Operator::new(
        operator::COND,
        doc! {
            "if": if_.into(),
            "then": then.into(),
            "else": else_.into(),
        },
    )
}

/// `$ifNull` expression.
pub fn if_null(expression: impl Into<Bson>, replacement: impl Into<Bson>) -> Operator {
    Operator::new(
        operator::IF_NULL,
        vec![expression.into(), replacement.into()],
    )
}

/// `$switch` expression. Each branch is a `(case, then)` pair.
pub fn switch_(branches: Vec<(Bson, Bson)>, default: Option<Bson>) -> Operator {
    let branches = branches
        .into_iter()
        .map(|(case, then)| Bson::Document(doc! { "case": case, "then": then }))
        .collect::<Vec<_>>();

    let mut body = doc! { "branches": branches };
    append_if_some(&mut body, "default", default);

    Operator::new(operator::SWITCH, body)
}

/// `$filter` expression. `as_var` defaults to `this` on the server when omitted.
pub fn filter(input: impl Into<Bson>, as_var: Option<&str>, condition: impl Into<Bson>) -> Operator {
    let mut body = doc! { "input": input.into() };
    append_if_some(&mut body, "as", as_var);
    body.insert("cond", condition.into());

    Operator::new(operator::FILTER, body)
}

/// `$map` expression.
pub fn map(input: impl Into<Bson>, as_var: Option<&str>, in_: impl Into<Bson>) -> Operator {
    let mut body = doc! { "input": input.into() };
    append_if_some(&mut body, "as", as_var);
    body.insert("in", in_.into());

    Operator::new(operator::MAP, body)
}

/// `$let` expression.
pub fn let_(vars: Document, in_: impl Into<Bson>) -> Operator {
    Operator::new(operator::LET, doc! { "vars": vars, "in": in_.into() })
}

/// `$expr` query operator.
pub fn expr(expression: impl Into<Bson>) -> Operator {
    Operator::new(operator::EXPR, expression.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_without_accumulators_only_has_id() {
        assert_eq!(
            group("$_id", None).into_stage(),
            doc! { "$group": { "_id": "$_id" } },
        );
    }

    #[test]
    fn group_appends_accumulators_after_id() {
        let stage = group("$age", Some(doc! { "total": { "$sum": 1 } })).into_stage();
        let body = stage.get_document("$group").unwrap();

        assert_eq!(body.keys().collect::<Vec<_>>(), vec!["_id", "total"]);
    }

    #[test]
    fn absent_options_are_omitted_not_null() {
        let unwind = unwind("$tags", None, Some(true)).into_stage();
        let body = unwind.get_document("$unwind").unwrap();

        assert!(!body.contains_key("includeArrayIndex"));
        assert!(body.get_bool("preserveNullAndEmptyArrays").unwrap());

        let stats = coll_stats(None, None, None).into_stage();
        assert_eq!(stats, doc! { "$collStats": {} });

        let bucket = bucket("$price", vec![0.into(), 100.into()], None, None).into_stage();
        let body = bucket.get_document("$bucket").unwrap();
        assert!(!body.contains_key("default"));
        assert!(!body.contains_key("output"));
    }

    #[test]
    fn graph_lookup_includes_only_set_options() {
        let operator = graph_lookup(
            "employees",
            "$reportsTo",
            "reportsTo",
            "name",
            "hierarchy",
            GraphLookupOptions {
                max_depth: Some(2),
                ..Default::default()
            },
        );
        let body = operator.value().as_document().unwrap();

        assert_eq!(body.get_i32("maxDepth").unwrap(), 2);
        assert!(!body.contains_key("depthField"));
        assert!(!body.contains_key("restrictSearchWithMatch"));
    }

    #[test]
    fn lookup_uses_mongo_field_names() {
        assert_eq!(
            lookup("authors", "author_id", "_id", "author").into_stage(),
            doc! {
                "$lookup": {
                    "from": "authors",
                    "localField": "author_id",
                    "foreignField": "_id",
                    "as": "author",
                }
            },
        );
    }

    #[test]
    fn pipeline_normalizes_operators_and_keeps_raw_documents() {
        let stages = pipeline([
            StageInput::from(match_(doc! { "age": 24 })),
            StageInput::from(doc! { "$project": { "age": 0 } }),
            StageInput::from(limit(1)),
        ]);

        assert_eq!(
            stages,
            vec![
                doc! { "$match": { "age": 24 } },
                doc! { "$project": { "age": 0 } },
                doc! { "$limit": 1_i64 },
            ],
        );
    }

    #[test]
    fn stage_folds_operators_in_order() {
        let document = stage([Operator::new("b", 1), Operator::new("a", 2)]);

        assert_eq!(document.keys().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn expressions_nest_as_values() {
        let operator = add_fields(doc! {
            "label": cond(doc! { "$gte": ["$age", 18] }, "adult", "minor"),
        });

        assert_eq!(
            operator.into_stage(),
            doc! {
                "$addFields": {
                    "label": {
                        "$cond": {
                            "if": { "$gte": ["$age", 18] },
                            "then": "adult",
                            "else": "minor",
                        }
                    }
                }
            },
        );
    }

    #[test]
    fn switch_omits_missing_default() {
        let operator = switch_(vec![(Bson::Boolean(true), Bson::from("yes"))], None);
        let body = operator.value().as_document().unwrap();

        assert!(!body.contains_key("default"));
        assert_eq!(body.get_array("branches").unwrap().len(), 1);
    }

    #[test]
    fn filter_omits_missing_variable_name() {
        let operator = filter("$items", None, doc! { "$gt": ["$$this.qty", 1] });
        let body = operator.value().as_document().unwrap();

        assert_eq!(body.keys().collect::<Vec<_>>(), vec!["input", "cond"]);
    }
}
