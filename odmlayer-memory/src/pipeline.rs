//! Aggregation pipeline execution for the in-memory backend.
//!
//! Stages run one after another over an owned vector of documents. Aggregation
//! expressions are evaluated by [`eval_expr`]; `$$` variables are supported for
//! `$let`, `$map` and `$filter`.

use std::collections::HashMap;

use bson::{Bson, Document};

use odmlayer_core::{error::OdmResult, field, operator};

use crate::{
    error::{invalid, unsupported},
    evaluator::{
        Comparable, add_numbers, as_count, as_f64, compare_values, lookup, matches, remove_path,
        set_path, sort_documents, values_equal,
    },
};

type Vars = Vec<(String, Bson)>;

/// Collections visible to `$lookup`.
pub(crate) type Collections = HashMap<String, Vec<Document>>;

/// Returns the boolean value of an expression result.
pub(crate) fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(value) => *value,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        _ => true,
    }
}

/// Evaluates an aggregation expression against `document`.
///
/// Missing field paths evaluate to `Null`.
pub(crate) fn eval_expr(document: &Document, expression: &Bson) -> OdmResult<Bson> {
    eval(document, &Vars::new(), expression)
}

fn eval(document: &Document, vars: &Vars, expression: &Bson) -> OdmResult<Bson> {
    match expression {
        Bson::String(path) if path.starts_with("$$") => resolve_var(document, vars, &path[2..]),
        Bson::String(path) if path.starts_with('$') => {
            Ok(lookup(document, &path[1..]).cloned().unwrap_or(Bson::Null))
        },
        Bson::Array(items) => Ok(Bson::Array(
            items
                .iter()
                .map(|item| eval(document, vars, item))
                .collect::<OdmResult<Vec<_>>>()?,
        )),
        Bson::Document(doc) => match doc.iter().next() {
            Some((key, operand)) if key.starts_with('$') && doc.len() == 1 => {
                eval_operator(document, vars, key, operand)
            },
            _ => {
                let mut evaluated = Document::new();
                for (key, value) in doc {
                    evaluated.insert(key.clone(), eval(document, vars, value)?);
                }
                Ok(Bson::Document(evaluated))
            },
        },
        literal => Ok(literal.clone()),
    }
}

fn resolve_var(document: &Document, vars: &Vars, reference: &str) -> OdmResult<Bson> {
    let (name, path) = match reference.split_once('.') {
        Some((name, path)) => (name, Some(path)),
        None => (reference, None),
    };

    let root = match name {
        "ROOT" | "CURRENT" => Bson::Document(document.clone()),
        name => vars
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| invalid(format!("undefined variable $${name}")))?,
    };

    match (path, root) {
        (None, root) => Ok(root),
        (Some(path), Bson::Document(doc)) => Ok(lookup(&doc, path).cloned().unwrap_or(Bson::Null)),
        (Some(_), _) => Ok(Bson::Null),
    }
}

fn eval_args(document: &Document, vars: &Vars, name: &str, operand: &Bson) -> OdmResult<Vec<Bson>> {
    match operand {
        Bson::Array(items) => items
            .iter()
            .map(|item| eval(document, vars, item))
            .collect(),
        _ => Err(invalid(format!("{name} expects an array of arguments"))),
    }
}

fn eval_pair(document: &Document, vars: &Vars, name: &str, operand: &Bson) -> OdmResult<(Bson, Bson)> {
    let mut args = eval_args(document, vars, name, operand)?.into_iter();

    match (args.next(), args.next(), args.next()) {
        (Some(left), Some(right), None) => Ok((left, right)),
        _ => Err(invalid(format!("{name} expects two arguments"))),
    }
}

fn named<'a>(operand: &'a Bson, name: &str) -> OdmResult<&'a Document> {
    match operand {
        Bson::Document(doc) => Ok(doc),
        _ => Err(invalid(format!("{name} expects a document"))),
    }
}

fn eval_operator(document: &Document, vars: &Vars, name: &str, operand: &Bson) -> OdmResult<Bson> {
    match name {
        operator::LITERAL => Ok(operand.clone()),
        operator::ADD => eval_args(document, vars, name, operand)?
            .iter()
            .try_fold(Bson::Int32(0), |sum, value| add_numbers(&sum, value)),
        operator::SUBTRACT | operator::MULTIPLY | operator::DIVIDE => {
            let (left, right) = eval_pair(document, vars, name, operand)?;
            arithmetic(name, &left, &right)
        },
        operator::CONCAT => {
            let mut joined = String::new();

            for value in eval_args(document, vars, name, operand)? {
                match value {
                    Bson::String(part) => joined.push_str(&part),
                    Bson::Null => return Ok(Bson::Null),
                    _ => return Err(invalid("$concat only supports strings")),
                }
            }

            Ok(Bson::String(joined))
        },
        operator::SIZE => match eval(document, vars, unwrap_single(operand))? {
            Bson::Array(items) => Ok(Bson::Int32(items.len() as i32)),
            _ => Err(invalid("$size expects an array")),
        },
        operator::EQ | operator::NE | operator::GT | operator::GTE | operator::LT | operator::LTE => {
            let (left, right) = eval_pair(document, vars, name, operand)?;
            let ordering = compare_values(&left, &right);

            Ok(Bson::Boolean(match name {
                operator::EQ => ordering.is_eq(),
                operator::NE => ordering.is_ne(),
                operator::GT => ordering.is_gt(),
                operator::GTE => ordering.is_ge(),
                operator::LT => ordering.is_lt(),
                _ => ordering.is_le(),
            }))
        },
        operator::AND => Ok(Bson::Boolean(
            eval_args(document, vars, name, operand)?
                .iter()
                .all(is_truthy),
        )),
        operator::OR => Ok(Bson::Boolean(
            eval_args(document, vars, name, operand)?
                .iter()
                .any(is_truthy),
        )),
        operator::NOT => Ok(Bson::Boolean(!is_truthy(&eval(
            document,
            vars,
            unwrap_single(operand),
        )?))),
        operator::COND => {
            let (condition, then, otherwise) = match operand {
                Bson::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                Bson::Document(body) => match (body.get("if"), body.get("then"), body.get("else")) {
                    (Some(condition), Some(then), Some(otherwise)) => (condition, then, otherwise),
                    _ => return Err(invalid("$cond requires if, then and else")),
                },
                _ => return Err(invalid("$cond expects three arguments")),
            };

            if is_truthy(&eval(document, vars, condition)?) {
                eval(document, vars, then)
            } else {
                eval(document, vars, otherwise)
            }
        },
        operator::IF_NULL => {
            let args = match operand {
                Bson::Array(items) if items.len() >= 2 => items,
                _ => return Err(invalid("$ifNull expects at least two arguments")),
            };

            for arg in &args[..args.len() - 1] {
                let value = eval(document, vars, arg)?;
                if !matches!(value, Bson::Null | Bson::Undefined) {
                    return Ok(value);
                }
            }

            eval(document, vars, &args[args.len() - 1])
        },
        operator::SWITCH => {
            let body = named(operand, name)?;
            let branches = match body.get("branches") {
                Some(Bson::Array(branches)) => branches,
                _ => return Err(invalid("$switch requires branches")),
            };

            for branch in branches {
                let branch = named(branch, name)?;
                let (Some(case), Some(then)) = (branch.get("case"), branch.get("then")) else {
                    return Err(invalid("$switch branches require case and then"));
                };

                if is_truthy(&eval(document, vars, case)?) {
                    return eval(document, vars, then);
                }
            }

            match body.get("default") {
                Some(default) => eval(document, vars, default),
                None => Err(invalid("$switch found no matching branch and no default")),
            }
        },
        operator::LET => {
            let body = named(operand, name)?;
            let (Some(Bson::Document(definitions)), Some(body_in)) = (body.get("vars"), body.get("in")) else {
                return Err(invalid("$let requires vars and in"));
            };

            let mut scope = vars.clone();
            for (var, value) in definitions {
                scope.push((var.clone(), eval(document, vars, value)?));
            }

            eval(document, &scope, body_in)
        },
        operator::MAP | operator::FILTER => {
            let body = named(operand, name)?;
            let input = match body.get("input") {
                Some(input) => eval(document, vars, input)?,
                None => return Err(invalid(format!("{name} requires input"))),
            };
            let var = body.get_str("as").unwrap_or("this").to_string();
            let step = match (name, body.get("in"), body.get("cond")) {
                (operator::MAP, Some(step), _) | (operator::FILTER, _, Some(step)) => step,
                _ => return Err(invalid(format!("{name} is missing its expression"))),
            };

            let items = match input {
                Bson::Array(items) => items,
                Bson::Null => return Ok(Bson::Null),
                _ => return Err(invalid(format!("{name} input must be an array"))),
            };

            let mut output = Vec::with_capacity(items.len());
            for item in items {
                let mut scope = vars.clone();
                scope.push((var.clone(), item.clone()));
                let value = eval(document, &scope, step)?;

                if name == operator::MAP {
                    output.push(value);
                } else if is_truthy(&value) {
                    output.push(item);
                }
            }

            Ok(Bson::Array(output))
        },
        name => Err(unsupported("expression operator", name)),
    }
}

fn unwrap_single(operand: &Bson) -> &Bson {
    match operand {
        Bson::Array(items) if items.len() == 1 => &items[0],
        operand => operand,
    }
}

fn arithmetic(name: &str, left: &Bson, right: &Bson) -> OdmResult<Bson> {
    if matches!(left, Bson::Null) || matches!(right, Bson::Null) {
        return Ok(Bson::Null);
    }

    if name != operator::DIVIDE {
        let integers = match (left, right) {
            (Bson::Int32(a), Bson::Int32(b)) => Some((*a as i64, *b as i64, true)),
            (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
                let widen = |value: &Bson| match value {
                    Bson::Int32(value) => *value as i64,
                    Bson::Int64(value) => *value,
                    _ => 0,
                };
                Some((widen(left), widen(right), false))
            },
            _ => None,
        };

        if let Some((a, b, narrow)) = integers {
            let result = if name == operator::SUBTRACT { a.checked_sub(b) } else { a.checked_mul(b) }
                .ok_or_else(|| invalid(format!("{name} overflowed")))?;

            return Ok(match i32::try_from(result) {
                Ok(result) if narrow => Bson::Int32(result),
                _ => Bson::Int64(result),
            });
        }
    }

    let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) else {
        return Err(invalid(format!("{name} only supports numbers")));
    };

    match name {
        operator::SUBTRACT => Ok(Bson::Double(a - b)),
        operator::MULTIPLY => Ok(Bson::Double(a * b)),
        _ if b == 0.0 => Err(invalid("can't $divide by zero")),
        _ => Ok(Bson::Double(a / b)),
    }
}

/// Runs `pipeline` over `documents`.
pub(crate) fn run_pipeline(
    collections: &Collections,
    mut documents: Vec<Document>,
    pipeline: &[Document],
) -> OdmResult<Vec<Document>> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, definition)), None) = (entries.next(), entries.next()) else {
            return Err(invalid("a pipeline stage must have exactly one key"));
        };

        documents = run_stage(collections, documents, name, definition)?;
    }

    Ok(documents)
}

fn run_stage(
    collections: &Collections,
    mut documents: Vec<Document>,
    name: &str,
    definition: &Bson,
) -> OdmResult<Vec<Document>> {
    match name {
        operator::MATCH => {
            let filter = named(definition, name)?;
            let mut kept = Vec::with_capacity(documents.len());

            for document in documents {
                if matches(&document, filter)? {
                    kept.push(document);
                }
            }

            Ok(kept)
        },
        operator::PROJECT => {
            let definition = named(definition, name)?;
            documents
                .iter()
                .map(|document| project_stage(document, definition))
                .collect()
        },
        operator::ADD_FIELDS | operator::SET => {
            let definition = named(definition, name)?;

            for document in &mut documents {
                let mut computed = Vec::with_capacity(definition.len());
                for (path, expression) in definition {
                    computed.push((path, eval_expr(document, expression)?));
                }
                for (path, value) in computed {
                    set_path(document, path, value);
                }
            }

            Ok(documents)
        },
        operator::UNSET => {
            let paths = match definition {
                Bson::String(path) => vec![path.as_str()],
                Bson::Array(paths) => paths
                    .iter()
                    .map(|path| path.as_str().ok_or_else(|| invalid("$unset expects field names")))
                    .collect::<OdmResult<Vec<_>>>()?,
                _ => return Err(invalid("$unset expects a field name or an array of them")),
            };

            for document in &mut documents {
                for path in &paths {
                    remove_path(document, path);
                }
            }

            Ok(documents)
        },
        operator::SORT => {
            sort_documents(&mut documents, named(definition, name)?)?;
            Ok(documents)
        },
        operator::SKIP => {
            let n = as_count(definition).ok_or_else(|| invalid("$skip expects a non-negative integer"))?;
            Ok(documents.into_iter().skip(n as usize).collect())
        },
        operator::LIMIT => {
            let n = as_count(definition).ok_or_else(|| invalid("$limit expects a non-negative integer"))?;
            Ok(documents.into_iter().take(n as usize).collect())
        },
        operator::COUNT => {
            let field = definition.as_str().ok_or_else(|| invalid("$count expects a field name"))?;

            if documents.is_empty() {
                return Ok(Vec::new());
            }

            let mut counted = Document::new();
            counted.insert(field, Bson::Int32(documents.len() as i32));
            Ok(vec![counted])
        },
        operator::GROUP => group(documents, named(definition, name)?),
        operator::UNWIND => unwind(documents, definition),
        operator::LOOKUP => lookup_stage(collections, documents, named(definition, name)?),
        operator::REPLACE_ROOT => {
            let new_root = named(definition, name)?
                .get("newRoot")
                .ok_or_else(|| invalid("$replaceRoot requires newRoot"))?;

            documents
                .iter()
                .map(|document| match eval_expr(document, new_root)? {
                    Bson::Document(root) => Ok(root),
                    _ => Err(invalid("$replaceRoot newRoot must evaluate to a document")),
                })
                .collect()
        },
        name => Err(unsupported("aggregation stage", name)),
    }
}

fn project_stage(document: &Document, definition: &Document) -> OdmResult<Document> {
    let is_flag = |value: &Bson| matches!(value, Bson::Boolean(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_));
    let has_computed_or_included = definition
        .iter()
        .any(|(path, value)| path != field::ID && (!is_flag(value) || is_truthy(value)));

    if !has_computed_or_included {
        return crate::evaluator::project(document, definition);
    }

    let mut projected = Document::new();

    if !matches!(definition.get(field::ID), Some(flag) if is_flag(flag) && !is_truthy(flag)) {
        if let Some(id) = document.get(field::ID) {
            projected.insert(field::ID, id.clone());
        }
    }

    for (path, value) in definition {
        if is_flag(value) {
            if path == field::ID {
                continue;
            }
            if !is_truthy(value) {
                return Err(invalid("cannot exclude fields in an inclusion projection"));
            }
            if let Some(found) = lookup(document, path) {
                set_path(&mut projected, path, found.clone());
            }
        } else {
            set_path(&mut projected, path, eval_expr(document, value)?);
        }
    }

    Ok(projected)
}

fn group(documents: Vec<Document>, definition: &Document) -> OdmResult<Vec<Document>> {
    let id_expression = definition
        .get(field::ID)
        .ok_or_else(|| invalid("$group requires an _id"))?;

    let mut groups: Vec<(Bson, Vec<Document>)> = Vec::new();

    for document in documents {
        let key = eval_expr(&document, id_expression)?;

        match groups.iter_mut().find(|(existing, _)| values_equal(existing, &key)) {
            Some((_, members)) => members.push(document),
            None => groups.push((key, vec![document])),
        }
    }

    let mut output = Vec::with_capacity(groups.len());

    for (key, members) in groups {
        let mut grouped = Document::new();
        grouped.insert(field::ID, key);

        for (name, accumulator) in definition {
            if name == field::ID {
                continue;
            }

            let accumulator = named(accumulator, name)?;
            let mut entries = accumulator.iter();
            let (Some((op, expression)), None) = (entries.next(), entries.next()) else {
                return Err(invalid(format!("accumulator {name} must have exactly one operator")));
            };

            let values = members
                .iter()
                .map(|member| eval_expr(member, expression))
                .collect::<OdmResult<Vec<_>>>()?;

            grouped.insert(name.clone(), accumulate(op, values)?);
        }

        output.push(grouped);
    }

    Ok(output)
}

fn numbers(values: &[Bson]) -> impl Iterator<Item = &Bson> {
    values.iter().filter(|value| as_f64(value).is_some())
}

fn accumulate(op: &str, values: Vec<Bson>) -> OdmResult<Bson> {
    match op {
        operator::SUM => numbers(&values).try_fold(Bson::Int32(0), |sum, value| add_numbers(&sum, value)),
        operator::AVG => {
            let count = numbers(&values).count();
            if count == 0 {
                return Ok(Bson::Null);
            }

            let total = numbers(&values).filter_map(as_f64).sum::<f64>();
            Ok(Bson::Double(total / count as f64))
        },
        operator::MIN | operator::MAX => {
            let present = values
                .iter()
                .filter(|value| !matches!(value, Bson::Null | Bson::Undefined));
            let chosen = if op == operator::MIN {
                present.min_by(|a, b| Comparable::from(*a).cmp(&Comparable::from(*b)))
            } else {
                present.max_by(|a, b| Comparable::from(*a).cmp(&Comparable::from(*b)))
            };

            Ok(chosen.cloned().unwrap_or(Bson::Null))
        },
        operator::FIRST => Ok(values.into_iter().next().unwrap_or(Bson::Null)),
        operator::LAST => Ok(values.into_iter().last().unwrap_or(Bson::Null)),
        operator::PUSH => Ok(Bson::Array(values)),
        operator::ADD_TO_SET => {
            let mut set: Vec<Bson> = Vec::new();

            for value in values {
                if !set.iter().any(|existing| values_equal(existing, &value)) {
                    set.push(value);
                }
            }

            Ok(Bson::Array(set))
        },
        op => Err(unsupported("accumulator", op)),
    }
}

fn unwind(documents: Vec<Document>, definition: &Bson) -> OdmResult<Vec<Document>> {
    let (path, index_field, preserve) = match definition {
        Bson::String(path) => (path.as_str(), None, false),
        Bson::Document(body) => (
            body.get_str("path")
                .map_err(|_| invalid("$unwind requires a path"))?,
            body.get_str("includeArrayIndex").ok(),
            body.get_bool("preserveNullAndEmptyArrays").unwrap_or(false),
        ),
        _ => return Err(invalid("$unwind expects a path or a document")),
    };

    let path = path
        .strip_prefix('$')
        .ok_or_else(|| invalid("$unwind path must start with $"))?;

    let mut output = Vec::new();

    for document in documents {
        match lookup(&document, path).cloned() {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for (index, item) in items.into_iter().enumerate() {
                    let mut unwound = document.clone();
                    set_path(&mut unwound, path, item);
                    if let Some(index_field) = index_field {
                        set_path(&mut unwound, index_field, Bson::Int64(index as i64));
                    }
                    output.push(unwound);
                }
            },
            Some(Bson::Array(_)) | Some(Bson::Null) | None => {
                if preserve {
                    let mut kept = document;
                    if let Some(index_field) = index_field {
                        set_path(&mut kept, index_field, Bson::Null);
                    }
                    output.push(kept);
                }
            },
            Some(_) => {
                let mut kept = document;
                if let Some(index_field) = index_field {
                    set_path(&mut kept, index_field, Bson::Null);
                }
                output.push(kept);
            },
        }
    }

    Ok(output)
}

fn lookup_stage(collections: &Collections, documents: Vec<Document>, definition: &Document) -> OdmResult<Vec<Document>> {
    let from = definition.get_str("from").map_err(|_| invalid("$lookup requires from"))?;
    let as_field = definition.get_str("as").map_err(|_| invalid("$lookup requires as"))?;

    if definition.contains_key("let") {
        return Err(unsupported("$lookup option", "let"));
    }

    let keys = match (definition.get_str("localField"), definition.get_str("foreignField")) {
        (Ok(local), Ok(foreign)) => Some((local, foreign)),
        (Err(_), Err(_)) => None,
        _ => return Err(invalid("$lookup requires both localField and foreignField")),
    };
    let sub_pipeline = match definition.get("pipeline") {
        Some(Bson::Array(stages)) => Some(
            stages
                .iter()
                .map(|stage| named(stage, "$lookup pipeline").cloned())
                .collect::<OdmResult<Vec<_>>>()?,
        ),
        Some(_) => return Err(invalid("$lookup pipeline must be an array")),
        None => None,
    };

    if keys.is_none() && sub_pipeline.is_none() {
        return Err(invalid("$lookup requires localField/foreignField or a pipeline"));
    }

    let foreign = collections.get(from).cloned().unwrap_or_default();
    let null = Bson::Null;
    let mut output = Vec::with_capacity(documents.len());

    for mut document in documents {
        let mut joined = match keys {
            Some((local, foreign_field)) => {
                let local_value = lookup(&document, local).cloned().unwrap_or(Bson::Null);

                foreign
                    .iter()
                    .filter(|candidate| {
                        let foreign_value = lookup(candidate, foreign_field).unwrap_or(&null);
                        join_match(&local_value, foreign_value)
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            },
            None => foreign.clone(),
        };

        if let Some(stages) = &sub_pipeline {
            joined = run_pipeline(collections, joined, stages)?;
        }

        set_path(
            &mut document,
            as_field,
            Bson::Array(joined.into_iter().map(Bson::Document).collect()),
        );
        output.push(document);
    }

    Ok(output)
}

fn join_match(local: &Bson, foreign: &Bson) -> bool {
    let candidates = |value: &Bson| match value {
        Bson::Array(items) => items.clone(),
        value => vec![value.clone()],
    };

    candidates(local)
        .iter()
        .any(|left| candidates(foreign).iter().any(|right| values_equal(left, right)))
}
