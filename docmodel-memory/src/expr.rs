//! Aggregation expression evaluation.
//!
//! Supports field paths (`"$price"`, `"$$ROOT"`), literals, object and array expressions and a
//! working set of operators: arithmetic, comparison, boolean, conditional, string and array
//! helpers. Integer arithmetic stays integral while the result fits.

use bson::{Bson, Document};

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    value::{as_f64, compare_values, resolve_path, values_equal},
};

pub(crate) fn evaluate(expression: &Bson, root: &Document) -> DocumentStoreResult<Bson> {
    match expression {
        Bson::String(path) if path.starts_with("$$") => variable(path, root),
        Bson::String(path) if path.starts_with('$') => Ok(field(root, &path[1..])),
        Bson::Document(document) => match operator_of(document) {
            Some((op, args)) => apply(op, args, root),
            None => {
                let mut out = Document::new();
                for (key, value) in document {
                    out.insert(key.clone(), evaluate(value, root)?);
                }
                Ok(Bson::Document(out))
            },
        },
        Bson::Array(items) => Ok(Bson::Array(
            items
                .iter()
                .map(|item| evaluate(item, root))
                .collect::<DocumentStoreResult<Vec<_>>>()?,
        )),
        literal => Ok(literal.clone()),
    }
}

/// Truthiness of an evaluated value: false, null, zero and missing are false.
pub(crate) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_f64(other).is_none_or(|n| n != 0.0),
    }
}

fn operator_of(document: &Document) -> Option<(&str, &Bson)> {
    let mut entries = document.iter();
    let (key, value) = entries.next()?;

    (key.starts_with('$') && entries.next().is_none()).then_some((key.as_str(), value))
}

fn variable(path: &str, root: &Document) -> DocumentStoreResult<Bson> {
    match path.strip_prefix("$$ROOT") {
        Some("") => Ok(Bson::Document(root.clone())),
        Some(rest) if rest.starts_with('.') => Ok(field(root, &rest[1..])),
        _ => Err(DocumentStoreError::Backend(format!("unsupported variable {}", path))),
    }
}

/// A missing path evaluates to null; a path through an array of documents yields an array.
fn field(root: &Document, path: &str) -> Bson {
    let mut values = resolve_path(root, path);

    match values.len() {
        0 => Bson::Null,
        1 if !path_crosses_array(root, path) => values.remove(0),
        _ => Bson::Array(values),
    }
}

fn path_crosses_array(root: &Document, path: &str) -> bool {
    let mut current = Bson::Document(root.clone());

    for segment in path.split('.') {
        current = match current {
            Bson::Document(mut doc) => match doc.remove(segment) {
                Some(next) => next,
                None => return false,
            },
            Bson::Array(_) => return segment.parse::<usize>().is_err(),
            _ => return false,
        };
    }

    false
}

fn arguments(args: &Bson, root: &Document) -> DocumentStoreResult<Vec<Bson>> {
    match args {
        Bson::Array(items) => items
            .iter()
            .map(|item| evaluate(item, root))
            .collect(),
        single => Ok(vec![evaluate(single, root)?]),
    }
}

fn expect_args(op: &str, values: &[Bson], count: usize) -> DocumentStoreResult<()> {
    if values.len() != count {
        return Err(DocumentStoreError::InvalidDocument(format!(
            "{} takes {} arguments, got {}",
            op,
            count,
            values.len(),
        )));
    }

    Ok(())
}

fn apply(op: &str, args: &Bson, root: &Document) -> DocumentStoreResult<Bson> {
    if op == "$literal" {
        return Ok(args.clone());
    }
    if op == "$cond" {
        return conditional(args, root);
    }

    let values = arguments(args, root)?;

    match op {
        "$add" => Ok(fold_numbers(&values, 0, |a, b| a.checked_add(b), |a, b| a + b)),
        "$multiply" => Ok(fold_numbers(&values, 1, |a, b| a.checked_mul(b), |a, b| a * b)),
        "$subtract" => {
            expect_args(op, &values, 2)?;
            let negated = match as_f64(&values[1]) {
                Some(_) => negate(&values[1]),
                None => Bson::Null,
            };
            Ok(fold_numbers(&[values[0].clone(), negated], 0, |a, b| a.checked_add(b), |a, b| a + b))
        },
        "$divide" => {
            expect_args(op, &values, 2)?;
            match (as_f64(&values[0]), as_f64(&values[1])) {
                (_, Some(d)) if d == 0.0 => Err(DocumentStoreError::Backend("can't $divide by zero".to_string())),
                (Some(n), Some(d)) => Ok(Bson::Double(n / d)),
                _ => Ok(Bson::Null),
            }
        },
        "$ifNull" => Ok(values
            .iter()
            .find(|value| !matches!(value, Bson::Null | Bson::Undefined))
            .cloned()
            .or_else(|| values.last().cloned())
            .unwrap_or(Bson::Null)),
        "$concat" => {
            let mut out = String::new();
            for value in &values {
                match value {
                    Bson::String(s) => out.push_str(s),
                    Bson::Null => return Ok(Bson::Null),
                    other => {
                        return Err(DocumentStoreError::InvalidDocument(format!(
                            "$concat only supports strings, not {}",
                            docmodel_core::value::type_name(other),
                        )));
                    },
                }
            }
            Ok(Bson::String(out))
        },
        "$toUpper" | "$toLower" => {
            expect_args(op, &values, 1)?;
            let text = match &values[0] {
                Bson::String(s) => s.clone(),
                Bson::Null => String::new(),
                other => other.to_string(),
            };
            Ok(Bson::String(if op == "$toUpper" { text.to_uppercase() } else { text.to_lowercase() }))
        },
        "$size" => {
            expect_args(op, &values, 1)?;
            match &values[0] {
                Bson::Array(items) => Ok(Bson::Int32(items.len() as i32)),
                _ => Err(DocumentStoreError::InvalidDocument("$size requires an array".to_string())),
            }
        },
        "$arrayElemAt" => {
            expect_args(op, &values, 2)?;
            match (&values[0], as_f64(&values[1])) {
                (Bson::Array(items), Some(index)) => {
                    let index = index as i64;
                    let position = if index < 0 { items.len() as i64 + index } else { index };
                    Ok(usize::try_from(position)
                        .ok()
                        .and_then(|p| items.get(p).cloned())
                        .unwrap_or(Bson::Null))
                },
                _ => Ok(Bson::Null),
            }
        },
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            expect_args(op, &values, 2)?;
            let ordering = compare_values(&values[0], &values[1]);
            Ok(Bson::Boolean(match op {
                "$eq" => values_equal(&values[0], &values[1]),
                "$ne" => !values_equal(&values[0], &values[1]),
                "$gt" => ordering.is_gt(),
                "$gte" => ordering.is_ge(),
                "$lt" => ordering.is_lt(),
                _ => ordering.is_le(),
            }))
        },
        "$and" => Ok(Bson::Boolean(values.iter().all(truthy))),
        "$or" => Ok(Bson::Boolean(values.iter().any(truthy))),
        "$not" => {
            expect_args(op, &values, 1)?;
            Ok(Bson::Boolean(!truthy(&values[0])))
        },
        other => Err(DocumentStoreError::Backend(format!("unsupported expression operator {}", other))),
    }
}

fn conditional(args: &Bson, root: &Document) -> DocumentStoreResult<Bson> {
    let (condition, then, otherwise) = match args {
        Bson::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        Bson::Document(branches) => match (branches.get("if"), branches.get("then"), branches.get("else")) {
            (Some(c), Some(t), Some(e)) => (c, t, e),
            _ => return Err(DocumentStoreError::InvalidDocument("$cond requires if, then and else".to_string())),
        },
        _ => return Err(DocumentStoreError::InvalidDocument("$cond requires three arguments".to_string())),
    };

    if truthy(&evaluate(condition, root)?) {
        evaluate(then, root)
    } else {
        evaluate(otherwise, root)
    }
}

fn negate(value: &Bson) -> Bson {
    match value {
        Bson::Int32(v) => v
            .checked_neg()
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(-(*v as i64))),
        Bson::Int64(v) => Bson::Int64(v.wrapping_neg()),
        other => as_f64(other)
            .map(|v| Bson::Double(-v))
            .unwrap_or(Bson::Null),
    }
}

/// Folds numbers, keeping 32-bit integers while they fit, then 64-bit, then doubles.
/// Any null or non-numeric operand makes the result null.
fn fold_numbers(
    values: &[Bson],
    identity: i64,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Bson {
    let mut acc = Bson::Int32(identity as i32);

    for value in values {
        acc = combine(&acc, value, &int_op, &float_op);
        if matches!(acc, Bson::Null) {
            return Bson::Null;
        }
    }

    acc
}

pub(crate) fn combine(
    left: &Bson,
    right: &Bson,
    int_op: &impl Fn(i64, i64) -> Option<i64>,
    float_op: &impl Fn(f64, f64) -> f64,
) -> Bson {
    let integral = |value: &Bson| match value {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        _ => None,
    };

    match (integral(left), integral(right)) {
        (Some(a), Some(b)) => match int_op(a, b) {
            Some(result) => {
                let wide = matches!(left, Bson::Int64(_)) || matches!(right, Bson::Int64(_));
                match i32::try_from(result) {
                    Ok(narrow) if !wide => Bson::Int32(narrow),
                    _ => Bson::Int64(result),
                }
            },
            None => Bson::Double(float_op(a as f64, b as f64)),
        },
        _ => match (as_f64(left), as_f64(right)) {
            (Some(a), Some(b)) => Bson::Double(float_op(a, b)),
            _ => Bson::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn arithmetic_keeps_integers() {
        let item = doc! { "quantity": 2, "price": 1000 };

        assert_eq!(
            evaluate(&Bson::Document(doc! { "$multiply": ["$quantity", "$price"] }), &item).unwrap(),
            Bson::Int32(2000),
        );
        assert_eq!(
            evaluate(&Bson::Document(doc! { "$add": ["$price", 0.5] }), &item).unwrap(),
            Bson::Double(1000.5),
        );
        assert_eq!(
            evaluate(&Bson::Document(doc! { "$subtract": ["$price", "$quantity"] }), &item).unwrap(),
            Bson::Int32(998),
        );
    }

    #[test]
    fn paths_variables_and_conditionals() {
        let root = doc! { "name": "ada", "tags": [{ "n": 1 }, { "n": 2 }] };

        assert_eq!(evaluate(&Bson::String("$missing".into()), &root).unwrap(), Bson::Null);
        assert_eq!(evaluate(&Bson::String("$tags.n".into()), &root).unwrap(), Bson::Array(vec![Bson::Int32(1), Bson::Int32(2)]));
        assert_eq!(evaluate(&Bson::String("$$ROOT.name".into()), &root).unwrap(), Bson::String("ada".into()));
        assert_eq!(
            evaluate(&Bson::Document(doc! { "$ifNull": ["$missing", []] }), &root).unwrap(),
            Bson::Array(Vec::new()),
        );
        assert_eq!(
            evaluate(
                &Bson::Document(doc! { "$cond": { "if": { "$gt": [{ "$size": "$tags" }, 1] }, "then": "many", "else": "few" } }),
                &root,
            )
            .unwrap(),
            Bson::String("many".into()),
        );
        assert_eq!(
            evaluate(&Bson::Document(doc! { "$toUpper": "$name" }), &root).unwrap(),
            Bson::String("ADA".into()),
        );
    }
}
