//! Filter evaluation for in-memory documents.
//!
//! Evaluates store-native filter documents (`{"age": {"$gte": 18}}`, `{"$or": [...]}`) against
//! BSON documents with the store's matching rules:
//!
//! - a condition on an array field matches when the array itself or any element matches,
//! - equality with null also matches a missing field,
//! - range operators only compare values of the same type bracket.

use bson::{Bson, Document};
use regex::RegexBuilder;

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    value::{as_f64, compare_values, resolve_path, values_equal},
};

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&self, filter: &Document) -> DocumentStoreResult<bool> {
        for (key, condition) in filter {
            if !self.evaluate_entry(key, condition)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Keeps the documents matching `filter`, in their original order.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    fn evaluate_entry(&self, key: &str, condition: &Bson) -> DocumentStoreResult<bool> {
        match key {
            "$and" => {
                for branch in branches(key, condition)? {
                    if !self.evaluate(branch)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            },
            "$or" => {
                for branch in branches(key, condition)? {
                    if self.evaluate(branch)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            },
            "$nor" => {
                for branch in branches(key, condition)? {
                    if self.evaluate(branch)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            },
            "$text" => self.evaluate_text(condition),
            op if op.starts_with('$') => Err(unsupported(op)),
            path => {
                let values = resolve_path(self.document, path);

                match condition {
                    Bson::Document(operators) if is_operator_document(operators) => {
                        evaluate_operators(&values, operators)
                    },
                    expected => Ok(matches_equal(&values, expected)),
                }
            },
        }
    }

    /// Case-insensitive match of any search term against any string in the document.
    fn evaluate_text(&self, condition: &Bson) -> DocumentStoreResult<bool> {
        let search = match condition {
            Bson::Document(text) => text.get_str("$search").map_err(|_| {
                DocumentStoreError::InvalidDocument("$text requires a $search string".to_string())
            })?,
            _ => return Err(DocumentStoreError::InvalidDocument("$text expects a document".to_string())),
        };
        let terms = search
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>();

        let mut strings = Vec::new();
        collect_strings(&Bson::Document(self.document.clone()), &mut strings);

        Ok(strings.iter().any(|text| {
            let text = text.to_lowercase();
            terms.iter().any(|term| text.contains(term.as_str()))
        }))
    }
}

fn branches<'b>(key: &str, condition: &'b Bson) -> DocumentStoreResult<Vec<&'b Document>> {
    let Bson::Array(items) = condition else {
        return Err(DocumentStoreError::InvalidDocument(format!("{} expects an array", key)));
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(branch) => Ok(branch),
            _ => Err(DocumentStoreError::InvalidDocument(format!("{} entries must be documents", key))),
        })
        .collect()
}

fn collect_strings(value: &Bson, out: &mut Vec<String>) {
    match value {
        Bson::String(s) => out.push(s.clone()),
        Bson::Document(doc) => doc.values().for_each(|v| collect_strings(v, out)),
        Bson::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        _ => {},
    }
}

pub(crate) fn is_operator_document(document: &Document) -> bool {
    document
        .keys()
        .next()
        .is_some_and(|key| key.starts_with('$'))
}

fn unsupported(op: &str) -> DocumentStoreError {
    DocumentStoreError::Backend(format!("unsupported query operator {}", op))
}

/// The values a condition is tested against: each resolved value and, for arrays, its elements.
fn candidates(values: &[Bson]) -> Vec<&Bson> {
    let mut out = Vec::new();

    for value in values {
        out.push(value);
        if let Bson::Array(items) = value {
            out.extend(items.iter());
        }
    }

    out
}

fn matches_equal(values: &[Bson], expected: &Bson) -> bool {
    if values.is_empty() {
        return matches!(expected, Bson::Null);
    }

    candidates(values)
        .into_iter()
        .any(|value| values_equal(value, expected))
}

fn same_bracket(left: &Bson, right: &Bson) -> bool {
    match (as_f64(left), as_f64(right)) {
        (Some(_), Some(_)) => true,
        (None, None) => std::mem::discriminant(left) == std::mem::discriminant(right),
        _ => false,
    }
}

fn matches_range(values: &[Bson], bound: &Bson, accept: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    candidates(values)
        .into_iter()
        .any(|value| same_bracket(value, bound) && accept(compare_values(value, bound)))
}

fn list<'b>(op: &str, value: &'b Bson) -> DocumentStoreResult<&'b Vec<Bson>> {
    match value {
        Bson::Array(items) => Ok(items),
        _ => Err(DocumentStoreError::InvalidDocument(format!("{} expects an array", op))),
    }
}

fn evaluate_operators(values: &[Bson], operators: &Document) -> DocumentStoreResult<bool> {
    for (op, argument) in operators {
        let matched = match op.as_str() {
            "$eq" => matches_equal(values, argument),
            "$ne" => !matches_equal(values, argument),
            "$gt" => matches_range(values, argument, |o| o.is_gt()),
            "$gte" => matches_range(values, argument, |o| o.is_ge()),
            "$lt" => matches_range(values, argument, |o| o.is_lt()),
            "$lte" => matches_range(values, argument, |o| o.is_le()),
            "$in" => list(op, argument)?
                .iter()
                .any(|expected| matches_equal(values, expected)),
            "$nin" => !list(op, argument)?
                .iter()
                .any(|expected| matches_equal(values, expected)),
            "$exists" => {
                let wanted = match argument {
                    Bson::Boolean(b) => *b,
                    other => as_f64(other).is_some_and(|n| n != 0.0),
                };
                values.is_empty() != wanted
            },
            "$regex" => {
                let options = operators.get_str("$options").unwrap_or("");
                matches_regex(values, argument, options)?
            },
            "$options" => true,
            "$not" => match argument {
                Bson::Document(inner) => !evaluate_operators(values, inner)?,
                _ => return Err(DocumentStoreError::InvalidDocument("$not expects an operator document".to_string())),
            },
            "$size" => {
                let size = as_f64(argument).unwrap_or(-1.0);
                values
                    .iter()
                    .any(|value| matches!(value, Bson::Array(items) if items.len() as f64 == size))
            },
            "$all" => {
                let required = list(op, argument)?;
                values.iter().any(|value| match value {
                    Bson::Array(items) => required
                        .iter()
                        .all(|r| items.iter().any(|item| values_equal(item, r))),
                    _ => false,
                })
            },
            "$elemMatch" => match argument {
                Bson::Document(filter) => {
                    let mut found = false;
                    for value in values {
                        if let Bson::Array(items) = value {
                            for item in items {
                                found |= match item {
                                    Bson::Document(element) if !is_operator_document(filter) => {
                                        DocumentEvaluator::new(element).evaluate(filter)?
                                    },
                                    element => evaluate_operators(std::slice::from_ref(element), filter)?,
                                };
                            }
                        }
                    }
                    found
                },
                _ => return Err(DocumentStoreError::InvalidDocument("$elemMatch expects a document".to_string())),
            },
            other => return Err(unsupported(other)),
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn matches_regex(values: &[Bson], pattern: &Bson, options: &str) -> DocumentStoreResult<bool> {
    let Bson::String(pattern) = pattern else {
        return Err(DocumentStoreError::InvalidDocument("$regex expects a string pattern".to_string()));
    };

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| DocumentStoreError::InvalidDocument(format!("invalid regular expression: {}", e)))?;

    Ok(candidates(values)
        .into_iter()
        .any(|value| matches!(value, Bson::String(s) if regex.is_match(s))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn matches(document: Document, filter: Document) -> bool {
        DocumentEvaluator::new(&document).evaluate(&filter).unwrap()
    }

    #[test]
    fn equality_matches_array_elements_and_missing_as_null() {
        assert!(matches(doc! { "tags": ["a", "b"] }, doc! { "tags": "b" }));
        assert!(matches(doc! { "name": "x" }, doc! { "email": Bson::Null }));
        assert!(!matches(doc! { "email": "e" }, doc! { "email": Bson::Null }));
    }

    #[test]
    fn range_operators_stay_within_type_bracket() {
        assert!(matches(doc! { "age": 30 }, doc! { "age": { "$gte": 18, "$lt": 65.5 } }));
        assert!(!matches(doc! { "age": "30" }, doc! { "age": { "$gt": 1 } }));
    }

    #[test]
    fn logical_operators_combine() {
        let document = doc! { "status": "active", "role": "admin" };

        assert!(matches(document.clone(), doc! { "$or": [{ "status": "banned" }, { "role": "admin" }] }));
        assert!(!matches(document.clone(), doc! { "$nor": [{ "role": "admin" }] }));
        assert!(matches(document, doc! { "status": { "$not": { "$in": ["banned", "locked"] } } }));
    }

    #[test]
    fn regex_exists_and_text() {
        let document = doc! { "name": "Alice Smith", "bio": "Rust developer" };

        assert!(matches(document.clone(), doc! { "name": { "$regex": "^alice", "$options": "i" } }));
        assert!(matches(document.clone(), doc! { "nickname": { "$exists": false } }));
        assert!(matches(document.clone(), doc! { "$text": { "$search": "python rust" } }));
        assert!(!matches(document, doc! { "$text": { "$search": "golang" } }));
    }

    #[test]
    fn unknown_operators_fail() {
        let document = doc! { "a": 1 };

        assert!(DocumentEvaluator::new(&document).evaluate(&doc! { "a": { "$near": 1 } }).is_err());
        assert!(DocumentEvaluator::new(&document).evaluate(&doc! { "$where": "true" }).is_err());
    }
}
