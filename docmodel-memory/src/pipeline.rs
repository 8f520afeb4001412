//! Aggregation pipeline execution over in-memory collections.

use bson::{Bson, Document, doc};
use indexmap::IndexMap;
use std::cmp::Ordering;

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    value::{as_f64, compare_values, get_path, remove_path, resolve_path, set_path, values_equal},
};

use crate::{
    evaluator::DocumentEvaluator,
    expr::{combine, evaluate},
};

/// Runs pipelines with read access to every collection, for `$lookup`.
pub(crate) struct PipelineRunner<'a> {
    collections: &'a dyn Fn(&str) -> Vec<Document>,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(collections: &'a dyn Fn(&str) -> Vec<Document>) -> Self {
        Self { collections }
    }

    pub fn run(&self, mut documents: Vec<Document>, pipeline: &[Document]) -> DocumentStoreResult<Vec<Document>> {
        for stage in pipeline {
            let mut entries = stage.iter();
            let (name, spec) = match (entries.next(), entries.next()) {
                (Some(entry), None) => entry,
                _ => {
                    return Err(DocumentStoreError::InvalidDocument(
                        "a pipeline stage must have exactly one field".to_string(),
                    ));
                },
            };

            documents = match name.as_str() {
                "$match" => DocumentEvaluator::filter_documents(&documents, as_document(name, spec)?)?,
                "$group" => group(documents, as_document(name, spec)?)?,
                "$sort" => sort(documents, as_document(name, spec)?),
                "$project" => documents
                    .iter()
                    .map(|document| project(document, as_document(name, spec)?))
                    .collect::<DocumentStoreResult<_>>()?,
                "$lookup" => self.lookup(documents, as_document(name, spec)?)?,
                "$unwind" => unwind(documents, spec)?,
                "$addFields" | "$set" => add_fields(documents, as_document(name, spec)?)?,
                "$unset" => unset(documents, spec)?,
                "$replaceRoot" => {
                    let root = as_document(name, spec)?
                        .get("newRoot")
                        .ok_or_else(|| DocumentStoreError::InvalidDocument("$replaceRoot requires newRoot".to_string()))?;
                    replace_root(documents, root)?
                },
                "$replaceWith" => replace_root(documents, spec)?,
                "$facet" => vec![self.facet(documents, as_document(name, spec)?)?],
                "$count" => match spec {
                    Bson::String(field) if !documents.is_empty() => {
                        let mut counted = Document::new();
                        counted.insert(field.clone(), documents.len() as i32);
                        vec![counted]
                    },
                    Bson::String(_) => Vec::new(),
                    _ => return Err(DocumentStoreError::InvalidDocument("$count expects a field name".to_string())),
                },
                "$limit" => {
                    let limit = as_count(name, spec)?;
                    documents.truncate(limit);
                    documents
                },
                "$skip" => {
                    let skip = as_count(name, spec)?;
                    documents.into_iter().skip(skip).collect()
                },
                other => {
                    return Err(DocumentStoreError::Backend(format!(
                        "unsupported aggregation stage {} for the in-memory store",
                        other,
                    )));
                },
            };
        }

        Ok(documents)
    }

    fn lookup(&self, documents: Vec<Document>, spec: &Document) -> DocumentStoreResult<Vec<Document>> {
        let text = |key: &str| {
            spec.get_str(key)
                .map_err(|_| DocumentStoreError::InvalidDocument(format!("$lookup requires {}", key)))
        };
        let (from, local_field, foreign_field, as_field) = (text("from")?, text("localField")?, text("foreignField")?, text("as")?);
        let foreign = (self.collections)(from);

        Ok(documents
            .into_iter()
            .map(|mut document| {
                let local = flatten(resolve_path(&document, local_field));
                let joined = foreign
                    .iter()
                    .filter(|candidate| {
                        let values = flatten(resolve_path(candidate, foreign_field));
                        values
                            .iter()
                            .any(|value| local.iter().any(|l| values_equal(l, value)))
                    })
                    .cloned()
                    .map(Bson::Document)
                    .collect::<Vec<_>>();

                set_path(&mut document, as_field, Bson::Array(joined));
                document
            })
            .collect())
    }

    fn facet(&self, documents: Vec<Document>, spec: &Document) -> DocumentStoreResult<Document> {
        let mut out = Document::new();

        for (name, stages) in spec {
            let Bson::Array(stages) = stages else {
                return Err(DocumentStoreError::InvalidDocument(format!("$facet {} expects a pipeline", name)));
            };
            let stages = stages
                .iter()
                .map(|stage| as_document("$facet", stage).cloned())
                .collect::<DocumentStoreResult<Vec<_>>>()?;

            let results = self.run(documents.clone(), &stages)?;
            out.insert(name.clone(), results.into_iter().map(Bson::Document).collect::<Vec<_>>());
        }

        Ok(out)
    }
}

fn as_document<'b>(stage: &str, spec: &'b Bson) -> DocumentStoreResult<&'b Document> {
    match spec {
        Bson::Document(document) => Ok(document),
        _ => Err(DocumentStoreError::InvalidDocument(format!("{} expects a document", stage))),
    }
}

fn as_count(stage: &str, spec: &Bson) -> DocumentStoreResult<usize> {
    match as_f64(spec) {
        Some(n) if n >= 0.0 => Ok(n as usize),
        _ => Err(DocumentStoreError::InvalidDocument(format!("{} expects a non-negative number", stage))),
    }
}

/// Missing values join as null; array values join by element.
fn flatten(values: Vec<Bson>) -> Vec<Bson> {
    if values.is_empty() {
        return vec![Bson::Null];
    }

    values
        .into_iter()
        .flat_map(|value| match value {
            Bson::Array(items) => items,
            other => vec![other],
        })
        .collect()
}

fn sort(mut documents: Vec<Document>, spec: &Document) -> Vec<Document> {
    let keys = spec
        .iter()
        .map(|(path, direction)| (path.clone(), as_f64(direction).unwrap_or(1.0) < 0.0))
        .collect::<Vec<_>>();

    documents.sort_by(|a, b| compare_by_keys(a, b, &keys));
    documents
}

pub(crate) fn compare_by_keys(a: &Document, b: &Document, keys: &[(String, bool)]) -> Ordering {
    for (path, descending) in keys {
        let left = get_path(a, path).cloned().unwrap_or(Bson::Null);
        let right = get_path(b, path).cloned().unwrap_or(Bson::Null);
        let ordering = compare_values(&left, &right);

        if ordering != Ordering::Equal {
            return if *descending { ordering.reverse() } else { ordering };
        }
    }

    Ordering::Equal
}

pub(crate) fn project(document: &Document, spec: &Document) -> DocumentStoreResult<Document> {
    let flag = |value: &Bson| match value {
        Bson::Boolean(b) => Some(*b),
        other => as_f64(other).map(|n| n != 0.0),
    };
    let id_flag = spec.get("_id").and_then(flag);
    let others = spec
        .iter()
        .filter(|(key, _)| key.as_str() != "_id")
        .collect::<Vec<_>>();
    let excluding = if others.is_empty() {
        id_flag == Some(false)
    } else {
        others.iter().all(|(_, value)| flag(value) == Some(false))
    };

    if excluding {
        let mut out = document.clone();
        for (path, _) in spec {
            remove_path(&mut out, path);
        }
        return Ok(out);
    }

    let mut out = Document::new();
    if id_flag != Some(false) {
        if let Some(id) = document.get("_id") {
            out.insert("_id", id.clone());
        }
    }

    for (path, value) in spec {
        if path == "_id" && flag(value).is_some() {
            continue;
        }

        match flag(value) {
            Some(true) => {
                if let Some(found) = get_path(document, path) {
                    set_path(&mut out, path, found.clone());
                }
            },
            Some(false) => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "cannot exclude {} in an inclusion projection",
                    path,
                )));
            },
            None => set_path(&mut out, path, evaluate(value, document)?),
        }
    }

    Ok(out)
}

fn unwind(documents: Vec<Document>, spec: &Bson) -> DocumentStoreResult<Vec<Document>> {
    let (path, preserve) = match spec {
        Bson::String(path) => (path.clone(), false),
        Bson::Document(options) => (
            options
                .get_str("path")
                .map_err(|_| DocumentStoreError::InvalidDocument("$unwind requires a path".to_string()))?
                .to_string(),
            options.get_bool("preserveNullAndEmptyArrays").unwrap_or(false),
        ),
        _ => return Err(DocumentStoreError::InvalidDocument("$unwind expects a path".to_string())),
    };
    let path = path.trim_start_matches('$').to_string();
    let mut out = Vec::new();

    for document in documents {
        match get_path(&document, &path).cloned() {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut unwound = document.clone();
                    set_path(&mut unwound, &path, item);
                    out.push(unwound);
                }
            },
            Some(Bson::Array(_)) => {
                if preserve {
                    let mut kept = document;
                    remove_path(&mut kept, &path);
                    out.push(kept);
                }
            },
            None | Some(Bson::Null) => {
                if preserve {
                    out.push(document);
                }
            },
            Some(_) => out.push(document),
        }
    }

    Ok(out)
}

fn add_fields(documents: Vec<Document>, spec: &Document) -> DocumentStoreResult<Vec<Document>> {
    documents
        .into_iter()
        .map(|mut document| {
            let root = document.clone();
            for (path, expression) in spec {
                set_path(&mut document, path, evaluate(expression, &root)?);
            }
            Ok(document)
        })
        .collect()
}

fn unset(documents: Vec<Document>, spec: &Bson) -> DocumentStoreResult<Vec<Document>> {
    let paths = match spec {
        Bson::String(path) => vec![path.clone()],
        Bson::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => return Err(DocumentStoreError::InvalidDocument("$unset expects field names".to_string())),
    };

    Ok(documents
        .into_iter()
        .map(|mut document| {
            for path in &paths {
                remove_path(&mut document, path);
            }
            document
        })
        .collect())
}

fn replace_root(documents: Vec<Document>, root: &Bson) -> DocumentStoreResult<Vec<Document>> {
    documents
        .iter()
        .map(|document| match evaluate(root, document)? {
            Bson::Document(replacement) => Ok(replacement),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "newRoot must evaluate to a document, got {}",
                docmodel_core::value::type_name(&other),
            ))),
        })
        .collect()
}

enum Accumulator {
    Sum(Bson),
    Avg { total: f64, count: usize },
    Min(Option<Bson>),
    Max(Option<Bson>),
    Push(Vec<Bson>),
    AddToSet(Vec<Bson>),
    First(Option<Bson>),
    Last(Bson),
    Count(usize),
}

impl Accumulator {
    fn new(op: &str) -> DocumentStoreResult<Self> {
        Ok(match op {
            "$sum" => Accumulator::Sum(Bson::Int32(0)),
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$push" => Accumulator::Push(Vec::new()),
            "$addToSet" => Accumulator::AddToSet(Vec::new()),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Bson::Null),
            "$count" => Accumulator::Count(0),
            other => {
                return Err(DocumentStoreError::Backend(format!("unsupported accumulator {}", other)));
            },
        })
    }

    fn add(&mut self, value: Bson) {
        match self {
            Accumulator::Sum(total) => {
                if as_f64(&value).is_some() {
                    *total = combine(total, &value, &|a: i64, b: i64| a.checked_add(b), &|a: f64, b: f64| a + b);
                }
            },
            Accumulator::Avg { total, count } => {
                if let Some(n) = as_f64(&value) {
                    *total += n;
                    *count += 1;
                }
            },
            Accumulator::Min(current) => {
                if !matches!(value, Bson::Null) && current.as_ref().is_none_or(|c| compare_values(&value, c).is_lt()) {
                    *current = Some(value);
                }
            },
            Accumulator::Max(current) => {
                if !matches!(value, Bson::Null) && current.as_ref().is_none_or(|c| compare_values(&value, c).is_gt()) {
                    *current = Some(value);
                }
            },
            Accumulator::Push(items) => items.push(value),
            Accumulator::AddToSet(items) => {
                if !items.iter().any(|item| values_equal(item, &value)) {
                    items.push(value);
                }
            },
            Accumulator::First(first) => {
                if first.is_none() {
                    *first = Some(value);
                }
            },
            Accumulator::Last(last) => *last = value,
            Accumulator::Count(count) => *count += 1,
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum(total) => total,
            Accumulator::Avg { count: 0, .. } => Bson::Null,
            Accumulator::Avg { total, count } => Bson::Double(total / count as f64),
            Accumulator::Min(value) | Accumulator::Max(value) | Accumulator::First(value) => value.unwrap_or(Bson::Null),
            Accumulator::Push(items) | Accumulator::AddToSet(items) => Bson::Array(items),
            Accumulator::Last(value) => value,
            Accumulator::Count(count) => Bson::Int32(count as i32),
        }
    }
}

/// Groups in first-seen key order.
fn group(documents: Vec<Document>, spec: &Document) -> DocumentStoreResult<Vec<Document>> {
    let key_expression = spec
        .get("_id")
        .ok_or_else(|| DocumentStoreError::InvalidDocument("$group requires an _id".to_string()))?;

    let mut outputs = IndexMap::new();
    for (field, accumulator) in spec {
        if field == "_id" {
            continue;
        }
        let Bson::Document(accumulator) = accumulator else {
            return Err(DocumentStoreError::InvalidDocument(format!("$group field {} needs an accumulator", field)));
        };
        let Some((op, expression)) = accumulator.iter().next() else {
            return Err(DocumentStoreError::InvalidDocument(format!("$group field {} needs an accumulator", field)));
        };
        outputs.insert(field.clone(), (op.clone(), expression.clone()));
    }

    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();

    for document in &documents {
        let key = evaluate(key_expression, document)?;
        let index = match groups.iter().position(|(existing, _)| values_equal(existing, &key)) {
            Some(index) => index,
            None => {
                let accumulators = outputs
                    .values()
                    .map(|(op, _)| Accumulator::new(op))
                    .collect::<DocumentStoreResult<Vec<_>>>()?;
                groups.push((key, accumulators));
                groups.len() - 1
            },
        };

        for ((_, (_, expression)), accumulator) in outputs.iter().zip(groups[index].1.iter_mut()) {
            accumulator.add(evaluate(expression, document)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accumulators)| {
            let mut out = doc! { "_id": key };
            for (field, accumulator) in outputs.keys().zip(accumulators) {
                out.insert(field.clone(), accumulator.finish());
            }
            out
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(documents: Vec<Document>, pipeline: Vec<Document>) -> Vec<Document> {
        let empty = |_: &str| -> Vec<Document> { Vec::new() };
        PipelineRunner::new(&empty)
            .run(documents, &pipeline)
            .unwrap()
    }

    #[test]
    fn group_sums_products_and_sorts() {
        let orders = vec![
            doc! { "product": "Laptop", "quantity": 2, "price": 1000 },
            doc! { "product": "Phone", "quantity": 3, "price": 500 },
            doc! { "product": "Tablet", "quantity": 1, "price": 300 },
        ];

        let results = run(orders, vec![
            doc! { "$group": { "_id": "$product", "total": { "$sum": { "$multiply": ["$quantity", "$price"] } } } },
            doc! { "$sort": { "total": -1 } },
        ]);

        assert_eq!(results, vec![
            doc! { "_id": "Laptop", "total": 2000 },
            doc! { "_id": "Phone", "total": 1500 },
            doc! { "_id": "Tablet", "total": 300 },
        ]);
    }

    #[test]
    fn unwind_preserving_keeps_unmatched() {
        let results = run(
            vec![doc! { "_id": 1, "a": [1, 2] }, doc! { "_id": 2, "a": [] }, doc! { "_id": 3 }],
            vec![doc! { "$unwind": { "path": "$a", "preserveNullAndEmptyArrays": true } }],
        );

        assert_eq!(results, vec![
            doc! { "_id": 1, "a": 1 },
            doc! { "_id": 1, "a": 2 },
            doc! { "_id": 2 },
            doc! { "_id": 3 },
        ]);
    }

    #[test]
    fn lookup_joins_by_value() {
        let posts = vec![
            doc! { "_id": 10, "authorId": 1 },
            doc! { "_id": 11, "authorId": 2 },
            doc! { "_id": 12, "authorId": 1 },
        ];
        let collections = move |name: &str| if name == "posts" { posts.clone() } else { Vec::new() };

        let results = PipelineRunner::new(&collections)
            .run(vec![doc! { "_id": 1 }], &[doc! {
                "$lookup": { "from": "posts", "localField": "_id", "foreignField": "authorId", "as": "posts" },
            }])
            .unwrap();

        let joined = results[0].get_array("posts").unwrap();
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn projection_modes_and_facets() {
        let document = doc! { "_id": 1, "name": "a", "secret": "s", "n": 2 };

        assert_eq!(project(&document, &doc! { "secret": 0 }).unwrap(), doc! { "_id": 1, "name": "a", "n": 2 });
        assert_eq!(project(&document, &doc! { "name": 1, "_id": 0 }).unwrap(), doc! { "name": "a" });
        assert_eq!(
            project(&document, &doc! { "double": { "$multiply": ["$n", 2] } }).unwrap(),
            doc! { "_id": 1, "double": 4 },
        );

        let results = run(vec![document.clone(), document], vec![doc! {
            "$facet": { "total": [{ "$count": "n" }], "first": [{ "$limit": 1 }, { "$project": { "name": 1 } }] },
        }]);
        assert_eq!(results[0].get_array("total").unwrap()[0], Bson::Document(doc! { "n": 2 }));
    }

    #[test]
    fn unsupported_stages_fail() {
        let empty = |_: &str| -> Vec<Document> { Vec::new() };
        let result = PipelineRunner::new(&empty).run(vec![doc! {}], &[doc! { "$graphLookup": {} }]);

        assert!(matches!(result, Err(DocumentStoreError::Backend(_))));
    }
}
