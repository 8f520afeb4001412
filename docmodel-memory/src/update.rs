//! Update document application.

use bson::{Bson, Document};

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    value::{get_path, remove_path, set_path},
};

use crate::{evaluator::is_operator_document, expr::combine};

/// Applies `update` to `document`.
///
/// An update made of operators (`$set`, `$unset`, `$inc`, `$push`, `$setOnInsert`) modifies the
/// document in place; any other update replaces it, keeping its `_id`. `$setOnInsert` only
/// applies when `inserting` is set.
pub(crate) fn apply_update(document: &mut Document, update: &Document, inserting: bool) -> DocumentStoreResult<()> {
    if !is_operator_document(update) {
        let id = document.get("_id").cloned();
        *document = update.clone();
        if let Some(id) = id {
            document.insert("_id", id);
        }
        return Ok(());
    }

    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(DocumentStoreError::InvalidDocument(format!("{} expects a document", op)));
        };

        match op.as_str() {
            "$set" => fields
                .iter()
                .for_each(|(path, value)| set_path(document, path, value.clone())),
            "$setOnInsert" => {
                if inserting {
                    fields
                        .iter()
                        .for_each(|(path, value)| set_path(document, path, value.clone()));
                }
            },
            "$unset" => fields.keys().for_each(|path| {
                remove_path(document, path);
            }),
            "$inc" => {
                for (path, amount) in fields {
                    let current = get_path(document, path)
                        .cloned()
                        .unwrap_or(Bson::Int32(0));
                    let next = combine(&current, amount, &|a: i64, b: i64| a.checked_add(b), &|a: f64, b: f64| a + b);
                    if matches!(next, Bson::Null) {
                        return Err(DocumentStoreError::InvalidDocument(format!(
                            "cannot apply $inc to non-numeric field {}",
                            path,
                        )));
                    }
                    set_path(document, path, next);
                }
            },
            "$push" => {
                for (path, value) in fields {
                    let additions = match value {
                        Bson::Document(each) if each.contains_key("$each") => match each.get("$each") {
                            Some(Bson::Array(items)) => items.clone(),
                            _ => return Err(DocumentStoreError::InvalidDocument("$each expects an array".to_string())),
                        },
                        single => vec![single.clone()],
                    };

                    let mut items = match get_path(document, path) {
                        None | Some(Bson::Null) => Vec::new(),
                        Some(Bson::Array(items)) => items.clone(),
                        Some(_) => {
                            return Err(DocumentStoreError::InvalidDocument(format!(
                                "cannot $push to non-array field {}",
                                path,
                            )));
                        },
                    };
                    items.extend(additions);
                    set_path(document, path, Bson::Array(items));
                }
            },
            other => {
                return Err(DocumentStoreError::Backend(format!(
                    "unsupported update operator {} for the in-memory store",
                    other,
                )));
            },
        }
    }

    Ok(())
}

/// The document an upsert starts from: the plain equality conditions of the filter.
pub(crate) fn upsert_seed(filter: &Document) -> Document {
    let mut seed = Document::new();

    for (path, condition) in filter {
        if path.starts_with('$') {
            continue;
        }

        match condition {
            Bson::Document(operators) if is_operator_document(operators) => {
                if let Some(value) = operators.get("$eq") {
                    set_path(&mut seed, path, value.clone());
                }
            },
            value => set_path(&mut seed, path, value.clone()),
        }
    }

    seed
}
