//! `$jsonSchema` validation for in-memory collections.

use bson::{Bson, Document};
use regex::Regex;
use tracing::warn;

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    schema::{ValidationAction, ValidationLevel},
    value::{as_f64, type_name, values_equal},
};

/// A collection validator installed through `modify_schema`.
#[derive(Debug, Clone)]
pub(crate) struct SchemaValidator {
    schema: Document,
    level: ValidationLevel,
    action: ValidationAction,
}

impl SchemaValidator {
    pub fn new(validator: &Document, level: ValidationLevel, action: ValidationAction) -> Self {
        let schema = match validator.get("$jsonSchema") {
            Some(Bson::Document(schema)) => schema.clone(),
            _ => validator.clone(),
        };

        Self { schema, level, action }
    }

    /// Checks a document about to be written. `previous` is the stored version for updates.
    pub fn check(&self, collection: &str, document: &Document, previous: Option<&Document>) -> DocumentStoreResult<()> {
        match self.level {
            ValidationLevel::Off => return Ok(()),
            ValidationLevel::Moderate => {
                if previous.is_some_and(|old| self.violations(old).is_some()) {
                    return Ok(());
                }
            },
            ValidationLevel::Strict => {},
        }

        let Some(reason) = self.violations(document) else {
            return Ok(());
        };

        match self.action {
            ValidationAction::Warn => {
                warn!(target: "docmodel::memory", collection = %collection, reason = %reason, "Document failed validation");
                Ok(())
            },
            ValidationAction::Error => Err(DocumentStoreError::InvalidDocument(format!(
                "Document failed validation: {}",
                reason,
            ))),
        }
    }

    fn violations(&self, document: &Document) -> Option<String> {
        check_value(&Bson::Document(document.clone()), &self.schema, "").err()
    }
}

fn matches_type(value: &Bson, expected: &str) -> bool {
    match expected {
        "number" => matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)),
        other => type_name(value) == other,
    }
}

fn location(path: &str) -> &str {
    if path.is_empty() { "document" } else { path }
}

fn check_value(value: &Bson, schema: &Document, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("bsonType") {
        let accepted = match expected {
            Bson::String(name) => matches_type(value, name),
            Bson::Array(names) => names
                .iter()
                .any(|name| matches!(name, Bson::String(name) if matches_type(value, name))),
            _ => true,
        };
        if !accepted {
            return Err(format!("{} has type {}, expected {}", location(path), type_name(value), expected));
        }
    }

    if let Ok(allowed) = schema.get_array("enum") {
        if !allowed.iter().any(|candidate| values_equal(candidate, value)) {
            return Err(format!("{} is not one of the allowed values", location(path)));
        }
    }

    let bound = |key: &str| schema.get(key).and_then(as_f64);

    if let Some(n) = as_f64(value) {
        if bound("minimum").is_some_and(|min| n < min) || bound("maximum").is_some_and(|max| n > max) {
            return Err(format!("{} is out of range", location(path)));
        }
    }

    match value {
        Bson::String(s) => {
            let length = s.chars().count() as f64;
            if bound("minLength").is_some_and(|min| length < min) || bound("maxLength").is_some_and(|max| length > max) {
                return Err(format!("{} has an invalid length", location(path)));
            }
            if let Ok(pattern) = schema.get_str("pattern") {
                let regex = Regex::new(pattern).map_err(|e| format!("invalid pattern for {}: {}", location(path), e))?;
                if !regex.is_match(s) {
                    return Err(format!("{} does not match {}", location(path), pattern));
                }
            }
        },
        Bson::Array(items) => {
            let count = items.len() as f64;
            if bound("minItems").is_some_and(|min| count < min) || bound("maxItems").is_some_and(|max| count > max) {
                return Err(format!("{} has an invalid number of items", location(path)));
            }
            if let Ok(item_schema) = schema.get_document("items") {
                for (index, item) in items.iter().enumerate() {
                    check_value(item, item_schema, &format!("{}.{}", path, index))?;
                }
            }
        },
        Bson::Document(document) => {
            if let Ok(required) = schema.get_array("required") {
                for name in required.iter().filter_map(Bson::as_str) {
                    if !document.contains_key(name) {
                        return Err(format!("{} is missing required field {}", location(path), name));
                    }
                }
            }
            if let Ok(properties) = schema.get_document("properties") {
                for (name, property) in properties {
                    if let (Some(child), Bson::Document(property)) = (document.get(name), property) {
                        let child_path = if path.is_empty() { name.clone() } else { format!("{}.{}", path, name) };
                        check_value(child, property, &child_path)?;
                    }
                }
            }
        },
        _ => {},
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn validator(level: ValidationLevel, action: ValidationAction) -> SchemaValidator {
        SchemaValidator::new(
            &doc! {
                "$jsonSchema": {
                    "bsonType": "object",
                    "required": ["name"],
                    "properties": {
                        "name": { "bsonType": "string", "minLength": 1_i64 },
                        "age": { "bsonType": ["number", "null"], "minimum": 0 },
                        "role": { "bsonType": "string", "enum": ["admin", "user"] },
                    },
                },
            },
            level,
            action,
        )
    }

    #[test]
    fn strict_validation_rejects_invalid_documents() {
        let validator = validator(ValidationLevel::Strict, ValidationAction::Error);

        assert!(validator.check("users", &doc! { "name": "a", "age": 3, "role": "user" }, None).is_ok());
        assert!(validator.check("users", &doc! { "name": "a", "age": Bson::Null }, None).is_ok());
        assert!(validator.check("users", &doc! { "age": 3 }, None).is_err());
        assert!(validator.check("users", &doc! { "name": "a", "age": -1 }, None).is_err());
        assert!(validator.check("users", &doc! { "name": "a", "role": "root" }, None).is_err());
        assert!(validator.check("users", &doc! { "name": 5 }, None).is_err());
    }

    #[test]
    fn moderate_and_warn_levels_let_documents_through() {
        let moderate = validator(ValidationLevel::Moderate, ValidationAction::Error);
        let legacy = doc! { "title": "no name" };

        assert!(moderate.check("users", &doc! { "title": "still none" }, Some(&legacy)).is_ok());
        assert!(moderate.check("users", &doc! { "title": "still none" }, None).is_err());

        let warn = validator(ValidationLevel::Strict, ValidationAction::Warn);
        assert!(warn.check("users", &doc! {}, None).is_ok());
    }
}
