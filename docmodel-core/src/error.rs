//! Error types and result types for document model operations.
//!
//! Every fallible operation in this crate returns [`DocumentStoreResult<T>`]. Validation failures
//! are collected into a single [`ValidationErrors`] value per write attempt, and failures raised by
//! hooks or by the backend are wrapped with the context of the operation that triggered them.

use bson::{Bson, Document, error::Error as BsonError};
use indexmap::IndexMap;
use serde_json::Error as SerdeJsonError;
use std::fmt;
use thiserror::Error;

use crate::hook::HookPhase;

/// Represents all possible errors that can occur when interacting with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The backend could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// A model name could not be resolved through the model registry.
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    /// The document has an invalid structure (not an object, bad identifier, ...).
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// One or more fields failed validation.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),
    /// An update attempted to change a field declared immutable.
    #[error("Field '{field}' is immutable and cannot be modified")]
    ImmutableField {
        field: String,
        document_id: Option<String>,
    },
    /// A relationship value references a document that does not exist.
    #[error("Foreign key violation on '{field}': no related document with id {value}")]
    ForeignKeyViolation { field: String, value: Bson },
    /// A unique index rejected the write.
    #[error("Duplicate key in collection {collection}: {key}")]
    DuplicateKey { collection: String, key: String },
    /// A lifecycle hook failed.
    #[error("Hook execution failed during {phase}: {source}")]
    HookExecution {
        phase: HookPhase,
        document: Document,
        #[source]
        source: Box<DocumentStoreError>,
    },
    /// A read failed, with the filter and options that were sent.
    #[error("Query execution failed: {message}")]
    QueryExecution {
        message: String,
        filter: Document,
        options: Document,
    },
    /// An aggregation failed, with the pipeline that was sent.
    #[error("Aggregation failed: {message}")]
    Aggregation {
        message: String,
        pipeline: Vec<Document>,
    },
    #[error("Count failed: {0}")]
    Count(String),
    #[error("Explain failed: {0}")]
    Explain(String),
    /// A session token was unknown or a transaction command failed.
    #[error("Session error: {0}")]
    Session(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<ValidationErrors> for DocumentStoreError {
    fn from(errors: ValidationErrors) -> Self {
        DocumentStoreError::Validation(errors)
    }
}

/// Machine-readable category of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    MissingRequired,
    NullNotAllowed,
    TypeMismatch,
    NotInEnum,
    BelowMinimum,
    AboveMaximum,
    PatternMismatch,
    Custom,
}

/// A single validation failure on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub code: ValidationCode,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Validation failures keyed by field path, in the order they were found.
///
/// Nested fields are keyed by their dotted path (`address.city`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors {
    fields: IndexMap<String, Vec<ValidationIssue>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an issue for the given field.
    pub fn add(&mut self, field: impl Into<String>, issue: ValidationIssue) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(issue);
    }

    /// Moves every issue of `other` into this set, keeping field order.
    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, issues) in other.fields {
            self.fields
                .entry(field)
                .or_default()
                .extend(issues);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns the issues recorded for a field, if any.
    pub fn field(&self, field: &str) -> Option<&[ValidationIssue]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    /// Returns `true` if the field has an issue with the given code.
    pub fn has(&self, field: &str, code: ValidationCode) -> bool {
        self.field(field)
            .map(|issues| issues.iter().any(|issue| issue.code == code))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ValidationIssue])> {
        self.fields
            .iter()
            .map(|(field, issues)| (field.as_str(), issues.as_slice()))
    }

    /// Converts to `Ok(())` when empty, otherwise to a [`DocumentStoreError::Validation`].
    pub fn into_result(self) -> DocumentStoreResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DocumentStoreError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;

        for (field, issues) in &self.fields {
            for issue in issues {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {}", field, issue.message)?;
                first = false;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_field_order_and_appends_issues() {
        let mut left = ValidationErrors::new();
        left.add("name", ValidationIssue::new(ValidationCode::MissingRequired, "name is required"));

        let mut right = ValidationErrors::new();
        right.add("age", ValidationIssue::new(ValidationCode::BelowMinimum, "age too small"));
        right.add("name", ValidationIssue::new(ValidationCode::Custom, "bad name"));

        left.merge(right);

        let fields = left.iter().map(|(f, _)| f).collect::<Vec<_>>();
        assert_eq!(fields, vec!["name", "age"]);
        assert_eq!(left.field("name").map(|i| i.len()), Some(2));
        assert!(left.has("age", ValidationCode::BelowMinimum));
        assert_eq!(left.to_string(), "name: name is required; name: bad name; age: age too small");
    }

    #[test]
    fn empty_errors_convert_to_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }
}
