//! Store-side schema enforcement.
//!
//! The [`SchemaEnforcer`] derives a `$jsonSchema` validator and an index list from a model's
//! field registry and pushes both to the model's collection. Synchronization is idempotent and
//! runs in a fixed order: ensure the collection exists, install the validator, create indexes.

use bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    error::DocumentStoreResult,
    field::{FieldDescriptor, FieldKind, FieldRegistry, FieldType},
    model::Model,
    options::DocumentStoreOptions,
    value::as_f64,
};

/// An index to create on a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Index keys, e.g. `{"email": 1}`.
    pub keys: Document,
    pub unique: bool,
    pub name: Option<String>,
}

impl IndexSpec {
    pub fn new(keys: Document) -> Self {
        Self {
            keys,
            unique: false,
            name: None,
        }
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The explicit name, or the store's default `<field>_<direction>` naming.
    pub fn index_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.keys
                .iter()
                .map(|(k, v)| format!("{}_{}", k, v))
                .collect::<Vec<_>>()
                .join("_"),
        }
    }
}

/// How strictly the store applies the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    Off,
    #[default]
    Strict,
    /// Only validate inserts and updates to documents that are already valid.
    Moderate,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Off => "off",
            ValidationLevel::Strict => "strict",
            ValidationLevel::Moderate => "moderate",
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the store does with a document that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationAction {
    #[default]
    Error,
    Warn,
}

impl ValidationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationAction::Error => "error",
            ValidationAction::Warn => "warn",
        }
    }
}

impl fmt::Display for ValidationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SchemaEnforcer;

impl SchemaEnforcer {
    /// Builds `{"$jsonSchema": {...}}` for a field registry.
    pub fn validator(fields: &FieldRegistry) -> Document {
        doc! { "$jsonSchema": Self::json_schema(fields) }
    }

    /// Builds the object schema of a field registry, keyed by storage names.
    ///
    /// Untyped fields are declared as `string`. Nullable fields accept `null` in both their type
    /// and their enum. Computed bounds are left to the engine's own validation.
    pub fn json_schema(fields: &FieldRegistry) -> Document {
        let mut required = Vec::new();
        let mut properties = Document::new();

        for descriptor in fields.iter() {
            if descriptor.is_virtual() {
                continue;
            }

            if descriptor.required {
                required.push(Bson::String(descriptor.storage_name().to_string()));
            }

            properties.insert(descriptor.storage_name(), Self::property(descriptor));
        }

        let mut schema = doc! { "bsonType": "object" };

        if !required.is_empty() {
            schema.insert("required", required);
        }
        schema.insert("properties", properties);

        schema
    }

    fn property(descriptor: &FieldDescriptor) -> Document {
        let mut property = match descriptor.children() {
            Some(children) => Self::json_schema(children),
            None => Document::new(),
        };

        let bson_type = descriptor.bson_type();
        if descriptor.nullable {
            property.insert("bsonType", vec![bson_type, "null"]);
        } else {
            property.insert("bsonType", bson_type);
        }

        if !descriptor.one_of.is_empty() {
            let mut values = descriptor.one_of.clone();
            if descriptor.nullable {
                values.push(Bson::Null);
            }
            property.insert("enum", values);
        }

        let (min_key, max_key) = match descriptor.field_type {
            Some(FieldType::Number) => ("minimum", "maximum"),
            Some(FieldType::String) => ("minLength", "maxLength"),
            Some(FieldType::Array) => ("minItems", "maxItems"),
            _ => ("", ""),
        };

        if !min_key.is_empty() {
            if let Some(min) = descriptor.min.as_ref().and_then(|b| b.constant()) {
                property.insert(min_key, Self::bound(descriptor, min));
            }
            if let Some(max) = descriptor.max.as_ref().and_then(|b| b.constant()) {
                property.insert(max_key, Self::bound(descriptor, max));
            }
        }

        if let Some(pattern) = &descriptor.pattern {
            property.insert("pattern", pattern.as_str());
        }

        if let FieldKind::File = descriptor.kind {
            property.insert("required", vec!["id", "filename"]);
        }

        if descriptor.immutable.is_some() {
            property.insert("description", "immutable");
        }

        property
    }

    // Length keywords only take non-negative integers.
    fn bound(descriptor: &FieldDescriptor, value: &Bson) -> Bson {
        match descriptor.field_type {
            Some(FieldType::String) | Some(FieldType::Array) => as_f64(value)
                .map(|v| Bson::Int64(v.max(0.0) as i64))
                .unwrap_or_else(|| value.clone()),
            _ => value.clone(),
        }
    }

    /// Pushes the model's collection, validator and indexes to the backend.
    pub async fn sync<B: StoreBackend>(
        backend: &B,
        model: &Model,
        options: &DocumentStoreOptions,
    ) -> DocumentStoreResult<()> {
        let collection = model.collection();

        if backend.list_collections(Some(collection)).await?.is_empty() {
            debug!(target: "docmodel::schema", collection = %collection, "Creating collection");
            backend.create_collection(collection).await?;
        }

        backend
            .modify_schema(
                collection,
                Self::validator(model.fields()),
                options.validation_level,
                options.validation_action,
            )
            .await?;

        let indexes = model.indexes();
        if !indexes.is_empty() {
            backend.create_indexes(collection, indexes).await?;
        }

        debug!(target: "docmodel::schema", collection = %collection, "Schema synchronized");

        Ok(())
    }
}
