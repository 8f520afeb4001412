//! Field descriptors and the per-model field registry.
//!
//! Fields are declared with the [`Field`] constructors and refined with [`FieldBuilder`]
//! methods. The resulting [`FieldDescriptor`]s are registered into a [`FieldRegistry`], which
//! applies the declaration side effects (index specs, immutability guards) and implements the
//! pure stages of the write pipeline:
//!
//! - [`FieldRegistry::validate`]: collect every constraint violation
//! - [`FieldRegistry::fill_defaults`]: fill absent fields from their defaults
//! - [`FieldRegistry::apply_transforms`]: replace present values by their transform
//! - [`FieldRegistry::to_storage`] / [`FieldRegistry::from_storage`]: alias mapping
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let email = Field::string("email")
//!     .required()
//!     .unique()
//!     .pattern(Regex::new(r"^[^@]+@[^@]+$").unwrap())
//!     .transform(|v| match v {
//!         Bson::String(s) => Bson::String(s.to_lowercase()),
//!         other => other,
//!     });
//!
//! let address = Field::nested("address")
//!     .child(Field::string("city").required())
//!     .child(Field::string("zip").alias("postal_code"));
//! ```

use bson::{Bson, Document, doc};
use indexmap::IndexMap;
use regex::Regex;
use std::{fmt, sync::Arc};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult, ValidationCode, ValidationErrors, ValidationIssue},
    hook::{Hook, HookPhase, HookRegistry},
    relationship::{RelationshipDescriptor, RelationshipKind},
    schema::IndexSpec,
    value::{as_f64, compare_values, display_id, get_path, type_name, values_equal},
};

/// Declared type of a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Array,
    Object,
    ObjectId,
}

impl FieldType {
    /// The store's schema type tag for this field type.
    pub fn bson_type(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "bool",
            FieldType::Date => "date",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::ObjectId => "objectId",
        }
    }

    /// Returns `true` if the value has this type. `Null` never matches.
    pub fn matches(&self, value: &Bson) -> bool {
        match self {
            FieldType::String => matches!(value, Bson::String(_)),
            FieldType::Number => matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)),
            FieldType::Boolean => matches!(value, Bson::Boolean(_)),
            FieldType::Date => matches!(value, Bson::DateTime(_)),
            FieldType::Array => matches!(value, Bson::Array(_)),
            FieldType::Object => matches!(value, Bson::Document(_)),
            FieldType::ObjectId => matches!(value, Bson::ObjectId(_)),
        }
    }
}

/// Value filled in when a field is absent at save time.
#[derive(Clone)]
pub enum DefaultValue {
    Value(Bson),
    /// Evaluated once per save.
    Computed(Arc<dyn Fn() -> Bson + Send + Sync>),
}

impl DefaultValue {
    pub fn resolve(&self) -> Bson {
        match self {
            DefaultValue::Value(value) => value.clone(),
            DefaultValue::Computed(f) => f(),
        }
    }
}

/// A `min` or `max` bound, either constant or computed from the document being validated.
#[derive(Clone)]
pub enum Bound {
    Value(Bson),
    Computed(Arc<dyn Fn(&Document) -> Bson + Send + Sync>),
}

impl Bound {
    pub fn resolve(&self, document: &Document) -> Bson {
        match self {
            Bound::Value(value) => value.clone(),
            Bound::Computed(f) => f(document),
        }
    }

    /// The bound's value when it does not depend on the document.
    pub fn constant(&self) -> Option<&Bson> {
        match self {
            Bound::Value(value) => Some(value),
            Bound::Computed(_) => None,
        }
    }
}

/// Whether a field may change once the document exists.
#[derive(Clone)]
pub enum Immutability {
    Always,
    /// Immutable only while the predicate holds for the document.
    When(Arc<dyn Fn(&Document) -> bool + Send + Sync>),
}

impl Immutability {
    pub fn applies(&self, document: &Document) -> bool {
        match self {
            Immutability::Always => true,
            Immutability::When(predicate) => predicate(document),
        }
    }
}

pub type Transform = Arc<dyn Fn(Bson) -> Bson + Send + Sync>;
pub type FieldValidator = Arc<dyn Fn(&Bson) -> Result<(), String> + Send + Sync>;

/// The structural role of a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Scalar,
    /// An embedded document with its own declared fields.
    Nested(FieldRegistry),
    /// A field that also declares a relationship to another model.
    Relationship(RelationshipDescriptor),
    /// A reference to a blob held in an external file store: `{id, filename, contentType, length}`.
    File,
}

/// Every constraint declared for one field.
#[derive(Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: Option<FieldType>,
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
    pub index: bool,
    pub nullable: bool,
    pub one_of: Vec<Bson>,
    pub min: Option<Bound>,
    pub max: Option<Bound>,
    pub pattern: Option<Regex>,
    pub default: Option<DefaultValue>,
    pub transform: Option<Transform>,
    pub alias: Option<String>,
    pub immutable: Option<Immutability>,
    pub validators: Vec<FieldValidator>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: Option<FieldType>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            field_type,
            kind,
            required: false,
            unique: false,
            index: false,
            nullable: false,
            one_of: Vec::new(),
            min: None,
            max: None,
            pattern: None,
            default: None,
            transform: None,
            alias: None,
            immutable: None,
            validators: Vec::new(),
        }
    }

    /// The key this field is stored under.
    pub fn storage_name(&self) -> &str {
        self.alias
            .as_deref()
            .unwrap_or(&self.name)
    }

    /// Schema type tag, `string` when no type was declared.
    pub fn bson_type(&self) -> &'static str {
        self.field_type
            .map(|t| t.bson_type())
            .unwrap_or("string")
    }

    /// Relationship fields that only exist when populated.
    ///
    /// A one-to-one relationship whose foreign key is the field itself is a stored reference;
    /// every other relationship field is virtual.
    pub fn is_virtual(&self) -> bool {
        match &self.kind {
            FieldKind::Relationship(rel) => !(rel.kind == RelationshipKind::OneToOne && rel.foreign_key == self.name),
            _ => false,
        }
    }

    pub fn children(&self) -> Option<&FieldRegistry> {
        match &self.kind {
            FieldKind::Nested(children) => Some(children),
            _ => None,
        }
    }

    fn has_default_below(&self) -> bool {
        self.children()
            .map(|children| children
                .iter()
                .any(|child| child.default.is_some() || child.has_default_below())
            )
            .unwrap_or(false)
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("unique", &self.unique)
            .field("index", &self.index)
            .field("nullable", &self.nullable)
            .field("one_of", &self.one_of)
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("alias", &self.alias)
            .field("has_default", &self.default.is_some())
            .field("has_transform", &self.transform.is_some())
            .field("immutable", &self.immutable.is_some())
            .field("validators", &self.validators.len())
            .finish()
    }
}

/// Helper struct for declaring fields.
///
/// Each constructor returns a [`FieldBuilder`] that converts into a [`FieldDescriptor`].
pub struct Field;

impl Field {
    /// A field without a declared type. Its schema type is `string`.
    pub fn untyped(name: impl Into<String>) -> FieldBuilder {
        FieldBuilder::new(FieldDescriptor::new(name, None, FieldKind::Scalar))
    }

    pub fn string(name: impl Into<String>) -> FieldBuilder {
        FieldBuilder::scalar(name, FieldType::String)
    }

    pub fn number(name: impl Into<String>) -> FieldBuilder {
        FieldBuilder::scalar(name, FieldType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> FieldBuilder {
        FieldBuilder::scalar(name, FieldType::Boolean)
    }

    pub fn date(name: impl Into<String>) -> FieldBuilder {
        FieldBuilder::scalar(name, FieldType::Date)
    }

    pub fn array(name: impl Into<String>) -> FieldBuilder {
        FieldBuilder::scalar(name, FieldType::Array)
    }

    pub fn object(name: impl Into<String>) -> FieldBuilder {
        FieldBuilder::scalar(name, FieldType::Object)
    }

    pub fn object_id(name: impl Into<String>) -> FieldBuilder {
        FieldBuilder::scalar(name, FieldType::ObjectId)
    }

    /// An embedded document. Declare its fields with [`FieldBuilder::child`].
    pub fn nested(name: impl Into<String>) -> FieldBuilder {
        FieldBuilder::new(FieldDescriptor::new(
            name,
            Some(FieldType::Object),
            FieldKind::Nested(FieldRegistry::new()),
        ))
    }

    /// A reference to an externally stored file.
    pub fn file(name: impl Into<String>) -> FieldBuilder {
        FieldBuilder::new(FieldDescriptor::new(name, Some(FieldType::Object), FieldKind::File))
    }

    /// A field declaring a relationship to another model.
    pub fn relationship(name: impl Into<String>, descriptor: RelationshipDescriptor) -> FieldBuilder {
        let field_type = if descriptor.is_many() {
            FieldType::Array
        } else {
            FieldType::ObjectId
        };

        FieldBuilder::new(FieldDescriptor::new(
            name,
            Some(field_type),
            FieldKind::Relationship(descriptor),
        ))
    }
}

/// Fluent builder over a [`FieldDescriptor`].
pub struct FieldBuilder {
    descriptor: FieldDescriptor,
}

impl FieldBuilder {
    fn new(descriptor: FieldDescriptor) -> Self {
        Self { descriptor }
    }

    fn scalar(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(FieldDescriptor::new(name, Some(field_type), FieldKind::Scalar))
    }

    pub fn required(mut self) -> Self {
        self.descriptor.required = true;
        self
    }

    /// Adds a unique index on the field.
    pub fn unique(mut self) -> Self {
        self.descriptor.unique = true;
        self
    }

    /// Adds a non-unique index on the field.
    pub fn index(mut self) -> Self {
        self.descriptor.index = true;
        self
    }

    /// Accepts an explicit `null`.
    pub fn nullable(mut self) -> Self {
        self.descriptor.nullable = true;
        self
    }

    /// Restricts the value to one of the given values.
    pub fn one_of<V: Into<Bson>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.descriptor.one_of = values.into_iter().map(Into::into).collect();
        self
    }

    /// Lower bound: numeric value, string length, array length or date.
    pub fn min(mut self, value: impl Into<Bson>) -> Self {
        self.descriptor.min = Some(Bound::Value(value.into()));
        self
    }

    pub fn min_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Document) -> Bson + Send + Sync + 'static,
    {
        self.descriptor.min = Some(Bound::Computed(Arc::new(f)));
        self
    }

    /// Upper bound: numeric value, string length, array length or date.
    pub fn max(mut self, value: impl Into<Bson>) -> Self {
        self.descriptor.max = Some(Bound::Value(value.into()));
        self
    }

    pub fn max_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Document) -> Bson + Send + Sync + 'static,
    {
        self.descriptor.max = Some(Bound::Computed(Arc::new(f)));
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.descriptor.pattern = Some(pattern);
        self
    }

    pub fn default(mut self, value: impl Into<Bson>) -> Self {
        self.descriptor.default = Some(DefaultValue::Value(value.into()));
        self
    }

    /// Default computed at every save, e.g. a timestamp.
    pub fn default_with<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Bson + Send + Sync + 'static,
    {
        self.descriptor.default = Some(DefaultValue::Computed(Arc::new(f)));
        self
    }

    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(Bson) -> Bson + Send + Sync + 'static,
    {
        self.descriptor.transform = Some(Arc::new(f));
        self
    }

    /// Stores the field under a different key.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.descriptor.alias = Some(alias.into());
        self
    }

    pub fn immutable(mut self) -> Self {
        self.descriptor.immutable = Some(Immutability::Always);
        self
    }

    /// Immutable while the predicate holds for the stored document.
    pub fn immutable_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.descriptor.immutable = Some(Immutability::When(Arc::new(predicate)));
        self
    }

    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Bson) -> Result<(), String> + Send + Sync + 'static,
    {
        self.descriptor.validators.push(Arc::new(f));
        self
    }

    /// Declares a child field, turning this field into an embedded document.
    pub fn child(mut self, child: impl Into<FieldDescriptor>) -> Self {
        let child = child.into();

        match &mut self.descriptor.kind {
            FieldKind::Nested(children) => children.insert(child),
            kind => {
                let mut children = FieldRegistry::new();
                children.insert(child);
                *kind = FieldKind::Nested(children);
                self.descriptor.field_type = Some(FieldType::Object);
            },
        }

        self
    }

    pub fn build(self) -> FieldDescriptor {
        self.descriptor
    }
}

impl From<FieldBuilder> for FieldDescriptor {
    fn from(builder: FieldBuilder) -> Self {
        builder.build()
    }
}

/// Rejects update documents that set an always-immutable storage path.
///
/// Conditional immutability depends on the stored document, which an update document does not
/// carry, so the lifecycle checks it before the hooks run.
struct ImmutableGuard {
    path: String,
}

#[async_trait::async_trait]
impl Hook for ImmutableGuard {
    async fn execute(&self, document: &mut Document) -> DocumentStoreResult<()> {
        let touched = document.contains_key(&self.path) || get_path(document, &self.path).is_some();

        if touched {
            return Err(DocumentStoreError::ImmutableField {
                field: self.path.clone(),
                document_id: document
                    .get("_id")
                    .map(display_id),
            });
        }

        Ok(())
    }
}

/// An immutable field found by [`FieldRegistry::immutable_fields`].
pub struct ImmutablePath<'a> {
    /// Dotted path using declared names.
    pub path: String,
    /// Dotted path using storage names.
    pub storage_path: String,
    pub immutability: &'a Immutability,
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Ordered field descriptors of one model (or of one embedded document).
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: IndexMap<String, FieldDescriptor>,
    indexes: Vec<IndexSpec>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a field and applies its declaration side effects.
    ///
    /// Unique and indexed fields (nested ones included, keyed by their full storage path) add an
    /// [`IndexSpec`]. Always-immutable fields install a [`HookPhase::PreUpdate`] guard in `hooks`
    /// that rejects any update document setting the field.
    pub fn register(&mut self, descriptor: impl Into<FieldDescriptor>, hooks: &mut HookRegistry) {
        let descriptor = descriptor.into();
        let mut indexes = Vec::new();

        apply_side_effects("", &descriptor, &mut indexes, hooks);

        self.indexes.extend(indexes);
        self.insert(descriptor);
    }

    pub(crate) fn insert(&mut self, descriptor: FieldDescriptor) {
        self.fields.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Index specs produced by registration, in registration order.
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Finds the descriptor of a dotted declared path.
    pub fn descriptor_at(&self, path: &str) -> Option<&FieldDescriptor> {
        match path.split_once('.') {
            None => self.get(path),
            Some((head, rest)) => self
                .get(head)?
                .children()?
                .descriptor_at(rest),
        }
    }

    /// Translates a dotted declared path into its storage path.
    ///
    /// Undeclared segments are kept as they are, so `_id` and store operators pass through.
    pub fn storage_path(&self, path: &str) -> String {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        match (self.get(head), rest) {
            (Some(descriptor), None) => descriptor.storage_name().to_string(),
            (Some(descriptor), Some(rest)) => match descriptor.children() {
                Some(children) => join_path(descriptor.storage_name(), &children.storage_path(rest)),
                None => join_path(descriptor.storage_name(), rest),
            },
            (None, _) => path.to_string(),
        }
    }

    /// Every immutable field, nested ones included.
    pub fn immutable_fields(&self) -> Vec<ImmutablePath<'_>> {
        let mut out = Vec::new();
        self.collect_immutable("", "", &mut out);
        out
    }

    fn collect_immutable<'a>(&'a self, prefix: &str, storage_prefix: &str, out: &mut Vec<ImmutablePath<'a>>) {
        for descriptor in self.iter() {
            let path = join_path(prefix, &descriptor.name);
            let storage_path = join_path(storage_prefix, descriptor.storage_name());

            if let Some(immutability) = &descriptor.immutable {
                out.push(ImmutablePath {
                    path: path.clone(),
                    storage_path: storage_path.clone(),
                    immutability,
                });
            }

            if let Some(children) = descriptor.children() {
                children.collect_immutable(&path, &storage_path, out);
            }
        }
    }

    /// Checks a document (declared field names) against every field constraint.
    ///
    /// All violations are collected; nested fields are reported under their dotted path.
    pub fn validate(&self, document: &Document) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        self.validate_into("", document, document, &mut errors);
        errors
    }

    fn validate_into(&self, prefix: &str, document: &Document, root: &Document, errors: &mut ValidationErrors) {
        for descriptor in self.iter() {
            if descriptor.is_virtual() {
                continue;
            }

            let path = join_path(prefix, &descriptor.name);

            match document.get(&descriptor.name) {
                None => {
                    if descriptor.required {
                        errors.add(&path, ValidationIssue::new(
                            ValidationCode::MissingRequired,
                            format!("{} is required", path),
                        ));
                    }
                },
                Some(value) => validate_value(descriptor, &path, value, root, errors),
            }
        }
    }

    /// Checks the fields of an update patch (dotted declared paths), without presence checks.
    ///
    /// Undeclared paths are not checked.
    pub fn validate_partial(&self, patch: &Document) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        for (path, value) in patch {
            if let Some(descriptor) = self.descriptor_at(path) {
                if !descriptor.is_virtual() {
                    validate_value(descriptor, path, value, patch, &mut errors);
                }
            }
        }

        errors
    }

    /// Fills absent fields from their defaults.
    ///
    /// An absent embedded document is created only when one of its descendants has a default.
    pub fn fill_defaults(&self, document: &mut Document) {
        for descriptor in self.iter() {
            if descriptor.is_virtual() {
                continue;
            }

            if !document.contains_key(&descriptor.name) {
                if let Some(default) = &descriptor.default {
                    document.insert(descriptor.name.clone(), default.resolve());
                } else if descriptor.has_default_below() {
                    document.insert(descriptor.name.clone(), Document::new());
                }
            }

            if let (Some(children), Some(Bson::Document(child))) = (descriptor.children(), document.get_mut(&descriptor.name)) {
                children.fill_defaults(child);
            }
        }
    }

    /// Replaces every present, non-null value that has a transform. Children run before parents.
    pub fn apply_transforms(&self, document: &mut Document) {
        for descriptor in self.iter() {
            if let (Some(children), Some(Bson::Document(child))) = (descriptor.children(), document.get_mut(&descriptor.name)) {
                children.apply_transforms(child);
            }

            if let Some(transform) = &descriptor.transform {
                match document.get(&descriptor.name) {
                    None | Some(Bson::Null) => {},
                    Some(value) => {
                        let transformed = transform(value.clone());
                        document.insert(descriptor.name.clone(), transformed);
                    },
                }
            }
        }
    }

    /// Applies transforms to the values of an update patch keyed by dotted declared paths.
    pub fn apply_transforms_partial(&self, patch: &mut Document) {
        for (path, value) in patch.iter_mut() {
            let Some(descriptor) = self.descriptor_at(path) else {
                continue;
            };

            if let (Some(children), Bson::Document(child)) = (descriptor.children(), &mut *value) {
                children.apply_transforms(child);
            }

            if let Some(transform) = &descriptor.transform {
                if !matches!(value, Bson::Null) {
                    *value = transform(value.clone());
                }
            }
        }
    }

    /// Builds the storage-shaped document: aliases applied recursively, virtual relationship
    /// fields dropped, undeclared keys kept.
    pub fn to_storage(&self, document: &Document) -> Document {
        let mut out = Document::new();

        for (key, value) in document {
            match self.get(key) {
                Some(descriptor) if descriptor.is_virtual() => {},
                Some(descriptor) => {
                    let value = match (descriptor.children(), value) {
                        (Some(children), Bson::Document(child)) => Bson::Document(children.to_storage(child)),
                        _ => value.clone(),
                    };
                    out.insert(descriptor.storage_name(), value);
                },
                None => {
                    out.insert(key.clone(), value.clone());
                },
            }
        }

        out
    }

    /// Maps an update patch keyed by dotted declared paths to dotted storage paths.
    pub fn patch_to_storage(&self, patch: &Document) -> Document {
        let mut out = Document::new();

        for (path, value) in patch {
            let value = match (self.descriptor_at(path).and_then(FieldDescriptor::children), value) {
                (Some(children), Bson::Document(child)) => Bson::Document(children.to_storage(child)),
                _ => value.clone(),
            };

            out.insert(self.storage_path(path), value);
        }

        out
    }

    /// Reverses [`to_storage`](Self::to_storage) for documents read back from the store.
    pub fn from_storage(&self, document: &Document) -> Document {
        let mut out = Document::new();

        for (key, value) in document {
            match self.iter().find(|d| d.storage_name() == key) {
                Some(descriptor) => {
                    let value = match (descriptor.children(), value) {
                        (Some(children), Bson::Document(child)) => Bson::Document(children.from_storage(child)),
                        _ => value.clone(),
                    };
                    out.insert(descriptor.name.clone(), value);
                },
                None => {
                    out.insert(key.clone(), value.clone());
                },
            }
        }

        out
    }
}

fn apply_side_effects(prefix: &str, descriptor: &FieldDescriptor, indexes: &mut Vec<IndexSpec>, hooks: &mut HookRegistry) {
    let path = join_path(prefix, descriptor.storage_name());

    if descriptor.unique || descriptor.index {
        indexes.push(IndexSpec::new(doc! { path.clone(): 1 }).unique(descriptor.unique));
    }

    if let Some(Immutability::Always) = &descriptor.immutable {
        hooks.register(HookPhase::PreUpdate, Arc::new(ImmutableGuard { path: path.clone() }));
    }

    if let Some(children) = descriptor.children() {
        for child in children.iter() {
            apply_side_effects(&path, child, indexes, hooks);
        }
    }
}

fn validate_value(descriptor: &FieldDescriptor, path: &str, value: &Bson, root: &Document, errors: &mut ValidationErrors) {
    if let Bson::Null = value {
        if !descriptor.nullable {
            errors.add(path, ValidationIssue::new(
                ValidationCode::NullNotAllowed,
                format!("{} cannot be null", path),
            ));
        }
        return;
    }

    if let Some(field_type) = descriptor.field_type {
        if !field_type.matches(value) {
            errors.add(path, ValidationIssue::new(
                ValidationCode::TypeMismatch,
                format!("{} must be of type {}, got {}", path, field_type.bson_type(), type_name(value)),
            ));
            return;
        }
    }

    if let FieldKind::File = descriptor.kind {
        let is_file_ref = value
            .as_document()
            .map(|d| d.contains_key("id") && d.contains_key("filename"))
            .unwrap_or(false);

        if !is_file_ref {
            errors.add(path, ValidationIssue::new(
                ValidationCode::TypeMismatch,
                format!("{} must be a file reference with id and filename", path),
            ));
        }
    }

    if !descriptor.one_of.is_empty() && !descriptor.one_of.iter().any(|allowed| values_equal(allowed, value)) {
        errors.add(path, ValidationIssue::new(
            ValidationCode::NotInEnum,
            format!("{} must be one of {}", path, Bson::Array(descriptor.one_of.clone())),
        ));
    }

    if let Some(min) = &descriptor.min {
        let bound = min.resolve(root);

        if out_of_bound(value, &bound, std::cmp::Ordering::Less) {
            errors.add(path, ValidationIssue::new(
                ValidationCode::BelowMinimum,
                format!("{} must be at least {}", path, bound),
            ));
        }
    }

    if let Some(max) = &descriptor.max {
        let bound = max.resolve(root);

        if out_of_bound(value, &bound, std::cmp::Ordering::Greater) {
            errors.add(path, ValidationIssue::new(
                ValidationCode::AboveMaximum,
                format!("{} must be at most {}", path, bound),
            ));
        }
    }

    if let (Some(pattern), Bson::String(s)) = (&descriptor.pattern, value) {
        if !pattern.is_match(s) {
            errors.add(path, ValidationIssue::new(
                ValidationCode::PatternMismatch,
                format!("{} does not match pattern {}", path, pattern.as_str()),
            ));
        }
    }

    if let (Some(children), Bson::Document(child)) = (descriptor.children(), value) {
        children.validate_into(path, child, root, errors);
    }

    for validator in &descriptor.validators {
        if let Err(message) = validator(value) {
            errors.add(path, ValidationIssue::new(ValidationCode::Custom, message));
        }
    }
}

/// `true` when `value` lies on the `outside` side of `bound`.
///
/// Strings and arrays are measured by length against a numeric bound; null bounds never fail.
fn out_of_bound(value: &Bson, bound: &Bson, outside: std::cmp::Ordering) -> bool {
    if let Bson::Null = bound {
        return false;
    }

    let measured = match (value, as_f64(bound)) {
        (Bson::String(s), Some(limit)) => Some(((s.chars().count() as f64), limit)),
        (Bson::Array(arr), Some(limit)) => Some(((arr.len() as f64), limit)),
        _ => None,
    };

    match measured {
        Some((actual, limit)) => actual.partial_cmp(&limit) == Some(outside),
        None => compare_values(value, bound) == outside,
    }
}
