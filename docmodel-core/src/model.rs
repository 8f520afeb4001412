//! Models: the declarations bound to one collection.
//!
//! A [`Model`] owns its field registry, relationship registry, hooks, validators and index list.
//! It is assembled once with a [`ModelBuilder`] and is read-only afterwards.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let users = Model::builder("users")
//!     .field(Field::string("name").required())
//!     .field(Field::string("email").required().unique())
//!     .field(Field::relationship("posts", RelationshipDescriptor::one_to_many("posts", "authorId")))
//!     .plugin(Timestamps::new())
//!     .build();
//! ```

use bson::Document;
use std::{fmt, sync::Arc};

use crate::{
    error::ValidationErrors,
    field::{FieldDescriptor, FieldKind, FieldRegistry},
    hook::{Hook, HookPhase, HookRegistry},
    plugin::Plugin,
    relationship::{RelationshipDescriptor, RelationshipRegistry},
    schema::IndexSpec,
    validator::Validator,
};

pub struct Model {
    name: String,
    collection: String,
    fields: FieldRegistry,
    relationships: RelationshipRegistry,
    hooks: HookRegistry,
    validators: Vec<Arc<dyn Validator>>,
    indexes: Vec<IndexSpec>,
    soft_delete: Option<String>,
}

impl Model {
    /// Starts a model whose collection has the same name.
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    pub fn relationships(&self) -> &RelationshipRegistry {
        &self.relationships
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Field-derived index specs followed by explicitly declared ones.
    pub fn indexes(&self) -> Vec<IndexSpec> {
        self.fields
            .indexes()
            .iter()
            .chain(self.indexes.iter())
            .cloned()
            .collect()
    }

    /// Name of the soft-delete timestamp field, when the model uses soft deletion.
    pub fn soft_delete_field(&self) -> Option<&str> {
        self.soft_delete.as_deref()
    }

    /// Runs field constraints and model validators, merging all issues.
    pub fn validate(&self, document: &Document) -> ValidationErrors {
        let mut errors = self.fields.validate(document);

        for validator in &self.validators {
            errors.merge(validator.validate(document));
        }

        errors
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("fields", &self.fields)
            .field("relationships", &self.relationships)
            .field("hooks", &self.hooks)
            .field("validators", &self.validators.len())
            .field("indexes", &self.indexes)
            .field("soft_delete", &self.soft_delete)
            .finish()
    }
}

pub struct ModelBuilder {
    name: String,
    collection: String,
    fields: FieldRegistry,
    relationships: RelationshipRegistry,
    hooks: HookRegistry,
    validators: Vec<Arc<dyn Validator>>,
    indexes: Vec<IndexSpec>,
    soft_delete: Option<String>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();

        Self {
            collection: name.clone(),
            name,
            fields: FieldRegistry::new(),
            relationships: RelationshipRegistry::new(),
            hooks: HookRegistry::new(),
            validators: Vec::new(),
            indexes: Vec::new(),
            soft_delete: None,
        }
    }

    /// Binds the model to a collection with a different name.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Registers a field. Relationship fields are also added to the relationship registry.
    pub fn field(mut self, field: impl Into<FieldDescriptor>) -> Self {
        let field = field.into();

        if let FieldKind::Relationship(descriptor) = &field.kind {
            self.relationships.register(field.name.clone(), descriptor.clone());
        }
        self.fields.register(field, &mut self.hooks);

        self
    }

    /// Declares a relationship without a matching field declaration.
    pub fn relationship(mut self, field: impl Into<String>, descriptor: RelationshipDescriptor) -> Self {
        self.relationships.register(field, descriptor);
        self
    }

    pub fn hook(mut self, phase: HookPhase, hook: impl Hook + 'static) -> Self {
        self.hooks.register(phase, Arc::new(hook));
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Hides documents whose `field` is set from reads, and enables soft delete/restore.
    pub fn soft_delete(mut self, field: impl Into<String>) -> Self {
        self.soft_delete = Some(field.into());
        self
    }

    pub fn plugin(self, plugin: impl Plugin) -> Self {
        plugin.install(self)
    }

    pub fn build(self) -> Model {
        Model {
            name: self.name,
            collection: self.collection,
            fields: self.fields,
            relationships: self.relationships,
            hooks: self.hooks,
            validators: self.validators,
            indexes: self.indexes,
            soft_delete: self.soft_delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ValidationCode,
        field::Field,
        validator::validator_fn,
    };
    use bson::doc;

    #[test]
    fn builder_collects_relationships_and_indexes() {
        let model = Model::builder("users")
            .collection("app_users")
            .field(Field::string("email").unique())
            .field(Field::relationship("posts", RelationshipDescriptor::one_to_many("posts", "authorId")))
            .index(IndexSpec::new(doc! { "createdAt": -1 }))
            .build();

        assert_eq!(model.name(), "users");
        assert_eq!(model.collection(), "app_users");
        assert!(model.relationships().get("posts").is_some());
        assert_eq!(model.indexes().len(), 2);
    }

    #[test]
    fn model_validators_merge_with_field_issues() {
        let model = Model::builder("events")
            .field(Field::string("title").required())
            .field(Field::number("start"))
            .field(Field::number("end"))
            .validator(validator_fn(|doc| {
                match (doc.get_i32("start"), doc.get_i32("end")) {
                    (Ok(start), Ok(end)) if end < start => Err(("end".into(), "end must follow start".into())),
                    _ => Ok(()),
                }
            }))
            .build();

        let errors = model.validate(&doc! { "start": 5, "end": 1 });

        assert!(errors.has("title", ValidationCode::MissingRequired));
        assert!(errors.has("end", ValidationCode::Custom));
    }
}
