//! Relationship population.
//!
//! [`RelationshipResolver`] turns the relationship fields requested on a query into join stages
//! and normalizes the joined values afterwards:
//!
//! - `OneToOne`: the host's foreign key joins the related `_id`; the result is unwound to a single
//!   document, or null when nothing matched.
//! - `OneToMany`: the host `_id` joins the related foreign key; the result is always an array.
//! - `ManyToMany`: the host `_id` joins the junction rows, whose target keys join the related
//!   `_id`; the intermediate rows are projected away.

use bson::{Bson, Document, doc};
use tracing::warn;

use crate::{
    error::DocumentStoreResult,
    model::Model,
    pipeline::Stage,
    registry::ModelRegistry,
    relationship::{RelationshipDescriptor, RelationshipKind},
};

pub struct RelationshipResolver<'a> {
    model: &'a Model,
    registry: &'a ModelRegistry,
}

impl<'a> RelationshipResolver<'a> {
    pub fn new(model: &'a Model, registry: &'a ModelRegistry) -> Self {
        Self { model, registry }
    }

    /// Join stages for every requested relationship, in request order.
    ///
    /// Names that are not relationships of the model are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ModelNotFound`](crate::error::DocumentStoreError::ModelNotFound) when a
    /// relationship names a model that was never registered.
    pub fn stages(&self, populate: &[String]) -> DocumentStoreResult<Vec<Stage>> {
        let mut stages = Vec::new();

        for field in populate {
            let Some(descriptor) = self.model.relationships().get(field) else {
                warn!(target: "docmodel::populate", model = %self.model.name(), field = %field, "Skipping unknown relationship");
                continue;
            };

            let related = self.registry.require(&descriptor.related_model)?;
            let as_field = self.target_field(field);

            match descriptor.kind {
                RelationshipKind::OneToOne => {
                    stages.push(Stage::lookup(
                        related.collection(),
                        self.model.fields().storage_path(&descriptor.foreign_key),
                        "_id",
                        as_field.clone(),
                    ));
                    stages.push(Stage::unwind(as_field, true));
                },
                RelationshipKind::OneToMany => {
                    stages.push(Stage::lookup(
                        related.collection(),
                        "_id",
                        related.fields().storage_path(&descriptor.foreign_key),
                        as_field.clone(),
                    ));
                    stages.push(Stage::AddFields(doc! {
                        as_field.clone(): { "$ifNull": [format!("${}", as_field), []] },
                    }));
                },
                RelationshipKind::ManyToMany => {
                    stages.extend(self.junction_stages(field, descriptor, related.collection(), &as_field));
                },
            }
        }

        Ok(stages)
    }

    fn junction_stages(&self, field: &str, descriptor: &RelationshipDescriptor, related_collection: &str, as_field: &str) -> Vec<Stage> {
        let Some(junction) = &descriptor.junction else {
            warn!(target: "docmodel::populate", model = %self.model.name(), field = %field, "Many-to-many relationship has no junction");
            return Vec::new();
        };
        let rows = format!("__{}_junction", field);

        vec![
            Stage::lookup(&junction.collection, "_id", &junction.local_key, &rows),
            Stage::lookup(related_collection, format!("{}.{}", rows, junction.target_key), "_id", as_field),
            Stage::Project(doc! { rows: 0 }),
        ]
    }

    /// Fixes the shape of populated fields on a document already mapped to declared names.
    ///
    /// Unmatched single relationships become null and unmatched collections become empty arrays.
    /// Embedded related documents are mapped to the related model's declared names.
    pub fn normalize(&self, mut document: Document, populate: &[String]) -> DocumentStoreResult<Document> {
        for field in populate {
            let Some(descriptor) = self.model.relationships().get(field) else {
                continue;
            };
            let related = self.registry.require(&descriptor.related_model)?;

            let value = match (descriptor.is_many(), document.remove(field)) {
                (false, Some(Bson::Document(child))) => Bson::Document(related.fields().from_storage(&child)),
                (false, _) => Bson::Null,
                (true, Some(Bson::Array(items))) => Bson::Array(
                    items
                        .into_iter()
                        .map(|item| match item {
                            Bson::Document(child) => Bson::Document(related.fields().from_storage(&child)),
                            other => other,
                        })
                        .collect(),
                ),
                (true, _) => Bson::Array(Vec::new()),
            };

            document.insert(field.clone(), value);
        }

        Ok(document)
    }

    fn target_field(&self, field: &str) -> String {
        self.model
            .fields()
            .get(field)
            .map(|descriptor| descriptor.storage_name().to_string())
            .unwrap_or_else(|| field.to_string())
    }
}
