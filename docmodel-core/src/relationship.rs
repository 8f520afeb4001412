//! Declared associations between models.
//!
//! A relationship is declared on a host model under a logical field name and points at another
//! model by name. The related model is resolved through the
//! [`ModelRegistry`](crate::registry::ModelRegistry) when the relationship is used, so models
//! can reference each other in either order of registration.
//!
//! | kind | stored on host | populated as |
//! |---|---|---|
//! | `OneToOne` | `foreign_key` holds the related `_id` | object or `null` |
//! | `OneToMany` | nothing; related docs hold the host `_id` in `foreign_key` | array, `[]` when empty |
//! | `ManyToMany` | nothing; rows of a junction collection link both ids | array, `[]` when empty |

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

/// Junction collection linking the two sides of a many-to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Junction {
    /// Name of the junction collection.
    pub collection: String,
    /// Junction field holding the host document's `_id`.
    pub local_key: String,
    /// Junction field holding the related document's `_id`.
    pub target_key: String,
}

impl Junction {
    pub fn new(
        collection: impl Into<String>,
        local_key: impl Into<String>,
        target_key: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            local_key: local_key.into(),
            target_key: target_key.into(),
        }
    }

    /// Junction whose keys are named after the two models, e.g. `userId` / `roleId`.
    pub fn between(collection: impl Into<String>, host_model: &str, related_model: &str) -> Self {
        Self::new(
            collection,
            format!("{}Id", host_model.to_lowercase()),
            format!("{}Id", related_model.to_lowercase()),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    pub kind: RelationshipKind,
    /// Name of the related model in the model registry.
    pub related_model: String,
    /// For `OneToOne` a field of the host model; for `OneToMany` a field of the related model.
    pub foreign_key: String,
    /// Delete dependents when the host document is deleted.
    pub cascade: bool,
    pub bidirectional: bool,
    pub inverse_field: Option<String>,
    pub junction: Option<Junction>,
}

impl RelationshipDescriptor {
    fn new(kind: RelationshipKind, related_model: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            kind,
            related_model: related_model.into(),
            foreign_key: foreign_key.into(),
            cascade: false,
            bidirectional: false,
            inverse_field: None,
            junction: None,
        }
    }

    /// The host stores the related document's id in `foreign_key`.
    pub fn one_to_one(related_model: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::new(RelationshipKind::OneToOne, related_model, foreign_key)
    }

    /// Related documents store the host's id in their `foreign_key` field.
    pub fn one_to_many(related_model: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::new(RelationshipKind::OneToMany, related_model, foreign_key)
    }

    /// Both sides are linked through rows of a junction collection.
    /// `foreign_key` is set to the junction's local key.
    pub fn many_to_many(related_model: impl Into<String>, junction: Junction) -> Self {
        let mut descriptor = Self::new(RelationshipKind::ManyToMany, related_model, junction.local_key.clone());
        descriptor.junction = Some(junction);
        descriptor
    }

    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }

    /// Marks the relationship as navigable from the related model through `inverse_field`.
    pub fn inverse(mut self, inverse_field: impl Into<String>) -> Self {
        self.bidirectional = true;
        self.inverse_field = Some(inverse_field.into());
        self
    }

    /// `true` when populating yields an array rather than a single document.
    pub fn is_many(&self) -> bool {
        !matches!(self.kind, RelationshipKind::OneToOne)
    }
}

/// Relationships of one model keyed by logical field name, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RelationshipRegistry {
    relationships: IndexMap<String, RelationshipDescriptor>,
}

impl RelationshipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, field: impl Into<String>, descriptor: RelationshipDescriptor) {
        self.relationships.insert(field.into(), descriptor);
    }

    pub fn get(&self, field: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RelationshipDescriptor)> {
        self.relationships
            .iter()
            .map(|(field, descriptor)| (field.as_str(), descriptor))
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }
}
