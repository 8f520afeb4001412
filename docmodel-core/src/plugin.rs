//! Reusable model extensions.
//!
//! A [`Plugin`] receives a [`ModelBuilder`] and returns it with extra fields, hooks or settings.

use bson::{Bson, DateTime};

use crate::{
    field::Field,
    hook::{HookPhase, hook_fn},
    model::ModelBuilder,
};

pub trait Plugin {
    fn install(&self, builder: ModelBuilder) -> ModelBuilder;
}

/// Maintains creation and modification timestamps.
///
/// On save, the creation field is set when absent and the modification field is set to the
/// current time. On update, only the modification field is refreshed.
#[derive(Debug, Clone)]
pub struct Timestamps {
    created_at: String,
    updated_at: String,
}

impl Timestamps {
    pub fn new() -> Self {
        Self {
            created_at: "createdAt".to_string(),
            updated_at: "updatedAt".to_string(),
        }
    }

    pub fn with_fields(created_at: impl Into<String>, updated_at: impl Into<String>) -> Self {
        Self {
            created_at: created_at.into(),
            updated_at: updated_at.into(),
        }
    }
}

impl Default for Timestamps {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for Timestamps {
    fn install(&self, builder: ModelBuilder) -> ModelBuilder {
        let created_at = self.created_at.clone();
        let updated_at = self.updated_at.clone();
        let touched_at = self.updated_at.clone();

        builder
            .field(Field::date(self.created_at.clone()))
            .field(Field::date(self.updated_at.clone()))
            .hook(HookPhase::PreSave, hook_fn(move |doc| {
                let now = Bson::DateTime(DateTime::from_chrono(chrono::Utc::now()));

                if !doc.contains_key(&created_at) {
                    doc.insert(created_at.clone(), now.clone());
                }
                doc.insert(updated_at.clone(), now);

                Ok(())
            }))
            .hook(HookPhase::PreUpdate, hook_fn(move |doc| {
                doc.insert(touched_at.clone(), DateTime::from_chrono(chrono::Utc::now()));
                Ok(())
            }))
    }
}

/// Adds a nullable deletion timestamp and hides deleted documents from reads.
#[derive(Debug, Clone)]
pub struct SoftDelete {
    field: String,
}

impl SoftDelete {
    pub fn new() -> Self {
        Self {
            field: "deletedAt".to_string(),
        }
    }

    pub fn with_field(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }
}

impl Default for SoftDelete {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for SoftDelete {
    fn install(&self, builder: ModelBuilder) -> ModelBuilder {
        builder
            .field(Field::date(self.field.clone()).nullable().default(Bson::Null))
            .soft_delete(self.field.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use bson::doc;

    #[tokio::test]
    async fn timestamps_set_on_save_and_refresh_on_update() {
        let model = Model::builder("notes")
            .field(Field::string("text"))
            .plugin(Timestamps::new())
            .build();

        let mut saved = doc! { "text": "a" };
        model.hooks().run(HookPhase::PreSave, &mut saved).await.unwrap();
        assert!(saved.get_datetime("createdAt").is_ok());
        assert!(saved.get_datetime("updatedAt").is_ok());

        let mut patch = doc! { "text": "b" };
        model.hooks().run(HookPhase::PreUpdate, &mut patch).await.unwrap();
        assert!(patch.get_datetime("updatedAt").is_ok());
        assert!(!patch.contains_key("createdAt"));
    }

    #[test]
    fn soft_delete_declares_nullable_field() {
        let model = Model::builder("notes").plugin(SoftDelete::new()).build();

        assert_eq!(model.soft_delete_field(), Some("deletedAt"));
        assert!(model.fields().get("deletedAt").map(|f| f.nullable).unwrap_or(false));
    }
}
