//! Name → model lookup used to resolve relationships.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    model::Model,
};

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: IndexMap<String, Arc<Model>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a model under its name.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Initialization`] if a model with the same name exists.
    pub fn register(&mut self, model: Model) -> DocumentStoreResult<Arc<Model>> {
        if self.models.contains_key(model.name()) {
            return Err(DocumentStoreError::Initialization(format!(
                "model {} is already registered",
                model.name(),
            )));
        }

        let model = Arc::new(model);
        self.models.insert(model.name().to_string(), model.clone());

        Ok(model)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Model>> {
        self.models.get(name).cloned()
    }

    /// Like [`get`](Self::get), failing with [`DocumentStoreError::ModelNotFound`].
    pub fn require(&self, name: &str) -> DocumentStoreResult<Arc<Model>> {
        self.get(name)
            .ok_or_else(|| DocumentStoreError::ModelNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }
}
