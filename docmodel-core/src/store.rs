//! The document store: a backend plus the registered models.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let mut store = DocumentStore::new(InMemoryStore::new());
//!
//! store.register(
//!     Model::builder("users")
//!         .field(Field::string("name").required())
//!         .field(Field::string("email").required().unique())
//!         .build(),
//! )?;
//!
//! let users = store.model("users")?;
//! let id = users.save(doc! { "name": "Alice", "email": "alice@example.com" }).await?;
//! ```

use std::sync::Arc;
use tracing::debug;

use crate::{
    backend::{SessionId, StoreBackend},
    collection::ModelCollection,
    error::DocumentStoreResult,
    model::Model,
    options::DocumentStoreOptions,
    registry::ModelRegistry,
};

/// Owns a backend and the models bound to it.
///
/// Models are registered up front; afterwards the store is shared by reference and hands out
/// [`ModelCollection`] handles.
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
    registry: ModelRegistry,
    options: DocumentStoreOptions,
}

impl<B: StoreBackend> DocumentStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, DocumentStoreOptions::default())
    }

    pub fn with_options(backend: B, options: DocumentStoreOptions) -> Self {
        Self {
            backend,
            registry: ModelRegistry::new(),
            options,
        }
    }

    /// Registers a model.
    ///
    /// # Errors
    ///
    /// Returns [`Initialization`](crate::error::DocumentStoreError::Initialization) if a model
    /// with the same name is already registered.
    pub fn register(&mut self, model: Model) -> DocumentStoreResult<Arc<Model>> {
        debug!(target: "docmodel::lifecycle", model = %model.name(), collection = %model.collection(), "Registering model");

        self.registry.register(model)
    }

    /// A handle on a registered model.
    ///
    /// # Errors
    ///
    /// Returns [`ModelNotFound`](crate::error::DocumentStoreError::ModelNotFound) for an unknown
    /// name.
    pub fn model(&self, name: &str) -> DocumentStoreResult<ModelCollection<'_, B>> {
        let model = self.registry.require(name)?;

        Ok(ModelCollection::new(model, &self.backend, &self.registry, &self.options))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn options(&self) -> &DocumentStoreOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Synchronizes the schema and indexes of every registered model.
    pub async fn sync_all(&self) -> DocumentStoreResult<()> {
        for model in self.registry.iter() {
            self.model(model.name())?
                .ensure_schema()
                .await?;
        }

        Ok(())
    }

    pub async fn start_session(&self) -> DocumentStoreResult<SessionId> {
        self.backend.start_session().await
    }

    pub async fn start_transaction(&self, session: SessionId) -> DocumentStoreResult<()> {
        self.backend
            .start_transaction(session)
            .await
    }

    pub async fn commit_transaction(&self, session: SessionId) -> DocumentStoreResult<()> {
        self.backend
            .commit_transaction(session)
            .await
    }

    pub async fn abort_transaction(&self, session: SessionId) -> DocumentStoreResult<()> {
        self.backend
            .abort_transaction(session)
            .await
    }

    pub async fn end_session(&self, session: SessionId) -> DocumentStoreResult<()> {
        self.backend.end_session(session).await
    }

    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await
    }
}
