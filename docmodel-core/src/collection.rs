//! Model-bound collection handles.
//!
//! A [`ModelCollection`] ties a registered [`Model`] to the store's backend, registry and options.
//! Reads, deletes and builders live here; the save and update lifecycle lives in
//! [`lifecycle`](crate::lifecycle).
//!
//! # Example
//!
//! ```ignore
//! let users = store.model("users")?;
//!
//! let alice = users.find_one(Filter::eq("email", "alice@example.com"), &["posts"]).await?;
//! let removed = users.delete(Filter::lt("lastLogin", cutoff)).await?;
//! ```

use bson::{Bson, DateTime, Document, doc};
use std::sync::Arc;
use tracing::debug;

use crate::{
    backend::{FindOptions, SessionId, StoreBackend},
    error::{DocumentStoreError, DocumentStoreResult},
    hook::HookPhase,
    model::Model,
    options::DocumentStoreOptions,
    pipeline::AggregationBuilder,
    query::{Expr, FilterTranslator},
    query_builder::QueryBuilder,
    registry::ModelRegistry,
    relationship::RelationshipKind,
    schema::SchemaEnforcer,
    value::{display_id, get_path},
};

/// A registered model bound to a backend, optionally inside a session.
pub struct ModelCollection<'a, B: StoreBackend> {
    model: Arc<Model>,
    backend: &'a B,
    registry: &'a ModelRegistry,
    options: &'a DocumentStoreOptions,
    session: Option<SessionId>,
}

impl<'a, B: StoreBackend> Clone for ModelCollection<'a, B> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            backend: self.backend,
            registry: self.registry,
            options: self.options,
            session: self.session,
        }
    }
}

impl<'a, B: StoreBackend> std::fmt::Debug for ModelCollection<'a, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCollection")
            .field("model", &self.model.name())
            .field("collection", &self.model.collection())
            .field("session", &self.session)
            .finish()
    }
}

impl<'a, B: StoreBackend> ModelCollection<'a, B> {
    pub(crate) fn new(
        model: Arc<Model>,
        backend: &'a B,
        registry: &'a ModelRegistry,
        options: &'a DocumentStoreOptions,
    ) -> Self {
        Self {
            model,
            backend,
            registry,
            options,
            session: None,
        }
    }

    /// Runs every operation of the returned handle inside `session`.
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// The backing collection name.
    pub fn name(&self) -> &str {
        self.model.collection()
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub(crate) fn backend(&self) -> &'a B {
        self.backend
    }

    pub(crate) fn registry(&self) -> &'a ModelRegistry {
        self.registry
    }

    pub(crate) fn options(&self) -> &'a DocumentStoreOptions {
        self.options
    }

    pub(crate) fn translate(&self, filter: &Expr) -> DocumentStoreResult<Document> {
        FilterTranslator::for_fields(self.model.fields()).translate(filter)
    }

    pub fn query(&self) -> QueryBuilder<'a, B> {
        QueryBuilder::new(self.clone())
    }

    pub fn aggregate(&self) -> AggregationBuilder<'a, B> {
        AggregationBuilder::new(self.clone())
    }

    /// Documents matching `filter`, with the named relationships populated.
    pub async fn find(&self, filter: impl Into<Expr>, populate: &[&str]) -> DocumentStoreResult<Vec<Document>> {
        self.query()
            .filter(filter.into())
            .populate(populate)
            .execute()
            .await
    }

    pub async fn find_one(&self, filter: impl Into<Expr>, populate: &[&str]) -> DocumentStoreResult<Option<Document>> {
        self.query()
            .filter(filter.into())
            .populate(populate)
            .first()
            .await
    }

    pub async fn find_by_id(&self, id: impl Into<Bson>, populate: &[&str]) -> DocumentStoreResult<Option<Document>> {
        self.query()
            .where_id(id)
            .populate(populate)
            .first()
            .await
    }

    pub async fn count(&self, filter: impl Into<Expr>) -> DocumentStoreResult<u64> {
        self.query()
            .filter(filter.into())
            .count()
            .await
    }

    /// Deletes every document matching `filter` and returns how many were removed.
    ///
    /// Soft-deleted documents are included. `PreDelete` hooks run for each document before
    /// anything is removed; `PostDelete` hooks run after the documents and their cascaded
    /// dependents are gone.
    pub async fn delete(&self, filter: impl Into<Expr>) -> DocumentStoreResult<u64> {
        let filter = self.translate(&filter.into())?;
        let mut documents = self
            .backend
            .find(self.name(), filter, FindOptions::default(), self.session)
            .await?;

        if documents.is_empty() {
            return Ok(0);
        }

        for document in documents.iter_mut() {
            self.model
                .hooks()
                .run(HookPhase::PreDelete, document)
                .await?;
        }

        let ids: Vec<Bson> = documents
            .iter()
            .filter_map(|document| document.get("_id").cloned())
            .collect();
        let deleted = self
            .backend
            .delete_many(self.name(), doc! { "_id": { "$in": ids.clone() } }, self.session)
            .await?;

        self.cascade(&documents, &ids).await?;

        for document in documents.iter_mut() {
            self.model
                .hooks()
                .run(HookPhase::PostDelete, document)
                .await?;
        }

        debug!(target: "docmodel::lifecycle", collection = %self.name(), deleted, "Deleted documents");

        Ok(deleted)
    }

    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] if no document has this id.
    pub async fn delete_by_id(&self, id: impl Into<Bson>) -> DocumentStoreResult<()> {
        let id = id.into();

        match self.delete(Expr::from(doc! { "_id": id.clone() })).await? {
            0 => Err(DocumentStoreError::DocumentNotFound(display_id(&id), self.name().to_string())),
            _ => Ok(()),
        }
    }

    /// Stamps the soft-delete field with the current time, hiding the document from reads.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] if the model has no soft-delete field.
    pub async fn soft_delete_by_id(&self, id: impl Into<Bson>) -> DocumentStoreResult<()> {
        let field = self.soft_delete_field()?;

        self.update_by_id(id, doc! { field: DateTime::now() })
            .await
            .map(|_| ())
    }

    /// Clears the soft-delete field.
    pub async fn restore_by_id(&self, id: impl Into<Bson>) -> DocumentStoreResult<()> {
        let field = self.soft_delete_field()?;

        self.update_by_id(id, doc! { field: Bson::Null })
            .await
            .map(|_| ())
    }

    fn soft_delete_field(&self) -> DocumentStoreResult<String> {
        self.model
            .soft_delete_field()
            .map(str::to_string)
            .ok_or_else(|| {
                DocumentStoreError::InvalidDocument(format!("model {} does not use soft delete", self.model.name()))
            })
    }

    /// Creates the collection if needed, then installs the derived validator and indexes.
    pub async fn ensure_schema(&self) -> DocumentStoreResult<()> {
        SchemaEnforcer::sync(self.backend, &self.model, self.options).await
    }

    pub async fn ensure_indexes(&self) -> DocumentStoreResult<()> {
        let indexes = self.model.indexes();

        if indexes.is_empty() {
            return Ok(());
        }

        self.backend
            .create_indexes(self.name(), indexes)
            .await
    }

    async fn cascade(&self, removed: &[Document], ids: &[Bson]) -> DocumentStoreResult<()> {
        for (field, descriptor) in self.model.relationships().iter() {
            if !descriptor.cascade {
                continue;
            }

            let related = self.registry.require(&descriptor.related_model)?;
            let (collection, filter) = match descriptor.kind {
                RelationshipKind::OneToMany => (
                    related.collection().to_string(),
                    doc! { related.fields().storage_path(&descriptor.foreign_key): { "$in": ids.to_vec() } },
                ),
                RelationshipKind::OneToOne => {
                    let key = self.model.fields().storage_path(&descriptor.foreign_key);
                    let referenced: Vec<Bson> = removed
                        .iter()
                        .filter_map(|document| get_path(document, &key))
                        .filter(|value| !matches!(value, Bson::Null))
                        .cloned()
                        .collect();

                    if referenced.is_empty() {
                        continue;
                    }

                    (related.collection().to_string(), doc! { "_id": { "$in": referenced } })
                },
                RelationshipKind::ManyToMany => match &descriptor.junction {
                    Some(junction) => (
                        junction.collection.clone(),
                        doc! { junction.local_key.clone(): { "$in": ids.to_vec() } },
                    ),
                    None => continue,
                },
            };

            let deleted = self
                .backend
                .delete_many(&collection, filter, self.session)
                .await?;

            debug!(target: "docmodel::lifecycle", relationship = %field, collection = %collection, deleted, "Cascaded delete");
        }

        Ok(())
    }
}
