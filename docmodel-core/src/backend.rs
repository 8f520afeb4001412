//! Storage backend abstraction for the document model engine.
//!
//! The engine performs no persistence or query execution of its own. Everything goes through
//! the narrow [`StoreBackend`] interface, which speaks the store-native filter, update and
//! aggregation-pipeline syntax as BSON documents.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Sessions
//!
//! Backends that support multi-document transactions hand out opaque [`SessionId`] tokens.
//! Passing a token to a data operation runs it inside that session. The engine never starts,
//! commits or aborts transactions on its own.
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::backend::{StoreBackend, FindOptions};
//! use bson::doc;
//!
//! let id = backend.insert_one("users", doc! { "name": "Alice" }, None).await?;
//! let found = backend
//!     .find("users", doc! { "_id": id }, FindOptions::default(), None)
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use std::fmt::{self, Debug};
use uuid::Uuid;

use crate::{
    error::DocumentStoreResult,
    schema::{IndexSpec, ValidationAction, ValidationLevel},
};

/// Opaque handle to a backend session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Options for update operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document built from the filter and update when nothing matches.
    pub upsert: bool,
}

/// Result of an update operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// Options for plain filtered reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub projection: Option<Document>,
}

impl FindOptions {
    /// The options as a document, for error context and explain commands.
    pub fn to_document(&self) -> Document {
        let mut options = doc! {};

        if let Some(sort) = &self.sort {
            options.insert("sort", sort.clone());
        }
        if let Some(skip) = self.skip {
            options.insert("skip", skip as i64);
        }
        if let Some(limit) = self.limit {
            options.insert("limit", limit);
        }
        if let Some(projection) = &self.projection {
            options.insert("projection", projection.clone());
        }

        options
    }
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult).
/// Backends report unique index violations as
/// [`DuplicateKey`](crate::error::DocumentStoreError::DuplicateKey), unknown session tokens as
/// [`Session`](crate::error::DocumentStoreError::Session), and unreachable stores as
/// [`Connection`](crate::error::DocumentStoreError::Connection).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts one document and returns its `_id`, generating one when the document has none.
    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<Bson>;

    /// Applies an update document (operators such as `$set`, or a full replacement) to the first
    /// document matching `filter`.
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Applies an update document to every document matching `filter`.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Deletes the first matching document and returns the number deleted.
    async fn delete_one(
        &self,
        collection: &str,
        filter: Document,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<u64>;

    /// Deletes every matching document and returns the number deleted.
    async fn delete_many(
        &self,
        collection: &str,
        filter: Document,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<u64>;

    /// Returns the documents matching `filter` with sort, skip, limit and projection applied
    /// in that order. The cursor is drained into a vector.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Runs an aggregation pipeline and returns its output documents.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<Vec<Document>>;

    async fn count_documents(
        &self,
        collection: &str,
        filter: Document,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<u64>;

    /// Returns the backend's query plan for a find.
    async fn explain(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Document>;

    /// Creates indexes in one batch. Existing identical indexes are left alone.
    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexSpec>) -> DocumentStoreResult<()>;

    /// Lists collection names, optionally restricted to one exact name.
    async fn list_collections(&self, name: Option<&str>) -> DocumentStoreResult<Vec<String>>;

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()>;

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Replaces the structural validator of a collection.
    async fn modify_schema(
        &self,
        collection: &str,
        validator: Document,
        level: ValidationLevel,
        action: ValidationAction,
    ) -> DocumentStoreResult<()>;

    async fn start_session(&self) -> DocumentStoreResult<SessionId>;

    async fn start_transaction(&self, session: SessionId) -> DocumentStoreResult<()>;

    async fn commit_transaction(&self, session: SessionId) -> DocumentStoreResult<()>;

    async fn abort_transaction(&self, session: SessionId) -> DocumentStoreResult<()>;

    /// Releases a session. Uncommitted transaction state is discarded.
    async fn end_session(&self, session: SessionId) -> DocumentStoreResult<()>;

    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn insert_one(&self, collection: &str, document: Document, session: Option<SessionId>) -> DocumentStoreResult<Bson> {
        (*self)
            .insert_one(collection, document, session)
            .await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (*self)
            .update_one(collection, filter, update, options, session)
            .await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (*self)
            .update_many(collection, filter, update, options, session)
            .await
    }

    async fn delete_one(&self, collection: &str, filter: Document, session: Option<SessionId>) -> DocumentStoreResult<u64> {
        (*self)
            .delete_one(collection, filter, session)
            .await
    }

    async fn delete_many(&self, collection: &str, filter: Document, session: Option<SessionId>) -> DocumentStoreResult<u64> {
        (*self)
            .delete_many(collection, filter, session)
            .await
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<Vec<Document>> {
        (*self)
            .find(collection, filter, options, session)
            .await
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<Vec<Document>> {
        (*self)
            .aggregate(collection, pipeline, session)
            .await
    }

    async fn count_documents(&self, collection: &str, filter: Document, session: Option<SessionId>) -> DocumentStoreResult<u64> {
        (*self)
            .count_documents(collection, filter, session)
            .await
    }

    async fn explain(&self, collection: &str, filter: Document, options: FindOptions) -> DocumentStoreResult<Document> {
        (*self)
            .explain(collection, filter, options)
            .await
    }

    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexSpec>) -> DocumentStoreResult<()> {
        (*self)
            .create_indexes(collection, indexes)
            .await
    }

    async fn list_collections(&self, name: Option<&str>) -> DocumentStoreResult<Vec<String>> {
        (*self).list_collections(name).await
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (*self).create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (*self).drop_collection(name).await
    }

    async fn modify_schema(
        &self,
        collection: &str,
        validator: Document,
        level: ValidationLevel,
        action: ValidationAction,
    ) -> DocumentStoreResult<()> {
        (*self)
            .modify_schema(collection, validator, level, action)
            .await
    }

    async fn start_session(&self) -> DocumentStoreResult<SessionId> {
        (*self).start_session().await
    }

    async fn start_transaction(&self, session: SessionId) -> DocumentStoreResult<()> {
        (*self).start_transaction(session).await
    }

    async fn commit_transaction(&self, session: SessionId) -> DocumentStoreResult<()> {
        (*self).commit_transaction(session).await
    }

    async fn abort_transaction(&self, session: SessionId) -> DocumentStoreResult<()> {
        (*self).abort_transaction(session).await
    }

    async fn end_session(&self, session: SessionId) -> DocumentStoreResult<()> {
        (*self).end_session(session).await
    }
}

/// Factory trait for creating storage backend instances.
///
/// # Example
///
/// ```ignore
/// let backend = InMemoryStore::builder().build().await?;
/// ```
#[async_trait]
pub trait StoreBackendBuilder {
    /// The type of backend produced by this builder.
    type Backend: StoreBackend;

    /// Builds and initializes the backend.
    ///
    /// # Errors
    ///
    /// Returns [`Initialization`](crate::error::DocumentStoreError::Initialization) if the
    /// backend cannot be configured.
    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
