//! Main docmodel crate providing a unified interface to the document model engine.
//!
//! This crate is the primary entry point for users of the docmodel framework. It re-exports the
//! core types from the sub-crates and gives access to the storage backends.
//!
//! # Features
//!
//! - **Declared models** - Fields with types, constraints, defaults, transforms and aliases
//! - **Relationships** - One-to-one, one-to-many and many-to-many links, populated on read
//! - **Store-side schema** - Validators and indexes derived from the declarations
//! - **Lifecycle hooks** - Code around every save, update and delete
//! - **Queries and pipelines** - Fluent filters, pagination and aggregation stages
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), DocumentStoreError> {
//!     let mut store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!
//!     store.register(
//!         Model::builder("users")
//!             .field(Field::string("name").required().min(1))
//!             .field(Field::string("email").required().unique().transform(|v| match v {
//!                 Bson::String(s) => Bson::String(s.to_lowercase()),
//!                 other => other,
//!             }))
//!             .field(Field::relationship("posts", RelationshipDescriptor::one_to_many("posts", "author")))
//!             .plugin(Timestamps::new())
//!             .build(),
//!     )?;
//!     store.register(
//!         Model::builder("posts")
//!             .field(Field::string("title").required())
//!             .field(Field::object_id("author").required())
//!             .build(),
//!     )?;
//!
//!     let users = store.model("users")?;
//!     let id = users.save(doc! { "name": "Alice", "email": "Alice@Example.com" }).await?;
//!     store.model("posts")?.save(doc! { "title": "Hello", "author": id.clone() }).await?;
//!
//!     let alice = users.find_by_id(id, &["posts"]).await?;
//!     println!("{:?}", alice);
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Aggregation
//!
//! ```ignore
//! let totals = store
//!     .model("orders")?
//!     .aggregate()
//!     .group(doc! { "_id": "$product", "total": { "$sum": { "$multiply": ["$quantity", "$price"] } } })
//!     .sort_stage(doc! { "total": -1 })
//!     .execute()
//!     .await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docmodel_core::{
    backend, collection, document, error, field, hook, model, options, page, pipeline, plugin, populate, query,
    query_builder, registry, relationship, schema, store, validator, value,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmodel_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
