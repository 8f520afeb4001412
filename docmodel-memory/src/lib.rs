//! In-memory document storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Store-native queries** - Filters, update operators and aggregation pipelines in the same
//!   document syntax the server backends accept
//! - **Constraints** - Unique indexes and `$jsonSchema` collection validators
//! - **Sessions** - Snapshot-based transactions
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::prelude::*;
//! use docmodel::memory::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let mut store = DocumentStore::new(backend);
//!     store.register(Model::builder("users").field(Field::string("name").required()).build())?;
//!
//!     store.model("users")?.save(doc! { "name": "Alice" }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

pub mod store;
mod evaluator;
mod expr;
mod pipeline;
mod schema;
mod update;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
