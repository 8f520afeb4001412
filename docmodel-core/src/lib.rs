//! A schema-driven document model layer over document stores.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Field declarations** ([`field`]) - Typed fields with constraints, defaults, transforms,
//!   aliases and immutability
//! - **Relationships** ([`relationship`], [`populate`]) - One-to-one, one-to-many and many-to-many
//!   links resolved into joins
//! - **Models** ([`model`], [`plugin`], [`registry`]) - Fields, relationships, hooks and validators
//!   bound to a collection
//! - **Schema enforcement** ([`schema`]) - Store-side validators and indexes derived from fields
//! - **Lifecycle** ([`lifecycle`], [`hook`], [`validator`]) - Validated saves and updates with
//!   hooks around every write
//! - **Queries** ([`query`], [`query_builder`], [`pipeline`]) - Filter expressions, fluent queries
//!   and aggregation pipelines
//! - **Store backend abstraction** ([`backend`]) - The narrow interface backends implement
//! - **Document store** ([`store`], [`collection`]) - The entry point handing out model handles
//! - **Error handling** ([`error`]) - Error types, including collected validation issues
//!
//! # Example
//!
//! ```ignore
//! use docmodel_core::{field::Field, model::Model, store::DocumentStore};
//! use bson::doc;
//!
//! let mut store = DocumentStore::new(backend);
//! store.register(
//!     Model::builder("users")
//!         .field(Field::string("name").required())
//!         .field(Field::number("age").min(0))
//!         .build(),
//! )?;
//!
//! let id = store.model("users")?.save(doc! { "name": "Alice", "age": 30 }).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod collection;
pub mod document;
pub mod error;
pub mod field;
pub mod hook;
pub mod lifecycle;
pub mod model;
pub mod options;
pub mod page;
pub mod pipeline;
pub mod plugin;
pub mod populate;
pub mod query;
pub mod query_builder;
pub mod registry;
pub mod relationship;
pub mod schema;
pub mod store;
pub mod validator;
pub mod value;
