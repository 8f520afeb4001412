//! Convenient re-exports of commonly used types from docmodel.
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - Model, field and relationship declarations
//! - Hooks, validators and plugins
//! - The document store, model collections and query builders
//! - Store backends and builders
//! - Error types

pub use bson::{Bson, DateTime, Document, doc, oid::ObjectId};

pub use docmodel_core::{
    backend::{SessionId, StoreBackend, StoreBackendBuilder},
    collection::ModelCollection,
    document::DocumentExt,
    error::{DocumentStoreError, DocumentStoreResult, ValidationCode, ValidationErrors, ValidationIssue},
    field::{Field, FieldBuilder, FieldDescriptor, FieldRegistry, FieldType},
    hook::{Hook, HookPhase, hook_fn},
    model::{Model, ModelBuilder},
    options::DocumentStoreOptions,
    page::{Page, PaginationParams},
    pipeline::{AggregationBuilder, PipelineStages, Stage},
    plugin::{Plugin, SoftDelete, Timestamps},
    query::{Expr, FieldOp, Filter, QueryVisitor, SortDirection},
    query_builder::QueryBuilder,
    relationship::{Junction, RelationshipDescriptor, RelationshipKind},
    schema::{IndexSpec, SchemaEnforcer, ValidationAction, ValidationLevel},
    store::DocumentStore,
    validator::{Validator, validator_fn},
};
