//! In-memory storage implementation for document stores.
//!
//! Collections keep their documents in insertion order behind an async-safe read-write lock.
//! Filters, updates and aggregation pipelines use the same document syntax as the server
//! backends, evaluated by scanning.

use std::{collections::HashMap, sync::Arc};
use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use indexmap::IndexMap;
use mea::rwlock::RwLock;
use tracing::debug;

use docmodel_core::{
    backend::{FindOptions, SessionId, StoreBackend, StoreBackendBuilder, UpdateOptions, UpdateOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
    schema::{IndexSpec, ValidationAction, ValidationLevel},
    value::{as_f64, display_id, get_path, type_name, values_equal},
};

use crate::{
    evaluator::DocumentEvaluator,
    pipeline::{PipelineRunner, compare_by_keys, project},
    schema::SchemaValidator,
    update::{apply_update, upsert_seed},
};

type Collections = IndexMap<String, CollectionState>;

#[derive(Debug, Clone, Default)]
struct CollectionState {
    /// Documents keyed by their normalized `_id`.
    documents: IndexMap<String, Document>,
    indexes: Vec<IndexSpec>,
    validator: Option<SchemaValidator>,
}

#[derive(Debug, Default)]
struct StoreState {
    collections: Collections,
    /// Open sessions and, while a transaction runs, the collections as they were when it began.
    sessions: HashMap<SessionId, Option<Collections>>,
}

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing it to be
/// shared across async tasks. Clones share the same underlying data.
///
/// The store enforces unique indexes and collection validators the way a document server does,
/// so it doubles as a test double for the engine.
///
/// # Transactions
///
/// A transaction snapshots every collection when it starts; aborting restores the snapshot.
/// Transactions are not isolated from each other: writes outside the transaction that happen
/// before an abort are rolled back with it.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::{StoreBackend, FindOptions};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let id = store.insert_one("users", doc! { "name": "Alice", "age": 30 }, None).await?;
/// let found = store.find("users", doc! { "_id": id }, FindOptions::default(), None).await?;
/// assert_eq!(found.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
        }
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

impl StoreState {
    fn require_session(&self, session: Option<SessionId>) -> DocumentStoreResult<()> {
        match session {
            Some(id) if !self.sessions.contains_key(&id) => {
                Err(DocumentStoreError::Session(format!("unknown session {}", id)))
            },
            _ => Ok(()),
        }
    }

    fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|state| state.documents.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Identity key of an `_id`: numbers compare by value, anything else by type and rendering.
fn id_key(id: &Bson) -> String {
    match as_f64(id) {
        Some(n) => format!("number:{}", n),
        None => format!("{}:{}", type_name(id), display_id(id)),
    }
}

fn matching_keys(state: &CollectionState, filter: &Document) -> DocumentStoreResult<Vec<String>> {
    let mut keys = Vec::new();

    for (key, document) in &state.documents {
        if DocumentEvaluator::new(document).evaluate(filter)? {
            keys.push(key.clone());
        }
    }

    Ok(keys)
}

fn check_unique(
    name: &str,
    state: &CollectionState,
    candidate: &Document,
    own_key: Option<&str>,
) -> DocumentStoreResult<()> {
    for index in state.indexes.iter().filter(|index| index.unique) {
        let values = index
            .keys
            .keys()
            .map(|path| get_path(candidate, path).cloned().unwrap_or(Bson::Null))
            .collect::<Vec<_>>();

        let clash = state
            .documents
            .iter()
            .filter(|(key, _)| Some(key.as_str()) != own_key)
            .any(|(_, existing)| {
                index
                    .keys
                    .keys()
                    .zip(&values)
                    .all(|(path, value)| values_equal(get_path(existing, path).unwrap_or(&Bson::Null), value))
            });

        if clash {
            let rendered = index
                .keys
                .keys()
                .zip(&values)
                .map(|(path, value)| format!("{}: {}", path, value))
                .collect::<Vec<_>>()
                .join(", ");

            return Err(DocumentStoreError::DuplicateKey {
                collection: name.to_string(),
                key: format!("{} dup key: {{ {} }}", index.index_name(), rendered),
            });
        }
    }

    Ok(())
}

fn insert_into(name: &str, state: &mut CollectionState, document: Document) -> DocumentStoreResult<Bson> {
    let id = match document.get("_id") {
        Some(Bson::Null) | None => Bson::ObjectId(ObjectId::new()),
        Some(id) => id.clone(),
    };
    let key = id_key(&id);

    if state.documents.contains_key(&key) {
        return Err(DocumentStoreError::DocumentAlreadyExists(display_id(&id), name.to_string()));
    }

    let mut stored = doc! { "_id": id.clone() };
    for (field, value) in document {
        if field != "_id" {
            stored.insert(field, value);
        }
    }

    if let Some(validator) = &state.validator {
        validator.check(name, &stored, None)?;
    }
    check_unique(name, state, &stored, None)?;

    state.documents.insert(key, stored);

    Ok(id)
}

fn update_in(
    name: &str,
    state: &mut CollectionState,
    filter: &Document,
    update: &Document,
    options: UpdateOptions,
    many: bool,
) -> DocumentStoreResult<UpdateOutcome> {
    let mut keys = matching_keys(state, filter)?;
    if !many {
        keys.truncate(1);
    }

    if keys.is_empty() {
        if !options.upsert {
            return Ok(UpdateOutcome::default());
        }

        let mut seed = upsert_seed(filter);
        apply_update(&mut seed, update, true)?;
        let id = insert_into(name, state, seed)?;

        return Ok(UpdateOutcome {
            matched_count: 0,
            modified_count: 0,
            upserted_id: Some(id),
        });
    }

    let mut staged = state.clone();
    let mut modified = 0;

    for key in &keys {
        let Some(previous) = state.documents.get(key) else {
            continue;
        };
        let mut next = previous.clone();
        apply_update(&mut next, update, false)?;

        if !values_equal(next.get("_id").unwrap_or(&Bson::Null), previous.get("_id").unwrap_or(&Bson::Null)) {
            return Err(DocumentStoreError::InvalidDocument("the _id field cannot be modified".to_string()));
        }
        if &next == previous {
            continue;
        }

        if let Some(validator) = &state.validator {
            validator.check(name, &next, Some(previous))?;
        }
        check_unique(name, &staged, &next, Some(key))?;

        staged.documents.insert(key.clone(), next);
        modified += 1;
    }

    *state = staged;

    Ok(UpdateOutcome {
        matched_count: keys.len() as u64,
        modified_count: modified,
        upserted_id: None,
    })
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_one(&self, collection: &str, document: Document, session: Option<SessionId>) -> DocumentStoreResult<Bson> {
        let mut state = self.state.write().await;
        state.require_session(session)?;

        let target = state
            .collections
            .entry(collection.to_string())
            .or_default();
        let id = insert_into(collection, target, document)?;

        debug!(target: "docmodel::memory", collection = %collection, id = %id, "Inserted document");

        Ok(id)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut state = self.state.write().await;
        state.require_session(session)?;

        let target = state
            .collections
            .entry(collection.to_string())
            .or_default();

        update_in(collection, target, &filter, &update, options, false)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut state = self.state.write().await;
        state.require_session(session)?;

        let target = state
            .collections
            .entry(collection.to_string())
            .or_default();
        let outcome = update_in(collection, target, &filter, &update, options, true)?;

        debug!(
            target: "docmodel::memory",
            collection = %collection,
            matched = outcome.matched_count,
            modified = outcome.modified_count,
            "Updated documents",
        );

        Ok(outcome)
    }

    async fn delete_one(&self, collection: &str, filter: Document, session: Option<SessionId>) -> DocumentStoreResult<u64> {
        let mut state = self.state.write().await;
        state.require_session(session)?;

        let Some(target) = state.collections.get_mut(collection) else {
            return Ok(0);
        };

        match matching_keys(target, &filter)?.first() {
            Some(key) => {
                target.documents.shift_remove(key);
                Ok(1)
            },
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, filter: Document, session: Option<SessionId>) -> DocumentStoreResult<u64> {
        let mut state = self.state.write().await;
        state.require_session(session)?;

        let Some(target) = state.collections.get_mut(collection) else {
            return Ok(0);
        };

        let keys = matching_keys(target, &filter)?;
        for key in &keys {
            target.documents.shift_remove(key);
        }

        debug!(target: "docmodel::memory", collection = %collection, deleted = keys.len(), "Deleted documents");

        Ok(keys.len() as u64)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<Vec<Document>> {
        let state = self.state.read().await;
        state.require_session(session)?;

        let documents = state.documents(collection);
        let mut matched = DocumentEvaluator::filter_documents(&documents, &filter)?;

        if let Some(sort) = &options.sort {
            let keys = sort
                .iter()
                .map(|(path, direction)| (path.clone(), as_f64(direction).unwrap_or(1.0) < 0.0))
                .collect::<Vec<_>>();
            matched.sort_by(|a, b| compare_by_keys(a, b, &keys));
        }

        let skip = options.skip.unwrap_or(0) as usize;
        let mut results = matched
            .into_iter()
            .skip(skip)
            .collect::<Vec<_>>();

        // A negative limit behaves like its absolute value; zero means no limit.
        if let Some(limit) = options.limit.filter(|limit| *limit != 0) {
            results.truncate(limit.unsigned_abs() as usize);
        }

        match &options.projection {
            Some(projection) => results
                .iter()
                .map(|document| project(document, projection))
                .collect(),
            None => Ok(results),
        }
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<Vec<Document>> {
        let state = self.state.read().await;
        state.require_session(session)?;

        let lookup = |name: &str| state.documents(name);

        PipelineRunner::new(&lookup).run(state.documents(collection), &pipeline)
    }

    async fn count_documents(&self, collection: &str, filter: Document, session: Option<SessionId>) -> DocumentStoreResult<u64> {
        let state = self.state.read().await;
        state.require_session(session)?;

        let documents = state.documents(collection);

        Ok(DocumentEvaluator::filter_documents(&documents, &filter)?.len() as u64)
    }

    async fn explain(&self, collection: &str, filter: Document, options: FindOptions) -> DocumentStoreResult<Document> {
        let state = self.state.read().await;

        let documents = state.documents(collection);
        let returned = DocumentEvaluator::filter_documents(&documents, &filter)?.len() as i64;

        Ok(doc! {
            "queryPlanner": {
                "namespace": collection,
                "parsedQuery": filter.clone(),
                "winningPlan": { "stage": "COLLSCAN", "filter": filter },
                "options": options.to_document(),
            },
            "executionStats": {
                "nReturned": returned,
                "totalDocsExamined": documents.len() as i64,
            },
        })
    }

    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexSpec>) -> DocumentStoreResult<()> {
        let mut state = self.state.write().await;
        let target = state
            .collections
            .entry(collection.to_string())
            .or_default();

        for index in indexes {
            let name = index.index_name();
            let mut staged = target.clone();
            staged.indexes.retain(|existing| existing.index_name() != name);
            staged.indexes.push(index);

            if staged.indexes.last().is_some_and(|index| index.unique) {
                let mut probe = CollectionState {
                    indexes: staged.indexes.clone(),
                    ..CollectionState::default()
                };
                for (key, document) in &staged.documents {
                    check_unique(collection, &probe, document, None)?;
                    probe.documents.insert(key.clone(), document.clone());
                }
            }

            debug!(target: "docmodel::memory", collection = %collection, index = %name, "Created index");
            *target = staged;
        }

        Ok(())
    }

    async fn list_collections(&self, name: Option<&str>) -> DocumentStoreResult<Vec<String>> {
        let state = self.state.read().await;

        Ok(state
            .collections
            .keys()
            .filter(|existing| name.is_none_or(|name| name == existing.as_str()))
            .cloned()
            .collect())
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let mut state = self.state.write().await;
        state.collections.entry(name.to_string()).or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let mut state = self.state.write().await;
        state.collections.shift_remove(name);

        Ok(())
    }

    async fn modify_schema(
        &self,
        collection: &str,
        validator: Document,
        level: ValidationLevel,
        action: ValidationAction,
    ) -> DocumentStoreResult<()> {
        let mut state = self.state.write().await;
        let target = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| DocumentStoreError::CollectionNotFound(collection.to_string()))?;

        target.validator = Some(SchemaValidator::new(&validator, level, action));

        Ok(())
    }

    async fn start_session(&self) -> DocumentStoreResult<SessionId> {
        let mut state = self.state.write().await;
        let session = SessionId::new();
        state.sessions.insert(session, None);

        Ok(session)
    }

    async fn start_transaction(&self, session: SessionId) -> DocumentStoreResult<()> {
        let mut state = self.state.write().await;
        let snapshot = state.collections.clone();

        match state.sessions.get_mut(&session) {
            None => Err(DocumentStoreError::Session(format!("unknown session {}", session))),
            Some(Some(_)) => Err(DocumentStoreError::Session(format!("session {} already has a transaction", session))),
            Some(slot) => {
                *slot = Some(snapshot);
                Ok(())
            },
        }
    }

    async fn commit_transaction(&self, session: SessionId) -> DocumentStoreResult<()> {
        let mut state = self.state.write().await;

        match state.sessions.get_mut(&session).map(Option::take) {
            Some(Some(_)) => Ok(()),
            Some(None) => Err(DocumentStoreError::Session(format!("session {} has no transaction", session))),
            None => Err(DocumentStoreError::Session(format!("unknown session {}", session))),
        }
    }

    async fn abort_transaction(&self, session: SessionId) -> DocumentStoreResult<()> {
        let mut state = self.state.write().await;

        match state.sessions.get_mut(&session).map(Option::take) {
            Some(Some(snapshot)) => {
                state.collections = snapshot;
                Ok(())
            },
            Some(None) => Err(DocumentStoreError::Session(format!("session {} has no transaction", session))),
            None => Err(DocumentStoreError::Session(format!("unknown session {}", session))),
        }
    }

    async fn end_session(&self, session: SessionId) -> DocumentStoreResult<()> {
        let mut state = self.state.write().await;

        match state.sessions.remove(&session) {
            Some(Some(snapshot)) => {
                state.collections = snapshot;
                Ok(())
            },
            Some(None) => Ok(()),
            None => Err(DocumentStoreError::Session(format!("unknown session {}", session))),
        }
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_generates_ids_and_rejects_duplicates() {
        let store = InMemoryStore::new();

        let id = store.insert_one("users", doc! { "name": "a" }, None).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        store.insert_one("users", doc! { "_id": 1, "name": "b" }, None).await.unwrap();
        let result = store.insert_one("users", doc! { "_id": 1.0, "name": "c" }, None).await;
        assert!(matches!(result, Err(DocumentStoreError::DocumentAlreadyExists(_, _))));
    }

    #[tokio::test]
    async fn unique_indexes_reject_duplicates() {
        let store = InMemoryStore::new();
        store
            .create_indexes("users", vec![IndexSpec::new(doc! { "email": 1 }).unique(true)])
            .await
            .unwrap();

        store.insert_one("users", doc! { "email": "a@x.io" }, None).await.unwrap();
        let other = store.insert_one("users", doc! { "email": "b@x.io" }, None).await.unwrap();

        let duplicate = store.insert_one("users", doc! { "email": "a@x.io" }, None).await;
        assert!(matches!(duplicate, Err(DocumentStoreError::DuplicateKey { .. })));

        let clash = store
            .update_one("users", doc! { "_id": other }, doc! { "$set": { "email": "a@x.io" } }, UpdateOptions::default(), None)
            .await;
        assert!(matches!(clash, Err(DocumentStoreError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn find_sorts_skips_limits_and_projects() {
        let store = InMemoryStore::new();
        for n in [3, 1, 2, 5, 4] {
            store.insert_one("numbers", doc! { "_id": n, "n": n, "label": format!("#{}", n) }, None).await.unwrap();
        }

        let found = store
            .find(
                "numbers",
                doc! { "n": { "$gt": 1 } },
                FindOptions {
                    sort: Some(doc! { "n": -1 }),
                    skip: Some(1),
                    limit: Some(2),
                    projection: Some(doc! { "label": 1, "_id": 0 }),
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(found, vec![doc! { "label": "#4" }, doc! { "label": "#3" }]);
        assert_eq!(store.count_documents("numbers", doc! {}, None).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn updates_count_matches_and_upsert() {
        let store = InMemoryStore::new();
        store.insert_one("users", doc! { "role": "user", "n": 1 }, None).await.unwrap();
        store.insert_one("users", doc! { "role": "user", "n": 1 }, None).await.unwrap();

        let outcome = store
            .update_many("users", doc! { "role": "user" }, doc! { "$inc": { "n": 1 } }, UpdateOptions::default(), None)
            .await
            .unwrap();
        assert_eq!((outcome.matched_count, outcome.modified_count), (2, 2));

        let unchanged = store
            .update_one("users", doc! { "n": 2 }, doc! { "$set": { "n": 2 } }, UpdateOptions::default(), None)
            .await
            .unwrap();
        assert_eq!((unchanged.matched_count, unchanged.modified_count), (1, 0));

        let upserted = store
            .update_one(
                "users",
                doc! { "email": "new@x.io" },
                doc! { "$set": { "role": "admin" } },
                UpdateOptions { upsert: true },
                None,
            )
            .await
            .unwrap();
        let id = upserted.upserted_id.unwrap();

        let found = store.find("users", doc! { "_id": id }, FindOptions::default(), None).await.unwrap();
        assert_eq!(found[0].get_str("email").unwrap(), "new@x.io");
        assert_eq!(found[0].get_str("role").unwrap(), "admin");
    }

    #[tokio::test]
    async fn validators_reject_invalid_writes() {
        let store = InMemoryStore::new();
        store.create_collection("users").await.unwrap();
        store
            .modify_schema(
                "users",
                doc! { "$jsonSchema": { "bsonType": "object", "required": ["name"] } },
                ValidationLevel::Strict,
                ValidationAction::Error,
            )
            .await
            .unwrap();

        let result = store.insert_one("users", doc! { "age": 3 }, None).await;
        assert!(matches!(result, Err(DocumentStoreError::InvalidDocument(_))));
    }

    #[tokio::test]
    async fn aborted_transactions_roll_back() {
        let store = InMemoryStore::new();
        let session = store.start_session().await.unwrap();

        store.start_transaction(session).await.unwrap();
        store.insert_one("users", doc! { "name": "a" }, Some(session)).await.unwrap();
        store.abort_transaction(session).await.unwrap();
        assert_eq!(store.count_documents("users", doc! {}, None).await.unwrap(), 0);

        store.start_transaction(session).await.unwrap();
        store.insert_one("users", doc! { "name": "b" }, Some(session)).await.unwrap();
        store.commit_transaction(session).await.unwrap();
        store.end_session(session).await.unwrap();
        assert_eq!(store.count_documents("users", doc! {}, None).await.unwrap(), 1);

        let stale = store.insert_one("users", doc! { "name": "c" }, Some(session)).await;
        assert!(matches!(stale, Err(DocumentStoreError::Session(_))));
    }

    #[tokio::test]
    async fn commit_requires_an_open_transaction() {
        let store = InMemoryStore::new();
        let session = store.start_session().await.unwrap();

        let err = store.commit_transaction(session).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::Session(_)));

        store.start_transaction(session).await.unwrap();
        store.commit_transaction(session).await.unwrap();

        let err = store.commit_transaction(session).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::Session(_)));

        store.end_session(session).await.unwrap();
        let err = store.commit_transaction(session).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::Session(_)));
    }

    #[tokio::test]
    async fn aggregate_looks_up_other_collections() {
        let store = InMemoryStore::new();
        let author = store.insert_one("users", doc! { "name": "Ada" }, None).await.unwrap();
        store.insert_one("posts", doc! { "title": "On engines", "authorId": author }, None).await.unwrap();

        let results = store
            .aggregate(
                "posts",
                vec![
                    doc! { "$lookup": { "from": "users", "localField": "authorId", "foreignField": "_id", "as": "author" } },
                    doc! { "$unwind": { "path": "$author", "preserveNullAndEmptyArrays": true } },
                ],
                None,
            )
            .await
            .unwrap();

        assert_eq!(results[0].get_document("author").unwrap().get_str("name").unwrap(), "Ada");
    }
}
