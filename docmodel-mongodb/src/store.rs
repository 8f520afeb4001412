use std::collections::HashMap;
use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{Bson, Document, doc};
use mea::mutex::Mutex;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection, Database, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOptions as MongoFindOptions, IndexOptions},
};
use tracing::debug;

use docmodel_core::{
    backend::{FindOptions, SessionId, StoreBackend, StoreBackendBuilder, UpdateOptions, UpdateOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
    schema::{IndexSpec, ValidationAction, ValidationLevel},
};

const DUPLICATE_KEY: i32 = 11000;
const DOCUMENT_VALIDATION_FAILURE: i32 = 121;

/// Storage backend over a MongoDB database.
///
/// Sessions handed out by [`start_session`](StoreBackend::start_session) are kept by the store
/// and looked up by token for every operation that names one.
pub struct MongoDbStore {
    client: Client,
    database: String,
    sessions: Mutex<HashMap<SessionId, ClientSession>>,
}

impl std::fmt::Debug for MongoDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoDbStore")
            .field("client", &self.client)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self {
            client,
            database,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn database(&self) -> Database {
        self.client.database(&self.database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.database().collection(collection_name)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        drop(self.sessions);
        self.client.shutdown().await;

        Ok(())
    }
}

fn unknown_session(session: SessionId) -> DocumentStoreError {
    DocumentStoreError::Session(format!("unknown session {}", session))
}

fn session_mut(sessions: &mut HashMap<SessionId, ClientSession>, session: SessionId) -> DocumentStoreResult<&mut ClientSession> {
    sessions
        .get_mut(&session)
        .ok_or_else(|| unknown_session(session))
}

/// Maps driver errors onto the store's error kinds.
fn map_error(collection: &str, error: MongoError) -> DocumentStoreError {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure)) if failure.code == DUPLICATE_KEY => {
            DocumentStoreError::DuplicateKey {
                collection: collection.to_string(),
                key: failure.message.clone(),
            }
        },
        ErrorKind::Command(failure) if failure.code == DUPLICATE_KEY => DocumentStoreError::DuplicateKey {
            collection: collection.to_string(),
            key: failure.message.clone(),
        },
        ErrorKind::Write(WriteFailure::WriteError(failure)) if failure.code == DOCUMENT_VALIDATION_FAILURE => {
            DocumentStoreError::InvalidDocument(failure.message.clone())
        },
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => DocumentStoreError::Connection(error.to_string()),
        _ => DocumentStoreError::Backend(error.to_string()),
    }
}

fn is_operator_document(document: &Document) -> bool {
    document
        .keys()
        .next()
        .is_some_and(|key| key.starts_with('$'))
}

fn find_options(options: FindOptions) -> MongoFindOptions {
    let mut mongo_options = MongoFindOptions::default();

    mongo_options.sort = options.sort;
    mongo_options.skip = options.skip;
    mongo_options.limit = options.limit;
    mongo_options.projection = options.projection;

    mongo_options
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_one(&self, collection: &str, document: Document, session: Option<SessionId>) -> DocumentStoreResult<Bson> {
        let target = self.get_collection(collection);

        let result = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                target
                    .insert_one(document)
                    .session(session_mut(&mut sessions, id)?)
                    .await
            },
            None => target.insert_one(document).await,
        }
        .map_err(|e| map_error(collection, e))?;

        Ok(result.inserted_id)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let target = self.get_collection(collection);
        let replacing = !is_operator_document(&update);

        let result = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                if replacing {
                    target
                        .replace_one(filter, update)
                        .upsert(options.upsert)
                        .session(session)
                        .await
                } else {
                    target
                        .update_one(filter, update)
                        .upsert(options.upsert)
                        .session(session)
                        .await
                }
            },
            None if replacing => target
                .replace_one(filter, update)
                .upsert(options.upsert)
                .await,
            None => target
                .update_one(filter, update)
                .upsert(options.upsert)
                .await,
        }
        .map_err(|e| map_error(collection, e))?;

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        if !is_operator_document(&update) {
            return Err(DocumentStoreError::InvalidDocument(
                "update_many requires update operators".to_string(),
            ));
        }

        let target = self.get_collection(collection);

        let result = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                target
                    .update_many(filter, update)
                    .upsert(options.upsert)
                    .session(session_mut(&mut sessions, id)?)
                    .await
            },
            None => target
                .update_many(filter, update)
                .upsert(options.upsert)
                .await,
        }
        .map_err(|e| map_error(collection, e))?;

        debug!(
            target: "docmodel::mongodb",
            collection = %collection,
            matched = result.matched_count,
            modified = result.modified_count,
            "Updated documents",
        );

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, collection: &str, filter: Document, session: Option<SessionId>) -> DocumentStoreResult<u64> {
        let target = self.get_collection(collection);

        let result = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                target
                    .delete_one(filter)
                    .session(session_mut(&mut sessions, id)?)
                    .await
            },
            None => target.delete_one(filter).await,
        }
        .map_err(|e| map_error(collection, e))?;

        Ok(result.deleted_count)
    }

    async fn delete_many(&self, collection: &str, filter: Document, session: Option<SessionId>) -> DocumentStoreResult<u64> {
        let target = self.get_collection(collection);

        let result = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                target
                    .delete_many(filter)
                    .session(session_mut(&mut sessions, id)?)
                    .await
            },
            None => target.delete_many(filter).await,
        }
        .map_err(|e| map_error(collection, e))?;

        Ok(result.deleted_count)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<Vec<Document>> {
        let target = self.get_collection(collection);
        let options = find_options(options);

        match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                let mut cursor = target
                    .find(filter)
                    .with_options(options)
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_error(collection, e))?;

                cursor
                    .stream(session)
                    .try_collect::<Vec<Document>>()
                    .await
                    .map_err(|e| map_error(collection, e))
            },
            None => target
                .find(filter)
                .with_options(options)
                .await
                .map_err(|e| map_error(collection, e))?
                .try_collect::<Vec<Document>>()
                .await
                .map_err(|e| map_error(collection, e)),
        }
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        session: Option<SessionId>,
    ) -> DocumentStoreResult<Vec<Document>> {
        let target = self.get_collection(collection);

        match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                let mut cursor = target
                    .aggregate(pipeline)
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_error(collection, e))?;

                cursor
                    .stream(session)
                    .try_collect::<Vec<Document>>()
                    .await
                    .map_err(|e| map_error(collection, e))
            },
            None => target
                .aggregate(pipeline)
                .await
                .map_err(|e| map_error(collection, e))?
                .try_collect::<Vec<Document>>()
                .await
                .map_err(|e| map_error(collection, e)),
        }
    }

    async fn count_documents(&self, collection: &str, filter: Document, session: Option<SessionId>) -> DocumentStoreResult<u64> {
        let target = self.get_collection(collection);

        let count = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                target
                    .count_documents(filter)
                    .session(session_mut(&mut sessions, id)?)
                    .await
            },
            None => target.count_documents(filter).await,
        };

        count.map_err(|e| map_error(collection, e))
    }

    async fn explain(&self, collection: &str, filter: Document, options: FindOptions) -> DocumentStoreResult<Document> {
        let mut command = doc! { "find": collection, "filter": filter };

        if let Some(sort) = options.sort {
            command.insert("sort", sort);
        }
        if let Some(skip) = options.skip {
            command.insert("skip", skip as i64);
        }
        if let Some(limit) = options.limit {
            command.insert("limit", limit);
        }
        if let Some(projection) = options.projection {
            command.insert("projection", projection);
        }

        self.database()
            .run_command(doc! { "explain": command, "verbosity": "queryPlanner" })
            .await
            .map_err(|e| map_error(collection, e))
    }

    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexSpec>) -> DocumentStoreResult<()> {
        let models = indexes
            .into_iter()
            .map(|index| {
                IndexModel::builder()
                    .options(
                        IndexOptions::builder()
                            .unique(index.unique)
                            .name(index.index_name())
                            .build(),
                    )
                    .keys(index.keys)
                    .build()
            })
            .collect::<Vec<_>>();

        self.get_collection(collection)
            .create_indexes(models)
            .await
            .map_err(|e| map_error(collection, e))?;

        Ok(())
    }

    async fn list_collections(&self, name: Option<&str>) -> DocumentStoreResult<Vec<String>> {
        let database = self.database();
        let listing = database.list_collection_names();

        let names = match name {
            Some(name) => listing.filter(doc! { "name": name }).await,
            None => listing.await,
        };

        names.map_err(|e| map_error(name.unwrap_or_default(), e))
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.database()
            .create_collection(name)
            .await
            .map_err(|e| map_error(name, e))?;

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(|e| map_error(name, e))?;

        Ok(())
    }

    async fn modify_schema(
        &self,
        collection: &str,
        validator: Document,
        level: ValidationLevel,
        action: ValidationAction,
    ) -> DocumentStoreResult<()> {
        self.database()
            .run_command(doc! {
                "collMod": collection,
                "validator": validator,
                "validationLevel": level.as_str(),
                "validationAction": action.as_str(),
            })
            .await
            .map_err(|e| map_error(collection, e))?;

        Ok(())
    }

    async fn start_session(&self) -> DocumentStoreResult<SessionId> {
        let session = self
            .client
            .start_session()
            .await
            .map_err(|e| DocumentStoreError::Session(e.to_string()))?;
        let id = SessionId::new();

        self.sessions.lock().await.insert(id, session);

        Ok(id)
    }

    async fn start_transaction(&self, session: SessionId) -> DocumentStoreResult<()> {
        let mut sessions = self.sessions.lock().await;

        session_mut(&mut sessions, session)?
            .start_transaction()
            .await
            .map_err(|e| DocumentStoreError::Session(e.to_string()))
    }

    async fn commit_transaction(&self, session: SessionId) -> DocumentStoreResult<()> {
        let mut sessions = self.sessions.lock().await;

        session_mut(&mut sessions, session)?
            .commit_transaction()
            .await
            .map_err(|e| DocumentStoreError::Session(e.to_string()))
    }

    async fn abort_transaction(&self, session: SessionId) -> DocumentStoreResult<()> {
        let mut sessions = self.sessions.lock().await;

        session_mut(&mut sessions, session)?
            .abort_transaction()
            .await
            .map_err(|e| DocumentStoreError::Session(e.to_string()))
    }

    async fn end_session(&self, session: SessionId) -> DocumentStoreResult<()> {
        self.sessions
            .lock()
            .await
            .remove(&session)
            .map(drop)
            .ok_or_else(|| unknown_session(session))
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.shutdown().await
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_find_options() {
        let options = find_options(FindOptions {
            sort: Some(doc! { "name": 1 }),
            skip: Some(10),
            limit: Some(5),
            projection: None,
        });

        assert_eq!(options.sort, Some(doc! { "name": 1 }));
        assert_eq!(options.skip, Some(10));
        assert_eq!(options.limit, Some(5));
    }

    #[test]
    fn detects_operator_updates() {
        assert!(is_operator_document(&doc! { "$set": { "a": 1 } }));
        assert!(!is_operator_document(&doc! { "a": 1 }));
    }
}
