//! Save and update lifecycle.
//!
//! `save` takes a document keyed by declared field names and runs, in order:
//!
//! 1. schema synchronization (when `sync_schema_on_write` is enabled),
//! 2. field and model validation, collecting every issue,
//! 3. relationship integrity checks against the related collections,
//! 4. defaults, then transforms, then the mapping to storage names,
//! 5. `PreSave` hooks, the insert, `PostSave` hooks for a new document, or the immutability
//!    check, `PreUpdate` hooks, a `$set` and `PostUpdate` hooks for a document carrying an `_id`.
//!
//! A document carrying an `_id` is read first and validated merged over the stored document.
//! Its `PreUpdate` hooks see the storage-shaped changes with the `_id`; `PostUpdate` hooks see the
//! whole document as persisted.
//!
//! `update` applies a patch to every matching document. A patch without operators is treated as
//! `$set`; its declared paths are validated and transformed. Touching an immutable field fails
//! before anything is written.
//!
//! Hooks see storage-shaped documents. A failing `Pre*` hook aborts the write.
//!
//! The immutability check of a bulk update reads the matching documents before writing them.
//! Without a session, a concurrent writer can change that set in between.

use bson::{Bson, Document, doc};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    backend::{FindOptions, StoreBackend, UpdateOptions, UpdateOutcome},
    collection::ModelCollection,
    document::DocumentExt,
    error::{DocumentStoreError, DocumentStoreResult},
    hook::HookPhase,
    query::Expr,
    relationship::RelationshipKind,
    value::{display_id, get_path, set_path, values_equal},
};

impl<'a, B: StoreBackend> ModelCollection<'a, B> {
    /// Validates and writes a document, returning its `_id`.
    ///
    /// A document without `_id` is inserted. A document with `_id` overwrites the stored fields
    /// it carries and leaves the others as stored; it is validated merged over the stored
    /// document, and defaults fill only fields neither of them has. Unchanged immutable fields
    /// are allowed and left out of the write.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::Validation`] with every failed constraint
    /// - [`DocumentStoreError::ForeignKeyViolation`] for a reference to a missing document
    /// - [`DocumentStoreError::ImmutableField`] when an immutable field changes
    /// - [`DocumentStoreError::DocumentNotFound`] when `_id` matches no stored document
    /// - [`DocumentStoreError::HookExecution`] when a hook fails
    pub async fn save(&self, document: Document) -> DocumentStoreResult<Bson> {
        if self.options().sync_schema_on_write {
            self.ensure_schema().await?;
        }

        match document.get("_id").cloned() {
            None | Some(Bson::Null) => self.insert(document).await,
            Some(id) => self.overwrite(id, document).await,
        }
    }

    /// Serializes `value` and saves it.
    pub async fn save_as<T>(&self, value: &T) -> DocumentStoreResult<Bson>
    where
        T: Serialize + DeserializeOwned + Sync,
    {
        self.save(value.to_document()?).await
    }

    /// Applies `patch` to every document matching `filter` and returns how many changed.
    ///
    /// # Errors
    ///
    /// Fails with [`DocumentStoreError::ImmutableField`] if the patch touches an immutable field of
    /// any matching document, and with [`DocumentStoreError::Validation`] if a patched value
    /// breaks a field constraint.
    pub async fn update(&self, filter: impl Into<Expr>, patch: Document) -> DocumentStoreResult<u64> {
        let filter = self.translate(&filter.into())?;
        let outcome = self.apply_update(filter, patch, false).await?;

        Ok(outcome.modified_count)
    }

    /// Applies `patch` to one document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] if no document has this id.
    pub async fn update_by_id(&self, id: impl Into<Bson>, patch: Document) -> DocumentStoreResult<u64> {
        let id = id.into();
        let outcome = self
            .apply_update(doc! { "_id": id.clone() }, patch, true)
            .await?;

        if outcome.matched_count == 0 {
            return Err(DocumentStoreError::DocumentNotFound(display_id(&id), self.name().to_string()));
        }

        Ok(outcome.modified_count)
    }

    async fn insert(&self, mut document: Document) -> DocumentStoreResult<Bson> {
        let model = self.model();

        model.validate(&document).into_result()?;
        self.check_references(&document).await?;

        model.fields().fill_defaults(&mut document);
        model.fields().apply_transforms(&mut document);

        let mut document = model.fields().to_storage(&document);
        document.remove("_id");

        let hooks = model.hooks();
        hooks.run(HookPhase::PreSave, &mut document).await?;

        let id = self
            .backend()
            .insert_one(self.name(), document.clone(), self.session())
            .await?;
        document.insert("_id", id.clone());

        hooks.run(HookPhase::PostSave, &mut document).await?;

        debug!(target: "docmodel::lifecycle", collection = %self.name(), id = %display_id(&id), "Inserted document");

        Ok(id)
    }

    async fn overwrite(&self, id: Bson, mut document: Document) -> DocumentStoreResult<Bson> {
        let model = self.model();
        let fields = model.fields();

        let existing = self
            .backend()
            .find(
                self.name(),
                doc! { "_id": id.clone() },
                FindOptions {
                    limit: Some(1),
                    ..Default::default()
                },
                self.session(),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DocumentStoreError::DocumentNotFound(display_id(&id), self.name().to_string()))?;
        let declared = fields.from_storage(&existing);

        let mut merged = declared.clone();
        for (key, value) in &document {
            merged.insert(key.clone(), value.clone());
        }

        model.validate(&merged).into_result()?;
        self.check_references(&document).await?;

        // Carried embedded documents pick up their nested defaults; absent fields only when the
        // stored document lacks them too.
        fields.fill_defaults(&mut merged);
        for (key, value) in merged {
            if document.contains_key(&key) || !declared.contains_key(&key) {
                document.insert(key, value);
            }
        }
        fields.apply_transforms(&mut document);

        let mut changes = fields.to_storage(&document);
        changes.remove("_id");

        for immutable in fields.immutable_fields() {
            let Some(incoming) = get_path(&changes, &immutable.storage_path) else {
                continue;
            };
            let unchanged = get_path(&existing, &immutable.storage_path)
                .is_some_and(|current| values_equal(current, incoming));

            if unchanged {
                strip_path(&mut changes, &immutable.storage_path);
            } else if immutable.immutability.applies(&declared) {
                return Err(DocumentStoreError::ImmutableField {
                    field: immutable.path.clone(),
                    document_id: Some(display_id(&id)),
                });
            }
        }

        let hooks = model.hooks();
        changes.insert("_id", id.clone());
        hooks.run(HookPhase::PreUpdate, &mut changes).await?;
        changes.remove("_id");

        if !changes.is_empty() {
            let outcome = self
                .backend()
                .update_one(
                    self.name(),
                    doc! { "_id": id.clone() },
                    doc! { "$set": changes.clone() },
                    UpdateOptions::default(),
                    self.session(),
                )
                .await?;

            if outcome.matched_count == 0 {
                return Err(DocumentStoreError::DocumentNotFound(display_id(&id), self.name().to_string()));
            }
        }

        let mut persisted = existing;
        for (path, value) in changes {
            set_path(&mut persisted, &path, value);
        }
        hooks.run(HookPhase::PostUpdate, &mut persisted).await?;

        debug!(target: "docmodel::lifecycle", collection = %self.name(), id = %display_id(&id), "Updated document");

        Ok(id)
    }

    async fn apply_update(&self, filter: Document, patch: Document, single: bool) -> DocumentStoreResult<UpdateOutcome> {
        let fields = self.model().fields();
        let (mut set, mut operators) = split_patch(patch)?;

        fields.validate_partial(&set).into_result()?;
        fields.apply_transforms_partial(&mut set);

        let mut set = fields.patch_to_storage(&set);
        for (_, value) in operators.iter_mut() {
            if let Bson::Document(paths) = value {
                *paths = paths
                    .iter()
                    .map(|(path, v)| (fields.storage_path(path), v.clone()))
                    .collect();
            }
        }

        self.check_immutable_update(&filter, &set, &operators, single).await?;

        let hooks = self.model().hooks();
        hooks.run(HookPhase::PreUpdate, &mut set).await?;

        let mut update = Document::new();
        if !set.is_empty() {
            update.insert("$set", set.clone());
        }
        for (op, paths) in operators {
            update.insert(op, paths);
        }

        if update.is_empty() {
            return Err(DocumentStoreError::InvalidDocument("update patch is empty".to_string()));
        }

        let outcome = if single {
            self.backend()
                .update_one(self.name(), filter, update, UpdateOptions::default(), self.session())
                .await?
        } else {
            self.backend()
                .update_many(self.name(), filter, update, UpdateOptions::default(), self.session())
                .await?
        };

        hooks.run(HookPhase::PostUpdate, &mut set).await?;

        debug!(
            target: "docmodel::lifecycle",
            collection = %self.name(),
            matched = outcome.matched_count,
            modified = outcome.modified_count,
            "Applied update",
        );

        Ok(outcome)
    }

    async fn check_immutable_update(
        &self,
        filter: &Document,
        set: &Document,
        operators: &Document,
        single: bool,
    ) -> DocumentStoreResult<()> {
        let fields = self.model().fields();
        let mut touched_paths = set.keys().cloned().collect::<Vec<_>>();

        for (_, value) in operators {
            if let Bson::Document(paths) = value {
                touched_paths.extend(paths.keys().cloned());
            }
        }

        let touched: Vec<_> = fields
            .immutable_fields()
            .into_iter()
            .filter(|immutable| touched_paths.iter().any(|path| overlaps(path, &immutable.storage_path)))
            .collect();

        if touched.is_empty() {
            return Ok(());
        }

        let options = FindOptions {
            limit: single.then_some(1),
            ..Default::default()
        };
        let documents = self
            .backend()
            .find(self.name(), filter.clone(), options, self.session())
            .await?;

        for document in &documents {
            let declared = fields.from_storage(document);

            for immutable in &touched {
                if immutable.immutability.applies(&declared) {
                    return Err(DocumentStoreError::ImmutableField {
                        field: immutable.path.clone(),
                        document_id: document.get("_id").map(display_id),
                    });
                }
            }
        }

        Ok(())
    }

    /// Every referenced id must exist in the related collection.
    ///
    /// Single relationships are checked through their foreign key; collection relationships
    /// through the ids given in the relationship field itself.
    async fn check_references(&self, document: &Document) -> DocumentStoreResult<()> {
        for (field, descriptor) in self.model().relationships().iter() {
            let key = match descriptor.kind {
                RelationshipKind::OneToOne => descriptor.foreign_key.as_str(),
                RelationshipKind::OneToMany | RelationshipKind::ManyToMany => field,
            };
            let Some(value) = get_path(document, key) else {
                continue;
            };

            let ids = reference_ids(value);
            if ids.is_empty() {
                continue;
            }

            let related = self.registry().require(&descriptor.related_model)?;
            let found = self
                .backend()
                .find(
                    related.collection(),
                    doc! { "_id": { "$in": ids.clone() } },
                    FindOptions {
                        projection: Some(doc! { "_id": 1 }),
                        ..Default::default()
                    },
                    self.session(),
                )
                .await?;

            let missing = ids.into_iter().find(|id| {
                !found
                    .iter()
                    .any(|document| document.get("_id").is_some_and(|found| values_equal(found, id)))
            });

            if let Some(missing) = missing {
                return Err(DocumentStoreError::ForeignKeyViolation {
                    field: key.to_string(),
                    value: missing,
                });
            }
        }

        Ok(())
    }
}

/// Splits a patch into its `$set` part and the remaining operators.
fn split_patch(patch: Document) -> DocumentStoreResult<(Document, Document)> {
    if !patch.keys().any(|key| key.starts_with('$')) {
        return Ok((patch, Document::new()));
    }

    let mut set = Document::new();
    let mut operators = Document::new();

    for (key, value) in patch {
        match (key.as_str(), value) {
            ("$set", Bson::Document(fields)) => set = fields,
            (op, Bson::Document(fields)) if op.starts_with('$') => {
                operators.insert(key, fields);
            },
            (op, _) if op.starts_with('$') => {
                return Err(DocumentStoreError::InvalidDocument(format!("update operator {} expects a document", op)));
            },
            (field, _) => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "field {} cannot be mixed with update operators",
                    field,
                )));
            },
        }
    }

    Ok((set, operators))
}

/// Ids referenced by a relationship value: a single id, a document with `_id`, or an array of
/// either. Nulls are ignored and duplicates collapsed.
fn reference_ids(value: &Bson) -> Vec<Bson> {
    let candidates = match value {
        Bson::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut ids: Vec<Bson> = Vec::new();

    for candidate in candidates {
        let id = match candidate {
            Bson::Null => continue,
            Bson::Document(document) => match document.get("_id") {
                Some(id) => id,
                None => continue,
            },
            other => other,
        };

        if !ids.iter().any(|seen| values_equal(seen, id)) {
            ids.push(id.clone());
        }
    }

    ids
}

/// `true` when writing `path` writes to `target`, its parent or one of its children.
fn overlaps(path: &str, target: &str) -> bool {
    path == target
        || path.starts_with(&format!("{}.", target))
        || target.starts_with(&format!("{}.", path))
}

/// Removes `path` from a `$set` document. Embedded documents on the way are flattened into dotted
/// keys so the sibling values are still written without replacing the stored parent.
fn strip_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        },
        Some((head, rest)) => match document.remove(head) {
            Some(Bson::Document(mut child)) => {
                strip_path(&mut child, rest);
                flatten_into(head, child, document);
            },
            Some(other) => {
                document.insert(head, other);
            },
            None => {},
        },
    }
}

fn flatten_into(prefix: &str, child: Document, out: &mut Document) {
    for (key, value) in child {
        let path = format!("{}.{}", prefix, key);

        match value {
            Bson::Document(inner) if !inner.is_empty() => flatten_into(&path, inner, out),
            other => {
                out.insert(path, other);
            },
        }
    }
}
