//! Fluent queries over one model.
//!
//! A [`QueryBuilder`] accumulates a filter expression, sort keys, skip/limit, a projection,
//! relationships to populate and optional pipeline stages. Field names are declared names; they
//! are mapped to storage names when the query runs.
//!
//! How a query executes depends on what it carries:
//!
//! - no population and no stages: a plain filtered read,
//! - population only: a pipeline of match, sort, skip, limit, joins and projection, with the
//!   joined values normalized afterwards,
//! - extra stages: the same pipeline followed by the stages, returned as the store produced it.
//!
//! # Example
//!
//! ```ignore
//! let page = store
//!     .model("posts")?
//!     .query()
//!     .where_field("status", FieldOp::Equal, "published")
//!     .sort_by("createdAt", SortDirection::Desc)
//!     .paginate(2, 10)
//!     .populate(&["author"])
//!     .execute_page()
//!     .await?;
//! ```

use bson::{Bson, Document};
use serde::de::DeserializeOwned;
use std::str::FromStr;
use tracing::debug;

use crate::{
    backend::{FindOptions, StoreBackend},
    collection::ModelCollection,
    error::{DocumentStoreError, DocumentStoreResult},
    page::{Page, PaginationParams},
    pipeline::{PipelineStages, Stage},
    populate::RelationshipResolver,
    query::{Expr, FieldOp, Filter, SortDirection},
};

pub struct QueryBuilder<'a, B: StoreBackend> {
    collection: ModelCollection<'a, B>,
    filter: Expr,
    sort: Document,
    skip: Option<u64>,
    limit: Option<i64>,
    pagination: Option<PaginationParams>,
    projection: Document,
    populate: Vec<String>,
    stages: Vec<Stage>,
    with_deleted: bool,
}

impl<'a, B: StoreBackend> QueryBuilder<'a, B> {
    pub(crate) fn new(collection: ModelCollection<'a, B>) -> Self {
        Self {
            collection,
            filter: Expr::all(),
            sort: Document::new(),
            skip: None,
            limit: None,
            pagination: None,
            projection: Document::new(),
            populate: Vec::new(),
            stages: Vec::new(),
            with_deleted: false,
        }
    }

    /// Adds a condition; conditions combine with AND.
    pub fn filter(mut self, expr: impl Into<Expr>) -> Self {
        self.filter = self.filter.and(expr.into());
        self
    }

    pub fn where_field(self, field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Self {
        self.filter(Expr::field(field, op, value))
    }

    /// Like [`where_field`](Self::where_field), with the operator given by name (`"greaterThan"`).
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] for an unknown operator name.
    pub fn where_op(self, field: impl Into<String>, op: &str, value: impl Into<Bson>) -> DocumentStoreResult<Self> {
        Ok(self.where_field(field, FieldOp::from_str(op)?, value))
    }

    pub fn where_id(self, id: impl Into<Bson>) -> Self {
        self.filter(Filter::eq("_id", id))
    }

    pub fn and(self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        self.filter(Filter::and(exprs))
    }

    pub fn or(self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        self.filter(Filter::or(exprs))
    }

    pub fn nor(self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        self.filter(Filter::nor(exprs))
    }

    pub fn not(self, expr: Expr) -> Self {
        self.filter(expr.not())
    }

    /// Appends a sort key. Earlier keys take precedence.
    pub fn sort_by(mut self, field: &str, direction: SortDirection) -> Self {
        let key = self.collection.model().fields().storage_path(field);
        self.sort.insert(key, direction.as_i32());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Returns only the named fields (and `_id`).
    pub fn select(mut self, fields: &[&str]) -> Self {
        for field in fields {
            let key = self.collection.model().fields().storage_path(field);
            self.projection.insert(key, 1);
        }
        self
    }

    pub fn exclude(mut self, fields: &[&str]) -> Self {
        for field in fields {
            let key = self.collection.model().fields().storage_path(field);
            self.projection.insert(key, 0);
        }
        self
    }

    /// Selects a 1-indexed page: skips `(page - 1) * page_size` and limits to `page_size`.
    pub fn paginate(mut self, page: usize, page_size: usize) -> Self {
        let params = PaginationParams::new(page, page_size);

        self.skip = Some(params.offset() as u64);
        self.limit = Some(params.per_page as i64);
        self.pagination = Some(params);
        self
    }

    /// Names relationship fields to join into the results.
    pub fn populate(mut self, fields: &[&str]) -> Self {
        self.populate
            .extend(fields.iter().map(|field| field.to_string()));
        self
    }

    /// Includes soft-deleted documents.
    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }

    /// The store-native filter this query runs with.
    pub fn build_filter(&self) -> DocumentStoreResult<Document> {
        let mut expr = self.filter.clone();

        if let (Some(field), false) = (self.collection.model().soft_delete_field(), self.with_deleted) {
            expr = expr.and(Filter::eq(field, Bson::Null));
        }

        self.collection.translate(&expr)
    }

    fn find_options(&self) -> FindOptions {
        FindOptions {
            sort: (!self.sort.is_empty()).then(|| self.sort.clone()),
            skip: self.skip,
            limit: self.limit,
            projection: (!self.projection.is_empty()).then(|| self.projection.clone()),
        }
    }

    /// The pipeline this query runs as when it populates or carries stages.
    pub fn build_pipeline(&self) -> DocumentStoreResult<Vec<Document>> {
        let mut stages = vec![Stage::Match(self.build_filter()?)];

        if !self.sort.is_empty() {
            stages.push(Stage::Sort(self.sort.clone()));
        }
        if let Some(skip) = self.skip {
            stages.push(Stage::Skip(skip));
        }
        if let Some(limit) = self.limit {
            stages.push(Stage::Limit(limit));
        }

        stages.extend(self.resolver().stages(&self.populate)?);

        if !self.projection.is_empty() {
            let mut projection = self.projection.clone();

            // Inclusion projections keep the populated fields.
            if projection.values().all(|value| value != &Bson::Int32(0)) {
                for field in &self.populate {
                    projection.insert(field.clone(), 1);
                }
            }

            stages.push(Stage::Project(projection));
        }

        stages.extend(self.stages.iter().cloned());

        Ok(stages
            .iter()
            .map(Stage::to_document)
            .collect())
    }

    fn resolver(&self) -> RelationshipResolver<'_> {
        RelationshipResolver::new(self.collection.model(), self.collection.registry())
    }

    /// Runs the query.
    ///
    /// # Errors
    ///
    /// Backend failures are reported as [`DocumentStoreError::QueryExecution`], or as
    /// [`DocumentStoreError::Aggregation`] when the query carries pipeline stages.
    pub async fn execute(self) -> DocumentStoreResult<Vec<Document>> {
        let filter = self.build_filter()?;
        let options = self.find_options();
        let name = self.collection.name();
        let session = self.collection.session();

        if !self.stages.is_empty() {
            let pipeline = self.build_pipeline()?;

            debug!(target: "docmodel::query", collection = %name, stages = pipeline.len(), "Running query pipeline");

            return self
                .collection
                .backend()
                .aggregate(name, pipeline.clone(), session)
                .await
                .map_err(|e| DocumentStoreError::Aggregation {
                    message: e.to_string(),
                    pipeline,
                });
        }

        let query_error = |e: DocumentStoreError| DocumentStoreError::QueryExecution {
            message: e.to_string(),
            filter: filter.clone(),
            options: options.to_document(),
        };
        let fields = self.collection.model().fields();

        if self.populate.is_empty() {
            debug!(target: "docmodel::query", collection = %name, filter = %filter, "Running find");

            let documents = self
                .collection
                .backend()
                .find(name, filter.clone(), options.clone(), session)
                .await
                .map_err(query_error)?;

            return Ok(documents
                .iter()
                .map(|document| fields.from_storage(document))
                .collect());
        }

        let pipeline = self.build_pipeline()?;

        debug!(target: "docmodel::query", collection = %name, populate = ?self.populate, "Running populated find");

        let documents = self
            .collection
            .backend()
            .aggregate(name, pipeline, session)
            .await
            .map_err(query_error)?;
        let resolver = self.resolver();

        documents
            .iter()
            .map(|document| resolver.normalize(fields.from_storage(document), &self.populate))
            .collect()
    }

    pub async fn first(self) -> DocumentStoreResult<Option<Document>> {
        Ok(self
            .limit(1)
            .execute()
            .await?
            .into_iter()
            .next())
    }

    /// Counts matching documents, ignoring sort, skip, limit and population.
    pub async fn count(&self) -> DocumentStoreResult<u64> {
        let filter = self.build_filter()?;

        self.collection
            .backend()
            .count_documents(self.collection.name(), filter, self.collection.session())
            .await
            .map_err(|e| DocumentStoreError::Count(e.to_string()))
    }

    /// Returns the backend's plan for the find this query would run.
    pub async fn explain(&self) -> DocumentStoreResult<Document> {
        let filter = self.build_filter()?;

        self.collection
            .backend()
            .explain(self.collection.name(), filter, self.find_options())
            .await
            .map_err(|e| DocumentStoreError::Explain(e.to_string()))
    }

    /// Runs the query and wraps the results in a [`Page`] with the total match count.
    ///
    /// Without [`paginate`](Self::paginate) the first page of the default size is fetched.
    pub async fn execute_page(mut self) -> DocumentStoreResult<Page<Document>> {
        let params = match self.pagination {
            Some(params) => params,
            None => {
                let params = PaginationParams::default();
                self = self.paginate(params.page, params.per_page);
                params
            },
        };

        let count = self.count().await? as usize;
        let items = self.execute().await?;

        Ok(Page::from_params(items, count, &params))
    }

    /// Runs the query and deserializes each result.
    pub async fn execute_as<T: DeserializeOwned>(self) -> DocumentStoreResult<Vec<T>> {
        self.execute()
            .await?
            .into_iter()
            .map(|document| Ok(bson::de::deserialize_from_document(document)?))
            .collect()
    }
}

impl<'a, B: StoreBackend> PipelineStages for QueryBuilder<'a, B> {
    fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }
}

impl<'a, B: StoreBackend> std::fmt::Debug for QueryBuilder<'a, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("collection", &self.collection.name())
            .field("filter", &self.filter)
            .field("sort", &self.sort)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("projection", &self.projection)
            .field("populate", &self.populate)
            .field("stages", &self.stages)
            .finish()
    }
}
