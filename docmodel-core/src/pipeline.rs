//! Aggregation pipeline stages.
//!
//! [`Stage`] models the store's pipeline stages; [`PipelineStages`] is the fluent surface shared
//! by the [`AggregationBuilder`] and the [`QueryBuilder`](crate::query_builder::QueryBuilder).
//! Stages are kept in the order they were added.
//!
//! ```ignore
//! let totals = store
//!     .model("orders")?
//!     .aggregate()
//!     .group(doc! {
//!         "_id": "$product",
//!         "total": { "$sum": { "$multiply": ["$quantity", "$price"] } },
//!     })
//!     .sort_stage(doc! { "total": -1 })
//!     .execute()
//!     .await?;
//! ```

use bson::{Bson, Document, doc};
use tracing::debug;

use crate::{
    backend::StoreBackend,
    collection::ModelCollection,
    error::{DocumentStoreError, DocumentStoreResult},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Document),
    Group(Document),
    Sort(Document),
    Project(Document),
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    Unwind {
        path: String,
        preserve_null_and_empty_arrays: bool,
    },
    AddFields(Document),
    ReplaceRoot(Bson),
    Facet(Document),
    Bucket(Document),
    GraphLookup(Document),
    Merge(Document),
    Redact(Bson),
    /// Counts the documents into a field of the given name.
    Count(String),
    Limit(i64),
    Skip(u64),
}

impl Stage {
    pub fn lookup(
        from: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        Stage::Lookup {
            from: from.into(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
        }
    }

    /// Unwind of a field path, with or without the leading `$`.
    pub fn unwind(path: impl Into<String>, preserve_null_and_empty_arrays: bool) -> Self {
        let path = path.into();

        Stage::Unwind {
            path: if path.starts_with('$') { path } else { format!("${}", path) },
            preserve_null_and_empty_arrays,
        }
    }

    pub fn to_document(&self) -> Document {
        match self {
            Stage::Match(filter) => doc! { "$match": filter.clone() },
            Stage::Group(group) => doc! { "$group": group.clone() },
            Stage::Sort(sort) => doc! { "$sort": sort.clone() },
            Stage::Project(projection) => doc! { "$project": projection.clone() },
            Stage::Lookup { from, local_field, foreign_field, as_field } => doc! {
                "$lookup": {
                    "from": from.clone(),
                    "localField": local_field.clone(),
                    "foreignField": foreign_field.clone(),
                    "as": as_field.clone(),
                },
            },
            Stage::Unwind { path, preserve_null_and_empty_arrays } => doc! {
                "$unwind": {
                    "path": path.clone(),
                    "preserveNullAndEmptyArrays": *preserve_null_and_empty_arrays,
                },
            },
            Stage::AddFields(fields) => doc! { "$addFields": fields.clone() },
            Stage::ReplaceRoot(root) => doc! { "$replaceRoot": { "newRoot": root.clone() } },
            Stage::Facet(facets) => doc! { "$facet": facets.clone() },
            Stage::Bucket(bucket) => doc! { "$bucket": bucket.clone() },
            Stage::GraphLookup(lookup) => doc! { "$graphLookup": lookup.clone() },
            Stage::Merge(merge) => doc! { "$merge": merge.clone() },
            Stage::Redact(expression) => doc! { "$redact": expression.clone() },
            Stage::Count(field) => doc! { "$count": field.clone() },
            Stage::Limit(limit) => doc! { "$limit": *limit },
            Stage::Skip(skip) => doc! { "$skip": *skip as i64 },
        }
    }
}

/// Fluent stage methods.
///
/// `match`, `sort`, `count`, `limit` and `skip` carry a suffix so they never collide with query
/// modifiers and terminals of the same name.
pub trait PipelineStages: Sized {
    fn stage(self, stage: Stage) -> Self;

    fn matching(self, filter: Document) -> Self {
        self.stage(Stage::Match(filter))
    }

    fn group(self, group: Document) -> Self {
        self.stage(Stage::Group(group))
    }

    fn sort_stage(self, sort: Document) -> Self {
        self.stage(Stage::Sort(sort))
    }

    fn project(self, projection: Document) -> Self {
        self.stage(Stage::Project(projection))
    }

    fn lookup(
        self,
        from: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        self.stage(Stage::lookup(from, local_field, foreign_field, as_field))
    }

    fn unwind(self, path: impl Into<String>) -> Self {
        self.stage(Stage::unwind(path, false))
    }

    /// Unwind that keeps documents whose array is missing, null or empty.
    fn unwind_preserving(self, path: impl Into<String>) -> Self {
        self.stage(Stage::unwind(path, true))
    }

    fn add_fields(self, fields: Document) -> Self {
        self.stage(Stage::AddFields(fields))
    }

    fn replace_root(self, root: impl Into<Bson>) -> Self {
        self.stage(Stage::ReplaceRoot(root.into()))
    }

    fn facet(self, facets: Document) -> Self {
        self.stage(Stage::Facet(facets))
    }

    fn bucket(self, bucket: Document) -> Self {
        self.stage(Stage::Bucket(bucket))
    }

    fn graph_lookup(self, lookup: Document) -> Self {
        self.stage(Stage::GraphLookup(lookup))
    }

    fn merge(self, merge: Document) -> Self {
        self.stage(Stage::Merge(merge))
    }

    fn redact(self, expression: impl Into<Bson>) -> Self {
        self.stage(Stage::Redact(expression.into()))
    }

    fn count_stage(self, field: impl Into<String>) -> Self {
        self.stage(Stage::Count(field.into()))
    }

    fn limit_stage(self, limit: i64) -> Self {
        self.stage(Stage::Limit(limit))
    }

    fn skip_stage(self, skip: u64) -> Self {
        self.stage(Stage::Skip(skip))
    }
}

/// Runs a hand-built pipeline against a model's collection.
///
/// Results are returned exactly as the store produced them.
pub struct AggregationBuilder<'a, B: StoreBackend> {
    collection: ModelCollection<'a, B>,
    stages: Vec<Stage>,
}

impl<'a, B: StoreBackend> AggregationBuilder<'a, B> {
    pub(crate) fn new(collection: ModelCollection<'a, B>) -> Self {
        Self {
            collection,
            stages: Vec::new(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn pipeline(&self) -> Vec<Document> {
        self.stages
            .iter()
            .map(Stage::to_document)
            .collect()
    }

    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Aggregation`] when the pipeline is empty or the backend
    /// rejects it.
    pub async fn execute(self) -> DocumentStoreResult<Vec<Document>> {
        let pipeline = self.pipeline();

        if pipeline.is_empty() {
            return Err(DocumentStoreError::Aggregation {
                message: "Aggregation pipeline is empty".to_string(),
                pipeline,
            });
        }

        debug!(target: "docmodel::query", collection = %self.collection.name(), stages = pipeline.len(), "Running aggregation");

        self.collection
            .backend()
            .aggregate(self.collection.name(), pipeline.clone(), self.collection.session())
            .await
            .map_err(|e| DocumentStoreError::Aggregation {
                message: e.to_string(),
                pipeline,
            })
    }
}

impl<'a, B: StoreBackend> PipelineStages for AggregationBuilder<'a, B> {
    fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_render_store_syntax() {
        assert_eq!(
            Stage::unwind("author", true).to_document(),
            doc! { "$unwind": { "path": "$author", "preserveNullAndEmptyArrays": true } },
        );
        assert_eq!(
            Stage::lookup("posts", "_id", "authorId", "posts").to_document(),
            doc! { "$lookup": { "from": "posts", "localField": "_id", "foreignField": "authorId", "as": "posts" } },
        );
        assert_eq!(
            Stage::ReplaceRoot(Bson::String("$profile".into())).to_document(),
            doc! { "$replaceRoot": { "newRoot": "$profile" } },
        );
        assert_eq!(Stage::Skip(20).to_document(), doc! { "$skip": 20_i64 });
    }
}
