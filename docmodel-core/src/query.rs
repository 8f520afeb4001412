//! Filter expressions and their translation to store-native filter documents.
//!
//! Filters are built as an [`Expr`] tree, usually through the [`Filter`] helpers, and compiled
//! into a filter document by the [`FilterTranslator`]. When the translator is bound to a model's
//! field registry, declared field names are rewritten to their storage paths (aliases).
//!
//! # Filter Expression API
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - Membership: `any_of`, `none_of`
//! - Existence: `exists`, `not_exists`
//! - Text: `regex`, `text`
//! - Logical: `and`, `or`, `nor`, and [`Expr::not`]
//!
//! ```ignore
//! use docmodel::query::{Filter, FilterTranslator};
//!
//! let expr = Filter::eq("status", "active").and(Filter::gt("age", 18));
//! let filter = FilterTranslator::new().translate(&expr)?;
//! // {"$and": [{"status": {"$eq": "active"}}, {"age": {"$gt": 18}}]}
//! ```

use bson::{Bson, Document, doc};
use std::str::FromStr;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    field::FieldRegistry,
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    /// Value is one of an array of values.
    In,
    NotIn,
    /// The value is a boolean: whether the field must exist.
    Exists,
    /// The value is a pattern string, or `{"$regex": .., "$options": ..}`.
    Regex,
    /// Full-text search over the collection's text index. The field name is ignored.
    Text,
}

impl FieldOp {
    /// The store operator this maps to.
    pub fn operator(&self) -> &'static str {
        match self {
            FieldOp::Equal => "$eq",
            FieldOp::NotEqual => "$ne",
            FieldOp::GreaterThan => "$gt",
            FieldOp::GreaterThanOrEqual => "$gte",
            FieldOp::LessThan => "$lt",
            FieldOp::LessThanOrEqual => "$lte",
            FieldOp::In => "$in",
            FieldOp::NotIn => "$nin",
            FieldOp::Exists => "$exists",
            FieldOp::Regex => "$regex",
            FieldOp::Text => "$text",
        }
    }
}

impl FromStr for FieldOp {
    type Err = DocumentStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "equal" => FieldOp::Equal,
            "notEqual" => FieldOp::NotEqual,
            "greaterThan" => FieldOp::GreaterThan,
            "greaterThanOrEqual" => FieldOp::GreaterThanOrEqual,
            "lessThan" => FieldOp::LessThan,
            "lessThanOrEqual" => FieldOp::LessThanOrEqual,
            "in" => FieldOp::In,
            "notIn" => FieldOp::NotIn,
            "exists" => FieldOp::Exists,
            "regex" => FieldOp::Regex,
            "text" => FieldOp::Text,
            other => return Err(DocumentStoreError::InvalidDocument(format!("Unknown query operator: {}", other))),
        })
    }
}

/// A filter expression for querying documents.
///
/// # Example
///
/// ```ignore
/// use docmodel::query::{Expr, Filter};
///
/// let expr = Filter::and(vec![
///     Filter::eq("status", "active"),
///     Filter::gt("age", 18),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOR of multiple expressions (none may match).
    Nor(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Field comparison expression.
    Field {
        /// The field name to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
    /// A filter document passed through as written.
    Raw(Document),
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Self {
        Expr::Field { field: field.into(), op, value: value.into() }
    }

    /// Matches every document.
    pub fn all() -> Self {
        Expr::And(Vec::new())
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    ///
    /// If this expression is already an OR, the other expression is appended
    /// to the list. Otherwise, a new OR expression is created.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

impl From<Document> for Expr {
    fn from(document: Document) -> Self {
        Expr::Raw(document)
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Equal, value)
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::NotEqual, value)
    }

    /// Matches documents where the field is greater than the specified value.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::GreaterThan, value)
    }

    /// Matches documents where the field is greater than or equal to the specified value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::GreaterThanOrEqual, value)
    }

    /// Matches documents where the field is less than the specified value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::LessThan, value)
    }

    /// Matches documents where the field is less than or equal to the specified value.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::LessThanOrEqual, value)
    }

    /// Matches documents where the field equals any of the values.
    pub fn any_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::In, value)
    }

    /// Matches documents where the field equals none of the values.
    pub fn none_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::NotIn, value)
    }

    /// Matches documents where the field is present (a stored `null` counts as present).
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::field(field, FieldOp::Exists, true)
    }

    /// Matches documents where the field is absent.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::field(field, FieldOp::Exists, false)
    }

    /// Matches string fields against a regular expression.
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Expr {
        Expr::field(field, FieldOp::Regex, pattern.into())
    }

    /// Regular expression with store options such as `"i"`.
    pub fn regex_with_options(
        field: impl Into<String>,
        pattern: impl Into<String>,
        options: impl Into<String>,
    ) -> Expr {
        Expr::field(field, FieldOp::Regex, doc! { "$regex": pattern.into(), "$options": options.into() })
    }

    /// Full-text search.
    pub fn text(search: impl Into<String>) -> Expr {
        Expr::field("$text", FieldOp::Text, search.into())
    }

    /// Combines multiple expressions such that all must match for a document to be included.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines multiple expressions such that any can match for a document to be included.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Combines multiple expressions such that none may match for a document to be included.
    pub fn nor(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Nor(exprs.into_iter().collect())
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_raw(&mut self, document: &Document) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Nor(exprs) => self.visit_nor(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
            Expr::Raw(document) => self.visit_raw(document),
        }
    }
}

/// Translates filter expressions into store-native filter documents.
///
/// `Not` compiles to `$nor` with a single branch, which the store accepts at the top level.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterTranslator<'a> {
    fields: Option<&'a FieldRegistry>,
}

impl<'a> FilterTranslator<'a> {
    pub fn new() -> Self {
        Self { fields: None }
    }

    /// Rewrites declared field names into storage paths of the given registry.
    pub fn for_fields(fields: &'a FieldRegistry) -> Self {
        Self { fields: Some(fields) }
    }

    pub fn translate(mut self, expr: &Expr) -> DocumentStoreResult<Document> {
        self.visit_expr(expr)
    }

    fn path(&self, field: &str) -> String {
        match self.fields {
            Some(fields) => fields.storage_path(field),
            None => field.to_string(),
        }
    }

    fn branches(&mut self, operator: &str, exprs: &[Expr]) -> DocumentStoreResult<Document> {
        if exprs.is_empty() {
            return Err(DocumentStoreError::InvalidDocument(format!("{} requires at least one expression", operator)));
        }

        Ok(doc! {
            operator: exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
}

impl<'a> QueryVisitor for FilterTranslator<'a> {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        match exprs {
            [] => Ok(doc! {}),
            [single] => self.visit_expr(single),
            _ => self.branches("$and", exprs),
        }
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        self.branches("$or", exprs)
    }

    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        self.branches("$nor", exprs)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let path = self.path(field);

        Ok(match op {
            FieldOp::In | FieldOp::NotIn => {
                let values = match value {
                    Bson::Array(values) => values.clone(),
                    single => vec![single.clone()],
                };
                doc! { path: { op.operator(): values } }
            },
            FieldOp::Exists => {
                let should_exist = match value {
                    Bson::Boolean(b) => *b,
                    Bson::Null => false,
                    _ => true,
                };
                doc! { path: { "$exists": should_exist } }
            },
            FieldOp::Regex => match value {
                Bson::String(pattern) => doc! { path: { "$regex": pattern.clone() } },
                Bson::Document(regex) if regex.contains_key("$regex") => doc! { path: regex.clone() },
                _ => return Err(DocumentStoreError::InvalidDocument(
                    "Regex operator requires a pattern string".to_string(),
                )),
            },
            FieldOp::Text => doc! { "$text": { "$search": value.clone() } },
            _ => doc! { path: { op.operator(): value.clone() } },
        })
    }

    fn visit_raw(&mut self, document: &Document) -> Result<Self::Output, Self::Error> {
        Ok(document
            .iter()
            .map(|(key, value)| {
                if key.starts_with('$') {
                    (key.clone(), value.clone())
                } else {
                    (self.path(key), value.clone())
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{field::Field, hook::HookRegistry};

    #[test]
    fn operators_parse_from_names() {
        assert_eq!("greaterThanOrEqual".parse::<FieldOp>().unwrap(), FieldOp::GreaterThanOrEqual);
        assert_eq!("notIn".parse::<FieldOp>().unwrap().operator(), "$nin");
        assert!("between".parse::<FieldOp>().is_err());
    }

    #[test]
    fn translates_operators_and_logic() {
        let expr = Filter::and(vec![
            Filter::eq("status", "active"),
            Filter::any_of("role", "admin"),
            Filter::or(vec![Filter::lt("age", 18), Filter::gte("age", 65)]),
            Filter::exists("email").not(),
        ]);

        let filter = FilterTranslator::new().translate(&expr).unwrap();

        assert_eq!(filter, doc! {
            "$and": [
                { "status": { "$eq": "active" } },
                { "role": { "$in": ["admin"] } },
                { "$or": [{ "age": { "$lt": 18 } }, { "age": { "$gte": 65 } }] },
                { "$nor": [{ "email": { "$exists": true } }] },
            ],
        });
    }

    #[test]
    fn empty_and_matches_everything() {
        assert_eq!(FilterTranslator::new().translate(&Expr::all()).unwrap(), doc! {});
        assert!(FilterTranslator::new().translate(&Filter::or(vec![])).is_err());
    }

    #[test]
    fn text_and_regex() {
        assert_eq!(
            FilterTranslator::new().translate(&Filter::text("rust async")).unwrap(),
            doc! { "$text": { "$search": "rust async" } },
        );
        assert_eq!(
            FilterTranslator::new().translate(&Filter::regex_with_options("name", "^al", "i")).unwrap(),
            doc! { "name": { "$regex": "^al", "$options": "i" } },
        );
    }

    #[test]
    fn model_bound_translation_uses_storage_paths() {
        let mut fields = FieldRegistry::new();
        let mut hooks = HookRegistry::new();
        fields.register(Field::string("firstName").alias("first_name"), &mut hooks);

        let translator = FilterTranslator::for_fields(&fields);

        assert_eq!(
            translator.translate(&Filter::eq("firstName", "Ann")).unwrap(),
            doc! { "first_name": { "$eq": "Ann" } },
        );
        assert_eq!(
            translator.translate(&Expr::from(doc! { "firstName": "Ann", "$comment": "x" })).unwrap(),
            doc! { "first_name": "Ann", "$comment": "x" },
        );
    }
}
