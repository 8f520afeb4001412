//! Value comparison and dotted-path helpers over BSON documents.
//!
//! The ordering implemented here follows the store's cross-type sort order: null, numbers,
//! strings, objects, arrays, binary and other opaque values, object ids, booleans, dates.
//! Numbers compare by value regardless of their integer/double representation.

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use std::cmp::Ordering;

/// Type-erased, comparable representation of BSON values.
///
/// All integer and floating point variants are normalized to `f64`.
#[derive(Debug)]
pub enum Comparable<'a> {
    /// Null or undefined value
    Null,
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// String value
    String(&'a str),
    /// Embedded document, entries kept in stored order
    Map(Vec<(&'a str, Comparable<'a>)>),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Any value without a natural order (binary, regex, timestamps, ...)
    Other(&'a Bson),
    ObjectId(ObjectId),
    Bool(bool),
    DateTime(DateTime),
}

impl<'a> Comparable<'a> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Other(_) => 6,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
        }
    }
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Symbol(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<Vec<_>>()
            ),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<'a> Eq for Comparable<'a> {}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Ord for Comparable<'a> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Ordering::Equal,
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Comparable::String(a), Comparable::String(b)) => a.cmp(b),
            (Comparable::Map(a), Comparable::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ordering = ka.cmp(kb).then_with(|| va.cmp(vb));

                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }

                a.len().cmp(&b.len())
            },
            (Comparable::Array(a), Comparable::Array(b)) => a.cmp(b),
            (Comparable::Other(a), Comparable::Other(b)) => {
                if a == b {
                    Ordering::Equal
                } else {
                    a.to_string().cmp(&b.to_string())
                }
            },
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().cmp(&b.bytes()),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a
                .timestamp_millis()
                .cmp(&b.timestamp_millis()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Compares two values using the cross-type sort order.
pub fn compare_values(left: &Bson, right: &Bson) -> Ordering {
    Comparable::from(left).cmp(&Comparable::from(right))
}

/// Structural equality where `1`, `1i64` and `1.0` are equal.
pub fn values_equal(left: &Bson, right: &Bson) -> bool {
    compare_values(left, right) == Ordering::Equal
}

/// Returns the numeric value of a number, or `None` for anything else.
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Returns the store's type alias for a value (`"string"`, `"int"`, `"objectId"`, ...).
pub fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binData",
        Bson::Undefined => "undefined",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::JavaScriptCode(_) => "javascript",
        Bson::JavaScriptCodeWithScope(_) => "javascriptWithScope",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Timestamp(_) => "timestamp",
        Bson::Decimal128(_) => "decimal",
        Bson::Symbol(_) => "symbol",
        Bson::MaxKey => "maxKey",
        Bson::MinKey => "minKey",
        Bson::DbPointer(_) => "dbPointer",
        #[allow(unreachable_patterns)]
        _ => "unknown",
    }
}

/// Looks up a dotted path (`address.city`, `tags.0`) without descending into arrays of documents.
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(doc) => doc.get(segment)?,
            Bson::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Collects every value reachable through a dotted path, descending into arrays.
///
/// `{"tags": [{"n": 1}, {"n": 2}]}` resolves `tags.n` to `[1, 2]`. An empty result means the path
/// is missing.
pub fn resolve_path(document: &Document, path: &str) -> Vec<Bson> {
    let segments = path.split('.').collect::<Vec<_>>();
    let mut out = Vec::new();

    if let Some(value) = document.get(segments[0]) {
        resolve_segments(value, &segments[1..], &mut out);
    }

    out
}

fn resolve_segments(value: &Bson, rest: &[&str], out: &mut Vec<Bson>) {
    let Some((head, tail)) = rest.split_first() else {
        out.push(value.clone());
        return;
    };

    match value {
        Bson::Document(doc) => {
            if let Some(next) = doc.get(*head) {
                resolve_segments(next, tail, out);
            }
        },
        Bson::Array(arr) => match head.parse::<usize>() {
            Ok(index) => {
                if let Some(next) = arr.get(index) {
                    resolve_segments(next, tail, out);
                }
            },
            Err(_) => {
                for item in arr {
                    if let Bson::Document(doc) = item {
                        if let Some(next) = doc.get(*head) {
                            resolve_segments(next, tail, out);
                        }
                    }
                }
            },
        },
        _ => {},
    }
}

/// Writes a value at a dotted path, creating intermediate documents as needed.
///
/// A non-document value sitting on the path is replaced by a document.
pub fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        },
        Some((head, tail)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }

            if let Some(Bson::Document(child)) = document.get_mut(head) {
                set_path(child, tail, value);
            }
        },
    }
}

/// Removes the value at a dotted path and returns it.
pub fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, tail)) => match document.get_mut(head) {
            Some(Bson::Document(child)) => remove_path(child, tail),
            _ => None,
        },
    }
}

/// Renders a document id for error messages: object ids as hex, strings unquoted.
pub fn display_id(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn numbers_compare_across_representations() {
        assert!(values_equal(&Bson::Int32(3), &Bson::Double(3.0)));
        assert_eq!(compare_values(&Bson::Int64(2), &Bson::Int32(10)), Ordering::Less);
    }

    #[test]
    fn cross_type_order_puts_null_before_numbers_before_strings() {
        let mut values = vec![Bson::String("a".into()), Bson::Int32(1), Bson::Null, Bson::Boolean(true)];
        values.sort_by(compare_values);

        assert_eq!(values, vec![Bson::Null, Bson::Int32(1), Bson::String("a".into()), Bson::Boolean(true)]);
    }

    #[test]
    fn paths_resolve_through_documents_and_arrays() {
        let document = doc! {
            "address": { "city": "Oslo" },
            "items": [{ "sku": "a" }, { "sku": "b" }],
        };

        assert_eq!(get_path(&document, "address.city"), Some(&Bson::String("Oslo".into())));
        assert_eq!(get_path(&document, "items.1.sku"), Some(&Bson::String("b".into())));
        assert_eq!(
            resolve_path(&document, "items.sku"),
            vec![Bson::String("a".into()), Bson::String("b".into())],
        );
        assert!(resolve_path(&document, "missing.path").is_empty());
    }

    #[test]
    fn set_and_remove_nested_paths() {
        let mut document = doc! { "name": "x" };

        set_path(&mut document, "profile.bio", Bson::String("hi".into()));
        assert_eq!(document, doc! { "name": "x", "profile": { "bio": "hi" } });

        assert_eq!(remove_path(&mut document, "profile.bio"), Some(Bson::String("hi".into())));
        assert_eq!(document, doc! { "name": "x", "profile": {} });
    }
}
