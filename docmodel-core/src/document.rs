//! Conversions between Rust types and store documents.
//!
//! Models work on raw [`bson::Document`]s. Any serde type can cross that boundary through
//! [`DocumentExt`], which is implemented for everything that is `Serialize + DeserializeOwned`.
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct User {
//!     name: String,
//!     email: String,
//! }
//!
//! let id = users.save_as(&User { name: "Alice".into(), email: "a@x.io".into() }).await?;
//! let found: Vec<User> = users.query().execute_as().await?;
//! ```

use bson::{Bson, Document};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};

use crate::error::{DocumentStoreError, DocumentStoreResult};

pub trait DocumentExt: Sized {
    /// Serializes into a document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] when the value does not serialize to an
    /// embedded document (a bare string or number, for example).
    fn to_document(&self) -> DocumentStoreResult<Document>;

    fn from_document(document: Document) -> DocumentStoreResult<Self>;

    fn to_json(&self) -> DocumentStoreResult<Value>;

    fn from_json(value: Value) -> DocumentStoreResult<Self>;
}

impl<T> DocumentExt for T
where
    T: Serialize + DeserializeOwned,
{
    fn to_document(&self) -> DocumentStoreResult<Document> {
        match bson::ser::serialize_to_bson(self)? {
            Bson::Document(document) => Ok(document),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "expected a document, got {}",
                crate::value::type_name(&other),
            ))),
        }
    }

    fn from_document(document: Document) -> DocumentStoreResult<Self> {
        Ok(bson::de::deserialize_from_document(document)?)
    }

    fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DocumentStoreResult<Self> {
        Ok(from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Product {
        name: String,
        price: f64,
    }

    #[test]
    fn converts_structs_and_rejects_scalars() {
        let product = Product { name: "Laptop".into(), price: 1000.0 };
        let document = product.to_document().unwrap();

        assert_eq!(document.get_str("name").unwrap(), "Laptop");
        assert_eq!(Product::from_document(document).unwrap(), product);
        assert!(matches!("scalar".to_string().to_document(), Err(DocumentStoreError::InvalidDocument(_))));
    }
}
