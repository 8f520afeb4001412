//! Model-level validators.
//!
//! Field constraints cover one value at a time. A [`Validator`] sees the whole document as it was
//! submitted (declared field names, before defaults are filled) and reports issues keyed by
//! field. They are merged with the field-level issues before a write is rejected.

use bson::Document;

use crate::error::{ValidationCode, ValidationErrors, ValidationIssue};

pub trait Validator: Send + Sync {
    fn validate(&self, document: &Document) -> ValidationErrors;
}

/// Adapts a closure returning `Err((field, message))` into a [`Validator`].
pub struct FnValidator<F>(F);

impl<F> Validator for FnValidator<F>
where
    F: Fn(&Document) -> Result<(), (String, String)> + Send + Sync,
{
    fn validate(&self, document: &Document) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if let Err((field, message)) = (self.0)(document) {
            errors.add(field, ValidationIssue::new(ValidationCode::Custom, message));
        }

        errors
    }
}

pub fn validator_fn<F>(f: F) -> FnValidator<F>
where
    F: Fn(&Document) -> Result<(), (String, String)> + Send + Sync,
{
    FnValidator(f)
}
