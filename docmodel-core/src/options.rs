//! Engine configuration.
//!
//! [`DocumentStoreOptions`] can be built in code or deserialized from any serde source; absent
//! keys take their defaults.
//!
//! ```ignore
//! let options: DocumentStoreOptions = serde_json::from_str(r#"{"validation_action": "warn"}"#)?;
//! assert!(options.sync_schema_on_write);
//! ```

use serde::{Deserialize, Serialize};

use crate::schema::{ValidationAction, ValidationLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentStoreOptions {
    /// Re-synchronize the collection schema and indexes before every save.
    pub sync_schema_on_write: bool,
    pub validation_level: ValidationLevel,
    pub validation_action: ValidationAction,
}

impl Default for DocumentStoreOptions {
    fn default() -> Self {
        Self {
            sync_schema_on_write: true,
            validation_level: ValidationLevel::default(),
            validation_action: ValidationAction::default(),
        }
    }
}

impl DocumentStoreOptions {
    pub fn builder() -> DocumentStoreOptionsBuilder {
        DocumentStoreOptionsBuilder::default()
    }
}

/// Builder for [`DocumentStoreOptions`].
#[derive(Debug, Default)]
pub struct DocumentStoreOptionsBuilder {
    options: DocumentStoreOptions,
}

impl DocumentStoreOptionsBuilder {
    pub fn with_sync_schema_on_write(mut self, enabled: bool) -> Self {
        self.options.sync_schema_on_write = enabled;
        self
    }

    pub fn with_validation_level(mut self, level: ValidationLevel) -> Self {
        self.options.validation_level = level;
        self
    }

    pub fn with_validation_action(mut self, action: ValidationAction) -> Self {
        self.options.validation_action = action;
        self
    }

    pub fn build(self) -> DocumentStoreOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let options: DocumentStoreOptions = serde_json::from_str(r#"{"validation_action": "warn"}"#).unwrap();

        assert!(options.sync_schema_on_write);
        assert_eq!(options.validation_level, ValidationLevel::Strict);
        assert_eq!(options.validation_action, ValidationAction::Warn);
    }
}
