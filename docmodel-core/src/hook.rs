//! Lifecycle hooks.
//!
//! Hooks run against the storage-shaped document of a write, in registration order, for one of
//! six [`HookPhase`]s. A failing pre-phase hook aborts the write before anything reaches the
//! backend; a failing post-phase hook is reported but the write stays committed.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//! use bson::Bson;
//!
//! let model = Model::builder("users")
//!     .field(Field::string("name"))
//!     .hook(HookPhase::PreSave, hook_fn(|doc| {
//!         doc.insert("slug", doc.get_str("name").unwrap_or_default().to_lowercase());
//!         Ok(())
//!     }))
//!     .build();
//! ```

use async_trait::async_trait;
use bson::Document;
use indexmap::IndexMap;
use std::{fmt, sync::Arc};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// The point in a document's lifecycle at which a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    PreSave,
    PostSave,
    PreUpdate,
    PostUpdate,
    PreDelete,
    PostDelete,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookPhase::PreSave => "preSave",
            HookPhase::PostSave => "postSave",
            HookPhase::PreUpdate => "preUpdate",
            HookPhase::PostUpdate => "postUpdate",
            HookPhase::PreDelete => "preDelete",
            HookPhase::PostDelete => "postDelete",
        })
    }
}

/// A unit of work executed at a lifecycle phase.
///
/// Hooks may mutate the document they receive. For pre-phase hooks the mutation is what gets
/// written.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn execute(&self, document: &mut Document) -> DocumentStoreResult<()>;
}

/// Adapts a synchronous closure into a [`Hook`].
pub struct FnHook<F>(F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&mut Document) -> DocumentStoreResult<()> + Send + Sync,
{
    async fn execute(&self, document: &mut Document) -> DocumentStoreResult<()> {
        (self.0)(document)
    }
}

/// Wraps a closure as a hook.
pub fn hook_fn<F>(f: F) -> FnHook<F>
where
    F: Fn(&mut Document) -> DocumentStoreResult<()> + Send + Sync,
{
    FnHook(f)
}

/// Ordered hooks per lifecycle phase.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: IndexMap<HookPhase, Vec<Arc<dyn Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hook to a phase. Hooks run in the order they were registered.
    pub fn register(&mut self, phase: HookPhase, hook: Arc<dyn Hook>) {
        self.hooks
            .entry(phase)
            .or_default()
            .push(hook);
    }

    /// Number of hooks registered for a phase.
    pub fn count(&self, phase: HookPhase) -> usize {
        self.hooks
            .get(&phase)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Runs every hook of a phase against the document, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::HookExecution`] carrying the phase, the document as the
    /// failing hook left it, and the hook's own error.
    pub async fn run(&self, phase: HookPhase, document: &mut Document) -> DocumentStoreResult<()> {
        let Some(hooks) = self.hooks.get(&phase) else {
            return Ok(());
        };

        for hook in hooks {
            if let Err(source) = hook.execute(document).await {
                return Err(DocumentStoreError::HookExecution {
                    phase,
                    document: document.clone(),
                    source: Box::new(source),
                });
            }
        }

        Ok(())
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.hooks.iter().map(|(phase, hooks)| (phase, hooks.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let mut registry = HookRegistry::new();
        registry.register(HookPhase::PreSave, Arc::new(hook_fn(|doc| {
            doc.insert("trail", "a");
            Ok(())
        })));
        registry.register(HookPhase::PreSave, Arc::new(hook_fn(|doc| {
            let trail = format!("{}b", doc.get_str("trail").unwrap_or_default());
            doc.insert("trail", trail);
            Ok(())
        })));

        let mut document = doc! {};
        registry.run(HookPhase::PreSave, &mut document).await.unwrap();

        assert_eq!(document.get_str("trail").unwrap(), "ab");
        assert_eq!(registry.count(HookPhase::PostSave), 0);
    }

    #[tokio::test]
    async fn first_failure_stops_the_phase() {
        let mut registry = HookRegistry::new();
        registry.register(HookPhase::PreUpdate, Arc::new(hook_fn(|_| {
            Err(DocumentStoreError::Unknown("nope".into()))
        })));
        registry.register(HookPhase::PreUpdate, Arc::new(hook_fn(|doc| {
            doc.insert("reached", true);
            Ok(())
        })));

        let mut document = doc! { "name": "x" };
        let err = registry.run(HookPhase::PreUpdate, &mut document).await.unwrap_err();

        match err {
            DocumentStoreError::HookExecution { phase, document, .. } => {
                assert_eq!(phase, HookPhase::PreUpdate);
                assert!(!document.contains_key("reached"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }
}
