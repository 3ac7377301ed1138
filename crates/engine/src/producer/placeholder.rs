//! A root producer fed externally, one value per example (spec.md GLOSSARY).

use super::{ConstantDeclaration, EqualityPolicy, Producer, ProducerCache, ProducerKind};
use dagforge_core::Handle;
use std::any::Any;
use std::sync::Arc;

/// A placeholder: the caller supplies one value per example for it.
///
/// Placeholders carry no data of their own, so they use handle equality —
/// two placeholders are never "the same" just because they share a name.
#[derive(Debug)]
pub struct PlaceholderNode {
    handle: Handle,
    name: String,
    cache: ProducerCache,
}

impl PlaceholderNode {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            handle: Handle::fresh("placeholder"),
            name: name.into(),
            cache: ProducerCache::new(),
        }
    }

    /// Reconstruct with an explicit handle — used by deserialization, which
    /// must preserve handles exactly (spec.md §6).
    #[must_use]
    pub fn from_parts(handle: Handle, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
            cache: ProducerCache::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Producer for PlaceholderNode {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn kind(&self) -> ProducerKind {
        ProducerKind::Placeholder
    }

    fn parents(&self) -> &[Arc<dyn Producer>] {
        &[]
    }

    fn equality_policy(&self) -> EqualityPolicy {
        EqualityPolicy::Handle
    }

    fn constant_declaration(&self) -> ConstantDeclaration {
        ConstantDeclaration::Never
    }

    fn cache(&self) -> &ProducerCache {
        &self.cache
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn value_fields_eq(&self, _other: &dyn Producer) -> bool {
        // Handle-equality producers never reach value comparison; see
        // `producers_equal`.
        false
    }

    fn value_fields_hash(&self) -> u64 {
        0
    }

    fn with_parents(&self, new_parents: Vec<Arc<dyn Producer>>) -> Arc<dyn Producer> {
        debug_assert!(new_parents.is_empty(), "placeholders have no parents");
        Arc::new(Self::new(self.name.clone()))
    }

    fn short_name(&self) -> String {
        format!("placeholder({})", self.name)
    }
}
