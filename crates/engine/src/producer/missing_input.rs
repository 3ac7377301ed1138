//! The process-wide missing-input sentinel (spec.md §3).

use super::{ConstantDeclaration, EqualityPolicy, Producer, ProducerCache, ProducerKind};
use dagforge_core::{handle::MISSING_INPUT_HANDLE, Handle};
use std::any::Any;
use std::sync::{Arc, OnceLock};

/// The singleton placeholder-for-an-unassigned-parent. Its handle is fixed
/// process-wide; it is the only producer that fails graph validation
/// (spec.md §3).
#[derive(Debug)]
pub struct MissingInputNode {
    cache: ProducerCache,
}

impl MissingInputNode {
    /// The process-wide singleton instance.
    #[must_use]
    pub fn instance() -> Arc<dyn Producer> {
        static INSTANCE: OnceLock<Arc<dyn Producer>> = OnceLock::new();
        INSTANCE
            .get_or_init(|| {
                Arc::new(Self {
                    cache: ProducerCache::new(),
                }) as Arc<dyn Producer>
            })
            .clone()
    }
}

impl Producer for MissingInputNode {
    fn handle(&self) -> Handle {
        MISSING_INPUT_HANDLE
    }

    fn kind(&self) -> ProducerKind {
        ProducerKind::MissingInput
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
        false
    }

    fn value_fields_hash(&self) -> u64 {
        0
    }

    fn with_parents(&self, _new_parents: Vec<Arc<dyn Producer>>) -> Arc<dyn Producer> {
        Self::instance()
    }

    fn short_name(&self) -> String {
        "missing-input".to_string()
    }
}
