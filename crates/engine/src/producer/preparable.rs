//! A producer that observes every training example, then emits a prepared
//! successor that replaces it (spec.md GLOSSARY, "Preparable").

use super::{ConstantDeclaration, EqualityPolicy, Producer, ProducerCache, ProducerKind};
use crate::preparer::{Preparer, PreparerMode};
use dagforge_core::Handle;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The training-time behavior a [`PreparableNode`] wraps.
///
/// `mode()` is fixed per `PreparableFn` implementation (not per preparer
/// instance), which is what guarantees "two preparers created from the same
/// preparable must choose the same mode" (spec.md §4.4) structurally rather
/// than by runtime bookkeeping.
pub trait PreparableFn: Send + Sync + fmt::Debug {
    fn stable_id(&self) -> String;

    fn mode(&self) -> PreparerMode;

    /// Idempotent preparers let the executor skip full-stream preparation
    /// when every parent is constant-result (spec.md §4.4).
    fn is_idempotent(&self) -> bool {
        false
    }

    /// Construct a fresh preparer instance for one training run.
    fn new_preparer(&self) -> Box<dyn Preparer>;
}

/// A preparable transformer: trains on every example, then splices in two
/// prepared successors (spec.md §4.4).
pub struct PreparableNode {
    handle: Handle,
    parents: Vec<Arc<dyn Producer>>,
    func: Arc<dyn PreparableFn>,
    cache: ProducerCache,
}

impl fmt::Debug for PreparableNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparableNode")
            .field("handle", &self.handle)
            .field("func", &self.func.stable_id())
            .field("arity", &self.parents.len())
            .finish()
    }
}

impl PreparableNode {
    #[must_use]
    pub fn new(parents: Vec<Arc<dyn Producer>>, func: Arc<dyn PreparableFn>) -> Self {
        Self {
            handle: Handle::fresh("preparable"),
            parents,
            func,
            cache: ProducerCache::new(),
        }
    }

    /// Reconstruct with an explicit handle — used by deserialization, which
    /// must preserve handles exactly (spec.md §6).
    #[must_use]
    pub fn from_parts(handle: Handle, parents: Vec<Arc<dyn Producer>>, func: Arc<dyn PreparableFn>) -> Self {
        Self {
            handle,
            parents,
            func,
            cache: ProducerCache::new(),
        }
    }

    #[must_use]
    pub fn func(&self) -> &Arc<dyn PreparableFn> {
        &self.func
    }
}

impl Producer for PreparableNode {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn kind(&self) -> ProducerKind {
        ProducerKind::Preparable
    }

    fn parents(&self) -> &[Arc<dyn Producer>] {
        &self.parents
    }

    fn equality_policy(&self) -> EqualityPolicy {
        EqualityPolicy::Value { ordered: true }
    }

    fn constant_declaration(&self) -> ConstantDeclaration {
        // A preparable producer is never itself invoked per example — it
        // is always replaced before execution reaches the apply phase — so
        // "constant result" is not a meaningful question until it has been
        // prepared. Declaring `Never` keeps `has_constant_result` honest
        // for any (invalid) attempt to execute an unprepared graph.
        ConstantDeclaration::Never
    }

    fn cache(&self) -> &ProducerCache {
        &self.cache
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn value_fields_eq(&self, other: &dyn Producer) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|o| o.func.stable_id() == self.func.stable_id())
    }

    fn value_fields_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = rustc_hash::FxHasher::default();
        self.func.stable_id().hash(&mut hasher);
        hasher.finish()
    }

    fn with_parents(&self, new_parents: Vec<Arc<dyn Producer>>) -> Arc<dyn Producer> {
        Arc::new(Self::new(new_parents, self.func.clone()))
    }

    fn short_name(&self) -> String {
        self.func.stable_id()
    }
}
