//! A pure function from parent inputs to one output per example
//! (spec.md GLOSSARY, "Prepared").

use super::{ConstantDeclaration, EqualityPolicy, Producer, ProducerCache, ProducerKind};
use crate::value::Value;
use dagforge_core::{Handle, Result};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The pure computation a [`PreparedNode`] wraps.
///
/// `stable_id` stands in for structural equality of the function itself:
/// Rust closures aren't comparable, so two `PreparedFn` impls are
/// considered "the same transformer" iff they report the same stable id
/// (typically the transformer's name plus any baked-in configuration, e.g.
/// `"add(3)"`). This is what lets the reducer's dedup table collapse two
/// independently-built `add(3)` nodes over the same parent into one.
pub trait PreparedFn: Send + Sync + fmt::Debug {
    fn stable_id(&self) -> String;

    /// Compute the output for one example given its parents' values, in
    /// parent order.
    fn apply(&self, inputs: &[Value]) -> Result<Value>;

    /// Compute outputs for a minibatch at once. Only called when
    /// [`Self::supports_minibatch`] returns `true`; the default
    /// implementation loops over [`Self::apply`] per example.
    fn apply_batch(&self, inputs: &[Vec<Value>]) -> Result<Vec<Value>> {
        inputs.iter().map(|row| self.apply(row)).collect()
    }

    /// Opt in to minibatched application (spec.md §4.5: "a producer may opt
    /// in to minibatched application ... or per-example application").
    fn supports_minibatch(&self) -> bool {
        false
    }
}

/// A prepared transformer: a pure function of its parents' values, usable
/// directly for inference (spec.md GLOSSARY).
pub struct PreparedNode {
    handle: Handle,
    parents: Vec<Arc<dyn Producer>>,
    func: Arc<dyn PreparedFn>,
    declared_constant: ConstantDeclaration,
    cache: ProducerCache,
}

impl fmt::Debug for PreparedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedNode")
            .field("handle", &self.handle)
            .field("func", &self.func.stable_id())
            .field("arity", &self.parents.len())
            .finish()
    }
}

impl PreparedNode {
    /// `declared_constant` defaults to `Transitive` (spec.md §4.3: "If every
    /// parent of a *prepared* transformer has constant result, the engine
    /// may materialize the value"); pass `Always` for transformers whose
    /// output never depends on their inputs at all.
    #[must_use]
    pub fn new(
        parents: Vec<Arc<dyn Producer>>,
        func: Arc<dyn PreparedFn>,
        declared_constant: ConstantDeclaration,
    ) -> Self {
        Self {
            handle: Handle::fresh("prepared"),
            parents,
            func,
            declared_constant,
            cache: ProducerCache::new(),
        }
    }

    #[must_use]
    pub fn from_parts(
        handle: Handle,
        parents: Vec<Arc<dyn Producer>>,
        func: Arc<dyn PreparedFn>,
        declared_constant: ConstantDeclaration,
    ) -> Self {
        Self {
            handle,
            parents,
            func,
            declared_constant,
            cache: ProducerCache::new(),
        }
    }

    #[must_use]
    pub fn func(&self) -> &Arc<dyn PreparedFn> {
        &self.func
    }

    pub fn apply(&self, inputs: &[Value]) -> Result<Value> {
        self.func.apply(inputs)
    }

    pub fn apply_batch(&self, inputs: &[Vec<Value>]) -> Result<Vec<Value>> {
        if self.func.supports_minibatch() {
            self.func.apply_batch(inputs)
        } else {
            inputs.iter().map(|row| self.func.apply(row)).collect()
        }
    }
}

impl Producer for PreparedNode {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn kind(&self) -> ProducerKind {
        ProducerKind::Prepared
    }

    fn parents(&self) -> &[Arc<dyn Producer>] {
        &self.parents
    }

    fn equality_policy(&self) -> EqualityPolicy {
        EqualityPolicy::Value { ordered: true }
    }

    fn constant_declaration(&self) -> ConstantDeclaration {
        self.declared_constant
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
        Arc::new(Self::new(
            new_parents,
            self.func.clone(),
            self.declared_constant,
        ))
    }

    fn short_name(&self) -> String {
        self.func.stable_id()
    }
}
