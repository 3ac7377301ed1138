//! Root producers that synthesize a value per example (spec.md GLOSSARY).

use super::{ConstantDeclaration, EqualityPolicy, Producer, ProducerCache, ProducerKind};
use crate::value::Value;
use dagforge_core::{Handle, Result};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A generator that emits the same [`Value`] for every example.
///
/// Value-equality lets the reducer's deduplication table collapse two
/// independently-constructed constants holding the same value into one
/// node (spec.md §8, scenario 6), and is exactly what constant folding
/// (spec.md §4.3) produces.
#[derive(Debug)]
pub struct ConstantGenerator {
    handle: Handle,
    value: Value,
    cache: ProducerCache,
}

impl ConstantGenerator {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            handle: Handle::fresh("generator::constant"),
            value,
            cache: ProducerCache::new(),
        }
    }

    /// Reconstruct with an explicit handle — used by deserialization, which
    /// must preserve handles exactly (spec.md §6).
    #[must_use]
    pub fn from_parts(handle: Handle, value: Value) -> Self {
        Self {
            handle,
            value,
            cache: ProducerCache::new(),
        }
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Producer for ConstantGenerator {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn kind(&self) -> ProducerKind {
        ProducerKind::Generator
    }

    fn parents(&self) -> &[Arc<dyn Producer>] {
        &[]
    }

    fn equality_policy(&self) -> EqualityPolicy {
        EqualityPolicy::Value { ordered: true }
    }

    fn constant_declaration(&self) -> ConstantDeclaration {
        ConstantDeclaration::Always
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
            .is_some_and(|o| o.value == self.value)
    }

    fn value_fields_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = rustc_hash::FxHasher::default();
        self.value.hash(&mut hasher);
        hasher.finish()
    }

    fn with_parents(&self, new_parents: Vec<Arc<dyn Producer>>) -> Arc<dyn Producer> {
        debug_assert!(new_parents.is_empty(), "generators have no parents");
        Arc::new(Self::new(self.value.clone()))
    }

    fn short_name(&self) -> String {
        format!("const({:?})", self.value)
    }
}

/// A generator backed by a user-supplied function of the example index.
///
/// Closures aren't structurally comparable, so `FnGenerator` uses handle
/// equality: two instances are the same generator only if they share a
/// handle.
pub trait GeneratorFn: Send + Sync + fmt::Debug {
    /// Emit the value for example `index` within the current execution.
    /// Must not read wall-clock time; any randomness must come from a
    /// configured seed threaded in at construction (spec.md §5).
    fn generate(&self, index: usize) -> Result<Value>;
}

pub struct FnGenerator {
    handle: Handle,
    func: Arc<dyn GeneratorFn>,
    cache: ProducerCache,
}

impl fmt::Debug for FnGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnGenerator")
            .field("handle", &self.handle)
            .field("func", &self.func)
            .finish()
    }
}

impl FnGenerator {
    #[must_use]
    pub fn new(func: Arc<dyn GeneratorFn>) -> Self {
        Self {
            handle: Handle::fresh("generator::fn"),
            func,
            cache: ProducerCache::new(),
        }
    }

    pub fn generate(&self, index: usize) -> Result<Value> {
        self.func.generate(index)
    }
}

impl Producer for FnGenerator {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn kind(&self) -> ProducerKind {
        ProducerKind::Generator
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

    fn with_parents(&self, new_parents: Vec<Arc<dyn Producer>>) -> Arc<dyn Producer> {
        debug_assert!(new_parents.is_empty(), "generators have no parents");
        Arc::new(Self::new(self.func.clone()))
    }

    fn short_name(&self) -> String {
        "generator::fn".to_string()
    }
}
