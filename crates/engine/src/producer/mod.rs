//! The producer model (spec.md §3, §4.1): handles, the tagged producer
//! variants, and the equality/hashing/constant-result machinery shared by
//! every concrete producer kind.

mod cache;
mod generator;
mod missing_input;
mod placeholder;
mod prepared;
mod preparable;
mod view;

pub use cache::ProducerCache;
pub use generator::{ConstantGenerator, FnGenerator, GeneratorFn};
pub use missing_input::MissingInputNode;
pub use placeholder::PlaceholderNode;
pub use prepared::{PreparedFn, PreparedNode};
pub use preparable::{PreparableFn, PreparableNode};
pub use view::{ViewFn, ViewNode};

use crate::reducer::Reducer;
use dagforge_core::{Error, Handle, Result};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A node in the producer graph: a value emitted once per example.
///
/// Implemented by the six concrete kinds in this module; user code never
/// implements `Producer` directly, it implements the narrower
/// [`PreparedFn`]/[`PreparableFn`]/[`ViewFn`] traits and wraps them in
/// [`PreparedNode`]/[`PreparableNode`]/[`ViewNode`].
pub trait Producer: fmt::Debug + Send + Sync {
    /// This instance's identity (spec.md §3, "Handle").
    fn handle(&self) -> Handle;

    /// Which of the five producer variants this is.
    fn kind(&self) -> ProducerKind;

    /// Ordered parent references. Empty for root producers (placeholder,
    /// generator, the missing-input sentinel).
    fn parents(&self) -> &[Arc<dyn Producer>];

    /// Dispatch for `equals`/`hash` (spec.md §4.1).
    fn equality_policy(&self) -> EqualityPolicy;

    /// How this producer's constant-result flag is computed (spec.md §3).
    fn constant_declaration(&self) -> ConstantDeclaration;

    /// Lazily-initialized, never-reset caches (spec.md §3: "Cached hash code
    /// and constant-result flag are set lazily and never transition once
    /// observed").
    fn cache(&self) -> &ProducerCache;

    /// For downcasting to a concrete producer kind (constant folding,
    /// serialization, and test code all need this).
    fn as_any(&self) -> &dyn Any;

    /// Compare this producer's own declared fields (not parents, not
    /// handle) against `other`, which is guaranteed to be the same concrete
    /// type. Implementations downcast `other` and compare directly.
    fn value_fields_eq(&self, other: &dyn Producer) -> bool;

    /// Hash this producer's own declared fields (not parents, not handle).
    fn value_fields_hash(&self) -> u64;

    /// Rebuild this producer with a new, already-reduced parent list,
    /// minting a fresh handle and a cleared cache. This is the one generic
    /// "cloneWith" operation the reducer and executor need structurally —
    /// replacing an edge in an otherwise-immutable graph (spec.md §3, §9).
    fn with_parents(&self, new_parents: Vec<Arc<dyn Producer>>) -> Arc<dyn Producer>;

    /// Short, human-readable name used in error messages (spec.md §7,
    /// "wraps the underlying cause with the producer's short name").
    fn short_name(&self) -> String {
        self.handle().class().to_string()
    }

    /// Node-local reducers this producer's own class contributes, applied
    /// only to instances of that class (spec.md §4.3).
    fn node_local_reducers(&self) -> Vec<Arc<dyn Reducer>> {
        Vec::new()
    }

    /// Class-indexed reducers this instance contributes against other
    /// classes, keyed by target class tag. Advisory: they may not fire if
    /// target instances were already removed by prior rewrites (spec.md
    /// §4.3).
    fn class_indexed_reducers(&self) -> Vec<(&'static str, Arc<dyn Reducer>)> {
        Vec::new()
    }

    /// True if this producer emits the same value for every example within
    /// a single execution (spec.md §4.1): declared always-constant, or
    /// every parent is constant-result.
    fn has_constant_result(&self) -> bool {
        *self.cache().constant_result.get_or_init(|| {
            match self.constant_declaration() {
                ConstantDeclaration::Always => true,
                ConstantDeclaration::Never => false,
                ConstantDeclaration::Transitive => {
                    self.parents().iter().all(|p| p.has_constant_result())
                }
            }
        })
    }
}

/// The five producer variants plus the missing-input sentinel (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProducerKind {
    Placeholder,
    Generator,
    Prepared,
    Preparable,
    View,
    MissingInput,
}

impl ProducerKind {
    #[must_use]
    pub const fn is_root(self) -> bool {
        matches!(
            self,
            Self::Placeholder | Self::Generator | Self::MissingInput
        )
    }
}

/// Dispatch for equals/hash (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualityPolicy {
    /// Equal iff same handle bits and same concrete class.
    Handle,
    /// Equal iff same concrete class, same declared value fields, and same
    /// parents. `ordered` selects whether parent order matters.
    Value { ordered: bool },
}

/// How a producer's constant-result flag is computed (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantDeclaration {
    Never,
    Always,
    Transitive,
}

/// `a.equals(b)` (spec.md §4.1), dispatching on each side's declared
/// equality policy. Two producers with equal handles are always equal,
/// regardless of policy (spec.md §3: "two producers with equal handles are
/// always equal").
#[must_use]
pub fn producers_equal(a: &dyn Producer, b: &dyn Producer) -> bool {
    if a.handle() == b.handle() {
        return true;
    }
    match (a.equality_policy(), b.equality_policy()) {
        (EqualityPolicy::Value { ordered }, EqualityPolicy::Value { .. }) => {
            if a.as_any().type_id() != b.as_any().type_id() {
                return false;
            }
            if !a.value_fields_eq(b) {
                return false;
            }
            parents_equal(a.parents(), b.parents(), ordered)
        }
        _ => false,
    }
}

fn parents_equal(a: &[Arc<dyn Producer>], b: &[Arc<dyn Producer>], ordered: bool) -> bool {
    if a.len() != b.len() {
        return false;
    }
    if ordered {
        return a
            .iter()
            .zip(b.iter())
            .all(|(x, y)| producers_equal(x.as_ref(), y.as_ref()));
    }
    // Unordered: greedy bipartite matching. Fine for the small parent
    // counts producers realistically have; not a hot path.
    let mut used = vec![false; b.len()];
    'outer: for x in a {
        for (j, y) in b.iter().enumerate() {
            if !used[j] && producers_equal(x.as_ref(), y.as_ref()) {
                used[j] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

/// `a.hash()` (spec.md §4.1). Memoized on first call via the producer's
/// cache and never recomputed afterward.
#[must_use]
pub fn producer_hash(p: &dyn Producer) -> u64 {
    *p.cache().hash.get_or_init(|| match p.equality_policy() {
        EqualityPolicy::Handle => mix_u64(p.handle().high(), p.handle().low()),
        EqualityPolicy::Value { ordered } => {
            let mut acc = mix_u64(
                type_id_hash(p.as_any()),
                p.value_fields_hash(),
            );
            if ordered {
                for parent in p.parents() {
                    acc = mix_u64(acc, producer_hash(parent.as_ref()));
                }
            } else {
                // Commutative combine so parent order doesn't affect the
                // hash of an unordered-equality producer.
                let mut combined = 0u64;
                for parent in p.parents() {
                    combined ^= producer_hash(parent.as_ref()).wrapping_mul(0x9E37_79B9_7F4A_7C15);
                }
                acc = mix_u64(acc, combined);
            }
            acc
        }
    })
}

fn type_id_hash(any: &dyn Any) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = rustc_hash::FxHasher::default();
    any.type_id().hash(&mut hasher);
    hasher.finish()
}

fn mix_u64(a: u64, b: u64) -> u64 {
    let mut x = a ^ b.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 33;
    x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    x ^= x >> 33;
    x
}

/// Validate a single producer (spec.md §4.1, `validate()`): child producers
/// must have at least one parent, and no parent may be the missing-input
/// sentinel.
pub fn validate_producer(p: &dyn Producer) -> Result<()> {
    if p.handle() == dagforge_core::handle::MISSING_INPUT_HANDLE {
        return Err(Error::graph_validation(
            "the missing-input sentinel cannot appear in an executable graph",
        ));
    }
    if !p.kind().is_root() {
        if p.parents().is_empty() {
            return Err(Error::graph_validation(format!(
                "child producer '{}' has no parents",
                p.short_name()
            )));
        }
        for parent in p.parents() {
            if parent.handle() == dagforge_core::handle::MISSING_INPUT_HANDLE {
                return Err(Error::graph_validation(format!(
                    "producer '{}' has an unresolved (missing-input) parent",
                    p.short_name()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::value::Value;

    #[test]
    fn equal_handles_are_always_equal_even_across_declared_policies() {
        let a = ConstantGenerator::new(Value::Int(1));
        // Same handle, rebuilt with a different (wrong) value — should
        // still compare equal because handles match (spec.md §3).
        let b_handle = a.handle();
        let b = ConstantGenerator::from_parts(b_handle, Value::Int(999));
        assert!(producers_equal(&a, &b));
    }

    #[test]
    fn value_equal_generators_with_different_handles_are_equal() {
        let a = ConstantGenerator::new(Value::Int(7));
        let b = ConstantGenerator::new(Value::Int(7));
        assert_ne!(a.handle(), b.handle());
        assert!(producers_equal(&a, &b));
        assert_eq!(producer_hash(&a), producer_hash(&b));
    }

    #[test]
    fn value_unequal_generators_are_not_equal() {
        let a = ConstantGenerator::new(Value::Int(7));
        let b = ConstantGenerator::new(Value::Int(8));
        assert!(!producers_equal(&a, &b));
    }

    #[test]
    fn placeholder_uses_handle_equality() {
        let a = PlaceholderNode::new("x");
        let b = PlaceholderNode::new("x");
        assert_ne!(a.handle(), b.handle());
        assert!(!producers_equal(&a, &b));
    }
}
