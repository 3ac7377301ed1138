//! A producer that derives one constant value from a prepared successor's
//! training-time artifact, rather than from per-example outputs (spec.md
//! §4.6, GLOSSARY "View").

use super::{ConstantDeclaration, EqualityPolicy, Producer, ProducerCache, ProducerKind};
use crate::value::Value;
use dagforge_core::{Error, Handle, OptionExt, Result};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// The extraction behavior a [`ViewNode`] wraps: given the artifact produced
/// by training its single preparable parent, derive one constant [`Value`].
pub trait ViewFn: Send + Sync + fmt::Debug {
    fn stable_id(&self) -> String;

    fn extract(&self, artifact: &Value) -> Result<Value>;
}

/// A view over a single preparable parent's training artifact (spec.md
/// §4.6). Unlike every other producer kind, a view's value does not come
/// from evaluating its parent per example — it is resolved once, during
/// preparation, and held fixed for the rest of the execution.
pub struct ViewNode {
    handle: Handle,
    parent: Arc<dyn Producer>,
    func: Arc<dyn ViewFn>,
    resolved: OnceLock<Value>,
    cache: ProducerCache,
}

impl fmt::Debug for ViewNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewNode")
            .field("handle", &self.handle)
            .field("func", &self.func.stable_id())
            .field("resolved", &self.resolved.get())
            .finish()
    }
}

impl ViewNode {
    #[must_use]
    pub fn new(parent: Arc<dyn Producer>, func: Arc<dyn ViewFn>) -> Self {
        Self {
            handle: Handle::fresh("view"),
            parent,
            func,
            resolved: OnceLock::new(),
            cache: ProducerCache::new(),
        }
    }

    /// Reconstruct with an explicit handle and, optionally, an
    /// already-resolved value — used by deserialization, which must
    /// preserve both handles and resolution state exactly (spec.md §6: a
    /// prepared DAG's views are already resolved, and must stay that way
    /// across a round trip).
    #[must_use]
    pub fn from_parts(
        handle: Handle,
        parent: Arc<dyn Producer>,
        func: Arc<dyn ViewFn>,
        resolved: Option<Value>,
    ) -> Self {
        let cell = OnceLock::new();
        if let Some(value) = resolved {
            let _ = cell.set(value);
        }
        Self {
            handle,
            parent,
            func,
            resolved: cell,
            cache: ProducerCache::new(),
        }
    }

    #[must_use]
    pub fn func(&self) -> &Arc<dyn ViewFn> {
        &self.func
    }

    /// Resolve this view's value from its parent's training artifact. Called
    /// at most once, by the executor, immediately after the parent finishes
    /// preparation; later calls are no-ops (spec.md §3: caches never
    /// transition once observed).
    pub fn resolve(&self, artifact: &Value) -> Result<()> {
        if self.resolved.get().is_some() {
            return Ok(());
        }
        let value = self.func.extract(artifact)?;
        // `OnceLock::set` losing a race is fine: whichever value won is
        // still a valid extraction from the same artifact.
        let _ = self.resolved.set(value);
        Ok(())
    }

    /// The resolved value, or an error if this view was never resolved
    /// (i.e. the executor ran the apply phase without preparing it first).
    pub fn resolved_value(&self) -> Result<&Value> {
        self.resolved.get().ok_or_else_lazy(|| {
            Error::preparer_contract_violation(
                self.func.stable_id(),
                "view read before its parent finished preparation",
            )
        })
    }
}

impl Producer for ViewNode {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn kind(&self) -> ProducerKind {
        ProducerKind::View
    }

    fn parents(&self) -> &[Arc<dyn Producer>] {
        std::slice::from_ref(&self.parent)
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
            .is_some_and(|o| o.func.stable_id() == self.func.stable_id())
    }

    fn value_fields_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = rustc_hash::FxHasher::default();
        self.func.stable_id().hash(&mut hasher);
        hasher.finish()
    }

    fn with_parents(&self, new_parents: Vec<Arc<dyn Producer>>) -> Arc<dyn Producer> {
        debug_assert_eq!(new_parents.len(), 1, "views have exactly one parent");
        let parent = new_parents.into_iter().next().unwrap_or_else(|| self.parent.clone());
        Arc::new(Self::new(parent, self.func.clone()))
    }

    fn short_name(&self) -> String {
        format!("view({})", self.func.stable_id())
    }
}
