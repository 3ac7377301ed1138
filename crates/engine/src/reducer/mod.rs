//! The fixed-point graph rewriter (spec.md §4.3): node-local and
//! class-indexed reducers, value-equality deduplication, and constant
//! folding.

use crate::producer::{
    producers_equal, ConstantGenerator, PreparedNode, Producer, ProducerKind, ViewNode,
};
use crate::value::Value;
use dagforge_core::{Handle, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// A local graph-rewrite rule (spec.md §4.3). Given a producer and a view
/// onto constants discovered so far in the current pass, return a
/// replacement producer, or `None` for "no change".
///
/// Reducers must not depend on traversal order for correctness (spec.md
/// §4.3, "Ordering guarantee") — a reducer that only fires when its
/// surrounding graph looks a particular way, rather than purely from the
/// candidate producer and its parents, violates that guarantee.
pub trait Reducer: Send + Sync {
    fn name(&self) -> &'static str;

    fn try_reduce(
        &self,
        producer: &Arc<dyn Producer>,
        ctx: &ReductionContext<'_>,
    ) -> Option<Arc<dyn Producer>>;
}

/// What a [`Reducer`] is handed alongside the candidate producer: the
/// constant values discovered for other nodes earlier in the current pass,
/// keyed by handle.
pub struct ReductionContext<'a> {
    constants: &'a FxHashMap<Handle, Value>,
}

impl<'a> ReductionContext<'a> {
    #[must_use]
    pub fn constant_value_of(&self, p: &Arc<dyn Producer>) -> Option<&Value> {
        self.constants.get(&p.handle())
    }
}

/// A value-equality hash table used to collapse structurally-equal
/// producers discovered during a single reduction pass into one canonical
/// instance (spec.md §4.3, "duplicate elimination"; §5, "single-threaded").
pub struct DedupTable {
    buckets: FxHashMap<u64, Vec<Arc<dyn Producer>>>,
}

impl DedupTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: FxHashMap::default(),
        }
    }

    /// Return the canonical producer equal to `candidate`, inserting
    /// `candidate` itself as canonical if none exists yet.
    pub fn find_or_insert(&mut self, candidate: Arc<dyn Producer>) -> Arc<dyn Producer> {
        let hash = crate::producer::producer_hash(candidate.as_ref());
        let bucket = self.buckets.entry(hash).or_default();
        for existing in bucket.iter() {
            if producers_equal(existing.as_ref(), candidate.as_ref()) {
                return existing.clone();
            }
        }
        bucket.push(candidate.clone());
        candidate
    }
}

impl Default for DedupTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The class-indexed and node-local reducers in scope for one reduction run,
/// gathered once by walking the starting graph (spec.md §4.3).
pub struct ReducerRegistry {
    node_local: FxHashMap<&'static str, Vec<Arc<dyn Reducer>>>,
    class_indexed: FxHashMap<&'static str, Vec<Arc<dyn Reducer>>>,
}

impl ReducerRegistry {
    #[must_use]
    pub fn build(outputs: &[Arc<dyn Producer>]) -> Self {
        let mut node_local: FxHashMap<&'static str, Vec<Arc<dyn Reducer>>> = FxHashMap::default();
        let mut class_indexed: FxHashMap<&'static str, Vec<Arc<dyn Reducer>>> =
            FxHashMap::default();
        let mut visited: FxHashSet<Handle> = FxHashSet::default();
        let mut stack: Vec<Arc<dyn Producer>> = outputs.to_vec();
        while let Some(p) = stack.pop() {
            if !visited.insert(p.handle()) {
                continue;
            }
            if !p.node_local_reducers().is_empty() {
                node_local
                    .entry(p.handle().class())
                    .or_default()
                    .extend(p.node_local_reducers());
            }
            for (class, reducer) in p.class_indexed_reducers() {
                class_indexed.entry(class).or_default().push(reducer);
            }
            stack.extend(p.parents().iter().cloned());
        }
        Self {
            node_local,
            class_indexed,
        }
    }

    fn applicable(&self, p: &Arc<dyn Producer>) -> Vec<Arc<dyn Reducer>> {
        let mut out = Vec::new();
        if let Some(v) = self.node_local.get(p.handle().class()) {
            out.extend(v.iter().cloned());
        }
        if let Some(v) = self.class_indexed.get(p.handle().class()) {
            out.extend(v.iter().cloned());
        }
        out
    }
}

/// Recursively evaluate `p`'s single constant value, if it has one,
/// memoizing by handle within `memo` so shared subgraphs are only evaluated
/// once per pass.
pub fn evaluate_constant(
    p: &Arc<dyn Producer>,
    memo: &mut FxHashMap<Handle, Value>,
) -> Result<Option<Value>> {
    if !p.has_constant_result() {
        return Ok(None);
    }
    if let Some(value) = memo.get(&p.handle()) {
        return Ok(Some(value.clone()));
    }
    let value = if let Some(generator) = p.as_any().downcast_ref::<ConstantGenerator>() {
        generator.value().clone()
    } else if let Some(view) = p.as_any().downcast_ref::<ViewNode>() {
        match view.resolved_value() {
            Ok(value) => value.clone(),
            Err(_) => return Ok(None),
        }
    } else if let Some(prepared) = p.as_any().downcast_ref::<PreparedNode>() {
        let mut inputs = Vec::with_capacity(prepared.parents().len());
        for parent in prepared.parents() {
            match evaluate_constant(parent, memo)? {
                Some(value) => inputs.push(value),
                None => return Ok(None),
            }
        }
        prepared.apply(&inputs)?
    } else {
        // No known recipe for this concrete kind (e.g. a preparable, which
        // cannot be evaluated before training). Declared constant but
        // structurally opaque to the reducer — leave it alone.
        return Ok(None);
    };
    memo.insert(p.handle(), value.clone());
    Ok(Some(value))
}

/// Replace `p` with an equivalent [`ConstantGenerator`] if its value can be
/// computed now (spec.md §4.3, constant folding).
fn try_constant_fold(
    p: &Arc<dyn Producer>,
    memo: &mut FxHashMap<Handle, Value>,
) -> Result<Option<Arc<dyn Producer>>> {
    if p.as_any().downcast_ref::<ConstantGenerator>().is_some() {
        return Ok(None);
    }
    if matches!(p.kind(), ProducerKind::Placeholder | ProducerKind::MissingInput) {
        return Ok(None);
    }
    match evaluate_constant(p, memo)? {
        Some(value) => Ok(Some(Arc::new(ConstantGenerator::new(value)) as Arc<dyn Producer>)),
        None => Ok(None),
    }
}

/// The result of running [`reduce`] to either a fixed point or the
/// iteration budget, whichever comes first.
pub struct ReductionReport {
    pub outputs: Vec<Arc<dyn Producer>>,
    pub iterations: u64,
    pub converged: bool,
}

/// Rewrite `outputs` to a fixed point under `registry`'s reducers, constant
/// folding, and deduplication (spec.md §4.3).
///
/// Exceeding `max_iterations` is not fatal (spec.md §7,
/// `ReducerBudgetExceeded`: "Logged; execution proceeds with best-so-far
/// graph") — the caller gets back the best graph reached so far with
/// `converged: false` and a warning has already been logged.
pub fn reduce(outputs: &[Arc<dyn Producer>], max_iterations: u64) -> Result<ReductionReport> {
    let registry = ReducerRegistry::build(outputs);
    let mut dedup = DedupTable::new();
    let mut current: Vec<Arc<dyn Producer>> = outputs.to_vec();
    let mut iterations: u64 = 0;

    loop {
        let mut memo: FxHashMap<Handle, Arc<dyn Producer>> = FxHashMap::default();
        let mut const_memo: FxHashMap<Handle, Value> = FxHashMap::default();
        let mut changed = false;

        let mut next = Vec::with_capacity(current.len());
        for output in &current {
            next.push(rewrite_node(
                output,
                &registry,
                &mut dedup,
                &mut memo,
                &mut const_memo,
                &mut changed,
            )?);
        }
        iterations += 1;

        if !changed {
            return Ok(ReductionReport {
                outputs: next,
                iterations,
                converged: true,
            });
        }
        current = next;

        if iterations >= max_iterations {
            tracing::warn!(
                iterations,
                "reducer fixed point did not converge within the configured iteration budget"
            );
            return Ok(ReductionReport {
                outputs: current,
                iterations,
                converged: false,
            });
        }
    }
}

/// Memoized post-order rewrite of one node: rewrite parents, rebuild with
/// any changed parents, apply reducers, try constant folding, then
/// canonicalize through `dedup`.
fn rewrite_node(
    p: &Arc<dyn Producer>,
    registry: &ReducerRegistry,
    dedup: &mut DedupTable,
    memo: &mut FxHashMap<Handle, Arc<dyn Producer>>,
    const_memo: &mut FxHashMap<Handle, Value>,
    changed: &mut bool,
) -> Result<Arc<dyn Producer>> {
    let original_handle = p.handle();
    if let Some(existing) = memo.get(&original_handle) {
        return Ok(existing.clone());
    }

    let mut candidate = if p.parents().is_empty() {
        p.clone()
    } else {
        let mut new_parents = Vec::with_capacity(p.parents().len());
        let mut parents_changed = false;
        for parent in p.parents() {
            let rewritten = rewrite_node(parent, registry, dedup, memo, const_memo, changed)?;
            if rewritten.handle() != parent.handle() {
                parents_changed = true;
            }
            new_parents.push(rewritten);
        }
        if parents_changed {
            p.with_parents(new_parents)
        } else {
            p.clone()
        }
    };

    {
        let ctx = ReductionContext {
            constants: const_memo,
        };
        for reducer in registry.applicable(&candidate) {
            if let Some(replacement) = reducer.try_reduce(&candidate, &ctx) {
                if !producers_equal(replacement.as_ref(), candidate.as_ref()) {
                    candidate = replacement;
                }
            }
        }
    }

    if let Some(folded) = try_constant_fold(&candidate, const_memo)? {
        candidate = folded;
    }

    let canonical = dedup.find_or_insert(candidate);
    if canonical.handle() != original_handle {
        *changed = true;
    }
    memo.insert(original_handle, canonical.clone());
    Ok(canonical)
}
