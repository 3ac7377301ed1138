//! The DAG value type: placeholders, outputs, validation, and subgraph
//! extraction (spec.md §4.2).

use crate::producer::{validate_producer, Producer, ProducerKind};
use dagforge_core::{Error, Handle, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// An ordered list of placeholders awaiting an output list (spec.md §4.2,
/// `newDAG(placeholders…)`). `with_outputs` performs the validation pass
/// and produces the immutable [`Dag`].
pub struct DagBuilder {
    placeholders: Vec<Arc<dyn Producer>>,
}

impl DagBuilder {
    /// Validate and close over `outputs`, producing a [`Dag`] (spec.md
    /// §4.2): every output's transitive ancestor set reduces to declared
    /// placeholders and generators at the leaves, there are no duplicate
    /// placeholders, and the reachable subgraph is acyclic.
    pub fn with_outputs(self, outputs: Vec<Arc<dyn Producer>>) -> Result<Dag> {
        for placeholder in &self.placeholders {
            if placeholder.kind() != ProducerKind::Placeholder {
                return Err(Error::graph_validation(format!(
                    "'{}' was declared as a DAG placeholder but is not a placeholder producer",
                    placeholder.short_name()
                )));
            }
        }

        let mut declared: FxHashSet<Handle> = FxHashSet::default();
        for placeholder in &self.placeholders {
            if !declared.insert(placeholder.handle()) {
                return Err(Error::graph_validation(format!(
                    "duplicate placeholder '{}' in DAG declaration",
                    placeholder.short_name()
                )));
            }
        }

        let mut stack: FxHashSet<Handle> = FxHashSet::default();
        let mut finished: FxHashMap<Handle, &'static str> = FxHashMap::default();
        for output in &outputs {
            visit(output, &mut stack, &mut finished, &declared)?;
        }

        Ok(Dag {
            placeholders: self.placeholders,
            outputs,
        })
    }
}

/// An immutable, validated producer graph: an ordered placeholder list
/// (arity *N*), an ordered output list (arity *M*), and the transitive
/// subgraph reachable from the outputs (spec.md §4.2 GLOSSARY, "DAG"). A
/// `Dag` is itself conceptually a producer — preparable iff it contains any
/// preparable producer, prepared otherwise.
#[derive(Debug)]
pub struct Dag {
    placeholders: Vec<Arc<dyn Producer>>,
    outputs: Vec<Arc<dyn Producer>>,
}

impl Dag {
    #[must_use]
    pub fn new(placeholders: Vec<Arc<dyn Producer>>) -> DagBuilder {
        DagBuilder { placeholders }
    }

    #[must_use]
    pub fn placeholders(&self) -> &[Arc<dyn Producer>] {
        &self.placeholders
    }

    #[must_use]
    pub fn outputs(&self) -> &[Arc<dyn Producer>] {
        &self.outputs
    }

    /// True if any producer reachable from the outputs is preparable
    /// (spec.md GLOSSARY, "DAG"). A DAG with no preparables is already a
    /// prepared DAG, fit for direct inference.
    #[must_use]
    pub fn is_preparable(&self) -> bool {
        self.subgraph()
            .iter()
            .any(|p| p.kind() == ProducerKind::Preparable)
    }

    /// The transitive subgraph reachable from the outputs, deduplicated by
    /// handle, in an unspecified (stack-based DFS) order. Used by the
    /// reducer and the executor's scheduler, and exposed for
    /// inspection/serialization.
    #[must_use]
    pub fn subgraph(&self) -> Vec<Arc<dyn Producer>> {
        let mut seen: FxHashSet<Handle> = FxHashSet::default();
        let mut order = Vec::new();
        let mut queue: Vec<Arc<dyn Producer>> = self.outputs.clone();
        while let Some(p) = queue.pop() {
            if !seen.insert(p.handle()) {
                continue;
            }
            queue.extend(p.parents().iter().cloned());
            order.push(p);
        }
        order
    }

    /// Replace this DAG's outputs (and, transitively, its reachable
    /// subgraph) with an already-reduced or already-prepared equivalent,
    /// without re-running placeholder validation (the placeholder list is
    /// unchanged; only internal structure changed).
    #[must_use]
    pub fn with_outputs_unchecked(
        placeholders: Vec<Arc<dyn Producer>>,
        outputs: Vec<Arc<dyn Producer>>,
    ) -> Self {
        Self {
            placeholders,
            outputs,
        }
    }
}

/// Post-order DFS validating acyclicity, leaf kinds, and handle/class
/// consistency across the subgraph reachable from a single output.
fn visit(
    p: &Arc<dyn Producer>,
    stack: &mut FxHashSet<Handle>,
    finished: &mut FxHashMap<Handle, &'static str>,
    declared_placeholders: &FxHashSet<Handle>,
) -> Result<()> {
    validate_producer(p.as_ref())?;
    let handle = p.handle();

    if let Some(existing_class) = finished.get(&handle) {
        if *existing_class != handle.class() {
            return Err(Error::graph_validation(format!(
                "handle {handle} is shared by producers of two different classes ('{existing_class}' and '{}')",
                handle.class()
            )));
        }
        return Ok(());
    }

    if !stack.insert(handle) {
        return Err(Error::graph_validation(format!(
            "cycle detected at producer '{}'",
            p.short_name()
        )));
    }

    if p.parents().is_empty() {
        match p.kind() {
            ProducerKind::Placeholder => {
                if !declared_placeholders.contains(&handle) {
                    return Err(Error::graph_validation(format!(
                        "placeholder '{}' is reachable from the outputs but was not declared in the DAG's placeholder list",
                        p.short_name()
                    )));
                }
            }
            ProducerKind::Generator => {}
            _ => {
                return Err(Error::graph_validation(format!(
                    "leaf producer '{}' reachable from outputs must be a placeholder or generator",
                    p.short_name()
                )));
            }
        }
    }

    for parent in p.parents() {
        visit(parent, stack, finished, declared_placeholders)?;
    }

    stack.remove(&handle);
    finished.insert(handle, handle.class());
    Ok(())
}
