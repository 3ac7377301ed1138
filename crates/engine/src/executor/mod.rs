//! The two-phase DAG executor (spec.md §4.5): topological scheduling,
//! minibatching over a worker pool, and the prepare/apply split.

mod pool;

pub use pool::WorkerPool;

use crate::config::ExecutorConfig;
use crate::graph::Dag;
use crate::preparer::{self, InputReader, PreparerMode};
use crate::producer::{
    ConstantGenerator, FnGenerator, PreparableNode, PreparedNode, Producer, ProducerKind,
    ViewNode,
};
use crate::reducer;
use crate::value::Value;
use dagforge_core::{Error, Handle, Result, ResultExt};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A column-major batch of examples: one `Vec<Value>` per declared
/// placeholder, all of equal length (spec.md §4.5, "Inputs").
#[derive(Debug, Clone, Default)]
pub struct ExampleBatch {
    columns: Vec<Vec<Value>>,
}

impl ExampleBatch {
    pub fn new(columns: Vec<Vec<Value>>) -> Result<Self> {
        if let Some(first_len) = columns.first().map(Vec::len) {
            if columns.iter().any(|c| c.len() != first_len) {
                return Err(Error::graph_validation(
                    "all placeholder columns in an example batch must have equal length",
                ));
            }
        }
        Ok(Self { columns })
    }

    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c[index].clone()).collect()
    }

    #[must_use]
    pub fn value(&self, placeholder_index: usize, row: usize) -> &Value {
        &self.columns[placeholder_index][row]
    }
}

/// A cooperative cancellation flag checked at minibatch boundaries (spec.md
/// §4.5, "Suspension points" / "Cancellation"). Cloning shares the same
/// underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// The result of [`DagExecutor::prepare`]: the prepared (for-new-data) DAG,
/// plus the outputs computed by evaluating the for-preparation-data graph
/// over the same examples (spec.md §4.5, "Apply phase").
pub struct PrepareResult {
    pub prepared_dag: Dag,
    pub outputs: Vec<Vec<Value>>,
}

/// Drives a DAG's two-phase lifecycle: `prepare` trains every preparable
/// and evaluates the preparation-data graph, `apply` runs an already
/// prepared DAG for inference (spec.md §4.5).
pub struct DagExecutor {
    config: ExecutorConfig,
}

impl DagExecutor {
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Train every preparable reachable from `dag`'s outputs and evaluate
    /// the resulting preparation-data graph over `examples` (spec.md §4.5).
    ///
    /// Preparables are, by construction, always replaced by
    /// [`crate::producer::PreparedNode`]s — never by new preparables — so a
    /// single topological pass over the reduced graph prepares every
    /// preparable exactly once; a preparable is only ever reached after all
    /// of its own parents have already been resolved.
    pub fn prepare(
        &self,
        dag: &Dag,
        examples: &ExampleBatch,
        cancellation: &CancellationToken,
    ) -> Result<PrepareResult> {
        if examples.row_count() == 0 {
            return Err(Error::graph_validation(
                "prepare requires at least one example",
            ));
        }
        if examples.placeholder_count() != dag.placeholders().len() {
            return Err(Error::graph_validation(
                "example batch arity does not match the DAG's placeholder count",
            ));
        }

        let reduced = reducer::reduce(dag.outputs(), self.config.max_reduction_iterations())?;
        let topo = topo_order(&reduced.outputs)?;
        let placeholder_index = placeholder_index(dag);

        let mut prep_graph: FxHashMap<Handle, Arc<dyn Producer>> = FxHashMap::default();
        let mut new_graph: FxHashMap<Handle, Arc<dyn Producer>> = FxHashMap::default();
        let mut artifacts: FxHashMap<Handle, Value> = FxHashMap::default();
        let row_count = examples.row_count();

        for p in &topo {
            if cancellation.is_cancelled() {
                return Err(Error::execution_cancelled(0));
            }

            let resolved_prep_parents: Vec<Arc<dyn Producer>> = p
                .parents()
                .iter()
                .map(|parent| prep_graph[&parent.handle()].clone())
                .collect();
            let resolved_new_parents: Vec<Arc<dyn Producer>> = p
                .parents()
                .iter()
                .map(|parent| new_graph[&parent.handle()].clone())
                .collect();

            match p.kind() {
                ProducerKind::Preparable => {
                    let preparable = p
                        .as_any()
                        .downcast_ref::<PreparableNode>()
                        .ok_or_else(|| Error::other("preparable kind is not a PreparableNode"))?;
                    let mut trainer = preparable.func().new_preparer();
                    let idempotent_shortcut = trainer.is_idempotent()
                        && resolved_prep_parents
                            .iter()
                            .all(|parent| parent.has_constant_result());
                    let mut buffer = (trainer.mode() == PreparerMode::Batch)
                        .then(|| preparer::InputBuffer::new(self.config.spill_threshold_bytes()));

                    let rows_to_stream = if idempotent_shortcut { 1 } else { row_count };
                    for row_index in 0..rows_to_stream {
                        if cancellation.is_cancelled() {
                            return Err(Error::execution_cancelled(row_index));
                        }
                        let row = examples.row(row_index);
                        let mut memo: FxHashMap<Handle, Value> = FxHashMap::default();
                        let inputs: Vec<Value> = resolved_prep_parents
                            .iter()
                            .map(|parent| {
                                evaluate_example(parent, &row, row_index, &placeholder_index, &mut memo)
                            })
                            .collect::<Result<_>>()?;
                        trainer.process(&inputs)?;
                        if let Some(buf) = buffer.as_mut() {
                            buf.push(inputs)?;
                        }
                    }

                    let mut reader: Option<Box<dyn InputReader>> =
                        buffer.map(preparer::InputBuffer::into_reader).transpose()?;
                    let output = trainer.finish(
                        resolved_prep_parents.clone(),
                        resolved_new_parents.clone(),
                        reader.as_mut().map(|r| r.as_mut() as &mut dyn InputReader),
                    )?;

                    artifacts.insert(p.handle(), output.artifact);
                    prep_graph.insert(p.handle(), output.for_preparation_data);
                    new_graph.insert(p.handle(), output.for_new_data);
                }
                ProducerKind::View => {
                    let parent_handle = p
                        .parents()
                        .first()
                        .map(|parent| parent.handle())
                        .ok_or_else(|| Error::graph_validation("view has no parent"))?;
                    let artifact = artifacts.get(&parent_handle).cloned().ok_or_else(|| {
                        Error::preparer_contract_violation(
                            p.short_name(),
                            "view's parent was never prepared",
                        )
                    })?;

                    let prep_rebuilt = p.with_parents(resolved_prep_parents);
                    if let Some(view) = prep_rebuilt.as_any().downcast_ref::<ViewNode>() {
                        view.resolve(&artifact)?;
                    }
                    let new_rebuilt = p.with_parents(resolved_new_parents);
                    if let Some(view) = new_rebuilt.as_any().downcast_ref::<ViewNode>() {
                        view.resolve(&artifact)?;
                    }

                    prep_graph.insert(p.handle(), prep_rebuilt);
                    new_graph.insert(p.handle(), new_rebuilt);
                }
                _ => {
                    prep_graph.insert(p.handle(), rebuild_if_changed(p, &resolved_prep_parents));
                    new_graph.insert(p.handle(), rebuild_if_changed(p, &resolved_new_parents));
                }
            }
        }

        let preparation_outputs: Vec<Arc<dyn Producer>> = reduced
            .outputs
            .iter()
            .map(|o| prep_graph[&o.handle()].clone())
            .collect();
        let new_data_outputs: Vec<Arc<dyn Producer>> = reduced
            .outputs
            .iter()
            .map(|o| new_graph[&o.handle()].clone())
            .collect();

        let prepared_dag =
            Dag::with_outputs_unchecked(dag.placeholders().to_vec(), new_data_outputs);
        let preparation_dag =
            Dag::with_outputs_unchecked(dag.placeholders().to_vec(), preparation_outputs);
        let outputs = self.apply(&preparation_dag, examples, cancellation)?;

        Ok(PrepareResult {
            prepared_dag,
            outputs,
        })
    }

    /// Evaluate an already-prepared DAG over `examples`, in minibatches,
    /// across the configured worker pool (spec.md §4.5, "Apply phase").
    pub fn apply(
        &self,
        dag: &Dag,
        examples: &ExampleBatch,
        cancellation: &CancellationToken,
    ) -> Result<Vec<Vec<Value>>> {
        if dag.is_preparable() {
            return Err(Error::graph_validation(
                "apply() requires a prepared DAG; call prepare() first",
            ));
        }
        if examples.placeholder_count() != dag.placeholders().len() {
            return Err(Error::graph_validation(
                "example batch arity does not match the DAG's placeholder count",
            ));
        }

        let reduced = reducer::reduce(dag.outputs(), self.config.max_reduction_iterations())?;
        let topo = topo_order(&reduced.outputs)?;
        let placeholder_index = placeholder_index(dag);

        let row_count = examples.row_count();
        let minibatch_size = self.config.inference_minibatch_size().max(1);
        let num_minibatches = if row_count == 0 {
            0
        } else {
            row_count.div_ceil(minibatch_size)
        };
        let num_outputs = reduced.outputs.len();

        let pool = WorkerPool::new(self.config.worker_count());
        let minibatch_results: Vec<Vec<Vec<Value>>> = pool
            .map_indexed(num_minibatches, cancellation, |mb_index| {
                let start = mb_index * minibatch_size;
                let end = (start + minibatch_size).min(row_count);
                evaluate_minibatch(&topo, examples, &placeholder_index, start, end, mb_index)
                    .map(|per_node| {
                        reduced
                            .outputs
                            .iter()
                            .map(|o| per_node[&o.handle()].clone())
                            .collect()
                    })
            })
            .inspect_error(|e| tracing::warn!(error = %e, "minibatch evaluation failed during apply"))?;

        let mut final_outputs: Vec<Vec<Value>> = (0..num_outputs).map(|_| Vec::with_capacity(row_count)).collect();
        for minibatch in minibatch_results {
            for (output_index, column) in minibatch.into_iter().enumerate() {
                final_outputs[output_index].extend(column);
            }
        }
        Ok(final_outputs)
    }
}

fn placeholder_index(dag: &Dag) -> FxHashMap<Handle, usize> {
    dag.placeholders()
        .iter()
        .enumerate()
        .map(|(i, p)| (p.handle(), i))
        .collect()
}

/// Evaluate every node in `topo` for rows `[start, end)`, returning each
/// node's minibatch-local output column keyed by handle.
fn evaluate_minibatch(
    topo: &[Arc<dyn Producer>],
    examples: &ExampleBatch,
    placeholder_index: &FxHashMap<Handle, usize>,
    start: usize,
    end: usize,
    minibatch_index: usize,
) -> Result<FxHashMap<Handle, Vec<Value>>> {
    let mut per_node: FxHashMap<Handle, Vec<Value>> = FxHashMap::default();
    let width = end - start;

    for p in topo {
        let values: Vec<Value> = match p.kind() {
            ProducerKind::Placeholder => {
                let idx = *placeholder_index.get(&p.handle()).ok_or_else(|| {
                    Error::graph_validation("placeholder not bound to an input column")
                })?;
                (start..end).map(|row| examples.value(idx, row).clone()).collect()
            }
            ProducerKind::Generator => {
                if let Some(g) = p.as_any().downcast_ref::<ConstantGenerator>() {
                    vec![g.value().clone(); width]
                } else if let Some(g) = p.as_any().downcast_ref::<FnGenerator>() {
                    (start..end).map(|row| g.generate(row)).collect::<Result<_>>()?
                } else {
                    return Err(Error::other("unknown generator kind"));
                }
            }
            ProducerKind::Prepared => {
                let node = p
                    .as_any()
                    .downcast_ref::<PreparedNode>()
                    .ok_or_else(|| Error::other("prepared kind is not a PreparedNode"))?;
                let rows: Vec<Vec<Value>> = (0..width)
                    .map(|local| {
                        node.parents()
                            .iter()
                            .map(|parent| per_node[&parent.handle()][local].clone())
                            .collect()
                    })
                    .collect();
                node.apply_batch(&rows)
                    .map_err(|e| Error::execution_failure(p.short_name(), minibatch_index, e))?
            }
            ProducerKind::View => {
                let view = p
                    .as_any()
                    .downcast_ref::<ViewNode>()
                    .ok_or_else(|| Error::other("view kind is not a ViewNode"))?;
                vec![view.resolved_value()?.clone(); width]
            }
            ProducerKind::Preparable | ProducerKind::MissingInput => {
                return Err(Error::graph_validation(
                    "a prepared DAG must not contain preparable or missing-input producers",
                ));
            }
        };
        per_node.insert(p.handle(), values);
    }
    Ok(per_node)
}

/// Compute `p`'s value for a single example, recursively, given already-
/// resolved (non-preparable) ancestors. Used only during the prepare phase
/// to feed a preparer's `process` calls.
fn evaluate_example(
    p: &Arc<dyn Producer>,
    row: &[Value],
    example_index: usize,
    placeholder_index: &FxHashMap<Handle, usize>,
    memo: &mut FxHashMap<Handle, Value>,
) -> Result<Value> {
    if let Some(value) = memo.get(&p.handle()) {
        return Ok(value.clone());
    }
    let value = match p.kind() {
        ProducerKind::Placeholder => {
            let idx = *placeholder_index.get(&p.handle()).ok_or_else(|| {
                Error::graph_validation("placeholder not bound to an input column")
            })?;
            row[idx].clone()
        }
        ProducerKind::Generator => {
            if let Some(g) = p.as_any().downcast_ref::<ConstantGenerator>() {
                g.value().clone()
            } else if let Some(g) = p.as_any().downcast_ref::<FnGenerator>() {
                g.generate(example_index)?
            } else {
                return Err(Error::other("unknown generator kind"));
            }
        }
        ProducerKind::Prepared => {
            let node = p
                .as_any()
                .downcast_ref::<PreparedNode>()
                .ok_or_else(|| Error::other("prepared kind is not a PreparedNode"))?;
            let mut inputs = Vec::with_capacity(node.parents().len());
            for parent in node.parents() {
                inputs.push(evaluate_example(parent, row, example_index, placeholder_index, memo)?);
            }
            node.apply(&inputs)?
        }
        ProducerKind::View => {
            let view = p
                .as_any()
                .downcast_ref::<ViewNode>()
                .ok_or_else(|| Error::other("view kind is not a ViewNode"))?;
            view.resolved_value()?.clone()
        }
        ProducerKind::Preparable | ProducerKind::MissingInput => {
            return Err(Error::preparer_contract_violation(
                p.short_name(),
                "cannot evaluate an unprepared or missing-input producer per example",
            ));
        }
    };
    memo.insert(p.handle(), value.clone());
    Ok(value)
}

fn rebuild_if_changed(p: &Arc<dyn Producer>, resolved_parents: &[Arc<dyn Producer>]) -> Arc<dyn Producer> {
    if p.parents().is_empty() {
        return p.clone();
    }
    let changed = p
        .parents()
        .iter()
        .zip(resolved_parents.iter())
        .any(|(original, resolved)| original.handle() != resolved.handle());
    if changed {
        p.with_parents(resolved_parents.to_vec())
    } else {
        p.clone()
    }
}

/// Topologically sort the subgraph reachable from `outputs`, parents before
/// children (spec.md §4.5, "Topologically sort the subgraph reachable from
/// outputs").
fn topo_order(outputs: &[Arc<dyn Producer>]) -> Result<Vec<Arc<dyn Producer>>> {
    let mut by_handle: FxHashMap<Handle, Arc<dyn Producer>> = FxHashMap::default();
    let mut graph = DiGraph::<Handle, ()>::new();
    let mut node_index = FxHashMap::default();

    let mut stack: Vec<Arc<dyn Producer>> = outputs.to_vec();
    while let Some(p) = stack.pop() {
        if by_handle.contains_key(&p.handle()) {
            continue;
        }
        let idx = graph.add_node(p.handle());
        node_index.insert(p.handle(), idx);
        stack.extend(p.parents().iter().cloned());
        by_handle.insert(p.handle(), p);
    }
    for p in by_handle.values() {
        let child_idx = node_index[&p.handle()];
        for parent in p.parents() {
            let parent_idx = node_index[&parent.handle()];
            graph.add_edge(parent_idx, child_idx, ());
        }
    }

    let sorted = toposort(&graph, None)
        .map_err(|cycle| Error::graph_validation(format!("cycle detected at node {:?}", cycle.node_id())))?;
    Ok(sorted
        .into_iter()
        .map(|idx| by_handle[&graph[idx]].clone())
        .collect())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::preparer::Preparer;
    use crate::producer::{ConstantDeclaration, PlaceholderNode, PreparedFn};

    #[derive(Debug)]
    struct Identity;
    impl PreparedFn for Identity {
        fn stable_id(&self) -> String {
            "identity".to_string()
        }
        fn apply(&self, inputs: &[Value]) -> Result<Value> {
            Ok(inputs.first().cloned().unwrap_or(Value::Unit))
        }
    }

    #[derive(Debug)]
    struct AddConst(i64);
    impl PreparedFn for AddConst {
        fn stable_id(&self) -> String {
            format!("add_const({})", self.0)
        }
        fn apply(&self, inputs: &[Value]) -> Result<Value> {
            let n = inputs.first().and_then(Value::as_int).unwrap_or(0);
            Ok(Value::Int(n + self.0))
        }
    }

    #[test]
    fn identity_dag_applies_placeholder_values_unchanged() {
        let x: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("x"));
        let dag = Dag::new(vec![x.clone()]).with_outputs(vec![x]).unwrap();
        let executor = DagExecutor::new(ExecutorConfig::default());
        let examples = ExampleBatch::new(vec![vec![
            Value::Str("a".into()),
            Value::Str("b".into()),
            Value::Str("c".into()),
        ]])
        .unwrap();

        let outputs = executor
            .apply(&dag, &examples, &CancellationToken::new())
            .unwrap();
        assert_eq!(
            outputs[0],
            vec![
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("c".into())
            ]
        );
    }

    #[test]
    fn constant_subgraph_applies_to_the_same_value_for_every_example() {
        let x: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("x"));
        let five: Arc<dyn Producer> = Arc::new(ConstantGenerator::new(Value::Int(5)));
        let add3: Arc<dyn Producer> = Arc::new(PreparedNode::new(
            vec![five],
            Arc::new(AddConst(3)),
            ConstantDeclaration::Transitive,
        ));
        let dag = Dag::new(vec![x]).with_outputs(vec![add3]).unwrap();
        let executor = DagExecutor::new(ExecutorConfig::default());
        let examples =
            ExampleBatch::new(vec![vec![Value::Int(0), Value::Int(0), Value::Int(0)]]).unwrap();

        let outputs = executor
            .apply(&dag, &examples, &CancellationToken::new())
            .unwrap();
        assert_eq!(outputs[0], vec![Value::Int(8), Value::Int(8), Value::Int(8)]);
    }

    struct CountingPreparer {
        seen: u64,
    }
    impl Preparer for CountingPreparer {
        fn mode(&self) -> PreparerMode {
            PreparerMode::Stream
        }
        fn process(&mut self, _inputs: &[Value]) -> Result<()> {
            self.seen += 1;
            Ok(())
        }
        fn finish(
            &mut self,
            prep_parents: Vec<Arc<dyn Producer>>,
            new_parents: Vec<Arc<dyn Producer>>,
            _reader: Option<&mut dyn InputReader>,
        ) -> Result<preparer::PreparerOutput> {
            Ok(preparer::PreparerOutput {
                for_preparation_data: Arc::new(PreparedNode::new(
                    prep_parents,
                    Arc::new(Identity),
                    ConstantDeclaration::Never,
                )),
                for_new_data: Arc::new(PreparedNode::new(
                    new_parents,
                    Arc::new(Identity),
                    ConstantDeclaration::Never,
                )),
                artifact: Value::Int(self.seen as i64),
            })
        }
    }

    #[derive(Debug)]
    struct CountingPreparable;
    impl crate::producer::PreparableFn for CountingPreparable {
        fn stable_id(&self) -> String {
            "counting_preparable".to_string()
        }
        fn mode(&self) -> PreparerMode {
            PreparerMode::Stream
        }
        fn new_preparer(&self) -> Box<dyn Preparer> {
            Box::new(CountingPreparer { seen: 0 })
        }
    }

    #[test]
    fn preparing_a_pass_through_preparable_yields_an_identity_prepared_dag() {
        let x: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("x"));
        let trained: Arc<dyn Producer> = Arc::new(PreparableNode::new(
            vec![x.clone()],
            Arc::new(CountingPreparable),
        ));
        let dag = Dag::new(vec![x]).with_outputs(vec![trained]).unwrap();
        let executor = DagExecutor::new(ExecutorConfig::default());
        let examples =
            ExampleBatch::new(vec![vec![Value::Int(1), Value::Int(2), Value::Int(3)]]).unwrap();

        let result = executor
            .prepare(&dag, &examples, &CancellationToken::new())
            .unwrap();
        assert_eq!(
            result.outputs[0],
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
        assert!(!result.prepared_dag.is_preparable());

        let inference_examples = ExampleBatch::new(vec![vec![Value::Int(42)]]).unwrap();
        let applied = executor
            .apply(&result.prepared_dag, &inference_examples, &CancellationToken::new())
            .unwrap();
        assert_eq!(applied[0], vec![Value::Int(42)]);
    }

    #[test]
    fn cancellation_before_any_work_short_circuits_apply() {
        let x: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("x"));
        let dag = Dag::new(vec![x.clone()]).with_outputs(vec![x]).unwrap();
        let executor = DagExecutor::new(ExecutorConfig::default());
        let examples = ExampleBatch::new(vec![vec![Value::Int(1); 10]]).unwrap();
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let result = executor.apply(&dag, &examples, &cancellation);
        assert!(result.is_err());
    }
}
