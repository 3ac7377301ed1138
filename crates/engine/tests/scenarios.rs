//! End-to-end scenarios and round-trip laws (spec.md §8).

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use dagforge_engine::producer::{
    ConstantDeclaration, ConstantGenerator, PlaceholderNode, PreparableFn, PreparableNode,
    PreparedFn, PreparedNode, Producer,
};
use dagforge_engine::{CancellationToken, Dag, DagExecutor, Error, ExampleBatch, ExecutorConfig, Result, Value};
use dagforge_engine::preparer::{InputReader, Preparer, PreparerMode, PreparerOutput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct AddConst(i64);
impl PreparedFn for AddConst {
    fn stable_id(&self) -> String {
        format!("add({})", self.0)
    }
    fn apply(&self, inputs: &[Value]) -> Result<Value> {
        let n = inputs.first().and_then(Value::as_int).unwrap_or(0);
        Ok(Value::Int(n + self.0))
    }
}

#[derive(Debug)]
struct MultiplyBy(i64);
impl PreparedFn for MultiplyBy {
    fn stable_id(&self) -> String {
        format!("multiply_by({})", self.0)
    }
    fn apply(&self, inputs: &[Value]) -> Result<Value> {
        let n = inputs.first().and_then(Value::as_int).unwrap_or(0);
        Ok(Value::Int(n * self.0))
    }
}

#[test]
fn scenario_1_identity_pipeline() {
    let x: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("x"));
    let dag = Dag::new(vec![x.clone()]).with_outputs(vec![x]).unwrap();
    let executor = DagExecutor::new(ExecutorConfig::default());
    let cancellation = CancellationToken::new();

    let training =
        ExampleBatch::new(vec![vec![Value::Str("a".into()), Value::Str("b".into()), Value::Str("c".into())]])
            .unwrap();
    let result = executor.prepare(&dag, &training, &cancellation).unwrap();
    assert_eq!(
        result.outputs[0],
        vec![Value::Str("a".into()), Value::Str("b".into()), Value::Str("c".into())]
    );

    let inference = ExampleBatch::new(vec![vec![Value::Str("d".into())]]).unwrap();
    let applied = executor
        .apply(&result.prepared_dag, &inference, &cancellation)
        .unwrap();
    assert_eq!(applied[0], vec![Value::Str("d".into())]);
}

#[test]
fn scenario_2_constant_folding() {
    // add(X, const(3)) where X is itself fed const(5): reduction should
    // collapse the whole subgraph to const(8), which applies to the same
    // value for any example regardless of the placeholder's contents.
    let placeholder: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("unused"));
    let five: Arc<dyn Producer> = Arc::new(ConstantGenerator::new(Value::Int(5)));
    let add3: Arc<dyn Producer> = Arc::new(PreparedNode::new(
        vec![five],
        Arc::new(AddConst(3)),
        ConstantDeclaration::Transitive,
    ));
    let dag = Dag::new(vec![placeholder]).with_outputs(vec![add3]).unwrap();
    let executor = DagExecutor::new(ExecutorConfig::default());
    let examples = ExampleBatch::new(vec![vec![Value::Int(0), Value::Int(0), Value::Int(0)]]).unwrap();

    let outputs = executor.apply(&dag, &examples, &CancellationToken::new()).unwrap();
    assert_eq!(outputs[0], vec![Value::Int(8), Value::Int(8), Value::Int(8)]);
}

struct CountingDistinctInputsPreparer {
    calls: u64,
}
impl Preparer for CountingDistinctInputsPreparer {
    fn mode(&self) -> PreparerMode {
        PreparerMode::Stream
    }
    fn is_idempotent(&self) -> bool {
        true
    }
    fn process(&mut self, _inputs: &[Value]) -> Result<()> {
        self.calls += 1;
        Ok(())
    }
    fn finish(
        &mut self,
        prep_parents: Vec<Arc<dyn Producer>>,
        new_parents: Vec<Arc<dyn Producer>>,
        _reader: Option<&mut dyn InputReader>,
    ) -> Result<PreparerOutput> {
        Ok(PreparerOutput {
            for_preparation_data: Arc::new(PreparedNode::new(
                prep_parents,
                Arc::new(MultiplyBy(self.calls as i64)),
                ConstantDeclaration::Never,
            )),
            for_new_data: Arc::new(PreparedNode::new(
                new_parents,
                Arc::new(MultiplyBy(self.calls as i64)),
                ConstantDeclaration::Never,
            )),
            artifact: Value::Int(self.calls as i64),
        })
    }
}

#[derive(Debug)]
struct CountingDistinctInputsPreparable;
impl PreparableFn for CountingDistinctInputsPreparable {
    fn stable_id(&self) -> String {
        "counting_distinct_inputs".to_string()
    }
    fn mode(&self) -> PreparerMode {
        PreparerMode::Stream
    }
    fn is_idempotent(&self) -> bool {
        true
    }
    fn new_preparer(&self) -> Box<dyn Preparer> {
        Box::new(CountingDistinctInputsPreparer { calls: 0 })
    }
}

#[test]
fn scenario_3_idempotent_preparer_multiplier_is_one_and_applies_correctly() {
    let seven: Arc<dyn Producer> = Arc::new(ConstantGenerator::new(Value::Int(7)));
    let trained: Arc<dyn Producer> = Arc::new(PreparableNode::new(
        vec![seven],
        Arc::new(CountingDistinctInputsPreparable),
    ));
    let placeholder: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("row_count_carrier"));
    let dag = Dag::new(vec![placeholder]).with_outputs(vec![trained]).unwrap();
    let executor = DagExecutor::new(ExecutorConfig::default());

    let training = ExampleBatch::new(vec![vec![Value::Int(0); 1000]]).unwrap();
    let result = executor
        .prepare(&dag, &training, &CancellationToken::new())
        .unwrap();

    let inference = ExampleBatch::new(vec![vec![Value::Int(2)]]).unwrap();
    let outputs = executor
        .apply(&result.prepared_dag, &inference, &CancellationToken::new())
        .unwrap();
    assert_eq!(outputs[0], vec![Value::Int(2)]);
}

struct StreamCountPreparer {
    seen: u64,
}
impl Preparer for StreamCountPreparer {
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
    ) -> Result<PreparerOutput> {
        Ok(PreparerOutput {
            for_preparation_data: Arc::new(PreparedNode::new(
                prep_parents,
                Arc::new(MultiplyBy(self.seen as i64)),
                ConstantDeclaration::Never,
            )),
            for_new_data: Arc::new(PreparedNode::new(
                new_parents,
                Arc::new(MultiplyBy(self.seen as i64)),
                ConstantDeclaration::Never,
            )),
            artifact: Value::Int(self.seen as i64),
        })
    }
}

struct BatchCountPreparer {
    seen: u64,
}
impl Preparer for BatchCountPreparer {
    fn mode(&self) -> PreparerMode {
        PreparerMode::Batch
    }
    fn process(&mut self, _inputs: &[Value]) -> Result<()> {
        Ok(())
    }
    fn finish(
        &mut self,
        prep_parents: Vec<Arc<dyn Producer>>,
        new_parents: Vec<Arc<dyn Producer>>,
        reader: Option<&mut dyn InputReader>,
    ) -> Result<PreparerOutput> {
        let reader = reader.ok_or_else(|| Error::other("batch preparer requires a reader"))?;
        let mut count = 0u64;
        while reader.next_row()?.is_some() {
            count += 1;
        }
        Ok(PreparerOutput {
            for_preparation_data: Arc::new(PreparedNode::new(
                prep_parents,
                Arc::new(MultiplyBy(count as i64)),
                ConstantDeclaration::Never,
            )),
            for_new_data: Arc::new(PreparedNode::new(
                new_parents,
                Arc::new(MultiplyBy(count as i64)),
                ConstantDeclaration::Never,
            )),
            artifact: Value::Int(count as i64),
        })
    }
}

#[derive(Debug)]
struct StreamCounterFn;
impl PreparableFn for StreamCounterFn {
    fn stable_id(&self) -> String {
        "stream_counter".to_string()
    }
    fn mode(&self) -> PreparerMode {
        PreparerMode::Stream
    }
    fn new_preparer(&self) -> Box<dyn Preparer> {
        Box::new(StreamCountPreparer { seen: 0 })
    }
}

#[derive(Debug)]
struct BatchCounterFn;
impl PreparableFn for BatchCounterFn {
    fn stable_id(&self) -> String {
        "batch_counter".to_string()
    }
    fn mode(&self) -> PreparerMode {
        PreparerMode::Batch
    }
    fn new_preparer(&self) -> Box<dyn Preparer> {
        Box::new(BatchCountPreparer { seen: 0 })
    }
}

#[test]
fn scenario_4_stream_and_batch_counters_train_to_the_same_multiplier() {
    let executor = DagExecutor::new(ExecutorConfig::default());
    let rows = vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)];

    let x: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("x"));
    let stream_trained: Arc<dyn Producer> =
        Arc::new(PreparableNode::new(vec![x.clone()], Arc::new(StreamCounterFn)));
    let stream_dag = Dag::new(vec![x]).with_outputs(vec![stream_trained]).unwrap();
    let stream_result = executor
        .prepare(&stream_dag, &ExampleBatch::new(vec![rows.clone()]).unwrap(), &CancellationToken::new())
        .unwrap();

    let y: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("y"));
    let batch_trained: Arc<dyn Producer> =
        Arc::new(PreparableNode::new(vec![y.clone()], Arc::new(BatchCounterFn)));
    let batch_dag = Dag::new(vec![y]).with_outputs(vec![batch_trained]).unwrap();
    let batch_result = executor
        .prepare(&batch_dag, &ExampleBatch::new(vec![rows]).unwrap(), &CancellationToken::new())
        .unwrap();

    let probe = ExampleBatch::new(vec![vec![Value::Int(10)]]).unwrap();
    let stream_output = executor
        .apply(&stream_result.prepared_dag, &probe, &CancellationToken::new())
        .unwrap();
    let batch_output = executor
        .apply(&batch_result.prepared_dag, &probe, &CancellationToken::new())
        .unwrap();
    assert_eq!(stream_output, batch_output);
    assert_eq!(stream_output[0], vec![Value::Int(40)]);
}

struct CancelAfterNPreparer {
    remaining: u64,
    cancellation: CancellationToken,
}
impl Preparer for CancelAfterNPreparer {
    fn mode(&self) -> PreparerMode {
        PreparerMode::Stream
    }
    fn process(&mut self, _inputs: &[Value]) -> Result<()> {
        if self.remaining == 0 {
            self.cancellation.cancel();
        } else {
            self.remaining -= 1;
        }
        Ok(())
    }
    fn finish(
        &mut self,
        prep_parents: Vec<Arc<dyn Producer>>,
        new_parents: Vec<Arc<dyn Producer>>,
        _reader: Option<&mut dyn InputReader>,
    ) -> Result<PreparerOutput> {
        Ok(PreparerOutput {
            for_preparation_data: Arc::new(PreparedNode::new(
                prep_parents,
                Arc::new(AddConst(0)),
                ConstantDeclaration::Never,
            )),
            for_new_data: Arc::new(PreparedNode::new(
                new_parents,
                Arc::new(AddConst(0)),
                ConstantDeclaration::Never,
            )),
            artifact: Value::Unit,
        })
    }
}

#[derive(Debug)]
struct CancelAfterNFn {
    threshold: u64,
    cancellation: CancellationToken,
}
impl PreparableFn for CancelAfterNFn {
    fn stable_id(&self) -> String {
        "cancel_after_n".to_string()
    }
    fn mode(&self) -> PreparerMode {
        PreparerMode::Stream
    }
    fn new_preparer(&self) -> Box<dyn Preparer> {
        Box::new(CancelAfterNPreparer {
            remaining: self.threshold,
            cancellation: self.cancellation.clone(),
        })
    }
}

#[test]
fn scenario_5_cancellation_mid_prepare_is_recoverable_on_retry() {
    let cancellation = CancellationToken::new();
    let x: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("x"));
    let trained: Arc<dyn Producer> = Arc::new(PreparableNode::new(
        vec![x.clone()],
        Arc::new(CancelAfterNFn {
            threshold: 10,
            cancellation: cancellation.clone(),
        }),
    ));
    let dag = Dag::new(vec![x]).with_outputs(vec![trained]).unwrap();
    let executor = DagExecutor::new(ExecutorConfig::default());
    let examples = ExampleBatch::new(vec![(0..1000).map(Value::Int).collect()]).unwrap();

    let cancelled_result = executor.prepare(&dag, &examples, &cancellation);
    assert!(matches!(cancelled_result, Err(Error::ExecutionCancelled { .. })));

    // A fresh token on the same DAG succeeds.
    let retry = executor
        .prepare(&dag, &examples, &CancellationToken::new())
        .unwrap();
    assert!(!retry.prepared_dag.is_preparable());
}

static DEDUP_CALL_COUNT: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
struct CountingIdentity;
impl PreparedFn for CountingIdentity {
    fn stable_id(&self) -> String {
        "counting_identity".to_string()
    }
    fn apply(&self, inputs: &[Value]) -> Result<Value> {
        DEDUP_CALL_COUNT.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.first().cloned().unwrap_or(Value::Unit))
    }
}

#[test]
fn scenario_6_structurally_equal_subgraphs_are_deduplicated_and_computed_once() {
    DEDUP_CALL_COUNT.store(0, Ordering::SeqCst);

    let constant: Arc<dyn Producer> = Arc::new(ConstantGenerator::new(Value::Int(1)));
    let left: Arc<dyn Producer> = Arc::new(PreparedNode::new(
        vec![constant.clone()],
        Arc::new(CountingIdentity),
        ConstantDeclaration::Never,
    ));
    let right: Arc<dyn Producer> = Arc::new(PreparedNode::new(
        vec![constant],
        Arc::new(CountingIdentity),
        ConstantDeclaration::Never,
    ));
    assert_ne!(left.handle(), right.handle());

    let row_count_carrier: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("carrier"));
    let dag = Dag::new(vec![row_count_carrier])
        .with_outputs(vec![left, right])
        .unwrap();
    let executor = DagExecutor::new(ExecutorConfig::default());
    let examples = ExampleBatch::new(vec![vec![Value::Int(0), Value::Int(0), Value::Int(0)]]).unwrap();

    let outputs = executor.apply(&dag, &examples, &CancellationToken::new()).unwrap();
    assert_eq!(outputs[0], vec![Value::Int(1), Value::Int(1), Value::Int(1)]);
    assert_eq!(outputs[1], vec![Value::Int(1), Value::Int(1), Value::Int(1)]);

    // Three examples, one surviving (deduplicated) node: three calls, not six.
    assert_eq!(DEDUP_CALL_COUNT.load(Ordering::SeqCst), 3);
}
