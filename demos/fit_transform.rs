//! Builds a small producer graph, trains its one preparable transformer,
//! and applies the resulting prepared DAG to fresh inputs.
//!
//! Run with: cargo run -p dagforge-io --example fit_transform

use dagforge_engine::preparer::{InputReader, Preparer, PreparerMode, PreparerOutput};
use dagforge_engine::producer::{
    ConstantDeclaration, ConstantGenerator, PlaceholderNode, PreparableFn, PreparableNode,
    PreparedFn, PreparedNode, Producer,
};
use dagforge_engine::{CancellationToken, Dag, DagExecutor, ExecutorConfig, Result, Value};
use dagforge_io::{DagIoExt, VecObjectStream};
use std::sync::Arc;

/// Scales its input by the maximum value it saw during training — a
/// min-max-style transformer trained once over the preparation examples.
#[derive(Debug)]
struct ScaleByMax(i64);
impl PreparedFn for ScaleByMax {
    fn stable_id(&self) -> String {
        format!("scale_by_max({})", self.0)
    }
    fn apply(&self, inputs: &[Value]) -> Result<Value> {
        let n = inputs.first().and_then(Value::as_int).unwrap_or(0);
        Ok(Value::Float(n as f64 / self.0.max(1) as f64))
    }
}

struct MaxTrainer {
    max_seen: i64,
}
impl Preparer for MaxTrainer {
    fn mode(&self) -> PreparerMode {
        PreparerMode::Stream
    }
    fn process(&mut self, inputs: &[Value]) -> Result<()> {
        let n = inputs.first().and_then(Value::as_int).unwrap_or(0);
        self.max_seen = self.max_seen.max(n);
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
                Arc::new(ScaleByMax(self.max_seen)),
                ConstantDeclaration::Never,
            )),
            for_new_data: Arc::new(PreparedNode::new(
                new_parents,
                Arc::new(ScaleByMax(self.max_seen)),
                ConstantDeclaration::Never,
            )),
            artifact: Value::Int(self.max_seen),
        })
    }
}

#[derive(Debug)]
struct MaxScaler;
impl PreparableFn for MaxScaler {
    fn stable_id(&self) -> String {
        "max_scaler".to_string()
    }
    fn mode(&self) -> PreparerMode {
        PreparerMode::Stream
    }
    fn new_preparer(&self) -> Box<dyn Preparer> {
        Box::new(MaxTrainer { max_seen: 0 })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let age: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("age"));
    let scaled: Arc<dyn Producer> = Arc::new(PreparableNode::new(vec![age.clone()], Arc::new(MaxScaler)));
    let bias: Arc<dyn Producer> = Arc::new(ConstantGenerator::new(Value::Int(1)));
    let dag = Dag::new(vec![age]).with_outputs(vec![scaled, bias])?;

    let executor = DagExecutor::new(ExecutorConfig::default());
    let cancellation = CancellationToken::new();

    let mut training = VecObjectStream::new(vec![
        vec![Value::Int(10)],
        vec![Value::Int(40)],
        vec![Value::Int(25)],
    ]);
    let (prepared, training_outputs) = dag.prepare_and_apply(&executor, &mut training, &cancellation)?;
    println!("scaled training outputs: {:?}", training_outputs.into_rows());

    let mut inference = VecObjectStream::new(vec![vec![Value::Int(20)], vec![Value::Int(40)]]);
    let inference_outputs = prepared.apply(&executor, &mut inference, &cancellation)?;
    println!("scaled inference outputs: {:?}", inference_outputs.into_rows());

    Ok(())
}
