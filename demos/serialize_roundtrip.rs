//! Serializes a prepared DAG to bytes, deserializes it back via a small
//! `FnRegistry`, and confirms it evaluates the same.
//!
//! Run with: cargo run -p dagforge-io --example serialize_roundtrip

use dagforge_engine::producer::{
    ConstantDeclaration, PlaceholderNode, PreparableFn, PreparedFn, PreparedNode, Producer, ViewFn,
};
use dagforge_engine::{CancellationToken, Dag, DagExecutor, ExampleBatch, ExecutorConfig, Result, Value};
use dagforge_io::{deserialize_prepared_dag, serialize_dag, FnRegistry};
use std::sync::Arc;

#[derive(Debug)]
struct AddOne;
impl PreparedFn for AddOne {
    fn stable_id(&self) -> String {
        "add_one".to_string()
    }
    fn apply(&self, inputs: &[Value]) -> Result<Value> {
        let n = inputs.first().and_then(Value::as_int).unwrap_or(0);
        Ok(Value::Int(n + 1))
    }
}

/// Knows how to reconstruct every transformer this pipeline vocabulary uses.
/// A real caller builds one of these per vocabulary, not per call.
struct PipelineRegistry;
impl FnRegistry for PipelineRegistry {
    fn prepared_fn(&self, stable_id: &str) -> Option<Arc<dyn PreparedFn>> {
        match stable_id {
            "add_one" => Some(Arc::new(AddOne)),
            _ => None,
        }
    }
    fn preparable_fn(&self, _stable_id: &str) -> Option<Arc<dyn PreparableFn>> {
        None
    }
    fn view_fn(&self, _stable_id: &str) -> Option<Arc<dyn ViewFn>> {
        None
    }
}

fn main() -> Result<()> {
    let x: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("x"));
    let plus_one: Arc<dyn Producer> = Arc::new(PreparedNode::new(
        vec![x.clone()],
        Arc::new(AddOne),
        ConstantDeclaration::Never,
    ));
    let dag = Dag::new(vec![x]).with_outputs(vec![plus_one])?;

    let bytes = serialize_dag(&dag)?;
    println!("serialized prepared DAG to {} bytes", bytes.len());

    let restored = deserialize_prepared_dag(&bytes, &PipelineRegistry)?;

    let executor = DagExecutor::new(ExecutorConfig::default());
    let examples = ExampleBatch::new(vec![vec![Value::Int(1), Value::Int(2), Value::Int(3)]])?;
    let outputs = executor.apply(restored.dag(), &examples, &CancellationToken::new())?;
    println!("restored DAG outputs: {outputs:?}");

    Ok(())
}
