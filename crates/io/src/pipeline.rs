//! The typed external entry points (spec.md §6): `Dag::prepare`,
//! `Dag::prepare_and_apply`, and `PreparedDag::apply`/`apply_all`, all
//! expressed over [`ObjectStream`] rather than the engine's in-memory
//! `ExampleBatch` directly, so the object-stream boundary is the only place
//! callers need to bridge their own example sources.

use crate::stream::{columns_to_stream, stream_to_batch, ObjectStream, VecObjectStream};
use dagforge_core::Result;
use dagforge_engine::{CancellationToken, Dag, DagExecutor};

/// A DAG already known to contain no preparable producers, fit for direct
/// inference via [`PreparedDag::apply`]. The only way to obtain one is
/// [`DagIoExt::prepare`]/[`DagIoExt::prepare_and_apply`] or
/// [`crate::wire::deserialize_prepared_dag`] — both of which only ever
/// hand back a `Dag` that has already passed `Dag::is_preparable() == false`.
pub struct PreparedDag {
    dag: Dag,
}

impl PreparedDag {
    #[must_use]
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    #[must_use]
    pub fn into_dag(self) -> Dag {
        self.dag
    }

    /// Wrap an already-prepared `Dag`. Exposed for callers that obtained
    /// one some other way (e.g. a test fixture); production code should
    /// prefer `DagIoExt::prepare`.
    #[must_use]
    pub fn from_dag(dag: Dag) -> Self {
        Self { dag }
    }

    /// Run inference over one example stream, returning one output stream
    /// (spec.md §6, `PreparedDag::apply`).
    pub fn apply(
        &self,
        executor: &DagExecutor,
        examples: &mut dyn ObjectStream,
        cancellation: &CancellationToken,
    ) -> Result<VecObjectStream> {
        let batch = stream_to_batch(examples, self.dag.placeholders().len())?;
        let outputs = executor.apply(&self.dag, &batch, cancellation)?;
        Ok(columns_to_stream(outputs))
    }

    /// Run inference over several independent example streams against the
    /// same prepared DAG (spec.md §6, `PreparedDag::apply_all`) — a plain
    /// sequential convenience wrapper over `apply`; parallelism across
    /// minibatches already happens inside each `apply` call.
    pub fn apply_all(
        &self,
        executor: &DagExecutor,
        example_streams: &mut [&mut dyn ObjectStream],
        cancellation: &CancellationToken,
    ) -> Result<Vec<VecObjectStream>> {
        example_streams
            .iter_mut()
            .map(|examples| self.apply(executor, *examples, cancellation))
            .collect()
    }
}

/// Extension methods layered over [`Dag`] for the training-time entry
/// points (spec.md §6, `Dag::prepare`, `Dag::prepare_and_apply`). Kept as an
/// extension trait rather than inherent methods on `Dag` because the
/// object-stream bridge belongs to this crate, not `dagforge-engine`.
pub trait DagIoExt {
    /// Train every preparable producer over `examples`, returning the
    /// resulting `PreparedDag`. Does not evaluate the prepared DAG.
    fn prepare(
        &self,
        executor: &DagExecutor,
        examples: &mut dyn ObjectStream,
        cancellation: &CancellationToken,
    ) -> Result<PreparedDag>;

    /// Train, then immediately evaluate the prepared DAG over the same
    /// examples it was trained on — the common "fit-transform" entry point
    /// (spec.md §6, `Dag::prepare_and_apply`).
    fn prepare_and_apply(
        &self,
        executor: &DagExecutor,
        examples: &mut dyn ObjectStream,
        cancellation: &CancellationToken,
    ) -> Result<(PreparedDag, VecObjectStream)>;
}

impl DagIoExt for Dag {
    fn prepare(
        &self,
        executor: &DagExecutor,
        examples: &mut dyn ObjectStream,
        cancellation: &CancellationToken,
    ) -> Result<PreparedDag> {
        let batch = stream_to_batch(examples, self.placeholders().len())?;
        let result = executor.prepare(self, &batch, cancellation)?;
        Ok(PreparedDag {
            dag: result.prepared_dag,
        })
    }

    fn prepare_and_apply(
        &self,
        executor: &DagExecutor,
        examples: &mut dyn ObjectStream,
        cancellation: &CancellationToken,
    ) -> Result<(PreparedDag, VecObjectStream)> {
        let batch = stream_to_batch(examples, self.placeholders().len())?;
        let result = executor.prepare(self, &batch, cancellation)?;
        Ok((
            PreparedDag {
                dag: result.prepared_dag,
            },
            columns_to_stream(result.outputs),
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use dagforge_engine::producer::{PlaceholderNode, Producer};
    use dagforge_engine::Value;
    use std::sync::Arc;

    #[test]
    fn prepare_and_apply_passes_placeholder_values_through() {
        let x: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("x"));
        let dag = Dag::new(vec![x.clone()]).with_outputs(vec![x]).unwrap();
        let executor = DagExecutor::new(Default::default());
        let mut examples = VecObjectStream::new(vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
        let cancellation = CancellationToken::new();

        let (prepared, outputs) = dag
            .prepare_and_apply(&executor, &mut examples, &cancellation)
            .unwrap();

        assert!(!prepared.dag().is_preparable());
        assert_eq!(
            outputs.into_rows(),
            vec![vec![Value::Int(1)], vec![Value::Int(2)]]
        );
    }

    #[test]
    fn apply_all_runs_every_stream_against_the_same_prepared_dag() {
        let x: Arc<dyn Producer> = Arc::new(PlaceholderNode::new("x"));
        let dag = Dag::new(vec![x.clone()]).with_outputs(vec![x]).unwrap();
        let executor = DagExecutor::new(Default::default());
        let mut training = VecObjectStream::new(vec![vec![Value::Int(1)]]);
        let cancellation = CancellationToken::new();
        let prepared = dag.prepare(&executor, &mut training, &cancellation).unwrap();

        let mut a = VecObjectStream::new(vec![vec![Value::Int(7)]]);
        let mut b = VecObjectStream::new(vec![vec![Value::Int(9)], vec![Value::Int(10)]]);
        let results = prepared
            .apply_all(&executor, &mut [&mut a, &mut b], &cancellation)
            .unwrap();

        assert_eq!(results[0].rows(), &[vec![Value::Int(7)]]);
        assert_eq!(
            results[1].rows(),
            &[vec![Value::Int(9)], vec![Value::Int(10)]]
        );
    }
}
