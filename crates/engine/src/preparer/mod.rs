//! The preparer state machine a preparable transformer owns during training
//! (spec.md §4.4), plus the restartable input readers BATCH preparers use.

mod reader;

pub use reader::{InMemoryInputReader, InputBuffer, InputReader, SpillingInputReader};

use crate::producer::Producer;
use crate::value::Value;
use dagforge_core::Result;
use std::sync::Arc;

/// A preparer's fixed training mode (spec.md §4.4). Chosen once, at
/// construction, by the owning [`crate::producer::PreparableFn`] — not per
/// call — which is what makes "mode must not change across a preparer's
/// lifetime" structurally true rather than merely documented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparerMode {
    /// Sees each example exactly once via `process`; `finish` takes no
    /// further input.
    Stream,
    /// In addition to streamed `process` calls, `finish` is given a
    /// restartable reader over every example's input tuple.
    Batch,
}

/// What a preparer hands back from `finish` (spec.md §4.4): two prepared
/// successors that replace the preparable everywhere it appeared, plus the
/// training-time artifact any [`crate::producer::ViewNode`] over this
/// preparable will extract its constant value from.
pub struct PreparerOutput {
    /// Spliced into the graph still being prepared, so downstream
    /// preparables observe outputs computed over the same examples they
    /// themselves are about to train on.
    pub for_preparation_data: Arc<dyn Producer>,
    /// Spliced into the mirror graph that becomes the final prepared DAG
    /// returned to the caller.
    pub for_new_data: Arc<dyn Producer>,
    /// The value a view over this preparable resolves against (spec.md
    /// §4.6). Transformers with no natural "summary" artifact may reuse
    /// `for_new_data`'s own declared constant, if any, or `Value::Unit`.
    pub artifact: Value,
}

/// The state machine a preparable transformer's training run drives
/// (spec.md §4.4). Not assumed thread-safe: the executor serializes
/// `process` calls for a single preparer instance.
pub trait Preparer: Send {
    fn mode(&self) -> PreparerMode;

    /// See [`crate::producer::PreparableFn::is_idempotent`].
    fn is_idempotent(&self) -> bool {
        false
    }

    /// Consume one example's parent values, in parent order. Called exactly
    /// once per example, in input order, for every example (spec.md §4.4,
    /// "Preparable producers see every example exactly once before `finish`
    /// is called").
    fn process(&mut self, inputs: &[Value]) -> Result<()>;

    /// Finish training and emit the two prepared successors.
    ///
    /// `reader` is `Some` iff [`Self::mode`] is [`PreparerMode::Batch`]; the
    /// executor enforces this pairing and a `Batch` preparer that receives
    /// `None` (or vice versa) is a contract violation it reports as
    /// [`dagforge_core::Error::PreparerContractViolation`].
    fn finish(
        &mut self,
        prep_parents: Vec<Arc<dyn Producer>>,
        new_parents: Vec<Arc<dyn Producer>>,
        reader: Option<&mut dyn InputReader>,
    ) -> Result<PreparerOutput>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::producer::{ConstantGenerator, PreparedFn, PreparedNode};

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

    struct CountingPreparer {
        count: u64,
    }

    impl Preparer for CountingPreparer {
        fn mode(&self) -> PreparerMode {
            PreparerMode::Stream
        }

        fn process(&mut self, _inputs: &[Value]) -> Result<()> {
            self.count += 1;
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
                    Arc::new(Identity),
                    crate::producer::ConstantDeclaration::Never,
                )),
                for_new_data: Arc::new(PreparedNode::new(
                    new_parents,
                    Arc::new(Identity),
                    crate::producer::ConstantDeclaration::Never,
                )),
                artifact: Value::Int(self.count as i64),
            })
        }
    }

    #[test]
    fn preparer_counts_examples_then_emits_artifact() {
        let mut preparer = CountingPreparer { count: 0 };
        for _ in 0..5 {
            preparer.process(&[Value::Int(1)]).unwrap();
        }
        let parent: Arc<dyn Producer> = Arc::new(ConstantGenerator::new(Value::Int(1)));
        let output = preparer
            .finish(vec![parent.clone()], vec![parent], None)
            .unwrap();
        assert_eq!(output.artifact, Value::Int(5));
    }
}
