//! The engine's error taxonomy (spec.md §7).
//!
//! Every fallible operation in the workspace returns [`crate::Result`]. No
//! crate in this workspace panics or unwraps outside test code; errors are
//! explicit, typed, and propagated with `?`.

use thiserror::Error;

/// The top-level error type for dagforge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Structural defect in a graph: missing-input parent, cycle, duplicate
    /// placeholder, or an output unreachable from the declared placeholders.
    /// Raised during DAG construction or before execution; never retried.
    #[error("graph validation failed: {reason}")]
    GraphValidation { reason: String },

    /// The reducer fixed point did not converge within the configured
    /// iteration budget. Non-fatal: the caller is expected to log this and
    /// proceed with the best graph reached so far.
    #[error("reducer did not converge after {iterations} iterations")]
    ReducerBudgetExceeded { iterations: u64 },

    /// A preparer violated its contract: it changed STREAM/BATCH mode
    /// mid-life, called `finish` before consuming all inputs, or produced a
    /// null/invalid successor. Fatal.
    #[error("preparer contract violated for producer '{producer}': {reason}")]
    PreparerContractViolation { producer: String, reason: String },

    /// A producer raised while applying. Wraps the underlying cause with the
    /// producer's short name and the minibatch index being processed.
    #[error("producer '{producer}' failed at minibatch {minibatch_index}: {source}")]
    ExecutionFailure {
        producer: String,
        minibatch_index: usize,
        #[source]
        source: Box<Error>,
    },

    /// Cooperative cancellation observed at a minibatch boundary. Recoverable
    /// by the caller: a subsequent `prepare`/`apply` call on the same DAG is
    /// expected to succeed.
    #[error("execution cancelled at minibatch {minibatch_index}")]
    ExecutionCancelled { minibatch_index: usize },

    /// Deserialization encountered an unknown handle class or an
    /// incompatible class version. Fatal.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// An `ExecutorConfig` option was out of its documented range.
    #[error("invalid configuration for '{option}': {reason}")]
    InvalidConfig { option: String, reason: String },

    /// A producer-supplied message that doesn't fit a more specific variant
    /// (e.g. a transformer's own `apply` failure). Carries a free-form
    /// description rather than a boxed `dyn Error` so `Error` stays `Sync`
    /// and serializable-by-message.
    #[error("{0}")]
    Other(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A `bincode` encode/decode failure at the serialization boundary
    /// (`dagforge-io`). Kept distinct from `Serialization` so a malformed
    /// byte stream (this variant) is never confused with a structurally
    /// valid stream naming an unknown handle class (`Serialization`).
    #[error("binary (de)serialization error: {0}")]
    Bincode(#[from] bincode::Error),
}

impl Error {
    #[must_use]
    pub fn graph_validation(reason: impl Into<String>) -> Self {
        Self::GraphValidation {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn reducer_budget_exceeded(iterations: u64) -> Self {
        Self::ReducerBudgetExceeded { iterations }
    }

    #[must_use]
    pub fn preparer_contract_violation(
        producer: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::PreparerContractViolation {
            producer: producer.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn execution_failure(
        producer: impl Into<String>,
        minibatch_index: usize,
        source: Error,
    ) -> Self {
        Self::ExecutionFailure {
            producer: producer.into(),
            minibatch_index,
            source: Box::new(source),
        }
    }

    #[must_use]
    pub const fn execution_cancelled(minibatch_index: usize) -> Self {
        Self::ExecutionCancelled { minibatch_index }
    }

    #[must_use]
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_config(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            option: option.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn other(reason: impl Into<String>) -> Self {
        Self::Other(reason.into())
    }

    /// True for the one error kind the executor treats as recoverable
    /// (spec.md §7: "`ExecutionCancelled`: ... Recoverable by the caller").
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::ExecutionCancelled { .. })
    }
}
