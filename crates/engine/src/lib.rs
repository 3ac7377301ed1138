//! The producer-graph engine: data model, reducer, preparer, and two-phase
//! executor for typed DAGs of ML pipeline producers (spec.md §3–§5).
//!
//! Concrete transformer libraries (tokenizers, vector math, model bindings)
//! are deliberately not part of this crate — it specifies the producer
//! model, the graph, the reduction pass, and the executor that schedules
//! them. Transformer authors implement [`producer::PreparedFn`],
//! [`producer::PreparableFn`], or [`producer::ViewFn`] and hand their
//! producer to this crate's `Dag` and `DagExecutor`.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod config;
pub mod executor;
pub mod graph;
pub mod preparer;
pub mod producer;
pub mod reducer;
pub mod value;

pub use config::ExecutorConfig;
pub use dagforge_core::{Error, Handle, Result};
pub use executor::{CancellationToken, DagExecutor, ExampleBatch, PrepareResult};
pub use graph::Dag;
pub use value::Value;
