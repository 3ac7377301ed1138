//! External interface for dagforge (spec.md §6): the `ObjectStream`
//! boundary callers stream examples through, the typed `prepare`/`apply`
//! entry points layered over [`dagforge_engine::Dag`], and binary
//! serialization of preparable/prepared DAGs.
//!
//! This crate is the only one in the workspace that callers outside the
//! engine's own test suite are expected to depend on directly —
//! `dagforge-engine` specifies the producer model and executor in terms of
//! its own in-memory `ExampleBatch`; this crate bridges that to a
//! streaming, serializable surface.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

mod pipeline;
mod stream;
mod wire;

pub use pipeline::{DagIoExt, PreparedDag};
pub use stream::{columns_to_stream, stream_to_batch, ObjectStream, VecObjectStream};
pub use wire::{
    deserialize_dag, deserialize_prepared_dag, serialize_dag, serialize_prepared_dag, FnRegistry,
};
