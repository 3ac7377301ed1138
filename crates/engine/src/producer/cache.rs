//! The lazily-initialized, never-reset caches every producer carries
//! (spec.md §3).

use std::sync::OnceLock;

/// Hash code and constant-result flag, computed once and reused for the
/// life of a producer instance. A fresh [`ProducerCache`] is created every
/// time a producer is cloned (spec.md §3: "the clone gets a fresh handle
/// and invalidated caches").
#[derive(Debug, Default)]
pub struct ProducerCache {
    pub(crate) hash: OnceLock<u64>,
    pub(crate) constant_result: OnceLock<bool>,
}

impl ProducerCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
