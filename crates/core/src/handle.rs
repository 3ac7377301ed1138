//! 128-bit, type-tagged producer identity.
//!
//! Every producer instance carries exactly one [`Handle`]; cloning a
//! producer always mints a fresh one. Two handles are equal iff both their
//! bits and their class tag match (spec.md §3, "Handle").

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide monotonic counter mixed into every freshly minted handle.
///
/// Handle uniqueness is an identity concern, not a reproducibility one:
/// producer *values* are made reproducible via `ExecutorConfig::random_seed`
/// (dagforge-engine), not via this counter. A `u64` counter plus a
/// once-per-process random salt is enough entropy that two processes never
/// collide in practice, and a single process never wraps around.
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn process_salt() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    // `RandomState::new()` seeds from the OS on first use and is cached by
    // the standard library; reused here purely as a source of per-process
    // entropy, not as a hasher.
    static SALT: std::sync::OnceLock<u64> = std::sync::OnceLock::new();
    *SALT.get_or_init(|| RandomState::new().build_hasher().finish())
}

/// A 128-bit identity tagged with the producer's concrete class.
///
/// The bits are split into a high and low 64-bit half purely for hashing
/// convenience (spec.md §4.1: "hash is a mix of the two 64-bit halves of the
/// handle"); the 128-bit value itself is the identity.
#[derive(Clone, Copy)]
pub struct Handle {
    bits: u128,
    class: &'static str,
}

impl Handle {
    /// Mint a fresh, process-unique handle tagged with `class`.
    ///
    /// `class` should be a short, stable discriminant for the producer's
    /// concrete type (e.g. `"placeholder"`, `"generator::constant"`). Rust
    /// has no const-evaluable cross-crate `TypeId` for arbitrary
    /// user-defined producers, so the class tag is supplied by the caller,
    /// the same short-discriminant-string idiom used for dependency-kind
    /// tags elsewhere in orchestration graph code.
    #[must_use]
    pub fn fresh(class: &'static str) -> Self {
        let counter = HANDLE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let bits = (u128::from(process_salt()) << 64) | u128::from(counter);
        Self { bits, class }
    }

    /// Construct a handle from explicit bits and class tag.
    ///
    /// Used by deserialization to reconstruct handles exactly as they were
    /// serialized (spec.md §6: a deserialized DAG "must compare equal by
    /// handle to the original").
    #[must_use]
    pub const fn from_parts(bits: u128, class: &'static str) -> Self {
        Self { bits, class }
    }

    #[must_use]
    pub const fn bits(&self) -> u128 {
        self.bits
    }

    #[must_use]
    pub const fn class(&self) -> &'static str {
        self.class
    }

    #[must_use]
    pub const fn high(&self) -> u64 {
        (self.bits >> 64) as u64
    }

    #[must_use]
    pub const fn low(&self) -> u64 {
        self.bits as u64
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits && self.class == other.class
    }
}

impl Eq for Handle {}

impl std::hash::Hash for Handle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Mix the two halves rather than hashing the u128 directly so the
        // hash is stable across 32- and 64-bit `usize` targets.
        state.write_u64(self.high() ^ self.class_hash());
        state.write_u64(self.low());
    }
}

impl Handle {
    fn class_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = rustc_hash::FxHasher::default();
        self.class.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}#{:032x})", self.class, self.bits)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:032x}", self.class, self.bits)
    }
}

/// The process-wide missing-input sentinel handle (spec.md §3).
///
/// Fixed and constant so every process agrees on its identity; the one
/// producer carrying this handle is the only producer that fails graph
/// validation.
pub const MISSING_INPUT_HANDLE: Handle = Handle::from_parts(0, "missing-input");
