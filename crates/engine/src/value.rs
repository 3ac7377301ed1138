//! The dynamic value every producer emits one of per example.
//!
//! The engine is agnostic to the concrete transformer libraries that
//! eventually populate a pipeline (spec.md §1, "out of scope"); [`Value`] is
//! the minimal dynamically-typed carrier those transformers exchange so the
//! engine itself never needs generic type parameters threaded through the
//! graph, reducer, and executor.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A value flowing along one edge of the producer graph for one example.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
}

impl Value {
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unit, Self::Unit) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

// `Float` compares via `to_bits`, making this relation total (NaN-bit-equal
// to itself, -0.0 distinct from 0.0) and consistent with `Hash` below —
// required by spec.md §8: "a.equals(b) ⇒ a.hash() == b.hash()".
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Unit => {}
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Str(v) => v.hash(state),
            Self::Bytes(v) => v.hash(state),
            Self::List(v) | Self::Tuple(v) => v.hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn equal_values_hash_equal() {
        use std::collections::hash_map::DefaultHasher;

        let a = Value::Float(3.5);
        let b = Value::Float(3.5);
        assert_eq!(a, b);

        let mut ha = DefaultHasher::new();
        a.hash(&mut ha);
        let mut hb = DefaultHasher::new();
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn negative_and_positive_zero_are_distinct() {
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn different_variants_are_not_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn conversions_round_trip_through_accessors() {
        let v: Value = 42i64.into();
        assert_eq!(v.as_int(), Some(42));

        let v: Value = "hello".into();
        assert_eq!(v.as_str(), Some("hello"));
    }
}
