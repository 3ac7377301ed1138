//! The row-oriented iterator abstraction external callers feed into (and
//! read out of) a DAG (spec.md §6). The engine itself only ever consumes a
//! fully materialized [`dagforge_engine::ExampleBatch`]; [`ObjectStream`] is
//! the boundary type that lets a caller hand over examples incrementally
//! (from a file, a database cursor, a network source) without the engine
//! crate itself taking a dependency on any of those.

use dagforge_core::Result;
use dagforge_engine::{ExampleBatch, Value};

/// A stream of example rows, each row one value per placeholder (or, for an
/// output stream, one value per DAG output) in declaration order.
///
/// `size_if_known`/`slice` are opt-in: a stream backed by something that
/// genuinely can't look ahead (a network socket) may return `None`/an error
/// for both and still be driven purely through `next`.
pub trait ObjectStream: Send {
    /// Pull the next row, or `None` once exhausted. Calling `next` again
    /// after `None` must keep returning `None`.
    fn next(&mut self) -> Result<Option<Vec<Value>>>;

    /// Release any underlying resource (file handle, connection). A stream
    /// dropped without `close` must still not leak — `close` exists for
    /// callers that want to surface a flush/close error rather than have it
    /// silently swallowed by `Drop`.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// The total row count, if known without consuming the stream.
    fn size_if_known(&self) -> Option<usize> {
        None
    }

    /// Random-access a contiguous row range, for streams that support it.
    fn slice(&mut self, start: usize, end: usize) -> Result<Vec<Vec<Value>>> {
        let _ = (start, end);
        Err(dagforge_core::Error::other(
            "this object stream does not support random access",
        ))
    }
}

/// An in-memory [`ObjectStream`] over a fixed `Vec` of rows. The engine's
/// own executor never needs random access beyond this trait, so this is
/// the only implementation shipped here; readers over files, databases, or
/// network sources are expected to implement [`ObjectStream`] themselves.
pub struct VecObjectStream {
    rows: Vec<Vec<Value>>,
    cursor: usize,
}

impl VecObjectStream {
    #[must_use]
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self { rows, cursor: 0 }
    }

    #[must_use]
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }
}

impl ObjectStream for VecObjectStream {
    fn next(&mut self) -> Result<Option<Vec<Value>>> {
        let row = self.rows.get(self.cursor).cloned();
        if row.is_some() {
            self.cursor += 1;
        }
        Ok(row)
    }

    fn size_if_known(&self) -> Option<usize> {
        Some(self.rows.len())
    }

    fn slice(&mut self, start: usize, end: usize) -> Result<Vec<Vec<Value>>> {
        self.rows
            .get(start..end)
            .map(<[Vec<Value>]>::to_vec)
            .ok_or_else(|| dagforge_core::Error::other("slice range out of bounds"))
    }
}

/// Drain `stream` into a column-major [`ExampleBatch`], validating that
/// every row has exactly `placeholder_count` values.
pub fn stream_to_batch(stream: &mut dyn ObjectStream, placeholder_count: usize) -> Result<ExampleBatch> {
    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); placeholder_count];
    while let Some(row) = stream.next()? {
        if row.len() != placeholder_count {
            return Err(dagforge_core::Error::graph_validation(format!(
                "example row has {} values but the DAG declares {placeholder_count} placeholders",
                row.len()
            )));
        }
        for (column, value) in columns.iter_mut().zip(row) {
            column.push(value);
        }
    }
    ExampleBatch::new(columns)
}

/// Turn output columns (as returned by [`dagforge_engine::DagExecutor::apply`])
/// into a row-major [`VecObjectStream`], one row per example.
#[must_use]
pub fn columns_to_stream(columns: Vec<Vec<Value>>) -> VecObjectStream {
    let row_count = columns.first().map_or(0, Vec::len);
    let rows = (0..row_count)
        .map(|row| columns.iter().map(|column| column[row].clone()).collect())
        .collect();
    VecObjectStream::new(rows)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn vec_object_stream_yields_rows_then_none() {
        let mut stream = VecObjectStream::new(vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
        assert_eq!(stream.next().unwrap(), Some(vec![Value::Int(1)]));
        assert_eq!(stream.next().unwrap(), Some(vec![Value::Int(2)]));
        assert_eq!(stream.next().unwrap(), None);
        assert_eq!(stream.next().unwrap(), None);
    }

    #[test]
    fn size_if_known_reports_full_row_count_regardless_of_cursor() {
        let mut stream = VecObjectStream::new(vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
        assert_eq!(stream.size_if_known(), Some(2));
        let _ = stream.next().unwrap();
        assert_eq!(stream.size_if_known(), Some(2));
    }

    #[test]
    fn slice_returns_the_requested_range() {
        let mut stream = VecObjectStream::new(vec![
            vec![Value::Int(0)],
            vec![Value::Int(1)],
            vec![Value::Int(2)],
        ]);
        assert_eq!(
            stream.slice(1, 3).unwrap(),
            vec![vec![Value::Int(1)], vec![Value::Int(2)]]
        );
    }

    #[test]
    fn stream_to_batch_rejects_a_row_with_the_wrong_arity() {
        let mut stream = VecObjectStream::new(vec![vec![Value::Int(1), Value::Int(2)]]);
        let err = stream_to_batch(&mut stream, 1).unwrap_err();
        assert!(matches!(err, dagforge_core::Error::GraphValidation { .. }));
    }

    #[test]
    fn columns_to_stream_transposes_back_to_rows() {
        let columns = vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(10), Value::Int(20)]];
        let stream = columns_to_stream(columns);
        assert_eq!(
            stream.into_rows(),
            vec![
                vec![Value::Int(1), Value::Int(10)],
                vec![Value::Int(2), Value::Int(20)],
            ]
        );
    }
}
