//! Restartable readers over a BATCH preparer's accumulated input tuples
//! (spec.md §4.4, §5: "spilling buffered preparer inputs to the configured
//! temporary storage").

use dagforge_core::{Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use tempfile::NamedTempFile;

use crate::value::Value;

/// A rewindable stream of example input tuples, handed to a BATCH
/// preparer's `finish` (spec.md §4.4).
pub trait InputReader: Send {
    fn restart(&mut self) -> Result<()>;
    fn next_row(&mut self) -> Result<Option<Vec<Value>>>;
}

/// A reader over rows kept entirely in memory.
pub struct InMemoryInputReader {
    rows: Vec<Vec<Value>>,
    cursor: usize,
}

impl InMemoryInputReader {
    #[must_use]
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self { rows, cursor: 0 }
    }
}

impl InputReader for InMemoryInputReader {
    fn restart(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        let row = self.rows.get(self.cursor).cloned();
        if row.is_some() {
            self.cursor += 1;
        }
        Ok(row)
    }
}

/// A reader over rows that spilled to a temporary file on disk once the
/// buffer exceeded `spillThresholdBytes` (spec.md §5). Rows are framed with
/// `bincode`'s length-prefixed encoding; the backing [`NamedTempFile`] is
/// held for the reader's lifetime and deleted on drop.
pub struct SpillingInputReader {
    file: BufReader<File>,
    _temp: NamedTempFile,
}

impl SpillingInputReader {
    fn from_temp(temp: NamedTempFile) -> Result<Self> {
        let file = temp.reopen()?;
        Ok(Self {
            file: BufReader::new(file),
            _temp: temp,
        })
    }
}

impl InputReader for SpillingInputReader {
    fn restart(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        match bincode::deserialize_from::<_, Vec<Value>>(&mut self.file) {
            Ok(row) => Ok(Some(row)),
            Err(err) => match err.as_ref() {
                bincode::ErrorKind::Io(io_err)
                    if io_err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    Ok(None)
                }
                _ => Err(Error::from(err)),
            },
        }
    }
}

enum BufferState {
    Memory(Vec<Vec<Value>>),
    Spilled {
        writer: BufWriter<File>,
        temp: NamedTempFile,
    },
}

/// Accumulates a BATCH preparer's input tuples during the prepare phase,
/// spilling to temporary storage once `spill_threshold_bytes` is exceeded
/// (spec.md §5, `spillThresholdBytes`), then yields a restartable
/// [`InputReader`] over everything pushed.
pub struct InputBuffer {
    state: BufferState,
    bytes: u64,
    spill_threshold_bytes: u64,
}

impl InputBuffer {
    #[must_use]
    pub fn new(spill_threshold_bytes: u64) -> Self {
        Self {
            state: BufferState::Memory(Vec::new()),
            bytes: 0,
            spill_threshold_bytes,
        }
    }

    pub fn push(&mut self, row: Vec<Value>) -> Result<()> {
        let row_bytes = bincode::serialized_size(&row)?;
        match &mut self.state {
            BufferState::Memory(rows) => {
                rows.push(row);
                self.bytes += row_bytes;
                if self.bytes > self.spill_threshold_bytes {
                    self.spill()?;
                }
            }
            BufferState::Spilled { writer, .. } => {
                bincode::serialize_into(&mut *writer, &row)?;
                self.bytes += row_bytes;
            }
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        let rows = match &mut self.state {
            BufferState::Memory(rows) => std::mem::take(rows),
            BufferState::Spilled { .. } => return Ok(()),
        };
        let temp = NamedTempFile::new()?;
        let mut writer = BufWriter::new(temp.reopen()?);
        for row in &rows {
            bincode::serialize_into(&mut writer, row)?;
        }
        self.state = BufferState::Spilled { writer, temp };
        Ok(())
    }

    /// Consume the buffer and produce a reader positioned at the first row.
    pub fn into_reader(self) -> Result<Box<dyn InputReader>> {
        match self.state {
            BufferState::Memory(rows) => Ok(Box::new(InMemoryInputReader::new(rows))),
            BufferState::Spilled { mut writer, temp } => {
                writer.flush()?;
                drop(writer);
                Ok(Box::new(SpillingInputReader::from_temp(temp)?))
            }
        }
    }
}
