//! Work sources: the sequence of items a job checks.
//!
//! Every source is positioned by an integer offset. Finite sources seek
//! directly to an offset (no replay of skipped items); the unbounded source
//! yields the same value at every position, so seeking is a no-op.

mod file;
mod sources;

pub use file::FileSource;
pub use sources::{InfiniteSource, ListSource, RangeSource};

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Label given to items when the caller doesn't pick one.
pub const DEFAULT_KIND: &str = "Default";

/// One unit of work drawn from a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// The raw line handed to the check routine.
    pub data: String,
    /// Wordlist type label.
    pub kind: String,
    /// Zero-based position in the source.
    pub index: u64,
}

impl WorkItem {
    pub fn new(data: impl Into<String>, kind: impl Into<String>, index: u64) -> Self {
        Self {
            data: data.into(),
            kind: kind.into(),
            index,
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data)
    }
}

/// Number of items a source will produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSize {
    Finite(u64),
    Unbounded,
}

impl SourceSize {
    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

/// Serializable description of where a job's items come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRef {
    List { len: u64 },
    File { path: PathBuf },
    Range {
        start: i64,
        amount: u64,
        step: i64,
        pad: bool,
    },
    Infinite,
}

/// A seekable producer of work items.
///
/// The dispatcher is the only caller, so implementations need no interior
/// synchronization.
pub trait DataSource: Send {
    /// Produce the item at the current position and advance.
    /// `Ok(None)` means the source is exhausted.
    fn next_item(&mut self) -> Result<Option<WorkItem>, DataError>;

    /// Position the source so the next item produced is `offset`.
    fn seek(&mut self, offset: u64) -> Result<(), DataError>;

    /// Current position (the offset of the next item).
    fn position(&self) -> u64;

    fn size(&self) -> SourceSize;

    /// Description stored alongside checkpoints.
    fn reference(&self) -> SourceRef;
}

pub(crate) fn check_offset(offset: u64, size: u64) -> Result<(), DataError> {
    if offset > size {
        return Err(DataError::OffsetOutOfRange { offset, size });
    }
    Ok(())
}
