//! In-memory and generated sources.

use super::{DEFAULT_KIND, DataSource, SourceRef, SourceSize, WorkItem, check_offset};
use crate::error::DataError;

/// Lines held in memory.
#[derive(Debug, Clone)]
pub struct ListSource {
    lines: Vec<String>,
    kind: String,
    cursor: usize,
}

impl ListSource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            kind: DEFAULT_KIND.to_string(),
            cursor: 0,
        }
    }

    /// Set the wordlist type label attached to produced items.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

impl DataSource for ListSource {
    fn next_item(&mut self) -> Result<Option<WorkItem>, DataError> {
        let Some(line) = self.lines.get(self.cursor) else {
            return Ok(None);
        };
        let item = WorkItem::new(line.clone(), self.kind.clone(), self.cursor as u64);
        self.cursor += 1;
        Ok(Some(item))
    }

    fn seek(&mut self, offset: u64) -> Result<(), DataError> {
        check_offset(offset, self.lines.len() as u64)?;
        self.cursor = offset as usize;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.cursor as u64
    }

    fn size(&self) -> SourceSize {
        SourceSize::Finite(self.lines.len() as u64)
    }

    fn reference(&self) -> SourceRef {
        SourceRef::List {
            len: self.lines.len() as u64,
        }
    }
}

/// Arithmetic sequence `start, start + step, ...` of `amount` numbers.
#[derive(Debug, Clone)]
pub struct RangeSource {
    start: i64,
    amount: u64,
    step: i64,
    pad_width: Option<usize>,
    kind: String,
    cursor: u64,
}

impl RangeSource {
    pub fn new(start: i64, amount: u64, step: i64) -> Self {
        Self {
            start,
            amount,
            step,
            pad_width: None,
            kind: DEFAULT_KIND.to_string(),
            cursor: 0,
        }
    }

    /// Left-pad every value with zeros to the width of the widest one.
    pub fn padded(mut self) -> Self {
        let last = self.value_at(self.amount.saturating_sub(1));
        let width = self
            .start
            .unsigned_abs()
            .to_string()
            .len()
            .max(last.unsigned_abs().to_string().len());
        self.pad_width = Some(width);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    fn value_at(&self, index: u64) -> i64 {
        self.start
            .saturating_add(self.step.saturating_mul(index as i64))
    }

    fn render(&self, value: i64) -> String {
        match self.pad_width {
            Some(width) if value < 0 => format!("-{:0width$}", value.unsigned_abs()),
            Some(width) => format!("{value:0width$}"),
            None => value.to_string(),
        }
    }
}

impl DataSource for RangeSource {
    fn next_item(&mut self) -> Result<Option<WorkItem>, DataError> {
        if self.cursor >= self.amount {
            return Ok(None);
        }
        let data = self.render(self.value_at(self.cursor));
        let item = WorkItem::new(data, self.kind.clone(), self.cursor);
        self.cursor += 1;
        Ok(Some(item))
    }

    fn seek(&mut self, offset: u64) -> Result<(), DataError> {
        check_offset(offset, self.amount)?;
        self.cursor = offset;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.cursor
    }

    fn size(&self) -> SourceSize {
        SourceSize::Finite(self.amount)
    }

    fn reference(&self) -> SourceRef {
        SourceRef::Range {
            start: self.start,
            amount: self.amount,
            step: self.step,
            pad: self.pad_width.is_some(),
        }
    }
}

/// Yields the same value forever. Every position is equivalent, so seeking
/// does nothing.
#[derive(Debug, Clone)]
pub struct InfiniteSource {
    value: String,
    kind: String,
    produced: u64,
}

impl InfiniteSource {
    pub fn new() -> Self {
        Self::with_value(String::new())
    }

    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: DEFAULT_KIND.to_string(),
            produced: 0,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

impl Default for InfiniteSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSource for InfiniteSource {
    fn next_item(&mut self) -> Result<Option<WorkItem>, DataError> {
        let item = WorkItem::new(self.value.clone(), self.kind.clone(), self.produced);
        self.produced = self.produced.saturating_add(1);
        Ok(Some(item))
    }

    fn seek(&mut self, _offset: u64) -> Result<(), DataError> {
        Ok(())
    }

    fn position(&self) -> u64 {
        self.produced
    }

    fn size(&self) -> SourceSize {
        SourceSize::Unbounded
    }

    fn reference(&self) -> SourceRef {
        SourceRef::Infinite
    }
}
