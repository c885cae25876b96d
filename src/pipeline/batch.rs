//! Units of work passed between stages

use std::sync::Arc;

use super::ledger::FileLedger;
use crate::schema::Row;

/// Queue payload
#[derive(Debug)]
pub enum Message<T> {
    Batch(T),
    /// No more batches will come from the sender
    EndOfStream,
}

/// One undecoded input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// 1-based line number in the decompressed file
    pub number: u64,
    pub bytes: Vec<u8>,
}

/// Lines read from one file, in file order
#[derive(Debug)]
pub struct RawBatch {
    pub file: Arc<FileLedger>,
    /// Position of this batch within its file, from 0
    pub seq: u64,
    pub lines: Vec<RawLine>,
}

/// Rows decoded from exactly one [`RawBatch`]
#[derive(Debug)]
pub struct DecodedBatch {
    pub file: Arc<FileLedger>,
    pub seq: u64,
    pub rows: Vec<Row>,
}

impl RawBatch {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl DecodedBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
