//! Per-file bookkeeping shared by the reader and the writer
//!
//! The reader counts a batch as pending before it enqueues it and seals the
//! ledger at end of file before enqueuing the final batch. The writer counts
//! a batch off after committing it. Once sealed the pending count can only
//! fall, so the batch that takes it from one to zero is the file's last, and
//! the writer registers the file in that batch's transaction.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

use crate::schema::TableSchema;
use crate::source::SourceFile;

/// How a file ended up after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    /// Every row committed and the file registered
    Committed,
    /// Reader failed part way; committed rows remain but the file is not registered
    Abandoned,
    /// The run stopped before the file finished
    Incomplete,
}

impl std::fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOutcome::Committed => write!(f, "committed"),
            FileOutcome::Abandoned => write!(f, "abandoned"),
            FileOutcome::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// Final tallies for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file: String,
    pub outcome: FileOutcome,
    pub lines_seen: u64,
    pub lines_malformed: u64,
    pub rows_committed: u64,
    pub bytes_read: u64,
}

/// Shared state for one file in flight
#[derive(Debug)]
pub struct FileLedger {
    source: SourceFile,
    schema: &'static TableSchema,
    pending: AtomicU64,
    sealed: AtomicBool,
    abandoned: AtomicBool,
    registered: AtomicBool,
    lines_seen: AtomicU64,
    lines_malformed: AtomicU64,
    rows_committed: AtomicU64,
    bytes_read: AtomicU64,
}

impl FileLedger {
    pub fn new(source: SourceFile, schema: &'static TableSchema) -> Self {
        Self {
            source,
            schema,
            pending: AtomicU64::new(0),
            sealed: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            lines_seen: AtomicU64::new(0),
            lines_malformed: AtomicU64::new(0),
            rows_committed: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
        }
    }

    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    pub fn schema(&self) -> &'static TableSchema {
        self.schema
    }

    /// Registry key of the file
    pub fn key(&self) -> &str {
        &self.source.key
    }

    /// File name for log lines
    pub fn display_name(&self) -> String {
        self.source
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.key.clone())
    }

    // Reader side

    /// Count a batch as pending; call before enqueuing it
    pub fn batch_enqueued(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark end of file; call after counting the final batch, before sending it
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    pub fn add_lines(&self, n: u64) {
        self.lines_seen.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_bytes_read(&self, bytes: u64) {
        self.bytes_read.store(bytes, Ordering::Relaxed);
    }

    // Decoder side

    pub fn add_malformed(&self, n: u64) {
        self.lines_malformed.fetch_add(n, Ordering::Relaxed);
    }

    // Writer side

    /// Whether committing the next pending batch finishes the file.
    ///
    /// Only the writer decrements `pending`, and nothing is added after the
    /// seal, so the answer cannot change before the writer acts on it.
    pub fn completes_with_next_commit(&self) -> bool {
        self.sealed.load(Ordering::SeqCst) && self.pending.load(Ordering::SeqCst) == 1
    }

    /// Count a committed batch off
    pub fn batch_committed(&self, rows: u64, registered: bool) {
        self.rows_committed.fetch_add(rows, Ordering::Relaxed);
        if registered {
            self.registered.store(true, Ordering::SeqCst);
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    // Readouts

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn lines_seen(&self) -> u64 {
        self.lines_seen.load(Ordering::Relaxed)
    }

    pub fn lines_malformed(&self) -> u64 {
        self.lines_malformed.load(Ordering::Relaxed)
    }

    pub fn rows_committed(&self) -> u64 {
        self.rows_committed.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn outcome(&self) -> FileOutcome {
        if self.is_registered() {
            FileOutcome::Committed
        } else if self.is_abandoned() {
            FileOutcome::Abandoned
        } else {
            FileOutcome::Incomplete
        }
    }

    pub fn report(&self) -> FileReport {
        FileReport {
            file: self.source.key.clone(),
            outcome: self.outcome(),
            lines_seen: self.lines_seen(),
            lines_malformed: self.lines_malformed(),
            rows_committed: self.rows_committed(),
            bytes_read: self.bytes_read(),
        }
    }
}
