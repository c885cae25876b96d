//! Reader stage: decompress files into raw line batches

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::Sender;
use tracing::{debug, error, info};

use super::batch::{Message, RawBatch, RawLine};
use super::ledger::FileLedger;
use crate::error::ReadError;
use crate::progress::{FileProgress, ProgressTracker};

/// Files shared by all readers, handed out in plan order
pub struct WorkPool<'a> {
    files: &'a [Arc<FileLedger>],
    next: AtomicUsize,
}

impl<'a> WorkPool<'a> {
    pub fn new(files: &'a [Arc<FileLedger>]) -> Self {
        Self {
            files,
            next: AtomicUsize::new(0),
        }
    }

    /// Claim the next unread file
    pub fn take(&self) -> Option<&'a Arc<FileLedger>> {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        self.files.get(i)
    }
}

/// Reader worker loop. Returns when the pool is empty or queue A closes.
pub fn run(
    worker: usize,
    pool: &WorkPool<'_>,
    out: Sender<Message<RawBatch>>,
    tracker: &ProgressTracker,
    batch_lines: usize,
) {
    while let Some(ledger) = pool.take() {
        debug!(worker, file = %ledger.key(), "Reader picked up file");
        let mut reader = FileReader {
            ledger,
            out: &out,
            tracker,
            batch_lines,
            seq: 0,
            reported_bytes: 0,
        };

        match reader.read() {
            Ok(()) => {
                info!(
                    worker,
                    file = %ledger.key(),
                    lines = ledger.lines_seen(),
                    batches = reader.seq,
                    "Finished reading file"
                );
            }
            Err(ReadError::QueueClosed(path)) => {
                debug!(worker, file = %path.display(), "Queue closed, reader stopping");
                return;
            }
            Err(e) => {
                ledger.abandon();
                tracker.counters().file_failed();
                error!(worker, file = %ledger.key(), error = %e, "Abandoning file");
            }
        }
    }
    debug!(worker, "Reader found no more files");
}

struct FileReader<'a> {
    ledger: &'a Arc<FileLedger>,
    out: &'a Sender<Message<RawBatch>>,
    tracker: &'a ProgressTracker,
    batch_lines: usize,
    seq: u64,
    reported_bytes: u64,
}

impl FileReader<'_> {
    fn read(&mut self) -> Result<(), ReadError> {
        let source = self.ledger.source();
        let path = source.path.clone();

        let mut lines = source
            .codec
            .open(&path)
            .map_err(|e| ReadError::Open {
                path: path.clone(),
                source: e,
            })?;

        let mut batch = self.fresh_batch();
        let mut line_no = 0u64;

        loop {
            let next = lines.next_line().map_err(|e| ReadError::Read {
                path: path.clone(),
                line: line_no,
                source: e,
            })?;
            let Some(bytes) = next else { break };
            line_no += 1;

            if bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            batch.push(RawLine {
                number: line_no,
                bytes,
            });

            if batch.len() >= self.batch_lines {
                let full = std::mem::replace(&mut batch, self.fresh_batch());
                self.send(full, lines.compressed_offset(), false)?;
            }
        }

        // Always sent, even when empty, so the writer sees the sealed file's last batch
        self.send(batch, lines.compressed_offset(), true)
    }

    fn fresh_batch(&self) -> Vec<RawLine> {
        Vec::with_capacity(self.batch_lines.min(1 << 16))
    }

    fn send(&mut self, lines: Vec<RawLine>, offset: u64, last: bool) -> Result<(), ReadError> {
        let counters = self.tracker.counters();
        let n = lines.len() as u64;

        self.ledger.add_lines(n);
        counters.add_lines(n);
        counters.add_bytes(offset.saturating_sub(self.reported_bytes));
        self.reported_bytes = offset;
        self.ledger.set_bytes_read(offset);

        self.ledger.batch_enqueued();
        if last {
            self.ledger.seal();
        }

        let batch = RawBatch {
            file: Arc::clone(self.ledger),
            seq: self.seq,
            lines,
        };
        self.out
            .send(Message::Batch(batch))
            .map_err(|_| ReadError::QueueClosed(self.ledger.source().path.clone()))?;
        self.seq += 1;
        counters.batch_read();

        let name = self.ledger.display_name();
        self.tracker.report(
            &FileProgress {
                name: &name,
                lines: self.ledger.lines_seen(),
                bad_lines: self.ledger.lines_malformed(),
                bytes_read: offset,
                size: self.ledger.source().size,
            },
            self.out.len(),
        );
        Ok(())
    }
}
