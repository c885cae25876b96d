//! Writer stage: the only code that mutates the destination during a load

use std::collections::{BTreeMap, HashMap};

use crossbeam_channel::Receiver;
use tracing::{debug, error, info};

use super::batch::{DecodedBatch, Message};
use crate::error::LoadError;
use crate::progress::ProgressCounters;
use crate::store::Destination;

/// Batches of one file waiting for their turn
#[derive(Default)]
struct Reorder {
    next_seq: u64,
    waiting: BTreeMap<u64, DecodedBatch>,
}

/// Single writer committing decoded batches in per-file order
pub struct Writer<'a, D: Destination + ?Sized> {
    dest: &'a mut D,
    counters: &'a ProgressCounters,
    decoders: usize,
    files: HashMap<String, Reorder>,
}

impl<'a, D: Destination + ?Sized> Writer<'a, D> {
    pub fn new(dest: &'a mut D, counters: &'a ProgressCounters, decoders: usize) -> Self {
        Self {
            dest,
            counters,
            decoders,
            files: HashMap::new(),
        }
    }

    /// Consume queue B until every decoder has signalled end of stream
    pub fn run(mut self, input: Receiver<Message<DecodedBatch>>) -> Result<(), LoadError> {
        let mut ends = 0;

        while ends < self.decoders {
            match input.recv() {
                Ok(Message::Batch(batch)) => self.accept(batch)?,
                Ok(Message::EndOfStream) => {
                    ends += 1;
                    debug!(ends, decoders = self.decoders, "Writer received end of stream");
                }
                Err(_) => {
                    return Err(LoadError::Incomplete(format!(
                        "decoder queue closed after {} of {} end-of-stream markers",
                        ends, self.decoders
                    )));
                }
            }
        }

        self.verify_drained()?;
        info!(
            batches = self.counters.snapshot().batches_inserted,
            rows = self.counters.snapshot().rows_inserted,
            "Writer drained"
        );
        Ok(())
    }

    fn accept(&mut self, batch: DecodedBatch) -> Result<(), LoadError> {
        let key = batch.file.key().to_string();
        let reorder = self.files.entry(key.clone()).or_default();
        reorder.waiting.insert(batch.seq, batch);

        loop {
            let Some(reorder) = self.files.get_mut(&key) else {
                break;
            };
            let next = reorder.next_seq;
            let Some(ready) = reorder.waiting.remove(&next) else {
                break;
            };
            reorder.next_seq += 1;

            if self.commit(ready)? {
                self.files.remove(&key);
            }
        }
        Ok(())
    }

    /// Commit one batch; returns true when it completed its file
    fn commit(&mut self, batch: DecodedBatch) -> Result<bool, LoadError> {
        let ledger = &batch.file;
        let completes = ledger.completes_with_next_commit();
        let rows = batch.rows.len() as u64;

        let registered = completes.then(|| ledger.key());
        if let Err(e) = self
            .dest
            .commit_batch(ledger.schema(), &batch.rows, registered)
        {
            error!(file = %ledger.key(), seq = batch.seq, error = %e, "Commit failed");
            return Err(e.into());
        }

        ledger.batch_committed(rows, completes);
        self.counters.batch_inserted(rows);
        debug!(file = %ledger.key(), seq = batch.seq, rows, "Committed batch");

        if completes {
            self.counters.file_completed();
            info!(
                file = %ledger.key(),
                rows = ledger.rows_committed(),
                malformed = ledger.lines_malformed(),
                "File loaded"
            );
        }
        Ok(completes)
    }

    fn verify_drained(&self) -> Result<(), LoadError> {
        let stuck: Vec<String> = self
            .files
            .iter()
            .filter(|(_, r)| !r.waiting.is_empty())
            .map(|(key, r)| format!("{} (waiting on batch {})", key, r.next_seq))
            .collect();

        if stuck.is_empty() {
            Ok(())
        } else {
            Err(LoadError::Incomplete(format!(
                "batches left uncommitted for {}",
                stuck.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ledger::{FileLedger, FileOutcome};
    use crate::schema::{Scalar, TableSchema};
    use crate::source::{RecordKind, SourceFile};
    use crate::store::DuckDbStore;
    use crossbeam_channel::unbounded;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn ledger(name: &str) -> Arc<FileLedger> {
        let source = SourceFile::classify(PathBuf::from(name), 1, None).unwrap();
        let schema = TableSchema::for_kind(source.kind, true);
        Arc::new(FileLedger::new(source, schema))
    }

    fn batch(ledger: &Arc<FileLedger>, seq: u64, ids: &[&str]) -> DecodedBatch {
        let width = ledger.schema().columns.len();
        DecodedBatch {
            file: Arc::clone(ledger),
            seq,
            rows: ids
                .iter()
                .map(|id| {
                    let mut row = vec![Scalar::Null; width];
                    row[2] = Scalar::Text(id.to_string());
                    row
                })
                .collect(),
        }
    }

    fn store() -> DuckDbStore {
        let mut store = DuckDbStore::memory().unwrap();
        store.init().unwrap();
        store
            .prepare(TableSchema::for_kind(RecordKind::Comments, true))
            .unwrap();
        store
    }

    #[test]
    fn test_out_of_order_batches_commit_in_sequence() {
        let mut store = store();
        let counters = ProgressCounters::default();
        let file = ledger("a_comments.zst");

        // Reader side: three batches, sealed before the last is sent
        for _ in 0..3 {
            file.batch_enqueued();
        }
        file.seal();

        let (tx, rx) = unbounded();
        tx.send(Message::Batch(batch(&file, 2, &["e"]))).unwrap();
        tx.send(Message::Batch(batch(&file, 0, &["a", "b"]))).unwrap();
        tx.send(Message::Batch(batch(&file, 1, &["c", "d"]))).unwrap();
        tx.send(Message::EndOfStream).unwrap();

        Writer::new(&mut store, &counters, 1).run(rx).unwrap();

        let ids = store
            .query_strings("SELECT id FROM comments ORDER BY rowid")
            .unwrap();
        let ids: Vec<_> = ids.into_iter().flatten().collect();
        assert_eq!(ids, ["a", "b", "c", "d", "e"]);
        assert_eq!(file.outcome(), FileOutcome::Committed);
        assert!(store.loaded_files().unwrap().contains(file.key()));
        assert_eq!(counters.snapshot().files_completed, 1);
    }

    #[test]
    fn test_unsealed_file_is_not_registered() {
        let mut store = store();
        let counters = ProgressCounters::default();
        let file = ledger("b_comments.zst");
        file.batch_enqueued();

        let (tx, rx) = unbounded();
        tx.send(Message::Batch(batch(&file, 0, &["x"]))).unwrap();
        tx.send(Message::EndOfStream).unwrap();

        Writer::new(&mut store, &counters, 1).run(rx).unwrap();
        assert_eq!(store.row_count("comments").unwrap(), 1);
        assert!(store.loaded_files().unwrap().is_empty());
    }

    #[test]
    fn test_missing_batch_is_incomplete() {
        let mut store = store();
        let counters = ProgressCounters::default();
        let file = ledger("c_comments.zst");
        file.batch_enqueued();
        file.batch_enqueued();

        let (tx, rx) = unbounded();
        tx.send(Message::Batch(batch(&file, 1, &["late"]))).unwrap();
        tx.send(Message::EndOfStream).unwrap();

        let err = Writer::new(&mut store, &counters, 1).run(rx).unwrap_err();
        assert!(matches!(err, LoadError::Incomplete(_)));
    }

    #[test]
    fn test_waits_for_every_decoder() {
        let mut store = store();
        let counters = ProgressCounters::default();
        let (tx, rx) = unbounded();
        tx.send(Message::EndOfStream).unwrap();
        drop(tx);

        let err = Writer::new(&mut store, &counters, 2).run(rx).unwrap_err();
        assert!(matches!(err, LoadError::Incomplete(_)));
    }
}
