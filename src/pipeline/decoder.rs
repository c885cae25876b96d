//! Decoder stage: parse raw lines into typed rows

use crossbeam_channel::{Receiver, Sender};
use serde_json::Value;
use tracing::{debug, warn};

use super::batch::{DecodedBatch, Message, RawBatch};
use crate::progress::ProgressCounters;

/// Decoder worker loop.
///
/// Forwards exactly one end-of-stream marker when it receives one, and
/// stops without forwarding if either queue closes.
pub fn run(
    worker: usize,
    input: Receiver<Message<RawBatch>>,
    output: Sender<Message<DecodedBatch>>,
    counters: &ProgressCounters,
) {
    for message in input.iter() {
        match message {
            Message::Batch(raw) => {
                let decoded = decode(raw, counters);
                if output.send(Message::Batch(decoded)).is_err() {
                    debug!(worker, "Output queue closed, decoder stopping");
                    return;
                }
            }
            Message::EndOfStream => {
                if output.send(Message::EndOfStream).is_err() {
                    debug!(worker, "Output queue closed before end of stream");
                }
                debug!(worker, "Decoder drained");
                return;
            }
        }
    }
    debug!(worker, "Input queue closed, decoder stopping");
}

/// Decode one batch; malformed lines are counted, logged and dropped
pub fn decode(raw: RawBatch, counters: &ProgressCounters) -> DecodedBatch {
    let schema = raw.file.schema();
    let mut rows = Vec::with_capacity(raw.lines.len());
    let mut malformed = 0u64;

    for line in &raw.lines {
        match serde_json::from_slice::<Value>(&line.bytes) {
            Ok(Value::Object(record)) => rows.push(schema.project(&record)),
            Ok(other) => {
                malformed += 1;
                warn!(
                    file = %raw.file.key(),
                    line = line.number,
                    found = json_type(&other),
                    "Skipping line: not a JSON object"
                );
            }
            Err(e) => {
                malformed += 1;
                warn!(
                    file = %raw.file.key(),
                    line = line.number,
                    error = %e,
                    "Skipping malformed line"
                );
            }
        }
    }

    if malformed > 0 {
        raw.file.add_malformed(malformed);
        counters.add_bad_lines(malformed);
    }
    counters.batch_decoded();

    DecodedBatch {
        file: raw.file,
        seq: raw.seq,
        rows,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch::RawLine;
    use crate::pipeline::ledger::FileLedger;
    use crate::schema::{Scalar, TableSchema};
    use crate::source::{RecordKind, SourceFile};
    use crossbeam_channel::unbounded;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn raw(seq: u64, lines: &[&str]) -> RawBatch {
        let source = SourceFile::classify(PathBuf::from("r/test_submissions.zst"), 1, None).unwrap();
        let ledger = FileLedger::new(source, TableSchema::for_kind(RecordKind::Submissions, true));
        RawBatch {
            file: Arc::new(ledger),
            seq,
            lines: lines
                .iter()
                .enumerate()
                .map(|(i, l)| RawLine {
                    number: i as u64 + 1,
                    bytes: l.as_bytes().to_vec(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_decode_counts_malformed() {
        let counters = ProgressCounters::default();
        let batch = raw(
            4,
            &[
                r#"{"id":"a","score":10,"title":"first"}"#,
                r#"{"id":"b","#,
                r#"[1,2]"#,
                r#"{"id":"c","score":"7"}"#,
            ],
        );
        let ledger = Arc::clone(&batch.file);

        let decoded = decode(batch, &counters);
        assert_eq!(decoded.seq, 4);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.rows[0][1], Scalar::Text("a".to_string()));
        assert_eq!(decoded.rows[1][6], Scalar::Int(7));
        assert_eq!(ledger.lines_malformed(), 2);
        assert_eq!(counters.snapshot().bad_lines, 2);
        assert_eq!(counters.snapshot().batches_decoded, 1);
    }

    #[test]
    fn test_empty_batch_is_forwarded() {
        let counters = ProgressCounters::default();
        let decoded = decode(raw(0, &[]), &counters);
        assert!(decoded.is_empty());
        assert_eq!(counters.snapshot().batches_decoded, 1);
    }

    #[test]
    fn test_worker_forwards_one_end_marker() {
        let counters = ProgressCounters::default();
        let (in_tx, in_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();

        in_tx.send(Message::Batch(raw(0, &["{}"]))).unwrap();
        in_tx.send(Message::EndOfStream).unwrap();
        in_tx.send(Message::EndOfStream).unwrap();

        run(0, in_rx.clone(), out_tx, &counters);

        let out: Vec<_> = out_rx.try_iter().collect();
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Message::Batch(_)));
        assert!(matches!(out[1], Message::EndOfStream));
        // The second marker is left for another decoder
        assert_eq!(in_rx.len(), 1);
    }
}
