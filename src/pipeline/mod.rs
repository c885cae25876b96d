//! Ingestion pipeline
//!
//! ```text
//! work pool ─► Reader × R ─► queue A ─► Decoder × D ─► queue B ─► Writer ─► store
//!                 │                        │                        │
//!                 └──────────── ProgressTracker counters ───────────┘
//! ```
//!
//! Queues are bounded, so a slow writer holds back the decoders and a slow
//! decoder pool holds back the readers. Shutdown runs stage by stage: once
//! every reader has emptied the work pool the controller puts one
//! end-of-stream marker per decoder on queue A, each decoder forwards one to
//! queue B, and the writer stops after counting one per decoder.

pub mod batch;
pub mod decoder;
pub mod ledger;
pub mod reader;
pub mod writer;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::bounded;
use serde::Serialize;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

pub use batch::{DecodedBatch, Message, RawBatch, RawLine};
pub use ledger::{FileLedger, FileOutcome, FileReport};

use crate::config::LoadConfig;
use crate::error::LoadError;
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::schema::TableSchema;
use crate::source::{RecordKind, SourcePlan, classify_all, expand_inputs};
use crate::store::Destination;
use reader::WorkPool;
use writer::Writer;

/// Pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Reader,
    Decoder,
    Writer,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Reader => write!(f, "reader"),
            Stage::Decoder => write!(f, "decoder"),
            Stage::Writer => write!(f, "writer"),
        }
    }
}

/// Run state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Starting,
    /// Waiting for a stage to finish its remaining work
    Draining(Stage),
    Done,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Starting => write!(f, "starting"),
            PipelineState::Draining(stage) => write!(f, "draining {}", stage),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub state: PipelineState,
    pub counters: ProgressSnapshot,
    pub bytes_total: u64,
    pub files: Vec<FileReport>,
    /// Inputs skipped because they were already loaded
    pub skipped: usize,
    pub indexes_built: usize,
    pub duration_ms: u64,
}

impl LoadReport {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Files with the given outcome
    pub fn count(&self, outcome: FileOutcome) -> usize {
        self.files.iter().filter(|f| f.outcome == outcome).count()
    }
}

/// Drives one load run against a destination
pub struct Pipeline {
    config: LoadConfig,
    run_id: String,
    started_at: DateTime<Utc>,
    invocation: Option<Vec<String>>,
    state: PipelineState,
    files: Vec<Arc<FileLedger>>,
}

impl Pipeline {
    /// Create a pipeline after validating the config
    pub fn new(config: LoadConfig) -> Result<Self, LoadError> {
        config.validate()?;
        Ok(Self {
            config,
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            invocation: None,
            state: PipelineState::Starting,
            files: Vec::new(),
        })
    }

    /// Record these invocation arguments in the history table
    pub fn with_invocation(mut self, args: Vec<String>) -> Self {
        self.invocation = Some(args);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Per-file tallies so far, also available after a failed run
    pub fn file_reports(&self) -> Vec<FileReport> {
        self.files.iter().map(|f| f.report()).collect()
    }

    /// Run the load
    pub fn run<D: Destination>(&mut self, dest: &mut D) -> Result<LoadReport, LoadError> {
        let _span = info_span!("load_run", run_id = %self.run_id).entered();
        let start = Instant::now();

        let result = self.run_inner(dest, start);
        if let Err(e) = &result {
            error!(run_id = %self.run_id, error = %e, "Load failed");
            self.transition(PipelineState::Failed);
        }
        result
    }

    fn run_inner<D: Destination>(
        &mut self,
        dest: &mut D,
        start: Instant,
    ) -> Result<LoadReport, LoadError> {
        info!(
            run_id = %self.run_id,
            database = %self.config.database.display(),
            state = %self.state,
            "Starting load"
        );

        // Classify before touching the store so bad inputs fail with nothing written
        let files = if self.config.index_only {
            Vec::new()
        } else {
            let paths = expand_inputs(&self.config.inputs)?;
            classify_all(paths, self.config.kind)?
        };

        dest.init()?;
        dest.apply_settings(&self.config.store_settings())?;
        if let Some(args) = &self.invocation {
            dest.record_invocation(&self.run_id, &self.started_at.to_rfc3339(), args)?;
        }

        if self.config.index_only {
            info!("Index-only mode, skipping ingestion");
            let indexes_built = self.build_indexes(dest)?;
            self.transition(PipelineState::Done);
            return Ok(self.report(ProgressSnapshot::default(), 0, 0, indexes_built, start));
        }

        let plan = SourcePlan::new(files, &dest.loaded_files()?);
        for kind in plan.kinds() {
            dest.prepare(TableSchema::for_kind(kind, self.config.thin))?;
        }

        self.files = plan
            .files
            .iter()
            .map(|f| {
                Arc::new(FileLedger::new(
                    f.clone(),
                    TableSchema::for_kind(f.kind, self.config.thin),
                ))
            })
            .collect();

        let tracker = if self.config.progress_bar {
            ProgressTracker::with_bar(plan.bytes_total())
        } else {
            ProgressTracker::new(plan.bytes_total())
        };

        let outcome = self.execute(dest, &tracker);
        tracker.finish(outcome.is_ok());
        outcome?;

        let indexes_built = if self.config.build_indexes {
            self.build_indexes(dest)?
        } else {
            0
        };

        let snapshot = tracker.snapshot();
        info!(
            run_id = %self.run_id,
            rows = snapshot.rows_inserted,
            files_completed = snapshot.files_completed,
            files_failed = snapshot.files_failed,
            bad_lines = snapshot.bad_lines,
            duration_ms = start.elapsed().as_millis() as u64,
            "Load completed"
        );

        Ok(self.report(
            snapshot,
            plan.bytes_total(),
            plan.skipped.len(),
            indexes_built,
            start,
        ))
    }

    /// Start the stage pools and drain them in order
    fn execute<D: Destination>(
        &mut self,
        dest: &mut D,
        tracker: &ProgressTracker,
    ) -> Result<(), LoadError> {
        let readers = self.config.readers.min(self.files.len()).max(1);
        let decoders = self.config.decoders;
        let batch_lines = self.config.batch_lines;
        let depth = self.config.queue_depth;

        info!(
            files = self.files.len(),
            readers,
            decoders,
            batch_lines,
            queue_depth = depth,
            "Launching pipeline"
        );

        let (raw_tx, raw_rx) = bounded::<Message<RawBatch>>(depth);
        let (decoded_tx, decoded_rx) = bounded::<Message<DecodedBatch>>(depth);
        let files = self.files.clone();
        let pool = WorkPool::new(&files);
        let counters = tracker.counters();

        thread::scope(|s| {
            let writer = s.spawn(move || Writer::new(dest, counters, decoders).run(decoded_rx));

            let decoder_handles: Vec<_> = (0..decoders)
                .map(|i| {
                    let rx = raw_rx.clone();
                    let tx = decoded_tx.clone();
                    s.spawn(move || decoder::run(i, rx, tx, counters))
                })
                .collect();
            drop(raw_rx);
            drop(decoded_tx);

            let reader_handles: Vec<_> = (0..readers)
                .map(|i| {
                    let tx = raw_tx.clone();
                    let pool = &pool;
                    s.spawn(move || reader::run(i, pool, tx, tracker, batch_lines))
                })
                .collect();

            let mut panicked = None;

            self.transition(PipelineState::Draining(Stage::Reader));
            for handle in reader_handles {
                if handle.join().is_err() {
                    panicked = Some("reader");
                }
            }

            self.transition(PipelineState::Draining(Stage::Decoder));
            for _ in 0..decoders {
                if raw_tx.send(Message::EndOfStream).is_err() {
                    warn!("Decoders exited before end of stream");
                    break;
                }
            }
            drop(raw_tx);
            for handle in decoder_handles {
                if handle.join().is_err() {
                    panicked = Some("decoder");
                }
            }

            self.transition(PipelineState::Draining(Stage::Writer));
            let written = match writer.join() {
                Ok(result) => result,
                Err(_) => Err(LoadError::WorkerPanicked("writer")),
            };

            // A lost decoder also starves the writer; report the panic itself
            if let Some(stage) = panicked {
                return Err(LoadError::WorkerPanicked(stage));
            }
            written?;

            self.transition(PipelineState::Done);
            Ok(())
        })
    }

    fn build_indexes<D: Destination>(&self, dest: &mut D) -> Result<usize, LoadError> {
        let mut built = 0;
        for kind in RecordKind::all() {
            let schema = TableSchema::for_kind(kind, self.config.thin);
            let count = dest.create_indexes(schema)?;
            if count > 0 {
                info!(table = schema.table, indexes = count, "Indexes built");
            }
            built += count;
        }
        Ok(built)
    }

    fn transition(&mut self, next: PipelineState) {
        info!(from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
    }

    fn report(
        &self,
        counters: ProgressSnapshot,
        bytes_total: u64,
        skipped: usize,
        indexes_built: usize,
        start: Instant,
    ) -> LoadReport {
        LoadReport {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            state: self.state,
            counters,
            bytes_total,
            files: self.file_reports(),
            skipped,
            indexes_built,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}
