//! dumpload - resumable bulk loader for compressed NDJSON dumps
//!
//! Loads Reddit comment and submission dumps (`*_comments.zst`,
//! `*_submissions.zst`) into a DuckDB database through a concurrent pipeline:
//!
//! ```text
//! inputs ─► source ─► Reader pool ─► queue A ─► Decoder pool ─► queue B ─► Writer ─► DuckDB
//!          (classify,   (codec)                  (schema)                  (store)
//!           resume)
//! ```
//!
//! A file is recorded in the `loaded_files` table in the same transaction as
//! its last rows, so re-running a load skips exactly the files that are
//! completely in the database.
//!
//! # Example
//!
//! ```no_run
//! use dumpload::{DuckDbStore, LoadConfig, Pipeline};
//!
//! let config = LoadConfig::new("reddit.duckdb").with_inputs(["dumps/*_comments.zst"]);
//! let mut store = DuckDbStore::open("reddit.duckdb")?;
//! let report = Pipeline::new(config)?.run(&mut store)?;
//! println!("{} rows", report.counters.rows_inserted);
//! # Ok::<(), dumpload::LoadError>(())
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod schema;
pub mod source;
pub mod store;

#[cfg(feature = "cli")]
pub mod cli;

pub use codec::Codec;
pub use config::LoadConfig;
pub use error::{LoadError, ReadError, StoreError};
pub use pipeline::{FileOutcome, FileReport, LoadReport, Pipeline, PipelineState, Stage};
pub use progress::{ProgressCounters, ProgressSnapshot, ProgressTracker};
pub use schema::{ColumnSpec, ColumnType, Scalar, TableSchema};
pub use source::{RecordKind, SourceFile, SourcePlan};
pub use store::{Destination, DuckDbStore, HistoryEntry, StoreSettings};
