//! Command-line arguments

use std::path::PathBuf;

use clap::Parser;

use crate::config::LoadConfig;
use crate::error::LoadError;
use crate::source::RecordKind;

/// Load compressed Reddit comment and submission dumps into DuckDB.
///
/// Re-running the same command skips files that were fully loaded, so an
/// interrupted load can simply be started again.
#[derive(Parser, Debug, Clone)]
#[command(name = "dumpload", version)]
pub struct Cli {
    /// DuckDB database file to create or extend
    pub database: PathBuf,

    /// Input files or glob patterns (e.g. 'dumps/*_comments.zst')
    pub inputs: Vec<String>,

    /// Reader threads (default: SLURM_CPUS_PER_TASK or CPU count)
    #[arg(long)]
    pub readers: Option<usize>,

    /// Decoder threads (default: SLURM_CPUS_PER_TASK or CPU count)
    #[arg(long)]
    pub decoders: Option<usize>,

    /// Lines per batch
    #[arg(long)]
    pub batch_lines: Option<usize>,

    /// Batches buffered between stages
    #[arg(long)]
    pub queue_depth: Option<usize>,

    /// Kind for files whose name does not end in comments or submissions
    #[arg(long)]
    pub kind: Option<RecordKind>,

    /// Load a reduced set of columns
    #[arg(long)]
    pub thin: bool,

    /// Only build indexes on existing tables
    #[arg(long)]
    pub index_only: bool,

    /// Skip index creation after loading
    #[arg(long)]
    pub no_indexes: bool,

    /// DuckDB memory limit, e.g. 16GB (default: inferred from SLURM)
    #[arg(long, env = "DUMPLOAD_MEMLIMIT")]
    pub memlimit: Option<String>,

    /// DuckDB threads
    #[arg(long)]
    pub threads: Option<usize>,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,

    /// TOML file with defaults; command-line flags take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Build the load configuration, layering flags over the config file
    pub fn to_config(&self) -> Result<LoadConfig, LoadError> {
        let mut config = match &self.config {
            Some(path) => LoadConfig::from_toml_file(path)?,
            None => LoadConfig::default(),
        };

        config.database = self.database.clone();
        if !self.inputs.is_empty() {
            config.inputs = self.inputs.clone();
        }
        if let Some(readers) = self.readers {
            config.readers = readers;
        }
        if let Some(decoders) = self.decoders {
            config.decoders = decoders;
        }
        if let Some(batch_lines) = self.batch_lines {
            config.batch_lines = batch_lines;
        }
        if let Some(queue_depth) = self.queue_depth {
            config.queue_depth = queue_depth;
        }
        if self.kind.is_some() {
            config.kind = self.kind;
        }
        if self.memlimit.is_some() {
            config.memory_limit = self.memlimit.clone();
        }
        if self.threads.is_some() {
            config.threads = self.threads;
        }
        config.thin |= self.thin;
        config.index_only |= self.index_only;
        config.progress_bar |= self.progress;
        if self.no_indexes {
            config.build_indexes = false;
        }

        config.validate()?;
        Ok(config)
    }
}
