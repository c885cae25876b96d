//! Load configuration
//!
//! A [`LoadConfig`] can be built in code with the `with_*` methods, read from
//! a TOML file, or assembled by the command line. Defaults for worker counts
//! and the memory limit come from the SLURM allocation when one is present.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LoadError;
use crate::source::RecordKind;
use crate::store::StoreSettings;

/// Lines per batch
pub const DEFAULT_BATCH_LINES: usize = 100_000;

/// Slots in each inter-stage queue
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Memory left to the rest of the job when the limit comes from SLURM
const SLURM_HEADROOM_MB: u64 = 500;

/// Configuration for one load run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Destination database file
    pub database: PathBuf,
    /// Input glob patterns or paths
    pub inputs: Vec<String>,
    /// Reader workers
    pub readers: usize,
    /// Decoder workers
    pub decoders: usize,
    /// Lines per batch
    pub batch_lines: usize,
    /// Capacity of each bounded queue
    pub queue_depth: usize,
    /// Kind to assume for files whose name carries no kind suffix
    pub kind: Option<RecordKind>,
    /// Load the reduced column set
    pub thin: bool,
    /// Only (re)build indexes
    pub index_only: bool,
    /// Build indexes after a successful load
    pub build_indexes: bool,
    /// DuckDB memory limit
    pub memory_limit: Option<String>,
    /// DuckDB threads
    pub threads: Option<usize>,
    /// Draw a terminal progress bar
    pub progress_bar: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        let workers = default_workers();
        Self {
            database: PathBuf::from("reddit.duckdb"),
            inputs: Vec::new(),
            readers: workers,
            decoders: workers,
            batch_lines: DEFAULT_BATCH_LINES,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            kind: None,
            thin: false,
            index_only: false,
            build_indexes: true,
            memory_limit: None,
            threads: None,
            progress_bar: false,
        }
    }
}

impl LoadConfig {
    /// Create a new config with defaults
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Read a config from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| LoadError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Parse a config from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_readers(mut self, readers: usize) -> Self {
        self.readers = readers;
        self
    }

    pub fn with_decoders(mut self, decoders: usize) -> Self {
        self.decoders = decoders;
        self
    }

    pub fn with_batch_lines(mut self, batch_lines: usize) -> Self {
        self.batch_lines = batch_lines;
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    pub fn with_kind(mut self, kind: Option<RecordKind>) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_thin(mut self, thin: bool) -> Self {
        self.thin = thin;
        self
    }

    pub fn with_index_only(mut self, index_only: bool) -> Self {
        self.index_only = index_only;
        self
    }

    pub fn with_build_indexes(mut self, build_indexes: bool) -> Self {
        self.build_indexes = build_indexes;
        self
    }

    pub fn with_memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.memory_limit = Some(limit.into());
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_progress_bar(mut self, progress_bar: bool) -> Self {
        self.progress_bar = progress_bar;
        self
    }

    /// Engine settings, filling the memory limit from SLURM when unset
    pub fn store_settings(&self) -> StoreSettings {
        let memory_limit = self.memory_limit.clone().or_else(|| {
            let inferred = slurm_memory_limit(|name| std::env::var(name).ok());
            if let Some(limit) = &inferred {
                info!(memory_limit = %limit, "Memory limit inferred from SLURM allocation");
            }
            inferred
        });
        StoreSettings {
            memory_limit,
            threads: self.threads,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), LoadError> {
        let invalid = |msg: &str| Err(LoadError::InvalidConfig(msg.to_string()));

        if self.database.as_os_str().is_empty() {
            return invalid("database path is required");
        }
        if !self.index_only && self.inputs.is_empty() {
            return invalid("at least one input is required");
        }
        if self.readers == 0 {
            return invalid("readers must be at least 1");
        }
        if self.decoders == 0 {
            return invalid("decoders must be at least 1");
        }
        if self.batch_lines == 0 {
            return invalid("batch_lines must be at least 1");
        }
        if self.queue_depth == 0 {
            return invalid("queue_depth must be at least 1");
        }
        if self.threads == Some(0) {
            return invalid("threads must be at least 1");
        }
        Ok(())
    }
}

/// Worker count from `SLURM_CPUS_PER_TASK`, else available parallelism
pub fn default_workers() -> usize {
    workers_from(
        |name| std::env::var(name).ok(),
        std::thread::available_parallelism().map_or(1, |n| n.get()),
    )
}

fn workers_from(lookup: impl Fn(&str) -> Option<String>, fallback: usize) -> usize {
    lookup("SLURM_CPUS_PER_TASK")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(fallback)
}

/// Memory limit derived from the SLURM allocation (values in MB)
fn slurm_memory_limit(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    let number = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

    let total = number("SLURM_MEM_PER_NODE").or_else(|| {
        number("SLURM_MEM_PER_CPU").map(|per_cpu| per_cpu * number("SLURM_CPUS_PER_TASK").unwrap_or(1))
    })?;

    let limit = total.checked_sub(SLURM_HEADROOM_MB).filter(|&mb| mb > 0)?;
    Some(format!("{}MB", limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = LoadConfig::new("out.duckdb");
        assert_eq!(config.batch_lines, 100_000);
        assert_eq!(config.queue_depth, 16);
        assert!(config.build_indexes);
        assert!(config.readers >= 1);
        assert!(config.kind.is_none());
    }

    #[test]
    fn test_config_builder_and_validate() {
        let config = LoadConfig::new("out.duckdb")
            .with_inputs(["dumps/*_comments.zst"])
            .with_readers(2)
            .with_decoders(3)
            .with_batch_lines(10)
            .with_kind(Some(RecordKind::Comments));
        assert!(config.validate().is_ok());
        assert_eq!(config.decoders, 3);

        assert!(config.clone().with_readers(0).validate().is_err());
        assert!(config.clone().with_batch_lines(0).validate().is_err());
        assert!(config.clone().with_queue_depth(0).validate().is_err());
        assert!(LoadConfig::new("out.duckdb").validate().is_err());
        assert!(
            LoadConfig::new("out.duckdb")
                .with_index_only(true)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_config_from_toml() {
        let config = LoadConfig::from_toml_str(
            r#"
database = "/scratch/reddit.duckdb"
inputs = ["/data/*_submissions.zst"]
readers = 4
thin = true
kind = "submissions"
memory_limit = "8GB"
"#,
        )
        .unwrap();

        assert_eq!(config.database, PathBuf::from("/scratch/reddit.duckdb"));
        assert_eq!(config.readers, 4);
        assert!(config.thin);
        assert_eq!(config.kind, Some(RecordKind::Submissions));
        assert_eq!(config.batch_lines, DEFAULT_BATCH_LINES);
        assert_eq!(config.store_settings().memory_limit.as_deref(), Some("8GB"));

        assert!(LoadConfig::from_toml_str("readers = \"many\"").is_err());
    }

    #[test]
    fn test_config_from_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("load.toml");
        std::fs::write(&path, "queue_depth = 4\n").unwrap();
        assert_eq!(LoadConfig::from_toml_file(&path).unwrap().queue_depth, 4);

        std::fs::write(&path, "queue_depth = -1\n").unwrap();
        let err = LoadConfig::from_toml_file(&path).unwrap_err();
        assert!(matches!(err, LoadError::InvalidConfig(_)));
    }

    #[test]
    fn test_workers_from_env() {
        assert_eq!(workers_from(env(&[("SLURM_CPUS_PER_TASK", "12")]), 4), 12);
        assert_eq!(workers_from(env(&[("SLURM_CPUS_PER_TASK", "0")]), 4), 4);
        assert_eq!(workers_from(env(&[]), 4), 4);
    }

    #[test]
    fn test_slurm_memory_limit() {
        assert_eq!(
            slurm_memory_limit(env(&[("SLURM_MEM_PER_NODE", "16000")])),
            Some("15500MB".to_string())
        );
        assert_eq!(
            slurm_memory_limit(env(&[
                ("SLURM_MEM_PER_CPU", "2000"),
                ("SLURM_CPUS_PER_TASK", "4")
            ])),
            Some("7500MB".to_string())
        );
        assert_eq!(slurm_memory_limit(env(&[("SLURM_MEM_PER_NODE", "400")])), None);
        assert_eq!(slurm_memory_limit(env(&[])), None);
    }
}
