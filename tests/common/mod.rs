//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use dumpload::schema::Row;
use dumpload::source::registry_key;
use dumpload::{Destination, DuckDbStore, LoadConfig, StoreError, StoreSettings, TableSchema};

/// Write lines as a zstd-compressed dump
pub fn write_zst(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut text = lines.join("\n");
    text.push('\n');
    let compressed = zstd::encode_all(text.as_bytes(), 3).unwrap();
    std::fs::write(&path, compressed).unwrap();
    path
}

/// Write lines as an uncompressed dump
pub fn write_plain(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

/// `count` comment records with ids `{prefix}{n}`
pub fn comments(prefix: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|n| {
            format!(
                r#"{{"id":"{prefix}{n}","subreddit":"test","author":"u{n}","body":"comment {n}","score":{n},"created_utc":"1420070400","link_id":"t3_x","parent_id":"t3_x"}}"#
            )
        })
        .collect()
}

/// `count` submission records with ids `{prefix}{n}`
pub fn submissions(prefix: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|n| {
            format!(
                r#"{{"id":"{prefix}{n}","subreddit":"test","author":"u{n}","title":"post {n}","num_comments":{n},"over_18":false,"created_utc":1420070400}}"#
            )
        })
        .collect()
}

pub fn path_str(path: &Path) -> String {
    registry_key(path)
}

/// Small-batch config so tests exercise many batches
pub fn config(inputs: &[&Path]) -> LoadConfig {
    LoadConfig::new("test.duckdb")
        .with_inputs(inputs.iter().map(|p| p.display().to_string()))
        .with_readers(2)
        .with_decoders(2)
        .with_batch_lines(2)
        .with_queue_depth(4)
}

pub fn memory_store() -> DuckDbStore {
    DuckDbStore::memory().unwrap()
}

/// Ids of a table in insertion order
pub fn ids(store: &DuckDbStore, table: &str) -> Vec<String> {
    store
        .query_strings(&format!("SELECT id FROM {} ORDER BY rowid", table))
        .unwrap()
        .into_iter()
        .flatten()
        .collect()
}

/// Destination that injects one commit failure
pub struct FlakyStore {
    pub inner: DuckDbStore,
    /// Fail the commit that would register this file
    pub fail_on: Option<String>,
    /// Fail the commit with this zero-based index
    pub fail_at: Option<usize>,
    pub commits: usize,
}

impl FlakyStore {
    pub fn new(fail_on: &Path) -> Self {
        Self {
            inner: memory_store(),
            fail_on: Some(path_str(fail_on)),
            fail_at: None,
            commits: 0,
        }
    }

    pub fn failing_commit(index: usize) -> Self {
        Self {
            inner: memory_store(),
            fail_on: None,
            fail_at: Some(index),
            commits: 0,
        }
    }
}

impl Destination for FlakyStore {
    fn init(&mut self) -> Result<(), StoreError> {
        self.inner.init()
    }

    fn apply_settings(&mut self, settings: &StoreSettings) -> Result<(), StoreError> {
        self.inner.apply_settings(settings)
    }

    fn record_invocation(
        &mut self,
        run_id: &str,
        started_at: &str,
        args: &[String],
    ) -> Result<(), StoreError> {
        self.inner.record_invocation(run_id, started_at, args)
    }

    fn loaded_files(&self) -> Result<HashSet<String>, StoreError> {
        self.inner.loaded_files()
    }

    fn prepare(&mut self, schema: &TableSchema) -> Result<(), StoreError> {
        self.inner.prepare(schema)
    }

    fn commit_batch(
        &mut self,
        schema: &TableSchema,
        rows: &[Row],
        completes: Option<&str>,
    ) -> Result<(), StoreError> {
        let registers_target = completes.is_some() && completes == self.fail_on.as_deref();
        if registers_target || self.fail_at == Some(self.commits) {
            return Err(StoreError::Database("injected commit failure".to_string()));
        }
        self.commits += 1;
        self.inner.commit_batch(schema, rows, completes)
    }

    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        self.inner.table_exists(table)
    }

    fn create_indexes(&mut self, schema: &TableSchema) -> Result<usize, StoreError> {
        self.inner.create_indexes(schema)
    }
}
