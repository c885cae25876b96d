//! Destination store
//!
//! The pipeline talks to storage only through [`Destination`]. The shipped
//! implementation is [`DuckDbStore`], an embedded DuckDB database file that
//! holds the record tables together with the `loaded_files` registry, the
//! `history` table and `schema_info`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::schema::{Row, SCHEMA_VERSION, Scalar, TableSchema, control_tables_sql};

/// Engine settings applied once per run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// DuckDB memory limit such as `4GB`
    pub memory_limit: Option<String>,
    /// DuckDB worker threads
    pub threads: Option<usize>,
}

/// One row of the `history` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub run_id: String,
    pub started_at: String,
    pub args: Vec<String>,
}

/// Where decoded rows end up.
///
/// Only the writer mutates a destination during a load; everything else
/// happens on the controller thread before workers start or after they stop.
pub trait Destination: Send {
    /// Create control tables and check the schema version
    fn init(&mut self) -> Result<(), StoreError>;

    /// Apply engine settings
    fn apply_settings(&mut self, settings: &StoreSettings) -> Result<(), StoreError>;

    /// Append one row to the invocation history
    fn record_invocation(
        &mut self,
        run_id: &str,
        started_at: &str,
        args: &[String],
    ) -> Result<(), StoreError>;

    /// Registry keys of every fully loaded file
    fn loaded_files(&self) -> Result<HashSet<String>, StoreError>;

    /// Create the table for a schema if missing
    fn prepare(&mut self, schema: &TableSchema) -> Result<(), StoreError>;

    /// Insert rows in one transaction, registering `completes` in the
    /// same transaction when given
    fn commit_batch(
        &mut self,
        schema: &TableSchema,
        rows: &[Row],
        completes: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Whether a table exists
    fn table_exists(&self, table: &str) -> Result<bool, StoreError>;

    /// Build secondary indexes, returning how many statements ran
    fn create_indexes(&mut self, schema: &TableSchema) -> Result<usize, StoreError>;
}

/// DuckDB-backed destination
pub struct DuckDbStore {
    conn: duckdb::Connection,
    path: Option<PathBuf>,
}

impl DuckDbStore {
    /// Open or create a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = duckdb::Connection::open(path)?;
        debug!(path = %path.display(), "Opened destination database");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn memory() -> Result<Self, StoreError> {
        let conn = duckdb::Connection::open_in_memory()?;
        Ok(Self { conn, path: None })
    }

    /// Get the database path (if not in-memory)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Check if the control tables exist
    pub fn is_initialized(&self) -> Result<bool, StoreError> {
        self.table_exists("schema_info")
    }

    /// Get the schema version
    pub fn schema_version(&self) -> Result<Option<i32>, StoreError> {
        let result = self.conn.query_row(
            "SELECT value FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(version) => version
                .parse()
                .map(Some)
                .map_err(|_| StoreError::Database("Invalid schema version".to_string())),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Registry rows as (file, loaded_at), oldest first
    pub fn loaded_entries(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT file, loaded_at FROM loaded_files ORDER BY loaded_at, file")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Invocation history, in insertion order
    pub fn history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT run_id, started_at, args FROM history ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (run_id, started_at, args) = row?;
            let args = serde_json::from_str(&args)
                .map_err(|e| StoreError::Database(format!("Corrupt history args: {}", e)))?;
            entries.push(HistoryEntry {
                run_id,
                started_at,
                args,
            });
        }
        Ok(entries)
    }

    /// Get the row count of a table
    pub fn row_count(&self, table: &str) -> Result<i64, StoreError> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
        Ok(count)
    }

    /// Names of the secondary indexes on a table
    pub fn index_names(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT index_name FROM duckdb_indexes() WHERE table_name = ? ORDER BY index_name",
        )?;
        let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Column names of a table in declaration order
    pub fn column_names(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT column_name FROM information_schema.columns
             WHERE table_name = ? ORDER BY ordinal_position",
        )?;
        let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Run a query and return the first column of each row as text
    pub fn query_strings(&self, sql: &str) -> Result<Vec<Option<String>>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, Option<String>>(0))?;
        let mut values = Vec::new();
        for row in rows {
            values.push(row?);
        }
        Ok(values)
    }
}

impl Destination for DuckDbStore {
    fn init(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(control_tables_sql())?;

        match self.schema_version()? {
            Some(found) if found != SCHEMA_VERSION => {
                return Err(StoreError::SchemaVersionMismatch {
                    expected: SCHEMA_VERSION,
                    found,
                });
            }
            Some(_) => {}
            None => {
                self.conn.execute(
                    "INSERT INTO schema_info (key, value) VALUES ('version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
        }
        Ok(())
    }

    fn apply_settings(&mut self, settings: &StoreSettings) -> Result<(), StoreError> {
        if let Some(limit) = &settings.memory_limit {
            let limit = normalize_memory_limit(limit)?;
            self.conn
                .execute_batch(&format!("SET memory_limit = '{}'", limit))?;
            info!(memory_limit = %limit, "Applied memory limit");
        }
        if let Some(threads) = settings.threads {
            if threads == 0 {
                return Err(StoreError::InvalidSetting(
                    "threads must be at least 1".to_string(),
                ));
            }
            self.conn
                .execute_batch(&format!("SET threads = {}", threads))?;
            info!(threads, "Applied store thread count");
        }
        Ok(())
    }

    fn record_invocation(
        &mut self,
        run_id: &str,
        started_at: &str,
        args: &[String],
    ) -> Result<(), StoreError> {
        let args = serde_json::to_string(args)
            .map_err(|e| StoreError::Database(format!("Cannot encode arguments: {}", e)))?;
        self.conn.execute(
            "INSERT INTO history (run_id, started_at, args) VALUES (?, ?, ?)",
            duckdb::params![run_id, started_at, args],
        )?;
        Ok(())
    }

    fn loaded_files(&self) -> Result<HashSet<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT file FROM loaded_files")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut files = HashSet::new();
        for row in rows {
            files.insert(row?);
        }
        Ok(files)
    }

    fn prepare(&mut self, schema: &TableSchema) -> Result<(), StoreError> {
        self.conn.execute_batch(&schema.create_table_sql())?;

        let existing = self.column_names(schema.table)?;
        let missing: Vec<&str> = schema
            .column_names()
            .into_iter()
            .filter(|c| !existing.iter().any(|e| e == c))
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::Database(format!(
                "Table {} exists without columns {} (was it created by a --thin load?)",
                schema.table,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    fn commit_batch(
        &mut self,
        schema: &TableSchema,
        rows: &[Row],
        completes: Option<&str>,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&schema.insert_sql())?;
            for row in rows {
                stmt.execute(duckdb::params_from_iter(row.iter().map(Scalar::to_value)))?;
            }
        }
        if let Some(file) = completes {
            tx.execute(
                "INSERT INTO loaded_files (file, loaded_at) VALUES (?, ?)",
                duckdb::params![file, Utc::now().to_rfc3339()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn create_indexes(&mut self, schema: &TableSchema) -> Result<usize, StoreError> {
        if !self.table_exists(schema.table)? {
            return Ok(0);
        }
        let statements = schema.index_sql();
        for sql in &statements {
            debug!(table = schema.table, "{}", sql);
            self.conn.execute_batch(sql)?;
        }
        Ok(statements.len())
    }
}

/// Validate a memory limit like `4GB`, `512 MiB` or `16000M`
pub fn normalize_memory_limit(limit: &str) -> Result<String, StoreError> {
    const UNITS: [&str; 13] = [
        "B", "K", "M", "G", "T", "KB", "MB", "GB", "TB", "KIB", "MIB", "GIB", "TIB",
    ];

    let trimmed = limit.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let unit = unit.trim().to_ascii_uppercase();

    let valid_number = number.parse::<f64>().is_ok_and(|n| n > 0.0);
    if !valid_number || !UNITS.contains(&unit.as_str()) {
        return Err(StoreError::InvalidSetting(format!(
            "memory limit '{}' must look like 4GB or 512MB",
            limit
        )));
    }
    Ok(format!("{}{}", number, unit))
}
