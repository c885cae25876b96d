//! Destination table schemas and row projection
//!
//! Each record kind has a static [`TableSchema`]: the ordered columns of its
//! destination table, where each column either copies a same-named JSON
//! field or derives its value from the whole object. The same declaration
//! drives the `CREATE TABLE` statement, the insert statement and the decode
//! projection, so the three can never drift apart.

use serde_json::{Map, Value};

use crate::source::RecordKind;

/// Current control-table schema version
pub const SCHEMA_VERSION: i32 = 1;

/// A decoded JSON record
pub type JsonObject = Map<String, Value>;

/// One destination row, ordered like the schema's columns
pub type Row = Vec<Scalar>;

/// Derives a column value from a whole record
pub type Transform = fn(&JsonObject) -> Scalar;

/// Destination scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Varchar,
    BigInt,
    Double,
    Boolean,
}

impl ColumnType {
    /// SQL spelling of the type
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Varchar => "VARCHAR",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Boolean => "BOOLEAN",
        }
    }

    /// Coerce a JSON value to this type.
    ///
    /// Values that cannot be represented become NULL; a dump with an
    /// oddly typed field must not lose the rest of the record.
    pub fn coerce(&self, value: &Value) -> Scalar {
        match (self, value) {
            (_, Value::Null) => Scalar::Null,

            (ColumnType::Varchar, Value::String(s)) => Scalar::Text(s.clone()),
            (ColumnType::Varchar, other) => Scalar::Text(other.to_string()),

            (ColumnType::BigInt, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().and_then(integral))
                .map_or(Scalar::Null, Scalar::Int),
            (ColumnType::BigInt, Value::String(s)) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(integral))
                    .map_or(Scalar::Null, Scalar::Int)
            }
            (ColumnType::BigInt, Value::Bool(b)) => Scalar::Int(i64::from(*b)),

            (ColumnType::Double, Value::Number(n)) => n.as_f64().map_or(Scalar::Null, Scalar::Float),
            (ColumnType::Double, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map_or(Scalar::Null, Scalar::Float),

            (ColumnType::Boolean, Value::Bool(b)) => Scalar::Bool(*b),
            (ColumnType::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(0) => Scalar::Bool(false),
                Some(1) => Scalar::Bool(true),
                _ => Scalar::Null,
            },
            (ColumnType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Scalar::Bool(true),
                "false" => Scalar::Bool(false),
                _ => Scalar::Null,
            },

            _ => Scalar::Null,
        }
    }
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

/// A single destination value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    /// Convert into a DuckDB value for binding
    pub fn to_value(&self) -> duckdb::types::Value {
        use duckdb::types::Value as DbValue;
        match self {
            Scalar::Null => DbValue::Null,
            Scalar::Text(s) => DbValue::Text(s.clone()),
            Scalar::Int(n) => DbValue::BigInt(*n),
            Scalar::Float(f) => DbValue::Double(*f),
            Scalar::Bool(b) => DbValue::Boolean(*b),
        }
    }
}

/// Where a column's value comes from
#[derive(Clone, Copy)]
pub enum ColumnSource {
    /// The same-named field of the record
    Field,
    /// A function of the whole record
    Transform(Transform),
}

impl std::fmt::Debug for ColumnSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnSource::Field => write!(f, "Field"),
            ColumnSource::Transform(_) => write!(f, "Transform"),
        }
    }
}

/// One destination column
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    pub source: ColumnSource,
}

impl ColumnSpec {
    /// Column copied from the same-named field
    pub const fn field(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            source: ColumnSource::Field,
        }
    }

    /// Column computed from the whole record
    pub const fn transformed(name: &'static str, ty: ColumnType, transform: Transform) -> Self {
        Self {
            name,
            ty,
            source: ColumnSource::Transform(transform),
        }
    }

    /// Extract this column's value from a record
    pub fn extract(&self, record: &JsonObject) -> Scalar {
        match self.source {
            ColumnSource::Field => record
                .get(self.name)
                .map_or(Scalar::Null, |value| self.ty.coerce(value)),
            ColumnSource::Transform(transform) => transform(record),
        }
    }
}

/// Shape of a destination table
#[derive(Debug)]
pub struct TableSchema {
    pub kind: RecordKind,
    pub table: &'static str,
    pub thin: bool,
    pub columns: &'static [ColumnSpec],
    /// Columns that get a secondary index
    pub indexes: &'static [&'static str],
}

impl TableSchema {
    /// Static schema for a record kind
    pub fn for_kind(kind: RecordKind, thin: bool) -> &'static TableSchema {
        match (kind, thin) {
            (RecordKind::Comments, false) => &COMMENTS,
            (RecordKind::Comments, true) => &COMMENTS_THIN,
            (RecordKind::Submissions, false) => &SUBMISSIONS,
            (RecordKind::Submissions, true) => &SUBMISSIONS_THIN,
        }
    }

    /// Project a record onto this schema's columns
    pub fn project(&self, record: &JsonObject) -> Row {
        self.columns.iter().map(|c| c.extract(record)).collect()
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// DDL for the destination table
    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.ty.sql()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS {} ({})", self.table, columns)
    }

    /// Parameterised insert with an explicit column list
    pub fn insert_sql(&self) -> String {
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            self.column_names().join(", "),
            placeholders
        )
    }

    /// Secondary index statements
    pub fn index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|column| {
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})",
                    table = self.table
                )
            })
            .collect()
    }
}

/// Control tables (DuckDB syntax)
pub fn control_tables_sql() -> &'static str {
    r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_info (
    key VARCHAR PRIMARY KEY,
    value VARCHAR NOT NULL
);

-- Files whose rows are fully committed
CREATE TABLE IF NOT EXISTS loaded_files (
    file VARCHAR PRIMARY KEY,
    loaded_at VARCHAR NOT NULL
);

-- One row per invocation
CREATE TABLE IF NOT EXISTS history (
    run_id VARCHAR NOT NULL,
    started_at VARCHAR NOT NULL,
    args VARCHAR NOT NULL
);
"#
}

fn fullname(record: &JsonObject, tag: &str) -> Scalar {
    if let Some(Value::String(name)) = record.get("name") {
        return Scalar::Text(name.clone());
    }
    match record.get("id") {
        Some(Value::String(id)) if id.starts_with(tag) => Scalar::Text(id.clone()),
        Some(Value::String(id)) => Scalar::Text(format!("{tag}{id}")),
        Some(Value::Number(n)) => Scalar::Text(format!("{tag}{n}")),
        _ => Scalar::Null,
    }
}

fn comment_fullname(record: &JsonObject) -> Scalar {
    fullname(record, "t1_")
}

fn submission_fullname(record: &JsonObject) -> Scalar {
    fullname(record, "t3_")
}

use ColumnType::{BigInt, Boolean, Varchar};

static COMMENTS: TableSchema = TableSchema {
    kind: RecordKind::Comments,
    table: "comments",
    thin: false,
    columns: &[
        ColumnSpec::field("subreddit", Varchar),
        ColumnSpec::field("author", Varchar),
        ColumnSpec::field("id", Varchar),
        ColumnSpec::transformed("name", Varchar, comment_fullname),
        ColumnSpec::field("link_id", Varchar),
        ColumnSpec::field("parent_id", Varchar),
        ColumnSpec::field("controversiality", BigInt),
        ColumnSpec::field("created_utc", BigInt),
        ColumnSpec::field("distinguished", Varchar),
        ColumnSpec::field("downs", BigInt),
        ColumnSpec::field("gilded", BigInt),
        ColumnSpec::field("score", BigInt),
        ColumnSpec::field("score_hidden", Boolean),
        ColumnSpec::field("subreddit_id", Varchar),
        ColumnSpec::field("body", Varchar),
        ColumnSpec::field("moderator", Varchar),
    ],
    indexes: &["subreddit", "author", "created_utc", "link_id"],
};

static COMMENTS_THIN: TableSchema = TableSchema {
    kind: RecordKind::Comments,
    table: "comments",
    thin: true,
    columns: &[
        ColumnSpec::field("subreddit", Varchar),
        ColumnSpec::field("author", Varchar),
        ColumnSpec::field("id", Varchar),
        ColumnSpec::transformed("name", Varchar, comment_fullname),
        ColumnSpec::field("link_id", Varchar),
        ColumnSpec::field("parent_id", Varchar),
        ColumnSpec::field("created_utc", BigInt),
        ColumnSpec::field("score", BigInt),
    ],
    indexes: &["subreddit", "author", "created_utc", "link_id"],
};

static SUBMISSIONS: TableSchema = TableSchema {
    kind: RecordKind::Submissions,
    table: "submissions",
    thin: false,
    columns: &[
        ColumnSpec::field("subreddit", Varchar),
        ColumnSpec::field("id", Varchar),
        ColumnSpec::transformed("name", Varchar, submission_fullname),
        ColumnSpec::field("created_utc", BigInt),
        ColumnSpec::field("author", Varchar),
        ColumnSpec::field("hidden", Boolean),
        ColumnSpec::field("is_self", Boolean),
        ColumnSpec::field("domain", Varchar),
        ColumnSpec::field("num_comments", BigInt),
        ColumnSpec::field("over_18", Boolean),
        ColumnSpec::field("score", BigInt),
        ColumnSpec::field("subreddit_id", Varchar),
        ColumnSpec::field("title", Varchar),
        ColumnSpec::field("url", Varchar),
        ColumnSpec::field("selftext", Varchar),
    ],
    indexes: &["subreddit", "author", "created_utc"],
};

static SUBMISSIONS_THIN: TableSchema = TableSchema {
    kind: RecordKind::Submissions,
    table: "submissions",
    thin: true,
    columns: &[
        ColumnSpec::field("subreddit", Varchar),
        ColumnSpec::field("id", Varchar),
        ColumnSpec::transformed("name", Varchar, submission_fullname),
        ColumnSpec::field("created_utc", BigInt),
        ColumnSpec::field("author", Varchar),
        ColumnSpec::field("num_comments", BigInt),
        ColumnSpec::field("score", BigInt),
        ColumnSpec::field("title", Varchar),
    ],
    indexes: &["subreddit", "author", "created_utc"],
};
