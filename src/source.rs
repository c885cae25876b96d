//! Input discovery, classification and the resume filter

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::error::LoadError;

/// Kind of record a dump file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Comments,
    Submissions,
}

impl RecordKind {
    /// All kinds in scheduling order
    pub fn all() -> [RecordKind; 2] {
        [RecordKind::Comments, RecordKind::Submissions]
    }

    /// File name suffix identifying this kind
    pub fn suffix(&self) -> &'static str {
        match self {
            RecordKind::Comments => "comments",
            RecordKind::Submissions => "submissions",
        }
    }

    /// Infer the kind from a file name such as `AskReddit_comments.zst`
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let mut stem = lower.as_str();
        if let Some(s) = stem.strip_suffix(".zst") {
            stem = s;
        }
        for ext in [".ndjson", ".jsonl", ".json"] {
            if let Some(s) = stem.strip_suffix(ext) {
                stem = s;
                break;
            }
        }
        RecordKind::all()
            .into_iter()
            .find(|kind| stem.ends_with(kind.suffix()))
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "comments" | "comment" | "rc" => Ok(RecordKind::Comments),
            "submissions" | "submission" | "rs" => Ok(RecordKind::Submissions),
            _ => Err(format!(
                "Invalid record kind: {}. Expected: comments, submissions",
                s
            )),
        }
    }
}

/// A classified input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path as discovered
    pub path: PathBuf,
    /// Registry key (canonical path)
    pub key: String,
    /// Size on disk in bytes
    pub size: u64,
    pub kind: RecordKind,
    pub codec: Codec,
}

impl SourceFile {
    /// Classify a single path
    pub fn classify(
        path: PathBuf,
        size: u64,
        kind_override: Option<RecordKind>,
    ) -> Result<Self, LoadError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let kind = match (RecordKind::from_file_name(&name), kind_override) {
            (Some(found), Some(expected)) if found != expected => {
                return Err(LoadError::KindMismatch {
                    path,
                    expected,
                    found,
                });
            }
            (Some(found), _) => found,
            (None, Some(expected)) => expected,
            (None, None) => return Err(LoadError::Classification { path }),
        };

        Ok(Self {
            key: registry_key(&path),
            codec: Codec::for_path(&path),
            path,
            size,
            kind,
        })
    }
}

/// Canonical path string used as the registry key.
///
/// Resolves `..` and symlinks so every spelling of one file shares a key;
/// paths that cannot be canonicalized fall back to the absolute form.
pub fn registry_key(path: &Path) -> String {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Expand glob patterns (or literal paths) into files
pub fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();

    for pattern in patterns {
        let entries = glob::glob(pattern)
            .map_err(|e| LoadError::InvalidPattern(format!("{}: {}", pattern, e)))?;

        let before = files.len();
        for entry in entries {
            match entry {
                Ok(path) => {
                    if path.is_file() {
                        files.push(path);
                    }
                }
                Err(e) => {
                    // Log but continue
                    warn!("Error accessing path: {}", e);
                }
            }
        }
        if files.len() == before {
            warn!(pattern = %pattern, "Pattern matched no files");
        }
    }

    Ok(files)
}

/// Classify paths, collecting sizes in parallel.
///
/// Fails on the first path (in input order) that cannot be classified.
/// Paths listed more than once are kept once.
pub fn classify_all(
    paths: Vec<PathBuf>,
    kind_override: Option<RecordKind>,
) -> Result<Vec<SourceFile>, LoadError> {
    let sized: Vec<(PathBuf, u64)> = paths
        .into_par_iter()
        .map(|path| {
            let size = match fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot stat input");
                    0
                }
            };
            (path, size)
        })
        .collect();

    let mut seen = HashSet::new();
    let mut files = Vec::with_capacity(sized.len());
    for (path, size) in sized {
        let file = SourceFile::classify(path, size, kind_override)?;
        if seen.insert(file.key.clone()) {
            files.push(file);
        } else {
            debug!(file = %file.key, "Duplicate input ignored");
        }
    }
    Ok(files)
}

/// Files left to load after the resume filter, in processing order
#[derive(Debug, Clone, Default)]
pub struct SourcePlan {
    pub files: Vec<SourceFile>,
    /// Registry keys of inputs that were already loaded
    pub skipped: Vec<String>,
}

impl SourcePlan {
    /// Drop already-loaded files and order the rest: kinds in
    /// [`RecordKind::all`] order, largest file first within a kind
    pub fn new(files: Vec<SourceFile>, loaded: &HashSet<String>) -> Self {
        let (skipped, mut files): (Vec<_>, Vec<_>) =
            files.into_iter().partition(|f| loaded.contains(&f.key));

        files.sort_by(|a, b| {
            a.kind
                .cmp(&b.kind)
                .then(b.size.cmp(&a.size))
                .then_with(|| a.key.cmp(&b.key))
        });

        let skipped: Vec<String> = skipped.into_iter().map(|f| f.key).collect();
        info!(
            to_load = files.len(),
            already_loaded = skipped.len(),
            "Resume filter applied"
        );

        Self { files, skipped }
    }

    /// Total compressed bytes to read
    pub fn bytes_total(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Kinds present in the plan
    pub fn kinds(&self) -> Vec<RecordKind> {
        let mut kinds: Vec<RecordKind> = self.files.iter().map(|f| f.kind).collect();
        kinds.dedup();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
