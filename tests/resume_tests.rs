//! Resume and failure-atomicity tests

mod common;

use common::*;
use dumpload::{Destination, DuckDbStore, FileOutcome, LoadError, Pipeline, PipelineState};
use tempfile::TempDir;

#[test]
fn test_rerun_inserts_nothing() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("reddit.duckdb");
    let a = write_zst(dir.path(), "a_comments.zst", &comments("a", 7));
    let b = write_zst(dir.path(), "b_submissions.zst", &submissions("b", 4));

    {
        let mut store = DuckDbStore::open(&db).unwrap();
        let report = Pipeline::new(config(&[&a, &b]))
            .unwrap()
            .run(&mut store)
            .unwrap();
        assert_eq!(report.counters.rows_inserted, 11);
    }

    let mut store = DuckDbStore::open(&db).unwrap();
    let report = Pipeline::new(config(&[&a, &b]))
        .unwrap()
        .run(&mut store)
        .unwrap();

    assert_eq!(report.state, PipelineState::Done);
    assert_eq!(report.counters.rows_inserted, 0);
    assert_eq!(report.skipped, 2);
    assert!(report.files.is_empty());
    assert_eq!(store.row_count("comments").unwrap(), 7);
    assert_eq!(store.row_count("submissions").unwrap(), 4);
}

#[test]
fn test_interrupted_run_processes_only_remaining_files() {
    let dir = TempDir::new().unwrap();
    let a = write_zst(dir.path(), "a_comments.zst", &comments("a", 5));
    let b = write_zst(dir.path(), "b_comments.zst", &comments("b", 3));

    // First run got as far as registering A
    let mut store = memory_store();
    Pipeline::new(config(&[&a]))
        .unwrap()
        .run(&mut store)
        .unwrap();

    let report = Pipeline::new(config(&[&a, &b]))
        .unwrap()
        .run(&mut store)
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].file, path_str(&b));
    assert_eq!(report.counters.rows_inserted, 3);
    assert_eq!(store.row_count("comments").unwrap(), 8);
    assert_eq!(store.loaded_entries().unwrap().len(), 2);
}

#[test]
fn test_commit_failure_leaves_file_unregistered() {
    let dir = TempDir::new().unwrap();
    let a = write_zst(dir.path(), "a_comments.zst", &comments("a", 200));
    let b = write_zst(dir.path(), "b_comments.zst", &comments("b", 3));

    // One reader and decoder so A (larger) is committed entirely before B
    let mut store = FlakyStore::new(&b);
    let cfg = config(&[&a, &b]).with_readers(1).with_decoders(1);
    let mut pipeline = Pipeline::new(cfg).unwrap();
    let err = pipeline.run(&mut store).unwrap_err();

    assert!(matches!(err, LoadError::Storage(_)));
    assert_eq!(pipeline.state(), PipelineState::Failed);

    let loaded = store.loaded_files().unwrap();
    assert!(loaded.contains(&path_str(&a)));
    assert!(!loaded.contains(&path_str(&b)));
    assert_eq!(store.inner.row_count("comments").unwrap(), 200 + 2);

    let outcomes: Vec<_> = pipeline
        .file_reports()
        .into_iter()
        .map(|f| (f.file, f.outcome))
        .collect();
    assert!(outcomes.contains(&(path_str(&a), FileOutcome::Committed)));
    assert!(outcomes.contains(&(path_str(&b), FileOutcome::Incomplete)));
}

#[test]
fn test_retry_after_commit_failure_completes_file() {
    let dir = TempDir::new().unwrap();
    let a = write_zst(dir.path(), "a_comments.zst", &comments("a", 4));

    let mut flaky = FlakyStore::new(&a);
    let err = Pipeline::new(config(&[&a]))
        .unwrap()
        .run(&mut flaky)
        .unwrap_err();
    assert!(matches!(err, LoadError::Storage(_)));
    assert!(flaky.loaded_files().unwrap().is_empty());

    // Same database, healthy this time
    let mut store = flaky.inner;
    let report = Pipeline::new(config(&[&a]))
        .unwrap()
        .run(&mut store)
        .unwrap();
    assert_eq!(report.count(FileOutcome::Committed), 1);
    assert!(store.loaded_files().unwrap().contains(&path_str(&a)));
}

#[test]
fn test_failure_mid_file_leaves_it_unregistered() {
    let dir = TempDir::new().unwrap();
    let a = write_zst(dir.path(), "a_comments.zst", &comments("a", 10));

    // Batches of 2: five full batches plus the final one; the third fails
    let mut flaky = FlakyStore::failing_commit(2);
    let cfg = config(&[&a]).with_readers(1).with_decoders(1);
    let mut pipeline = Pipeline::new(cfg).unwrap();
    let err = pipeline.run(&mut flaky).unwrap_err();

    assert!(matches!(err, LoadError::Storage(_)));
    assert_eq!(flaky.commits, 2);
    assert!(flaky.loaded_files().unwrap().is_empty());
    assert_eq!(flaky.inner.row_count("comments").unwrap(), 4);
    assert_eq!(pipeline.file_reports()[0].outcome, FileOutcome::Incomplete);

    // Retry reloads the whole file; the committed prefix is duplicated
    let mut store = flaky.inner;
    let report = Pipeline::new(config(&[&a]))
        .unwrap()
        .run(&mut store)
        .unwrap();
    assert_eq!(report.count(FileOutcome::Committed), 1);
    assert!(store.loaded_files().unwrap().contains(&path_str(&a)));
    assert_eq!(store.row_count("comments").unwrap(), 4 + 10);
}

#[test]
fn test_same_file_through_two_spellings_loads_once() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("e")).unwrap();
    let a = write_zst(dir.path(), "d/a_comments.zst", &comments("a", 3));
    let dotted = dir.path().join("e/../d/a_comments.zst");

    let mut store = memory_store();
    let report = Pipeline::new(config(&[&a, &dotted]))
        .unwrap()
        .run(&mut store)
        .unwrap();

    assert_eq!(report.files.len(), 1);
    assert_eq!(store.row_count("comments").unwrap(), 3);
    assert_eq!(store.loaded_files().unwrap().len(), 1);

    // A later run through the other spelling resumes instead of reloading
    let report = Pipeline::new(config(&[&dotted]))
        .unwrap()
        .run(&mut store)
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(store.row_count("comments").unwrap(), 3);
}

#[cfg(unix)]
#[test]
fn test_symlinked_directory_resumes() {
    let dir = TempDir::new().unwrap();
    let a = write_zst(dir.path(), "dumps/a_comments.zst", &comments("a", 2));
    let link = dir.path().join("scratch");
    std::os::unix::fs::symlink(dir.path().join("dumps"), &link).unwrap();

    let mut store = memory_store();
    Pipeline::new(config(&[&a]))
        .unwrap()
        .run(&mut store)
        .unwrap();

    let report = Pipeline::new(config(&[&link.join("a_comments.zst")]))
        .unwrap()
        .run(&mut store)
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.counters.rows_inserted, 0);
}

#[test]
fn test_duplicate_inputs_load_once() {
    let dir = TempDir::new().unwrap();
    let a = write_zst(dir.path(), "a_comments.zst", &comments("a", 3));
    let pattern = format!("{}/*_comments.zst", dir.path().display());

    let mut store = memory_store();
    let cfg = config(&[&a]).with_inputs([path_str(&a), pattern]);
    let report = Pipeline::new(cfg).unwrap().run(&mut store).unwrap();

    assert_eq!(report.files.len(), 1);
    assert_eq!(store.row_count("comments").unwrap(), 3);
}
