//! Run-wide counters and status reporting
//!
//! Every stage bumps the shared [`ProgressCounters`]; the Reader asks the
//! [`ProgressTracker`] for a status line at each batch watermark. An optional
//! `indicatif` bar mirrors the compressed-byte counter for interactive runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

/// Run-wide counters, monotonic for one run
#[derive(Debug, Default)]
pub struct ProgressCounters {
    bytes_processed: AtomicU64,
    lines_seen: AtomicU64,
    bad_lines: AtomicU64,
    batches_read: AtomicU64,
    batches_decoded: AtomicU64,
    batches_inserted: AtomicU64,
    rows_inserted: AtomicU64,
    files_completed: AtomicU64,
    files_failed: AtomicU64,
}

impl ProgressCounters {
    pub fn add_bytes(&self, n: u64) {
        self.bytes_processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_lines(&self, n: u64) {
        self.lines_seen.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bad_lines(&self, n: u64) {
        self.bad_lines.fetch_add(n, Ordering::Relaxed);
    }

    pub fn batch_read(&self) {
        self.batches_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_decoded(&self) {
        self.batches_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// One batch committed carrying `rows` rows
    pub fn batch_inserted(&self, rows: u64) {
        self.batches_inserted.fetch_add(1, Ordering::Relaxed);
        self.rows_inserted.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn file_completed(&self) {
        self.files_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
            lines_seen: self.lines_seen.load(Ordering::Relaxed),
            bad_lines: self.bad_lines.load(Ordering::Relaxed),
            batches_read: self.batches_read.load(Ordering::Relaxed),
            batches_decoded: self.batches_decoded.load(Ordering::Relaxed),
            batches_inserted: self.batches_inserted.load(Ordering::Relaxed),
            rows_inserted: self.rows_inserted.load(Ordering::Relaxed),
            files_completed: self.files_completed.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`ProgressCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub bytes_processed: u64,
    pub lines_seen: u64,
    pub bad_lines: u64,
    pub batches_read: u64,
    pub batches_decoded: u64,
    pub batches_inserted: u64,
    pub rows_inserted: u64,
    pub files_completed: u64,
    pub files_failed: u64,
}

impl ProgressSnapshot {
    /// Malformed lines as a percentage of lines seen
    pub fn bad_line_rate(&self) -> f64 {
        percent(self.bad_lines, self.lines_seen)
    }
}

/// Where one file's reader currently is
#[derive(Debug, Clone, Copy)]
pub struct FileProgress<'a> {
    pub name: &'a str,
    pub lines: u64,
    pub bad_lines: u64,
    pub bytes_read: u64,
    pub size: u64,
}

/// Aggregates counters and renders status lines
pub struct ProgressTracker {
    counters: ProgressCounters,
    bytes_total: u64,
    started: Instant,
    bar: ProgressBar,
}

impl ProgressTracker {
    /// Tracker with no visible output besides log lines
    pub fn new(bytes_total: u64) -> Self {
        Self {
            counters: ProgressCounters::default(),
            bytes_total,
            started: Instant::now(),
            bar: ProgressBar::hidden(),
        }
    }

    /// Tracker that also draws a byte progress bar on stderr
    pub fn with_bar(bytes_total: u64) -> Self {
        let bar = ProgressBar::new(bytes_total);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})",
        ) {
            bar.set_style(style.progress_chars("█▓▒░  "));
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            ..Self::new(bytes_total)
        }
    }

    pub fn counters(&self) -> &ProgressCounters {
        &self.counters
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.counters.snapshot()
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Render the status line for a reader watermark
    pub fn status_line(&self, file: &FileProgress<'_>, queue_depth: usize) -> String {
        let snap = self.snapshot();
        let secs = self.elapsed().as_secs_f64();
        format!(
            "{}: {} lines ({} bad) | file {:.1}% | total {:.1}% | bad {:.3}% | \
             batches/s read {:.2} decoded {:.2} inserted {:.2} | queue {}",
            file.name,
            format_number(file.lines),
            format_number(file.bad_lines),
            percent(file.bytes_read, file.size),
            percent(snap.bytes_processed, self.bytes_total),
            snap.bad_line_rate(),
            rate(snap.batches_read, secs),
            rate(snap.batches_decoded, secs),
            rate(snap.batches_inserted, secs),
            queue_depth,
        )
    }

    /// Log a status line and advance the bar
    pub fn report(&self, file: &FileProgress<'_>, queue_depth: usize) {
        let line = self.status_line(file, queue_depth);
        self.bar
            .set_position(self.counters.bytes_processed.load(Ordering::Relaxed));
        info!("{}", line);
    }

    /// Finish the bar with a closing message
    pub fn finish(&self, success: bool) {
        let snap = self.snapshot();
        let msg = format!(
            "{} rows from {} files in {}",
            format_number(snap.rows_inserted),
            format_number(snap.files_completed),
            format_duration(self.elapsed())
        );
        if success {
            self.bar.finish_with_message(format!("✓ {}", msg));
        } else {
            self.bar.abandon_with_message(format!("✗ {}", msg));
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn rate(count: u64, secs: f64) -> f64 {
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// Format a number with thousand separators
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Format a duration as `1h 02m 03s`, `2m 03s` or `1.50s`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}
