//! Output formatting for CLI

use crate::pipeline::{FileOutcome, LoadReport};
use crate::progress::{format_bytes, format_duration, format_number};

/// Human-readable run summary
pub fn format_report(report: &LoadReport) -> String {
    let c = &report.counters;
    let mut output = String::new();

    output.push_str(&format!("\nLoad {} ({}):\n", report.state, report.run_id));
    output.push_str(&format!(
        "  Files loaded:    {}\n",
        report.count(FileOutcome::Committed)
    ));
    output.push_str(&format!("  Files skipped:   {}\n", report.skipped));
    output.push_str(&format!("  Files failed:    {}\n", c.files_failed));
    output.push_str(&format!(
        "  Rows inserted:   {}\n",
        format_number(c.rows_inserted)
    ));
    output.push_str(&format!(
        "  Bad lines:       {} of {}\n",
        format_number(c.bad_lines),
        format_number(c.lines_seen)
    ));
    output.push_str(&format!(
        "  Bytes processed: {} of {}\n",
        format_bytes(c.bytes_processed),
        format_bytes(report.bytes_total)
    ));
    if report.indexes_built > 0 {
        output.push_str(&format!("  Indexes built:   {}\n", report.indexes_built));
    }
    output.push_str(&format!(
        "  Duration:        {}\n",
        format_duration(report.duration())
    ));

    let unfinished: Vec<_> = report
        .files
        .iter()
        .filter(|f| f.outcome != FileOutcome::Committed)
        .collect();
    if !unfinished.is_empty() {
        output.push_str(&format!(
            "\nNot registered ({}), re-run to retry:\n",
            unfinished.len()
        ));
        for file in unfinished.iter().take(10) {
            output.push_str(&format!("  - {} [{}]\n", file.file, file.outcome));
        }
        if unfinished.len() > 10 {
            output.push_str(&format!("  ... and {} more\n", unfinished.len() - 10));
        }
    }

    output
}
