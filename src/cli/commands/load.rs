//! The load command

use tracing::info;

use crate::cli::args::Cli;
use crate::cli::output::format_report;
use crate::error::LoadError;
use crate::pipeline::{LoadReport, Pipeline};
use crate::store::DuckDbStore;

/// Handle a load (or index-only) invocation and print the summary
pub fn handle_load(cli: &Cli, invocation: Vec<String>) -> Result<LoadReport, LoadError> {
    let config = cli.to_config()?;
    let mut pipeline = Pipeline::new(config)?.with_invocation(invocation);

    let mut store = DuckDbStore::open(&pipeline.config().database)?;
    info!(
        database = %pipeline.config().database.display(),
        run_id = %pipeline.run_id(),
        "Opened database"
    );

    let report = pipeline.run(&mut store)?;
    println!("{}", format_report(&report));
    Ok(report)
}
