//! `proberun` binary.
//!
//! Runs one harness command against the backend named by `--backend`, prints
//! the outcome line (and the metrics table under `--verbose`), and exits
//! non-zero on fatal errors. Failures are logged with their stable harness
//! and backend codes so scripted evaluations can classify them.

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use proberun_cli::{
    cli::{Cli, CliError, render_summary, run_cli},
    logging::{self, LoggingError},
};
use tracing::error;

/// Runs the parsed command and writes its summary to stdout.
///
/// Per-item failures are tallied inside the summary; only fatal errors from
/// the orchestrator or the backend configuration reach the caller.
fn run_and_report() -> Result<()> {
    let summary = run_cli(Cli::parse()).context("failed to execute command")?;
    let mut out = BufWriter::new(io::stdout().lock());
    render_summary(&summary, &mut out).context("failed to render summary")?;
    out.flush().context("failed to flush summary")
}

fn main() -> ExitCode {
    if let Err(err) = logging::init_logging() {
        report_logging_init_error(&err);
        return ExitCode::FAILURE;
    }

    let Err(err) = run_and_report() else {
        return ExitCode::SUCCESS;
    };
    let (code, backend_code) = err
        .downcast_ref::<CliError>()
        .map_or((None, None), CliError::codes);
    error!(
        error = format!("{err:#}"),
        code,
        backend_code,
        "command execution failed"
    );
    ExitCode::FAILURE
}

#[expect(
    clippy::print_stderr,
    reason = "logging is not available to report its own failure"
)]
fn report_logging_init_error(err: &LoggingError) {
    eprintln!("failed to initialize logging: {err}");
}
