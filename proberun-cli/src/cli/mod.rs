//! Command-line interface for the proberun evaluation harness.
//!
//! One subcommand per orchestrator. Every command runs against the backend
//! chosen with `--backend` and reports a one-line summary, followed by the
//! metrics table when `--verbose` is given.

mod commands;

pub use commands::{
    AmendArgs, BackendKind, Cli, CliError, ClusterArgs, ClusterCommand, ClusterMediaArgs,
    ClusterTemplatesArgs, Command, DetectArgs, EnrollArgs, ExecutionSummary, GalleryArgs,
    HarnessArgs, Outcome, RoleArg, SearchArgs, VerifyArgs, render_summary, run_cli,
};

#[cfg(test)]
mod tests;
