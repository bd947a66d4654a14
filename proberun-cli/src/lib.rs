//! Support library for the proberun CLI binary.
//!
//! Re-exports the CLI and logging modules so tests can drive the command
//! pipeline without forking a subprocess.

pub mod cli;
pub mod logging;
