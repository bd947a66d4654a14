//! Command implementations and argument parsing for the proberun CLI.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use proberun_backend_reference::{ReferenceBackend, ReferenceBackendError};
use proberun_core::{
    AmendJob, AmendSummary, Backend, ClusterOutcome, DetectJob, DetectSummary, EnrollJob,
    EnrollSummary, GallerySummary, Harness, HarnessBuilder, HarnessError, Metrics,
    MetricsCollector, Role, SearchJob, SearchSummary, VerifyJob, VerifySummary,
};
use thiserror::Error;
use tracing::{Span, field, info, instrument};

const DEFAULT_SEARCH_DEPTH: usize = 50;
const DEFAULT_MIN_FACE_SIZE: u32 = 40;
const DEFAULT_CLUSTER_HINT: u64 = 10;

/// Top-level CLI options parsed by [`clap`].
#[derive(Debug, Parser, Clone)]
#[command(name = "proberun", about = "Evaluate a face recognition backend.")]
pub struct Cli {
    /// Backend to evaluate.
    #[arg(long, value_enum, default_value_t = BackendKind::Reference, global = true)]
    pub backend: BackendKind,

    /// Print per-operation timings and error counts after the run.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Harness configuration.
    #[command(flatten)]
    pub harness: HarnessArgs,

    /// Command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Harness parameters shared by every command.
#[derive(Debug, Args, Clone)]
pub struct HarnessArgs {
    /// Number of candidates written per probe.
    #[arg(long = "search-depth", default_value_t = DEFAULT_SEARCH_DEPTH, global = true)]
    pub search_depth: usize,

    /// Smallest face, in pixels, the detector should report.
    #[arg(long = "min-face-size", default_value_t = DEFAULT_MIN_FACE_SIZE, global = true)]
    pub min_face_size: u32,

    /// Upper bound on the number of identities, as a power of ten.
    #[arg(long = "cluster-hint", default_value_t = DEFAULT_CLUSTER_HINT, global = true)]
    pub cluster_hint: u64,

    /// Directory prepended to every media filename.
    #[arg(long = "data-root", global = true)]
    pub data_root: Option<PathBuf>,

    /// Similarity at which the reference backend merges clusters.
    #[arg(long = "cluster-threshold", global = true)]
    pub cluster_threshold: Option<f32>,
}

impl Default for HarnessArgs {
    fn default() -> Self {
        Self {
            search_depth: DEFAULT_SEARCH_DEPTH,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            cluster_hint: DEFAULT_CLUSTER_HINT,
            data_root: None,
            cluster_threshold: None,
        }
    }
}

/// Supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Deterministic pixel-feature backend.
    Reference,
}

/// Template roles accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    /// Reference side of 1:1 verification.
    Enrollment,
    /// Probe side of 1:1 verification.
    Verification,
    /// Gallery side of 1:N search.
    Gallery,
    /// Probe side of 1:N search.
    Identification,
    /// Input to template clustering.
    Clustering,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Enrollment => Self::Enrollment,
            RoleArg::Verification => Self::Verification,
            RoleArg::Gallery => Self::Gallery,
            RoleArg::Identification => Self::Identification,
            RoleArg::Clustering => Self::Clustering,
        }
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Detect faces in every listed media file.
    Detect(DetectArgs),
    /// Enroll metadata records into templates and a manifest.
    Enroll(EnrollArgs),
    /// Build a prepared gallery from a template manifest.
    Gallery(GalleryArgs),
    /// Insert into or remove from a stored gallery.
    Amend(AmendArgs),
    /// Search every probe against a gallery.
    Search(SearchArgs),
    /// Score template pairs 1:1.
    Verify(VerifyArgs),
    /// Cluster templates or raw media.
    Cluster(ClusterArgs),
}

impl Command {
    const fn label(&self) -> &'static str {
        match self {
            Self::Detect(_) => "detect",
            Self::Enroll(_) => "enroll",
            Self::Gallery(_) => "gallery",
            Self::Amend(_) => "amend",
            Self::Search(_) => "search",
            Self::Verify(_) => "verify",
            Self::Cluster(ClusterArgs {
                mode: ClusterCommand::Templates(_),
            }) => "cluster-templates",
            Self::Cluster(ClusterArgs {
                mode: ClusterCommand::Media(_),
            }) => "cluster-media",
        }
    }
}

/// Arguments for `detect`.
#[derive(Debug, Args, Clone)]
pub struct DetectArgs {
    /// Media list, one filename per line.
    pub media_list: PathBuf,
    /// Detection CSV to write.
    pub output: PathBuf,
}

/// Arguments for `enroll`.
#[derive(Debug, Args, Clone)]
pub struct EnrollArgs {
    /// Metadata CSV to enroll.
    pub metadata: PathBuf,
    /// Directory receiving one file per template.
    pub templates_dir: PathBuf,
    /// Manifest CSV to write.
    pub manifest: PathBuf,
    /// Intended use of the templates.
    #[arg(long, value_enum, default_value_t = RoleArg::Enrollment)]
    pub role: RoleArg,
}

/// Arguments for `gallery`.
#[derive(Debug, Args, Clone)]
pub struct GalleryArgs {
    /// Manifest of gallery templates.
    pub manifest: PathBuf,
    /// Serialized gallery to write.
    pub output: PathBuf,
}

/// Arguments for `amend`.
#[derive(Debug, Args, Clone)]
pub struct AmendArgs {
    /// Serialized gallery to amend.
    pub gallery: PathBuf,
    /// Amended gallery to write.
    pub output: PathBuf,
    /// Manifest of templates to insert.
    #[arg(long)]
    pub insert: Option<PathBuf>,
    /// Template ids to remove.
    #[arg(long, value_delimiter = ',')]
    pub remove: Vec<u64>,
}

/// Arguments for `search`.
#[derive(Debug, Args, Clone)]
pub struct SearchArgs {
    /// Manifest of probe templates.
    pub probes: PathBuf,
    /// Manifest the gallery was built from.
    pub gallery_manifest: PathBuf,
    /// Serialized gallery.
    pub gallery: PathBuf,
    /// Candidate list CSV to write.
    pub output: PathBuf,
}

/// Arguments for `verify`.
#[derive(Debug, Args, Clone)]
pub struct VerifyArgs {
    /// Manifest naming every template referenced by the pairs.
    pub manifest: PathBuf,
    /// `PROBE_ID,REFERENCE_ID` pairs CSV.
    pub pairs: PathBuf,
    /// Score CSV to write.
    pub output: PathBuf,
}

/// Arguments for `cluster`.
#[derive(Debug, Args, Clone)]
pub struct ClusterArgs {
    /// What to cluster.
    #[command(subcommand)]
    pub mode: ClusterCommand,
}

/// Clustering modes.
#[derive(Debug, Subcommand, Clone)]
pub enum ClusterCommand {
    /// Cluster enrolled templates listed in a manifest.
    Templates(ClusterTemplatesArgs),
    /// Detect and cluster faces straight from media.
    Media(ClusterMediaArgs),
}

/// Arguments for `cluster templates`.
#[derive(Debug, Args, Clone)]
pub struct ClusterTemplatesArgs {
    /// Manifest of clustering templates.
    pub manifest: PathBuf,
    /// Assignment CSV to write.
    pub output: PathBuf,
}

/// Arguments for `cluster media`.
#[derive(Debug, Args, Clone)]
pub struct ClusterMediaArgs {
    /// Media list, one filename per line.
    pub media_list: PathBuf,
    /// Assignment CSV to write.
    pub output: PathBuf,
}

/// Errors surfaced while executing CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The backend rejected its configuration.
    #[error(transparent)]
    Reference(#[from] ReferenceBackendError),
    /// Core orchestration failed.
    #[error(transparent)]
    Core(#[from] HarnessError),
}

impl CliError {
    /// Stable harness and backend codes for failure logs.
    ///
    /// Backend configuration errors carry neither code.
    #[must_use]
    pub fn codes(&self) -> (Option<&'static str>, Option<&'static str>) {
        match self {
            Self::Core(core) => (
                Some(core.code().as_str()),
                core.backend_code().map(|code| code.as_str()),
            ),
            Self::Reference(_) => (None, None),
        }
    }
}

/// Result of the orchestrator a command ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Detection counts.
    Detect(DetectSummary),
    /// Enrollment counts.
    Enroll(EnrollSummary),
    /// Gallery size.
    Gallery(GallerySummary),
    /// Amendment counts.
    Amend(AmendSummary),
    /// Search counts.
    Search(SearchSummary),
    /// Verification counts.
    Verify(VerifySummary),
    /// Clustering result.
    Cluster(ClusterOutcome),
}

/// Summarises the outcome of executing a CLI command.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSummary {
    /// Name reported by the backend.
    pub backend: String,
    /// Orchestrator result.
    pub outcome: Outcome,
    /// Timings and error counts, present when `--verbose` was given.
    pub metrics: Option<Metrics>,
}

/// Executes the CLI command represented by `cli`.
///
/// # Errors
/// Returns [`CliError`] when the configuration is invalid or the orchestrator
/// hits a fatal error.
///
/// # Examples
/// ```
/// # use std::error::Error;
/// # use proberun_cli::cli::{Cli, Outcome, run_cli};
/// # use std::ffi::OsStr;
/// # use clap::Parser;
/// # use tempfile::TempDir;
/// #
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let dir = TempDir::new()?;
/// let list = dir.path().join("media.txt");
/// std::fs::write(&list, "FILENAME\n")?;
/// let out = dir.path().join("faces.csv");
/// let cli = Cli::try_parse_from([
///     OsStr::new("proberun"),
///     OsStr::new("detect"),
///     list.as_os_str(),
///     out.as_os_str(),
/// ])?;
/// let summary = run_cli(cli)?;
/// assert!(matches!(summary.outcome, Outcome::Detect(d) if d.media == 0));
/// # Ok(())
/// # }
/// ```
#[instrument(
    name = "cli.run",
    err,
    skip(cli),
    fields(command = field::Empty, backend = field::Empty),
)]
pub fn run_cli(cli: Cli) -> Result<ExecutionSummary, CliError> {
    let span = Span::current();
    span.record("command", field::display(cli.command.label()));
    let harness = build_harness(&cli.harness)?;
    match cli.backend {
        BackendKind::Reference => {
            span.record("backend", field::display("reference"));
            let backend = match cli.harness.cluster_threshold {
                Some(threshold) => ReferenceBackend::with_threshold(threshold)?,
                None => ReferenceBackend::new(),
            };
            run_command(&harness, &backend, cli.command, cli.verbose)
        }
    }
}

pub(super) fn build_harness(args: &HarnessArgs) -> Result<Harness, CliError> {
    let mut builder = HarnessBuilder::new()
        .with_search_depth(args.search_depth)
        .with_min_face_size(args.min_face_size)
        .with_cluster_hint(args.cluster_hint);
    if let Some(root) = &args.data_root {
        builder = builder.with_data_root(root);
    }
    Ok(builder.build()?)
}

#[instrument(
    name = "cli.execute",
    err,
    skip(harness, backend, command),
    fields(backend = %backend.name(), command = command.label()),
)]
pub(super) fn run_command<B: Backend>(
    harness: &Harness,
    backend: &B,
    command: Command,
    verbose: bool,
) -> Result<ExecutionSummary, CliError> {
    let mut metrics = MetricsCollector::new();
    let outcome = dispatch(harness, backend, &mut metrics, command)?;
    info!(outcome = ?outcome, "command completed");
    Ok(ExecutionSummary {
        backend: backend.name().to_owned(),
        outcome,
        metrics: verbose.then(|| metrics.drain()),
    })
}

fn dispatch<B: Backend>(
    harness: &Harness,
    backend: &B,
    metrics: &mut MetricsCollector,
    command: Command,
) -> Result<Outcome, HarnessError> {
    Ok(match command {
        Command::Detect(args) => Outcome::Detect(harness.detect(
            backend,
            metrics,
            &DetectJob {
                media_list: args.media_list,
                output: args.output,
            },
        )?),
        Command::Enroll(args) => Outcome::Enroll(harness.enroll(
            backend,
            metrics,
            &EnrollJob {
                metadata: args.metadata,
                templates_dir: args.templates_dir,
                manifest: args.manifest,
                role: args.role.into(),
            },
        )?),
        Command::Gallery(args) => Outcome::Gallery(harness.build_gallery(
            backend,
            metrics,
            &args.manifest,
            &args.output,
        )?),
        Command::Amend(args) => Outcome::Amend(harness.amend_gallery(
            backend,
            metrics,
            &AmendJob {
                gallery: args.gallery,
                insert: args.insert,
                remove: args.remove,
                output: args.output,
            },
        )?),
        Command::Search(args) => Outcome::Search(harness.search(
            backend,
            metrics,
            &SearchJob {
                probes: args.probes,
                gallery_manifest: args.gallery_manifest,
                gallery: args.gallery,
                output: args.output,
            },
        )?),
        Command::Verify(args) => Outcome::Verify(harness.verify(
            backend,
            metrics,
            &VerifyJob {
                manifest: args.manifest,
                pairs: args.pairs,
                output: args.output,
            },
        )?),
        Command::Cluster(ClusterArgs {
            mode: ClusterCommand::Templates(args),
        }) => Outcome::Cluster(
            harness.cluster_templates(backend, metrics, &args.manifest, &args.output)?,
        ),
        Command::Cluster(ClusterArgs {
            mode: ClusterCommand::Media(args),
        }) => Outcome::Cluster(
            harness.cluster_media(backend, metrics, &args.media_list, &args.output)?,
        ),
    })
}

/// Renders `summary` to `writer` in a human-readable text format.
///
/// # Errors
/// Returns [`io::Error`] if writing to the supplied writer fails.
///
/// # Examples
/// ```
/// # use std::error::Error;
/// # use proberun_cli::cli::{ExecutionSummary, Outcome, render_summary};
/// # use proberun_core::VerifySummary;
/// #
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let summary = ExecutionSummary {
///     backend: "reference".into(),
///     outcome: Outcome::Verify(VerifySummary { pairs: 4, failed: 1 }),
///     metrics: None,
/// };
/// let mut buffer = Vec::new();
/// render_summary(&summary, &mut buffer)?;
/// assert_eq!(String::from_utf8(buffer)?, "backend: reference\nverified 4 pairs (1 failed)\n");
/// # Ok(())
/// # }
/// ```
pub fn render_summary(summary: &ExecutionSummary, mut writer: impl Write) -> io::Result<()> {
    writeln!(writer, "backend: {}", summary.backend)?;
    match summary.outcome {
        Outcome::Detect(s) => writeln!(
            writer,
            "detected {} faces in {} media ({} failed)",
            s.faces, s.media, s.failed
        )?,
        Outcome::Enroll(s) => writeln!(
            writer,
            "enrolled {} of {} records ({} failed)",
            s.enrolled, s.records, s.failed
        )?,
        Outcome::Gallery(s) => writeln!(writer, "gallery holds {} templates", s.templates)?,
        Outcome::Amend(s) => writeln!(
            writer,
            "inserted {} and removed {} templates",
            s.inserted, s.removed
        )?,
        Outcome::Search(s) => writeln!(
            writer,
            "searched {} probes, wrote {} candidates ({} failed)",
            s.probes, s.rows, s.failed
        )?,
        Outcome::Verify(s) => {
            writeln!(writer, "verified {} pairs ({} failed)", s.pairs, s.failed)?;
        }
        Outcome::Cluster(ClusterOutcome::Completed { items, rows }) => {
            writeln!(writer, "clustered {items} items into {rows} rows")?;
        }
        Outcome::Cluster(ClusterOutcome::NotImplemented) => {
            writeln!(writer, "clustering is not implemented by this backend")?;
        }
    }
    if let Some(metrics) = &summary.metrics {
        metrics.render(&mut writer)?;
    }
    Ok(())
}
