//! Unit tests for argument parsing, command dispatch and summary rendering.

use super::commands::{build_harness, run_command};
use super::{
    BackendKind, Cli, CliError, ClusterArgs, ClusterCommand, ClusterMediaArgs, Command,
    DetectArgs, EnrollArgs, ExecutionSummary, HarnessArgs, Outcome, RoleArg, render_summary,
    run_cli,
};

use clap::Parser;
use proberun_backend_reference::ReferenceBackend;
use proberun_backend_reference::ReferenceBackendError;
use proberun_core::{
    BackendError, Category, ClusterOutcome, EnrollSummary, HarnessError, MetricsCollector,
    SearchSummary, VerifySummary,
};
use proberun_test_support::{
    fixtures::{MetadataRow, temp_dir, write_face, write_file, write_metadata},
    tracing::RecordingLayer,
};
use rstest::rstest;
use tracing::Level;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn cli(command: Command) -> Cli {
    Cli {
        backend: BackendKind::Reference,
        verbose: false,
        harness: HarnessArgs::default(),
        command,
    }
}

fn run_cli_expecting_error(cli: Cli, panic_msg: &str) -> CliError {
    match run_cli(cli) {
        Ok(_) => panic!("{panic_msg}"),
        Err(err) => err,
    }
}

#[rstest]
fn clap_parses_nested_cluster_commands() -> TestResult {
    let cli = Cli::try_parse_from([
        "proberun",
        "cluster",
        "templates",
        "manifest.csv",
        "clusters.csv",
        "--cluster-hint",
        "100",
    ])?;
    assert_eq!(cli.harness.cluster_hint, 100);
    assert!(matches!(
        cli.command,
        Command::Cluster(ClusterArgs {
            mode: ClusterCommand::Templates(_)
        })
    ));
    Ok(())
}

#[rstest]
fn clap_splits_removed_ids() -> TestResult {
    let cli = Cli::try_parse_from([
        "proberun",
        "amend",
        "in.gallery",
        "out.gallery",
        "--remove",
        "3,5",
        "--remove",
        "8",
    ])?;
    match cli.command {
        Command::Amend(args) => {
            assert_eq!(args.remove, [3, 5, 8]);
            assert!(args.insert.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }
    Ok(())
}

#[rstest]
#[case::unknown_backend(&["proberun", "--backend", "vendor", "detect", "a", "b"])]
#[case::unknown_role(&["proberun", "enroll", "m.csv", "t", "o.csv", "--role", "probe"])]
#[case::missing_mode(&["proberun", "cluster"])]
fn clap_rejects_invalid_arguments(#[case] args: &[&str]) {
    assert!(Cli::try_parse_from(args).is_err());
}

#[rstest]
fn zero_search_depth_is_rejected() {
    let args = HarnessArgs {
        search_depth: 0,
        ..HarnessArgs::default()
    };
    assert!(matches!(
        build_harness(&args),
        Err(CliError::Core(HarnessError::InvalidSearchDepth { got: 0 }))
    ));
}

#[rstest]
fn out_of_range_threshold_is_rejected() {
    let mut cli = cli(Command::Detect(DetectArgs {
        media_list: "media.txt".into(),
        output: "faces.csv".into(),
    }));
    cli.harness.cluster_threshold = Some(2.0);
    let err = run_cli_expecting_error(cli, "threshold above one must fail");
    assert!(matches!(err, CliError::Reference(_)));
}

#[rstest]
fn missing_metadata_surfaces_core_error() {
    let dir = temp_dir();
    let err = run_cli_expecting_error(
        cli(Command::Enroll(EnrollArgs {
            metadata: dir.path().join("absent.csv"),
            templates_dir: dir.path().to_path_buf(),
            manifest: dir.path().join("manifest.csv"),
            role: RoleArg::Enrollment,
        })),
        "absent metadata must fail",
    );
    assert!(matches!(err, CliError::Core(HarnessError::Io { .. })));
}

#[rstest]
#[case::backend(
    CliError::Core(HarnessError::Deserialize {
        path: "gallery.bin".into(),
        error: BackendError::Corrupt { reason: "short read".into() },
    }),
    (Some("PROBERUN_DESERIALIZE"), Some("BACKEND_CORRUPT"))
)]
#[case::harness_only(
    CliError::Core(HarnessError::InvalidSearchDepth { got: 0 }),
    (Some("PROBERUN_INVALID_SEARCH_DEPTH"), None)
)]
#[case::configuration(
    CliError::Reference(ReferenceBackendError::InvalidThreshold { got: 2.0 }),
    (None, None)
)]
fn failure_codes_follow_the_error_source(
    #[case] error: CliError,
    #[case] expected: (Option<&str>, Option<&str>),
) {
    assert_eq!(error.codes(), expected);
}

#[rstest]
fn verbose_enrollment_reports_metrics() -> TestResult {
    let dir = temp_dir();
    let root = dir.path();
    write_face(root, "face.png", 32, 2)?;
    let metadata = write_metadata(
        root,
        "meta.csv",
        &[MetadataRow::new(1, 9, "face.png"), MetadataRow::new(2, 9, "absent.png")],
    )?;
    let mut cli = cli(Command::Enroll(EnrollArgs {
        metadata,
        templates_dir: root.to_path_buf(),
        manifest: root.join("manifest.csv"),
        role: RoleArg::Gallery,
    }));
    cli.verbose = true;
    cli.harness.data_root = Some(root.to_path_buf());

    let summary = run_cli(cli)?;

    assert_eq!(summary.backend, "reference");
    assert_eq!(
        summary.outcome,
        Outcome::Enroll(EnrollSummary {
            records: 2,
            enrolled: 1,
            failed: 1,
        })
    );
    let metrics = summary.metrics.ok_or("verbose runs carry metrics")?;
    assert_eq!(metrics.errors().other, 1);
    assert!(root.join("1.template").exists());
    Ok(())
}

#[rstest]
fn execute_span_records_backend_and_command() -> TestResult {
    let dir = temp_dir();
    let root = dir.path();
    write_face(root, "a.png", 24, 1)?;
    write_face(root, "b.png", 24, 1)?;
    let list = write_file(root, "media.txt", "FILENAME\na.png\nb.png\n")?;
    let harness = build_harness(&HarnessArgs {
        data_root: Some(root.to_path_buf()),
        ..HarnessArgs::default()
    })?;
    let command = Command::Cluster(ClusterArgs {
        mode: ClusterCommand::Media(ClusterMediaArgs {
            media_list: list,
            output: root.join("clusters.csv"),
        }),
    });

    let (summary, layer) = RecordingLayer::capture(|| {
        run_command(&harness, &ReferenceBackend::new(), command, false)
    });
    let summary = summary?;

    assert_eq!(
        summary.outcome,
        Outcome::Cluster(ClusterOutcome::Completed { items: 2, rows: 2 })
    );
    assert!(summary.metrics.is_none());
    let execute = layer.span("cli.execute").ok_or("cli.execute span must exist")?;
    assert_eq!(execute.field("backend"), Some("reference"));
    assert_eq!(execute.field("command"), Some("cluster-media"));
    assert!(layer.span("core.cluster_media").is_some());
    assert!(layer.has_event(Level::INFO, "command completed"));
    Ok(())
}

#[rstest]
fn run_cli_span_records_command_label() -> TestResult {
    let dir = temp_dir();
    let list = write_file(dir.path(), "media.txt", "")?;
    let (summary, layer) = RecordingLayer::capture(|| {
        run_cli(cli(Command::Detect(DetectArgs {
            media_list: list.clone(),
            output: dir.path().join("faces.csv"),
        })))
    });
    summary?;
    let run = layer.span("cli.run").ok_or("cli.run span must exist")?;
    assert_eq!(run.field("command"), Some("detect"));
    assert_eq!(run.field("backend"), Some("reference"));
    Ok(())
}

#[rstest]
#[case::search(
    Outcome::Search(SearchSummary { probes: 2, rows: 10, failed: 1 }),
    "searched 2 probes, wrote 10 candidates (1 failed)"
)]
#[case::not_implemented(
    Outcome::Cluster(ClusterOutcome::NotImplemented),
    "clustering is not implemented by this backend"
)]
#[case::clustered(
    Outcome::Cluster(ClusterOutcome::Completed { items: 3, rows: 3 }),
    "clustered 3 items into 3 rows"
)]
fn render_summary_describes_outcome(#[case] outcome: Outcome, #[case] line: &str) -> TestResult {
    let summary = ExecutionSummary {
        backend: "reference".into(),
        outcome,
        metrics: None,
    };
    let mut buffer = Vec::new();
    render_summary(&summary, &mut buffer)?;
    assert_eq!(String::from_utf8(buffer)?, format!("backend: reference\n{line}\n"));
    Ok(())
}

#[rstest]
fn render_summary_appends_metrics_table() -> TestResult {
    let mut collector = MetricsCollector::new();
    collector.record(Category::Verify, 1.5);
    let summary = ExecutionSummary {
        backend: "reference".into(),
        outcome: Outcome::Verify(VerifySummary { pairs: 1, failed: 0 }),
        metrics: Some(collector.drain()),
    };
    let mut buffer = Vec::new();
    render_summary(&summary, &mut buffer)?;
    let text = String::from_utf8(buffer)?;
    assert!(text.contains("verified 1 pairs (0 failed)"));
    assert!(text.contains("verify"));
    assert!(text.contains("other errors: 0"));
    Ok(())
}

#[rstest]
fn detect_list_paths_resolve_against_data_root() -> TestResult {
    let dir = temp_dir();
    let root = dir.path();
    write_face(root, "big.png", 48, 4)?;
    let list = write_file(root, "media.txt", "big.png\n")?;
    let mut cli = cli(Command::Detect(DetectArgs {
        media_list: list,
        output: root.join("faces.csv"),
    }));
    cli.harness.data_root = Some(root.to_path_buf());
    let summary = run_cli(cli)?;
    match summary.outcome {
        Outcome::Detect(detect) => assert_eq!((detect.media, detect.faces), (1, 1)),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let written = std::fs::read_to_string(root.join("faces.csv"))?;
    assert!(written.ends_with("big.png,0,0,48,48,1\n"));
    Ok(())
}
