//! End-to-end runs of the harness over the reference backend.

use std::{fs, io::Cursor, path::Path};

use proberun_backend_reference::ReferenceBackend;
use proberun_core::{
    Association, Backend, BackendErrorCode, Category, ClusterOutcome, DetectJob, EnrollJob, Harness,
    HarnessBuilder, MetricsCollector, Role, SearchJob, Track, VerifyJob,
};
use proberun_test_support::fixtures::{
    MetadataRow, temp_dir, write_face, write_file, write_metadata, write_png,
};
use rstest::rstest;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn lines(path: &Path) -> Result<Vec<String>, std::io::Error> {
    Ok(fs::read_to_string(path)?.lines().map(ToOwned::to_owned).collect())
}

/// Enrolls `rows` from `root` into `root/<name>/` and returns the manifest.
fn enroll(
    harness: &Harness,
    backend: &ReferenceBackend,
    root: &Path,
    name: &str,
    rows: &[MetadataRow],
    role: Role,
) -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
    let templates_dir = root.join(name);
    fs::create_dir_all(&templates_dir)?;
    let job = EnrollJob {
        metadata: write_metadata(root, &format!("{name}.csv"), rows)?,
        templates_dir,
        manifest: root.join(format!("{name}-manifest.csv")),
        role,
    };
    let summary = harness.enroll(backend, &mut MetricsCollector::new(), &job)?;
    assert_eq!(summary.failed, 0);
    Ok(job.manifest)
}

#[rstest]
fn serialized_templates_keep_their_scores() -> TestResult {
    let dir = temp_dir();
    let backend = ReferenceBackend::new();
    let first = backend.load_media(&write_face(dir.path(), "a.png", 32, 1)?)?;
    let second = backend.load_media(&write_face(dir.path(), "b.png", 32, 4)?)?;
    let track = Track::default();
    let a = backend.create_template(&[Association { media: &first, track: &track }], Role::Enrollment)?;
    let b = backend.create_template(&[Association { media: &second, track: &track }], Role::Verification)?;

    let mut bytes = Vec::new();
    backend.serialize_template(&b, &mut bytes)?;
    let restored = backend.deserialize_template(&mut Cursor::new(bytes))?;

    assert_eq!(restored, b);
    assert_eq!(backend.verify(&a, &b)?, backend.verify(&a, &restored)?);
    backend.free_media(first)?;
    backend.free_media(second)?;
    Ok(())
}

#[rstest]
fn video_media_is_rejected() -> TestResult {
    let dir = temp_dir();
    let clip = write_file(dir.path(), "clip.MP4", "not really a video")?;
    let error = ReferenceBackend::new()
        .load_media(&clip)
        .err()
        .ok_or("video must not load")?;
    assert_eq!(error.code(), BackendErrorCode::Failed);
    Ok(())
}

#[rstest]
fn corrupt_template_bytes_are_reported() {
    let error = ReferenceBackend::new()
        .deserialize_template(&mut Cursor::new(b"JUNKJUNK".to_vec()))
        .err();
    assert_eq!(error.map(|e| e.code()), Some(BackendErrorCode::Corrupt));
}

#[rstest]
fn enrolled_images_verify_search_and_cluster() -> TestResult {
    let dir = temp_dir();
    let root = dir.path();
    write_face(root, "alice-1.png", 32, 1)?;
    write_face(root, "alice-2.png", 32, 1)?;
    write_face(root, "bob.png", 32, 6)?;
    let backend = ReferenceBackend::new();
    let harness = HarnessBuilder::new().with_data_root(root).build()?;

    let gallery_manifest = enroll(
        &harness,
        &backend,
        root,
        "gallery",
        &[
            MetadataRow::new(1, 100, "alice-1.png"),
            MetadataRow::new(2, 200, "bob.png"),
        ],
        Role::Gallery,
    )?;
    let probe_manifest = enroll(
        &harness,
        &backend,
        root,
        "probes",
        &[MetadataRow::new(3, 100, "alice-2.png").with_face(0.0, 0.0, 32.0, 32.0)],
        Role::Identification,
    )?;

    let gallery = root.join("gallery.bin");
    let mut metrics = MetricsCollector::new();
    harness.build_gallery(&backend, &mut metrics, &gallery_manifest, &gallery)?;
    let search = SearchJob {
        probes: probe_manifest.clone(),
        gallery_manifest: gallery_manifest.clone(),
        gallery,
        output: root.join("candidates.csv"),
    };
    let summary = harness.search(&backend, &mut metrics, &search)?;
    assert_eq!((summary.probes, summary.rows, summary.failed), (1, 2, 0));
    let candidates = lines(&search.output)?;
    let best: Vec<&str> = candidates[1].split(',').collect();
    assert_eq!((best[0], best[1], best[2], best[4]), ("3", "0", "1", "true"));
    assert!(best[3].parse::<f32>()? > 0.999);
    assert_eq!(metrics.drain().stats(Category::Search).count, 1);

    let combined = write_file(
        root,
        "combined.csv",
        &format!(
            "TEMPLATE_ID,SUBJECT_ID,TEMPLATE_PATH\n{}\n{}\n",
            lines(&gallery_manifest)?[1..].join("\n"),
            lines(&probe_manifest)?[1..].join("\n"),
        ),
    )?;
    let verify = VerifyJob {
        manifest: combined.clone(),
        pairs: write_file(root, "pairs.csv", "PROBE_ID,REFERENCE_ID\n3,1\n")?,
        output: root.join("scores.csv"),
    };
    harness.verify(&backend, &mut MetricsCollector::new(), &verify)?;
    let score: f32 = lines(&verify.output)?[1]
        .rsplit(',')
        .next()
        .ok_or("score column")?
        .parse()?;
    assert!(score > 0.999);

    let clusters = root.join("clusters.csv");
    let outcome =
        harness.cluster_templates(&backend, &mut MetricsCollector::new(), &combined, &clusters)?;
    assert!(matches!(outcome, ClusterOutcome::Completed { items: 3, .. }));
    let rows = lines(&clusters)?;
    let cluster_of = |id: &str| {
        rows.iter()
            .skip(1)
            .find(|row| row.starts_with(&format!("{id},")))
            .and_then(|row| row.split(',').nth(2).map(ToOwned::to_owned))
    };
    assert_eq!(cluster_of("1"), cluster_of("3"));
    assert_eq!(cluster_of("1").as_deref(), Some("0"));
    Ok(())
}

#[rstest]
fn flat_and_undersized_media_are_tallied() -> TestResult {
    let dir = temp_dir();
    let root = dir.path();
    write_png(root, "flat.png", 24, 24, |_, _| 90)?;
    write_face(root, "tiny.png", 8, 2)?;
    write_face(root, "face.png", 24, 3)?;
    let backend = ReferenceBackend::new();
    let harness = HarnessBuilder::new()
        .with_data_root(root)
        .with_min_face_size(16)
        .build()?;

    let templates_dir = root.join("templates");
    fs::create_dir_all(&templates_dir)?;
    let job = EnrollJob {
        metadata: write_metadata(root, "meta.csv", &[MetadataRow::new(1, 1, "flat.png")])?,
        templates_dir,
        manifest: root.join("manifest.csv"),
        role: Role::Enrollment,
    };
    let mut metrics = MetricsCollector::new();
    let summary = harness.enroll(&backend, &mut metrics, &job)?;
    assert_eq!((summary.enrolled, summary.failed), (0, 1));
    assert_eq!(metrics.drain().errors().failure_to_enroll, 1);

    let detect = DetectJob {
        media_list: write_file(root, "media.txt", "FILENAME\ntiny.png\nface.png\n")?,
        output: root.join("faces.csv"),
    };
    let summary = harness.detect(&backend, &mut metrics, &detect)?;
    assert_eq!((summary.media, summary.faces, summary.failed), (2, 1, 1));
    assert_eq!(metrics.drain().errors().failure_to_detect, 1);
    assert_eq!(lines(&detect.output)?[1], "face.png,0,0,24,24,1");
    Ok(())
}
