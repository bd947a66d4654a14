//! 1:1 verification of template pairs.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use tracing::{info, instrument, warn};

use crate::{
    backend::Backend,
    error::Result,
    harness::{Harness, load_template, release_templates},
    manifest::{CsvWriter, read_manifest, read_pairs},
    metrics::{Category, ErrorClass, MetricsCollector},
    track::TemplateId,
};

/// Header of the score file.
pub const VERIFY_HEADER: &str = "PROBE_ID,REFERENCE_ID,SIMILARITY";

/// Score written when a pair could not be compared.
pub const FAILED_SIMILARITY: f32 = f32::MIN;

/// Inputs and outputs of a verification run.
#[derive(Debug, Clone)]
pub struct VerifyJob {
    /// Manifest locating every template the pairs mention.
    pub manifest: PathBuf,
    /// `PROBE_ID,REFERENCE_ID` pairs.
    pub pairs: PathBuf,
    /// Score file to write.
    pub output: PathBuf,
}

/// Counts reported by [`Harness::verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifySummary {
    /// Pairs scored, including failures.
    pub pairs: usize,
    /// Pairs written with [`FAILED_SIMILARITY`].
    pub failed: usize,
}

impl Harness {
    /// Compares every listed pair and writes one score row per pair.
    ///
    /// A template missing from the manifest or from disk is reported with a
    /// warning and scored [`FAILED_SIMILARITY`], as is a failed comparison.
    ///
    /// # Errors
    /// Unreadable manifest, pairs or output files are fatal, as is a template
    /// file that exists but cannot be deserialized.
    #[instrument(
        name = "core.verify",
        err,
        skip(self, backend, metrics, job),
        fields(backend = %backend.name(), pairs = %job.pairs.display()),
    )]
    pub fn verify<B: Backend>(
        &self,
        backend: &B,
        metrics: &mut MetricsCollector,
        job: &VerifyJob,
    ) -> Result<VerifySummary> {
        let entries = read_manifest(&job.manifest)?;
        let pairs = read_pairs(&job.pairs)?;
        let mut paths: HashMap<TemplateId, &Path> = HashMap::with_capacity(entries.len());
        for entry in &entries {
            paths.entry(entry.template_id).or_insert(entry.path.as_path());
        }

        let mut out = CsvWriter::create(&job.output, VERIFY_HEADER)?;
        let mut summary = VerifySummary::default();
        for (probe_id, reference_id) in pairs {
            let probe = fetch(backend, metrics, &paths, probe_id)?;
            let reference = match fetch(backend, metrics, &paths, reference_id) {
                Ok(reference) => reference,
                Err(error) => {
                    release_templates(backend, metrics, probe);
                    return Err(error);
                }
            };

            let score = match (&probe, &reference) {
                (Some(probe), Some(reference)) => {
                    match metrics.time(Category::Verify, || backend.verify(reference, probe)) {
                        Ok(score) => Some(score),
                        Err(error) => {
                            warn!(probe_id, reference_id, error = %error, "verification failed");
                            None
                        }
                    }
                }
                _ => None,
            };
            release_templates(backend, metrics, probe.into_iter().chain(reference));

            let score = score.unwrap_or_else(|| {
                metrics.tally(ErrorClass::Other);
                summary.failed += 1;
                FAILED_SIMILARITY
            });
            out.row(format_args!("{probe_id},{reference_id},{score}"))?;
            summary.pairs += 1;
        }
        out.finish()?;

        info!(pairs = summary.pairs, failed = summary.failed, "verification completed");
        Ok(summary)
    }
}

fn fetch<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    paths: &HashMap<TemplateId, &Path>,
    id: TemplateId,
) -> Result<Option<B::Template>> {
    let Some(path) = paths.get(&id) else {
        warn!(template_id = id, "template is not listed in the manifest");
        return Ok(None);
    };
    if !path.exists() {
        warn!(template_id = id, path = %path.display(), "template file is missing");
        return Ok(None);
    }
    load_template(backend, metrics, path).map(Some)
}

