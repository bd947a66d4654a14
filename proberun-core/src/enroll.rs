//! Template enrollment: one template per metadata record.
//!
//! Per-record failures are tallied and skipped. Only failures to open the
//! metadata, the manifest or a template output file abort the run. An id
//! that reappears after another id forms a new record whose template file
//! replaces the earlier one; the replacement is logged as a warning.

use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{Association, Backend, BackendResult, Role},
    error::{BackendError, HarnessError, MetadataError, Result},
    harness::{Harness, release_media, release_template},
    manifest::{CsvWriter, MANIFEST_HEADER, MANIFEST_HEADER_WITH_FILENAME},
    metadata::MetadataGrouper,
    metrics::{Category, ErrorClass, MetricsCollector},
    track::{TemplateId, TemplateRecord, Track},
};

/// Inputs and outputs of an enrollment run.
#[derive(Debug, Clone)]
pub struct EnrollJob {
    /// Metadata CSV describing the templates.
    pub metadata: PathBuf,
    /// Directory receiving one `<template_id>.template` file per template.
    pub templates_dir: PathBuf,
    /// Manifest listing every template written.
    pub manifest: PathBuf,
    /// Role passed to the backend.
    pub role: Role,
}

/// Counts reported by [`Harness::enroll`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrollSummary {
    /// Records read from the metadata.
    pub records: usize,
    /// Templates written and listed in the manifest.
    pub enrolled: usize,
    /// Records whose template could not be produced.
    pub failed: usize,
}

/// Result of enrolling a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// The template was serialized to this path.
    Enrolled(PathBuf),
    /// No template was written; the failure was tallied under this class.
    Failed(ErrorClass),
}

/// Maps a template-creation failure onto the classes enrollment reports.
#[must_use]
pub fn classify_enrollment(error: &BackendError) -> ErrorClass {
    match error {
        BackendError::MissingAttributes => ErrorClass::MissingAttributes,
        BackendError::FailureToEnroll => ErrorClass::FailureToEnroll,
        _ => ErrorClass::Other,
    }
}

fn metadata_error(path: &Path) -> impl FnOnce(MetadataError) -> HarnessError {
    let path = path.to_path_buf();
    move |error| HarnessError::Metadata { path, error }
}

impl Harness {
    /// Enrolls every record of `job.metadata` and writes the manifest.
    ///
    /// # Errors
    /// Returns [`HarnessError::Io`] when the metadata, the manifest or a
    /// template file cannot be opened, [`HarnessError::Metadata`] for
    /// malformed metadata and [`HarnessError::Write`] when writing fails.
    /// Backend failures for individual records are tallied, not returned.
    #[instrument(
        name = "core.enroll",
        err,
        skip(self, backend, metrics, job),
        fields(
            backend = %backend.name(),
            role = %job.role,
            metadata = %job.metadata.display(),
        ),
    )]
    pub fn enroll<B: Backend>(
        &self,
        backend: &B,
        metrics: &mut MetricsCollector,
        job: &EnrollJob,
    ) -> Result<EnrollSummary> {
        let file = File::open(&job.metadata).map_err(HarnessError::io(&job.metadata))?;
        let mut grouper =
            MetadataGrouper::new(BufReader::new(file)).map_err(metadata_error(&job.metadata))?;
        let with_filename = job.role == Role::Clustering;
        let header = if with_filename {
            MANIFEST_HEADER_WITH_FILENAME
        } else {
            MANIFEST_HEADER
        };
        let mut manifest = CsvWriter::create(&job.manifest, header)?;
        let mut summary = EnrollSummary::default();
        let mut written: HashSet<TemplateId> = HashSet::new();

        while let Some(record) = grouper
            .next_record()
            .map_err(metadata_error(&job.metadata))?
        {
            summary.records += 1;
            let outcome = self.enroll_record(backend, metrics, &record, job.role, &job.templates_dir)?;
            let EnrollOutcome::Enrolled(path) = outcome else {
                summary.failed += 1;
                continue;
            };
            summary.enrolled += 1;
            let (id, subject) = (record.template_id(), record.subject_id());
            // Non-contiguous repeats of an id share one output file.
            if !written.insert(id) {
                warn!(
                    template_id = id,
                    path = %path.display(),
                    "template file overwritten by a later record with the same id"
                );
            }
            match record.primary() {
                Some((filename, _)) if with_filename => manifest.row(format_args!(
                    "{id},{subject},{},{filename}",
                    path.display()
                ))?,
                _ => manifest.row(format_args!("{id},{subject},{}", path.display()))?,
            }
        }
        manifest.finish()?;

        info!(
            records = summary.records,
            enrolled = summary.enrolled,
            failed = summary.failed,
            "enrollment completed"
        );
        Ok(summary)
    }

    /// Builds, serializes and releases the template for one record.
    ///
    /// Media loaded for the record is released whatever the outcome.
    ///
    /// # Errors
    /// Returns [`HarnessError::Io`] when the template file cannot be created
    /// and [`HarnessError::Write`] when it cannot be flushed.
    pub fn enroll_record<B: Backend>(
        &self,
        backend: &B,
        metrics: &mut MetricsCollector,
        record: &TemplateRecord,
        role: Role,
        templates_dir: &Path,
    ) -> Result<EnrollOutcome> {
        let template_id = record.template_id();
        let mut loaded: Vec<(B::Media, &Track)> = Vec::with_capacity(record.associations().len());
        let mut load_error = None;
        for (filename, track) in record.associations() {
            let path = self.media_path(filename);
            match metrics.time(Category::LoadMedia, || backend.load_media(&path)) {
                Ok(media) => loaded.push((media, track)),
                Err(error) => {
                    warn!(template_id, path = %path.display(), error = %error, "failed to load media");
                    load_error = Some(error);
                    break;
                }
            }
        }

        let created = match load_error {
            Some(error) => Err(error),
            None => {
                let associations: Vec<Association<'_, B::Media>> = loaded
                    .iter()
                    .map(|(media, track)| Association {
                        media,
                        track: *track,
                    })
                    .collect();
                metrics.time(Category::CreateTemplate, || {
                    backend.create_template(&associations, role)
                })
            }
        };
        for (media, _) in loaded {
            release_media(backend, metrics, media);
        }

        let template = match created {
            Ok(template) => template,
            Err(error) => {
                let class = classify_enrollment(&error);
                metrics.tally(class);
                warn!(
                    template_id,
                    class = class.as_str(),
                    error = %error,
                    "template creation failed"
                );
                return Ok(EnrollOutcome::Failed(class));
            }
        };

        let path = templates_dir.join(format!("{template_id}.template"));
        let written = write_template(backend, metrics, &template, &path);
        release_template(backend, metrics, template);
        match written? {
            Ok(()) => {
                debug!(template_id, path = %path.display(), "template enrolled");
                Ok(EnrollOutcome::Enrolled(path))
            }
            Err(error) => {
                metrics.tally(ErrorClass::Other);
                warn!(template_id, error = %error, "template serialization failed");
                Ok(EnrollOutcome::Failed(ErrorClass::Other))
            }
        }
    }
}

/// The outer result carries fatal file errors, the inner one the backend's
/// serialization outcome.
fn write_template<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    template: &B::Template,
    path: &Path,
) -> Result<BackendResult<()>> {
    let file = File::create(path).map_err(HarnessError::io(path))?;
    let mut writer = BufWriter::new(file);
    let serialized = metrics.time(Category::SerializeTemplate, || {
        backend.serialize_template(template, &mut writer)
    });
    writer.flush().map_err(HarnessError::write(path))?;
    Ok(serialized)
}
