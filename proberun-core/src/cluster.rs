//! Clustering of enrolled templates or of raw media.
//!
//! Both modes load their inputs, make a single clustering call, flatten the
//! result into rows and release the inputs. Clustering is optional for a
//! backend: [`BackendError::NotImplemented`] yields
//! [`ClusterOutcome::NotImplemented`] and a header-only output file.

use std::{collections::HashMap, path::Path};

use tracing::{info, instrument, warn};

use crate::{
    backend::{Backend, BackendResult},
    error::{BackendError, Result},
    harness::{Harness, backend_failure, load_templates, release_media, release_templates},
    manifest::{CsvWriter, read_manifest, read_media_list},
    metrics::{Category, ErrorClass, MetricsCollector},
    track::TemplateId,
};

/// Header of the template-mode cluster file.
pub const TEMPLATE_CLUSTER_HEADER: &str = "TEMPLATE_ID,FILENAME,CLUSTER_INDEX,CONFIDENCE";

/// Header of the media-mode cluster file.
pub const MEDIA_CLUSTER_HEADER: &str =
    "TEMPLATE_ID,FILENAME,CLUSTER_INDEX,CONFIDENCE,FACE_X,FACE_Y,FACE_WIDTH,FACE_HEIGHT,FRAME_NUMBER";

/// How a clustering run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterOutcome {
    /// The backend clustered the inputs.
    Completed {
        /// Items the backend assigned to clusters.
        items: usize,
        /// Rows written.
        rows: usize,
    },
    /// The backend does not support this clustering mode.
    NotImplemented,
}

impl Harness {
    /// Clusters the templates listed in a clustering manifest.
    ///
    /// # Errors
    /// Unreadable inputs, undecodable templates and clustering failures other
    /// than [`BackendError::NotImplemented`] are fatal.
    #[instrument(
        name = "core.cluster_templates",
        err,
        skip(self, backend, metrics),
        fields(backend = %backend.name(), hint = self.cluster_hint()),
    )]
    pub fn cluster_templates<B: Backend>(
        &self,
        backend: &B,
        metrics: &mut MetricsCollector,
        manifest: &Path,
        output: &Path,
    ) -> Result<ClusterOutcome> {
        let entries = read_manifest(manifest)?;
        let mut out = CsvWriter::create(output, TEMPLATE_CLUSTER_HEADER)?;
        let ids: Vec<TemplateId> = entries.iter().map(|entry| entry.template_id).collect();
        let filenames: HashMap<TemplateId, &str> = entries
            .iter()
            .map(|entry| (entry.template_id, entry.filename.as_deref().unwrap_or_default()))
            .collect();

        let templates = load_templates(backend, metrics, &entries)?;
        let clustered = {
            let refs: Vec<&B::Template> = templates.iter().collect();
            metrics.time(Category::Cluster, || {
                backend.cluster_templates(&refs, &ids, self.cluster_hint())
            })
        };
        release_templates(backend, metrics, templates);

        let Some(assignments) = accept(backend, clustered, "cluster_templates")? else {
            out.finish()?;
            return Ok(ClusterOutcome::NotImplemented);
        };
        for assignment in &assignments {
            let filename = filenames.get(&assignment.source_id).copied().unwrap_or_else(|| {
                warn!(source_id = assignment.source_id, "cluster assignment for an unknown template");
                ""
            });
            out.row(format_args!(
                "{},{filename},{},{}",
                assignment.source_id, assignment.cluster_id, assignment.confidence
            ))?;
        }
        out.finish()?;

        info!(items = assignments.len(), "template clustering completed");
        Ok(ClusterOutcome::Completed {
            items: assignments.len(),
            rows: assignments.len(),
        })
    }

    /// Detects and clusters faces directly from the listed media files.
    ///
    /// Each file's id is its 0-based position in the list. Files that fail
    /// to load are tallied and left out of the clustering call.
    ///
    /// # Errors
    /// Unreadable inputs and clustering failures other than
    /// [`BackendError::NotImplemented`] are fatal.
    #[instrument(
        name = "core.cluster_media",
        err,
        skip(self, backend, metrics),
        fields(backend = %backend.name(), hint = self.cluster_hint()),
    )]
    pub fn cluster_media<B: Backend>(
        &self,
        backend: &B,
        metrics: &mut MetricsCollector,
        media_list: &Path,
        output: &Path,
    ) -> Result<ClusterOutcome> {
        let filenames = read_media_list(media_list)?;
        let mut out = CsvWriter::create(output, MEDIA_CLUSTER_HEADER)?;

        let mut ids = Vec::with_capacity(filenames.len());
        let mut loaded = Vec::with_capacity(filenames.len());
        for (id, filename) in (0_u64..).zip(&filenames) {
            let path = self.media_path(filename);
            match metrics.time(Category::LoadMedia, || backend.load_media(&path)) {
                Ok(media) => {
                    ids.push(id);
                    loaded.push(media);
                }
                Err(error) => {
                    metrics.tally(ErrorClass::Other);
                    warn!(path = %path.display(), error = %error, "failed to load media; skipping");
                }
            }
        }
        let clustered = {
            let refs: Vec<&B::Media> = loaded.iter().collect();
            metrics.time(Category::Cluster, || {
                backend.cluster_media(&refs, &ids, self.cluster_hint())
            })
        };
        for media in loaded {
            release_media(backend, metrics, media);
        }

        let Some(items) = accept(backend, clustered, "cluster_media")? else {
            out.finish()?;
            return Ok(ClusterOutcome::NotImplemented);
        };
        let mut rows = 0;
        for item in &items {
            let assignment = item.assignment;
            let filename = usize::try_from(assignment.source_id)
                .ok()
                .and_then(|index| filenames.get(index))
                .map_or("", String::as_str);
            for frame in &item.track.frames {
                let face = frame.face;
                let frame_number = frame.frame_number.map(|n| n.to_string()).unwrap_or_default();
                out.row(format_args!(
                    "{},{filename},{},{},{},{},{},{},{frame_number}",
                    assignment.source_id,
                    assignment.cluster_id,
                    assignment.confidence,
                    face.x,
                    face.y,
                    face.width,
                    face.height,
                ))?;
                rows += 1;
            }
        }
        out.finish()?;

        info!(items = items.len(), rows, "media clustering completed");
        Ok(ClusterOutcome::Completed {
            items: items.len(),
            rows,
        })
    }
}

/// `None` when the backend does not implement the mode.
fn accept<B: Backend, T>(
    backend: &B,
    clustered: BackendResult<Vec<T>>,
    operation: &'static str,
) -> Result<Option<Vec<T>>> {
    match clustered {
        Ok(items) => Ok(Some(items)),
        Err(BackendError::NotImplemented { .. }) => {
            info!(backend = backend.name(), operation, "clustering is not implemented");
            Ok(None)
        }
        Err(error) => Err(backend_failure(backend, operation)(error)),
    }
}
