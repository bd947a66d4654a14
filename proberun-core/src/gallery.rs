//! Gallery assembly from a manifest, and amendment of a serialized gallery.
//!
//! Unlike enrollment, every failure here is fatal: a gallery missing one of
//! its templates would silently skew every search that uses it.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::{
    backend::Backend,
    error::Result,
    harness::{
        Harness, backend_failure, load_gallery, load_template, load_templates, release_gallery,
        release_template, release_templates, store_gallery,
    },
    manifest::{ManifestEntry, read_manifest},
    metrics::{Category, MetricsCollector},
    track::TemplateId,
};

/// Counts reported by [`Harness::build_gallery`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GallerySummary {
    /// Templates placed in the gallery.
    pub templates: usize,
}

/// Changes applied by [`Harness::amend_gallery`].
#[derive(Debug, Clone, Default)]
pub struct AmendJob {
    /// Serialized gallery to amend.
    pub gallery: PathBuf,
    /// Manifest of templates to insert.
    pub insert: Option<PathBuf>,
    /// Template ids to remove.
    pub remove: Vec<TemplateId>,
    /// Where the amended gallery is written. May equal `gallery`.
    pub output: PathBuf,
}

/// Counts reported by [`Harness::amend_gallery`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AmendSummary {
    /// Templates inserted.
    pub inserted: usize,
    /// Templates removed.
    pub removed: usize,
}

impl Harness {
    /// Builds, prepares and serializes a gallery from every template listed
    /// in `manifest`.
    ///
    /// # Errors
    /// Any unreadable manifest row, template that fails to deserialize or
    /// failed gallery call aborts the run. Handles loaded before the failure
    /// are released first.
    #[instrument(
        name = "core.gallery",
        err,
        skip(self, backend, metrics),
        fields(backend = %backend.name(), manifest = %manifest.display()),
    )]
    pub fn build_gallery<B: Backend>(
        &self,
        backend: &B,
        metrics: &mut MetricsCollector,
        manifest: &Path,
        output: &Path,
    ) -> Result<GallerySummary> {
        let entries = read_manifest(manifest)?;
        let ids: Vec<TemplateId> = entries.iter().map(|entry| entry.template_id).collect();
        let templates = load_templates(backend, metrics, &entries)?;
        let assembled = assemble(backend, metrics, &templates, &ids, output);
        release_templates(backend, metrics, templates);
        assembled?;

        info!(templates = ids.len(), output = %output.display(), "gallery written");
        Ok(GallerySummary {
            templates: ids.len(),
        })
    }

    /// Inserts and removes templates in a serialized gallery, then prepares
    /// and serializes it again.
    ///
    /// Insertions are applied before removals.
    ///
    /// # Errors
    /// Every failure aborts the run; the gallery is released first.
    #[instrument(
        name = "core.amend",
        err,
        skip(self, backend, metrics, job),
        fields(backend = %backend.name(), gallery = %job.gallery.display()),
    )]
    pub fn amend_gallery<B: Backend>(
        &self,
        backend: &B,
        metrics: &mut MetricsCollector,
        job: &AmendJob,
    ) -> Result<AmendSummary> {
        let entries = match &job.insert {
            Some(manifest) => read_manifest(manifest)?,
            None => Vec::new(),
        };
        let mut gallery = load_gallery(backend, metrics, &job.gallery)?;
        let amended = amend(backend, metrics, &mut gallery, &entries, &job.remove, &job.output);
        release_gallery(backend, metrics, gallery);
        amended?;

        let summary = AmendSummary {
            inserted: entries.len(),
            removed: job.remove.len(),
        };
        info!(
            inserted = summary.inserted,
            removed = summary.removed,
            output = %job.output.display(),
            "gallery amended"
        );
        Ok(summary)
    }
}

fn assemble<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    templates: &[B::Template],
    ids: &[TemplateId],
    output: &Path,
) -> Result<()> {
    let refs: Vec<&B::Template> = templates.iter().collect();
    let mut gallery = metrics
        .time(Category::CreateGallery, || backend.create_gallery(&refs, ids))
        .map_err(backend_failure(backend, "create_gallery"))?;
    let stored = prepare_and_store(backend, metrics, &mut gallery, output);
    release_gallery(backend, metrics, gallery);
    stored
}

fn amend<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    gallery: &mut B::Gallery,
    insert: &[ManifestEntry],
    remove: &[TemplateId],
    output: &Path,
) -> Result<()> {
    for entry in insert {
        let template = load_template(backend, metrics, &entry.path)?;
        let inserted = metrics.time(Category::GalleryInsert, || {
            backend.gallery_insert(gallery, &template, entry.template_id)
        });
        release_template(backend, metrics, template);
        inserted.map_err(backend_failure(backend, "gallery_insert"))?;
    }
    for &id in remove {
        metrics
            .time(Category::GalleryRemove, || backend.gallery_remove(gallery, id))
            .map_err(backend_failure(backend, "gallery_remove"))?;
    }
    prepare_and_store(backend, metrics, gallery, output)
}

fn prepare_and_store<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    gallery: &mut B::Gallery,
    output: &Path,
) -> Result<()> {
    metrics
        .time(Category::PrepareGallery, || backend.prepare_gallery(gallery))
        .map_err(backend_failure(backend, "prepare_gallery"))?;
    store_gallery(backend, metrics, gallery, output)
}
