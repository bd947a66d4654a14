//! The [`Harness`] entry point and the handle-release helpers shared by the
//! orchestrators.
//!
//! Each orchestrator lives in its own module as an `impl Harness` block. All
//! of them take the backend by shared reference and the metrics collector by
//! exclusive reference; none of them calls another.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::warn;

use crate::{
    backend::Backend,
    error::{BackendError, HarnessError, Result},
    manifest::ManifestEntry,
    metrics::{Category, ErrorClass, MetricsCollector},
};

/// Configured entry point for every harness operation.
///
/// Not thread-safe: run one operation at a time per backend and collector.
///
/// # Examples
/// ```
/// use proberun_core::HarnessBuilder;
///
/// let harness = HarnessBuilder::new().build().expect("defaults are valid");
/// assert_eq!(harness.min_face_size(), 40);
/// ```
#[derive(Debug, Clone)]
pub struct Harness {
    search_depth: NonZeroUsize,
    min_face_size: u32,
    cluster_hint: u64,
    data_root: Option<PathBuf>,
}

impl Harness {
    pub(crate) fn new(
        search_depth: NonZeroUsize,
        min_face_size: u32,
        cluster_hint: u64,
        data_root: Option<PathBuf>,
    ) -> Self {
        Self {
            search_depth,
            min_face_size,
            cluster_hint,
            data_root,
        }
    }

    /// Number of candidates requested from the backend per probe.
    #[must_use]
    pub fn search_depth(&self) -> NonZeroUsize {
        self.search_depth
    }

    /// Smallest face detection reports.
    #[must_use]
    pub fn min_face_size(&self) -> u32 {
        self.min_face_size
    }

    /// Advisory identity-count bound passed to clustering.
    #[must_use]
    pub fn cluster_hint(&self) -> u64 {
        self.cluster_hint
    }

    /// Resolves a media filename against the configured data root.
    #[must_use]
    pub fn media_path(&self, filename: &str) -> PathBuf {
        match &self.data_root {
            Some(root) => root.join(filename),
            None => PathBuf::from(filename),
        }
    }
}

pub(crate) fn backend_failure<B: Backend>(
    backend: &B,
    operation: &'static str,
) -> impl FnOnce(BackendError) -> HarnessError {
    let name: Arc<str> = Arc::from(backend.name());
    move |error| HarnessError::Backend {
        backend: name,
        operation,
        error,
    }
}

/// Opens and deserializes a template whose presence the caller requires.
pub(crate) fn load_template<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    path: &Path,
) -> Result<B::Template> {
    let file = File::open(path).map_err(HarnessError::io(path))?;
    let mut reader = BufReader::new(file);
    metrics
        .time(Category::DeserializeTemplate, || {
            backend.deserialize_template(&mut reader)
        })
        .map_err(|error| HarnessError::Deserialize {
            path: path.to_path_buf(),
            error,
        })
}

/// Loads every template a manifest lists, in manifest order.
///
/// On failure the templates already loaded are released before the error is
/// returned.
pub(crate) fn load_templates<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    entries: &[ManifestEntry],
) -> Result<Vec<B::Template>> {
    let mut templates = Vec::with_capacity(entries.len());
    for entry in entries {
        match load_template(backend, metrics, &entry.path) {
            Ok(template) => templates.push(template),
            Err(error) => {
                release_templates(backend, metrics, templates);
                return Err(error);
            }
        }
    }
    Ok(templates)
}

/// Opens and deserializes a gallery whose presence the caller requires.
pub(crate) fn load_gallery<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    path: &Path,
) -> Result<B::Gallery> {
    let file = File::open(path).map_err(HarnessError::io(path))?;
    let mut reader = BufReader::new(file);
    metrics
        .time(Category::DeserializeGallery, || {
            backend.deserialize_gallery(&mut reader)
        })
        .map_err(|error| HarnessError::Deserialize {
            path: path.to_path_buf(),
            error,
        })
}

/// Serializes `gallery` to a freshly created file at `path`.
pub(crate) fn store_gallery<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    gallery: &B::Gallery,
    path: &Path,
) -> Result<()> {
    let file = File::create(path).map_err(HarnessError::io(path))?;
    let mut writer = BufWriter::new(file);
    metrics
        .time(Category::SerializeGallery, || {
            backend.serialize_gallery(gallery, &mut writer)
        })
        .map_err(backend_failure(backend, "serialize_gallery"))?;
    writer.flush().map_err(HarnessError::write(path))
}

fn tally_release_failure(metrics: &mut MetricsCollector, what: &'static str, error: &BackendError) {
    metrics.tally(ErrorClass::Other);
    warn!(resource = what, error = %error, "release failed");
}

pub(crate) fn release_media<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    media: B::Media,
) {
    if let Err(error) = metrics.time(Category::FreeMedia, || backend.free_media(media)) {
        tally_release_failure(metrics, "media", &error);
    }
}

pub(crate) fn release_template<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    template: B::Template,
) {
    if let Err(error) = metrics.time(Category::DeleteTemplate, || {
        backend.delete_template(template)
    }) {
        tally_release_failure(metrics, "template", &error);
    }
}

pub(crate) fn release_templates<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    templates: impl IntoIterator<Item = B::Template>,
) {
    for template in templates {
        release_template(backend, metrics, template);
    }
}

pub(crate) fn release_gallery<B: Backend>(
    backend: &B,
    metrics: &mut MetricsCollector,
    gallery: B::Gallery,
) {
    if let Err(error) = metrics.time(Category::DeleteGallery, || backend.delete_gallery(gallery)) {
        tally_release_failure(metrics, "gallery", &error);
    }
}
