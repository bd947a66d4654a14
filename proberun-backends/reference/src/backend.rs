//! [`Backend`] implementation over [`Image`] and [`ReferenceTemplate`].

use std::{
    collections::HashSet,
    io::{Read, Write},
    path::Path,
};

use proberun_core::{
    Association, Backend, BackendError, BackendResult, ClusterAssignment, FaceBox,
    FrameAttributes, MediaClusterItem, Role, SearchHit, TemplateId, Track,
};
use tracing::debug;

use crate::{
    codec,
    errors::{ReferenceBackendError, write_failed},
    features::{Image, ReferenceTemplate, cosine, mean_direction},
    union_find,
};

/// Similarity at or above which two faces are clustered together.
pub const DEFAULT_CLUSTER_THRESHOLD: f32 = 0.9;

const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "avi", "mov", "mkv", "webm", "mpg"];

/// Deterministic backend deriving templates from raw pixels.
///
/// # Examples
/// ```
/// use proberun_backend_reference::ReferenceBackend;
/// use proberun_core::Backend;
///
/// let backend = ReferenceBackend::new();
/// assert_eq!(backend.name(), "reference");
/// assert!(ReferenceBackend::with_threshold(1.5).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ReferenceBackend {
    threshold: f32,
}

impl Default for ReferenceBackend {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CLUSTER_THRESHOLD,
        }
    }
}

impl ReferenceBackend {
    /// Creates a backend with the default clustering threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend clustering at `threshold`.
    ///
    /// # Errors
    /// Returns [`ReferenceBackendError::InvalidThreshold`] unless the
    /// threshold is a cosine similarity in `[-1, 1]`.
    pub fn with_threshold(threshold: f32) -> Result<Self, ReferenceBackendError> {
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(ReferenceBackendError::InvalidThreshold { got: threshold });
        }
        Ok(Self { threshold })
    }

    /// Similarity at or above which faces are clustered together.
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// Gallery of `(id, template)` entries.
#[derive(Debug, Clone, Default)]
pub struct ReferenceGallery {
    entries: Vec<(TemplateId, ReferenceTemplate)>,
    prepared: bool,
}

impl ReferenceGallery {
    /// Template ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = TemplateId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    /// Whether the gallery is ready for search.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    fn contains(&self, id: TemplateId) -> bool {
        self.entries.iter().any(|(entry, _)| *entry == id)
    }
}

fn failed(operation: &'static str, reason: impl Into<String>) -> BackendError {
    BackendError::Failed {
        operation,
        reason: reason.into(),
    }
}

fn whole_image_track(media: &Image) -> Track {
    let face = FaceBox::new(0.0, 0.0, media.width() as f32, media.height() as f32);
    let mut track = Track::from_frames(vec![FrameAttributes::with_face(face)]);
    track.detection_confidence = 1.0;
    track
}

fn check_dimensions(
    operation: &'static str,
    left: &ReferenceTemplate,
    right: &ReferenceTemplate,
) -> BackendResult<()> {
    if left.vector().len() == right.vector().len() {
        Ok(())
    } else {
        Err(failed(
            operation,
            format!(
                "template dimensions differ ({} vs {})",
                left.vector().len(),
                right.vector().len()
            ),
        ))
    }
}

impl Backend for ReferenceBackend {
    type Media = Image;
    type Template = ReferenceTemplate;
    type Gallery = ReferenceGallery;

    fn name(&self) -> &str {
        "reference"
    }

    fn load_media(&self, path: &Path) -> BackendResult<Image> {
        let is_video = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| VIDEO_EXTENSIONS.iter().any(|video| ext.eq_ignore_ascii_case(video)));
        if is_video {
            return Err(failed("load_media", "video media is not supported"));
        }
        let decoded = image::open(path)
            .map_err(|error| failed("load_media", format!("{}: {error}", path.display())))?;
        debug!(path = %path.display(), width = decoded.width(), height = decoded.height(), "media decoded");
        Ok(Image::new(decoded.to_luma8()))
    }

    fn free_media(&self, media: Image) -> BackendResult<()> {
        drop(media);
        Ok(())
    }

    fn detect(&self, media: &Image, min_face_size: u32) -> BackendResult<Vec<Track>> {
        if media.width() < min_face_size || media.height() < min_face_size {
            return Ok(Vec::new());
        }
        Ok(vec![whole_image_track(media)])
    }

    fn create_template(
        &self,
        associations: &[Association<'_, Image>],
        _role: Role,
    ) -> BackendResult<ReferenceTemplate> {
        if associations.is_empty() {
            return Err(BackendError::MissingAttributes);
        }
        let vectors = associations
            .iter()
            .map(|association| {
                let face = association
                    .track
                    .frames
                    .first()
                    .map_or(FaceBox::UNKNOWN, |frame| frame.face);
                association.media.embed(face)
            })
            .collect::<Option<Vec<_>>>()
            .ok_or(BackendError::FailureToEnroll)?;
        mean_direction(&vectors)
            .map(ReferenceTemplate::new)
            .ok_or(BackendError::FailureToEnroll)
    }

    fn serialize_template(
        &self,
        template: &ReferenceTemplate,
        writer: &mut dyn Write,
    ) -> BackendResult<()> {
        codec::write_template(writer, template.vector()).map_err(write_failed("serialize_template"))
    }

    fn deserialize_template(&self, reader: &mut dyn Read) -> BackendResult<ReferenceTemplate> {
        Ok(ReferenceTemplate::new(codec::read_template(reader)?))
    }

    fn delete_template(&self, template: ReferenceTemplate) -> BackendResult<()> {
        drop(template);
        Ok(())
    }

    fn verify(
        &self,
        reference: &ReferenceTemplate,
        verification: &ReferenceTemplate,
    ) -> BackendResult<f32> {
        check_dimensions("verify", reference, verification)?;
        Ok(cosine(reference.vector(), verification.vector()))
    }

    fn create_gallery(
        &self,
        templates: &[&ReferenceTemplate],
        ids: &[TemplateId],
    ) -> BackendResult<ReferenceGallery> {
        if templates.len() != ids.len() {
            return Err(failed(
                "create_gallery",
                format!("{} templates but {} ids", templates.len(), ids.len()),
            ));
        }
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(duplicate) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(failed("create_gallery", format!("duplicate id {duplicate}")));
        }
        Ok(ReferenceGallery {
            entries: ids
                .iter()
                .zip(templates)
                .map(|(&id, &template)| (id, template.clone()))
                .collect(),
            prepared: false,
        })
    }

    fn gallery_insert(
        &self,
        gallery: &mut ReferenceGallery,
        template: &ReferenceTemplate,
        id: TemplateId,
    ) -> BackendResult<()> {
        if gallery.contains(id) {
            return Err(failed("gallery_insert", format!("duplicate id {id}")));
        }
        gallery.entries.push((id, template.clone()));
        gallery.prepared = false;
        Ok(())
    }

    fn gallery_remove(&self, gallery: &mut ReferenceGallery, id: TemplateId) -> BackendResult<()> {
        let position = gallery
            .entries
            .iter()
            .position(|(entry, _)| *entry == id)
            .ok_or(BackendError::UnknownId { id })?;
        gallery.entries.remove(position);
        gallery.prepared = false;
        Ok(())
    }

    fn prepare_gallery(&self, gallery: &mut ReferenceGallery) -> BackendResult<()> {
        if let Some((first, rest)) = gallery.entries.split_first() {
            for (_, template) in rest {
                check_dimensions("prepare_gallery", &first.1, template)?;
            }
        }
        gallery.prepared = true;
        Ok(())
    }

    fn serialize_gallery(
        &self,
        gallery: &ReferenceGallery,
        writer: &mut dyn Write,
    ) -> BackendResult<()> {
        let entries = gallery
            .entries
            .iter()
            .map(|(id, template)| (*id, template.vector()));
        codec::write_gallery(writer, gallery.prepared, entries)
            .map_err(write_failed("serialize_gallery"))
    }

    fn deserialize_gallery(&self, reader: &mut dyn Read) -> BackendResult<ReferenceGallery> {
        let payload = codec::read_gallery(reader)?;
        Ok(ReferenceGallery {
            entries: payload
                .entries
                .into_iter()
                .map(|(id, vector)| (id, ReferenceTemplate::new(vector)))
                .collect(),
            prepared: payload.prepared,
        })
    }

    fn delete_gallery(&self, gallery: ReferenceGallery) -> BackendResult<()> {
        drop(gallery);
        Ok(())
    }

    fn search(
        &self,
        probe: &ReferenceTemplate,
        gallery: &ReferenceGallery,
        num_requested: usize,
    ) -> BackendResult<Vec<SearchHit>> {
        if !gallery.prepared {
            return Err(failed("search", "gallery is not prepared"));
        }
        let mut hits = Vec::with_capacity(gallery.entries.len());
        for (id, template) in &gallery.entries {
            check_dimensions("search", probe, template)?;
            hits.push(SearchHit {
                id: *id,
                similarity: cosine(probe.vector(), template.vector()),
            });
        }
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(num_requested);
        Ok(hits)
    }

    fn cluster_templates(
        &self,
        templates: &[&ReferenceTemplate],
        ids: &[TemplateId],
        _hint: u64,
    ) -> BackendResult<Vec<ClusterAssignment>> {
        if templates.len() != ids.len() {
            return Err(failed(
                "cluster_templates",
                format!("{} templates but {} ids", templates.len(), ids.len()),
            ));
        }
        let vectors: Vec<&[f32]> = templates.iter().map(|template| template.vector()).collect();
        Ok(union_find::cluster(&vectors, self.threshold)
            .into_iter()
            .zip(ids)
            .map(|(membership, &source_id)| ClusterAssignment {
                source_id,
                cluster_id: membership.cluster,
                confidence: membership.confidence,
            })
            .collect())
    }

    /// Each image is treated as one face covering the whole frame. Images
    /// too flat to embed are left out of the result.
    fn cluster_media(
        &self,
        media: &[&Image],
        ids: &[u64],
        _hint: u64,
    ) -> BackendResult<Vec<MediaClusterItem>> {
        if media.len() != ids.len() {
            return Err(failed(
                "cluster_media",
                format!("{} media but {} ids", media.len(), ids.len()),
            ));
        }
        let mut faces = Vec::with_capacity(media.len());
        for (&image, &id) in media.iter().zip(ids) {
            match image.embed(FaceBox::UNKNOWN) {
                Some(vector) => faces.push((id, whole_image_track(image), vector)),
                None => debug!(source_id = id, "image too flat to cluster"),
            }
        }
        let vectors: Vec<&[f32]> = faces.iter().map(|(_, _, vector)| vector.as_slice()).collect();
        let memberships = union_find::cluster(&vectors, self.threshold);
        Ok(faces
            .into_iter()
            .zip(memberships)
            .map(|((source_id, track, _), membership)| MediaClusterItem {
                assignment: ClusterAssignment {
                    source_id,
                    cluster_id: membership.cluster,
                    confidence: membership.confidence,
                },
                track,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use rstest::rstest;

    fn textured(size: u32, seed: u32) -> Image {
        Image::new(GrayImage::from_fn(size, size, |x, y| {
            Luma([((x * (3 + seed) + y * (5 + 2 * seed)) % 251) as u8])
        }))
    }

    fn template(backend: &ReferenceBackend, image: &Image) -> ReferenceTemplate {
        let track = Track::default();
        backend
            .create_template(&[Association { media: image, track: &track }], Role::Enrollment)
            .expect("textured image must enroll")
    }

    #[rstest]
    fn detect_respects_min_face_size() {
        let backend = ReferenceBackend::new();
        let image = textured(32, 1);
        let tracks = backend.detect(&image, 16).expect("detect");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].frames[0].face, FaceBox::new(0.0, 0.0, 32.0, 32.0));
        assert!((tracks[0].detection_confidence - 1.0).abs() < f32::EPSILON);
        assert!(backend.detect(&image, 40).expect("detect").is_empty());
    }

    #[rstest]
    fn enrollment_errors_are_classified() {
        let backend = ReferenceBackend::new();
        let flat = Image::new(GrayImage::from_pixel(16, 16, Luma([9])));
        let track = Track::default();
        assert_eq!(
            backend.create_template(&[], Role::Gallery),
            Err(BackendError::MissingAttributes)
        );
        assert_eq!(
            backend.create_template(&[Association { media: &flat, track: &track }], Role::Gallery),
            Err(BackendError::FailureToEnroll)
        );
    }

    #[rstest]
    fn identical_media_verify_at_one() {
        let backend = ReferenceBackend::new();
        let a = template(&backend, &textured(24, 2));
        let b = template(&backend, &textured(24, 2));
        let score = backend.verify(&a, &b).expect("verify");
        assert!((score - 1.0).abs() < 1e-5);
    }

    #[rstest]
    fn search_requires_preparation_and_ranks_by_similarity() {
        let backend = ReferenceBackend::new();
        let templates: Vec<_> = (0..3).map(|seed| template(&backend, &textured(24, seed))).collect();
        let refs: Vec<_> = templates.iter().collect();
        let mut gallery = backend.create_gallery(&refs, &[10, 11, 12]).expect("gallery");
        assert!(backend.search(&templates[1], &gallery, 2).is_err());

        backend.prepare_gallery(&mut gallery).expect("prepare");
        let hits = backend.search(&templates[1], &gallery, 2).expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 11);
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[rstest]
    fn gallery_mutation_invalidates_preparation() {
        let backend = ReferenceBackend::new();
        let t = template(&backend, &textured(24, 1));
        let mut gallery = backend.create_gallery(&[&t], &[1]).expect("gallery");
        backend.prepare_gallery(&mut gallery).expect("prepare");
        backend.gallery_insert(&mut gallery, &t, 2).expect("insert");
        assert!(!gallery.is_prepared());
        assert!(backend.gallery_insert(&mut gallery, &t, 2).is_err());
        assert_eq!(
            backend.gallery_remove(&mut gallery, 7),
            Err(BackendError::UnknownId { id: 7 })
        );
        backend.gallery_remove(&mut gallery, 1).expect("remove");
        assert_eq!(gallery.ids().collect::<Vec<_>>(), [2]);
    }

    #[rstest]
    fn duplicate_gallery_ids_are_rejected() {
        let backend = ReferenceBackend::new();
        let t = template(&backend, &textured(24, 1));
        assert!(backend.create_gallery(&[&t, &t], &[4, 4]).is_err());
    }

    #[rstest]
    #[case(-1.0, true)]
    #[case(0.5, true)]
    #[case(1.01, false)]
    #[case(f32::NAN, false)]
    fn threshold_is_validated(#[case] threshold: f32, #[case] accepted: bool) {
        assert_eq!(ReferenceBackend::with_threshold(threshold).is_ok(), accepted);
    }
}
