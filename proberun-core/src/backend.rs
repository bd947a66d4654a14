//! Backend contract driven by the harness.
//!
//! A backend owns face detection, feature extraction and comparison. The
//! harness treats its media, template and gallery values as opaque handles:
//! it only moves them between backend calls and releases each one exactly
//! once through the matching `free_*`/`delete_*` method, which takes the
//! handle by value.

use std::{
    fmt,
    io::{Read, Write},
    path::Path,
};

use crate::{
    error::BackendError,
    track::{TemplateId, Track},
};

/// Intended downstream use of a template. Backends may build templates
/// differently per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Reference side of 1:1 verification.
    Enrollment,
    /// Probe side of 1:1 verification.
    Verification,
    /// Gallery side of 1:N search.
    Gallery,
    /// Probe side of 1:N search.
    Identification,
    /// Input to clustering.
    Clustering,
}

impl Role {
    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enrollment => "enrollment",
            Self::Verification => "verification",
            Self::Gallery => "gallery",
            Self::Identification => "identification",
            Self::Clustering => "clustering",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded media item paired with the track describing the face in it.
#[derive(Debug)]
pub struct Association<'a, M> {
    /// Loaded media.
    pub media: &'a M,
    /// Face track inside that media.
    pub track: &'a Track,
}

impl<M> Clone for Association<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for Association<'_, M> {}

/// One ranked hit returned by [`Backend::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    /// Gallery template id.
    pub id: TemplateId,
    /// Similarity to the probe; larger is more similar.
    pub similarity: f32,
}

/// Cluster membership of one input item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterAssignment {
    /// Id of the template or media item that was clustered.
    pub source_id: u64,
    /// Cluster index.
    pub cluster_id: u64,
    /// Backend confidence in the assignment.
    pub confidence: f32,
}

/// Cluster membership of one face found while clustering raw media.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaClusterItem {
    /// Cluster membership of the face.
    pub assignment: ClusterAssignment,
    /// Frames in which the face was found.
    pub track: Track,
}

/// Convenient alias for backend call results.
pub type BackendResult<T> = core::result::Result<T, BackendError>;

/// The operations a recognition backend provides to the harness.
///
/// Implementations need not be thread-safe; the harness calls them from a
/// single thread.
///
/// # Examples
/// ```
/// use std::io::{Read, Write};
/// use std::path::Path;
/// use proberun_core::{
///     Association, Backend, BackendError, BackendResult, Role, SearchHit, TemplateId, Track,
/// };
///
/// struct Constant;
///
/// impl Backend for Constant {
///     type Media = ();
///     type Template = f32;
///     type Gallery = Vec<(TemplateId, f32)>;
///
///     fn name(&self) -> &str { "constant" }
///     fn load_media(&self, _: &Path) -> BackendResult<()> { Ok(()) }
///     fn free_media(&self, _: ()) -> BackendResult<()> { Ok(()) }
///     fn detect(&self, _: &(), _: u32) -> BackendResult<Vec<Track>> { Ok(Vec::new()) }
///     fn create_template(&self, a: &[Association<'_, ()>], _: Role) -> BackendResult<f32> {
///         if a.is_empty() { Err(BackendError::MissingAttributes) } else { Ok(1.0) }
///     }
///     fn serialize_template(&self, t: &f32, w: &mut dyn Write) -> BackendResult<()> {
///         w.write_all(&t.to_le_bytes()).map_err(|e| BackendError::Failed {
///             operation: "serialize_template", reason: e.to_string() })
///     }
///     fn deserialize_template(&self, r: &mut dyn Read) -> BackendResult<f32> {
///         let mut buf = [0_u8; 4];
///         r.read_exact(&mut buf).map_err(|e| BackendError::Corrupt { reason: e.to_string() })?;
///         Ok(f32::from_le_bytes(buf))
///     }
///     fn delete_template(&self, _: f32) -> BackendResult<()> { Ok(()) }
///     fn verify(&self, a: &f32, b: &f32) -> BackendResult<f32> { Ok(a * b) }
///     fn create_gallery(&self, t: &[&f32], ids: &[TemplateId]) -> BackendResult<Self::Gallery> {
///         Ok(ids.iter().copied().zip(t.iter().map(|v| **v)).collect())
///     }
///     fn gallery_insert(&self, g: &mut Self::Gallery, t: &f32, id: TemplateId) -> BackendResult<()> {
///         g.push((id, *t)); Ok(())
///     }
///     fn gallery_remove(&self, g: &mut Self::Gallery, id: TemplateId) -> BackendResult<()> {
///         g.retain(|(held, _)| *held != id); Ok(())
///     }
///     fn prepare_gallery(&self, _: &mut Self::Gallery) -> BackendResult<()> { Ok(()) }
///     fn serialize_gallery(&self, _: &Self::Gallery, _: &mut dyn Write) -> BackendResult<()> { Ok(()) }
///     fn deserialize_gallery(&self, _: &mut dyn Read) -> BackendResult<Self::Gallery> { Ok(Vec::new()) }
///     fn delete_gallery(&self, _: Self::Gallery) -> BackendResult<()> { Ok(()) }
///     fn search(&self, p: &f32, g: &Self::Gallery, k: usize) -> BackendResult<Vec<SearchHit>> {
///         Ok(g.iter().take(k).map(|(id, t)| SearchHit { id: *id, similarity: p * t }).collect())
///     }
/// }
///
/// let backend = Constant;
/// let track = Track::default();
/// let template = backend.create_template(&[Association { media: &(), track: &track }], Role::Enrollment)?;
/// assert_eq!(backend.verify(&template, &template)?, 1.0);
/// assert!(backend.cluster_templates(&[&template], &[1], 10).is_err());
/// # Ok::<(), BackendError>(())
/// ```
pub trait Backend {
    /// Decoded media item.
    type Media;
    /// Recognition template.
    type Template;
    /// Searchable template collection.
    type Gallery;

    /// Returns a human-readable name.
    fn name(&self) -> &str;

    /// Loads the image or video at `path`.
    fn load_media(&self, path: &Path) -> BackendResult<Self::Media>;

    /// Releases a loaded media item.
    fn free_media(&self, media: Self::Media) -> BackendResult<()>;

    /// Finds faces at least `min_face_size` pixels across.
    fn detect(&self, media: &Self::Media, min_face_size: u32) -> BackendResult<Vec<Track>>;

    /// Builds one template from every association of a record.
    ///
    /// # Errors
    /// [`BackendError::MissingAttributes`] and [`BackendError::FailureToEnroll`]
    /// are the expected, tallied failures; any other variant is counted as an
    /// unclassified error.
    fn create_template(
        &self,
        associations: &[Association<'_, Self::Media>],
        role: Role,
    ) -> BackendResult<Self::Template>;

    /// Writes `template` to `writer`.
    fn serialize_template(
        &self,
        template: &Self::Template,
        writer: &mut dyn Write,
    ) -> BackendResult<()>;

    /// Reads a template previously written by [`Self::serialize_template`].
    fn deserialize_template(&self, reader: &mut dyn Read) -> BackendResult<Self::Template>;

    /// Releases a template.
    fn delete_template(&self, template: Self::Template) -> BackendResult<()>;

    /// Compares two templates; larger similarities mean closer matches.
    fn verify(
        &self,
        reference: &Self::Template,
        verification: &Self::Template,
    ) -> BackendResult<f32>;

    /// Builds a gallery holding `templates[i]` under `ids[i]`.
    fn create_gallery(
        &self,
        templates: &[&Self::Template],
        ids: &[TemplateId],
    ) -> BackendResult<Self::Gallery>;

    /// Adds a template. The gallery needs preparing again before search.
    fn gallery_insert(
        &self,
        gallery: &mut Self::Gallery,
        template: &Self::Template,
        id: TemplateId,
    ) -> BackendResult<()>;

    /// Removes a template. The gallery needs preparing again before search.
    fn gallery_remove(&self, gallery: &mut Self::Gallery, id: TemplateId) -> BackendResult<()>;

    /// Makes a gallery ready for [`Self::search`].
    fn prepare_gallery(&self, gallery: &mut Self::Gallery) -> BackendResult<()>;

    /// Writes `gallery` to `writer`.
    fn serialize_gallery(&self, gallery: &Self::Gallery, writer: &mut dyn Write)
    -> BackendResult<()>;

    /// Reads a gallery previously written by [`Self::serialize_gallery`].
    fn deserialize_gallery(&self, reader: &mut dyn Read) -> BackendResult<Self::Gallery>;

    /// Releases a gallery.
    fn delete_gallery(&self, gallery: Self::Gallery) -> BackendResult<()>;

    /// Returns at most `num_requested` hits, best first.
    fn search(
        &self,
        probe: &Self::Template,
        gallery: &Self::Gallery,
        num_requested: usize,
    ) -> BackendResult<Vec<SearchHit>>;

    /// Clusters templates. `hint` is an advisory upper bound on the number of
    /// identities, expressed as a power of ten.
    ///
    /// The default implementation reports [`BackendError::NotImplemented`].
    fn cluster_templates(
        &self,
        templates: &[&Self::Template],
        ids: &[TemplateId],
        hint: u64,
    ) -> BackendResult<Vec<ClusterAssignment>> {
        let _ = (templates, ids, hint);
        Err(BackendError::NotImplemented {
            operation: "cluster_templates",
        })
    }

    /// Detects and clusters faces directly from media.
    ///
    /// The default implementation reports [`BackendError::NotImplemented`].
    fn cluster_media(
        &self,
        media: &[&Self::Media],
        ids: &[u64],
        hint: u64,
    ) -> BackendResult<Vec<MediaClusterItem>> {
        let _ = (media, ids, hint);
        Err(BackendError::NotImplemented {
            operation: "cluster_media",
        })
    }
}
