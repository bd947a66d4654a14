//! Face track data model shared by metadata ingestion, orchestrators and
//! backends.
//!
//! Every numeric attribute that may be absent from the input is stored as
//! `f32::NAN` ("unknown") rather than zero, so a backend can tell a missing
//! measurement apart from a measured value of zero.

/// Identifier of an enrolled template.
pub type TemplateId = u64;

/// Identifier of a subject. Negative values mean the subject is unset.
pub type SubjectId = i64;

/// Subject identifier used when the input does not name a subject.
pub const UNSET_SUBJECT: SubjectId = -1;

/// Axis-aligned face bounding box in pixel coordinates.
///
/// # Examples
/// ```
/// use proberun_core::FaceBox;
///
/// assert!(!FaceBox::UNKNOWN.is_known());
/// assert!(FaceBox::new(1.0, 2.0, 30.0, 40.0).is_known());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Box width.
    pub width: f32,
    /// Box height.
    pub height: f32,
}

impl FaceBox {
    /// A box whose coordinates are all unknown.
    pub const UNKNOWN: Self = Self {
        x: f32::NAN,
        y: f32::NAN,
        width: f32::NAN,
        height: f32::NAN,
    };

    /// Creates a box from explicit coordinates.
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns `true` when every coordinate is a finite number.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// A 2-D landmark position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f32,
    /// Vertical coordinate.
    pub y: f32,
}

impl Point {
    /// A landmark whose position is unknown.
    pub const UNKNOWN: Self = Self {
        x: f32::NAN,
        y: f32::NAN,
    };
}

/// Attributes describing a face in a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAttributes {
    /// Frame index inside a video; `None` for still images.
    pub frame_number: Option<u32>,
    /// Face bounding box.
    pub face: FaceBox,
    /// Right eye centre.
    pub right_eye: Point,
    /// Left eye centre.
    pub left_eye: Point,
    /// Base of the nose.
    pub nose_base: Point,
    /// Yaw angle in degrees.
    pub face_yaw: f32,
    /// Forehead visibility flag (1.0 visible, 0.0 occluded).
    pub forehead_visible: f32,
    /// Eye visibility flag.
    pub eyes_visible: f32,
    /// Nose and mouth visibility flag.
    pub nose_mouth_visible: f32,
    /// Indoor capture flag.
    pub indoor: f32,
}

impl Default for FrameAttributes {
    fn default() -> Self {
        Self {
            frame_number: None,
            face: FaceBox::UNKNOWN,
            right_eye: Point::UNKNOWN,
            left_eye: Point::UNKNOWN,
            nose_base: Point::UNKNOWN,
            face_yaw: f32::NAN,
            forehead_visible: f32::NAN,
            eyes_visible: f32::NAN,
            nose_mouth_visible: f32::NAN,
            indoor: f32::NAN,
        }
    }
}

impl FrameAttributes {
    /// Creates a frame carrying only a face box.
    #[must_use]
    pub fn with_face(face: FaceBox) -> Self {
        Self {
            face,
            ..Self::default()
        }
    }
}

/// Ordered per-frame attributes of one subject inside one piece of media,
/// plus track-level scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Per-frame attributes in frame order.
    pub frames: Vec<FrameAttributes>,
    /// Detection confidence reported for the whole track.
    pub detection_confidence: f32,
    /// Gender code.
    pub gender: f32,
    /// Age in years.
    pub age: f32,
    /// Skin tone code.
    pub skin_tone: f32,
    /// Sighting identifier grouping frames of the same appearance.
    pub sighting_id: Option<i64>,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            detection_confidence: f32::NAN,
            gender: f32::NAN,
            age: f32::NAN,
            skin_tone: f32::NAN,
            sighting_id: None,
        }
    }
}

impl Track {
    /// Creates a track from frames with every track-level scalar unknown.
    ///
    /// # Examples
    /// ```
    /// use proberun_core::{FaceBox, FrameAttributes, Track};
    ///
    /// let track = Track::from_frames(vec![FrameAttributes::with_face(FaceBox::new(
    ///     0.0, 0.0, 10.0, 10.0,
    /// ))]);
    /// assert_eq!(track.frames.len(), 1);
    /// assert!(track.age.is_nan());
    /// ```
    #[must_use]
    pub fn from_frames(frames: Vec<FrameAttributes>) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }
}

/// The unit enrolled into one template: a maximal run of contiguous metadata
/// rows sharing a template id.
///
/// Records are produced by [`crate::MetadataGrouper`] and are never mutated
/// once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRecord {
    template_id: TemplateId,
    subject_id: SubjectId,
    associations: Vec<(String, Track)>,
}

impl TemplateRecord {
    /// Creates a record holding a single `(filename, track)` association.
    ///
    /// # Examples
    /// ```
    /// use proberun_core::{TemplateRecord, Track};
    ///
    /// let record = TemplateRecord::new(1, 5, "a.jpg", Track::default());
    /// assert_eq!(record.template_id(), 1);
    /// assert_eq!(record.associations().len(), 1);
    /// ```
    #[must_use]
    pub fn new(
        template_id: TemplateId,
        subject_id: SubjectId,
        filename: impl Into<String>,
        track: Track,
    ) -> Self {
        Self {
            template_id,
            subject_id,
            associations: vec![(filename.into(), track)],
        }
    }

    /// Folds a later contiguous row into this record.
    ///
    /// The identifying fields are overwritten with the later row's values and
    /// its associations are appended after the existing ones.
    pub(crate) fn merge(&mut self, later: Self) {
        self.template_id = later.template_id;
        self.subject_id = later.subject_id;
        self.associations.extend(later.associations);
    }

    /// Template identifier.
    #[must_use]
    pub const fn template_id(&self) -> TemplateId {
        self.template_id
    }

    /// Subject identifier; negative when unset.
    #[must_use]
    pub const fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    /// Every `(filename, track)` association in file order.
    #[must_use]
    pub fn associations(&self) -> &[(String, Track)] {
        &self.associations
    }

    /// The association consulted by callers that need a single one.
    ///
    /// This is the most recently appended association, not the first one:
    /// a record grown by merging reports its newest file here.
    #[must_use]
    pub fn primary(&self) -> Option<(&str, &Track)> {
        self.associations
            .last()
            .map(|(filename, track)| (filename.as_str(), track))
    }
}
