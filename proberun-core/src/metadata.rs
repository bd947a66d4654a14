//! Metadata CSV ingestion.
//!
//! The header line names the columns; unrecognised names are skipped. Each
//! data row becomes one `(filename, track)` association holding a single
//! frame. Contiguous rows sharing a template id are folded into one
//! [`TemplateRecord`]; the same id reappearing after a different id starts a
//! new record.

use std::io::{BufRead, Lines};

use crate::{
    error::MetadataError,
    track::{FrameAttributes, TemplateRecord, Track, UNSET_SUBJECT},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    TemplateId,
    SubjectId,
    Filename,
    VideoFilename,
    SightingId,
    FrameNum,
    FaceX,
    FaceY,
    FaceWidth,
    FaceHeight,
    RightEyeX,
    RightEyeY,
    LeftEyeX,
    LeftEyeY,
    NoseBaseX,
    NoseBaseY,
    FaceYaw,
    ForeheadVisible,
    EyesVisible,
    NoseMouthVisible,
    Indoor,
    Gender,
    Age,
    SkinTone,
    Confidence,
}

impl Column {
    const ALL: [Self; 25] = [
        Self::TemplateId,
        Self::SubjectId,
        Self::Filename,
        Self::VideoFilename,
        Self::SightingId,
        Self::FrameNum,
        Self::FaceX,
        Self::FaceY,
        Self::FaceWidth,
        Self::FaceHeight,
        Self::RightEyeX,
        Self::RightEyeY,
        Self::LeftEyeX,
        Self::LeftEyeY,
        Self::NoseBaseX,
        Self::NoseBaseY,
        Self::FaceYaw,
        Self::ForeheadVisible,
        Self::EyesVisible,
        Self::NoseMouthVisible,
        Self::Indoor,
        Self::Gender,
        Self::Age,
        Self::SkinTone,
        Self::Confidence,
    ];

    const fn name(self) -> &'static str {
        match self {
            Self::TemplateId => "TEMPLATE_ID",
            Self::SubjectId => "SUBJECT_ID",
            Self::Filename => "FILENAME",
            Self::VideoFilename => "VIDEO_FILENAME",
            Self::SightingId => "SIGHTING_ID",
            Self::FrameNum => "FRAME_NUM",
            Self::FaceX => "FACE_X",
            Self::FaceY => "FACE_Y",
            Self::FaceWidth => "FACE_WIDTH",
            Self::FaceHeight => "FACE_HEIGHT",
            Self::RightEyeX => "RIGHT_EYE_X",
            Self::RightEyeY => "RIGHT_EYE_Y",
            Self::LeftEyeX => "LEFT_EYE_X",
            Self::LeftEyeY => "LEFT_EYE_Y",
            Self::NoseBaseX => "NOSE_BASE_X",
            Self::NoseBaseY => "NOSE_BASE_Y",
            Self::FaceYaw => "FACE_YAW",
            Self::ForeheadVisible => "FOREHEAD_VISIBLE",
            Self::EyesVisible => "EYES_VISIBLE",
            Self::NoseMouthVisible => "NOSE_MOUTH_VISIBLE",
            Self::Indoor => "INDOOR",
            Self::Gender => "GENDER",
            Self::Age => "AGE",
            Self::SkinTone => "SKIN_TONE",
            Self::Confidence => "CONFIDENCE",
        }
    }

    fn from_header(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_matches('"');
        Self::ALL
            .into_iter()
            .find(|column| column.name().eq_ignore_ascii_case(trimmed))
    }
}

/// Streams [`TemplateRecord`]s out of a metadata CSV.
///
/// # Examples
/// ```
/// use std::io::Cursor;
/// use proberun_core::MetadataGrouper;
///
/// let csv = "TEMPLATE_ID,SUBJECT_ID,FILENAME\n1,5,a.jpg\n1,5,b.jpg\n2,6,c.jpg\n";
/// let records = MetadataGrouper::new(Cursor::new(csv))?
///     .collect::<Result<Vec<_>, _>>()?;
/// assert_eq!(records.len(), 2);
/// assert_eq!(records[0].associations().len(), 2);
/// assert_eq!(records[1].subject_id(), 6);
/// # Ok::<(), proberun_core::MetadataError>(())
/// ```
pub struct MetadataGrouper<R> {
    lines: Lines<R>,
    columns: Vec<Option<Column>>,
    line: usize,
    pending: Option<TemplateRecord>,
    failed: bool,
}

impl<R: BufRead> MetadataGrouper<R> {
    /// Reads the header line and prepares to stream records.
    ///
    /// # Errors
    /// Returns [`MetadataError::MissingHeader`] for an empty stream and
    /// [`MetadataError::MissingColumn`] when the header names neither a
    /// template id nor a media filename column.
    pub fn new(reader: R) -> Result<Self, MetadataError> {
        let mut lines = reader.lines();
        let header = lines.next().ok_or(MetadataError::MissingHeader)??;
        let columns: Vec<Option<Column>> = header.split(',').map(Column::from_header).collect();

        if !columns.contains(&Some(Column::TemplateId)) {
            return Err(MetadataError::MissingColumn {
                column: Column::TemplateId.name(),
            });
        }
        if !columns.contains(&Some(Column::Filename))
            && !columns.contains(&Some(Column::VideoFilename))
        {
            return Err(MetadataError::MissingColumn {
                column: Column::Filename.name(),
            });
        }

        Ok(Self {
            lines,
            columns,
            line: 1,
            pending: None,
            failed: false,
        })
    }

    /// Returns the next record, or `None` once the stream is exhausted.
    ///
    /// # Errors
    /// Returns [`MetadataError`] when a row is malformed or the stream
    /// cannot be read.
    pub fn next_record(&mut self) -> Result<Option<TemplateRecord>, MetadataError> {
        loop {
            let Some(row) = self.read_row()? else {
                return Ok(self.pending.take());
            };
            match self.pending.as_mut() {
                Some(current) if current.template_id() == row.template_id() => current.merge(row),
                _ => {
                    if let Some(finished) = self.pending.replace(row) {
                        return Ok(Some(finished));
                    }
                }
            }
        }
    }

    fn read_row(&mut self) -> Result<Option<TemplateRecord>, MetadataError> {
        for text in self.lines.by_ref() {
            self.line += 1;
            let text = text?;
            if text.trim().is_empty() {
                continue;
            }
            return parse_row(&self.columns, self.line, &text).map(Some);
        }
        Ok(None)
    }
}

impl<R: BufRead> Iterator for MetadataGrouper<R> {
    type Item = Result<TemplateRecord, MetadataError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.next_record().transpose();
        if matches!(next, Some(Err(_))) {
            self.failed = true;
        }
        next
    }
}

#[derive(Default)]
struct RowCells<'a> {
    template_id: &'a str,
    subject_id: &'a str,
    filename: &'a str,
    video_filename: &'a str,
}

fn parse_row(
    columns: &[Option<Column>],
    line: usize,
    text: &str,
) -> Result<TemplateRecord, MetadataError> {
    let mut cells = RowCells::default();
    let mut frame = FrameAttributes::default();
    let mut track = Track::default();

    for (column, raw) in columns.iter().zip(text.split(',')) {
        let Some(column) = *column else {
            continue;
        };
        let cell = raw.trim().trim_matches('"');
        let number = || parse_f32(line, column, cell);
        match column {
            Column::TemplateId => cells.template_id = cell,
            Column::SubjectId => cells.subject_id = cell,
            Column::Filename => cells.filename = cell,
            Column::VideoFilename => cells.video_filename = cell,
            Column::SightingId => track.sighting_id = parse_optional(line, column, cell)?,
            Column::FrameNum => frame.frame_number = parse_optional(line, column, cell)?,
            Column::FaceX => frame.face.x = number()?,
            Column::FaceY => frame.face.y = number()?,
            Column::FaceWidth => frame.face.width = number()?,
            Column::FaceHeight => frame.face.height = number()?,
            Column::RightEyeX => frame.right_eye.x = number()?,
            Column::RightEyeY => frame.right_eye.y = number()?,
            Column::LeftEyeX => frame.left_eye.x = number()?,
            Column::LeftEyeY => frame.left_eye.y = number()?,
            Column::NoseBaseX => frame.nose_base.x = number()?,
            Column::NoseBaseY => frame.nose_base.y = number()?,
            Column::FaceYaw => frame.face_yaw = number()?,
            Column::ForeheadVisible => frame.forehead_visible = number()?,
            Column::EyesVisible => frame.eyes_visible = number()?,
            Column::NoseMouthVisible => frame.nose_mouth_visible = number()?,
            Column::Indoor => frame.indoor = number()?,
            Column::Gender => track.gender = number()?,
            Column::Age => track.age = number()?,
            Column::SkinTone => track.skin_tone = number()?,
            Column::Confidence => track.detection_confidence = number()?,
        }
    }

    let template_id = parse_optional(line, Column::TemplateId, cells.template_id)?.ok_or(
        MetadataError::EmptyField {
            line,
            column: Column::TemplateId.name(),
        },
    )?;
    let subject_id =
        parse_optional(line, Column::SubjectId, cells.subject_id)?.unwrap_or(UNSET_SUBJECT);
    let filename = if cells.video_filename.is_empty() {
        cells.filename
    } else {
        cells.video_filename
    };
    if filename.is_empty() {
        return Err(MetadataError::EmptyField {
            line,
            column: Column::Filename.name(),
        });
    }

    track.frames.push(frame);
    Ok(TemplateRecord::new(template_id, subject_id, filename, track))
}

fn parse_f32(line: usize, column: Column, cell: &str) -> Result<f32, MetadataError> {
    Ok(parse_optional(line, column, cell)?.unwrap_or(f32::NAN))
}

fn parse_optional<T: std::str::FromStr>(
    line: usize,
    column: Column,
    cell: &str,
) -> Result<Option<T>, MetadataError> {
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse()
        .map(Some)
        .map_err(|_| MetadataError::InvalidNumber {
            line,
            column: column.name(),
            value: cell.to_owned(),
        })
}
