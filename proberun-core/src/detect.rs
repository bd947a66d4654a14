//! Face detection over a list of media files.

use std::path::PathBuf;

use tracing::{info, instrument, warn};

use crate::{
    backend::Backend,
    error::{BackendError, Result},
    harness::{Harness, release_media},
    manifest::{CsvWriter, read_media_list},
    metrics::{Category, ErrorClass, MetricsCollector},
};

/// Header of the detection file.
pub const DETECT_HEADER: &str = "FILENAME,FACE_X,FACE_Y,FACE_WIDTH,FACE_HEIGHT,CONFIDENCE";

/// Inputs and outputs of a detection run.
#[derive(Debug, Clone)]
pub struct DetectJob {
    /// One media path per line.
    pub media_list: PathBuf,
    /// Detection file to write.
    pub output: PathBuf,
}

/// Counts reported by [`Harness::detect`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectSummary {
    /// Media files listed.
    pub media: usize,
    /// Detection rows written, one per track frame.
    pub faces: usize,
    /// Media that could not be loaded or yielded no face.
    pub failed: usize,
}

impl Harness {
    /// Detects faces in every listed file and writes one row per frame of
    /// every detected track.
    ///
    /// A file with no face, or whose detection fails, is tallied and skipped.
    ///
    /// # Errors
    /// Only failures to read the list or write the output are fatal.
    #[instrument(
        name = "core.detect",
        err,
        skip(self, backend, metrics, job),
        fields(backend = %backend.name(), min_face_size = self.min_face_size()),
    )]
    pub fn detect<B: Backend>(
        &self,
        backend: &B,
        metrics: &mut MetricsCollector,
        job: &DetectJob,
    ) -> Result<DetectSummary> {
        let filenames = read_media_list(&job.media_list)?;
        let mut out = CsvWriter::create(&job.output, DETECT_HEADER)?;
        let mut summary = DetectSummary::default();

        for filename in &filenames {
            summary.media += 1;
            let path = self.media_path(filename);
            let media = match metrics.time(Category::LoadMedia, || backend.load_media(&path)) {
                Ok(media) => media,
                Err(error) => {
                    metrics.tally(ErrorClass::Other);
                    summary.failed += 1;
                    warn!(path = %path.display(), error = %error, "failed to load media");
                    continue;
                }
            };
            let detected = metrics.time(Category::Detect, || {
                backend.detect(&media, self.min_face_size())
            });
            release_media(backend, metrics, media);

            let tracks = match detected {
                Ok(tracks) if !tracks.is_empty() => tracks,
                Ok(_) => record_failure(
                    metrics,
                    &mut summary,
                    filename,
                    &BackendError::FailureToDetect,
                ),
                Err(error) => record_failure(metrics, &mut summary, filename, &error),
            };
            for track in &tracks {
                for frame in &track.frames {
                    let face = frame.face;
                    out.row(format_args!(
                        "{filename},{},{},{},{},{}",
                        face.x, face.y, face.width, face.height, track.detection_confidence
                    ))?;
                    summary.faces += 1;
                }
            }
        }
        out.finish()?;

        info!(
            media = summary.media,
            faces = summary.faces,
            failed = summary.failed,
            "detection completed"
        );
        Ok(summary)
    }
}

fn record_failure<T>(
    metrics: &mut MetricsCollector,
    summary: &mut DetectSummary,
    filename: &str,
    error: &BackendError,
) -> Vec<T> {
    let class = match error {
        BackendError::FailureToDetect => ErrorClass::FailureToDetect,
        _ => ErrorClass::Other,
    };
    metrics.tally(class);
    summary.failed += 1;
    warn!(filename, class = class.as_str(), error = %error, "detection failed");
    Vec::new()
}
