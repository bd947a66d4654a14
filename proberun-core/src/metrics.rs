//! Latency and error accounting for backend calls.
//!
//! A [`MetricsCollector`] is owned by the caller and passed by `&mut` into
//! every orchestrator, so a run's statistics are scoped to the collector the
//! caller chose. Draining it returns the accumulated [`Metrics`] and resets
//! the collector.
//!
//! With the `metrics` feature enabled every sample is also mirrored into the
//! `metrics` facade:
//!
//! - `proberun_backend_latency_ms` (histogram, labelled by `operation`)
//! - `proberun_backend_errors_total` (counter, labelled by `class`)
//!
//! The mirroring is only compiled, and only tested, under
//! `cargo test -p proberun-core --features metrics`.

use std::{
    fmt,
    io::{self, Write},
    time::Instant,
};

use crate::error::BackendError;

/// Backend operation a timing sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Loading an image or video.
    LoadMedia,
    /// Releasing a media item.
    FreeMedia,
    /// Face detection.
    Detect,
    /// Template creation.
    CreateTemplate,
    /// Template serialization.
    SerializeTemplate,
    /// Template deserialization.
    DeserializeTemplate,
    /// Template release.
    DeleteTemplate,
    /// 1:1 comparison.
    Verify,
    /// Gallery construction.
    CreateGallery,
    /// Gallery insertion.
    GalleryInsert,
    /// Gallery removal.
    GalleryRemove,
    /// Gallery preparation.
    PrepareGallery,
    /// Gallery serialization.
    SerializeGallery,
    /// Gallery deserialization.
    DeserializeGallery,
    /// Gallery release.
    DeleteGallery,
    /// 1:N search.
    Search,
    /// Clustering.
    Cluster,
}

impl Category {
    /// Every category in report order.
    pub const ALL: [Self; 17] = [
        Self::LoadMedia,
        Self::FreeMedia,
        Self::Detect,
        Self::CreateTemplate,
        Self::SerializeTemplate,
        Self::DeserializeTemplate,
        Self::DeleteTemplate,
        Self::Verify,
        Self::CreateGallery,
        Self::GalleryInsert,
        Self::GalleryRemove,
        Self::PrepareGallery,
        Self::SerializeGallery,
        Self::DeserializeGallery,
        Self::DeleteGallery,
        Self::Search,
        Self::Cluster,
    ];

    /// Stable snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoadMedia => "load_media",
            Self::FreeMedia => "free_media",
            Self::Detect => "detect",
            Self::CreateTemplate => "create_template",
            Self::SerializeTemplate => "serialize_template",
            Self::DeserializeTemplate => "deserialize_template",
            Self::DeleteTemplate => "delete_template",
            Self::Verify => "verify",
            Self::CreateGallery => "create_gallery",
            Self::GalleryInsert => "gallery_insert",
            Self::GalleryRemove => "gallery_remove",
            Self::PrepareGallery => "prepare_gallery",
            Self::SerializeGallery => "serialize_gallery",
            Self::DeserializeGallery => "deserialize_gallery",
            Self::DeleteGallery => "delete_gallery",
            Self::Search => "search",
            Self::Cluster => "cluster",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class under which a failed backend call is tallied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The backend reported missing attributes.
    MissingAttributes,
    /// The backend found no face.
    FailureToDetect,
    /// The backend could not build a template.
    FailureToEnroll,
    /// Any unclassified failure.
    Other,
}

impl ErrorClass {
    /// Stable snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingAttributes => "missing_attributes",
            Self::FailureToDetect => "failure_to_detect",
            Self::FailureToEnroll => "failure_to_enroll",
            Self::Other => "other",
        }
    }
}

impl From<&BackendError> for ErrorClass {
    fn from(error: &BackendError) -> Self {
        match error {
            BackendError::MissingAttributes => Self::MissingAttributes,
            BackendError::FailureToDetect => Self::FailureToDetect,
            BackendError::FailureToEnroll => Self::FailureToEnroll,
            _ => Self::Other,
        }
    }
}

/// Summary statistics of one category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    /// Number of samples.
    pub count: usize,
    /// Mean elapsed milliseconds; NaN without samples.
    pub mean: f64,
    /// Population standard deviation; NaN without samples.
    pub stddev: f64,
}

impl Stats {
    /// Computes statistics with the two-pass formulas.
    ///
    /// # Examples
    /// ```
    /// use proberun_core::Stats;
    ///
    /// let stats = Stats::from_samples(&[5.0, 5.0, 5.0]);
    /// assert_eq!((stats.count, stats.mean, stats.stddev), (3, 5.0, 0.0));
    /// assert!(Stats::from_samples(&[]).mean.is_nan());
    /// ```
    #[must_use]
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self {
                count: 0,
                mean: f64::NAN,
                stddev: f64::NAN,
            };
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples
            .iter()
            .map(|value| {
                let deviation = value - mean;
                deviation * deviation
            })
            .sum::<f64>()
            / n;
        Self {
            count: samples.len(),
            mean,
            stddev: variance.sqrt(),
        }
    }
}

/// Counts of tallied failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounts {
    /// Missing-attribute failures.
    pub missing_attributes: usize,
    /// Failures to detect.
    pub failure_to_detect: usize,
    /// Failures to enroll.
    pub failure_to_enroll: usize,
    /// Unclassified failures.
    pub other: usize,
}

impl ErrorCounts {
    fn bump(&mut self, class: ErrorClass) {
        let slot = match class {
            ErrorClass::MissingAttributes => &mut self.missing_attributes,
            ErrorClass::FailureToDetect => &mut self.failure_to_detect,
            ErrorClass::FailureToEnroll => &mut self.failure_to_enroll,
            ErrorClass::Other => &mut self.other,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Statistics drained from a [`MetricsCollector`].
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    stats: Vec<(Category, Stats)>,
    errors: ErrorCounts,
}

impl Metrics {
    /// Statistics for `category`.
    #[must_use]
    pub fn stats(&self, category: Category) -> Stats {
        self.stats
            .iter()
            .find(|(held, _)| *held == category)
            .map_or_else(|| Stats::from_samples(&[]), |(_, stats)| *stats)
    }

    /// Tallied failures.
    #[must_use]
    pub const fn errors(&self) -> ErrorCounts {
        self.errors
    }

    /// Writes a table of every category that recorded samples, followed by
    /// the error counters.
    ///
    /// # Errors
    /// Returns [`io::Error`] if writing to `writer` fails.
    ///
    /// # Examples
    /// ```
    /// use proberun_core::{Category, MetricsCollector};
    ///
    /// let mut collector = MetricsCollector::new();
    /// collector.record(Category::Verify, 2.0);
    /// let mut out = Vec::new();
    /// collector.drain().render(&mut out)?;
    /// let text = String::from_utf8(out).expect("report is UTF-8");
    /// assert!(text.contains("verify"));
    /// assert!(!text.contains("search"));
    /// # Ok::<(), std::io::Error>(())
    /// ```
    pub fn render(&self, mut writer: impl Write) -> io::Result<()> {
        writeln!(
            writer,
            "{:<22}{:>8}{:>14}{:>14}",
            "operation", "count", "mean (ms)", "stddev (ms)"
        )?;
        for (category, stats) in self.stats.iter().filter(|(_, stats)| stats.count > 0) {
            writeln!(
                writer,
                "{:<22}{:>8}{:>14.3}{:>14.3}",
                category.as_str(),
                stats.count,
                stats.mean,
                stats.stddev
            )?;
        }
        writeln!(writer, "missing attributes: {}", self.errors.missing_attributes)?;
        writeln!(writer, "failure to detect: {}", self.errors.failure_to_detect)?;
        writeln!(writer, "failure to enroll: {}", self.errors.failure_to_enroll)?;
        writeln!(writer, "other errors: {}", self.errors.other)?;
        Ok(())
    }
}

/// Accumulates timing samples and failure counters for one run.
///
/// Not synchronised: share it between threads only behind a lock.
///
/// # Examples
/// ```
/// use proberun_core::{Category, ErrorClass, MetricsCollector};
///
/// let mut collector = MetricsCollector::new();
/// let value = collector.time(Category::Search, || 42);
/// collector.tally(ErrorClass::FailureToEnroll);
/// assert_eq!(value, 42);
///
/// let metrics = collector.drain();
/// assert_eq!(metrics.stats(Category::Search).count, 1);
/// assert_eq!(metrics.errors().failure_to_enroll, 1);
/// assert_eq!(collector.drain().stats(Category::Search).count, 0);
/// ```
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    samples: Vec<Vec<f64>>,
    errors: ErrorCounts,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            samples: vec![Vec::new(); Category::ALL.len()],
            errors: ErrorCounts::default(),
        }
    }
}

impl MetricsCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one elapsed time in milliseconds.
    pub fn record(&mut self, category: Category, elapsed_ms: f64) {
        #[cfg(feature = "metrics")]
        ::metrics::histogram!("proberun_backend_latency_ms", "operation" => category.as_str())
            .record(elapsed_ms);
        if let Some(samples) = self.samples.get_mut(category.index()) {
            samples.push(elapsed_ms);
        }
    }

    /// Runs `call`, recording its wall-clock duration under `category`.
    pub fn time<T>(&mut self, category: Category, call: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let value = call();
        self.record(category, started.elapsed().as_secs_f64() * 1000.0);
        value
    }

    /// Counts one failure of `class`.
    pub fn tally(&mut self, class: ErrorClass) {
        #[cfg(feature = "metrics")]
        ::metrics::counter!("proberun_backend_errors_total", "class" => class.as_str()).increment(1);
        self.errors.bump(class);
    }

    /// Returns the accumulated statistics and resets the collector.
    pub fn drain(&mut self) -> Metrics {
        let drained = std::mem::take(self);
        let stats = Category::ALL
            .iter()
            .zip(drained.samples.iter())
            .map(|(category, samples)| (*category, Stats::from_samples(samples)))
            .collect();
        Metrics {
            stats,
            errors: drained.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[5.0, 5.0, 5.0], 5.0, 0.0)]
    #[case(&[1.0, 3.0], 2.0, 1.0)]
    #[case(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 5.0, 2.0)]
    fn stats_match_two_pass_reference(
        #[case] samples: &[f64],
        #[case] mean: f64,
        #[case] stddev: f64,
    ) {
        let stats = Stats::from_samples(samples);
        assert_eq!(stats.count, samples.len());
        assert!((stats.mean - mean).abs() < 1e-12);
        assert!((stats.stddev - stddev).abs() < 1e-12);
    }

    #[test]
    fn empty_category_reports_nan() {
        let metrics = MetricsCollector::new().drain();
        let stats = metrics.stats(Category::Cluster);
        assert_eq!(stats.count, 0);
        assert!(stats.mean.is_nan());
        assert!(stats.stddev.is_nan());
    }

    #[test]
    fn drain_resets_samples_and_counters() {
        let mut collector = MetricsCollector::new();
        collector.record(Category::LoadMedia, 1.5);
        collector.tally(ErrorClass::Other);
        collector.tally(ErrorClass::Other);

        let first = collector.drain();
        assert_eq!(first.stats(Category::LoadMedia).count, 1);
        assert_eq!(first.errors().other, 2);

        let second = collector.drain();
        assert_eq!(second.stats(Category::LoadMedia).count, 0);
        assert_eq!(second.errors(), ErrorCounts::default());
    }

    #[rstest]
    #[case(BackendError::MissingAttributes, ErrorClass::MissingAttributes)]
    #[case(BackendError::FailureToDetect, ErrorClass::FailureToDetect)]
    #[case(BackendError::FailureToEnroll, ErrorClass::FailureToEnroll)]
    #[case(BackendError::UnknownId { id: 1 }, ErrorClass::Other)]
    fn backend_errors_map_to_classes(#[case] error: BackendError, #[case] expected: ErrorClass) {
        assert_eq!(ErrorClass::from(&error), expected);
    }

    #[test]
    fn render_omits_empty_categories() {
        let mut collector = MetricsCollector::new();
        collector.record(Category::CreateTemplate, 4.0);
        collector.tally(ErrorClass::FailureToDetect);
        let mut out = Vec::new();
        collector
            .drain()
            .render(&mut out)
            .expect("rendering into a Vec succeeds");
        let text = String::from_utf8(out).expect("report is UTF-8");

        assert!(text.contains("create_template"));
        assert!(!text.contains("load_media"));
        assert!(text.contains("failure to detect: 1"));
    }

    #[cfg(feature = "metrics")]
    mod facade {
        use std::sync::Mutex;

        use ::metrics::{
            Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
        };

        use super::*;

        /// Remembers every key registered through the facade.
        #[derive(Default)]
        struct KeyLog(Mutex<Vec<String>>);

        impl KeyLog {
            fn push(&self, key: &Key) {
                let labels: Vec<String> = key
                    .labels()
                    .map(|label| format!("{}={}", label.key(), label.value()))
                    .collect();
                self.0
                    .lock()
                    .expect("key log lock is not poisoned")
                    .push(format!("{}{{{}}}", key.name(), labels.join(",")));
            }

            fn keys(&self) -> Vec<String> {
                self.0.lock().expect("key log lock is not poisoned").clone()
            }
        }

        impl Recorder for KeyLog {
            fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
            fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
            fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

            fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
                self.push(key);
                Counter::noop()
            }

            fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
                self.push(key);
                Gauge::noop()
            }

            fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
                self.push(key);
                Histogram::noop()
            }
        }

        #[test]
        fn samples_are_mirrored_into_the_facade() {
            let log = KeyLog::default();
            let mut collector = MetricsCollector::new();
            ::metrics::with_local_recorder(&log, || {
                collector.record(Category::Verify, 2.5);
                collector.tally(ErrorClass::FailureToEnroll);
            });

            assert_eq!(
                log.keys(),
                [
                    "proberun_backend_latency_ms{operation=verify}",
                    "proberun_backend_errors_total{class=failure_to_enroll}",
                ]
            );
            let metrics = collector.drain();
            assert_eq!(metrics.stats(Category::Verify).count, 1);
            assert_eq!(metrics.errors().failure_to_enroll, 1);
        }
    }
}
