//! Shared test utilities used across proberun crates.

pub mod tracing {
    //! Recording layer capturing spans and events so tests can assert the
    //! harness's instrumentation.
    use std::collections::HashMap;
    use std::fmt;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::registry::LookupSpan;

    /// Layer recording every closed span and every event.
    ///
    /// # Examples
    /// ```
    /// use proberun_test_support::tracing::RecordingLayer;
    ///
    /// let (value, layer) = RecordingLayer::capture(|| {
    ///     tracing::info!(answer = 42, "computed");
    ///     7
    /// });
    /// assert_eq!(value, 7);
    /// assert!(layer.has_event(tracing::Level::INFO, "computed"));
    /// ```
    #[derive(Clone, Default)]
    pub struct RecordingLayer {
        spans: Arc<Mutex<Vec<SpanRecord>>>,
        events: Arc<Mutex<Vec<EventRecord>>>,
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    impl RecordingLayer {
        /// Runs `call` with a fresh recording subscriber as the default and
        /// returns its result together with the layer.
        pub fn capture<T>(call: impl FnOnce() -> T) -> (T, Self) {
            let layer = Self::default();
            let subscriber = tracing_subscriber::registry().with(layer.clone());
            let value = tracing::subscriber::with_default(subscriber, call);
            (value, layer)
        }

        /// Closed spans in completion order.
        #[must_use]
        pub fn spans(&self) -> Vec<SpanRecord> {
            lock(&self.spans).clone()
        }

        /// Events in emission order.
        #[must_use]
        pub fn events(&self) -> Vec<EventRecord> {
            lock(&self.events).clone()
        }

        /// The first closed span called `name`.
        #[must_use]
        pub fn span(&self, name: &str) -> Option<SpanRecord> {
            lock(&self.spans).iter().find(|span| span.name == name).cloned()
        }

        /// Events at `level` whose message equals `message`.
        #[must_use]
        pub fn events_with(&self, level: Level, message: &str) -> Vec<EventRecord> {
            lock(&self.events)
                .iter()
                .filter(|event| event.level == level && event.message() == Some(message))
                .cloned()
                .collect()
        }

        /// Whether an event at `level` carried `message`.
        #[must_use]
        pub fn has_event(&self, level: Level, message: &str) -> bool {
            !self.events_with(level, message).is_empty()
        }
    }

    /// A closed span with its recorded fields.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SpanRecord {
        /// Span name.
        pub name: String,
        /// Fields recorded at creation or later.
        pub fields: HashMap<String, String>,
    }

    impl SpanRecord {
        /// Value of a recorded field.
        #[must_use]
        pub fn field(&self, name: &str) -> Option<&str> {
            self.fields.get(name).map(String::as_str)
        }
    }

    /// An emitted event.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct EventRecord {
        /// Event level.
        pub level: Level,
        /// Event target.
        pub target: String,
        /// Event fields, including `message`.
        pub fields: HashMap<String, String>,
    }

    impl EventRecord {
        /// Value of a recorded field.
        #[must_use]
        pub fn field(&self, name: &str) -> Option<&str> {
            self.fields.get(name).map(String::as_str)
        }

        /// The event message.
        #[must_use]
        pub fn message(&self) -> Option<&str> {
            self.field("message")
        }
    }

    struct OpenSpan(SpanRecord);

    impl<S> Layer<S> for RecordingLayer
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
            let Some(span) = ctx.span(id) else {
                return;
            };
            let mut record = SpanRecord {
                name: attrs.metadata().name().to_owned(),
                fields: HashMap::new(),
            };
            attrs.record(&mut Fields(&mut record.fields));
            span.extensions_mut().insert(OpenSpan(record));
        }

        fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
            let Some(span) = ctx.span(id) else {
                return;
            };
            if let Some(OpenSpan(record)) = span.extensions_mut().get_mut::<OpenSpan>() {
                values.record(&mut Fields(&mut record.fields));
            }
        }

        fn on_close(&self, id: Id, ctx: Context<'_, S>) {
            let Some(span) = ctx.span(&id) else {
                return;
            };
            if let Some(OpenSpan(record)) = span.extensions_mut().remove::<OpenSpan>() {
                lock(&self.spans).push(record);
            }
        }

        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = HashMap::new();
            event.record(&mut Fields(&mut fields));
            lock(&self.events).push(EventRecord {
                level: *event.metadata().level(),
                target: event.metadata().target().to_owned(),
                fields,
            });
        }
    }

    struct Fields<'a>(&'a mut HashMap<String, String>);

    impl Fields<'_> {
        fn put(&mut self, field: &Field, value: String) {
            self.0.insert(field.name().to_owned(), value);
        }
    }

    impl Visit for Fields<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.put(field, format!("{value:?}"));
        }

        fn record_str(&mut self, field: &Field, value: &str) {
            self.put(field, value.to_owned());
        }

        fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
            self.put(field, value.to_string());
        }

        fn record_bool(&mut self, field: &Field, value: bool) {
            self.put(field, value.to_string());
        }

        fn record_i64(&mut self, field: &Field, value: i64) {
            self.put(field, value.to_string());
        }

        fn record_u64(&mut self, field: &Field, value: u64) {
            self.put(field, value.to_string());
        }

        fn record_f64(&mut self, field: &Field, value: f64) {
            self.put(field, value.to_string());
        }
    }
}

pub mod fixtures {
    //! Writers for the files a harness run consumes.
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    use image::{GrayImage, Luma};

    pub use tempfile::TempDir;

    /// Creates a fresh temporary directory.
    ///
    /// # Panics
    /// Panics when the directory cannot be created.
    #[must_use]
    pub fn temp_dir() -> TempDir {
        TempDir::new().expect("temporary directory must be created")
    }

    /// Writes `contents` to `dir/name` and returns the path.
    ///
    /// # Errors
    /// Returns any error raised while writing.
    pub fn write_file(dir: &Path, name: &str, contents: &str) -> io::Result<PathBuf> {
        let path = dir.join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// One row of a metadata CSV with the columns [`METADATA_HEADER`] names.
    #[derive(Debug, Clone, PartialEq)]
    pub struct MetadataRow {
        /// Template id.
        pub template_id: u64,
        /// Subject id.
        pub subject_id: i64,
        /// Media filename.
        pub filename: String,
        /// Face box as `(x, y, width, height)`; empty cells when `None`.
        pub face: Option<(f32, f32, f32, f32)>,
    }

    impl MetadataRow {
        /// A row without a face box.
        #[must_use]
        pub fn new(template_id: u64, subject_id: i64, filename: &str) -> Self {
            Self {
                template_id,
                subject_id,
                filename: filename.to_owned(),
                face: None,
            }
        }

        /// Adds a face box.
        #[must_use]
        pub fn with_face(mut self, x: f32, y: f32, width: f32, height: f32) -> Self {
            self.face = Some((x, y, width, height));
            self
        }
    }

    /// Header used by [`write_metadata`].
    pub const METADATA_HEADER: &str =
        "TEMPLATE_ID,SUBJECT_ID,FILENAME,FACE_X,FACE_Y,FACE_WIDTH,FACE_HEIGHT";

    /// Writes a metadata CSV holding `rows` in order.
    ///
    /// # Errors
    /// Returns any error raised while writing.
    pub fn write_metadata(dir: &Path, name: &str, rows: &[MetadataRow]) -> io::Result<PathBuf> {
        let mut contents = String::from(METADATA_HEADER);
        contents.push('\n');
        for row in rows {
            let face = row.face.map_or_else(
                || ",,,".to_owned(),
                |(x, y, width, height)| format!("{x},{y},{width},{height}"),
            );
            contents.push_str(&format!(
                "{},{},{},{face}\n",
                row.template_id, row.subject_id, row.filename
            ));
        }
        write_file(dir, name, &contents)
    }

    /// Writes a grayscale PNG whose pixels come from `shade(x, y)`.
    ///
    /// # Errors
    /// Returns any error raised while encoding or writing.
    pub fn write_png(
        dir: &Path,
        name: &str,
        width: u32,
        height: u32,
        shade: impl Fn(u32, u32) -> u8,
    ) -> io::Result<PathBuf> {
        let path = dir.join(name);
        let image = GrayImage::from_fn(width, height, |x, y| Luma([shade(x, y)]));
        image.save(&path).map_err(io::Error::other)?;
        Ok(path)
    }

    /// Shading with a distinct, non-flat structure for each `seed`.
    #[must_use]
    pub fn pattern(seed: u32) -> impl Fn(u32, u32) -> u8 {
        move |x, y| {
            let value = x
                .wrapping_mul(31 + seed * 7)
                .wrapping_add(y.wrapping_mul(17 + seed * 13))
                .wrapping_add(seed * 41);
            u8::try_from(value % 256).unwrap_or(u8::MAX)
        }
    }

    /// Writes a `size`×`size` PNG shaded by [`pattern`].
    ///
    /// # Errors
    /// Returns any error raised while encoding or writing.
    pub fn write_face(dir: &Path, name: &str, size: u32, seed: u32) -> io::Result<PathBuf> {
        write_png(dir, name, size, size, pattern(seed))
    }
}
