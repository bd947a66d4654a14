//! Error types for the proberun core library.
//!
//! [`BackendError`] is what a backend reports for a single call; the
//! orchestrators either tally it (see [`crate::ErrorClass`]) or escalate it
//! into a fatal [`HarnessError`].

use std::{fmt, io, path::PathBuf, sync::Arc};

use thiserror::Error;

use crate::track::TemplateId;

macro_rules! define_error_codes {
    (
        $(#[$enum_meta:meta])*
        enum $CodeTy:ident for $ErrTy:ident {
            $(
                $(#[$variant_meta:meta])*
                $CodeVariant:ident => $ErrVariant:ident $( { $($pattern:tt)* } )? => $code:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        #[non_exhaustive]
        pub enum $CodeTy {
            $(
                $(#[$variant_meta])*
                $CodeVariant,
            )+
        }

        impl $CodeTy {
            /// Return the stable machine-readable representation of this error code.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$CodeVariant => $code,)+
                }
            }
        }

        impl fmt::Display for $CodeTy {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl $ErrTy {
            #[doc = concat!(
                "Retrieve the stable [`",
                stringify!($CodeTy),
                "`] for this error."
            )]
            #[must_use]
            pub const fn code(&self) -> $CodeTy {
                match self {
                    $(Self::$ErrVariant $( { $($pattern)* } )? => $CodeTy::$CodeVariant,)+
                }
            }
        }
    };
}

/// An error reported by a [`crate::Backend`] call.
#[non_exhaustive]
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum BackendError {
    /// The associations lacked attributes the backend requires.
    #[error("required attributes are missing")]
    MissingAttributes,
    /// No face could be found in the media.
    #[error("no face was detected")]
    FailureToDetect,
    /// A template could not be built from the supplied associations.
    #[error("template could not be enrolled")]
    FailureToEnroll,
    /// The backend does not offer this optional capability.
    #[error("`{operation}` is not implemented by this backend")]
    NotImplemented {
        /// Name of the unsupported operation.
        operation: &'static str,
    },
    /// A gallery operation referenced an id the gallery does not hold.
    #[error("id {id} is not present in the gallery")]
    UnknownId {
        /// The offending template id.
        id: TemplateId,
    },
    /// Serialized data could not be decoded.
    #[error("corrupt serialized data: {reason}")]
    Corrupt {
        /// Description of the decoding failure.
        reason: String,
    },
    /// Any other failure inside the backend.
    #[error("`{operation}` failed: {reason}")]
    Failed {
        /// Operation that failed.
        operation: &'static str,
        /// Backend-supplied description.
        reason: String,
    },
}

define_error_codes! {
    /// Stable codes describing [`BackendError`] variants.
    enum BackendErrorCode for BackendError {
        /// Required attributes were missing.
        MissingAttributes => MissingAttributes => "BACKEND_MISSING_ATTRIBUTES",
        /// No face was detected.
        FailureToDetect => FailureToDetect => "BACKEND_FAILURE_TO_DETECT",
        /// The template could not be enrolled.
        FailureToEnroll => FailureToEnroll => "BACKEND_FAILURE_TO_ENROLL",
        /// The capability is not implemented.
        NotImplemented => NotImplemented { .. } => "BACKEND_NOT_IMPLEMENTED",
        /// The id is unknown to the gallery.
        UnknownId => UnknownId { .. } => "BACKEND_UNKNOWN_ID",
        /// Serialized data was corrupt.
        Corrupt => Corrupt { .. } => "BACKEND_CORRUPT",
        /// Any other backend failure.
        Failed => Failed { .. } => "BACKEND_FAILED",
    }
}

/// Malformed metadata CSV input.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The stream ended before a header line was read.
    #[error("metadata header is missing")]
    MissingHeader,
    /// The header does not name a column every row needs.
    #[error("metadata header lacks a `{column}` column")]
    MissingColumn {
        /// Name of the absent column.
        column: &'static str,
    },
    /// A required cell was empty.
    #[error("line {line}: `{column}` is empty")]
    EmptyField {
        /// 1-based line number.
        line: usize,
        /// Column name.
        column: &'static str,
    },
    /// A numeric cell did not parse.
    #[error("line {line}: `{column}` value `{value}` is not a valid number")]
    InvalidNumber {
        /// 1-based line number.
        line: usize,
        /// Column name.
        column: &'static str,
        /// The raw cell text.
        value: String,
    },
    /// Reading from the underlying stream failed.
    #[error("failed to read metadata: {0}")]
    Read(#[from] io::Error),
}

/// Fatal error produced by a harness run.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Search depth must be greater than zero.
    #[error("search depth must be at least 1 (got {got})")]
    InvalidSearchDepth {
        /// The rejected depth.
        got: usize,
    },
    /// Cluster hints are orders of magnitude.
    #[error("cluster hint must be a power of ten (got {got})")]
    InvalidClusterHint {
        /// The rejected hint.
        got: u64,
    },
    /// An input or output file could not be opened or created.
    #[error("failed to open `{path}`: {source}")]
    Io {
        /// Path that triggered the failure.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// Writing a result file failed.
    #[error("failed to write `{path}`: {source}")]
    Write {
        /// Path being written.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// The metadata CSV was malformed.
    #[error("metadata `{path}` is malformed: {error}")]
    Metadata {
        /// Metadata file.
        path: PathBuf,
        /// Parsing failure.
        #[source]
        error: MetadataError,
    },
    /// A template manifest row was malformed.
    #[error("manifest `{path}` line {line}: {reason}")]
    Manifest {
        /// Manifest file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What was wrong with the row.
        reason: String,
    },
    /// A required template or gallery could not be deserialized.
    #[error("failed to deserialize `{path}`: {error}")]
    Deserialize {
        /// Serialized file.
        path: PathBuf,
        /// Backend decoding failure.
        #[source]
        error: BackendError,
    },
    /// A backend call whose failure cannot be tallied.
    #[error("backend `{backend}` failed during {operation}: {error}")]
    Backend {
        /// Name reported by the backend.
        backend: Arc<str>,
        /// Operation that failed.
        operation: &'static str,
        /// Backend failure.
        #[source]
        error: BackendError,
    },
}

define_error_codes! {
    /// Stable codes describing [`HarnessError`] variants.
    enum HarnessErrorCode for HarnessError {
        /// Search depth must be greater than zero.
        InvalidSearchDepth => InvalidSearchDepth { .. } => "PROBERUN_INVALID_SEARCH_DEPTH",
        /// Cluster hint is not a power of ten.
        InvalidClusterHint => InvalidClusterHint { .. } => "PROBERUN_INVALID_CLUSTER_HINT",
        /// A file could not be opened.
        Io => Io { .. } => "PROBERUN_IO",
        /// A result file could not be written.
        Write => Write { .. } => "PROBERUN_WRITE",
        /// Metadata was malformed.
        Metadata => Metadata { .. } => "PROBERUN_METADATA",
        /// A manifest row was malformed.
        Manifest => Manifest { .. } => "PROBERUN_MANIFEST",
        /// Deserialization of a required input failed.
        Deserialize => Deserialize { .. } => "PROBERUN_DESERIALIZE",
        /// A backend call failed fatally.
        BackendFailure => Backend { .. } => "PROBERUN_BACKEND_FAILURE",
    }
}

impl HarnessError {
    /// Retrieve the inner [`BackendErrorCode`] when a backend call caused the error.
    #[must_use]
    pub const fn backend_code(&self) -> Option<BackendErrorCode> {
        match self {
            Self::Deserialize { error, .. } | Self::Backend { error, .. } => Some(error.code()),
            _ => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub(crate) fn write(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Write { path, source }
    }
}

/// Convenient alias for results returned by the core API.
pub type Result<T> = core::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_code_is_exposed_for_backend_failures() {
        let err = HarnessError::Backend {
            backend: Arc::from("reference"),
            operation: "create_gallery",
            error: BackendError::UnknownId { id: 4 },
        };
        assert_eq!(err.code(), HarnessErrorCode::BackendFailure);
        assert_eq!(err.backend_code(), Some(BackendErrorCode::UnknownId));
        assert_eq!(err.code().as_str(), "PROBERUN_BACKEND_FAILURE");
    }

    #[test]
    fn io_errors_carry_no_backend_code() {
        let err = HarnessError::io("missing.csv")(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.code(), HarnessErrorCode::Io);
        assert!(err.backend_code().is_none());
        assert!(err.to_string().contains("missing.csv"));
    }
}
