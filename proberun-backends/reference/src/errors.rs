//! Errors raised by the reference backend.
//!
//! Construction problems surface as [`ReferenceBackendError`]. Container
//! decoding failures stay internal and reach callers as
//! [`BackendError::Corrupt`].

use std::io;

use proberun_core::BackendError;
use thiserror::Error;

/// Configuration errors raised while constructing a [`crate::ReferenceBackend`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReferenceBackendError {
    /// The cosine threshold used to merge templates into one cluster is
    /// outside the range a cosine similarity can take.
    #[error("cluster threshold must lie in [-1, 1] (got {got})")]
    InvalidThreshold {
        /// Threshold that was rejected.
        got: f32,
    },
}

/// Failures decoding the binary container.
#[derive(Debug, Error)]
pub(crate) enum CodecError {
    #[error("expected magic {expected:?} but found {found:?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },
    #[error("unsupported container version {version}")]
    UnsupportedVersion { version: u8 },
    #[error("vector length {len} exceeds the limit of {limit}")]
    Oversized { len: usize, limit: usize },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl From<CodecError> for BackendError {
    fn from(error: CodecError) -> Self {
        Self::Corrupt {
            reason: error.to_string(),
        }
    }
}

pub(crate) fn write_failed(operation: &'static str) -> impl FnOnce(io::Error) -> BackendError {
    move |error| BackendError::Failed {
        operation,
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use proberun_core::BackendErrorCode;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn invalid_threshold_reports_the_value() {
        let error = ReferenceBackendError::InvalidThreshold { got: 1.5 };
        assert_eq!(
            error.to_string(),
            "cluster threshold must lie in [-1, 1] (got 1.5)"
        );
    }

    #[rstest]
    #[case::magic(CodecError::BadMagic { expected: *b"PRRF", found: *b"JUNK" }, "expected magic")]
    #[case::version(CodecError::UnsupportedVersion { version: 9 }, "version 9")]
    #[case::oversized(CodecError::Oversized { len: 70, limit: 64 }, "limit of 64")]
    fn codec_errors_map_to_corrupt(#[case] error: CodecError, #[case] detail: &str) {
        let mapped = BackendError::from(error);
        assert_eq!(mapped.code(), BackendErrorCode::Corrupt);
        assert!(mapped.to_string().contains(detail));
    }
}
