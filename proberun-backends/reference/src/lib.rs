//! Deterministic reference backend built on downsampled grayscale pixels.
//!
//! Templates are unit vectors of an 8×8 resampling of the face crop, so
//! verification is a cosine similarity. The backend exists to exercise the
//! harness end-to-end; it makes no claim to recognition accuracy.

mod backend;
mod codec;
mod errors;
mod features;
mod union_find;

pub use backend::{DEFAULT_CLUSTER_THRESHOLD, ReferenceBackend, ReferenceGallery};
pub use errors::ReferenceBackendError;
pub use features::{FEATURE_LEN, Image, ReferenceTemplate};
