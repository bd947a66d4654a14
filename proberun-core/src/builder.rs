//! Builder utilities for configuring harness runs.
//!
//! Validates search depth and clustering hint before a [`Harness`] is
//! constructed, so the orchestrators never see an invalid configuration.

use std::{num::NonZeroUsize, path::PathBuf};

use crate::{
    error::{HarnessError, Result},
    harness::Harness,
};

const DEFAULT_SEARCH_DEPTH: usize = 50;
const DEFAULT_MIN_FACE_SIZE: u32 = 40;
const DEFAULT_CLUSTER_HINT: u64 = 10;

/// Configures and constructs [`Harness`] instances.
///
/// # Examples
/// ```
/// use proberun_core::HarnessBuilder;
///
/// let harness = HarnessBuilder::new()
///     .with_search_depth(5)
///     .with_cluster_hint(100)
///     .build()
///     .expect("configuration is valid");
/// assert_eq!(harness.search_depth().get(), 5);
/// assert_eq!(harness.cluster_hint(), 100);
/// ```
#[derive(Debug, Clone)]
pub struct HarnessBuilder {
    search_depth: usize,
    min_face_size: u32,
    cluster_hint: u64,
    data_root: Option<PathBuf>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            search_depth: DEFAULT_SEARCH_DEPTH,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            cluster_hint: DEFAULT_CLUSTER_HINT,
            data_root: None,
        }
    }
}

impl HarnessBuilder {
    /// Creates a builder populated with default parameters.
    ///
    /// # Examples
    /// ```
    /// use proberun_core::HarnessBuilder;
    ///
    /// let builder = HarnessBuilder::new();
    /// assert_eq!(builder.search_depth(), 50);
    /// assert_eq!(builder.min_face_size(), 40);
    /// assert_eq!(builder.cluster_hint(), 10);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides how many candidates search asks the backend for.
    #[must_use]
    pub fn with_search_depth(mut self, depth: usize) -> Self {
        self.search_depth = depth;
        self
    }

    /// Returns the configured search depth.
    #[must_use]
    pub fn search_depth(&self) -> usize {
        self.search_depth
    }

    /// Overrides the smallest face, in pixels, detection reports.
    #[must_use]
    pub fn with_min_face_size(mut self, pixels: u32) -> Self {
        self.min_face_size = pixels;
        self
    }

    /// Returns the configured minimum face size.
    #[must_use]
    pub fn min_face_size(&self) -> u32 {
        self.min_face_size
    }

    /// Overrides the clustering hint.
    #[must_use]
    pub fn with_cluster_hint(mut self, hint: u64) -> Self {
        self.cluster_hint = hint;
        self
    }

    /// Returns the configured clustering hint.
    #[must_use]
    pub fn cluster_hint(&self) -> u64 {
        self.cluster_hint
    }

    /// Sets the directory media filenames are resolved against.
    #[must_use]
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = Some(root.into());
        self
    }

    /// Validates the configuration and constructs a [`Harness`].
    ///
    /// # Errors
    /// Returns [`HarnessError::InvalidSearchDepth`] when the depth is zero and
    /// [`HarnessError::InvalidClusterHint`] when the hint is not a power of
    /// ten.
    ///
    /// # Examples
    /// ```
    /// use proberun_core::{HarnessBuilder, HarnessError};
    ///
    /// let err = HarnessBuilder::new().with_cluster_hint(50).build().unwrap_err();
    /// assert!(matches!(err, HarnessError::InvalidClusterHint { got: 50 }));
    /// ```
    pub fn build(self) -> Result<Harness> {
        let search_depth = NonZeroUsize::new(self.search_depth).ok_or(
            HarnessError::InvalidSearchDepth {
                got: self.search_depth,
            },
        )?;
        if !is_power_of_ten(self.cluster_hint) {
            return Err(HarnessError::InvalidClusterHint {
                got: self.cluster_hint,
            });
        }
        Ok(Harness::new(
            search_depth,
            self.min_face_size,
            self.cluster_hint,
            self.data_root,
        ))
    }
}

fn is_power_of_ten(mut value: u64) -> bool {
    if value == 0 {
        return false;
    }
    while value % 10 == 0 {
        value /= 10;
    }
    value == 1
}
