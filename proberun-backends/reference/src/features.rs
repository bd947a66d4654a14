//! Pixel feature extraction.

use image::{
    GrayImage,
    imageops::{self, FilterType},
};
use proberun_core::FaceBox;

/// Side of the square the face crop is resampled to.
const FEATURE_SIDE: u32 = 8;

/// Number of values in a template vector.
pub const FEATURE_LEN: usize = (FEATURE_SIDE * FEATURE_SIDE) as usize;

/// Norms below this are treated as a flat, featureless input.
const FLAT_NORM: f32 = 1e-6;

/// A decoded 8-bit grayscale image.
#[derive(Debug, Clone)]
pub struct Image {
    pixels: GrayImage,
}

impl Image {
    pub(crate) fn new(pixels: GrayImage) -> Self {
        Self { pixels }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Unit feature vector of the region inside `face`, or of the whole image
    /// when the box is unknown. `None` when the region is empty or flat.
    pub(crate) fn embed(&self, face: FaceBox) -> Option<Vec<f32>> {
        let (x, y, width, height) = self.clamp(face)?;
        let crop = imageops::crop_imm(&self.pixels, x, y, width, height).to_image();
        let resized = imageops::resize(&crop, FEATURE_SIDE, FEATURE_SIDE, FilterType::Triangle);
        let mut vector: Vec<f32> = resized.pixels().map(|pixel| f32::from(pixel.0[0])).collect();
        let mean = vector.iter().sum::<f32>() / vector.len() as f32;
        for value in &mut vector {
            *value -= mean;
        }
        normalise(vector)
    }

    fn clamp(&self, face: FaceBox) -> Option<(u32, u32, u32, u32)> {
        if !face.is_known() {
            return (self.width() > 0 && self.height() > 0).then(|| (0, 0, self.width(), self.height()));
        }
        let left = clamp_axis(face.x.floor(), self.width());
        let top = clamp_axis(face.y.floor(), self.height());
        let right = clamp_axis((face.x + face.width).ceil(), self.width());
        let bottom = clamp_axis((face.y + face.height).ceil(), self.height());
        (right > left && bottom > top).then(|| (left, top, right - left, bottom - top))
    }
}

fn clamp_axis(value: f32, limit: u32) -> u32 {
    if value <= 0.0 {
        0
    } else if value >= limit as f32 {
        limit
    } else {
        value as u32
    }
}

/// Scales `vector` to unit length; `None` when it is (nearly) zero.
pub(crate) fn normalise(mut vector: Vec<f32>) -> Option<Vec<f32>> {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if !norm.is_finite() || norm < FLAT_NORM {
        return None;
    }
    for value in &mut vector {
        *value /= norm;
    }
    Some(vector)
}

/// Renormalised element-wise mean of equally sized unit vectors.
pub(crate) fn mean_direction(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let mut sum = vec![0.0; first.len()];
    for vector in vectors {
        for (total, value) in sum.iter_mut().zip(vector) {
            *total += value;
        }
    }
    normalise(sum)
}

/// Dot product of two unit vectors.
pub(crate) fn cosine(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

/// A reference template: a unit vector of [`FEATURE_LEN`] values.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTemplate {
    vector: Vec<f32>,
}

impl ReferenceTemplate {
    pub(crate) fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }

    /// The template's feature vector.
    #[must_use]
    pub fn vector(&self) -> &[f32] {
        &self.vector
    }
}
