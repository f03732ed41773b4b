//! Colour-blob detector.
//!
//! Blur, threshold in HSV, extract 8-connected blobs, then keep bounding rectangles
//! whose area and aspect ratio match the configured target.

use anyhow::Result;
use serde::Deserialize;

use crate::camera::CameraInfo;
use crate::detect::imaging::{blobs, blur, Mask};
use crate::detect::object::{ObjectDetector, Rect, TargetSize};
use crate::detect::processor::Dependencies;
use crate::error::ConfigurationError;
use crate::frame::Frame;

/// Slack added to the aspect tolerance so that exact boundary ratios survive rounding.
const RATIO_EPSILON: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColorBlobParams {
    /// Lower HSV bound, inclusive.
    pub hsv_min: [u8; 3],
    /// Upper HSV bound, inclusive.
    pub hsv_max: [u8; 3],
    /// Real target width in metres.
    pub target_width: f64,
    /// Real target height in metres.
    pub target_height: f64,
    #[serde(default)]
    pub min_area: u64,
    #[serde(default = "default_max_area")]
    pub max_area: u64,
    #[serde(default = "default_ratio_tolerance")]
    pub ratio_tolerance: f64,
    /// Also accept targets rotated by 90 degrees.
    #[serde(default)]
    pub sideways: bool,
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
}

fn default_max_area() -> u64 {
    u64::MAX
}

fn default_ratio_tolerance() -> f64 {
    0.5
}

fn default_blur_sigma() -> f32 {
    1.0
}

impl ColorBlobParams {
    pub fn new(hsv_min: [u8; 3], hsv_max: [u8; 3], target_width: f64, target_height: f64) -> Self {
        Self {
            hsv_min,
            hsv_max,
            target_width,
            target_height,
            min_area: 0,
            max_area: default_max_area(),
            ratio_tolerance: default_ratio_tolerance(),
            sideways: false,
            blur_sigma: default_blur_sigma(),
        }
    }

    pub fn validate(&self, processor: &str) -> Result<(), ConfigurationError> {
        let field = |name: &str| format!("processors.{processor}.{name}");
        if (0..3).any(|c| self.hsv_min[c] > self.hsv_max[c]) {
            return Err(ConfigurationError::invalid(
                field("hsv_min"),
                "every channel must be <= hsv_max",
            ));
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.target_width) || !positive(self.target_height) {
            return Err(ConfigurationError::invalid(
                field("target_width"),
                "target width and height must be positive",
            ));
        }
        if self.min_area > self.max_area {
            return Err(ConfigurationError::invalid(
                field("min_area"),
                "must not exceed max_area",
            ));
        }
        if !(self.ratio_tolerance.is_finite() && self.ratio_tolerance >= 0.0) {
            return Err(ConfigurationError::invalid(
                field("ratio_tolerance"),
                "must be a non-negative number",
            ));
        }
        if !self.blur_sigma.is_finite() {
            return Err(ConfigurationError::invalid(field("blur_sigma"), "must be finite"));
        }
        Ok(())
    }

    /// Width over height of the real target.
    pub fn expected_ratio(&self) -> f64 {
        self.target_width / self.target_height
    }

    /// Area and aspect filter applied to every blob.
    pub fn accepts(&self, rect: Rect) -> bool {
        let area = rect.area();
        if area < self.min_area || area > self.max_area || rect.height == 0 {
            return false;
        }
        let ratio = rect.aspect();
        let expected = self.expected_ratio();
        let tolerance = self.ratio_tolerance + RATIO_EPSILON;
        (ratio - expected).abs() <= tolerance
            || (self.sideways && (ratio - 1.0 / expected).abs() <= tolerance)
    }
}

pub struct ColorBlobDetector {
    params: ColorBlobParams,
}

impl ColorBlobDetector {
    pub fn new(params: ColorBlobParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ColorBlobParams {
        &self.params
    }

    /// Threshold and filter without the blur step.
    pub fn filter_mask(&self, mask: &Mask) -> Vec<Rect> {
        blobs(mask)
            .into_iter()
            .filter(|rect| self.params.accepts(*rect))
            .collect()
    }
}

impl ObjectDetector for ColorBlobDetector {
    fn detect_objects(
        &self,
        frame: &Frame,
        _camera: &CameraInfo,
        _deps: &Dependencies<'_>,
    ) -> Result<Vec<Rect>> {
        let smoothed = blur(frame.image(), self.params.blur_sigma);
        let mask = Mask::in_range(&smoothed, self.params.hsv_min, self.params.hsv_max);
        Ok(self.filter_mask(&mask))
    }

    fn target(&self) -> TargetSize {
        TargetSize {
            width: self.params.target_width,
            height: self.params.target_height,
        }
    }
}
