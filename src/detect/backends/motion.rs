//! Frame-difference motion detector.
//!
//! Scores each frame by the mean absolute luma difference against the previous frame
//! of the same camera. The first frame of a camera, or one whose size changed, scores 0.

use std::sync::Arc;

use anyhow::Result;
use image::{GrayImage, Rgb};
use serde::Deserialize;

use crate::camera::CameraInfo;
use crate::detect::imaging::{draw_rect, luma};
use crate::detect::instanced::InstancedProcessor;
use crate::detect::object::Rect;
use crate::detect::processor::Dependencies;
use crate::error::ConfigurationError;
use crate::frame::{Canvas, Frame};
use crate::pipeline::TableWriter;

const MOVING_COLOR: Rgb<u8> = Rgb([255, 0, 255]);

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotionParams {
    /// Mean absolute difference (0-255) at or above which the scene counts as moving.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    8.0
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

impl MotionParams {
    pub fn validate(&self, processor: &str) -> Result<(), ConfigurationError> {
        if !(self.threshold.is_finite() && self.threshold >= 0.0) {
            return Err(ConfigurationError::invalid(
                format!("processors.{processor}.threshold"),
                "must be a non-negative number",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct MotionState {
    luma: Arc<GrayImage>,
    pub score: f64,
    pub moving: bool,
}

pub struct MotionDetector {
    params: MotionParams,
}

impl MotionDetector {
    pub fn new(params: MotionParams) -> Self {
        Self { params }
    }
}

fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.dimensions() != b.dimensions() || a.as_raw().is_empty() {
        return 0.0;
    }
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(x, y)| u64::from(x.abs_diff(*y)))
        .sum();
    total as f64 / a.as_raw().len() as f64
}

impl InstancedProcessor for MotionDetector {
    type State = MotionState;

    fn process(
        &self,
        frame: &Frame,
        _camera: &CameraInfo,
        _deps: &Dependencies<'_>,
        previous: Option<&MotionState>,
    ) -> Result<MotionState> {
        let current = luma(frame.image());
        let score = previous.map_or(0.0, |prev| mean_abs_diff(&prev.luma, &current));
        Ok(MotionState {
            luma: Arc::new(current),
            score,
            moving: previous.is_some() && score >= self.params.threshold,
        })
    }

    fn publish(&self, table: &TableWriter<'_>, _camera: &CameraInfo, state: &MotionState) -> Result<()> {
        table.put("score", state.score);
        table.put("moving", state.moving);
        Ok(())
    }

    fn draw(&self, canvas: &mut Canvas, _camera: &CameraInfo, state: &MotionState) -> Result<()> {
        if state.moving {
            let (w, h) = canvas.dimensions();
            draw_rect(canvas, Rect::new(0, 0, w, h), MOVING_COLOR, 3);
        }
        Ok(())
    }
}
