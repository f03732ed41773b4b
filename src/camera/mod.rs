//! Cameras: settings, capture sessions and capture threads.
//!
//! - `CameraSession`: the only safe way to get a frame out of a `FrameSource`
//!   (locking, throttling, stale-frame fallback, reopen with backoff).
//! - `CameraThread`: drives one session in a dedicated loop and hands new frames to a
//!   callback.
//! - `CameraInfo`: the read-only view of a camera's optics that processors get.

mod session;
mod thread;

use std::time::Duration;

use crate::error::ConfigurationError;
use crate::frame::Crop;

pub use session::{CameraSession, SessionStats};
pub use thread::{CameraThread, CameraThreadError, ThreadState};

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(250);
pub const DEFAULT_REOPEN_AFTER: u32 = 10;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(250);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(8);

#[derive(Clone, Debug)]
pub struct CameraSettings {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Horizontal field of view in degrees.
    pub horizontal_fov: f64,
    /// Vertical field of view in degrees. Derived from the horizontal one when absent.
    pub vertical_fov: Option<f64>,
    /// Minimum time between two device reads. Zero disables throttling.
    pub frame_interval: Duration,
    pub lock_timeout: Duration,
    pub crop: Option<Crop>,
    /// Consecutive bad reads before the device is reopened. Zero disables reopening.
    pub reopen_after: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl CameraSettings {
    pub fn new(name: impl Into<String>, width: u32, height: u32, horizontal_fov: f64) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            horizontal_fov,
            vertical_fov: None,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            crop: None,
            reopen_after: DEFAULT_REOPEN_AFTER,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let field = |name: &str| format!("cameras.{}.{}", self.name, name);
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::invalid("cameras.name", "must not be empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigurationError::invalid(
                field("resolution"),
                "width and height must be non-zero",
            ));
        }
        let fov_ok = |fov: f64| fov.is_finite() && fov > 0.0 && fov < 180.0;
        if !fov_ok(self.horizontal_fov) {
            return Err(ConfigurationError::invalid(
                field("horizontal_fov"),
                "must be within (0, 180) degrees",
            ));
        }
        if let Some(vertical) = self.vertical_fov {
            if !fov_ok(vertical) {
                return Err(ConfigurationError::invalid(
                    field("vertical_fov"),
                    "must be within (0, 180) degrees",
                ));
            }
        }
        if self.lock_timeout.is_zero() {
            return Err(ConfigurationError::invalid(
                field("lock_timeout_ms"),
                "must be greater than zero",
            ));
        }
        if self.backoff_base.is_zero() {
            return Err(ConfigurationError::invalid(
                field("backoff_base_ms"),
                "must be greater than zero",
            ));
        }
        if let Some(crop) = self.crop {
            if crop.clamp_to(self.width, self.height).is_none() {
                return Err(ConfigurationError::invalid(
                    field("crop"),
                    "does not intersect the frame",
                ));
            }
        }
        Ok(())
    }

    pub fn info(&self) -> CameraInfo {
        let vertical_fov = self.vertical_fov.unwrap_or_else(|| {
            let half = (self.horizontal_fov.to_radians() / 2.0).tan();
            (2.0 * (half * self.height as f64 / self.width as f64).atan()).to_degrees()
        });
        let (crop_x, crop_y) = self
            .crop
            .and_then(|c| c.clamp_to(self.width, self.height))
            .map(|c| (c.x, c.y))
            .unwrap_or((0, 0));
        CameraInfo {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            horizontal_fov: self.horizontal_fov,
            vertical_fov,
            crop_x,
            crop_y,
        }
    }
}

/// Camera identity and optics as seen by processors.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraInfo {
    pub name: String,
    /// Full sensor resolution (before crop).
    pub width: u32,
    pub height: u32,
    /// Degrees.
    pub horizontal_fov: f64,
    /// Degrees.
    pub vertical_fov: f64,
    /// Offset of the delivered frame's origin within the sensor image.
    pub crop_x: u32,
    pub crop_y: u32,
}

impl CameraInfo {
    /// Uncropped camera with the given optics.
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        horizontal_fov: f64,
        vertical_fov: f64,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            horizontal_fov,
            vertical_fov,
            crop_x: 0,
            crop_y: 0,
        }
    }
}
