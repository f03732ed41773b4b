//! Frame sources.
//!
//! This module provides the raw producers of image data, one per camera:
//! - Synthetic scenes (`stub://`), used by tests and bench setups
//! - Still images (`file://` or a plain image path), served on every read
//! - V4L2 devices (`/dev/video*`, feature: ingest-v4l2)
//!
//! A source produces frames only when asked. It knows nothing about throttling,
//! stale-frame fallback or locking; `CameraSession` layers those on top.
//!
//! The backend is chosen once, from the camera's `source` string, by `open_source`.

mod normalize;
pub mod recovery;
pub mod still;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;
use image::RgbImage;

use crate::error::ConfigurationError;

pub use recovery::Backoff;
pub use still::StillSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Raw producer of frames for one physical or virtual camera.
pub trait FrameSource: Send {
    /// Source identifier (usually the configured URI).
    fn name(&self) -> &str;

    /// Open the underlying resource.
    fn connect(&mut self) -> Result<()>;

    /// Read one image. `Ok(None)` means the device had nothing to give this time.
    fn read_frame(&mut self) -> Result<Option<RgbImage>>;

    /// True when the backend can drop and reacquire its device handle.
    fn can_reopen(&self) -> bool {
        false
    }

    /// Drop and reacquire the underlying resource.
    fn reopen(&mut self) -> Result<()> {
        self.release();
        self.connect()
    }

    /// Release the underlying resource. Reading afterwards requires `connect`.
    fn release(&mut self) {}

    fn stats(&self) -> SourceStats;
}

/// Counters reported by a source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub failed_reads: u64,
    pub uri: String,
}

/// What a camera asks of its source.
#[derive(Clone, Debug)]
pub struct SourceSpec {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

/// Resolve a source URI to a backend.
pub fn open_source(spec: &SourceSpec) -> Result<Box<dyn FrameSource>, ConfigurationError> {
    let uri = spec.uri.trim();
    if uri.is_empty() {
        return Err(ConfigurationError::invalid("source", "must not be empty"));
    }
    if uri.starts_with("stub://") {
        let config = SyntheticConfig::from_uri(uri, spec.width, spec.height)?;
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(Box::new(StillSource::new(path)?));
    }
    if uri.starts_with("/dev/video") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Source::new(v4l2::V4l2Config {
                device: uri.to_string(),
                target_fps: spec.target_fps,
                width: spec.width,
                height: spec.height,
            })));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(ConfigurationError::invalid(
                "source",
                format!("{uri}: V4L2 devices require the ingest-v4l2 feature"),
            ));
        }
    }
    if uri.contains("://") {
        return Err(ConfigurationError::invalid(
            "source",
            format!("unsupported source scheme in '{uri}'"),
        ));
    }
    Ok(Box::new(StillSource::new(uri)?))
}
