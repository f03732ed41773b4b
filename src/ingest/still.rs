//! Still-image frame source.
//!
//! Serves the same decoded image on every read. Useful for tuning detector thresholds
//! against a captured sample, and for cameras that are simulated by a fixed picture.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use super::{FrameSource, SourceStats};
use crate::error::ConfigurationError;

const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub struct StillSource {
    path: PathBuf,
    uri: String,
    image: Option<RgbImage>,
    frames_captured: u64,
    failed_reads: u64,
}

impl StillSource {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref().to_path_buf();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ConfigurationError::invalid(
                "source",
                format!(
                    "{}: still images must be one of {:?}",
                    path.display(),
                    SUPPORTED_EXTENSIONS
                ),
            ));
        }
        Ok(Self {
            uri: path.display().to_string(),
            path,
            image: None,
            frames_captured: 0,
            failed_reads: 0,
        })
    }

    /// Build a source around an image that is already in memory.
    pub fn from_image(label: impl Into<String>, image: RgbImage) -> Self {
        let uri = label.into();
        Self {
            path: PathBuf::from(&uri),
            uri,
            image: Some(image),
            frames_captured: 0,
            failed_reads: 0,
        }
    }
}

impl FrameSource for StillSource {
    fn name(&self) -> &str {
        &self.uri
    }

    fn connect(&mut self) -> Result<()> {
        if self.image.is_some() {
            return Ok(());
        }
        let image = image::open(&self.path)
            .with_context(|| format!("decode still image {}", self.path.display()))?
            .to_rgb8();
        log::info!(
            "StillSource: loaded {} ({}x{})",
            self.uri,
            image.width(),
            image.height()
        );
        self.image = Some(image);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        match &self.image {
            Some(image) => {
                self.frames_captured += 1;
                Ok(Some(image.clone()))
            }
            None => {
                self.failed_reads += 1;
                Err(anyhow!("{} has not been loaded", self.uri))
            }
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            failed_reads: self.failed_reads,
            uri: self.uri.clone(),
        }
    }
}
