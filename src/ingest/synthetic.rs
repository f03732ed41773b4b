//! Synthetic frame source (`stub://`).
//!
//! Renders a dark background with one coloured target that drifts horizontally, so
//! detectors have something to find without a camera attached. Query parameters
//! shape the scene and inject faults:
//!
//! - `target=WxH` target size in pixels (default 48x24)
//! - `color=R,G,B` target colour (default 40,220,60)
//! - `noise=N` uniform per-channel sensor noise amplitude (default 0)
//! - `seed=N` noise seed
//! - `fail_every=N` every Nth read fails
//! - `fail_after=N` every read after the Nth fails until the source is reopened

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, SourceStats};
use crate::error::ConfigurationError;

const BACKGROUND: Rgb<u8> = Rgb([20, 20, 24]);

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub target_width: u32,
    pub target_height: u32,
    pub target_color: [u8; 3],
    pub noise: u8,
    pub seed: u64,
    pub fail_every: Option<u64>,
    pub fail_after: Option<u64>,
}

impl SyntheticConfig {
    pub fn new(uri: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            uri: uri.into(),
            width,
            height,
            target_width: 48,
            target_height: 24,
            target_color: [40, 220, 60],
            noise: 0,
            seed: 4904,
            fail_every: None,
            fail_after: None,
        }
    }

    pub fn from_uri(uri: &str, width: u32, height: u32) -> Result<Self, ConfigurationError> {
        if width == 0 || height == 0 {
            return Err(ConfigurationError::invalid(
                "resolution",
                "synthetic sources need a non-zero width and height",
            ));
        }
        let mut config = Self::new(uri, width, height);
        let Some((_, query)) = uri.split_once('?') else {
            return Ok(config);
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConfigurationError::invalid("source", format!("malformed query pair '{pair}'"))
            })?;
            match key {
                "target" => {
                    let (w, h) = value.split_once('x').ok_or_else(|| {
                        ConfigurationError::invalid("source", "target must look like WxH")
                    })?;
                    config.target_width = parse_param(key, w)?;
                    config.target_height = parse_param(key, h)?;
                }
                "color" => {
                    let channels: Vec<u8> = value
                        .split(',')
                        .map(|c| parse_param(key, c))
                        .collect::<Result<_, _>>()?;
                    config.target_color = channels.try_into().map_err(|_| {
                        ConfigurationError::invalid("source", "color must have 3 channels")
                    })?;
                }
                "noise" => config.noise = parse_param(key, value)?,
                "seed" => config.seed = parse_param(key, value)?,
                "fail_every" => config.fail_every = Some(parse_param(key, value)?),
                "fail_after" => config.fail_after = Some(parse_param(key, value)?),
                other => {
                    return Err(ConfigurationError::invalid(
                        "source",
                        format!("unknown synthetic parameter '{other}'"),
                    ))
                }
            }
        }
        if config.fail_every == Some(0) {
            return Err(ConfigurationError::invalid(
                "source",
                "fail_every must be at least 1",
            ));
        }
        Ok(config)
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigurationError> {
    value.trim().parse().map_err(|_| {
        ConfigurationError::invalid("source", format!("invalid value '{value}' for '{key}'"))
    })
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    rng: StdRng,
    connected: bool,
    /// Reads since the last connect.
    reads: u64,
    frames_captured: u64,
    failed_reads: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            connected: false,
            reads: 0,
            frames_captured: 0,
            failed_reads: 0,
        }
    }

    /// Top-left corner of the target for the current frame.
    fn target_origin(&self) -> (u32, u32) {
        let travel = self
            .config
            .width
            .saturating_sub(self.config.target_width)
            .max(1) as u64;
        let x = (self.frames_captured * 4) % travel;
        let y = self.config.height.saturating_sub(self.config.target_height) / 2;
        (x as u32, y)
    }

    fn render(&mut self) -> RgbImage {
        let mut image = RgbImage::from_pixel(self.config.width, self.config.height, BACKGROUND);
        let (x0, y0) = self.target_origin();
        let color = Rgb(self.config.target_color);
        let x1 = (x0 + self.config.target_width).min(self.config.width);
        let y1 = (y0 + self.config.target_height).min(self.config.height);
        for y in y0..y1 {
            for x in x0..x1 {
                image.put_pixel(x, y, color);
            }
        }

        if self.config.noise > 0 {
            let amplitude = self.config.noise as i16;
            for channel in image.iter_mut() {
                let jitter = self.rng.gen_range(-amplitude..=amplitude);
                *channel = (*channel as i16 + jitter).clamp(0, 255) as u8;
            }
        }
        image
    }

    fn should_fail(&self) -> bool {
        let every = self
            .config
            .fail_every
            .is_some_and(|n| self.reads % n == 0);
        let after = self.config.fail_after.is_some_and(|n| self.reads > n);
        every || after
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.config.uri
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        self.reads = 0;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.config.uri,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        if !self.connected {
            return Err(anyhow!("{} is not connected", self.config.uri));
        }
        self.reads += 1;
        if self.should_fail() {
            self.failed_reads += 1;
            return Err(anyhow!(
                "{}: injected read failure #{}",
                self.config.uri,
                self.failed_reads
            ));
        }
        let image = self.render();
        self.frames_captured += 1;
        Ok(Some(image))
    }

    fn can_reopen(&self) -> bool {
        true
    }

    fn release(&mut self) {
        self.connected = false;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            failed_reads: self.failed_reads,
            uri: self.config.uri.clone(),
        }
    }
}
