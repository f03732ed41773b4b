//! Daemon configuration.
//!
//! Loaded from the file named by `VISION_CONFIG` (TOML for `.toml`, JSON otherwise),
//! with defaults for everything the file leaves out, then environment overrides, then
//! validation. Any problem is a `ConfigurationError` at startup.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::camera::{
    CameraSession, CameraSettings, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP,
    DEFAULT_FRAME_INTERVAL, DEFAULT_LOCK_TIMEOUT, DEFAULT_REOPEN_AFTER,
};
use crate::detect::ProcessorRegistry;
use crate::error::ConfigurationError;
use crate::frame::Crop;
use crate::ingest::{open_source, SourceSpec};
use crate::pipeline::{
    PipelineGroupBuilder, PipelineSettings, ProcessorSelection, DEFAULT_RING_CAPACITY,
    DEFAULT_SHUTDOWN_GRACE,
};
use crate::report::Reporter;

pub const CONFIG_ENV: &str = "VISION_CONFIG";

const DEFAULT_CAMERA_NAME: &str = "front";
const DEFAULT_CAMERA_SOURCE: &str = "stub://front";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_HORIZONTAL_FOV: f64 = 60.0;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct VisionConfigFile {
    pipeline: Option<PipelineConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
    processors: Option<Vec<ProcessorConfig>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    workers: Option<usize>,
    ring_capacity: Option<usize>,
    shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    name: String,
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    horizontal_fov: Option<f64>,
    vertical_fov: Option<f64>,
    frame_interval_ms: Option<u64>,
    lock_timeout_ms: Option<u64>,
    processors: Option<Vec<String>>,
    crop: Option<Crop>,
    reopen_after: Option<u32>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
}

/// One configured processor: a name, a type tag and the type's own parameters.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProcessorConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub settings: CameraSettings,
    pub source: String,
    pub processors: ProcessorSelection,
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub pipeline: PipelineSettings,
    pub cameras: Vec<CameraConfig>,
    pub processors: Vec<ProcessorConfig>,
}

impl VisionConfig {
    /// Load from `VISION_CONFIG` if set, else from defaults, then apply the environment.
    pub fn load() -> Result<Self, ConfigurationError> {
        let file = match std::env::var(CONFIG_ENV).ok().filter(|p| !p.trim().is_empty()) {
            Some(path) => read_config_file(Path::new(&path))?,
            None => VisionConfigFile::default(),
        };
        Self::finish(file)
    }

    /// Load a specific file, then apply the environment.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        Self::finish(read_config_file(path.as_ref())?)
    }

    fn finish(file: VisionConfigFile) -> Result<Self, ConfigurationError> {
        let mut cfg = Self::from_file(file);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VisionConfigFile) -> Self {
        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            workers: pipeline_file.workers.unwrap_or(0),
            ring_capacity: pipeline_file.ring_capacity.unwrap_or(DEFAULT_RING_CAPACITY),
            shutdown_grace: pipeline_file
                .shutdown_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE),
        };

        let cameras = match file.cameras {
            Some(cameras) => cameras.into_iter().map(camera_from_file).collect(),
            None => vec![CameraConfig {
                settings: CameraSettings::new(
                    DEFAULT_CAMERA_NAME,
                    DEFAULT_WIDTH,
                    DEFAULT_HEIGHT,
                    DEFAULT_HORIZONTAL_FOV,
                ),
                source: DEFAULT_CAMERA_SOURCE.to_string(),
                processors: ProcessorSelection::All,
            }],
        };

        let processors = file.processors.unwrap_or_else(default_processors);

        Self {
            pipeline,
            cameras,
            processors,
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigurationError> {
        if let Some(workers) = env_number::<usize>("VISION_WORKERS")? {
            self.pipeline.workers = workers;
        }
        if let Some(capacity) = env_number::<usize>("VISION_RING_CAPACITY")? {
            self.pipeline.ring_capacity = capacity;
        }
        if let Some(grace) = env_number::<u64>("VISION_SHUTDOWN_GRACE_MS")? {
            self.pipeline.shutdown_grace = Duration::from_millis(grace);
        }
        if let Ok(source) = std::env::var("VISION_CAMERA_SOURCE") {
            if !source.trim().is_empty() {
                if let Some(first) = self.cameras.first_mut() {
                    first.source = source.trim().to_string();
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.cameras.is_empty() {
            return Err(ConfigurationError::NoCameras);
        }
        if self.pipeline.ring_capacity == 0 {
            return Err(ConfigurationError::invalid(
                "pipeline.ring_capacity",
                "must be greater than zero",
            ));
        }
        if self.pipeline.shutdown_grace.is_zero() {
            return Err(ConfigurationError::invalid(
                "pipeline.shutdown_grace_ms",
                "must be greater than zero",
            ));
        }

        let mut processor_names = Vec::with_capacity(self.processors.len());
        for processor in &self.processors {
            if processor.name.trim().is_empty() {
                return Err(ConfigurationError::invalid("processors.name", "must not be empty"));
            }
            if processor_names.contains(&processor.name.as_str()) {
                return Err(ConfigurationError::DuplicateName {
                    kind: "processor",
                    name: processor.name.clone(),
                });
            }
            processor_names.push(processor.name.as_str());
        }

        let mut camera_names = Vec::with_capacity(self.cameras.len());
        for camera in &self.cameras {
            camera.settings.validate()?;
            if camera_names.contains(&camera.settings.name.as_str()) {
                return Err(ConfigurationError::DuplicateName {
                    kind: "camera",
                    name: camera.settings.name.clone(),
                });
            }
            camera_names.push(camera.settings.name.as_str());
            if let ProcessorSelection::Named(names) = &camera.processors {
                if let Some(unknown) = names.iter().find(|n| !processor_names.contains(&n.as_str())) {
                    return Err(ConfigurationError::UnknownProcessor {
                        camera: camera.settings.name.clone(),
                        processor: unknown.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Open every camera source and build every processor.
    ///
    /// The returned builder already carries `reporter`; telemetry and display are left
    /// to the caller.
    pub fn pipeline_builder(
        &self,
        registry: &ProcessorRegistry,
        reporter: Arc<dyn Reporter>,
    ) -> Result<PipelineGroupBuilder, ConfigurationError> {
        let mut builder =
            PipelineGroupBuilder::new(self.pipeline.clone()).reporter(reporter.clone());
        for processor in &self.processors {
            builder = builder.processor(registry.build(
                &processor.name,
                &processor.kind,
                &processor.params,
            )?);
        }
        for camera in &self.cameras {
            let settings = &camera.settings;
            let interval_ms = settings.frame_interval.as_millis().max(1);
            let source = open_source(&SourceSpec {
                uri: camera.source.clone(),
                width: settings.width,
                height: settings.height,
                target_fps: (1000 / interval_ms).clamp(1, 240) as u32,
            })
            .map_err(|err| match err {
                ConfigurationError::Invalid { field, reason } => ConfigurationError::Invalid {
                    field: format!("cameras.{}.{}", settings.name, field),
                    reason,
                },
                other => other,
            })?;
            let session = CameraSession::new(settings.clone(), source).with_reporter(reporter.clone());
            builder = builder.camera(session, camera.processors.clone());
        }
        Ok(builder)
    }
}

fn camera_from_file(file: CameraConfigFile) -> CameraConfig {
    let source = file
        .source
        .unwrap_or_else(|| format!("stub://{}", file.name));
    let mut settings = CameraSettings::new(
        file.name,
        file.width.unwrap_or(DEFAULT_WIDTH),
        file.height.unwrap_or(DEFAULT_HEIGHT),
        file.horizontal_fov.unwrap_or(DEFAULT_HORIZONTAL_FOV),
    );
    settings.vertical_fov = file.vertical_fov;
    settings.frame_interval = file
        .frame_interval_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_FRAME_INTERVAL);
    settings.lock_timeout = file
        .lock_timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_LOCK_TIMEOUT);
    settings.crop = file.crop;
    settings.reopen_after = file.reopen_after.unwrap_or(DEFAULT_REOPEN_AFTER);
    settings.backoff_base = file
        .backoff_base_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_BACKOFF_BASE);
    settings.backoff_cap = file
        .backoff_max_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_BACKOFF_CAP);

    CameraConfig {
        settings,
        source,
        processors: match file.processors {
            Some(names) => ProcessorSelection::Named(names),
            None => ProcessorSelection::All,
        },
    }
}

/// A colour-blob processor tuned to the synthetic source's green target.
fn default_processors() -> Vec<ProcessorConfig> {
    vec![ProcessorConfig {
        name: "target".to_string(),
        kind: "color_blob".to_string(),
        params: json!({
            "hsv_min": [50, 100, 100],
            "hsv_max": [70, 255, 255],
            "target_width": 0.5,
            "target_height": 0.25,
            "min_area": 100,
        }),
    }]
}

fn read_config_file(path: &Path) -> Result<VisionConfigFile, ConfigurationError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let parse_error = |reason: String| ConfigurationError::Parse {
        path: path.display().to_string(),
        reason,
    };
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&raw).map_err(|e| parse_error(e.to_string())),
        _ => serde_json::from_str(&raw).map_err(|e| parse_error(e.to_string())),
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigurationError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigurationError::invalid(key, "must be a non-negative integer")),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_one_synthetic_camera() {
        let cfg = VisionConfig::from_file(VisionConfigFile::default());
        cfg.validate().unwrap();
        assert_eq!(cfg.cameras.len(), 1);
        assert_eq!(cfg.cameras[0].source, DEFAULT_CAMERA_SOURCE);
        assert_eq!(cfg.cameras[0].processors, ProcessorSelection::All);
        assert_eq!(cfg.processors[0].kind, "color_blob");
        assert_eq!(cfg.pipeline.ring_capacity, DEFAULT_RING_CAPACITY);
    }

    #[test]
    fn toml_processor_params_become_json() {
        let file: VisionConfigFile = toml::from_str(
            r#"
            [[cameras]]
            name = "rear"
            processors = ["moves"]

            [[processors]]
            name = "moves"
            type = "motion"
            params = { threshold = 4.5 }
            "#,
        )
        .unwrap();
        let cfg = VisionConfig::from_file(file);
        cfg.validate().unwrap();
        assert_eq!(cfg.cameras[0].source, "stub://rear");
        assert_eq!(cfg.processors[0].params, json!({ "threshold": 4.5 }));
    }

    #[test]
    fn unknown_processor_reference_fails_validation() {
        let file: VisionConfigFile = serde_json::from_str(
            r#"{ "cameras": [{ "name": "front", "processors": ["ghost"] }], "processors": [] }"#,
        )
        .unwrap();
        let err = VisionConfig::from_file(file).validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownProcessor { .. }));
    }

    #[test]
    fn duplicate_cameras_fail_validation() {
        let file: VisionConfigFile = serde_json::from_str(
            r#"{ "cameras": [{ "name": "front" }, { "name": "front" }] }"#,
        )
        .unwrap();
        let err = VisionConfig::from_file(file).validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateName { kind: "camera", .. }));
    }

    #[test]
    fn pipeline_builder_rejects_unknown_type() {
        let mut cfg = VisionConfig::from_file(VisionConfigFile::default());
        cfg.processors[0].kind = "apriltag".to_string();
        let result = cfg.pipeline_builder(
            &ProcessorRegistry::with_builtin(),
            Arc::new(crate::report::MemoryReporter::new()),
        );
        assert!(matches!(result, Err(ConfigurationError::UnknownProcessorType(_))));
    }
}
