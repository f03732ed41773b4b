//! Error kinds shared across the pipeline.
//!
//! - `CaptureError`: what a consumer may see from `CameraSession::capture()`.
//! - `ProcessorError`: raised by a processor's `process`/`publish`/`draw`.
//! - `ConfigurationError`: invalid setup, surfaced at startup only.

use std::time::Duration;

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The device has not produced a single good frame yet.
    #[error("no frame captured yet")]
    NoFrameYet,
    /// Another capture held the session longer than the lock timeout.
    #[error("capture lock not acquired within {waited:?}")]
    Locked { waited: Duration },
    #[error("camera {camera}: device failure: {reason}")]
    DeviceFailure { camera: String, reason: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("processor {processor} on camera {camera}: {message}")]
pub struct ProcessorError {
    pub processor: String,
    pub camera: String,
    pub message: String,
}

impl ProcessorError {
    pub fn new(
        processor: impl Into<String>,
        camera: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            processor: processor.into(),
            camera: camera.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error("unknown processor type '{0}'")]
    UnknownProcessorType(String),
    #[error("camera '{camera}' references unknown processor '{processor}'")]
    UnknownProcessor { camera: String, processor: String },
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },
    #[error("no cameras configured")]
    NoCameras,
    #[error("failed to read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("invalid config file {path}: {reason}")]
    Parse { path: String, reason: String },
}

impl ConfigurationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
