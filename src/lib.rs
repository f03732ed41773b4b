//! Vision Pipeline
//!
//! Real-time multi-camera machine vision: frames are pulled from cameras, fanned out to
//! pluggable processors on a worker pool, and the results are published to a telemetry
//! table and drawn for an operator.
//!
//! # Architecture
//!
//! Data flows leaves first:
//!
//! 1. **FrameSource** (`ingest`): produces raw images on demand, may fail.
//! 2. **CameraSession** (`camera`): locking, throttling, stale-frame fallback and
//!    reopen with backoff around one source.
//! 3. **CameraThread** (`camera`): one dedicated capture loop per camera.
//! 4. **PipelineGroup** (`pipeline`): history ring per camera, fan-out of each new
//!    frame to the camera's processors, then publish and draw.
//! 5. **Processors** (`detect`): per-camera state (`Instanced`), object geometry
//!    (`ObjectProcessor`), colour-blob and motion detectors.
//!
//! # Module Structure
//!
//! - `frame`: Frame, Crop, FrameRingBuffer
//! - `ingest`: frame sources (synthetic, still image, V4L2)
//! - `camera`: CameraSession, CameraThread
//! - `detect`: processors, processor state, detectors, registry
//! - `pipeline`: PipelineGroup, telemetry table, display queue
//! - `report`: structured error events
//! - `config`: daemon configuration
//! - `error`: error kinds

pub mod camera;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod report;

pub use camera::{
    CameraInfo, CameraSession, CameraSettings, CameraThread, CameraThreadError, SessionStats,
    ThreadState,
};
pub use config::{CameraConfig, ProcessorConfig, VisionConfig};
pub use detect::{
    ColorBlobDetector, ColorBlobParams, Dependencies, DetectedObject, Instanced,
    InstancedProcessor, MotionDetector, MotionParams, ObjectDetector, ObjectProcessor, Processor,
    ProcessorRegistry, ProcessorState, Rect, TargetSize,
};
pub use error::{CaptureError, ConfigurationError, ProcessorError};
pub use frame::{Canvas, Crop, Frame, FrameRingBuffer};
pub use ingest::{open_source, FrameSource, SourceSpec, SourceStats};
pub use pipeline::{
    DisplayQueue, DisplaySink, LaneStats, MemoryTelemetry, PipelineError, PipelineGroup,
    PipelineGroupBuilder, PipelineSettings, ProcessorSelection, ShutdownReport, SnapshotSink,
    TableWriter, Telemetry, TelemetryValue,
};
pub use report::{ErrorEvent, EventKind, LogReporter, MemoryReporter, Reporter};
