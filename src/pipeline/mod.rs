//! Frame fan-out from cameras to processors, plus the telemetry and display
//! collaborators the processors write to.

pub mod display;
mod group;
pub mod telemetry;
mod worker;

pub use display::{Annotated, DisplayQueue, DisplaySink, SnapshotSink};
pub use group::{
    LaneStats, PipelineError, PipelineGroup, PipelineGroupBuilder, PipelineSettings,
    ProcessorSelection, ShutdownReport, DEFAULT_RING_CAPACITY, DEFAULT_SHUTDOWN_GRACE,
};
pub use telemetry::{LogTelemetry, MemoryTelemetry, TableWriter, Telemetry, TelemetryValue};
pub use worker::PoolShutdown;
