//! Vision processors.
//!
//! - `Processor`: what the pipeline calls (`process`, then `publish` and `draw`).
//! - `Instanced<P>`: keeps one state per camera for an `InstancedProcessor`.
//! - `ObjectProcessor<D>`: angle/distance geometry for any `ObjectDetector`.
//! - `ProcessorRegistry`: type tag to constructor, resolved once at startup.

pub mod backends;
pub mod imaging;
mod instanced;
pub mod object;
mod processor;
mod registry;
mod state;

pub use backends::{ColorBlobDetector, ColorBlobParams, MotionDetector, MotionParams};
pub use instanced::{Instanced, InstancedProcessor};
pub use object::{DetectedObject, ObjectDetector, ObjectProcessor, Rect, TargetSize};
pub use processor::{Dependencies, Processor};
pub use registry::{Constructor, ProcessorRegistry};
pub use state::ProcessorState;
