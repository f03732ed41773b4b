pub mod blob;
pub mod motion;

pub use blob::{ColorBlobDetector, ColorBlobParams};
pub use motion::{MotionDetector, MotionParams, MotionState};
