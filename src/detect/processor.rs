use crate::camera::CameraInfo;
use crate::error::ProcessorError;
use crate::frame::{Canvas, Frame, FrameRingBuffer};
use crate::pipeline::TableWriter;

/// Per-cycle collaborators handed to `Processor::process`.
#[derive(Clone, Copy)]
pub struct Dependencies<'a> {
    /// Processing cycle of this camera, starting at 1.
    pub cycle: u64,
    /// Recent frames of this camera, oldest first. Includes the frame being processed,
    /// and can already hold newer frames captured while this cycle runs.
    pub history: &'a FrameRingBuffer,
}

/// A vision processor attached to one or more cameras.
///
/// For a given camera and cycle, `process` completes before `publish` and `draw` are
/// called. Calls for different cameras may run concurrently and in any order, so
/// implementations keep per-camera state apart (see `Instanced`).
///
/// `process` must not mutate the frame. `draw` gets a copy meant for display only.
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    fn process(
        &self,
        frame: &Frame,
        camera: &CameraInfo,
        deps: &Dependencies<'_>,
    ) -> Result<(), ProcessorError>;

    fn publish(&self, table: &TableWriter<'_>, camera: &CameraInfo) -> Result<(), ProcessorError>;

    fn draw(&self, canvas: &mut Canvas, camera: &CameraInfo) -> Result<(), ProcessorError>;
}
