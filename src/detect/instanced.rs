use anyhow::Result;

use super::processor::{Dependencies, Processor};
use super::state::ProcessorState;
use crate::camera::CameraInfo;
use crate::error::ProcessorError;
use crate::frame::{Canvas, Frame};
use crate::pipeline::TableWriter;

/// The narrow part of a processor that keeps independent state per camera.
///
/// `process` computes this cycle's state from the frame and the camera's previous
/// state. `publish` and `draw` only see a state that `process` produced.
pub trait InstancedProcessor: Send + Sync + 'static {
    type State: Send + Sync + 'static;

    fn process(
        &self,
        frame: &Frame,
        camera: &CameraInfo,
        deps: &Dependencies<'_>,
        previous: Option<&Self::State>,
    ) -> Result<Self::State>;

    fn publish(&self, table: &TableWriter<'_>, camera: &CameraInfo, state: &Self::State)
        -> Result<()>;

    fn draw(&self, _canvas: &mut Canvas, _camera: &CameraInfo, _state: &Self::State) -> Result<()> {
        Ok(())
    }
}

/// Turns an `InstancedProcessor` into a `Processor` by owning its per-camera state.
pub struct Instanced<P: InstancedProcessor> {
    name: String,
    inner: P,
    state: ProcessorState<P::State>,
}

impl<P: InstancedProcessor> Instanced<P> {
    pub fn new(name: impl Into<String>, inner: P) -> Self {
        Self {
            name: name.into(),
            inner,
            state: ProcessorState::new(),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn state(&self) -> &ProcessorState<P::State> {
        &self.state
    }

    fn error(&self, camera: &CameraInfo, err: anyhow::Error) -> ProcessorError {
        ProcessorError::new(&self.name, &camera.name, format!("{err:#}"))
    }
}

impl<P: InstancedProcessor> Processor for Instanced<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(
        &self,
        frame: &Frame,
        camera: &CameraInfo,
        deps: &Dependencies<'_>,
    ) -> Result<(), ProcessorError> {
        self.state
            .update(&camera.name, |previous| {
                self.inner.process(frame, camera, deps, previous)
            })
            .map_err(|err| self.error(camera, err))
    }

    fn publish(&self, table: &TableWriter<'_>, camera: &CameraInfo) -> Result<(), ProcessorError> {
        self.state
            .with(&camera.name, |state| match state {
                Some(state) => self.inner.publish(table, camera, state),
                None => Ok(()),
            })
            .map_err(|err| self.error(camera, err))
    }

    fn draw(&self, canvas: &mut Canvas, camera: &CameraInfo) -> Result<(), ProcessorError> {
        self.state
            .with(&camera.name, |state| match state {
                Some(state) => self.inner.draw(canvas, camera, state),
                None => Ok(()),
            })
            .map_err(|err| self.error(camera, err))
    }
}
