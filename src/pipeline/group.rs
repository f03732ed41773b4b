//! Cameras and processors wired over a shared worker pool.
//!
//! Each camera is a lane: a capture thread, a history ring and the processors attached
//! to it. A delivered frame starts a cycle that fans out one `process` task per
//! processor. The task that finishes last runs every `publish`, then every `draw` onto
//! one canvas copy, and hands the canvas to the display queue. A lane runs at most one
//! cycle at a time; frames that arrive meanwhile go to history but are not processed.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::display::DisplayQueue;
use super::telemetry::{LogTelemetry, TableWriter, Telemetry};
use super::worker::{PoolHandle, PoolShutdown, WorkerPool};
use crate::camera::{
    CameraInfo, CameraSession, CameraThread, CameraThreadError, SessionStats, ThreadState,
};
use crate::detect::{Dependencies, Processor};
use crate::error::{ConfigurationError, ProcessorError};
use crate::frame::{Frame, FrameRingBuffer};
use crate::report::{ErrorEvent, EventKind, LogReporter, Reporter};

pub const DEFAULT_RING_CAPACITY: usize = 8;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Which processors a camera runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessorSelection {
    All,
    Named(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Worker threads. Zero means one per CPU.
    pub workers: usize,
    pub ring_capacity: usize,
    /// Bound on stopping each camera thread and on waiting for workers.
    pub shutdown_grace: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 0,
            ring_capacity: DEFAULT_RING_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown camera {0}")]
    UnknownCamera(String),
    #[error("pipeline has been shut down")]
    ShutDown,
    #[error(transparent)]
    Camera(#[from] CameraThreadError),
}

/// Counters for one camera lane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaneStats {
    /// Frames delivered by the capture thread.
    pub frames: u64,
    /// Cycles started.
    pub cycles: u64,
    /// Cycles that ran publish and draw.
    pub completed: u64,
    /// Frames not processed because the previous cycle was still running.
    pub skipped: u64,
    pub processor_errors: u64,
    pub thread: ThreadState,
    pub session: SessionStats,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cameras_stopped: usize,
    /// Cameras whose thread did not stop within the grace period.
    pub camera_timeouts: Vec<String>,
    pub workers: PoolShutdown,
}

pub struct PipelineGroupBuilder {
    settings: PipelineSettings,
    cameras: Vec<(CameraSession, ProcessorSelection)>,
    processors: Vec<Arc<dyn Processor>>,
    telemetry: Arc<dyn Telemetry>,
    reporter: Arc<dyn Reporter>,
    display: Option<Arc<DisplayQueue>>,
}

impl PipelineGroupBuilder {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            cameras: Vec::new(),
            processors: Vec::new(),
            telemetry: Arc::new(LogTelemetry),
            reporter: Arc::new(LogReporter),
            display: None,
        }
    }

    pub fn camera(mut self, session: CameraSession, selection: ProcessorSelection) -> Self {
        self.cameras.push((session, selection));
        self
    }

    pub fn processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Draw every cycle and queue the result for display.
    pub fn display(mut self, display: Arc<DisplayQueue>) -> Self {
        self.display = Some(display);
        self
    }

    /// Resolve processor selections and spawn the worker pool.
    pub fn build(self) -> Result<PipelineGroup, ConfigurationError> {
        if self.cameras.is_empty() {
            return Err(ConfigurationError::NoCameras);
        }

        let mut by_name: HashMap<&str, Arc<dyn Processor>> = HashMap::new();
        for processor in &self.processors {
            if by_name.insert(processor.name(), processor.clone()).is_some() {
                return Err(ConfigurationError::DuplicateName {
                    kind: "processor",
                    name: processor.name().to_string(),
                });
            }
        }

        let mut camera_names = HashSet::new();
        let mut resolved = Vec::with_capacity(self.cameras.len());
        for (session, selection) in self.cameras {
            if !camera_names.insert(session.name().to_string()) {
                return Err(ConfigurationError::DuplicateName {
                    kind: "camera",
                    name: session.name().to_string(),
                });
            }
            let processors = match &selection {
                ProcessorSelection::All => self.processors.clone(),
                ProcessorSelection::Named(names) => {
                    let mut attached: Vec<Arc<dyn Processor>> = Vec::with_capacity(names.len());
                    for name in names {
                        let processor = by_name.get(name.as_str()).ok_or_else(|| {
                            ConfigurationError::UnknownProcessor {
                                camera: session.name().to_string(),
                                processor: name.clone(),
                            }
                        })?;
                        if attached.iter().any(|p| p.name() == name.as_str()) {
                            return Err(ConfigurationError::DuplicateName {
                                kind: "attached processor",
                                name: name.clone(),
                            });
                        }
                        attached.push(processor.clone());
                    }
                    attached
                }
            };
            resolved.push((session, processors));
        }

        let workers = match self.settings.workers {
            0 => num_cpus::get().max(1),
            n => n,
        };
        let pool = WorkerPool::new(workers).map_err(|err| {
            ConfigurationError::invalid("pipeline.workers", format!("cannot spawn workers: {err}"))
        })?;

        let context = Arc::new(Context {
            telemetry: self.telemetry,
            reporter: self.reporter,
            display: self.display,
            pool: pool.handle(),
        });

        let mut lanes = Vec::with_capacity(resolved.len());
        for (session, processors) in resolved {
            let session = Arc::new(session);
            let shared = Arc::new(LaneShared {
                info: session.info(),
                history: FrameRingBuffer::new(self.settings.ring_capacity)?,
                processors,
                busy: AtomicBool::new(false),
                frames: AtomicU64::new(0),
                cycles: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                processor_errors: AtomicU64::new(0),
            });
            log::info!(
                "camera {}: {} processor(s) attached",
                session.name(),
                shared.processors.len()
            );
            lanes.push(Lane {
                thread: CameraThread::new(session).with_grace(self.settings.shutdown_grace),
                shared,
            });
        }

        log::info!(
            "pipeline ready: {} camera(s), {} processor(s), {} worker(s)",
            lanes.len(),
            self.processors.len(),
            pool.size()
        );

        Ok(PipelineGroup {
            settings: self.settings,
            lanes,
            context,
            pool,
            shut_down: false,
        })
    }
}

pub struct PipelineGroup {
    settings: PipelineSettings,
    lanes: Vec<Lane>,
    context: Arc<Context>,
    pool: WorkerPool,
    shut_down: bool,
}

struct Lane {
    thread: CameraThread,
    shared: Arc<LaneShared>,
}

struct LaneShared {
    info: Arc<CameraInfo>,
    history: FrameRingBuffer,
    processors: Vec<Arc<dyn Processor>>,
    /// Set while a cycle is in flight.
    busy: AtomicBool,
    frames: AtomicU64,
    cycles: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
    processor_errors: AtomicU64,
}

struct Context {
    telemetry: Arc<dyn Telemetry>,
    reporter: Arc<dyn Reporter>,
    display: Option<Arc<DisplayQueue>>,
    pool: PoolHandle,
}

impl PipelineGroup {
    pub fn builder(settings: PipelineSettings) -> PipelineGroupBuilder {
        PipelineGroupBuilder::new(settings)
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn cameras(&self) -> Vec<&str> {
        self.lanes.iter().map(|lane| lane.thread.name()).collect()
    }

    /// Start every camera that is not already running.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.shut_down {
            return Err(PipelineError::ShutDown);
        }
        for index in 0..self.lanes.len() {
            if self.lanes[index].thread.state() == ThreadState::Stopped {
                self.start_lane(index)?;
            }
        }
        Ok(())
    }

    pub fn start_camera(&mut self, camera: &str) -> Result<(), PipelineError> {
        if self.shut_down {
            return Err(PipelineError::ShutDown);
        }
        let index = self.lane_index(camera)?;
        self.start_lane(index)
    }

    /// Stop one camera. Its in-flight cycle, if any, still completes.
    pub fn stop_camera(&mut self, camera: &str) -> Result<(), PipelineError> {
        let index = self.lane_index(camera)?;
        self.lanes[index].thread.stop()?;
        Ok(())
    }

    /// Stop every camera, then the workers. Queued tasks are dropped, running ones are
    /// waited for. Calling it again returns an empty report.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.shut_down {
            return ShutdownReport::default();
        }
        self.shut_down = true;

        let mut report = ShutdownReport::default();
        for lane in &mut self.lanes {
            match lane.thread.stop() {
                Ok(()) => report.cameras_stopped += 1,
                Err(err) => {
                    self.context.reporter.report(
                        ErrorEvent::new(EventKind::Pipeline, err.to_string())
                            .camera(lane.thread.name()),
                    );
                    report.camera_timeouts.push(lane.thread.name().to_string());
                }
            }
        }
        report.workers = self.pool.shutdown(self.settings.shutdown_grace);
        if report.workers.cancelled > 0 {
            self.context.reporter.report(ErrorEvent::new(
                EventKind::Pipeline,
                format!("{} queued task(s) cancelled at shutdown", report.workers.cancelled),
            ));
        }
        log::info!(
            "pipeline stopped: {} camera(s) stopped, {} timed out, {} task(s) cancelled",
            report.cameras_stopped,
            report.camera_timeouts.len(),
            report.workers.cancelled
        );
        report
    }

    /// Recent frames of `camera`.
    pub fn history(&self, camera: &str) -> Option<&FrameRingBuffer> {
        self.lane(camera).map(|lane| &lane.shared.history)
    }

    pub fn stats(&self, camera: &str) -> Option<LaneStats> {
        self.lane(camera).map(|lane| {
            let shared = &lane.shared;
            LaneStats {
                frames: shared.frames.load(Ordering::SeqCst),
                cycles: shared.cycles.load(Ordering::SeqCst),
                completed: shared.completed.load(Ordering::SeqCst),
                skipped: shared.skipped.load(Ordering::SeqCst),
                processor_errors: shared.processor_errors.load(Ordering::SeqCst),
                thread: lane.thread.state(),
                session: lane.thread.session().stats(),
            }
        })
    }

    fn lane(&self, camera: &str) -> Option<&Lane> {
        self.lanes.iter().find(|lane| lane.thread.name() == camera)
    }

    fn lane_index(&self, camera: &str) -> Result<usize, PipelineError> {
        self.lanes
            .iter()
            .position(|lane| lane.thread.name() == camera)
            .ok_or_else(|| PipelineError::UnknownCamera(camera.to_string()))
    }

    fn start_lane(&mut self, index: usize) -> Result<(), PipelineError> {
        let lane = &mut self.lanes[index];
        let shared = lane.shared.clone();
        let context = self.context.clone();
        lane.thread
            .start(move |frame| on_frame(&shared, &context, frame))?;
        Ok(())
    }
}

impl Drop for PipelineGroup {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Capture-thread callback.
fn on_frame(lane: &Arc<LaneShared>, context: &Arc<Context>, frame: Frame) {
    lane.frames.fetch_add(1, Ordering::SeqCst);
    lane.history.push(frame.clone());

    if lane.processors.is_empty() {
        if let Some(display) = &context.display {
            display.offer(&lane.info.name, frame.sequence(), frame.to_canvas());
        }
        return;
    }
    if lane.busy.swap(true, Ordering::SeqCst) {
        lane.skipped.fetch_add(1, Ordering::SeqCst);
        return;
    }

    let cycle = Arc::new(Cycle {
        number: lane.cycles.fetch_add(1, Ordering::SeqCst) + 1,
        lane: lane.clone(),
        context: context.clone(),
        frame,
        remaining: AtomicUsize::new(lane.processors.len()),
        cancelled: AtomicBool::new(false),
    });
    for index in 0..lane.processors.len() {
        let task = ProcessTask {
            cycle: cycle.clone(),
            index,
            ran: false,
        };
        // A rejected task is dropped here, which cancels the cycle.
        let _ = context.pool.submit(Box::new(move || task.run()));
    }
}

/// One frame of one camera going through its processors.
struct Cycle {
    number: u64,
    lane: Arc<LaneShared>,
    context: Arc<Context>,
    frame: Frame,
    remaining: AtomicUsize,
    cancelled: AtomicBool,
}

impl Cycle {
    fn camera(&self) -> &str {
        &self.lane.info.name
    }

    /// Record one finished (or dropped) process task; the last one finalizes the cycle.
    fn task_done(&self, ran: bool) {
        if !ran {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        if self.remaining.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        if !self.cancelled.load(Ordering::SeqCst) {
            self.finish();
        }
        self.lane.busy.store(false, Ordering::SeqCst);
    }

    fn finish(&self) {
        let info = &self.lane.info;
        for processor in &self.lane.processors {
            let table = TableWriter::new(&*self.context.telemetry, &info.name, processor.name());
            self.guard(processor.as_ref(), "publish", || processor.publish(&table, info));
        }
        if let Some(display) = &self.context.display {
            let mut canvas = self.frame.to_canvas();
            for processor in &self.lane.processors {
                self.guard(processor.as_ref(), "draw", || processor.draw(&mut canvas, info));
            }
            display.offer(&info.name, self.frame.sequence(), canvas);
        }
        self.lane.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Run one processor phase, turning errors and panics into reports.
    fn guard<F>(&self, processor: &dyn Processor, phase: &str, f: F)
    where
        F: FnOnce() -> Result<(), ProcessorError>,
    {
        let error = match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(panic) => ProcessorError::new(
                processor.name(),
                self.camera(),
                format!("panicked in {phase}: {}", panic_message(panic.as_ref())),
            ),
        };
        self.lane.processor_errors.fetch_add(1, Ordering::SeqCst);
        self.context.reporter.report(
            ErrorEvent::new(
                EventKind::Processor,
                format!("{phase} failed on frame {}: {}", self.frame.sequence(), error.message),
            )
            .camera(&error.camera)
            .processor(&error.processor),
        );
    }
}

struct ProcessTask {
    cycle: Arc<Cycle>,
    index: usize,
    ran: bool,
}

impl ProcessTask {
    fn run(mut self) {
        let cycle = &self.cycle;
        let processor = &cycle.lane.processors[self.index];
        let deps = Dependencies {
            cycle: cycle.number,
            history: &cycle.lane.history,
        };
        cycle.guard(processor.as_ref(), "process", || {
            processor.process(&cycle.frame, &cycle.lane.info, &deps)
        });
        self.ran = true;
    }
}

impl Drop for ProcessTask {
    fn drop(&mut self) {
        self.cycle.task_done(self.ran);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
