//! Dedicated capture loop for one camera session.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

use super::CameraSession;
use crate::error::CaptureError;
use crate::frame::Frame;

const MIN_IDLE: Duration = Duration::from_millis(1);
const ERROR_IDLE: Duration = Duration::from_millis(10);
const SLEEP_SLICE: Duration = Duration::from_millis(10);
const FENCE_POLL: Duration = Duration::from_millis(2);
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    Stopped,
    Running,
    StopRequested,
}

#[derive(Debug, Error)]
pub enum CameraThreadError {
    #[error("camera thread {0} is already running")]
    AlreadyRunning(String),
    #[error("camera thread {camera} did not stop within {grace:?}")]
    StopTimeout { camera: String, grace: Duration },
    #[error("failed to spawn camera thread {camera}: {reason}")]
    Spawn { camera: String, reason: String },
}

/// Runs `session.capture()` in a loop on its own thread and hands every new frame to a
/// callback, in capture order.
///
/// Capture errors never end the loop. Once `stop` returns `Ok`, the callback will not
/// be invoked again.
pub struct CameraThread {
    session: Arc<CameraSession>,
    grace: Duration,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    exited: Option<Receiver<()>>,
}

struct Shared {
    state: Mutex<ThreadState>,
    shutdown: AtomicBool,
    /// Held while the callback runs; `stop` polls it to fence out further deliveries.
    delivery: Mutex<()>,
    delivered: AtomicU64,
}

impl CameraThread {
    pub fn new(session: Arc<CameraSession>) -> Self {
        Self {
            session,
            grace: DEFAULT_STOP_GRACE,
            shared: Arc::new(Shared {
                state: Mutex::new(ThreadState::Stopped),
                shutdown: AtomicBool::new(false),
                delivery: Mutex::new(()),
                delivered: AtomicU64::new(0),
            }),
            handle: None,
            exited: None,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn name(&self) -> &str {
        self.session.name()
    }

    pub fn session(&self) -> &Arc<CameraSession> {
        &self.session
    }

    pub fn state(&self) -> ThreadState {
        *lock(&self.shared.state)
    }

    /// Frames handed to the callback since construction.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::SeqCst)
    }

    /// Open the session and start the capture loop.
    pub fn start<F>(&mut self, on_frame: F) -> Result<(), CameraThreadError>
    where
        F: FnMut(Frame) + Send + 'static,
    {
        {
            let mut state = lock(&self.shared.state);
            if *state != ThreadState::Stopped || self.handle.is_some() {
                return Err(CameraThreadError::AlreadyRunning(self.name().to_string()));
            }
            *state = ThreadState::Running;
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);

        // A failed open is not fatal: the session's reopen policy keeps retrying.
        if let Err(err) = self.session.open() {
            log::warn!("camera {}: starting without device: {}", self.name(), err);
        }

        let (exit_tx, exit_rx) = bounded(1);
        let session = self.session.clone();
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("camera-{}", self.name()))
            .spawn(move || {
                let _exit = ExitSignal {
                    shared: shared.clone(),
                    tx: exit_tx,
                };
                capture_loop(&session, &shared, on_frame);
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.exited = Some(exit_rx);
                log::info!("camera {}: capture thread started", self.name());
                Ok(())
            }
            Err(err) => {
                *lock(&self.shared.state) = ThreadState::Stopped;
                Err(CameraThreadError::Spawn {
                    camera: self.name().to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Request shutdown and wait up to the grace period for the loop to exit.
    ///
    /// Stopping a thread that is not running is a no-op. On `StopTimeout` the thread is
    /// left in `StopRequested` and `stop` may be called again.
    pub fn stop(&mut self) -> Result<(), CameraThreadError> {
        let deadline = Instant::now() + self.grace;
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let mut state = lock(&self.shared.state);
            if *state == ThreadState::Running {
                *state = ThreadState::StopRequested;
            }
        }

        let Some(exited) = self.exited.as_ref() else {
            return Ok(());
        };
        let timeout = || CameraThreadError::StopTimeout {
            camera: self.name().to_string(),
            grace: self.grace,
        };
        if !fence_deliveries(&self.shared, deadline) {
            return Err(timeout());
        }
        match exited.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => return Err(timeout()),
        }

        self.exited = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("camera {}: capture thread panicked", self.name());
            }
        }
        if let Err(err) = self.session.close() {
            log::warn!("camera {}: release failed: {}", self.name(), err);
        }
        log::info!("camera {}: capture thread stopped", self.name());
        Ok(())
    }
}

impl Drop for CameraThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(err) = self.stop() {
                log::warn!("{}", err);
            }
        }
    }
}

fn capture_loop<F>(session: &CameraSession, shared: &Shared, mut on_frame: F)
where
    F: FnMut(Frame),
{
    let mut last_sequence = 0;
    while !shared.shutdown.load(Ordering::SeqCst) {
        let idle = match session.capture() {
            Ok(frame) => {
                if frame.sequence() > last_sequence {
                    last_sequence = frame.sequence();
                    let _delivery = lock(&shared.delivery);
                    if shared.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    on_frame(frame);
                    shared.delivered.fetch_add(1, Ordering::SeqCst);
                }
                session.until_next_read().max(MIN_IDLE)
            }
            Err(CaptureError::NoFrameYet) => {
                log::debug!("camera {}: no frame yet", session.name());
                ERROR_IDLE
            }
            Err(err) => {
                log::warn!("camera {}: {}", session.name(), err);
                ERROR_IDLE
            }
        };
        sleep_unless_shutdown(shared, idle);
    }
}

/// Wait until no callback is in flight. With `shutdown` already set, none can start
/// afterwards. Returns false when `deadline` passes first.
fn fence_deliveries(shared: &Shared, deadline: Instant) -> bool {
    loop {
        match shared.delivery.try_lock() {
            Ok(_) | Err(TryLockError::Poisoned(_)) => return true,
            Err(TryLockError::WouldBlock) => {}
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep((deadline - now).min(FENCE_POLL));
    }
}

fn sleep_unless_shutdown(shared: &Shared, total: Duration) {
    let deadline = Instant::now() + total;
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// Marks the thread stopped and signals `stop`, also when the callback panics.
struct ExitSignal {
    shared: Arc<Shared>,
    tx: Sender<()>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        *lock(&self.shared.state) = ThreadState::Stopped;
        let _ = self.tx.try_send(());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraSettings;
    use crate::ingest::{SyntheticConfig, SyntheticSource};

    fn synthetic_session(name: &str) -> Arc<CameraSession> {
        let mut settings = CameraSettings::new(name, 32, 24, 60.0);
        settings.frame_interval = Duration::from_millis(2);
        Arc::new(CameraSession::new(
            settings,
            Box::new(SyntheticSource::new(SyntheticConfig::new(
                format!("stub://{name}"),
                32,
                24,
            ))),
        ))
    }

    #[test]
    fn state_transitions_follow_start_and_stop() {
        let mut camera = CameraThread::new(synthetic_session("states"));
        assert_eq!(camera.state(), ThreadState::Stopped);

        camera.start(|_| {}).unwrap();
        assert_eq!(camera.state(), ThreadState::Running);
        assert!(matches!(
            camera.start(|_| {}),
            Err(CameraThreadError::AlreadyRunning(_))
        ));

        camera.stop().unwrap();
        assert_eq!(camera.state(), ThreadState::Stopped);

        // Stopping again is a no-op, and the thread can be restarted.
        camera.stop().unwrap();
        camera.start(|_| {}).unwrap();
        camera.stop().unwrap();
    }

    #[test]
    fn frames_arrive_in_capture_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut camera = CameraThread::new(synthetic_session("order"));
        camera
            .start(move |frame| lock(&sink).push(frame.sequence()))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while lock(&seen).len() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        camera.stop().unwrap();

        let seen = lock(&seen).clone();
        assert!(seen.len() >= 5);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(camera.delivered(), seen.len() as u64);
    }
}
