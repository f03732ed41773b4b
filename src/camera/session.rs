//! Capture session around one frame source.
//!
//! A session is the single entry point to a camera's device. It guarantees:
//! - at most one device read in flight (capture gate with a bounded wait)
//! - reads no closer together than the configured frame interval
//! - a failed read falls back to the last good frame (stale-frame fallback)
//! - "no frame yet" is an explicit error, never an empty placeholder
//! - frames are scaled to the configured resolution before the crop, so geometry
//!   computed from `CameraInfo` matches the pixels processors see
//! - repeated bad reads reopen the device, paced by exponential backoff

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use image::imageops::{self, FilterType};
use image::RgbImage;

use super::{CameraInfo, CameraSettings};
use crate::error::CaptureError;
use crate::frame::Frame;
use crate::ingest::{Backoff, FrameSource, SourceStats};
use crate::report::{ErrorEvent, EventKind, LogReporter, Reporter};

/// Counters describing how a session has been serving its consumers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Successful device reads.
    pub frames_read: u64,
    /// Device reads that failed or returned nothing.
    pub failed_reads: u64,
    /// Calls answered with the last good frame after a failed read.
    pub stale_served: u64,
    /// Calls answered without touching the device because of the frame interval.
    pub throttled: u64,
    /// Device frames scaled because their size differed from the configured one.
    pub resized: u64,
    pub lock_timeouts: u64,
    pub reopen_attempts: u64,
    pub reopen_failures: u64,
    /// Reopen attempts since the device last delivered a frame.
    pub backoff_attempts: u32,
    /// Delay the next reopen attempt would wait for.
    pub backoff_delay: Duration,
    pub source: SourceStats,
}

pub struct CameraSession {
    settings: CameraSettings,
    info: Arc<CameraInfo>,
    gate: CaptureGate,
    device: Mutex<Device>,
    last_good: Mutex<Option<Frame>>,
    bad_reads: AtomicU32,
    stats: Mutex<SessionStats>,
    reporter: Arc<dyn Reporter>,
}

/// Device-side state. Only touched while the capture gate is held.
struct Device {
    source: Box<dyn FrameSource>,
    last_read: Option<Instant>,
    next_sequence: u64,
    backoff: Backoff,
}

impl CameraSession {
    pub fn new(settings: CameraSettings, source: Box<dyn FrameSource>) -> Self {
        let backoff = Backoff::new(settings.backoff_base, settings.backoff_cap);
        Self {
            info: Arc::new(settings.info()),
            settings,
            gate: CaptureGate::default(),
            device: Mutex::new(Device {
                source,
                last_read: None,
                next_sequence: 1,
                backoff,
            }),
            last_good: Mutex::new(None),
            bad_reads: AtomicU32::new(0),
            stats: Mutex::new(SessionStats::default()),
            reporter: Arc::new(LogReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    pub fn info(&self) -> Arc<CameraInfo> {
        self.info.clone()
    }

    /// Connect the underlying source.
    pub fn open(&self) -> Result<(), CaptureError> {
        let _pass = self.enter()?;
        let mut device = lock(&self.device);
        device.source.connect().map_err(|err| {
            let failure = CaptureError::DeviceFailure {
                camera: self.settings.name.clone(),
                reason: format!("{err:#}"),
            };
            self.reporter.report(
                ErrorEvent::new(EventKind::Capture, failure.to_string())
                    .camera(&self.settings.name),
            );
            failure
        })?;
        log::info!(
            "camera {}: opened {}",
            self.settings.name,
            device.source.name()
        );
        Ok(())
    }

    /// Release the underlying source. The last good frame stays available.
    pub fn close(&self) -> Result<(), CaptureError> {
        let _pass = self.enter()?;
        let mut device = lock(&self.device);
        device.source.release();
        log::info!("camera {}: released {}", self.settings.name, device.source.name());
        Ok(())
    }

    /// Get the current frame.
    ///
    /// Returns a fresh frame when the device delivers one, the last good frame when the
    /// read is throttled or fails, and `NoFrameYet` when there has never been a good
    /// frame. `Locked` means another capture held the session past the lock timeout.
    pub fn capture(&self) -> Result<Frame, CaptureError> {
        let _pass = self.enter()?;
        let mut device = lock(&self.device);

        let now = Instant::now();
        if let Some(last_read) = device.last_read {
            if now.duration_since(last_read) < self.settings.frame_interval {
                lock(&self.stats).throttled += 1;
                return self.latest().ok_or(CaptureError::NoFrameYet);
            }
        }
        device.last_read = Some(now);

        let reason = match device.source.read_frame() {
            Ok(Some(image)) => {
                let image = self.fit_to_sensor(image);
                let image = match self.settings.crop {
                    Some(crop) => crop.apply(image),
                    None => image,
                };
                let frame = Frame::new(image, device.next_sequence, SystemTime::now());
                device.next_sequence += 1;
                device.backoff.reset();
                self.bad_reads.store(0, Ordering::SeqCst);
                *lock(&self.last_good) = Some(frame.clone());
                lock(&self.stats).frames_read += 1;
                return Ok(frame);
            }
            Ok(None) => "device returned no frame".to_string(),
            Err(err) => format!("{err:#}"),
        };

        let streak = self.bad_reads.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.stats).failed_reads += 1;
        self.reporter.report(
            ErrorEvent::new(
                EventKind::Capture,
                format!("bad read #{streak} in a row: {reason}"),
            )
            .camera(&self.settings.name),
        );
        self.maybe_reopen(&mut device, streak, now);

        match self.latest() {
            Some(frame) => {
                lock(&self.stats).stale_served += 1;
                Ok(frame)
            }
            None => Err(CaptureError::NoFrameYet),
        }
    }

    /// Last good frame, without touching the device.
    pub fn latest(&self) -> Option<Frame> {
        lock(&self.last_good).clone()
    }

    /// Consecutive bad reads since the last good one.
    pub fn bad_read_streak(&self) -> u32 {
        self.bad_reads.load(Ordering::SeqCst)
    }

    /// Time left before the frame interval allows another device read.
    pub fn until_next_read(&self) -> Duration {
        let device = lock(&self.device);
        match device.last_read {
            Some(last_read) => self
                .settings
                .frame_interval
                .saturating_sub(last_read.elapsed()),
            None => Duration::ZERO,
        }
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = lock(&self.stats).clone();
        let device = lock(&self.device);
        stats.source = device.source.stats();
        stats.backoff_attempts = device.backoff.attempts();
        stats.backoff_delay = device.backoff.current_delay();
        stats
    }

    fn fit_to_sensor(&self, image: RgbImage) -> RgbImage {
        let (width, height) = (self.settings.width, self.settings.height);
        if image.dimensions() == (width, height) {
            return image;
        }
        let mut stats = lock(&self.stats);
        if stats.resized == 0 {
            log::warn!(
                "camera {}: device delivers {}x{}, scaling to configured {}x{}",
                self.settings.name,
                image.width(),
                image.height(),
                width,
                height
            );
        }
        stats.resized += 1;
        drop(stats);
        imageops::resize(&image, width, height, FilterType::Triangle)
    }

    fn enter(&self) -> Result<GatePass<'_>, CaptureError> {
        self.gate.acquire(self.settings.lock_timeout).ok_or_else(|| {
            lock(&self.stats).lock_timeouts += 1;
            CaptureError::Locked {
                waited: self.settings.lock_timeout,
            }
        })
    }

    fn maybe_reopen(&self, device: &mut Device, streak: u32, now: Instant) {
        let threshold = self.settings.reopen_after;
        if threshold == 0 || streak < threshold || !device.source.can_reopen() {
            return;
        }
        if !device.backoff.ready(now) {
            return;
        }

        let delay = device.backoff.schedule_next(now);
        let attempt = device.backoff.attempts();
        lock(&self.stats).reopen_attempts += 1;
        match device.source.reopen() {
            Ok(()) => {
                log::info!(
                    "camera {}: reopened {} after {} bad reads (next attempt no sooner than {:?})",
                    self.settings.name,
                    device.source.name(),
                    streak,
                    delay
                );
                self.reporter.report(
                    ErrorEvent::new(
                        EventKind::Reopen,
                        format!("reopened after {streak} bad reads"),
                    )
                    .camera(&self.settings.name),
                );
            }
            Err(err) => {
                lock(&self.stats).reopen_failures += 1;
                let failure = CaptureError::DeviceFailure {
                    camera: self.settings.name.clone(),
                    reason: format!("reopen failed: {err:#}"),
                };
                self.reporter.report(
                    ErrorEvent::new(
                        EventKind::Reopen,
                        format!("{failure} (attempt {attempt}); retrying in {delay:?}"),
                    )
                    .camera(&self.settings.name),
                );
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Capture gate: mutual exclusion with a bounded wait
// ----------------------------------------------------------------------------

#[derive(Default)]
struct CaptureGate {
    busy: Mutex<bool>,
    idle: Condvar,
}

impl CaptureGate {
    fn acquire(&self, timeout: Duration) -> Option<GatePass<'_>> {
        let busy = lock(&self.busy);
        let (mut busy, _) = self
            .idle
            .wait_timeout_while(busy, timeout, |busy| *busy)
            .unwrap_or_else(PoisonError::into_inner);
        if *busy {
            return None;
        }
        *busy = true;
        Some(GatePass { gate: self })
    }
}

/// Held for the duration of one session operation. Dropping it reopens the gate.
struct GatePass<'a> {
    gate: &'a CaptureGate,
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        *lock(&self.gate.busy) = false;
        self.gate.idle.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use image::Rgb;
    use std::collections::VecDeque;

    use crate::frame::Crop;

    /// Source replaying a script of read outcomes: `true` = frame, `false` = failure.
    struct ScriptedSource {
        script: VecDeque<bool>,
        reads: u64,
    }

    impl FrameSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
            self.reads += 1;
            match self.script.pop_front() {
                Some(true) => Ok(Some(RgbImage::from_pixel(8, 6, Rgb([self.reads as u8, 0, 0])))),
                Some(false) => Err(anyhow!("scripted failure")),
                None => Ok(None),
            }
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.reads,
                failed_reads: 0,
                uri: "scripted".to_string(),
            }
        }
    }

    fn session(script: &[bool]) -> CameraSession {
        let mut settings = CameraSettings::new("test", 8, 6, 60.0);
        settings.frame_interval = Duration::ZERO;
        settings.reopen_after = 0;
        CameraSession::new(
            settings,
            Box::new(ScriptedSource {
                script: script.iter().copied().collect(),
                reads: 0,
            }),
        )
    }

    #[test]
    fn no_frame_yet_until_first_success() {
        let session = session(&[false, false, true]);
        assert_eq!(session.capture().unwrap_err(), CaptureError::NoFrameYet);
        assert_eq!(session.capture().unwrap_err(), CaptureError::NoFrameYet);
        assert_eq!(session.capture().unwrap().sequence(), 1);
    }

    #[test]
    fn crop_is_applied_before_frames_are_handed_out() {
        let mut session = session(&[true]);
        session.settings.crop = Some(Crop {
            x: 2,
            y: 2,
            width: 4,
            height: 3,
        });
        let frame = session.capture().unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 3));
    }

    #[test]
    fn frames_are_scaled_to_the_configured_resolution() {
        let mut session = session(&[true, true]);
        session.settings.width = 4;
        session.settings.height = 3;
        for _ in 0..2 {
            let frame = session.capture().unwrap();
            assert_eq!((frame.width(), frame.height()), (4, 3));
        }
        assert_eq!(session.stats().resized, 2);
    }

    #[test]
    fn held_gate_times_out_with_locked() {
        let session = session(&[true]);
        let _pass = session.gate.acquire(Duration::from_millis(10)).expect("gate");
        let err = session.capture().unwrap_err();
        assert!(matches!(err, CaptureError::Locked { .. }));
        assert_eq!(session.stats().lock_timeouts, 1);
    }

    #[test]
    fn gate_reopens_after_pass_drops() {
        let gate = CaptureGate::default();
        {
            let _pass = gate.acquire(Duration::from_millis(10)).expect("first");
            assert!(gate.acquire(Duration::from_millis(5)).is_none());
        }
        assert!(gate.acquire(Duration::from_millis(5)).is_some());
    }
}
