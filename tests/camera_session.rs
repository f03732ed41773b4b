use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use vision_pipeline::ingest::{SyntheticConfig, SyntheticSource};
use vision_pipeline::{
    CameraSession, CameraSettings, CaptureError, ColorBlobDetector, ColorBlobParams,
    Dependencies, EventKind, FrameRingBuffer, FrameSource, InstancedProcessor, MemoryReporter,
    ObjectProcessor, SourceStats,
};

/// Replays read outcomes: `true` delivers a frame, `false` fails. An exhausted script
/// keeps delivering frames.
struct ScriptedSource {
    script: Arc<Mutex<VecDeque<bool>>>,
    reads: Arc<Mutex<u64>>,
}

impl ScriptedSource {
    fn new(script: &[bool]) -> (Self, Arc<Mutex<u64>>) {
        let reads = Arc::new(Mutex::new(0));
        (
            Self {
                script: Arc::new(Mutex::new(script.iter().copied().collect())),
                reads: reads.clone(),
            },
            reads,
        )
    }
}

impl FrameSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut reads = self.reads.lock().unwrap();
        *reads += 1;
        let value = (*reads % 250) as u8;
        match self.script.lock().unwrap().pop_front() {
            Some(false) => Err(anyhow!("scripted failure")),
            _ => Ok(Some(RgbImage::from_pixel(4, 4, Rgb([value, value, value])))),
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: *self.reads.lock().unwrap(),
            failed_reads: 0,
            uri: "scripted".to_string(),
        }
    }
}

fn unthrottled(name: &str) -> CameraSettings {
    let mut settings = CameraSettings::new(name, 4, 4, 60.0);
    settings.frame_interval = Duration::ZERO;
    settings.reopen_after = 0;
    settings
}

#[test]
fn sequence_numbers_follow_device_reads() {
    let (source, reads) = ScriptedSource::new(&[]);
    let session = CameraSession::new(unthrottled("seq"), Box::new(source));

    let sequences: Vec<u64> = (0..20).map(|_| session.capture().unwrap().sequence()).collect();
    assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(sequences.first(), Some(&1));
    assert_eq!(*reads.lock().unwrap(), 20);
}

#[test]
fn k_failures_serve_the_last_good_frame_k_times() {
    const K: usize = 4;
    let mut script = vec![true];
    script.extend(std::iter::repeat(false).take(K));
    script.push(true);
    let (source, _) = ScriptedSource::new(&script);
    let session = CameraSession::new(unthrottled("stale"), Box::new(source));

    let good = session.capture().unwrap();
    for served in 1..=K {
        let frame = session.capture().unwrap();
        assert_eq!(frame.sequence(), good.sequence());
        assert!(frame.same_pixels(&good));
        assert_eq!(session.bad_read_streak() as usize, served);
    }
    assert_eq!(session.stats().stale_served as usize, K);

    let fresh = session.capture().unwrap();
    assert!(fresh.sequence() > good.sequence());
    assert_eq!(session.bad_read_streak(), 0);
}

#[test]
fn never_successful_device_always_reports_no_frame_yet() {
    let (source, _) = ScriptedSource::new(&[false; 10]);
    let reporter = Arc::new(MemoryReporter::new());
    let session =
        CameraSession::new(unthrottled("dead"), Box::new(source)).with_reporter(reporter.clone());

    for _ in 0..10 {
        assert_eq!(session.capture().unwrap_err(), CaptureError::NoFrameYet);
    }
    assert!(session.latest().is_none());
    assert_eq!(reporter.count(EventKind::Capture), 10);
}

#[test]
fn throttling_reuses_frame_within_interval() {
    let interval = Duration::from_millis(200);
    let mut settings = unthrottled("throttle");
    settings.frame_interval = interval;
    let (source, reads) = ScriptedSource::new(&[]);
    let session = CameraSession::new(settings, Box::new(source));

    let first = session.capture().unwrap();
    thread::sleep(interval / 2);
    let second = session.capture().unwrap();
    assert_eq!(second.sequence(), first.sequence());
    assert_eq!(*reads.lock().unwrap(), 1);
    assert_eq!(session.stats().throttled, 1);

    thread::sleep(interval * 2);
    let third = session.capture().unwrap();
    assert!(third.sequence() > first.sequence());
    assert_eq!(*reads.lock().unwrap(), 2);
}

#[test]
fn failing_device_is_reopened_with_backoff() {
    // Every read after the third fails until the source is reopened.
    let config = SyntheticConfig::from_uri("stub://flaky?fail_after=3", 32, 24).unwrap();
    let mut settings = CameraSettings::new("flaky", 32, 24, 60.0);
    settings.frame_interval = Duration::ZERO;
    settings.reopen_after = 2;
    settings.backoff_base = Duration::from_millis(20);
    settings.backoff_cap = Duration::from_millis(80);

    let reporter = Arc::new(MemoryReporter::new());
    let session = CameraSession::new(settings, Box::new(SyntheticSource::new(config)))
        .with_reporter(reporter.clone());
    session.open().unwrap();

    for _ in 0..3 {
        session.capture().unwrap();
    }
    let last_good = session.latest().unwrap().sequence();

    // Two bad reads trigger a reopen; the next read succeeds again.
    assert_eq!(session.capture().unwrap().sequence(), last_good);
    assert_eq!(session.capture().unwrap().sequence(), last_good);
    let stats = session.stats();
    assert_eq!(stats.reopen_attempts, 1);
    assert_eq!(stats.backoff_attempts, 1);
    assert_eq!(stats.backoff_delay, Duration::from_millis(40));
    assert!(reporter.count(EventKind::Reopen) >= 1);

    let fresh = session.capture().unwrap();
    assert!(fresh.sequence() > last_good);
    assert_eq!(session.bad_read_streak(), 0);
    let stats = session.stats();
    assert_eq!(stats.backoff_attempts, 0);
    assert_eq!(stats.backoff_delay, Duration::from_millis(20));
}

#[test]
fn concurrent_callers_never_see_torn_frames() {
    let (source, _) = ScriptedSource::new(&[]);
    let session = Arc::new(CameraSession::new(unthrottled("shared"), Box::new(source)));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let session = session.clone();
            thread::spawn(move || {
                let mut last = 0;
                for _ in 0..200 {
                    match session.capture() {
                        Ok(frame) => {
                            let pixels = frame.image().as_raw();
                            assert!(pixels.iter().all(|p| *p == pixels[0]));
                            assert!(frame.sequence() >= last);
                            last = frame.sequence();
                        }
                        Err(CaptureError::Locked { .. }) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(session.stats().frames_read > 0);
}

/// Device that ignores the requested resolution and always serves a 1280x720 image with
/// a green block centred in it.
struct WideSource;

impl FrameSource for WideSource {
    fn name(&self) -> &str {
        "wide"
    }

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut image = RgbImage::from_pixel(1280, 720, Rgb([20, 20, 24]));
        for y in 310..410 {
            for x in 540..740 {
                image.put_pixel(x, y, Rgb([40, 220, 60]));
            }
        }
        Ok(Some(image))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: 0,
            failed_reads: 0,
            uri: "wide".to_string(),
        }
    }
}

#[test]
fn oversized_device_frames_keep_geometry_consistent() {
    let mut settings = CameraSettings::new("wide", 640, 480, 60.0);
    settings.frame_interval = Duration::ZERO;
    let session = CameraSession::new(settings, Box::new(WideSource));

    let frame = session.capture().unwrap();
    assert_eq!((frame.width(), frame.height()), (640, 480));
    assert_eq!(session.stats().resized, 1);

    let history = FrameRingBuffer::new(1).unwrap();
    history.push(frame.clone());
    let deps = Dependencies {
        cycle: 1,
        history: &history,
    };
    let processor = ObjectProcessor::new(ColorBlobDetector::new(ColorBlobParams::new(
        [50, 100, 100],
        [70, 255, 255],
        0.3,
        0.2,
    )));
    let objects = processor
        .process(&frame, &session.info(), &deps, None)
        .unwrap();

    assert_eq!(objects.len(), 1, "{objects:?}");
    assert!(objects[0].horizontal_angle.abs() < 1.0, "{objects:?}");
    assert!(objects[0].vertical_angle.abs() < 1.0, "{objects:?}");
}
