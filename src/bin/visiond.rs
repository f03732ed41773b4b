//! visiond - multi-camera vision daemon
//!
//! This daemon:
//! 1. Loads the configuration (file + environment) and fails fast on errors
//! 2. Opens every camera and builds every processor
//! 3. Runs one capture thread per camera and a shared worker pool
//! 4. Publishes processor output to the telemetry table
//! 5. Acts as the display thread: annotated frames are written as JPEG snapshots

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vision_pipeline::{
    DisplayQueue, DisplaySink, LogReporter, MemoryTelemetry, ProcessorRegistry, SnapshotSink,
    VisionConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (TOML or JSON). Defaults to $VISION_CONFIG, then built-in defaults.
    #[arg(long, env = "VISION_CONFIG")]
    config: Option<PathBuf>,
    /// Write annotated frames to this directory.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
    /// Minimum seconds between two snapshots of the same camera.
    #[arg(long, default_value_t = 1)]
    snapshot_every_secs: u64,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    run_for_secs: Option<u64>,
    /// Log the telemetry table every N seconds (0 disables).
    #[arg(long, default_value_t = 5)]
    telemetry_every_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => VisionConfig::from_path(path),
        None => VisionConfig::load(),
    }
    .context("loading configuration")?;

    let telemetry = Arc::new(MemoryTelemetry::new());
    let display = Arc::new(DisplayQueue::new());
    let mut group = config
        .pipeline_builder(&ProcessorRegistry::with_builtin(), Arc::new(LogReporter))?
        .telemetry(telemetry.clone())
        .display(display.clone())
        .build()?;

    let mut sink = match &args.snapshot_dir {
        Some(dir) => Some(SnapshotSink::new(
            dir,
            Duration::from_secs(args.snapshot_every_secs),
        )?),
        None => None,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .context("setting Ctrl-C handler")?;
    }

    group.start()?;
    log::info!("visiond running with cameras: {}", group.cameras().join(", "));

    let started = Instant::now();
    let deadline = args.run_for_secs.map(|secs| started + Duration::from_secs(secs));
    let telemetry_every = Duration::from_secs(args.telemetry_every_secs);
    let mut last_telemetry = Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("run time elapsed");
            break;
        }

        for frame in display.wait(Duration::from_millis(100)) {
            if let Some(sink) = sink.as_mut() {
                if let Err(err) = sink.show(&frame) {
                    log::warn!("camera {}: display failed: {:#}", frame.camera, err);
                }
            }
        }

        if !telemetry_every.is_zero() && last_telemetry.elapsed() >= telemetry_every {
            last_telemetry = Instant::now();
            log::info!("telemetry: {}", telemetry.snapshot());
            for camera in group.cameras() {
                if let Some(stats) = group.stats(camera) {
                    log::info!(
                        "camera {}: frames={} processed={} skipped={} errors={} stale={} reopens={}",
                        camera,
                        stats.frames,
                        stats.completed,
                        stats.skipped,
                        stats.processor_errors,
                        stats.session.stale_served,
                        stats.session.reopen_attempts
                    );
                }
            }
        }
    }

    log::info!("shutting down...");
    let report = group.shutdown();
    if !report.camera_timeouts.is_empty() {
        log::warn!(
            "cameras did not stop within grace period: {}",
            report.camera_timeouts.join(", ")
        );
    }
    if let Some(sink) = &sink {
        log::info!("{} snapshot(s) written", sink.written());
    }
    Ok(())
}
