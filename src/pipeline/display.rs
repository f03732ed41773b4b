//! Hand-off of annotated frames to a single display thread.
//!
//! Workers `offer` a canvas per camera; only the newest one per camera is kept. The
//! designated display thread calls `wait` and pushes what it gets into a `DisplaySink`,
//! so no display code runs on capture or worker threads.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::frame::Canvas;

/// A drawn frame waiting for display.
#[derive(Clone, Debug)]
pub struct Annotated {
    pub camera: String,
    pub sequence: u64,
    pub canvas: Canvas,
}

#[derive(Default)]
pub struct DisplayQueue {
    pending: Mutex<BTreeMap<String, Annotated>>,
    ready: Condvar,
    replaced: AtomicU64,
}

impl DisplayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a canvas for `camera`, replacing any older one not yet displayed.
    pub fn offer(&self, camera: &str, sequence: u64, canvas: Canvas) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.get(camera) {
            if previous.sequence > sequence {
                return;
            }
            self.replaced.fetch_add(1, Ordering::Relaxed);
        }
        pending.insert(
            camera.to_string(),
            Annotated {
                camera: camera.to_string(),
                sequence,
                canvas,
            },
        );
        self.ready.notify_all();
    }

    /// Take everything pending without waiting.
    pub fn take_all(&self) -> Vec<Annotated> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *pending).into_values().collect()
    }

    /// Wait up to `timeout` for at least one canvas, then take everything pending.
    pub fn wait(&self, timeout: Duration) -> Vec<Annotated> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut pending, _) = self
            .ready
            .wait_timeout_while(pending, timeout, |pending| pending.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *pending).into_values().collect()
    }

    /// Canvases overwritten before the display thread got to them.
    pub fn replaced(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }
}

pub trait DisplaySink {
    fn show(&mut self, frame: &Annotated) -> Result<()>;
}

/// Writes `<dir>/<camera>.jpg`, at most once per `every` for each camera.
pub struct SnapshotSink {
    dir: PathBuf,
    every: Duration,
    last_written: HashMap<String, Instant>,
    written: u64,
}

impl SnapshotSink {
    pub fn new(dir: impl AsRef<Path>, every: Duration) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating snapshot directory {}", dir.display()))?;
        Ok(Self {
            dir,
            every,
            last_written: HashMap::new(),
            written: 0,
        })
    }

    pub fn path_for(&self, camera: &str) -> PathBuf {
        let file: String = camera
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.jpg"))
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl DisplaySink for SnapshotSink {
    fn show(&mut self, frame: &Annotated) -> Result<()> {
        let now = Instant::now();
        if let Some(last) = self.last_written.get(&frame.camera) {
            if now.duration_since(*last) < self.every {
                return Ok(());
            }
        }
        let path = self.path_for(&frame.camera);
        frame
            .canvas
            .save(&path)
            .with_context(|| format!("writing snapshot {}", path.display()))?;
        self.last_written.insert(frame.camera.clone(), now);
        self.written += 1;
        log::debug!(
            "camera {}: snapshot of frame {} written to {}",
            frame.camera,
            frame.sequence,
            path.display()
        );
        Ok(())
    }
}
