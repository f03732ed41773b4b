//! Fixed-size worker pool fed by a crossbeam channel.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

const POLL: Duration = Duration::from_millis(50);

/// Cloneable submission side of a `WorkerPool`.
#[derive(Clone)]
pub(crate) struct PoolHandle {
    tx: Sender<Task>,
    running: Arc<AtomicBool>,
}

impl PoolHandle {
    /// Queue a task. Returns the task back when the pool no longer accepts work.
    pub(crate) fn submit(&self, task: Task) -> Result<(), Task> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(task);
        }
        self.tx.send(task).map_err(|err| err.into_inner())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolShutdown {
    /// Queued tasks dropped without running.
    pub cancelled: usize,
    /// Workers that were still busy when the grace period ran out (they were joined anyway).
    pub late_workers: usize,
}

pub(crate) struct WorkerPool {
    handle: PoolHandle,
    rx: Receiver<Task>,
    workers: Vec<JoinHandle<()>>,
    exits: Receiver<()>,
}

impl WorkerPool {
    pub(crate) fn new(size: usize) -> io::Result<Self> {
        let (tx, rx) = unbounded::<Task>();
        let (exit_tx, exits) = unbounded();
        let running = Arc::new(AtomicBool::new(true));

        let mut workers = Vec::with_capacity(size.max(1));
        for index in 0..size.max(1) {
            let rx = rx.clone();
            let worker_running = running.clone();
            let exit_tx: Sender<()> = exit_tx.clone();
            let worker = thread::Builder::new()
                .name(format!("vision-worker-{index}"))
                .spawn(move || {
                    while worker_running.load(Ordering::SeqCst) {
                        match rx.recv_timeout(POLL) {
                            Ok(task) => task(),
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                    let _ = exit_tx.send(());
                });
            match worker {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    running.store(false, Ordering::SeqCst);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(err);
                }
            }
        }
        log::debug!("worker pool started with {} threads", workers.len());

        Ok(Self {
            handle: PoolHandle { tx, running },
            rx,
            workers,
            exits,
        })
    }

    pub(crate) fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting work, drop queued tasks and wait for in-flight ones.
    ///
    /// Workers finish the task they are running before exiting. Every worker is joined
    /// before this returns, even past `grace`.
    pub(crate) fn shutdown(&mut self, grace: Duration) -> PoolShutdown {
        self.handle.running.store(false, Ordering::SeqCst);
        let cancelled = self.rx.try_iter().count();

        let deadline = Instant::now() + grace;
        let mut exited = 0;
        while exited < self.workers.len() {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.exits.recv_timeout(left) {
                Ok(()) => exited += 1,
                Err(_) => break,
            }
        }
        let late_workers = self.workers.len() - exited;
        if late_workers > 0 {
            log::warn!(
                "{} worker(s) still busy after {:?}; waiting for them",
                late_workers,
                grace
            );
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("worker thread panicked");
            }
        }
        // Tasks that raced in after the first drain.
        let cancelled = cancelled + self.rx.try_iter().count();

        PoolShutdown {
            cancelled,
            late_workers,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown(Duration::ZERO);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_submitted_tasks() {
        let mut pool = WorkerPool::new(3).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let handle = pool.handle();
        for _ in 0..20 {
            let done = done.clone();
            assert!(handle
                .submit(Box::new(move || {
                    done.fetch_add(1, Ordering::SeqCst);
                }))
                .is_ok());
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while done.load(Ordering::SeqCst) < 20 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(done.load(Ordering::SeqCst), 20);

        let report = pool.shutdown(Duration::from_secs(1));
        assert_eq!(report, PoolShutdown::default());
        assert!(handle.submit(Box::new(|| {})).is_err());
    }

    #[test]
    fn shutdown_cancels_queued_work() {
        let mut pool = WorkerPool::new(1).unwrap();
        let handle = pool.handle();
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        handle
            .submit(Box::new(move || {
                let _ = started_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(2));
            }))
            .ok()
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        for _ in 0..5 {
            handle.submit(Box::new(|| {})).ok().unwrap();
        }

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let _ = release_tx.send(());
        });
        let report = pool.shutdown(Duration::from_secs(1));
        releaser.join().unwrap();
        assert_eq!(report.cancelled, 5);
        assert_eq!(report.late_workers, 0);
    }
}
