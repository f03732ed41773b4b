//! Structured error reporting.
//!
//! Capture failures, reopen attempts and processor errors are reported as
//! `ErrorEvent`s tagged with camera/processor identity. `LogReporter` forwards them to
//! the `log` facade; `MemoryReporter` keeps them for inspection.

use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A device read failed or returned nothing.
    Capture,
    /// The session tried to reopen its device.
    Reopen,
    /// A processor returned an error or panicked.
    Processor,
    /// Pipeline plumbing (thread start/stop, dropped work).
    Pipeline,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorEvent {
    pub at: SystemTime,
    pub camera: Option<String>,
    pub processor: Option<String>,
    pub kind: EventKind,
    pub message: String,
}

impl ErrorEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            at: SystemTime::now(),
            camera: None,
            processor: None,
            kind,
            message: message.into(),
        }
    }

    pub fn camera(mut self, camera: impl Into<String>) -> Self {
        self.camera = Some(camera.into());
        self
    }

    pub fn processor(mut self, processor: impl Into<String>) -> Self {
        self.processor = Some(processor.into());
        self
    }
}

pub trait Reporter: Send + Sync {
    fn report(&self, event: ErrorEvent);
}

/// Reporter that writes through the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, event: ErrorEvent) {
        let camera = event.camera.as_deref().unwrap_or("-");
        let processor = event.processor.as_deref().unwrap_or("-");
        match event.kind {
            EventKind::Processor | EventKind::Pipeline => log::error!(
                "[{:?}] camera={} processor={} {}",
                event.kind,
                camera,
                processor,
                event.message
            ),
            EventKind::Capture | EventKind::Reopen => log::warn!(
                "[{:?}] camera={} {}",
                event.kind,
                camera,
                event.message
            ),
        }
    }
}

/// Reporter that records every event in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<ErrorEvent>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ErrorEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, event: ErrorEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_reporter_keeps_identity() {
        let reporter = MemoryReporter::new();
        reporter.report(
            ErrorEvent::new(EventKind::Processor, "threshold failed")
                .camera("front")
                .processor("cargo"),
        );
        reporter.report(ErrorEvent::new(EventKind::Capture, "read failed").camera("rear"));

        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].camera.as_deref(), Some("front"));
        assert_eq!(events[0].processor.as_deref(), Some("cargo"));
        assert_eq!(reporter.count(EventKind::Capture), 1);
        assert_eq!(reporter.count(EventKind::Reopen), 0);
    }

    #[test]
    fn events_serialize_to_json() {
        let event = ErrorEvent::new(EventKind::Reopen, "retrying").camera("front");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "reopen");
        assert_eq!(json["camera"], "front");
        assert!(json["processor"].is_null());
    }
}
