//! Telemetry table collaborator.
//!
//! Processors publish through a `TableWriter`, which scopes every key as
//! `<camera>/<processor>/<field>`. Values are valid once `publish` returns; no other
//! ordering is promised.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Number(f64),
    Numbers(Vec<f64>),
    Bool(bool),
    Text(String),
}

impl From<f64> for TelemetryValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for TelemetryValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<usize> for TelemetryValue {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for TelemetryValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<f64>> for TelemetryValue {
    fn from(value: Vec<f64>) -> Self {
        Self::Numbers(value)
    }
}

impl From<&str> for TelemetryValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TelemetryValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

pub trait Telemetry: Send + Sync {
    fn put(&self, key: &str, value: TelemetryValue);
}

/// Writes one processor's values for one camera.
pub struct TableWriter<'a> {
    sink: &'a dyn Telemetry,
    prefix: String,
}

impl<'a> TableWriter<'a> {
    pub fn new(sink: &'a dyn Telemetry, camera: &str, processor: &str) -> Self {
        Self {
            sink,
            prefix: format!("{camera}/{processor}"),
        }
    }

    pub fn put(&self, field: &str, value: impl Into<TelemetryValue>) {
        self.sink
            .put(&format!("{}/{}", self.prefix, field), value.into());
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Keeps the latest value per key.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    values: Mutex<BTreeMap<String, TelemetryValue>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<TelemetryValue> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key and value as one JSON object.
    pub fn snapshot(&self) -> serde_json::Value {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_value(&*values).unwrap_or(serde_json::Value::Null)
    }
}

impl Telemetry for MemoryTelemetry {
    fn put(&self, key: &str, value: TelemetryValue) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }
}

/// Emits every write at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn put(&self, key: &str, value: TelemetryValue) {
        match serde_json::to_string(&value) {
            Ok(json) => log::debug!("telemetry {} = {}", key, json),
            Err(err) => log::warn!("telemetry {}: unserializable value: {}", key, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_scopes_keys_by_camera_and_processor() {
        let table = MemoryTelemetry::new();
        let writer = TableWriter::new(&table, "front", "cargo");
        writer.put("count", 2usize);
        writer.put("moving", true);

        assert_eq!(table.get("front/cargo/count"), Some(TelemetryValue::Number(2.0)));
        assert_eq!(table.get("front/cargo/moving"), Some(TelemetryValue::Bool(true)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn snapshot_is_plain_json() {
        let table = MemoryTelemetry::new();
        let writer = TableWriter::new(&table, "rear", "blob");
        writer.put("distances", vec![1.5, 3.0]);
        writer.put("nearest", 0i64);

        let json = table.snapshot();
        assert_eq!(json["rear/blob/distances"], serde_json::json!([1.5, 3.0]));
        assert_eq!(json["rear/blob/nearest"], serde_json::json!(0.0));
    }
}
