use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::backends::{ColorBlobDetector, ColorBlobParams, MotionDetector, MotionParams};
use super::instanced::Instanced;
use super::object::ObjectProcessor;
use super::processor::Processor;
use crate::error::ConfigurationError;

/// Builds a processor named `name` from its `params` table.
pub type Constructor =
    Box<dyn Fn(&str, &Value) -> Result<Arc<dyn Processor>, ConfigurationError> + Send + Sync>;

/// Maps processor type tags to constructors.
///
/// Each constructor deserialises its own parameter shape, so an unknown field or a
/// bad value fails at startup, not on the first frame.
pub struct ProcessorRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ProcessorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with `color_blob` and `motion`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("color_blob", |name, params| {
            let params: ColorBlobParams = parse_params(name, params)?;
            params.validate(name)?;
            Ok(Arc::new(Instanced::new(
                name,
                ObjectProcessor::new(ColorBlobDetector::new(params)),
            )))
        });
        registry.register("motion", |name, params| {
            let params: MotionParams = if params.is_null() {
                MotionParams::default()
            } else {
                parse_params(name, params)?
            };
            params.validate(name)?;
            Ok(Arc::new(Instanced::new(name, MotionDetector::new(params))))
        });
        registry
    }

    /// Register a constructor. A second registration for the same tag replaces the first.
    pub fn register<F>(&mut self, tag: &str, constructor: F)
    where
        F: Fn(&str, &Value) -> Result<Arc<dyn Processor>, ConfigurationError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(tag.to_string(), Box::new(constructor));
    }

    pub fn build(
        &self,
        name: &str,
        tag: &str,
        params: &Value,
    ) -> Result<Arc<dyn Processor>, ConfigurationError> {
        let constructor = self
            .constructors
            .get(tag)
            .ok_or_else(|| ConfigurationError::UnknownProcessorType(tag.to_string()))?;
        let processor = constructor(name, params)?;
        log::debug!("built processor {} ({})", name, tag);
        Ok(processor)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.constructors.keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn parse_params<T: DeserializeOwned>(name: &str, params: &Value) -> Result<T, ConfigurationError> {
    T::deserialize(params)
        .map_err(|err| ConfigurationError::invalid(format!("processors.{name}.params"), err.to_string()))
}
