//! Pipeline configuration.

use crate::errors::{PipelineError, Result, SettingsError};
use crate::stages::{Dispatch, StageDescriptor, Transform};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Allowed range for queue capacities.
pub const CAPACITY_RANGE: (usize, usize) = (1, 100);

/// Allowed range for stage concurrency.
pub const CONCURRENCY_RANGE: (usize, usize) = (1, 10);

/// Configuration of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSettings {
    /// Stage name, unique within the pipeline.
    pub name: String,
    /// Capacity of the stage's output queue.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Number of workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// How workers share the input.
    #[serde(default)]
    pub dispatch: Dispatch,
}

fn default_capacity() -> usize {
    10
}

fn default_concurrency() -> usize {
    1
}

fn default_name() -> String {
    "pipeline".to_string()
}

impl StageSettings {
    /// Creates stage settings with shared dispatch.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            concurrency,
            dispatch: Dispatch::Shared,
        }
    }

    /// Sets the dispatch mode.
    #[must_use]
    pub const fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Builds a descriptor for `transform` from these settings.
    pub fn to_descriptor<T, U>(&self, transform: Arc<dyn Transform<T, U>>) -> Result<StageDescriptor<T, U>>
    where
        T: Send + 'static,
        U: Send + 'static,
    {
        Ok(
            StageDescriptor::from_shared(&self.name, self.capacity, self.concurrency, transform)?
                .with_dispatch(self.dispatch),
        )
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let (min, max) = CAPACITY_RANGE;
        SettingsError::check_range(format!("stages.{}.capacity", self.name), self.capacity, min, max)?;
        let (min, max) = CONCURRENCY_RANGE;
        SettingsError::check_range(
            format!("stages.{}.concurrency", self.name),
            self.concurrency,
            min,
            max,
        )
    }
}

/// Configuration of a whole pipeline.
///
/// Usually loaded from JSON:
///
/// ```json
/// {
///   "name": "orders",
///   "entry_capacity": 25,
///   "order_preservation": false,
///   "stages": [
///     { "name": "step1", "capacity": 10, "concurrency": 5 },
///     { "name": "step2", "capacity": 10, "concurrency": 2, "dispatch": "partitioned" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Pipeline name used in logs, spans and events.
    #[serde(default = "default_name")]
    pub name: String,
    /// Capacity of the entry queue.
    #[serde(default = "default_capacity")]
    pub entry_capacity: usize,
    /// Emit items in input order from stages with more than one worker.
    #[serde(default)]
    pub order_preservation: bool,
    /// Parent every item span to one shared pipeline span.
    #[serde(default)]
    pub use_unified_span: bool,
    /// Stages in pipeline order.
    #[serde(default)]
    pub stages: Vec<StageSettings>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            entry_capacity: default_capacity(),
            order_preservation: false,
            use_unified_span: false,
            stages: Vec::new(),
        }
    }
}

impl PipelineSettings {
    /// Creates settings with defaults and no stages.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the entry queue capacity.
    #[must_use]
    pub const fn with_entry_capacity(mut self, capacity: usize) -> Self {
        self.entry_capacity = capacity;
        self
    }

    /// Enables or disables order preservation.
    #[must_use]
    pub const fn with_order_preservation(mut self, enabled: bool) -> Self {
        self.order_preservation = enabled;
        self
    }

    /// Enables or disables the unified pipeline span.
    #[must_use]
    pub const fn with_unified_span(mut self, enabled: bool) -> Self {
        self.use_unified_span = enabled;
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageSettings) -> Self {
        self.stages.push(stage);
        self
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSettings> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Checks every range and the stage list.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let (min, max) = CAPACITY_RANGE;
        SettingsError::check_range("entry_capacity", self.entry_capacity, min, max)?;

        if self.stages.is_empty() {
            return Err(SettingsError::NoStages(self.name.clone()));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(SettingsError::DuplicateStage(stage.name.clone()));
            }
            stage.validate()?;
        }
        Ok(())
    }

    /// Parses and validates settings from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads, parses and validates settings from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_json_str(&json)?)
    }

    /// Serializes the settings as pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(PipelineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn two_stage() -> PipelineSettings {
        PipelineSettings::new("orders")
            .with_entry_capacity(25)
            .with_stage(StageSettings::new("step1", 10, 5))
            .with_stage(StageSettings::new("step2", 10, 2))
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let settings = PipelineSettings::from_json_str(r#"{"stages": [{"name": "only"}]}"#).unwrap();

        assert_eq!(settings.name, "pipeline");
        assert_eq!(settings.entry_capacity, 10);
        assert!(!settings.order_preservation);
        assert!(!settings.use_unified_span);
        assert_eq!(settings.stages[0], StageSettings::new("only", 10, 1));
    }

    #[test]
    fn test_dispatch_from_json() {
        let settings = PipelineSettings::from_json_str(
            r#"{"name": "p", "stages": [{"name": "s", "concurrency": 3, "dispatch": "partitioned"}]}"#,
        )
        .unwrap();
        assert_eq!(settings.stage("s").map(|s| s.dispatch), Some(Dispatch::Partitioned));
    }

    #[test]
    fn test_valid_settings() {
        assert!(two_stage().validate().is_ok());
    }

    #[test]
    fn test_entry_capacity_range() {
        let err = two_stage().with_entry_capacity(101).validate().unwrap_err();
        assert_eq!(
            err,
            SettingsError::OutOfRange {
                field: "entry_capacity".to_string(),
                value: 101,
                min: 1,
                max: 100,
            }
        );
        assert!(two_stage().with_entry_capacity(0).validate().is_err());
    }

    #[test]
    fn test_stage_concurrency_range() {
        let settings = PipelineSettings::new("p").with_stage(StageSettings::new("wide", 10, 11));
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, SettingsError::OutOfRange { ref field, value: 11, .. } if field == "stages.wide.concurrency"));
    }

    #[test]
    fn test_stage_capacity_range() {
        let settings = PipelineSettings::new("p").with_stage(StageSettings::new("tiny", 0, 1));
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::OutOfRange { value: 0, .. })
        ));
    }

    #[test]
    fn test_no_stages() {
        let err = PipelineSettings::new("empty").validate().unwrap_err();
        assert_eq!(err, SettingsError::NoStages("empty".to_string()));
    }

    #[test]
    fn test_duplicate_stage() {
        let settings = two_stage().with_stage(StageSettings::new("step1", 1, 1));
        assert_eq!(
            settings.validate().unwrap_err(),
            SettingsError::DuplicateStage("step1".to_string())
        );
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            PipelineSettings::from_json_str("{ not json"),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn test_from_path_roundtrip() {
        let settings = two_stage().with_order_preservation(true);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(settings.to_json_string().unwrap().as_bytes())
            .unwrap();

        let loaded = PipelineSettings::from_path(file.path()).unwrap();

        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_from_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineSettings::from_path(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn test_to_descriptor() {
        let stage = StageSettings::new("s", 3, 2).with_dispatch(Dispatch::Partitioned);
        let transform: Arc<dyn Transform<u8, u8>> = Arc::new(crate::stages::Identity);

        let descriptor = stage.to_descriptor(transform).unwrap();

        assert_eq!(descriptor.name(), "s");
        assert_eq!(descriptor.capacity(), 3);
        assert_eq!(descriptor.concurrency(), 2);
        assert_eq!(descriptor.dispatch(), Dispatch::Partitioned);
    }
}
