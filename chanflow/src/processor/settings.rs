//! Processor configuration.

use crate::errors::{Result, SettingsError};
use crate::pipeline::{StageSettings, CAPACITY_RANGE, CONCURRENCY_RANGE};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;

/// Name of the first processor stage.
pub const STEP1: &str = "step1";

/// Name of the second processor stage.
pub const STEP2: &str = "step2";

/// Configuration of the two-step processor.
///
/// Every field has a default, so `{}` is a valid document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    /// Capacity of the entry queue.
    pub capacity: usize,
    /// Output capacity of step 1.
    pub step1_capacity: usize,
    /// Workers in step 1.
    pub step1_max_concurrency: usize,
    /// Output capacity of step 2.
    pub step2_capacity: usize,
    /// Workers in step 2.
    pub step2_max_concurrency: usize,
    /// Parent every item span to one shared pipeline span instead of the
    /// producer's span.
    pub use_unified_span_for_all_pipelines: bool,
    /// Shortest simulated step delay, in milliseconds.
    pub min_delay_ms: u64,
    /// Longest simulated step delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            capacity: 25,
            step1_capacity: 10,
            step1_max_concurrency: 5,
            step2_capacity: 10,
            step2_max_concurrency: 2,
            use_unified_span_for_all_pipelines: false,
            min_delay_ms: 500,
            max_delay_ms: 1000,
        }
    }
}

impl ProcessorSettings {
    /// Sets the simulated delay bounds.
    #[must_use]
    pub const fn with_delay_ms(mut self, min: u64, max: u64) -> Self {
        self.min_delay_ms = min;
        self.max_delay_ms = max;
        self
    }

    /// Enables or disables the unified pipeline span.
    #[must_use]
    pub const fn with_unified_span(mut self, enabled: bool) -> Self {
        self.use_unified_span_for_all_pipelines = enabled;
        self
    }

    /// The simulated delay range in milliseconds.
    #[must_use]
    pub const fn delay_range(&self) -> RangeInclusive<u64> {
        self.min_delay_ms..=self.max_delay_ms
    }

    /// Settings of both stages, in pipeline order.
    #[must_use]
    pub fn stages(&self) -> [StageSettings; 2] {
        [
            StageSettings::new(STEP1, self.step1_capacity, self.step1_max_concurrency),
            StageSettings::new(STEP2, self.step2_capacity, self.step2_max_concurrency),
        ]
    }

    /// Checks every range.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let (min, max) = CAPACITY_RANGE;
        SettingsError::check_range("capacity", self.capacity, min, max)?;
        SettingsError::check_range("step1_capacity", self.step1_capacity, min, max)?;
        SettingsError::check_range("step2_capacity", self.step2_capacity, min, max)?;

        let (min, max) = CONCURRENCY_RANGE;
        SettingsError::check_range("step1_max_concurrency", self.step1_max_concurrency, min, max)?;
        SettingsError::check_range("step2_max_concurrency", self.step2_max_concurrency, min, max)?;

        let max_delay = usize::try_from(self.max_delay_ms).unwrap_or(usize::MAX);
        let min_delay = usize::try_from(self.min_delay_ms).unwrap_or(usize::MAX);
        SettingsError::check_range("min_delay_ms", min_delay, 0, max_delay)
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = ProcessorSettings::from_json_str("{}").unwrap();

        assert_eq!(settings, ProcessorSettings::default());
        assert_eq!(settings.capacity, 25);
        assert_eq!(settings.delay_range(), 500..=1000);
        assert!(!settings.use_unified_span_for_all_pipelines);
    }

    #[test]
    fn test_stages() {
        let [step1, step2] = ProcessorSettings::default().stages();

        assert_eq!(step1, StageSettings::new("step1", 10, 5));
        assert_eq!(step2, StageSettings::new("step2", 10, 2));
    }

    #[test]
    fn test_concurrency_out_of_range() {
        let err = ProcessorSettings::from_json_str(r#"{"step1_max_concurrency": 11}"#).unwrap_err();

        assert_eq!(
            err,
            SettingsError::OutOfRange {
                field: "step1_max_concurrency".to_string(),
                value: 11,
                min: 1,
                max: 10,
            }
        );
    }

    #[test]
    fn test_capacity_out_of_range() {
        let settings = ProcessorSettings {
            capacity: 0,
            ..ProcessorSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::OutOfRange { ref field, .. }) if field == "capacity"
        ));
    }

    #[test]
    fn test_inverted_delay_bounds() {
        let settings = ProcessorSettings::default().with_delay_ms(20, 10);
        assert!(settings.validate().is_err());
        assert!(ProcessorSettings::default().with_delay_ms(0, 0).validate().is_ok());
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"capacity": 5, "use_unified_span_for_all_pipelines": true}"#)
            .unwrap();

        let settings = ProcessorSettings::from_path(file.path()).unwrap();

        assert_eq!(settings.capacity, 5);
        assert!(settings.use_unified_span_for_all_pipelines);
        assert_eq!(settings.step2_max_concurrency, 2);
    }
}
