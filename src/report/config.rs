//! Evaluation and presentation configuration
//!
//! Recognized keys are a fixed, enumerated set; deserializing a config with an
//! unrecognized key fails with [`Error::Config`] rather than being silently
//! ignored, so typos surface at setup time.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How individual records are rendered by the presentation surface.
///
/// Purely a presentation concern: the evaluation engine never consults it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Input and label joined as plain text
    #[default]
    PlainText,
    /// Structured fields (input, label, metadata) as separate values
    Structured,
}

/// Configuration for [`evaluate`](crate::evaluate) and the report server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    /// Directory for persisted intermediate results (report cache).
    /// `None` disables persistence.
    pub cache_path: Option<PathBuf>,
    /// Record rendering mode for the presentation surface.
    pub view: ViewMode,
    /// Override for the name of the field holding model input when rendering
    /// records. `None` uses the dataset's designated input column.
    pub input_column: Option<String>,
    /// Upper bound on evaluation worker threads. `None` uses the global pool.
    pub max_concurrency: Option<usize>,
}

impl ReportConfig {
    /// Create a default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the report cache directory.
    #[must_use]
    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Set the record rendering mode.
    #[must_use]
    pub const fn view(mut self, view: ViewMode) -> Self {
        self.view = view;
        self
    }

    /// Override the input column name used when rendering records.
    #[must_use]
    pub fn input_column(mut self, name: impl Into<String>) -> Self {
        self.input_column = Some(name.into());
        self
    }

    /// Bound the evaluation worker pool.
    #[must_use]
    pub const fn max_concurrency(mut self, workers: usize) -> Self {
        self.max_concurrency = Some(workers);
        self
    }

    /// Parse a configuration from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on unrecognized keys or invalid values.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("invalid report config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_concurrency` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == Some(0) {
            return Err(Error::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReportConfig::new();
        assert!(config.cache_path.is_none());
        assert_eq!(config.view, ViewMode::PlainText);
        assert!(config.input_column.is_none());
        assert!(config.max_concurrency.is_none());
    }

    #[test]
    fn test_from_json_recognized_keys() {
        let config = ReportConfig::from_json(serde_json::json!({
            "cache_path": "/tmp/cotejo-cache",
            "view": "structured",
            "input_column": "question",
            "max_concurrency": 4
        }))
        .unwrap();
        assert_eq!(config.view, ViewMode::Structured);
        assert_eq!(config.input_column.as_deref(), Some("question"));
        assert_eq!(config.max_concurrency, Some(4));
    }

    #[test]
    fn test_from_json_rejects_unknown_keys() {
        let result = ReportConfig::from_json(serde_json::json!({
            "view": "plain_text",
            "cache_dir": "/tmp/typo"
        }));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = ReportConfig::from_json(serde_json::json!({ "max_concurrency": 0 }));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_chain() {
        let config = ReportConfig::new()
            .cache_path("/tmp/cache")
            .view(ViewMode::Structured)
            .max_concurrency(2);
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_path.as_deref(), Some(std::path::Path::new("/tmp/cache")));
    }
}
