//! Cortex Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.claude/cortex-embeddings/config.toml`
//! - Local config: `<repo>/.cortex/config.toml`
//! - Environment overrides via `CORTEX_*` variables
//!
//! Configuration is merged in order: defaults → global → local → env.

mod error;
mod loader;

pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};

/// Root configuration for Cortex.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CortexConfig {
    /// Embedding pool configuration
    pub embedding: EmbeddingOptions,

    /// Change processor configuration
    pub change_processor: ChangeProcessorOptions,

    /// Live indexer configuration
    pub live_indexer: LiveIndexerOptions,

    /// Staging / file pickup configuration
    pub staging: StagingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl CortexConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.embedding.validate()?;
        self.change_processor.validate()?;
        self.live_indexer.validate()?;
        Ok(())
    }
}

/// Embedding pool options.
///
/// # Example TOML
///
/// ```toml
/// [embedding]
/// process_count = 4
/// batch_size = 400
/// timeout_ms = 120000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingOptions {
    /// Worker process count; 0 means `max(1, cores - 2)`
    pub process_count: usize,
    /// Initial adaptive batch size
    pub batch_size: usize,
    /// Hard per-batch timeout
    pub timeout_ms: u64,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            process_count: 0,
            batch_size: 400,
            timeout_ms: 120_000,
        }
    }
}

impl EmbeddingOptions {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-priority weight multipliers for queue ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PriorityWeights {
    pub critical: f32,
    pub high: f32,
    pub medium: f32,
    pub low: f32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            critical: 4.0,
            high: 3.0,
            medium: 2.0,
            low: 1.0,
        }
    }
}

/// Change processor options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChangeProcessorOptions {
    pub debounce_ms: u64,
    pub batch_size: usize,
    pub max_queue_size: usize,
    pub priority_weights: PriorityWeights,
}

impl Default for ChangeProcessorOptions {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            batch_size: 50,
            max_queue_size: 100,
            priority_weights: PriorityWeights::default(),
        }
    }
}

impl ChangeProcessorOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "change_processor.max_queue_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Live indexer options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiveIndexerOptions {
    pub enable_content_analysis: bool,
    /// Importance threshold (0..100) below which changes are ignored
    pub analysis_threshold: f32,
    pub debounce_ms: u64,
    pub batch_size: usize,
    pub max_concurrent_files: usize,
    pub suspend_on_high_activity: bool,
}

impl Default for LiveIndexerOptions {
    fn default() -> Self {
        Self {
            enable_content_analysis: true,
            analysis_threshold: 15.0,
            debounce_ms: 500,
            batch_size: 50,
            max_concurrent_files: 5,
            suspend_on_high_activity: true,
        }
    }
}

impl LiveIndexerOptions {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.analysis_threshold) {
            return Err(ConfigError::ValidationError(format!(
                "live_indexer.analysis_threshold must be in 0..100, got {}",
                self.analysis_threshold
            )));
        }
        if self.max_concurrent_files == 0 {
            return Err(ConfigError::ValidationError(
                "live_indexer.max_concurrent_files must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Staging options controlling which files get picked up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StagingConfig {
    pub include_untracked_files: bool,
    pub max_untracked_files: usize,
    pub max_file_size_kb: u64,
    pub exclude_patterns: Vec<String>,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            include_untracked_files: true,
            max_untracked_files: 200,
            max_file_size_kb: 1024,
            exclude_patterns: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "cortex_core=debug"
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = CortexConfig::default();
        assert_eq!(config.embedding.batch_size, 400);
        assert_eq!(config.embedding.timeout_ms, 120_000);
        assert_eq!(config.change_processor.max_queue_size, 100);
        assert_eq!(config.live_indexer.max_concurrent_files, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: CortexConfig = toml::from_str(
            r#"
            [embedding]
            process_count = 2

            [live_indexer]
            analysis_threshold = 30.0
            "#,
        )
        .unwrap();
        assert_eq!(config.embedding.process_count, 2);
        assert_eq!(config.embedding.batch_size, 400);
        assert!((config.live_indexer.analysis_threshold - 30.0).abs() < f32::EPSILON);
        assert!(config.live_indexer.enable_content_analysis);
    }

    #[test]
    fn test_validation_rejects_bad_threshold() {
        let mut config = CortexConfig::default();
        config.live_indexer.analysis_threshold = 150.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_queue() {
        let mut config = CortexConfig::default();
        config.change_processor.max_queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_priority_weights_ordering() {
        let weights = PriorityWeights::default();
        assert!(weights.critical > weights.high);
        assert!(weights.high > weights.medium);
        assert!(weights.medium > weights.low);
    }
}
