//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `codecouncil.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Retry behavior for capability invocations.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Event bus sizing.
    #[serde(default)]
    pub bus: BusConfig,

    /// Finding deduplication tuning.
    #[serde(default)]
    pub consolidation: ConsolidationConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

/// Retry supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per step, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds. Doubles on each
    /// further retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling on any single backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    400
}

fn default_max_delay_ms() -> u64 {
    3000
}

fn default_timeout() -> u64 {
    120
}

/// Event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-subscriber queue capacity. A subscriber that falls this far
    /// behind is dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Events retained for late subscribers. 0 disables replay.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_history_limit() -> usize {
    1000
}

/// Consolidation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Fraction of the shorter line range that must overlap before two
    /// findings of the same kind are merged.
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: default_overlap_threshold(),
        }
    }
}

fn default_overlap_threshold() -> f64 {
    0.5
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Output format: "markdown" or "json".
    #[serde(default = "default_format")]
    pub format: String,

    /// Lowest severity included in the rendered report.
    #[serde(default = "default_min_severity")]
    pub min_severity: String,

    /// Include code snippets in the report.
    #[serde(default = "default_true")]
    pub include_snippets: bool,

    /// Print model thinking chunks to the console during the review.
    #[serde(default)]
    pub show_thinking: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            min_severity: default_min_severity(),
            include_snippets: true,
            show_thinking: false,
        }
    }
}

fn default_format() -> String {
    "markdown".to_string()
}

fn default_min_severity() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default locations.
    ///
    /// Returns `Ok(None)` if no file exists, `Err` if one exists but
    /// can't be parsed. Checked in order: `./codecouncil.toml`, then
    /// `~/.config/codecouncil/config.toml`.
    pub fn load_default() -> Result<Option<Self>> {
        let local = Path::new("codecouncil.toml");
        if local.exists() {
            return Ok(Some(Self::load(local)?));
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user = Path::new(&home).join(".config/codecouncil/config.toml");
            if user.exists() {
                return Ok(Some(Self::load(&user)?));
            }
        }

        Ok(None)
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        // Model settings - always override since they have defaults in CLI
        self.model.model = args.model.clone();
        self.model.ollama_url = args.ollama_url.clone();

        // Only override if explicitly provided via CLI
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.retry.timeout_seconds = timeout;
        }
        if let Some(max_attempts) = args.max_attempts {
            self.retry.max_attempts = max_attempts;
        }
        if let Some(format) = args.format {
            self.report.format = format.to_string();
        }
        if let Some(min_severity) = args.min_severity {
            self.report.min_severity = min_severity.to_string();
        }

        // Flags always override
        if args.show_thinking {
            self.report.show_thinking = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.model, "llama3.2:latest");
        assert_eq!(config.model.ollama_url, "http://localhost:11434");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 400);
        assert_eq!(config.retry.max_delay_ms, 3000);
        assert_eq!(config.bus.queue_capacity, 1024);
        assert_eq!(config.consolidation.overlap_threshold, 0.5);
        assert_eq!(config.report.format, "markdown");
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[model]
model = "qwen2.5-coder:7b"
temperature = 0.2

[retry]
max_attempts = 5
base_delay_ms = 250

[bus]
queue_capacity = 64

[report]
format = "json"
show_thinking = true
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.model.model, "qwen2.5-coder:7b");
        assert_eq!(config.model.temperature, 0.2);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 250);
        // Unset fields keep their defaults.
        assert_eq!(config.retry.max_delay_ms, 3000);
        assert_eq!(config.bus.queue_capacity, 64);
        assert_eq!(config.bus.history_limit, 1000);
        assert_eq!(config.report.format, "json");
        assert!(config.report.show_thinking);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[retry]"));
        assert!(toml_str.contains("[bus]"));
        assert!(toml_str.contains("[consolidation]"));
        assert!(toml_str.contains("[report]"));

        // The generated file parses back to the same defaults.
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.retry.timeout_seconds, 120);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = Config::load(Path::new("/nonexistent/codecouncil.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codecouncil.toml");
        std::fs::write(&path, Config::default_toml()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.retry.timeout_seconds, 120);
        assert_eq!(config.model.model, "llama3.2:latest");
    }
}
