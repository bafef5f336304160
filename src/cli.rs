//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::fmt;
use std::path::PathBuf;

/// CodeCouncil - multi-agent code review with a live event stream
///
/// Review a source file with a council of local AI reviewers running in
/// parallel: security and bug hunting, consolidated into one report with
/// proposed fixes. Progress streams to the console as it happens.
///
/// Examples:
///   codecouncil src/auth.py
///   codecouncil src/auth.py --model qwen2.5-coder:7b --show-thinking
///   codecouncil src/auth.py --format json --output review.json
///   codecouncil src/auth.py --fail-on high
///   codecouncil --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Source file to review
    ///
    /// Not required when using --init-config.
    #[arg(value_name = "FILE", required_unless_present = "init_config")]
    pub file: Option<PathBuf>,

    /// Ollama model to use for all review capabilities
    ///
    /// Recommended models: llama3.2:latest, qwen2.5-coder:7b, codellama:13b.
    /// Can also be set via CODECOUNCIL_MODEL env var or codecouncil.toml.
    #[arg(
        short,
        long,
        default_value = "llama3.2:latest",
        env = "CODECOUNCIL_MODEL"
    )]
    pub model: String,

    /// Ollama API endpoint URL
    #[arg(long, default_value = "http://localhost:11434", env = "OLLAMA_URL")]
    pub ollama_url: String,

    /// Write the rendered report to a file
    ///
    /// Without this flag the report is only printed to the console.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Path to configuration file
    ///
    /// If not specified, looks for codecouncil.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Temperature for LLM responses (0.0 - 1.0)
    ///
    /// Lower values produce more consistent/deterministic output
    #[arg(long, value_name = "TEMP")]
    pub temperature: Option<f32>,

    /// Per-attempt timeout in seconds
    ///
    /// How long to wait for the model before a step attempt counts as
    /// failed and may be retried.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Total attempts per step, including the first
    #[arg(long, value_name = "COUNT")]
    pub max_attempts: Option<u32>,

    /// Fail if findings at or above this severity survive consolidation
    ///
    /// Useful for CI pipelines. Exit code 2 when the threshold is hit.
    /// Values: critical, high, medium, low
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,

    /// Minimum severity to include in the report
    ///
    /// Findings below this level are filtered out. Values: critical, high, medium, low
    #[arg(long, value_name = "LEVEL")]
    pub min_severity: Option<FailOnLevel>,

    /// Print model thinking chunks while the review runs
    #[arg(long)]
    pub show_thinking: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default codecouncil.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Markdown => write!(f, "markdown"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Severity level for --fail-on and --min-severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for FailOnLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailOnLevel::Low => write!(f, "low"),
            FailOnLevel::Medium => write!(f, "medium"),
            FailOnLevel::High => write!(f, "high"),
            FailOnLevel::Critical => write!(f, "critical"),
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Validate Ollama URL format
        if !self.ollama_url.starts_with("http://") && !self.ollama_url.starts_with("https://") {
            return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
        }

        // Validate temperature range if provided
        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        // Validate timeout if provided
        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        // Validate attempts if provided
        if let Some(max_attempts) = self.max_attempts {
            if max_attempts == 0 {
                return Err("Max attempts must be at least 1".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        // Validate the input file
        if let Some(ref file) = self.file {
            if !file.exists() {
                return Err(format!("File does not exist: {}", file.display()));
            }
            if !file.is_file() {
                return Err(format!("Not a file: {}", file.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
