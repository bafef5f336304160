//! CodeCouncil - multi-agent code review with a live event stream
//!
//! A CLI tool that runs a council of Ollama-backed review capabilities
//! in parallel over one source file, streams progress events to the
//! console while the review runs, and renders a consolidated report.
//!
//! Exit codes:
//!   0 - Success (no findings above threshold, or no --fail-on set)
//!   1 - Runtime error (connection, config, every step failed)
//!   2 - Findings at or above the --fail-on threshold

mod capability;
mod cli;
mod config;
mod consolidate;
mod coordinator;
mod events;
mod models;
mod plan;
mod report;
mod retry;
mod review;

use anyhow::{Context, Result};
use capability::AnalysisInput;
use cli::{Args, FailOnLevel};
use config::Config;
use coordinator::ReviewError;
use events::{EventKind, EventStream};
use models::Severity;
use review::ReviewEngine;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("CodeCouncil v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    // Run the review
    match run_review(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Review failed: {}", e);
            eprintln!("\n❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default codecouncil.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new("codecouncil.toml");

    if path.exists() {
        eprintln!("⚠️  codecouncil.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write codecouncil.toml")?;

    println!("✅ Created codecouncil.toml with default settings.");
    println!("   Edit it to customize model, retries, consolidation, and report output.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete review workflow. Returns exit code (0, 1, or 2).
async fn run_review(args: Args) -> Result<i32> {
    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let file = args.file.clone().context("No input file provided")?;

    // Step 1: Read the source file
    let code = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read input file: {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    let input = AnalysisInput::new(&filename, &code);
    info!("Reviewing {} ({} lines)", filename, input.line_count());

    // Step 2: Build the engine
    let engine = ReviewEngine::new(config.clone());

    if !args.quiet {
        println!("🤖 Convening the review council...");
        println!("   Model: {}", config.model.model);
        println!("   Ollama: {}", config.model.ollama_url);
        println!("   Capabilities: {}", engine.capability_ids().join(", "));
        println!("   Timeout: {}s per attempt", config.retry.timeout_seconds);
    }

    // Step 3: Submit and follow the event stream to the terminal event
    let review_id = engine.submit(input);
    let mut stream = engine
        .subscribe(&review_id)
        .context("Review stream unavailable")?;

    print_events(&mut stream, config.report.show_thinking, args.quiet).await;

    // Step 4: Collect the result
    let outcome = engine
        .wait(&review_id)
        .await
        .context("Review task vanished")?;

    let (review_report, all_failed) = match outcome {
        Ok(review_report) => (review_report, false),
        Err(ReviewError::AllCapabilitiesFailed(review_report)) => (*review_report, true),
        Err(e) => return Err(e.into()),
    };

    // Step 5: Render and deliver the report
    let rendered = match config.report.format.as_str() {
        "json" => report::generate_json_report(&review_report, &config.report)?,
        _ => report::generate_markdown_report(&review_report, &config.report),
    };

    match args.output {
        Some(ref path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!("\n💾 Report saved to: {}", path.display());
        }
        None => {
            println!("\n{}", rendered);
        }
    }

    // Print summary
    println!("\n📊 Review Summary:");
    println!("   Status: {}", review_report.status);
    println!("   Findings: {}", review_report.summary.total);
    println!(
        "   - 🔴 Critical: {} | 🟠 High: {} | 🟡 Medium: {} | 🟢 Low: {} | 🔵 Info: {}",
        review_report.summary.critical,
        review_report.summary.high,
        review_report.summary.medium,
        review_report.summary.low,
        review_report.summary.info
    );
    println!("   Fixes proposed: {}", review_report.fixes.len());
    println!(
        "   Duration: {:.1}s",
        review_report.metrics.duration_ms as f64 / 1000.0
    );

    if all_failed {
        eprintln!("\n⛔ Every review step failed. See the report for details.");
        return Ok(1);
    }

    // Check --fail-on threshold
    if let Some(fail_level) = args.fail_on {
        let threshold_severity = fail_on_to_severity(fail_level);
        let has_findings_above = review_report
            .findings
            .iter()
            .any(|f| f.severity >= threshold_severity);

        if has_findings_above {
            eprintln!(
                "\n⛔ Findings at or above {} severity. Failing (exit code 2).",
                fail_level
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Print review progress to the console until the terminal event.
///
/// The stream replays history, so events published before the
/// subscription still show up in order.
async fn print_events(stream: &mut EventStream, show_thinking: bool, quiet: bool) {
    while let Some(event) = stream.recv().await {
        if quiet {
            if event.event_type == EventKind::ReviewCompleted {
                break;
            }
            continue;
        }

        let payload = &event.payload;
        match event.event_type {
            EventKind::ReviewStarted => {
                println!(
                    "\n🚀 Review {} started: {} ({} lines)\n",
                    payload["review_id"].as_str().unwrap_or("?"),
                    payload["filename"].as_str().unwrap_or("?"),
                    payload["code_lines"].as_u64().unwrap_or(0)
                );
            }
            EventKind::PlanCreated => {
                let steps = payload["steps"].as_array().map(|s| s.len()).unwrap_or(0);
                println!(
                    "📋 Plan {}: {} steps",
                    payload["plan_id"].as_str().unwrap_or("?"),
                    steps
                );
            }
            EventKind::StepStarted => {
                println!(
                    "▶️  [{}] step started",
                    payload["step_id"].as_str().unwrap_or("?")
                );
                if let Some(failures) = payload["upstream_failures"].as_array() {
                    if !failures.is_empty() {
                        let names: Vec<&str> =
                            failures.iter().filter_map(|f| f.as_str()).collect();
                        println!("   ⚠️  upstream failures: {}", names.join(", "));
                    }
                }
            }
            EventKind::StepCompleted => {
                if payload["status"].as_str() == Some("failed") {
                    println!(
                        "   ❌ [{}] step failed: {}",
                        payload["step_id"].as_str().unwrap_or("?"),
                        payload["error"].as_str().unwrap_or("unknown error")
                    );
                }
            }
            EventKind::AgentStarted => {
                debug!(source = %event.source_id, "agent started");
            }
            EventKind::AgentCompleted => {
                if payload["success"].as_bool().unwrap_or(false) {
                    println!(
                        "   ✅ [{}] {} ({:.1}s)",
                        event.source_id,
                        payload["summary"].as_str().unwrap_or("done"),
                        payload["duration_ms"].as_u64().unwrap_or(0) as f64 / 1000.0
                    );
                }
            }
            EventKind::AgentError => {
                if payload["will_retry"].as_bool().unwrap_or(false) {
                    println!(
                        "   ⚠️  [{}] attempt {}/{} failed: {} (retrying in {}ms)",
                        event.source_id,
                        payload["attempt"].as_u64().unwrap_or(0),
                        payload["max_attempts"].as_u64().unwrap_or(0),
                        payload["message"].as_str().unwrap_or("?"),
                        payload["delay_ms"].as_u64().unwrap_or(0)
                    );
                }
            }
            EventKind::Thinking => {
                if show_thinking {
                    println!(
                        "   💭 [{}] {}",
                        event.source_id,
                        payload["chunk"].as_str().unwrap_or("")
                    );
                }
            }
            EventKind::FindingDiscovered => {
                let severity = Severity::from(payload["severity"].as_str().unwrap_or(""));
                println!(
                    "   {} [{}] {} (line {})",
                    severity.emoji(),
                    event.source_id,
                    payload["title"].as_str().unwrap_or("(untitled)"),
                    payload["location"]["line_start"].as_u64().unwrap_or(0)
                );
            }
            EventKind::FixProposed => {
                println!("   🔧 [{}] fix proposed", event.source_id);
            }
            EventKind::FindingsConsolidated => {
                println!(
                    "\n📦 Consolidated: {} findings ({} duplicates removed)",
                    payload["total_findings"].as_u64().unwrap_or(0),
                    payload["duplicates_removed"].as_u64().unwrap_or(0)
                );
            }
            EventKind::FixVerified => {
                debug!(
                    fix = %payload["fix_id"].as_str().unwrap_or("?"),
                    passed = payload["verification_passed"].as_bool().unwrap_or(false),
                    "fix verification resolved"
                );
            }
            EventKind::FinalReport => {
                // Rendered separately once the result is collected.
            }
            EventKind::ReviewCompleted => {
                println!(
                    "\n🏁 Review {} in {:.1}s",
                    payload["status"].as_str().unwrap_or("?"),
                    payload["duration_ms"].as_u64().unwrap_or(0) as f64 / 1000.0
                );
                break;
            }
        }
    }
}

/// Convert FailOnLevel to Severity for comparison.
fn fail_on_to_severity(level: FailOnLevel) -> Severity {
    match level {
        FailOnLevel::Low => Severity::Low,
        FailOnLevel::Medium => Severity::Medium,
        FailOnLevel::High => Severity::High,
        FailOnLevel::Critical => Severity::Critical,
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from codecouncil.toml");
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
