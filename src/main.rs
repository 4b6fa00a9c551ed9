//! YoAgents - multi-agent code analysis CLI
//!
//! Runs the agent roster over one file or a directory of source files and
//! writes a Markdown or JSON report.
//!
//! Exit codes:
//!   0 - Success (no findings above threshold, or no --fail-on set)
//!   1 - Runtime error (config, unreadable input, every submission failed, etc.)
//!   2 - Findings found at or above the --fail-on threshold

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use yoagents::agent::{CompletionService, DisabledCompletion, OllamaCompletion, PipelineDeps};
use yoagents::analysis;
use yoagents::cli::{Args, OutputFormat};
use yoagents::config::{Config, CONFIG_FILE};
use yoagents::intake::{NewSubmission, SubmissionIntake};
use yoagents::models::{AnalysisReport, Report, ReportMetadata, Severity, Specialty};
use yoagents::orchestrator::{JoinPolicy, Orchestrator};
use yoagents::patterns::BuiltinRuleLibrary;
use yoagents::progress::{ProgressBus, ProgressMessage};
use yoagents::report;
use yoagents::scanner::{self, FileScanner, ScanConfig};
use yoagents::store::{AnalysisStore, MemoryStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("YoAgents v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    let outcome = if args.list_agents {
        handle_list_agents(&args).await
    } else {
        run_analysis(args).await
    };

    match outcome {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .yoagents.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize agents, rules, thresholds, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load configuration from file or use defaults, then apply CLI overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        Config::load(config_path)?
    } else {
        match Config::load_default() {
            Ok(Some(config)) => {
                info!("Loaded default config from {}", CONFIG_FILE);
                config
            }
            Ok(None) => {
                debug!("No config file found, using defaults");
                Config::default()
            }
            Err(e) => {
                warn!("Failed to load config: {}", e);
                Config::default()
            }
        }
    };

    config.merge_with_args(args);
    config.validate()?;
    Ok(config)
}

fn open_store(config: &Config) -> Result<Arc<dyn AnalysisStore>> {
    match config.general.database {
        Some(ref path) => {
            info!("Persisting results to {}", path.display());
            let store = SqliteStore::open_at(path)
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Wire the store, rule library, AI client and bus into an intake.
fn build_intake(config: &Config, args: &Args) -> Result<SubmissionIntake> {
    let store = open_store(config)?;

    let mut rules = BuiltinRuleLibrary::default();
    if let Some(ref rules_file) = config.rules.rules_file {
        rules.load_file(rules_file)?;
    }
    debug!("Rule library holds {} rules", rules.len());

    let llm: Arc<dyn CompletionService> = if config.model.enabled {
        Arc::new(OllamaCompletion::new(config.model.ollama())?)
    } else {
        Arc::new(DisabledCompletion)
    };

    let deps = PipelineDeps {
        llm,
        rules: Arc::new(rules),
        bus: Arc::new(ProgressBus::default()),
    };

    let policy = if args.partial {
        JoinPolicy::PartialSuccess
    } else {
        JoinPolicy::AllOrNothing
    };

    let orchestrator = Orchestrator::new(store, deps)
        .with_settings(config.pipeline_settings())
        .with_policy(policy);

    Ok(SubmissionIntake::new(Arc::new(orchestrator))
        .with_max_code_bytes(config.limits.max_code_bytes))
}

/// Handle --list-agents: print the roster and its stored statuses.
async fn handle_list_agents(args: &Args) -> Result<i32> {
    let config = load_config(args)?;
    let store = open_store(&config)?;
    let agents = store.list_agents().await?;

    println!("🤖 Agents:\n");
    for agent in agents {
        println!(
            "   {:<22} {:<16} {}",
            agent.name,
            agent.specialty.as_str(),
            agent.status.as_str()
        );
    }
    Ok(0)
}

/// One unit of source code read from disk.
struct SourceInput {
    name: String,
    code: String,
    language: String,
}

/// Read --file, or scan --path, into analysis inputs.
fn collect_inputs(args: &Args, scan_config: &ScanConfig) -> Result<Vec<SourceInput>> {
    if let Some(ref file) = args.file {
        let language = match args.language {
            Some(ref language) => language.clone(),
            None => scanner::language_for_path(file)
                .map(String::from)
                .with_context(|| {
                    format!(
                        "Cannot detect the language of {}; pass --language",
                        file.display()
                    )
                })?,
        };
        let code = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;

        return Ok(vec![SourceInput {
            name: file.display().to_string(),
            code,
            language,
        }]);
    }

    let root = args
        .path
        .clone()
        .context("One of --file or --path is required")?;
    let files = FileScanner::new(root, scan_config.clone()).scan()?;

    let mut inputs = Vec::with_capacity(files.len());
    for file in files {
        match file.read() {
            Ok(code) => inputs.push(SourceInput {
                name: file.path,
                code,
                language: file.language,
            }),
            Err(e) => warn!("Skipping {}: {:#}", file.path, e),
        }
    }
    Ok(inputs)
}

/// Handle --dry-run: scan files, print what would be analyzed, exit.
fn handle_dry_run(root: &Path, scan_config: &ScanConfig) -> Result<i32> {
    println!("\n🔍 Dry run: scanning files (no analysis)...\n");

    let files = FileScanner::new(root.to_path_buf(), scan_config.clone()).scan()?;

    if files.is_empty() {
        println!("   No matching source files found.");
    } else {
        println!("   Found {} files that would be analyzed:\n", files.len());
        for file in &files {
            println!("     📄 {} ({}, {} bytes)", file.path, file.language, file.size);
        }
        println!("\n   Total: {} files", files.len());
    }

    println!("\n✅ Dry run complete. No agents were run.");
    Ok(0)
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {prefix:30} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// Submit one input and follow its progress until the run is over.
async fn analyze_input(
    intake: &SubmissionIntake,
    input: SourceInput,
    agents: Option<Vec<Specialty>>,
    multi: &MultiProgress,
) -> Result<AnalysisReport> {
    let agent_count = agents.as_ref().map_or(Specialty::ALL.len(), Vec::len).max(1) as u64;

    let mut request =
        NewSubmission::new(input.code, input.language).with_filename(input.name.clone());
    if let Some(agents) = agents {
        request = request.with_agents(agents);
    }

    let orchestrator = intake.orchestrator();
    let id = intake
        .start_analysis(request)
        .await
        .with_context(|| format!("Failed to submit {}", input.name))?;

    let bar = multi.add(ProgressBar::new(100));
    bar.set_style(bar_style());
    bar.set_prefix(input.name.clone());

    // Subscribing before reading the status means a run that is still going
    // will close this subscription when it ends.
    let mut subscription = orchestrator.bus().subscribe(&id);
    let status = orchestrator.get_analysis(&id).await?.status;

    if !status.is_terminal() {
        let mut percents: HashMap<String, u8> = HashMap::new();
        while let Some(message) = subscription.recv().await {
            match message {
                ProgressMessage::AnalysisStarted { .. } => bar.set_message("started"),
                ProgressMessage::AgentProgress(event) => {
                    percents.insert(event.agent_id.clone(), event.percent);
                    let sum: u64 = percents.values().map(|p| u64::from(*p)).sum();
                    bar.set_position(sum / agent_count);
                    bar.set_message(format!(
                        "{}: {}",
                        event.agent_name,
                        format!("{:?}", event.phase).to_lowercase()
                    ));
                }
                ProgressMessage::AnalysisComplete { summary, .. } => {
                    bar.set_position(100);
                    bar.set_message(format!("{} findings", summary.total));
                }
                ProgressMessage::Error { message, .. } => {
                    bar.set_message(format!("failed: {}", message));
                }
            }
        }
    }
    bar.finish_and_clear();

    Ok(orchestrator.get_analysis(&id).await?)
}

/// Run the complete analysis workflow. Returns exit code (0, 1 or 2).
async fn run_analysis(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let config = load_config(&args)?;
    let scan_config = ScanConfig::from(&config);

    if args.dry_run {
        let root = args.path.clone().context("--dry-run requires --path")?;
        return handle_dry_run(&root, &scan_config);
    }

    let target = args
        .file
        .as_ref()
        .or(args.path.as_ref())
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let inputs = collect_inputs(&args, &scan_config)?;
    if inputs.is_empty() {
        println!("   No matching source files found in {}.", target);
        return Ok(0);
    }

    let intake = build_intake(&config, &args)?;
    let agents = args.agents.clone();

    println!("🤖 Running agents on {} file(s)...", inputs.len());
    if config.model.enabled {
        println!("   AI review: {} at {}", config.model.name, config.model.ollama_url);
    }

    let multi = if args.quiet {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    } else {
        MultiProgress::new()
    };

    let outcomes: Vec<_> = stream::iter(inputs)
        .map(|input| analyze_input(&intake, input, agents.clone(), &multi))
        .buffer_unordered(config.general.concurrency)
        .collect()
        .await;

    let mut reports = Vec::with_capacity(outcomes.len());
    let mut rejected = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(report) => reports.push(report),
            Err(e) => {
                rejected += 1;
                warn!("{:#}", e);
            }
        }
    }
    if reports.is_empty() {
        anyhow::bail!("No file could be submitted for analysis ({} rejected)", rejected);
    }
    reports.sort_by(|a, b| a.submission.display_name().cmp(b.submission.display_name()));

    if let Some(min_level) = args.min_severity {
        let min_severity = Severity::from(min_level);
        for report in &mut reports {
            analysis::filter_min_severity(report, min_severity);
        }
    }

    println!("\n📝 Generating report...");

    let duration = start_time.elapsed().as_secs_f64();
    let summary = analysis::combine_summaries(reports.iter().map(|r| &r.summary));
    let files_failed = analysis::failed_count(&reports);

    let metadata = ReportMetadata {
        target,
        analysis_date: Utc::now(),
        model_used: config.model.enabled.then(|| config.model.name.clone()),
        agents: args
            .agents
            .clone()
            .unwrap_or_else(|| Specialty::ALL.to_vec()),
        files_analyzed: reports.len(),
        files_failed,
        total_findings: summary.total,
        duration_seconds: duration,
    };

    let full_report = Report {
        metadata,
        recommendations: analysis::recommendations(&summary),
        summary: summary.clone(),
        files: reports,
    };

    let output_path = output_path(&args, &config);
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&full_report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&full_report),
    };
    report::write_report(&output, &output_path)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    println!("\n📊 Analysis Summary:");
    println!("   Files analyzed: {}", full_report.files.len());
    if files_failed > 0 {
        println!("   Files failed: {}", files_failed);
    }
    println!("   Total findings: {}", summary.total);
    println!(
        "   - 🔴 Critical: {} | 🟠 High: {} | 🟡 Medium: {} | 🟢 Low: {} | 🔵 Info: {}",
        summary.critical, summary.high, summary.medium, summary.low, summary.info
    );
    println!("   Duration: {:.1}s", duration);
    println!(
        "\n✅ Analysis complete! Report saved to: {}",
        output_path.display()
    );

    if files_failed == full_report.files.len() {
        eprintln!("\n❌ Every submission failed. See the report for partial results.");
        return Ok(1);
    }

    if let Some(fail_level) = args.fail_on {
        if analysis::any_at_or_above(&full_report.files, Severity::from(fail_level)) {
            eprintln!(
                "\n⛔ Findings at or above {:?} severity. Failing (exit code 2).",
                fail_level
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Report path: --output, else the configured path with the format's extension.
fn output_path(args: &Args, config: &Config) -> PathBuf {
    if let Some(ref output) = args.output {
        return output.clone();
    }

    let path = PathBuf::from(&config.general.output);
    match args.format {
        OutputFormat::Json => path.with_extension("json"),
        OutputFormat::Markdown => path,
    }
}
