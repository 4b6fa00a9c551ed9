//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{Severity, Specialty};
use clap::Parser;
use std::path::PathBuf;

/// YoAgents - multi-agent code analysis
///
/// Runs security, performance, accessibility and best-practices agents
/// over source files concurrently and writes a Markdown/JSON report.
///
/// Examples:
///   yoagents --file src/app.js
///   yoagents --path ./web --agents security,performance --format json
///   yoagents --file main.py --ai --model qwen2.5-coder:7b
///   yoagents --list-agents
///   yoagents --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Single source file to analyze
    #[arg(short, long, value_name = "FILE", conflicts_with = "path")]
    pub file: Option<PathBuf>,

    /// Directory to scan for source files
    #[arg(short, long, value_name = "DIR")]
    pub path: Option<PathBuf>,

    /// Language of --file, overriding detection from its extension
    #[arg(short, long, value_name = "LANG")]
    pub language: Option<String>,

    /// Agents to run (comma-separated)
    ///
    /// Values: security, performance, accessibility, best-practices.
    /// Runs every agent when omitted.
    #[arg(short, long, value_name = "AGENTS", value_delimiter = ',')]
    pub agents: Option<Vec<Specialty>>,

    /// Enable the AI review stage
    #[arg(long, conflicts_with = "no_ai")]
    pub ai: bool,

    /// Disable the AI review stage, even if the config enables it
    #[arg(long)]
    pub no_ai: bool,

    /// Ollama model for the AI review stage (implies --ai)
    #[arg(short, long, env = "YOAGENTS_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// AI request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// SQLite database to persist results in
    #[arg(long, value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// Extra rules file (TOML with [[rules]] entries)
    #[arg(long, value_name = "FILE")]
    pub rules_file: Option<PathBuf>,

    /// Rules fetched per agent
    #[arg(long, value_name = "COUNT")]
    pub max_rules: Option<usize>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .yoagents.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of files analyzed at once
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Complete a submission when at least one agent succeeded
    ///
    /// By default any failed agent fails the submission.
    #[arg(long)]
    pub partial: bool,

    /// Fail if findings at or above this severity are found
    ///
    /// Useful for CI pipelines. Exit code 2 when threshold is exceeded.
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<SeverityLevel>,

    /// Minimum severity to include in the report
    #[arg(long, value_name = "LEVEL")]
    pub min_severity: Option<SeverityLevel>,

    /// List the files --path would analyze and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Print the agent roster and exit
    #[arg(long)]
    pub list_agents: bool,

    /// Generate a default .yoagents.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,
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

/// Severity level for --fail-on and --min-severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum SeverityLevel {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl From<SeverityLevel> for Severity {
    fn from(level: SeverityLevel) -> Self {
        match level {
            SeverityLevel::Info => Severity::Info,
            SeverityLevel::Low => Severity::Low,
            SeverityLevel::Medium => Severity::Medium,
            SeverityLevel::High => Severity::High,
            SeverityLevel::Critical => Severity::Critical,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether this invocation analyzes code (as opposed to a utility command).
    pub fn needs_input(&self) -> bool {
        !(self.init_config || self.list_agents)
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if !self.needs_input() {
            return Ok(());
        }

        match (&self.file, &self.path) {
            (None, None) => {
                return Err("One of --file or --path is required".to_string());
            }
            (Some(file), _) if !file.is_file() => {
                return Err(format!("File does not exist: {}", file.display()));
            }
            (_, Some(dir)) if !dir.is_dir() => {
                return Err(format!("Directory does not exist: {}", dir.display()));
            }
            _ => {}
        }

        if self.dry_run && self.path.is_none() {
            return Err("--dry-run requires --path".to_string());
        }

        if self.language.is_some() && self.path.is_some() {
            return Err("--language only applies to --file".to_string());
        }

        if let Some(ref agents) = self.agents {
            if agents.is_empty() {
                return Err("--agents needs at least one agent".to_string());
            }
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.max_rules == Some(0) {
            return Err("Max rules must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
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
