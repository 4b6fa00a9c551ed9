//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.yoagents.toml` files.

use crate::agent::{HeuristicSettings, OllamaConfig, PipelineSettings};
use crate::intake::DEFAULT_MAX_CODE_BYTES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = ".yoagents.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// AI review settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Rule matching settings.
    #[serde(default)]
    pub rules: RulesConfig,

    /// Thresholds for the structural heuristics.
    #[serde(default)]
    pub heuristics: HeuristicsConfig,

    /// Directory scanning settings.
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Submission limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// General application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of files analyzed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// SQLite database for results. Results stay in memory when unset.
    #[serde(default)]
    pub database: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            concurrency: default_concurrency(),
            database: None,
        }
    }
}

fn default_output() -> String {
    "yoagents_report.md".to_string()
}

fn default_concurrency() -> usize {
    4
}

/// AI review settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Run the AI stage at all.
    #[serde(default)]
    pub enabled: bool,

    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
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

fn default_timeout() -> u64 {
    300
}

impl ModelConfig {
    pub fn ollama(&self) -> OllamaConfig {
        OllamaConfig {
            ollama_url: self.ollama_url.clone(),
            model_name: self.name.clone(),
            temperature: self.temperature,
            timeout_seconds: self.timeout_seconds,
        }
    }
}

/// Rule matching settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Rules fetched per agent and run.
    #[serde(default = "default_max_rules")]
    pub max_rules: usize,

    /// Lines of context on each side of a match in snippets.
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,

    /// Extra `[[rules]]` TOML file added to the built-in set.
    #[serde(default)]
    pub rules_file: Option<PathBuf>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            max_rules: default_max_rules(),
            context_lines: default_context_lines(),
            rules_file: None,
        }
    }
}

fn default_max_rules() -> usize {
    crate::agent::DEFAULT_MAX_RULES
}

fn default_context_lines() -> usize {
    crate::patterns::DEFAULT_CONTEXT_LINES
}

/// Thresholds for the structural heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicsConfig {
    #[serde(default = "default_max_function_lines")]
    pub max_function_lines: usize,

    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            max_function_lines: default_max_function_lines(),
            max_nesting_depth: default_max_nesting_depth(),
        }
    }
}

fn default_max_function_lines() -> usize {
    HeuristicSettings::default().max_function_lines
}

fn default_max_nesting_depth() -> usize {
    HeuristicSettings::default().max_nesting_depth
}

/// File scanner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Maximum files to analyze.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// File extensions to include.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory or file names to skip.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            extensions: default_extensions(),
            excludes: default_excludes(),
        }
    }
}

fn default_max_files() -> usize {
    100
}

fn default_extensions() -> Vec<String> {
    vec![
        "js", "jsx", "mjs", "cjs", "ts", "tsx", "py", "html", "htm", "vue", "svelte",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_excludes() -> Vec<String> {
    vec![
        ".git",
        "node_modules",
        "vendor",
        "dist",
        "build",
        "coverage",
        "__pycache__",
        ".venv",
        "venv",
        "target",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Submission limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest accepted submission in bytes.
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_code_bytes: default_max_code_bytes(),
        }
    }
}

fn default_max_code_bytes() -> usize {
    DEFAULT_MAX_CODE_BYTES
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

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
            self.model.enabled = true;
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if args.ai {
            self.model.enabled = true;
        }
        // --no-ai wins over everything else
        if args.no_ai {
            self.model.enabled = false;
        }

        if let Some(ref database) = args.database {
            self.general.database = Some(database.clone());
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if args.verbose {
            self.general.verbose = true;
        }

        if let Some(ref rules_file) = args.rules_file {
            self.rules.rules_file = Some(rules_file.clone());
        }
        if let Some(max_rules) = args.max_rules {
            self.rules.max_rules = max_rules;
        }
    }

    /// Settings handed to every agent pipeline.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_rules: self.rules.max_rules,
            context_lines: self.rules.context_lines,
            heuristics: HeuristicSettings {
                max_function_lines: self.heuristics.max_function_lines,
                max_nesting_depth: self.heuristics.max_nesting_depth,
            },
        }
    }

    /// Check values that would make every run fail.
    pub fn validate(&self) -> Result<()> {
        if self.rules.max_rules == 0 {
            anyhow::bail!("rules.max_rules must be at least 1");
        }
        if self.general.concurrency == 0 {
            anyhow::bail!("general.concurrency must be at least 1");
        }
        if self.limits.max_code_bytes == 0 {
            anyhow::bail!("limits.max_code_bytes must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.model.temperature) {
            anyhow::bail!("model.temperature must be between 0.0 and 1.0");
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
