//! LLM completion collaborator for the AI-assisted stage.
//!
//! Pipelines receive a [`CompletionService`] at construction. When no model
//! is configured they get [`DisabledCompletion`], which reports itself as
//! disabled so the stage is skipped entirely.

use crate::models::{Finding, Severity, Specialty};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Per-call context passed alongside the code.
#[derive(Debug, Clone, Default)]
pub struct CompletionContext {
    /// Specialty-specific system prompt.
    pub system_prompt: String,
    /// Original filename, if the submission had one.
    pub filename: Option<String>,
}

/// External completion service that turns code into findings.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Whether the service is configured. Disabled services are never called.
    fn is_enabled(&self) -> bool;

    /// Review `code` for `specialty` and return structured findings.
    async fn complete(
        &self,
        specialty: Specialty,
        code: &str,
        language: &str,
        context: &CompletionContext,
    ) -> Result<Vec<Finding>>;
}

/// No-op service used when no model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCompletion;

#[async_trait]
impl CompletionService for DisabledCompletion {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn complete(
        &self,
        _specialty: Specialty,
        _code: &str,
        _language: &str,
        _context: &CompletionContext,
    ) -> Result<Vec<Finding>> {
        Ok(Vec::new())
    }
}

/// Configuration for the Ollama client.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: 0.1,
            timeout_seconds: 300,
        }
    }
}

/// Message in the chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Completion service backed by an Ollama server.
pub struct OllamaCompletion {
    config: OllamaConfig,
    http_client: reqwest::Client,
}

impl OllamaCompletion {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        info!(
            "Initializing AI review with model {} at {}",
            config.model_name, config.ollama_url
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn build_prompt(code: &str, language: &str, context: &CompletionContext) -> String {
        let mut prompt = String::new();
        prompt.push_str("Analyze the following code and report any issues.\n\n");
        prompt.push_str("For each issue found, output it in this exact JSON format:\n");
        prompt.push_str(r#"{"line_number": 42, "severity": "high", "category": "security", "message": "What is wrong", "suggestion": "How to fix"}"#);
        prompt.push_str("\n\nSeverity is one of critical, high, medium, low, info.\n");
        prompt.push_str("Output one JSON object per line for each issue. Only output JSON, no other text.\n\n");

        let name = context.filename.as_deref().unwrap_or("submission");
        prompt.push_str(&format!("### FILE: {} ({})\n```{}\n", name, language, language));
        for (idx, line) in code.lines().enumerate() {
            prompt.push_str(&format!("{:>4} | {}\n", idx + 1, line));
        }
        prompt.push_str("```\n\nNow analyze and output issues as JSON (one per line):");

        prompt
    }

    async fn send_prompt(&self, system_prompt: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.config.ollama_url);

        let request = OllamaChatRequest {
            model: self.config.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("Request timed out after {}s", self.config.timeout_seconds)
                } else if e.is_connect() {
                    anyhow::anyhow!("Cannot connect to Ollama at {}", self.config.ollama_url)
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ollama API error {}: {}", status, body));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(chat_response.message.content)
    }
}

#[async_trait]
impl CompletionService for OllamaCompletion {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        specialty: Specialty,
        code: &str,
        language: &str,
        context: &CompletionContext,
    ) -> Result<Vec<Finding>> {
        let prompt = Self::build_prompt(code, language, context);
        debug!("Sending {} review request ({} bytes)", specialty, prompt.len());

        let response = self.send_prompt(&context.system_prompt, &prompt).await?;
        let findings = parse_findings(&response, specialty);
        debug!("Parsed {} {} findings from model", findings.len(), specialty);

        Ok(findings)
    }
}

/// Parse findings from a JSON-lines model response, skipping anything else.
pub fn parse_findings(response: &str, specialty: Specialty) -> Vec<Finding> {
    response
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|json| json_to_finding(&json, specialty))
        .collect()
}

fn json_to_finding(json: &Value, specialty: Specialty) -> Option<Finding> {
    let message = json["message"]
        .as_str()
        .or_else(|| json["description"].as_str())
        .or_else(|| json["title"].as_str())?;

    let severity = Severity::from_label(json["severity"].as_str().unwrap_or("medium"));
    let category = json["category"].as_str().unwrap_or(specialty.as_str());

    let mut finding = Finding::new(severity, category, message);

    let line = json["line_number"]
        .as_u64()
        .or_else(|| json["line"].as_u64())
        .filter(|line| *line > 0);
    if let Some(line) = line {
        finding = finding.at_line(line as usize);
    }

    if let Some(suggestion) = json["suggestion"].as_str().filter(|s| !s.is_empty()) {
        finding = finding.with_suggestion(suggestion);
    }

    Some(finding)
}
