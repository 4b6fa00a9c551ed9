//! YoAgents - multi-agent code analysis engine
//!
//! A submission (one piece of source code) is analyzed concurrently by a
//! roster of specialist agents: security, performance, accessibility and
//! best practices. Each agent runs the same pipeline (optional AI review,
//! rule matching, structural heuristics, confidence scoring), publishes its
//! progress on a per-submission bus and stores its result. The orchestrator
//! joins the pipelines and moves the submission to `completed` or `failed`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use yoagents::agent::{DisabledCompletion, PipelineDeps};
//! use yoagents::intake::{NewSubmission, SubmissionIntake};
//! use yoagents::orchestrator::Orchestrator;
//! use yoagents::patterns::BuiltinRuleLibrary;
//! use yoagents::progress::ProgressBus;
//! use yoagents::store::MemoryStore;
//!
//! # async fn demo() -> yoagents::error::EngineResult<()> {
//! let deps = PipelineDeps {
//!     llm: Arc::new(DisabledCompletion),
//!     rules: Arc::new(BuiltinRuleLibrary::default()),
//!     bus: Arc::new(ProgressBus::default()),
//! };
//! let orchestrator = Orchestrator::new(Arc::new(MemoryStore::new()), deps);
//! let intake = SubmissionIntake::new(Arc::new(orchestrator));
//!
//! let report = intake
//!     .analyze(NewSubmission::new("const result = eval(data.input);", "javascript"))
//!     .await?;
//! println!("{} findings", report.summary.total);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod intake;
pub mod models;
pub mod orchestrator;
pub mod patterns;
pub mod progress;
pub mod report;
pub mod scanner;
pub mod scoring;
pub mod store;
