//! Analyzer agents.
//!
//! Every agent runs the same [`AgentPipeline`] skeleton; what differs per
//! specialty lives behind [`SpecialtyAnalyzer`].

pub mod llm;
pub mod pipeline;
pub mod specialty;

pub use llm::{CompletionContext, CompletionService, DisabledCompletion, OllamaCompletion, OllamaConfig};
pub use pipeline::{AgentPipeline, PipelineDeps, PipelineSettings, DEFAULT_MAX_RULES};
pub use specialty::{analyzer_for, HeuristicSettings, SpecialtyAnalyzer};
