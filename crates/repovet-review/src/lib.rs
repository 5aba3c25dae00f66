//! AI audit orchestration for repovet.
//!
//! Provides the model client, prompt library, audit planner, dual-track
//! auditor, synthesizer and the resumable pipeline that sequences them over
//! a persisted [`state::StateStore`].

pub mod auditor;
pub mod fakes;
pub mod llm;
pub mod pipeline;
pub mod planner;
pub mod prompt;
pub mod state;
pub mod synthesizer;

pub use auditor::DualTrackAuditor;
pub use llm::{LlmClient, ModelInvoker};
pub use pipeline::{Orchestrator, PipelineRun, Stage};
pub use planner::AuditPlanner;
pub use prompt::PromptLibrary;
pub use state::{MemoryStateStore, SqliteStateStore, StateStore};
pub use synthesizer::Synthesizer;
