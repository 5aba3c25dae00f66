//! Core types, configuration, and error handling for repovet.
//!
//! This crate provides the shared foundation used by all other repovet crates:
//! - [`RepovetError`]: unified error type using `thiserror`
//! - [`RepovetConfig`]: configuration loaded from `.repovet.toml`
//! - [`retry_with_backoff`]: the backoff loop shared by both external clients
//! - Shared types: [`RepoRef`], [`RepoMetrics`], [`HealthScorecard`],
//!   [`AuditPlan`], [`AuditBundle`], [`FinalReport`], [`OutputFormat`]

mod config;
mod error;
mod retry;
mod types;

pub use config::{
    AuditConfig, GithubConfig, LlmConfig, ModelRoles, ModelSpec, PipelineConfig, PromptsConfig,
    RepovetConfig, ResolvedModel,
};
pub use error::RepovetError;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use types::{
    truncate_chars, AuditBundle, AuditPlan, FileAuditResult, FinalReport, HealthScorecard,
    IssueStats, OutputFormat, PlanMetadata, RepoMetrics, RepoRef, ScoreBreakdown, Track, Verdict,
};

/// A convenience `Result` type for repovet operations.
pub type Result<T> = std::result::Result<T, RepovetError>;
