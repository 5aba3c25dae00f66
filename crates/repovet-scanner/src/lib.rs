//! Repository vitality scanning.
//!
//! - [`collect`]: gather [`RepoMetrics`](repovet_core::RepoMetrics) from a
//!   [`CodeHost`](repovet_github::CodeHost) with a fixed, small number of calls
//! - [`health`]: pure scoring, verdict and signal derivation

pub mod collect;
pub mod health;

pub use collect::{MetricsCollector, ScanReport};
pub use health::{compute_health_score, derive_signals, scorecard};
