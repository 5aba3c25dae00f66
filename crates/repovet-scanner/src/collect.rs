use std::sync::Arc;

use chrono::{DateTime, Utc};
use repovet_core::{HealthScorecard, IssueStats, RepoMetrics, RepoRef, Result};
use repovet_github::CodeHost;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::health::scorecard;

/// Metrics plus the scorecard derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    /// Raw metrics.
    pub metrics: RepoMetrics,
    /// Deterministic health summary.
    pub scorecard: HealthScorecard,
}

/// Gathers [`RepoMetrics`] from a code host.
///
/// Issue counts come from two scoped search queries rather than paging
/// through every issue, so a collection costs at most four API calls.
pub struct MetricsCollector {
    host: Arc<dyn CodeHost>,
}

impl MetricsCollector {
    /// Create a collector over `host`.
    pub fn new(host: Arc<dyn CodeHost>) -> Self {
        Self { host }
    }

    /// Collect metrics as of now.
    ///
    /// # Errors
    ///
    /// Propagates the host's not-found, auth, rate-limit and network errors.
    pub async fn collect(&self, repo: &RepoRef) -> Result<RepoMetrics> {
        self.collect_at(repo, Utc::now()).await
    }

    /// Collect metrics with recency measured against `now`.
    pub async fn collect_at(&self, repo: &RepoRef, now: DateTime<Utc>) -> Result<RepoMetrics> {
        let info = self.host.repository(repo).await?;
        let last_commit = self.host.latest_commit_at(repo).await?;
        let last_commit_days_ago = last_commit.map(|at| (now - at).num_days().max(0) as u64);
        let issues = self.issue_stats(repo).await?;

        let mut risk_flags = Vec::new();
        if info.archived {
            risk_flags.push("repository is archived".to_string());
        }
        if info.disabled {
            risk_flags.push("repository is disabled".to_string());
        }

        info!(
            %repo,
            stars = info.stars,
            last_commit_days_ago,
            open_issues = issues.open,
            "collected repository metrics"
        );

        Ok(RepoMetrics {
            repo: repo.clone(),
            stars: info.stars,
            forks: info.forks,
            last_commit_days_ago,
            issues,
            risk_flags,
        })
    }

    async fn issue_stats(&self, repo: &RepoRef) -> Result<IssueStats> {
        let total = self
            .host
            .search_issue_count(&format!("repo:{repo} is:issue"))
            .await?;
        if total == 0 {
            debug!(%repo, "no issues, skipping open-issue search");
            return Ok(IssueStats::from_counts(0, 0));
        }
        let open = self
            .host
            .search_issue_count(&format!("repo:{repo} is:issue is:open"))
            .await?;
        Ok(IssueStats::from_counts(total, open))
    }

    /// Collect metrics and score them.
    pub async fn scan(&self, repo: &RepoRef) -> Result<ScanReport> {
        let metrics = self.collect(repo).await?;
        let scorecard = scorecard(&metrics);
        Ok(ScanReport { metrics, scorecard })
    }
}
