use async_trait::async_trait;
use chrono::{DateTime, Utc};
use repovet_core::{RepoRef, Result};
use serde::{Deserialize, Serialize};

use crate::tree::TreeEntry;

/// Repository metadata needed for health scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    /// Stargazer count.
    pub stars: u64,
    /// Fork count.
    pub forks: u64,
    /// Read-only archived repository.
    pub archived: bool,
    /// Repository disabled by the host.
    pub disabled: bool,
}

/// Operations the pipeline needs from a code-hosting service.
///
/// Implementations retry transient failures themselves; callers only see
/// terminal errors.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Stars, forks and status flags.
    async fn repository(&self, repo: &RepoRef) -> Result<RepoInfo>;

    /// Timestamp of the newest commit on the default branch.
    ///
    /// `Ok(None)` when the history is empty.
    async fn latest_commit_at(&self, repo: &RepoRef) -> Result<Option<DateTime<Utc>>>;

    /// Number of results for an issue search query such as
    /// `repo:owner/name is:issue is:open`.
    async fn search_issue_count(&self, query: &str) -> Result<u64>;

    /// Commit SHA a branch points at.
    async fn branch_head(&self, repo: &RepoRef, branch: &str) -> Result<String>;

    /// Root tree SHA of a commit.
    async fn commit_tree(&self, repo: &RepoRef, commit_sha: &str) -> Result<String>;

    /// Flat recursive listing of a tree, addressed by SHA or branch name.
    async fn tree(&self, repo: &RepoRef, tree_ish: &str) -> Result<Vec<TreeEntry>>;

    /// Raw UTF-8 content of a file on the default branch.
    async fn file_content(&self, repo: &RepoRef, path: &str) -> Result<String>;
}
