//! In-memory [`CodeHost`] for tests (no network).
//!
//! `FakeHost` serves a single repository from canned data and counts every
//! call per operation so tests can assert which external calls happened.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use repovet_core::{RepoRef, RepovetError, Result};

use crate::host::{CodeHost, RepoInfo};
use crate::tree::TreeEntry;

/// Operation names used by [`FakeHost::calls`].
pub mod ops {
    pub const REPOSITORY: &str = "repository";
    pub const LATEST_COMMIT: &str = "latest_commit_at";
    pub const SEARCH: &str = "search_issue_count";
    pub const BRANCH_HEAD: &str = "branch_head";
    pub const COMMIT_TREE: &str = "commit_tree";
    pub const TREE: &str = "tree";
    pub const FILE: &str = "file_content";
}

type ErrorFactory = fn() -> RepovetError;

/// Canned-data code host.
///
/// # Examples
///
/// ```
/// use repovet_core::RepoRef;
/// use repovet_github::fake::{ops, FakeHost};
/// use repovet_github::{CodeHost, TreeEntry};
///
/// let host = FakeHost::new()
///     .with_tree("main", vec![TreeEntry::blob("src/lib.rs")])
///     .with_file("src/lib.rs", "pub fn f() {}");
/// let repo = RepoRef::new("a", "b").unwrap();
///
/// let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// let text = rt.block_on(host.file_content(&repo, "src/lib.rs")).unwrap();
/// assert_eq!(text, "pub fn f() {}");
/// assert_eq!(host.calls(ops::FILE), 1);
/// ```
#[derive(Debug, Default)]
pub struct FakeHost {
    info: Option<RepoInfo>,
    latest_commit: Option<DateTime<Utc>>,
    empty_history_conflict: bool,
    issue_total: u64,
    issue_open: u64,
    branches: HashMap<String, String>,
    commits: HashMap<String, String>,
    trees: HashMap<String, Vec<TreeEntry>>,
    files: HashMap<String, String>,
    unreachable_files: HashSet<String>,
    failures: HashMap<&'static str, ErrorFactory>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FakeHost {
    /// Empty host: every lookup fails with not-found.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve repository metadata.
    pub fn with_repo(mut self, info: RepoInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Serve a latest-commit timestamp.
    pub fn with_latest_commit(mut self, at: DateTime<Utc>) -> Self {
        self.latest_commit = Some(at);
        self
    }

    /// Answer the commits endpoint with the API's empty-repository conflict.
    pub fn with_empty_history_conflict(mut self) -> Self {
        self.empty_history_conflict = true;
        self
    }

    /// Answer issue searches: queries containing `is:open` get `open`,
    /// others `total`.
    pub fn with_issue_counts(mut self, total: u64, open: u64) -> Self {
        self.issue_total = total;
        self.issue_open = open;
        self
    }

    /// Serve `entries` for `branch`, reachable both directly by branch name
    /// and through the ref → commit → tree traversal.
    pub fn with_tree(mut self, branch: &str, entries: Vec<TreeEntry>) -> Self {
        let commit = format!("commit-{branch}");
        let tree = format!("tree-{branch}");
        self.branches.insert(branch.to_string(), commit.clone());
        self.commits.insert(commit, tree.clone());
        self.trees.insert(tree, entries.clone());
        self.trees.insert(branch.to_string(), entries);
        self
    }

    /// Serve a file body.
    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    /// Make fetching `path` fail with a network error.
    pub fn with_unreachable_file(mut self, path: &str) -> Self {
        self.unreachable_files.insert(path.to_string());
        self
    }

    /// Make every call to `op` (see [`ops`]) fail with the produced error.
    pub fn failing(mut self, op: &'static str, error: ErrorFactory) -> Self {
        self.failures.insert(op, error);
        self
    }

    /// Number of calls made to `op`.
    pub fn calls(&self, op: &str) -> usize {
        self.counters().get(op).copied().unwrap_or(0)
    }

    /// Number of calls across all operations.
    pub fn total_calls(&self) -> usize {
        self.counters().values().sum()
    }

    // A panicking test thread must not hide the counts from the rest of the test.
    fn counters(&self) -> MutexGuard<'_, HashMap<&'static str, usize>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, op: &'static str) -> Result<()> {
        *self.counters().entry(op).or_insert(0) += 1;
        match self.failures.get(op) {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CodeHost for FakeHost {
    async fn repository(&self, repo: &RepoRef) -> Result<RepoInfo> {
        self.record(ops::REPOSITORY)?;
        self.info
            .clone()
            .ok_or_else(|| RepovetError::NotFound(format!("repository {repo}")))
    }

    async fn latest_commit_at(&self, _repo: &RepoRef) -> Result<Option<DateTime<Utc>>> {
        self.record(ops::LATEST_COMMIT)?;
        if self.empty_history_conflict {
            return Ok(None);
        }
        Ok(self.latest_commit)
    }

    async fn search_issue_count(&self, query: &str) -> Result<u64> {
        self.record(ops::SEARCH)?;
        if query.contains("is:open") {
            Ok(self.issue_open)
        } else {
            Ok(self.issue_total)
        }
    }

    async fn branch_head(&self, repo: &RepoRef, branch: &str) -> Result<String> {
        self.record(ops::BRANCH_HEAD)?;
        self.branches
            .get(branch)
            .cloned()
            .ok_or_else(|| RepovetError::NotFound(format!("branch {branch} of {repo}")))
    }

    async fn commit_tree(&self, repo: &RepoRef, commit_sha: &str) -> Result<String> {
        self.record(ops::COMMIT_TREE)?;
        self.commits
            .get(commit_sha)
            .cloned()
            .ok_or_else(|| RepovetError::NotFound(format!("commit {commit_sha} of {repo}")))
    }

    async fn tree(&self, repo: &RepoRef, tree_ish: &str) -> Result<Vec<TreeEntry>> {
        self.record(ops::TREE)?;
        self.trees
            .get(tree_ish)
            .cloned()
            .ok_or_else(|| RepovetError::NotFound(format!("tree {tree_ish} of {repo}")))
    }

    async fn file_content(&self, repo: &RepoRef, path: &str) -> Result<String> {
        self.record(ops::FILE)?;
        if self.unreachable_files.contains(path) {
            return Err(RepovetError::Network(format!(
                "connection reset while fetching {path}"
            )));
        }
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| RepovetError::NotFound(format!("file {path} of {repo}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoRef {
        RepoRef::new("octo", "demo").unwrap()
    }

    #[tokio::test]
    async fn traversal_reaches_branch_tree() {
        let host = FakeHost::new().with_tree("master", vec![TreeEntry::blob("a.rs")]);
        let head = host.branch_head(&repo(), "master").await.unwrap();
        let tree_sha = host.commit_tree(&repo(), &head).await.unwrap();
        let entries = host.tree(&repo(), &tree_sha).await.unwrap();
        assert_eq!(entries, vec![TreeEntry::blob("a.rs")]);
        assert!(host.tree(&repo(), "main").await.is_err());
        assert_eq!(host.calls(ops::TREE), 2);
        assert_eq!(host.total_calls(), 4);
    }

    #[tokio::test]
    async fn counters_survive_a_poisoned_lock() {
        let host = FakeHost::new().with_file("a.rs", "x");
        host.file_content(&repo(), "a.rs").await.unwrap();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = host.calls.lock().unwrap();
            panic!("test thread died holding the lock");
        }));
        assert!(host.calls.is_poisoned());

        host.file_content(&repo(), "a.rs").await.unwrap();
        assert_eq!(host.calls(ops::FILE), 2);
        assert_eq!(host.total_calls(), 2);
    }

    #[tokio::test]
    async fn configured_failure_is_returned_and_counted() {
        let host = FakeHost::new().failing(ops::REPOSITORY, || {
            RepovetError::Auth("bad credentials".into())
        });
        let err = host.repository(&repo()).await.unwrap_err();
        assert!(matches!(err, RepovetError::Auth(_)));
        assert_eq!(host.calls(ops::REPOSITORY), 1);
    }

    #[tokio::test]
    async fn unreachable_file_is_network_error() {
        let host = FakeHost::new()
            .with_file("x.py", "print()")
            .with_unreachable_file("x.py");
        let err = host.file_content(&repo(), "x.py").await.unwrap_err();
        assert!(matches!(err, RepovetError::Network(_)));
    }
}
