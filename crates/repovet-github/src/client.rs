use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use repovet_core::{retry_with_backoff, GithubConfig, RepoRef, RepovetError, Result, RetryPolicy};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tracing::debug;

use crate::host::{CodeHost, RepoInfo};
use crate::tree::TreeEntry;

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";
const API_VERSION: &str = "2022-11-28";

/// GitHub REST client implementing [`CodeHost`].
///
/// Every request is retried per the configured [`RetryPolicy`] when the
/// failure is transient (rate limit, 5xx, network).
///
/// # Examples
///
/// ```
/// use repovet_core::GithubConfig;
/// use repovet_github::GitHubClient;
///
/// let client = GitHubClient::new(&GithubConfig::default()).unwrap();
/// assert_eq!(client.api_url(), "https://api.github.com");
/// ```
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    retry: RetryPolicy,
}

impl GitHubClient {
    /// Build a client from configuration.
    ///
    /// The token is optional; without one the API applies its anonymous quota.
    ///
    /// # Errors
    ///
    /// Returns [`RepovetError::Config`] if the token or proxy are malformed or
    /// the HTTP client cannot be built.
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(API_VERSION),
        );
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| RepovetError::Config(format!("invalid GitHub token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("repovet/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs));
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| RepovetError::Config(format!("invalid GitHub proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| RepovetError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            retry: config.retry_policy(),
        })
    }

    /// API root this client talks to.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn repo_url(&self, repo: &RepoRef, rest: &str) -> String {
        format!("{}/repos/{}/{}{rest}", self.api_url, repo.owner, repo.name)
    }

    /// Contents URL for `path`, each segment percent-encoded.
    fn contents_url(&self, repo: &RepoRef, path: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.repo_url(repo, "/contents")).map_err(|e| {
            RepovetError::Config(format!("invalid GitHub API URL '{}': {e}", self.api_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                RepovetError::Config(format!("GitHub API URL '{}' cannot be a base", self.api_url))
            })?
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    async fn get_text(
        &self,
        url: &str,
        query: &[(&str, &str)],
        accept: &str,
        target: &str,
    ) -> Result<String> {
        retry_with_backoff(&self.retry, target, || async move {
            debug!(url, "GET");
            let response = self
                .http
                .get(url)
                .query(query)
                .header(ACCEPT, accept)
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            if status.is_success() {
                return response.text().await.map_err(transport_error);
            }
            let limits = RateLimitHeaders::from_headers(response.headers());
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(
                status.as_u16(),
                &body,
                &limits,
                Utc::now().timestamp(),
                target,
            ))
        })
        .await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        target: &str,
    ) -> Result<T> {
        let body = self.get_text(url, query, JSON_MEDIA_TYPE, target).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[derive(Deserialize)]
struct RepoResponse {
    stargazers_count: u64,
    forks_count: u64,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    disabled: bool,
}

#[derive(Deserialize)]
struct CommitListItem {
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    committer: Option<Signature>,
    author: Option<Signature>,
}

#[derive(Deserialize)]
struct Signature {
    date: DateTime<Utc>,
}

#[derive(Deserialize)]
struct SearchResponse {
    total_count: u64,
}

#[derive(Deserialize)]
struct RefResponse {
    object: ShaRef,
}

#[derive(Deserialize)]
struct GitCommitResponse {
    tree: ShaRef,
}

#[derive(Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[async_trait]
impl CodeHost for GitHubClient {
    async fn repository(&self, repo: &RepoRef) -> Result<RepoInfo> {
        let url = self.repo_url(repo, "");
        let raw: RepoResponse = self
            .get_json(&url, &[], &format!("repository {repo}"))
            .await?;
        Ok(RepoInfo {
            stars: raw.stargazers_count,
            forks: raw.forks_count,
            archived: raw.archived,
            disabled: raw.disabled,
        })
    }

    async fn latest_commit_at(&self, repo: &RepoRef) -> Result<Option<DateTime<Utc>>> {
        let url = self.repo_url(repo, "/commits");
        let result: Result<Vec<CommitListItem>> = self
            .get_json(&url, &[("per_page", "1")], &format!("commits of {repo}"))
            .await;
        match result {
            Ok(commits) => Ok(commits.into_iter().next().and_then(|c| {
                c.commit
                    .committer
                    .or(c.commit.author)
                    .map(|signature| signature.date)
            })),
            // 409 Conflict: "Git Repository is empty."
            Err(RepovetError::Http { status: 409, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn search_issue_count(&self, query: &str) -> Result<u64> {
        let url = format!("{}/search/issues", self.api_url);
        let raw: SearchResponse = self
            .get_json(
                &url,
                &[("q", query), ("per_page", "1")],
                &format!("issue search '{query}'"),
            )
            .await?;
        Ok(raw.total_count)
    }

    async fn branch_head(&self, repo: &RepoRef, branch: &str) -> Result<String> {
        let url = self.repo_url(repo, &format!("/git/ref/heads/{branch}"));
        let raw: RefResponse = self
            .get_json(&url, &[], &format!("branch {branch} of {repo}"))
            .await?;
        Ok(raw.object.sha)
    }

    async fn commit_tree(&self, repo: &RepoRef, commit_sha: &str) -> Result<String> {
        let url = self.repo_url(repo, &format!("/git/commits/{commit_sha}"));
        let raw: GitCommitResponse = self
            .get_json(&url, &[], &format!("commit {commit_sha} of {repo}"))
            .await?;
        Ok(raw.tree.sha)
    }

    async fn tree(&self, repo: &RepoRef, tree_ish: &str) -> Result<Vec<TreeEntry>> {
        let url = self.repo_url(repo, &format!("/git/trees/{tree_ish}"));
        let raw: TreeResponse = self
            .get_json(&url, &[("recursive", "1")], &format!("tree {tree_ish} of {repo}"))
            .await?;
        if raw.truncated {
            tracing::warn!(%repo, tree_ish, "tree listing truncated by the API");
        }
        Ok(raw.tree)
    }

    async fn file_content(&self, repo: &RepoRef, path: &str) -> Result<String> {
        let url = self.contents_url(repo, path)?;
        self.get_text(url.as_str(), &[], RAW_MEDIA_TYPE, &format!("file {path} of {repo}"))
            .await
    }
}

/// Rate-limit related response headers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// `x-ratelimit-remaining`.
    pub remaining: Option<u64>,
    /// `x-ratelimit-reset`, seconds since the epoch.
    pub reset_epoch: Option<i64>,
    /// `retry-after`, seconds.
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    fn from_headers(headers: &HeaderMap) -> Self {
        fn parse<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        }
        Self {
            remaining: parse(headers, "x-ratelimit-remaining"),
            reset_epoch: parse(headers, "x-ratelimit-reset"),
            retry_after: parse(headers, "retry-after"),
        }
    }
}

/// Map a non-success response to the error taxonomy.
///
/// 403 and 429 count as rate limiting when the quota header reads zero, a
/// `Retry-After` header is present, or the body mentions a rate limit; other
/// 403s are auth failures.
///
/// # Examples
///
/// ```
/// use repovet_core::RepovetError;
/// use repovet_github::client::{classify_status, RateLimitHeaders};
///
/// let limits = RateLimitHeaders { remaining: Some(0), reset_epoch: Some(1_060), retry_after: None };
/// let err = classify_status(403, "API rate limit exceeded", &limits, 1_000, "repository a/b");
/// assert_eq!(err.retry_after_secs(), Some(60));
///
/// let err = classify_status(404, "Not Found", &RateLimitHeaders::default(), 0, "repository a/b");
/// assert!(matches!(err, RepovetError::NotFound(_)));
/// ```
pub fn classify_status(
    status: u16,
    body: &str,
    limits: &RateLimitHeaders,
    now_epoch: i64,
    target: &str,
) -> RepovetError {
    let message = summarize_body(body);
    let throttled = (status == 403 || status == 429)
        && (limits.remaining == Some(0)
            || limits.retry_after.is_some()
            || body.to_lowercase().contains("rate limit"));

    if throttled {
        let retry_after_secs = limits.retry_after.or_else(|| {
            limits
                .reset_epoch
                .map(|reset| u64::try_from(reset - now_epoch).unwrap_or(0))
        });
        return RepovetError::RateLimited {
            message: format!("GitHub API rate limit hit while fetching {target}"),
            retry_after_secs,
        };
    }

    match status {
        401 => RepovetError::Auth(format!("GitHub rejected the token ({message})")),
        403 => RepovetError::Auth(format!("access to {target} is forbidden ({message})")),
        404 => RepovetError::NotFound(target.to_string()),
        429 => RepovetError::RateLimited {
            message: format!("GitHub API throttled {target}"),
            retry_after_secs: None,
        },
        _ => RepovetError::Http { status, message },
    }
}

fn summarize_body(body: &str) -> String {
    #[derive(Deserialize)]
    struct ApiMessage {
        message: String,
    }
    match serde_json::from_str::<ApiMessage>(body) {
        Ok(api) => api.message,
        Err(_) => repovet_core::truncate_chars(body.trim(), 200).to_string(),
    }
}

fn transport_error(err: reqwest::Error) -> RepovetError {
    RepovetError::Network(err.to_string())
}
