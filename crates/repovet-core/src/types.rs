use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RepovetError;

const GITHUB_PREFIXES: [&str; 2] = ["https://github.com/", "http://github.com/"];

/// Owner/name pair identifying a hosted repository.
///
/// Both fields are non-empty; construct through [`RepoRef::parse`] or
/// [`RepoRef::new`].
///
/// # Examples
///
/// ```
/// use repovet_core::RepoRef;
///
/// let repo = RepoRef::parse("https://github.com/rust-lang/cargo/").unwrap();
/// assert_eq!(repo.owner, "rust-lang");
/// assert_eq!(repo.name, "cargo");
/// assert_eq!(repo.to_string(), "rust-lang/cargo");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    /// Account or organisation that owns the repository.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepoRef {
    /// Build a reference from already-split parts.
    ///
    /// # Errors
    ///
    /// Returns [`RepovetError::InvalidUrl`] if either part is empty.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self, RepovetError> {
        let owner = owner.into();
        let name = name.into();
        if owner.is_empty() || name.is_empty() {
            return Err(RepovetError::InvalidUrl(format!(
                "owner and name must be non-empty (got '{owner}/{name}')"
            )));
        }
        Ok(Self { owner, name })
    }

    /// Parse a GitHub repository URL.
    ///
    /// Accepts `http(s)://github.com/<owner>/<name>` with an optional trailing
    /// slash or `.git` suffix. Extra path segments (such as `/tree/main`) are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RepovetError::InvalidUrl`] for other hosts or missing segments.
    ///
    /// # Examples
    ///
    /// ```
    /// use repovet_core::RepoRef;
    ///
    /// assert!(RepoRef::parse("https://gitlab.com/a/b").is_err());
    /// assert!(RepoRef::parse("https://github.com/only-owner").is_err());
    /// let r = RepoRef::parse("https://github.com/a/b.git").unwrap();
    /// assert_eq!(r.name, "b");
    /// ```
    pub fn parse(url: &str) -> Result<Self, RepovetError> {
        let trimmed = url.trim().trim_end_matches('/');
        let Some(rest) = GITHUB_PREFIXES
            .iter()
            .find_map(|prefix| trimmed.strip_prefix(prefix))
        else {
            return Err(RepovetError::InvalidUrl(format!(
                "only GitHub repository URLs are supported (e.g. https://github.com/owner/repo), got '{url}'"
            )));
        };

        let mut segments = rest.split('/');
        let owner = segments.next().unwrap_or_default();
        let name = segments.next().unwrap_or_default();
        let name = name.strip_suffix(".git").unwrap_or(name);
        if owner.is_empty() || name.is_empty() {
            return Err(RepovetError::InvalidUrl(format!(
                "failed to parse owner/repo from '{url}'"
            )));
        }
        Self::new(owner, name)
    }

    /// Canonical `https://github.com/owner/name` form.
    pub fn html_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Issue counts for a repository.
///
/// `resolution_rate` is `closed / (open + closed)` and is `None` when the
/// repository has no issues at all. Substituting a neutral value is the
/// scorer's job, not this type's.
///
/// # Examples
///
/// ```
/// use repovet_core::IssueStats;
///
/// let stats = IssueStats::from_counts(100, 10);
/// assert_eq!(stats.closed, 90);
/// assert_eq!(stats.resolution_rate, Some(0.9));
///
/// let empty = IssueStats::from_counts(0, 0);
/// assert_eq!(empty.resolution_rate, None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueStats {
    /// Currently open issues.
    pub open: u64,
    /// Closed issues.
    pub closed: u64,
    /// Fraction of issues closed, absent when there are none.
    pub resolution_rate: Option<f64>,
}

impl IssueStats {
    /// Derive stats from a total issue count and an open issue count.
    ///
    /// An open count larger than the total (the two searches are not atomic)
    /// is clamped to the total.
    pub fn from_counts(total: u64, open: u64) -> Self {
        let open = open.min(total);
        let closed = total - open;
        let resolution_rate = if total == 0 {
            None
        } else {
            Some(closed as f64 / total as f64)
        };
        Self {
            open,
            closed,
            resolution_rate,
        }
    }

    /// Total issues, open and closed.
    pub fn total(&self) -> u64 {
        self.open + self.closed
    }
}

/// Repository vitality metrics gathered by the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMetrics {
    /// Repository the metrics describe.
    pub repo: RepoRef,
    /// Stargazer count.
    pub stars: u64,
    /// Fork count.
    pub forks: u64,
    /// Whole days since the latest commit, absent for an empty history.
    pub last_commit_days_ago: Option<u64>,
    /// Issue counts.
    pub issues: IssueStats,
    /// Risk findings derived from repository metadata.
    #[serde(default)]
    pub risk_flags: Vec<String>,
}

/// Overall health classification.
///
/// # Examples
///
/// ```
/// use repovet_core::Verdict;
///
/// assert_eq!(Verdict::from_score(0.8), Verdict::Healthy);
/// assert_eq!(Verdict::from_score(0.5), Verdict::ModerateRisk);
/// assert_eq!(Verdict::from_score(0.4999), Verdict::HighRisk);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Score 0.8 and above.
    Healthy,
    /// Score from 0.5 up to 0.8.
    ModerateRisk,
    /// Score below 0.5.
    HighRisk,
}

impl Verdict {
    /// Map a total score to a verdict. Lower bounds are inclusive.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Verdict::Healthy
        } else if score >= 0.5 {
            Verdict::ModerateRisk
        } else {
            Verdict::HighRisk
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Healthy => write!(f, "Healthy & Actively Maintained"),
            Verdict::ModerateRisk => write!(f, "Moderate Risk"),
            Verdict::HighRisk => write!(f, "High Maintenance Risk"),
        }
    }
}

/// The four weighted sub-scores, each in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    /// Commit recency.
    pub activity: f64,
    /// Issue resolution.
    pub issue_health: f64,
    /// Stars relative to a 10k ceiling.
    pub popularity: f64,
    /// Penalty for risk flags.
    pub risk: f64,
}

/// Deterministic health summary of a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthScorecard {
    /// Weighted total in `[0, 1]`, rounded to 2 decimals.
    pub total_score: f64,
    /// Individual components.
    pub breakdown: ScoreBreakdown,
    /// Classification of `total_score`.
    pub verdict: Verdict,
    /// Human-readable strengths, in derivation order.
    pub positive_signals: Vec<String>,
    /// Human-readable concerns, in derivation order.
    pub negative_signals: Vec<String>,
}

/// Which audit track a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    /// Architecturally significant files chosen with model assistance.
    Core,
    /// Uniformly sampled spot-check files.
    Random,
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Track::Core => write!(f, "core"),
            Track::Random => write!(f, "random"),
        }
    }
}

/// Context captured while planning, kept for the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    /// Indented rendering of the repository tree.
    pub tree_snapshot: String,
    /// Leading portion of the README, empty when none was found.
    pub readme_excerpt: String,
}

/// Which files to audit, per track.
///
/// # Examples
///
/// ```
/// use repovet_core::{AuditPlan, PlanMetadata};
///
/// let plan = AuditPlan {
///     repo_url: "https://github.com/a/b".into(),
///     core_tracks: vec!["src/lib.rs".into()],
///     random_tracks: vec![],
///     metadata: PlanMetadata::default(),
/// };
/// assert_eq!(plan.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPlan {
    /// Repository the plan targets.
    pub repo_url: String,
    /// Core file paths, at most three.
    pub core_tracks: Vec<String>,
    /// Random sample paths, at most two, disjoint from `core_tracks`.
    pub random_tracks: Vec<String>,
    /// Planning context.
    pub metadata: PlanMetadata,
}

impl AuditPlan {
    /// Number of files across both tracks.
    pub fn len(&self) -> usize {
        self.core_tracks.len() + self.random_tracks.len()
    }

    /// Whether neither track has any file.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Model review of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAuditResult {
    /// Repository-relative path.
    pub path: String,
    /// Review text, or a description of why the review could not be produced.
    pub report: String,
}

/// Per-track audit results in plan order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditBundle {
    /// Results for `AuditPlan::core_tracks`, same order.
    pub core: Vec<FileAuditResult>,
    /// Results for `AuditPlan::random_tracks`, same order.
    pub random: Vec<FileAuditResult>,
}

/// The narrative due-diligence report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    /// Report text (markdown when produced by the model).
    pub body: String,
    /// `true` when synthesis failed and `body` describes the failure.
    #[serde(default)]
    pub degraded: bool,
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use repovet_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
///
/// # Examples
///
/// ```
/// use repovet_core::truncate_chars;
///
/// assert_eq!(truncate_chars("héllo", 2), "hé");
/// assert_eq!(truncate_chars("abc", 10), "abc");
/// ```
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_http_and_trailing_parts() {
        let r = RepoRef::parse("http://github.com/owner/repo/").unwrap();
        assert_eq!(r, RepoRef::new("owner", "repo").unwrap());

        let r = RepoRef::parse("https://github.com/owner/repo/tree/main/src").unwrap();
        assert_eq!(r.name, "repo");
        assert_eq!(r.html_url(), "https://github.com/owner/repo");
    }

    #[test]
    fn parse_rejects_bad_shapes() {
        assert!(RepoRef::parse("github.com/owner/repo").is_err());
        assert!(RepoRef::parse("https://github.com/").is_err());
        assert!(RepoRef::parse("https://github.com//repo").is_err());
        assert!(matches!(
            RepoRef::parse("ftp://github.com/a/b"),
            Err(RepovetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn new_rejects_empty_parts() {
        assert!(RepoRef::new("", "x").is_err());
        assert!(RepoRef::new("x", "").is_err());
    }

    #[test]
    fn issue_stats_exact_rate() {
        let stats = IssueStats::from_counts(3, 1);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.closed, 2);
        assert_eq!(stats.resolution_rate, Some(2.0 / 3.0));
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn issue_stats_clamps_open_to_total() {
        let stats = IssueStats::from_counts(5, 9);
        assert_eq!(stats.open, 5);
        assert_eq!(stats.closed, 0);
        assert_eq!(stats.resolution_rate, Some(0.0));
    }

    #[test]
    fn issue_stats_absent_rate_serializes_as_null() {
        let json = serde_json::to_value(IssueStats::from_counts(0, 0)).unwrap();
        assert!(json["resolutionRate"].is_null());
        assert_eq!(json["open"], 0);
    }

    #[test]
    fn verdict_boundaries_inclusive() {
        assert_eq!(Verdict::from_score(1.0), Verdict::Healthy);
        assert_eq!(Verdict::from_score(0.8), Verdict::Healthy);
        assert_eq!(Verdict::from_score(0.79), Verdict::ModerateRisk);
        assert_eq!(Verdict::from_score(0.5), Verdict::ModerateRisk);
        assert_eq!(Verdict::from_score(0.4999), Verdict::HighRisk);
        assert_eq!(Verdict::from_score(0.0), Verdict::HighRisk);
    }

    #[test]
    fn verdict_labels() {
        assert_eq!(
            Verdict::Healthy.to_string(),
            "Healthy & Actively Maintained"
        );
        assert_eq!(Verdict::ModerateRisk.to_string(), "Moderate Risk");
        assert_eq!(Verdict::HighRisk.to_string(), "High Maintenance Risk");
    }

    #[test]
    fn metrics_without_risk_flags_deserialize() {
        let json = r#"{
            "repo": {"owner": "a", "name": "b"},
            "stars": 1, "forks": 2, "lastCommitDaysAgo": null,
            "issues": {"open": 0, "closed": 0, "resolutionRate": null}
        }"#;
        let metrics: RepoMetrics = serde_json::from_str(json).unwrap();
        assert!(metrics.risk_flags.is_empty());
        assert_eq!(metrics.last_commit_days_ago, None);
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "markdown".parse::<OutputFormat>().unwrap(),
            OutputFormat::Markdown
        );
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn truncate_handles_multibyte() {
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
        assert_eq!(truncate_chars("", 3), "");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
