//! Deterministic health scoring.
//!
//! Everything here is a pure function of [`RepoMetrics`]; no I/O.

use repovet_core::{HealthScorecard, RepoMetrics, ScoreBreakdown, Verdict};

const ACTIVITY_WEIGHT: f64 = 0.3;
const ISSUE_WEIGHT: f64 = 0.3;
const POPULARITY_WEIGHT: f64 = 0.2;
const RISK_WEIGHT: f64 = 0.2;

/// Stars at which popularity saturates.
const POPULARITY_CEILING: f64 = 10_000.0;

/// Issue score used when the repository has no issues.
const NEUTRAL_ISSUE_SCORE: f64 = 0.5;

const OPEN_ISSUES_LARGE: u64 = 1000;
const OPEN_ISSUES_MODERATE: u64 = 500;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn activity_score(last_commit_days_ago: Option<u64>) -> f64 {
    match last_commit_days_ago {
        Some(d) if d <= 7 => 1.0,
        Some(d) if d <= 30 => 0.7,
        Some(d) if d <= 90 => 0.4,
        // Unknown recency scores like a stale repository.
        _ => 0.1,
    }
}

/// Compute the weighted total and its components.
///
/// Each component is clamped to `[0, 1]` and reported rounded to 2 decimals;
/// the total is computed from the unrounded components, then clamped and
/// rounded.
///
/// # Examples
///
/// ```
/// use repovet_core::{IssueStats, RepoMetrics, RepoRef};
/// use repovet_scanner::compute_health_score;
///
/// let metrics = RepoMetrics {
///     repo: RepoRef::new("a", "b").unwrap(),
///     stars: 20_000,
///     forks: 100,
///     last_commit_days_ago: Some(2),
///     issues: IssueStats::from_counts(100, 10),
///     risk_flags: vec![],
/// };
/// let (total, breakdown) = compute_health_score(&metrics);
/// assert_eq!(total, 0.97);
/// assert_eq!(breakdown.issue_health, 0.9);
/// ```
pub fn compute_health_score(metrics: &RepoMetrics) -> (f64, ScoreBreakdown) {
    let activity = activity_score(metrics.last_commit_days_ago).clamp(0.0, 1.0);
    let issue_health = metrics
        .issues
        .resolution_rate
        .unwrap_or(NEUTRAL_ISSUE_SCORE)
        .clamp(0.0, 1.0);
    let popularity = (metrics.stars as f64 / POPULARITY_CEILING).clamp(0.0, 1.0);
    let risk = (1.0 - 0.1 * metrics.risk_flags.len() as f64).clamp(0.0, 1.0);

    let total = activity * ACTIVITY_WEIGHT
        + issue_health * ISSUE_WEIGHT
        + popularity * POPULARITY_WEIGHT
        + risk * RISK_WEIGHT;

    (
        round2(total.clamp(0.0, 1.0)),
        ScoreBreakdown {
            activity: round2(activity),
            issue_health: round2(issue_health),
            popularity: round2(popularity),
            risk: round2(risk),
        },
    )
}

/// Human-readable strengths and concerns, in a fixed order: recency, issue
/// resolution, open-issue volume, then one entry per risk flag.
pub fn derive_signals(metrics: &RepoMetrics) -> (Vec<String>, Vec<String>) {
    let mut positives = Vec::new();
    let mut negatives = Vec::new();

    match metrics.last_commit_days_ago {
        Some(d) if d <= 7 => positives.push("Recent commits within 7 days".to_string()),
        Some(d) if d <= 30 => positives.push("Commits within last 30 days".to_string()),
        Some(d) => negatives.push(format!("No recent commits (last commit {d} days ago)")),
        None => {}
    }

    let issues = &metrics.issues;
    if let Some(rate) = issues.resolution_rate {
        let detail = format!(
            "({:.0}%) ({} closed / {} total)",
            rate * 100.0,
            issues.closed,
            issues.total()
        );
        if rate >= 0.7 {
            positives.push(format!("High issue resolution rate {detail}"));
        } else {
            negatives.push(format!("Low issue resolution rate {detail}"));
        }
    }

    if issues.open > OPEN_ISSUES_LARGE {
        negatives.push(format!("Large number of open issues ({})", issues.open));
    } else if issues.open > OPEN_ISSUES_MODERATE {
        negatives.push(format!("Moderate number of open issues ({})", issues.open));
    } else {
        positives.push(format!("Low number of open issues ({})", issues.open));
    }

    negatives.extend(metrics.risk_flags.iter().map(|flag| format!("Risk: {flag}")));

    (positives, negatives)
}

/// Full scorecard for `metrics`.
pub fn scorecard(metrics: &RepoMetrics) -> HealthScorecard {
    let (total_score, breakdown) = compute_health_score(metrics);
    let (positive_signals, negative_signals) = derive_signals(metrics);
    HealthScorecard {
        total_score,
        breakdown,
        verdict: Verdict::from_score(total_score),
        positive_signals,
        negative_signals,
    }
}
