//! Audit planning: choose the core files (model-assisted) and a random
//! spot-check sample (uniform, seeded when configured).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use repovet_core::{
    truncate_chars, AuditPlan, PlanMetadata, RepoRef, RepovetConfig, RepovetError, Result,
};
use repovet_github::{render_tree, CodeHost, TreeEntry};
use tera::Context;
use tracing::{debug, info, warn};

use crate::llm::{InvokeOptions, ModelInvoker};
use crate::prompt::{roles, PromptLibrary};

const CORE_EXTENSIONS: &[&str] = &[
    "py", "pyi", "cpp", "cc", "c", "h", "hpp", "rs", "java", "go", "ts", "scala", "jl", "m", "r",
    "cu",
];

const GENERATED_OR_DATA_EXTENSIONS: &[&str] = &[
    "json", "csv", "tsv", "txt", "md", "yaml", "yml", "js", "html", "css", "pdf", "png", "jpg",
];

const CORE_EXCLUDED_KEYWORDS: &[&str] = &[
    "result",
    "results",
    "output",
    "outputs",
    "log",
    "logs",
    "plot",
    "figure",
    "data",
    "dataset",
    "checkpoint",
    "ckpt",
    "weight",
    "weights",
    "experiment",
    "analysis",
    "benchmark",
    "report",
];

const RANDOM_EXTENSIONS: &[&str] = &[
    "py", "cpp", "cc", "c", "h", "hpp", "rs", "go", "java", "ts", "js", "scala", "kt", "swift",
    "jl",
];

const RANDOM_EXCLUDED_KEYWORDS: &[&str] = &[
    "data",
    "dataset",
    "result",
    "results",
    "output",
    "outputs",
    "log",
    "logs",
    "figure",
    "figures",
    "plot",
    "cache",
    "tmp",
    "temp",
    "checkpoint",
    "node_modules",
    "dist",
    "build",
    "__pycache__",
    ".git",
    ".github",
];

const README_CANDIDATES: &[&str] = &["README.md", "readme.md", "README.MD"];

const DEFAULT_BRANCHES: &[&str] = &["main", "master"];

/// Upper bound on core-track files, whatever the configuration asks for.
pub const MAX_CORE_FILES: usize = 3;

/// Upper bound on random-track files, whatever the configuration asks for.
pub const MAX_RANDOM_FILES: usize = 2;

fn extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Whether any path segment, or the file name without its extension, equals
/// one of `keywords` (case-insensitive).
///
/// Matching is by whole segment: `data/train.py` and `src/data.py` match
/// `data`, `src/data_loader.py` does not.
///
/// # Examples
///
/// ```
/// use repovet_review::planner::has_keyword_segment;
///
/// assert!(has_keyword_segment("data/train.py", &["data"]));
/// assert!(has_keyword_segment("src/benchmark.rs", &["benchmark"]));
/// assert!(!has_keyword_segment("src/data_loader.py", &["data"]));
/// ```
pub fn has_keyword_segment(path: &str, keywords: &[&str]) -> bool {
    let lower = path.to_lowercase();
    let segments: Vec<&str> = lower.split('/').filter(|s| !s.is_empty()).collect();
    let stem = segments
        .last()
        .and_then(|file| file.rsplit_once('.').map(|(stem, _)| stem))
        .filter(|stem| !stem.is_empty());
    segments
        .iter()
        .copied()
        .chain(stem)
        .any(|segment| keywords.contains(&segment))
}

/// Whether a blob path qualifies for the core-selection tree.
pub fn is_core_candidate(path: &str) -> bool {
    let Some(ext) = extension(path) else {
        return false;
    };
    if GENERATED_OR_DATA_EXTENSIONS.contains(&ext.as_str()) {
        return false;
    }
    CORE_EXTENSIONS.contains(&ext.as_str()) && !has_keyword_segment(path, CORE_EXCLUDED_KEYWORDS)
}

/// Whether a tree entry qualifies for the random spot-check pool.
pub fn is_random_candidate(entry: &TreeEntry) -> bool {
    if !entry.is_blob() {
        return false;
    }
    match extension(&entry.path) {
        Some(ext) if RANDOM_EXTENSIONS.contains(&ext.as_str()) => {
            !has_keyword_segment(&entry.path, RANDOM_EXCLUDED_KEYWORDS)
        }
        _ => false,
    }
}

/// Keep directories and core-candidate blobs.
pub fn filter_core_tree(entries: &[TreeEntry]) -> Vec<TreeEntry> {
    entries
        .iter()
        .filter(|e| !e.is_blob() || is_core_candidate(&e.path))
        .cloned()
        .collect()
}

/// Extract file paths from the core-selection response.
///
/// Grammar, per line after trimming: `-` marker, any label text, the first
/// `:`, then the path. Surrounding backticks are removed. A path must contain
/// `/` or `.`. Lines that don't fit are skipped, duplicates are dropped, and
/// at most `limit` paths are returned in response order.
///
/// # Examples
///
/// ```
/// use repovet_review::planner::parse_core_paths;
///
/// let response = "Here you go:\n- Entry point: src/main.rs\n- Engine: `src/engine.rs`\n* nope: a.rs\n- Misc: README";
/// assert_eq!(parse_core_paths(response, 3), vec!["src/main.rs", "src/engine.rs"]);
/// ```
pub fn parse_core_paths(response: &str, limit: usize) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for line in response.lines() {
        if paths.len() >= limit {
            break;
        }
        let Some(rest) = line.trim().strip_prefix('-') else {
            continue;
        };
        let Some((_, candidate)) = rest.split_once(':') else {
            continue;
        };
        let path = candidate.trim().trim_matches('`').trim();
        if path.is_empty() || !(path.contains('/') || path.contains('.')) {
            continue;
        }
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
    }
    paths
}

/// Sample `n` distinct paths uniformly without replacement.
///
/// Returns every candidate (in sampled order) when there are at most `n`.
pub fn sample_paths<R: Rng + ?Sized>(candidates: &[String], n: usize, rng: &mut R) -> Vec<String> {
    candidates.choose_multiple(rng, n).cloned().collect()
}

fn bounded_cap(name: &str, requested: usize, limit: usize) -> usize {
    if requested > limit {
        warn!(setting = name, requested, limit, "track cap above limit, clamping");
    }
    requested.min(limit)
}

/// Produces an [`AuditPlan`] for a repository.
pub struct AuditPlanner {
    host: Arc<dyn CodeHost>,
    model: Arc<dyn ModelInvoker>,
    prompts: Arc<PromptLibrary>,
    strategist_model: String,
    branch: Option<String>,
    max_core_files: usize,
    max_random_files: usize,
    readme_prompt_chars: usize,
    readme_excerpt_chars: usize,
    rng: Mutex<StdRng>,
}

impl AuditPlanner {
    /// Create a planner. The random sampler is seeded from
    /// `config.audit.seed` when set, otherwise from OS entropy.
    pub fn new(
        host: Arc<dyn CodeHost>,
        model: Arc<dyn ModelInvoker>,
        prompts: Arc<PromptLibrary>,
        config: &RepovetConfig,
    ) -> Self {
        let rng = match config.audit.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            host,
            model,
            prompts,
            strategist_model: config.models.strategist.clone(),
            branch: config.audit.branch.clone(),
            max_core_files: bounded_cap(
                "max_core_files",
                config.audit.max_core_files,
                MAX_CORE_FILES,
            ),
            max_random_files: bounded_cap(
                "max_random_files",
                config.audit.max_random_files,
                MAX_RANDOM_FILES,
            ),
            readme_prompt_chars: config.audit.readme_prompt_chars,
            readme_excerpt_chars: config.audit.readme_excerpt_chars,
            rng: Mutex::new(rng),
        }
    }

    /// Build the plan for `repo_url`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid URL, when no candidate branch has a tree, or when
    /// the core-selection model call fails terminally. A missing README is
    /// not an error.
    pub async fn plan(&self, repo_url: &str) -> Result<AuditPlan> {
        let repo = RepoRef::parse(repo_url)?;
        let (branch, entries) = self.fetch_tree(&repo).await?;
        let readme = self.fetch_readme(&repo).await;
        info!(%repo, branch = %branch, entries = entries.len(), readme_chars = readme.len(), "fetched repository overview");

        let core_tracks = self.select_core_files(&entries, &readme).await?;
        let random_tracks = self.select_random_files(&repo, &branch, &core_tracks).await?;
        info!(%repo, core = ?core_tracks, random = ?random_tracks, "audit plan ready");

        Ok(AuditPlan {
            repo_url: repo_url.to_string(),
            core_tracks,
            random_tracks,
            metadata: PlanMetadata {
                tree_snapshot: render_tree(&entries),
                readme_excerpt: truncate_chars(&readme, self.readme_excerpt_chars).to_string(),
            },
        })
    }

    fn branches(&self) -> Vec<&str> {
        match &self.branch {
            Some(branch) => vec![branch.as_str()],
            None => DEFAULT_BRANCHES.to_vec(),
        }
    }

    async fn fetch_tree(&self, repo: &RepoRef) -> Result<(String, Vec<TreeEntry>)> {
        let mut last_err = None;
        for branch in self.branches() {
            match self.host.tree(repo, branch).await {
                Ok(entries) => return Ok((branch.to_string(), entries)),
                Err(RepovetError::NotFound(what)) => {
                    debug!(%repo, branch, "branch tree not found");
                    last_err = Some(RepovetError::NotFound(what));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| RepovetError::NotFound(format!("tree of {repo}"))))
    }

    async fn fetch_readme(&self, repo: &RepoRef) -> String {
        for candidate in README_CANDIDATES {
            match self.host.file_content(repo, candidate).await {
                Ok(text) => return text,
                Err(e) => debug!(%repo, candidate, error = %e, "README candidate unavailable"),
            }
        }
        String::new()
    }

    /// Ask the strategist model for the core files of a filtered tree.
    ///
    /// # Errors
    ///
    /// Template rendering and terminal model failures propagate. A response
    /// without any parseable line yields an empty list.
    pub async fn select_core_files(
        &self,
        entries: &[TreeEntry],
        readme: &str,
    ) -> Result<Vec<String>> {
        let filtered = filter_core_tree(entries);
        let mut ctx = Context::new();
        ctx.insert("tree_structure", &render_tree(&filtered));
        ctx.insert(
            "readme_content",
            truncate_chars(readme, self.readme_prompt_chars),
        );
        let (system, user) = self.prompts.render(roles::CORE_FILE_SELECTOR, &ctx)?;

        let response = self
            .model
            .invoke(&self.strategist_model, &system, &user, &InvokeOptions::default())
            .await?;
        let paths = parse_core_paths(&response, self.max_core_files);
        if paths.len() < self.max_core_files {
            warn!(
                found = paths.len(),
                wanted = self.max_core_files,
                "strategist returned fewer core files than requested"
            );
        }
        Ok(paths)
    }

    /// Sample spot-check files from the branch's full tree, excluding `exclude`.
    pub async fn select_random_files(
        &self,
        repo: &RepoRef,
        branch: &str,
        exclude: &[String],
    ) -> Result<Vec<String>> {
        let head = self.host.branch_head(repo, branch).await?;
        let tree_sha = self.host.commit_tree(repo, &head).await?;
        let entries = self.host.tree(repo, &tree_sha).await?;

        let excluded: HashSet<&str> = exclude.iter().map(String::as_str).collect();
        let candidates: Vec<String> = entries
            .iter()
            .filter(|e| is_random_candidate(e))
            .filter(|e| !excluded.contains(e.path.as_str()))
            .map(|e| e.path.clone())
            .collect();
        debug!(%repo, candidates = candidates.len(), "random-track candidates");

        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(sample_paths(&candidates, self.max_random_files, &mut *rng))
    }
}
