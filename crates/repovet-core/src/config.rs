use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RepovetError;
use crate::retry::RetryPolicy;

/// Top-level configuration loaded from `.repovet.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
/// Only the binary consults the environment; library components receive a
/// fully resolved value.
///
/// # Examples
///
/// ```
/// use repovet_core::RepovetConfig;
///
/// let config = RepovetConfig::default();
/// assert_eq!(config.audit.concurrency, 5);
/// assert_eq!(config.models.synthesizer, "deepseek-v3");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepovetConfig {
    /// Code-hosting API settings.
    #[serde(default)]
    pub github: GithubConfig,
    /// Generative-model endpoint settings and model registry.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Which registry alias each pipeline role uses.
    #[serde(default)]
    pub models: ModelRoles,
    /// Planner and auditor tuning.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Run-state and output locations.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Prompt overrides.
    #[serde(default)]
    pub prompts: PromptsConfig,
}

impl RepovetConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RepovetError::Io`] if the file cannot be read, or
    /// [`RepovetError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use repovet_core::RepovetConfig;
    /// use std::path::Path;
    ///
    /// let config = RepovetConfig::from_file(Path::new(".repovet.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, RepovetError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// Registry entries given in the file are merged over the built-in
    /// defaults, so a file only needs to list the aliases it changes.
    ///
    /// # Errors
    ///
    /// Returns [`RepovetError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use repovet_core::RepovetConfig;
    ///
    /// let toml = r#"
    /// [audit]
    /// concurrency = 2
    ///
    /// [llm.models.local]
    /// model = "llama3"
    /// base_url = "http://localhost:11434/v1"
    /// "#;
    /// let config = RepovetConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.audit.concurrency, 2);
    /// assert_eq!(config.llm.resolve("local").model, "llama3");
    /// assert_eq!(config.llm.resolve("qwen-plus").model, "qwen-plus-2025-12-01");
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, RepovetError> {
        let mut config: Self = toml::from_str(content)?;
        for (alias, spec) in default_model_registry() {
            config.llm.models.entry(alias).or_insert(spec);
        }
        Ok(config)
    }
}

/// Code-hosting API configuration.
///
/// # Examples
///
/// ```
/// use repovet_core::GithubConfig;
///
/// let config = GithubConfig::default();
/// assert_eq!(config.api_url, "https://api.github.com");
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// REST API root.
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    /// Personal access token. Unauthenticated access is heavily rate limited.
    pub token: Option<String>,
    /// Optional HTTP(S) proxy URL for all API traffic.
    pub proxy: Option<String>,
    /// Per-request timeout in seconds (default: 10).
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
    /// Attempts per request before giving up (default: 3).
    #[serde(default = "default_github_retries")]
    pub max_retries: u32,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}

fn default_github_timeout() -> u64 {
    10
}

fn default_github_retries() -> u32 {
    3
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            token: None,
            proxy: None,
            timeout_secs: default_github_timeout(),
            max_retries: default_github_retries(),
        }
    }
}

impl GithubConfig {
    /// Backoff schedule for API requests.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

/// Generative-model endpoint configuration.
///
/// # Examples
///
/// ```
/// use repovet_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.max_retries, 5);
/// assert_eq!(config.temperature, 0.5);
/// assert_eq!(config.resolve("deepseek-v3").model, "deepseek-v3.2-thinking");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API root used when a registry entry has no `base_url`.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// API key sent as a bearer token.
    pub api_key: Option<String>,
    /// Sampling temperature used when a registry entry has none.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Per-request timeout in seconds (default: 120).
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Attempts per invocation before giving up (default: 5).
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    /// Base backoff delay in milliseconds, doubled per attempt.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// Upper bound on a single backoff delay in milliseconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
    /// Alias → provider model registry.
    #[serde(default = "default_model_registry")]
    pub models: HashMap<String, ModelSpec>,
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

fn default_temperature() -> f64 {
    0.5
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_llm_retries() -> u32 {
    5
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_retry_max_delay() -> u64 {
    60_000
}

fn default_model_registry() -> HashMap<String, ModelSpec> {
    [
        ("gemini-3-flash", "gemini-3-flash-preview"),
        ("qwen-plus", "qwen-plus-2025-12-01"),
        ("gpt-5-mini", "gpt-5-mini-2025-08-07"),
        ("gpt-4o-mini", "gpt-4o-mini"),
        ("deepseek-v3", "deepseek-v3.2-thinking"),
    ]
    .into_iter()
    .map(|(alias, model)| {
        (
            alias.to_string(),
            ModelSpec {
                model: model.to_string(),
                base_url: None,
                temperature: Some(0.5),
            },
        )
    })
    .collect()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            models: default_model_registry(),
        }
    }
}

impl LlmConfig {
    /// Look up `alias` in the registry.
    ///
    /// Unknown aliases resolve to themselves as a literal provider model id,
    /// using the endpoint-wide base URL and temperature.
    ///
    /// # Examples
    ///
    /// ```
    /// use repovet_core::LlmConfig;
    ///
    /// let config = LlmConfig::default();
    /// let resolved = config.resolve("anthropic/claude-sonnet-4");
    /// assert_eq!(resolved.model, "anthropic/claude-sonnet-4");
    /// assert_eq!(resolved.base_url, "https://openrouter.ai/api/v1");
    /// ```
    pub fn resolve(&self, alias: &str) -> ResolvedModel {
        match self.models.get(alias) {
            Some(spec) => ResolvedModel {
                model: spec.model.clone(),
                base_url: spec.base_url.clone().unwrap_or_else(|| self.base_url.clone()),
                temperature: spec.temperature.unwrap_or(self.temperature),
            },
            None => ResolvedModel {
                model: alias.to_string(),
                base_url: self.base_url.clone(),
                temperature: self.temperature,
            },
        }
    }

    /// Backoff schedule for model invocations.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
            jitter_ms: 1000,
        }
    }
}

/// One model registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Provider model identifier.
    pub model: String,
    /// Endpoint override for this model.
    pub base_url: Option<String>,
    /// Temperature override for this model.
    pub temperature: Option<f64>,
}

/// Registry entry with endpoint-wide defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    /// Provider model identifier.
    pub model: String,
    /// Endpoint root.
    pub base_url: String,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Registry alias assigned to each pipeline role.
///
/// # Examples
///
/// ```
/// use repovet_core::ModelRoles;
///
/// let mut roles = ModelRoles::default();
/// roles.apply_overrides(None, Some("gpt-5-mini".into()), None, None);
/// assert_eq!(roles.primary_audit, "gpt-5-mini");
/// assert_eq!(roles.random_audit, "qwen-plus");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRoles {
    /// Core-file selection.
    #[serde(default = "default_strategist_model")]
    pub strategist: String,
    /// Core-track file reviews.
    #[serde(default = "default_primary_audit_model")]
    pub primary_audit: String,
    /// Random-track file reviews.
    #[serde(default = "default_random_audit_model")]
    pub random_audit: String,
    /// Final report.
    #[serde(default = "default_synthesizer_model")]
    pub synthesizer: String,
}

fn default_strategist_model() -> String {
    "gpt-4o-mini".into()
}

fn default_primary_audit_model() -> String {
    "gpt-4o-mini".into()
}

fn default_random_audit_model() -> String {
    "qwen-plus".into()
}

fn default_synthesizer_model() -> String {
    "deepseek-v3".into()
}

impl Default for ModelRoles {
    fn default() -> Self {
        Self {
            strategist: default_strategist_model(),
            primary_audit: default_primary_audit_model(),
            random_audit: default_random_audit_model(),
            synthesizer: default_synthesizer_model(),
        }
    }
}

impl ModelRoles {
    /// Replace the roles for which an override is given.
    pub fn apply_overrides(
        &mut self,
        strategist: Option<String>,
        primary_audit: Option<String>,
        random_audit: Option<String>,
        synthesizer: Option<String>,
    ) {
        if let Some(m) = strategist {
            self.strategist = m;
        }
        if let Some(m) = primary_audit {
            self.primary_audit = m;
        }
        if let Some(m) = random_audit {
            self.random_audit = m;
        }
        if let Some(m) = synthesizer {
            self.synthesizer = m;
        }
    }
}

/// Planner and auditor tuning.
///
/// # Examples
///
/// ```
/// use repovet_core::AuditConfig;
///
/// let config = AuditConfig::default();
/// assert_eq!(config.max_core_files, 3);
/// assert_eq!(config.max_random_files, 2);
/// assert_eq!(config.readme_prompt_chars, 30_000);
/// assert!(config.seed.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Maximum file audits in flight across both tracks (default: 5).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Core-track cap (default: 3). Values above 3 are clamped by the planner.
    #[serde(default = "default_max_core_files")]
    pub max_core_files: usize,
    /// Random-track cap (default: 2). Values above 2 are clamped by the planner.
    #[serde(default = "default_max_random_files")]
    pub max_random_files: usize,
    /// README characters included in the core-selection prompt.
    #[serde(default = "default_readme_prompt_chars")]
    pub readme_prompt_chars: usize,
    /// README characters kept in plan metadata.
    #[serde(default = "default_readme_excerpt_chars")]
    pub readme_excerpt_chars: usize,
    /// Branch to plan against. Unset means `main` with a `master` fallback.
    pub branch: Option<String>,
    /// Seed for the random-track sampler. Unset means OS entropy.
    pub seed: Option<u64>,
}

fn default_concurrency() -> usize {
    5
}

fn default_max_core_files() -> usize {
    3
}

fn default_max_random_files() -> usize {
    2
}

fn default_readme_prompt_chars() -> usize {
    30_000
}

fn default_readme_excerpt_chars() -> usize {
    10_000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_core_files: default_max_core_files(),
            max_random_files: default_max_random_files(),
            readme_prompt_chars: default_readme_prompt_chars(),
            readme_excerpt_chars: default_readme_excerpt_chars(),
            branch: None,
            seed: None,
        }
    }
}

/// Run-state and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// SQLite database holding persisted runs.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Where the final report is written.
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".repovet/runs.db")
}

fn default_output() -> PathBuf {
    PathBuf::from("final_due_diligence_report.md")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            output: default_output(),
        }
    }
}

/// Prompt overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// TOML file whose `[<role>]` tables replace the built-in prompts.
    pub path: Option<PathBuf>,
}
