/// Errors that can occur across the repovet platform.
///
/// Collaborator clients convert transport failures into these variants before
/// they cross a component boundary. Library crates use this type directly; the
/// binary crate surfaces it through `miette` at the boundary.
///
/// # Examples
///
/// ```
/// use repovet_core::RepovetError;
///
/// let err = RepovetError::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum RepovetError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration (credentials, URLs, model names).
    #[error("configuration error: {0}")]
    #[diagnostic(help("check .repovet.toml and the GITHUB_TOKEN / OPENROUTER_API_KEY variables"))]
    Config(String),

    /// Repository URL did not have the expected `https://github.com/owner/repo` shape.
    #[error("invalid repository URL: {0}")]
    InvalidUrl(String),

    /// The requested repository, ref or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials were rejected by the remote service.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The remote service throttled the request.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Provider message.
        message: String,
        /// Seconds until the provider expects the quota to reset, when known.
        retry_after_secs: Option<u64>,
    },

    /// Non-success HTTP status that is not covered by a more specific variant.
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body or summary.
        message: String,
    },

    /// Connection, DNS or timeout failure.
    #[error("network error: {0}")]
    Network(String),

    /// The generative model is overloaded or temporarily not served.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Generative-model API or response error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// A retryable operation kept failing until its attempt budget ran out.
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Display text of the final failure.
        last_error: String,
    },

    /// Prompt template lookup or rendering failure.
    #[error("template error: {0}")]
    Template(String),

    /// Persisted run-state failure.
    #[error("state store error: {0}")]
    State(String),

    /// A pipeline stage failed fatally; the run can be resumed.
    #[error("stage {stage} failed: {message}")]
    #[diagnostic(help("progress up to the failed stage is saved; re-run the same command to resume"))]
    Stage {
        /// Name of the failing stage.
        stage: String,
        /// Display text of the underlying failure.
        message: String,
    },

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RepovetError {
    /// Whether retrying the same call may succeed.
    ///
    /// Rate limits, network failures, 5xx responses and temporarily
    /// unavailable models are retryable. Everything else is fatal.
    ///
    /// # Examples
    ///
    /// ```
    /// use repovet_core::RepovetError;
    ///
    /// let throttled = RepovetError::RateLimited { message: "slow down".into(), retry_after_secs: None };
    /// assert!(throttled.is_retryable());
    /// assert!(RepovetError::Http { status: 502, message: "bad gateway".into() }.is_retryable());
    /// assert!(!RepovetError::NotFound("repos/a/b".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            RepovetError::RateLimited { .. }
            | RepovetError::Network(_)
            | RepovetError::ModelUnavailable(_) => true,
            RepovetError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Provider-supplied wait hint, if this is a rate-limit error.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RepovetError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}
