use std::collections::HashMap;
use std::path::Path;

use repovet_core::{RepovetError, Result};
use serde::Deserialize;
use tera::{Context, Tera};

const BUILTIN_PROMPTS: &str = include_str!("../prompts/default.toml");

/// Role names understood by [`PromptLibrary`].
pub mod roles {
    /// Core-file selection by the planner.
    pub const CORE_FILE_SELECTOR: &str = "core_file_selector";
    /// Core-track file audit.
    pub const PRIMARY_AUDITOR: &str = "primary_auditor";
    /// Random-track file audit.
    pub const RANDOM_AUDITOR: &str = "random_auditor";
    /// Final report.
    pub const SYNTHESIZER: &str = "synthesizer";
}

/// System prompt plus user-prompt template for one role.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptTemplate {
    /// Fixed system prompt.
    pub system: String,
    /// Tera template for the user prompt.
    pub user: String,
}

/// Role-keyed prompt templates.
///
/// # Examples
///
/// ```
/// use repovet_review::prompt::{roles, PromptLibrary};
/// use tera::Context;
///
/// let library = PromptLibrary::builtin().unwrap();
/// let mut ctx = Context::new();
/// ctx.insert("file_path", "src/lib.rs");
/// ctx.insert("file_content", "fn main() {}");
/// let (system, user) = library.render(roles::RANDOM_AUDITOR, &ctx).unwrap();
/// assert!(!system.is_empty());
/// assert!(user.contains("src/lib.rs"));
/// ```
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    prompts: HashMap<String, PromptTemplate>,
}

impl PromptLibrary {
    /// Prompts shipped with the binary.
    ///
    /// # Errors
    ///
    /// Returns [`RepovetError::Toml`] only if the embedded file is malformed.
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_PROMPTS)
    }

    /// Parse a `[<role>] system = "..." user = "..."` document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let prompts: HashMap<String, PromptTemplate> = toml::from_str(content)?;
        Ok(Self { prompts })
    }

    /// Built-in prompts, with any roles present in `override_path` replaced.
    ///
    /// # Errors
    ///
    /// Returns [`RepovetError::Io`] or [`RepovetError::Toml`] if the override
    /// file cannot be read or parsed.
    pub fn load(override_path: Option<&Path>) -> Result<Self> {
        let mut library = Self::builtin()?;
        if let Some(path) = override_path {
            let content = std::fs::read_to_string(path)?;
            let overrides = Self::from_toml(&content)?;
            library.prompts.extend(overrides.prompts);
        }
        Ok(library)
    }

    /// Template for `role`.
    ///
    /// # Errors
    ///
    /// Returns [`RepovetError::Template`] if the role is unknown.
    pub fn get(&self, role: &str) -> Result<&PromptTemplate> {
        self.prompts
            .get(role)
            .ok_or_else(|| RepovetError::Template(format!("no prompt defined for role '{role}'")))
    }

    /// Render `(system, user)` for `role` with `context`.
    ///
    /// # Errors
    ///
    /// Returns [`RepovetError::Template`] for an unknown role or a template
    /// that fails to render (syntax error, missing variable).
    pub fn render(&self, role: &str, context: &Context) -> Result<(String, String)> {
        let template = self.get(role)?;
        let user = Tera::one_off(&template.user, context, false)
            .map_err(|e| RepovetError::Template(format!("failed to render '{role}': {}", describe(&e))))?;
        Ok((template.system.clone(), user))
    }
}

fn describe(err: &tera::Error) -> String {
    use std::error::Error as _;
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
