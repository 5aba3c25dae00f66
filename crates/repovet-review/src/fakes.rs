//! In-memory [`ModelInvoker`] for tests (no network).
//!
//! `ScriptedModel` answers each call with the first rule whose matcher fits,
//! optionally after a delay, and records every call it receives.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use repovet_core::{RepovetError, Result};

use crate::llm::{InvokeOptions, ModelInvoker};

/// How a rule decides whether it applies to a call.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Any call.
    Any,
    /// Calls to this model alias.
    Model(String),
    /// Calls whose user prompt contains this text.
    PromptContains(String),
}

/// What a matching rule answers.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Fixed completion text.
    Text(String),
    /// Echo the user prompt back.
    Echo,
    /// Fail with a terminal model error carrying this message.
    Fail(String),
}

#[derive(Debug, Clone)]
struct Rule {
    matcher: Matcher,
    reply: Reply,
    delay: Duration,
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Model alias requested.
    pub model: String,
    /// System prompt.
    pub system: String,
    /// Rendered user prompt.
    pub user: String,
}

/// Rule-driven model fake.
///
/// # Examples
///
/// ```
/// use repovet_review::fakes::{Reply, ScriptedModel};
/// use repovet_review::llm::{InvokeOptions, ModelInvoker};
///
/// let model = ScriptedModel::new()
///     .on_prompt("lib.rs", Reply::Text("solid".into()))
///     .fallback(Reply::Text("meh".into()));
///
/// let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
/// let out = rt
///     .block_on(model.invoke("m", "sys", "review lib.rs", &InvokeOptions::default()))
///     .unwrap();
/// assert_eq!(out, "solid");
/// assert_eq!(model.call_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedModel {
    rules: Vec<Rule>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    /// A model with no rules; every call fails.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, matcher: Matcher, reply: Reply, delay: Duration) -> Self {
        self.rules.push(Rule {
            matcher,
            reply,
            delay,
        });
        self
    }

    /// Answer calls to `model` with `reply`.
    pub fn on_model(self, model: &str, reply: Reply) -> Self {
        self.push(Matcher::Model(model.to_string()), reply, Duration::ZERO)
    }

    /// Answer calls whose user prompt contains `needle` with `reply`.
    pub fn on_prompt(self, needle: &str, reply: Reply) -> Self {
        self.push(Matcher::PromptContains(needle.to_string()), reply, Duration::ZERO)
    }

    /// Like [`on_prompt`](Self::on_prompt) but answers only after `delay`.
    pub fn on_prompt_delayed(self, needle: &str, reply: Reply, delay: Duration) -> Self {
        self.push(Matcher::PromptContains(needle.to_string()), reply, delay)
    }

    /// Answer every call not matched by an earlier rule.
    pub fn fallback(self, reply: Reply) -> Self {
        self.push(Matcher::Any, reply, Duration::ZERO)
    }

    /// All calls received so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.recorded().clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.recorded().len()
    }

    /// Number of calls made to `model`.
    pub fn calls_to(&self, model: &str) -> usize {
        self.recorded()
            .iter()
            .filter(|c| c.model == model)
            .count()
    }

    // A panicking test thread must not hide the recorded calls.
    fn recorded(&self) -> MutexGuard<'_, Vec<RecordedCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ModelInvoker for ScriptedModel {
    async fn invoke(
        &self,
        model: &str,
        system: &str,
        user: &str,
        _options: &InvokeOptions,
    ) -> Result<String> {
        self.recorded().push(RecordedCall {
            model: model.to_string(),
            system: system.to_string(),
            user: user.to_string(),
        });

        let rule = self.rules.iter().find(|rule| match &rule.matcher {
            Matcher::Any => true,
            Matcher::Model(m) => m == model,
            Matcher::PromptContains(needle) => user.contains(needle.as_str()),
        });
        let Some(rule) = rule else {
            return Err(RepovetError::Llm(format!("no scripted reply for {model}")));
        };

        if !rule.delay.is_zero() {
            tokio::time::sleep(rule.delay).await;
        }
        match &rule.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Echo => Ok(user.to_string()),
            Reply::Fail(message) => Err(RepovetError::RetriesExhausted {
                attempts: 5,
                last_error: message.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorded_calls_survive_a_poisoned_lock() {
        let model = ScriptedModel::new().fallback(Reply::Echo);
        let options = InvokeOptions::default();
        model.invoke("m", "sys", "first", &options).await.unwrap();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = model.calls.lock().unwrap();
            panic!("test thread died holding the lock");
        }));
        assert!(model.calls.is_poisoned());

        let out = model.invoke("m", "sys", "second", &options).await.unwrap();
        assert_eq!(out, "second");
        assert_eq!(model.call_count(), 2);
        assert_eq!(model.calls_to("m"), 2);
        assert_eq!(model.calls()[1].user, "second");
    }

    #[tokio::test]
    async fn unmatched_call_fails_and_is_still_recorded() {
        let model = ScriptedModel::new().on_model("a", Reply::Text("ok".into()));
        let err = model
            .invoke("b", "sys", "hello", &InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepovetError::Llm(_)));
        assert_eq!(model.calls_to("b"), 1);
    }
}
