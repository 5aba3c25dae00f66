//! Resumable four-stage pipeline.
//!
//! A [`PipelineRun`] is persisted under `run/<run_id>` after every completed
//! stage. Re-running with the same id picks up at the stage cursor and feeds
//! later stages from the stored outputs, so completed stages never repeat
//! their external calls.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use repovet_core::{
    AuditBundle, AuditPlan, FinalReport, RepoRef, RepovetConfig, RepovetError, Result,
};
use repovet_github::CodeHost;
use repovet_scanner::{MetricsCollector, ScanReport};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::auditor::DualTrackAuditor;
use crate::llm::ModelInvoker;
use crate::planner::AuditPlanner;
use crate::prompt::PromptLibrary;
use crate::state::StateStore;
use crate::synthesizer::Synthesizer;

const RUN_PREFIX: &str = "run/";

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Collect repository metrics and score them.
    Scanning,
    /// Choose core and random files.
    Planning,
    /// Audit every planned file.
    Auditing,
    /// Fuse everything into the final report.
    Synthesizing,
    /// Nothing left to do.
    Done,
}

impl Stage {
    /// The stage that follows this one. `Done` is terminal.
    pub fn next(self) -> Stage {
        match self {
            Stage::Scanning => Stage::Planning,
            Stage::Planning => Stage::Auditing,
            Stage::Auditing => Stage::Synthesizing,
            Stage::Synthesizing | Stage::Done => Stage::Done,
        }
    }

    /// Lowercase stage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Scanning => "scanning",
            Stage::Planning => "planning",
            Stage::Auditing => "auditing",
            Stage::Synthesizing => "synthesizing",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = RepovetError;

    /// Accepts stage names and the short CLI forms `scan`, `plan`, `audit`,
    /// `synthesize`.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "scan" | "scanning" => Ok(Stage::Scanning),
            "plan" | "planning" => Ok(Stage::Planning),
            "audit" | "auditing" => Ok(Stage::Auditing),
            "synthesize" | "synthesizing" => Ok(Stage::Synthesizing),
            "done" => Ok(Stage::Done),
            other => Err(RepovetError::Config(format!("unknown stage '{other}'"))),
        }
    }
}

/// Persisted state of one pipeline run.
///
/// `current_stage` is the stage cursor: the next stage to execute. Each entry
/// of `stage_outputs` is the serialized result of a completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identifier.
    pub run_id: String,
    /// Repository URL the run was started for.
    pub repo_url: String,
    /// Next stage to execute.
    pub current_stage: Stage,
    /// Output of every completed stage.
    #[serde(default)]
    pub stage_outputs: BTreeMap<Stage, serde_json::Value>,
    /// Message of the failure that halted the run, if it is halted.
    #[serde(default)]
    pub last_error: Option<String>,
    /// When the run was first created.
    pub created_at: DateTime<Utc>,
    /// When the run was last persisted.
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    /// A fresh run positioned at [`Stage::Scanning`].
    pub fn new(run_id: impl Into<String>, repo_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            repo_url: repo_url.into(),
            current_stage: Stage::Scanning,
            stage_outputs: BTreeMap::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether every stage has completed.
    pub fn is_done(&self) -> bool {
        self.current_stage == Stage::Done
    }

    /// Decode the stored output of `stage`, if that stage has completed.
    pub fn output<T: DeserializeOwned>(&self, stage: Stage) -> Result<Option<T>> {
        self.stage_outputs
            .get(&stage)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(|e| RepovetError::State(format!("corrupt {stage} output: {e}")))
    }

    fn require<T: DeserializeOwned>(&self, stage: Stage) -> Result<T> {
        self.output(stage)?.ok_or_else(|| {
            RepovetError::State(format!(
                "run {} has no {stage} output to resume from",
                self.run_id
            ))
        })
    }

    /// Stored scan report, once scanning has completed.
    pub fn scan_report(&self) -> Result<Option<ScanReport>> {
        self.output(Stage::Scanning)
    }

    /// Stored final report, once synthesis has completed.
    pub fn report(&self) -> Result<Option<FinalReport>> {
        self.output(Stage::Synthesizing)
    }

    fn complete(&mut self, stage: Stage, output: serde_json::Value) {
        self.stage_outputs.insert(stage, output);
        self.current_stage = stage.next();
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    fn halt(&mut self, error: &RepovetError) {
        self.last_error = Some(error.to_string());
        self.updated_at = Utc::now();
    }
}

/// Default run id for a repository: a short SHA-256 digest of its canonical
/// URL, so the same repository maps to the same run however the URL is
/// spelled.
///
/// # Examples
///
/// ```
/// use repovet_review::pipeline::default_run_id;
///
/// let a = default_run_id("https://github.com/Octo/Demo.git").unwrap();
/// let b = default_run_id("https://github.com/octo/demo/").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 16);
/// ```
pub fn default_run_id(repo_url: &str) -> Result<String> {
    let canonical = RepoRef::parse(repo_url)?.html_url().to_ascii_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    Ok(digest[..16].to_string())
}

fn run_key(run_id: &str) -> String {
    format!("{RUN_PREFIX}{run_id}")
}

/// Load a persisted run.
pub async fn load_run(store: &dyn StateStore, run_id: &str) -> Result<Option<PipelineRun>> {
    match store.get(&run_key(run_id)).await? {
        Some(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| RepovetError::State(format!("corrupt run {run_id}: {e}"))),
        None => Ok(None),
    }
}

async fn save_run(store: &dyn StateStore, run: &PipelineRun) -> Result<()> {
    let json = serde_json::to_string(run)?;
    store.put(&run_key(&run.run_id), &json).await
}

/// All persisted runs, ordered by run id.
pub async fn list_runs(store: &dyn StateStore) -> Result<Vec<PipelineRun>> {
    let mut runs = Vec::new();
    for key in store.keys(RUN_PREFIX).await? {
        let run_id = &key[RUN_PREFIX.len()..];
        if let Some(run) = load_run(store, run_id).await? {
            runs.push(run);
        }
    }
    Ok(runs)
}

/// Delete a persisted run. Returns whether it existed.
pub async fn forget_run(store: &dyn StateStore, run_id: &str) -> Result<bool> {
    let key = run_key(run_id);
    let existed = store.get(&key).await?.is_some();
    store.delete(&key).await?;
    Ok(existed)
}

/// Drives Scanning → Planning → Auditing → Synthesizing with a checkpoint
/// after every stage.
///
/// The orchestrator never retries across stage boundaries. A stage that
/// fails is recorded in `last_error` and the run stays at that stage, ready
/// to be resumed.
pub struct Orchestrator {
    collector: MetricsCollector,
    planner: AuditPlanner,
    auditor: DualTrackAuditor,
    synthesizer: Synthesizer,
    store: Arc<dyn StateStore>,
}

impl Orchestrator {
    /// Assemble an orchestrator from its stages.
    pub fn new(
        collector: MetricsCollector,
        planner: AuditPlanner,
        auditor: DualTrackAuditor,
        synthesizer: Synthesizer,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            collector,
            planner,
            auditor,
            synthesizer,
            store,
        }
    }

    /// Build every stage from shared collaborators and one configuration.
    pub fn from_config(
        host: Arc<dyn CodeHost>,
        model: Arc<dyn ModelInvoker>,
        prompts: Arc<PromptLibrary>,
        store: Arc<dyn StateStore>,
        config: &RepovetConfig,
    ) -> Self {
        Self::new(
            MetricsCollector::new(Arc::clone(&host)),
            AuditPlanner::new(
                Arc::clone(&host),
                Arc::clone(&model),
                Arc::clone(&prompts),
                config,
            ),
            DualTrackAuditor::new(host, Arc::clone(&model), Arc::clone(&prompts), config),
            Synthesizer::new(model, prompts, config),
            store,
        )
    }

    /// Run every remaining stage and return the final report.
    ///
    /// A run that is already done returns its stored report without any
    /// external call.
    ///
    /// # Errors
    ///
    /// Returns [`RepovetError::Stage`] when a stage fails fatally (the run
    /// stays resumable), [`RepovetError::Config`] when `run_id` belongs to a
    /// different repository, and store errors as they occur.
    pub async fn run(&self, repo_url: &str, run_id: &str) -> Result<FinalReport> {
        let run = self.run_until(repo_url, run_id, Stage::Synthesizing).await?;
        run.report()?.ok_or_else(|| {
            RepovetError::State(format!("run {run_id} finished without a report"))
        })
    }

    /// Run stages up to and including `last`, then stop.
    ///
    /// Stages already completed are skipped; the returned run reflects what
    /// has been persisted.
    pub async fn run_until(&self, repo_url: &str, run_id: &str, last: Stage) -> Result<PipelineRun> {
        let repo = RepoRef::parse(repo_url)?;
        let mut run = self.open_run(&repo, repo_url, run_id).await?;

        while run.current_stage != Stage::Done && run.current_stage <= last {
            let stage = run.current_stage;
            info!(run_id, %stage, "running stage");
            match self.execute(stage, &repo, &run).await {
                Ok(output) => {
                    run.complete(stage, output);
                    save_run(self.store.as_ref(), &run).await?;
                    info!(run_id, %stage, next = %run.current_stage, "stage checkpointed");
                }
                Err(e) => {
                    warn!(run_id, %stage, error = %e, "stage failed, run halted");
                    run.halt(&e);
                    save_run(self.store.as_ref(), &run).await?;
                    return Err(RepovetError::Stage {
                        stage: stage.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if run.is_done() {
            info!(run_id, "run complete");
        }
        Ok(run)
    }

    async fn open_run(&self, repo: &RepoRef, repo_url: &str, run_id: &str) -> Result<PipelineRun> {
        match load_run(self.store.as_ref(), run_id).await? {
            Some(run) => {
                let stored = RepoRef::parse(&run.repo_url)?;
                if !stored.owner.eq_ignore_ascii_case(&repo.owner)
                    || !stored.name.eq_ignore_ascii_case(&repo.name)
                {
                    return Err(RepovetError::Config(format!(
                        "run {run_id} belongs to {stored}, not {repo}; pass --fresh or a different --run-id"
                    )));
                }
                info!(
                    run_id,
                    stage = %run.current_stage,
                    completed = run.stage_outputs.len(),
                    "resuming run"
                );
                Ok(run)
            }
            None => {
                let run = PipelineRun::new(run_id, repo_url);
                save_run(self.store.as_ref(), &run).await?;
                info!(run_id, %repo, "starting new run");
                Ok(run)
            }
        }
    }

    async fn execute(
        &self,
        stage: Stage,
        repo: &RepoRef,
        run: &PipelineRun,
    ) -> Result<serde_json::Value> {
        let output = match stage {
            Stage::Scanning => serde_json::to_value(self.collector.scan(repo).await?)?,
            Stage::Planning => serde_json::to_value(self.planner.plan(&run.repo_url).await?)?,
            Stage::Auditing => {
                let plan: AuditPlan = run.require(Stage::Planning)?;
                serde_json::to_value(self.auditor.audit(&plan).await?)?
            }
            Stage::Synthesizing => {
                let scan: ScanReport = run.require(Stage::Scanning)?;
                let audits: AuditBundle = run.require(Stage::Auditing)?;
                serde_json::to_value(self.synthesizer.synthesize(&scan, &audits).await)?
            }
            Stage::Done => {
                return Err(RepovetError::State(format!(
                    "run {} has no stage left to execute",
                    run.run_id
                )))
            }
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;

    #[test]
    fn stages_advance_in_order() {
        assert_eq!(Stage::Scanning.next(), Stage::Planning);
        assert_eq!(Stage::Synthesizing.next(), Stage::Done);
        assert_eq!(Stage::Done.next(), Stage::Done);
        assert!(Stage::Planning < Stage::Auditing);
    }

    #[test]
    fn stage_parses_cli_forms() {
        assert_eq!("plan".parse::<Stage>().unwrap(), Stage::Planning);
        assert_eq!("Auditing".parse::<Stage>().unwrap(), Stage::Auditing);
        assert!("deploy".parse::<Stage>().is_err());
    }

    #[test]
    fn run_round_trips_through_json() {
        let mut run = PipelineRun::new("abc", "https://github.com/octo/demo");
        run.complete(Stage::Scanning, serde_json::json!({"k": 1}));
        let json = serde_json::to_string(&run).unwrap();
        assert!(json.contains("\"current_stage\":\"planning\""));
        assert!(json.contains("\"scanning\":{\"k\":1}"));
        let back: PipelineRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);
    }

    #[test]
    fn missing_output_is_none_and_corrupt_output_errors() {
        let mut run = PipelineRun::new("abc", "https://github.com/octo/demo");
        assert!(run.report().unwrap().is_none());
        run.complete(Stage::Synthesizing, serde_json::json!(42));
        assert!(matches!(run.report(), Err(RepovetError::State(_))));
    }

    #[test]
    fn halting_keeps_cursor() {
        let mut run = PipelineRun::new("abc", "https://github.com/octo/demo");
        run.halt(&RepovetError::NotFound("repos/octo/demo".into()));
        assert_eq!(run.current_stage, Stage::Scanning);
        assert_eq!(run.last_error.as_deref(), Some("not found: repos/octo/demo"));
    }

    #[test]
    fn run_id_is_stable_and_url_sensitive() {
        let a = default_run_id("https://github.com/octo/demo").unwrap();
        assert_eq!(a, default_run_id("http://github.com/octo/demo.git").unwrap());
        assert_ne!(a, default_run_id("https://github.com/octo/other").unwrap());
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(default_run_id("ftp://example.com/x").is_err());
    }

    #[tokio::test]
    async fn list_and_forget_runs() {
        let store = MemoryStateStore::new();
        save_run(&store, &PipelineRun::new("b", "https://github.com/o/b"))
            .await
            .unwrap();
        save_run(&store, &PipelineRun::new("a", "https://github.com/o/a"))
            .await
            .unwrap();
        store.put("other/x", "not a run").await.unwrap();

        let ids: Vec<String> = list_runs(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.run_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(forget_run(&store, "a").await.unwrap());
        assert!(!forget_run(&store, "a").await.unwrap());
        assert_eq!(list_runs(&store).await.unwrap().len(), 1);
    }
}
