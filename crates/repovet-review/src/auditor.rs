//! Dual-track file audits.
//!
//! Every file of both tracks becomes one spawned task; a shared semaphore
//! bounds how many run at once. Handles are kept per track in submission order
//! and awaited in that order, so each track's results follow the plan no
//! matter which task finishes first.

use std::sync::Arc;

use repovet_core::{
    AuditBundle, AuditPlan, FileAuditResult, RepoRef, RepovetConfig, Result, Track,
};
use repovet_github::CodeHost;
use tera::Context;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::llm::{InvokeOptions, ModelInvoker};
use crate::prompt::{roles, PromptLibrary};

/// Runs the core and random audit tracks concurrently.
pub struct DualTrackAuditor {
    host: Arc<dyn CodeHost>,
    model: Arc<dyn ModelInvoker>,
    prompts: Arc<PromptLibrary>,
    primary_model: String,
    random_model: String,
    concurrency: usize,
}

#[derive(Clone)]
struct TaskContext {
    host: Arc<dyn CodeHost>,
    model: Arc<dyn ModelInvoker>,
    prompts: Arc<PromptLibrary>,
    repo: RepoRef,
}

impl DualTrackAuditor {
    /// Create an auditor using the role models and concurrency from `config`.
    pub fn new(
        host: Arc<dyn CodeHost>,
        model: Arc<dyn ModelInvoker>,
        prompts: Arc<PromptLibrary>,
        config: &RepovetConfig,
    ) -> Self {
        Self {
            host,
            model,
            prompts,
            primary_model: config.models.primary_audit.clone(),
            random_model: config.models.random_audit.clone(),
            concurrency: config.audit.concurrency.max(1),
        }
    }

    /// Audit every file in `plan`.
    ///
    /// Per-file failures (fetch, rendering, model) are recorded in that file's
    /// report; only an invalid `plan.repo_url` fails the whole call.
    pub async fn audit(&self, plan: &AuditPlan) -> Result<AuditBundle> {
        let repo = RepoRef::parse(&plan.repo_url)?;
        let ctx = TaskContext {
            host: Arc::clone(&self.host),
            model: Arc::clone(&self.model),
            prompts: Arc::clone(&self.prompts),
            repo,
        };
        let permits = Arc::new(Semaphore::new(self.concurrency));
        info!(
            core = plan.core_tracks.len(),
            random = plan.random_tracks.len(),
            concurrency = self.concurrency,
            "starting dual-track audit"
        );

        let core = spawn_track(&ctx, &permits, Track::Core, &plan.core_tracks, &self.primary_model);
        let random = spawn_track(
            &ctx,
            &permits,
            Track::Random,
            &plan.random_tracks,
            &self.random_model,
        );

        Ok(AuditBundle {
            core: collect_in_order(core).await,
            random: collect_in_order(random).await,
        })
    }
}

fn spawn_track(
    ctx: &TaskContext,
    permits: &Arc<Semaphore>,
    track: Track,
    paths: &[String],
    model_id: &str,
) -> Vec<(String, JoinHandle<FileAuditResult>)> {
    paths
        .iter()
        .map(|path| {
            let ctx = ctx.clone();
            let permits = Arc::clone(permits);
            let task_path = path.clone();
            let model_id = model_id.to_string();
            let handle = tokio::spawn(async move {
                // The semaphore is never closed, so acquisition only waits.
                let _permit = permits.acquire_owned().await.ok();
                audit_file(&ctx, track, &task_path, &model_id).await
            });
            (path.clone(), handle)
        })
        .collect()
}

async fn collect_in_order(
    handles: Vec<(String, JoinHandle<FileAuditResult>)>,
) -> Vec<FileAuditResult> {
    let mut results = Vec::with_capacity(handles.len());
    for (path, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(path = %path, error = %e, "audit task did not complete");
                FileAuditResult {
                    report: format!("Error auditing file {path}: task failed: {e}"),
                    path,
                }
            }
        };
        results.push(result);
    }
    results
}

async fn audit_file(ctx: &TaskContext, track: Track, path: &str, model_id: &str) -> FileAuditResult {
    let content = match ctx.host.file_content(&ctx.repo, path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(%track, path, error = %e, "file fetch failed, auditing the error instead");
            format!("Error fetching file {path}: {e}")
        }
    };

    let role = match track {
        Track::Core => roles::PRIMARY_AUDITOR,
        Track::Random => roles::RANDOM_AUDITOR,
    };
    let mut vars = Context::new();
    vars.insert("file_path", path);
    vars.insert("file_content", &content);

    debug!(%track, path, model = model_id, "auditing file");
    let report = match ctx.prompts.render(role, &vars) {
        Ok((system, user)) => ctx
            .model
            .invoke(model_id, &system, &user, &InvokeOptions::default())
            .await,
        Err(e) => Err(e),
    };

    match report {
        Ok(report) => FileAuditResult {
            path: path.to_string(),
            report,
        },
        Err(e) => {
            warn!(%track, path, error = %e, "audit degraded");
            FileAuditResult {
                path: path.to_string(),
                report: format!("Error auditing file {path}: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use repovet_core::PlanMetadata;
    use repovet_github::fake::{ops, FakeHost};

    use super::*;
    use crate::fakes::{Reply, ScriptedModel};

    fn plan(core: &[&str], random: &[&str]) -> AuditPlan {
        AuditPlan {
            repo_url: "https://github.com/octo/demo".into(),
            core_tracks: core.iter().map(|s| s.to_string()).collect(),
            random_tracks: random.iter().map(|s| s.to_string()).collect(),
            metadata: PlanMetadata::default(),
        }
    }

    fn auditor(host: Arc<FakeHost>, model: Arc<ScriptedModel>, concurrency: usize) -> DualTrackAuditor {
        let mut config = RepovetConfig::default();
        config.audit.concurrency = concurrency;
        DualTrackAuditor::new(
            host,
            model,
            Arc::new(PromptLibrary::builtin().unwrap()),
            &config,
        )
    }

    fn paths(results: &[FileAuditResult]) -> Vec<&str> {
        results.iter().map(|r| r.path.as_str()).collect()
    }

    #[tokio::test]
    async fn results_follow_submission_order() {
        let host = Arc::new(
            FakeHost::new()
                .with_file("a.rs", "// file a")
                .with_file("b.rs", "// file b")
                .with_file("c.rs", "// file c"),
        );
        // B finishes first, then A, then C.
        let model = Arc::new(
            ScriptedModel::new()
                .on_prompt_delayed("// file a", Reply::Text("report a".into()), Duration::from_millis(60))
                .on_prompt_delayed("// file b", Reply::Text("report b".into()), Duration::from_millis(10))
                .on_prompt_delayed("// file c", Reply::Text("report c".into()), Duration::from_millis(120)),
        );
        let bundle = auditor(host, model.clone(), 5)
            .audit(&plan(&["a.rs", "b.rs", "c.rs"], &[]))
            .await
            .unwrap();

        assert_eq!(paths(&bundle.core), vec!["a.rs", "b.rs", "c.rs"]);
        assert_eq!(bundle.core[0].report, "report a");
        assert_eq!(bundle.core[1].report, "report b");
        assert_eq!(bundle.core[2].report, "report c");
        assert!(bundle.random.is_empty());
    }

    #[tokio::test]
    async fn tracks_use_their_own_model_and_role() {
        let host = Arc::new(
            FakeHost::new()
                .with_file("core.py", "core body")
                .with_file("rand.go", "rand body"),
        );
        let model = Arc::new(
            ScriptedModel::new()
                .on_model("gpt-4o-mini", Reply::Text("primary".into()))
                .on_model("qwen-plus", Reply::Text("spot".into())),
        );
        let bundle = auditor(host, model.clone(), 2)
            .audit(&plan(&["core.py"], &["rand.go"]))
            .await
            .unwrap();

        assert_eq!(bundle.core[0].report, "primary");
        assert_eq!(bundle.random[0].report, "spot");
        assert_eq!(model.calls_to("gpt-4o-mini"), 1);
        assert_eq!(model.calls_to("qwen-plus"), 1);

        let library = PromptLibrary::builtin().unwrap();
        let calls = model.calls();
        let core_call = calls.iter().find(|c| c.model == "gpt-4o-mini").unwrap();
        assert_eq!(core_call.system, library.get(roles::PRIMARY_AUDITOR).unwrap().system);
        assert!(core_call.user.contains("core body"));
    }

    #[tokio::test]
    async fn fetch_failure_is_audited_as_content() {
        let host = Arc::new(
            FakeHost::new()
                .with_file("a.rs", "fn a() {}")
                .with_file("c.rs", "fn c() {}")
                .with_unreachable_file("b.rs"),
        );
        let model = Arc::new(ScriptedModel::new().fallback(Reply::Echo));
        let bundle = auditor(host.clone(), model.clone(), 5)
            .audit(&plan(&["a.rs", "b.rs", "c.rs"], &[]))
            .await
            .unwrap();

        assert_eq!(bundle.core.len(), 3);
        assert_eq!(paths(&bundle.core), vec!["a.rs", "b.rs", "c.rs"]);
        assert!(bundle.core[1]
            .report
            .contains("Error fetching file b.rs: network error: connection reset"));
        assert!(bundle.core[0].report.contains("fn a() {}"));
        assert_eq!(model.call_count(), 3);
        assert_eq!(host.calls(ops::FILE), 3);
    }

    #[tokio::test]
    async fn model_failure_degrades_only_that_file() {
        let host = Arc::new(
            FakeHost::new()
                .with_file("good.rs", "ok")
                .with_file("bad.rs", "poison"),
        );
        let model = Arc::new(
            ScriptedModel::new()
                .on_prompt("poison", Reply::Fail("rate limited: 429".into()))
                .fallback(Reply::Text("fine".into())),
        );
        let bundle = auditor(host, model, 5)
            .audit(&plan(&["bad.rs"], &["good.rs"]))
            .await
            .unwrap();

        assert!(bundle.core[0].report.starts_with("Error auditing file bad.rs:"));
        assert!(bundle.core[0].report.contains("gave up after 5 attempts"));
        assert_eq!(bundle.random[0].report, "fine");
    }

    #[tokio::test]
    async fn concurrency_of_one_still_completes_everything() {
        let mut host = FakeHost::new();
        let names: Vec<String> = (0..6).map(|i| format!("f{i}.rs")).collect();
        for name in &names {
            host = host.with_file(name, name);
        }
        let model = Arc::new(ScriptedModel::new().fallback(Reply::Text("ok".into())));
        let core: Vec<&str> = names[..3].iter().map(String::as_str).collect();
        let random: Vec<&str> = names[3..].iter().map(String::as_str).collect();
        let bundle = auditor(Arc::new(host), model.clone(), 1)
            .audit(&plan(&core, &random))
            .await
            .unwrap();
        assert_eq!(paths(&bundle.core), core);
        assert_eq!(paths(&bundle.random), random);
        assert_eq!(model.call_count(), 6);
    }

    #[tokio::test]
    async fn empty_plan_makes_no_calls() {
        let host = Arc::new(FakeHost::new());
        let model = Arc::new(ScriptedModel::new());
        let bundle = auditor(host.clone(), model.clone(), 5)
            .audit(&plan(&[], &[]))
            .await
            .unwrap();
        assert_eq!(bundle, AuditBundle::default());
        assert_eq!(host.total_calls(), 0);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn invalid_repo_url_fails() {
        let host = Arc::new(FakeHost::new());
        let model = Arc::new(ScriptedModel::new());
        let mut bad = plan(&["a.rs"], &[]);
        bad.repo_url = "not a url".into();
        assert!(auditor(host, model, 5).audit(&bad).await.is_err());
    }
}
