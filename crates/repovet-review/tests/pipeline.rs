use std::sync::Arc;

use chrono::{Duration, Utc};
use repovet_core::{AuditPlan, RepovetConfig, RepovetError, Verdict};
use repovet_github::fake::{ops, FakeHost};
use repovet_github::{RepoInfo, TreeEntry};
use repovet_review::fakes::{Reply, ScriptedModel};
use repovet_review::pipeline::{default_run_id, list_runs, load_run};
use repovet_review::{
    MemoryStateStore, Orchestrator, PromptLibrary, SqliteStateStore, Stage, StateStore,
};

const URL: &str = "https://github.com/octo/demo";

fn config() -> RepovetConfig {
    let mut config = RepovetConfig::default();
    config.models.strategist = "strategist".into();
    config.models.primary_audit = "primary".into();
    config.models.random_audit = "random".into();
    config.models.synthesizer = "synth".into();
    config.audit.seed = Some(7);
    config
}

fn healthy_host() -> FakeHost {
    FakeHost::new()
        .with_repo(RepoInfo {
            stars: 20_000,
            forks: 100,
            archived: false,
            disabled: false,
        })
        .with_latest_commit(Utc::now() - Duration::days(2))
        .with_issue_counts(100, 10)
        .with_tree(
            "main",
            vec![
                TreeEntry::blob("README.md"),
                TreeEntry::dir("src"),
                TreeEntry::blob("src/main.rs"),
                TreeEntry::blob("src/engine.rs"),
                TreeEntry::blob("src/util.rs"),
                TreeEntry::dir("tools"),
                TreeEntry::blob("tools/gen.go"),
            ],
        )
        .with_file("README.md", "# Demo\nA small engine.")
        .with_file("src/main.rs", "fn main() { engine::run() }")
        .with_file("src/engine.rs", "pub fn run() {}")
        .with_file("src/util.rs", "pub fn helper() {}")
        .with_file("tools/gen.go", "package main")
}

fn scripted_model() -> ScriptedModel {
    ScriptedModel::new()
        .on_model(
            "strategist",
            Reply::Text("- Entry point: src/main.rs\n- Engine: src/engine.rs".into()),
        )
        .on_model("synth", Reply::Text("# Due diligence\nLooks healthy.".into()))
        .fallback(Reply::Text("audit ok".into()))
}

fn orchestrator(
    host: &Arc<FakeHost>,
    model: &Arc<ScriptedModel>,
    store: Arc<dyn StateStore>,
) -> Orchestrator {
    Orchestrator::from_config(
        host.clone(),
        model.clone(),
        Arc::new(PromptLibrary::builtin().unwrap()),
        store,
        &config(),
    )
}

#[tokio::test]
async fn full_run_persists_every_stage() {
    let host = Arc::new(healthy_host());
    let model = Arc::new(scripted_model());
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());

    let report = orchestrator(&host, &model, store.clone())
        .run(URL, "demo-run")
        .await
        .unwrap();
    assert_eq!(report.body, "# Due diligence\nLooks healthy.");
    assert!(!report.degraded);

    let run = load_run(store.as_ref(), "demo-run").await.unwrap().unwrap();
    assert!(run.is_done());
    assert!(run.last_error.is_none());
    assert_eq!(run.stage_outputs.len(), 4);

    let scan = run.scan_report().unwrap().unwrap();
    assert_eq!(scan.scorecard.total_score, 0.97);
    assert_eq!(scan.scorecard.verdict, Verdict::Healthy);

    let plan: AuditPlan = run.output(Stage::Planning).unwrap().unwrap();
    assert_eq!(plan.core_tracks, vec!["src/main.rs", "src/engine.rs"]);
    assert_eq!(plan.random_tracks.len(), 2);

    assert_eq!(model.calls_to("strategist"), 1);
    assert_eq!(model.calls_to("primary"), 2);
    assert_eq!(model.calls_to("random"), 2);
    assert_eq!(model.calls_to("synth"), 1);
    let synth_prompt = &model
        .calls()
        .into_iter()
        .find(|c| c.model == "synth")
        .unwrap()
        .user;
    assert!(synth_prompt.contains("src/engine.rs"));
    assert!(synth_prompt.contains("audit ok"));
}

#[tokio::test]
async fn restart_after_planning_resumes_at_auditing() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state").join("runs.db");
    let run_id = default_run_id(URL).unwrap();

    let first_host = Arc::new(healthy_host());
    let first_model = Arc::new(scripted_model());
    {
        let store = Arc::new(SqliteStateStore::open(&db).unwrap());
        let run = orchestrator(&first_host, &first_model, store)
            .run_until(URL, &run_id, Stage::Planning)
            .await
            .unwrap();
        assert_eq!(run.current_stage, Stage::Auditing);
    }
    assert_eq!(first_host.calls(ops::REPOSITORY), 1);
    assert_eq!(first_model.calls_to("strategist"), 1);
    assert_eq!(first_model.calls_to("primary"), 0);

    // A new process: fresh collaborators over the same database file.
    let host = Arc::new(healthy_host());
    let model = Arc::new(scripted_model());
    let store = Arc::new(SqliteStateStore::open(&db).unwrap());
    let report = orchestrator(&host, &model, store)
        .run(URL, &run_id)
        .await
        .unwrap();

    assert_eq!(report.body, "# Due diligence\nLooks healthy.");
    assert_eq!(host.calls(ops::REPOSITORY), 0);
    assert_eq!(host.calls(ops::LATEST_COMMIT), 0);
    assert_eq!(host.calls(ops::SEARCH), 0);
    assert_eq!(host.calls(ops::TREE), 0);
    assert_eq!(host.calls(ops::BRANCH_HEAD), 0);
    assert_eq!(host.calls(ops::FILE), 4);
    assert_eq!(model.calls_to("strategist"), 0);
    assert_eq!(model.calls_to("primary"), 2);
    assert_eq!(model.calls_to("random"), 2);
    assert_eq!(model.calls_to("synth"), 1);
}

#[tokio::test]
async fn finished_run_returns_stored_report_without_calls() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let first = orchestrator(
        &Arc::new(healthy_host()),
        &Arc::new(scripted_model()),
        store.clone(),
    )
    .run(URL, "done")
    .await
    .unwrap();

    let host = Arc::new(healthy_host());
    let model = Arc::new(scripted_model());
    let again = orchestrator(&host, &model, store)
        .run(URL, "done")
        .await
        .unwrap();

    assert_eq!(again, first);
    assert_eq!(host.total_calls(), 0);
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn fatal_stage_error_halts_and_resumes_later() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let broken = Arc::new(
        healthy_host().failing(ops::TREE, || RepovetError::Auth("bad credentials".into())),
    );
    let model = Arc::new(scripted_model());

    let err = orchestrator(&broken, &model, store.clone())
        .run(URL, "flaky")
        .await
        .unwrap_err();
    match err {
        RepovetError::Stage { stage, message } => {
            assert_eq!(stage, "planning");
            assert!(message.contains("bad credentials"));
        }
        other => panic!("expected stage error, got {other:?}"),
    }

    let halted = load_run(store.as_ref(), "flaky").await.unwrap().unwrap();
    assert_eq!(halted.current_stage, Stage::Planning);
    assert!(halted.scan_report().unwrap().is_some());
    assert!(halted
        .last_error
        .as_deref()
        .unwrap()
        .contains("bad credentials"));

    let host = Arc::new(healthy_host());
    let model = Arc::new(scripted_model());
    orchestrator(&host, &model, store.clone())
        .run(URL, "flaky")
        .await
        .unwrap();
    assert_eq!(host.calls(ops::REPOSITORY), 0);
    assert_eq!(model.calls_to("strategist"), 1);

    let resumed = load_run(store.as_ref(), "flaky").await.unwrap().unwrap();
    assert!(resumed.is_done());
    assert!(resumed.last_error.is_none());
}

#[tokio::test]
async fn failed_file_fetch_degrades_inside_a_completed_run() {
    let host = Arc::new(healthy_host().with_unreachable_file("src/engine.rs"));
    let model = Arc::new(scripted_model());
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());

    orchestrator(&host, &model, store.clone())
        .run(URL, "partial")
        .await
        .unwrap();

    let run = load_run(store.as_ref(), "partial").await.unwrap().unwrap();
    let audits: repovet_core::AuditBundle = run.output(Stage::Auditing).unwrap().unwrap();
    assert_eq!(audits.core.len(), 2);
    assert_eq!(audits.core[1].path, "src/engine.rs");
    let engine_prompt = model
        .calls()
        .into_iter()
        .find(|c| c.model == "primary" && c.user.contains("Error fetching file src/engine.rs"));
    assert!(engine_prompt.is_some());
}

#[tokio::test]
async fn run_id_of_another_repository_is_rejected() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let host = Arc::new(healthy_host());
    let model = Arc::new(scripted_model());
    let orch = orchestrator(&host, &model, store.clone());

    orch.run_until(URL, "shared", Stage::Scanning).await.unwrap();
    let err = orch
        .run("https://github.com/octo/other", "shared")
        .await
        .unwrap_err();
    assert!(matches!(err, RepovetError::Config(_)));
    assert_eq!(list_runs(store.as_ref()).await.unwrap().len(), 1);
}
