use std::process::Command;

use repovet_review::{PipelineRun, SqliteStateStore, StateStore};

fn repovet(dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_repovet"));
    cmd.current_dir(dir)
        .env_remove("OPENROUTER_API_KEY")
        .env_remove("LLM_API_KEY")
        .env_remove("REPO_URL")
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn audit_without_api_key_fails_before_any_request() {
    let dir = tempfile::tempdir().unwrap();

    let output = repovet(dir.path())
        .args(["audit", "https://github.com/octo/demo", "--state", "runs.db"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("API key"), "unexpected stderr: {stderr}");
    assert!(!dir.path().join("final_due_diligence_report.md").exists());
}

#[test]
fn audit_rejects_non_github_url() {
    let dir = tempfile::tempdir().unwrap();

    let output = repovet(dir.path())
        .args(["audit", "https://gitlab.com/octo/demo"])
        .env("OPENROUTER_API_KEY", "test-key")
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid repository URL"));
}

#[test]
fn runs_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();

    let output = repovet(dir.path())
        .args(["runs", "--state", "runs.db"])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No saved runs."));
}

#[tokio::test]
async fn runs_lists_and_forgets_saved_runs() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("runs.db");
    {
        let store = SqliteStateStore::open(&db).unwrap();
        let run = PipelineRun::new("abc123", "https://github.com/octo/demo");
        store
            .put("run/abc123", &serde_json::to_string(&run).unwrap())
            .await
            .unwrap();
    }

    let listed = repovet(dir.path())
        .args(["runs", "--state", "runs.db", "--format", "json"])
        .output()
        .unwrap();
    assert!(listed.status.success());
    let runs: Vec<PipelineRun> = serde_json::from_slice(&listed.stdout).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, "abc123");

    let forgot = repovet(dir.path())
        .args(["runs", "--state", "runs.db", "--forget", "abc123"])
        .output()
        .unwrap();
    assert!(forgot.status.success());

    let again = repovet(dir.path())
        .args(["runs", "--state", "runs.db", "--forget", "abc123"])
        .output()
        .unwrap();
    assert!(!again.status.success());
}
