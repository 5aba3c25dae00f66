use std::sync::Arc;

use repovet_core::{AuditBundle, FinalReport, RepovetConfig, Result};
use repovet_scanner::ScanReport;
use tera::Context;
use tracing::{info, warn};

use crate::llm::{InvokeOptions, ModelInvoker};
use crate::prompt::{roles, PromptLibrary};

/// Fuses the scan report and both audit tracks into the final narrative.
pub struct Synthesizer {
    model: Arc<dyn ModelInvoker>,
    prompts: Arc<PromptLibrary>,
    model_id: String,
}

impl Synthesizer {
    /// Create a synthesizer using the `synthesizer` role model from `config`.
    pub fn new(
        model: Arc<dyn ModelInvoker>,
        prompts: Arc<PromptLibrary>,
        config: &RepovetConfig,
    ) -> Self {
        Self {
            model,
            prompts,
            model_id: config.models.synthesizer.clone(),
        }
    }

    /// Produce the final report.
    ///
    /// Never fails: any rendering or model error becomes a degraded report
    /// whose body describes the failure, so the caller keeps the rest of the
    /// run's output.
    pub async fn synthesize(&self, scan: &ScanReport, audits: &AuditBundle) -> FinalReport {
        info!(model = %self.model_id, "synthesizing final report");
        match self.try_synthesize(scan, audits).await {
            Ok(body) => FinalReport {
                body,
                degraded: false,
            },
            Err(e) => {
                warn!(error = %e, "synthesis failed, writing error report");
                FinalReport {
                    body: format!("Error during synthesis: {e}"),
                    degraded: true,
                }
            }
        }
    }

    async fn try_synthesize(&self, scan: &ScanReport, audits: &AuditBundle) -> Result<String> {
        let mut ctx = Context::new();
        ctx.insert("github_json", &serde_json::to_string_pretty(scan)?);
        ctx.insert("core_audit_results", &audits.core);
        ctx.insert("random_audit_results", &audits.random);
        let (system, user) = self.prompts.render(roles::SYNTHESIZER, &ctx)?;
        self.model
            .invoke(&self.model_id, &system, &user, &InvokeOptions::default())
            .await
    }
}

#[cfg(test)]
mod tests {
    use repovet_core::{FileAuditResult, IssueStats, RepoMetrics, RepoRef};

    use super::*;
    use crate::fakes::{Reply, ScriptedModel};

    fn scan() -> ScanReport {
        let metrics = RepoMetrics {
            repo: RepoRef::new("octo", "demo").unwrap(),
            stars: 20_000,
            forks: 100,
            last_commit_days_ago: Some(2),
            issues: IssueStats::from_counts(100, 10),
            risk_flags: vec![],
        };
        ScanReport {
            scorecard: repovet_scanner::scorecard(&metrics),
            metrics,
        }
    }

    fn bundle() -> AuditBundle {
        AuditBundle {
            core: vec![FileAuditResult {
                path: "src/engine.rs".into(),
                report: "engine is tidy".into(),
            }],
            random: vec![FileAuditResult {
                path: "tools/gen.go".into(),
                report: "gen is messy".into(),
            }],
        }
    }

    fn synthesizer(model: Arc<ScriptedModel>) -> Synthesizer {
        Synthesizer::new(
            model,
            Arc::new(PromptLibrary::builtin().unwrap()),
            &RepovetConfig::default(),
        )
    }

    #[tokio::test]
    async fn prompt_embeds_scan_and_audits() {
        let model = Arc::new(ScriptedModel::new().fallback(Reply::Text("# Report".into())));
        let report = synthesizer(model.clone()).synthesize(&scan(), &bundle()).await;

        assert_eq!(report.body, "# Report");
        assert!(!report.degraded);
        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model, "deepseek-v3");
        assert!(calls[0].user.contains("\"totalScore\": 0.97"));
        assert!(calls[0].user.contains("engine is tidy"));
        assert!(calls[0].user.contains("gen is messy"));
    }

    #[tokio::test]
    async fn model_failure_becomes_error_report() {
        let model = Arc::new(ScriptedModel::new().fallback(Reply::Fail("overloaded".into())));
        let report = synthesizer(model).synthesize(&scan(), &bundle()).await;
        assert!(report.degraded);
        assert!(report.body.starts_with("Error during synthesis: "));
        assert!(report.body.contains("overloaded"));
    }

    #[tokio::test]
    async fn empty_tracks_still_synthesize() {
        let model = Arc::new(ScriptedModel::new().fallback(Reply::Echo));
        let report = synthesizer(model)
            .synthesize(&scan(), &AuditBundle::default())
            .await;
        assert!(!report.degraded);
        assert!(report.body.contains("no core files were audited"));
    }
}
