use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use repovet_core::{OutputFormat, RepoRef, RepovetConfig, RepovetError};
use repovet_github::GitHubClient;
use repovet_review::pipeline::{default_run_id, forget_run, list_runs, load_run};
use repovet_review::{
    LlmClient, Orchestrator, PipelineRun, PromptLibrary, SqliteStateStore, Stage, StateStore,
};
use repovet_scanner::{MetricsCollector, ScanReport};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "repovet",
    version,
    about = "Repository due-diligence from health metrics and AI-sampled code audits",
    long_about = "repovet scores a GitHub repository's vitality (activity, issue health,\n\
                   popularity, risk), has generative models audit a handful of its files,\n\
                   and fuses both into one narrative due-diligence report.\n\n\
                   Runs are checkpointed after every stage, so an interrupted audit resumes\n\
                   where it stopped instead of paying for finished stages again.\n\n\
                   Examples:\n  \
                     repovet audit https://github.com/owner/repo   Full audit, report to disk\n  \
                     repovet audit <url> --until plan             Stop after planning\n  \
                     repovet scan <url> --format json             Health scorecard only\n  \
                     repovet runs                                 List persisted runs\n  \
                     repovet init                                 Write a default .repovet.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .repovet.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summaries (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run (or resume) the full due-diligence pipeline
    #[command(long_about = "Run (or resume) the full due-diligence pipeline.\n\n\
        Stages: scan -> plan -> audit -> synthesize. Progress is saved after each\n\
        stage under a run id derived from the repository URL; re-running the same\n\
        command resumes at the first unfinished stage.\n\n\
        Examples:\n  repovet audit https://github.com/owner/repo\n  \
        repovet audit https://github.com/owner/repo --fresh --seed 7\n  \
        REPO_URL=https://github.com/owner/repo repovet audit --until audit")]
    Audit(AuditArgs),
    /// Print the repository health scorecard
    #[command(long_about = "Print the repository health scorecard.\n\n\
        Collects stars, forks, commit recency and issue counts, then scores them.\n\
        No generative model is called and nothing is persisted.")]
    Scan {
        /// Repository URL (https://github.com/owner/repo)
        #[arg(env = "REPO_URL")]
        repo_url: String,
    },
    /// List or forget persisted pipeline runs
    Runs {
        /// Run-state database (default: [pipeline].state_path)
        #[arg(long)]
        state: Option<PathBuf>,
        /// Delete the run with this id
        #[arg(long, value_name = "RUN_ID")]
        forget: Option<String>,
    },
    /// Create a default .repovet.toml configuration file
    #[command(long_about = "Create a default .repovet.toml configuration file.\n\n\
        Fails if .repovet.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Args)]
struct AuditArgs {
    /// Repository URL (https://github.com/owner/repo)
    #[arg(env = "REPO_URL")]
    repo_url: String,
    /// Run id to create or resume (default: derived from the URL)
    #[arg(long)]
    run_id: Option<String>,
    /// Discard any saved progress for this run first
    #[arg(long)]
    fresh: bool,
    /// Stop after this stage
    #[arg(long, value_enum)]
    until: Option<UntilStage>,
    /// Report file (default: [pipeline].output)
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Run-state database (default: [pipeline].state_path)
    #[arg(long)]
    state: Option<PathBuf>,
    /// Maximum concurrent file audits
    #[arg(long)]
    concurrency: Option<usize>,
    /// Seed for the spot-check sampler
    #[arg(long)]
    seed: Option<u64>,
    /// Model alias for core-file selection
    #[arg(long, env = "STRATEGIST_MODEL")]
    strategist_model: Option<String>,
    /// Model alias for core-track audits
    #[arg(long, env = "PRIMARY_AUDIT_MODEL")]
    primary_audit_model: Option<String>,
    /// Model alias for random-track audits
    #[arg(long, env = "RANDOM_AUDIT_MODEL")]
    random_audit_model: Option<String>,
    /// Model alias for the final report
    #[arg(long, env = "SYNTHESIZER_MODEL")]
    synthesizer_model: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum UntilStage {
    /// Stop after collecting metrics
    Scan,
    /// Stop after building the audit plan
    Plan,
    /// Stop after auditing files, before synthesis
    Audit,
}

impl From<UntilStage> for Stage {
    fn from(until: UntilStage) -> Self {
        match until {
            UntilStage::Scan => Stage::Scanning,
            UntilStage::Plan => Stage::Planning,
            UntilStage::Audit => Stage::Auditing,
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# repovet configuration
# Environment variables override this file; command-line flags override both.

[github]
# api_url = "https://api.github.com"
# token = "ghp_..."            # or GITHUB_TOKEN / GH_TOKEN
# proxy = "http://127.0.0.1:7890"
timeout_secs = 10
max_retries = 3

[llm]
# base_url = "https://openrouter.ai/api/v1"   # or OPENROUTER_BASE_URL
# api_key = "sk-..."                          # or OPENROUTER_API_KEY
temperature = 0.5
timeout_secs = 120
max_retries = 5
retry_base_delay_ms = 1000
retry_max_delay_ms = 60000

# Extra model aliases, merged over the built-in registry.
# [llm.models.local]
# model = "llama3"
# base_url = "http://localhost:11434/v1"
# temperature = 0.2

[models]
strategist = "gpt-4o-mini"
primary_audit = "gpt-4o-mini"
random_audit = "qwen-plus"
synthesizer = "deepseek-v3"

[audit]
concurrency = 5
max_core_files = 3
max_random_files = 2
# branch = "main"
# seed = 42

[pipeline]
state_path = ".repovet/runs.db"
output = "final_due_diligence_report.md"

# [prompts]
# path = "prompts.toml"
"#;

fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
}

/// Layer credentials and endpoints from the environment over the file config.
fn apply_env(config: &mut RepovetConfig) {
    if let Some(token) = env_any(&["GITHUB_TOKEN", "GH_TOKEN"]) {
        config.github.token = Some(token);
    }
    if let Some(proxy) = env_any(&["GITHUB_PROXY"]) {
        config.github.proxy = Some(proxy);
    }
    if let Some(key) = env_any(&["OPENROUTER_API_KEY", "LLM_API_KEY"]) {
        config.llm.api_key = Some(key);
    }
    if let Some(url) = env_any(&["OPENROUTER_BASE_URL", "LLM_BASE_URL"]) {
        config.llm.base_url = url;
    }
}

fn load_config(path: Option<&Path>) -> Result<RepovetConfig> {
    let mut config = match path {
        Some(path) => RepovetConfig::from_file(path)?,
        None => {
            let default_path = Path::new(".repovet.toml");
            if default_path.exists() {
                RepovetConfig::from_file(default_path)?
            } else {
                RepovetConfig::default()
            }
        }
    };
    apply_env(&mut config);
    Ok(config)
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn spinner(message: &str) -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    pb.set_style(
        indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})").unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}

fn stage_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Scanning => "Collecting repository metrics...",
        Stage::Planning => "Selecting files to audit...",
        Stage::Auditing => "Auditing files...",
        Stage::Synthesizing => "Writing the final report...",
        Stage::Done => "Done",
    }
}

fn render_scorecard(scan: &ScanReport, format: OutputFormat) -> Result<String> {
    let card = &scan.scorecard;
    let m = &scan.metrics;
    let recency = m
        .last_commit_days_ago
        .map(|d| format!("{d} days ago"))
        .unwrap_or_else(|| "unknown".into());
    let resolution = m
        .issues
        .resolution_rate
        .map(|r| format!("{:.0}%", r * 100.0))
        .unwrap_or_else(|| "n/a".into());

    let out = match format {
        OutputFormat::Json => serde_json::to_string_pretty(scan).into_diagnostic()?,
        OutputFormat::Markdown => {
            let mut out = format!("## {} health: {}\n\n", m.repo, card.verdict);
            out.push_str(&format!("**Score:** {:.2}\n\n", card.total_score));
            out.push_str("| Factor | Score |\n|---|---|\n");
            out.push_str(&format!("| Activity | {:.2} |\n", card.breakdown.activity));
            out.push_str(&format!("| Issue health | {:.2} |\n", card.breakdown.issue_health));
            out.push_str(&format!("| Popularity | {:.2} |\n", card.breakdown.popularity));
            out.push_str(&format!("| Risk | {:.2} |\n\n", card.breakdown.risk));
            for s in &card.positive_signals {
                out.push_str(&format!("- ✅ {s}\n"));
            }
            for s in &card.negative_signals {
                out.push_str(&format!("- ⚠️ {s}\n"));
            }
            out
        }
        OutputFormat::Text => {
            let mut out = format!("{}: {} ({:.2})\n", m.repo, card.verdict, card.total_score);
            out.push_str(&format!(
                "  stars {}  forks {}  last commit {}  issues {} open / {} closed ({resolution} resolved)\n",
                m.stars, m.forks, recency, m.issues.open, m.issues.closed
            ));
            out.push_str(&format!(
                "  activity {:.2}  issue health {:.2}  popularity {:.2}  risk {:.2}\n",
                card.breakdown.activity,
                card.breakdown.issue_health,
                card.breakdown.popularity,
                card.breakdown.risk
            ));
            for s in &card.positive_signals {
                out.push_str(&format!("  + {s}\n"));
            }
            for s in &card.negative_signals {
                out.push_str(&format!("  - {s}\n"));
            }
            out
        }
    };
    Ok(out)
}

async fn run_audit(config: &mut RepovetConfig, args: AuditArgs, format: OutputFormat) -> Result<()> {
    config.models.apply_overrides(
        args.strategist_model,
        args.primary_audit_model,
        args.random_audit_model,
        args.synthesizer_model,
    );
    if let Some(n) = args.concurrency {
        config.audit.concurrency = n.max(1);
    }
    if args.seed.is_some() {
        config.audit.seed = args.seed;
    }
    let state_path = args.state.unwrap_or_else(|| config.pipeline.state_path.clone());
    let output = args.output.unwrap_or_else(|| config.pipeline.output.clone());
    let last: Stage = args.until.map(Stage::from).unwrap_or(Stage::Synthesizing);

    RepoRef::parse(&args.repo_url)?;
    let run_id = match args.run_id {
        Some(id) => id,
        None => default_run_id(&args.repo_url)?,
    };

    let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::open(&state_path)?);
    if args.fresh && forget_run(store.as_ref(), &run_id).await? {
        eprintln!("Discarded saved progress for run {run_id}");
    }

    let finished = load_run(store.as_ref(), &run_id)
        .await?
        .is_some_and(|run| run.is_done());
    if !finished && config.llm.api_key.is_none() {
        return Err(RepovetError::Config(
            "no model API key; set OPENROUTER_API_KEY or [llm].api_key".into(),
        )
        .into());
    }
    if config.github.token.is_none() {
        tracing::warn!("no GitHub token configured, unauthenticated rate limits apply");
    }

    let host = Arc::new(GitHubClient::new(&config.github)?);
    let model = Arc::new(LlmClient::new(&config.llm)?);
    let prompts = Arc::new(PromptLibrary::load(config.prompts.path.as_deref())?);
    let orchestrator = Orchestrator::from_config(host, model, prompts, Arc::clone(&store), config);

    let pb = spinner("Starting...");
    let mut run: Option<PipelineRun> = None;
    for stage in [Stage::Scanning, Stage::Planning, Stage::Auditing, Stage::Synthesizing] {
        if stage > last {
            break;
        }
        if let Some(pb) = &pb {
            pb.set_message(stage_message(stage));
        }
        match orchestrator.run_until(&args.repo_url, &run_id, stage).await {
            Ok(r) => run = Some(r),
            Err(e) => {
                if let Some(pb) = &pb {
                    pb.finish_with_message("Failed");
                }
                eprintln!(
                    "Progress is saved in {}. Resume with: repovet audit {} --run-id {}",
                    state_path.display(),
                    args.repo_url,
                    run_id
                );
                return Err(e.into());
            }
        }
    }
    if let Some(pb) = pb {
        pb.finish_with_message("Done");
    }
    let Some(run) = run else {
        return Ok(());
    };

    if !run.is_done() {
        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&run).into_diagnostic()?);
            }
            _ => println!(
                "Run {} stopped before {}. Re-run without --until to continue.",
                run.run_id, run.current_stage
            ),
        }
        return Ok(());
    }

    let report = run.report()?.ok_or_else(|| {
        RepovetError::State(format!("run {run_id} finished without a report"))
    })?;
    std::fs::write(&output, &report.body)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to write {}", output.display()))?;

    let scan = run.scan_report()?;
    match format {
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "runId": run.run_id,
                "output": output,
                "degraded": report.degraded,
                "scorecard": scan.as_ref().map(|s| &s.scorecard),
            });
            println!("{}", serde_json::to_string_pretty(&summary).into_diagnostic()?);
        }
        OutputFormat::Markdown => println!("{}", report.body),
        OutputFormat::Text => {
            if let Some(scan) = &scan {
                print!("{}", render_scorecard(scan, OutputFormat::Text)?);
            }
            if report.degraded {
                eprintln!("Warning: synthesis failed; the report contains the error instead.");
            }
            println!("Report written to {}", output.display());
        }
    }
    Ok(())
}

fn print_runs(runs: &[PipelineRun], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(runs).into_diagnostic()?);
        }
        _ if runs.is_empty() => println!("No saved runs."),
        OutputFormat::Markdown => {
            println!("| Run | Stage | Repository | Updated | Error |\n|---|---|---|---|---|");
            for run in runs {
                println!(
                    "| {} | {} | {} | {} | {} |",
                    run.run_id,
                    run.current_stage,
                    run.repo_url,
                    run.updated_at.format("%Y-%m-%d %H:%M"),
                    run.last_error.as_deref().unwrap_or("")
                );
            }
        }
        OutputFormat::Text => {
            for run in runs {
                println!(
                    "{:<16}  {:<12}  {}  (updated {})",
                    run.run_id,
                    run.current_stage,
                    run.repo_url,
                    run.updated_at.format("%Y-%m-%d %H:%M")
                );
                if let Some(err) = &run.last_error {
                    println!("{:<16}  last error: {err}", "");
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .expect("miette handler");
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Command::Audit(args) => {
            let mut config = load_config(cli.config.as_deref())?;
            run_audit(&mut config, args, cli.format).await?;
        }
        Command::Scan { repo_url } => {
            let config = load_config(cli.config.as_deref())?;
            let repo = RepoRef::parse(&repo_url)?;
            let host = Arc::new(GitHubClient::new(&config.github)?);
            let pb = spinner("Collecting repository metrics...");
            let scan = MetricsCollector::new(host).scan(&repo).await.inspect_err(|_e| {
                if let Some(pb) = &pb {
                    pb.finish_with_message("Failed");
                }
            })?;
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            print!("{}", render_scorecard(&scan, cli.format)?);
        }
        Command::Runs { state, forget } => {
            let config = load_config(cli.config.as_deref())?;
            let path = state.unwrap_or(config.pipeline.state_path);
            let store = SqliteStateStore::open(&path)?;
            match forget {
                Some(run_id) => {
                    if forget_run(&store, &run_id).await? {
                        println!("Forgot run {run_id}");
                    } else {
                        miette::bail!("no saved run with id {run_id}");
                    }
                }
                None => print_runs(&list_runs(&store).await?, cli.format)?,
            }
        }
        Command::Init => {
            let path = Path::new(".repovet.toml");
            if path.exists() {
                miette::bail!(".repovet.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .repovet.toml with default configuration");
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "repovet", &mut std::io::stdout());
        }
    }

    Ok(())
}
