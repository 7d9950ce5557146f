//! Redline - review and repair long-form articles
//!
//! Reviews a markdown article against its plan, then routes every reported
//! defect to the cheapest fix that can resolve it, re-reviewing until the
//! article is approved or the fix budget runs out.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use redline_adapters::config::Config;
use redline_adapters::inputs::{read_article, read_plan, read_research, write_atomic};
use redline_adapters::init_logging;
use redline_engine::{
    ClientSettings, LlmSectionWriter, ModelIds, OpenRouterClient, RecoveryConfig, RecoveryLoop,
    ReviewConfig, StructuredLlm,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "redline",
    about = "Review an article and repair its defects with an LLM",
    version
)]
struct Cli {
    /// Debug-level logging (REDLINE_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store the OpenRouter API key in the config file
    Setup {
        #[arg(long)]
        api_key: String,
    },
    /// Review the article once and print the result as JSON
    Review(InputArgs),
    /// Run the review/fix loop and write the repaired article
    Fix {
        #[command(flatten)]
        input: InputArgs,

        /// Fix passes allowed (defaults to config)
        #[arg(long)]
        iterations: Option<u32>,

        /// Sections touched per pass (defaults to config)
        #[arg(long)]
        max_fixes: Option<usize>,

        /// Where to write the repaired markdown (stdout report only if omitted)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Where to write the JSON report (stdout if omitted)
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Markdown article to review
    #[arg(long)]
    article: PathBuf,

    /// Article plan (JSON)
    #[arg(long)]
    plan: PathBuf,

    /// Research pool (JSON)
    #[arg(long)]
    research: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Setup { api_key } => setup_api_key(&api_key),
        Command::Review(input) => run_review(input).await,
        Command::Fix {
            input,
            iterations,
            max_fixes,
            out,
            report,
        } => run_fix(input, iterations, max_fixes, out, report).await,
    }
}

fn setup_api_key(key: &str) -> Result<()> {
    if !Config::validate_api_key_format(key) {
        warn!("key doesn't look like an OpenRouter key (usually starts with sk-); saving anyway");
    }
    let mut config = Config::load();
    config.api_key = Some(key.trim().to_string());
    config.save()?;
    eprintln!("  + API key saved to {}", Config::config_location());
    Ok(())
}

fn build_client(config: &Config) -> Result<Arc<dyn StructuredLlm>> {
    let client = OpenRouterClient::new(ClientSettings {
        api_key: config.api_key.clone().unwrap_or_default(),
        base_url: config.base_url.clone(),
        models: ModelIds {
            speed: config.models.speed.clone(),
            smart: config.models.smart.clone(),
        },
        request_timeout_secs: config.recovery.request_timeout_secs,
    })?;
    Ok(Arc::new(client))
}

fn recovery_config(config: &Config, iterations: Option<u32>, max_fixes: Option<usize>) -> RecoveryConfig {
    let settings = &config.recovery;
    RecoveryConfig {
        max_iterations: iterations.unwrap_or(settings.max_iterations),
        max_fixes_per_iteration: max_fixes.unwrap_or(settings.max_fixes_per_iteration).max(1),
        review: ReviewConfig {
            max_attempts: settings.review_max_attempts,
            max_document_chars: settings.review_max_chars,
            ..ReviewConfig::default()
        },
        ..RecoveryConfig::default()
    }
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing with the last applied edit");
            trigger.cancel();
        }
    });
    cancel
}

async fn run_review(input: InputArgs) -> Result<()> {
    let config = Config::load().with_env();
    let markdown = read_article(&input.article)?;
    let plan = read_plan(&input.plan)?;
    let research = read_research(input.research.as_deref())?;

    let llm = build_client(&config)?;
    let writer = Arc::new(LlmSectionWriter::new(llm.clone()));
    let controller = RecoveryLoop::new(llm, writer, recovery_config(&config, None, None));
    let cancel = cancel_on_ctrl_c();

    let outcome = controller
        .review(&markdown, &plan, &research, &cancel)
        .await
        .context("review failed")?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_fix(
    input: InputArgs,
    iterations: Option<u32>,
    max_fixes: Option<usize>,
    out: Option<PathBuf>,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let config = Config::load().with_env();
    let markdown = read_article(&input.article)?;
    let plan = read_plan(&input.plan)?;
    let research = read_research(input.research.as_deref())?;

    let llm = build_client(&config)?;
    let writer = Arc::new(LlmSectionWriter::new(llm.clone()));
    let controller = RecoveryLoop::new(llm, writer, recovery_config(&config, iterations, max_fixes));
    let cancel = cancel_on_ctrl_c();

    let report = controller.run(&markdown, &plan, &research, &cancel).await?;
    info!(
        termination = ?report.termination,
        approved = report.approved,
        fixes = report.metadata.fixes_applied.len(),
        "done"
    );

    if let Some(out) = out {
        write_atomic(&out, &report.markdown)?;
        info!(path = %out.display(), "repaired article written");
    }
    let json = serde_json::to_string_pretty(&report)?;
    match report_path {
        Some(path) => write_atomic(&path, &json)?,
        None => println!("{}", json),
    }
    Ok(())
}
