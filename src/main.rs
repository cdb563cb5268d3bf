// Requires a Google Custom Search engine and an OpenRouter API key.
// Turns a research theme into search queries, scrapes the result pages,
// and condenses everything into one report.

mod audit;
mod error;
mod fetch;
mod llm;
mod pipeline;
mod search;
mod store;
mod web;

use crate::audit::{AuditSink, JsonFileAudit};
use crate::error::ResearchError;
use crate::fetch::HttpFetcher;
use crate::llm::OpenRouterChat;
use crate::pipeline::{PipelineConfig, Researcher};
use crate::search::GoogleSearch;
use crate::store::Store;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

// CL arguments for config. Credentials come from the environment:
// GOOGLE_API_KEY, GOOGLE_CSE_ID, OPENROUTER_API_KEY (a .env file works too).
#[derive(Parser, Debug)]
#[command(author, version, about = "Theme -> search queries -> scraped pages -> research report", long_about = None)]
struct Args {
    /// Research theme. Required unless --web is set.
    #[arg(short, long)]
    theme: Option<String>,

    /// Directory holding queries.json, results.json, report.txt and log.json
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    #[arg(long, default_value = "tngtech/deepseek-r1t2-chimera:free")]
    model: String,

    /// Token budget per summarization call; the chunk threshold is
    /// token budget x chars-per-token
    #[arg(long, default_value_t = 100_000)]
    token_budget: usize,

    /// Rough characters-per-token estimate
    #[arg(long, default_value_t = 2.5)]
    chars_per_token: f64,

    /// Delay between page fetches, in milliseconds
    #[arg(long, default_value_t = 1000)]
    fetch_delay_ms: u64,

    /// Serve the browser interface instead of running the pipeline once
    #[arg(long, default_value_t = false)]
    web: bool,

    #[arg(long, default_value_t = 6601)]
    web_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    // Missing credentials surface as request failures later, the same way
    // invalid keys would.
    let search_key = std::env::var("GOOGLE_API_KEY").unwrap_or_default();
    let engine_id = std::env::var("GOOGLE_CSE_ID").unwrap_or_default();
    let model_key = std::env::var("OPENROUTER_API_KEY").unwrap_or_default();

    let store = Store::new(&args.data_dir);
    store.init()?;

    let log_path = args.data_dir.join("log.json");
    let ui_logs: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let audit: Arc<dyn AuditSink> = if args.web {
        Arc::new(web::UiAudit::new(JsonFileAudit::new(log_path), ui_logs.clone()))
    } else {
        Arc::new(JsonFileAudit::new(log_path))
    };

    let config = PipelineConfig {
        token_budget: args.token_budget,
        chars_per_token: args.chars_per_token,
        fetch_delay: Duration::from_millis(args.fetch_delay_ms),
    };

    let researcher = Arc::new(Researcher::new(
        Arc::new(GoogleSearch::new(search_key, engine_id)?),
        Arc::new(HttpFetcher::new()?),
        Arc::new(OpenRouterChat::new(model_key, args.model.clone())?),
        store,
        audit,
        config,
    ));

    if args.web {
        web::serve(researcher, ui_logs, args.web_port).await;
        return Ok(());
    }

    let theme = args
        .theme
        .context("--theme is required unless --web is set")?;
    run_pipeline(&researcher, &theme).await
}

/// One full pass: generate queries, collect every one, write the report.
async fn run_pipeline(researcher: &Researcher, theme: &str) -> Result<()> {
    let queries = researcher
        .generate_queries(theme)
        .await
        .context("query generation failed")?;

    let total = queries.len();
    for (i, query) in queries.iter().enumerate() {
        info!("search {}/{}: {}", i + 1, total, query);
        researcher
            .collect(query)
            .await
            .with_context(|| format!("collection failed for query: {query}"))?;
    }

    match researcher.synthesize().await {
        Ok(report) => {
            println!("{report}");
            Ok(())
        }
        Err(ResearchError::Precondition(msg)) => {
            info!("{msg}");
            Ok(())
        }
        Err(e) => Err(e).context("report synthesis failed"),
    }
}
