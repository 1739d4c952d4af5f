//! deep-research: command-line entrypoint.
//! Runs one research pass on a subject, or maintains the fetch cache.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use deep_research::cache::disk::DiskCache;
use deep_research::config::{self, ApiKeys};
use deep_research::pipeline::{build_fetcher, DigestSynthesizer, SubjectKeywords};
use deep_research::{CacheStore, CancellationToken, Pipeline, ResearchRequest, RunStatus};

#[derive(Debug, Parser)]
#[command(name = "deep-research", version, about = "Gather, sanitize and digest sources on a subject")]
struct Args {
    /// Research subject.
    #[arg(required_unless_present_any = ["purge_cache", "cleanup_cache"])]
    subject: Option<String>,

    /// Number of general web search rounds.
    #[arg(long, default_value_t = 3)]
    general_rounds: usize,

    /// Number of academic search rounds.
    #[arg(long, default_value_t = 2)]
    academic_rounds: usize,

    /// Where to write the report.
    #[arg(long, short, default_value = "research_report.md")]
    output: PathBuf,

    /// Write to exactly `--output` instead of a timestamped sibling.
    #[arg(long)]
    no_timestamp: bool,

    /// Delete every cached response and exit.
    #[arg(long)]
    purge_cache: bool,

    /// Remove expired / over-budget cache entries and exit.
    #[arg(long, conflicts_with = "purge_cache")]
    cleanup_cache: bool,

    /// Config file (TOML or JSON); defaults to $DEEP_RESEARCH_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("deep_research=info,warn"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Local .env is optional.
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(p) => {
            let mut cfg = config::load_from(p)?;
            config::apply_env_overrides(&mut cfg);
            cfg.sanitize();
            cfg
        }
        None => config::load_default()?,
    };

    if args.purge_cache || args.cleanup_cache {
        let cache = DiskCache::open(&cfg.cache.dir, cfg.cache.policy())
            .with_context(|| format!("opening cache at {}", cfg.cache.dir.display()))?;
        if args.purge_cache {
            let removed = cache.purge()?;
            println!("Cache purged ({removed} entries).");
        } else {
            let r = cache.cleanup()?;
            println!(
                "Cache cleanup complete: {} expired, {} evicted, {} entries / {} bytes left.",
                r.expired, r.evicted, r.remaining_entries, r.remaining_bytes
            );
        }
        return Ok(());
    }

    let keys = ApiKeys::from_env();
    keys.validate()
        .context("create a .env file with the required keys")?;

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let flag = cancelled.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping after in-flight work");
                flag.store(true, Ordering::SeqCst);
            }
        });
    }
    let cancel = CancellationToken::from_flag(cancelled)
        .with_poll_interval(cfg.cancel_poll_interval());

    let fetcher = Arc::new(build_fetcher(&cfg, &keys)?);
    let pipeline = Pipeline::new(
        fetcher,
        Arc::new(SubjectKeywords),
        Arc::new(DigestSynthesizer::default()),
    )
    .with_min_citations(cfg.min_citation_count);

    let mut request = ResearchRequest::new(args.subject.unwrap_or_default());
    request.general_rounds = args.general_rounds;
    request.academic_rounds = args.academic_rounds;
    request.output = Some(args.output);
    request.timestamped = !args.no_timestamp;

    let result = pipeline.run(&request, &cancel).await;
    println!("Run {}: {} sources", result.run_id, result.records.len());
    for f in &result.failures {
        println!("  failed: {} ({})", f.task.identifier, f.error);
    }
    match result.status {
        RunStatus::Completed => {
            if let Some(p) = &result.artifact {
                println!("Report saved to {}", p.display());
            }
            Ok(())
        }
        RunStatus::Cancelled => {
            println!("Cancelled.");
            Ok(())
        }
        RunStatus::Failed(msg) => Err(anyhow::anyhow!(msg)),
    }
}
