//! Command-line interface for capturekit.
//!
//! Provides commands for submitting video URLs for transcription,
//! inspecting and resetting the credit balance, and reviewing history.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::adapters::HttpTranscriptionService;
use crate::config::{self, ResolvedConfig};
use crate::core::{
    BalanceLock, BalanceStore, CreditLedger, ErrorCache, Journal, Orchestrator, RateLimiter,
};

/// capturekit - Credit-metered video transcription client
#[derive(Parser, Debug)]
#[command(name = "capturekit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit one or more TikTok/YouTube URLs for transcription
    Submit {
        /// Video URLs (processed concurrently)
        #[arg(required = true)]
        urls: Vec<String>,

        /// Print full results as JSON instead of transcript text
        #[arg(long)]
        json: bool,
    },

    /// Show (or reset) the credit balance
    Balance {
        /// Overwrite the stored balance
        #[arg(long)]
        set: Option<u64>,
    },

    /// List recent submissions from the journal
    History {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit { urls, json } => submit_urls(&urls, json).await,
            Commands::Balance { set } => show_balance(set).await,
            Commands::History { limit } => show_history(limit).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Wire up an orchestrator from configuration
async fn build_orchestrator(cfg: &ResolvedConfig, total: u64) -> Result<Orchestrator> {
    let ledger = Arc::new(CreditLedger::new(total));
    let cache = Arc::new(ErrorCache::new());
    let limiter = Arc::new(RateLimiter::new(
        cfg.limits.requests_per_window,
        cfg.rate_window()?,
    ));
    let service = Arc::new(
        HttpTranscriptionService::new(cfg.service.base_url.clone())
            .with_token(cfg.service.token.clone())
            .with_poll_interval(Duration::from_millis(cfg.service.poll_interval_ms)),
    );
    let journal = Journal::open(&cfg.home)
        .await
        .with_context(|| format!("Failed to open journal in {}", cfg.home.display()))?;

    Ok(
        Orchestrator::new(ledger, cache, limiter, service, cfg.orchestrator_settings()?)
            .with_journal(Arc::new(journal)),
    )
}

/// Hold the balance file for the whole run, waiting out any other run
fn lock_balance(store: &BalanceStore) -> Result<BalanceLock> {
    if let Some(lock) = store.try_lock()? {
        return Ok(lock);
    }

    eprintln!("[Waiting for another capturekit run to release the balance]");
    store.lock()
}

/// Persist every balance change through the held lock
fn persist_balance_changes(
    orchestrator: &Orchestrator,
    lock: Arc<Mutex<BalanceLock>>,
    mut saved: u64,
) -> JoinHandle<()> {
    let mut balances = orchestrator.subscribe_balance();

    tokio::spawn(async move {
        while balances.changed().await.is_ok() {
            let total = balances.borrow_and_update().total;
            if total == saved {
                continue;
            }

            let result = lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .save(total);
            match result {
                Ok(_) => saved = total,
                Err(e) => warn!(error = %e, total, "Failed to persist balance"),
            }
        }
    })
}

/// Submit URLs concurrently and report each outcome
async fn submit_urls(urls: &[String], json: bool) -> Result<()> {
    let cfg = config::config()?;
    let store = BalanceStore::new(cfg.balance_path());
    let mut lock = lock_balance(&store)?;
    let total = lock.load_or(cfg.credits.initial_balance)?;
    let lock = Arc::new(Mutex::new(lock));

    let orchestrator = build_orchestrator(cfg, total).await?;
    let persister = persist_balance_changes(&orchestrator, Arc::clone(&lock), total);
    eprintln!("[Balance: {} credit(s)]", total);

    let submissions: Vec<_> = urls
        .iter()
        .map(|url| (url.clone(), orchestrator.submit(url.clone())))
        .collect();

    let mut failures = 0;
    for (url, submission) in submissions {
        match submission.outcome().await {
            Ok(result) => {
                eprintln!("\n[{}: {}]", url, result.status);
                if json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else if let Some(transcript) = &result.transcript {
                    println!("{}", transcript);
                }
            }
            Err(error) => {
                failures += 1;
                eprintln!("\n[{}: {}]", url, error.user_message());
                if json {
                    println!("{}", serde_json::to_string_pretty(&error)?);
                }
            }
        }
    }

    persister.abort();
    let balance = orchestrator.balance();
    lock.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .save(balance.total)?;
    eprintln!("\n[Balance: {} credit(s) remaining]", balance.available());

    if failures > 0 {
        anyhow::bail!("{} of {} submission(s) failed", failures, urls.len());
    }

    Ok(())
}

/// Show or overwrite the durable balance
async fn show_balance(set: Option<u64>) -> Result<()> {
    let cfg = config::config()?;
    let store = BalanceStore::new(cfg.balance_path());

    if let Some(total) = set {
        let stored = lock_balance(&store)?.save(total)?;
        println!("Balance set to {} credit(s)", stored.total);
        return Ok(());
    }

    match store.load()? {
        Some(stored) => println!(
            "{} credit(s) (updated {})",
            stored.total,
            stored.updated_at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!(
            "{} credit(s) (initial balance, nothing spent yet)",
            cfg.credits.initial_balance
        ),
    }

    Ok(())
}

/// Print per-URL summaries from the journal
async fn show_history(limit: usize) -> Result<()> {
    let cfg = config::config()?;
    let journal = Journal::new(cfg.journal_path());
    let summaries = journal
        .history(limit)
        .await
        .context("Failed to read journal")?;

    if summaries.is_empty() {
        println!("No submissions found");
        return Ok(());
    }

    println!(
        "{:<18} {:<12} {:>8} {:>8}  {}",
        "FINGERPRINT", "STATUS", "ATTEMPTS", "CREDITS", "URL"
    );
    println!("{}", "-".repeat(90));

    for summary in summaries {
        println!(
            "{:<18} {:<12} {:>8} {:>8}  {}",
            summary.fingerprint,
            summary.status,
            summary.attempts,
            summary.credits_spent,
            summary.request_key
        );
        if let Some((kind, error)) = &summary.last_error {
            println!("{:<18} last error [{}]: {}", "", kind, error);
        }
    }

    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("CaptureKit Configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:    {}", cfg.home.display());
    println!("  Balance: {}", cfg.balance_path().display());
    println!("  Journal: {}", cfg.journal_path().display());
    println!();
    println!("Credits:");
    println!("  Initial balance:  {}", cfg.credits.initial_balance);
    println!("  Cost per request: {}", cfg.credits.cost_per_request);
    println!();
    println!("Limits:");
    println!(
        "  Requests: {} per {}s",
        cfg.limits.requests_per_window, cfg.limits.window_seconds
    );
    println!("  Error freshness: {}s", cfg.limits.error_freshness_seconds);
    println!("  Call timeout:    {}s", cfg.limits.call_timeout_seconds);
    println!();
    println!("Service:");
    println!("  Base URL:      {}", cfg.service.base_url);
    println!(
        "  Token:         {}",
        if cfg.service.token.is_some() { "(set)" } else { "(none)" }
    );
    println!("  Poll interval: {}ms", cfg.service.poll_interval_ms);

    Ok(())
}
