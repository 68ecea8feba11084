/// Fixture Enricher: football fixture enrichment worker
///
/// What it does:
///   1. Discovers league rounds and cup knockout phases as they get published
///   2. Follows live fixtures through the source's live feed
///   3. Enriches finished fixtures with statistics, incidents and standings
///   4. Cleans up postponed duplicates and fixtures stuck between states
///
/// Run:
///   cargo run --bin enrichment-worker

use anyhow::{Context, Result};
use browser_session::{BrowserSession, ChromeLauncher, ChromeOptions, SessionConfig};
use dotenv::dotenv;
use enrichment_worker::{EnrichmentWorker, WorkerConfig};
use fixture_scraper::{RetryPolicy, ScraperClient, TournamentRegistry};
use logger::EventLogger;
use match_store::MatchStateStore;
use std::env;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Minimum spacing between two requests to the source.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(1250);

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!("=== Fixture Enricher ===");
    info!("Logs: ./logs/");

    // Single instance lock
    let lock_file_path = env::temp_dir().join("fixture_enricher.lock");
    let lock_file = match File::create(&lock_file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to create lock file at {:?}: {}", lock_file_path, e);
            return Ok(());
        }
    };

    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => {
            info!("Acquired single-instance lock.");
            guard
        }
        Err(_) => {
            warn!("Another instance of enrichment-worker is already running! Exiting.");
            return Ok(());
        }
    };

    let registry = match env::var("TOURNAMENTS_FILE").ok().filter(|v| !v.trim().is_empty()) {
        Some(path) => TournamentRegistry::load(&path)?,
        None => TournamentRegistry::builtin(),
    };
    let registry = Arc::new(registry);
    for t in registry.iter() {
        info!(
            "🏟️ {} (tournament {}, season {}, {} rounds, {} knockout phases)",
            t.name,
            t.tournament_id,
            t.season_id,
            t.total_rounds,
            t.knockout_phases.len()
        );
    }

    let chrome = ChromeOptions {
        base_url: env::var("SOURCE_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| ChromeOptions::default().base_url),
        ..ChromeOptions::default()
    };
    let session_defaults = SessionConfig::default();
    let session = Arc::new(BrowserSession::new(
        Arc::new(ChromeLauncher::new(chrome)),
        SessionConfig {
            max_age: env_parsed::<u64>("SESSION_MAX_AGE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(session_defaults.max_age),
            max_operations: env_parsed("SESSION_MAX_OPS").unwrap_or(session_defaults.max_operations),
        },
    ));

    let retry_defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        max_attempts: env_parsed("SCRAPE_ATTEMPTS").unwrap_or(retry_defaults.max_attempts),
        delay: env_parsed::<u64>("SCRAPE_RETRY_DELAY_SECS")
            .map(Duration::from_secs)
            .unwrap_or(retry_defaults.delay),
        ..retry_defaults
    };
    let client = Arc::new(ScraperClient::new(
        session,
        Arc::clone(&registry),
        retry,
        MIN_REQUEST_INTERVAL,
    ));

    let db_path = env::var("FIXTURE_DB_PATH").unwrap_or_else(|_| "data/fixtures.db".to_string());
    let store = MatchStateStore::open(&db_path).with_context(|| format!("open store at {db_path}"))?;

    let config = WorkerConfig::from_env();
    info!(
        "Cycle delay: {}s active / {}s idle, discovery every {}s, max {} attempts",
        config.active_interval.as_secs(),
        config.idle_interval.as_secs(),
        config.discovery_interval.as_secs(),
        config.max_attempts
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("🛑 Ctrl-C received, finishing current step"),
                Err(e) => error!("Cannot listen for Ctrl-C: {}", e),
            }
            cancel.cancel();
        });
    }

    let mut worker = EnrichmentWorker::new(
        client,
        store,
        registry,
        config,
        EventLogger::new("logs"),
        cancel,
    );
    worker.run().await
}
