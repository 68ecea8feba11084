//! One-shot probe of the fixture source through the real browser.
//! Run: cargo run --bin scrape-probe [match_id]

use anyhow::Result;
use browser_session::{BrowserSession, ChromeLauncher, ChromeOptions, SessionConfig};
use fixture_scraper::{RetryPolicy, ScraperClient, TournamentRegistry};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!("🚀 Fixture source probe");

    let registry = Arc::new(match std::env::var("TOURNAMENTS_FILE") {
        Ok(path) if !path.trim().is_empty() => TournamentRegistry::load(&path)?,
        _ => TournamentRegistry::builtin(),
    });
    let chrome = ChromeOptions {
        base_url: std::env::var("SOURCE_BASE_URL")
            .unwrap_or_else(|_| ChromeOptions::default().base_url),
        ..ChromeOptions::default()
    };
    let session = Arc::new(BrowserSession::new(
        Arc::new(ChromeLauncher::new(chrome)),
        SessionConfig::default(),
    ));
    let client = ScraperClient::new(
        Arc::clone(&session),
        Arc::clone(&registry),
        RetryPolicy::fixed(2, Duration::from_secs(3)),
        Duration::from_millis(1250),
    );

    info!("🔍 Fetching live fixtures...");
    let started = Instant::now();
    let mut probe_id = std::env::args().nth(1).and_then(|a| a.parse::<u64>().ok());

    match client.fetch_live_matches().await {
        Ok(live) => {
            info!("Found {} live fixtures in {:?}", live.len(), started.elapsed());
            for m in &live {
                info!(
                    "  [{}] {} {}-{} {} ({})",
                    m.id, m.home_team, m.home_score, m.away_score, m.away_team, m.status
                );
            }
            if probe_id.is_none() {
                probe_id = live.first().map(|m| m.id);
            }
        }
        Err(e) => warn!("Live fetch failed: {}", e),
    }

    match probe_id {
        Some(id) => {
            info!("Fetching bundle for fixture {}...", id);
            let started = Instant::now();
            match client.fetch_match_bundle(id).await {
                Ok(bundle) => {
                    let d = &bundle.detail;
                    info!(
                        "Bundle OK in {:?}: {} vs {} ({}-{}) {} venue={:?} referee={:?} attendance={:?}",
                        started.elapsed(),
                        d.event.home_team,
                        d.event.away_team,
                        d.event.home_score,
                        d.event.away_score,
                        d.event.status,
                        d.venue,
                        d.referee,
                        d.attendance
                    );
                    match &bundle.statistics {
                        Some(stats) => info!("  statistics: {} items", stats.len()),
                        None => info!("  statistics: not published"),
                    }
                    info!("  incidents: {}", bundle.incidents.len());
                }
                Err(e) => warn!("Bundle fetch failed: {}", e),
            }
        }
        None => info!("No fixture to probe, pass a match id as first argument"),
    }

    for t in registry.iter() {
        match client.fetch_standings(t).await {
            Ok(rows) => info!("🏆 {}: {} standing rows", t.name, rows.len()),
            Err(e) => warn!("Standings for {} failed: {}", t.name, e),
        }
    }

    let stats = session.stats();
    info!(
        "Session: {} launches, {} recycles, {} operations",
        stats.launches, stats.recycles, stats.operations
    );
    session.close().await;
    Ok(())
}
