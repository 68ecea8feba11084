/// Fixture enricher: event logger
/// JSONL event stream, NTFY alerts

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        fs::create_dir_all(&dir).ok();
        Self { log_dir: dir }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Appends one event line to today's `YYYY-MM-DD.jsonl`.
    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    /// Like [`log`](Self::log) but never fails the caller.
    pub fn record<T: Serialize>(&self, event: &T) {
        if let Err(e) = self.log(event) {
            tracing::warn!("Event log write failed: {}", e);
        }
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

// ── Event types ──────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct FixtureEnrichedEvent {
    pub ts:                String,
    pub event:             &'static str,   // "FIXTURE_ENRICHED"
    pub fixture_id:        u64,
    pub tournament_id:     u32,
    pub home:              String,
    pub away:              String,
    pub score:             String,         // "2-1"
    pub processing_status: String,
    pub statistics:        usize,
    pub incidents:         usize,
    pub phase:             &'static str,   // "post_game" | "stuck_live" | "limbo"
}

#[derive(Serialize, Debug)]
pub struct EnrichmentFailedEvent {
    pub ts:         String,
    pub event:      &'static str,   // "ENRICHMENT_FAILED"
    pub fixture_id: u64,
    pub phase:      &'static str,
    pub attempts:   u32,
    pub exhausted:  bool,
    pub error:      String,
}

#[derive(Serialize, Debug)]
pub struct ZombieRemovedEvent {
    pub ts:                String,
    pub event:             &'static str,   // "ZOMBIE_REMOVED"
    pub fixture_id:        u64,
    pub tournament_id:     u32,
    pub season_id:         u32,
    pub round:             Option<u32>,
    pub home:              String,
    pub away:              String,
    pub status:            String,
    pub processing_status: String,
}

#[derive(Serialize, Debug)]
pub struct RoundFetchedEvent {
    pub ts:            String,
    pub event:         &'static str,   // "ROUND_FETCHED"
    pub tournament:    String,
    pub tournament_id: u32,
    pub round:         u32,
    pub phase:         Option<String>, // knockout phase name, None for league rounds
    pub fixtures:      usize,
    pub inserted:      usize,
}

#[derive(Serialize, Debug)]
pub struct CycleHeartbeatEvent {
    pub ts:              String,
    pub event:           &'static str,   // "CYCLE_HEARTBEAT"
    pub cycle:           u64,
    pub live:            usize,
    pub enriched:        usize,
    pub stuck_recovered: usize,
    pub limbo_recovered: usize,
    pub zombies_removed: usize,
    pub standings_synced: usize,
    pub phase_errors:    usize,
    pub idle:            bool,
    pub next_delay_secs: u64,
}

/// Push alert to `https://ntfy.sh/{topic}`
pub async fn send_ntfy_alert(topic: &str, msg: &str, title: &str) {
    let client = reqwest::Client::new();
    match client
        .post(format!("https://ntfy.sh/{topic}"))
        .header("Title", title)
        .header("Priority", "high")
        .header("Tags", "soccer,warning")
        .body(msg.to_string())
        .send()
        .await
    {
        Ok(_)  => tracing::info!("NTFY sent: {}", title),
        Err(e) => tracing::warn!("NTFY failed: {}", e),
    }
}
