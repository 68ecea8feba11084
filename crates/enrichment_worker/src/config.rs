use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Cadence, batch and retry knobs of the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delay after a cycle that saw live or freshly enriched fixtures.
    pub active_interval: Duration,
    /// Delay after a cycle with nothing to do.
    pub idle_interval: Duration,
    pub discovery_interval: Duration,
    /// Pause between two fixtures of one batch.
    pub fixture_delay: Duration,
    /// Enrichment attempts before a fixture is left in Error/PartialData.
    pub max_attempts: u32,
    pub limbo_after: Duration,
    pub limbo_batch: u32,
    pub enrich_batch: u32,
    pub teardown_when_idle: bool,
    /// Age after which another instance's round lock may be taken over.
    pub lock_timeout: Duration,
    pub worker_id: String,
    pub ntfy_topic: Option<String>,
}

pub const MIN_ATTEMPTS: u32 = 3;
pub const MAX_ATTEMPTS: u32 = 10;

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_secs(90),
            idle_interval: Duration::from_secs(15 * 60),
            discovery_interval: Duration::from_secs(6 * 3600),
            fixture_delay: Duration::from_millis(1500),
            max_attempts: 5,
            limbo_after: Duration::from_secs(3 * 3600),
            limbo_batch: 20,
            enrich_batch: 50,
            teardown_when_idle: true,
            lock_timeout: Duration::from_secs(30 * 60),
            worker_id: default_worker_id(),
            ntfy_topic: None,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            active_interval: secs("ACTIVE_INTERVAL_SECS").unwrap_or(d.active_interval),
            idle_interval: secs("IDLE_INTERVAL_SECS").unwrap_or(d.idle_interval),
            discovery_interval: secs("DISCOVERY_INTERVAL_SECS").unwrap_or(d.discovery_interval),
            fixture_delay: parsed::<u64>("FIXTURE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.fixture_delay),
            max_attempts: parsed::<u32>("MAX_ENRICHMENT_ATTEMPTS")
                .unwrap_or(d.max_attempts)
                .clamp(MIN_ATTEMPTS, MAX_ATTEMPTS),
            limbo_after: secs("LIMBO_AFTER_SECS").unwrap_or(d.limbo_after),
            limbo_batch: parsed("LIMBO_BATCH").unwrap_or(d.limbo_batch),
            enrich_batch: parsed("ENRICH_BATCH").unwrap_or(d.enrich_batch),
            teardown_when_idle: parsed("TEARDOWN_WHEN_IDLE").unwrap_or(d.teardown_when_idle),
            lock_timeout: d.lock_timeout,
            worker_id: env::var("WORKER_ID")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(d.worker_id),
            ntfy_topic: env::var("NTFY_TOPIC").ok().filter(|v| !v.trim().is_empty()),
        }
    }
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn secs(key: &str) -> Option<Duration> {
    parsed::<u64>(key).map(Duration::from_secs)
}

/// `{hostname}-{pid}`, unique enough to tell two instances' locks apart.
pub fn default_worker_id() -> String {
    let host = env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "worker".to_string());
    format!("{host}-{}", std::process::id())
}
