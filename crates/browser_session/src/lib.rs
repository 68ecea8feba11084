//! Browser session for the fixture source
//!
//! The source only answers requests that look like they come from its own
//! pages, so every fetch runs inside a real (headless) Chrome tab that has
//! loaded the site first. This crate owns that process:
//!
//! - one browser, one tab, one operation in flight (single-slot mutex)
//! - every operation runs against a session that just answered a ping
//! - the whole browser is recycled after `max_age` or `max_operations`
//!
//! The Chrome specifics sit behind [`PageLauncher`] / [`BrowserPage`] so the
//! scraper and worker can be driven by fakes.

mod chrome;

pub use chrome::{ChromeLauncher, ChromeOptions};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, info, warn};

/// Raw answer of an in-page request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

impl PageResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One launched browser page. All calls block; the session moves them onto
/// the blocking pool.
pub trait BrowserPage: Send + 'static {
    /// Trivial evaluation. `Ok` means the process is alive and the page answers.
    fn ping(&self) -> Result<()>;

    /// Same-origin request executed by the page itself (cookies + headers of
    /// the real browser). `path` is relative to the page origin.
    fn fetch(&self, path: &str) -> Result<PageResponse>;

    /// Best-effort shutdown. Errors are swallowed by implementations.
    fn close(self: Box<Self>);
}

/// Starts a fresh browser and returns its ready page.
pub trait PageLauncher: Send + Sync + 'static {
    fn launch(&self) -> Result<Box<dyn BrowserPage>>;
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Browser is relaunched once it is older than this.
    pub max_age: Duration,
    /// ...or once it has served this many operations.
    pub max_operations: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(600),
            max_operations: 400,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub launches: u64,
    pub recycles: u64,
    pub operations: u64,
}

struct LiveSession {
    page: Box<dyn BrowserPage>,
    started_at: Instant,
    operations: u32,
}

pub struct BrowserSession {
    launcher: Arc<dyn PageLauncher>,
    config: SessionConfig,
    slot: Mutex<Option<LiveSession>>,
    launches: AtomicU64,
    recycles: AtomicU64,
    operations: AtomicU64,
}

impl BrowserSession {
    pub fn new(launcher: Arc<dyn PageLauncher>, config: SessionConfig) -> Self {
        Self {
            launcher,
            config,
            slot: Mutex::new(None),
            launches: AtomicU64::new(0),
            recycles: AtomicU64::new(0),
            operations: AtomicU64::new(0),
        }
    }

    /// Checks the current session without launching one. An unresponsive
    /// session is closed and `false` returned.
    pub async fn ensure_healthy(&self) -> bool {
        let mut slot = self.slot.lock().await;
        let Some(session) = slot.take() else {
            return false;
        };

        match run_blocking(session, |page| page.ping()).await {
            Some((session, Ok(()))) => {
                *slot = Some(session);
                true
            }
            Some((session, Err(e))) => {
                warn!("Browser session failed health check: {:#}", e);
                close_quietly(session).await;
                false
            }
            None => false,
        }
    }

    /// Runs one operation against a verified-healthy page.
    ///
    /// The outer `Result` only fails when no session could be obtained; what
    /// the operation itself returns is handed back untouched.
    pub async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&dyn BrowserPage) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut slot = self.slot.lock().await;
        let session = self.acquire_healthy(&mut slot).await?;

        match run_blocking(session, op).await {
            Some((mut session, out)) => {
                session.operations += 1;
                self.operations.fetch_add(1, Ordering::Relaxed);
                *slot = Some(session);
                Ok(out)
            }
            None => Err(anyhow!("browser operation panicked, session dropped")),
        }
    }

    /// Tears the browser down. The next [`run`](Self::run) launches a new one.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.take() {
            debug!(
                "Closing browser session after {} operations ({}s)",
                session.operations,
                session.started_at.elapsed().as_secs()
            );
            close_quietly(session).await;
        }
    }

    pub async fn is_open(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            launches: self.launches.load(Ordering::Relaxed),
            recycles: self.recycles.load(Ordering::Relaxed),
            operations: self.operations.load(Ordering::Relaxed),
        }
    }

    fn is_spent(&self, session: &LiveSession) -> bool {
        session.started_at.elapsed() >= self.config.max_age
            || session.operations >= self.config.max_operations
    }

    async fn acquire_healthy(&self, slot: &mut Option<LiveSession>) -> Result<LiveSession> {
        if let Some(session) = slot.take() {
            if self.is_spent(&session) {
                info!(
                    operations = session.operations,
                    age_secs = session.started_at.elapsed().as_secs(),
                    "Recycling browser session"
                );
                self.recycles.fetch_add(1, Ordering::Relaxed);
                close_quietly(session).await;
            } else {
                match run_blocking(session, |page| page.ping()).await {
                    Some((session, Ok(()))) => return Ok(session),
                    Some((session, Err(e))) => {
                        warn!("Browser session unhealthy, relaunching: {:#}", e);
                        close_quietly(session).await;
                    }
                    None => warn!("Browser ping panicked, relaunching"),
                }
            }
        }

        self.launch().await
    }

    async fn launch(&self) -> Result<LiveSession> {
        let launcher = Arc::clone(&self.launcher);
        let page = task::spawn_blocking(move || launcher.launch())
            .await
            .context("browser launch task panicked")?
            .context("Failed to start browser session")?;
        self.launches.fetch_add(1, Ordering::Relaxed);

        let session = LiveSession {
            page,
            started_at: Instant::now(),
            operations: 0,
        };

        // A page that cannot answer the first ping is as good as a failed launch.
        match run_blocking(session, |page| page.ping()).await {
            Some((session, Ok(()))) => {
                info!("🌐 Browser session ready");
                Ok(session)
            }
            Some((session, Err(e))) => {
                close_quietly(session).await;
                Err(e.context("Fresh browser session failed first ping"))
            }
            None => Err(anyhow!("Fresh browser session panicked on first ping")),
        }
    }
}

async fn run_blocking<T, F>(session: LiveSession, op: F) -> Option<(LiveSession, T)>
where
    F: FnOnce(&dyn BrowserPage) -> T + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(move || {
        let out = op(session.page.as_ref());
        (session, out)
    })
    .await
    .ok()
}

async fn close_quietly(session: LiveSession) {
    if task::spawn_blocking(move || session.page.close()).await.is_err() {
        warn!("Browser close panicked, process left to the OS");
    }
}
