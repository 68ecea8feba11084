use anyhow::{anyhow, Context, Result};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{BrowserPage, PageLauncher, PageResponse};

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    /// Origin the tab loads before any fetch, e.g. `https://www.sofascore.com`.
    pub base_url: String,
    pub headless: bool,
    pub sandbox: bool,
    pub navigation_timeout: Duration,
    /// Chrome exits by itself when nobody talks to it for this long.
    pub idle_timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            base_url: "https://www.sofascore.com".to_string(),
            headless: true,
            sandbox: false,
            navigation_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(900),
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            ),
        }
    }
}

pub struct ChromeLauncher {
    options: ChromeOptions,
}

impl ChromeLauncher {
    pub fn new(options: ChromeOptions) -> Self {
        Self { options }
    }
}

impl PageLauncher for ChromeLauncher {
    fn launch(&self) -> Result<Box<dyn BrowserPage>> {
        let launch = LaunchOptions::default_builder()
            .headless(self.options.headless)
            .sandbox(self.options.sandbox)
            .idle_browser_timeout(self.options.idle_timeout)
            .build()
            .context("Failed to build Chrome launch options")?;

        // Any early return below drops `browser`, which kills the process.
        let browser = Browser::new(launch).context("Failed to launch Chrome")?;
        let tab = browser.new_tab().context("Failed to create browser tab")?;
        tab.set_default_timeout(self.options.navigation_timeout);

        if let Some(ua) = &self.options.user_agent {
            tab.set_user_agent(ua, Some("en-US,en;q=0.9"), None)
                .context("Failed to set user agent")?;
        }

        tab.navigate_to(&self.options.base_url)
            .context("Chrome navigate failed")?;
        tab.wait_until_navigated()
            .context("Chrome navigation did not settle")?;
        debug!("Chrome tab ready on {}", self.options.base_url);

        Ok(Box::new(ChromePage { browser, tab }))
    }
}

struct ChromePage {
    browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserPage for ChromePage {
    fn ping(&self) -> Result<()> {
        self.browser
            .get_version()
            .context("Chrome process not responding")?;

        let result = self
            .tab
            .evaluate("1 + 1", false)
            .context("Tab evaluation failed")?;

        match result.value.as_ref().and_then(|v| v.as_i64()) {
            Some(2) => Ok(()),
            other => Err(anyhow!("unexpected ping result: {:?}", other)),
        }
    }

    fn fetch(&self, path: &str) -> Result<PageResponse> {
        let script = fetch_script(path)?;
        let result = self
            .tab
            .evaluate(&script, true)
            .with_context(|| format!("in-page fetch of {path} failed"))?;

        let raw = result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("in-page fetch of {path} returned no value"))?;

        serde_json::from_str(raw).context("in-page fetch envelope malformed")
    }

    fn close(self: Box<Self>) {
        let _ = self.tab.close(false);
    }
}

/// The page answers with a JSON string so status and body survive the
/// devtools round trip together.
fn fetch_script(path: &str) -> Result<String> {
    let url = serde_json::to_string(path)?;
    Ok(format!(
        r#"(async () => {{
    const res = await fetch({url}, {{ credentials: "include", headers: {{ "Accept": "application/json" }} }});
    const body = await res.text();
    return JSON.stringify({{ status: res.status, body }});
}})()"#
    ))
}
