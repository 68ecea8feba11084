use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// No healthy browser session could be obtained.
    #[error("browser session unavailable: {0:#}")]
    Session(anyhow::Error),

    /// The page was there but the in-page request did not complete.
    #[error("in-page fetch failed: {0:#}")]
    Transport(anyhow::Error),

    #[error("source answered HTTP {status} for {path}")]
    Http { status: u16, path: String },

    /// 404: the round / statistics / table is not published yet.
    #[error("nothing published yet at {path}")]
    NotAvailable { path: String },

    /// Usually a challenge or maintenance page served instead of JSON.
    #[error("malformed payload from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ScrapeError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Session(_) | Self::Transport(_) | Self::Decode { .. } => true,
            Self::Http { status, .. } => {
                *status >= 500 || matches!(*status, 403 | 408 | 429)
            }
            Self::NotAvailable { .. } => false,
        }
    }

    pub fn is_session_failure(&self) -> bool {
        matches!(self, Self::Session(_))
    }

    pub fn is_not_available(&self) -> bool {
        matches!(self, Self::NotAvailable { .. })
    }
}
