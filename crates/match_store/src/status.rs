//! Processing status of a fixture plus the source's status-string vocabulary.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProcessingStatus {
    Pending,
    InProgress,
    Enriched,
    Postponed,
    Cancelled,
    PartialData,
    Error,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 7] = [
        Self::Pending,
        Self::InProgress,
        Self::Enriched,
        Self::Postponed,
        Self::Cancelled,
        Self::PartialData,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Enriched => "Enriched",
            Self::Postponed => "Postponed",
            Self::Cancelled => "Cancelled",
            Self::PartialData => "PartialData",
            Self::Error => "Error",
        }
    }

    /// Terminal fixtures are never picked up for enrichment again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Enriched | Self::Postponed | Self::Cancelled)
    }

    pub fn is_adverse(self) -> bool {
        matches!(self, Self::Postponed | Self::Cancelled)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown processing status {0:?}")]
pub struct UnknownProcessingStatus(pub String);

impl FromStr for ProcessingStatus {
    type Err = UnknownProcessingStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownProcessingStatus(s.to_string()))
    }
}

impl ToSql for ProcessingStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ProcessingStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

// ── source status vocabulary ─────────────────────────────────────────

pub const NOT_STARTED: &str = "Not started";
pub const ENDED: &str = "Ended";
pub const POSTPONED: &str = "Postponed";
pub const CANCELLED: &str = "Cancelled";
pub const CANCELED: &str = "Canceled";

pub const FINISHED_STATUSES: [&str; 4] = [ENDED, "AET", "AP", "Finished"];

pub const LIVE_STATUSES: [&str; 6] = [
    "1st half",
    "2nd half",
    "Halftime",
    "Extra time",
    "Penalties",
    "Live",
];

pub const ADVERSE_STATUSES: [&str; 3] = [POSTPONED, CANCELLED, CANCELED];

/// Every status string some selector keys on. Anything else is an
/// unrecognised source status ("Interrupted", "Abandoned", ...).
pub fn known_statuses() -> Vec<&'static str> {
    FINISHED_STATUSES
        .iter()
        .chain(LIVE_STATUSES.iter())
        .chain([NOT_STARTED, POSTPONED, CANCELLED, CANCELED].iter())
        .copied()
        .collect()
}

pub fn is_finished_status(status: &str) -> bool {
    FINISHED_STATUSES.contains(&status)
}

pub fn is_live_status(status: &str) -> bool {
    LIVE_STATUSES.contains(&status)
}

pub fn is_adverse_status(status: &str) -> bool {
    ADVERSE_STATUSES.contains(&status)
}

/// `'a', 'b'` list for embedding a fixed vocabulary in SQL.
pub(crate) fn sql_list(items: &[&str]) -> String {
    items
        .iter()
        .map(|s| format!("'{}'", s.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}
