//! Fixture scraper
//!
//! Typed access to the football data source: live fixtures, league and
//! knockout rounds, per-match details/statistics/incidents and standings.
//! Every request goes through a [`browser_session::BrowserSession`], is paced
//! by a shared rate limiter and wrapped in a bounded retry that recycles the
//! session on failure.

mod client;
pub mod error;
pub mod model;
pub mod registry;
pub mod retry;
mod source;
mod wire;

pub use client::{endpoints, ScraperClient};
pub use error::ScrapeError;
pub use model::{
    classify_status, parse_stat_value, Comparison, IncidentRecord, MatchBundle, MatchDetail,
    MatchEvent, StandingRow, StatisticItem, StatusClass, UNKNOWN_TEAM,
};
pub use registry::{KnockoutPhase, TournamentConfig, TournamentRegistry};
pub use retry::RetryPolicy;
pub use source::{FixtureSource, RoundFetch};
