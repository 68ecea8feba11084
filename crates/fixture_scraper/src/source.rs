use async_trait::async_trait;

use crate::error::ScrapeError;
use crate::model::{MatchBundle, MatchEvent, StandingRow};
use crate::registry::{KnockoutPhase, TournamentConfig};

/// Result of asking for a round that may not be published yet.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundFetch {
    Published(Vec<MatchEvent>),
    NotPublished,
}

/// What the worker needs from the fixture source. Implemented by
/// [`ScraperClient`](crate::ScraperClient); tests plug in canned data.
#[async_trait]
pub trait FixtureSource: Send + Sync + 'static {
    /// Live fixtures of registered tournaments only.
    async fn live_matches(&self) -> Result<Vec<MatchEvent>, ScrapeError>;

    async fn round_matches(
        &self,
        tournament: &TournamentConfig,
        round: u32,
    ) -> Result<RoundFetch, ScrapeError>;

    async fn knockout_matches(
        &self,
        tournament: &TournamentConfig,
        phase: &KnockoutPhase,
    ) -> Result<RoundFetch, ScrapeError>;

    /// Details, statistics and incidents in one session-scoped operation.
    async fn match_bundle(&self, match_id: u64) -> Result<MatchBundle, ScrapeError>;

    async fn standings(&self, tournament: &TournamentConfig)
        -> Result<Vec<StandingRow>, ScrapeError>;

    /// Drops the browser between cycles. No-op for sources without one.
    async fn release_session(&self);
}
