use async_trait::async_trait;
use browser_session::{BrowserSession, PageResponse};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ScrapeError;
use crate::model::{
    detail_from_wire, events_from_payload, incidents_from_payload, standings_from_payload,
    statistics_from_payload, IncidentRecord, MatchBundle, MatchDetail, MatchEvent, StandingRow,
    StatisticItem,
};
use crate::registry::{KnockoutPhase, TournamentConfig, TournamentRegistry};
use crate::retry::{with_retry, RetryPolicy};
use crate::source::{FixtureSource, RoundFetch};
use crate::wire::{EventPayload, EventsPayload, IncidentsPayload, StandingsPayload, StatisticsPayload};

/// Internal JSON endpoints, relative to the page origin.
pub mod endpoints {
    use crate::registry::KnockoutPhase;

    pub fn live() -> String {
        "/api/v1/sport/football/events/live".to_string()
    }

    pub fn round(tournament_id: u32, season_id: u32, round: u32) -> String {
        format!("/api/v1/unique-tournament/{tournament_id}/season/{season_id}/events/round/{round}")
    }

    pub fn knockout(tournament_id: u32, season_id: u32, phase: &KnockoutPhase) -> String {
        let mut path = format!(
            "{}/slug/{}",
            round(tournament_id, season_id, phase.round_id),
            phase.slug
        );
        if let Some(prefix) = &phase.prefix {
            path.push_str("/prefix/");
            path.push_str(prefix);
        }
        path
    }

    pub fn event(id: u64) -> String {
        format!("/api/v1/event/{id}")
    }

    pub fn statistics(id: u64) -> String {
        format!("/api/v1/event/{id}/statistics")
    }

    pub fn incidents(id: u64) -> String {
        format!("/api/v1/event/{id}/incidents")
    }

    pub fn standings(tournament_id: u32, season_id: u32) -> String {
        format!("/api/v1/unique-tournament/{tournament_id}/season/{season_id}/standings/total")
    }
}

/// Typed fetches against the source, all routed through one browser session.
pub struct ScraperClient {
    session: Arc<BrowserSession>,
    registry: Arc<TournamentRegistry>,
    retry: RetryPolicy,
    limiter: DefaultDirectRateLimiter,
}

impl ScraperClient {
    pub fn new(
        session: Arc<BrowserSession>,
        registry: Arc<TournamentRegistry>,
        retry: RetryPolicy,
        min_request_interval: Duration,
    ) -> Self {
        let quota = Quota::with_period(min_request_interval)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX));

        Self {
            session,
            registry,
            retry,
            limiter: RateLimiter::direct(quota),
        }
    }

    pub fn session(&self) -> &Arc<BrowserSession> {
        &self.session
    }

    async fn fetch_page(&self, path: &str) -> Result<PageResponse, ScrapeError> {
        self.limiter.until_ready().await;
        let owned = path.to_string();
        self.session
            .run(move |page| page.fetch(&owned))
            .await
            .map_err(ScrapeError::Session)?
            .map_err(ScrapeError::Transport)
    }

    async fn get_json<T: DeserializeOwned>(&self, label: &str, path: &str) -> Result<T, ScrapeError> {
        with_retry(
            &self.retry,
            label,
            |_| async move {
                let response = self.fetch_page(path).await?;
                decode(path, &response)
            },
            || self.session.close(),
        )
        .await
    }

    pub async fn fetch_live_matches(&self) -> Result<Vec<MatchEvent>, ScrapeError> {
        let payload: EventsPayload = self.get_json("live matches", &endpoints::live()).await?;
        let all = events_from_payload(payload);
        let total = all.len();

        let kept: Vec<MatchEvent> = all
            .into_iter()
            .filter(|e| e.tournament_id.is_some_and(|id| self.registry.contains(id)))
            .collect();

        debug!(total, kept = kept.len(), "Live feed filtered to registry");
        Ok(kept)
    }

    pub async fn fetch_round_matches(
        &self,
        tournament: &TournamentConfig,
        round: u32,
    ) -> Result<RoundFetch, ScrapeError> {
        let path = endpoints::round(tournament.tournament_id, tournament.season_id, round);
        self.fetch_round_at(tournament, round, &path).await
    }

    pub async fn fetch_knockout_matches(
        &self,
        tournament: &TournamentConfig,
        phase: &KnockoutPhase,
    ) -> Result<RoundFetch, ScrapeError> {
        let path = endpoints::knockout(tournament.tournament_id, tournament.season_id, phase);
        self.fetch_round_at(tournament, phase.round_id, &path).await
    }

    async fn fetch_round_at(
        &self,
        tournament: &TournamentConfig,
        round: u32,
        path: &str,
    ) -> Result<RoundFetch, ScrapeError> {
        let payload: EventsPayload = match self.get_json("round matches", path).await {
            Ok(payload) => payload,
            Err(e) if e.is_not_available() => return Ok(RoundFetch::NotPublished),
            Err(e) => return Err(e),
        };

        let events: Vec<MatchEvent> = events_from_payload(payload)
            .into_iter()
            .filter(|e| e.tournament_id.map_or(true, |id| id == tournament.tournament_id))
            .map(|e| adopt_round(e, tournament, round))
            .collect();

        if events.is_empty() {
            return Ok(RoundFetch::NotPublished);
        }
        Ok(RoundFetch::Published(events))
    }

    pub async fn fetch_match_details(&self, match_id: u64) -> Result<MatchDetail, ScrapeError> {
        let path = endpoints::event(match_id);
        let payload: EventPayload = self.get_json("match details", &path).await?;
        detail_from_payload(&path, payload)
    }

    /// `None` when the source has no statistics for this match (yet).
    pub async fn fetch_statistics(
        &self,
        match_id: u64,
    ) -> Result<Option<Vec<StatisticItem>>, ScrapeError> {
        let path = endpoints::statistics(match_id);
        match self.get_json::<StatisticsPayload>("statistics", &path).await {
            Ok(payload) => Ok(Some(statistics_from_payload(payload))),
            Err(e) if e.is_not_available() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn fetch_incidents(&self, match_id: u64) -> Result<Vec<IncidentRecord>, ScrapeError> {
        let path = endpoints::incidents(match_id);
        match self.get_json::<IncidentsPayload>("incidents", &path).await {
            Ok(payload) => Ok(incidents_from_payload(payload)),
            Err(e) if e.is_not_available() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Details + statistics + incidents while holding the page once, so the
    /// three answers describe the same moment.
    pub async fn fetch_match_bundle(&self, match_id: u64) -> Result<MatchBundle, ScrapeError> {
        let paths = [
            endpoints::event(match_id),
            endpoints::statistics(match_id),
            endpoints::incidents(match_id),
        ];

        with_retry(
            &self.retry,
            "match bundle",
            |_| {
                let for_page = paths.clone();
                let paths = &paths;
                async move {
                    self.limiter.until_ready().await;
                    let responses = self
                        .session
                        .run(move |page| {
                            for_page
                                .iter()
                                .map(|p| page.fetch(p))
                                .collect::<anyhow::Result<Vec<PageResponse>>>()
                        })
                        .await
                        .map_err(ScrapeError::Session)?
                        .map_err(ScrapeError::Transport)?;
                    bundle_from_responses(paths, &responses)
                }
            },
            || self.session.close(),
        )
        .await
    }

    pub async fn fetch_standings(
        &self,
        tournament: &TournamentConfig,
    ) -> Result<Vec<StandingRow>, ScrapeError> {
        let path = endpoints::standings(tournament.tournament_id, tournament.season_id);
        match self.get_json::<StandingsPayload>("standings", &path).await {
            Ok(payload) => Ok(standings_from_payload(payload)),
            Err(e) if e.is_not_available() => {
                warn!("No standings published for {} yet", tournament.name);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl FixtureSource for ScraperClient {
    async fn live_matches(&self) -> Result<Vec<MatchEvent>, ScrapeError> {
        self.fetch_live_matches().await
    }

    async fn round_matches(
        &self,
        tournament: &TournamentConfig,
        round: u32,
    ) -> Result<RoundFetch, ScrapeError> {
        self.fetch_round_matches(tournament, round).await
    }

    async fn knockout_matches(
        &self,
        tournament: &TournamentConfig,
        phase: &KnockoutPhase,
    ) -> Result<RoundFetch, ScrapeError> {
        self.fetch_knockout_matches(tournament, phase).await
    }

    async fn match_bundle(&self, match_id: u64) -> Result<MatchBundle, ScrapeError> {
        self.fetch_match_bundle(match_id).await
    }

    async fn standings(
        &self,
        tournament: &TournamentConfig,
    ) -> Result<Vec<StandingRow>, ScrapeError> {
        self.fetch_standings(tournament).await
    }

    async fn release_session(&self) {
        self.session.close().await;
    }
}

fn decode<T: DeserializeOwned>(path: &str, response: &PageResponse) -> Result<T, ScrapeError> {
    if response.status == 404 {
        return Err(ScrapeError::NotAvailable {
            path: path.to_string(),
        });
    }
    if !response.is_success() {
        return Err(ScrapeError::Http {
            status: response.status,
            path: path.to_string(),
        });
    }
    serde_json::from_str(&response.body).map_err(|source| ScrapeError::Decode {
        path: path.to_string(),
        source,
    })
}

fn detail_from_payload(path: &str, payload: EventPayload) -> Result<MatchDetail, ScrapeError> {
    payload
        .event
        .as_ref()
        .and_then(detail_from_wire)
        .ok_or_else(|| ScrapeError::NotAvailable {
            path: path.to_string(),
        })
}

fn bundle_from_responses(
    paths: &[String; 3],
    responses: &[PageResponse],
) -> Result<MatchBundle, ScrapeError> {
    let [event_path, stats_path, incidents_path] = paths;
    let [event, stats, incidents] = responses else {
        return Err(ScrapeError::Transport(anyhow::anyhow!(
            "expected 3 responses, got {}",
            responses.len()
        )));
    };

    let detail = detail_from_payload(event_path, decode(event_path, event)?)?;

    let statistics = match decode::<StatisticsPayload>(stats_path, stats) {
        Ok(payload) => Some(statistics_from_payload(payload)),
        Err(e) if e.is_not_available() => None,
        Err(e) => return Err(e),
    };

    let incidents = match decode::<IncidentsPayload>(incidents_path, incidents) {
        Ok(payload) => incidents_from_payload(payload),
        Err(e) if e.is_not_available() => Vec::new(),
        Err(e) => return Err(e),
    };

    Ok(MatchBundle {
        detail,
        statistics,
        incidents,
    })
}

/// Round endpoints omit or abbreviate context the caller already knows.
fn adopt_round(mut event: MatchEvent, tournament: &TournamentConfig, round: u32) -> MatchEvent {
    event.tournament_id.get_or_insert(tournament.tournament_id);
    event.season_id.get_or_insert(tournament.season_id);
    event.round = Some(round);
    if event.tournament_name.is_empty() {
        event.tournament_name = tournament.name.clone();
    }
    event
}
