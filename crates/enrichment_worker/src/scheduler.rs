//! Round discovery: decides which league round or knockout phase to fetch
//! next for each tournament and inserts its fixtures.
//!
//! A round (or phase) is only fetched once every fixture of the one before
//! it is terminal. Knockout phases whose round id collides with a league
//! round are told apart by kick-off time: their fixtures start after the
//! latest fixture of the preceding phase.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fixture_scraper::{FixtureSource, KnockoutPhase, RoundFetch, TournamentConfig, TournamentRegistry};
use logger::{now_iso, EventLogger, RoundFetchedEvent};
use match_store::{Fixture, MatchStateStore, RoundKey};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::convert;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Fixtures of `round` were fetched; `inserted` of them were new.
    Fetched {
        round: u32,
        phase: Option<String>,
        inserted: usize,
    },
    /// `round` still has non-terminal fixtures.
    Waiting { round: u32 },
    NotPublished { round: u32 },
    /// Another instance holds the soft lock for `round`.
    Locked { round: u32 },
    /// Every round and phase has been fetched.
    Complete,
}

#[derive(Debug)]
pub struct TournamentOutcome {
    pub tournament_id: u32,
    pub name: String,
    pub result: Result<RoundOutcome>,
}

pub struct RoundScheduler<S> {
    source: Arc<S>,
    store: MatchStateStore,
    registry: Arc<TournamentRegistry>,
    holder_id: String,
    lock_timeout: Duration,
    events: EventLogger,
}

impl<S: FixtureSource> RoundScheduler<S> {
    pub fn new(
        source: Arc<S>,
        store: MatchStateStore,
        registry: Arc<TournamentRegistry>,
        holder_id: impl Into<String>,
        lock_timeout: Duration,
        events: EventLogger,
    ) -> Self {
        Self {
            source,
            store,
            registry,
            holder_id: holder_id.into(),
            lock_timeout,
            events,
        }
    }

    /// One discovery pass over every registered tournament. A failing
    /// tournament is logged and does not stop the others.
    pub async fn run_all(&self, now: DateTime<Utc>) -> Vec<TournamentOutcome> {
        let mut outcomes = Vec::with_capacity(self.registry.len());

        for t in self.registry.iter() {
            let result = self.advance(t, now).await;
            match &result {
                Ok(outcome) => debug!(tournament = %t.name, ?outcome, "Round discovery"),
                Err(e) => warn!("Round discovery failed for {}: {:#}", t.name, e),
            }
            outcomes.push(TournamentOutcome {
                tournament_id: t.tournament_id,
                name: t.name.clone(),
                result,
            });
        }

        outcomes
    }

    pub async fn advance(&self, t: &TournamentConfig, now: DateTime<Utc>) -> Result<RoundOutcome> {
        let current = self
            .store
            .max_round(t.tournament_id, t.season_id, t.total_rounds)
            .await?;

        let Some(current) = current else {
            return self.fetch_round(t, 1, None, now).await;
        };

        let fixtures = self.store.fixtures_in_round(self.key(t, current), None).await?;
        if !all_terminal(&fixtures) {
            return Ok(RoundOutcome::Waiting { round: current });
        }

        if current < t.total_rounds {
            return self.fetch_round(t, current + 1, None, now).await;
        }

        if !t.is_cup() {
            return Ok(RoundOutcome::Complete);
        }

        self.advance_knockout(t, now).await
    }

    async fn advance_knockout(&self, t: &TournamentConfig, now: DateTime<Utc>) -> Result<RoundOutcome> {
        let mut boundary = known(self.store.latest_start(self.key(t, t.total_rounds), None).await?);
        let mut last_fetched: Option<(usize, Vec<Fixture>)> = None;

        for (idx, phase) in t.knockout_phases.iter().enumerate() {
            let after = if t.collides_with_league(phase.round_id) {
                match boundary {
                    Some(ts) => Some(ts),
                    None => {
                        warn!(
                            "{}: cannot tell {} (round {}) from the league round, no kick-off times before it",
                            t.name, phase.name, phase.round_id
                        );
                        break;
                    }
                }
            } else {
                None
            };

            let fixtures = self
                .store
                .fixtures_in_round(self.key(t, phase.round_id), after)
                .await?;
            if fixtures.is_empty() {
                break;
            }

            boundary = fixtures
                .iter()
                .map(|f| f.start_timestamp)
                .filter(|ts| *ts > 0)
                .max();
            last_fetched = Some((idx, fixtures));
        }

        let next = match &last_fetched {
            None => 0,
            Some((idx, _)) if *idx + 1 == t.knockout_phases.len() => {
                return Ok(RoundOutcome::Complete);
            }
            Some((idx, fixtures)) => {
                if !all_terminal(fixtures) {
                    return Ok(RoundOutcome::Waiting {
                        round: t.knockout_phases[*idx].round_id,
                    });
                }
                idx + 1
            }
        };

        match t.knockout_phases.get(next) {
            Some(phase) => self.fetch_round(t, phase.round_id, Some(phase), now).await,
            None => Ok(RoundOutcome::Complete),
        }
    }

    async fn fetch_round(
        &self,
        t: &TournamentConfig,
        round: u32,
        phase: Option<&KnockoutPhase>,
        now: DateTime<Utc>,
    ) -> Result<RoundOutcome> {
        let key = self.key(t, round);
        if !self
            .store
            .try_lock_round(key, &self.holder_id, now, self.lock_timeout)
            .await?
        {
            info!("🔒 {} round {} locked by another worker, skipping", t.name, round);
            return Ok(RoundOutcome::Locked { round });
        }

        let result = self.fetch_and_insert(t, key, phase, now).await;

        if let Err(e) = self.store.release_round_lock(key, &self.holder_id).await {
            warn!("Failed to release lock on {} round {}: {:#}", t.name, round, e);
        }
        result
    }

    async fn fetch_and_insert(
        &self,
        t: &TournamentConfig,
        key: RoundKey,
        phase: Option<&KnockoutPhase>,
        now: DateTime<Utc>,
    ) -> Result<RoundOutcome> {
        let round = key.round;
        let fetch = match phase {
            Some(p) => self.source.knockout_matches(t, p).await,
            None => self.source.round_matches(t, round).await,
        }
        .with_context(|| format!("fetch {} round {}", t.name, round))?;

        let events = match fetch {
            RoundFetch::Published(events) => events,
            RoundFetch::NotPublished => {
                warn!(
                    "{} {} not published yet",
                    t.name,
                    phase.map_or_else(|| format!("round {round}"), |p| p.name.clone())
                );
                return Ok(RoundOutcome::NotPublished { round });
            }
        };

        let mut inserted = 0;
        for event in &events {
            let fixture = convert::new_fixture(event, t, round);
            if self.store.insert_fixture_if_absent(fixture, now).await? {
                inserted += 1;
            }
        }
        self.store.refresh_round_state(key, now).await?;

        let phase_name = phase.map(|p| p.name.clone());
        info!(
            "📅 {} {}: {} fixtures ({} new)",
            t.name,
            phase_name.clone().unwrap_or_else(|| format!("round {round}")),
            events.len(),
            inserted
        );
        self.events.record(&RoundFetchedEvent {
            ts:            now_iso(),
            event:         "ROUND_FETCHED",
            tournament:    t.name.clone(),
            tournament_id: t.tournament_id,
            round,
            phase:         phase_name.clone(),
            fixtures:      events.len(),
            inserted,
        });

        Ok(RoundOutcome::Fetched {
            round,
            phase: phase_name,
            inserted,
        })
    }

    fn key(&self, t: &TournamentConfig, round: u32) -> RoundKey {
        RoundKey::new(t.tournament_id, t.season_id, round)
    }
}

fn all_terminal(fixtures: &[Fixture]) -> bool {
    fixtures.iter().all(|f| f.processing_status.is_terminal())
}

/// Zero means the source never told us the kick-off time.
fn known(ts: Option<i64>) -> Option<i64> {
    ts.filter(|ts| *ts > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use fixture_scraper::{MatchBundle, MatchEvent, ScrapeError, StandingRow};
    use match_store::{NewFixture, ProcessingStatus};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves rounds keyed by round id; records which rounds were asked for.
    #[derive(Default)]
    struct Rounds {
        published: HashMap<u32, Vec<MatchEvent>>,
        asked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FixtureSource for Rounds {
        async fn live_matches(&self) -> Result<Vec<MatchEvent>, ScrapeError> {
            Ok(Vec::new())
        }

        async fn round_matches(&self, _t: &TournamentConfig, round: u32) -> Result<RoundFetch, ScrapeError> {
            self.asked.lock().unwrap().push(format!("round:{round}"));
            Ok(self.serve(round))
        }

        async fn knockout_matches(&self, _t: &TournamentConfig, phase: &KnockoutPhase) -> Result<RoundFetch, ScrapeError> {
            self.asked.lock().unwrap().push(format!("phase:{}", phase.slug));
            Ok(self.serve(phase.round_id))
        }

        async fn match_bundle(&self, match_id: u64) -> Result<MatchBundle, ScrapeError> {
            Err(ScrapeError::NotAvailable { path: format!("/event/{match_id}") })
        }

        async fn standings(&self, _t: &TournamentConfig) -> Result<Vec<StandingRow>, ScrapeError> {
            Ok(Vec::new())
        }

        async fn release_session(&self) {}
    }

    impl Rounds {
        fn serve(&self, round: u32) -> RoundFetch {
            match self.published.get(&round) {
                Some(events) => RoundFetch::Published(events.clone()),
                None => RoundFetch::NotPublished,
            }
        }

        fn asked(&self) -> Vec<String> {
            self.asked.lock().unwrap().clone()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap()
    }

    fn event(id: u64, round: u32, start: i64) -> MatchEvent {
        MatchEvent {
            id,
            tournament_id: Some(7),
            tournament_name: "UEFA Champions League".to_string(),
            season_id: Some(76953),
            round: Some(round),
            home_team: format!("Home {id}"),
            away_team: format!("Away {id}"),
            home_score: 0,
            away_score: 0,
            status: "Not started".to_string(),
            status_type: "notstarted".to_string(),
            start_timestamp: start,
        }
    }

    fn stored(id: u64, round: u32, start: i64, ps: ProcessingStatus) -> NewFixture {
        NewFixture {
            id,
            tournament_id: 7,
            season_id: 76953,
            round: Some(round),
            home_team: format!("Home {id}"),
            away_team: format!("Away {id}"),
            home_score: 1,
            away_score: 0,
            status: "Ended".to_string(),
            start_timestamp: start,
            processing_status: ps,
        }
    }

    fn ucl() -> TournamentConfig {
        TournamentRegistry::builtin().get(7).unwrap().clone()
    }

    fn scheduler(source: Rounds, store: &MatchStateStore, dir: &tempfile::TempDir) -> RoundScheduler<Rounds> {
        RoundScheduler::new(
            Arc::new(source),
            store.clone(),
            Arc::new(TournamentRegistry::builtin()),
            "test-worker",
            Duration::from_secs(1800),
            EventLogger::new(dir.path()),
        )
    }

    #[tokio::test]
    async fn empty_store_fetches_round_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = MatchStateStore::open_in_memory().unwrap();
        let mut source = Rounds::default();
        source.published.insert(1, vec![event(1, 1, 1_000), event(2, 1, 1_100)]);
        let s = scheduler(source, &store, &dir);

        let outcome = s.advance(&ucl(), now()).await.unwrap();

        assert_eq!(outcome, RoundOutcome::Fetched { round: 1, phase: None, inserted: 2 });
        let state = store.round_state(RoundKey::new(7, 76953, 1)).await.unwrap().unwrap();
        assert_eq!(state.total, 2);
        assert_eq!(state.lock_holder, None);
    }

    #[tokio::test]
    async fn unresolved_round_blocks_the_next() {
        let dir = tempfile::tempdir().unwrap();
        let store = MatchStateStore::open_in_memory().unwrap();
        store.insert_fixture_if_absent(stored(1, 3, 1_000, ProcessingStatus::Enriched), now()).await.unwrap();
        store.insert_fixture_if_absent(stored(2, 3, 1_100, ProcessingStatus::Postponed), now()).await.unwrap();
        store.insert_fixture_if_absent(stored(3, 3, 1_200, ProcessingStatus::Pending), now()).await.unwrap();
        let s = scheduler(Rounds::default(), &store, &dir);

        assert_eq!(s.advance(&ucl(), now()).await.unwrap(), RoundOutcome::Waiting { round: 3 });
        assert!(s.source.asked().is_empty());
    }

    #[tokio::test]
    async fn unpublished_round_is_reported_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = MatchStateStore::open_in_memory().unwrap();
        store.insert_fixture_if_absent(stored(1, 3, 1_000, ProcessingStatus::Enriched), now()).await.unwrap();
        let s = scheduler(Rounds::default(), &store, &dir);

        assert_eq!(s.advance(&ucl(), now()).await.unwrap(), RoundOutcome::NotPublished { round: 4 });
        assert_eq!(s.source.asked(), vec!["round:4".to_string()]);
    }

    #[tokio::test]
    async fn last_league_round_hands_over_to_playoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = MatchStateStore::open_in_memory().unwrap();
        store.insert_fixture_if_absent(stored(1, 8, 5_000, ProcessingStatus::Enriched), now()).await.unwrap();
        store.insert_fixture_if_absent(stored(2, 8, 5_000, ProcessingStatus::Cancelled), now()).await.unwrap();
        let mut source = Rounds::default();
        source.published.insert(636, vec![event(10, 636, 9_000)]);
        let s = scheduler(source, &store, &dir);

        let outcome = s.advance(&ucl(), now()).await.unwrap();

        assert_eq!(
            outcome,
            RoundOutcome::Fetched { round: 636, phase: Some("Playoff Round".to_string()), inserted: 1 }
        );
        assert_eq!(s.source.asked(), vec!["phase:playoff-round".to_string()]);
    }

    #[tokio::test]
    async fn colliding_round_id_is_split_by_kickoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = MatchStateStore::open_in_memory().unwrap();
        // league round 5 (early) and 8, then a finished playoff round
        store.insert_fixture_if_absent(stored(1, 5, 1_000, ProcessingStatus::Enriched), now()).await.unwrap();
        store.insert_fixture_if_absent(stored(2, 8, 5_000, ProcessingStatus::Enriched), now()).await.unwrap();
        store.insert_fixture_if_absent(stored(3, 636, 9_000, ProcessingStatus::Enriched), now()).await.unwrap();
        let mut source = Rounds::default();
        source.published.insert(5, vec![event(20, 5, 12_000)]);
        let s = scheduler(source, &store, &dir);

        // league round 5 fixtures predate the playoff, so round of 16 is unfetched
        let outcome = s.advance(&ucl(), now()).await.unwrap();
        assert_eq!(
            outcome,
            RoundOutcome::Fetched { round: 5, phase: Some("Round of 16".to_string()), inserted: 1 }
        );

        // now it is fetched but unresolved
        assert_eq!(s.advance(&ucl(), now()).await.unwrap(), RoundOutcome::Waiting { round: 5 });
    }

    #[tokio::test]
    async fn final_phase_fetched_means_complete() {
        let dir = tempfile::tempdir().unwrap();
        let store = MatchStateStore::open_in_memory().unwrap();
        let rounds = [(8, 1_000), (636, 2_000), (5, 3_000), (27, 4_000), (28, 5_000), (29, 6_000)];
        for (i, (round, start)) in rounds.into_iter().enumerate() {
            store
                .insert_fixture_if_absent(stored(i as u64 + 1, round, start, ProcessingStatus::Enriched), now())
                .await
                .unwrap();
        }
        let s = scheduler(Rounds::default(), &store, &dir);

        assert_eq!(s.advance(&ucl(), now()).await.unwrap(), RoundOutcome::Complete);
        assert!(s.source.asked().is_empty());
    }

    #[tokio::test]
    async fn foreign_lock_skips_the_round() {
        let dir = tempfile::tempdir().unwrap();
        let store = MatchStateStore::open_in_memory().unwrap();
        store
            .try_lock_round(RoundKey::new(7, 76953, 1), "other-worker", now(), Duration::from_secs(1800))
            .await
            .unwrap();
        let s = scheduler(Rounds::default(), &store, &dir);

        assert_eq!(s.advance(&ucl(), now()).await.unwrap(), RoundOutcome::Locked { round: 1 });
        assert!(s.source.asked().is_empty());
    }
}
