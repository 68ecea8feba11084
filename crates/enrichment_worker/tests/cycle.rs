//! Full worker cycles against an in-memory store and a scripted source.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use enrichment_worker::{EnrichmentWorker, WorkerConfig};
use fixture_scraper::{
    Comparison, FixtureSource, IncidentRecord, KnockoutPhase, MatchBundle, MatchDetail,
    MatchEvent, RoundFetch, ScrapeError, StandingRow, StatisticItem, TournamentConfig,
    TournamentRegistry,
};
use logger::EventLogger;
use match_store::{
    EnrichmentOutcome, EnrichmentWrite, FixtureSnapshot, MatchStateStore, NewFixture,
    ProcessingStatus, RoundKey,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ── scripted source ──────────────────────────────────────────────────────

#[derive(Default)]
struct FakeSource {
    live: Mutex<Vec<MatchEvent>>,
    browser_down: AtomicBool,
    rounds_down: AtomicBool,
    rounds: Mutex<HashMap<(u32, u32), Vec<MatchEvent>>>,
    bundles: Mutex<HashMap<u64, MatchBundle>>,
    standings: Mutex<HashMap<u32, Vec<StandingRow>>>,
    calls: Mutex<Vec<String>>,
    /// Fired once, right after the first bundle request.
    cancel_on_bundle: Mutex<Option<CancellationToken>>,
}

impl FakeSource {
    fn call(&self, what: String) {
        self.calls.lock().unwrap().push(what);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, what: &str) -> usize {
        self.calls().iter().filter(|c| *c == what).count()
    }

    fn down(&self) -> Option<ScrapeError> {
        self.browser_down
            .load(Ordering::SeqCst)
            .then(|| ScrapeError::Session(anyhow::anyhow!("chrome failed to start")))
    }

    fn bundle_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("bundle:")).count()
    }

    fn serve_round(&self, tournament_id: u32, round: u32) -> RoundFetch {
        match self.rounds.lock().unwrap().get(&(tournament_id, round)) {
            Some(events) if !events.is_empty() => RoundFetch::Published(events.clone()),
            _ => RoundFetch::NotPublished,
        }
    }
}

#[async_trait]
impl FixtureSource for FakeSource {
    async fn live_matches(&self) -> Result<Vec<MatchEvent>, ScrapeError> {
        self.call("live".to_string());
        if let Some(e) = self.down() {
            return Err(e);
        }
        Ok(self.live.lock().unwrap().clone())
    }

    async fn round_matches(&self, t: &TournamentConfig, round: u32) -> Result<RoundFetch, ScrapeError> {
        self.call(format!("round:{}:{}", t.tournament_id, round));
        if self.rounds_down.load(Ordering::SeqCst) {
            return Err(ScrapeError::Session(anyhow::anyhow!("chrome failed to start")));
        }
        Ok(self.serve_round(t.tournament_id, round))
    }

    async fn knockout_matches(&self, t: &TournamentConfig, phase: &KnockoutPhase) -> Result<RoundFetch, ScrapeError> {
        self.call(format!("knockout:{}:{}", t.tournament_id, phase.slug));
        Ok(self.serve_round(t.tournament_id, phase.round_id))
    }

    async fn match_bundle(&self, match_id: u64) -> Result<MatchBundle, ScrapeError> {
        self.call(format!("bundle:{match_id}"));
        if let Some(token) = self.cancel_on_bundle.lock().unwrap().take() {
            token.cancel();
        }
        if let Some(e) = self.down() {
            return Err(e);
        }
        self.bundles
            .lock()
            .unwrap()
            .get(&match_id)
            .cloned()
            .ok_or_else(|| ScrapeError::Transport(anyhow::anyhow!("net::ERR_CONNECTION_RESET")))
    }

    async fn standings(&self, t: &TournamentConfig) -> Result<Vec<StandingRow>, ScrapeError> {
        self.call(format!("standings:{}", t.tournament_id));
        Ok(self.standings.lock().unwrap().get(&t.tournament_id).cloned().unwrap_or_default())
    }

    async fn release_session(&self) {
        self.call("release".to_string());
    }
}

// ── fixtures ─────────────────────────────────────────────────────────────

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap()
}

fn hours(h: i64) -> i64 {
    now().timestamp() + h * 3600
}

fn only(tournament_id: u32) -> TournamentRegistry {
    let t = TournamentRegistry::builtin().get(tournament_id).unwrap().clone();
    TournamentRegistry::new(vec![t]).unwrap()
}

fn stored(id: u64, t: (u32, u32), round: u32, status: &str, ps: ProcessingStatus, start: i64) -> NewFixture {
    NewFixture {
        id,
        tournament_id: t.0,
        season_id: t.1,
        round: Some(round),
        home_team: format!("Home {id}"),
        away_team: format!("Away {id}"),
        home_score: 0,
        away_score: 0,
        status: status.to_string(),
        start_timestamp: start,
        processing_status: ps,
    }
}

const PL: (u32, u32) = (17, 76986);
const UCL: (u32, u32) = (7, 76953);

fn event(id: u64, t: (u32, u32), round: u32, status: &str, kind: &str, score: (i32, i32), start: i64) -> MatchEvent {
    MatchEvent {
        id,
        tournament_id: Some(t.0),
        tournament_name: String::new(),
        season_id: Some(t.1),
        round: Some(round),
        home_team: format!("Home {id}"),
        away_team: format!("Away {id}"),
        home_score: score.0,
        away_score: score.1,
        status: status.to_string(),
        status_type: kind.to_string(),
        start_timestamp: start,
    }
}

fn bundle(event: MatchEvent, with_stats: bool) -> MatchBundle {
    MatchBundle {
        detail: MatchDetail {
            event,
            venue: Some("Old Ground".to_string()),
            referee: Some("A. Referee".to_string()),
            attendance: Some(40_000),
        },
        statistics: with_stats.then(|| {
            vec![StatisticItem {
                period: "ALL".to_string(),
                group: "Match overview".to_string(),
                name: "Ball possession".to_string(),
                home_raw: "58%".to_string(),
                away_raw: "42%".to_string(),
                home_value: Some(58.0),
                away_value: Some(42.0),
                compare: Comparison::Home,
            }]
        }),
        incidents: vec![IncidentRecord {
            incident_type: "goal".to_string(),
            incident_class: Some("regular".to_string()),
            minute: 23,
            added_time: None,
            is_home: Some(true),
            player: Some("Striker".to_string()),
            assist: None,
        }],
    }
}

fn standing(team_id: u64, position: u32, points: i32) -> StandingRow {
    StandingRow {
        team_id,
        team_name: format!("Team {team_id}"),
        position,
        matches: 20,
        wins: 10,
        draws: 5,
        losses: 5,
        scores_for: 30,
        scores_against: 20,
        points,
        promotion: (position == 1).then(|| "Champions League".to_string()),
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    source: Arc<FakeSource>,
    store: MatchStateStore,
    cancel: CancellationToken,
    worker: EnrichmentWorker<FakeSource>,
}

fn config() -> WorkerConfig {
    WorkerConfig {
        fixture_delay: Duration::ZERO,
        max_attempts: 3,
        worker_id: "test-worker".to_string(),
        ntfy_topic: None,
        ..WorkerConfig::default()
    }
}

fn harness(registry: TournamentRegistry) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    let store = MatchStateStore::open_in_memory().unwrap();
    let cancel = CancellationToken::new();
    let worker = EnrichmentWorker::new(
        Arc::clone(&source),
        store.clone(),
        Arc::new(registry),
        config(),
        EventLogger::new(dir.path()),
        cancel.clone(),
    );
    Harness {
        _dir: dir,
        source,
        store,
        cancel,
        worker,
    }
}

impl Harness {
    async fn insert(&self, fixture: NewFixture) {
        assert!(self.store.insert_fixture_if_absent(fixture, now()).await.unwrap());
    }
}

// ── scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn finished_live_fixture_is_enriched_and_standings_synced_once() {
    let mut h = harness(only(17));
    h.insert(stored(1, PL, 1, "2nd half", ProcessingStatus::InProgress, hours(-2))).await;
    h.insert(stored(2, PL, 1, "2nd half", ProcessingStatus::InProgress, hours(-2))).await;

    let ended_1 = event(1, PL, 1, "Ended", "finished", (2, 1), hours(-2));
    let ended_2 = event(2, PL, 1, "Ended", "finished", (0, 0), hours(-2));
    *h.source.live.lock().unwrap() = vec![ended_1.clone(), ended_2.clone()];
    h.source.bundles.lock().unwrap().insert(1, bundle(ended_1, true));
    h.source.bundles.lock().unwrap().insert(2, bundle(ended_2, true));
    h.source
        .standings
        .lock()
        .unwrap()
        .insert(17, vec![standing(100, 1, 45), standing(101, 2, 40)]);

    let report = h.worker.run_cycle(now()).await;

    assert_eq!(report.live_seen, 2);
    assert_eq!(report.live_updated, 2);
    assert_eq!(report.enriched, 2);
    assert_eq!(report.standings_synced, 1);
    assert_eq!(h.source.count("standings:17"), 1);
    assert!(!report.idle);
    assert_eq!(report.next_delay, Duration::from_secs(90));

    let f = h.store.get_fixture(1).await.unwrap().unwrap();
    assert_eq!(f.processing_status, ProcessingStatus::Enriched);
    assert_eq!((f.home_score, f.away_score), (2, 1));
    assert_eq!(f.status, "Ended");
    assert_eq!(f.venue.as_deref(), Some("Old Ground"));
    assert_eq!(h.store.statistics(1).await.unwrap().len(), 1);
    assert_eq!(h.store.incidents(1).await.unwrap().len(), 1);

    let table = h.store.standings(17, 76986).await.unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table[0].promotions, vec!["Champions League".to_string()]);

    let round = h.store.round_state(RoundKey::new(17, 76986, 1)).await.unwrap().unwrap();
    assert!(round.is_fully_processed);
}

#[tokio::test]
async fn postponed_duplicate_is_removed_and_replacement_kept() {
    let mut h = harness(only(7));
    let mut zombie = stored(100, UCL, 5, "Postponed", ProcessingStatus::Postponed, hours(-240));
    zombie.home_team = "Club A".to_string();
    zombie.away_team = "Club B".to_string();
    let mut replacement = stored(101, UCL, 5, "Not started", ProcessingStatus::Pending, hours(24));
    replacement.home_team = "Club A".to_string();
    replacement.away_team = "Club B".to_string();
    h.insert(zombie).await;
    h.insert(replacement).await;

    let report = h.worker.run_cycle(now()).await;

    assert_eq!(report.zombies_removed, 1);
    assert!(h.store.get_fixture(100).await.unwrap().is_none());
    assert!(h.store.get_fixture(101).await.unwrap().is_some());
    // round 5 still has an unplayed fixture
    assert_eq!(h.source.count("round:7:6"), 0);
}

#[tokio::test]
async fn resolved_last_league_round_fetches_playoff_not_round_nine() {
    let mut h = harness(only(7));
    h.insert(stored(1, UCL, 8, "Ended", ProcessingStatus::Enriched, hours(-240))).await;
    h.insert(stored(2, UCL, 8, "Ended", ProcessingStatus::Enriched, hours(-240))).await;
    h.source.rounds.lock().unwrap().insert(
        (7, 636),
        vec![
            event(50, UCL, 636, "Not started", "notstarted", (0, 0), hours(24 * 7)),
            event(51, UCL, 636, "Not started", "notstarted", (0, 0), hours(24 * 7)),
        ],
    );

    let report = h.worker.run_cycle(now()).await;

    assert_eq!(report.rounds_fetched, 1);
    assert_eq!(h.source.count("knockout:7:playoff-round"), 1);
    assert_eq!(h.source.count("round:7:9"), 0);
    let playoff = h.store.get_fixture(50).await.unwrap().unwrap();
    assert_eq!(playoff.round, Some(636));
    assert_eq!(playoff.processing_status, ProcessingStatus::Pending);
}

#[tokio::test]
async fn quiet_cycle_sleeps_the_idle_interval_and_discovery_is_throttled() {
    let mut h = harness(only(17));

    let first = h.worker.run_cycle(now()).await;
    assert!(first.discovery_ran);
    assert!(first.idle);
    assert_eq!(first.next_delay, Duration::from_secs(900));

    let second = h.worker.run_cycle(now() + ChronoDuration::minutes(15)).await;
    assert!(!second.discovery_ran);
    assert_eq!(h.source.count("round:17:1"), 1);

    let third = h.worker.run_cycle(now() + ChronoDuration::hours(6)).await;
    assert!(third.discovery_ran);
    assert_eq!(h.source.count("round:17:1"), 2);
}

#[tokio::test]
async fn attempts_stop_at_the_cap() {
    let mut h = harness(only(17));
    h.insert(stored(1, PL, 1, "Ended", ProcessingStatus::Pending, hours(-5))).await;

    for i in 0..5 {
        let report = h.worker.run_cycle(now() + ChronoDuration::minutes(2 * i)).await;
        assert_eq!(report.phase_errors, 0);
    }

    assert_eq!(h.source.count("bundle:1"), 3);
    let f = h.store.get_fixture(1).await.unwrap().unwrap();
    assert_eq!(f.enrichment_attempts, 3);
    assert_eq!(f.processing_status, ProcessingStatus::Error);
    assert!(f.last_error.unwrap().contains("ERR_CONNECTION_RESET"));
}

#[tokio::test]
async fn next_league_round_waits_for_the_current_one() {
    let mut h = harness(only(17));
    h.insert(stored(1, PL, 3, "Ended", ProcessingStatus::Enriched, hours(-48))).await;
    h.insert(stored(2, PL, 3, "Not started", ProcessingStatus::Pending, hours(24))).await;
    h.source
        .rounds
        .lock()
        .unwrap()
        .insert((17, 4), vec![event(10, PL, 4, "Not started", "notstarted", (0, 0), hours(24 * 7))]);

    h.worker.run_cycle(now()).await;
    assert_eq!(h.source.count("round:17:4"), 0);

    // round 3 resolves
    h.store
        .save_enrichment(
            2,
            EnrichmentWrite {
                snapshot: FixtureSnapshot {
                    home_score: 1,
                    away_score: 1,
                    status: "Ended".to_string(),
                    start_timestamp: None,
                    venue: None,
                    referee: None,
                    attendance: None,
                },
                statistics: Some(Vec::new()),
                incidents: Vec::new(),
                outcome: EnrichmentOutcome::Terminal(ProcessingStatus::Enriched),
            },
            3,
            now(),
        )
        .await
        .unwrap();

    let report = h.worker.run_cycle(now() + ChronoDuration::hours(7)).await;
    assert_eq!(report.rounds_fetched, 1);
    assert_eq!(h.source.count("round:17:4"), 1);
    assert!(h.store.get_fixture(10).await.unwrap().is_some());
}

#[tokio::test]
async fn browser_failure_keeps_the_worker_active() {
    let mut h = harness(only(17));
    h.insert(stored(1, PL, 1, "1st half", ProcessingStatus::InProgress, hours(-1))).await;
    h.source.browser_down.store(true, Ordering::SeqCst);

    let report = h.worker.run_cycle(now()).await;

    assert!(report.phase_errors >= 1);
    assert_eq!(report.session_failures, 1);
    assert!(!report.idle);
    assert_eq!(report.next_delay, Duration::from_secs(90));
    // stuck-live detection needs a trustworthy live feed
    assert_eq!(h.source.count("bundle:1"), 0);
}

#[tokio::test]
async fn fixture_missing_from_live_feed_is_finalised() {
    let mut h = harness(only(17));
    h.insert(stored(1, PL, 1, "2nd half", ProcessingStatus::InProgress, hours(-3))).await;
    h.source
        .bundles
        .lock()
        .unwrap()
        .insert(1, bundle(event(1, PL, 1, "Ended", "finished", (3, 0), hours(-3)), true));

    let report = h.worker.run_cycle(now()).await;

    assert_eq!(report.stuck_recovered, 1);
    assert_eq!(h.source.count("standings:17"), 1);
    assert!(!report.idle);
    let f = h.store.get_fixture(1).await.unwrap().unwrap();
    assert_eq!(f.processing_status, ProcessingStatus::Enriched);
    assert_eq!((f.home_score, f.away_score), (3, 0));
}

#[tokio::test]
async fn limbo_fixture_picks_up_authoritative_postponement() {
    let mut h = harness(only(17));
    h.insert(stored(1, PL, 2, "Not started", ProcessingStatus::Pending, hours(-4))).await;
    h.source
        .bundles
        .lock()
        .unwrap()
        .insert(1, bundle(event(1, PL, 2, "Postponed", "postponed", (0, 0), hours(-4)), false));

    let report = h.worker.run_cycle(now()).await;

    assert_eq!(report.limbo_recovered, 1);
    assert_eq!(h.source.count("standings:17"), 0);
    let f = h.store.get_fixture(1).await.unwrap().unwrap();
    assert_eq!(f.processing_status, ProcessingStatus::Postponed);
    assert_eq!(f.status, "Postponed");
}

#[tokio::test]
async fn cancelled_worker_does_nothing_and_releases_the_browser() {
    let mut h = harness(only(17));
    h.cancel.cancel();

    let report = h.worker.run_cycle(now()).await;
    assert!(report.cancelled);
    assert!(h.source.calls().is_empty());

    h.worker.run().await.unwrap();
    assert_eq!(h.source.calls(), vec!["release".to_string()]);
}

#[tokio::test]
async fn stuck_live_fixtures_stop_at_the_attempt_cap() {
    let mut h = harness(only(17));
    // fixture 1: match page unreachable; fixture 2: match page keeps saying live
    h.insert(stored(1, PL, 1, "2nd half", ProcessingStatus::InProgress, hours(-2))).await;
    h.insert(stored(2, PL, 1, "2nd half", ProcessingStatus::InProgress, hours(-2))).await;
    h.source
        .bundles
        .lock()
        .unwrap()
        .insert(2, bundle(event(2, PL, 1, "2nd half", "inprogress", (1, 1), hours(-2)), true));

    for i in 0..8 {
        h.worker.run_cycle(now() + ChronoDuration::minutes(2 * i)).await;
    }

    assert_eq!(h.source.count("bundle:1"), 3);
    assert_eq!(h.source.count("bundle:2"), 3);
    for id in [1, 2] {
        let f = h.store.get_fixture(id).await.unwrap().unwrap();
        assert_eq!(f.enrichment_attempts, 3);
        assert_eq!(f.processing_status, ProcessingStatus::Error);
    }
    let still_live = h.store.get_fixture(2).await.unwrap().unwrap();
    assert_eq!(still_live.status, "2nd half");
    assert!(still_live.last_error.unwrap().contains("missing from the live feed"));
}

#[tokio::test]
async fn unrecognised_status_is_retried_through_limbo_until_the_cap() {
    let mut h = harness(only(17));
    h.insert(stored(1, PL, 1, "2nd half", ProcessingStatus::InProgress, hours(-4))).await;
    let interrupted = event(1, PL, 1, "Interrupted", "interrupted", (1, 0), hours(-4));
    *h.source.live.lock().unwrap() = vec![interrupted.clone()];
    h.source.bundles.lock().unwrap().insert(1, bundle(interrupted, false));

    h.worker.run_cycle(now()).await;
    let f = h.store.get_fixture(1).await.unwrap().unwrap();
    assert_eq!(f.status, "Interrupted");
    assert_eq!(f.enrichment_attempts, 1);

    h.source.live.lock().unwrap().clear();
    for i in 1..5 {
        h.worker.run_cycle(now() + ChronoDuration::minutes(2 * i)).await;
    }

    assert_eq!(h.source.count("bundle:1"), 3);
    let f = h.store.get_fixture(1).await.unwrap().unwrap();
    assert_eq!(f.enrichment_attempts, 3);
    assert_eq!(f.processing_status, ProcessingStatus::Error);
}

#[tokio::test]
async fn cancellation_stops_a_batch_between_fixtures() {
    let mut h = harness(only(17));
    for id in 1..=3u64 {
        h.insert(stored(id, PL, 1, "Ended", ProcessingStatus::Pending, hours(-5) + id as i64)).await;
        h.source
            .bundles
            .lock()
            .unwrap()
            .insert(id, bundle(event(id, PL, 1, "Ended", "finished", (1, 0), hours(-5) + id as i64), true));
    }
    *h.source.cancel_on_bundle.lock().unwrap() = Some(h.cancel.clone());

    let report = h.worker.run_cycle(now()).await;

    assert!(report.cancelled);
    assert_eq!(h.source.bundle_calls(), 1);
    assert_eq!(report.enriched, 1);
    assert_eq!(h.source.count("standings:17"), 0);
    assert_eq!(
        h.store.get_fixture(1).await.unwrap().unwrap().processing_status,
        ProcessingStatus::Enriched
    );
    for id in [2, 3] {
        let f = h.store.get_fixture(id).await.unwrap().unwrap();
        assert_eq!(f.processing_status, ProcessingStatus::Pending);
        assert_eq!(f.enrichment_attempts, 0);
    }
}

#[tokio::test]
async fn failed_discovery_is_retried_next_cycle() {
    let mut h = harness(only(17));
    h.source.rounds_down.store(true, Ordering::SeqCst);

    let first = h.worker.run_cycle(now()).await;
    assert!(first.discovery_ran);
    assert_eq!(first.phase_errors, 1);
    assert!(!first.idle);

    h.source.rounds_down.store(false, Ordering::SeqCst);
    h.source
        .rounds
        .lock()
        .unwrap()
        .insert((17, 1), vec![event(10, PL, 1, "Not started", "notstarted", (0, 0), hours(48))]);

    let second = h.worker.run_cycle(now() + ChronoDuration::minutes(2)).await;
    assert!(second.discovery_ran);
    assert_eq!(second.rounds_fetched, 1);
    assert_eq!(h.source.count("round:17:1"), 2);

    let third = h.worker.run_cycle(now() + ChronoDuration::minutes(4)).await;
    assert!(!third.discovery_ran);
}
