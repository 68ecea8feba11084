//! The worker loop: one cycle runs six phases in order and returns how long
//! to sleep before the next one.
//!
//! 1. reconciliation (zombie cleanup)
//! 2. round discovery, at most once per `discovery_interval`
//! 3. live sync
//! 4. stuck-live recovery (only when live sync succeeded)
//! 5. post-game enrichment, then one standings sync per touched tournament
//! 6. limbo recovery
//!
//! Every phase is caught on its own. A failed phase is logged and makes the
//! cycle count as active, it never stops the loop.

use anyhow::Result;
use chrono::{DateTime, Utc};
use fixture_scraper::{FixtureSource, ScrapeError, TournamentRegistry};
use logger::{
    now_iso, CycleHeartbeatEvent, EnrichmentFailedEvent, EventLogger, FixtureEnrichedEvent,
};
use match_store::{EnrichmentOutcome, Fixture, MatchStateStore, ProcessingStatus, RoundKey};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::convert;
use crate::reconcile::Reconciler;
use crate::scheduler::{RoundOutcome, RoundScheduler};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub zombies_removed: usize,
    pub discovery_ran: bool,
    pub rounds_fetched: usize,
    /// Fixtures returned by the live feed (registered tournaments only).
    pub live_seen: usize,
    pub live_updated: usize,
    pub stuck_recovered: usize,
    /// Post-game fixtures that reached Enriched this cycle.
    pub enriched: usize,
    pub limbo_recovered: usize,
    pub standings_synced: usize,
    pub enrichment_failures: usize,
    pub session_failures: usize,
    pub phase_errors: usize,
    pub cancelled: bool,
    pub idle: bool,
    pub next_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    StuckLive,
    PostGame,
    Limbo,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::StuckLive => "stuck_live",
            Phase::PostGame => "post_game",
            Phase::Limbo => "limbo",
        }
    }
}

pub struct EnrichmentWorker<S> {
    source: Arc<S>,
    store: MatchStateStore,
    registry: Arc<TournamentRegistry>,
    config: WorkerConfig,
    reconciler: Reconciler,
    scheduler: RoundScheduler<S>,
    events: EventLogger,
    cancel: CancellationToken,
    last_discovery: Option<DateTime<Utc>>,
    cycles: u64,
}

impl<S: FixtureSource> EnrichmentWorker<S> {
    pub fn new(
        source: Arc<S>,
        store: MatchStateStore,
        registry: Arc<TournamentRegistry>,
        config: WorkerConfig,
        events: EventLogger,
        cancel: CancellationToken,
    ) -> Self {
        let reconciler = Reconciler::new(store.clone(), events.clone());
        let scheduler = RoundScheduler::new(
            Arc::clone(&source),
            store.clone(),
            Arc::clone(&registry),
            config.worker_id.clone(),
            config.lock_timeout,
            events.clone(),
        );

        Self {
            source,
            store,
            registry,
            config,
            reconciler,
            scheduler,
            events,
            cancel,
            last_discovery: None,
            cycles: 0,
        }
    }

    pub fn store(&self) -> &MatchStateStore {
        &self.store
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Runs cycles until cancelled. Never returns early on a failed cycle.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            tournaments = self.registry.len(),
            "🚀 Enrichment worker started"
        );

        while !self.cancel.is_cancelled() {
            let report = self.run_cycle(Utc::now()).await;
            if report.cancelled {
                break;
            }

            if report.idle && self.config.teardown_when_idle {
                debug!("Idle cycle, closing browser until next one");
                self.source.release_session().await;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(report.next_delay) => {}
            }
        }

        self.source.release_session().await;
        info!("👋 Enrichment worker stopped after {} cycles", self.cycles);
        Ok(())
    }

    /// One pass over all phases. `now` drives every time-based decision so
    /// cycles can be replayed deterministically.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        self.cycles += 1;
        let mut report = CycleReport::default();
        let mut touched = BTreeSet::new();

        info!("--- Cycle {} ---", self.cycles);

        if !self.cancelled(&mut report) {
            self.phase_reconcile(now, &mut report).await;
        }
        if !self.cancelled(&mut report) {
            self.phase_discovery(now, &mut report).await;
        }

        let mut live_ids = None;
        if !self.cancelled(&mut report) {
            live_ids = self.phase_live_sync(now, &mut report).await;
        }
        if let Some(live_ids) = live_ids {
            if !self.cancelled(&mut report) {
                self.phase_stuck_live(&live_ids, now, &mut report, &mut touched).await;
            }
        }

        if !self.cancelled(&mut report) {
            self.phase_post_game(now, &mut report, &mut touched).await;
        }
        if !self.cancelled(&mut report) {
            self.phase_limbo(now, &mut report, &mut touched).await;
        }
        if !self.cancelled(&mut report) {
            self.sync_standings(&touched, now, &mut report).await;
        }

        let finalized = report.enriched + report.stuck_recovered + report.limbo_recovered;
        report.idle = report.phase_errors == 0 && report.live_seen == 0 && finalized == 0;
        report.next_delay = if report.idle {
            self.config.idle_interval
        } else {
            self.config.active_interval
        };

        self.finish_cycle(&report);
        report
    }

    fn cancelled(&self, report: &mut CycleReport) -> bool {
        if self.cancel.is_cancelled() {
            report.cancelled = true;
        }
        report.cancelled
    }

    // ── phase 1: reconciliation ──────────────────────────────────────────

    async fn phase_reconcile(&self, now: DateTime<Utc>, report: &mut CycleReport) {
        match self.reconciler.run(now).await {
            Ok(removed) => report.zombies_removed = removed.len(),
            Err(e) => {
                warn!("Reconciliation failed: {:#}", e);
                report.phase_errors += 1;
            }
        }
    }

    // ── phase 2: round discovery ─────────────────────────────────────────

    fn discovery_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_discovery {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map_or(true, |elapsed| elapsed >= self.config.discovery_interval),
        }
    }

    async fn phase_discovery(&mut self, now: DateTime<Utc>, report: &mut CycleReport) {
        if !self.discovery_due(now) {
            return;
        }
        report.discovery_ran = true;

        let outcomes = self.scheduler.run_all(now).await;
        // a pass where every tournament failed is retried next cycle
        if outcomes.is_empty() || outcomes.iter().any(|o| o.result.is_ok()) {
            self.last_discovery = Some(now);
        }
        let mut failed = false;
        for o in &outcomes {
            match &o.result {
                Ok(RoundOutcome::Fetched { .. }) => report.rounds_fetched += 1,
                Ok(_) => {}
                Err(e) => {
                    failed = true;
                    self.note_scrape_error(e, report).await;
                }
            }
        }
        if failed {
            report.phase_errors += 1;
        }
        info!(
            "🔎 Round discovery: {} tournaments, {} rounds fetched",
            outcomes.len(),
            report.rounds_fetched
        );
    }

    // ── phase 3: live sync ───────────────────────────────────────────────

    /// Returns the ids in the live feed, or `None` when the feed failed.
    async fn phase_live_sync(&self, now: DateTime<Utc>, report: &mut CycleReport) -> Option<HashSet<u64>> {
        let live = match self.source.live_matches().await {
            Ok(live) => live,
            Err(e) => {
                warn!("Live sync failed: {}", e);
                report.phase_errors += 1;
                self.note_session_failure(&e, report).await;
                return None;
            }
        };

        report.live_seen = live.len();
        let mut ids = HashSet::with_capacity(live.len());

        for event in &live {
            ids.insert(event.id);
            match self.store.apply_live_update(convert::live_update(event), now).await {
                Ok(true) => {
                    report.live_updated += 1;
                    debug!(
                        fixture_id = event.id,
                        "⚽ {} {}-{} {} ({})",
                        event.home_team,
                        event.home_score,
                        event.away_score,
                        event.away_team,
                        event.status
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Live update for {} failed: {:#}", event.id, e);
                    report.phase_errors += 1;
                    return None;
                }
            }
        }

        if report.live_seen > 0 {
            info!("📡 Live: {} fixtures, {} known locally", report.live_seen, report.live_updated);
        }
        Some(ids)
    }

    // ── phase 4: stuck live ──────────────────────────────────────────────

    async fn phase_stuck_live(
        &self,
        live_ids: &HashSet<u64>,
        now: DateTime<Utc>,
        report: &mut CycleReport,
        touched: &mut BTreeSet<u32>,
    ) {
        let stuck: Vec<Fixture> = match self.store.live_fixtures(self.config.max_attempts).await {
            Ok(local) => local.into_iter().filter(|f| !live_ids.contains(&f.id)).collect(),
            Err(e) => {
                warn!("Stuck-live lookup failed: {:#}", e);
                report.phase_errors += 1;
                return;
            }
        };
        if stuck.is_empty() {
            return;
        }

        info!("🕳️ {} fixtures live locally but gone from the feed", stuck.len());
        let statuses = self.enrich_batch(stuck, Phase::StuckLive, now, report, touched).await;
        report.stuck_recovered = statuses.iter().filter(|s| s.is_terminal()).count();
    }

    // ── phase 5: post-game enrichment ────────────────────────────────────

    async fn phase_post_game(&self, now: DateTime<Utc>, report: &mut CycleReport, touched: &mut BTreeSet<u32>) {
        let pending = match self
            .store
            .pending_finished(self.config.max_attempts, self.config.enrich_batch)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Pending lookup failed: {:#}", e);
                report.phase_errors += 1;
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        info!("📊 Enriching {} finished fixtures", pending.len());
        let statuses = self.enrich_batch(pending, Phase::PostGame, now, report, touched).await;
        report.enriched = statuses
            .iter()
            .filter(|s| **s == ProcessingStatus::Enriched)
            .count();
    }

    // ── phase 6: limbo ───────────────────────────────────────────────────

    async fn phase_limbo(&self, now: DateTime<Utc>, report: &mut CycleReport, touched: &mut BTreeSet<u32>) {
        let cutoff = now.timestamp() - self.config.limbo_after.as_secs() as i64;
        let limbo = match self
            .store
            .limbo_fixtures(cutoff, self.config.max_attempts, self.config.limbo_batch)
            .await
        {
            Ok(limbo) => limbo,
            Err(e) => {
                warn!("Limbo lookup failed: {:#}", e);
                report.phase_errors += 1;
                return;
            }
        };
        if limbo.is_empty() {
            return;
        }

        info!("⏳ {} fixtures in limbo", limbo.len());
        let statuses = self.enrich_batch(limbo, Phase::Limbo, now, report, touched).await;
        report.limbo_recovered = statuses.iter().filter(|s| s.is_terminal()).count();
    }

    // ── standings ────────────────────────────────────────────────────────

    async fn sync_standings(&self, touched: &BTreeSet<u32>, now: DateTime<Utc>, report: &mut CycleReport) {
        let mut failed = false;

        for tournament_id in touched {
            let Some(t) = self.registry.get(*tournament_id) else {
                continue;
            };

            let rows = match self.source.standings(t).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Standings fetch for {} failed: {}", t.name, e);
                    self.note_session_failure(&e, report).await;
                    failed = true;
                    continue;
                }
            };

            let entries = rows.iter().map(convert::standing_entry).collect();
            match self
                .store
                .replace_standings(t.tournament_id, t.season_id, entries, now)
                .await
            {
                Ok(n) => {
                    report.standings_synced += 1;
                    info!("🏆 Standings for {} synced ({} teams)", t.name, n);
                }
                Err(e) => {
                    warn!("Standings write for {} failed: {:#}", t.name, e);
                    failed = true;
                }
            }
        }

        if failed {
            report.phase_errors += 1;
        }
    }

    // ── per-fixture enrichment ───────────────────────────────────────────

    /// Enriches fixtures one at a time with a pause in between. Returns the
    /// resulting processing status of each fixture handled before a
    /// cancellation.
    async fn enrich_batch(
        &self,
        fixtures: Vec<Fixture>,
        phase: Phase,
        now: DateTime<Utc>,
        report: &mut CycleReport,
        touched: &mut BTreeSet<u32>,
    ) -> Vec<ProcessingStatus> {
        let mut statuses = Vec::with_capacity(fixtures.len());

        for (i, fixture) in fixtures.iter().enumerate() {
            if i > 0 && !self.pause_between_fixtures().await {
                break;
            }
            if self.cancel.is_cancelled() {
                break;
            }

            match self.enrich_one(fixture, phase, now, report).await {
                Ok(status) => {
                    if status == ProcessingStatus::Enriched {
                        touched.insert(fixture.tournament_id);
                    }
                    statuses.push(status);
                }
                Err(e) => {
                    error!("Storing enrichment of {} failed: {:#}", fixture.id, e);
                    report.phase_errors += 1;
                }
            }
        }

        statuses
    }

    /// `false` when cancelled during the pause.
    async fn pause_between_fixtures(&self) -> bool {
        if self.config.fixture_delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(self.config.fixture_delay) => true,
        }
    }

    async fn enrich_one(
        &self,
        fixture: &Fixture,
        phase: Phase,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<ProcessingStatus> {
        let max = self.config.max_attempts;

        let status = match self.source.match_bundle(fixture.id).await {
            Ok(bundle) => {
                let mut write = convert::enrichment_write(&bundle);
                // the feed dropped it but the match page says live: counts as an attempt
                if phase == Phase::StuckLive && write.outcome == EnrichmentOutcome::InProgress {
                    write.outcome = EnrichmentOutcome::Retry {
                        exhausted: ProcessingStatus::Error,
                        note: "live on the match page but missing from the live feed".to_string(),
                    };
                }
                let score = format!("{}-{}", write.snapshot.home_score, write.snapshot.away_score);
                let statistics = write.statistics.as_ref().map_or(0, Vec::len);
                let incidents = write.incidents.len();

                let status = self.store.save_enrichment(fixture.id, write, max, now).await?;

                if status.is_terminal() {
                    info!(
                        fixture_id = fixture.id,
                        phase = phase.as_str(),
                        "✅ {} {} {} → {}",
                        fixture.home_team,
                        score,
                        fixture.away_team,
                        status
                    );
                    self.events.record(&FixtureEnrichedEvent {
                        ts:                now_iso(),
                        event:             "FIXTURE_ENRICHED",
                        fixture_id:        fixture.id,
                        tournament_id:     fixture.tournament_id,
                        home:              fixture.home_team.clone(),
                        away:              fixture.away_team.clone(),
                        score,
                        processing_status: status.to_string(),
                        statistics,
                        incidents,
                        phase:             phase.as_str(),
                    });
                } else if matches!(status, ProcessingStatus::PartialData | ProcessingStatus::Error) {
                    self.exhausted(fixture, status, phase).await;
                } else {
                    debug!(fixture_id = fixture.id, %status, "Fixture not final yet");
                }
                status
            }
            Err(e) => {
                warn!(
                    fixture_id = fixture.id,
                    phase = phase.as_str(),
                    "Enrichment of {} vs {} failed: {}",
                    fixture.home_team,
                    fixture.away_team,
                    e
                );
                report.enrichment_failures += 1;
                self.note_session_failure(&e, report).await;

                let recorded = self
                    .store
                    .record_enrichment_failure(fixture.id, e.to_string(), max, now)
                    .await?;
                let status = recorded.unwrap_or(fixture.processing_status);
                let exhausted = status == ProcessingStatus::Error;

                self.events.record(&EnrichmentFailedEvent {
                    ts:         now_iso(),
                    event:      "ENRICHMENT_FAILED",
                    fixture_id: fixture.id,
                    phase:      phase.as_str(),
                    attempts:   (fixture.enrichment_attempts + 1).min(max),
                    exhausted,
                    error:      e.to_string(),
                });
                if exhausted {
                    self.exhausted(fixture, status, phase).await;
                }
                status
            }
        };

        if let Some(round) = fixture.round {
            let key = RoundKey::new(fixture.tournament_id, fixture.season_id, round);
            self.store.refresh_round_state(key, now).await?;
        }

        Ok(status)
    }

    async fn exhausted(&self, fixture: &Fixture, status: ProcessingStatus, phase: Phase) {
        warn!(
            fixture_id = fixture.id,
            phase = phase.as_str(),
            "🛑 {} vs {} gave up after {} attempts, left as {}",
            fixture.home_team,
            fixture.away_team,
            self.config.max_attempts,
            status
        );
        if let Some(topic) = &self.config.ntfy_topic {
            let msg = format!(
                "{} vs {} (id {}) left as {} after {} attempts",
                fixture.home_team, fixture.away_team, fixture.id, status, self.config.max_attempts
            );
            logger::send_ntfy_alert(topic, &msg, "Fixture enrichment exhausted").await;
        }
    }

    async fn note_scrape_error(&self, e: &anyhow::Error, report: &mut CycleReport) {
        if let Some(scrape) = e.downcast_ref::<ScrapeError>() {
            self.note_session_failure(scrape, report).await;
        }
    }

    /// Alerts once per cycle when the browser cannot be started.
    async fn note_session_failure(&self, e: &ScrapeError, report: &mut CycleReport) {
        if !e.is_session_failure() {
            return;
        }
        report.session_failures += 1;
        if report.session_failures > 1 {
            return;
        }
        error!("🌐 Browser session unavailable: {}", e);
        if let Some(topic) = &self.config.ntfy_topic {
            logger::send_ntfy_alert(topic, &e.to_string(), "Browser session down").await;
        }
    }

    fn finish_cycle(&self, report: &CycleReport) {
        info!(
            zombies = report.zombies_removed,
            rounds = report.rounds_fetched,
            live = report.live_seen,
            stuck = report.stuck_recovered,
            enriched = report.enriched,
            limbo = report.limbo_recovered,
            standings = report.standings_synced,
            errors = report.phase_errors,
            cancelled = report.cancelled,
            "💓 Cycle {} done, next in {}s",
            self.cycles,
            report.next_delay.as_secs()
        );
        self.events.record(&CycleHeartbeatEvent {
            ts:               now_iso(),
            event:            "CYCLE_HEARTBEAT",
            cycle:            self.cycles,
            live:             report.live_seen,
            enriched:         report.enriched,
            stuck_recovered:  report.stuck_recovered,
            limbo_recovered:  report.limbo_recovered,
            zombies_removed:  report.zombies_removed,
            standings_synced: report.standings_synced,
            phase_errors:     report.phase_errors,
            idle:             report.idle,
            next_delay_secs:  report.next_delay.as_secs(),
        });
    }
}
