use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row, Transaction};
use tracing::debug;

use crate::model::{
    EnrichmentOutcome, EnrichmentWrite, Fixture, IncidentRow, LiveUpdate, NewFixture,
    StatisticRow, StoreSummary,
};
use crate::status::{
    known_statuses, sql_list, ProcessingStatus, ADVERSE_STATUSES, FINISHED_STATUSES,
    LIVE_STATUSES, NOT_STARTED, POSTPONED,
};
use crate::{to_datetime, MatchStateStore};

pub(crate) const FIXTURE_COLUMNS: &str = "id, tournament_id, season_id, round, home_team, \
     away_team, home_score, away_score, status, start_timestamp, venue, referee, attendance, \
     processing_status, enrichment_attempts, last_attempt_at, last_error, updated_at";

const TERMINAL: &str = "'Enriched', 'Postponed', 'Cancelled'";

/// Left for operators once the attempt cap is hit.
const EXHAUSTED: &str = "'PartialData', 'Error'";

pub(crate) fn fixture_from_row(row: &Row<'_>) -> rusqlite::Result<Fixture> {
    Ok(Fixture {
        id: row.get::<_, i64>(0)? as u64,
        tournament_id: row.get(1)?,
        season_id: row.get(2)?,
        round: row.get(3)?,
        home_team: row.get(4)?,
        away_team: row.get(5)?,
        home_score: row.get(6)?,
        away_score: row.get(7)?,
        status: row.get(8)?,
        start_timestamp: row.get(9)?,
        venue: row.get(10)?,
        referee: row.get(11)?,
        attendance: row.get(12)?,
        processing_status: row.get(13)?,
        enrichment_attempts: row.get(14)?,
        last_attempt_at: to_datetime(row.get(15)?),
        last_error: row.get(16)?,
        updated_at: to_datetime(row.get(17)?),
    })
}

/// `SELECT <fixture columns> FROM fixtures <tail>`.
pub(crate) fn query_fixtures<P: Params>(conn: &Connection, tail: &str, params: P) -> Result<Vec<Fixture>> {
    let sql = format!("SELECT {FIXTURE_COLUMNS} FROM fixtures {tail}");
    let mut stmt = conn.prepare(&sql).context("prepare fixture query")?;
    let rows = stmt
        .query_map(params, fixture_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

impl MatchStateStore {
    /// Inserts a newly discovered fixture. Returns `false` when the id is
    /// already stored; existing rows are never overwritten here.
    pub async fn insert_fixture_if_absent(&self, fixture: NewFixture, now: DateTime<Utc>) -> Result<bool> {
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO fixtures (
                    id, tournament_id, season_id, round, home_team, away_team,
                    home_score, away_score, status, start_timestamp, processing_status,
                    created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                params![
                    fixture.id as i64,
                    fixture.tournament_id,
                    fixture.season_id,
                    fixture.round,
                    fixture.home_team,
                    fixture.away_team,
                    fixture.home_score,
                    fixture.away_score,
                    fixture.status,
                    fixture.start_timestamp,
                    fixture.processing_status,
                    now.timestamp(),
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    pub async fn get_fixture(&self, id: u64) -> Result<Option<Fixture>> {
        self.call(move |conn| {
            let sql = format!("SELECT {FIXTURE_COLUMNS} FROM fixtures WHERE id = ?1");
            Ok(conn
                .query_row(&sql, [id as i64], fixture_from_row)
                .optional()?)
        })
        .await
    }

    /// Applies a live-feed observation. Terminal and exhausted fixtures are
    /// left alone; returns whether a row changed.
    pub async fn apply_live_update(&self, update: LiveUpdate, now: DateTime<Utc>) -> Result<bool> {
        self.call(move |conn| {
            let sql = format!(
                "UPDATE fixtures
                 SET home_score = ?2, away_score = ?3, status = ?4,
                     processing_status = ?5, updated_at = ?6
                 WHERE id = ?1 AND processing_status NOT IN ({TERMINAL}, {EXHAUSTED})"
            );
            let changed = conn.execute(
                &sql,
                params![
                    update.id as i64,
                    update.home_score,
                    update.away_score,
                    update.status,
                    update.processing_status,
                    now.timestamp(),
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    /// Fixtures we believe are being played right now and that still have
    /// attempts left.
    pub async fn live_fixtures(&self, max_attempts: u32) -> Result<Vec<Fixture>> {
        self.call(move |conn| {
            let tail = format!(
                "WHERE processing_status NOT IN ({TERMINAL}, {EXHAUSTED})
                   AND (processing_status = 'InProgress' OR status IN ({}))
                   AND enrichment_attempts < ?1
                 ORDER BY start_timestamp ASC, id ASC",
                sql_list(&LIVE_STATUSES)
            );
            query_fixtures(conn, &tail, [max_attempts])
        })
        .await
    }

    /// Finished fixtures waiting for enrichment, oldest kick-off first.
    pub async fn pending_finished(&self, max_attempts: u32, limit: u32) -> Result<Vec<Fixture>> {
        self.call(move |conn| {
            let tail = format!(
                "WHERE processing_status = 'Pending'
                   AND status IN ({})
                   AND enrichment_attempts < ?1
                 ORDER BY start_timestamp ASC, id ASC
                 LIMIT ?2",
                sql_list(&FINISHED_STATUSES)
            );
            query_fixtures(conn, &tail, params![max_attempts, limit])
        })
        .await
    }

    /// "Not started"/"Postponed" fixtures, and fixtures with a status string
    /// no other selector knows, whose kick-off is older than `cutoff` and
    /// that never reached a terminal state.
    pub async fn limbo_fixtures(&self, cutoff: i64, max_attempts: u32, limit: u32) -> Result<Vec<Fixture>> {
        self.call(move |conn| {
            let tail = format!(
                "WHERE (status IN ({}) OR status NOT IN ({}))
                   AND start_timestamp < ?1
                   AND processing_status IN ('Pending', 'InProgress')
                   AND enrichment_attempts < ?2
                 ORDER BY start_timestamp ASC, id ASC
                 LIMIT ?3",
                sql_list(&[NOT_STARTED, POSTPONED]),
                sql_list(&known_statuses())
            );
            query_fixtures(conn, &tail, params![cutoff, max_attempts, limit])
        })
        .await
    }

    /// Persists one enrichment pass in a single transaction and returns the
    /// processing status the fixture ended up in.
    pub async fn save_enrichment(
        &self,
        id: u64,
        write: EnrichmentWrite,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<ProcessingStatus> {
        self.call(move |conn| {
            let tx = conn.transaction()?;

            let attempts: u32 = tx
                .query_row(
                    "SELECT enrichment_attempts FROM fixtures WHERE id = ?1",
                    [id as i64],
                    |r| r.get(0),
                )
                .optional()?
                .with_context(|| format!("fixture {id} not stored"))?;

            let bumped = (attempts + 1).min(max_attempts.max(1));
            let (status, attempts, error) = match &write.outcome {
                EnrichmentOutcome::Terminal(status) => (*status, bumped, None),
                EnrichmentOutcome::InProgress => (ProcessingStatus::InProgress, attempts, None),
                EnrichmentOutcome::Retry { exhausted, note } => {
                    let status = if bumped >= max_attempts {
                        *exhausted
                    } else {
                        ProcessingStatus::Pending
                    };
                    (status, bumped, Some(note.clone()))
                }
            };

            let snap = &write.snapshot;
            tx.execute(
                "UPDATE fixtures
                 SET home_score = ?2, away_score = ?3, status = ?4, start_timestamp = COALESCE(?5, start_timestamp),
                     venue = COALESCE(?6, venue), referee = COALESCE(?7, referee),
                     attendance = COALESCE(?8, attendance),
                     processing_status = ?9, enrichment_attempts = ?10,
                     last_attempt_at = ?11, last_error = ?12, updated_at = ?11
                 WHERE id = ?1",
                params![
                    id as i64,
                    snap.home_score,
                    snap.away_score,
                    snap.status,
                    snap.start_timestamp,
                    snap.venue,
                    snap.referee,
                    snap.attendance,
                    status,
                    attempts,
                    now.timestamp(),
                    error,
                ],
            )?;

            if let Some(stats) = &write.statistics {
                replace_statistics(&tx, id, stats)?;
            }
            replace_incidents(&tx, id, &write.incidents)?;

            tx.commit().context("commit enrichment")?;
            debug!(id, %status, attempts, "Enrichment saved");
            Ok(status)
        })
        .await
    }

    /// Counts a failed attempt. Pending below the cap, Error at it. Returns
    /// `None` when the fixture is unknown or already terminal.
    pub async fn record_enrichment_failure(
        &self,
        id: u64,
        error: String,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<ProcessingStatus>> {
        self.call(move |conn| {
            let sql = format!(
                "UPDATE fixtures
                 SET enrichment_attempts = MIN(enrichment_attempts + 1, ?2),
                     processing_status = CASE WHEN enrichment_attempts + 1 >= ?2
                                              THEN 'Error' ELSE 'Pending' END,
                     last_error = ?3, last_attempt_at = ?4, updated_at = ?4
                 WHERE id = ?1 AND processing_status NOT IN ({TERMINAL})"
            );
            let changed = conn.execute(
                &sql,
                params![id as i64, max_attempts.max(1), error, now.timestamp()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let status = conn.query_row(
                "SELECT processing_status FROM fixtures WHERE id = ?1",
                [id as i64],
                |r| r.get(0),
            )?;
            Ok(Some(status))
        })
        .await
    }

    pub async fn statistics(&self, fixture_id: u64) -> Result<Vec<StatisticRow>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT period, group_name, name, home_raw, away_raw, home_value, away_value, compare_code
                 FROM statistics WHERE fixture_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([fixture_id as i64], |r| {
                    Ok(StatisticRow {
                        period: r.get(0)?,
                        group: r.get(1)?,
                        name: r.get(2)?,
                        home_raw: r.get(3)?,
                        away_raw: r.get(4)?,
                        home_value: r.get(5)?,
                        away_value: r.get(6)?,
                        compare_code: r.get(7)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn incidents(&self, fixture_id: u64) -> Result<Vec<IncidentRow>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT incident_type, incident_class, minute, added_time, is_home, player, assist
                 FROM incidents WHERE fixture_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map([fixture_id as i64], |r| {
                    Ok(IncidentRow {
                        incident_type: r.get(0)?,
                        incident_class: r.get(1)?,
                        minute: r.get(2)?,
                        added_time: r.get(3)?,
                        is_home: r.get(4)?,
                        player: r.get(5)?,
                        assist: r.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Deletes postponed/cancelled rows that have a healthy sibling with the
    /// same (tournament, season, round, home, away). Returns what was deleted.
    pub async fn remove_zombie_fixtures(&self) -> Result<Vec<Fixture>> {
        self.call(|conn| {
            let adverse = sql_list(&ADVERSE_STATUSES);
            let tail = format!(
                "AS z
                 WHERE (z.processing_status IN ('Postponed', 'Cancelled') OR z.status IN ({adverse}))
                   AND EXISTS (
                       SELECT 1 FROM fixtures s
                       WHERE s.id <> z.id
                         AND s.tournament_id = z.tournament_id
                         AND s.season_id = z.season_id
                         AND s.round IS z.round
                         AND s.home_team = z.home_team
                         AND s.away_team = z.away_team
                         AND s.processing_status IN ('Pending', 'InProgress', 'Enriched')
                         AND s.status NOT IN ({adverse})
                   )
                 ORDER BY z.id"
            );

            let tx = conn.transaction()?;
            let zombies = query_fixtures(&tx, &tail, [])?;
            for zombie in &zombies {
                tx.execute("DELETE FROM fixtures WHERE id = ?1", [zombie.id as i64])?;
            }
            tx.commit().context("commit zombie cleanup")?;
            Ok(zombies)
        })
        .await
    }

    /// Most recently written fixtures, newest first.
    pub async fn recently_updated(&self, limit: u32) -> Result<Vec<Fixture>> {
        self.call(move |conn| query_fixtures(conn, "ORDER BY updated_at DESC, id DESC LIMIT ?1", [limit])).await
    }

    pub async fn summary(&self) -> Result<StoreSummary> {
        self.call(|conn| {
            let count = |table: &str| -> Result<u64> {
                let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
                Ok(n as u64)
            };

            let mut summary = StoreSummary {
                fixtures: count("fixtures")?,
                statistics: count("statistics")?,
                incidents: count("incidents")?,
                standings: count("standings")?,
                ..StoreSummary::default()
            };

            let mut stmt = conn.prepare(
                "SELECT processing_status, COUNT(*) FROM fixtures
                 GROUP BY processing_status ORDER BY processing_status",
            )?;
            summary.by_status = stmt
                .query_map([], |r| Ok((r.get::<_, ProcessingStatus>(0)?, r.get::<_, i64>(1)? as u64)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let (total, complete, locked): (i64, i64, i64) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(is_fully_processed), 0),
                        COALESCE(SUM(lock_holder IS NOT NULL), 0)
                 FROM round_states",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )?;
            summary.rounds_total = total as u64;
            summary.rounds_complete = complete as u64;
            summary.rounds_locked = locked as u64;

            Ok(summary)
        })
        .await
    }
}

fn replace_statistics(tx: &Transaction<'_>, id: u64, stats: &[StatisticRow]) -> Result<()> {
    tx.execute("DELETE FROM statistics WHERE fixture_id = ?1", [id as i64])?;
    let mut stmt = tx.prepare(
        "INSERT INTO statistics (fixture_id, period, group_name, name, home_raw, away_raw,
                                 home_value, away_value, compare_code)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for s in stats {
        stmt.execute(params![
            id as i64,
            s.period,
            s.group,
            s.name,
            s.home_raw,
            s.away_raw,
            s.home_value,
            s.away_value,
            s.compare_code,
        ])?;
    }
    Ok(())
}

fn replace_incidents(tx: &Transaction<'_>, id: u64, incidents: &[IncidentRow]) -> Result<()> {
    tx.execute("DELETE FROM incidents WHERE fixture_id = ?1", [id as i64])?;
    let mut stmt = tx.prepare(
        "INSERT INTO incidents (fixture_id, seq, incident_type, incident_class, minute,
                                added_time, is_home, player, assist)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for (seq, i) in incidents.iter().enumerate() {
        stmt.execute(params![
            id as i64,
            seq as i64,
            i.incident_type,
            i.incident_class,
            i.minute,
            i.added_time,
            i.is_home,
            i.player,
            i.assist,
        ])?;
    }
    Ok(())
}
