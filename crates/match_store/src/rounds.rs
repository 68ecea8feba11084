use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::time::Duration;
use tracing::debug;

use crate::fixtures::query_fixtures;
use crate::model::{Fixture, RoundKey, RoundState};
use crate::{to_datetime, MatchStateStore};

fn read_round_state(conn: &Connection, key: RoundKey) -> Result<Option<RoundState>> {
    Ok(conn
        .query_row(
            "SELECT total, enriched, postponed, cancelled, is_fully_processed, lock_holder, locked_at
             FROM round_states
             WHERE tournament_id = ?1 AND season_id = ?2 AND round = ?3",
            params![key.tournament_id, key.season_id, key.round],
            |r| {
                Ok(RoundState {
                    key,
                    total: r.get(0)?,
                    enriched: r.get(1)?,
                    postponed: r.get(2)?,
                    cancelled: r.get(3)?,
                    is_fully_processed: r.get(4)?,
                    lock_holder: r.get(5)?,
                    locked_at: to_datetime(r.get(6)?),
                })
            },
        )
        .optional()?)
}

impl MatchStateStore {
    /// Highest stored round for a tournament season, ignoring rounds above
    /// `upto` (knockout round ids can sit above the league range).
    pub async fn max_round(&self, tournament_id: u32, season_id: u32, upto: u32) -> Result<Option<u32>> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT MAX(round) FROM fixtures
                 WHERE tournament_id = ?1 AND season_id = ?2 AND round <= ?3",
                params![tournament_id, season_id, upto],
                |r| r.get(0),
            )?)
        })
        .await
    }

    /// Fixtures of one round; with `after` only those kicking off strictly
    /// later than that timestamp.
    pub async fn fixtures_in_round(&self, key: RoundKey, after: Option<i64>) -> Result<Vec<Fixture>> {
        self.call(move |conn| {
            query_fixtures(
                conn,
                "WHERE tournament_id = ?1 AND season_id = ?2 AND round = ?3
                   AND (?4 IS NULL OR start_timestamp > ?4)
                 ORDER BY start_timestamp ASC, id ASC",
                params![key.tournament_id, key.season_id, key.round, after],
            )
        })
        .await
    }

    pub async fn latest_start(&self, key: RoundKey, after: Option<i64>) -> Result<Option<i64>> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT MAX(start_timestamp) FROM fixtures
                 WHERE tournament_id = ?1 AND season_id = ?2 AND round = ?3
                   AND (?4 IS NULL OR start_timestamp > ?4)",
                params![key.tournament_id, key.season_id, key.round, after],
                |r| r.get(0),
            )?)
        })
        .await
    }

    pub async fn round_state(&self, key: RoundKey) -> Result<Option<RoundState>> {
        self.call(move |conn| read_round_state(conn, key)).await
    }

    /// Recounts the round from its fixtures. Lock columns are preserved.
    pub async fn refresh_round_state(&self, key: RoundKey, now: DateTime<Utc>) -> Result<RoundState> {
        self.call(move |conn| {
            let (total, enriched, postponed, cancelled): (u32, u32, u32, u32) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(processing_status = 'Enriched'), 0),
                        COALESCE(SUM(processing_status = 'Postponed'), 0),
                        COALESCE(SUM(processing_status = 'Cancelled'), 0)
                 FROM fixtures
                 WHERE tournament_id = ?1 AND season_id = ?2 AND round = ?3",
                params![key.tournament_id, key.season_id, key.round],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )?;

            let fully_processed = enriched + cancelled == total;

            conn.execute(
                "INSERT INTO round_states (
                    tournament_id, season_id, round, total, enriched, postponed, cancelled,
                    is_fully_processed, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(tournament_id, season_id, round) DO UPDATE SET
                    total = excluded.total,
                    enriched = excluded.enriched,
                    postponed = excluded.postponed,
                    cancelled = excluded.cancelled,
                    is_fully_processed = excluded.is_fully_processed,
                    updated_at = excluded.updated_at",
                params![
                    key.tournament_id,
                    key.season_id,
                    key.round,
                    total,
                    enriched,
                    postponed,
                    cancelled,
                    fully_processed,
                    now.timestamp(),
                ],
            )?;

            debug!(
                tournament_id = key.tournament_id,
                round = key.round,
                total,
                enriched,
                postponed,
                cancelled,
                "Round state refreshed"
            );

            read_round_state(conn, key)?
                .ok_or_else(|| anyhow::anyhow!("round state vanished after upsert"))
        })
        .await
    }

    /// Takes the soft lock for `holder`. Succeeds when the round is unlocked,
    /// already held by `holder`, or held by anyone for longer than `timeout`.
    pub async fn try_lock_round(
        &self,
        key: RoundKey,
        holder: &str,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<bool> {
        let holder = holder.to_string();
        let stale_before = now.timestamp() - timeout.as_secs() as i64;
        self.call(move |conn| {
            let changed = conn.execute(
                "INSERT INTO round_states (tournament_id, season_id, round, lock_holder, locked_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(tournament_id, season_id, round) DO UPDATE SET
                    lock_holder = excluded.lock_holder,
                    locked_at = excluded.locked_at,
                    updated_at = excluded.updated_at
                 WHERE round_states.lock_holder IS NULL
                    OR round_states.lock_holder = excluded.lock_holder
                    OR round_states.locked_at IS NULL
                    OR round_states.locked_at <= ?6",
                params![
                    key.tournament_id,
                    key.season_id,
                    key.round,
                    holder,
                    now.timestamp(),
                    stale_before,
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    /// Releases the lock if `holder` still owns it.
    pub async fn release_round_lock(&self, key: RoundKey, holder: &str) -> Result<bool> {
        let holder = holder.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE round_states SET lock_holder = NULL, locked_at = NULL
                 WHERE tournament_id = ?1 AND season_id = ?2 AND round = ?3 AND lock_holder = ?4",
                params![key.tournament_id, key.season_id, key.round, holder],
            )?;
            Ok(changed == 1)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ProcessingStatus;
    use crate::testutil::{fixture, now};

    const LOCK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

    fn key(round: u32) -> RoundKey {
        RoundKey::new(7, 76953, round)
    }

    #[tokio::test]
    async fn fully_processed_counts_enriched_and_cancelled() {
        let store = MatchStateStore::open_in_memory().unwrap();
        for (id, ps) in [
            (1, ProcessingStatus::Enriched),
            (2, ProcessingStatus::Cancelled),
            (3, ProcessingStatus::Postponed),
        ] {
            store
                .insert_fixture_if_absent(fixture(id, 8, "H", &format!("A{id}"), "Ended", ps), now())
                .await
                .unwrap();
        }

        let state = store.refresh_round_state(key(8), now()).await.unwrap();
        assert_eq!((state.total, state.enriched, state.cancelled, state.postponed), (3, 1, 1, 1));
        assert!(!state.is_fully_processed);

        let empty = store.refresh_round_state(key(9), now()).await.unwrap();
        assert_eq!(empty.total, 0);
        assert!(empty.is_fully_processed);
    }

    #[tokio::test]
    async fn max_round_and_boundaries() {
        let store = MatchStateStore::open_in_memory().unwrap();
        for (id, round) in [(1, 1), (2, 8), (3, 29)] {
            store
                .insert_fixture_if_absent(fixture(id, round, "H", &format!("A{id}"), "Ended", ProcessingStatus::Pending), now())
                .await
                .unwrap();
        }

        assert_eq!(store.max_round(7, 76953, 8).await.unwrap(), Some(8));
        assert_eq!(store.max_round(7, 76953, 30).await.unwrap(), Some(29));
        assert_eq!(store.max_round(17, 76986, 38).await.unwrap(), None);

        assert_eq!(store.latest_start(key(8), None).await.unwrap(), Some(1_700_000_002));
        assert_eq!(store.latest_start(key(8), Some(1_700_000_002)).await.unwrap(), None);
        assert_eq!(store.fixtures_in_round(key(1), Some(0)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn soft_lock_excludes_other_holders_until_stale() {
        let store = MatchStateStore::open_in_memory().unwrap();
        let t0 = now();

        assert!(store.try_lock_round(key(3), "worker-a", t0, LOCK_TIMEOUT).await.unwrap());
        assert!(store.try_lock_round(key(3), "worker-a", t0, LOCK_TIMEOUT).await.unwrap());
        assert!(!store.try_lock_round(key(3), "worker-b", t0, LOCK_TIMEOUT).await.unwrap());

        let later = t0 + chrono::Duration::minutes(31);
        assert!(store.try_lock_round(key(3), "worker-b", later, LOCK_TIMEOUT).await.unwrap());

        let state = store.round_state(key(3)).await.unwrap().unwrap();
        assert_eq!(state.lock_holder.as_deref(), Some("worker-b"));
        assert_eq!(state.locked_at, Some(later));
    }

    #[tokio::test]
    async fn release_only_by_owner_and_refresh_keeps_lock() {
        let store = MatchStateStore::open_in_memory().unwrap();
        assert!(store.try_lock_round(key(4), "worker-a", now(), LOCK_TIMEOUT).await.unwrap());

        let refreshed = store.refresh_round_state(key(4), now()).await.unwrap();
        assert_eq!(refreshed.lock_holder.as_deref(), Some("worker-a"));

        assert!(!store.release_round_lock(key(4), "worker-b").await.unwrap());
        assert!(store.release_round_lock(key(4), "worker-a").await.unwrap());
        assert!(store.try_lock_round(key(4), "worker-b", now(), LOCK_TIMEOUT).await.unwrap());
    }
}
