use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use std::collections::HashSet;
use tracing::debug;

use crate::model::StandingEntry;
use crate::MatchStateStore;

impl MatchStateStore {
    /// Rebuilds the table for a tournament season from a source snapshot.
    /// Teams missing from the snapshot are dropped; promotions are replaced.
    /// An empty snapshot leaves the stored table untouched.
    pub async fn replace_standings(
        &self,
        tournament_id: u32,
        season_id: u32,
        entries: Vec<StandingEntry>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut seen = HashSet::new();

            for e in &entries {
                tx.execute(
                    "INSERT INTO standings (
                        tournament_id, season_id, team_id, team_name, position, matches, wins,
                        draws, losses, scores_for, scores_against, points, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                     ON CONFLICT(tournament_id, season_id, team_id) DO UPDATE SET
                        team_name = excluded.team_name,
                        position = excluded.position,
                        matches = excluded.matches,
                        wins = excluded.wins,
                        draws = excluded.draws,
                        losses = excluded.losses,
                        scores_for = excluded.scores_for,
                        scores_against = excluded.scores_against,
                        points = excluded.points,
                        updated_at = excluded.updated_at",
                    params![
                        tournament_id,
                        season_id,
                        e.team_id as i64,
                        e.team_name,
                        e.position,
                        e.matches,
                        e.wins,
                        e.draws,
                        e.losses,
                        e.scores_for,
                        e.scores_against,
                        e.points,
                        now.timestamp(),
                    ],
                )?;

                let standing_id: i64 = tx.query_row(
                    "SELECT id FROM standings
                     WHERE tournament_id = ?1 AND season_id = ?2 AND team_id = ?3",
                    params![tournament_id, season_id, e.team_id as i64],
                    |r| r.get(0),
                )?;

                tx.execute("DELETE FROM promotions WHERE standing_id = ?1", [standing_id])?;
                for text in &e.promotions {
                    tx.execute(
                        "INSERT INTO promotions (standing_id, text) VALUES (?1, ?2)",
                        params![standing_id, text],
                    )?;
                }
                seen.insert(e.team_id as i64);
            }

            let stored: Vec<i64> = {
                let mut stmt = tx.prepare(
                    "SELECT team_id FROM standings WHERE tournament_id = ?1 AND season_id = ?2",
                )?;
                let ids = stmt
                    .query_map(params![tournament_id, season_id], |r| r.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };
            for team_id in stored.into_iter().filter(|id| !seen.contains(id)) {
                tx.execute(
                    "DELETE FROM standings WHERE tournament_id = ?1 AND season_id = ?2 AND team_id = ?3",
                    params![tournament_id, season_id, team_id],
                )?;
            }

            tx.commit().context("commit standings")?;
            debug!(tournament_id, season_id, rows = entries.len(), "Standings replaced");
            Ok(entries.len())
        })
        .await
    }

    pub async fn standings(&self, tournament_id: u32, season_id: u32) -> Result<Vec<StandingEntry>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, team_id, team_name, position, matches, wins, draws, losses,
                        scores_for, scores_against, points
                 FROM standings
                 WHERE tournament_id = ?1 AND season_id = ?2
                 ORDER BY position ASC",
            )?;
            let rows = stmt
                .query_map(params![tournament_id, season_id], |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        StandingEntry {
                            team_id: r.get::<_, i64>(1)? as u64,
                            team_name: r.get(2)?,
                            position: r.get(3)?,
                            matches: r.get(4)?,
                            wins: r.get(5)?,
                            draws: r.get(6)?,
                            losses: r.get(7)?,
                            scores_for: r.get(8)?,
                            scores_against: r.get(9)?,
                            points: r.get(10)?,
                            promotions: Vec::new(),
                        },
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut promo = conn.prepare(
                "SELECT text FROM promotions WHERE standing_id = ?1 ORDER BY id",
            )?;
            let mut out = Vec::with_capacity(rows.len());
            for (standing_id, mut entry) in rows {
                entry.promotions = promo
                    .query_map([standing_id], |r| r.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                out.push(entry);
            }
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::now;

    fn entry(team_id: u64, position: u32, points: i32, promotions: &[&str]) -> StandingEntry {
        StandingEntry {
            team_id,
            team_name: format!("Team {team_id}"),
            position,
            matches: 5,
            wins: 3,
            draws: 1,
            losses: 1,
            scores_for: 9,
            scores_against: 4,
            points,
            promotions: promotions.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn snapshot_replaces_table_and_promotions() {
        let store = MatchStateStore::open_in_memory().unwrap();
        store
            .replace_standings(
                17,
                76986,
                vec![
                    entry(1, 1, 13, &["Champions League"]),
                    entry(2, 2, 10, &["Champions League"]),
                    entry(3, 3, 7, &[]),
                ],
                now(),
            )
            .await
            .unwrap();

        store
            .replace_standings(
                17,
                76986,
                vec![entry(2, 1, 13, &["Champions League"]), entry(1, 2, 13, &["Europa League"])],
                now(),
            )
            .await
            .unwrap();

        let table = store.standings(17, 76986).await.unwrap();
        assert_eq!(table.iter().map(|e| e.team_id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(table[1].promotions, vec!["Europa League".to_string()]);
        assert_eq!(store.summary().await.unwrap().standings, 2);
    }

    #[tokio::test]
    async fn empty_snapshot_keeps_existing_table() {
        let store = MatchStateStore::open_in_memory().unwrap();
        store
            .replace_standings(17, 76986, vec![entry(1, 1, 3, &[])], now())
            .await
            .unwrap();

        assert_eq!(store.replace_standings(17, 76986, vec![], now()).await.unwrap(), 0);
        assert_eq!(store.standings(17, 76986).await.unwrap().len(), 1);
    }
}
