use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension};

pub const SCHEMA_VERSION: i64 = 1;

pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fixtures (
            id INTEGER PRIMARY KEY,
            tournament_id INTEGER NOT NULL,
            season_id INTEGER NOT NULL,
            round INTEGER,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            home_score INTEGER NOT NULL DEFAULT 0,
            away_score INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            start_timestamp INTEGER NOT NULL,
            venue TEXT,
            referee TEXT,
            attendance INTEGER,
            processing_status TEXT NOT NULL DEFAULT 'Pending',
            enrichment_attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt_at INTEGER,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_fixtures_round
            ON fixtures(tournament_id, season_id, round);
        CREATE INDEX IF NOT EXISTS idx_fixtures_processing
            ON fixtures(processing_status, start_timestamp);
        CREATE INDEX IF NOT EXISTS idx_fixtures_pairing
            ON fixtures(tournament_id, season_id, home_team, away_team);

        CREATE TABLE IF NOT EXISTS statistics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fixture_id INTEGER NOT NULL REFERENCES fixtures(id) ON DELETE CASCADE,
            period TEXT NOT NULL,
            group_name TEXT NOT NULL,
            name TEXT NOT NULL,
            home_raw TEXT NOT NULL,
            away_raw TEXT NOT NULL,
            home_value REAL,
            away_value REAL,
            compare_code INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_statistics_fixture ON statistics(fixture_id);

        CREATE TABLE IF NOT EXISTS incidents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fixture_id INTEGER NOT NULL REFERENCES fixtures(id) ON DELETE CASCADE,
            seq INTEGER NOT NULL,
            incident_type TEXT NOT NULL,
            incident_class TEXT,
            minute INTEGER NOT NULL,
            added_time INTEGER,
            is_home INTEGER,
            player TEXT,
            assist TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_incidents_fixture ON incidents(fixture_id);

        CREATE TABLE IF NOT EXISTS round_states (
            tournament_id INTEGER NOT NULL,
            season_id INTEGER NOT NULL,
            round INTEGER NOT NULL,
            total INTEGER NOT NULL DEFAULT 0,
            enriched INTEGER NOT NULL DEFAULT 0,
            postponed INTEGER NOT NULL DEFAULT 0,
            cancelled INTEGER NOT NULL DEFAULT 0,
            is_fully_processed INTEGER NOT NULL DEFAULT 0,
            lock_holder TEXT,
            locked_at INTEGER,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (tournament_id, season_id, round)
        );

        CREATE TABLE IF NOT EXISTS standings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tournament_id INTEGER NOT NULL,
            season_id INTEGER NOT NULL,
            team_id INTEGER NOT NULL,
            team_name TEXT NOT NULL,
            position INTEGER NOT NULL,
            matches INTEGER NOT NULL,
            wins INTEGER NOT NULL,
            draws INTEGER NOT NULL,
            losses INTEGER NOT NULL,
            scores_for INTEGER NOT NULL,
            scores_against INTEGER NOT NULL,
            points INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (tournament_id, season_id, team_id)
        );

        CREATE TABLE IF NOT EXISTS promotions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            standing_id INTEGER NOT NULL REFERENCES standings(id) ON DELETE CASCADE,
            text TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_promotions_standing ON promotions(standing_id);
        "#,
    )
    .context("init schema")?;

    let stored: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
        .optional()
        .context("read schema version")?
        .flatten();

    match stored {
        None => {
            conn.execute(
                "INSERT INTO schema_version(version) VALUES (?1)",
                [SCHEMA_VERSION],
            )
            .context("write schema version")?;
        }
        Some(v) if v > SCHEMA_VERSION => {
            bail!("database schema v{v} is newer than this build (v{SCHEMA_VERSION})")
        }
        Some(_) => {}
    }

    Ok(())
}
