use chrono::{DateTime, Utc};

use crate::status::ProcessingStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub id: u64,
    pub tournament_id: u32,
    pub season_id: u32,
    pub round: Option<u32>,
    pub home_team: String,
    pub away_team: String,
    pub home_score: i32,
    pub away_score: i32,
    pub status: String,
    pub start_timestamp: i64,
    pub venue: Option<String>,
    pub referee: Option<String>,
    pub attendance: Option<u32>,
    pub processing_status: ProcessingStatus,
    pub enrichment_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A fixture seen for the first time (round discovery).
#[derive(Debug, Clone, PartialEq)]
pub struct NewFixture {
    pub id: u64,
    pub tournament_id: u32,
    pub season_id: u32,
    pub round: Option<u32>,
    pub home_team: String,
    pub away_team: String,
    pub home_score: i32,
    pub away_score: i32,
    pub status: String,
    pub start_timestamp: i64,
    pub processing_status: ProcessingStatus,
}

/// Score/status from the live feed for a fixture already stored.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveUpdate {
    pub id: u64,
    pub home_score: i32,
    pub away_score: i32,
    pub status: String,
    pub processing_status: ProcessingStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatisticRow {
    pub period: String,
    pub group: String,
    pub name: String,
    pub home_raw: String,
    pub away_raw: String,
    pub home_value: Option<f64>,
    pub away_value: Option<f64>,
    /// 1 home better, 2 away better, 3 equal.
    pub compare_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentRow {
    pub incident_type: String,
    pub incident_class: Option<String>,
    pub minute: i32,
    pub added_time: Option<i32>,
    pub is_home: Option<bool>,
    pub player: Option<String>,
    pub assist: Option<String>,
}

/// Authoritative fixture fields returned by the detail endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureSnapshot {
    pub home_score: i32,
    pub away_score: i32,
    pub status: String,
    /// `None` keeps the stored kick-off time.
    pub start_timestamp: Option<i64>,
    pub venue: Option<String>,
    pub referee: Option<String>,
    pub attendance: Option<u32>,
}

/// What an enrichment pass decided for the fixture.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    /// Final state; never selected again.
    Terminal(ProcessingStatus),
    /// Still being played.
    InProgress,
    /// Counts as an attempt. Stays Pending until the cap, then `exhausted`.
    Retry {
        exhausted: ProcessingStatus,
        note: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentWrite {
    pub snapshot: FixtureSnapshot,
    /// `None` keeps whatever statistics were stored before.
    pub statistics: Option<Vec<StatisticRow>>,
    pub incidents: Vec<IncidentRow>,
    pub outcome: EnrichmentOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoundKey {
    pub tournament_id: u32,
    pub season_id: u32,
    pub round: u32,
}

impl RoundKey {
    pub fn new(tournament_id: u32, season_id: u32, round: u32) -> Self {
        Self {
            tournament_id,
            season_id,
            round,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundState {
    pub key: RoundKey,
    pub total: u32,
    pub enriched: u32,
    pub postponed: u32,
    pub cancelled: u32,
    pub is_fully_processed: bool,
    pub lock_holder: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandingEntry {
    pub team_id: u64,
    pub team_name: String,
    pub position: u32,
    pub matches: i32,
    pub wins: i32,
    pub draws: i32,
    pub losses: i32,
    pub scores_for: i32,
    pub scores_against: i32,
    pub points: i32,
    pub promotions: Vec<String>,
}

/// Row counts for the operator CLI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSummary {
    pub fixtures: u64,
    pub statistics: u64,
    pub incidents: u64,
    pub standings: u64,
    pub by_status: Vec<(ProcessingStatus, u64)>,
    pub rounds_total: u64,
    pub rounds_complete: u64,
    pub rounds_locked: u64,
}
