//! Raw JSON shapes of the source's internal endpoints.
//!
//! Everything is optional: the source drops and nulls fields freely, and a
//! missing team name must not cost us the whole event list.

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EventsPayload {
    pub events: Option<Vec<WireEvent>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EventPayload {
    pub event: Option<WireEvent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireEvent {
    pub id: Option<u64>,
    pub home_team: Option<WireTeam>,
    pub away_team: Option<WireTeam>,
    pub home_score: Option<WireScore>,
    pub away_score: Option<WireScore>,
    pub status: Option<WireStatus>,
    pub start_timestamp: Option<i64>,
    pub tournament: Option<WireTournament>,
    pub season: Option<WireSeason>,
    pub round_info: Option<WireRoundInfo>,
    pub venue: Option<WireVenue>,
    pub referee: Option<WireNamed>,
    pub attendance: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireTeam {
    pub id: Option<u64>,
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireScore {
    pub current: Option<i32>,
    pub display: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireStatus {
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireTournament {
    pub name: Option<String>,
    pub unique_tournament: Option<WireUniqueTournament>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireUniqueTournament {
    pub id: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireSeason {
    pub id: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireRoundInfo {
    pub round: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireVenue {
    pub name: Option<String>,
    pub stadium: Option<WireNamed>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireNamed {
    pub name: Option<String>,
}

// ── statistics ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StatisticsPayload {
    pub statistics: Option<Vec<WireStatPeriod>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireStatPeriod {
    pub period: Option<String>,
    pub groups: Option<Vec<WireStatGroup>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireStatGroup {
    pub group_name: Option<String>,
    pub statistics_items: Option<Vec<WireStatItem>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireStatItem {
    pub name: Option<String>,
    pub home: Option<String>,
    pub away: Option<String>,
    pub compare_code: Option<i32>,
}

// ── incidents ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IncidentsPayload {
    pub incidents: Option<Vec<WireIncident>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireIncident {
    pub incident_type: Option<String>,
    pub incident_class: Option<String>,
    pub time: Option<i32>,
    pub added_time: Option<i32>,
    pub is_home: Option<bool>,
    pub player: Option<WireNamed>,
    pub assist1: Option<WireNamed>,
}

// ── standings ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StandingsPayload {
    pub standings: Option<Vec<WireStandingTable>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireStandingTable {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub rows: Option<Vec<WireStandingRow>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireStandingRow {
    pub team: Option<WireTeam>,
    pub position: Option<u32>,
    pub matches: Option<i32>,
    pub wins: Option<i32>,
    pub draws: Option<i32>,
    pub losses: Option<i32>,
    pub scores_for: Option<i32>,
    pub scores_against: Option<i32>,
    pub points: Option<i32>,
    pub promotion: Option<WirePromotion>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WirePromotion {
    pub text: Option<String>,
}
