//! Semantic records handed to the worker, built from the wire shapes with
//! defaults filled in.

use crate::wire::{
    EventsPayload, IncidentsPayload, StandingsPayload, StatisticsPayload, WireEvent, WireNamed,
    WireScore, WireTeam,
};

pub const UNKNOWN_TEAM: &str = "Unknown";

/// Coarse lifecycle of a fixture as the source reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    NotStarted,
    Live,
    Finished,
    Postponed,
    Cancelled,
    Unknown,
}

/// Classifies by the machine `type` first, falling back to the description
/// for payloads that omit it.
pub fn classify_status(description: &str, status_type: &str) -> StatusClass {
    match status_type.to_ascii_lowercase().as_str() {
        "notstarted" => return StatusClass::NotStarted,
        "inprogress" => return StatusClass::Live,
        "finished" => return StatusClass::Finished,
        "postponed" => return StatusClass::Postponed,
        "canceled" | "cancelled" => return StatusClass::Cancelled,
        _ => {}
    }

    match description.to_ascii_lowercase().as_str() {
        "not started" => StatusClass::NotStarted,
        "ended" | "finished" | "aet" | "ap" | "after extra time" | "after penalties" => {
            StatusClass::Finished
        }
        "postponed" => StatusClass::Postponed,
        "canceled" | "cancelled" => StatusClass::Cancelled,
        "live" | "1st half" | "2nd half" | "halftime" | "extra time" | "penalties"
        | "awaiting extra time" | "awaiting penalties" => StatusClass::Live,
        _ => StatusClass::Unknown,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchEvent {
    pub id: u64,
    pub tournament_id: Option<u32>,
    pub tournament_name: String,
    pub season_id: Option<u32>,
    pub round: Option<u32>,
    pub home_team: String,
    pub away_team: String,
    pub home_score: i32,
    pub away_score: i32,
    /// Source description, e.g. "Ended", "2nd half", "Postponed".
    pub status: String,
    /// Source machine type, e.g. "finished", "inprogress".
    pub status_type: String,
    pub start_timestamp: i64,
}

impl MatchEvent {
    pub fn status_class(&self) -> StatusClass {
        classify_status(&self.status, &self.status_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchDetail {
    pub event: MatchEvent,
    pub venue: Option<String>,
    pub referee: Option<String>,
    pub attendance: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Home,
    Away,
    Tie,
    Unknown,
}

impl Comparison {
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(1) => Self::Home,
            Some(2) => Self::Away,
            Some(3) => Self::Tie,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> Option<i32> {
        match self {
            Self::Home => Some(1),
            Self::Away => Some(2),
            Self::Tie => Some(3),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatisticItem {
    pub period: String,
    pub group: String,
    pub name: String,
    pub home_raw: String,
    pub away_raw: String,
    pub home_value: Option<f64>,
    pub away_value: Option<f64>,
    pub compare: Comparison,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentRecord {
    pub incident_type: String,
    pub incident_class: Option<String>,
    pub minute: i32,
    pub added_time: Option<i32>,
    pub is_home: Option<bool>,
    pub player: Option<String>,
    pub assist: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandingRow {
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
    pub promotion: Option<String>,
}

/// Everything enrichment needs for one fixture, fetched in a single session
/// operation. `statistics` is `None` when the source has not published them.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchBundle {
    pub detail: MatchDetail,
    pub statistics: Option<Vec<StatisticItem>>,
    pub incidents: Vec<IncidentRecord>,
}

/// First numeric token of a statistic value: "55%" → 55, "5/10 (50%)" → 5,
/// "0.87" → 0.87.
pub fn parse_stat_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let start = trimmed.find(|c: char| c.is_ascii_digit() || c == '-')?;
    let tail = &trimmed[start..];
    let end = tail
        .char_indices()
        .skip(1)
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(tail.len());
    tail[..end].parse().ok()
}

fn team_name(team: Option<&WireTeam>) -> String {
    team.and_then(|t| t.name.as_deref())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(UNKNOWN_TEAM)
        .to_string()
}

fn score(score: Option<&WireScore>) -> i32 {
    score
        .and_then(|s| s.current.or(s.display))
        .unwrap_or(0)
}

fn name_of(named: Option<&WireNamed>) -> Option<String> {
    named
        .and_then(|n| n.name.as_deref())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// `None` for an event without an id; nothing downstream can key it.
pub(crate) fn event_from_wire(ev: &WireEvent) -> Option<MatchEvent> {
    let id = ev.id?;
    let status = ev.status.as_ref();
    let tournament = ev.tournament.as_ref();

    Some(MatchEvent {
        id,
        tournament_id: tournament
            .and_then(|t| t.unique_tournament.as_ref())
            .and_then(|u| u.id),
        tournament_name: tournament
            .and_then(|t| t.name.clone())
            .unwrap_or_default(),
        season_id: ev.season.as_ref().and_then(|s| s.id),
        round: ev.round_info.as_ref().and_then(|r| r.round),
        home_team: team_name(ev.home_team.as_ref()),
        away_team: team_name(ev.away_team.as_ref()),
        home_score: score(ev.home_score.as_ref()),
        away_score: score(ev.away_score.as_ref()),
        status: status
            .and_then(|s| s.description.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        status_type: status.and_then(|s| s.kind.clone()).unwrap_or_default(),
        start_timestamp: ev.start_timestamp.unwrap_or(0),
    })
}

pub(crate) fn events_from_payload(payload: EventsPayload) -> Vec<MatchEvent> {
    payload
        .events
        .unwrap_or_default()
        .iter()
        .filter_map(event_from_wire)
        .collect()
}

pub(crate) fn detail_from_wire(ev: &WireEvent) -> Option<MatchDetail> {
    let event = event_from_wire(ev)?;
    let venue = ev.venue.as_ref().and_then(|v| {
        name_of(v.stadium.as_ref()).or_else(|| v.name.clone().filter(|n| !n.trim().is_empty()))
    });

    Some(MatchDetail {
        event,
        venue,
        referee: name_of(ev.referee.as_ref()),
        attendance: ev.attendance,
    })
}

pub(crate) fn statistics_from_payload(payload: StatisticsPayload) -> Vec<StatisticItem> {
    let mut items = Vec::new();
    for period in payload.statistics.unwrap_or_default() {
        let period_name = period.period.unwrap_or_else(|| "ALL".to_string());
        for group in period.groups.unwrap_or_default() {
            let group_name = group.group_name.unwrap_or_default();
            for item in group.statistics_items.unwrap_or_default() {
                let home_raw = item.home.unwrap_or_default();
                let away_raw = item.away.unwrap_or_default();
                items.push(StatisticItem {
                    period: period_name.clone(),
                    group: group_name.clone(),
                    name: item.name.unwrap_or_default(),
                    home_value: parse_stat_value(&home_raw),
                    away_value: parse_stat_value(&away_raw),
                    home_raw,
                    away_raw,
                    compare: Comparison::from_code(item.compare_code),
                });
            }
        }
    }
    items
}

/// Incidents in match order: minute, then added time.
pub(crate) fn incidents_from_payload(payload: IncidentsPayload) -> Vec<IncidentRecord> {
    let mut incidents: Vec<IncidentRecord> = payload
        .incidents
        .unwrap_or_default()
        .into_iter()
        .map(|i| IncidentRecord {
            incident_type: i.incident_type.unwrap_or_else(|| "unknown".to_string()),
            incident_class: i.incident_class,
            minute: i.time.unwrap_or(0),
            added_time: i.added_time,
            is_home: i.is_home,
            player: name_of(i.player.as_ref()),
            assist: name_of(i.assist1.as_ref()),
        })
        .collect();

    incidents.sort_by_key(|i| (i.minute, i.added_time.unwrap_or(0)));
    incidents
}

/// Only the `total` table is authoritative; home/away splits are ignored.
pub(crate) fn standings_from_payload(payload: StandingsPayload) -> Vec<StandingRow> {
    let Some(total) = payload
        .standings
        .unwrap_or_default()
        .into_iter()
        .find(|t| t.kind.as_deref() == Some("total"))
    else {
        return Vec::new();
    };

    let mut rows: Vec<StandingRow> = total
        .rows
        .unwrap_or_default()
        .into_iter()
        .filter_map(|r| {
            let team_id = r.team.as_ref().and_then(|t| t.id)?;
            Some((team_id, r))
        })
        .map(|(team_id, r)| StandingRow {
            team_id,
            team_name: team_name(r.team.as_ref()),
            position: r.position.unwrap_or(0),
            matches: r.matches.unwrap_or(0),
            wins: r.wins.unwrap_or(0),
            draws: r.draws.unwrap_or(0),
            losses: r.losses.unwrap_or(0),
            scores_for: r.scores_for.unwrap_or(0),
            scores_against: r.scores_against.unwrap_or(0),
            points: r.points.unwrap_or(0),
            promotion: r.promotion.and_then(|p| p.text).filter(|t| !t.trim().is_empty()),
        })
        .collect();

    rows.sort_by_key(|r| r.position);
    rows
}
