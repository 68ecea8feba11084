//! Source records → store rows, and the enrichment decision table.

use fixture_scraper::{
    IncidentRecord, MatchBundle, MatchEvent, StandingRow, StatisticItem, StatusClass,
    TournamentConfig,
};
use match_store::status::{is_finished_status, is_live_status, CANCELLED, ENDED, NOT_STARTED, POSTPONED};
use match_store::{
    EnrichmentOutcome, EnrichmentWrite, FixtureSnapshot, IncidentRow, LiveUpdate, NewFixture,
    ProcessingStatus, StandingEntry, StatisticRow,
};

/// Status string as stored: the source's own word when it is in our
/// vocabulary, otherwise the canonical one for its class.
pub fn local_status(event: &MatchEvent) -> String {
    match event.status_class() {
        StatusClass::Finished if is_finished_status(&event.status) => event.status.clone(),
        StatusClass::Finished => ENDED.to_string(),
        StatusClass::Live if is_live_status(&event.status) => event.status.clone(),
        StatusClass::Live => "Live".to_string(),
        StatusClass::NotStarted => NOT_STARTED.to_string(),
        StatusClass::Postponed => POSTPONED.to_string(),
        StatusClass::Cancelled => CANCELLED.to_string(),
        StatusClass::Unknown => event.status.clone(),
    }
}

/// Processing status for a fixture seen for the first time.
pub fn initial_processing(event: &MatchEvent) -> ProcessingStatus {
    match event.status_class() {
        StatusClass::Live => ProcessingStatus::InProgress,
        StatusClass::Cancelled => ProcessingStatus::Cancelled,
        _ => ProcessingStatus::Pending,
    }
}

pub fn new_fixture(event: &MatchEvent, tournament: &TournamentConfig, round: u32) -> NewFixture {
    NewFixture {
        id: event.id,
        tournament_id: event.tournament_id.unwrap_or(tournament.tournament_id),
        season_id: event.season_id.unwrap_or(tournament.season_id),
        round: Some(event.round.unwrap_or(round)),
        home_team: event.home_team.clone(),
        away_team: event.away_team.clone(),
        home_score: event.home_score,
        away_score: event.away_score,
        status: local_status(event),
        start_timestamp: event.start_timestamp,
        processing_status: initial_processing(event),
    }
}

/// Live-feed observation: finished → Pending (queued for enrichment),
/// anything else → InProgress.
pub fn live_update(event: &MatchEvent) -> LiveUpdate {
    let processing_status = match event.status_class() {
        StatusClass::Finished => ProcessingStatus::Pending,
        _ => ProcessingStatus::InProgress,
    };
    LiveUpdate {
        id: event.id,
        home_score: event.home_score,
        away_score: event.away_score,
        status: local_status(event),
        processing_status,
    }
}

pub fn statistic_row(item: &StatisticItem) -> StatisticRow {
    StatisticRow {
        period: item.period.clone(),
        group: item.group.clone(),
        name: item.name.clone(),
        home_raw: item.home_raw.clone(),
        away_raw: item.away_raw.clone(),
        home_value: item.home_value,
        away_value: item.away_value,
        compare_code: item.compare.code(),
    }
}

pub fn incident_row(incident: &IncidentRecord) -> IncidentRow {
    IncidentRow {
        incident_type: incident.incident_type.clone(),
        incident_class: incident.incident_class.clone(),
        minute: incident.minute,
        added_time: incident.added_time,
        is_home: incident.is_home,
        player: incident.player.clone(),
        assist: incident.assist.clone(),
    }
}

pub fn standing_entry(row: &StandingRow) -> StandingEntry {
    StandingEntry {
        team_id: row.team_id,
        team_name: row.team_name.clone(),
        position: row.position,
        matches: row.matches,
        wins: row.wins,
        draws: row.draws,
        losses: row.losses,
        scores_for: row.scores_for,
        scores_against: row.scores_against,
        points: row.points,
        promotions: row.promotion.iter().cloned().collect(),
    }
}

/// Decides what one fetched bundle means for the fixture.
pub fn enrichment_write(bundle: &MatchBundle) -> EnrichmentWrite {
    let event = &bundle.detail.event;

    let outcome = match (event.status_class(), &bundle.statistics) {
        (StatusClass::Finished, Some(_)) => EnrichmentOutcome::Terminal(ProcessingStatus::Enriched),
        (StatusClass::Finished, None) => EnrichmentOutcome::Retry {
            exhausted: ProcessingStatus::PartialData,
            note: "finished but statistics not published".to_string(),
        },
        (StatusClass::Postponed, _) => EnrichmentOutcome::Terminal(ProcessingStatus::Postponed),
        (StatusClass::Cancelled, _) => EnrichmentOutcome::Terminal(ProcessingStatus::Cancelled),
        (StatusClass::Live, _) => EnrichmentOutcome::InProgress,
        (StatusClass::NotStarted, _) => EnrichmentOutcome::Retry {
            exhausted: ProcessingStatus::Error,
            note: "still not started".to_string(),
        },
        (StatusClass::Unknown, _) => EnrichmentOutcome::Retry {
            exhausted: ProcessingStatus::Error,
            note: format!("unrecognised status {:?}", event.status),
        },
    };

    EnrichmentWrite {
        snapshot: FixtureSnapshot {
            home_score: event.home_score,
            away_score: event.away_score,
            status: local_status(event),
            start_timestamp: (event.start_timestamp > 0).then_some(event.start_timestamp),
            venue: bundle.detail.venue.clone(),
            referee: bundle.detail.referee.clone(),
            attendance: bundle.detail.attendance,
        },
        statistics: bundle
            .statistics
            .as_ref()
            .map(|items| items.iter().map(statistic_row).collect()),
        incidents: bundle.incidents.iter().map(incident_row).collect(),
        outcome,
    }
}
