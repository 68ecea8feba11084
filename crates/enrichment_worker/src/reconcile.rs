//! Zombie cleanup: postponed/cancelled rows superseded by a rescheduled
//! fixture with a new id.

use anyhow::Result;
use chrono::{DateTime, Utc};
use logger::{now_iso, EventLogger, ZombieRemovedEvent};
use match_store::{Fixture, MatchStateStore, RoundKey};
use std::collections::BTreeSet;
use tracing::info;

pub struct Reconciler {
    store: MatchStateStore,
    events: EventLogger,
}

impl Reconciler {
    pub fn new(store: MatchStateStore, events: EventLogger) -> Self {
        Self { store, events }
    }

    /// Removes zombies and recounts the rounds they belonged to.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<Vec<Fixture>> {
        let removed = self.store.remove_zombie_fixtures().await?;
        let mut rounds = BTreeSet::new();

        for z in &removed {
            info!(
                fixture_id = z.id,
                tournament_id = z.tournament_id,
                round = ?z.round,
                "🧟 Removed zombie fixture {} vs {} ({} / {})",
                z.home_team,
                z.away_team,
                z.status,
                z.processing_status
            );
            self.events.record(&ZombieRemovedEvent {
                ts:                now_iso(),
                event:             "ZOMBIE_REMOVED",
                fixture_id:        z.id,
                tournament_id:     z.tournament_id,
                season_id:         z.season_id,
                round:             z.round,
                home:              z.home_team.clone(),
                away:              z.away_team.clone(),
                status:            z.status.clone(),
                processing_status: z.processing_status.to_string(),
            });
            if let Some(round) = z.round {
                rounds.insert((z.tournament_id, z.season_id, round));
            }
        }

        for (tournament_id, season_id, round) in rounds {
            self.store
                .refresh_round_state(RoundKey::new(tournament_id, season_id, round), now)
                .await?;
        }

        Ok(removed)
    }
}
