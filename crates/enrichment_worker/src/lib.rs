//! Enrichment worker
//!
//! Keeps the match store in step with the source: discovers rounds, follows
//! live fixtures, enriches finished ones with statistics and incidents,
//! recovers fixtures stuck in live or limbo and cleans up zombie rows.

pub mod config;
pub mod convert;
pub mod reconcile;
pub mod scheduler;
pub mod worker;

pub use config::WorkerConfig;
pub use reconcile::Reconciler;
pub use scheduler::{RoundOutcome, RoundScheduler, TournamentOutcome};
pub use worker::{CycleReport, EnrichmentWorker};
