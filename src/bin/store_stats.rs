use anyhow::{Context, Result};
use match_store::MatchStateStore;

#[tokio::main]
async fn main() -> Result<()> {
    let db_path = std::env::var("FIXTURE_DB_PATH").unwrap_or_else(|_| "data/fixtures.db".to_string());
    let store = MatchStateStore::open(&db_path).with_context(|| format!("open db at {db_path}"))?;
    let summary = store.summary().await.context("summarise store")?;

    println!("db_path={db_path}");
    println!("fixtures: {}", summary.fixtures);
    println!("statistics: {}", summary.statistics);
    println!("incidents: {}", summary.incidents);
    println!("standings: {}", summary.standings);
    for (status, count) in &summary.by_status {
        println!("  {status}: {count}");
    }
    println!(
        "rounds: total={} complete={} locked={}",
        summary.rounds_total, summary.rounds_complete, summary.rounds_locked
    );

    match store.recently_updated(1).await.context("read last update")?.first() {
        Some(f) => println!(
            "last_update: id={} {} vs {} status={} processing={} updated_at={}",
            f.id,
            f.home_team,
            f.away_team,
            f.status,
            f.processing_status,
            f.updated_at.map_or_else(|| "?".to_string(), |t| t.to_rfc3339())
        ),
        None => println!("last_update: <none>"),
    }

    Ok(())
}
