use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

use science_events::config::Config;
use science_events::repository::{EventQuery, EventRepository};
use science_events::{db, AppResult};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("science_events=info")),
        )
        .init();

    if let Err(e) = run().await {
        e.log();
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let config = Config::from_env()?;
    let pool = db::connect(&config).await?;
    let events = EventRepository::new(pool);

    let past = EventQuery::new().past().count(events.pool()).await?;
    let future = EventQuery::new().future().count(events.pool()).await?;
    let latest = events.latest().await?;

    tracing::info!(
        past,
        future,
        latest = ?latest.as_ref().map(|e| e.to_string()),
        "Event store ready"
    );

    Ok(())
}
