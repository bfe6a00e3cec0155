use anyhow::{anyhow, bail, Context, Result};
use seeplace::{AppConfig, PlacesApp, Selection};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let query = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let query = if query.trim().is_empty() {
        "Petronas Twin Towers".to_string()
    } else {
        query
    };

    let app = PlacesApp::new(AppConfig::from_env()).context("failed to build places app")?;
    app.start()
        .await
        .map_err(|err| anyhow!("map failed to start: {}", err.user_message()))?;

    let predictions = app.search_now(&query).await;
    let Some(first) = predictions.into_iter().next() else {
        bail!("no places found for {query:?}");
    };
    info!(place_id = %first.id, "resolving first suggestion");

    let Some(place) = app.select_now(Selection::Prediction(first), &query).await else {
        let reason = app
            .store()
            .error(seeplace::ErrorDomain::Map)
            .map(|banner| banner.message)
            .unwrap_or_else(|| "unknown error".into());
        bail!("selection failed: {reason}");
    };
    tokio::task::yield_now().await;

    println!("{}", serde_json::to_string_pretty(&place)?);
    info!(health = %app.health().summary(), "done");
    app.shutdown();
    Ok(())
}
