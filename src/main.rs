//! Comparator Shortlist Service: binary Entrypoint
//! Loads config + decision corpus once, then serves the Axum router.

use comparator_shortlist::api::{self, AppState};
use comparator_shortlist::metrics::Metrics;
use comparator_shortlist::telemetry;
use comparator_shortlist::{EngineConfig, ShortlistEngine};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    // Initialize dev tracing early (no-op in production).
    telemetry::init_dev_tracing();

    let config = EngineConfig::from_env().expect("Failed to load shortlist config");
    let engine = ShortlistEngine::load(config).expect("Failed to load decision corpus");
    let metrics = Metrics::init().expect("prometheus: install recorder");

    let router = api::router(AppState::new(engine)).merge(metrics.router());

    Ok(router.into())
}
