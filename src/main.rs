// Define data modules
mod app;                  // Shared state and router
mod clock;                // Time source (system / test)
mod config;               // config.toml loading
mod jobs;                 // Delivery, overdue and housekeeping sweeps
mod models;               // Data structures (Task, Notification, Db, etc.)
mod planner;              // Builds pending reminders per task
mod recurrence;           // Recurrence rules and next-due-date math
mod routes_notifications; // HTTP handlers for reminder APIs
mod routes_tasks;         // HTTP handlers for task APIs
mod store;                // Persistent storage (db.json)

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::AppState;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::jobs::LogNotifier;
use crate::store::JsonStore;

// RUST_LOG wins over the configured level
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() {
    let config = Config::load().expect("failed to load config");
    init_logging(&config.log_level);

    let store = JsonStore::open(&config.database.path).expect("failed to open database");
    let state = AppState::new(
        Arc::new(store),
        Arc::new(SystemClock),
        config.planning_timeout(),
    );

    let _sweeps = jobs::spawn_sweeps(&state, &config.scheduler, Arc::new(LogNotifier));
    let app = app::router(state);

    let addr = config.bind_addr();
    tracing::info!(%addr, database = %config.database.path, "Server running, API base at /api");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("bind failed");

    axum::serve(listener, app).await.expect("server error");
}
