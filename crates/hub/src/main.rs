mod clock;
mod config;
mod daily_log;
mod db;
mod ephem;
mod graph;
mod hardware;
mod moon;
mod report;
mod settings;
mod state;
mod summary;
mod web;

use anyhow::Result;
use std::{env, sync::Arc};
use tracing_subscriber::EnvFilter;

use daily_log::DailyLog;
use db::Db;
use hardware::Hardware;
use state::{SensingSession, SystemState};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    let today = clock::local_now().date();

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&cfg.server.database_url).await?;
    db.migrate().await?;
    config::apply(&cfg, &db, today).await?;

    // The settings table is the source of truth from here on.
    let settings = db.load_settings().await?;
    for problem in settings.validate() {
        tracing::warn!(%problem, "stored setting is unusable");
    }
    let session = SensingSession::new(
        settings.sensing_count().unwrap_or(1),
        settings.relays().unwrap_or([true; 4]),
    );
    tracing::info!(
        keys = settings.len(),
        sensing_count = session.sensing_count,
        "db ready"
    );

    // ── Hardware ────────────────────────────────────────────────────
    let hardware = Hardware::from_config(&cfg.hardware)?;
    if let Err(e) = hardware.write_outputs(0).await {
        tracing::warn!(error = %e, "could not switch relays off at startup");
    }

    // ── Shared state (ephemeral, for the web UI) ────────────────────
    let shared = SystemState::new(hardware.mode(), session).shared();
    shared.write().await.record_system("hub started".to_string());

    let daily_log = Arc::new(DailyLog::new(&cfg.system.daily_log_path));
    tracing::info!(path = %daily_log.path().display(), "daily log");

    let state = web::AppState {
        db,
        shared,
        hardware,
        daily_log,
        system: Arc::new(cfg.system),
    };

    web::serve(state, cfg.server.port).await
}
