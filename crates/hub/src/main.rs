mod api;
mod chart;
mod config;
mod db;
mod duration;
mod error;
mod pid;
mod register;
mod service;
mod state;
mod timer;
mod web;

use anyhow::{Context, Result};
use std::{env, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use db::Db;
use service::ControlService;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Config file + env overrides ─────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "greenhouse.toml".to_string());
    let cfg = config::load(&config_path)?;
    let pump = cfg.pump_settings()?;

    // ── Logging (RUST_LOG wins over the configured level) ───────────
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cfg.log.level)
            .with_context(|| format!("invalid log level '{}'", cfg.log.level))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        config = %config_path,
        port = cfg.server.port,
        pump_default_ms = pump.default_on.as_millis() as u64,
        pump_max_ms = pump.max_on.as_millis() as u64,
        integral_term = ?cfg.pid.integral_term,
        "greenhouse hub starting"
    );

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&cfg.database.url).await?;
    db.migrate().await?;
    info!(url = %cfg.database.url, "sample log ready");

    // ── Control state (registers, controller, actuators) ────────────
    let service = Arc::new(ControlService::new(db, pump, cfg.pid.integral_term));

    // ── Web server (blocks until Ctrl-C) ────────────────────────────
    web::serve(service, cfg.server.port).await
}
