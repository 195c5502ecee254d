//! TOML config file loading, environment overrides, and validation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use crate::duration::parse_duration;
use crate::pid::IntegralTerm;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pump: PumpConfig,
    pub pid: PidConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:greenhouse.db?mode=rwc".to_string(),
        }
    }
}

/// Durations are kept as written (`"4s"`, `"10m"`) and parsed in
/// [`Config::pump_settings`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    pub default_on_duration: String,
    pub max_on_duration: String,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            default_on_duration: "4s".to_string(),
            max_on_duration: "10m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    pub integral_term: IntegralTerm,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Parsed pump limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpSettings {
    pub default_on: std::time::Duration,
    pub max_on: std::time::Duration,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }

        if self.database.url.trim().is_empty() {
            errors.push("database.url is empty".to_string());
        }

        let default_on = check_positive("pump.default_on_duration", &self.pump.default_on_duration, &mut errors);
        let max_on = check_positive("pump.max_on_duration", &self.pump.max_on_duration, &mut errors);
        if let (Some(default_on), Some(max_on)) = (default_on, max_on) {
            if default_on > max_on {
                errors.push(format!(
                    "pump.default_on_duration ({}) exceeds pump.max_on_duration ({})",
                    self.pump.default_on_duration, self.pump.max_on_duration
                ));
            }
        }

        if let Err(e) = EnvFilter::try_new(&self.log.level) {
            errors.push(format!("log.level '{}' is not a valid filter: {e}", self.log.level));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    /// Pump limits as std durations. Only meaningful on a validated config.
    pub fn pump_settings(&self) -> Result<PumpSettings> {
        Ok(PumpSettings {
            default_on: to_std("pump.default_on_duration", &self.pump.default_on_duration)?,
            max_on: to_std("pump.max_on_duration", &self.pump.max_on_duration)?,
        })
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup("WEB_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("WEB_PORT '{port}' is not a valid port"))?;
        }
        if let Some(url) = lookup("DB_URL") {
            self.database.url = url;
        }
        if let Some(duration) = lookup("WATER_PUMP_ON_STATE_DURATION") {
            self.pump.default_on_duration = duration;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log.level = level;
        }
        Ok(())
    }
}

fn check_positive(field: &str, raw: &str, errors: &mut Vec<String>) -> Option<time::Duration> {
    match parse_duration(raw) {
        Ok(d) if d > time::Duration::ZERO => Some(d),
        Ok(_) => {
            errors.push(format!("{field} must be positive, got '{raw}'"));
            None
        }
        Err(e) => {
            errors.push(format!("{field}: {e}"));
            None
        }
    }
}

fn to_std(field: &str, raw: &str) -> Result<std::time::Duration> {
    let d = parse_duration(raw).with_context(|| format!("invalid {field}"))?;
    std::time::Duration::try_from(d).with_context(|| format!("{field} must be positive"))
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file, apply environment overrides, then
/// validate. A missing file means all defaults.
pub fn load(path: &str) -> Result<Config> {
    load_with(path, |key| std::env::var(key).ok())
}

fn load_with(path: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str::<Config>(&contents)
            .with_context(|| format!("failed to parse config: {path}"))?
    } else {
        Config::default()
    };

    config.apply_env(lookup)?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
