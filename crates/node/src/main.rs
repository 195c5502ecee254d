mod sim;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sim::{Actuation, EnclosureSim, Readings, Scenario};

/// Body of `POST /api/esp`.
#[derive(Debug, Serialize)]
struct EspRequest {
    temp_pv: f64,
    moist_pv: f64,
    humidity_pv: f64,
}

impl From<Readings> for EspRequest {
    fn from(r: Readings) -> Self {
        Self {
            temp_pv: r.temp_pv,
            moist_pv: r.moist_pv,
            humidity_pv: r.humidity_pv,
        }
    }
}

/// Hub answer. Gains and set-point are only logged; the device acts on the
/// controller output and the two actuator flags.
#[derive(Debug, Deserialize)]
struct EspResponse {
    temp_sp: f64,
    #[serde(default)]
    temp_co: f64,
    temp_kp: f64,
    temp_ki: f64,
    temp_kd: f64,
    fan_control: u8,
    water_pump_control: u8,
}

impl EspResponse {
    fn actuation(&self) -> Actuation {
        Actuation {
            temp_co: self.temp_co,
            fan: self.fan_control != 0,
            pump: self.water_pump_control != 0,
        }
    }
}

async fn exchange(client: &reqwest::Client, url: &str, readings: Readings) -> Result<EspResponse> {
    client
        .post(url)
        .json(&EspRequest::from(readings))
        .send()
        .await
        .context("request failed")?
        .error_for_status()
        .context("hub rejected sample")?
        .json::<EspResponse>()
        .await
        .context("invalid hub response")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let hub_url = env::var("HUB_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    let sample_every_ms: u64 = env::var("SAMPLE_EVERY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(2_000);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());

    let url = format!("{}/api/esp", hub_url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("failed to build http client")?;

    // One simulated day every ~10 minutes of wall time.
    let ticks_per_day = (600_000 / sample_every_ms.max(1)).max(10) as f64;
    let mut sim = EnclosureSim::new(scenario, ticks_per_day);

    info!(%url, %scenario, sample_every_ms, "node started");

    loop {
        let readings = sim.step();

        match exchange(&client, &url, readings).await {
            Ok(resp) => {
                debug!(
                    temp_sp = resp.temp_sp,
                    kp = resp.temp_kp,
                    ki = resp.temp_ki,
                    kd = resp.temp_kd,
                    "hub replied"
                );
                sim.apply(resp.actuation());
                info!(
                    temp = readings.temp_pv,
                    humidity = readings.humidity_pv,
                    moisture = readings.moist_pv,
                    temp_co = resp.temp_co,
                    fan = resp.fan_control,
                    pump = resp.water_pump_control,
                    "sample exchanged"
                );
            }
            // Keep the last actuation and try again next tick.
            Err(e) => warn!(error = %format!("{e:#}"), "exchange failed"),
        }

        tokio::select! {
            _ = sleep(Duration::from_millis(sample_every_ms)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("node stopping");
                return Ok(());
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
