use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;

// ---------------------------------------------------------------------------
// Ingestion (enclosure device <-> hub)
// ---------------------------------------------------------------------------

/// Readings posted by the enclosure device on every sample tick.
#[derive(Debug, Clone, Deserialize)]
pub struct EspRequest {
    pub temp_pv: f64,
    pub moist_pv: f64,
    pub humidity_pv: f64,
    /// Older firmware echoes back the set-point and output it last received.
    #[serde(default)]
    pub temp_sp: Option<f64>,
    #[serde(default)]
    pub temp_co: Option<f64>,
}

/// Actuation and tuning sent back to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EspResponse {
    pub temp_sp: f64,
    pub temp_co: f64,
    pub temp_kp: f64,
    pub temp_ki: f64,
    pub temp_kd: f64,
    pub fan_control: u8,
    pub water_pump_control: u8,
}

// ---------------------------------------------------------------------------
// Control endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPointResponse {
    pub temp_sp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanResponse {
    pub fan_control: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpResponse {
    pub water_pump_control: u8,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Chart entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureEntry {
    pub temp_pv: f64,
    pub temp_co: f64,
    pub temp_sp: f64,
    pub time: String,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumidityEntry {
    pub humidity: f64,
    pub time: String,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoistureEntry {
    pub moisture: f64,
    pub time: String,
    pub ts: i64,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn flag(on: bool) -> u8 {
    u8::from(on)
}

/// UTC wall-clock "HH:MM:SS" for an epoch-millisecond timestamp. Out of range
/// timestamps render as "--:--:--".
pub fn clock_time(ts_ms: i64) -> String {
    let format = format_description!("[hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp_nanos(ts_ms as i128 * 1_000_000)
        .ok()
        .and_then(|t| t.format(format).ok())
        .unwrap_or_else(|| "--:--:--".to_string())
}

/// Parse an "on"/"off" switch value (case-insensitive, trims whitespace).
pub fn parse_switch_state(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("unknown switch state '{other}', expected on or off")),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
