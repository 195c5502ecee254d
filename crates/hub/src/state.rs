use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::pid::Gains;
use crate::register::{KeyedRegister, RegisterKey, Snapshot};

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessVar {
    #[serde(rename = "temp_pv")]
    TemperaturePv,
    #[serde(rename = "temp_co")]
    TemperatureCo,
    #[serde(rename = "temp_sp")]
    TemperatureSp,
    #[serde(rename = "moist_pv")]
    MoisturePv,
    #[serde(rename = "humidity_pv")]
    HumidityPv,
}

impl RegisterKey for ProcessVar {
    const ALL: &'static [Self] = &[
        ProcessVar::TemperaturePv,
        ProcessVar::TemperatureCo,
        ProcessVar::TemperatureSp,
        ProcessVar::MoisturePv,
        ProcessVar::HumidityPv,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TuneVar {
    #[serde(rename = "temp_kp")]
    Kp,
    #[serde(rename = "temp_ki")]
    Ki,
    #[serde(rename = "temp_kd")]
    Kd,
}

impl RegisterKey for TuneVar {
    const ALL: &'static [Self] = &[TuneVar::Kp, TuneVar::Ki, TuneVar::Kd];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actuator {
    #[serde(rename = "fan_control")]
    Fan,
    #[serde(rename = "pump_water")]
    WaterPump,
}

impl Actuator {
    /// Whether the actuator can be switched on for a bounded duration.
    pub fn supports_timed(self) -> bool {
        matches!(self, Actuator::WaterPump)
    }
}

impl RegisterKey for Actuator {
    const ALL: &'static [Self] = &[Actuator::Fan, Actuator::WaterPump];
}

// ---------------------------------------------------------------------------
// Process + tuning state
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ProcessState {
    pub process: KeyedRegister<ProcessVar, f64>,
    pub tuning: KeyedRegister<TuneVar, f64>,
}

impl ProcessState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn gains(&self) -> Gains {
        gains_from(&self.tuning.get_all().await)
    }

    /// Replace the whole tuning profile in one write.
    pub async fn set_gains(&self, gains: Gains) {
        self.tuning
            .set_many([
                (TuneVar::Kp, gains.kp),
                (TuneVar::Ki, gains.ki),
                (TuneVar::Kd, gains.kd),
            ])
            .await;
    }
}

pub fn gains_from(tuning: &Snapshot<TuneVar, f64>) -> Gains {
    Gains {
        kp: tuning.get(TuneVar::Kp),
        ki: tuning.get(TuneVar::Ki),
        kd: tuning.get(TuneVar::Kd),
    }
}

// ---------------------------------------------------------------------------
// Actuator state
// ---------------------------------------------------------------------------

/// On/off flags for every actuator, plus the cancellation token of each
/// pending timed deactivation. Both live behind one lock: an actuator with a
/// token in `attached` is always on, and a timed actuator that is on always
/// has exactly one live token.
#[derive(Default)]
pub struct ActuatorState {
    pub(crate) register: KeyedRegister<Actuator, bool, HashMap<Actuator, CancellationToken>>,
}

impl ActuatorState {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn get(&self, actuator: Actuator) -> bool {
        self.register.get(actuator).await
    }

    pub async fn get_all(&self) -> Snapshot<Actuator, bool> {
        self.register.get_all().await
    }

    pub async fn has_pending(&self, actuator: Actuator) -> bool {
        self.register
            .with_shared(|slots| slots.attached.contains_key(&actuator))
            .await
    }
}

// ---------------------------------------------------------------------------
// JSON response (what /api/status returns)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub process: Snapshot<ProcessVar, f64>,
    pub tuning: Snapshot<TuneVar, f64>,
    pub actuators: Snapshot<Actuator, bool>,
    pub pump_timer_pending: bool,
}

// ===========================================================================
// Tests
// ===========================================================================
