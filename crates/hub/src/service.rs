//! Control service: the one place where registers, controller, actuators and
//! the sample log meet. HTTP handlers are thin wrappers around these methods.

use std::sync::Arc;
use std::time::Instant;

use time::Duration;
use tracing::{debug, info, warn};

use crate::api::{
    clock_time, flag, EspRequest, EspResponse, FanResponse, HumidityEntry, MoistureEntry,
    PumpResponse, SetPointResponse, TemperatureEntry,
};
use crate::chart::thin;
use crate::config::PumpSettings;
use crate::db::{now_ms, Db};
use crate::duration::parse_duration;
use crate::error::ApiError;
use crate::pid::{Gains, IntegralTerm, PidController};
use crate::state::{gains_from, Actuator, ActuatorState, ProcessState, ProcessVar, StatusResponse};

pub type SharedService = Arc<ControlService>;

pub struct ControlService {
    process: ProcessState,
    actuators: Arc<ActuatorState>,
    pid: PidController,
    db: Db,
    pump: PumpSettings,
    started_at: Instant,
}

impl ControlService {
    pub fn new(db: Db, pump: PumpSettings, integral_term: IntegralTerm) -> Self {
        Self {
            process: ProcessState::new(),
            actuators: Arc::new(ActuatorState::new()),
            pid: PidController::new(integral_term),
            db,
            pump,
            started_at: Instant::now(),
        }
    }

    // ----------------------------
    // Ingestion
    // ----------------------------

    /// One sample tick from the enclosure: run the controller, publish the
    /// readings, append them to the log, and answer with the current
    /// set-point, gains and actuator flags.
    pub async fn ingest(&self, req: EspRequest) -> Result<EspResponse, ApiError> {
        for (name, value) in [
            ("temp_pv", req.temp_pv),
            ("moist_pv", req.moist_pv),
            ("humidity_pv", req.humidity_pv),
        ] {
            if !value.is_finite() {
                return Err(ApiError::invalid(format!("{name} must be a finite number")));
            }
        }
        if req.temp_sp.is_some() || req.temp_co.is_some() {
            debug!(
                reported_sp = ?req.temp_sp,
                reported_co = ?req.temp_co,
                "ignoring device-reported set-point/output"
            );
        }

        let tuning = self.process.tuning.get_all().await;
        let gains = gains_from(&tuning);
        let set_point = self.process.process.get(ProcessVar::TemperatureSp).await;

        // Readings and output are published while the controller is still
        // locked, so the register never lags behind the error history.
        let (temp_pv, moist_pv, humidity_pv) = (req.temp_pv, req.moist_pv, req.humidity_pv);
        let process = &self.process.process;
        let output = self
            .pid
            .update_and(set_point, temp_pv, gains, |output| async move {
                process
                    .set_many([
                        (ProcessVar::TemperaturePv, temp_pv),
                        (ProcessVar::TemperatureCo, output),
                        (ProcessVar::MoisturePv, moist_pv),
                        (ProcessVar::HumidityPv, humidity_pv),
                    ])
                    .await;
            })
            .await;

        let ts = now_ms();
        self.db
            .insert_temperature(ts, req.temp_pv, output, set_point)
            .await?;
        self.db.insert_humidity(ts, req.humidity_pv).await?;
        self.db.insert_moisture(ts, req.moist_pv).await?;

        let actuators = self.actuators.get_all().await;
        let resp = EspResponse {
            temp_sp: set_point,
            temp_co: output,
            temp_kp: gains.kp,
            temp_ki: gains.ki,
            temp_kd: gains.kd,
            fan_control: flag(actuators.get(Actuator::Fan)),
            water_pump_control: flag(actuators.get(Actuator::WaterPump)),
        };

        debug!(
            temp_pv = req.temp_pv,
            temp_sp = set_point,
            temp_co = output,
            "sample ingested"
        );
        Ok(resp)
    }

    // ----------------------------
    // Actuators
    // ----------------------------

    pub async fn set_fan(&self, on: bool) -> FanResponse {
        self.actuators.switch(Actuator::Fan, on).await;
        FanResponse {
            fan_control: flag(on),
        }
    }

    /// Switch the pump on for `requested` (a duration string) or, if that is
    /// missing or unusable, for the configured default.
    pub async fn activate_pump(&self, requested: Option<&str>) -> Result<PumpResponse, ApiError> {
        let duration = self.pump_duration(requested);
        self.actuators
            .activate_for(Actuator::WaterPump, duration)
            .await
            .map_err(|e| ApiError::invalid(e.to_string()))?;

        Ok(PumpResponse {
            water_pump_control: 1,
            duration_ms: duration.as_millis() as u64,
        })
    }

    fn pump_duration(&self, requested: Option<&str>) -> std::time::Duration {
        let Some(raw) = requested else {
            return self.pump.default_on;
        };

        let parsed = parse_duration(raw)
            .map_err(|e| e.to_string())
            .and_then(|d| std::time::Duration::try_from(d).map_err(|_| "negative".to_string()));

        match parsed {
            Ok(d) if !d.is_zero() && d <= self.pump.max_on => d,
            Ok(d) => {
                warn!(
                    requested = raw,
                    requested_ms = d.as_millis() as u64,
                    max_ms = self.pump.max_on.as_millis() as u64,
                    "pump duration out of range, using default"
                );
                self.pump.default_on
            }
            Err(e) => {
                warn!(requested = raw, error = %e, "unusable pump duration, using default");
                self.pump.default_on
            }
        }
    }

    // ----------------------------
    // Set-point and tuning
    // ----------------------------

    pub async fn set_set_point(&self, value: f64) -> Result<SetPointResponse, ApiError> {
        if !value.is_finite() {
            return Err(ApiError::invalid("sp_value must be a finite number"));
        }
        self.process
            .process
            .set(ProcessVar::TemperatureSp, value)
            .await;
        info!(temp_sp = value, "temperature set-point updated");
        Ok(SetPointResponse { temp_sp: value })
    }

    pub async fn set_point(&self) -> SetPointResponse {
        SetPointResponse {
            temp_sp: self.process.process.get(ProcessVar::TemperatureSp).await,
        }
    }

    pub async fn gains(&self) -> Gains {
        self.process.gains().await
    }

    /// Replace the tuning profile, then append it to the log.
    pub async fn set_gains(&self, gains: Gains) -> Result<Gains, ApiError> {
        if ![gains.kp, gains.ki, gains.kd].iter().all(|g| g.is_finite()) {
            return Err(ApiError::invalid("gains must be finite numbers"));
        }
        self.process.set_gains(gains).await;
        info!(kp = gains.kp, ki = gains.ki, kd = gains.kd, "tuning profile updated");

        self.db.insert_tune_profile(now_ms(), &gains).await?;
        Ok(gains)
    }

    // ----------------------------
    // Charts
    // ----------------------------

    pub async fn temperature_chart(
        &self,
        interval: Duration,
        sampling: Duration,
    ) -> Result<Vec<TemperatureEntry>, ApiError> {
        let since = window_start(interval, sampling)?;
        let rows = thin(self.db.temperature_since(since).await?, interval, sampling)?;
        Ok(rows
            .into_iter()
            .map(|r| TemperatureEntry {
                temp_pv: r.present_value,
                temp_co: r.controller_output,
                temp_sp: r.set_point,
                time: clock_time(r.created_at),
                ts: r.created_at,
            })
            .collect())
    }

    pub async fn humidity_chart(
        &self,
        interval: Duration,
        sampling: Duration,
    ) -> Result<Vec<HumidityEntry>, ApiError> {
        let since = window_start(interval, sampling)?;
        let rows = thin(self.db.humidity_since(since).await?, interval, sampling)?;
        Ok(rows
            .into_iter()
            .map(|r| HumidityEntry {
                humidity: r.present_value,
                time: clock_time(r.created_at),
                ts: r.created_at,
            })
            .collect())
    }

    pub async fn moisture_chart(
        &self,
        interval: Duration,
        sampling: Duration,
    ) -> Result<Vec<MoistureEntry>, ApiError> {
        let since = window_start(interval, sampling)?;
        let rows = thin(self.db.moisture_since(since).await?, interval, sampling)?;
        Ok(rows
            .into_iter()
            .map(|r| MoistureEntry {
                moisture: r.present_value,
                time: clock_time(r.created_at),
                ts: r.created_at,
            })
            .collect())
    }

    // ----------------------------
    // Status + shutdown
    // ----------------------------

    pub async fn status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            process: self.process.process.get_all().await.filled(),
            tuning: self.process.tuning.get_all().await.filled(),
            actuators: self.actuators.get_all().await.filled(),
            pump_timer_pending: self.actuators.has_pending(Actuator::WaterPump).await,
        }
    }

    /// Every actuator off, every pending timer cancelled.
    pub async fn shutdown(&self) {
        self.actuators.all_off().await;
    }
}

/// Epoch-ms start of the trailing window. Both parameters are checked before
/// the log is touched.
fn window_start(interval: Duration, sampling: Duration) -> Result<i64, ApiError> {
    if interval <= Duration::ZERO {
        return Err(ApiError::invalid(format!("interval must be positive, got {interval}")));
    }
    if sampling <= Duration::ZERO {
        return Err(ApiError::invalid(format!("sampling must be positive, got {sampling}")));
    }
    let span = i64::try_from(interval.whole_milliseconds()).unwrap_or(i64::MAX);
    Ok(now_ms().saturating_sub(span))
}

// ===========================================================================
// Tests
// ===========================================================================
