//! Discrete-time PID controller for the temperature loop.
//!
//! One call to [`PidController::update`] per ingested sample. The controller
//! owns its error history and updates it under a single lock, so concurrent
//! ingestion requests never interleave their read/modify/write steps.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Tuning gains, read from the tuning register at call time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    #[serde(rename = "temp_kp")]
    pub kp: f64,
    #[serde(rename = "temp_ki")]
    pub ki: f64,
    #[serde(rename = "temp_kd")]
    pub kd: f64,
}

/// Which error history feeds the `ki` term.
///
/// Deployed enclosures were tuned against `PreviousError`: the integral term
/// is `ki * previous_error`, while the running sum is still accumulated but
/// never used for output. That is almost certainly not a textbook integral,
/// but recorded controller outputs depend on it, so it stays the default.
/// Switching to `AccumulatedError` is a product decision, not a bug fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegralTerm {
    #[default]
    PreviousError,
    AccumulatedError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerState {
    pub accumulated_error: f64,
    pub previous_error: f64,
}

pub struct PidController {
    state: Mutex<ControllerState>,
    integral_term: IntegralTerm,
}

impl PidController {
    pub fn new(integral_term: IntegralTerm) -> Self {
        Self::with_state(ControllerState::default(), integral_term)
    }

    pub fn with_state(initial: ControllerState, integral_term: IntegralTerm) -> Self {
        Self {
            state: Mutex::new(initial),
            integral_term,
        }
    }

    /// Compute the next controller output and advance the error history.
    #[cfg(test)]
    pub async fn update(&self, set_point: f64, present_value: f64, gains: Gains) -> f64 {
        let mut st = self.state.lock().await;
        self.step(&mut st, set_point, present_value, gains)
    }

    /// Like [`update`](Self::update), but `publish` runs before the lock is
    /// released, so published outputs land in the same order as the error
    /// history advances.
    pub async fn update_and<F, Fut>(
        &self,
        set_point: f64,
        present_value: f64,
        gains: Gains,
        publish: F,
    ) -> f64
    where
        F: FnOnce(f64) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut st = self.state.lock().await;
        let output = self.step(&mut st, set_point, present_value, gains);
        publish(output).await;
        output
    }

    fn step(&self, st: &mut ControllerState, set_point: f64, present_value: f64, gains: Gains) -> f64 {
        let error = set_point - present_value;
        st.accumulated_error += error;
        let derivative = error - st.previous_error;

        // See `IntegralTerm`: the default reads the previous error here, not
        // the accumulated one.
        let integral = match self.integral_term {
            IntegralTerm::PreviousError => st.previous_error,
            IntegralTerm::AccumulatedError => st.accumulated_error,
        };
        let output = gains.kp * error + gains.ki * integral + gains.kd * derivative;

        st.previous_error = error;
        output
    }

    #[cfg(test)]
    pub(crate) async fn state(&self) -> ControllerState {
        *self.state.lock().await
    }
}

// ===========================================================================
// Tests
// ===========================================================================
