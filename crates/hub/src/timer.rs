//! Timed actuation. An actuator that supports it (only the water pump) is
//! switched on for a bounded duration and then switches itself off.
//!
//! ```text
//! Idle (off, no token) ──activate_for──▶ Active (on, one token)
//!  ▲                                       │   ▲
//!  │                                       │   └── activate_for: cancel old token,
//!  │                                       │       store new one, timer restarts
//!  └──── timer expiry / switch(off) ───────┘
//! ```
//!
//! The flag and the token change together under the actuator register's
//! exclusive lock. An expiring timer re-checks its own token under that lock
//! before touching anything, so a timer that lost a race against a newer
//! activation does nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::register::RegisterKey;
use crate::state::{Actuator, ActuatorState};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ActuatorError {
    #[error("actuator {0:?} does not support timed activation")]
    NotTimed(Actuator),
}

impl ActuatorState {
    /// Switch `actuator` on for `duration`. A pending deactivation from an
    /// earlier call is cancelled, so the off-timer restarts from now.
    pub async fn activate_for(
        self: &Arc<Self>,
        actuator: Actuator,
        duration: Duration,
    ) -> Result<(), ActuatorError> {
        if !actuator.supports_timed() {
            return Err(ActuatorError::NotTimed(actuator));
        }

        let token = CancellationToken::new();
        self.register
            .with_exclusive(|slots| {
                slots.set(actuator, true);
                if let Some(previous) = slots.attached.insert(actuator, token.clone()) {
                    debug!(?actuator, "overriding pending deactivation");
                    previous.cancel();
                }

                let state = Arc::clone(self);
                tokio::spawn(async move {
                    state.expire_after(actuator, duration, token).await;
                });
            })
            .await;

        info!(?actuator, duration_ms = duration.as_millis() as u64, "actuator on (timed)");
        Ok(())
    }

    /// Set `actuator` directly. Any pending timed deactivation is cancelled:
    /// a manual switch always wins over an earlier timer.
    pub async fn switch(&self, actuator: Actuator, on: bool) {
        self.register
            .with_exclusive(|slots| {
                slots.set(actuator, on);
                if let Some(pending) = slots.attached.remove(&actuator) {
                    pending.cancel();
                }
            })
            .await;

        info!(?actuator, on, "actuator switched");
    }

    /// Fail-safe: everything off, every pending timer cancelled.
    pub async fn all_off(&self) {
        self.register
            .with_exclusive(|slots| {
                for actuator in Actuator::ALL {
                    slots.set(*actuator, false);
                }
                for (_, pending) in slots.attached.drain() {
                    pending.cancel();
                }
            })
            .await;

        info!("all actuators off");
    }

    async fn expire_after(&self, actuator: Actuator, duration: Duration, token: CancellationToken) {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(?actuator, "timed deactivation cancelled");
            }
            _ = tokio::time::sleep(duration) => {
                let expired = self
                    .register
                    .with_exclusive(|slots| {
                        // Superseded while waiting for the lock.
                        if token.is_cancelled() {
                            return false;
                        }
                        slots.set(actuator, false);
                        slots.attached.remove(&actuator);
                        true
                    })
                    .await;

                if expired {
                    info!(?actuator, "actuator off (timer expired)");
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
