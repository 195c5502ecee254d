//! Stateful greenhouse enclosure simulator for local development.
//!
//! Models a small enclosure closed-loop with the hub:
//! - Air temperature relaxing toward a diurnal ambient swing
//! - Heater driven by the controller output received from the hub
//! - Fan that speeds up heat exchange and vents humid air
//! - Soil moisture that evaporates and rises while the pump runs
//! - Humidity fed by soil moisture
//! - Per-reading sensor noise and occasional spikes
//!
//! The physical state evolves deterministically; randomness only enters the
//! reported readings.

use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Spring day around 18 °C, moderate humidity, normal sensor noise.
    Mild,
    /// Hot and dry. Soil dries fast; the fan matters more than the heater.
    Hot,
    /// Cold night around 6 °C. The heater has to work to hold a set-point.
    Cold,
    /// Mild climate with noisy sensors and frequent spikes.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Self::Hot,
            "cold" => Self::Cold,
            "flaky" => Self::Flaky,
            _ => Self::Mild, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mild => write!(f, "mild"),
            Self::Hot => write!(f, "hot"),
            Self::Cold => write!(f, "cold"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Readings + actuation
// ---------------------------------------------------------------------------

/// One set of sensor readings, as the device reports them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readings {
    pub temp_pv: f64,
    pub humidity_pv: f64,
    pub moist_pv: f64,
}

/// Actuation received from the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Actuation {
    pub temp_co: f64,
    pub fan: bool,
    pub pump: bool,
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

/// Controller output that drives the heater at full power.
const HEATER_FULL_SCALE: f64 = 100.0;

pub struct EnclosureSim {
    // Physical state
    temperature: f64,
    humidity: f64,
    moisture: f64,
    ticks: u64,

    // Climate
    ambient_mean: f64,
    ambient_humidity: f64,
    diurnal_amplitude: f64,
    diurnal_period_ticks: f64,

    // Thermal
    heat_loss: f64,
    heater_gain: f64,
    fan_extra_loss: f64,

    // Humidity + soil
    humidity_relax: f64,
    fan_venting: f64,
    evaporation: f64,
    pump_rate: f64,

    // Sensor quality
    temp_sigma: f64,
    humidity_sigma: f64,
    moisture_sigma: f64,
    spike_prob: f32,

    actuation: Actuation,
}

impl EnclosureSim {
    /// Create a new simulator.
    ///
    /// `diurnal_period_ticks` is the length of one day/night cycle in sample
    /// ticks. Use a few hundred for fast dev iteration.
    pub fn new(scenario: Scenario, diurnal_period_ticks: f64) -> Self {
        let (ambient, ambient_rh, moisture, evaporation, noise, spike_prob) = match scenario {
            Scenario::Mild => (18.0_f64, 55.0_f64, 0.45_f64, 0.004_f64, 1.0_f64, 0.01_f32),
            Scenario::Hot => (31.0, 30.0, 0.35, 0.012, 1.0, 0.01),
            Scenario::Cold => (6.0, 70.0, 0.55, 0.002, 1.0, 0.01),
            Scenario::Flaky => (18.0, 55.0, 0.45, 0.004, 4.0, 0.10),
        };

        Self {
            temperature: ambient,
            humidity: (ambient_rh + 25.0 * moisture).min(100.0),
            moisture,
            ticks: 0,

            ambient_mean: ambient,
            ambient_humidity: ambient_rh,
            diurnal_amplitude: 4.0,
            diurnal_period_ticks: diurnal_period_ticks.max(1.0),

            heat_loss: 0.05,
            heater_gain: 0.6,
            fan_extra_loss: 0.15,

            humidity_relax: 0.05,
            fan_venting: 0.15,
            evaporation,
            pump_rate: 0.02,

            temp_sigma: 0.1 * noise,
            humidity_sigma: 0.5 * noise,
            moisture_sigma: 0.005 * noise,
            spike_prob,

            actuation: Actuation::default(),
        }
    }

    /// Apply the hub's latest answer. It stays in force until the next one.
    pub fn apply(&mut self, actuation: Actuation) {
        self.actuation = actuation;
    }

    #[cfg(test)]
    pub fn actuation(&self) -> Actuation {
        self.actuation
    }

    /// Advance the physical model by one tick and read the sensors.
    pub fn step(&mut self) -> Readings {
        self.ticks += 1;
        let ambient = self.ambient();

        // -- Temperature --------------------------------------------------

        let power = (self.actuation.temp_co / HEATER_FULL_SCALE).clamp(0.0, 1.0);
        let loss = if self.actuation.fan {
            self.heat_loss + self.fan_extra_loss
        } else {
            self.heat_loss
        };
        self.temperature += loss * (ambient - self.temperature) + self.heater_gain * power;

        // -- Soil ---------------------------------------------------------

        self.moisture -= self.evaporation * self.moisture;
        if self.actuation.pump {
            self.moisture += self.pump_rate;
        }
        self.moisture = self.moisture.clamp(0.0, 1.0);

        // -- Humidity -----------------------------------------------------

        // Wet soil feeds the air; the fan vents it back to ambient.
        let (target, rate) = if self.actuation.fan {
            (self.ambient_humidity, self.humidity_relax + self.fan_venting)
        } else {
            (self.ambient_humidity + 25.0 * self.moisture, self.humidity_relax)
        };
        self.humidity = (self.humidity + rate * (target - self.humidity)).clamp(0.0, 100.0);

        // -- Sensors ------------------------------------------------------

        Readings {
            temp_pv: self.read(self.temperature, self.temp_sigma),
            humidity_pv: self.read(self.humidity, self.humidity_sigma).clamp(0.0, 100.0),
            moist_pv: self.read(self.moisture, self.moisture_sigma).clamp(0.0, 1.0),
        }
    }

    fn ambient(&self) -> f64 {
        // Peaks a quarter of the way into each cycle.
        let phase = 2.0 * std::f64::consts::PI * self.ticks as f64 / self.diurnal_period_ticks;
        self.ambient_mean + self.diurnal_amplitude * phase.sin()
    }

    fn read(&self, true_value: f64, sigma: f64) -> f64 {
        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, sigma * 10.0)
        } else {
            0.0
        };
        true_value + gaussian(0.0, sigma) + spike
    }

    #[cfg(test)]
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    #[cfg(test)]
    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    #[cfg(test)]
    pub fn moisture(&self) -> f64 {
        self.moisture
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// One day per ~10^6 ticks: ambient is effectively constant.
    const FLAT_DAY: f64 = 1.0e6;

    fn run(sim: &mut EnclosureSim, n: usize) {
        for _ in 0..n {
            sim.step();
        }
    }

    #[test]
    fn readings_within_physical_range() {
        let mut sim = EnclosureSim::new(Scenario::Flaky, 50.0);
        sim.apply(Actuation {
            temp_co: 1_000.0,
            fan: true,
            pump: true,
        });
        for _ in 0..500 {
            let r = sim.step();
            assert!((0.0..=100.0).contains(&r.humidity_pv), "humidity {}", r.humidity_pv);
            assert!((0.0..=1.0).contains(&r.moist_pv), "moisture {}", r.moist_pv);
            assert!(r.temp_pv.is_finite());
        }
    }

    #[test]
    fn heater_raises_temperature() {
        let mut idle = EnclosureSim::new(Scenario::Cold, FLAT_DAY);
        let mut heated = EnclosureSim::new(Scenario::Cold, FLAT_DAY);
        heated.apply(Actuation {
            temp_co: 50.0,
            ..Actuation::default()
        });

        run(&mut idle, 100);
        run(&mut heated, 100);

        assert!(
            heated.temperature() > idle.temperature() + 2.0,
            "heated={:.2} idle={:.2}",
            heated.temperature(),
            idle.temperature()
        );
    }

    #[test]
    fn negative_output_does_not_cool() {
        let mut idle = EnclosureSim::new(Scenario::Mild, FLAT_DAY);
        let mut driven = EnclosureSim::new(Scenario::Mild, FLAT_DAY);
        driven.apply(Actuation {
            temp_co: -80.0,
            ..Actuation::default()
        });

        run(&mut idle, 50);
        run(&mut driven, 50);

        assert_eq!(driven.temperature(), idle.temperature());
    }

    #[test]
    fn fan_cools_a_heated_enclosure() {
        let heat = Actuation {
            temp_co: 100.0,
            ..Actuation::default()
        };
        let mut closed = EnclosureSim::new(Scenario::Mild, FLAT_DAY);
        let mut vented = EnclosureSim::new(Scenario::Mild, FLAT_DAY);
        closed.apply(heat);
        vented.apply(Actuation { fan: true, ..heat });

        run(&mut closed, 100);
        run(&mut vented, 100);

        assert!(vented.temperature() < closed.temperature());
    }

    #[test]
    fn fan_vents_humidity() {
        let mut closed = EnclosureSim::new(Scenario::Mild, FLAT_DAY);
        let mut vented = EnclosureSim::new(Scenario::Mild, FLAT_DAY);
        vented.apply(Actuation {
            fan: true,
            ..Actuation::default()
        });

        run(&mut closed, 60);
        run(&mut vented, 60);

        assert!(vented.humidity() < closed.humidity());
    }

    #[test]
    fn pump_wets_the_soil() {
        let mut sim = EnclosureSim::new(Scenario::Hot, FLAT_DAY);
        run(&mut sim, 20);
        let before = sim.moisture();

        sim.apply(Actuation {
            pump: true,
            ..Actuation::default()
        });
        run(&mut sim, 20);

        assert!(
            sim.moisture() > before,
            "pump should raise moisture: before={before:.3} after={:.3}",
            sim.moisture()
        );
    }

    #[test]
    fn soil_dries_without_pump() {
        let mut sim = EnclosureSim::new(Scenario::Hot, FLAT_DAY);
        let start = sim.moisture();
        run(&mut sim, 50);
        assert!(sim.moisture() < start);
    }

    #[test]
    fn diurnal_cycle_moves_idle_temperature() {
        let mut sim = EnclosureSim::new(Scenario::Mild, 100.0);
        let mut lo = f64::MAX;
        let mut hi = f64::MIN;
        for _ in 0..400 {
            sim.step();
            lo = lo.min(sim.temperature());
            hi = hi.max(sim.temperature());
        }
        assert!(hi - lo > 1.0, "swing too small: {lo:.2}..{hi:.2}");
    }

    #[test]
    fn readings_track_true_state() {
        let mut sim = EnclosureSim::new(Scenario::Mild, FLAT_DAY);
        let n = 200;
        let mut err = 0.0;
        for _ in 0..n {
            let r = sim.step();
            err += r.temp_pv - sim.temperature();
        }
        let mean_err = err / n as f64;
        assert!(mean_err.abs() < 0.2, "sensor bias too large: {mean_err}");
    }

    #[test]
    fn apply_replaces_actuation() {
        let mut sim = EnclosureSim::new(Scenario::Mild, FLAT_DAY);
        let a = Actuation {
            temp_co: 12.5,
            fan: true,
            pump: false,
        };
        sim.apply(a);
        assert_eq!(sim.actuation(), a);
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("mild"), Scenario::Mild);
        assert_eq!(Scenario::from_str_lossy("HOT"), Scenario::Hot);
        assert_eq!(Scenario::from_str_lossy(" Cold "), Scenario::Cold);
        assert_eq!(Scenario::from_str_lossy("flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("unknown"), Scenario::Mild);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Mild);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Mild.to_string(), "mild");
        assert_eq!(Scenario::Hot.to_string(), "hot");
        assert_eq!(Scenario::Cold.to_string(), "cold");
        assert_eq!(Scenario::Flaky.to_string(), "flaky");
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let sum: f64 = (0..n).map(|_| approx_std_normal()).sum();
        let mean = sum / n as f64;
        assert!(
            mean.abs() < 0.15,
            "approx_std_normal mean should be near zero: {mean}"
        );
    }
}
