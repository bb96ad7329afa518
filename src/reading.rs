// reading.rs

use crate::*;

/// Immutable description of one physical meter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeterIdentity {
    /// Unique key, also the state file stem.
    pub name: String,
    pub label: String,
    pub unit: String,
}

impl MeterIdentity {
    pub fn new(name: impl Into<String>, label: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            unit: unit.into(),
        }
    }

    /// Lower-cased name, as used by telemetry tags and the HTTP surface.
    pub fn id(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Pulse counter with a calibration offset.
///
/// The cumulative reading is always derived from the base reading and the
/// pulse count, it is never stored on its own.
#[derive(Clone, Debug)]
pub struct MeterReading {
    base_reading: f64,
    pulse_count: u64,
    increment_per_pulse: f64,
    last_pulse_interval: Duration,
    last_pulse_at: Instant,
}

impl MeterReading {
    pub fn new(increment_per_pulse: f64, started: Instant) -> Self {
        Self {
            base_reading: 0.0,
            pulse_count: 0,
            increment_per_pulse,
            last_pulse_interval: Duration::ZERO,
            last_pulse_at: started,
        }
    }

    pub fn base_reading(&self) -> f64 {
        self.base_reading
    }

    pub fn pulse_count(&self) -> u64 {
        self.pulse_count
    }

    pub fn increment_per_pulse(&self) -> f64 {
        self.increment_per_pulse
    }

    pub fn cumulative(&self) -> f64 {
        self.base_reading + self.pulse_count as f64 * self.increment_per_pulse
    }

    /// Zero until the first pulse has been registered.
    pub fn last_pulse_interval(&self) -> Duration {
        self.last_pulse_interval
    }

    pub fn register_pulse(&mut self, now: Instant) {
        self.last_pulse_interval = now.saturating_duration_since(self.last_pulse_at);
        self.last_pulse_at = now;
        self.pulse_count += 1;
    }

    /// Apply a new calibration value. Returns false and changes nothing unless
    /// `value` is finite and `> 0`.
    pub fn reset(&mut self, value: f64) -> bool {
        if value.is_finite() && value > 0.0 {
            self.base_reading = value;
            self.pulse_count = 0;
            true
        } else {
            false
        }
    }

    /// Consumption rate from the last pulse interval, `energy_per_pulse` per hour.
    pub fn rate_per_hour(&self, energy_per_pulse: f64) -> f64 {
        if self.last_pulse_interval.is_zero() {
            return 0.0;
        }
        energy_per_pulse / (self.last_pulse_interval.as_secs_f64() / 3600.0)
    }
}

// EOF
