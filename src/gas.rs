// gas.rs

use crate::*;

/// Volume counted per threshold crossing, two crossings per magnet revolution.
pub const GAS_M3_PER_PULSE: f64 = 0.005;

/// Absolute comparator thresholds on the raw sample.
pub const GAS_THRESHOLD: i32 = 50;

/// Window widening keeps samples at least range/5 inside the bounds.
pub const RANGE_THRESHOLD_FRACTION: i32 = 5;
/// Each crossing pulls the bound it came from in by range/20.
pub const RANGE_ADJUSTMENT_FRACTION: i32 = 20;

/// Consecutive failed reads tolerated before the sensor is declared dead.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 50;

// Zustandszahl and Brennwert from the gas bill, kWh per m³
const GAS_CONDITION_FACTOR: f64 = 0.9655;
const GAS_CALORIFIC_VALUE: f64 = 11.229;
const GAS_WH_PER_PULSE: f64 = GAS_M3_PER_PULSE * GAS_CONDITION_FACTOR * GAS_CALORIFIC_VALUE * 1000.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GasCalibration {
    pub min_observed: i32,
    pub max_observed: i32,
    pub expecting_low: bool,
    pub consecutive_failures: u32,
}

impl GasCalibration {
    pub fn range(&self) -> i32 {
        self.max_observed - self.min_observed
    }

    /// Widen the window towards `sample`, staying one band inside it.
    fn track(&mut self, sample: i32, range: i32) {
        let band = range / RANGE_THRESHOLD_FRACTION;
        if sample - band > self.max_observed {
            self.max_observed = sample - band;
        }
        if sample + band < self.min_observed {
            self.min_observed = sample + band;
        }
    }

    /// Hysteresis comparator. True when the armed threshold was crossed.
    fn crossing(&mut self, sample: i32, range: i32) -> bool {
        let adjust = range / RANGE_ADJUSTMENT_FRACTION;
        if self.expecting_low && sample < -GAS_THRESHOLD {
            self.expecting_low = false;
            self.min_observed += adjust;
            true
        } else if !self.expecting_low && sample > GAS_THRESHOLD {
            self.expecting_low = true;
            self.max_observed -= adjust;
            true
        } else {
            false
        }
    }
}

pub struct GasDetector<S> {
    identity: MeterIdentity,
    sensor: S,
    calibration: GasCalibration,
    reading: MeterReading,
    store: StateStore,
    runtime: RuntimeConfig,
}

impl<S: FieldSensor> GasDetector<S> {
    pub fn new(identity: MeterIdentity, sensor: S, store: StateStore, runtime: RuntimeConfig) -> AppResult<Self> {
        let mut meter = Self {
            identity,
            sensor,
            calibration: GasCalibration::default(),
            reading: MeterReading::new(GAS_M3_PER_PULSE, Instant::now()),
            store,
            runtime,
        };

        if let Some(state) = meter.store.load::<GasState>(&meter.identity.name)? {
            meter.calibration.min_observed = state.min_val;
            meter.calibration.max_observed = state.max_val;
            meter.reset_meter(state.reading)?;
        }
        Ok(meter)
    }

    pub fn calibration(&self) -> &GasCalibration {
        &self.calibration
    }

    pub fn poll_edge_at(&mut self, now: Instant) -> AppResult<bool> {
        let sample = match self.sensor.read_raw() {
            Ok((x, _, _)) => {
                self.calibration.consecutive_failures = 0;
                x as i32
            }
            Err(e) => {
                self.calibration.consecutive_failures = self.calibration.consecutive_failures.saturating_add(1);
                let failures = self.calibration.consecutive_failures;
                warn!("{}: {e} ({failures} in a row)", self.identity.name);
                if failures > MAX_CONSECUTIVE_FAILURES && !self.runtime.dry_run {
                    return Err(AppError::SensorFault {
                        meter: self.identity.name.clone(),
                        failures,
                    });
                }
                return Ok(false);
            }
        };

        let range = self.calibration.range();
        self.calibration.track(sample, range);

        if self.runtime.verbose {
            debug!(
                "gas {:6} < {:6} < {:6} --- {:9.3} {}",
                self.calibration.min_observed,
                sample,
                self.calibration.max_observed,
                self.reading.cumulative(),
                self.calibration.expecting_low
            );
        }

        if !self.calibration.crossing(sample, range) {
            return Ok(false);
        }
        self.reading.register_pulse(now);
        self.persist()?;
        Ok(true)
    }

    fn persist(&self) -> AppResult<()> {
        let state = GasState {
            reading: self.reading.cumulative(),
            min_val: self.calibration.min_observed,
            max_val: self.calibration.max_observed,
        };
        self.store.save(&self.identity.name, &state)
    }
}

impl<S: FieldSensor> PulseDetector for GasDetector<S> {
    fn identity(&self) -> &MeterIdentity {
        &self.identity
    }

    fn reading(&self) -> &MeterReading {
        &self.reading
    }

    fn poll_edge(&mut self) -> AppResult<bool> {
        self.poll_edge_at(Instant::now())
    }

    fn reset_meter(&mut self, value: f64) -> AppResult<bool> {
        if !self.reading.reset(value) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    fn power(&self) -> f64 {
        self.reading.rate_per_hour(GAS_WH_PER_PULSE)
    }

    fn influx_measurement(&self) -> String {
        "gas".into()
    }

    fn influx_fields(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([("value".to_string(), self.reading.cumulative())])
    }

    fn source(&self) -> String {
        self.sensor.describe()
    }
}

// EOF
