// ferraris.rs

use crate::*;

pub struct FerrarisDetector<P> {
    identity: MeterIdentity,
    input: P,
    rotations_per_kwh: u32,
    measurement: String,
    level: PinLevel,
    reading: MeterReading,
    store: StateStore,
}

impl<P: DigitalInput> FerrarisDetector<P> {
    /// Restore the persisted reading if there is one and arm on the current pin level.
    pub fn new(
        identity: MeterIdentity,
        mut input: P,
        rotations_per_kwh: u32,
        measurement: impl Into<String>,
        store: StateStore,
    ) -> AppResult<Self> {
        if rotations_per_kwh == 0 {
            return Err(AppError::InvalidValue(format!("{}: rotations per kWh must be > 0", identity.name)));
        }

        let level = match input.read_level() {
            Ok(level) => level,
            Err(e) => {
                warn!("{}: initial read failed, assuming idle level: {e}", identity.name);
                PinLevel::High
            }
        };

        let mut meter = Self {
            reading: MeterReading::new(1.0 / rotations_per_kwh as f64, Instant::now()),
            identity,
            input,
            rotations_per_kwh,
            measurement: measurement.into(),
            level,
            store,
        };

        if let Some(state) = meter.store.load::<FerrarisState>(&meter.identity.name)? {
            meter.reset_meter(state.reading)?;
        }
        Ok(meter)
    }

    /// One poll at time `now`. A pulse is the return to the idle (high) level.
    pub fn poll_edge_at(&mut self, now: Instant) -> AppResult<bool> {
        let level = match self.input.read_level() {
            Ok(level) => level,
            Err(e) => {
                warn!("{}: {e}", self.identity.name);
                return Ok(false);
            }
        };

        if level == self.level {
            return Ok(false);
        }
        self.level = level;
        if level != PinLevel::High {
            return Ok(false);
        }

        self.reading.register_pulse(now);
        self.persist()?;
        Ok(true)
    }

    fn persist(&self) -> AppResult<()> {
        let state = FerrarisState {
            reading: self.reading.cumulative(),
        };
        self.store.save(&self.identity.name, &state)
    }

    #[cfg(test)]
    fn level(&self) -> PinLevel {
        self.level
    }
}

impl<P: DigitalInput> PulseDetector for FerrarisDetector<P> {
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
        self.reading.rate_per_hour(1000.0 / self.rotations_per_kwh as f64)
    }

    fn influx_measurement(&self) -> String {
        self.measurement.clone()
    }

    fn influx_fields(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("value".to_string(), self.reading.cumulative()),
            ("wattage".to_string(), self.power()),
        ])
    }

    fn source(&self) -> String {
        self.input.describe()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use PinLevel::{High, Low};

    struct ScriptInput(VecDeque<Result<PinLevel, ()>>);

    impl ScriptInput {
        fn new(levels: &[PinLevel]) -> Self {
            Self(levels.iter().map(|l| Ok(*l)).collect())
        }
    }

    impl DigitalInput for ScriptInput {
        fn read_level(&mut self) -> Result<PinLevel, SensorError> {
            match self.0.pop_front() {
                Some(Ok(level)) => Ok(level),
                _ => Err(SensorError::Read("script exhausted".into())),
            }
        }
    }

    fn detector(dir: &std::path::Path, script: ScriptInput, rpkwh: u32) -> FerrarisDetector<ScriptInput> {
        let store = StateStore::new(dir, RuntimeConfig::default());
        FerrarisDetector::new(MeterIdentity::new("Solar", "Solar", "kWh"), script, rpkwh, "meter", store).unwrap()
    }

    #[test]
    fn one_pulse_on_rising_edge() {
        let tmp = tempfile::tempdir().unwrap();
        // first entry is consumed by the constructor
        let mut det = detector(tmp.path(), ScriptInput::new(&[High, High, High, Low, High]), 375);
        let t0 = Instant::now();

        let pulses: Vec<bool> = (1..=4)
            .map(|i| det.poll_edge_at(t0 + Duration::from_secs(i)).unwrap())
            .collect();
        assert_eq!(pulses, vec![false, false, false, true]);
        assert_eq!(det.reading().pulse_count(), 1);
        assert!(det.power() > 0.0);
    }

    #[test]
    fn falling_edge_and_read_errors_do_not_count() {
        let tmp = tempfile::tempdir().unwrap();
        let mut det = detector(tmp.path(), ScriptInput::new(&[Low, Low, High, Low]), 75);
        let t0 = Instant::now();
        assert!(!det.poll_edge_at(t0).unwrap());
        assert!(det.poll_edge_at(t0).unwrap());
        assert!(!det.poll_edge_at(t0).unwrap());
        // script exhausted, read error is transient
        assert!(!det.poll_edge_at(t0).unwrap());
        assert_eq!(det.level(), Low);
        assert_eq!(det.reading().pulse_count(), 1);
    }

    #[test]
    fn power_for_375_rotations() {
        let tmp = tempfile::tempdir().unwrap();
        let mut det = detector(tmp.path(), ScriptInput::new(&[High, Low, High, Low, High]), 375);
        let t0 = Instant::now();
        det.poll_edge_at(t0).unwrap();
        assert!(det.poll_edge_at(t0 + Duration::from_secs(1)).unwrap());
        assert!(det.power() > 0.0);

        det.poll_edge_at(t0 + Duration::from_secs(2)).unwrap();
        assert!(det.poll_edge_at(t0 + Duration::from_millis(10_600)).unwrap());
        assert_eq!(det.reading().last_pulse_interval(), Duration::from_millis(9_600));
        assert!((det.power() - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn pulses_are_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let mut det = detector(tmp.path(), ScriptInput::new(&[High, Low, High]), 75);
        assert!(det.reset_meter(100.0).unwrap());
        det.poll_edge().unwrap();
        assert!(det.poll_edge().unwrap());

        let expected = 100.0 + 1.0 / 75.0;
        assert_eq!(det.reading().cumulative(), expected);
        let store = StateStore::new(tmp.path(), RuntimeConfig::default());
        assert_eq!(store.load::<FerrarisState>("Solar").unwrap(), Some(FerrarisState { reading: expected }));
    }

    #[test]
    fn restore_reapplies_reset() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path(), RuntimeConfig::default());
        store.save("Solar", &FerrarisState { reading: 512.25 }).unwrap();

        let det = detector(tmp.path(), ScriptInput::new(&[High]), 375);
        assert_eq!(det.reading().base_reading(), 512.25);
        assert_eq!(det.reading().pulse_count(), 0);
        assert_eq!(det.power(), 0.0);
    }

    #[test]
    fn non_positive_reset_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut det = detector(tmp.path(), ScriptInput::new(&[High]), 375);
        assert!(!det.reset_meter(0.0).unwrap());
        assert!(!det.reset_meter(-1.0).unwrap());
        let store = StateStore::new(tmp.path(), RuntimeConfig::default());
        assert!(store.load::<FerrarisState>("Solar").unwrap().is_none());
    }

    #[test]
    fn telemetry_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let det = detector(tmp.path(), ScriptInput::new(&[High]), 375);
        assert_eq!(det.influx_measurement(), "meter");
        let fields = det.influx_fields();
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["value", "wattage"]);
        assert_eq!(det.influx_tags()["meter"], "solar");
    }
}
// EOF
