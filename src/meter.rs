// meter.rs

use tokio::sync::{watch, MutexGuard};

use crate::*;

/// What the scheduler, the emitter and the HTTP surface know about a meter.
pub trait PulseDetector: Send {
    fn identity(&self) -> &MeterIdentity;

    fn reading(&self) -> &MeterReading;

    /// Sample the sensor once. `Ok(true)` when a pulse was counted and persisted.
    fn poll_edge(&mut self) -> AppResult<bool>;

    /// Set a new calibration value and persist it. No-op unless `value > 0`.
    fn reset_meter(&mut self, value: f64) -> AppResult<bool>;

    /// Instantaneous consumption in watts, 0 before the first pulse.
    fn power(&self) -> f64;

    fn influx_measurement(&self) -> String;

    fn influx_fields(&self) -> BTreeMap<String, f64>;

    fn influx_tags(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("meter".to_string(), self.identity().id())])
    }

    /// Where the samples come from, for log output.
    fn source(&self) -> String;

    fn print(&self) {
        let r = self.reading();
        info!(
            "{:>10} {:>12} {:>6} {:>9.1} {:>12.3}",
            self.identity().name,
            self.source(),
            r.pulse_count(),
            self.power(),
            r.cumulative()
        );
    }
}

/// Handle to one meter, shared between the poll loop and the HTTP surface.
///
/// Every mutation goes through the mutex, so a `set()` can never interleave
/// with a pulse being counted on the same meter.
#[derive(Clone)]
pub struct SharedMeter {
    identity: Arc<MeterIdentity>,
    inner: Arc<Mutex<Box<dyn PulseDetector>>>,
}

impl SharedMeter {
    pub fn new<D: PulseDetector + 'static>(detector: D) -> Self {
        Self {
            identity: Arc::new(detector.identity().clone()),
            inner: Arc::new(Mutex::new(Box::new(detector))),
        }
    }

    pub fn id(&self) -> String {
        self.identity.id()
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn label(&self) -> &str {
        &self.identity.label
    }

    pub fn unit(&self) -> &str {
        &self.identity.unit
    }

    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn PulseDetector>> {
        self.inner.lock().await
    }

    pub async fn get(&self) -> f64 {
        self.inner.lock().await.reading().cumulative()
    }

    /// Accept `value` only if it is larger than the current reading.
    pub async fn set(&self, value: f64) -> AppResult<f64> {
        let mut meter = self.inner.lock().await;
        let current = meter.reading().cumulative();
        if !value.is_finite() {
            return Err(AppError::InvalidValue(format!("{value} is not a meter reading")));
        }
        if !(value > current) {
            return Err(AppError::ValueTooSmall { value, current });
        }
        info!("Set value {value:.3} to meter '{}'", self.id());
        meter.reset_meter(value)?;
        Ok(meter.reading().cumulative())
    }
}

/// All active meters in registration order, plus a channel for fatal errors
/// raised outside the poll loop.
#[derive(Clone)]
pub struct MeterRegistry {
    meters: Vec<SharedMeter>,
    fatal_tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for MeterRegistry {
    fn default() -> Self {
        let (fatal_tx, _) = watch::channel(None);
        Self {
            meters: Vec::new(),
            fatal_tx: Arc::new(fatal_tx),
        }
    }
}

impl MeterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, meter: SharedMeter) -> AppResult<()> {
        let id = meter.id();
        if self.get(&id).is_some() {
            return Err(AppError::Message(format!("Duplicate meter id '{id}'")));
        }
        self.meters.push(meter);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&SharedMeter> {
        self.meters.iter().find(|m| m.id() == id)
    }

    pub fn meters(&self) -> &[SharedMeter] {
        &self.meters
    }

    pub async fn set(&self, id: &str, value: f64) -> AppResult<f64> {
        let meter = self.get(id).ok_or_else(|| AppError::UnknownMeter(id.to_string()))?;
        match meter.set(value).await {
            Err(e) if e.is_fatal() => {
                self.report_fatal(&e);
                Err(e)
            }
            res => res,
        }
    }

    pub fn report_fatal(&self, err: &AppError) {
        error!("Fatal: {err}");
        self.fatal_tx.send_replace(Some(err.to_string()));
    }

    /// Resolves with the message of the first fatal error reported.
    pub async fn wait_fatal(&self) -> String {
        let mut rx = self.fatal_tx.subscribe();
        loop {
            if let Some(msg) = rx.borrow_and_update().clone() {
                return msg;
            }
            if rx.changed().await.is_err() {
                return String::from("fatal channel closed");
            }
        }
    }
}

// EOF
