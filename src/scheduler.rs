// scheduler.rs

use tokio::time::MissedTickBehavior;

use crate::*;

struct Scheduled {
    meter: SharedMeter,
    next_emit: Instant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub pulses: usize,
    pub emitted: usize,
}

/// Polls every registered meter once per tick, pushes a point on each pulse
/// and otherwise every heartbeat interval, and keeps the supervisor happy.
pub struct Scheduler {
    meters: Vec<Scheduled>,
    emitter: TelemetryEmitter,
    liveness: Option<Box<dyn Liveness>>,
    next_notify: Option<Instant>,
    period: Duration,
    heartbeat: Duration,
}

impl Scheduler {
    pub fn new(registry: &MeterRegistry, emitter: TelemetryEmitter, liveness: Option<Box<dyn Liveness>>) -> Self {
        let now = Instant::now();
        let next_notify = liveness
            .as_ref()
            .and_then(|l| l.interval())
            .map(|interval| now + interval / 2);
        let meters = registry
            .meters()
            .iter()
            .map(|m| Scheduled {
                meter: m.clone(),
                next_emit: now + INFLUX_WRITE_INTERVAL,
            })
            .collect();

        Self {
            meters,
            emitter,
            liveness,
            next_notify,
            period: POLL_TICK,
            heartbeat: INFLUX_WRITE_INTERVAL,
        }
    }

    pub async fn run(mut self) -> AppResult<()> {
        info!(
            "Polling {} meters every {:?}, heartbeat {:?}",
            self.meters.len(),
            self.period,
            self.heartbeat
        );
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick(Instant::now()).await?;
        }
    }

    /// One pass over all meters at time `now`.
    pub async fn tick(&mut self, now: Instant) -> AppResult<TickOutcome> {
        // before polling, so a faulting meter cannot starve the supervisor
        self.signal_liveness(now);

        let mut outcome = TickOutcome::default();
        for s in self.meters.iter_mut() {
            let mut meter = s.meter.lock().await;
            let pulse = match meter.poll_edge() {
                Ok(pulse) => pulse,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}: {e}", s.meter.name());
                    false
                }
            };

            if pulse {
                meter.print();
                outcome.pulses += 1;
            } else if now < s.next_emit {
                continue;
            }
            self.emitter.emit(Point::from_meter(&**meter, Utc::now()));
            outcome.emitted += 1;
            s.next_emit = now + self.heartbeat;
        }
        Ok(outcome)
    }

    fn signal_liveness(&mut self, now: Instant) {
        let (Some(liveness), Some(next)) = (self.liveness.as_mut(), self.next_notify) else {
            return;
        };
        if now < next {
            return;
        }
        if let Err(e) = liveness.notify() {
            warn!("Watchdog notify failed: {e}");
        }
        self.next_notify = liveness.interval().map(|interval| now + interval / 2);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::meter::tests::ManualMeter;

    struct NullSink;

    impl TelemetrySink for NullSink {
        fn write(&self, _point: &Point) -> AppResult<()> {
            Ok(())
        }
    }

    struct CountingLiveness {
        interval: Duration,
        count: Arc<AtomicU32>,
    }

    impl Liveness for CountingLiveness {
        fn interval(&self) -> Option<Duration> {
            Some(self.interval)
        }

        fn notify(&mut self) -> io::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn emitter() -> TelemetryEmitter {
        TelemetryEmitter::new(Arc::new(NullSink), RuntimeConfig::default())
    }

    #[tokio::test]
    async fn pulse_emits_and_resets_heartbeat() {
        let solar = ManualMeter::new("Solar");
        let pending = solar.pending.clone();
        let mut reg = MeterRegistry::new();
        reg.add(SharedMeter::new(solar)).unwrap();
        let mut sched = Scheduler::new(&reg, emitter(), None);
        let t0 = Instant::now();

        assert_eq!(sched.tick(t0).await.unwrap(), TickOutcome::default());

        pending.store(1, Ordering::SeqCst);
        let t1 = t0 + Duration::from_secs(20);
        assert_eq!(sched.tick(t1).await.unwrap(), TickOutcome { pulses: 1, emitted: 1 });

        // the original heartbeat deadline has passed, but the pulse pushed it out
        assert_eq!(sched.tick(t0 + Duration::from_secs(31)).await.unwrap().emitted, 0);
        assert_eq!(sched.tick(t1 + Duration::from_secs(30)).await.unwrap(), TickOutcome { pulses: 0, emitted: 1 });
        assert_eq!(sched.tick(t1 + Duration::from_secs(31)).await.unwrap().emitted, 0);
    }

    #[tokio::test]
    async fn meters_have_independent_deadlines() {
        let solar = ManualMeter::new("Solar");
        let gas = ManualMeter::new("Gas");
        let gas_pending = gas.pending.clone();
        let mut reg = MeterRegistry::new();
        reg.add(SharedMeter::new(solar)).unwrap();
        reg.add(SharedMeter::new(gas)).unwrap();
        let mut sched = Scheduler::new(&reg, emitter(), None);
        let t0 = Instant::now();

        gas_pending.store(1, Ordering::SeqCst);
        let t1 = t0 + Duration::from_secs(10);
        assert_eq!(sched.tick(t1).await.unwrap(), TickOutcome { pulses: 1, emitted: 1 });

        // solar's deadline is due, gas's was moved by the pulse
        let out = sched.tick(t0 + Duration::from_secs(31)).await.unwrap();
        assert_eq!(out, TickOutcome { pulses: 0, emitted: 1 });
        let out = sched.tick(t1 + Duration::from_secs(31)).await.unwrap();
        assert_eq!(out, TickOutcome { pulses: 0, emitted: 1 });
    }

    #[tokio::test]
    async fn liveness_on_half_interval() {
        let count = Arc::new(AtomicU32::new(0));
        let liveness = CountingLiveness {
            interval: Duration::from_secs(2),
            count: count.clone(),
        };
        let reg = MeterRegistry::new();
        let t0 = Instant::now();
        let mut sched = Scheduler::new(&reg, emitter(), Some(Box::new(liveness)));

        sched.tick(t0 + Duration::from_millis(500)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        sched.tick(t0 + Duration::from_millis(1100)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        sched.tick(t0 + Duration::from_millis(1500)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        sched.tick(t0 + Duration::from_millis(2200)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_meter_still_signals_liveness() {
        let count = Arc::new(AtomicU32::new(0));
        let liveness = CountingLiveness {
            interval: Duration::from_millis(100),
            count: count.clone(),
        };
        let gas = ManualMeter::new("Gas");
        gas.faulty.store(true, Ordering::SeqCst);
        let mut reg = MeterRegistry::new();
        reg.add(SharedMeter::new(ManualMeter::new("Solar"))).unwrap();
        reg.add(SharedMeter::new(gas)).unwrap();
        let mut sched = Scheduler::new(&reg, emitter(), Some(Box::new(liveness)));

        let err = sched.tick(Instant::now() + Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, AppError::SensorFault { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
// EOF
