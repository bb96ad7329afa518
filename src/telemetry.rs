// telemetry.rs

use tokio::task::JoinHandle;

use crate::*;

#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn from_meter(meter: &dyn PulseDetector, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: meter.influx_measurement(),
            tags: meter.influx_tags(),
            fields: meter.influx_fields(),
            timestamp,
        }
    }

    /// InfluxDB line protocol, nanosecond precision. Non-finite fields are left out.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (k, v) in &self.tags {
            line.push(',');
            line.push_str(&escape(k, &[',', '=', ' ']));
            line.push('=');
            line.push_str(&escape(v, &[',', '=', ' ']));
        }

        let fields = self
            .fields
            .iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| format!("{}={v}", escape(k, &[',', '=', ' '])))
            .collect::<Vec<_>>()
            .join(",");
        line.push(' ');
        line.push_str(&fields);

        if let Some(ns) = self.timestamp.timestamp_nanos_opt() {
            line.push(' ');
            line.push_str(&ns.to_string());
        }
        line
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Blocking write of one point. Called off the poll loop.
pub trait TelemetrySink: Send + Sync + 'static {
    fn write(&self, point: &Point) -> AppResult<()>;
}

/// InfluxDB 1.x `/write` endpoint.
pub struct InfluxSink {
    agent: ureq::Agent,
    write_url: String,
    config: InfluxConfig,
}

impl InfluxSink {
    pub fn new(config: InfluxConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(&format!("homemeter/{FW_VERSION}"))
            .build();
        let write_url = format!("{}/write", config.url.trim_end_matches('/'));
        Self {
            agent,
            write_url,
            config,
        }
    }
}

impl TelemetrySink for InfluxSink {
    fn write(&self, point: &Point) -> AppResult<()> {
        let mut req = self
            .agent
            .post(&self.write_url)
            .query("db", &self.config.database)
            .query("precision", "ns");
        if !self.config.user.is_empty() {
            req = req.query("u", &self.config.user).query("p", &self.config.password);
        }

        match req.send_string(&point.to_line_protocol()) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(AppError::Telemetry(format!("InfluxDB status {code}: {}", body.trim())))
            }
            Err(e) => Err(AppError::Telemetry(e.to_string())),
        }
    }
}

/// Hands each point to its own blocking task. There is no queue and no retry,
/// so a point whose write fails is lost and concurrent writes may land out of order.
#[derive(Clone)]
pub struct TelemetryEmitter {
    sink: Arc<dyn TelemetrySink>,
    runtime: RuntimeConfig,
}

impl TelemetryEmitter {
    pub fn new(sink: Arc<dyn TelemetrySink>, runtime: RuntimeConfig) -> Self {
        Self { sink, runtime }
    }

    /// Returns immediately. The handle is only of interest to tests.
    pub fn emit(&self, point: Point) -> Option<JoinHandle<()>> {
        if self.runtime.dry_run {
            info!("Not writing influx: {}", point.to_line_protocol());
            return None;
        }
        if self.runtime.verbose {
            debug!(
                "Influx point {} {} {:?}",
                point.tags.get("meter").map(String::as_str).unwrap_or("-"),
                point.timestamp,
                point.fields.get("value")
            );
        }

        let sink = self.sink.clone();
        Some(tokio::task::spawn_blocking(move || {
            if let Err(e) = sink.write(&point) {
                error!("{e}");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use chrono::TimeZone;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        points: StdMutex<Vec<Point>>,
        fail: bool,
    }

    impl TelemetrySink for Recorder {
        fn write(&self, point: &Point) -> AppResult<()> {
            self.points.lock().unwrap().push(point.clone());
            if self.fail {
                return Err(AppError::Telemetry("unreachable".into()));
            }
            Ok(())
        }
    }

    fn point() -> Point {
        Point {
            measurement: "meter".into(),
            tags: BTreeMap::from([("meter".to_string(), "solar".to_string())]),
            fields: BTreeMap::from([("value".to_string(), 1234.5), ("wattage".to_string(), 1000.0)]),
            timestamp: Utc.timestamp_opt(1_600_000_000, 5).unwrap(),
        }
    }

    #[test]
    fn line_protocol() {
        assert_eq!(
            point().to_line_protocol(),
            "meter,meter=solar value=1234.5,wattage=1000 1600000000000000005"
        );
    }

    #[test]
    fn line_protocol_escaping_and_non_finite() {
        let mut p = point();
        p.measurement = "my meter,x".into();
        p.tags = BTreeMap::from([("meter".to_string(), "a b=c".to_string())]);
        p.fields.insert("wattage".into(), f64::NAN);
        assert_eq!(
            p.to_line_protocol(),
            "my\\ meter\\,x,meter=a\\ b\\=c value=1234.5 1600000000000000005"
        );
    }

    #[tokio::test]
    async fn emit_writes_in_background() {
        let rec = Arc::new(Recorder::default());
        let emitter = TelemetryEmitter::new(rec.clone(), RuntimeConfig::default());
        emitter.emit(point()).unwrap().await.unwrap();
        assert_eq!(rec.points.lock().unwrap().as_slice(), &[point()]);
    }

    #[tokio::test]
    async fn sink_errors_are_swallowed() {
        let rec = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let emitter = TelemetryEmitter::new(rec.clone(), RuntimeConfig::default());
        assert!(emitter.emit(point()).unwrap().await.is_ok());
        assert_eq!(rec.points.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_only_logs() {
        let rec = Arc::new(Recorder::default());
        let runtime = RuntimeConfig {
            verbose: false,
            dry_run: true,
        };
        let emitter = TelemetryEmitter::new(rec.clone(), runtime);
        assert!(emitter.emit(point()).is_none());
        assert!(rec.points.lock().unwrap().is_empty());
    }

    #[test]
    fn influx_write_url() {
        let sink = InfluxSink::new(InfluxConfig {
            url: "http://localhost:8086/".into(),
            user: String::new(),
            password: String::new(),
            database: "homemeter".into(),
            timeout: Duration::from_secs(5),
        });
        assert_eq!(sink.write_url, "http://localhost:8086/write");
    }
}
// EOF
