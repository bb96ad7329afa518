// bin/homemeter.rs

use clap::Parser;
use linux_embedded_hal::{sysfs_gpio::Direction, I2cdev, SysfsPin};
use tracing_subscriber::EnvFilter;

use homemeter::*;

fn main() -> anyhow::Result<()> {
    let opts = OptsCommon::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(opts.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting up homemeter {FW_VERSION}");
    let runtime = opts.runtime();
    if runtime.verbose {
        let influx = opts.influx();
        debug!(
            "InfluxURL {}, user {}, database {}, measurement {}",
            influx.url, influx.user, influx.database, opts.influx_measurement
        );
    }
    if runtime.dry_run {
        warn!("Test mode, no state files or InfluxDB writes");
    }

    let store = StateStore::new(&opts.state_dir, runtime);
    let emitter = TelemetryEmitter::new(Arc::new(InfluxSink::new(opts.influx())), runtime);

    let mut solar = FerrarisDetector::new(
        MeterIdentity::new("Solar", "Solar power", "kWh"),
        open_pin(opts.solar_pin, "Solar")?,
        opts.solar_rpkwh,
        &opts.influx_measurement,
        store.clone(),
    )?;
    solar.reset_meter(opts.solar)?;
    solar.print();

    let mut current = FerrarisDetector::new(
        MeterIdentity::new("Current", "Power consumption", "kWh"),
        open_pin(opts.current_pin, "Current")?,
        opts.current_rpkwh,
        &opts.influx_measurement,
        store.clone(),
    )?;
    current.reset_meter(opts.current)?;
    current.print();

    let i2c = I2cdev::new(&opts.i2c_bus)?;
    let magnetometer = Qmc5883l::new(i2c, opts.gas_address, Qmc5883lConfig::default())?;
    let mut gas = GasDetector::new(MeterIdentity::new("Gas", "Gas", "m³"), magnetometer, store, runtime)?;
    gas.reset_meter(opts.gas)?;
    gas.print();

    let mut registry = MeterRegistry::new();
    registry.add(SharedMeter::new(current))?;
    registry.add(SharedMeter::new(solar))?;
    registry.add(SharedMeter::new(gas))?;

    let notify = SdNotify::from_env();
    if let Some(sd) = notify.as_ref() {
        sd.ready()?;
        info!("Notified systemd, watchdog {:?}", sd.interval());
    }
    let liveness = notify.map(|sd| Box::new(sd) as Box<dyn Liveness>);

    let scheduler = Scheduler::new(&registry, emitter, liveness);

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async move {
            let api = async {
                if opts.no_api {
                    std::future::pending::<AppResult<()>>().await
                } else {
                    run_api_server(registry.clone(), &opts.addr).await
                }
            };

            info!("Entering main loop...");
            tokio::select! {
                res = scheduler.run() => {
                    error!("Poll loop ended.");
                    res?;
                }
                res = api => {
                    error!("run_api_server() ended.");
                    res?;
                }
                msg = registry.wait_fatal() => {
                    bail!("Fatal error: {msg}");
                }
            }
            Ok::<(), anyhow::Error>(())
        })?;

    info!("main() finished.");
    Ok(())
}

/// Exported sysfs GPIO as input. The pull-up comes from the device tree.
fn open_pin(number: u64, label: &str) -> anyhow::Result<PinInput<SysfsPin>> {
    let pin = SysfsPin::new(number);
    pin.export()?;
    pin.set_direction(Direction::In)?;
    Ok(PinInput::new(pin, format!("{label} gpio{number}")))
}
// EOF
