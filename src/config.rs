// config.rs

use clap::Parser;

use crate::*;

pub const DEFAULT_API_ADDR: &str = "0.0.0.0:1718";
pub const DEFAULT_INFLUX_URL: &str = "http://192.168.1.56:8086";
pub const DEFAULT_INFLUX_USER: &str = "homemeter";
pub const DEFAULT_INFLUX_DB: &str = "homemeter";
pub const DEFAULT_INFLUX_MEASUREMENT: &str = "meter";

pub const DEFAULT_SOLAR_PIN: u64 = 17;
pub const DEFAULT_SOLAR_RPKWH: u32 = 375;
pub const DEFAULT_CURRENT_PIN: u64 = 27;
pub const DEFAULT_CURRENT_RPKWH: u32 = 75;
pub const DEFAULT_I2C_BUS: &str = "/dev/i2c-1";

#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct OptsCommon {
    /// Provide more debugging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Do not write state files or InfluxDB, only log what would be written
    #[arg(short, long)]
    pub test: bool,

    /// Directory holding the per-meter state files
    #[arg(long, env = "STATE_DIR", default_value = ".")]
    pub state_dir: PathBuf,

    #[arg(long, env = "INFLUX_URL", default_value = DEFAULT_INFLUX_URL)]
    pub influx_url: String,
    #[arg(long, env = "INFLUX_USER", default_value = DEFAULT_INFLUX_USER)]
    pub influx_user: String,
    #[arg(long, env = "INFLUX_PASSWORD", default_value = "", hide_env_values = true)]
    pub influx_password: String,
    #[arg(long, env = "INFLUX_DB", default_value = DEFAULT_INFLUX_DB)]
    pub influx_db: String,
    /// Measurement name for the energy meters
    #[arg(long, env = "INFLUX_MEASUREMENT", default_value = DEFAULT_INFLUX_MEASUREMENT)]
    pub influx_measurement: String,

    /// Solar meter value, applied once at startup when > 0
    #[arg(long, default_value_t = 0.0)]
    pub solar: f64,
    /// Current meter value, applied once at startup when > 0
    #[arg(long, default_value_t = 0.0)]
    pub current: f64,
    /// Gas meter value, applied once at startup when > 0
    #[arg(long, default_value_t = 0.0)]
    pub gas: f64,

    #[arg(long, default_value_t = DEFAULT_SOLAR_PIN)]
    pub solar_pin: u64,
    #[arg(long, default_value_t = DEFAULT_SOLAR_RPKWH)]
    pub solar_rpkwh: u32,
    #[arg(long, default_value_t = DEFAULT_CURRENT_PIN)]
    pub current_pin: u64,
    #[arg(long, default_value_t = DEFAULT_CURRENT_RPKWH)]
    pub current_rpkwh: u32,

    #[arg(long, default_value = DEFAULT_I2C_BUS)]
    pub i2c_bus: String,
    #[arg(long, default_value_t = QMC5883L_DEFAULT_ADDRESS, value_parser = parse_i2c_address)]
    pub gas_address: u8,

    /// HTTP service address
    #[arg(long, env = "API_ADDR", default_value = DEFAULT_API_ADDR)]
    pub addr: String,
    /// Do not start the HTTP service
    #[arg(long)]
    pub no_api: bool,
}

impl OptsCommon {
    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            verbose: self.verbose,
            dry_run: self.test,
        }
    }

    pub fn influx(&self) -> InfluxConfig {
        InfluxConfig {
            url: self.influx_url.clone(),
            user: self.influx_user.clone(),
            password: self.influx_password.clone(),
            database: self.influx_db.clone(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

fn parse_i2c_address(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|e| format!("invalid I2C address {s:?}: {e}"))
}

/// Process-wide switches, handed to every component that needs them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub verbose: bool,
    /// Skip persistence, telemetry writes and the gas dropout fault.
    pub dry_run: bool,
}

#[derive(Clone, Debug)]
pub struct InfluxConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub timeout: Duration,
}

// EOF
