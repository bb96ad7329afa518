// lib.rs

pub use std::{collections::BTreeMap, net, path::PathBuf, sync::Arc};

pub use anyhow::bail;
pub use askama::Template;
pub use chrono::{DateTime, Utc};
pub use log::*;
pub use serde::{Deserialize, Serialize};
pub use tokio::sync::Mutex;
pub use tokio::time::{sleep, Duration, Instant};

pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Poll cadence of the scheduler, also the only debounce the edge detectors get.
pub const POLL_TICK: Duration = Duration::from_millis(50);

/// Longest time a meter goes without a telemetry point.
pub const INFLUX_WRITE_INTERVAL: Duration = Duration::from_secs(30);

mod error;
pub use error::*;

mod config;
pub use config::*;

mod reading;
pub use reading::*;

mod store;
pub use store::*;

mod sensor;
pub use sensor::*;

mod qmc5883l;
pub use qmc5883l::*;

mod meter;
pub use meter::*;

mod ferraris;
pub use ferraris::*;

mod gas;
pub use gas::*;

mod telemetry;
pub use telemetry::*;

mod watchdog;
pub use watchdog::*;

mod scheduler;
pub use scheduler::*;

mod apiserver;
pub use apiserver::*;

// EOF
