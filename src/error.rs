// error.rs

use std::path::Path;

use crate::*;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed state file {path}: {reason}")]
    MalformedState { path: PathBuf, reason: String },
    #[error("Sensor fault on {meter}: {failures} consecutive read failures")]
    SensorFault { meter: String, failures: u32 },
    #[error("Value {value:.3} rejected, must be larger than {current:.3}")]
    ValueTooSmall { value: f64, current: f64 },
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Unknown meter '{0}'")]
    UnknownMeter(String),
    #[error("Telemetry error: {0}")]
    Telemetry(String),
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
    #[error("Address parse error: {0}")]
    AddrParse(#[from] net::AddrParseError),
    #[error("{0}")]
    Message(String),
}

impl AppError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        AppError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Errors that must end the process so the supervisor can take over.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Io { .. } | AppError::MalformedState { .. } | AppError::SensorFault { .. } | AppError::Json(_)
        )
    }
}

// EOF
