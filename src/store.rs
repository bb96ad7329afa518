// store.rs

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use serde::de::DeserializeOwned;

use crate::*;

const STATE_EXT: &str = "json";
const TEMP_EXT: &str = "json.new";

/// Persisted projection of an energy meter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FerrarisState {
    #[serde(alias = "Meter")]
    pub reading: f64,
}

/// Persisted projection of the gas meter, including the calibration window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GasState {
    #[serde(alias = "Meter")]
    pub reading: f64,
    #[serde(rename = "minVal", alias = "MinVal")]
    pub min_val: i32,
    #[serde(rename = "maxVal", alias = "MaxVal")]
    pub max_val: i32,
}

/// Checks applied after a state file has been parsed.
pub trait PersistedState: Serialize + DeserializeOwned {
    fn validate(&self) -> Result<(), String>;
}

impl PersistedState for FerrarisState {
    fn validate(&self) -> Result<(), String> {
        check_reading(self.reading)
    }
}

impl PersistedState for GasState {
    fn validate(&self) -> Result<(), String> {
        check_reading(self.reading)?;
        if self.min_val > self.max_val {
            return Err(format!("minVal {} > maxVal {}", self.min_val, self.max_val));
        }
        Ok(())
    }
}

fn check_reading(reading: f64) -> Result<(), String> {
    if !reading.is_finite() || reading < 0.0 {
        return Err(format!("invalid reading {reading}"));
    }
    Ok(())
}

/// One JSON file per meter, replaced atomically on every save.
#[derive(Clone, Debug)]
pub struct StateStore {
    dir: PathBuf,
    runtime: RuntimeConfig,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>, runtime: RuntimeConfig) -> Self {
        Self {
            dir: dir.into(),
            runtime,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{STATE_EXT}"))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{TEMP_EXT}"))
    }

    /// `Ok(None)` when no state has been saved yet. A file that exists but
    /// cannot be parsed is an error, it is never silently replaced.
    pub fn load<T: PersistedState>(&self, name: &str) -> AppResult<Option<T>> {
        let path = self.path(name);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No state file {path:?}, starting fresh.");
                return Ok(None);
            }
            Err(e) => return Err(AppError::io(&path, e)),
        };

        let state = serde_json::from_slice::<T>(&bytes).map_err(|e| AppError::MalformedState {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        state
            .validate()
            .map_err(|reason| AppError::MalformedState { path: path.clone(), reason })?;
        info!("Restored state from {path:?}");
        Ok(Some(state))
    }

    pub fn save<T: PersistedState>(&self, name: &str, state: &T) -> AppResult<()> {
        let path = self.path(name);
        if self.runtime.dry_run {
            if self.runtime.verbose {
                info!("Not saving state {name} to {path:?} (test mode)");
            }
            return Ok(());
        }

        let temp = self.write_temp(name, state)?;
        fs::rename(&temp, &path).map_err(|e| AppError::io(&path, e))?;
        debug!("Saved state {name} to {path:?}");
        Ok(())
    }

    /// First half of a save: the complete new content lands next to the live file.
    fn write_temp<T: Serialize>(&self, name: &str, state: &T) -> AppResult<PathBuf> {
        let temp = self.temp_path(name);
        let json = serde_json::to_vec_pretty(state)?;
        write_synced(&temp, &json).map_err(|e| AppError::io(&temp, e))?;
        Ok(temp)
    }
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

// EOF
