// sensor.rs

use embedded_hal::digital::InputPin;

use crate::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    /// Idle level of the pulled-up input.
    High,
}

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Sensor read failed: {0}")]
    Read(String),
    #[error("Sensor data not ready")]
    NotReady,
    #[error("Sensor measurement overflow")]
    Overflow,
}

/// Digital level source, configured as input with pull-up by its owner.
pub trait DigitalInput: Send {
    fn read_level(&mut self) -> Result<PinLevel, SensorError>;

    fn describe(&self) -> String {
        String::from("pin")
    }
}

/// Raw 3-axis magnetic field source.
pub trait FieldSensor: Send {
    fn read_raw(&mut self) -> Result<(i16, i16, i16), SensorError>;

    fn describe(&self) -> String {
        String::from("magnetometer")
    }
}

/// Any embedded-hal input pin as a level source.
pub struct PinInput<P> {
    pin: P,
    label: String,
}

impl<P: InputPin> PinInput<P> {
    pub fn new(pin: P, label: impl Into<String>) -> Self {
        Self {
            pin,
            label: label.into(),
        }
    }
}

impl<P: InputPin + Send> DigitalInput for PinInput<P> {
    fn read_level(&mut self) -> Result<PinLevel, SensorError> {
        match self.pin.is_high() {
            Ok(true) => Ok(PinLevel::High),
            Ok(false) => Ok(PinLevel::Low),
            Err(e) => Err(SensorError::Read(format!("{e:?}"))),
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

// EOF
