// qmc5883l.rs

use embedded_hal::i2c::I2c;

use crate::*;

pub const QMC5883L_DEFAULT_ADDRESS: u8 = 0x0d;

// Registers
const REG_DATA_X_LSB: u8 = 0x00;
const REG_STATUS: u8 = 0x06;
const REG_CONTROL1: u8 = 0x09;
const REG_CONTROL2: u8 = 0x0a;
const REG_SET_RESET_PERIOD: u8 = 0x0b;

// Status bits
const STATUS_DRDY: u8 = 0x01;
const STATUS_OVL: u8 = 0x02;

// Control2
const SOFT_RESET: u8 = 0x80;
// recommended by the datasheet
const SET_RESET_PERIOD: u8 = 0x01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Qmc5883lMode {
    Standby = 0x00,
    Continuous = 0x01,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Qmc5883lRate {
    Hz10 = 0x00,
    Hz50 = 0x04,
    Hz100 = 0x08,
    Hz200 = 0x0c,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Qmc5883lRange {
    Gauss2 = 0x00,
    Gauss8 = 0x10,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Qmc5883lOversampling {
    Osr512 = 0x00,
    Osr256 = 0x40,
    Osr128 = 0x80,
    Osr64 = 0xc0,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Qmc5883lConfig {
    pub mode: Qmc5883lMode,
    pub rate: Qmc5883lRate,
    pub range: Qmc5883lRange,
    pub oversampling: Qmc5883lOversampling,
}

impl Default for Qmc5883lConfig {
    fn default() -> Self {
        Self {
            mode: Qmc5883lMode::Continuous,
            rate: Qmc5883lRate::Hz200,
            range: Qmc5883lRange::Gauss8,
            oversampling: Qmc5883lOversampling::Osr512,
        }
    }
}

impl Qmc5883lConfig {
    fn control1(&self) -> u8 {
        self.oversampling as u8 | self.range as u8 | self.rate as u8 | self.mode as u8
    }
}

pub struct Qmc5883l<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Qmc5883l<I> {
    /// Reset the chip and start sampling with `config`.
    pub fn new(i2c: I, address: u8, config: Qmc5883lConfig) -> Result<Self, SensorError> {
        let mut dev = Self { i2c, address };
        dev.write_reg(REG_CONTROL2, SOFT_RESET)?;
        dev.write_reg(REG_SET_RESET_PERIOD, SET_RESET_PERIOD)?;
        dev.write_reg(REG_CONTROL1, config.control1())?;
        info!("QMC5883L at 0x{address:02x} configured: {config:?}");
        Ok(dev)
    }

    pub fn release(self) -> I {
        self.i2c
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &[reg, value])
            .map_err(|e| SensorError::Read(format!("i2c write 0x{reg:02x}: {e:?}")))
    }

    fn read_regs(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        self.i2c
            .write_read(self.address, &[reg], buf)
            .map_err(|e| SensorError::Read(format!("i2c read 0x{reg:02x}: {e:?}")))
    }
}

impl<I: I2c + Send> FieldSensor for Qmc5883l<I> {
    fn read_raw(&mut self) -> Result<(i16, i16, i16), SensorError> {
        let mut status = [0u8; 1];
        self.read_regs(REG_STATUS, &mut status)?;
        if status[0] & STATUS_OVL != 0 {
            return Err(SensorError::Overflow);
        }
        if status[0] & STATUS_DRDY == 0 {
            return Err(SensorError::NotReady);
        }

        let mut data = [0u8; 6];
        self.read_regs(REG_DATA_X_LSB, &mut data)?;
        Ok((
            i16::from_le_bytes([data[0], data[1]]),
            i16::from_le_bytes([data[2], data[3]]),
            i16::from_le_bytes([data[4], data[5]]),
        ))
    }

    fn describe(&self) -> String {
        format!("i2c 0x{:02x}", self.address)
    }
}

// EOF
