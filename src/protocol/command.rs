//! Command codes and device enumerations.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One-byte operation codes understood by the RD200.
///
/// Query codes double as the response codes keying the packet registry, with
/// one exception: a [`Command::ModuleProtectionQuery`] is answered under
/// [`Command::ModuleProtectionReturn`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    MeasQuery = 0x50,
    StatusQuery = 0x51,
    DateTimeSet = 0xA1,
    UnitSet = 0xA2,
    SerialQuery = 0xA4,
    SerialTypeQuery = 0xA6,
    ModelNameReturn = 0xA8,
    AlarmSet = 0xAA,
    ConfigQuery = 0xAC,
    /// Answered by the firmware but does not appear to work on real hardware.
    OledQuery = 0xAD,
    FirmwareQuery = 0xAF,
    ModuleConfigQuery = 0xB1,
    ModuleProtectionReturn = 0xB3,
    ModuleProtectionQuery = 0xB4,
    DisplayCalFactorQuery = 0xBD,
    ProductProcessModeQuery = 0xC1,
    EepromLongDataClear = 0xE0,
    LogInfoQuery = 0xE8,
    LogDataSend = 0xE9,
}

impl Command {
    /// Raw wire value of this command.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Error> {
        let command = match code {
            0x50 => Command::MeasQuery,
            0x51 => Command::StatusQuery,
            0xA1 => Command::DateTimeSet,
            0xA2 => Command::UnitSet,
            0xA4 => Command::SerialQuery,
            0xA6 => Command::SerialTypeQuery,
            0xA8 => Command::ModelNameReturn,
            0xAA => Command::AlarmSet,
            0xAC => Command::ConfigQuery,
            0xAD => Command::OledQuery,
            0xAF => Command::FirmwareQuery,
            0xB1 => Command::ModuleConfigQuery,
            0xB3 => Command::ModuleProtectionReturn,
            0xB4 => Command::ModuleProtectionQuery,
            0xBD => Command::DisplayCalFactorQuery,
            0xC1 => Command::ProductProcessModeQuery,
            0xE0 => Command::EepromLongDataClear,
            0xE8 => Command::LogInfoQuery,
            0xE9 => Command::LogDataSend,
            _ => return Err(Error::UnknownCommand(code)),
        };
        Ok(command)
    }
}

/// Radon unit shown on the device display.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    /// Picocuries per liter.
    PciL = 0,
    /// Becquerels per cubic meter.
    BqM3 = 1,
}

impl Unit {
    /// Map a raw config byte to a unit, `None` for out-of-set values.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Unit::PciL),
            1 => Some(Unit::BqM3),
            _ => None,
        }
    }
}

/// How often the device re-checks the alarm threshold.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmInterval {
    TenMinutes = 0x01,
    OneHour = 0x06,
    SixHours = 0x24,
}

impl AlarmInterval {
    /// Map a raw config byte to an interval, `None` for out-of-set values.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(AlarmInterval::TenMinutes),
            0x06 => Some(AlarmInterval::OneHour),
            0x24 => Some(AlarmInterval::SixHours),
            _ => None,
        }
    }
}
