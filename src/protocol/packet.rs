//! Typed packet records and their binary codecs.
//!
//! Every record is a fixed little-endian layout with no padding. Decoders
//! consume their declared prefix and ignore any trailing bytes; a payload
//! shorter than the declared layout fails with a `MalformedPayload` error
//! rather than reading out of bounds. Text fields are strict UTF-8 (the
//! device emits ASCII); invalid byte sequences are rejected.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;

use super::command::{AlarmInterval, Command, Unit};
use crate::error::Error;

/// Bounds-checked little-endian reader over a payload slice.
struct ByteReader<'a> {
    record: &'static str,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(record: &'static str, buf: &'a [u8]) -> Self {
        Self {
            record,
            buf,
            pos: 0,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(Error::malformed(
                self.record,
                format!(
                    "need {} bytes at offset {}, payload is {} bytes",
                    n,
                    self.pos,
                    self.buf.len()
                ),
            ));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> Result<i8, Error> {
        Ok(self.take(1)?[0] as i8)
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32, Error> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Remaining bytes, consuming them.
    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    fn text(&mut self, n: usize) -> Result<String, Error> {
        let bytes = self.take(n)?;
        Self::utf8(self.record, bytes)
    }

    fn text_rest(&mut self) -> Result<String, Error> {
        let bytes = self.rest();
        Self::utf8(self.record, bytes)
    }

    fn utf8(record: &'static str, bytes: &[u8]) -> Result<String, Error> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| {
                Error::malformed(record, format!("invalid UTF-8 at byte {}", e.valid_up_to()))
            })
    }
}

/// Current, daily and monthly radon values plus pulse counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    /// Latest radon reading, in the device's configured unit.
    pub read_value: f32,
    /// One-day average.
    pub day_value: f32,
    /// One-month average.
    pub month_value: f32,
    pub pulse_count: u16,
    pub pulse_count_10_min: u16,
}

impl Measurement {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("measurement", payload);
        Ok(Self {
            read_value: r.f32()?,
            day_value: r.f32()?,
            month_value: r.f32()?,
            pulse_count: r.u16()?,
            pulse_count_10_min: r.u16()?,
        })
    }
}

/// Device health counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub device_status: u8,
    pub vib_status: u8,
    /// Seconds since the measurement process started.
    pub proc_time: u32,
    pub dc_value: u32,
    pub peak_value: f32,
}

impl Status {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("status", payload);
        Ok(Self {
            device_status: r.u8()?,
            vib_status: r.u8()?,
            proc_time: r.u32()?,
            dc_value: r.u32()?,
            peak_value: r.f32()?,
        })
    }
}

/// Manufacturing date and serial number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Serial {
    /// `YYYYMMDD` manufacturing date.
    pub date: String,
    pub serial: String,
}

impl Serial {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("serial", payload);
        Ok(Self {
            date: r.text(8)?,
            serial: r.text_rest()?,
        })
    }
}

/// Three-character serial type code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerialType {
    pub value: String,
}

impl SerialType {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("serial type", payload);
        Ok(Self { value: r.text(3)? })
    }
}

/// Device model name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelName {
    /// Leading byte with undocumented meaning, preserved as-is.
    pub val: u8,
    pub name: String,
}

impl ModelName {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("model name", payload);
        Ok(Self {
            val: r.u8()?,
            name: r.text_rest()?,
        })
    }
}

/// Display unit and alarm settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub unit: Unit,
    pub alarm_status: u8,
    pub alarm_value: f32,
    pub alarm_interval: AlarmInterval,
}

impl Config {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("config", payload);
        let unit_raw = r.u8()?;
        let alarm_status = r.u8()?;
        let alarm_value = r.f32()?;
        let interval_raw = r.u8()?;
        let unit = Unit::from_raw(unit_raw).ok_or_else(|| {
            Error::malformed("config", format!("unknown unit value {unit_raw:#04x}"))
        })?;
        let alarm_interval = AlarmInterval::from_raw(interval_raw).ok_or_else(|| {
            Error::malformed(
                "config",
                format!("unknown alarm interval {interval_raw:#04x}"),
            )
        })?;
        Ok(Self {
            unit,
            alarm_status,
            alarm_value,
            alarm_interval,
        })
    }
}

/// OLED configuration word. The query is defined by the firmware but does not
/// appear to work on real hardware; the decoder is registered regardless.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OledConfig {
    pub value: u32,
}

impl OledConfig {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("oled config", payload);
        Ok(Self { value: r.u32()? })
    }
}

/// Firmware version string plus an optional status word.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirmwareInfo {
    /// 64-byte version field, kept exactly as sent (including any padding).
    pub version: String,
    /// Present only in longer payloads; 0 when absent.
    pub status: u32,
}

impl FirmwareInfo {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("firmware info", payload);
        let version = r.text(64)?;
        let status = if payload.len() >= 68 { r.u32()? } else { 0 };
        Ok(Self { version, status })
    }
}

/// Sensor module identity and calibration factor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleConfig {
    pub device_type: u8,
    pub sn_date: u32,
    pub sn_no: u32,
    pub factor: f32,
}

impl ModuleConfig {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("module config", payload);
        Ok(Self {
            device_type: r.u8()?,
            sn_date: r.u32()?,
            sn_no: r.u32()?,
            factor: r.f32()?,
        })
    }
}

/// Module protection flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleProtection {
    pub protection_status: u32,
    pub operation_status: u32,
}

impl ModuleProtection {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("module protection", payload);
        Ok(Self {
            protection_status: r.u32()?,
            operation_status: r.u32()?,
        })
    }
}

/// Display calibration factor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayCalFactor {
    pub factor: f32,
}

impl DisplayCalFactor {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("display cal factor", payload);
        Ok(Self { factor: r.f32()? })
    }
}

/// Factory process mode settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductProcessMode {
    pub on_off: u8,
    pub time_hour: u8,
    pub bq: u16,
}

impl ProductProcessMode {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("product process mode", payload);
        Ok(Self {
            on_off: r.u8()?,
            time_hour: r.u8()?,
            bq: r.u16()?,
        })
    }
}

/// Size and checksum of the stored measurement history.
///
/// `data_no` drives the byte count of the log transfer (two bytes per
/// reading). The payload carries extra bytes past the checksum whose meaning
/// is undocumented; they are ignored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogInfo {
    /// Number of stored readings.
    pub data_no: u16,
    /// Transport checksum, kept for debugging; not verified.
    pub checksum: i8,
}

impl LogInfo {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut r = ByteReader::new("log info", payload);
        Ok(Self {
            data_no: r.u16()?,
            checksum: r.i8()?,
        })
    }
}

/// An outbound command carrying a payload body.
pub trait OutboundPacket {
    /// Command code written in the frame header.
    const COMMAND: Command;

    /// Exact payload bytes per the device's struct layout.
    fn payload(&self) -> Vec<u8>;
}

/// Encode an outbound packet into its on-wire frame:
/// `[code][payload length][payload]`.
pub fn encode_frame<P: OutboundPacket>(packet: &P) -> Vec<u8> {
    let payload = packet.payload();
    let mut buf = Vec::with_capacity(2 + payload.len());
    buf.push(P::COMMAND.code());
    buf.push(payload.len() as u8);
    buf.extend_from_slice(&payload);
    buf
}

/// Device clock setting. All fields are raw bytes; the year is two-digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTimeSet {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl OutboundPacket for DateTimeSet {
    const COMMAND: Command = Command::DateTimeSet;

    fn payload(&self) -> Vec<u8> {
        vec![
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        ]
    }
}

impl From<NaiveDateTime> for DateTimeSet {
    fn from(when: NaiveDateTime) -> Self {
        Self {
            year: (when.year().rem_euclid(100)) as u8,
            month: when.month() as u8,
            day: when.day() as u8,
            hour: when.hour() as u8,
            minute: when.minute() as u8,
            second: when.second() as u8,
        }
    }
}

/// Display unit selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSet {
    pub unit: Unit,
}

impl OutboundPacket for UnitSet {
    const COMMAND: Command = Command::UnitSet;

    fn payload(&self) -> Vec<u8> {
        vec![self.unit as u8]
    }
}

/// Alarm configuration. Packed to match the device's struct alignment:
/// `u8` status, little-endian `f32` threshold, `u8` interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmSet {
    pub status: u8,
    pub value: f32,
    pub interval: AlarmInterval,
}

impl OutboundPacket for AlarmSet {
    const COMMAND: Command = Command::AlarmSet;

    fn payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6);
        buf.push(self.status);
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.push(self.interval as u8);
        buf
    }
}
