//! RD200 wire protocol.
//!
//! ## Modules
//!
//! - [`command`] - command codes and device enumerations
//! - [`packet`] - typed records and their binary codecs
//! - [`registry`] - response frame parsing and decoder dispatch
//!
//! Exchanges ride on three GATT characteristics of one service. The firmware
//! reuses the UUIDs of the Nordic LED Button Service reference design
//! unchanged, so the constants below must match bit-for-bit.

pub mod command;
pub mod packet;
pub mod registry;

pub use command::{AlarmInterval, Command, Unit};
pub use packet::{
    AlarmSet, Config, DateTimeSet, DisplayCalFactor, FirmwareInfo, LogInfo, Measurement, ModelName,
    ModuleConfig, ModuleProtection, OledConfig, OutboundPacket, ProductProcessMode, Serial,
    SerialType, Status, UnitSet,
};
pub use registry::{Frame, Packet};

use uuid::Uuid;

/// Primary GATT service advertised by the RD200
/// (`00001523-1212-efde-1523-785feabcd123`).
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x00001523_1212_efde_1523_785feabcd123);

/// Write characteristic carrying outbound command frames.
pub const CONTROL_UUID: Uuid = Uuid::from_u128(0x00001524_1212_efde_1523_785feabcd123);

/// Notify characteristic carrying one framed response per command.
pub const MEAS_UUID: Uuid = Uuid::from_u128(0x00001525_1212_efde_1523_785feabcd123);

/// Notify characteristic carrying raw log fragments, no frame wrapper.
pub const LOG_UUID: Uuid = Uuid::from_u128(0x00001526_1212_efde_1523_785feabcd123);
