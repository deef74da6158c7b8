//! BLE client for the RadonEye RD200 radon detector.
//!
//! The RD200 exposes one GATT service with three characteristics: a write
//! channel for command frames, a notify channel delivering one framed
//! response per command, and a second notify channel that streams the stored
//! measurement history as raw fragments. This crate turns that transport
//! into a typed request/response API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        RadonEye                          │
//! │   (client facade - correlator, log assembler, accessors) │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │ transport │  │  protocol  │  │  config  │
//! │           │  │            │  │          │
//! │ - GATT    │  │ - commands │  │ - tunable│
//! │   link    │  │ - codecs   │  │   time-  │
//! │ - scanner │  │ - registry │  │   outs   │
//! └───────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use radoneye::RadonEye;
//!
//! # async fn run() -> Result<(), radoneye::Error> {
//! let mut devices = radoneye::discover(Duration::from_secs(5)).await?;
//! let device = RadonEye::new(devices.remove(0).peripheral);
//! device.connect().await?;
//!
//! let measurement = device.measurement().await?;
//! println!("radon: {}", measurement.read_value);
//!
//! let history = device.log().await?;
//! println!("{} stored readings", history.len());
//!
//! device.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::{discover, RadonEye};
pub use config::ClientConfig;
pub use error::Error;
pub use protocol::{
    AlarmInterval, Command, Config, FirmwareInfo, LogInfo, Measurement, ModelName, ModuleConfig,
    ModuleProtection, Packet, ProductProcessMode, Serial, Status, Unit,
};
pub use transport::{BleLink, DiscoveredDevice, GattLink, TransportError};
