//! BLE transport boundary.
//!
//! The protocol engine talks to the device through [`GattLink`], a thin
//! abstraction over the three characteristics of the radon service: write a
//! command, arm a notification sink, disarm it again. [`BleLink`] implements
//! it over btleplug; tests substitute an in-memory fake.
//!
//! ## Modules
//!
//! - [`connection`] - btleplug-backed link and characteristic resolution
//! - [`scanner`] - device discovery filtered by the advertised service

pub mod connection;
pub mod scanner;

pub use connection::{BleLink, LinkConfig};
pub use scanner::{default_adapter, scan, DiscoveredDevice};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// The three GATT channels of the radon service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkHandle {
    /// Write-only command channel.
    Control,
    /// Notify channel delivering one framed response per command.
    Response,
    /// Notify channel delivering raw log fragments.
    Log,
}

/// Callback invoked with each notification delivered on a subscribed channel.
pub type NotificationSink = Box<dyn FnMut(Vec<u8>) + Send>;

/// Link-level failures, distinct from protocol decode errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE stack error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("no Bluetooth adapter available")]
    NoAdapter,

    /// The device does not implement the expected service.
    #[error("device does not expose characteristic {uuid}")]
    CharacteristicMissing { uuid: Uuid },

    #[error("not connected")]
    NotConnected,

    /// The link went away while an exchange was waiting on it.
    #[error("connection lost mid-exchange")]
    ConnectionLost,

    #[error("link state lock poisoned")]
    Poisoned,
}

/// Client side of a connected GATT session.
///
/// At most one sink may be armed per channel at a time. The protocol layer
/// arms and disarms around every exchange and never overlaps them; arming an
/// already-armed channel is a caller contract violation.
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Connect and resolve the radon service characteristics.
    async fn connect(&self) -> Result<bool, TransportError>;

    async fn disconnect(&self) -> Result<bool, TransportError>;

    async fn is_connected(&self) -> bool;

    /// Bluetooth address of the peer.
    fn address(&self) -> String;

    /// Write raw bytes to a channel.
    async fn write(&self, handle: LinkHandle, bytes: &[u8]) -> Result<(), TransportError>;

    /// Arm `sink` to receive every notification delivered on `handle`.
    async fn subscribe(
        &self,
        handle: LinkHandle,
        sink: NotificationSink,
    ) -> Result<(), TransportError>;

    /// Disarm the sink on `handle`.
    async fn unsubscribe(&self, handle: LinkHandle) -> Result<(), TransportError>;
}
