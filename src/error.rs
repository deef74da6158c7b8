//! Error types for the RadonEye client.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::Command;
use crate::transport::TransportError;

/// Failures surfaced by device exchanges.
///
/// Cleanup failures after the link has already dropped are logged by the
/// client and never propagated, so the primary failure reason is what the
/// caller sees.
#[derive(Debug, Error)]
pub enum Error {
    /// No matching response arrived before the deadline.
    #[error("no response from device within {0:?}")]
    Timeout(Duration),

    /// The device answered under a different command code than the exchange
    /// expected.
    #[error("wrong packet type: expected {expected:?}, received code {actual:#04x}")]
    WrongPacketType {
        /// Command code the caller asked for.
        expected: Command,
        /// Command code carried by the frame that actually arrived.
        actual: u8,
    },

    /// The response command code has no registered packet descriptor.
    #[error("no packet registered for command code {0:#04x}")]
    UnknownCommand(u8),

    /// A frame or payload did not match its declared binary layout.
    #[error("malformed {record} payload: {reason}")]
    MalformedPayload {
        /// Record (or "frame") whose decode failed.
        record: &'static str,
        /// What was wrong with the bytes.
        reason: String,
    },

    /// The underlying BLE link failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    pub(crate) fn malformed(record: &'static str, reason: impl Into<String>) -> Self {
        Error::MalformedPayload {
            record,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_command_codes() {
        let err = Error::WrongPacketType {
            expected: Command::MeasQuery,
            actual: 0xAC,
        };
        assert!(err.to_string().contains("0xac"));

        let err = Error::UnknownCommand(0x42);
        assert!(err.to_string().contains("0x42"));
    }
}
