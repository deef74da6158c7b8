//! Inbound packet registry.
//!
//! Maps each response command code to its decoder. The table is a static,
//! process-wide, read-only map populated at compile time; a code without a
//! descriptor is an `UnknownCommand` error, never a silent default.

use super::command::Command;
use super::packet::{
    Config, DisplayCalFactor, FirmwareInfo, LogInfo, Measurement, ModelName, ModuleConfig,
    ModuleProtection, OledConfig, ProductProcessMode, Serial, SerialType, Status,
};
use crate::error::Error;

/// A `[code][payload length][payload]` envelope as delivered on the response
/// characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub code: u8,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse a notification buffer into its frame parts.
    pub fn parse(buf: &'a [u8]) -> Result<Self, Error> {
        if buf.len() < 2 {
            return Err(Error::malformed(
                "frame",
                format!("{} bytes, header needs 2", buf.len()),
            ));
        }
        let code = buf[0];
        let len = usize::from(buf[1]);
        let payload = buf.get(2..2 + len).ok_or_else(|| {
            Error::malformed(
                "frame",
                format!(
                    "declares {} payload bytes, only {} present",
                    len,
                    buf.len() - 2
                ),
            )
        })?;
        Ok(Self { code, payload })
    }
}

/// Closed union of every record the device can send.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Measurement(Measurement),
    Status(Status),
    Serial(Serial),
    SerialType(SerialType),
    ModelName(ModelName),
    Config(Config),
    OledConfig(OledConfig),
    FirmwareInfo(FirmwareInfo),
    ModuleConfig(ModuleConfig),
    ModuleProtection(ModuleProtection),
    DisplayCalFactor(DisplayCalFactor),
    ProductProcessMode(ProductProcessMode),
    LogInfo(LogInfo),
}

impl Packet {
    /// Command code this packet arrives under.
    pub fn command(&self) -> Command {
        match self {
            Packet::Measurement(_) => Command::MeasQuery,
            Packet::Status(_) => Command::StatusQuery,
            Packet::Serial(_) => Command::SerialQuery,
            Packet::SerialType(_) => Command::SerialTypeQuery,
            Packet::ModelName(_) => Command::ModelNameReturn,
            Packet::Config(_) => Command::ConfigQuery,
            Packet::OledConfig(_) => Command::OledQuery,
            Packet::FirmwareInfo(_) => Command::FirmwareQuery,
            Packet::ModuleConfig(_) => Command::ModuleConfigQuery,
            Packet::ModuleProtection(_) => Command::ModuleProtectionReturn,
            Packet::DisplayCalFactor(_) => Command::DisplayCalFactorQuery,
            Packet::ProductProcessMode(_) => Command::ProductProcessModeQuery,
            Packet::LogInfo(_) => Command::LogInfoQuery,
        }
    }
}

type DecodeFn = fn(&[u8]) -> Result<Packet, Error>;

/// Associates an inbound command code with its decoder.
pub struct PacketDescriptor {
    pub command: Command,
    decode: DecodeFn,
}

/// One descriptor per inbound command code. Outbound-only codes (sets and the
/// log transfer trigger) have no entry on purpose.
static REGISTRY: &[PacketDescriptor] = &[
    PacketDescriptor {
        command: Command::MeasQuery,
        decode: |p| Measurement::decode(p).map(Packet::Measurement),
    },
    PacketDescriptor {
        command: Command::StatusQuery,
        decode: |p| Status::decode(p).map(Packet::Status),
    },
    PacketDescriptor {
        command: Command::SerialQuery,
        decode: |p| Serial::decode(p).map(Packet::Serial),
    },
    PacketDescriptor {
        command: Command::SerialTypeQuery,
        decode: |p| SerialType::decode(p).map(Packet::SerialType),
    },
    PacketDescriptor {
        command: Command::ModelNameReturn,
        decode: |p| ModelName::decode(p).map(Packet::ModelName),
    },
    PacketDescriptor {
        command: Command::ConfigQuery,
        decode: |p| Config::decode(p).map(Packet::Config),
    },
    PacketDescriptor {
        command: Command::OledQuery,
        decode: |p| OledConfig::decode(p).map(Packet::OledConfig),
    },
    PacketDescriptor {
        command: Command::FirmwareQuery,
        decode: |p| FirmwareInfo::decode(p).map(Packet::FirmwareInfo),
    },
    PacketDescriptor {
        command: Command::ModuleConfigQuery,
        decode: |p| ModuleConfig::decode(p).map(Packet::ModuleConfig),
    },
    PacketDescriptor {
        command: Command::ModuleProtectionReturn,
        decode: |p| ModuleProtection::decode(p).map(Packet::ModuleProtection),
    },
    PacketDescriptor {
        command: Command::DisplayCalFactorQuery,
        decode: |p| DisplayCalFactor::decode(p).map(Packet::DisplayCalFactor),
    },
    PacketDescriptor {
        command: Command::ProductProcessModeQuery,
        decode: |p| ProductProcessMode::decode(p).map(Packet::ProductProcessMode),
    },
    PacketDescriptor {
        command: Command::LogInfoQuery,
        decode: |p| LogInfo::decode(p).map(Packet::LogInfo),
    },
];

/// Find the descriptor registered for `code`.
pub fn lookup(code: u8) -> Result<&'static PacketDescriptor, Error> {
    REGISTRY
        .iter()
        .find(|d| d.command.code() == code)
        .ok_or(Error::UnknownCommand(code))
}

/// Dispatch a response payload through the registry by its command code.
pub fn decode(code: u8, payload: &[u8]) -> Result<Packet, Error> {
    let descriptor = lookup(code)?;
    (descriptor.decode)(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registered_codes_are_unique() {
        let mut seen = HashSet::new();
        for descriptor in REGISTRY {
            assert!(
                seen.insert(descriptor.command.code()),
                "duplicate descriptor for {:?}",
                descriptor.command
            );
        }
    }

    #[test]
    fn descriptors_decode_to_their_own_command() {
        // Minimal valid payload per record type, keyed by code.
        let fixtures: &[(u8, Vec<u8>)] = &[
            (0x50, vec![0u8; 16]),
            (0x51, vec![0u8; 14]),
            (0xA4, b"20230101SN".to_vec()),
            (0xA6, b"RU2".to_vec()),
            (0xA8, b"\x01RD200".to_vec()),
            (0xAC, vec![0x00, 0x00, 0x00, 0x00, 0x80, 0x3F, 0x01]),
            (0xAD, vec![0u8; 4]),
            (0xAF, vec![b'V'; 64]),
            (0xB1, vec![0u8; 13]),
            (0xB3, vec![0u8; 8]),
            (0xBD, vec![0u8; 4]),
            (0xC1, vec![0u8; 4]),
            (0xE8, vec![0x02, 0x00, 0x01]),
        ];
        assert_eq!(fixtures.len(), REGISTRY.len());
        for (code, payload) in fixtures {
            let packet = decode(*code, payload).unwrap();
            assert_eq!(packet.command().code(), *code);
        }
    }

    #[test]
    fn lookup_of_unregistered_code_fails() {
        assert!(matches!(lookup(0x42), Err(Error::UnknownCommand(0x42))));
        // Defined commands without an inbound decoder are unknown too.
        assert!(matches!(
            lookup(Command::UnitSet.code()),
            Err(Error::UnknownCommand(0xA2))
        ));
        assert!(matches!(
            lookup(Command::LogDataSend.code()),
            Err(Error::UnknownCommand(0xE9))
        ));
    }

    #[test]
    fn frame_parse_rejects_truncation() {
        assert!(matches!(
            Frame::parse(&[0x50]).unwrap_err(),
            Error::MalformedPayload { record: "frame", .. }
        ));
        assert!(matches!(
            Frame::parse(&[0x50, 0x05, 0x01, 0x02]).unwrap_err(),
            Error::MalformedPayload { record: "frame", .. }
        ));
    }

    #[test]
    fn frame_parse_slices_the_declared_payload() {
        let frame = Frame::parse(&[0xE8, 0x03, 0xAA, 0xBB, 0x7F, 0xFF, 0xFF]).unwrap();
        assert_eq!(frame.code, 0xE8);
        assert_eq!(frame.payload, &[0xAA, 0xBB, 0x7F]);
    }
}
