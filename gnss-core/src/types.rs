//! Shared types, error enum, and decoded message types for gnss-core.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by gnss-core.
#[derive(Debug, Error)]
pub enum RtkError {
    #[error("no samples collected")]
    NoSamples,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RtkError>;

// ---------------------------------------------------------------------------
// Fix quality (NMEA GGA field 6, shared with the position file)
// ---------------------------------------------------------------------------

/// GGA fix quality indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FixQuality {
    Invalid = 0,
    Gps = 1,
    Dgps = 2,
    Pps = 3,
    RtkFixed = 4,
    RtkFloat = 5,
    Estimated = 6,
    Manual = 7,
    Simulation = 8,
}

impl FixQuality {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => FixQuality::Invalid,
            1 => FixQuality::Gps,
            2 => FixQuality::Dgps,
            3 => FixQuality::Pps,
            4 => FixQuality::RtkFixed,
            5 => FixQuality::RtkFloat,
            6 => FixQuality::Estimated,
            7 => FixQuality::Manual,
            8 => FixQuality::Simulation,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            FixQuality::Invalid => "Invalid",
            FixQuality::Gps => "GPS Fix",
            FixQuality::Dgps => "DGPS Fix",
            FixQuality::Pps => "PPS Fix",
            FixQuality::RtkFixed => "RTK Fix",
            FixQuality::RtkFloat => "Float RTK",
            FixQuality::Estimated => "Estimated",
            FixQuality::Manual => "Manual Input",
            FixQuality::Simulation => "Simulation",
        }
    }
}

impl fmt::Display for FixQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// Describe a raw fix quality code, including out-of-range values.
pub fn fix_quality_description(code: u8) -> String {
    match FixQuality::from_code(code) {
        Some(q) => q.description().to_string(),
        None => format!("Unknown ({code})"),
    }
}

// ---------------------------------------------------------------------------
// RTK solution tiers
// ---------------------------------------------------------------------------

/// Solution status tier reported by the RTK aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolutionStatus {
    None,
    Single,
    Dgps,
    Float,
    Fix,
}

impl SolutionStatus {
    /// Equivalent GGA fix quality.
    pub fn fix_quality(self) -> FixQuality {
        match self {
            SolutionStatus::None => FixQuality::Invalid,
            SolutionStatus::Single => FixQuality::Gps,
            SolutionStatus::Dgps => FixQuality::Dgps,
            SolutionStatus::Float => FixQuality::RtkFloat,
            SolutionStatus::Fix => FixQuality::RtkFixed,
        }
    }
}

impl fmt::Display for SolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolutionStatus::None => write!(f, "none"),
            SolutionStatus::Single => write!(f, "single"),
            SolutionStatus::Dgps => write!(f, "dgps"),
            SolutionStatus::Float => write!(f, "float"),
            SolutionStatus::Fix => write!(f, "fix"),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire protocols
// ---------------------------------------------------------------------------

/// Protocol tag assigned by the demultiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    Rtcm3,
    Ubx,
    Nmea,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Rtcm3 => write!(f, "RTCM3"),
            Protocol::Ubx => write!(f, "UBX"),
            Protocol::Nmea => write!(f, "NMEA"),
        }
    }
}

// ---------------------------------------------------------------------------
// Hex utilities
// ---------------------------------------------------------------------------

/// Decode a hex string into bytes. Case-insensitive, must be even length.
/// Whitespace between byte pairs is ignored.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = hex.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(digits.len() / 2);
    for chunk in digits.chunks(2) {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        bytes.push((high << 4) | low);
    }
    Some(bytes)
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Decoded message types
// ---------------------------------------------------------------------------

/// An NMEA-0183 sentence split into type and fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NmeaSentence {
    /// Talker + sentence id, e.g. `GNGGA`
    pub sentence_type: String,
    /// Fields after the type, in order
    pub fields: Vec<String>,
    /// Checksum text after `*`, if present
    pub checksum: Option<String>,
    /// Whether the transmitted checksum matches the computed one
    pub checksum_ok: Option<bool>,
    /// Structural validity (GGA needs at least 14 fields)
    pub valid: bool,
}

/// A CRC-validated RTCM3 frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RtcmMessage {
    /// 12-bit message number (1005, 1019, 1077, ...)
    pub message_type: u16,
    /// Payload length in bytes (10-bit field)
    pub length: usize,
    pub payload: Vec<u8>,
}

/// A checksum-validated UBX frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UbxMessage {
    pub class: u8,
    pub id: u8,
    pub length: u16,
    pub payload: Vec<u8>,
}

/// Union type for every decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "protocol")]
pub enum Message {
    Nmea(NmeaSentence),
    Rtcm(RtcmMessage),
    Ubx(UbxMessage),
}

impl Message {
    pub fn protocol(&self) -> Protocol {
        match self {
            Message::Nmea(_) => Protocol::Nmea,
            Message::Rtcm(_) => Protocol::Rtcm3,
            Message::Ubx(_) => Protocol::Ubx,
        }
    }

    /// Short key identifying the message kind, e.g. `GNGGA`, `RTCM 1077`, `UBX 01-07`.
    pub fn label(&self) -> String {
        match self {
            Message::Nmea(s) => s.sentence_type.clone(),
            Message::Rtcm(m) => format!("RTCM {}", m.message_type),
            Message::Ubx(m) => format!("UBX {:02X}-{:02X}", m.class, m.id),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_decode() {
        assert_eq!(hex_decode("D30013"), Some(vec![0xD3, 0x00, 0x13]));
        assert_eq!(hex_decode("d3 00 13"), Some(vec![0xD3, 0x00, 0x13]));
        assert_eq!(hex_decode("odd"), None);
        assert_eq!(hex_decode("ZZZZ"), None);
    }

    #[test]
    fn test_fix_quality_codes() {
        for code in 0..=8u8 {
            assert_eq!(FixQuality::from_code(code).unwrap().code(), code);
        }
        assert!(FixQuality::from_code(9).is_none());
        assert_eq!(fix_quality_description(4), "RTK Fix");
        assert_eq!(fix_quality_description(5), "Float RTK");
        assert_eq!(fix_quality_description(42), "Unknown (42)");
    }

    #[test]
    fn test_solution_status_mapping() {
        assert_eq!(SolutionStatus::Fix.fix_quality(), FixQuality::RtkFixed);
        assert_eq!(SolutionStatus::Float.fix_quality().code(), 5);
        assert_eq!(SolutionStatus::None.fix_quality().code(), 0);
    }

    #[test]
    fn test_message_label() {
        let msg = Message::Ubx(UbxMessage {
            class: 0x01,
            id: 0x07,
            length: 0,
            payload: vec![],
        });
        assert_eq!(msg.label(), "UBX 01-07");
        assert_eq!(msg.protocol(), Protocol::Ubx);
    }
}
