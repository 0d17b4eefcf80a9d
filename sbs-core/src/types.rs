//! Shared types, error enum, and the decoded BaseStation message for sbs-core.

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// All errors produced by sbs-core.
#[derive(Debug, Error)]
pub enum SbsError {
    #[error("too few fields: expected at least {expected}, got {actual}")]
    TooFewFields { expected: usize, actual: usize },
    #[error("unknown message type: {0:?}")]
    UnknownMessageType(String),
    #[error("unknown transmission type: {0:?}")]
    UnknownTransmissionType(String),
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("invalid {field} timestamp: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("invalid radio address: {0:?}")]
    InvalidAddress(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SbsError>;

// ---------------------------------------------------------------------------
// ICAO address helpers
// ---------------------------------------------------------------------------

/// 3-byte ICAO radio address. Stored as raw bytes so the table key is `Copy`.
pub type Icao = [u8; 3];

/// Format ICAO address as 6-char uppercase hex string.
pub fn icao_to_string(icao: &Icao) -> String {
    format!("{:02X}{:02X}{:02X}", icao[0], icao[1], icao[2])
}

/// Parse a 6-char hex string into an ICAO address.
pub fn icao_from_hex(hex: &str) -> Option<Icao> {
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let val = u32::from_str_radix(hex, 16).ok()?;
    Some([
        ((val >> 16) & 0xFF) as u8,
        ((val >> 8) & 0xFF) as u8,
        (val & 0xFF) as u8,
    ])
}

/// Serde helper: render an ICAO address as its hex string.
pub fn serialize_icao<S: Serializer>(icao: &Icao, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&icao_to_string(icao))
}

// ---------------------------------------------------------------------------
// Message and transmission types
// ---------------------------------------------------------------------------

/// First field of every BaseStation line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageType {
    /// Selection change.
    Sel,
    /// New id.
    Id,
    /// New aircraft.
    Air,
    /// Status change.
    Sta,
    /// Click.
    Clk,
    /// Transmission message from the aircraft.
    Msg,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Sel => "SEL",
            MessageType::Id => "ID",
            MessageType::Air => "AIR",
            MessageType::Sta => "STA",
            MessageType::Clk => "CLK",
            MessageType::Msg => "MSG",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SEL" => Some(MessageType::Sel),
            "ID" => Some(MessageType::Id),
            "AIR" => Some(MessageType::Air),
            "STA" => Some(MessageType::Sta),
            "CLK" => Some(MessageType::Clk),
            "MSG" => Some(MessageType::Msg),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Second field of a MSG line: which Mode-S/ADS-B transmission produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransmissionType {
    EsIdentification = 1,
    EsSurfacePosition = 2,
    EsAirbornePosition = 3,
    EsAirborneVelocity = 4,
    SurveillanceAltitude = 5,
    SurveillanceId = 6,
    AirToAir = 7,
    AllCallReply = 8,
}

impl TransmissionType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TransmissionType::EsIdentification),
            2 => Some(TransmissionType::EsSurfacePosition),
            3 => Some(TransmissionType::EsAirbornePosition),
            4 => Some(TransmissionType::EsAirborneVelocity),
            5 => Some(TransmissionType::SurveillanceAltitude),
            6 => Some(TransmissionType::SurveillanceId),
            7 => Some(TransmissionType::AirToAir),
            8 => Some(TransmissionType::AllCallReply),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }
}

// ---------------------------------------------------------------------------
// Decoded message
// ---------------------------------------------------------------------------

/// One decoded BaseStation line.
///
/// Optional fields are `None` when the transmission type does not carry
/// them. `None` is never the same as zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub message_type: MessageType,
    pub transmission_type: Option<TransmissionType>,
    pub session_id: Option<u32>,
    pub aircraft_id: Option<u32>,
    #[serde(serialize_with = "serialize_icao")]
    pub address: Icao,
    pub flight_id: Option<u32>,
    pub generated: NaiveDateTime,
    pub logged: NaiveDateTime,
    pub callsign: Option<String>,
    /// Feet.
    pub altitude: Option<i32>,
    /// Knots.
    pub ground_speed: Option<f64>,
    /// Degrees.
    pub track: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Feet per minute.
    pub vertical_rate: Option<i32>,
    pub squawk: Option<String>,
    pub alert: Option<bool>,
    pub emergency: Option<bool>,
    pub spi: Option<bool>,
    pub is_on_ground: Option<bool>,
}

impl Message {
    /// Position reported by this message, if it carries both coordinates.
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icao_roundtrip() {
        let icao = icao_from_hex("3965A3").unwrap();
        assert_eq!(icao, [0x39, 0x65, 0xA3]);
        assert_eq!(icao_to_string(&icao), "3965A3");
    }

    #[test]
    fn test_icao_rejects_bad_input() {
        assert!(icao_from_hex("").is_none());
        assert!(icao_from_hex("3965A").is_none());
        assert!(icao_from_hex("ZZZZZZ").is_none());
        assert!(icao_from_hex("+3965A").is_none());
        assert!(icao_from_hex("-3965A").is_none());
        assert!(icao_from_hex(" 3965A").is_none());
    }

    #[test]
    fn test_message_type_parse() {
        assert_eq!(MessageType::parse("MSG"), Some(MessageType::Msg));
        assert_eq!(MessageType::parse("sta"), Some(MessageType::Sta));
        assert_eq!(MessageType::parse("XYZ"), None);
        assert_eq!(MessageType::Clk.to_string(), "CLK");
    }

    #[test]
    fn test_transmission_type_codes() {
        for code in 1..=8 {
            assert_eq!(TransmissionType::from_code(code).unwrap().code(), code);
        }
        assert!(TransmissionType::from_code(0).is_none());
        assert!(TransmissionType::from_code(9).is_none());
    }
}
