//! BaseStation (SBS-1) line codec.
//!
//! A line is a comma-separated list of 22 positional tokens (indices 0..21).
//! Every position is mapped to a named attribute through [`FIELD_TABLE`];
//! empty tokens decode to `None`, and encoding always emits every position.
//!
//! ```text
//! MSG,3,1,1,4CA2C5,1,2024/03/01,12:00:00.000,2024/03/01,12:00:00.050,,37000,,,53.12,-2.30,,,0,0,0,0
//! ```

use std::fmt::Display;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::types::{
    icao_from_hex, icao_to_string, Message, MessageType, Result, SbsError, TransmissionType,
};

/// Number of positional tokens in a complete line.
pub const FIELD_COUNT: usize = 22;

/// Tokens every message type carries (type, ids, address, both timestamps).
pub const HEADER_FIELDS: usize = 10;

/// Minimum token count for a MSG line. Feeders commonly omit the final
/// IsOnGround token entirely.
pub const MSG_MIN_FIELDS: usize = 21;

const DATE_FORMAT: &str = "%Y/%m/%d";
const TIME_FORMAT_OUT: &str = "%H:%M:%S%.3f";
const TIME_FORMAT_IN: &str = "%H:%M:%S%.f";

// ---------------------------------------------------------------------------
// Field index table
// ---------------------------------------------------------------------------

/// Positional field of a BaseStation line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    MessageType,
    TransmissionType,
    SessionId,
    AircraftId,
    HexIdent,
    FlightId,
    DateGenerated,
    TimeGenerated,
    DateLogged,
    TimeLogged,
    Callsign,
    Altitude,
    GroundSpeed,
    Track,
    Latitude,
    Longitude,
    VerticalRate,
    Squawk,
    Alert,
    Emergency,
    Spi,
    IsOnGround,
}

/// Static position → name mapping, in wire order.
pub const FIELD_TABLE: [(Field, &str); FIELD_COUNT] = [
    (Field::MessageType, "message type"),
    (Field::TransmissionType, "transmission type"),
    (Field::SessionId, "session id"),
    (Field::AircraftId, "aircraft id"),
    (Field::HexIdent, "hex ident"),
    (Field::FlightId, "flight id"),
    (Field::DateGenerated, "date generated"),
    (Field::TimeGenerated, "time generated"),
    (Field::DateLogged, "date logged"),
    (Field::TimeLogged, "time logged"),
    (Field::Callsign, "callsign"),
    (Field::Altitude, "altitude"),
    (Field::GroundSpeed, "ground speed"),
    (Field::Track, "track"),
    (Field::Latitude, "latitude"),
    (Field::Longitude, "longitude"),
    (Field::VerticalRate, "vertical rate"),
    (Field::Squawk, "squawk"),
    (Field::Alert, "alert"),
    (Field::Emergency, "emergency"),
    (Field::Spi, "spi"),
    (Field::IsOnGround, "is on ground"),
];

impl Field {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        FIELD_TABLE[self.index()].1
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Split view over one line's tokens.
struct Tokens<'a> {
    tokens: Vec<&'a str>,
}

impl<'a> Tokens<'a> {
    /// Trimmed token, `None` if empty or beyond the end of the line.
    fn get(&self, field: Field) -> Option<&'a str> {
        self.tokens
            .get(field.index())
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
    }

    fn parse<T: FromStr>(&self, field: Field) -> Result<Option<T>> {
        match self.get(field) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| SbsError::InvalidField {
                field: field.name(),
                value: raw.to_string(),
            }),
        }
    }

    fn flag(&self, field: Field) -> Result<Option<bool>> {
        match self.get(field) {
            None => Ok(None),
            Some("0") => Ok(Some(false)),
            Some("1") | Some("-1") => Ok(Some(true)),
            Some(raw) => Err(SbsError::InvalidField {
                field: field.name(),
                value: raw.to_string(),
            }),
        }
    }

    fn text(&self, field: Field) -> Option<String> {
        self.get(field).map(str::to_string)
    }

    fn timestamp(&self, date: Field, time: Field) -> Result<NaiveDateTime> {
        let invalid = |field: Field| SbsError::InvalidTimestamp {
            field: field.name(),
            value: self.get(field).unwrap_or_default().to_string(),
        };
        let d = self
            .get(date)
            .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
            .ok_or_else(|| invalid(date))?;
        let t = self
            .get(time)
            .and_then(|s| NaiveTime::parse_from_str(s, TIME_FORMAT_IN).ok())
            .ok_or_else(|| invalid(time))?;
        Ok(d.and_time(t))
    }
}

/// Decode one BaseStation line into a [`Message`].
///
/// A trailing `\r`/`\n` is tolerated. Any unparsable non-empty token fails
/// the whole line.
pub fn decode(line: &str) -> Result<Message> {
    let line = line.trim_end_matches(['\r', '\n']);
    let tokens = Tokens {
        tokens: line.split(',').collect(),
    };
    let count = tokens.tokens.len();
    if count < HEADER_FIELDS {
        return Err(SbsError::TooFewFields {
            expected: HEADER_FIELDS,
            actual: count,
        });
    }

    let raw_type = tokens.get(Field::MessageType).unwrap_or_default();
    let message_type = MessageType::parse(raw_type)
        .ok_or_else(|| SbsError::UnknownMessageType(raw_type.to_string()))?;

    if message_type == MessageType::Msg && count < MSG_MIN_FIELDS {
        return Err(SbsError::TooFewFields {
            expected: MSG_MIN_FIELDS,
            actual: count,
        });
    }

    let transmission_type = match tokens.get(Field::TransmissionType) {
        None if message_type != MessageType::Msg => None,
        raw => Some(
            raw.and_then(|s| s.parse::<u8>().ok())
                .and_then(TransmissionType::from_code)
                .ok_or_else(|| {
                    SbsError::UnknownTransmissionType(raw.unwrap_or_default().to_string())
                })?,
        ),
    };

    let raw_address = tokens.get(Field::HexIdent).unwrap_or_default();
    let address =
        icao_from_hex(raw_address).ok_or_else(|| SbsError::InvalidAddress(raw_address.into()))?;

    Ok(Message {
        message_type,
        transmission_type,
        session_id: tokens.parse(Field::SessionId)?,
        aircraft_id: tokens.parse(Field::AircraftId)?,
        address,
        flight_id: tokens.parse(Field::FlightId)?,
        generated: tokens.timestamp(Field::DateGenerated, Field::TimeGenerated)?,
        logged: tokens.timestamp(Field::DateLogged, Field::TimeLogged)?,
        callsign: tokens.text(Field::Callsign),
        altitude: tokens.parse(Field::Altitude)?,
        ground_speed: tokens.parse(Field::GroundSpeed)?,
        track: tokens.parse(Field::Track)?,
        latitude: tokens.parse(Field::Latitude)?,
        longitude: tokens.parse(Field::Longitude)?,
        vertical_rate: tokens.parse(Field::VerticalRate)?,
        squawk: tokens.text(Field::Squawk),
        alert: tokens.flag(Field::Alert)?,
        emergency: tokens.flag(Field::Emergency)?,
        spi: tokens.flag(Field::Spi)?,
        is_on_ground: tokens.flag(Field::IsOnGround)?,
    })
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

fn opt<T: Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

fn flag(value: Option<bool>) -> String {
    match value {
        Some(true) => "1".into(),
        Some(false) => "0".into(),
        None => String::new(),
    }
}

/// Encode a [`Message`] as a line of exactly [`FIELD_COUNT`] tokens (no
/// trailing newline).
pub fn encode(msg: &Message) -> String {
    let mut tokens: [String; FIELD_COUNT] = Default::default();
    let mut set = |field: Field, value: String| tokens[field.index()] = value;

    set(Field::MessageType, msg.message_type.as_str().into());
    set(Field::TransmissionType, opt(&msg.transmission_type.map(|t| t.code())));
    set(Field::SessionId, opt(&msg.session_id));
    set(Field::AircraftId, opt(&msg.aircraft_id));
    set(Field::HexIdent, icao_to_string(&msg.address));
    set(Field::FlightId, opt(&msg.flight_id));
    set(Field::DateGenerated, msg.generated.format(DATE_FORMAT).to_string());
    set(Field::TimeGenerated, msg.generated.format(TIME_FORMAT_OUT).to_string());
    set(Field::DateLogged, msg.logged.format(DATE_FORMAT).to_string());
    set(Field::TimeLogged, msg.logged.format(TIME_FORMAT_OUT).to_string());
    set(Field::Callsign, opt(&msg.callsign));
    set(Field::Altitude, opt(&msg.altitude));
    set(Field::GroundSpeed, opt(&msg.ground_speed));
    set(Field::Track, opt(&msg.track));
    set(Field::Latitude, opt(&msg.latitude));
    set(Field::Longitude, opt(&msg.longitude));
    set(Field::VerticalRate, opt(&msg.vertical_rate));
    set(Field::Squawk, opt(&msg.squawk));
    set(Field::Alert, flag(msg.alert));
    set(Field::Emergency, flag(msg.emergency));
    set(Field::Spi, flag(msg.spi));
    set(Field::IsOnGround, flag(msg.is_on_ground));

    tokens.join(",")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
