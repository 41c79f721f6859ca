//! Packets and packet types.
//!
//! A packet is an immutable value tagged by its packet type. The
//! routing layer owns a packet for the duration of a send, hands a
//! reference to every destination and drops it exactly once afterwards;
//! forwarding out of a container clones.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::FlowError;

/// A 32-bit integer with the range it is expected to stay in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntRange {
    pub value: i32,
    pub min: i32,
    pub max: i32,
    pub step: i32,
}

impl IntRange {
    pub fn new(value: i32) -> Self {
        IntRange {
            value,
            ..Default::default()
        }
    }
}

impl Default for IntRange {
    fn default() -> Self {
        IntRange {
            value: 0,
            min: i32::MIN,
            max: i32::MAX,
            step: 1,
        }
    }
}

/// A double with the range it is expected to stay in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatRange {
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl FloatRange {
    pub fn new(value: f64) -> Self {
        FloatRange {
            value,
            ..Default::default()
        }
    }
}

impl Default for FloatRange {
    fn default() -> Self {
        FloatRange {
            value: 0.0,
            min: -f64::MAX,
            max: f64::MAX,
            step: f64::MIN_POSITIVE,
        }
    }
}

/// A colour with per-channel maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
    pub red_max: u32,
    pub green_max: u32,
    pub blue_max: u32,
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb {
            red: 0,
            green: 0,
            blue: 0,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
        }
    }
}

/// A three component vector with the range its components stay in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for Direction {
    fn default() -> Self {
        Direction {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            min: -f64::MAX,
            max: f64::MAX,
        }
    }
}

/// A geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// The interesting parts of an http exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HttpResponse {
    pub response_code: i32,
    pub url: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Runtime identity of the value a port carries.
///
/// Two types are compatible iff they are equal; `Any` on a port accepts
/// every packet. Composed types are equal iff their child sequences are
/// element-wise equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    Any,
    Empty,
    Boolean,
    Byte,
    IntRange,
    FloatRange,
    String,
    Blob,
    Rgb,
    Direction,
    Location,
    Timestamp,
    HttpResponse,
    Error,
    Composed(Vec<PacketType>),
}

impl PacketType {
    /// Whether a port of this type accepts a packet of `packet_type`.
    pub fn accepts(&self, packet_type: &PacketType) -> bool {
        *self == PacketType::Any || self == packet_type
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            PacketType::Any => write!(fmt, "any"),
            PacketType::Empty => write!(fmt, "empty"),
            PacketType::Boolean => write!(fmt, "boolean"),
            PacketType::Byte => write!(fmt, "byte"),
            PacketType::IntRange => write!(fmt, "int"),
            PacketType::FloatRange => write!(fmt, "float"),
            PacketType::String => write!(fmt, "string"),
            PacketType::Blob => write!(fmt, "blob"),
            PacketType::Rgb => write!(fmt, "rgb"),
            PacketType::Direction => write!(fmt, "direction-vector"),
            PacketType::Location => write!(fmt, "location"),
            PacketType::Timestamp => write!(fmt, "timestamp"),
            PacketType::HttpResponse => write!(fmt, "http-response"),
            PacketType::Error => write!(fmt, "error"),
            PacketType::Composed(children) => {
                write!(fmt, "composed(")?;
                for (i, child) in children.iter().enumerate() {
                    if i != 0 {
                        write!(fmt, ",")?;
                    }
                    write!(fmt, "{child}")?;
                }
                write!(fmt, ")")
            }
        }
    }
}

/// A value on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Empty,
    Boolean(bool),
    Byte(u8),
    IntRange(IntRange),
    FloatRange(FloatRange),
    String(String),
    Blob(Vec<u8>),
    Rgb(Rgb),
    Direction(Direction),
    Location(Location),
    Timestamp(SystemTime),
    HttpResponse(HttpResponse),
    Error { code: i32, message: String },
    Composed(Vec<Packet>),
}

impl Packet {
    /// An integer packet with the default range.
    pub fn int_value(value: i32) -> Self {
        Packet::IntRange(IntRange::new(value))
    }

    /// A float packet with the default range.
    pub fn float_value(value: f64) -> Self {
        Packet::FloatRange(FloatRange::new(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Packet::String(value.into())
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Packet::Error {
            code,
            message: message.into(),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Empty => PacketType::Empty,
            Packet::Boolean(_) => PacketType::Boolean,
            Packet::Byte(_) => PacketType::Byte,
            Packet::IntRange(_) => PacketType::IntRange,
            Packet::FloatRange(_) => PacketType::FloatRange,
            Packet::String(_) => PacketType::String,
            Packet::Blob(_) => PacketType::Blob,
            Packet::Rgb(_) => PacketType::Rgb,
            Packet::Direction(_) => PacketType::Direction,
            Packet::Location(_) => PacketType::Location,
            Packet::Timestamp(_) => PacketType::Timestamp,
            Packet::HttpResponse(_) => PacketType::HttpResponse,
            Packet::Error { .. } => PacketType::Error,
            Packet::Composed(children) => {
                PacketType::Composed(children.iter().map(|c| c.packet_type()).collect())
            }
        }
    }

    fn wrong_type(&self, expected: PacketType) -> FlowError {
        FlowError::WrongType {
            expected: expected.to_string(),
            actual: self.packet_type().to_string(),
        }
    }

    pub fn as_boolean(&self) -> Result<bool, FlowError> {
        match self {
            Packet::Boolean(v) => Ok(*v),
            _ => Err(self.wrong_type(PacketType::Boolean)),
        }
    }

    pub fn as_byte(&self) -> Result<u8, FlowError> {
        match self {
            Packet::Byte(v) => Ok(*v),
            _ => Err(self.wrong_type(PacketType::Byte)),
        }
    }

    pub fn as_int_range(&self) -> Result<IntRange, FlowError> {
        match self {
            Packet::IntRange(v) => Ok(*v),
            _ => Err(self.wrong_type(PacketType::IntRange)),
        }
    }

    /// The value of an integer packet, range stripped.
    pub fn as_int(&self) -> Result<i32, FlowError> {
        self.as_int_range().map(|r| r.value)
    }

    pub fn as_float_range(&self) -> Result<FloatRange, FlowError> {
        match self {
            Packet::FloatRange(v) => Ok(*v),
            _ => Err(self.wrong_type(PacketType::FloatRange)),
        }
    }

    pub fn as_str(&self) -> Result<&str, FlowError> {
        match self {
            Packet::String(v) => Ok(v),
            _ => Err(self.wrong_type(PacketType::String)),
        }
    }

    pub fn as_blob(&self) -> Result<&[u8], FlowError> {
        match self {
            Packet::Blob(v) => Ok(v),
            _ => Err(self.wrong_type(PacketType::Blob)),
        }
    }

    pub fn as_rgb(&self) -> Result<Rgb, FlowError> {
        match self {
            Packet::Rgb(v) => Ok(*v),
            _ => Err(self.wrong_type(PacketType::Rgb)),
        }
    }

    pub fn as_direction(&self) -> Result<Direction, FlowError> {
        match self {
            Packet::Direction(v) => Ok(*v),
            _ => Err(self.wrong_type(PacketType::Direction)),
        }
    }

    pub fn as_location(&self) -> Result<Location, FlowError> {
        match self {
            Packet::Location(v) => Ok(*v),
            _ => Err(self.wrong_type(PacketType::Location)),
        }
    }

    pub fn as_timestamp(&self) -> Result<SystemTime, FlowError> {
        match self {
            Packet::Timestamp(v) => Ok(*v),
            _ => Err(self.wrong_type(PacketType::Timestamp)),
        }
    }

    pub fn as_http_response(&self) -> Result<&HttpResponse, FlowError> {
        match self {
            Packet::HttpResponse(v) => Ok(v),
            _ => Err(self.wrong_type(PacketType::HttpResponse)),
        }
    }

    pub fn as_error(&self) -> Result<(i32, &str), FlowError> {
        match self {
            Packet::Error { code, message } => Ok((*code, message)),
            _ => Err(self.wrong_type(PacketType::Error)),
        }
    }

    /// Children of a composed packet, in order.
    pub fn as_composed(&self) -> Result<&[Packet], FlowError> {
        match self {
            Packet::Composed(children) => Ok(children),
            _ => Err(self.wrong_type(PacketType::Composed(vec![]))),
        }
    }
}
