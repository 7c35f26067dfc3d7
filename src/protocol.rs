//! Register scaling codec and protocol constants for the Jablotron Volta controller.
//!
//! The controller exposes every physical value as a raw 16-bit register. This module
//! holds the pure conversions between those raw words and the values they represent:
//! tenths of a unit (temperature, voltage, pressure, percentage, ratio), signed
//! two's-complement views, multi-register integers and IPv4/MAC addresses.
//!
//! Decoding never fails, any `u16` is a valid register value. Encoding only fails when
//! the value cannot be represented in a register at all.

use crate::register_map::Field;
use std::{fmt, net::Ipv4Addr, time::Duration};

/// Default Modbus TCP port of the controller.
pub const DEFAULT_PORT: u16 = 502;
/// Default Modbus unit identifier.
pub const DEFAULT_DEVICE_ID: u8 = 1;
/// Socket timeout applied to every Modbus transaction.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Holding register that unlocks the privileged register window.
pub const AUTH_REG_ADDR: u16 = 3001;
/// Password written to [`AUTH_REG_ADDR`].
pub const AUTH_PASSWORD: u16 = 5586;

/// First holding register of the window that requires authentication.
pub const PROTECTED_REG_MIN: u16 = 1000;
/// Last holding register of the window that requires authentication.
pub const PROTECTED_REG_MAX: u16 = 3999;

/// Writing `0` acknowledges the pending attention flags.
pub const ATTENTION_REG_ADDR: u16 = 1001;
/// Writing `1` restarts the controller.
pub const SYSTEM_RESET_REG_ADDR: u16 = 3003;
/// Writing `0` clears the stored error code.
pub const ERROR_CODE_REG_ADDR: u16 = 3004;

/// Errors raised while encoding values for the controller.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The string is not a dotted IPv4 address.
    #[error("Invalid IPv4 address '{0}', expected four dot-separated octets 0-255")]
    InvalidIpAddress(String),

    /// The value does not fit into a 16-bit register once scaled.
    #[error("Value {0} cannot be represented in a 16-bit register")]
    ValueOutOfRange(f32),

    /// The field cannot be written.
    #[error("Field '{0}' is read-only")]
    ReadOnlyField(Field),

    /// The value has the wrong kind for the field.
    #[error("Field '{field}' expects {expected}")]
    TypeMismatch {
        field: Field,
        expected: &'static str,
    },

    /// No field is known under this name.
    #[error("Unknown field '{0}'")]
    UnknownField(String),

    /// The text could not be parsed for the field.
    #[error("Invalid value '{value}' for field '{field}'")]
    InvalidValue { field: Field, value: String },

    /// The value lies outside the limits declared for the field.
    #[error("Value {value} for field '{field}' is outside {min}..={max}")]
    OutOfLimits {
        field: Field,
        value: f32,
        min: f32,
        max: f32,
    },
}

/// Number of register steps per physical unit.
///
/// The controller uses tenths for every scaled quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution(u16);

impl Resolution {
    /// 0.1 unit per register step.
    pub const TENTH: Resolution = Resolution(10);
    /// 1 unit per register step.
    pub const UNIT: Resolution = Resolution(1);

    /// Returns how many register steps make up one physical unit.
    pub const fn steps_per_unit(self) -> u16 {
        self.0
    }

    /// Returns the size of one register step in physical units.
    pub fn step(self) -> f32 {
        1.0 / self.0 as f32
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.step())
    }
}

/// Interprets a raw register as a two's-complement signed value.
pub const fn to_signed(raw: u16) -> i16 {
    raw as i16
}

/// Stores a signed value as its two's-complement register representation.
pub const fn to_unsigned(value: i16) -> u16 {
    value as u16
}

/// Decodes an unsigned scaled register, e.g. `455` -> `45.5` at [`Resolution::TENTH`].
pub fn decode_unsigned_scaled(raw: u16, resolution: Resolution) -> f32 {
    raw as f32 / resolution.steps_per_unit() as f32
}

/// Decodes a signed scaled register, e.g. `65516` -> `-2.0` at [`Resolution::TENTH`].
pub fn decode_signed_scaled(raw: u16, resolution: Resolution) -> f32 {
    to_signed(raw) as f32 / resolution.steps_per_unit() as f32
}

// Products closer than this to an integer are float noise, not a fraction of a step.
const SNAP_TOLERANCE: f32 = 1e-3;

/// Scales to register steps and truncates toward zero.
fn scale(value: f32, resolution: Resolution) -> f32 {
    let scaled = value * resolution.steps_per_unit() as f32;
    let nearest = scaled.round();
    let tolerance = SNAP_TOLERANCE.max(scaled.abs() * 4.0 * f32::EPSILON);
    if (scaled - nearest).abs() < tolerance {
        nearest
    } else {
        scaled.trunc()
    }
}

/// Encodes a non-negative physical value, e.g. `45.5` -> `455` at [`Resolution::TENTH`].
///
/// Fractions of a step are truncated toward zero. The field's declared limits are not
/// checked here.
pub fn encode_unsigned_scaled(value: f32, resolution: Resolution) -> Result<u16, Error> {
    let scaled = scale(value, resolution);
    if (0.0..=u16::MAX as f32).contains(&scaled) {
        Ok(scaled as u16)
    } else {
        Err(Error::ValueOutOfRange(value))
    }
}

/// Encodes a signed physical value in two's complement, e.g. `-2.0` -> `65516`.
pub fn encode_signed_scaled(value: f32, resolution: Resolution) -> Result<u16, Error> {
    let scaled = scale(value, resolution);
    if (i16::MIN as f32..=i16::MAX as f32).contains(&scaled) {
        Ok(to_unsigned(scaled as i16))
    } else {
        Err(Error::ValueOutOfRange(value))
    }
}

/// Joins a big-endian register pair into a 32-bit value.
pub const fn decode_uint32(reg_hi: u16, reg_lo: u16) -> u32 {
    ((reg_hi as u32) << 16) | reg_lo as u32
}

/// Decodes an IPv4 address stored as two registers, high byte first.
pub fn decode_ip(reg0: u16, reg1: u16) -> String {
    Ipv4Addr::from(decode_uint32(reg0, reg1)).to_string()
}

/// Encodes a dotted IPv4 address into two registers.
pub fn encode_ip(address: &str) -> Result<(u16, u16), Error> {
    let ip: Ipv4Addr = address
        .trim()
        .parse()
        .map_err(|_| Error::InvalidIpAddress(address.to_string()))?;
    let [a, b, c, d] = ip.octets();
    Ok((u16::from_be_bytes([a, b]), u16::from_be_bytes([c, d])))
}

/// Decodes a MAC address stored as three registers, e.g. `00:11:22:33:44:55`.
pub fn decode_mac(reg0: u16, reg1: u16, reg2: u16) -> String {
    [reg0, reg1, reg2]
        .iter()
        .flat_map(|reg| reg.to_be_bytes())
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Decodes a `major.minor.patch` version: major and minor are packed into the high and
/// low byte of the first register, patch is the following register.
pub fn decode_version(packed: u16, patch: u16) -> String {
    let [major, minor] = packed.to_be_bytes();
    format!("{major}.{minor}.{patch}")
}

/// A decoded register value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(untagged))]
pub enum Quantity {
    /// Scaled physical value (°C, V, bar, %, ratio).
    Float(f32),
    /// Counter, enumeration or multi-register integer.
    Integer(u32),
    /// State flag.
    Flag(bool),
    /// Address or version string.
    Text(String),
}

impl Quantity {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Quantity::Float(value) => Some(*value),
            Quantity::Integer(value) => Some(*value as f32),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Quantity::Integer(value) => Some(*value),
            Quantity::Flag(value) => Some(u32::from(*value)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Quantity::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Quantity::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Float(value) => write!(f, "{value:.1}"),
            Quantity::Integer(value) => write!(f, "{value}"),
            Quantity::Flag(true) => write!(f, "on"),
            Quantity::Flag(false) => write!(f, "off"),
            Quantity::Text(value) => write!(f, "{value}"),
        }
    }
}

/// Returns `true` if a holding register block touches the authenticated window.
pub fn is_protected(address: u16, quantity: u16) -> bool {
    let last = address.saturating_add(quantity.saturating_sub(1));
    address <= PROTECTED_REG_MAX && last >= PROTECTED_REG_MIN
}
