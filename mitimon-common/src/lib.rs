//! # Shared Event Types (Event Source ↔ Monitor)
//!
//! Defines the notifications the monitor consumes. Producers (the replay
//! reader, or a live ETW bridge) and the monitor agree on these types, so they
//! live in their own crate the same way the kernel/userspace structures do in
//! a split tracer.
//!
//! ## Event Kinds
//!
//! - [`MonitorEvent::ProcessStart`] / [`MonitorEvent::ProcessStop`] - process lifecycle
//! - [`MonitorEvent::ImageLoad`] / [`MonitorEvent::ImageUnload`] - module lifecycle
//! - [`MonitorEvent::Mitigation`] - a security-mitigation failure with its
//!   captured stack and decoded property list
//!
//! ## Wire Format
//!
//! Events are serialized as JSON objects tagged by `"kind"`. Addresses accept
//! either integers or `"0x..."` hex strings and are always written back as hex.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ============================================================================
// Addresses
// ============================================================================

/// A raw virtual address as observed on the monitored system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub u64);

impl Address {
    /// Byte distance from `base` to this address, if `base` is not above it.
    #[must_use]
    pub fn offset_from(self, base: Address) -> Option<u64> {
        self.0.checked_sub(base.0)
    }

    #[must_use]
    pub fn wrapping_add(self, delta: u64) -> Address {
        Address(self.0.wrapping_add(delta))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl From<u64> for Address {
    fn from(raw: u64) -> Self {
        Address(raw)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{:x}", self.0))
    }
}

struct AddressVisitor;

impl Visitor<'_> for AddressVisitor {
    type Value = Address;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an unsigned integer or a hex string such as \"0x7ffe1000\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Address, E> {
        Ok(Address(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Address, E> {
        u64::try_from(v).map(Address).map_err(|_| E::custom(format!("negative address {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Address, E> {
        parse_u64(v).map(Address).ok_or_else(|| E::custom(format!("invalid address {v:?}")))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AddressVisitor)
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer.
#[must_use]
pub fn parse_u64(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// One notification delivered by the event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A process was created
    ProcessStart { pid: u32, image_name: String },

    /// A process exited
    ProcessStop { pid: u32 },

    /// An image was mapped into a process
    ///
    /// `image_name` is the raw identifier reported by the source: a DOS path,
    /// an NT device path (`\Device\HarddiskVolume1\...`) or a bare name.
    ImageLoad { pid: u32, image_base: Address, image_size: u64, image_name: String },

    /// An image was unmapped from a process
    ImageUnload { pid: u32, image_base: Address },

    /// A mitigation-failure event with its captured stack
    Mitigation(MitigationEvent),
}

impl MonitorEvent {
    /// Process the notification is about
    #[must_use]
    pub fn pid(&self) -> u32 {
        match self {
            MonitorEvent::ProcessStart { pid, .. }
            | MonitorEvent::ProcessStop { pid }
            | MonitorEvent::ImageLoad { pid, .. }
            | MonitorEvent::ImageUnload { pid, .. } => *pid,
            MonitorEvent::Mitigation(event) => event.pid,
        }
    }
}

/// Mitigation-failure event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MitigationEvent {
    pub task_name: String,
    pub event_id: u16,
    pub pid: u32,
    pub tid: u32,

    /// Event header says pointer-sized fields are 32 bits wide
    #[serde(default)]
    pub pointer_32bit: bool,

    #[serde(default)]
    pub properties: Vec<EventProperty>,

    /// Return addresses, innermost first
    #[serde(default)]
    pub stack: Vec<Address>,
}

// ============================================================================
// Typed Properties
// ============================================================================

/// Declared primitive type of an event property
///
/// Mirrors the subset of TDH input types the monitor knows how to render;
/// anything else is carried as [`PropertyType::Other`] with its raw code.
/// Wire names are the TDH names in lower case (`unicodestring`, `uint32`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    UnicodeString,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Pointer,
    FileTime,
    Other(u16),
}

impl PropertyType {
    /// TDH input type code, used when reporting unsupported types
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            PropertyType::UnicodeString => 1,
            PropertyType::Int8 => 2,
            PropertyType::UInt8 => 3,
            PropertyType::Int16 => 4,
            PropertyType::UInt16 => 5,
            PropertyType::Int32 => 6,
            PropertyType::UInt32 => 7,
            PropertyType::Int64 => 8,
            PropertyType::UInt64 => 9,
            PropertyType::Pointer => 16,
            PropertyType::FileTime => 17,
            PropertyType::Other(code) => code,
        }
    }
}

/// Decoded property value as delivered by the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Unsigned(u64),
    Signed(i64),
    Text(String),
}

impl PropertyValue {
    /// Integer view of the value; signed values keep their two's complement bits
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn as_bits(&self) -> Option<u64> {
        match self {
            PropertyValue::Unsigned(v) => Some(*v),
            PropertyValue::Signed(v) => Some(*v as u64),
            PropertyValue::Text(text) => parse_u64(text),
        }
    }
}

/// A named, typed event property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: PropertyType,
    pub value: PropertyValue,
}
