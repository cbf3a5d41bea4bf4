//! Report formatting
//!
//! One report per mitigation failure:
//!
//! ```text
//!
//!
//! TaskName ProhibitDynamicCode
//! EventId 10
//! ProcessId 0x00001a2c
//! ThreadId 0x00000f04
//!
//! Call Stack:
//!    0xfffff8071a745a3c ntoskrnl+0x345a3c ntoskrnl!EtwWrite+0x2c
//!    0x00007ffe12345678 ntdll+0x5678
//!
//! Properties:
//!    ProcessName "firefox.exe"
//!    ProcessId 0x00001a2c
//!
//! ```

use std::io::{self, Write};

use crate::domain::{Pid, Tid};
use crate::symbolization::{SymbolEngine, SymbolSession};
use mitimon_common::{EventProperty, MitigationEvent, PropertyType, PropertyValue};

/// Indentation of call-stack and property lines
const INDENT: &str = "   ";

/// Fully resolved mitigation-failure report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub task_name: String,
    pub event_id: u16,
    pub pid: Pid,
    pub tid: Tid,
    pub call_stack: Vec<String>,
    pub properties: Vec<String>,
}

impl Report {
    /// Symbolicate every stack entry of `event` through `session`
    pub fn build<E: SymbolEngine>(session: &mut SymbolSession<E>, event: &MitigationEvent) -> Self {
        let call_stack = event.stack.iter().map(|&address| session.symbolicate(address)).collect();
        let properties =
            event.properties.iter().map(|prop| format_property(prop, event.pointer_32bit)).collect();

        Self {
            task_name: event.task_name.clone(),
            event_id: event.event_id,
            pid: Pid(event.pid),
            tid: Tid(event.tid),
            call_stack,
            properties,
        }
    }

    /// Write the report in one go
    ///
    /// # Errors
    /// Returns any error of the underlying writer
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out)?;
        writeln!(out, "TaskName {}", self.task_name)?;
        writeln!(out, "EventId {}", self.event_id)?;
        writeln!(out, "ProcessId 0x{:08x}", self.pid.0)?;
        writeln!(out, "ThreadId 0x{:08x}", self.tid.0)?;
        writeln!(out)?;

        writeln!(out, "Call Stack:")?;
        for frame in &self.call_stack {
            writeln!(out, "{INDENT}{frame}")?;
        }
        writeln!(out)?;

        if !self.properties.is_empty() {
            writeln!(out, "Properties:")?;
            for property in &self.properties {
                writeln!(out, "{INDENT}{property}")?;
            }
            writeln!(out)?;
        }
        out.flush()
    }
}

/// Render one property as `name value`
///
/// Pointers take the width given by the event header flag. Integers are
/// zero-padded hex of their declared width; wider values are truncated.
#[must_use]
pub fn format_property(property: &EventProperty, pointer_32bit: bool) -> String {
    let ty = match property.ty {
        PropertyType::Pointer if pointer_32bit => PropertyType::UInt32,
        PropertyType::Pointer => PropertyType::UInt64,
        other => other,
    };

    let value = match ty {
        PropertyType::UnicodeString => match &property.value {
            PropertyValue::Text(text) => format!("\"{text}\""),
            PropertyValue::Unsigned(v) => format!("\"{v}\""),
            PropertyValue::Signed(v) => format!("\"{v}\""),
        },
        PropertyType::Int8 | PropertyType::UInt8 => hex_of_width(&property.value, 2),
        PropertyType::Int16 | PropertyType::UInt16 => hex_of_width(&property.value, 4),
        PropertyType::Int32 | PropertyType::UInt32 => hex_of_width(&property.value, 8),
        PropertyType::Int64 | PropertyType::UInt64 | PropertyType::FileTime => {
            hex_of_width(&property.value, 16)
        }
        PropertyType::Pointer | PropertyType::Other(_) => unsupported(ty),
    };

    format!("{} {value}", property.name)
}

fn hex_of_width(value: &PropertyValue, digits: usize) -> String {
    let Some(bits) = value.as_bits() else {
        return format!("? <unparsable value {value:?}>");
    };
    let masked = if digits >= 16 { bits } else { bits & ((1u64 << (digits * 4)) - 1) };
    format!("0x{masked:0digits$x}")
}

fn unsupported(ty: PropertyType) -> String {
    format!("? <unsupported data type {}>", ty.code())
}
