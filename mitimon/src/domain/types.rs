//! Identifier newtypes
//!
//! Event payloads carry raw `u32` ids; they are wrapped at the registry
//! boundary. Addresses come from the shared event crate.

use std::fmt;

pub use mitimon_common::Address;

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Pid(pid)
    }
}

/// Thread ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

impl From<u32> for Tid {
    fn from(tid: u32) -> Self {
        Tid(tid)
    }
}

/// Handle of a module opened inside one symbol engine context
///
/// Only meaningful to the engine that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Pid(1234).to_string(), "PID:1234");
        assert_eq!(Tid(8).to_string(), "TID:8");
    }
}
