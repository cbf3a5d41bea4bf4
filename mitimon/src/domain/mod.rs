//! Identifiers and error types shared by the registry, symbol sessions and
//! the event pipeline
//!
//! Pids, tids and engine module handles are newtypes so they cannot be mixed
//! up with raw addresses or with each other.

pub mod errors;
pub mod types;

pub use types::{Address, ModuleHandle, Pid, Tid};

pub use errors::{EventError, LocateError, SymbolError};
