//! Boundary of the platform symbol facility
//!
//! A [`SymbolProvider`] hands out one [`SymbolEngine`] per resolution session.
//! The engine is the stateful part: modules are loaded into it at a chosen
//! base, then addresses inside those modules resolve to symbols and source
//! lines. Dropping the engine releases everything still loaded in it.
//!
//! Every operation here may block on disk or network I/O, so engines are only
//! ever driven from resolver workers, never from the delivery thread.

// String formatting intentionally uses format! for clarity
#![allow(clippy::format_push_string)]

use std::fmt;
use std::path::{Path, PathBuf};

use crate::domain::{Address, ModuleHandle, Pid, SymbolError};

/// Identity of the debug-information file matching an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugIdentity {
    /// CodeView record of a PE image
    Pdb { file_name: String, guid: [u8; 16], age: u32 },

    /// GNU build-id note of an ELF image
    BuildId(Vec<u8>),

    /// The image carries its own debug information
    Embedded(PathBuf),
}

impl DebugIdentity {
    /// Symbol-store directory key: `GUID` (mixed-endian, upper hex) followed by the age
    ///
    /// Returns `None` for identities that are not stored under a GUID/age key.
    #[must_use]
    pub fn symstore_key(&self) -> Option<String> {
        let DebugIdentity::Pdb { guid, age, .. } = self else {
            return None;
        };

        let data1 = u32::from_le_bytes([guid[0], guid[1], guid[2], guid[3]]);
        let data2 = u16::from_le_bytes([guid[4], guid[5]]);
        let data3 = u16::from_le_bytes([guid[6], guid[7]]);
        let mut key = format!("{data1:08X}{data2:04X}{data3:04X}");
        for byte in &guid[8..] {
            key.push_str(&format!("{byte:02X}"));
        }
        key.push_str(&format!("{age:X}"));
        Some(key)
    }
}

impl fmt::Display for DebugIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugIdentity::Pdb { file_name, .. } => {
                write!(f, "{file_name} ({})", self.symstore_key().unwrap_or_default())
            }
            DebugIdentity::BuildId(id) => {
                f.write_str("build-id ")?;
                for byte in id {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            DebugIdentity::Embedded(path) => write!(f, "{}", path.display()),
        }
    }
}

/// What the engine reports about a loaded module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedModuleInfo {
    pub base: Address,
    pub image_size: u64,
}

/// Symbol covering an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolHit {
    pub name: String,
    /// Bytes from the symbol's start to the address
    pub displacement: u64,
}

/// Source line covering an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineHit {
    pub file: String,
    pub line: u32,
    /// Bytes from the first instruction of the line to the address
    pub displacement: u64,
}

/// Per-session native symbol context
pub trait SymbolEngine {
    /// Read the debug identity recorded in an image on disk
    ///
    /// # Errors
    /// Returns an error if the image cannot be read or parsed
    fn file_index_info(&self, image_path: &str) -> Result<DebugIdentity, SymbolError>;

    /// Locate (or fetch) the debug-information file for an identity
    ///
    /// # Errors
    /// Returns [`SymbolError::DebugFileNotFound`] when no store has it
    fn find_debug_file(&self, identity: &DebugIdentity) -> Result<PathBuf, SymbolError>;

    /// Load a module at `base`, or at its preferred base when `None`
    ///
    /// # Errors
    /// Returns an error if the image cannot be read or parsed
    fn load_module(
        &mut self,
        image_path: &str,
        module_name: &str,
        base: Option<Address>,
        debug_file: &Path,
    ) -> Result<ModuleHandle, SymbolError>;

    /// Describe a loaded module
    ///
    /// # Errors
    /// Returns [`SymbolError::ModuleNotLoaded`] for unknown handles
    fn module_info(&self, module: ModuleHandle) -> Result<LoadedModuleInfo, SymbolError>;

    fn unload_module(&mut self, module: ModuleHandle);

    fn symbol_from_addr(&self, address: Address) -> Option<SymbolHit>;

    fn line_from_addr(&self, address: Address) -> Option<LineHit>;

    /// Runtime address of `symbol` inside the loaded module called `module_name`
    fn symbol_from_name(&self, module_name: &str, symbol: &str) -> Option<Address>;
}

/// Factory for per-session engines; shared by all resolver workers
pub trait SymbolProvider: Send + Sync {
    type Engine: SymbolEngine;

    /// Initialize a fresh engine bound to the traced process `pid`
    ///
    /// # Errors
    /// Returns an error if the engine or its working directory cannot be set up
    fn create_engine(&self, pid: Pid) -> Result<Self::Engine, SymbolError>;
}
