//! Structured error types for mitimon
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Registry mutations have no error type: duplicate or missing pids and bases
//! are silent no-ops reported through a `bool`.

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the symbol provider boundary
#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("No debug information file found for {0}")]
    DebugFileNotFound(String),

    #[error("Module handle {0} is not loaded")]
    ModuleNotLoaded(u64),

    #[error("Image {0} has no loadable sections")]
    EmptyImage(PathBuf),

    #[error("Cannot prepare symbol directory {path}: {source}")]
    SymbolDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Named failures of the base-recovery algorithm
///
/// None of these are retried automatically; the caller decides whether to try
/// again on a later observation.
#[derive(Error, Debug)]
pub enum LocateError {
    #[error("Reference module {module} could not be inspected: {source}")]
    NotFound {
        module: String,
        #[source]
        source: SymbolError,
    },

    #[error("Symbol {module}!{symbol} not found in reference module")]
    SymbolNotFound { module: String, symbol: String },

    #[error("Module {module} failed to load at guessed base 0x{base:x}: {source}")]
    VerificationFailed {
        module: String,
        base: u64,
        #[source]
        source: SymbolError,
    },
}

/// Failures reading an event stream
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Malformed event on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_error_display() {
        let err = LocateError::SymbolNotFound {
            module: "ntoskrnl".to_string(),
            symbol: "EtwWrite".to_string(),
        };
        assert_eq!(err.to_string(), "Symbol ntoskrnl!EtwWrite not found in reference module");
    }

    #[test]
    fn test_verification_failed_display() {
        let err = LocateError::VerificationFailed {
            module: "ntoskrnl".to_string(),
            base: 0xffff_f800_0000_0000,
            source: SymbolError::ModuleNotLoaded(3),
        };
        assert!(err.to_string().contains("0xfffff80000000000"));
    }

    #[test]
    fn test_event_error_line_number() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = EventError::Malformed { line: 7, source };
        assert!(err.to_string().starts_with("Malformed event on line 7"));
    }
}
