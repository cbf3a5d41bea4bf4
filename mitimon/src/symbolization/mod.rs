//! # Symbol Resolution and Address Translation
//!
//! Turns raw return addresses from a mitigation event's stack into
//! `module!symbol+displacement file:line` strings.
//!
//! ## Moving Parts
//!
//! ```text
//!   ProcessRecord snapshot ──┐
//!                            ▼
//!                   ┌─────────────────┐   load / lookup   ┌──────────────────┐
//!                   │  SymbolSession  │──────────────────▶│   SymbolEngine   │
//!                   │  (memo by base) │                   │ (per session)    │
//!                   └─────────────────┘                   └──────────────────┘
//!                            │                                     │
//!                            │ unannounced module                  │ debug files
//!                            ▼                                     ▼
//!                   ┌─────────────────┐                   ┌──────────────────┐
//!                   │  base_recovery  │                   │   SymbolStore    │
//!                   └─────────────────┘                   └──────────────────┘
//! ```
//!
//! - **`provider`**: the boundary traits ([`SymbolProvider`], [`SymbolEngine`])
//!   the rest of the crate programs against
//! - **`object_engine`**: the shipped engine; symbol tables and exports via
//!   `object`, source lines via `addr2line`/`gimli`
//! - **`symbol_store`**: where debug files are looked for
//! - **`session`**: per-event resolution state and the four-step degradation
//! - **`base_recovery`**: page-alignment arithmetic that recovers a module
//!   base from one observed address
//!
//! ## Address Translation
//!
//! ```text
//! 1. Stack entry 0xfffff8071a745a3c
//! 2. Snapshot says: ntoskrnl loaded at 0xfffff8071a400000, size 0x1045000
//! 3. Offset = 0x345a3c                    -> "ntoskrnl+0x345a3c"
//! 4. Engine has ntoskrnl symbols loaded   -> "ntoskrnl!EtwWrite+0x2c"
//! 5. Engine has line info                 -> "etwapi.c:310+0x4"
//! ```
//!
//! Any step that cannot be completed leaves the string as it is; a missing
//! debug file is not an error, just a shorter line.

pub mod base_recovery;
pub mod object_engine;
pub mod provider;
pub mod session;
pub mod symbol_store;

pub use base_recovery::{guess_image_base, BaseGuess, PAGE_SIZE};
pub use object_engine::{ObjectSymbolEngine, ObjectSymbolProvider};
pub use provider::{
    DebugIdentity, LineHit, LoadedModuleInfo, SymbolEngine, SymbolHit, SymbolProvider,
};
pub use session::SymbolSession;
pub use symbol_store::SymbolStore;
