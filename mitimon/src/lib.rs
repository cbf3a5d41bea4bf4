//! # mitimon - Mitigation Failure Monitor
//!
//! mitimon watches for security-mitigation failures (blocked dynamic code,
//! disallowed image loads, ...) and writes one report per occurrence: which
//! process and thread raised it, and a symbolicated call stack for every
//! captured return address.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Event Source                             │
//! │   process start/stop · image load/unload · mitigation failure   │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ ordered notifications (one thread)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      mitimon (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │   Pipeline   │──▶│   Registry   │   │ Kernel Probe │        │
//! │  │ (dispatcher) │   │ (pid → map)  │◀──│ (pre-phase)  │        │
//! │  └──────┬───────┘   └──────────────┘   └──────────────┘        │
//! │         │ snapshot + event                                      │
//! │         ▼                                                       │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │ Resolver     │──▶│ SymbolSession│──▶│   Report     │──▶ out │
//! │  │ Pool         │   │ (memoized)   │   │              │        │
//! │  └──────────────┘   └──────┬───────┘   └──────────────┘        │
//! │                            ▼                                    │
//! │                     SymbolProvider (object + DWARF)             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`registry`]: per-process module tables and the kernel module
//! - [`symbolization`]: base recovery, the symbol provider boundary and the
//!   per-event [`symbolization::SymbolSession`]
//! - [`pipeline`]: event dispatch, kernel-locate pre-phase, resolver pool and
//!   report formatting
//! - [`events`]: event sources (JSON-lines replay)
//! - [`cli`], [`config`], [`preflight`]: startup
//! - [`domain`]: newtypes and error types
//!
//! ## Key Concepts
//!
//! - **Snapshot**: each failure event is resolved against a private copy of
//!   its process, so later notifications never change an in-flight report
//! - **Base recovery**: the kernel's load base is never announced; it is
//!   derived from one return address known to lie in a kernel export
//! - **Tiers**: an address is described as far as data allows, from a bare
//!   address up to `module!symbol+0x.. file:line+0x..`

pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod pipeline;
pub mod preflight;
pub mod registry;
pub mod symbolization;
