//! Kernel-locate pre-phase
//!
//! The kernel never shows up in image-load notifications, yet most mitigation
//! stacks start inside it. Before steady state the monitor provokes a failure
//! in its own process; the first return address of that event lies inside a
//! known kernel export, which is enough for base recovery. The located module
//! is stored in the registry and seeded into every process.
//!
//! The provoked event may be lost or arrive late. While waiting, the probe
//! asks for another provocation after every `reprovoke_after` unrelated
//! events, and after every failed attempt.

use log::{debug, info, warn};

use crate::config::KernelProbeConfig;
use crate::domain::{Address, LocateError, Pid};
use crate::registry::{ModuleRecord, ProcessRecord, Registry};
use crate::symbolization::{SymbolProvider, SymbolSession};
use mitimon_common::MitigationEvent;

/// Run base recovery for the kernel against one process snapshot
///
/// # Errors
/// Returns the failing [`LocateError`]; an engine that cannot start counts as
/// [`LocateError::NotFound`]
pub fn locate_kernel<P: SymbolProvider>(
    provider: &P,
    process: ProcessRecord,
    probe: &KernelProbeConfig,
    observed: Address,
) -> Result<ModuleRecord, LocateError> {
    let mut session = SymbolSession::open(provider, process)
        .map_err(|source| LocateError::NotFound { module: probe.name.clone(), source })?;
    session.locate_unannounced_module(&probe.name, &probe.path, &probe.symbol, observed)
}

/// Progress of the pre-phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// Waiting for the self-provoked event
    Waiting,
    Located(Address),
    GaveUp,
}

/// Watches the event stream for the self-provoked failure
#[derive(Debug)]
pub struct KernelProbe {
    config: KernelProbeConfig,
    attempts: u32,
    /// Unrelated events since the last provocation
    since_provoke: u32,
    state: ProbeState,
}

impl KernelProbe {
    #[must_use]
    pub fn new(config: KernelProbeConfig) -> Self {
        Self { config, attempts: 0, since_provoke: 0, state: ProbeState::Waiting }
    }

    #[must_use]
    pub fn state(&self) -> ProbeState {
        self.state
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.state == ProbeState::Waiting
    }

    /// Whether `event` is the one the pre-phase is waiting for
    #[must_use]
    pub fn wants(&self, event: &MitigationEvent) -> bool {
        self.is_waiting() && Pid(event.pid) == self.config.self_pid && !event.stack.is_empty()
    }

    /// Count an event that was not the awaited one
    ///
    /// Returns `true` when the caller should provoke another event.
    pub fn note_unmatched(&mut self) -> bool {
        if !self.is_waiting() {
            return false;
        }
        self.since_provoke += 1;
        if self.since_provoke < self.config.reprovoke_after.max(1) {
            return false;
        }
        debug!("No self-provoked event after {} events, provoking again", self.since_provoke);
        self.since_provoke = 0;
        true
    }

    /// Try to locate the kernel from a self-provoked event
    ///
    /// On success the kernel module is stored in `registry`. Returns `true`
    /// when the caller should provoke another event.
    pub fn attempt<P: SymbolProvider>(
        &mut self,
        provider: &P,
        registry: &mut Registry,
        event: &MitigationEvent,
    ) -> bool {
        let Some(&observed) = event.stack.first() else {
            return self.is_waiting();
        };
        self.attempts += 1;
        self.since_provoke = 0;

        let snapshot = registry.snapshot(self.config.self_pid);
        match locate_kernel(provider, snapshot, &self.config, observed) {
            Ok(kernel) => {
                info!(
                    "Located {} at {} (size 0x{:x}) from {observed}",
                    kernel.name(),
                    kernel.base(),
                    kernel.size()
                );
                self.state = ProbeState::Located(kernel.base());
                registry.set_kernel_module(kernel);
                false
            }
            Err(e) => {
                warn!(
                    "Kernel locate attempt {}/{} failed: {e}",
                    self.attempts, self.config.max_attempts
                );
                if self.attempts >= self.config.max_attempts {
                    warn!("Giving up on locating {}; kernel frames stay unresolved", self.config.name);
                    self.state = ProbeState::GaveUp;
                    return false;
                }
                true
            }
        }
    }
}
