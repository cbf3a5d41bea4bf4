//! # Address-Space Registry
//!
//! Tracks, for every traced process, which modules are loaded where. The event
//! pipeline is the only writer: lifecycle notifications arrive on one delivery
//! thread and are applied in order. Resolution work never reads the live
//! registry; it receives a [`ProcessRecord`] snapshot instead.
//!
//! ## Tolerating a Lossy Event Source
//!
//! Notifications can be duplicated, lost, or arrive out of order. Every
//! mutation therefore reports success as a `bool` and treats a violated
//! precondition (pid already present, base unknown, ...) as a silent no-op.
//!
//! ## The Kernel Module
//!
//! The kernel image is never announced by image-load notifications. Once its
//! base has been recovered (see [`crate::symbolization::base_recovery`]) it is
//! stored here and inserted into every process record, existing and future:
//! the kernel sits at the same base in every process of one boot.

pub mod module;
pub mod process;

pub use module::{name_from_raw, path_from_raw, ModuleRecord, GLOBALROOT_PREFIX};
pub use process::{ProcessRecord, UNKNOWN_PROCESS_NAME};

use log::debug;
use std::collections::HashMap;

use crate::domain::{Address, Pid};

/// Live process table plus the process-wide kernel module
#[derive(Debug, Default)]
pub struct Registry {
    processes: HashMap<Pid, ProcessRecord>,
    kernel: Option<ModuleRecord>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process; an existing record for `pid` is left untouched
    pub fn add_process(&mut self, pid: Pid, image_name: &str) -> bool {
        if self.processes.contains_key(&pid) {
            debug!("Ignoring duplicate start of {pid} ({image_name})");
            return false;
        }
        self.processes.insert(pid, ProcessRecord::new(pid, image_name, self.kernel.as_ref()));
        true
    }

    pub fn remove_process(&mut self, pid: Pid) -> bool {
        let removed = self.processes.remove(&pid).is_some();
        if !removed {
            debug!("Ignoring stop of untracked {pid}");
        }
        removed
    }

    /// Record an image load; fails if the process is unknown or the base is taken
    pub fn add_image(&mut self, pid: Pid, base: Address, size: u64, raw_name: &str) -> bool {
        let Some(process) = self.processes.get_mut(&pid) else {
            debug!("Ignoring image {raw_name} for untracked {pid}");
            return false;
        };
        process.add_image(ModuleRecord::from_raw(base, size, raw_name))
    }

    /// Record an image unload; the kernel module is never removed this way
    pub fn remove_image(&mut self, pid: Pid, base: Address) -> bool {
        if self.kernel.as_ref().is_some_and(|kernel| kernel.base() == base) {
            debug!("Ignoring unload of kernel base {base} in {pid}");
            return false;
        }
        self.processes.get_mut(&pid).is_some_and(|process| process.remove_image(base))
    }

    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&ProcessRecord> {
        self.processes.get(&pid)
    }

    #[must_use]
    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    /// Independent copy of a process record, or a placeholder for unknown pids
    #[must_use]
    pub fn snapshot(&self, pid: Pid) -> ProcessRecord {
        self.processes
            .get(&pid)
            .cloned()
            .unwrap_or_else(|| ProcessRecord::placeholder(pid, self.kernel.as_ref()))
    }

    pub fn decompose(&self, pid: Pid, address: Address) -> Option<(Address, u64)> {
        self.processes.get(&pid).and_then(|process| process.decompose(address))
    }

    #[must_use]
    pub fn kernel_module(&self) -> Option<&ModuleRecord> {
        self.kernel.as_ref()
    }

    /// Store the recovered kernel module and seed it into every tracked process
    ///
    /// A previous kernel module is replaced; records that already hold a
    /// module at the new base keep theirs.
    pub fn set_kernel_module(&mut self, kernel: ModuleRecord) {
        if let Some(previous) = self.kernel.take() {
            for process in self.processes.values_mut() {
                if process.image(previous.base()) == Some(&previous) {
                    process.remove_image(previous.base());
                }
            }
        }
        for process in self.processes.values_mut() {
            process.add_image(kernel.clone());
        }
        self.kernel = Some(kernel);
    }

    #[must_use]
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }
}
