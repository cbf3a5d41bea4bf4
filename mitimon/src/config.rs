//! Run configuration shared by the binary and the library
//!
//! [`crate::cli::Args`] converts into a [`MonitorConfig`]; tests build one directly.

use crate::domain::Pid;

pub const DEFAULT_OUTPUT: &str = "output.txt";
pub const DEFAULT_KERNEL_NAME: &str = "ntoskrnl";
pub const DEFAULT_KERNEL_PATH: &str = r"C:\Windows\System32\ntoskrnl.exe";
pub const DEFAULT_KERNEL_SYMBOL: &str = "EtwWrite";
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 3;
pub const DEFAULT_REPROVOKE_AFTER: u32 = 32;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[cfg(windows)]
pub const DEFAULT_SYM_DIR: &str = r"C:\MozSym";
#[cfg(not(windows))]
pub const DEFAULT_SYM_DIR: &str = "./symbols";

/// Where the kernel is and how to recognise the self-provoked event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelProbeConfig {
    /// Module name used in reports (`ntoskrnl!EtwWrite+0x..`)
    pub name: String,
    /// Reference image on disk
    pub path: String,
    /// Export the first stack entry of the provoked event lies in
    pub symbol: String,
    /// Pid of the process that provokes the event (normally our own)
    pub self_pid: Pid,
    /// Failed locate attempts before the probe gives up
    pub max_attempts: u32,
    /// Other events delivered while waiting before provoking again
    pub reprovoke_after: u32,
}

impl KernelProbeConfig {
    #[must_use]
    pub fn new(self_pid: Pid) -> Self {
        Self {
            name: DEFAULT_KERNEL_NAME.to_string(),
            path: DEFAULT_KERNEL_PATH.to_string(),
            symbol: DEFAULT_KERNEL_SYMBOL.to_string(),
            self_pid,
            max_attempts: DEFAULT_PROBE_ATTEMPTS,
            reprovoke_after: DEFAULT_REPROVOKE_AFTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// `None` skips the kernel-locate phase
    pub kernel_probe: Option<KernelProbeConfig>,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Suppress per-event progress messages
    pub quiet: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            kernel_probe: None,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            quiet: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_defaults() {
        let probe = KernelProbeConfig::new(Pid(42));
        assert_eq!(probe.name, "ntoskrnl");
        assert_eq!(probe.symbol, "EtwWrite");
        assert!(probe.path.ends_with("ntoskrnl.exe"));
        assert_eq!(probe.max_attempts, 3);
        assert_eq!(probe.reprovoke_after, 32);
    }

    #[test]
    fn test_monitor_defaults() {
        let config = MonitorConfig::default();
        assert!(config.kernel_probe.is_none());
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 64);
    }
}
