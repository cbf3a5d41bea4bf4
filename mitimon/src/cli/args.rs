//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::config::{
    KernelProbeConfig, MonitorConfig, DEFAULT_KERNEL_NAME, DEFAULT_KERNEL_PATH,
    DEFAULT_KERNEL_SYMBOL, DEFAULT_OUTPUT, DEFAULT_PROBE_ATTEMPTS, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_REPROVOKE_AFTER, DEFAULT_SYM_DIR, DEFAULT_WORKERS,
};
use crate::domain::Pid;

#[derive(Parser, Debug)]
#[command(
    name = "mitimon",
    about = "Report security-mitigation failures with symbolicated call stacks",
    after_help = "\
EXAMPLES:
    mitimon events.jsonl                       Replay a recorded stream into output.txt
    mitimon -o - --skip-kernel-probe < ev.jsonl   Print reports, no kernel lookup
    mitimon --sym-path D:\\symbols events.jsonl   Search an extra symbol store"
)]
pub struct Args {
    /// Recorded event stream, one JSON object per line (`-` = stdin)
    #[arg(value_name = "EVENTS", default_value = "-")]
    pub events_arg: PathBuf,

    /// Recorded event stream (overrides the positional argument)
    #[arg(long = "events", value_name = "FILE")]
    pub events: Option<PathBuf>,

    /// Report file (`-` = stdout)
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Local symbol cache, created at startup
    #[arg(long, value_name = "DIR", default_value = DEFAULT_SYM_DIR)]
    pub sym_dir: PathBuf,

    /// Additional read-only symbol store (repeatable)
    #[arg(long, value_name = "DIR")]
    pub sym_path: Vec<PathBuf>,

    /// Reference kernel image
    #[arg(long, value_name = "FILE", default_value = DEFAULT_KERNEL_PATH)]
    pub kernel_path: String,

    /// Kernel module name used in reports
    #[arg(long, default_value = DEFAULT_KERNEL_NAME)]
    pub kernel_name: String,

    /// Kernel export the first frame of the provoked event lies in
    #[arg(long, default_value = DEFAULT_KERNEL_SYMBOL)]
    pub kernel_symbol: String,

    /// Pid whose failure events locate the kernel (default: this process)
    #[arg(long)]
    pub self_pid: Option<u32>,

    /// Skip the kernel-locate phase
    #[arg(long)]
    pub skip_kernel_probe: bool,

    /// Failed kernel-locate attempts before giving up
    #[arg(long, default_value_t = DEFAULT_PROBE_ATTEMPTS)]
    pub kernel_probe_attempts: u32,

    /// Events seen without the self-provoked one before provoking again
    #[arg(long, default_value_t = DEFAULT_REPROVOKE_AFTER)]
    pub reprovoke_after: u32,

    /// Resolver threads
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Pending events before delivery blocks
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Event stream to read, `--events` winning over the positional form
    #[must_use]
    pub fn events_path(&self) -> &PathBuf {
        self.events.as_ref().unwrap_or(&self.events_arg)
    }

    #[must_use]
    pub fn to_config(&self) -> MonitorConfig {
        let kernel_probe = (!self.skip_kernel_probe).then(|| KernelProbeConfig {
            name: self.kernel_name.clone(),
            path: self.kernel_path.clone(),
            symbol: self.kernel_symbol.clone(),
            self_pid: Pid(self.self_pid.unwrap_or_else(std::process::id)),
            max_attempts: self.kernel_probe_attempts.max(1),
            reprovoke_after: self.reprovoke_after.max(1),
        });

        MonitorConfig {
            kernel_probe,
            workers: self.workers.max(1),
            queue_capacity: self.queue.max(1),
            quiet: self.quiet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["mitimon"]);
        assert_eq!(args.events_path(), &PathBuf::from("-"));
        assert_eq!(args.output, PathBuf::from("output.txt"));
        assert!(args.sym_path.is_empty());

        let config = args.to_config();
        let probe = config.kernel_probe.unwrap();
        assert_eq!(probe.self_pid, Pid(std::process::id()));
        assert_eq!(probe.symbol, "EtwWrite");
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 64);
    }

    #[test]
    fn test_events_flag_wins() {
        let args = Args::parse_from(["mitimon", "a.jsonl", "--events", "b.jsonl"]);
        assert_eq!(args.events_path(), &PathBuf::from("b.jsonl"));
    }

    #[test]
    fn test_probe_options() {
        let args = Args::parse_from([
            "mitimon",
            "--self-pid",
            "1234",
            "--kernel-probe-attempts",
            "0",
            "--reprovoke-after",
            "5",
            "--sym-path",
            "/a",
            "--sym-path",
            "/b",
        ]);
        assert_eq!(args.sym_path.len(), 2);

        let probe = args.to_config().kernel_probe.unwrap();
        assert_eq!(probe.self_pid, Pid(1234));
        assert_eq!(probe.max_attempts, 1);
        assert_eq!(probe.reprovoke_after, 5);
    }

    #[test]
    fn test_skip_probe() {
        let args = Args::parse_from(["mitimon", "--skip-kernel-probe", "-q", "--workers", "0"]);
        let config = args.to_config();
        assert!(config.kernel_probe.is_none());
        assert!(config.quiet);
        assert_eq!(config.workers, 1);
    }
}
