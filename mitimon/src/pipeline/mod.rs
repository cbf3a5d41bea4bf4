//! # Event Pipeline
//!
//! ```text
//!   EventSource ──▶ run() ──┬─▶ KernelProbe (pre-phase, self pid only)
//!                           │        │ set_kernel_module
//!                           │        ▼
//!                           └─▶ EventPipeline ── Registry (single writer)
//!                                    │ snapshot + event
//!                                    ▼
//!                               ResolverPool ──▶ SymbolSession ──▶ Report ──▶ output
//! ```
//!
//! The delivery loop is strictly sequential: registry mutation and snapshot
//! capture never run concurrently with each other. Resolution runs on the
//! pool, in parallel with delivery.

pub mod dispatcher;
pub mod kernel_probe;
pub mod report;
pub mod resolver_pool;

pub use dispatcher::{DispatchStats, EventPipeline};
pub use kernel_probe::{locate_kernel, KernelProbe, ProbeState};
pub use report::{format_property, Report};
pub use resolver_pool::{shared_output, JobSink, PoolSummary, ResolveJob, ResolverPool, SharedOutput};

use anyhow::{Context, Result};
use log::{info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::MonitorConfig;
use crate::events::{EventSource, MitigationTrigger};
use crate::registry::{ModuleRecord, Registry};
use crate::symbolization::SymbolProvider;
use mitimon_common::MonitorEvent;

/// What a run did, printed at exit
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub dispatch: DispatchStats,
    /// Lines the event source could not parse
    pub malformed: usize,
    pub reports: PoolSummary,
    pub tracked_processes: usize,
    pub kernel: Option<ModuleRecord>,
    /// Final pre-phase state, `None` when the probe was disabled
    pub probe: Option<ProbeState>,
    pub probe_attempts: u32,
    pub interrupted: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} events ({} mitigations, {} malformed), {} reports written, {} failed, {} processes tracked",
            if self.interrupted { "interrupted" } else { "stream ended" },
            self.dispatch.total(),
            self.dispatch.mitigations,
            self.malformed,
            self.reports.reports_written,
            self.reports.reports_failed,
            self.tracked_processes,
        )?;
        match &self.kernel {
            Some(kernel) => write!(f, ", kernel {} at {}", kernel.name(), kernel.base()),
            None => write!(f, ", kernel not located"),
        }
    }
}

/// Consume `source` until it ends or `stop` is set
///
/// Runs the kernel-locate pre-phase when configured, then dispatches every
/// event. Returns after the resolver pool has written every queued report.
///
/// # Errors
/// Returns an error if the resolver pool cannot be started
pub fn run<Src, T, P>(
    source: &mut Src,
    trigger: &T,
    provider: Arc<P>,
    config: &MonitorConfig,
    output: SharedOutput,
    stop: &AtomicBool,
) -> Result<RunSummary>
where
    Src: EventSource + ?Sized,
    T: MitigationTrigger + ?Sized,
    P: SymbolProvider + 'static,
{
    let pool = ResolverPool::spawn(
        Arc::clone(&provider),
        output,
        config.workers,
        config.queue_capacity,
        config.quiet,
    )
    .context("Failed to start resolver threads")?;

    let mut probe = config.kernel_probe.clone().map(KernelProbe::new);
    if probe.is_some() {
        info!("Provoking a mitigation failure to locate the kernel...");
        trigger.provoke();
    }

    let mut pipeline = EventPipeline::new(Registry::new(), pool);
    let mut malformed = 0;
    let mut interrupted = false;

    loop {
        if stop.load(Ordering::Relaxed) {
            interrupted = true;
            break;
        }
        let Some(next) = source.next_event() else {
            break;
        };
        let event = match next {
            Ok(event) => event,
            Err(e) => {
                warn!("{e}");
                malformed += 1;
                continue;
            }
        };

        match (&mut probe, event) {
            (Some(active), MonitorEvent::Mitigation(event)) if active.wants(&event) => {
                pipeline.record_consumed_mitigation();
                if active.attempt(provider.as_ref(), pipeline.registry_mut(), &event) {
                    trigger.provoke();
                }
            }
            (active, event) => {
                pipeline.handle_event(event);
                if active.as_mut().is_some_and(KernelProbe::note_unmatched) {
                    trigger.provoke();
                }
            }
        }
    }

    if let Some(probe) = probe.as_ref().filter(|probe| probe.is_waiting()) {
        warn!("Event stream ended before the kernel was located ({} attempts)", probe.attempts());
    }

    let (registry, pool, dispatch) = pipeline.into_parts();
    let reports = pool.shutdown();

    Ok(RunSummary {
        dispatch,
        malformed,
        reports,
        tracked_processes: registry.process_count(),
        kernel: registry.kernel_module().cloned(),
        probe: probe.as_ref().map(KernelProbe::state),
        probe_attempts: probe.map_or(0, |probe| probe.attempts()),
        interrupted,
    })
}
