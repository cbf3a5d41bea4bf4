//! Event dispatch on the delivery thread
//!
//! Lifecycle notifications mutate the registry in arrival order. A mitigation
//! failure takes a snapshot of its process right away, before any later
//! notification can change it, and hands snapshot plus event to a
//! [`JobSink`]. Nothing here blocks on symbol I/O.

use log::{debug, warn};

use super::resolver_pool::{JobSink, ResolveJob};
use crate::domain::{Address, Pid};
use crate::registry::{ProcessRecord, Registry};
use mitimon_common::{MitigationEvent, MonitorEvent};

/// Per-kind event counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub process_starts: usize,
    pub process_stops: usize,
    pub image_loads: usize,
    pub image_unloads: usize,
    pub mitigations: usize,
    /// Jobs the sink refused
    pub dropped: usize,
}

impl DispatchStats {
    #[must_use]
    pub fn total(&self) -> usize {
        self.process_starts + self.process_stops + self.image_loads + self.image_unloads + self.mitigations
    }
}

/// Owns the registry and routes events by kind
pub struct EventPipeline<S> {
    registry: Registry,
    sink: S,
    stats: DispatchStats,
}

impl<S: JobSink> EventPipeline<S> {
    #[must_use]
    pub fn new(registry: Registry, sink: S) -> Self {
        Self { registry, sink, stats: DispatchStats::default() }
    }

    /// Apply one notification
    pub fn handle_event(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::ProcessStart { pid, image_name } => {
                self.stats.process_starts += 1;
                self.registry.add_process(Pid(pid), &image_name);
            }
            MonitorEvent::ProcessStop { pid } => {
                self.stats.process_stops += 1;
                self.registry.remove_process(Pid(pid));
            }
            MonitorEvent::ImageLoad { pid, image_base, image_size, image_name } => {
                self.stats.image_loads += 1;
                self.registry.add_image(Pid(pid), image_base, image_size, &image_name);
            }
            MonitorEvent::ImageUnload { pid, image_base } => {
                self.stats.image_unloads += 1;
                self.registry.remove_image(Pid(pid), image_base);
            }
            MonitorEvent::Mitigation(event) => self.dispatch(event),
        }
    }

    fn dispatch(&mut self, event: MitigationEvent) {
        self.stats.mitigations += 1;

        let process = self.snapshot(Pid(event.pid));
        debug!(
            "{} event {} from {} with {} frames, {} images in snapshot",
            event.task_name,
            event.event_id,
            process.pid(),
            event.stack.len(),
            process.image_count()
        );

        if !self.sink.submit(ResolveJob { process, event }) {
            warn!("Resolver queue closed, event dropped");
            self.stats.dropped += 1;
        }
    }

    /// Independent copy of a process, or a placeholder for unknown pids
    #[must_use]
    pub fn snapshot(&self, pid: Pid) -> ProcessRecord {
        self.registry.snapshot(pid)
    }

    #[must_use]
    pub fn decompose(&self, pid: Pid, address: Address) -> Option<(Address, u64)> {
        self.registry.decompose(pid, address)
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Count an event consumed outside [`Self::handle_event`]
    pub fn record_consumed_mitigation(&mut self) {
        self.stats.mitigations += 1;
    }

    pub fn into_parts(self) -> (Registry, S, DispatchStats) {
        (self.registry, self.sink, self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModuleRecord;
    use crossbeam_channel::{unbounded, Receiver, Sender};

    fn pipeline() -> (EventPipeline<Sender<ResolveJob>>, Receiver<ResolveJob>) {
        let (tx, rx) = unbounded();
        (EventPipeline::new(Registry::new(), tx), rx)
    }

    fn mitigation(pid: u32, stack: &[u64]) -> MonitorEvent {
        MonitorEvent::Mitigation(MitigationEvent {
            task_name: "ProhibitDynamicCode".to_string(),
            event_id: 10,
            pid,
            tid: 7,
            pointer_32bit: false,
            properties: Vec::new(),
            stack: stack.iter().copied().map(Address).collect(),
        })
    }

    #[test]
    fn test_lifecycle_updates_registry() {
        let (mut pipeline, _rx) = pipeline();
        pipeline.handle_event(MonitorEvent::ProcessStart { pid: 100, image_name: "a.exe".into() });
        pipeline.handle_event(MonitorEvent::ImageLoad {
            pid: 100,
            image_base: Address(0x1000),
            image_size: 0x2000,
            image_name: "a.exe".into(),
        });

        assert_eq!(pipeline.decompose(Pid(100), Address(0x1500)), Some((Address(0x1000), 0x500)));
        assert_eq!(pipeline.decompose(Pid(100), Address(0x5000)), None);

        pipeline.handle_event(MonitorEvent::ImageUnload { pid: 100, image_base: Address(0x1000) });
        assert_eq!(pipeline.decompose(Pid(100), Address(0x1500)), None);

        pipeline.handle_event(MonitorEvent::ProcessStop { pid: 100 });
        assert!(!pipeline.registry().contains(Pid(100)));
        assert_eq!(pipeline.stats().total(), 4);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_events() {
        let (mut pipeline, rx) = pipeline();
        pipeline.handle_event(MonitorEvent::ProcessStart { pid: 5, image_name: "b.exe".into() });
        pipeline.handle_event(MonitorEvent::ImageLoad {
            pid: 5,
            image_base: Address(0x4000),
            image_size: 0x1000,
            image_name: r"C:\b.dll".into(),
        });
        pipeline.handle_event(mitigation(5, &[0x4010]));
        pipeline.handle_event(MonitorEvent::ImageUnload { pid: 5, image_base: Address(0x4000) });
        pipeline.handle_event(MonitorEvent::ProcessStop { pid: 5 });

        let job = rx.try_recv().unwrap();
        assert_eq!(job.process.image_name(), "b.exe");
        assert_eq!(job.process.decompose(Address(0x4010)), Some((Address(0x4000), 0x10)));
    }

    #[test]
    fn test_unknown_pid_gets_placeholder() {
        let (mut pipeline, rx) = pipeline();
        pipeline.registry_mut().set_kernel_module(ModuleRecord::from_raw(
            Address(0xF000_0000),
            0x10_0000,
            r"C:\Windows\System32\ntoskrnl.exe",
        ));
        pipeline.handle_event(mitigation(77, &[0xF000_0010]));

        let job = rx.try_recv().unwrap();
        assert_eq!(job.process.image_name(), "unknown");
        assert_eq!(job.process.decompose(Address(0xF000_0010)), Some((Address(0xF000_0000), 0x10)));
        assert!(!pipeline.registry().contains(Pid(77)));
    }

    #[test]
    fn test_closed_sink_counts_drop() {
        let (mut pipeline, rx) = pipeline();
        drop(rx);
        pipeline.handle_event(mitigation(1, &[]));
        assert_eq!(pipeline.stats().dropped, 1);
        assert_eq!(pipeline.stats().mitigations, 1);
    }
}
