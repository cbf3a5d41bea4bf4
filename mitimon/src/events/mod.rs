//! Event sources feeding the pipeline
//!
//! The live event source (ETW sessions on the monitored machine) is external
//! to this crate. Anything that can produce [`MonitorEvent`]s in delivery order
//! plugs in through [`EventSource`]; the crate ships a JSON-lines
//! [`ReplaySource`] for recorded streams.

pub mod replay;

pub use replay::ReplaySource;

use crate::domain::EventError;
use mitimon_common::MonitorEvent;

/// Ordered stream of notifications
pub trait EventSource {
    /// Next notification, `None` once the stream has ended
    ///
    /// A malformed record yields `Some(Err(..))` and the stream continues.
    fn next_event(&mut self) -> Option<Result<MonitorEvent, EventError>>;
}

/// Provokes a mitigation failure inside the monitor's own process
///
/// Used while locating the kernel: the resulting event names our own pid and
/// its first stack entry lies inside a known kernel export. Called again
/// while the event has not shown up, so it must tolerate repeated calls.
pub trait MitigationTrigger {
    fn provoke(&self);
}

/// Trigger for recorded streams, which already contain the provoked event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrigger;

impl MitigationTrigger for NoopTrigger {
    fn provoke(&self) {}
}
