//! Bounded pool of resolver threads
//!
//! ```text
//!  delivery thread                 resolver-0 .. resolver-N
//!  ───────────────                 ────────────────────────
//!  snapshot + event ──▶ [ bounded queue ] ──▶ SymbolSession ──▶ Report
//!       (blocks when full)                                         │
//!                                                 lock(output) ◀───┘
//! ```
//!
//! Symbol acquisition may block for a long time, so it never runs on the
//! delivery thread. Each job opens its own engine: engines are not shared
//! between threads. Reports are built outside the output lock and written
//! while holding it, one whole report at a time. Completion order across
//! workers is unspecified.

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error};
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use super::report::Report;
use crate::registry::ProcessRecord;
use crate::symbolization::{SymbolProvider, SymbolSession};
use mitimon_common::MitigationEvent;

/// Report destination shared by all workers
pub type SharedOutput = Arc<Mutex<Box<dyn Write + Send>>>;

/// Wrap a writer for use as [`SharedOutput`]
pub fn shared_output<W: Write + Send + 'static>(writer: W) -> SharedOutput {
    Arc::new(Mutex::new(Box::new(writer)))
}

/// One unit of resolution work: a private registry snapshot plus the event
#[derive(Debug, Clone)]
pub struct ResolveJob {
    pub process: ProcessRecord,
    pub event: MitigationEvent,
}

/// Where the dispatcher hands jobs
pub trait JobSink {
    /// Queue a job, blocking while the queue is full
    ///
    /// Returns `false` if nobody will ever process it.
    fn submit(&self, job: ResolveJob) -> bool;
}

impl JobSink for Sender<ResolveJob> {
    fn submit(&self, job: ResolveJob) -> bool {
        self.send(job).is_ok()
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    written: AtomicUsize,
    failed: AtomicUsize,
}

/// Outcome counts after the pool drained
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    pub reports_written: usize,
    pub reports_failed: usize,
}

pub struct ResolverPool {
    sender: Option<Sender<ResolveJob>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<PoolCounters>,
}

impl ResolverPool {
    /// Start `workers` resolver threads behind a queue of `capacity` jobs
    ///
    /// # Errors
    /// Returns an error if a thread cannot be spawned
    pub fn spawn<P>(
        provider: Arc<P>,
        output: SharedOutput,
        workers: usize,
        capacity: usize,
        quiet: bool,
    ) -> io::Result<Self>
    where
        P: SymbolProvider + 'static,
    {
        let (sender, receiver) = bounded(capacity.max(1));
        let counters = Arc::new(PoolCounters::default());

        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let receiver: Receiver<ResolveJob> = receiver.clone();
            let provider = Arc::clone(&provider);
            let output = Arc::clone(&output);
            let counters = Arc::clone(&counters);

            let handle = thread::Builder::new().name(format!("resolver-{index}")).spawn(move || {
                for job in &receiver {
                    if resolve_job(provider.as_ref(), &output, job, quiet) {
                        counters.written.fetch_add(1, Ordering::Relaxed);
                    } else {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })?;
            handles.push(handle);
        }
        debug!("Started {} resolver threads, queue capacity {}", handles.len(), capacity.max(1));

        Ok(Self { sender: Some(sender), workers: handles, counters })
    }

    /// Close the queue, let the workers drain it, and wait for them
    pub fn shutdown(mut self) -> PoolSummary {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Resolver thread panicked");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        PoolSummary {
            reports_written: self.counters.written.load(Ordering::Relaxed),
            reports_failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl JobSink for ResolverPool {
    fn submit(&self, job: ResolveJob) -> bool {
        self.sender.as_ref().is_some_and(|sender| sender.submit(job))
    }
}

/// Resolve one job and write its report; `false` if nothing was written
fn resolve_job<P: SymbolProvider>(
    provider: &P,
    output: &SharedOutput,
    job: ResolveJob,
    quiet: bool,
) -> bool {
    if !quiet {
        eprintln!("Please wait while a new event is being processed...");
    }

    let pid = job.process.pid();
    let mut session = match SymbolSession::open(provider, job.process) {
        Ok(session) => session,
        Err(e) => {
            error!("Cannot start symbol engine for {pid}: {e}");
            return false;
        }
    };
    let report = Report::build(&mut session, &job.event);
    drop(session);

    let mut out = output.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = report.write_to(&mut **out) {
        error!("Failed to write report for {pid}: {e}");
        return false;
    }
    drop(out);

    if !quiet {
        eprintln!("The event was successfully processed.");
        eprintln!();
    }
    true
}
