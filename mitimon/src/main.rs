//! # mitimon - Main Entry Point
//!
//! Replays a recorded event stream through the monitor and writes one report
//! per mitigation failure.
//!
//! Ctrl+C stops delivery once the line being read completes; queued reports
//! are still written before exit. On an idle stdin that line may never come:
//! after the drain timeout, or on a second Ctrl+C, whatever was written is
//! flushed and the process exits without waiting for the reader.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::fs::File;
use std::future::Future;
use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use mitimon::cli::Args;
use mitimon::events::{NoopTrigger, ReplaySource};
use mitimon::pipeline::{self, shared_output, RunSummary, SharedOutput};
use mitimon::preflight::run_preflight_checks;
use mitimon::symbolization::{ObjectSymbolProvider, SymbolStore};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

/// How long queued reports may take after Ctrl+C
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// How long runtime shutdown waits for a delivery thread stuck in a read
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() {
    env_logger::init();
    std::process::exit(match start() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") || msg.contains("access is denied") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

fn open_output(args: &Args) -> Result<SharedOutput> {
    if args.output.as_os_str() == "-" {
        return Ok(shared_output(io::stdout()));
    }
    let file = File::create(&args.output)
        .with_context(|| format!("Failed to create report file {}", args.output.display()))?;
    Ok(shared_output(BufWriter::new(file)))
}

/// Drive [`run`] on a runtime whose shutdown does not wait for blocked readers
fn start() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let result = runtime.block_on(run());
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    result
}

fn flush(output: &SharedOutput) {
    let mut out = output.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = out.flush() {
        warn!("Failed to flush reports: {e}");
    }
}

/// Wait for delivery to finish after Ctrl+C
///
/// Gives up after `limit`, or as soon as `interrupt` fires, flushing the
/// reports written so far. The delivery thread is left behind in that case.
async fn drain<I>(
    delivery: JoinHandle<Result<RunSummary>>,
    limit: Duration,
    interrupt: I,
    output: &SharedOutput,
) -> Result<RunSummary>
where
    I: Future<Output = io::Result<()>>,
{
    tokio::select! {
        drained = tokio::time::timeout(limit, delivery) => match drained {
            Ok(joined) => joined.context("Delivery task failed")?,
            Err(_) => {
                flush(output);
                anyhow::bail!("Timed out waiting for pending reports");
            }
        },
        _ = interrupt => {
            flush(output);
            anyhow::bail!("Interrupted again, pending reports abandoned");
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let config = args.to_config();
    let quiet = args.quiet;

    run_preflight_checks(
        args.events_path(),
        config.kernel_probe.as_ref().map(|probe| probe.path.as_str()),
        quiet,
    )?;

    // Fatal: without a symbol directory nothing can be resolved
    let store = SymbolStore::open(&args.sym_dir, args.sym_path.clone())
        .context("Failed to initialize the symbol store")?;
    let provider = Arc::new(ObjectSymbolProvider::new(store));
    let output = open_output(&args)?;
    let mut source = ReplaySource::open(args.events_path())?;

    if !quiet {
        println!("mitimon v{}", env!("CARGO_PKG_VERSION"));
        println!("events: {}", args.events_path().display());
        println!("output: {}", args.output.display());
        println!("symbols: {}", args.sym_dir.display());
        if let Some(probe) = &config.kernel_probe {
            println!("kernel: {} ({}!{})", probe.path, probe.name, probe.symbol);
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = Arc::clone(&stop);
    let flush_handle = Arc::clone(&output);
    let mut delivery = tokio::task::spawn_blocking(move || {
        pipeline::run(&mut source, &NoopTrigger, provider, &config, output, &worker_stop)
    });

    // Use select to handle both completion and Ctrl+C
    let summary: RunSummary = tokio::select! {
        joined = &mut delivery => joined.context("Delivery task failed")??,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, draining queued events...");
            stop.store(true, Ordering::Relaxed);
            drain(delivery, DRAIN_TIMEOUT, tokio::signal::ctrl_c(), &flush_handle).await?
        }
    };

    if !quiet || summary.interrupted {
        eprintln!("\n{summary}");
    }
    if !quiet && summary.reports.reports_written > 0 && args.output.as_os_str() != "-" {
        println!("saved: {}", args.output.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;
    use std::sync::atomic::AtomicUsize;

    struct FlushCounter(Arc<AtomicUsize>);

    impl Write for FlushCounter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap()
    }

    #[test]
    fn test_drain_gives_up_on_blocked_reader() {
        let runtime = runtime();
        let (release, blocked) = crossbeam_channel::bounded::<()>(0);
        let flushes = Arc::new(AtomicUsize::new(0));
        let output = shared_output(FlushCounter(Arc::clone(&flushes)));

        let result = runtime.block_on(async {
            // Stands in for a read on an idle stdin
            let delivery = tokio::task::spawn_blocking(move || {
                let _ = blocked.recv();
                Ok(RunSummary::default())
            });
            drain(delivery, Duration::from_millis(50), pending::<io::Result<()>>(), &output).await
        });

        assert!(result.unwrap_err().to_string().contains("Timed out"));
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        drop(release);
        runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    }

    #[test]
    fn test_second_interrupt_abandons_drain() {
        let runtime = runtime();
        let (release, blocked) = crossbeam_channel::bounded::<()>(0);
        let flushes = Arc::new(AtomicUsize::new(0));
        let output = shared_output(FlushCounter(Arc::clone(&flushes)));

        let result = runtime.block_on(async {
            let delivery = tokio::task::spawn_blocking(move || {
                let _ = blocked.recv();
                Ok(RunSummary::default())
            });
            drain(delivery, DRAIN_TIMEOUT, async { Ok(()) }, &output).await
        });

        assert!(result.unwrap_err().to_string().contains("Interrupted again"));
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        drop(release);
        runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    }

    #[test]
    fn test_drain_returns_finished_summary() {
        let runtime = runtime();
        let output = shared_output(io::sink());

        let summary = runtime
            .block_on(async {
                let delivery = tokio::task::spawn_blocking(|| {
                    Ok(RunSummary { interrupted: true, ..RunSummary::default() })
                });
                drain(delivery, DRAIN_TIMEOUT, pending::<io::Result<()>>(), &output).await
            })
            .unwrap();

        assert!(summary.interrupted);
    }

    #[test]
    fn test_exit_code_for_permission_errors() {
        let err = anyhow::anyhow!("Permission denied (os error 13)")
            .context("Failed to open event stream");
        assert_eq!(exit_code_for(&err), EXIT_NOPERM);
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), EXIT_ERROR);
    }
}
