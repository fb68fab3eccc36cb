//! # haltprof - Demo Entry Point
//!
//! Spawns a synthetic workload (busy threads and mostly-sleeping threads),
//! profiles it for `--duration` seconds or until Ctrl+C, then prints a
//! per-thread summary.

use std::hint::black_box;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{info, warn};

use haltprof::cli::Args;
use haltprof::platform::NativeBackend;
use haltprof::report::SessionReport;
use haltprof::Profiler;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

/// How long a sleepy worker blocks between bursts of work
const NAP: Duration = Duration::from_millis(25);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
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
    if msg.contains("permission denied") || msg.contains("operation not permitted") {
        EXIT_NOPERM
    } else if msg.contains("invalid argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    if !args.interval.is_finite() || args.interval <= 0.0 {
        anyhow::bail!("Invalid argument: --interval must be a positive number of milliseconds");
    }
    let profiler =
        Arc::new(Profiler::native().context("Failed to set up thread suspension")?);

    let (stop_tx, stop_rx) = bounded::<()>(0);
    let (ready_tx, ready_rx) = bounded::<()>(usize::from(args.threads));
    let workers = spawn_workload(&profiler, args.threads, &stop_rx, &ready_tx)?;
    drop(ready_tx);
    for _ in 0..args.threads {
        ready_rx.recv().context("Workload thread exited before registering")?;
    }

    let generation =
        profiler.start(args.session_settings()).context("Failed to start profiling session")?;
    if !args.quiet {
        eprintln!(
            "Profiling {} threads ({generation}), {}",
            args.threads,
            if args.duration == 0 {
                "Ctrl+C to stop".to_string()
            } else {
                format!("stopping in {}s", args.duration)
            }
        );
    }

    wait_for_end(args.duration).await;

    // Joining the sampler blocks; keep it off the runtime thread
    let data = tokio::task::spawn_blocking({
        let profiler = Arc::clone(&profiler);
        move || profiler.stop()
    })
    .await
    .context("Stop task panicked")?
    .context("Failed to stop profiling session")?;

    drop(stop_tx);
    for worker in workers {
        if worker.join().is_err() {
            warn!("Workload thread panicked");
        }
    }

    let report = SessionReport::from_session(&data);
    if args.json {
        println!("{}", report.to_json().context("Failed to serialize report")?);
    } else {
        print!("{report}");
    }
    Ok(())
}

async fn wait_for_end(duration: u64) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
    };
    if duration == 0 {
        ctrl_c.await;
        return;
    }
    tokio::select! {
        () = ctrl_c => info!("Interrupted"),
        () = tokio::time::sleep(Duration::from_secs(duration)) => {}
    }
}

/// Spawn `count` named workers that register themselves, alternating busy
/// and sleepy ones
fn spawn_workload(
    profiler: &Arc<Profiler<NativeBackend>>,
    count: u16,
    stop: &Receiver<()>,
    ready: &Sender<()>,
) -> Result<Vec<JoinHandle<()>>> {
    (0..count)
        .map(|i| {
            let busy = i % 2 == 0;
            let name = format!("{}-{i}", if busy { "busy" } else { "sleepy" });
            let profiler = Arc::clone(profiler);
            let stop = stop.clone();
            let ready = ready.clone();
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let registration = profiler.register_current_thread(name);
                    drop(profiler);
                    let _ = ready.send(());
                    if busy {
                        spin_until_stopped(&stop);
                    } else {
                        loop {
                            let _asleep = registration.sleep_scope();
                            match stop.recv_timeout(NAP) {
                                Err(RecvTimeoutError::Timeout) => {}
                                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                    }
                })
                .with_context(|| format!("Failed to spawn workload thread {i}"))
        })
        .collect()
}

fn spin_until_stopped(stop: &Receiver<()>) {
    let mut acc = 0_u64;
    loop {
        for n in 0..50_000_u64 {
            acc = black_box(acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(n));
        }
        if matches!(stop.try_recv(), Ok(()) | Err(TryRecvError::Disconnected)) {
            break;
        }
    }
    black_box(acc);
}
