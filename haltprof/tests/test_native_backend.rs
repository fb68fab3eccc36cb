//! End-to-end session against the real suspension backend
//!
//! One test in this file: the backend owns a process-wide signal handler, so
//! only one may exist at a time.

#![cfg(target_os = "linux")]

mod common;

use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{settings, wait_until};
use crossbeam_channel::{bounded, RecvTimeoutError, TryRecvError};
use haltprof::report::SessionReport;
use haltprof::{Profiler, SessionSettings};

#[test]
fn test_native_session_samples_busy_and_sleeping_threads() {
    let profiler = Arc::new(Profiler::native().unwrap());
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let (ready_tx, ready_rx) = bounded(2);

    let busy = {
        let profiler = Arc::clone(&profiler);
        let stop = stop_rx.clone();
        let ready = ready_tx.clone();
        thread::spawn(move || {
            let _registration = profiler.register_current_thread("busy");
            ready.send(()).unwrap();
            let mut acc = 0_u64;
            while matches!(stop.try_recv(), Err(TryRecvError::Empty)) {
                acc = black_box(acc.wrapping_add(1));
            }
        })
    };
    let sleepy = {
        let profiler = Arc::clone(&profiler);
        let stop = stop_rx.clone();
        thread::spawn(move || {
            let registration = profiler.register_current_thread("sleepy");
            ready_tx.send(()).unwrap();
            loop {
                let _asleep = registration.sleep_scope();
                match stop.recv_timeout(Duration::from_millis(20)) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            }
        })
    };
    ready_rx.recv().unwrap();
    ready_rx.recv().unwrap();

    profiler.start(SessionSettings { memory: true, ..settings(1.0) }).unwrap();
    wait_until(|| profiler.stats().is_some_and(|stats| stats.samples >= 20));
    let data = profiler.stop().unwrap();

    drop(stop_tx);
    busy.join().unwrap();
    sleepy.join().unwrap();

    let real: Vec<_> = data.buffer.samples().filter(|s| !s.duplicate).collect();
    assert!(real.iter().all(|s| !s.registers.pc.is_null() && !s.registers.sp.is_null()));
    assert!(real.iter().any(|s| s.rss_memory > 0));
    assert_eq!(data.stats.suspend_failures, 0);

    let report = SessionReport::from_session(&data);
    assert_eq!(report.threads.len(), 2);
    assert!(report.threads.iter().all(|thread| thread.samples > 0));
}
