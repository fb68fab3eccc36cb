//! Timer resolution negotiation
//!
//! Sampling intervals finer than the default scheduler tick (10ms) need a
//! finer system timer for the sampler's sleeps to be accurate. The request
//! is made once when the sampler is created and released once when it is
//! stopped, both under the shared state lock, so sessions never stack
//! adjustments.

use std::sync::Arc;

use log::debug;

use crate::domain::SamplingInterval;

/// Global timer tick control
pub trait TimerResolution: Send + Sync + 'static {
    /// Request a timer tick of at most `interval`
    fn begin(&self, interval: SamplingInterval);

    /// Undo a matching `begin`
    fn end(&self, interval: SamplingInterval);
}

/// The OS timer
///
/// Windows adjusts the global tick with `timeBeginPeriod`/`timeEndPeriod`.
/// Linux timers are already high resolution; there the sampler thread
/// tightens its own timer slack instead (see [`tune_sampler_thread`]).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimer;

impl TimerResolution for SystemTimer {
    #[cfg(windows)]
    #[allow(unsafe_code)]
    fn begin(&self, interval: SamplingInterval) {
        // SAFETY: no preconditions; paired with timeEndPeriod in `end`
        unsafe {
            winapi::um::timeapi::timeBeginPeriod(interval.as_millis());
        }
        debug!("timeBeginPeriod({interval})");
    }

    #[cfg(windows)]
    #[allow(unsafe_code)]
    fn end(&self, interval: SamplingInterval) {
        // SAFETY: matches the timeBeginPeriod call in `begin`
        unsafe {
            winapi::um::timeapi::timeEndPeriod(interval.as_millis());
        }
        debug!("timeEndPeriod({interval})");
    }

    #[cfg(not(windows))]
    fn begin(&self, interval: SamplingInterval) {
        debug!("Fine timer requested for {interval} (no global tick to adjust)");
    }

    #[cfg(not(windows))]
    fn end(&self, interval: SamplingInterval) {
        debug!("Fine timer released for {interval}");
    }
}

/// One session's timer request, released at most once
pub struct TimerNegotiator {
    timer: Arc<dyn TimerResolution>,
    interval: SamplingInterval,
    engaged: bool,
}

impl TimerNegotiator {
    /// Request a finer tick if `interval` is below the coarse threshold
    pub fn engage(timer: Arc<dyn TimerResolution>, interval: SamplingInterval) -> Self {
        let engaged = interval.needs_fine_timer();
        if engaged {
            timer.begin(interval);
        }
        Self { timer, interval, engaged }
    }

    /// Restore the previous tick; later calls do nothing
    pub fn release(&mut self) {
        if std::mem::take(&mut self.engaged) {
            self.timer.end(self.interval);
        }
    }

    #[must_use]
    pub fn is_engaged(&self) -> bool {
        self.engaged
    }
}

/// Per-thread timer setup, run on the sampler thread itself
///
/// On Linux this lowers the thread's timer slack so sub-10ms sleeps are not
/// coalesced; it dies with the thread, so there is nothing to restore.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
pub fn tune_sampler_thread(interval: SamplingInterval) {
    /// 50µs is the kernel default; 1µs keeps 1ms intervals honest
    const FINE_SLACK_NS: libc::c_ulong = 1_000;

    if !interval.needs_fine_timer() {
        return;
    }
    // SAFETY: PR_SET_TIMERSLACK only affects the calling thread
    let rc = unsafe { libc::prctl(libc::PR_SET_TIMERSLACK, FINE_SLACK_NS, 0, 0, 0) };
    if rc != 0 {
        debug!("PR_SET_TIMERSLACK failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(target_os = "linux"))]
pub fn tune_sampler_thread(_interval: SamplingInterval) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingTimer {
        begins: AtomicU32,
        ends: AtomicU32,
    }

    impl TimerResolution for CountingTimer {
        fn begin(&self, _interval: SamplingInterval) {
            self.begins.fetch_add(1, Ordering::SeqCst);
        }

        fn end(&self, _interval: SamplingInterval) {
            self.ends.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fine_interval_engages_once_and_releases_once() {
        let timer = Arc::new(CountingTimer::default());
        let mut negotiator =
            TimerNegotiator::engage(timer.clone(), SamplingInterval::from_millis_f64(5.0));
        assert!(negotiator.is_engaged());

        negotiator.release();
        negotiator.release();
        assert_eq!(timer.begins.load(Ordering::SeqCst), 1);
        assert_eq!(timer.ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_coarse_interval_leaves_timer_alone() {
        let timer = Arc::new(CountingTimer::default());
        let mut negotiator =
            TimerNegotiator::engage(timer.clone(), SamplingInterval::from_millis_f64(10.0));
        assert!(!negotiator.is_engaged());
        negotiator.release();
        assert_eq!(timer.begins.load(Ordering::SeqCst), 0);
        assert_eq!(timer.ends.load(Ordering::SeqCst), 0);
    }
}
