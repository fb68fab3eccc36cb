//! Session configuration and results

use std::time::Duration;

use serde::Serialize;

use crate::buffer::{SampleBuffer, DEFAULT_ENTRIES};
use crate::domain::{Generation, SamplingInterval, Tid};

/// How a profiling session samples
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSettings {
    /// Requested interval in milliseconds; rounded, at least 1
    pub interval_ms: f64,
    /// Sample buffer capacity
    pub entries: usize,
    /// Attach whole-process memory to the first sample of each iteration
    pub memory: bool,
    /// Profile only threads whose name contains one of these (any case)
    pub filters: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { interval_ms: 1.0, entries: DEFAULT_ENTRIES, memory: false, filters: Vec::new() }
    }
}

impl SessionSettings {
    #[must_use]
    pub fn interval(&self) -> SamplingInterval {
        SamplingInterval::from_millis_f64(self.interval_ms)
    }
}

/// Counters kept by the sampler over one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub iterations: u64,
    pub samples: u64,
    pub duplicates: u64,
    pub suspend_failures: u64,
    pub context_failures: u64,
    pub missing_handles: u64,
}

/// A thread known to the session when it stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionThread {
    pub tid: Tid,
    pub name: String,
    pub profiled: bool,
}

/// Everything a finished session produced
#[derive(Debug)]
pub struct SessionData {
    pub generation: Generation,
    pub settings: SessionSettings,
    pub buffer: SampleBuffer,
    pub stats: SessionStats,
    pub duration: Duration,
    pub threads: Vec<SessionThread>,
}
