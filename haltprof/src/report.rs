//! Per-session summary
//!
//! A digest of a finished session for people and scripts: per-thread sample
//! counts plus the sampler's own counters. It is not a sample storage format.

#![allow(clippy::cast_precision_loss)]

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::domain::{Generation, Tid};
use crate::profiler::{SessionData, SessionStats};

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub generation: Generation,
    pub interval_ms: u32,
    pub duration_ms: u64,
    pub buffer_capacity: usize,
    pub samples_retained: usize,
    pub samples_written: u64,
    /// Largest resident size seen, in bytes (0 if memory was off)
    pub peak_rss_bytes: u64,
    pub stats: SessionStats,
    pub threads: Vec<ThreadSummary>,
    pub markers: Vec<MarkerSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    pub tid: Tid,
    pub name: String,
    pub profiled: bool,
    /// Retained samples, duplicates included
    pub samples: usize,
    pub duplicates: usize,
    /// Distinct program counters among the real samples
    pub distinct_pcs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkerSummary {
    pub name: String,
    pub time_ms: f64,
}

impl SessionReport {
    #[must_use]
    pub fn from_session(data: &SessionData) -> Self {
        let buffer = &data.buffer;
        let threads = data
            .threads
            .iter()
            .map(|thread| {
                let mut samples = 0;
                let mut duplicates = 0;
                let mut pcs = HashSet::new();
                for sample in buffer.samples_for(thread.tid) {
                    samples += 1;
                    if sample.duplicate {
                        duplicates += 1;
                    } else {
                        pcs.insert(sample.registers.pc);
                    }
                }
                ThreadSummary {
                    tid: thread.tid,
                    name: thread.name.clone(),
                    profiled: thread.profiled,
                    samples,
                    duplicates,
                    distinct_pcs: pcs.len(),
                }
            })
            .collect();

        Self {
            generation: data.generation,
            interval_ms: data.settings.interval().as_millis(),
            duration_ms: u64::try_from(data.duration.as_millis()).unwrap_or(u64::MAX),
            buffer_capacity: buffer.capacity(),
            samples_retained: buffer.len(),
            samples_written: buffer.total_written(),
            peak_rss_bytes: buffer.samples().map(|sample| sample.rss_memory).max().unwrap_or(0),
            stats: data.stats,
            threads,
            markers: buffer
                .markers()
                .map(|marker| MarkerSummary {
                    name: marker.name.clone(),
                    time_ms: marker.time.as_secs_f64() * 1000.0,
                })
                .collect(),
        }
    }

    /// # Errors
    /// Returns an error if serialization fails
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.stats;
        writeln!(
            f,
            "Session {} ({:.2}s at {}ms)",
            self.generation,
            self.duration_ms as f64 / 1000.0,
            self.interval_ms
        )?;
        writeln!(
            f,
            "  iterations {}  samples {}  duplicates {}",
            stats.iterations, stats.samples, stats.duplicates
        )?;
        writeln!(
            f,
            "  suspend failures {}  context failures {}  missing handles {}",
            stats.suspend_failures, stats.context_failures, stats.missing_handles
        )?;
        writeln!(
            f,
            "  buffer {}/{} retained, {} written",
            self.samples_retained, self.buffer_capacity, self.samples_written
        )?;
        if self.peak_rss_bytes > 0 {
            writeln!(f, "  peak RSS {:.1} MiB", self.peak_rss_bytes as f64 / (1024.0 * 1024.0))?;
        }

        writeln!(f)?;
        writeln!(f, "  {:<12} {:<20} {:>8} {:>10} {:>8}", "THREAD", "NAME", "SAMPLES", "DUPLICATES", "PCS")?;
        for thread in &self.threads {
            let name = if thread.profiled { thread.name.clone() } else { format!("{} (filtered)", thread.name) };
            writeln!(
                f,
                "  {:<12} {:<20} {:>8} {:>10} {:>8}",
                thread.tid.to_string(),
                name,
                thread.samples,
                thread.duplicates,
                thread.distinct_pcs
            )?;
        }

        for marker in &self.markers {
            writeln!(f, "  marker {:>10.1}ms  {}", marker.time_ms, marker.name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleBuffer;
    use crate::profiler::{SessionSettings, SessionThread};
    use crate::sampling::{MemoryReading, RegisterSnapshot};
    use haltprof_common::{Address, RawContext, Registers};
    use std::time::{Duration, Instant};

    fn session() -> SessionData {
        let start = Instant::now();
        let mut buffer = SampleBuffer::new(16);
        for (tid, pc, rss) in [(1, 0x10, 8192), (2, 0x20, 0), (1, 0x11, 4096)] {
            buffer.add_sample(
                &RegisterSnapshot::new(
                    start,
                    Tid(tid),
                    Registers { pc: Address(pc), sp: Address(0x100), fp: Address(0x108) },
                    RawContext::empty(),
                    MemoryReading { resident: rss, unique: 0 },
                ),
                start,
            );
        }
        assert!(buffer.duplicate_last_sample(Tid(2), start));
        buffer.add_marker("phase", start);

        SessionData {
            generation: Generation(3),
            settings: SessionSettings::default(),
            buffer,
            stats: SessionStats { iterations: 2, samples: 3, duplicates: 1, ..Default::default() },
            duration: Duration::from_millis(2500),
            threads: vec![
                SessionThread { tid: Tid(1), name: "main".into(), profiled: true },
                SessionThread { tid: Tid(2), name: "io".into(), profiled: true },
                SessionThread { tid: Tid(3), name: "idle".into(), profiled: false },
            ],
        }
    }

    #[test]
    fn test_counts_per_thread() {
        let report = SessionReport::from_session(&session());
        let counts: Vec<(usize, usize, usize)> =
            report.threads.iter().map(|t| (t.samples, t.duplicates, t.distinct_pcs)).collect();
        assert_eq!(counts, [(2, 0, 2), (2, 1, 1), (0, 0, 0)]);
        assert_eq!(report.peak_rss_bytes, 8192);
        assert_eq!(report.samples_written, 4);
        assert_eq!(report.duration_ms, 2500);
        assert_eq!(report.markers.len(), 1);
    }

    #[test]
    fn test_json_uses_plain_numbers_for_ids() {
        let json = SessionReport::from_session(&session()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["generation"], 3);
        assert_eq!(value["threads"][0]["tid"], 1);
        assert_eq!(value["stats"]["duplicates"], 1);
    }

    #[test]
    fn test_text_marks_filtered_threads() {
        let text = SessionReport::from_session(&session()).to_string();
        assert!(text.contains("Session gen#3"));
        assert!(text.contains("idle (filtered)"));
        assert!(text.contains("TID:2"));
    }
}
