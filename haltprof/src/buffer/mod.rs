//! # Sample Buffer
//!
//! Bounded ring of samples for one profiling session. When full, the oldest
//! sample is evicted. Every write advances a monotonic position counter,
//! which is how stored markers know when the samples around them are gone.
//!
//! ## Operations used by the sampler
//!
//! - [`SampleBuffer::add_sample`]: store a freshly captured snapshot
//! - [`SampleBuffer::duplicate_last_sample`]: repeat a sleeping thread's
//!   last sample without suspending it
//! - [`SampleBuffer::delete_expired_stored_markers`]: drop markers whose
//!   position has been overwritten

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use haltprof_common::{RawContext, Registers};

use crate::domain::Tid;
use crate::sampling::RegisterSnapshot;

/// Default ring capacity (samples)
pub const DEFAULT_ENTRIES: usize = 16_384;

/// One stored sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub tid: Tid,
    /// Time since session start
    pub time: Duration,
    pub registers: Registers,
    pub context: RawContext,
    pub rss_memory: u64,
    pub uss_memory: u64,
    /// Repeated from the previous sample of a sleeping thread
    pub duplicate: bool,
}

/// A named point in time, kept while its buffer position is retained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMarker {
    pub name: String,
    pub time: Duration,
    position: u64,
}

#[derive(Debug)]
pub struct SampleBuffer {
    capacity: usize,
    samples: VecDeque<Sample>,
    /// Position the next sample will be written at
    write_pos: u64,
    markers: VecDeque<StoredMarker>,
}

impl SampleBuffer {
    /// A ring holding at most `entries` samples (minimum 1)
    ///
    /// The whole ring is allocated up front: `add_sample` runs while the
    /// target thread is suspended and must never reach the allocator.
    #[must_use]
    pub fn new(entries: usize) -> Self {
        let capacity = entries.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            write_pos: 0,
            markers: VecDeque::new(),
        }
    }

    /// Store a captured snapshot
    pub fn add_sample(&mut self, snapshot: &RegisterSnapshot, start_time: Instant) {
        self.push(Sample {
            tid: snapshot.tid(),
            time: snapshot.timestamp().saturating_duration_since(start_time),
            registers: snapshot.registers(),
            context: *snapshot.context(),
            rss_memory: snapshot.rss_memory(),
            uss_memory: snapshot.uss_memory(),
            duplicate: false,
        });
    }

    /// Repeat the most recent sample of `tid`, stamped with the current time
    ///
    /// Returns false (and writes nothing) if no sample of `tid` is still in
    /// the ring.
    pub fn duplicate_last_sample(&mut self, tid: Tid, start_time: Instant) -> bool {
        let Some(last) = self.samples.iter().rev().find(|sample| sample.tid == tid) else {
            return false;
        };
        let mut copy = last.clone();
        copy.time = Instant::now().saturating_duration_since(start_time);
        // A duplicate carries no fresh memory reading
        copy.rss_memory = 0;
        copy.uss_memory = 0;
        copy.duplicate = true;
        self.push(copy);
        true
    }

    /// Record a marker at the current write position
    pub fn add_marker(&mut self, name: impl Into<String>, start_time: Instant) {
        self.markers.push_back(StoredMarker {
            name: name.into(),
            time: Instant::now().saturating_duration_since(start_time),
            position: self.write_pos,
        });
    }

    /// Drop markers whose position has been overwritten
    pub fn delete_expired_stored_markers(&mut self) {
        let oldest = self.oldest_position();
        while self.markers.front().is_some_and(|marker| marker.position < oldest) {
            self.markers.pop_front();
        }
    }

    fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.write_pos += 1;
    }

    /// Position of the oldest retained sample
    fn oldest_position(&self) -> u64 {
        self.write_pos - self.samples.len() as u64
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn samples_for(&self, tid: Tid) -> impl Iterator<Item = &Sample> {
        self.samples.iter().filter(move |sample| sample.tid == tid)
    }

    pub fn markers(&self) -> impl Iterator<Item = &StoredMarker> {
        self.markers.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples written over the buffer's lifetime, including evicted ones
    #[must_use]
    pub fn total_written(&self) -> u64 {
        self.write_pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::MemoryReading;
    use haltprof_common::Address;

    fn snapshot(tid: u32, pc: u64, start: Instant) -> RegisterSnapshot {
        RegisterSnapshot::new(
            start + Duration::from_millis(u64::from(tid)),
            Tid(tid),
            Registers { pc: Address(pc), sp: Address(0x7000), fp: Address(0x7008) },
            RawContext::empty(),
            MemoryReading { resident: 4096, unique: 0 },
        )
    }

    #[test]
    fn test_add_sample_records_relative_time() {
        let start = Instant::now();
        let mut buffer = SampleBuffer::new(8);
        buffer.add_sample(&snapshot(3, 0x10, start), start);

        let sample = buffer.samples().next().unwrap();
        assert_eq!(sample.tid, Tid(3));
        assert_eq!(sample.time, Duration::from_millis(3));
        assert_eq!(sample.registers.pc, Address(0x10));
        assert_eq!(sample.rss_memory, 4096);
        assert!(!sample.duplicate);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let start = Instant::now();
        let mut buffer = SampleBuffer::new(2);
        for pc in 1..=3 {
            buffer.add_sample(&snapshot(1, pc, start), start);
        }
        let pcs: Vec<u64> = buffer.samples().map(|s| s.registers.pc.0).collect();
        assert_eq!(pcs, [2, 3]);
        assert_eq!(buffer.total_written(), 3);
    }

    #[test]
    fn test_duplicate_needs_a_previous_sample() {
        let start = Instant::now();
        let mut buffer = SampleBuffer::new(8);
        assert!(!buffer.duplicate_last_sample(Tid(1), start));

        buffer.add_sample(&snapshot(1, 0x42, start), start);
        buffer.add_sample(&snapshot(2, 0x99, start), start);
        assert!(buffer.duplicate_last_sample(Tid(1), start));

        let last = buffer.samples().last().unwrap();
        assert_eq!(last.tid, Tid(1));
        assert_eq!(last.registers.pc, Address(0x42));
        assert_eq!(last.rss_memory, 0);
        assert!(last.duplicate);
    }

    #[test]
    fn test_duplicate_fails_once_sample_evicted() {
        let start = Instant::now();
        let mut buffer = SampleBuffer::new(1);
        buffer.add_sample(&snapshot(1, 0x1, start), start);
        buffer.add_sample(&snapshot(2, 0x2, start), start);
        assert!(!buffer.duplicate_last_sample(Tid(1), start));
    }

    #[test]
    fn test_markers_expire_when_overwritten() {
        let start = Instant::now();
        let mut buffer = SampleBuffer::new(2);
        buffer.add_marker("early", start);
        buffer.add_sample(&snapshot(1, 0x1, start), start);
        buffer.add_marker("late", start);
        buffer.add_sample(&snapshot(1, 0x2, start), start);

        buffer.delete_expired_stored_markers();
        assert_eq!(buffer.markers().count(), 2);

        // Overwrites position 0, the "early" marker's
        buffer.add_sample(&snapshot(1, 0x3, start), start);
        buffer.delete_expired_stored_markers();
        let names: Vec<&str> = buffer.markers().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["late"]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(SampleBuffer::new(0).capacity(), 1);
    }
}
