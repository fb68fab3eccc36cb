//! Sampling engine: control loop, per-thread protocol, timer negotiation

pub mod protocol;
pub mod sampler_thread;
pub mod snapshot;
pub mod timer;

pub use protocol::{sample_thread, SampleOutcome, SuspendGuard};
pub use sampler_thread::{SamplerContext, SamplerThread};
pub use snapshot::{MemoryReading, RegisterSnapshot};
pub use timer::{SystemTimer, TimerNegotiator, TimerResolution};
