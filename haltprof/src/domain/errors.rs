//! Structured error types for haltprof
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Tid;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Failed to spawn sampler thread: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("A profiling session is already running")]
    AlreadyRunning,

    #[error("No profiling session is running")]
    NotRunning,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to install {signal} handler: {error}")]
    SignalInstallFailed { signal: &'static str, error: std::io::Error },

    #[error("Another suspension backend is already active in this process")]
    Busy,

    #[error("Failed to open thread {tid}: {error}")]
    ThreadOpenFailed { tid: Tid, error: std::io::Error },

    #[error("Thread {0} does not exist")]
    NoSuchThread(Tid),

    #[error("Failed to initialize semaphore: {0}")]
    SemaphoreInitFailed(std::io::Error),

    #[error("Thread suspension is not supported on this platform")]
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_open_error_display() {
        let err = BackendError::ThreadOpenFailed {
            tid: Tid(77),
            error: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        let msg = err.to_string();
        assert!(msg.contains("TID:77"));
        assert!(msg.contains("Failed to open thread"));
    }

    #[test]
    fn test_backend_error_converts_to_sampler_error() {
        let err: SamplerError = BackendError::Busy.into();
        assert!(matches!(err, SamplerError::Backend(BackendError::Busy)));
        assert_eq!(
            err.to_string(),
            "Another suspension backend is already active in this process"
        );
    }
}
