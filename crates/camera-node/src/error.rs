//! Worker error taxonomy.

use thiserror::Error;

/// Classified failures inside a camera worker. The variant decides the
/// recovery policy: configuration and model problems are fatal at start,
/// stream problems are retried locally, persistence problems are logged
/// without inserting an event record.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("stream lost: {0}")]
    StreamLost(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    /// Stop signal observed mid-operation; a clean unwind, not a failure.
    #[error("stop requested")]
    Interrupted,
}

impl WorkerError {
    /// True when the error is the clean-stop marker, possibly wrapped in
    /// an `anyhow` chain.
    pub fn is_interrupted(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<WorkerError>(), Some(WorkerError::Interrupted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_is_detected_through_anyhow() {
        let err = anyhow::Error::from(WorkerError::Interrupted);
        assert!(WorkerError::is_interrupted(&err));

        let other = anyhow::Error::from(WorkerError::Network("timeout".into()));
        assert!(!WorkerError::is_interrupted(&other));
    }
}
