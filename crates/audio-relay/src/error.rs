//! Engine error taxonomy.
//!
//! Producer-side errors are caught at the track loop boundary and reported
//! once through the controller's failure channel; they are never thrown
//! across the thread boundary into the consumer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the playback engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transient I/O or demux failure from the source side. Ends the current
    /// track; not retried by the engine.
    #[error(transparent)]
    Source(#[from] anyhow::Error),

    /// Unsupported codec profile or a hard decoder/encoder failure. Fatal to
    /// the current packet router instance.
    #[error("codec configuration rejected: {0}")]
    CodecConfiguration(String),

    /// Internal sample-processing failure (resampler, filter stage).
    #[error("processing failure: {0}")]
    Processing(String),

    /// Cooperative cancellation. Distinct from failure so callers do not log
    /// it as an error.
    #[error("playback cancelled")]
    Cancelled,
}

impl EngineError {
    /// `true` for cancellation, which callers should not treat as a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_a_failure() {
        assert!(EngineError::Cancelled.is_cancellation());
        assert!(!EngineError::CodecConfiguration("bad".into()).is_cancellation());
    }

    #[test]
    fn source_errors_wrap_anyhow() {
        let e: EngineError = anyhow::anyhow!("connection reset").into();
        assert!(matches!(e, EngineError::Source(_)));
        assert_eq!(e.to_string(), "connection reset");
    }
}
