use thiserror::Error;

/// Errors raised by the core data structures.
#[derive(Debug, Error)]
pub enum Error {
    /// A timestamp collision run exceeded the probe bound. The envelope that
    /// triggered it is dropped rather than silently diverging the index.
    #[error("timestamp collision probe exhausted after {0} attempts")]
    CollisionProbeExhausted(i64),

    #[error("invalid envelope type filter value: {0}")]
    InvalidEnvelopeType(i32),

    #[error("invalid limit: {0}")]
    InvalidLimit(i64),
}

pub type Result<T> = std::result::Result<T, Error>;
