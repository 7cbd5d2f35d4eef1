use thiserror::Error;

/// Errors raised while installing a range assignment.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("unknown node address: {0}")]
    UnknownNode(String),

    #[error("assignment contains no ranges")]
    Empty,

    #[error("range start {start} is greater than end {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("ranges do not cover the hash space below {0}")]
    Gap(u64),

    #[error("ranges overlap at {0}")]
    Overlap(u64),

    #[error("ranges do not reach the top of the hash space (end {0})")]
    Uncovered(u64),
}
