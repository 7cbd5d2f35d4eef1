//! Core building blocks shared across the Log Cache crates.
//!
//! - [`index::PerSourceIndex`]: the time-ordered envelope index kept per
//!   source id, with tie-breaking inserts and bounded range scans.
//! - [`envelope::EnvelopeExt`]: kind classification and filter matching for
//!   wire envelopes.
//! - [`metrics`]: the counter/gauge capability interfaces the store and
//!   routing layers report through.

pub mod envelope;
pub mod error;
pub mod index;
pub mod metrics;

pub use envelope::EnvelopeExt;
pub use error::{Error, Result};
pub use index::PerSourceIndex;
pub use metrics::{CounterFn, GaugeFn, Metrics, NopMetrics};
