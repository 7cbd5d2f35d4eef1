//! Derives per-peer deadlines from the caller's gRPC timeout.

use std::time::Duration;

use tonic::metadata::MetadataMap;

/// Fallback when the caller did not set a deadline.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// Fan-out calls never get less than this, however tight the caller is.
pub const MIN_PEER_TIMEOUT: Duration = Duration::from_secs(1);

/// The deadline to apply to peer calls made on behalf of this request.
pub fn peer_timeout(metadata: &MetadataMap) -> Duration {
    from_metadata(metadata)
        .unwrap_or(DEFAULT_PEER_TIMEOUT)
        .max(MIN_PEER_TIMEOUT)
}

/// Parses the caller's `grpc-timeout` header, e.g. `"3S"` or `"250m"`.
pub fn from_metadata(metadata: &MetadataMap) -> Option<Duration> {
    let raw = metadata.get("grpc-timeout")?.to_str().ok()?;
    parse(raw)
}

fn parse(raw: &str) -> Option<Duration> {
    if raw.len() < 2 {
        return None;
    }

    let (value, unit) = raw.split_at(raw.len() - 1);
    let value: u64 = value.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(value.saturating_mul(3600))),
        "M" => Some(Duration::from_secs(value.saturating_mul(60))),
        "S" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_millis(value)),
        "u" => Some(Duration::from_micros(value)),
        "n" => Some(Duration::from_nanos(value)),
        _ => None,
    }
}
