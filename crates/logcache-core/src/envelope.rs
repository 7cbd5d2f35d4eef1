//! Kind classification and filter matching for wire envelopes.

use logcache_proto::v1::{envelope::Message, Envelope, EnvelopeType};

/// Extension methods on the wire [`Envelope`].
pub trait EnvelopeExt {
    /// The envelope's kind, or [`EnvelopeType::Any`] when no payload is set.
    fn kind(&self) -> EnvelopeType;

    /// Whether this envelope passes the given type filter. An empty filter
    /// matches everything, as does an explicit `ANY` entry.
    fn matches(&self, filter: &[EnvelopeType]) -> bool;
}

impl EnvelopeExt for Envelope {
    fn kind(&self) -> EnvelopeType {
        match self.message {
            Some(Message::Log(_)) => EnvelopeType::Log,
            Some(Message::Counter(_)) => EnvelopeType::Counter,
            Some(Message::Gauge(_)) => EnvelopeType::Gauge,
            Some(Message::Timer(_)) => EnvelopeType::Timer,
            Some(Message::Event(_)) => EnvelopeType::Event,
            None => EnvelopeType::Any,
        }
    }

    fn matches(&self, filter: &[EnvelopeType]) -> bool {
        if filter.is_empty() {
            return true;
        }

        let kind = self.kind();
        filter
            .iter()
            .any(|t| *t == EnvelopeType::Any || *t == kind)
    }
}
