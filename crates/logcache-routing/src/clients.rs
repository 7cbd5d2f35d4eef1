//! Peer capabilities and their local in-process shims.
//!
//! The proxies talk to every node through the same two capabilities, so the
//! local store and a remote peer look alike: [`IngressSender`] for the write
//! path and [`EgressReader`] for the read path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use logcache_core::Error;
use logcache_proto::v1::egress_client::EgressClient;
use logcache_proto::v1::{
    Envelope, EnvelopeBatch, EnvelopeType, MetaRequest, MetaResponse, ReadRequest, ReadResponse,
};
use logcache_store::Store;
use tonic::transport::Channel;
use tonic::{Request, Status};

const DEFAULT_READ_LIMIT: usize = 100;
const MAX_READ_LIMIT: i64 = 1000;

/// Accepts a batch of envelopes owned by one node.
#[async_trait]
pub trait IngressSender: Send + Sync {
    async fn send(&self, envelopes: Vec<Envelope>) -> Result<(), Status>;
}

/// Serves reads and per-source metadata for one node.
#[async_trait]
pub trait EgressReader: Send + Sync {
    async fn read(&self, request: ReadRequest, timeout: Duration) -> Result<ReadResponse, Status>;
    async fn meta(&self, timeout: Duration) -> Result<MetaResponse, Status>;
}

/// Write shim for the local node: envelopes go straight into the store.
pub struct LocalIngressClient {
    store: Arc<Store>,
}

impl LocalIngressClient {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IngressSender for LocalIngressClient {
    async fn send(&self, envelopes: Vec<Envelope>) -> Result<(), Status> {
        for envelope in envelopes {
            let source_id = envelope.source_id.clone();
            self.store.put(envelope, &source_id);
        }
        Ok(())
    }
}

/// Read shim for the local node.
pub struct LocalStoreReader {
    store: Arc<Store>,
}

impl LocalStoreReader {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EgressReader for LocalStoreReader {
    async fn read(&self, request: ReadRequest, _timeout: Duration) -> Result<ReadResponse, Status> {
        let limit = normalize_limit(request.limit).map_err(invalid_argument)?;
        let filter = parse_filter(&request.envelope_types).map_err(invalid_argument)?;

        // An unset window tails everything up to now and beyond.
        let end = if request.end_time <= 0 {
            i64::MAX
        } else {
            request.end_time
        };

        let batch = self.store.get(
            &request.source_id,
            request.start_time,
            end,
            &filter,
            limit,
            request.descending,
        );

        Ok(ReadResponse {
            envelopes: Some(EnvelopeBatch { batch }),
        })
    }

    async fn meta(&self, _timeout: Duration) -> Result<MetaResponse, Status> {
        Ok(MetaResponse {
            meta: self.store.meta(),
        })
    }
}

/// Applies the read-limit contract: 0 defaults, negatives and values past
/// the cap are rejected.
pub(crate) fn normalize_limit(limit: i64) -> Result<usize, Error> {
    if limit < 0 || limit > MAX_READ_LIMIT {
        return Err(Error::InvalidLimit(limit));
    }
    if limit == 0 {
        return Ok(DEFAULT_READ_LIMIT);
    }
    Ok(limit as usize)
}

pub(crate) fn parse_filter(types: &[i32]) -> Result<Vec<EnvelopeType>, Error> {
    types
        .iter()
        .map(|t| EnvelopeType::try_from(*t).map_err(|_| Error::InvalidEnvelopeType(*t)))
        .collect()
}

pub(crate) fn invalid_argument(e: Error) -> Status {
    Status::invalid_argument(e.to_string())
}

/// Remote peer client for the read path.
pub struct GrpcEgressClient {
    client: EgressClient<Channel>,
}

impl GrpcEgressClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: EgressClient::new(channel),
        }
    }
}

#[async_trait]
impl EgressReader for GrpcEgressClient {
    async fn read(&self, request: ReadRequest, timeout: Duration) -> Result<ReadResponse, Status> {
        let mut client = self.client.clone();
        match tokio::time::timeout(timeout, client.read(Request::new(request))).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(status),
            Err(_) => Err(Status::unavailable("peer read timed out")),
        }
    }

    async fn meta(&self, timeout: Duration) -> Result<MetaResponse, Status> {
        let mut client = self.client.clone();
        let request = Request::new(MetaRequest { local_only: true });
        match tokio::time::timeout(timeout, client.meta(request)).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(status),
            Err(_) => Err(Status::unavailable("peer meta timed out")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logcache_core::NopMetrics;
    use logcache_store::PruneConsultant;
    use logcache_store::{MemoryReader, MemoryUsage};

    struct IdleMemory;

    impl MemoryReader for IdleMemory {
        fn memory(&mut self) -> MemoryUsage {
            MemoryUsage {
                resident: 0,
                total: 1,
            }
        }
    }

    fn store() -> Arc<Store> {
        let pruner = Arc::new(PruneConsultant::new(5, 70.0, Box::new(IdleMemory)));
        Arc::new(Store::new(100, 1000, pruner, &NopMetrics))
    }

    fn envelope(ts: i64, source_id: &str) -> Envelope {
        Envelope {
            timestamp: ts,
            source_id: source_id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn local_ingress_writes_through_to_the_store() {
        let store = store();
        let client = LocalIngressClient::new(Arc::clone(&store));

        client
            .send(vec![envelope(1, "a"), envelope(2, "a"), envelope(3, "b")])
            .await
            .unwrap();

        assert_eq!(store.get("a", 0, 9999, &[], 10, false).len(), 2);
        assert_eq!(store.get("b", 0, 9999, &[], 10, false).len(), 1);
    }

    #[tokio::test]
    async fn local_reader_defaults_the_window_and_limit() {
        let store = store();
        for ts in 1..=4 {
            store.put(envelope(ts, "a"), "a");
        }
        let reader = LocalStoreReader::new(store);

        let response = reader
            .read(
                ReadRequest {
                    source_id: "a".to_string(),
                    ..Default::default()
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let batch = response.envelopes.unwrap().batch;
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn request_validation_reports_typed_errors() {
        assert!(matches!(normalize_limit(-1), Err(Error::InvalidLimit(-1))));
        assert!(matches!(
            normalize_limit(1001),
            Err(Error::InvalidLimit(1001))
        ));
        assert_eq!(normalize_limit(0).unwrap(), 100);
        assert_eq!(normalize_limit(7).unwrap(), 7);

        assert!(matches!(
            parse_filter(&[42]),
            Err(Error::InvalidEnvelopeType(42))
        ));
    }

    #[tokio::test]
    async fn local_reader_rejects_negative_limits() {
        let reader = LocalStoreReader::new(store());
        let err = reader
            .read(
                ReadRequest {
                    source_id: "a".to_string(),
                    limit: -1,
                    ..Default::default()
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn local_reader_rejects_oversized_limits() {
        let reader = LocalStoreReader::new(store());
        let err = reader
            .read(
                ReadRequest {
                    source_id: "a".to_string(),
                    limit: 1001,
                    ..Default::default()
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn local_reader_rejects_unknown_type_filters() {
        let reader = LocalStoreReader::new(store());
        let err = reader
            .read(
                ReadRequest {
                    source_id: "a".to_string(),
                    envelope_types: vec![42],
                    ..Default::default()
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn local_meta_reports_the_store() {
        let store = store();
        store.put(envelope(1, "a"), "a");
        let reader = LocalStoreReader::new(store);

        let response = reader.meta(Duration::from_secs(1)).await.unwrap();
        assert!(response.meta.contains_key("a"));
    }
}
