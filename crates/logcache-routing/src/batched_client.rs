//! Batched peer writes.
//!
//! `Send` is asynchronous from the caller's point of view: envelopes land in
//! a bounded lossy ring and a background flusher ships them to the peer in
//! batches, by size or by interval. Overflow drops the oldest pending
//! envelopes; RPC failures are logged and never stall the ring.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use logcache_core::CounterFn;
use logcache_proto::v1::ingress_client::IngressClient;
use logcache_proto::v1::{Envelope, EnvelopeBatch, SendRequest};
use tonic::transport::Channel;
use tonic::{Request, Status};
use tracing::warn;

use crate::batch::Batcher;
use crate::clients::IngressSender;
use crate::ring::LossyRing;

/// Pending-envelope slots per peer.
const RING_CAPACITY: usize = 10_000;

/// Per-flush RPC deadline.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// Backoff while the ring is empty.
const IDLE_BACKOFF: Duration = Duration::from_millis(50);

/// Buffers envelopes bound for one peer and flushes them in batches.
pub struct BatchedIngressClient {
    ring: Arc<LossyRing<Envelope>>,
}

impl BatchedIngressClient {
    /// Spawns the background flusher. `batch_size` and `interval` bound how
    /// long an envelope waits before it is shipped; drops are reported
    /// through `inc_dropped`.
    pub fn new(
        batch_size: usize,
        interval: Duration,
        client: IngressClient<Channel>,
        inc_dropped: CounterFn,
    ) -> Self {
        let ring = Arc::new(LossyRing::new(RING_CAPACITY));

        tokio::spawn(flush_loop(
            Arc::downgrade(&ring),
            batch_size,
            interval,
            client,
            inc_dropped,
        ));

        Self { ring }
    }
}

#[async_trait]
impl IngressSender for BatchedIngressClient {
    async fn send(&self, envelopes: Vec<Envelope>) -> Result<(), Status> {
        for envelope in envelopes {
            self.ring.push(envelope);
        }
        Ok(())
    }
}

/// Drains the ring into a batcher and ships ready batches. Exits once the
/// owning client is dropped.
async fn flush_loop(
    ring: Weak<LossyRing<Envelope>>,
    batch_size: usize,
    interval: Duration,
    mut client: IngressClient<Channel>,
    inc_dropped: CounterFn,
) {
    let mut batcher = Batcher::new(batch_size, interval);

    loop {
        let Some(ring) = ring.upgrade() else {
            return;
        };

        match ring.pop() {
            Some(envelope) => {
                if let Some(batch) = batcher.write(envelope) {
                    write_batch(&mut client, batch).await;
                }
            }
            None => {
                if let Some(batch) = batcher.flush() {
                    write_batch(&mut client, batch).await;
                }

                let dropped = ring.take_dropped();
                if dropped > 0 {
                    warn!(dropped, "peer ingress ring overflowed, dropped envelopes");
                    inc_dropped(dropped);
                }

                drop(ring);
                tokio::time::sleep(IDLE_BACKOFF).await;
            }
        }
    }
}

/// One unary Send to the peer. The forwarded request is marked local-only so
/// the receiving node does not route it onward.
async fn write_batch(client: &mut IngressClient<Channel>, batch: Vec<Envelope>) {
    let count = batch.len();
    let request = Request::new(SendRequest {
        envelopes: Some(EnvelopeBatch { batch }),
        local_only: true,
    });

    match tokio::time::timeout(FLUSH_TIMEOUT, client.send(request)).await {
        Ok(Ok(_)) => {}
        Ok(Err(status)) => warn!(count, error = %status, "failed to write envelopes to peer"),
        Err(_) => warn!(count, "peer write timed out"),
    }
}
