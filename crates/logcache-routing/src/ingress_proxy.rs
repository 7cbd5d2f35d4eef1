//! Ingress reverse proxy: routes each inbound envelope to its owner.

use std::collections::HashMap;
use std::sync::Arc;

use logcache_proto::v1::ingress_server::Ingress;
use logcache_proto::v1::{Envelope, SendRequest, SendResponse};
use tonic::{Request, Response, Status};

use crate::clients::IngressSender;
use crate::table::RoutingTable;

/// Backs the node's Ingress service. Envelopes owned locally go to the
/// store shim and the rest are buffered toward their owning peers. A
/// request marked local-only is never forwarded: foreign envelopes in it
/// are dropped, since the original sender delivers them to their owners.
pub struct IngressReverseProxy {
    lookup: Arc<RoutingTable>,
    clients: Vec<Arc<dyn IngressSender>>,
    local_index: usize,
}

impl IngressReverseProxy {
    pub fn new(
        lookup: Arc<RoutingTable>,
        clients: Vec<Arc<dyn IngressSender>>,
        local_index: usize,
    ) -> Self {
        Self {
            lookup,
            clients,
            local_index,
        }
    }
}

#[tonic::async_trait]
impl Ingress for IngressReverseProxy {
    #[tracing::instrument(skip(self, request), fields(local_only = request.get_ref().local_only))]
    async fn send(
        &self,
        request: Request<SendRequest>,
    ) -> Result<Response<SendResponse>, Status> {
        let request = request.into_inner();
        let envelopes = request.envelopes.map(|b| b.batch).unwrap_or_default();

        let mut buckets: HashMap<usize, Vec<Envelope>> = HashMap::new();
        for envelope in envelopes {
            let node = self.lookup.lookup(&envelope.source_id);
            if request.local_only && node != self.local_index {
                // Owned by a peer; its copy comes from the original sender.
                continue;
            }
            buckets.entry(node).or_default().push(envelope);
        }

        for (node, batch) in buckets {
            let Some(client) = self.clients.get(node) else {
                return Err(Status::internal(format!("no client for node {node}")));
            };
            client.send(batch).await?;
        }

        Ok(Response::new(SendResponse {}))
    }
}
