//! Egress reverse proxy: routes reads to the owner, merges meta across the
//! cluster.

use std::sync::Arc;

use futures::future::join_all;
use logcache_proto::v1::egress_server::Egress;
use logcache_proto::v1::{MetaRequest, MetaResponse, ReadRequest, ReadResponse};
use tonic::{Request, Response, Status};
use tracing::warn;

use crate::clients::EgressReader;
use crate::deadline;
use crate::table::RoutingTable;

/// Backs the node's Egress service. `Read` goes to the single owner of the
/// source id; `Meta` fans out to every node and prefers partial results over
/// total failure.
pub struct EgressReverseProxy {
    lookup: Arc<RoutingTable>,
    clients: Vec<Arc<dyn EgressReader>>,
    local_index: usize,
}

impl EgressReverseProxy {
    pub fn new(
        lookup: Arc<RoutingTable>,
        clients: Vec<Arc<dyn EgressReader>>,
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
impl Egress for EgressReverseProxy {
    #[tracing::instrument(skip(self, request), fields(source_id = %request.get_ref().source_id))]
    async fn read(&self, request: Request<ReadRequest>) -> Result<Response<ReadResponse>, Status> {
        let timeout = deadline::peer_timeout(request.metadata());
        let request = request.into_inner();

        let node = self.lookup.lookup(&request.source_id);
        let Some(client) = self.clients.get(node) else {
            return Err(Status::internal(format!("no client for node {node}")));
        };

        client.read(request, timeout).await.map(Response::new)
    }

    async fn meta(&self, request: Request<MetaRequest>) -> Result<Response<MetaResponse>, Status> {
        let timeout = deadline::peer_timeout(request.metadata());
        let request = request.into_inner();

        if request.local_only {
            let Some(client) = self.clients.get(self.local_index) else {
                return Err(Status::internal("no local client"));
            };
            return client.meta(timeout).await.map(Response::new);
        }

        let calls = self.clients.iter().enumerate().map(|(node, client)| {
            let client = Arc::clone(client);
            async move { (node, client.meta(timeout).await) }
        });

        let mut merged = MetaResponse::default();
        for (node, result) in join_all(calls).await {
            match result {
                Ok(response) => merged.meta.extend(response.meta),
                // Partial results beat total failure; the peer's share is
                // simply missing from the answer.
                Err(status) => warn!(node, error = %status, "dropping meta from peer"),
            }
        }

        Ok(Response::new(merged))
    }
}
