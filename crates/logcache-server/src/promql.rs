//! PromQL wire surface.
//!
//! The engine itself lives outside this repo; it reads envelopes back
//! through the Egress service like any other client. The node only exposes
//! the querier RPCs and delegates to whatever engine it was built with.

use std::sync::Arc;

use async_trait::async_trait;
use logcache_proto::v1::prom_ql_querier_server::PromQlQuerier;
use logcache_proto::v1::{PromQlInstantQueryRequest, PromQlQueryResult, PromQlRangeQueryRequest};
use tonic::{Request, Response, Status};

/// An externally supplied PromQL evaluation engine.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn instant_query(
        &self,
        request: PromQlInstantQueryRequest,
    ) -> Result<PromQlQueryResult, Status>;

    async fn range_query(
        &self,
        request: PromQlRangeQueryRequest,
    ) -> Result<PromQlQueryResult, Status>;
}

/// gRPC adapter over the configured engine. Without one, queries answer
/// `Unimplemented`.
pub struct PromQlService {
    engine: Option<Arc<dyn QueryEngine>>,
}

impl PromQlService {
    pub fn new(engine: Option<Arc<dyn QueryEngine>>) -> Self {
        Self { engine }
    }
}

#[tonic::async_trait]
impl PromQlQuerier for PromQlService {
    async fn instant_query(
        &self,
        request: Request<PromQlInstantQueryRequest>,
    ) -> Result<Response<PromQlQueryResult>, Status> {
        match &self.engine {
            Some(engine) => engine
                .instant_query(request.into_inner())
                .await
                .map(Response::new),
            None => Err(Status::unimplemented("no query engine configured")),
        }
    }

    async fn range_query(
        &self,
        request: Request<PromQlRangeQueryRequest>,
    ) -> Result<Response<PromQlQueryResult>, Status> {
        match &self.engine {
            Some(engine) => engine
                .range_query(request.into_inner())
                .await
                .map(Response::new),
            None => Err(Status::unimplemented("no query engine configured")),
        }
    }
}
