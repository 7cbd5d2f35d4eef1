//! Orchestration service: the control channel by which the external
//! scheduler installs hash-range ownership.
//!
//! The scheduler is the source of truth and re-drives assignments
//! periodically; the orchestrator holds no state beyond the routing table it
//! publishes into.

use std::sync::Arc;

use logcache_proto::v1::orchestration_server::Orchestration;
use logcache_proto::v1::{
    AddRangeRequest, AddRangeResponse, ListRangesRequest, ListRangesResponse, RemoveRangeRequest,
    RemoveRangeResponse, SetRangesRequest, SetRangesResponse,
};
use parking_lot::Mutex;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::table::RoutingTable;

pub struct Orchestrator {
    table: Arc<RoutingTable>,
    // Serializes read-modify-write edits from AddRange/RemoveRange.
    edit: Mutex<()>,
}

impl Orchestrator {
    pub fn new(table: Arc<RoutingTable>) -> Self {
        Self {
            table,
            edit: Mutex::new(()),
        }
    }
}

#[tonic::async_trait]
impl Orchestration for Orchestrator {
    async fn set_ranges(
        &self,
        request: Request<SetRangesRequest>,
    ) -> Result<Response<SetRangesResponse>, Status> {
        let request = request.into_inner();

        self.table
            .set_ranges(&request.ranges)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        info!(nodes = request.ranges.len(), "installed range assignment");
        Ok(Response::new(SetRangesResponse {}))
    }

    async fn add_range(
        &self,
        request: Request<AddRangeRequest>,
    ) -> Result<Response<AddRangeResponse>, Status> {
        let request = request.into_inner();
        let range = request
            .range
            .ok_or_else(|| Status::invalid_argument("range is required"))?;

        let _edit = self.edit.lock();
        let mut assignments = self.table.assignments();
        assignments
            .entry(request.node_address)
            .or_default()
            .ranges
            .push(range);

        self.table
            .set_ranges(&assignments)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        Ok(Response::new(AddRangeResponse {}))
    }

    async fn remove_range(
        &self,
        request: Request<RemoveRangeRequest>,
    ) -> Result<Response<RemoveRangeResponse>, Status> {
        let request = request.into_inner();
        let range = request
            .range
            .ok_or_else(|| Status::invalid_argument("range is required"))?;

        let _edit = self.edit.lock();
        let mut assignments = self.table.assignments();
        let ranges = assignments
            .get_mut(&request.node_address)
            .ok_or_else(|| Status::invalid_argument("node has no ranges"))?;

        let before = ranges.ranges.len();
        ranges.ranges.retain(|r| *r != range);
        if ranges.ranges.len() == before {
            return Err(Status::invalid_argument("no such range"));
        }

        self.table
            .set_ranges(&assignments)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        Ok(Response::new(RemoveRangeResponse {}))
    }

    async fn list_ranges(
        &self,
        _request: Request<ListRangesRequest>,
    ) -> Result<Response<ListRangesResponse>, Status> {
        Ok(Response::new(ListRangesResponse {
            ranges: self.table.assignments(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logcache_proto::v1::{Range, Ranges};
    use std::collections::HashMap;

    fn orchestrator() -> Orchestrator {
        let table = Arc::new(RoutingTable::new(
            vec!["node-0".to_string(), "node-1".to_string()],
            0,
        ));
        Orchestrator::new(table)
    }

    fn full_range() -> Range {
        Range {
            start: 0,
            end: u64::MAX,
        }
    }

    fn split() -> HashMap<String, Ranges> {
        HashMap::from([
            (
                "node-0".to_string(),
                Ranges {
                    ranges: vec![Range {
                        start: 0,
                        end: 9_223_372_036_854_775_807,
                    }],
                },
            ),
            (
                "node-1".to_string(),
                Ranges {
                    ranges: vec![Range {
                        start: 9_223_372_036_854_775_808,
                        end: u64::MAX,
                    }],
                },
            ),
        ])
    }

    #[tokio::test]
    async fn set_ranges_installs_a_valid_partition() {
        let orch = orchestrator();

        orch.set_ranges(Request::new(SetRangesRequest { ranges: split() }))
            .await
            .unwrap();

        let listed = orch
            .list_ranges(Request::new(ListRangesRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(listed.ranges, split());
    }

    #[tokio::test]
    async fn set_ranges_rejects_gaps() {
        let orch = orchestrator();
        let ranges = HashMap::from([(
            "node-0".to_string(),
            Ranges {
                ranges: vec![Range { start: 1, end: u64::MAX }],
            },
        )]);

        let err = orch
            .set_ranges(Request::new(SetRangesRequest { ranges }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn list_ranges_reports_the_default_before_any_assignment() {
        let orch = orchestrator();

        let listed = orch
            .list_ranges(Request::new(ListRangesRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(
            listed.ranges,
            HashMap::from([(
                "node-0".to_string(),
                Ranges {
                    ranges: vec![full_range()],
                }
            )])
        );
    }

    #[tokio::test]
    async fn add_range_must_preserve_the_partition() {
        let orch = orchestrator();

        // The default assignment already covers everything, so adding more
        // always overlaps.
        let err = orch
            .add_range(Request::new(AddRangeRequest {
                node_address: "node-1".to_string(),
                range: Some(full_range()),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn remove_range_must_preserve_the_partition() {
        let orch = orchestrator();
        orch.set_ranges(Request::new(SetRangesRequest { ranges: split() }))
            .await
            .unwrap();

        // Removing one half opens a gap.
        let err = orch
            .remove_range(Request::new(RemoveRangeRequest {
                node_address: "node-1".to_string(),
                range: Some(Range {
                    start: 9_223_372_036_854_775_808,
                    end: u64::MAX,
                }),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        // The installed mapping is untouched.
        let listed = orch
            .list_ranges(Request::new(ListRangesRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(listed.ranges, split());
    }

    #[tokio::test]
    async fn remove_range_rejects_unknown_ranges() {
        let orch = orchestrator();

        let err = orch
            .remove_range(Request::new(RemoveRangeRequest {
                node_address: "node-0".to_string(),
                range: Some(Range { start: 1, end: 2 }),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }
}
