//! Log Cache Protocol Buffer Definitions
//!
//! This crate contains the gRPC service definitions and message types for
//! communication between Log Cache nodes and their clients.
//!
//! ## Services
//!
//! - **Ingress**: write path. `Send` accepts envelope batches; peers forward
//!   with `local_only` set so the receiving node stores without re-routing.
//! - **Egress**: read path. `Read` tails a single source over a time window,
//!   `Meta` reports per-source summaries across the cluster.
//! - **Orchestration**: control path. The external scheduler installs hash
//!   range ownership via `SetRanges` and friends.
//! - **GroupReader**: named groups of source ids, read as one stream and
//!   sharded across requesters.
//! - **PromQlQuerier**: query surface delegated to an external engine.
//!
//! ## Usage
//!
//! ### Client-side
//!
//! ```ignore
//! use logcache_proto::v1::{egress_client::EgressClient, ReadRequest};
//!
//! let mut client = EgressClient::connect("http://localhost:8080").await?;
//! let response = client
//!     .read(ReadRequest {
//!         source_id: "my-app".to_string(),
//!         limit: 10,
//!         descending: true,
//!         ..Default::default()
//!     })
//!     .await?;
//! ```
//!
//! ### Server-side
//!
//! ```ignore
//! use logcache_proto::v1::ingress_server::{Ingress, IngressServer};
//! ```

/// Log Cache gRPC API, version 1.
pub mod v1 {
    tonic::include_proto!("logcache.v1");
}

/// Encoded file descriptor set for gRPC server reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("logcache_descriptor");
