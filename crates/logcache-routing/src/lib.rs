//! Routing layer: decides which node owns a source id and moves envelopes
//! and queries to it.
//!
//! - [`hash`]: CRC-64 source hashing over the 64-bit ring.
//! - [`table::RoutingTable`]: atomically replaceable hash-range ownership.
//! - [`orchestrator::Orchestrator`]: the control service the external
//!   scheduler drives.
//! - [`batched_client::BatchedIngressClient`]: lossy-ring buffered, batched
//!   peer writes.
//! - [`ingress_proxy`] / [`egress_proxy`]: the reverse proxies backing the
//!   node's Ingress and Egress services.
//! - [`groups`]: named source-id groups read as one stream and sharded
//!   across requesters.

pub mod batch;
pub mod batched_client;
pub mod clients;
pub mod deadline;
pub mod egress_proxy;
pub mod error;
pub mod groups;
pub mod hash;
pub mod ingress_proxy;
pub mod orchestrator;
pub mod ring;
pub mod table;

pub use batched_client::BatchedIngressClient;
pub use clients::{EgressReader, GrpcEgressClient, IngressSender, LocalIngressClient, LocalStoreReader};
pub use egress_proxy::EgressReverseProxy;
pub use error::RoutingError;
pub use groups::{GroupReaderService, GroupStorage, ShardedStorage, SourceReader};
pub use hash::source_hash;
pub use ingress_proxy::IngressReverseProxy;
pub use orchestrator::Orchestrator;
pub use table::RoutingTable;
