//! Node assembly.
//!
//! A [`LogCache`] wires the store, routing table, peer clients, and reverse
//! proxies behind one gRPC server. Peers look exactly like the local node to
//! the proxies: each address gets an [`IngressSender`] and an
//! [`EgressReader`], backed either by in-process shims (self) or by lazy
//! gRPC channels (everyone else), so a node starts cleanly while its peers
//! are still coming up.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use logcache_core::{Metrics, NopMetrics};
use logcache_proto::v1::egress_server::EgressServer;
use logcache_proto::v1::group_reader_server::GroupReaderServer;
use logcache_proto::v1::ingress_client::IngressClient;
use logcache_proto::v1::ingress_server::IngressServer;
use logcache_proto::v1::orchestration_server::OrchestrationServer;
use logcache_proto::v1::prom_ql_querier_server::PromQlQuerierServer;
use logcache_proto::v1::ReadRequest;
use logcache_routing::{
    BatchedIngressClient, EgressReader, EgressReverseProxy, GroupReaderService, GrpcEgressClient,
    IngressReverseProxy, IngressSender, LocalIngressClient, LocalStoreReader, Orchestrator,
    RoutingTable, ShardedStorage, SourceReader,
};
use logcache_store::{MemoryAnalyzer, PruneConsultant, StaticPruner, Store};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint, Server, ServerTlsConfig};
use tonic_reflection::server::Builder as ReflectionBuilder;
use tracing::{error, info};

use crate::error::NodeError;
use crate::promql::{PromQlService, QueryEngine};

/// Envelopes per forwarded peer batch.
const PEER_BATCH_SIZE: usize = 100;

/// Linger before a partial peer batch is flushed.
const PEER_BATCH_INTERVAL: Duration = Duration::from_millis(250);

/// Share of the store evicted per cycle under memory pressure.
const PRUNE_PERCENT: u64 = 5;

const PEER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How often each group member is polled into the aggregation store.
const GROUP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline for each group poll read.
const GROUP_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Envelopes fetched per group poll.
const GROUP_READ_LIMIT: i64 = 1000;

/// Requesters silent for this long surrender their group shard.
const GROUP_REQUESTER_TIMEOUT: Duration = Duration::from_secs(15);

/// Builder for a [`LogCache`] node.
pub struct LogCacheBuilder {
    addr: String,
    external_addr: Option<String>,
    node_index: usize,
    node_addrs: Vec<String>,
    max_per_source: usize,
    min_size: usize,
    memory_limit_percent: f64,
    metrics: Arc<dyn Metrics>,
    server_tls: Option<ServerTlsConfig>,
    client_tls: Option<ClientTlsConfig>,
    query_engine: Option<Arc<dyn QueryEngine>>,
}

impl LogCacheBuilder {
    /// The gRPC listen address. Defaults to `0.0.0.0:8080`; `:0` picks an
    /// ephemeral port reported by [`LogCache::addr`] after start.
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Joins a cluster: `node_addrs` lists every node (this one included),
    /// ordered by node index. Envelopes hashing outside this node's ranges
    /// are forwarded to their owner. The default is standalone mode, which
    /// stores everything and forwards nothing.
    pub fn clustered(mut self, node_index: usize, node_addrs: Vec<String>) -> Self {
        self.node_index = node_index;
        self.node_addrs = node_addrs;
        self
    }

    /// The address the scheduler refers to this node as, when it differs
    /// from the listen address (e.g. when binding `:0`).
    pub fn external_addr(mut self, addr: impl Into<String>) -> Self {
        self.external_addr = Some(addr.into());
        self
    }

    /// Envelope cap per source id. Defaults to 100 000.
    pub fn max_per_source(mut self, max_per_source: usize) -> Self {
        self.max_per_source = max_per_source;
        self
    }

    /// Pruning floor: truncation never reduces the store below this many
    /// envelopes. Defaults to 500 000.
    pub fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Memory watermark (percent of system memory) above which the store
    /// prunes. Defaults to 50.
    pub fn memory_limit_percent(mut self, percent: f64) -> Self {
        self.memory_limit_percent = percent;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn server_tls(mut self, tls: ServerTlsConfig) -> Self {
        self.server_tls = Some(tls);
        self
    }

    pub fn client_tls(mut self, tls: ClientTlsConfig) -> Self {
        self.client_tls = Some(tls);
        self
    }

    /// Installs an external PromQL engine behind the querier service.
    pub fn query_engine(mut self, engine: Arc<dyn QueryEngine>) -> Self {
        self.query_engine = Some(engine);
        self
    }

    pub fn build(self) -> LogCache {
        LogCache {
            builder: self,
            addr: None,
            shutdown: None,
            handle: None,
        }
    }
}

/// A running (or startable) Log Cache node.
pub struct LogCache {
    builder: LogCacheBuilder,
    addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
}

impl LogCache {
    pub fn builder() -> LogCacheBuilder {
        LogCacheBuilder {
            addr: "0.0.0.0:8080".to_string(),
            external_addr: None,
            node_index: 0,
            node_addrs: Vec::new(),
            max_per_source: 100_000,
            min_size: 500_000,
            memory_limit_percent: 50.0,
            metrics: Arc::new(NopMetrics),
            server_tls: None,
            client_tls: None,
            query_engine: None,
        }
    }

    /// Binds the listener, assembles the services, and serves in a
    /// background task. Returns once the node is accepting connections.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        let listener = TcpListener::bind(self.builder.addr.as_str())
            .await
            .map_err(|source| NodeError::Bind {
                addr: self.builder.addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        self.addr = Some(local_addr);

        let external_addr = self
            .builder
            .external_addr
            .clone()
            .unwrap_or_else(|| local_addr.to_string());
        let node_addrs = if self.builder.node_addrs.is_empty() {
            vec![external_addr]
        } else {
            self.builder.node_addrs.clone()
        };

        let metrics = &*self.builder.metrics;
        let pruner = Arc::new(PruneConsultant::new(
            PRUNE_PERCENT,
            self.builder.memory_limit_percent,
            Box::new(MemoryAnalyzer::new()),
        ));
        let store = Arc::new(Store::new(
            self.builder.max_per_source,
            self.builder.min_size,
            pruner,
            metrics,
        ));

        let table = Arc::new(RoutingTable::new(
            node_addrs.clone(),
            self.builder.node_index,
        ));

        let inc_dropped = metrics.counter("Dropped");
        let mut ingress_clients: Vec<Arc<dyn IngressSender>> = Vec::new();
        let mut egress_clients: Vec<Arc<dyn EgressReader>> = Vec::new();

        for (index, addr) in node_addrs.iter().enumerate() {
            if index == self.builder.node_index {
                ingress_clients.push(Arc::new(LocalIngressClient::new(Arc::clone(&store))));
                egress_clients.push(Arc::new(LocalStoreReader::new(Arc::clone(&store))));
                continue;
            }

            let channel = self.peer_channel(addr)?;
            ingress_clients.push(Arc::new(BatchedIngressClient::new(
                PEER_BATCH_SIZE,
                PEER_BATCH_INTERVAL,
                IngressClient::new(channel.clone()),
                Arc::clone(&inc_dropped),
            )));
            egress_clients.push(Arc::new(GrpcEgressClient::new(channel)));
        }

        // Group polls read through the same routed read path as clients, so
        // members owned by peers are reachable too.
        let reader_table = Arc::clone(&table);
        let reader_clients = egress_clients.clone();
        let source_reader: SourceReader = Arc::new(move |source_id, start| {
            let table = Arc::clone(&reader_table);
            let clients = reader_clients.clone();
            Box::pin(async move {
                let node = table.lookup(&source_id);
                let Some(client) = clients.get(node) else {
                    return Err(tonic::Status::internal(format!("no client for node {node}")));
                };

                let request = ReadRequest {
                    source_id,
                    start_time: start,
                    limit: GROUP_READ_LIMIT,
                    ..Default::default()
                };
                let response = client.read(request, GROUP_READ_TIMEOUT).await?;
                Ok(response.envelopes.map(|b| b.batch).unwrap_or_default())
            })
        });

        let group_store = Arc::new(Store::new(
            self.builder.max_per_source,
            self.builder.min_size,
            Arc::new(StaticPruner::new(0)),
            &NopMetrics,
        ));
        let group_storage = Arc::new(ShardedStorage::new(
            group_store,
            source_reader,
            GROUP_POLL_INTERVAL,
        ));
        let group_reader = GroupReaderService::new(group_storage, GROUP_REQUESTER_TIMEOUT);

        let ingress = IngressReverseProxy::new(
            Arc::clone(&table),
            ingress_clients,
            self.builder.node_index,
        );
        let egress =
            EgressReverseProxy::new(Arc::clone(&table), egress_clients, self.builder.node_index);
        let orchestrator = Orchestrator::new(Arc::clone(&table));
        let promql = PromQlService::new(self.builder.query_engine.clone());

        let reflection = ReflectionBuilder::configure()
            .register_encoded_file_descriptor_set(logcache_proto::FILE_DESCRIPTOR_SET)
            .build()
            .map_err(|e| NodeError::Reflection(e.to_string()))?;

        let mut server = Server::builder();
        if let Some(tls) = self.builder.server_tls.clone() {
            server = server.tls_config(tls)?;
        }

        let router = server
            .add_service(IngressServer::new(ingress))
            .add_service(EgressServer::new(egress))
            .add_service(OrchestrationServer::new(orchestrator))
            .add_service(GroupReaderServer::new(group_reader))
            .add_service(PromQlQuerierServer::new(promql))
            .add_service(reflection);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown = Some(shutdown_tx);

        info!(addr = %local_addr, nodes = node_addrs.len(), "log cache listening");

        self.handle = Some(tokio::spawn(async move {
            router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    shutdown_rx.await.ok();
                })
                .await
        }));

        Ok(())
    }

    fn peer_channel(&self, addr: &str) -> Result<Channel, NodeError> {
        let scheme = if self.builder.client_tls.is_some() {
            "https"
        } else {
            "http"
        };

        let mut endpoint = Endpoint::from_shared(format!("{scheme}://{addr}"))?
            .connect_timeout(PEER_CONNECT_TIMEOUT)
            .tcp_keepalive(Some(Duration::from_secs(60)));

        if let Some(tls) = self.builder.client_tls.clone() {
            endpoint = endpoint.tls_config(tls)?;
        }

        // Lazy: the peer may not be up yet.
        Ok(endpoint.connect_lazy())
    }

    /// The bound listen address. Only valid after [`start`](Self::start).
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Drains in-flight RPCs and stops the server. The peer flushers stop
    /// once their clients are dropped with the node.
    pub async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(Ok(())) => info!("log cache shut down"),
                Ok(Err(e)) => error!(error = %e, "server exited with error"),
                Err(e) => error!(error = %e, "server task panicked"),
            }
        }
    }
}
