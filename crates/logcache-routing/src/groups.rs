//! Named source-id groups.
//!
//! A group bundles several source ids so clients can tail them as one
//! stream. Requesters reading the same group shard its sources among
//! themselves, letting horizontally scaled consumers split the load.
//!
//! [`GroupReaderService`] is the gRPC surface: it owns group membership and
//! requester liveness, and delegates data handling to a [`GroupStorage`].
//! [`ShardedStorage`] is the default storage: one background poller per
//! group member pulls that source through the routed read path into an
//! aggregation store, and reads merge the requester's shard by timestamp.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use logcache_proto::v1::group_reader_server::GroupReader;
use logcache_proto::v1::{
    AddToGroupRequest, AddToGroupResponse, Envelope, EnvelopeBatch, EnvelopeType,
    GroupReadRequest, GroupReadResponse, GroupRequest, GroupResponse, RemoveFromGroupRequest,
    RemoveFromGroupResponse,
};
use logcache_store::Store;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::clients::{invalid_argument, normalize_limit, parse_filter};

/// Group and source names are capped to keep membership maps bounded.
const MAX_NAME_LEN: usize = 128;

/// Reads one source starting at the given timestamp, wherever in the
/// cluster it lives.
pub type SourceReader =
    Arc<dyn Fn(String, i64) -> BoxFuture<'static, Result<Vec<Envelope>, Status>> + Send + Sync>;

/// Stores and serves data for groups on behalf of the reader service.
pub trait GroupStorage: Send + Sync {
    /// Fetches the group's envelopes within `[start..end)` for the shard
    /// assigned to `requester_id`, merged in timestamp order.
    fn get(
        &self,
        name: &str,
        start: i64,
        end: i64,
        filter: &[EnvelopeType],
        limit: usize,
        requester_id: u64,
    ) -> Vec<Envelope>;

    /// Starts fetching data for the given source.
    fn add(&self, name: &str, source_id: &str);

    /// Stops fetching data for the given source.
    fn remove(&self, name: &str, source_id: &str);

    fn add_requester(&self, name: &str, requester_id: u64);

    fn remove_requester(&self, name: &str, requester_id: u64);
}

/// Default [`GroupStorage`]: polls each group member through a
/// [`SourceReader`] into an aggregation store.
pub struct ShardedStorage {
    store: Arc<Store>,
    reader: SourceReader,
    poll_interval: Duration,
    state: Mutex<HashMap<String, GroupState>>,
}

#[derive(Default)]
struct GroupState {
    // BTreeMap so shards are assigned over a stable source order.
    pollers: BTreeMap<String, JoinHandle<()>>,
    requesters: BTreeSet<u64>,
}

impl ShardedStorage {
    pub fn new(store: Arc<Store>, reader: SourceReader, poll_interval: Duration) -> Self {
        Self {
            store,
            reader,
            poll_interval,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// The sources `requester_id` is responsible for. With zero or one
    /// requester the whole group is one shard.
    fn shard(state: &GroupState, requester_id: u64) -> Vec<String> {
        let sources: Vec<&String> = state.pollers.keys().collect();

        let position = state.requesters.iter().position(|r| *r == requester_id);
        match position {
            Some(position) if state.requesters.len() > 1 => sources
                .into_iter()
                .enumerate()
                .filter(|(i, _)| i % state.requesters.len() == position)
                .map(|(_, s)| s.clone())
                .collect(),
            _ => sources.into_iter().cloned().collect(),
        }
    }
}

impl GroupStorage for ShardedStorage {
    fn get(
        &self,
        name: &str,
        start: i64,
        end: i64,
        filter: &[EnvelopeType],
        limit: usize,
        requester_id: u64,
    ) -> Vec<Envelope> {
        let shard = {
            let state = self.state.lock();
            let Some(group) = state.get(name) else {
                return Vec::new();
            };
            Self::shard(group, requester_id)
        };

        let mut merged: Vec<Envelope> = Vec::new();
        for source_id in shard {
            let envelopes =
                self.store
                    .get(&member_key(name, &source_id), start, end, filter, limit, false);
            merged.extend(envelopes);
        }

        merged.sort_by_key(|e| e.timestamp);
        merged.truncate(limit);
        merged
    }

    fn add(&self, name: &str, source_id: &str) {
        let mut state = self.state.lock();
        let group = state.entry(name.to_string()).or_default();
        if group.pollers.contains_key(source_id) {
            return;
        }

        let poller = tokio::spawn(poll_source(
            Arc::clone(&self.store),
            Arc::clone(&self.reader),
            member_key(name, source_id),
            source_id.to_string(),
            self.poll_interval,
        ));
        group.pollers.insert(source_id.to_string(), poller);
    }

    fn remove(&self, name: &str, source_id: &str) {
        let mut state = self.state.lock();
        let Some(group) = state.get_mut(name) else {
            return;
        };

        if let Some(poller) = group.pollers.remove(source_id) {
            poller.abort();
        }
        if group.pollers.is_empty() && group.requesters.is_empty() {
            state.remove(name);
        }
    }

    fn add_requester(&self, name: &str, requester_id: u64) {
        self.state
            .lock()
            .entry(name.to_string())
            .or_default()
            .requesters
            .insert(requester_id);
    }

    fn remove_requester(&self, name: &str, requester_id: u64) {
        if let Some(group) = self.state.lock().get_mut(name) {
            group.requesters.remove(&requester_id);
        }
    }
}

impl Drop for ShardedStorage {
    fn drop(&mut self) {
        for group in self.state.lock().values() {
            for poller in group.pollers.values() {
                poller.abort();
            }
        }
    }
}

/// The aggregation store keys entries per group member so reads can pick a
/// requester's shard.
fn member_key(name: &str, source_id: &str) -> String {
    format!("{name}/{source_id}")
}

/// Tails one source into the aggregation store. Read failures are logged
/// and retried on the next tick.
async fn poll_source(
    store: Arc<Store>,
    reader: SourceReader,
    member_key: String,
    source_id: String,
    interval: Duration,
) {
    let mut next_start = 0i64;
    loop {
        match reader(source_id.clone(), next_start).await {
            Ok(envelopes) => {
                for envelope in envelopes {
                    next_start = envelope.timestamp.saturating_add(1);
                    store.put(envelope, &member_key);
                }
            }
            Err(status) => {
                debug!(source_id, error = %status, "group poll failed");
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Backs the node's GroupReader service: tracks group membership and
/// requester liveness, delegates data to the storage.
pub struct GroupReaderService {
    storage: Arc<dyn GroupStorage>,
    requester_timeout: Duration,
    groups: Mutex<HashMap<String, GroupInfo>>,
}

#[derive(Default)]
struct GroupInfo {
    source_ids: Vec<String>,
    requesters: HashMap<u64, Instant>,
}

impl GroupReaderService {
    /// Requesters that have not read for `requester_timeout` lose their
    /// shard, and the remaining requesters absorb it.
    pub fn new(storage: Arc<dyn GroupStorage>, requester_timeout: Duration) -> Self {
        Self {
            storage,
            requester_timeout,
            groups: Mutex::new(HashMap::new()),
        }
    }
}

#[tonic::async_trait]
impl GroupReader for GroupReaderService {
    async fn add_to_group(
        &self,
        request: Request<AddToGroupRequest>,
    ) -> Result<Response<AddToGroupResponse>, Status> {
        let request = request.into_inner();

        if request.name.is_empty() || request.source_id.is_empty() {
            return Err(Status::invalid_argument(
                "name and source_id fields are required",
            ));
        }
        if request.name.len() > MAX_NAME_LEN || request.source_id.len() > MAX_NAME_LEN {
            return Err(Status::invalid_argument(format!(
                "name and source_id fields can only be {MAX_NAME_LEN} bytes long"
            )));
        }

        let mut groups = self.groups.lock();
        groups
            .entry(request.name.clone())
            .or_default()
            .source_ids
            .push(request.source_id.clone());
        self.storage.add(&request.name, &request.source_id);

        Ok(Response::new(AddToGroupResponse {}))
    }

    async fn remove_from_group(
        &self,
        request: Request<RemoveFromGroupRequest>,
    ) -> Result<Response<RemoveFromGroupResponse>, Status> {
        let request = request.into_inner();

        let mut groups = self.groups.lock();
        let Some(group) = groups.get_mut(&request.name) else {
            // Removing from a group that never existed is a no-op.
            return Ok(Response::new(RemoveFromGroupResponse {}));
        };

        if let Some(position) = group
            .source_ids
            .iter()
            .position(|s| *s == request.source_id)
        {
            group.source_ids.remove(position);
            self.storage.remove(&request.name, &request.source_id);
        }

        if group.source_ids.is_empty() {
            groups.remove(&request.name);
        }

        Ok(Response::new(RemoveFromGroupResponse {}))
    }

    async fn read(
        &self,
        request: Request<GroupReadRequest>,
    ) -> Result<Response<GroupReadResponse>, Status> {
        let request = request.into_inner();

        let limit = normalize_limit(request.limit).map_err(invalid_argument)?;
        let filter = parse_filter(&request.envelope_types).map_err(invalid_argument)?;
        let end = if request.end_time <= 0 {
            i64::MAX
        } else {
            request.end_time
        };

        let mut groups = self.groups.lock();
        let Some(group) = groups.get_mut(&request.name) else {
            return Err(Status::not_found(format!(
                "unknown group name: {}",
                request.name
            )));
        };

        if !group.requesters.contains_key(&request.requester_id) {
            self.storage.add_requester(&request.name, request.requester_id);
        }
        group.requesters.insert(request.requester_id, Instant::now());

        // Requesters that stopped reading surrender their shard.
        let timeout = self.requester_timeout;
        let expired: Vec<u64> = group
            .requesters
            .iter()
            .filter(|(_, seen)| seen.elapsed() >= timeout)
            .map(|(id, _)| *id)
            .collect();
        for requester_id in expired {
            group.requesters.remove(&requester_id);
            self.storage.remove_requester(&request.name, requester_id);
        }

        let batch = self.storage.get(
            &request.name,
            request.start_time,
            end,
            &filter,
            limit,
            request.requester_id,
        );

        Ok(Response::new(GroupReadResponse {
            envelopes: Some(EnvelopeBatch { batch }),
        }))
    }

    async fn group(
        &self,
        request: Request<GroupRequest>,
    ) -> Result<Response<GroupResponse>, Status> {
        let request = request.into_inner();

        // An unknown group reports empty membership rather than an error.
        let groups = self.groups.lock();
        let info = groups.get(&request.name);

        Ok(Response::new(GroupResponse {
            source_ids: info.map(|g| g.source_ids.clone()).unwrap_or_default(),
            requester_ids: info
                .map(|g| g.requesters.keys().copied().collect())
                .unwrap_or_default(),
        }))
    }
}
