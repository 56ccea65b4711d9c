//! A client's editing session on one graph.
//!
//! ```text
//!            local API ──► execute ──► GraphStore ◄── replay ◄── Incoming ◄── GET commands
//!                             │          (one lock)                  ▲
//!                             ▼                                      │ tick
//!                           Outbox ──► Outgoing ──► POST commands    │
//! ```
//!
//! Local calls mutate the store immediately and queue the command; they
//! never wait on the network. Both pipelines run as tokio tasks and share
//! the store with the local API behind a single mutex, so a replayed
//! command and a local mutation never interleave.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use we3graph_core::{
    applier, ApplyContext, ClientId, Command, CommandError, EntityId, GraphError, GraphEvent,
    GraphSnapshot, GraphStore, History, IdAllocator, Mutation, Point3, Point4,
};

use crate::client::{Credentials, ServiceClient};
use crate::error::SyncError;
use crate::incoming;
use crate::outgoing::{self, Outbox, SendState};
use crate::protocol::Permission;
use crate::stats::{AtomicSyncStats, SyncStats};
use crate::transport::Transport;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub user_id: u64,
    /// Credential checked by the service's access policy
    pub who_token: String,
    pub graph_id: u64,
    /// Shown in the service's client registry
    pub client_name: String,
    /// Time between polls for remote commands
    pub poll_interval: Duration,
    /// Pause before resending a command that failed
    pub send_retry_interval: Duration,
    /// Upper bound on any single request
    pub request_timeout: Duration,
    /// Start without sending or receiving after the initial load
    pub silent: bool,
    /// Poll the uncompacted log and record undo history
    pub history: bool,
    /// Undo entries kept before the oldest are dropped
    pub history_limit: usize,
    /// Apply camera commands from other clients after loading
    pub receive_camera: bool,
    /// Buffered [`SyncEvent`]s before new ones are dropped
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: 0,
            who_token: String::new(),
            graph_id: 0,
            client_name: "we3graph".to_string(),
            poll_interval: Duration::from_millis(100),
            send_retry_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(5),
            silent: false,
            history: false,
            history_limit: 10_000,
            receive_camera: true,
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Fast intervals for tests.
    pub fn for_testing(user_id: u64, graph_id: u64) -> Self {
        Self {
            user_id,
            who_token: format!("user-{user_id}"),
            graph_id,
            client_name: format!("test-{user_id}"),
            poll_interval: Duration::from_millis(10),
            send_retry_interval: Duration::from_millis(10),
            request_timeout: Duration::from_secs(2),
            ..Self::default()
        }
    }
}

/// Notifications from a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The initial replay reached the end of the log
    GraphLoaded,
    /// The store changed, locally or by replay
    GraphChanged(Vec<GraphEvent>),
    /// The service became reachable or unreachable
    ConnectionChanged { connected: bool },
    /// The service refused a queued command; it was dropped
    CommandRejected { command: Command, error: SyncError },
}

/// How [`Session::stop`] treats commands not yet sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Keep sending until the queue is empty or the timeout runs out
    Drain(Duration),
    /// Stop at once; unsent commands are discarded
    Abandon,
}

/// Graph state guarded by the session's mutation lock.
pub(crate) struct Replica {
    pub store: GraphStore,
    pub history: Option<History>,
}

impl Replica {
    /// Replays a command from the log.
    pub fn apply(
        &mut self,
        command: Command,
        ctx: &ApplyContext,
    ) -> Result<Vec<GraphEvent>, CommandError> {
        match self.history.as_mut() {
            Some(history) => history.apply(&mut self.store, command, ctx),
            None => applier::apply(&mut self.store, &command, ctx),
        }
    }
}

#[derive(Debug, Default)]
struct Connectivity {
    disconnected_since: Option<Instant>,
    /// Length of outages that have ended
    total: Duration,
}

impl Connectivity {
    /// True when this flips the state to connected.
    fn reachable(&mut self) -> bool {
        match self.disconnected_since.take() {
            Some(since) => {
                self.total += since.elapsed();
                true
            }
            None => false,
        }
    }

    /// True when this flips the state to disconnected.
    fn unreachable(&mut self) -> bool {
        if self.disconnected_since.is_some() {
            return false;
        }
        self.disconnected_since = Some(Instant::now());
        true
    }

    fn current(&self) -> Option<Duration> {
        self.disconnected_since.map(|since| since.elapsed())
    }

    fn total(&self) -> Duration {
        self.total + self.current().unwrap_or_default()
    }
}

/// State shared by the session handle and its two pipelines.
pub(crate) struct Shared<T> {
    pub config: SessionConfig,
    pub client: ServiceClient<T>,
    pub client_id: ClientId,
    pub token: String,
    pub allocator: IdAllocator,
    replica: Mutex<Replica>,
    pub outbox: Outbox,
    pub loading: AtomicBool,
    pub silent: AtomicBool,
    pub receive_camera: AtomicBool,
    /// Highest log sequence replayed or skipped
    pub last_seen: AtomicU64,
    connectivity: Mutex<Connectivity>,
    pub stats: AtomicSyncStats,
    events: mpsc::Sender<SyncEvent>,
}

impl<T> Shared<T> {
    pub fn lock_replica(&self) -> MutexGuard<'_, Replica> {
        self.replica.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_connectivity(&self) -> MutexGuard<'_, Connectivity> {
        self.connectivity.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues an event for the application. A full channel drops it.
    pub fn emit(&self, event: SyncEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            log::debug!("Event channel full, dropping {event:?}");
        }
    }

    /// Leaves the loading phase. True only for the call that did.
    pub fn finish_loading(&self) -> bool {
        self.loading
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn report_reachable(&self) {
        if self.lock_connectivity().reachable() {
            log::info!("Client {} reconnected to the service", self.client_id);
            self.emit(SyncEvent::ConnectionChanged { connected: true });
        }
    }

    pub fn report_unreachable(&self) {
        if self.lock_connectivity().unreachable() {
            log::warn!("Client {} lost the service", self.client_id);
            self.emit(SyncEvent::ConnectionChanged { connected: false });
        }
    }
}

/// A running session. Dropping it stops both pipelines without draining.
pub struct Session<T> {
    shared: Arc<Shared<T>>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T: Transport> Session<T> {
    /// Obtains a graph access token and a client id, then starts both
    /// pipelines. Failure here is fatal: nothing can be attributed without
    /// a client id.
    pub async fn start(config: SessionConfig, transport: Arc<T>) -> Result<Self, SyncError> {
        let client = ServiceClient::new(
            transport,
            Credentials {
                user_id: config.user_id,
                who_token: config.who_token.clone(),
                graph_id: config.graph_id,
            },
            config.request_timeout,
        );
        let permission = if config.silent {
            Permission::ReadOnly
        } else {
            Permission::Write
        };
        let token = client.create_graph_access_token(permission).await?;
        let client_id = client.create_client(&config.client_name, &token).await?;
        log::info!(
            "Session started on graph {} as client {client_id}",
            config.graph_id
        );

        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let history = config
            .history
            .then(|| History::with_limit(config.history_limit));
        let shared = Arc::new(Shared {
            client,
            client_id,
            token,
            allocator: IdAllocator::new(client_id),
            replica: Mutex::new(Replica {
                store: GraphStore::new(),
                history,
            }),
            outbox: Outbox::new(),
            loading: AtomicBool::new(true),
            silent: AtomicBool::new(config.silent),
            receive_camera: AtomicBool::new(config.receive_camera),
            last_seen: AtomicU64::new(0),
            connectivity: Mutex::new(Connectivity::default()),
            stats: AtomicSyncStats::default(),
            events: event_tx,
            config,
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(outgoing::run_sender(shared.clone(), shutdown_rx.clone())),
            tokio::spawn(incoming::run_poller(shared.clone(), shutdown_rx)),
        ];
        Ok(Self {
            shared,
            event_rx: Some(event_rx),
            shutdown,
            tasks,
        })
    }

    /// Stops both pipelines. Returns whether every queued command was sent.
    pub async fn stop(mut self, mode: StopMode) -> bool {
        if let StopMode::Drain(timeout) = mode {
            if !self.shared.outbox.wait_drained(timeout).await {
                log::warn!(
                    "Stopping client {} with {} commands unsent",
                    self.shared.client_id,
                    self.shared.outbox.pending()
                );
            }
        }
        let _ = self.shutdown.send(true);
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                log::error!("Session task failed: {e}");
            }
        }
        self.is_all_sent()
    }
}

impl<T> Session<T> {
    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub fn client_id(&self) -> ClientId {
        self.shared.client_id
    }

    pub fn graph_id(&self) -> u64 {
        self.shared.config.graph_id
    }

    pub fn is_loading(&self) -> bool {
        self.shared.loading.load(Ordering::Acquire)
    }

    /// Nothing queued and nothing in flight.
    pub fn is_all_sent(&self) -> bool {
        self.shared.outbox.pending() == 0
    }

    pub fn send_state(&self) -> SendState {
        self.shared.outbox.send_state()
    }

    pub fn pending_commands(&self) -> usize {
        self.shared.outbox.pending()
    }

    /// Highest log sequence this session has caught up to.
    pub fn last_seen(&self) -> u64 {
        self.shared.last_seen.load(Ordering::Acquire)
    }

    pub fn is_silent(&self) -> bool {
        self.shared.silent.load(Ordering::Relaxed)
    }

    /// While silent, local changes are not sent and nothing is polled.
    pub fn set_silent(&self, silent: bool) {
        self.shared.silent.store(silent, Ordering::Relaxed);
    }

    pub fn set_receive_camera(&self, receive: bool) {
        self.shared.receive_camera.store(receive, Ordering::Relaxed);
    }

    /// Length of the current outage, `None` while connected.
    pub fn disconnected_for(&self) -> Option<Duration> {
        self.shared.lock_connectivity().current()
    }

    pub fn stats(&self) -> SyncStats {
        let total = self.shared.lock_connectivity().total();
        self.shared.stats.snapshot(total)
    }

    /// Runs `f` against the store under the mutation lock.
    pub fn with_graph<R>(&self, f: impl FnOnce(&GraphStore) -> R) -> R {
        f(&self.shared.lock_replica().store)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.with_graph(GraphStore::snapshot)
    }

    /// Applies a mutation locally and queues its command.
    fn submit(&self, mutation: Mutation) -> Result<(), GraphError> {
        let shared = &self.shared;
        let mut command = mutation.encode();
        command.client_id = Some(shared.client_id);

        let events = {
            let mut replica = shared.lock_replica();
            if replica.history.is_some() {
                command.complement = applier::complement_of(&replica.store, &mutation).map(|m| {
                    let mut inverse = m.encode();
                    inverse.client_id = inverse.client_id.or(Some(shared.client_id));
                    Box::new(inverse)
                });
            }
            let events = applier::execute(&mut replica.store, &mutation)?;
            if !shared.silent.load(Ordering::Relaxed) {
                shared.outbox.push(command.clone());
            }
            if let Some(history) = replica.history.as_mut() {
                history.record(command);
            }
            events
        };

        if !events.is_empty() {
            shared.emit(SyncEvent::GraphChanged(events));
        }
        Ok(())
    }

    pub fn add_vertex(&self, position: Point3) -> Result<EntityId, GraphError> {
        let id = self.shared.allocator.next_id();
        self.submit(Mutation::InsertVertex { id, position })?;
        Ok(id)
    }

    /// Connects two vertices with a new edge.
    pub fn connect(&self, start: EntityId, end: EntityId) -> Result<EntityId, GraphError> {
        let id = self.shared.allocator.next_id();
        self.submit(Mutation::InsertEdge { id, start, end })?;
        Ok(id)
    }

    pub fn move_vertex(&self, vertex: EntityId, position: Point3) -> Result<(), GraphError> {
        self.submit(Mutation::MoveVertex { vertex, position })
    }

    pub fn set_vertex_rotation(&self, vertex: EntityId, rotation: Point4) -> Result<(), GraphError> {
        self.submit(Mutation::ChangeVertexRotation { vertex, rotation })
    }

    pub fn set_vertex_scale(&self, vertex: EntityId, scale: f64) -> Result<(), GraphError> {
        self.submit(Mutation::ChangeVertexScale { vertex, scale })
    }

    /// Sets a vertex property. An empty value removes the key.
    pub fn set_vertex_property(
        &self,
        vertex: EntityId,
        list: &str,
        key: &str,
        value: &str,
        render: bool,
    ) -> Result<(), GraphError> {
        self.submit(Mutation::SetVertexProperty {
            vertex,
            list: list.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            render,
        })
    }

    /// Sets an edge property. An empty value removes the key.
    pub fn set_edge_property(
        &self,
        edge: EntityId,
        list: &str,
        key: &str,
        value: &str,
        render: bool,
    ) -> Result<(), GraphError> {
        self.submit(Mutation::SetEdgeProperty {
            edge,
            list: list.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            render,
        })
    }

    /// Removes a vertex and every edge touching it.
    pub fn remove_vertex(&self, vertex: EntityId) -> Result<(), GraphError> {
        self.submit(Mutation::RemoveVertex { vertex })
    }

    pub fn remove_edge(&self, edge: EntityId) -> Result<(), GraphError> {
        self.submit(Mutation::RemoveEdge { edge })
    }

    /// Splits edge line `index` of `edge` with a new bend at `position`.
    pub fn break_edge_line(
        &self,
        edge: EntityId,
        index: usize,
        position: Point3,
    ) -> Result<(), GraphError> {
        self.submit(Mutation::BreakEdgeLine {
            edge,
            index,
            position,
        })
    }

    pub fn remove_bend(&self, edge: EntityId, index: usize) -> Result<(), GraphError> {
        self.submit(Mutation::RemoveBend { edge, index })
    }

    pub fn move_bend(&self, edge: EntityId, index: usize, position: Point3) -> Result<(), GraphError> {
        self.submit(Mutation::MoveBend {
            edge,
            index,
            position,
        })
    }

    pub fn change_camera_position(&self, position: Point3) -> Result<(), GraphError> {
        self.submit(Mutation::ChangeCameraPosition { position })
    }

    pub fn change_camera_rotation(&self, rotation: Point4) -> Result<(), GraphError> {
        self.submit(Mutation::ChangeCameraRotation { rotation })
    }

    /// Sends an application-defined command through the log.
    pub fn custom_command(&self, name: &str, parameter: &str) -> Result<(), GraphError> {
        self.submit(Mutation::Custom {
            name: name.to_string(),
            parameter: parameter.to_string(),
        })
    }

    pub fn select_vertex(&self, vertex: EntityId) -> Result<(), GraphError> {
        self.submit(Mutation::SelectVertex { vertex })
    }

    pub fn select_bend(&self, edge: EntityId, index: usize) -> Result<(), GraphError> {
        self.submit(Mutation::SelectBend { edge, index })
    }

    pub fn clear_selection(&self) -> Result<(), GraphError> {
        self.submit(Mutation::ClearSelection)
    }

    /// Undoes one history entry locally. `None` without history or at its
    /// start.
    pub fn move_back(&self) -> Option<Vec<GraphEvent>> {
        let events = {
            let mut replica = self.shared.lock_replica();
            let Replica { store, history } = &mut *replica;
            history.as_mut()?.move_back(store)?
        };
        if !events.is_empty() {
            self.shared.emit(SyncEvent::GraphChanged(events.clone()));
        }
        Some(events)
    }

    /// Redoes one history entry locally. `None` without history or at its
    /// end.
    pub fn move_forward(&self) -> Option<Vec<GraphEvent>> {
        let events = {
            let mut replica = self.shared.lock_replica();
            let Replica { store, history } = &mut *replica;
            history.as_mut()?.move_forward(store)?
        };
        if !events.is_empty() {
            self.shared.emit(SyncEvent::GraphChanged(events.clone()));
        }
        Some(events)
    }

    pub fn history_len(&self) -> usize {
        self.shared
            .lock_replica()
            .history
            .as_ref()
            .map_or(0, History::len)
    }
}

impl<T> Drop for Session<T> {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
