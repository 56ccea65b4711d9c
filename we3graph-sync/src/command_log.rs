//! Server-side command log: sequencing and compaction.
//!
//! Every accepted command of a graph gets the next integer sequence. Right
//! after the row is written, earlier rows it makes redundant are flagged
//! ineffective:
//!
//! | New command            | Supersedes earlier rows with            |
//! |------------------------|-----------------------------------------|
//! | `MoveVertex`           | same name and same vertex               |
//! | `MoveBend`             | same name, same edge and same bend index|
//! | `ChangeCameraPosition` | same name                               |
//! | `ChangeCameraRotation` | same name                               |
//!
//! Because each new row supersedes every earlier row with its key, at most
//! one effective row per key exists at any time. The log keeps that row's
//! sequence in memory, so compaction is a lookup rather than a scan.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use we3graph_core::{ClientId, Command, CommandKind};

use crate::storage::{Append, ClientRecord, LogRow, LogStore, StoreError};

/// Identity of the state a compactable command overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompactionKey {
    kind: CommandKind,
    target: String,
    index: String,
}

impl CompactionKey {
    /// The key of `kind` with canonical `params`, `None` when the command
    /// never supersedes anything.
    pub fn of(kind: CommandKind, params: &[String]) -> Option<Self> {
        let param = |i: usize| params.get(i).cloned().unwrap_or_default();
        match kind {
            CommandKind::MoveVertex => Some(Self {
                kind,
                target: param(0),
                index: String::new(),
            }),
            CommandKind::MoveBend => Some(Self {
                kind,
                target: param(0),
                index: param(1),
            }),
            // Camera is a per-graph singleton, regardless of which client moved it
            CommandKind::ChangeCameraPosition | CommandKind::ChangeCameraRotation => Some(Self {
                kind,
                target: String::new(),
                index: String::new(),
            }),
            _ => None,
        }
    }
}

/// Result of [`CommandLog::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub sequence: u64,
    /// False when the command was a resend already in the log
    pub appended: bool,
    /// Sequences flagged ineffective by this append
    pub superseded: Vec<u64>,
}

#[derive(Debug, Default)]
struct GraphLog {
    last_sequence: u64,
    /// Effective row per compaction key
    effective: HashMap<CompactionKey, u64>,
}

#[derive(Debug, Default)]
struct LogState {
    graphs: HashMap<u64, GraphLog>,
    clients: HashMap<ClientId, ClientRecord>,
    next_client_id: ClientId,
}

/// Ordered per-graph command log over a [`LogStore`].
pub struct CommandLog {
    store: Arc<dyn LogStore>,
    state: Mutex<LogState>,
}

impl CommandLog {
    /// Opens the log, restoring registered clients from the store.
    pub fn open(store: Arc<dyn LogStore>) -> Result<Self, StoreError> {
        let mut state = LogState {
            next_client_id: 1,
            ..LogState::default()
        };
        for client in store.load_clients()? {
            state.next_client_id = state.next_client_id.max(client.client_id + 1);
            state.clients.insert(client.client_id, client);
        }
        if !state.clients.is_empty() {
            log::info!("Restored {} registered clients", state.clients.len());
        }
        Ok(Self {
            store,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a new client session and returns its id. Ids are never
    /// reused, including across restarts.
    pub fn register_client(
        &self,
        user_id: u64,
        graph_id: u64,
        name: &str,
    ) -> Result<ClientId, StoreError> {
        let mut state = self.lock();
        let record = ClientRecord {
            client_id: state.next_client_id,
            user_id,
            graph_id,
            name: name.to_string(),
            last_client_sequence: None,
            last_accepted_sequence: None,
        };
        self.store.save_client(&record)?;
        state.next_client_id += 1;
        state.clients.insert(record.client_id, record.clone());
        log::debug!(
            "Registered client {} for user {user_id} on graph {graph_id}",
            record.client_id
        );
        Ok(record.client_id)
    }

    pub fn client(&self, client_id: ClientId) -> Option<ClientRecord> {
        self.lock().clients.get(&client_id).cloned()
    }

    /// Appends a canonical command from `client_id` to `graph_id`.
    ///
    /// When `client_sequence` is not above the client's watermark the
    /// command is a resend: nothing is written and the sequence of the
    /// client's last accepted command is returned.
    pub fn append(
        &self,
        graph_id: u64,
        client_id: ClientId,
        client_sequence: Option<u64>,
        command: &Command,
    ) -> Result<Appended, StoreError> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let mut client = state
            .clients
            .get(&client_id)
            .cloned()
            .ok_or_else(|| StoreError::DatabaseError(format!("Unknown client {client_id}")))?;

        if let (Some(incoming), Some(last)) = (client_sequence, client.last_client_sequence) {
            if incoming <= last {
                // A watermark is only ever written together with its sequence
                let sequence = client.last_accepted_sequence.ok_or_else(|| {
                    StoreError::DatabaseError(format!(
                        "Client {client_id} has a watermark but no accepted command"
                    ))
                })?;
                log::debug!(
                    "Ignoring resend {incoming} from client {client_id} (watermark {last})"
                );
                return Ok(Appended {
                    sequence,
                    appended: false,
                    superseded: Vec::new(),
                });
            }
        }

        if !state.graphs.contains_key(&graph_id) {
            let graph = self.load_graph(graph_id)?;
            state.graphs.insert(graph_id, graph);
        }
        let Some(graph) = state.graphs.get_mut(&graph_id) else {
            return Err(StoreError::DatabaseError(format!("Graph {graph_id} not loaded")));
        };

        let row = LogRow {
            graph_id,
            sequence: graph.last_sequence + 1,
            name: command.name().to_string(),
            client_id,
            params: command.params.clone(),
            is_effective: true,
        };
        let key = CompactionKey::of(command.kind, &command.params);
        let superseded: Vec<u64> = key
            .as_ref()
            .and_then(|k| graph.effective.get(k))
            .copied()
            .into_iter()
            .collect();

        if client_sequence.is_some() {
            client.last_client_sequence = client_sequence;
        }
        client.last_accepted_sequence = Some(row.sequence);
        self.store.append(Append {
            row: &row,
            client: &client,
            superseded: &superseded,
        })?;

        graph.last_sequence = row.sequence;
        if let Some(key) = key {
            graph.effective.insert(key, row.sequence);
        }
        state.clients.insert(client_id, client);

        log::trace!(
            "Graph {graph_id}: appended #{} {} from client {client_id}",
            row.sequence,
            row.name
        );
        Ok(Appended {
            sequence: row.sequence,
            appended: true,
            superseded,
        })
    }

    /// Rebuilds the in-memory view of one graph from the store.
    fn load_graph(&self, graph_id: u64) -> Result<GraphLog, StoreError> {
        let mut graph = GraphLog {
            last_sequence: self.store.last_sequence(graph_id)?,
            ..GraphLog::default()
        };
        let mut after = 0;
        loop {
            let rows = self.store.read(graph_id, after, 1024, false)?;
            let Some(last) = rows.last() else { break };
            after = last.sequence;
            for row in &rows {
                let Ok(kind) = row.name.parse::<CommandKind>() else {
                    continue;
                };
                if let Some(key) = CompactionKey::of(kind, &row.params) {
                    graph.effective.insert(key, row.sequence);
                }
            }
        }
        Ok(graph)
    }

    /// Up to `limit` rows of `graph_id` after sequence `after`, ascending.
    /// `history` includes superseded rows.
    pub fn read(
        &self,
        graph_id: u64,
        after: u64,
        limit: usize,
        history: bool,
    ) -> Result<Vec<LogRow>, StoreError> {
        self.store.read(graph_id, after, limit, history)
    }

    pub fn last_sequence(&self, graph_id: u64) -> Result<u64, StoreError> {
        if let Some(graph) = self.lock().graphs.get(&graph_id) {
            return Ok(graph.last_sequence);
        }
        self.store.last_sequence(graph_id)
    }
}
