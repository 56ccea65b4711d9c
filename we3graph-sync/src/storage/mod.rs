//! Durable backing for the server command log.
//!
//! ```text
//! ┌─────────────┐   Append{row, client, superseded}   ┌──────────────┐
//! │ CommandLog  │ ──────────────────────────────────► │ LogStore     │
//! │ (sequencer, │                                     │  Memory      │
//! │  compactor) │ ◄────────────────────────────────── │  RocksDB     │
//! └─────────────┘   read(graph, after, limit, all?)   └──────────────┘
//! ```
//!
//! Rows are never deleted. Compaction only flips `is_effective`, so the
//! history view stays exact.

pub mod rocks;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use we3graph_core::{ClientId, Command, CommandError, PARAM_COUNT};

use crate::protocol::CommandRecord;

pub use rocks::{RocksLogStore, StoreConfig};

/// One accepted command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    pub graph_id: u64,
    pub sequence: u64,
    /// Canonical command name
    pub name: String,
    pub client_id: ClientId,
    /// Canonically encoded parameters
    pub params: [String; PARAM_COUNT],
    pub is_effective: bool,
}

impl LogRow {
    pub fn to_record(&self) -> CommandRecord {
        let [param1, param2, param3, param4, param5] = self.params.clone();
        CommandRecord {
            id: self.sequence,
            name: self.name.clone(),
            client_id: self.client_id,
            param1,
            param2,
            param3,
            param4,
            param5,
        }
    }

    pub fn to_command(&self) -> Result<Command, CommandError> {
        Ok(Command::from_wire(&self.name, self.params.clone())?
            .with_client(self.client_id)
            .with_sequence(self.sequence))
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (row, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(row)
    }
}

/// A client session registered with the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: ClientId,
    pub user_id: u64,
    pub graph_id: u64,
    pub name: String,
    /// Highest `ClientSequence` accepted from this client
    pub last_client_sequence: Option<u64>,
    /// Log sequence given to this client's last accepted command
    pub last_accepted_sequence: Option<u64>,
}

impl ClientRecord {
    pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(record)
    }
}

/// Everything one accepted command changes, written atomically.
#[derive(Debug, Clone, Copy)]
pub struct Append<'a> {
    pub row: &'a LogRow,
    /// The originating client with its updated send watermark
    pub client: &'a ClientRecord,
    /// Earlier sequences of the same graph this row supersedes
    pub superseded: &'a [u64],
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Row not found
    NotFound { graph_id: u64, sequence: u64 },
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound { graph_id, sequence } => {
                write!(f, "Command {sequence} of graph {graph_id} not found")
            }
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// An ordered, append-only store of command rows per graph.
pub trait LogStore: Send + Sync {
    /// Persists a row, its client's watermark and the superseded flags in a
    /// single atomic write.
    fn append(&self, append: Append<'_>) -> Result<(), StoreError>;

    /// Rows of `graph_id` with sequence greater than `after`, ascending, at
    /// most `limit`. Superseded rows are skipped unless `include_ineffective`.
    fn read(
        &self,
        graph_id: u64,
        after: u64,
        limit: usize,
        include_ineffective: bool,
    ) -> Result<Vec<LogRow>, StoreError>;

    /// Highest sequence stored for `graph_id`, 0 when empty.
    fn last_sequence(&self, graph_id: u64) -> Result<u64, StoreError>;

    fn save_client(&self, client: &ClientRecord) -> Result<(), StoreError>;

    fn load_clients(&self) -> Result<Vec<ClientRecord>, StoreError>;
}

/// In-process log store. Sequences of a graph are contiguous from 1, so a
/// row lives at index `sequence - 1`.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    graphs: RwLock<HashMap<u64, Vec<LogRow>>>,
    clients: RwLock<HashMap<ClientId, ClientRecord>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryLogStore {
    fn append(&self, append: Append<'_>) -> Result<(), StoreError> {
        let mut graphs = self.graphs.write().unwrap_or_else(|e| e.into_inner());
        let rows = graphs.entry(append.row.graph_id).or_default();
        if append.row.sequence != rows.len() as u64 + 1 {
            return Err(StoreError::DatabaseError(format!(
                "sequence {} out of order for graph {} (last {})",
                append.row.sequence,
                append.row.graph_id,
                rows.len()
            )));
        }
        if let Some(&sequence) = append
            .superseded
            .iter()
            .find(|&&s| s == 0 || s > rows.len() as u64)
        {
            return Err(StoreError::NotFound {
                graph_id: append.row.graph_id,
                sequence,
            });
        }
        for &sequence in append.superseded {
            rows[(sequence - 1) as usize].is_effective = false;
        }
        rows.push(append.row.clone());

        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(append.client.client_id, append.client.clone());
        Ok(())
    }

    fn read(
        &self,
        graph_id: u64,
        after: u64,
        limit: usize,
        include_ineffective: bool,
    ) -> Result<Vec<LogRow>, StoreError> {
        let graphs = self.graphs.read().unwrap_or_else(|e| e.into_inner());
        let Some(rows) = graphs.get(&graph_id) else {
            return Ok(Vec::new());
        };
        let start = usize::try_from(after).unwrap_or(usize::MAX);
        Ok(rows
            .iter()
            .skip(start)
            .filter(|row| include_ineffective || row.is_effective)
            .take(limit)
            .cloned()
            .collect())
    }

    fn last_sequence(&self, graph_id: u64) -> Result<u64, StoreError> {
        let graphs = self.graphs.read().unwrap_or_else(|e| e.into_inner());
        Ok(graphs.get(&graph_id).map_or(0, |rows| rows.len() as u64))
    }

    fn save_client(&self, client: &ClientRecord) -> Result<(), StoreError> {
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(client.client_id, client.clone());
        Ok(())
    }

    fn load_clients(&self) -> Result<Vec<ClientRecord>, StoreError> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<ClientRecord> = clients.values().cloned().collect();
        all.sort_by_key(|c| c.client_id);
        Ok(all)
    }
}
