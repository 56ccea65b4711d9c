//! # we3graph-sync — Server-mediated graph collaboration
//!
//! Clients edit a local copy of a shared graph and exchange commands
//! through a central, sequenced command log. No client ever talks to
//! another directly.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   POST commands    ┌─────────────┐
//! │ Session     │ ─────────────────► │ GraphService│
//! │ (per user)  │ ◄───────────────── │ (central)   │
//! └──────┬──────┘   GET commands     └──────┬──────┘
//!        │           (polled)               │
//!        ▼                                  ▼
//! ┌─────────────┐                    ┌─────────────┐
//! │ GraphStore  │                    │ CommandLog  │
//! │ (replica)   │                    │ (sequenced, │
//! └─────────────┘                    │  compacted) │
//!                                    └──────┬──────┘
//!                                           │
//!                                   ┌───────┴───────┐
//!                                   │ LogStore      │
//!                                   │ Memory/RocksDB│
//!                                   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON request/response shapes and envelopes
//! - [`session`] — client session: local API, outgoing and incoming pipelines
//! - [`service`] — tokens, client registry and the command log behind the wire
//! - [`command_log`] — per-graph sequencing and compaction
//! - [`storage`] — durable log backends
//! - [`transport`], [`ws`] — in-process and WebSocket transports
//! - [`server`] — WebSocket front end for the service

pub mod client;
pub mod command_log;
pub mod error;
mod incoming;
mod outgoing;
pub mod protocol;
pub mod server;
pub mod service;
pub mod session;
pub mod stats;
pub mod storage;
pub mod transport;
pub mod ws;

// Re-exports for convenience
pub use client::{Credentials, ServiceClient};
pub use error::{SyncError, TransportError};
pub use command_log::{Appended, CommandLog, CompactionKey};
pub use outgoing::SendState;
pub use protocol::{
    CommandRecord, Permission, ProtocolError, RequestEnvelope, ResponseEnvelope, ServiceRequest,
    ServiceResponse,
};
pub use server::{ServerConfig, SyncServer};
pub use service::{AccessPolicy, AllowAll, GraphService, ServiceError};
pub use session::{Session, SessionConfig, StopMode, SyncEvent};
pub use stats::{ServerStats, SyncStats};
pub use storage::{
    ClientRecord, LogRow, LogStore, MemoryLogStore, RocksLogStore, StoreConfig, StoreError,
};
pub use transport::{LocalTransport, Transport};
pub use ws::WsTransport;
