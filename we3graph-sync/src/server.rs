//! WebSocket front end for the graph service.
//!
//! Architecture:
//! ```text
//! Session A ──┐                      ┌── CommandLog ── LogStore
//!             ├── SyncServer ── GraphService            ├── MemoryLogStore
//! Session B ──┘   (one task per      └── tokens         └── RocksLogStore
//!                  connection)
//! ```
//!
//! Each text frame is one request envelope `{Id, Method, Resource, Body}`,
//! answered on the same connection by `{Id, Status, Body}`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{
    RequestEnvelope, ResponseEnvelope, ServiceRequest, ServiceResponse, STATUS_BAD_REQUEST,
};
use crate::service::GraphService;
use crate::stats::ServerStats;
use crate::storage::{LogStore, MemoryLogStore, RocksLogStore, StoreConfig, StoreError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Commands per `GET commands` page
    pub page_size: usize,
    /// Lifetime of a graph access token
    pub token_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            storage_path: None,
            page_size: GraphService::DEFAULT_PAGE_SIZE,
            token_ttl: GraphService::DEFAULT_TOKEN_TTL,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `WE3GRAPH_BIND_ADDR`, `WE3GRAPH_STORAGE_PATH`
    /// and `WE3GRAPH_PAGE_SIZE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("WE3GRAPH_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(path) = std::env::var("WE3GRAPH_STORAGE_PATH") {
            if !path.is_empty() {
                config.storage_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(size) = std::env::var("WE3GRAPH_PAGE_SIZE") {
            match size.parse::<usize>() {
                Ok(size) if size > 0 => config.page_size = size,
                _ => log::warn!("Ignoring invalid WE3GRAPH_PAGE_SIZE={size}"),
            }
        }
        config
    }

    /// In-memory server on `bind_addr`.
    pub fn for_testing(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    service: Arc<GraphService>,
}

impl SyncServer {
    /// Create a server, opening persistent storage if configured.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn LogStore> = match &config.storage_path {
            Some(path) => {
                log::info!("Opening command log at {}", path.display());
                Arc::new(RocksLogStore::open(StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                })?)
            }
            None => Arc::new(MemoryLogStore::new()),
        };
        let service = GraphService::with_store(store)?
            .with_page_size(config.page_size)
            .with_token_ttl(config.token_ttl);
        Ok(Self::with_service(config, Arc::new(service)))
    }

    /// Serve an existing service, e.g. one with a custom access policy.
    pub fn with_service(config: ServerConfig, service: Arc<GraphService>) -> Self {
        Self { config, service }
    }

    pub fn service(&self) -> &Arc<GraphService> {
        &self.service
    }

    pub fn stats(&self) -> ServerStats {
        self.service.stats()
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let service = self.service.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, service).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        service: Arc<GraphService>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        service.record_connection();
        log::info!("WebSocket connection established from {addr}");

        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let reply = Self::dispatch(&service, &text);
                    let encoded = reply.encode()?;
                    ws_sender.send(Message::Text(encoded.into())).await?;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    log::debug!("Read error from {addr}: {e}");
                    break;
                }
            }
        }

        log::info!("Connection from {addr} closed");
        Ok(())
    }

    /// Decodes one request frame and runs it. Frames that do not decode
    /// are answered with 400 under id 0 when no id can be recovered.
    fn dispatch(service: &GraphService, text: &str) -> ResponseEnvelope {
        let envelope = match RequestEnvelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let id = serde_json::from_str::<serde_json::Value>(text)
                    .ok()
                    .and_then(|v| v.get("Id").and_then(serde_json::Value::as_u64))
                    .unwrap_or(0);
                log::warn!("Failed to decode request frame {id}: {e}");
                let response = ServiceResponse::error(STATUS_BAD_REQUEST, e.to_string());
                return ResponseEnvelope::new(id, response);
            }
        };
        let response = match ServiceRequest::from_envelope(&envelope) {
            Ok(request) => service.handle(request),
            Err(e) => {
                log::warn!(
                    "Malformed {:?} {} request {}: {e}",
                    envelope.method,
                    envelope.resource,
                    envelope.id
                );
                ServiceResponse::error(STATUS_BAD_REQUEST, e.to_string())
            }
        };
        ResponseEnvelope::new(envelope.id, response)
    }
}
