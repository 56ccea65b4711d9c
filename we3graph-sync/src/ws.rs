//! WebSocket transport.
//!
//! One connection carries every request of a session. Requests are tagged
//! with an `Id`; a reader task hands each reply to the caller waiting on
//! that id, so the two pipelines can have requests outstanding at once.
//!
//! ```text
//! send() ──► pending[id] = oneshot ──► writer task ──► socket
//!   ▲                                                    │
//!   └────────── oneshot ◄── pending.remove(id) ◄── reader task
//! ```
//!
//! The connection is opened on first use and reopened by the next request
//! after it drops. Requests in flight when it drops fail with
//! [`TransportError::Closed`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;
use crate::protocol::{ResponseEnvelope, ServiceRequest, ServiceResponse};
use crate::transport::Transport;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<ResponseEnvelope>>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<ResponseEnvelope>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

struct Connection {
    writer: mpsc::Sender<String>,
    pending: Pending,
    alive: Arc<AtomicBool>,
}

impl Connection {
    async fn open(url: &str) -> Result<Self, TransportError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        log::debug!("Connected to {url}");

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        let writer_alive = alive.clone();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            writer_alive.store(false, Ordering::Release);
            let _ = ws_writer.close().await;
        });

        // Reader task: route replies to their callers
        let reader_pending = pending.clone();
        let reader_alive = alive.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ResponseEnvelope::decode(&text) {
                        Ok(envelope) => {
                            let waiter = lock(&reader_pending).remove(&envelope.id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(envelope);
                                }
                                None => log::debug!("Late reply {} dropped", envelope.id),
                            }
                        }
                        Err(e) => log::warn!("Undecodable reply from {url}: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            reader_alive.store(false, Ordering::Release);
            // Dropping the senders fails every request still waiting
            lock(&reader_pending).clear();
            log::debug!("Connection to {url} closed");
        });

        Ok(Self {
            writer: out_tx,
            pending,
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.writer.is_closed()
    }
}

/// [`Transport`] over a WebSocket connection to a [`crate::SyncServer`].
pub struct WsTransport {
    url: String,
    timeout: Duration,
    connection: tokio::sync::Mutex<Option<Arc<Connection>>>,
    next_id: AtomicU64,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            connection: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The live connection, opening a new one if needed.
    async fn connection(&self) -> Result<Arc<Connection>, TransportError> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref().filter(|c| c.is_alive()) {
            return Ok(connection.clone());
        }
        let connection = Arc::new(
            tokio::time::timeout(self.timeout, Connection::open(&self.url))
                .await
                .map_err(|_| TransportError::Timeout(self.timeout))??,
        );
        *slot = Some(connection.clone());
        Ok(connection)
    }

    async fn roundtrip(&self, request: ServiceRequest) -> Result<ServiceResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = request
            .to_envelope(id)
            .and_then(|envelope| envelope.encode())
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let connection = self.connection().await?;
        let (tx, rx) = oneshot::channel();
        lock(&connection.pending).insert(id, tx);

        if connection.writer.send(text).await.is_err() {
            lock(&connection.pending).remove(&id);
            connection.alive.store(false, Ordering::Release);
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(envelope)) => Ok(envelope.into_response()),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                lock(&connection.pending).remove(&id);
                Err(TransportError::Timeout(self.timeout))
            }
        }
    }
}

impl Transport for WsTransport {
    fn send(
        &self,
        request: ServiceRequest,
    ) -> impl Future<Output = Result<ServiceResponse, TransportError>> + Send {
        self.roundtrip(request)
    }
}
