//! Entity identities minted without server coordination.
//!
//! Every session receives a client id from the server once, at start. From
//! then on it mints `(client_id, ++counter)` pairs locally. Client ids are
//! never shared between sessions, so the namespaces are disjoint and no two
//! sessions can produce the same [`EntityId`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Server-assigned identity of one client session.
pub type ClientId = u64;

/// Globally unique identity of a vertex or edge.
///
/// Serializes on the wire as `"owner-sequence"`, e.g. `"10-32"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    /// Client that minted this id
    pub owner: ClientId,
    /// Position in the owner's local counter, starting at 1
    pub sequence: u64,
}

impl EntityId {
    pub const fn new(owner: ClientId, sequence: u64) -> Self {
        Self { owner, sequence }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.owner, self.sequence)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("entity id '{0}' is missing the '-' separator")]
    MissingSeparator(String),
    #[error("entity id '{0}' has a non-numeric component")]
    InvalidComponent(String),
}

/// Parses a non-negative integer of at most 18 decimal digits.
pub(crate) fn parse_counter(text: &str) -> Option<u64> {
    if text.is_empty() || text.len() > 18 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

impl FromStr for EntityId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, sequence) = s
            .split_once('-')
            .ok_or_else(|| IdParseError::MissingSeparator(s.to_string()))?;
        match (parse_counter(owner), parse_counter(sequence)) {
            (Some(owner), Some(sequence)) => Ok(Self { owner, sequence }),
            _ => Err(IdParseError::InvalidComponent(s.to_string())),
        }
    }
}

/// Mints entity ids in the namespace of one client.
#[derive(Debug)]
pub struct IdAllocator {
    owner: ClientId,
    counter: AtomicU64,
}

impl IdAllocator {
    pub fn new(owner: ClientId) -> Self {
        Self {
            owner,
            counter: AtomicU64::new(0),
        }
    }

    /// Returns `(owner, ++counter)`.
    pub fn next_id(&self) -> EntityId {
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        EntityId::new(self.owner, sequence)
    }

    /// Raises the counter to at least `sequence` so an id already present in
    /// the log under this owner is never minted again.
    pub fn observe(&self, sequence: u64) {
        self.counter.fetch_max(sequence, Ordering::SeqCst);
    }

    pub fn owner(&self) -> ClientId {
        self.owner
    }

    /// Last sequence handed out (or observed).
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}
