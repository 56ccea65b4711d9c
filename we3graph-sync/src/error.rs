use std::time::Duration;
use thiserror::Error;

use crate::protocol::{ServiceResponse, STATUS_FORBIDDEN, STATUS_UNAUTHORIZED};

/// Failure to get a request to the service and a reply back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection closed")]
    Closed,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// What a session sees when talking to the service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Missing or invalid credentials
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),
    /// Valid identity without the required permission
    #[error("authorization failed: {0}")]
    AuthorizationFailure(String),
    /// Network or server error; the pipelines retry these
    #[error("service failure: {0}")]
    TransientServiceFailure(String),
    /// Reply did not have the expected shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl SyncError {
    /// Maps a non-success reply onto the error taxonomy.
    pub fn from_response(response: &ServiceResponse) -> Self {
        match response.status {
            STATUS_UNAUTHORIZED => SyncError::AuthenticationFailure(response.message()),
            STATUS_FORBIDDEN => SyncError::AuthorizationFailure(response.message()),
            _ => SyncError::TransientServiceFailure(response.message()),
        }
    }

    /// Transient failures and malformed replies are retried; auth failures
    /// are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientServiceFailure(_) | SyncError::MalformedResponse(_)
        )
    }
}

impl From<TransportError> for SyncError {
    fn from(e: TransportError) -> Self {
        SyncError::TransientServiceFailure(e.to_string())
    }
}
