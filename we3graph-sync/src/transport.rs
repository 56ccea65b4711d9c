//! How a session reaches the graph service.
//!
//! A transport moves one [`ServiceRequest`] to the service and brings back
//! its [`ServiceResponse`]. It reports only delivery failures; non-200
//! statuses are ordinary responses that [`crate::client::ServiceClient`]
//! maps onto [`crate::SyncError`].

use std::future::Future;
use std::sync::Arc;

use crate::error::TransportError;
use crate::protocol::{ServiceRequest, ServiceResponse};
use crate::service::GraphService;

pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: ServiceRequest,
    ) -> impl Future<Output = Result<ServiceResponse, TransportError>> + Send;
}

/// Calls a [`GraphService`] in the same process.
#[derive(Clone)]
pub struct LocalTransport {
    service: Arc<GraphService>,
}

impl LocalTransport {
    pub fn new(service: Arc<GraphService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<GraphService> {
        &self.service
    }
}

impl Transport for LocalTransport {
    fn send(
        &self,
        request: ServiceRequest,
    ) -> impl Future<Output = Result<ServiceResponse, TransportError>> + Send {
        let service = self.service.clone();
        async move { Ok(service.handle(request)) }
    }
}
