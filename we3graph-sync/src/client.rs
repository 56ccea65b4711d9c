//! Typed calls to the graph service over any [`Transport`].

use std::sync::Arc;
use std::time::Duration;
use we3graph_core::{ClientId, Command};

use crate::error::SyncError;
use crate::protocol::{
    CommandRecord, CreateClientRequest, CreateClientResponse, CreateTokenRequest,
    CreateTokenResponse, GetCommandsQuery, Permission, PostCommandRequest, PostCommandResponse,
    ServiceRequest, IN_EFFECTIVE_YES,
};
use crate::transport::Transport;

/// Who is calling and for which graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: u64,
    pub who_token: String,
    pub graph_id: u64,
}

/// Service calls on behalf of one user and graph. Every call resolves
/// within `timeout`.
pub struct ServiceClient<T> {
    transport: Arc<T>,
    credentials: Credentials,
    timeout: Duration,
}

impl<T: Transport> ServiceClient<T> {
    pub fn new(transport: Arc<T>, credentials: Credentials, timeout: Duration) -> Self {
        Self {
            transport,
            credentials,
            timeout,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    async fn call<R: serde::de::DeserializeOwned>(
        &self,
        request: ServiceRequest,
    ) -> Result<R, SyncError> {
        let response = tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| {
                SyncError::TransientServiceFailure(format!("no reply within {:?}", self.timeout))
            })??;
        if !response.is_success() {
            return Err(SyncError::from_response(&response));
        }
        response
            .parse()
            .map_err(|e| SyncError::MalformedResponse(e.to_string()))
    }

    pub async fn create_graph_access_token(
        &self,
        permission: Permission,
    ) -> Result<String, SyncError> {
        let response: CreateTokenResponse = self
            .call(ServiceRequest::CreateGraphAccessToken(CreateTokenRequest {
                user_id: self.credentials.user_id,
                who_token: self.credentials.who_token.clone(),
                graph_id: self.credentials.graph_id,
                permission_type: permission.code(),
            }))
            .await?;
        Ok(response.graph_access_token)
    }

    pub async fn create_client(&self, name: &str, token: &str) -> Result<ClientId, SyncError> {
        let response: CreateClientResponse = self
            .call(ServiceRequest::CreateClient(CreateClientRequest {
                user_id: self.credentials.user_id,
                who_token: self.credentials.who_token.clone(),
                graph_id: self.credentials.graph_id,
                client_name: name.to_string(),
                graph_access_token: token.to_string(),
            }))
            .await?;
        Ok(response.created_client_id)
    }

    /// Posts one command. `client_sequence` lets the service drop resends.
    pub async fn post_command(
        &self,
        client_id: ClientId,
        token: &str,
        command: &Command,
        client_sequence: Option<u64>,
    ) -> Result<PostCommandResponse, SyncError> {
        let [param1, param2, param3, param4, param5] = command.params.clone();
        self.call(ServiceRequest::PostCommand(PostCommandRequest {
            user_id: self.credentials.user_id,
            who_token: self.credentials.who_token.clone(),
            graph_id: self.credentials.graph_id,
            client_id,
            graph_access_token: token.to_string(),
            command_name: command.name().to_string(),
            param1,
            param2,
            param3,
            param4,
            param5,
            client_sequence,
        }))
        .await
    }

    /// One page of commands after `after`, ascending.
    pub async fn get_commands(
        &self,
        token: &str,
        after: u64,
        history: bool,
    ) -> Result<Vec<CommandRecord>, SyncError> {
        self.call(ServiceRequest::GetCommands(GetCommandsQuery {
            graph_id: self.credentials.graph_id,
            last_command_id: after,
            graph_access_token: token.to_string(),
            in_effective: history.then(|| IN_EFFECTIVE_YES.to_string()),
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::protocol::{ServiceResponse, STATUS_FORBIDDEN};
    use std::future::Future;

    struct Canned(ServiceResponse);

    impl Transport for Canned {
        fn send(
            &self,
            _request: ServiceRequest,
        ) -> impl Future<Output = Result<ServiceResponse, TransportError>> + Send {
            let response = self.0.clone();
            async move { Ok(response) }
        }
    }

    struct Hanging;

    impl Transport for Hanging {
        fn send(
            &self,
            _request: ServiceRequest,
        ) -> impl Future<Output = Result<ServiceResponse, TransportError>> + Send {
            std::future::pending()
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            user_id: 1,
            who_token: "w".into(),
            graph_id: 2,
        }
    }

    #[tokio::test]
    async fn test_hanging_request_times_out() {
        let client = ServiceClient::new(
            Arc::new(Hanging),
            credentials(),
            Duration::from_millis(20),
        );
        let result = client.get_commands("t", 0, false).await;
        assert!(matches!(result, Err(SyncError::TransientServiceFailure(_))));
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_authorization_failure() {
        let client = ServiceClient::new(
            Arc::new(Canned(ServiceResponse::error(STATUS_FORBIDDEN, "read only"))),
            credentials(),
            Duration::from_secs(1),
        );
        let result = client.create_client("c", "t").await;
        assert_eq!(
            result,
            Err(SyncError::AuthorizationFailure("read only".into()))
        );
    }

    #[tokio::test]
    async fn test_wrong_body_shape_is_malformed() {
        let client = ServiceClient::new(
            Arc::new(Canned(ServiceResponse::ok(&serde_json::json!({"Nope": 1})))),
            credentials(),
            Duration::from_secs(1),
        );
        let result = client.get_commands("t", 0, false).await;
        assert!(matches!(result, Err(SyncError::MalformedResponse(_))));
    }
}
