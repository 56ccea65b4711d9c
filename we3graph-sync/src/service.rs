//! The graph service: access tokens, client registration and the command log
//! behind the four wire operations.
//!
//! ```text
//! ServiceRequest ──► authenticate (AccessPolicy) ──► token check ──► CommandLog
//!                          │ 401                        │ 403            │ 400 / 500
//!                          ▼                            ▼                ▼
//!                                   ServiceResponse {status, body}
//! ```
//!
//! Handling is synchronous. Both transports call [`GraphService::handle`]
//! directly; the WebSocket server does so from its connection tasks.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;
use we3graph_core::Command;

use crate::command_log::CommandLog;
use crate::protocol::{
    CommandRecord, CreateClientRequest, CreateClientResponse, CreateTokenRequest,
    CreateTokenResponse, GetCommandsQuery, Permission, PostCommandRequest, PostCommandResponse,
    ServiceRequest, ServiceResponse, STATUS_BAD_REQUEST, STATUS_FORBIDDEN, STATUS_INTERNAL,
    STATUS_UNAUTHORIZED,
};
use crate::stats::{bump, AtomicServerStats, ServerStats};
use crate::storage::{LogStore, MemoryLogStore, StoreError};

/// Why a request was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => STATUS_BAD_REQUEST,
            ServiceError::Unauthenticated(_) => STATUS_UNAUTHORIZED,
            ServiceError::Forbidden(_) => STATUS_FORBIDDEN,
            ServiceError::Internal(_) => STATUS_INTERNAL,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        ServiceError::Internal(e.to_string())
    }
}

/// Credential verification and per-graph permissions, owned by whoever
/// manages users.
pub trait AccessPolicy: Send + Sync {
    fn authenticate(&self, user_id: u64, who_token: &str) -> bool;

    fn permission(&self, user_id: u64, graph_id: u64) -> Permission;
}

/// Accepts every user with full rights on every graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn authenticate(&self, _user_id: u64, _who_token: &str) -> bool {
        true
    }

    fn permission(&self, _user_id: u64, _graph_id: u64) -> Permission {
        Permission::Moderator
    }
}

#[derive(Debug, Clone)]
struct TokenGrant {
    user_id: u64,
    graph_id: u64,
    permission: Permission,
    expires_at: Instant,
}

/// Serves graph access tokens, client ids and the command log.
pub struct GraphService {
    log: CommandLog,
    policy: Arc<dyn AccessPolicy>,
    tokens: RwLock<HashMap<String, TokenGrant>>,
    page_size: usize,
    token_ttl: Duration,
    stats: AtomicServerStats,
}

impl GraphService {
    /// Default number of commands per `GET commands` page.
    pub const DEFAULT_PAGE_SIZE: usize = 100;

    /// Default lifetime of a graph access token.
    pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

    pub fn new(log: CommandLog) -> Self {
        Self {
            log,
            policy: Arc::new(AllowAll),
            tokens: RwLock::new(HashMap::new()),
            page_size: Self::DEFAULT_PAGE_SIZE,
            token_ttl: Self::DEFAULT_TOKEN_TTL,
            stats: AtomicServerStats::default(),
        }
    }

    /// A service over a fresh in-memory log.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_store(Arc::new(MemoryLogStore::new()))
    }

    pub fn with_store(store: Arc<dyn LogStore>) -> Result<Self, StoreError> {
        Ok(Self::new(CommandLog::open(store)?))
    }

    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_token_ttl(mut self, token_ttl: Duration) -> Self {
        self.token_ttl = token_ttl;
        self
    }

    pub fn log(&self) -> &CommandLog {
        &self.log
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.snapshot()
    }

    pub(crate) fn record_connection(&self) {
        bump(&self.stats.connections);
    }

    /// Handles one request. Failures become error responses carrying a
    /// `Message`.
    pub fn handle(&self, request: ServiceRequest) -> ServiceResponse {
        bump(&self.stats.requests);
        let result = match request {
            ServiceRequest::CreateGraphAccessToken(req) => {
                self.create_token(req).map(|r| ServiceResponse::ok(&r))
            }
            ServiceRequest::CreateClient(req) => {
                self.create_client(req).map(|r| ServiceResponse::ok(&r))
            }
            ServiceRequest::PostCommand(req) => {
                self.post_command(req).map(|r| ServiceResponse::ok(&r))
            }
            ServiceRequest::GetCommands(query) => {
                self.get_commands(query).map(|r| ServiceResponse::ok(&r))
            }
        };
        result.unwrap_or_else(|e| {
            if matches!(e, ServiceError::Internal(_)) {
                log::error!("Request failed: {e}");
            } else {
                log::debug!("Request refused ({}): {e}", e.status());
            }
            ServiceResponse::error(e.status(), e.to_string())
        })
    }

    fn authenticate(&self, user_id: u64, who_token: &str) -> Result<(), ServiceError> {
        if self.policy.authenticate(user_id, who_token) {
            Ok(())
        } else {
            Err(ServiceError::Unauthenticated(format!(
                "Invalid credentials for user {user_id}"
            )))
        }
    }

    /// Resolves `token` to a live grant on `graph_id` of at least `required`.
    fn grant(
        &self,
        token: &str,
        graph_id: u64,
        required: Permission,
    ) -> Result<TokenGrant, ServiceError> {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        let grant = match tokens.get(token) {
            Some(grant) if grant.expires_at <= Instant::now() => {
                tokens.remove(token);
                return Err(ServiceError::Forbidden("Graph access token expired".into()));
            }
            Some(grant) => grant.clone(),
            None => return Err(ServiceError::Forbidden("Unknown graph access token".into())),
        };
        if grant.graph_id != graph_id {
            return Err(ServiceError::Forbidden(format!(
                "Token was not issued for graph {graph_id}"
            )));
        }
        if grant.permission < required {
            return Err(ServiceError::Forbidden(format!(
                "{required:?} access required, token grants {:?}",
                grant.permission
            )));
        }
        Ok(grant)
    }

    fn create_token(&self, req: CreateTokenRequest) -> Result<CreateTokenResponse, ServiceError> {
        self.authenticate(req.user_id, &req.who_token)?;
        let requested = Permission::from_code(req.permission_type)
            .filter(|p| *p > Permission::NoAccess)
            .ok_or_else(|| {
                ServiceError::BadRequest(format!("Invalid PermissionType {}", req.permission_type))
            })?;
        let allowed = self.policy.permission(req.user_id, req.graph_id);
        if requested > allowed {
            return Err(ServiceError::Forbidden(format!(
                "User {} has {allowed:?} access to graph {}",
                req.user_id, req.graph_id
            )));
        }

        let token = Uuid::new_v4().to_string();
        let grant = TokenGrant {
            user_id: req.user_id,
            graph_id: req.graph_id,
            permission: requested,
            expires_at: Instant::now() + self.token_ttl,
        };
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        tokens.retain(|_, g| g.expires_at > now);
        tokens.insert(token.clone(), grant);
        log::info!(
            "Issued {requested:?} token for user {} on graph {}",
            req.user_id,
            req.graph_id
        );
        Ok(CreateTokenResponse {
            graph_access_token: token,
        })
    }

    fn create_client(
        &self,
        req: CreateClientRequest,
    ) -> Result<CreateClientResponse, ServiceError> {
        self.authenticate(req.user_id, &req.who_token)?;
        let grant = self.grant(&req.graph_access_token, req.graph_id, Permission::ReadOnly)?;
        if grant.user_id != req.user_id {
            return Err(ServiceError::Forbidden("Token belongs to another user".into()));
        }
        let client_id = self
            .log
            .register_client(req.user_id, req.graph_id, &req.client_name)?;
        log::info!(
            "Client {client_id} ({}) joined graph {}",
            req.client_name,
            req.graph_id
        );
        Ok(CreateClientResponse {
            created_client_id: client_id,
        })
    }

    fn post_command(&self, req: PostCommandRequest) -> Result<PostCommandResponse, ServiceError> {
        self.authenticate(req.user_id, &req.who_token)?;
        let grant = self.grant(&req.graph_access_token, req.graph_id, Permission::Write)?;
        if grant.user_id != req.user_id {
            return Err(ServiceError::Forbidden("Token belongs to another user".into()));
        }
        match self.log.client(req.client_id) {
            Some(client) if client.user_id == req.user_id && client.graph_id == req.graph_id => {}
            _ => {
                return Err(ServiceError::Forbidden(format!(
                    "Client {} is not registered to user {} on graph {}",
                    req.client_id, req.user_id, req.graph_id
                )))
            }
        }

        let command = Command::from_wire(&req.command_name, req.params())
            .and_then(|c| c.with_client(req.client_id).canonicalize())
            .map_err(|e| ServiceError::BadRequest(e.to_string()))?;

        let appended = self
            .log
            .append(req.graph_id, req.client_id, req.client_sequence, &command)?;
        if appended.appended {
            bump(&self.stats.commands_appended);
            self.stats
                .commands_compacted
                .fetch_add(appended.superseded.len() as u64, Ordering::Relaxed);
        }
        Ok(PostCommandResponse {
            id: appended.sequence,
            appended: appended.appended,
        })
    }

    fn get_commands(&self, query: GetCommandsQuery) -> Result<Vec<CommandRecord>, ServiceError> {
        self.grant(&query.graph_access_token, query.graph_id, Permission::ReadOnly)?;
        let rows = self.log.read(
            query.graph_id,
            query.last_command_id,
            self.page_size,
            query.wants_history(),
        )?;
        Ok(rows.iter().map(|row| row.to_record()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::STATUS_OK;

    struct Fixed {
        permission: Permission,
    }

    impl AccessPolicy for Fixed {
        fn authenticate(&self, _user_id: u64, who_token: &str) -> bool {
            who_token == "secret"
        }

        fn permission(&self, _user_id: u64, _graph_id: u64) -> Permission {
            self.permission
        }
    }

    fn service(permission: Permission) -> GraphService {
        GraphService::in_memory()
            .unwrap()
            .with_policy(Arc::new(Fixed { permission }))
    }

    fn token(service: &GraphService, user_id: u64, permission: Permission) -> ServiceResponse {
        service.handle(ServiceRequest::CreateGraphAccessToken(CreateTokenRequest {
            user_id,
            who_token: "secret".into(),
            graph_id: 1,
            permission_type: permission.code(),
        }))
    }

    fn session(service: &GraphService, user_id: u64) -> (String, u64) {
        let token: CreateTokenResponse = token(service, user_id, Permission::Write).parse().unwrap();
        let client: CreateClientResponse = service
            .handle(ServiceRequest::CreateClient(CreateClientRequest {
                user_id,
                who_token: "secret".into(),
                graph_id: 1,
                client_name: "test".into(),
                graph_access_token: token.graph_access_token.clone(),
            }))
            .parse()
            .unwrap();
        (token.graph_access_token, client.created_client_id)
    }

    fn post(
        service: &GraphService,
        token: &str,
        client_id: u64,
        name: &str,
        params: [&str; 3],
    ) -> ServiceResponse {
        service.handle(ServiceRequest::PostCommand(PostCommandRequest {
            user_id: 7,
            who_token: "secret".into(),
            graph_id: 1,
            client_id,
            graph_access_token: token.into(),
            command_name: name.into(),
            param1: params[0].into(),
            param2: params[1].into(),
            param3: params[2].into(),
            param4: "0".into(),
            param5: String::new(),
            client_sequence: None,
        }))
    }

    fn get(service: &GraphService, token: &str, after: u64, history: bool) -> Vec<CommandRecord> {
        service
            .handle(ServiceRequest::GetCommands(GetCommandsQuery {
                graph_id: 1,
                last_command_id: after,
                graph_access_token: token.into(),
                in_effective: history.then(|| "Yes".to_string()),
            }))
            .parse()
            .unwrap()
    }

    #[test]
    fn test_bad_credentials_are_401() {
        let service = service(Permission::Write);
        let resp = service.handle(ServiceRequest::CreateGraphAccessToken(CreateTokenRequest {
            user_id: 1,
            who_token: "wrong".into(),
            graph_id: 1,
            permission_type: 1,
        }));
        assert_eq!(resp.status, STATUS_UNAUTHORIZED);
    }

    #[test]
    fn test_token_above_user_permission_is_403() {
        let service = service(Permission::ReadOnly);
        assert_eq!(token(&service, 1, Permission::Write).status, STATUS_FORBIDDEN);
        assert_eq!(token(&service, 1, Permission::ReadOnly).status, STATUS_OK);
    }

    #[test]
    fn test_read_only_token_cannot_post() {
        let service = service(Permission::ReadOnly);
        let token: CreateTokenResponse =
            token(&service, 7, Permission::ReadOnly).parse().unwrap();
        let client: CreateClientResponse = service
            .handle(ServiceRequest::CreateClient(CreateClientRequest {
                user_id: 7,
                who_token: "secret".into(),
                graph_id: 1,
                client_name: "viewer".into(),
                graph_access_token: token.graph_access_token.clone(),
            }))
            .parse()
            .unwrap();
        let resp = post(
            &service,
            &token.graph_access_token,
            client.created_client_id,
            "InsertVertex",
            ["1", "0", "0"],
        );
        assert_eq!(resp.status, STATUS_FORBIDDEN);
        assert!(get(&service, &token.graph_access_token, 0, false).is_empty());
    }

    #[test]
    fn test_unknown_token_is_403() {
        let service = service(Permission::Write);
        let resp = service.handle(ServiceRequest::GetCommands(GetCommandsQuery {
            graph_id: 1,
            last_command_id: 0,
            graph_access_token: "forged".into(),
            in_effective: None,
        }));
        assert_eq!(resp.status, STATUS_FORBIDDEN);
    }

    #[test]
    fn test_expired_token_is_403() {
        let service = service(Permission::Write).with_token_ttl(Duration::ZERO);
        let token: CreateTokenResponse = token(&service, 7, Permission::Write).parse().unwrap();
        let resp = service.handle(ServiceRequest::GetCommands(GetCommandsQuery {
            graph_id: 1,
            last_command_id: 0,
            graph_access_token: token.graph_access_token,
            in_effective: None,
        }));
        assert_eq!(resp.status, STATUS_FORBIDDEN);
    }

    #[test]
    fn test_client_of_other_user_is_403() {
        let service = service(Permission::Write);
        let (_, foreign_client) = session(&service, 8);
        let (token, _) = session(&service, 7);
        let resp = post(&service, &token, foreign_client, "InsertVertex", ["1", "0", "0"]);
        assert_eq!(resp.status, STATUS_FORBIDDEN);
    }

    #[test]
    fn test_malformed_command_is_400() {
        let service = service(Permission::Write);
        let (token, client) = session(&service, 7);
        let unknown = post(&service, &token, client, "Teleport", ["1", "0", "0"]);
        assert_eq!(unknown.status, STATUS_BAD_REQUEST);
        let bad_number = post(&service, &token, client, "InsertVertex", ["1", "abc", "0"]);
        assert_eq!(bad_number.status, STATUS_BAD_REQUEST);
        assert!(get(&service, &token, 0, true).is_empty());
    }

    #[test]
    fn test_commands_are_canonicalized_and_compacted() {
        let service = service(Permission::Write);
        let (token, client) = session(&service, 7);
        let vertex = format!("{client}-1");

        let first = post(&service, &token, client, "InsertVertex", ["1", "0", "0"]);
        let first: PostCommandResponse = first.parse().unwrap();
        assert_eq!(first.id, 1);
        assert!(first.appended);

        post(&service, &token, client, "MoveVertex", [&vertex, "1.50", "2"]);
        post(&service, &token, client, "MoveVertex", [&vertex, "3", " 4 "]);

        let effective = get(&service, &token, 0, false);
        assert_eq!(effective.len(), 2);
        assert_eq!(effective[1].id, 3);
        assert_eq!(effective[1].param3, "4");
        assert_eq!(get(&service, &token, 0, true).len(), 3);
        assert_eq!(get(&service, &token, 1, false).len(), 1);

        let stats = service.stats();
        assert_eq!(stats.commands_appended, 3);
        assert_eq!(stats.commands_compacted, 1);
    }

    #[test]
    fn test_page_size_caps_reads() {
        let service = service(Permission::Write).with_page_size(2);
        let (token, client) = session(&service, 7);
        for i in 1..=5 {
            post(&service, &token, client, "InsertVertex", [&i.to_string(), "0", "0"]);
        }
        let page = get(&service, &token, 0, false);
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
        let rest = get(&service, &token, 4, false);
        assert_eq!(rest.len(), 1);
    }
}
