//! Request/response shapes shared by sessions and the graph service.
//!
//! Four operations, addressed by method and resource:
//! ```text
//! POST graph-access-tokens  {UserID, WhoToken, GraphID, PermissionType}        → {GraphAccessToken}
//! POST clients              {UserID, WhoToken, GraphID, ClientName, Token}     → {CreatedClientID}
//! POST commands             {.., ClientID, CommandName, Param1..5, ClientSeq}  → {ID}
//! GET  commands             {GraphID, LastCommandID, Token, InEffective?}      → [{ID, Name, ClientID, Param1..5}]
//! ```
//!
//! Over WebSocket each request travels in a JSON text frame
//! `{Id, Method, Resource, Body}` and is answered by `{Id, Status, Body}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use we3graph_core::{ClientId, Command, CommandError, CommandKind};

pub const RESOURCE_TOKENS: &str = "graph-access-tokens";
pub const RESOURCE_CLIENTS: &str = "clients";
pub const RESOURCE_COMMANDS: &str = "commands";

/// Value of `InEffective` that selects the uncompacted history view.
pub const IN_EFFECTIVE_YES: &str = "Yes";

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL: u16 = 500;

/// Access level of a user on a graph, ordered from least to most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    NoAccess,
    ReadOnly,
    Write,
    Moderator,
}

impl Permission {
    pub fn code(self) -> i32 {
        match self {
            Permission::NoAccess => -1,
            Permission::ReadOnly => 0,
            Permission::Write => 1,
            Permission::Moderator => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Permission::NoAccess),
            0 => Some(Permission::ReadOnly),
            1 => Some(Permission::Write),
            2 => Some(Permission::Moderator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTokenRequest {
    #[serde(rename = "UserID")]
    pub user_id: u64,
    pub who_token: String,
    #[serde(rename = "GraphID")]
    pub graph_id: u64,
    pub permission_type: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTokenResponse {
    pub graph_access_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateClientRequest {
    #[serde(rename = "UserID")]
    pub user_id: u64,
    pub who_token: String,
    #[serde(rename = "GraphID")]
    pub graph_id: u64,
    pub client_name: String,
    pub graph_access_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateClientResponse {
    #[serde(rename = "CreatedClientID")]
    pub created_client_id: ClientId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PostCommandRequest {
    #[serde(rename = "UserID")]
    pub user_id: u64,
    pub who_token: String,
    #[serde(rename = "GraphID")]
    pub graph_id: u64,
    #[serde(rename = "ClientID")]
    pub client_id: ClientId,
    pub graph_access_token: String,
    pub command_name: String,
    #[serde(default)]
    pub param1: String,
    #[serde(default)]
    pub param2: String,
    #[serde(default)]
    pub param3: String,
    #[serde(default)]
    pub param4: String,
    #[serde(default)]
    pub param5: String,
    /// Position of this command in the sender's outgoing stream; lets the
    /// service recognise a resend of a command it already accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_sequence: Option<u64>,
}

impl PostCommandRequest {
    pub fn params(&self) -> [&str; 5] {
        [
            self.param1.as_str(),
            self.param2.as_str(),
            self.param3.as_str(),
            self.param4.as_str(),
            self.param5.as_str(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostCommandResponse {
    /// Sequence assigned to the command
    #[serde(rename = "ID")]
    pub id: u64,
    /// False when the command was a resend of one already in the log
    #[serde(rename = "Appended")]
    pub appended: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetCommandsQuery {
    #[serde(rename = "GraphID")]
    pub graph_id: u64,
    #[serde(rename = "LastCommandID")]
    pub last_command_id: u64,
    pub graph_access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_effective: Option<String>,
}

impl GetCommandsQuery {
    pub fn wants_history(&self) -> bool {
        self.in_effective.as_deref() == Some(IN_EFFECTIVE_YES)
    }
}

/// One row of `GET commands`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ClientID")]
    pub client_id: ClientId,
    #[serde(rename = "Param1", default)]
    pub param1: String,
    #[serde(rename = "Param2", default)]
    pub param2: String,
    #[serde(rename = "Param3", default)]
    pub param3: String,
    #[serde(rename = "Param4", default)]
    pub param4: String,
    #[serde(rename = "Param5", default)]
    pub param5: String,
}

impl CommandRecord {
    pub fn from_command(id: u64, client_id: ClientId, command: &Command) -> Self {
        let [param1, param2, param3, param4, param5] = command.params.clone();
        Self {
            id,
            name: command.name().to_string(),
            client_id,
            param1,
            param2,
            param3,
            param4,
            param5,
        }
    }

    pub fn to_command(&self) -> Result<Command, CommandError> {
        let kind: CommandKind = self.name.parse()?;
        Ok(Command::new(
            kind,
            [
                self.param1.as_str(),
                self.param2.as_str(),
                self.param3.as_str(),
                self.param4.as_str(),
                self.param5.as_str(),
            ],
        )
        .with_client(self.client_id)
        .with_sequence(self.id))
    }
}

/// A typed request to the graph service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceRequest {
    CreateGraphAccessToken(CreateTokenRequest),
    CreateClient(CreateClientRequest),
    PostCommand(PostCommandRequest),
    GetCommands(GetCommandsQuery),
}

impl ServiceRequest {
    pub fn method(&self) -> Method {
        match self {
            ServiceRequest::GetCommands(_) => Method::Get,
            _ => Method::Post,
        }
    }

    pub fn resource(&self) -> &'static str {
        match self {
            ServiceRequest::CreateGraphAccessToken(_) => RESOURCE_TOKENS,
            ServiceRequest::CreateClient(_) => RESOURCE_CLIENTS,
            ServiceRequest::PostCommand(_) | ServiceRequest::GetCommands(_) => RESOURCE_COMMANDS,
        }
    }

    pub fn to_envelope(&self, id: u64) -> Result<RequestEnvelope, ProtocolError> {
        let body = match self {
            ServiceRequest::CreateGraphAccessToken(r) => to_value(r)?,
            ServiceRequest::CreateClient(r) => to_value(r)?,
            ServiceRequest::PostCommand(r) => to_value(r)?,
            ServiceRequest::GetCommands(r) => to_value(r)?,
        };
        Ok(RequestEnvelope {
            id,
            method: self.method(),
            resource: self.resource().to_string(),
            body,
        })
    }

    pub fn from_envelope(envelope: &RequestEnvelope) -> Result<Self, ProtocolError> {
        let body = envelope.body.clone();
        match (envelope.method, envelope.resource.as_str()) {
            (Method::Post, RESOURCE_TOKENS) => Ok(Self::CreateGraphAccessToken(from_value(body)?)),
            (Method::Post, RESOURCE_CLIENTS) => Ok(Self::CreateClient(from_value(body)?)),
            (Method::Post, RESOURCE_COMMANDS) => Ok(Self::PostCommand(from_value(body)?)),
            (Method::Get, RESOURCE_COMMANDS) => Ok(Self::GetCommands(from_value(body)?)),
            (method, resource) => Err(ProtocolError::UnknownRoute(format!("{method:?} {resource}"))),
        }
    }
}

/// Status and JSON body of a service reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: Value,
}

impl ServiceResponse {
    pub fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self {
                status: STATUS_OK,
                body,
            },
            Err(e) => Self::error(STATUS_INTERNAL, e.to_string()),
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: serde_json::json!({ "Message": message.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Error text carried in the body, if any.
    pub fn message(&self) -> String {
        self.body
            .get("Message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("status {}", self.status))
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        from_value(self.body.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestEnvelope {
    pub id: u64,
    pub method: Method,
    pub resource: String,
    #[serde(default)]
    pub body: Value,
}

impl RequestEnvelope {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseEnvelope {
    pub id: u64,
    pub status: u16,
    #[serde(default)]
    pub body: Value,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: ServiceResponse) -> Self {
        Self {
            id,
            status: response.status,
            body: response.body,
        }
    }

    pub fn into_response(self) -> ServiceResponse {
        ServiceResponse {
            status: self.status,
            body: self.body,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    UnknownRoute(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::UnknownRoute(r) => write!(f, "Unknown route: {r}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_command_field_names() {
        let req = PostCommandRequest {
            user_id: 3,
            who_token: "who".into(),
            graph_id: 12,
            client_id: 40,
            graph_access_token: "tok".into(),
            command_name: "MoveVertex".into(),
            param1: "40-1".into(),
            param2: "1".into(),
            param3: "2".into(),
            param4: "3".into(),
            param5: String::new(),
            client_sequence: Some(7),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["UserID"], 3);
        assert_eq!(json["GraphID"], 12);
        assert_eq!(json["ClientID"], 40);
        assert_eq!(json["GraphAccessToken"], "tok");
        assert_eq!(json["CommandName"], "MoveVertex");
        assert_eq!(json["Param1"], "40-1");
        assert_eq!(json["ClientSequence"], 7);
    }

    #[test]
    fn test_missing_params_default_to_empty() {
        let json = serde_json::json!({
            "UserID": 1, "WhoToken": "w", "GraphID": 2, "ClientID": 3,
            "GraphAccessToken": "t", "CommandName": "ClearSelection"
        });
        let req: PostCommandRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.params(), ["", "", "", "", ""]);
        assert_eq!(req.client_sequence, None);
    }

    #[test]
    fn test_get_commands_history_flag() {
        let mut q = GetCommandsQuery {
            graph_id: 1,
            last_command_id: 0,
            graph_access_token: "t".into(),
            in_effective: None,
        };
        assert!(!q.wants_history());
        assert!(!serde_json::to_string(&q).unwrap().contains("InEffective"));
        q.in_effective = Some(IN_EFFECTIVE_YES.into());
        assert!(q.wants_history());
    }

    #[test]
    fn test_record_to_command() {
        let record: CommandRecord = serde_json::from_str(
            r#"{"ID":17,"Name":"InsertVertex","ClientID":4,"Param1":"2","Param2":"0","Param3":"1","Param4":"0","Param5":""}"#,
        )
        .unwrap();
        let cmd = record.to_command().unwrap();
        assert_eq!(cmd.sequence, Some(17));
        assert_eq!(cmd.client_id, Some(4));
        assert_eq!(cmd.kind, CommandKind::InsertVertex);
        assert_eq!(CommandRecord::from_command(17, 4, &cmd), record);

        let bad = CommandRecord {
            name: "Explode".into(),
            ..record
        };
        assert!(bad.to_command().is_err());
    }

    #[test]
    fn test_envelope_routing() {
        let req = ServiceRequest::GetCommands(GetCommandsQuery {
            graph_id: 5,
            last_command_id: 9,
            graph_access_token: "t".into(),
            in_effective: None,
        });
        let envelope = req.to_envelope(77).unwrap();
        let text = envelope.encode().unwrap();
        assert!(text.contains(r#""Method":"GET""#));
        assert!(text.contains(r#""Resource":"commands""#));

        let back = RequestEnvelope::decode(&text).unwrap();
        assert_eq!(back.id, 77);
        assert_eq!(ServiceRequest::from_envelope(&back).unwrap(), req);

        let wrong = RequestEnvelope {
            method: Method::Get,
            resource: "clients".into(),
            ..back
        };
        assert!(matches!(
            ServiceRequest::from_envelope(&wrong),
            Err(ProtocolError::UnknownRoute(_))
        ));
    }

    #[test]
    fn test_error_response_message() {
        let resp = ServiceResponse::error(STATUS_FORBIDDEN, "no write access");
        assert!(!resp.is_success());
        assert_eq!(resp.message(), "no write access");
    }

    #[test]
    fn test_permission_codes() {
        for p in [
            Permission::NoAccess,
            Permission::ReadOnly,
            Permission::Write,
            Permission::Moderator,
        ] {
            assert_eq!(Permission::from_code(p.code()), Some(p));
        }
        assert!(Permission::ReadOnly < Permission::Write);
        assert_eq!(Permission::from_code(9), None);
    }
}
