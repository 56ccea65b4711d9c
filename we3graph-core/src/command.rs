//! The wire-level unit of mutation.
//!
//! A [`Command`] is a name plus exactly five string parameters, the shape the
//! server stores and serves. [`Mutation`] is the typed view of the same
//! thing; every handler works on `Mutation`, and the string form only exists
//! at the boundary.
//!
//! ```text
//!  Mutation ──encode──► Command { kind, params[5], sequence?, client_id? }
//!     ▲                             │
//!     └────────────decode───────────┘
//! ```
//!
//! Decoding then re-encoding yields the canonical parameter strings, which
//! is what the server persists.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::geometry::{Point3, Point4};
use crate::graph::MAX_PROPERTY_LEN;
use crate::identity::{parse_counter, ClientId, EntityId};

pub const PARAM_COUNT: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{kind} parameter {position} is malformed: '{value}'")]
    MalformedParameter {
        kind: CommandKind,
        position: usize,
        value: String,
    },
    #[error("{0} requires an originating client id")]
    MissingClientId(CommandKind),
}

/// Every command the system understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    InsertVertex,
    InsertEdge,
    BreakEdgeLine,
    RemoveVertex,
    RemoveEdge,
    RemoveBend,
    MoveVertex,
    ChangeVertexScale,
    ChangeVertexRotation,
    MoveBend,
    ChangeCameraPosition,
    ChangeCameraRotation,
    SetVertexProperty,
    SetEdgeProperty,
    CustomCommand,
    SelectVertex,
    SelectBend,
    ClearSelection,
}

impl CommandKind {
    pub const ALL: [CommandKind; 18] = [
        CommandKind::InsertVertex,
        CommandKind::InsertEdge,
        CommandKind::BreakEdgeLine,
        CommandKind::RemoveVertex,
        CommandKind::RemoveEdge,
        CommandKind::RemoveBend,
        CommandKind::MoveVertex,
        CommandKind::ChangeVertexScale,
        CommandKind::ChangeVertexRotation,
        CommandKind::MoveBend,
        CommandKind::ChangeCameraPosition,
        CommandKind::ChangeCameraRotation,
        CommandKind::SetVertexProperty,
        CommandKind::SetEdgeProperty,
        CommandKind::CustomCommand,
        CommandKind::SelectVertex,
        CommandKind::SelectBend,
        CommandKind::ClearSelection,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::InsertVertex => "InsertVertex",
            CommandKind::InsertEdge => "InsertEdge",
            CommandKind::BreakEdgeLine => "BreakEdgeLine",
            CommandKind::RemoveVertex => "RemoveVertex",
            CommandKind::RemoveEdge => "RemoveEdge",
            CommandKind::RemoveBend => "RemoveBend",
            CommandKind::MoveVertex => "MoveVertex",
            CommandKind::ChangeVertexScale => "ChangeVertexScale",
            CommandKind::ChangeVertexRotation => "ChangeVertexRotation",
            CommandKind::MoveBend => "MoveBend",
            CommandKind::ChangeCameraPosition => "ChangeCameraPosition",
            CommandKind::ChangeCameraRotation => "ChangeCameraRotation",
            CommandKind::SetVertexProperty => "SetVertexProperty",
            CommandKind::SetEdgeProperty => "SetEdgeProperty",
            CommandKind::CustomCommand => "CustomCommand",
            CommandKind::SelectVertex => "SelectVertex",
            CommandKind::SelectBend => "SelectBend",
            CommandKind::ClearSelection => "ClearSelection",
        }
    }

    /// Parameter layout: `p` counter, `i` entity id, `f` float, `s` string.
    pub fn layout(self) -> &'static str {
        match self {
            CommandKind::InsertVertex => "pfff",
            CommandKind::InsertEdge => "iip",
            CommandKind::BreakEdgeLine => "ipfff",
            CommandKind::RemoveVertex => "i",
            CommandKind::RemoveEdge => "i",
            CommandKind::RemoveBend => "ip",
            CommandKind::MoveVertex => "ifff",
            CommandKind::ChangeVertexScale => "if",
            CommandKind::ChangeVertexRotation => "iffff",
            CommandKind::MoveBend => "ipfff",
            CommandKind::ChangeCameraPosition => "fff",
            CommandKind::ChangeCameraRotation => "ffff",
            CommandKind::SetVertexProperty => "isssp",
            CommandKind::SetEdgeProperty => "isssp",
            CommandKind::CustomCommand => "ss",
            CommandKind::SelectVertex => "i",
            CommandKind::SelectBend => "ip",
            CommandKind::ClearSelection => "",
        }
    }

    pub fn is_camera(self) -> bool {
        matches!(
            self,
            CommandKind::ChangeCameraPosition | CommandKind::ChangeCameraRotation
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CommandKind {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "ChangeCameraQuaternion" {
            return Ok(CommandKind::ChangeCameraRotation);
        }
        CommandKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| CommandError::UnknownCommand(s.to_string()))
    }
}

/// A named mutation with five positional string parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandKind,
    /// Unused trailing parameters are empty strings
    pub params: [String; PARAM_COUNT],
    /// Assigned by the server log; `None` while local or in flight
    pub sequence: Option<u64>,
    /// Session that originated the command
    pub client_id: Option<ClientId>,
    /// Inverse operation, attached only when history is recorded
    pub complement: Option<Box<Command>>,
}

impl Command {
    /// Builds a command, padding missing parameters with empty strings.
    /// Parameters past the fifth are dropped.
    pub fn new<I, S>(kind: CommandKind, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut slots: [String; PARAM_COUNT] = Default::default();
        for (slot, value) in slots.iter_mut().zip(params) {
            *slot = value.into();
        }
        Self {
            kind,
            params: slots,
            sequence: None,
            client_id: None,
            complement: None,
        }
    }

    /// Builds a command from its wire name.
    pub fn from_wire<I, S>(name: &str, params: I) -> Result<Self, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self::new(name.parse()?, params))
    }

    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn param(&self, position: usize) -> &str {
        self.params.get(position).map(String::as_str).unwrap_or("")
    }

    pub fn decode(&self) -> Result<Mutation, CommandError> {
        Mutation::decode(self)
    }

    /// Validates the parameters and returns the command with canonically
    /// encoded parameters. Sequence and client id are preserved.
    pub fn canonicalize(&self) -> Result<Command, CommandError> {
        let mut canonical = self.decode()?.encode();
        canonical.sequence = self.sequence;
        canonical.client_id = self.client_id.or(canonical.client_id);
        Ok(canonical)
    }
}

/// Typed form of a [`Command`].
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    InsertVertex {
        id: EntityId,
        position: Point3,
    },
    InsertEdge {
        id: EntityId,
        start: EntityId,
        end: EntityId,
    },
    BreakEdgeLine {
        edge: EntityId,
        index: usize,
        position: Point3,
    },
    RemoveVertex {
        vertex: EntityId,
    },
    RemoveEdge {
        edge: EntityId,
    },
    RemoveBend {
        edge: EntityId,
        index: usize,
    },
    MoveVertex {
        vertex: EntityId,
        position: Point3,
    },
    ChangeVertexScale {
        vertex: EntityId,
        scale: f64,
    },
    ChangeVertexRotation {
        vertex: EntityId,
        rotation: Point4,
    },
    MoveBend {
        edge: EntityId,
        index: usize,
        position: Point3,
    },
    ChangeCameraPosition {
        position: Point3,
    },
    ChangeCameraRotation {
        rotation: Point4,
    },
    SetVertexProperty {
        vertex: EntityId,
        list: String,
        key: String,
        value: String,
        render: bool,
    },
    SetEdgeProperty {
        edge: EntityId,
        list: String,
        key: String,
        value: String,
        render: bool,
    },
    Custom {
        name: String,
        parameter: String,
    },
    SelectVertex {
        vertex: EntityId,
    },
    SelectBend {
        edge: EntityId,
        index: usize,
    },
    ClearSelection,
}

/// Cursor over a command's parameters that reports the failing position.
struct Params<'a> {
    command: &'a Command,
    position: usize,
}

impl<'a> Params<'a> {
    fn new(command: &'a Command) -> Self {
        Self {
            command,
            position: 0,
        }
    }

    fn next_raw(&mut self) -> (usize, &'a str) {
        let position = self.position;
        self.position += 1;
        (position, self.command.param(position))
    }

    fn malformed(&self, position: usize, value: &str) -> CommandError {
        CommandError::MalformedParameter {
            kind: self.command.kind,
            position: position + 1,
            value: value.to_string(),
        }
    }

    fn id(&mut self) -> Result<EntityId, CommandError> {
        let (position, raw) = self.next_raw();
        raw.parse().map_err(|_| self.malformed(position, raw))
    }

    fn counter(&mut self) -> Result<u64, CommandError> {
        let (position, raw) = self.next_raw();
        parse_counter(raw).ok_or_else(|| self.malformed(position, raw))
    }

    fn index(&mut self) -> Result<usize, CommandError> {
        let (position, raw) = self.next_raw();
        parse_counter(raw)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| self.malformed(position, raw))
    }

    fn float(&mut self) -> Result<f64, CommandError> {
        let (position, raw) = self.next_raw();
        match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(self.malformed(position, raw)),
        }
    }

    fn point3(&mut self) -> Result<Point3, CommandError> {
        Ok(Point3::new(self.float()?, self.float()?, self.float()?))
    }

    fn point4(&mut self) -> Result<Point4, CommandError> {
        Ok(Point4::new(
            self.float()?,
            self.float()?,
            self.float()?,
            self.float()?,
        ))
    }

    fn text(&mut self) -> Result<String, CommandError> {
        let (position, raw) = self.next_raw();
        if raw.len() > MAX_PROPERTY_LEN {
            return Err(self.malformed(position, raw));
        }
        Ok(raw.to_string())
    }

    fn flag(&mut self) -> Result<bool, CommandError> {
        Ok(self.counter()? != 0)
    }
}

fn encode_point3(p: &Point3) -> [String; 3] {
    [p.x.to_string(), p.y.to_string(), p.z.to_string()]
}

fn encode_point4(p: &Point4) -> [String; 4] {
    [
        p.x.to_string(),
        p.y.to_string(),
        p.z.to_string(),
        p.w.to_string(),
    ]
}

fn flag(value: bool) -> String {
    let text = if value { "1" } else { "0" };
    text.to_string()
}

impl Mutation {
    pub fn kind(&self) -> CommandKind {
        match self {
            Mutation::InsertVertex { .. } => CommandKind::InsertVertex,
            Mutation::InsertEdge { .. } => CommandKind::InsertEdge,
            Mutation::BreakEdgeLine { .. } => CommandKind::BreakEdgeLine,
            Mutation::RemoveVertex { .. } => CommandKind::RemoveVertex,
            Mutation::RemoveEdge { .. } => CommandKind::RemoveEdge,
            Mutation::RemoveBend { .. } => CommandKind::RemoveBend,
            Mutation::MoveVertex { .. } => CommandKind::MoveVertex,
            Mutation::ChangeVertexScale { .. } => CommandKind::ChangeVertexScale,
            Mutation::ChangeVertexRotation { .. } => CommandKind::ChangeVertexRotation,
            Mutation::MoveBend { .. } => CommandKind::MoveBend,
            Mutation::ChangeCameraPosition { .. } => CommandKind::ChangeCameraPosition,
            Mutation::ChangeCameraRotation { .. } => CommandKind::ChangeCameraRotation,
            Mutation::SetVertexProperty { .. } => CommandKind::SetVertexProperty,
            Mutation::SetEdgeProperty { .. } => CommandKind::SetEdgeProperty,
            Mutation::Custom { .. } => CommandKind::CustomCommand,
            Mutation::SelectVertex { .. } => CommandKind::SelectVertex,
            Mutation::SelectBend { .. } => CommandKind::SelectBend,
            Mutation::ClearSelection => CommandKind::ClearSelection,
        }
    }

    /// Decodes a command's parameters according to its layout.
    ///
    /// Inserts take the owner of the new id from the command's client id,
    /// so they fail with [`CommandError::MissingClientId`] without one.
    pub fn decode(command: &Command) -> Result<Mutation, CommandError> {
        let mut p = Params::new(command);
        let owner = || {
            command
                .client_id
                .ok_or(CommandError::MissingClientId(command.kind))
        };

        let mutation = match command.kind {
            CommandKind::InsertVertex => {
                let sequence = p.counter()?;
                let position = p.point3()?;
                Mutation::InsertVertex {
                    id: EntityId::new(owner()?, sequence),
                    position,
                }
            }
            CommandKind::InsertEdge => {
                let start = p.id()?;
                let end = p.id()?;
                let sequence = p.counter()?;
                Mutation::InsertEdge {
                    id: EntityId::new(owner()?, sequence),
                    start,
                    end,
                }
            }
            CommandKind::BreakEdgeLine => Mutation::BreakEdgeLine {
                edge: p.id()?,
                index: p.index()?,
                position: p.point3()?,
            },
            CommandKind::RemoveVertex => Mutation::RemoveVertex { vertex: p.id()? },
            CommandKind::RemoveEdge => Mutation::RemoveEdge { edge: p.id()? },
            CommandKind::RemoveBend => Mutation::RemoveBend {
                edge: p.id()?,
                index: p.index()?,
            },
            CommandKind::MoveVertex => Mutation::MoveVertex {
                vertex: p.id()?,
                position: p.point3()?,
            },
            CommandKind::ChangeVertexScale => Mutation::ChangeVertexScale {
                vertex: p.id()?,
                scale: p.float()?,
            },
            CommandKind::ChangeVertexRotation => Mutation::ChangeVertexRotation {
                vertex: p.id()?,
                rotation: p.point4()?,
            },
            CommandKind::MoveBend => Mutation::MoveBend {
                edge: p.id()?,
                index: p.index()?,
                position: p.point3()?,
            },
            CommandKind::ChangeCameraPosition => Mutation::ChangeCameraPosition {
                position: p.point3()?,
            },
            CommandKind::ChangeCameraRotation => Mutation::ChangeCameraRotation {
                rotation: p.point4()?,
            },
            CommandKind::SetVertexProperty => Mutation::SetVertexProperty {
                vertex: p.id()?,
                list: p.text()?,
                key: p.text()?,
                value: p.text()?,
                render: p.flag()?,
            },
            CommandKind::SetEdgeProperty => Mutation::SetEdgeProperty {
                edge: p.id()?,
                list: p.text()?,
                key: p.text()?,
                value: p.text()?,
                render: p.flag()?,
            },
            CommandKind::CustomCommand => Mutation::Custom {
                name: p.text()?,
                parameter: p.text()?,
            },
            CommandKind::SelectVertex => Mutation::SelectVertex { vertex: p.id()? },
            CommandKind::SelectBend => Mutation::SelectBend {
                edge: p.id()?,
                index: p.index()?,
            },
            CommandKind::ClearSelection => Mutation::ClearSelection,
        };
        Ok(mutation)
    }

    /// Encodes into a command with canonical parameter strings. Inserts
    /// carry the new id's owner as the client id.
    pub fn encode(&self) -> Command {
        let kind = self.kind();
        let (params, client_id): (Vec<String>, Option<ClientId>) = match self {
            Mutation::InsertVertex { id, position } => {
                let mut params = vec![id.sequence.to_string()];
                params.extend(encode_point3(position));
                (params, Some(id.owner))
            }
            Mutation::InsertEdge { id, start, end } => (
                vec![start.to_string(), end.to_string(), id.sequence.to_string()],
                Some(id.owner),
            ),
            Mutation::BreakEdgeLine {
                edge,
                index,
                position,
            }
            | Mutation::MoveBend {
                edge,
                index,
                position,
            } => {
                let mut params = vec![edge.to_string(), index.to_string()];
                params.extend(encode_point3(position));
                (params, None)
            }
            Mutation::RemoveVertex { vertex } | Mutation::SelectVertex { vertex } => {
                (vec![vertex.to_string()], None)
            }
            Mutation::RemoveEdge { edge } => (vec![edge.to_string()], None),
            Mutation::RemoveBend { edge, index } | Mutation::SelectBend { edge, index } => {
                (vec![edge.to_string(), index.to_string()], None)
            }
            Mutation::MoveVertex { vertex, position } => {
                let mut params = vec![vertex.to_string()];
                params.extend(encode_point3(position));
                (params, None)
            }
            Mutation::ChangeVertexScale { vertex, scale } => {
                (vec![vertex.to_string(), scale.to_string()], None)
            }
            Mutation::ChangeVertexRotation { vertex, rotation } => {
                let mut params = vec![vertex.to_string()];
                params.extend(encode_point4(rotation));
                (params, None)
            }
            Mutation::ChangeCameraPosition { position } => {
                (encode_point3(position).to_vec(), None)
            }
            Mutation::ChangeCameraRotation { rotation } => {
                (encode_point4(rotation).to_vec(), None)
            }
            Mutation::SetVertexProperty {
                vertex: id,
                list,
                key,
                value,
                render,
            }
            | Mutation::SetEdgeProperty {
                edge: id,
                list,
                key,
                value,
                render,
            } => (
                vec![
                    id.to_string(),
                    list.clone(),
                    key.clone(),
                    value.clone(),
                    flag(*render),
                ],
                None,
            ),
            Mutation::Custom { name, parameter } => (vec![name.clone(), parameter.clone()], None),
            Mutation::ClearSelection => (Vec::new(), None),
        };

        let mut command = Command::new(kind, params);
        command.client_id = client_id;
        command
    }
}
