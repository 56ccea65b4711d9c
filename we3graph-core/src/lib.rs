//! Collaborative graph model.
//!
//! Transport-free building blocks shared by every session:
//!
//! - [`identity`]: entity ids minted locally without server coordination
//! - [`graph`]: the in-memory store of vertices, edges, bends and camera
//! - [`command`]: the five-parameter wire command and its typed form
//! - [`applier`]: replaying commands against the store
//! - [`history`]: local undo/redo over replayed commands

pub mod applier;
pub mod command;
pub mod event;
pub mod geometry;
pub mod graph;
pub mod history;
pub mod identity;
pub mod index;

pub use applier::{apply, complement_of, execute, ApplyContext};
pub use command::{Command, CommandError, CommandKind, Mutation, PARAM_COUNT};
pub use event::GraphEvent;
pub use geometry::{Point3, Point4};
pub use graph::{Bend, Camera, Edge, GraphError, GraphSnapshot, GraphStore, Vertex};
pub use history::History;
pub use identity::{ClientId, EntityId, IdAllocator, IdParseError};
