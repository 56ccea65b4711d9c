use serde::{Deserialize, Serialize};

use crate::geometry::{Point3, Point4};
use crate::identity::EntityId;

/// A state change observed in the graph store.
///
/// Produced by both optimistic local mutation and remote replay so a
/// renderer can treat the two identically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GraphEvent {
    VertexAdded(EntityId),
    VertexRemoved(EntityId),
    VertexMoved {
        vertex: EntityId,
        position: Point3,
    },
    VertexRotated {
        vertex: EntityId,
        rotation: Point4,
    },
    VertexScaled {
        vertex: EntityId,
        scale: f64,
    },
    VertexPropertyChanged {
        vertex: EntityId,
        list: String,
        key: String,
        /// Whether the change affects how the vertex is drawn
        render: bool,
    },
    EdgeAdded {
        edge: EntityId,
        start: EntityId,
        end: EntityId,
    },
    EdgeRemoved(EntityId),
    EdgePropertyChanged {
        edge: EntityId,
        list: String,
        key: String,
        render: bool,
    },
    BendAdded {
        edge: EntityId,
        index: usize,
    },
    BendMoved {
        edge: EntityId,
        index: usize,
    },
    BendRemoved {
        edge: EntityId,
        index: usize,
    },
    CameraMoved(Point3),
    CameraRotated(Point4),
    /// Opaque application command, passed through untouched.
    Custom {
        name: String,
        parameter: String,
    },
    VertexSelected(EntityId),
    BendSelected {
        edge: EntityId,
        index: usize,
    },
    SelectionCleared,
}

impl GraphEvent {
    /// Whether the event reflects a change to the stored graph rather than a
    /// UI hint.
    pub fn mutates_store(&self) -> bool {
        !matches!(
            self,
            GraphEvent::Custom { .. }
                | GraphEvent::VertexSelected(_)
                | GraphEvent::BendSelected { .. }
                | GraphEvent::SelectionCleared
        )
    }
}
