//! Replays mutations against a [`GraphStore`].
//!
//! [`execute`] is the strict form used by the local API: misuse comes back
//! as a [`GraphError`]. [`apply`] is the replay form used for commands read
//! from the log: a command that targets something no longer present is a
//! no-op, since the log is append-only and a catching-up client will see
//! operations that a later command already made stale.

use log::trace;

use crate::command::{Command, CommandError, Mutation};
use crate::event::GraphEvent;
use crate::geometry::{Point3, Point4};
use crate::graph::{GraphError, GraphStore, MAX_PROPERTY_LEN};

/// Session state that changes how a replayed command is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyContext {
    /// The session is still replaying the log from the beginning
    pub loading: bool,
    /// Apply camera commands after loading
    pub receive_camera: bool,
}

impl Default for ApplyContext {
    fn default() -> Self {
        Self {
            loading: false,
            receive_camera: true,
        }
    }
}

fn finite3(p: &Point3, what: &'static str) -> Result<(), GraphError> {
    if p.is_finite() {
        Ok(())
    } else {
        Err(GraphError::NonFinite(what))
    }
}

fn finite4(p: &Point4, what: &'static str) -> Result<(), GraphError> {
    if p.is_finite() {
        Ok(())
    } else {
        Err(GraphError::NonFinite(what))
    }
}

fn bounded(text: &str, what: &'static str) -> Result<(), GraphError> {
    if text.len() > MAX_PROPERTY_LEN {
        Err(GraphError::PropertyTooLong(what))
    } else {
        Ok(())
    }
}

fn bounded_property(list: &str, key: &str, value: &str) -> Result<(), GraphError> {
    bounded(list, "property list name")?;
    bounded(key, "property key")?;
    bounded(value, "property value")
}

/// Applies `mutation`, returning the resulting events.
pub fn execute(store: &mut GraphStore, mutation: &Mutation) -> Result<Vec<GraphEvent>, GraphError> {
    let events = match mutation {
        Mutation::InsertVertex { id, position } => {
            finite3(position, "vertex position")?;
            store.apply_insert_vertex(*id, *position)?;
            vec![GraphEvent::VertexAdded(*id)]
        }
        Mutation::InsertEdge { id, start, end } => {
            store.apply_insert_edge(*id, *start, *end)?;
            vec![GraphEvent::EdgeAdded {
                edge: *id,
                start: *start,
                end: *end,
            }]
        }
        Mutation::BreakEdgeLine {
            edge,
            index,
            position,
        } => {
            finite3(position, "bend position")?;
            store.apply_break_edge_line(*edge, *index, *position)?;
            vec![GraphEvent::BendAdded {
                edge: *edge,
                index: *index,
            }]
        }
        Mutation::RemoveVertex { vertex } => {
            let removed = store.apply_remove_vertex(*vertex)?;
            let mut events: Vec<GraphEvent> = removed
                .edges
                .iter()
                .map(|e| GraphEvent::EdgeRemoved(e.id()))
                .collect();
            events.push(GraphEvent::VertexRemoved(*vertex));
            events
        }
        Mutation::RemoveEdge { edge } => {
            store.apply_remove_edge(*edge)?;
            vec![GraphEvent::EdgeRemoved(*edge)]
        }
        Mutation::RemoveBend { edge, index } => {
            store.apply_remove_bend(*edge, *index)?;
            vec![GraphEvent::BendRemoved {
                edge: *edge,
                index: *index,
            }]
        }
        Mutation::MoveVertex { vertex, position } => {
            finite3(position, "vertex position")?;
            store.apply_move_vertex(*vertex, *position)?;
            vec![GraphEvent::VertexMoved {
                vertex: *vertex,
                position: *position,
            }]
        }
        Mutation::ChangeVertexScale { vertex, scale } => {
            if !scale.is_finite() {
                return Err(GraphError::NonFinite("vertex scale"));
            }
            store.apply_set_vertex_scale(*vertex, *scale)?;
            vec![GraphEvent::VertexScaled {
                vertex: *vertex,
                scale: *scale,
            }]
        }
        Mutation::ChangeVertexRotation { vertex, rotation } => {
            finite4(rotation, "vertex rotation")?;
            store.apply_set_vertex_rotation(*vertex, *rotation)?;
            vec![GraphEvent::VertexRotated {
                vertex: *vertex,
                rotation: *rotation,
            }]
        }
        Mutation::MoveBend {
            edge,
            index,
            position,
        } => {
            finite3(position, "bend position")?;
            store.apply_move_bend(*edge, *index, *position)?;
            vec![GraphEvent::BendMoved {
                edge: *edge,
                index: *index,
            }]
        }
        Mutation::ChangeCameraPosition { position } => {
            finite3(position, "camera position")?;
            store.apply_camera_position(*position);
            vec![GraphEvent::CameraMoved(*position)]
        }
        Mutation::ChangeCameraRotation { rotation } => {
            finite4(rotation, "camera rotation")?;
            store.apply_camera_rotation(*rotation);
            vec![GraphEvent::CameraRotated(*rotation)]
        }
        Mutation::SetVertexProperty {
            vertex,
            list,
            key,
            value,
            render,
        } => {
            bounded_property(list, key, value)?;
            store.apply_set_vertex_property(*vertex, list, key, value)?;
            vec![GraphEvent::VertexPropertyChanged {
                vertex: *vertex,
                list: list.clone(),
                key: key.clone(),
                render: *render,
            }]
        }
        Mutation::SetEdgeProperty {
            edge,
            list,
            key,
            value,
            render,
        } => {
            bounded_property(list, key, value)?;
            store.apply_set_edge_property(*edge, list, key, value)?;
            vec![GraphEvent::EdgePropertyChanged {
                edge: *edge,
                list: list.clone(),
                key: key.clone(),
                render: *render,
            }]
        }
        Mutation::Custom { name, parameter } => {
            bounded(name, "custom command name")?;
            bounded(parameter, "custom command parameter")?;
            vec![GraphEvent::Custom {
                name: name.clone(),
                parameter: parameter.clone(),
            }]
        }
        Mutation::SelectVertex { vertex } => {
            if !store.contains_vertex(*vertex) {
                return Err(GraphError::VertexNotFound(*vertex));
            }
            vec![GraphEvent::VertexSelected(*vertex)]
        }
        Mutation::SelectBend { edge, index } => {
            let len = store
                .edge(*edge)
                .ok_or(GraphError::EdgeNotFound(*edge))?
                .bends
                .len();
            if *index >= len {
                return Err(GraphError::BendIndexOutOfRange {
                    edge: *edge,
                    index: *index,
                    len,
                });
            }
            vec![GraphEvent::BendSelected {
                edge: *edge,
                index: *index,
            }]
        }
        Mutation::ClearSelection => vec![GraphEvent::SelectionCleared],
    };
    Ok(events)
}

/// Replays a logged command. Stale targets are skipped; only an undecodable
/// command is an error.
pub fn apply(
    store: &mut GraphStore,
    command: &Command,
    ctx: &ApplyContext,
) -> Result<Vec<GraphEvent>, CommandError> {
    let mutation = command.decode()?;
    if command.kind.is_camera() && !ctx.loading && !ctx.receive_camera {
        trace!("Ignoring camera command {:?}", command.sequence);
        return Ok(Vec::new());
    }
    match execute(store, &mutation) {
        Ok(events) => Ok(events),
        Err(e) => {
            trace!(
                "Skipping {} (seq {:?}): {}",
                command.kind,
                command.sequence,
                e
            );
            Ok(Vec::new())
        }
    }
}

/// The mutation that undoes `mutation`, judged against the store as it is
/// before `mutation` runs. `None` when there is nothing to undo.
pub fn complement_of(store: &GraphStore, mutation: &Mutation) -> Option<Mutation> {
    match mutation {
        Mutation::InsertVertex { id, .. } => Some(Mutation::RemoveVertex { vertex: *id }),
        Mutation::InsertEdge { id, .. } => Some(Mutation::RemoveEdge { edge: *id }),
        Mutation::BreakEdgeLine { edge, index, .. } => Some(Mutation::RemoveBend {
            edge: *edge,
            index: *index,
        }),
        Mutation::RemoveVertex { vertex } => store.vertex(*vertex).map(|v| Mutation::InsertVertex {
            id: v.id(),
            position: v.position,
        }),
        Mutation::RemoveEdge { edge } => store.edge(*edge).map(|e| Mutation::InsertEdge {
            id: e.id(),
            start: e.start(),
            end: e.end(),
        }),
        Mutation::RemoveBend { edge, index } => {
            let bend = store.edge(*edge)?.bends.get(*index)?;
            Some(Mutation::BreakEdgeLine {
                edge: *edge,
                index: *index,
                position: bend.position,
            })
        }
        Mutation::MoveVertex { vertex, .. } => store.vertex(*vertex).map(|v| Mutation::MoveVertex {
            vertex: *vertex,
            position: v.position,
        }),
        Mutation::ChangeVertexScale { vertex, .. } => {
            store
                .vertex(*vertex)
                .map(|v| Mutation::ChangeVertexScale {
                    vertex: *vertex,
                    scale: v.scale,
                })
        }
        Mutation::ChangeVertexRotation { vertex, .. } => {
            store
                .vertex(*vertex)
                .map(|v| Mutation::ChangeVertexRotation {
                    vertex: *vertex,
                    rotation: v.rotation,
                })
        }
        Mutation::MoveBend { edge, index, .. } => {
            let bend = store.edge(*edge)?.bends.get(*index)?;
            Some(Mutation::MoveBend {
                edge: *edge,
                index: *index,
                position: bend.position,
            })
        }
        Mutation::ChangeCameraPosition { .. } => Some(Mutation::ChangeCameraPosition {
            position: store.camera().position,
        }),
        Mutation::ChangeCameraRotation { .. } => Some(Mutation::ChangeCameraRotation {
            rotation: store.camera().rotation,
        }),
        Mutation::SetVertexProperty {
            vertex,
            list,
            key,
            render,
            ..
        } => {
            let previous = store.vertex(*vertex)?.property(list, key).unwrap_or("");
            Some(Mutation::SetVertexProperty {
                vertex: *vertex,
                list: list.clone(),
                key: key.clone(),
                value: previous.to_string(),
                render: *render,
            })
        }
        Mutation::SetEdgeProperty {
            edge,
            list,
            key,
            render,
            ..
        } => {
            let previous = store.edge(*edge)?.property(list, key).unwrap_or("");
            Some(Mutation::SetEdgeProperty {
                edge: *edge,
                list: list.clone(),
                key: key.clone(),
                value: previous.to_string(),
                render: *render,
            })
        }
        Mutation::Custom { .. }
        | Mutation::SelectVertex { .. }
        | Mutation::SelectBend { .. }
        | Mutation::ClearSelection => None,
    }
}
