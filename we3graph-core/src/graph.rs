//! In-memory graph store.
//!
//! Vertices and edges live in slot arenas and refer to each other through
//! integer keys, never through owning references. The identity indexes map
//! an [`EntityId`] to its arena slot.
//!
//! Every mutation here is an `apply_*` method: it changes state and nothing
//! else. Command emission belongs to the session layer, so replaying a remote
//! command through these methods never produces a new outgoing command.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::geometry::{Point3, Point4};
use crate::identity::EntityId;
use crate::index::EntityIndex;

/// Named property lists: list name → (key → value).
pub type PropertyLists = BTreeMap<String, BTreeMap<String, String>>;

/// Longest accepted property list name, key or value, in bytes.
pub const MAX_PROPERTY_LEN: usize = 50;

/// Local API misuse. Raised synchronously to the caller, never by the network.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("vertex {0} not found")]
    VertexNotFound(EntityId),
    #[error("edge {0} not found")]
    EdgeNotFound(EntityId),
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),
    #[error("vertices {0} and {1} are already connected")]
    AlreadyConnected(EntityId, EntityId),
    #[error("bend index {index} out of range for edge {edge} ({len} bends)")]
    BendIndexOutOfRange { edge: EntityId, index: usize, len: usize },
    #[error("{0} must be finite")]
    NonFinite(&'static str),
    #[error("{0} is longer than {MAX_PROPERTY_LEN} bytes")]
    PropertyTooLong(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexKey(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EdgeKey(u32);

/// Slot arena with a free list. Keys are reused only after removal.
#[derive(Debug, Clone)]
struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, value: T) -> u32 {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(value);
                slot
            }
            None => {
                self.slots.push(Some(value));
                (self.slots.len() - 1) as u32
            }
        }
    }

    fn get(&self, slot: u32) -> Option<&T> {
        self.slots.get(slot as usize)?.as_ref()
    }

    fn get_mut(&mut self, slot: u32) -> Option<&mut T> {
        self.slots.get_mut(slot as usize)?.as_mut()
    }

    fn remove(&mut self, slot: u32) -> Option<T> {
        let value = self.slots.get_mut(slot as usize)?.take();
        if value.is_some() {
            self.free.push(slot);
        }
        value
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    id: EntityId,
    pub position: Point3,
    pub rotation: Point4,
    pub scale: f64,
    pub properties: PropertyLists,
    index: usize,
    edges: Vec<EdgeKey>,
}

impl Vertex {
    fn new(id: EntityId, position: Point3, index: usize) -> Self {
        Self {
            id,
            position,
            rotation: Point4::VERTEX_DEFAULT,
            scale: 1.0,
            properties: PropertyLists::new(),
            index,
            edges: Vec::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Dense position in the store's iteration order, `0..n`.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn degree(&self) -> usize {
        self.edges.len()
    }

    pub fn property(&self, list: &str, key: &str) -> Option<&str> {
        self.properties.get(list)?.get(key).map(String::as_str)
    }
}

/// A point that breaks an edge into two edge lines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bend {
    pub position: Point3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    id: EntityId,
    start: VertexKey,
    end: VertexKey,
    start_id: EntityId,
    end_id: EntityId,
    /// Bend `i` ends edge line `i`; an edge with `n` bends has `n + 1` lines.
    pub bends: Vec<Bend>,
    pub properties: PropertyLists,
}

impl Edge {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn start(&self) -> EntityId {
        self.start_id
    }

    pub fn end(&self) -> EntityId {
        self.end_id
    }

    pub fn edge_line_count(&self) -> usize {
        self.bends.len() + 1
    }

    pub fn property(&self, list: &str, key: &str) -> Option<&str> {
        self.properties.get(list)?.get(key).map(String::as_str)
    }

    fn touches(&self, a: VertexKey, b: VertexKey) -> bool {
        (self.start == a && self.end == b) || (self.start == b && self.end == a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: Point3,
    pub rotation: Point4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Point3::default(),
            rotation: Point4::IDENTITY,
        }
    }
}

/// What a vertex removal took with it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedVertex {
    pub vertex: Vertex,
    pub edges: Vec<Edge>,
}

/// Order-independent view of the store, for comparing two replicas.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphSnapshot {
    pub vertices: Vec<VertexSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
    pub camera: Camera,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexSnapshot {
    pub id: EntityId,
    pub position: Point3,
    pub rotation: Point4,
    pub scale: f64,
    pub properties: PropertyLists,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSnapshot {
    pub id: EntityId,
    pub start: EntityId,
    pub end: EntityId,
    pub bends: Vec<Bend>,
    pub properties: PropertyLists,
}

/// Authoritative local view of one graph.
#[derive(Debug, Clone)]
pub struct GraphStore {
    vertices: Arena<Vertex>,
    edges: Arena<Edge>,
    vertex_ids: EntityIndex<VertexKey>,
    edge_ids: EntityIndex<EdgeKey>,
    order: Vec<VertexKey>,
    camera: Camera,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            vertices: Arena::new(),
            edges: Arena::new(),
            vertex_ids: EntityIndex::new(),
            edge_ids: EntityIndex::new(),
            order: Vec::new(),
            camera: Camera::default(),
        }
    }

    // ─── Queries ──────────────────────────────────────────────────────

    pub fn vertex(&self, id: EntityId) -> Option<&Vertex> {
        let key = self.vertex_ids.get(&id)?;
        self.vertices.get(key.0)
    }

    pub fn edge(&self, id: EntityId) -> Option<&Edge> {
        let key = self.edge_ids.get(&id)?;
        self.edges.get(key.0)
    }

    pub fn contains_vertex(&self, id: EntityId) -> bool {
        self.vertex_ids.contains(&id)
    }

    pub fn contains_edge(&self, id: EntityId) -> bool {
        self.edge_ids.contains(&id)
    }

    /// Vertices in stable index order.
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.order.iter().filter_map(|key| self.vertices.get(key.0))
    }

    pub fn vertex_at(&self, index: usize) -> Option<&Vertex> {
        let key = self.order.get(index)?;
        self.vertices.get(key.0)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_ids.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_ids.len()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn incident_edges(&self, vertex: EntityId) -> Vec<&Edge> {
        self.vertex(vertex)
            .map(|v| v.edges.iter().filter_map(|k| self.edges.get(k.0)).collect())
            .unwrap_or_default()
    }

    /// Neighbours of `vertex`. When `directed`, only edges leaving it count.
    pub fn adjacent_vertices(&self, vertex: EntityId, directed: bool) -> Vec<EntityId> {
        self.incident_edges(vertex)
            .into_iter()
            .filter_map(|edge| {
                if edge.start_id == vertex {
                    Some(edge.end_id)
                } else if !directed {
                    Some(edge.start_id)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Whether an edge joins `a` and `b` in either direction.
    pub fn are_connected(&self, a: EntityId, b: EntityId) -> bool {
        match (self.vertex_ids.get(&a), self.vertex_ids.get(&b)) {
            (Some(&ka), Some(&kb)) => self.connecting_edge(ka, kb).is_some(),
            _ => false,
        }
    }

    fn connecting_edge(&self, a: VertexKey, b: VertexKey) -> Option<&Edge> {
        let vertex = self.vertices.get(a.0)?;
        vertex
            .edges
            .iter()
            .filter_map(|k| self.edges.get(k.0))
            .find(|edge| edge.touches(a, b))
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let mut vertices: Vec<VertexSnapshot> = self
            .vertices
            .iter()
            .map(|v| VertexSnapshot {
                id: v.id,
                position: v.position,
                rotation: v.rotation,
                scale: v.scale,
                properties: v.properties.clone(),
            })
            .collect();
        vertices.sort_by_key(|v| v.id);

        let mut edges: Vec<EdgeSnapshot> = self
            .edges
            .iter()
            .map(|e| EdgeSnapshot {
                id: e.id,
                start: e.start_id,
                end: e.end_id,
                bends: e.bends.clone(),
                properties: e.properties.clone(),
            })
            .collect();
        edges.sort_by_key(|e| e.id);

        GraphSnapshot {
            vertices,
            edges,
            camera: self.camera,
        }
    }

    // ─── Structural mutation ──────────────────────────────────────────

    pub fn apply_insert_vertex(&mut self, id: EntityId, position: Point3) -> Result<(), GraphError> {
        if self.vertex_ids.contains(&id) {
            return Err(GraphError::DuplicateEntity(id));
        }
        let key = VertexKey(self.vertices.insert(Vertex::new(id, position, self.order.len())));
        self.vertex_ids.insert(id, key);
        self.order.push(key);
        Ok(())
    }

    pub fn apply_insert_edge(
        &mut self,
        id: EntityId,
        start: EntityId,
        end: EntityId,
    ) -> Result<(), GraphError> {
        if self.edge_ids.contains(&id) {
            return Err(GraphError::DuplicateEntity(id));
        }
        let start_key = *self
            .vertex_ids
            .get(&start)
            .ok_or(GraphError::VertexNotFound(start))?;
        let end_key = *self
            .vertex_ids
            .get(&end)
            .ok_or(GraphError::VertexNotFound(end))?;
        if self.connecting_edge(start_key, end_key).is_some() {
            return Err(GraphError::AlreadyConnected(start, end));
        }

        let key = EdgeKey(self.edges.insert(Edge {
            id,
            start: start_key,
            end: end_key,
            start_id: start,
            end_id: end,
            bends: Vec::new(),
            properties: PropertyLists::new(),
        }));
        self.edge_ids.insert(id, key);

        if let Some(v) = self.vertices.get_mut(start_key.0) {
            v.edges.push(key);
        }
        if end_key != start_key {
            if let Some(v) = self.vertices.get_mut(end_key.0) {
                v.edges.push(key);
            }
        }
        Ok(())
    }

    /// Removes an edge and its bends.
    pub fn apply_remove_edge(&mut self, id: EntityId) -> Result<Edge, GraphError> {
        let key = self
            .edge_ids
            .remove(&id)
            .ok_or(GraphError::EdgeNotFound(id))?;
        let edge = self
            .edges
            .remove(key.0)
            .ok_or(GraphError::EdgeNotFound(id))?;

        for endpoint in [edge.start, edge.end] {
            if let Some(v) = self.vertices.get_mut(endpoint.0) {
                v.edges.retain(|k| *k != key);
            }
        }
        Ok(edge)
    }

    /// Removes a vertex together with every incident edge, then closes the
    /// gap in the index order so indices stay `0..n`.
    pub fn apply_remove_vertex(&mut self, id: EntityId) -> Result<RemovedVertex, GraphError> {
        let key = *self
            .vertex_ids
            .get(&id)
            .ok_or(GraphError::VertexNotFound(id))?;

        let incident: Vec<EntityId> = self
            .vertices
            .get(key.0)
            .map(|v| {
                v.edges
                    .iter()
                    .filter_map(|k| self.edges.get(k.0).map(|e| e.id))
                    .collect()
            })
            .unwrap_or_default();

        let mut edges = Vec::with_capacity(incident.len());
        for edge_id in incident {
            edges.push(self.apply_remove_edge(edge_id)?);
        }

        self.vertex_ids.remove(&id);
        let vertex = self
            .vertices
            .remove(key.0)
            .ok_or(GraphError::VertexNotFound(id))?;

        self.order.remove(vertex.index);
        for (index, k) in self.order.iter().enumerate().skip(vertex.index) {
            if let Some(v) = self.vertices.get_mut(k.0) {
                v.index = index;
            }
        }

        Ok(RemovedVertex { vertex, edges })
    }

    // ─── Vertex attributes ────────────────────────────────────────────

    fn vertex_mut(&mut self, id: EntityId) -> Result<&mut Vertex, GraphError> {
        let key = *self
            .vertex_ids
            .get(&id)
            .ok_or(GraphError::VertexNotFound(id))?;
        self.vertices
            .get_mut(key.0)
            .ok_or(GraphError::VertexNotFound(id))
    }

    fn edge_mut(&mut self, id: EntityId) -> Result<&mut Edge, GraphError> {
        let key = *self.edge_ids.get(&id).ok_or(GraphError::EdgeNotFound(id))?;
        self.edges.get_mut(key.0).ok_or(GraphError::EdgeNotFound(id))
    }

    /// Returns the previous position.
    pub fn apply_move_vertex(&mut self, id: EntityId, position: Point3) -> Result<Point3, GraphError> {
        let vertex = self.vertex_mut(id)?;
        Ok(std::mem::replace(&mut vertex.position, position))
    }

    pub fn apply_set_vertex_rotation(
        &mut self,
        id: EntityId,
        rotation: Point4,
    ) -> Result<Point4, GraphError> {
        let vertex = self.vertex_mut(id)?;
        Ok(std::mem::replace(&mut vertex.rotation, rotation))
    }

    pub fn apply_set_vertex_scale(&mut self, id: EntityId, scale: f64) -> Result<f64, GraphError> {
        let vertex = self.vertex_mut(id)?;
        Ok(std::mem::replace(&mut vertex.scale, scale))
    }

    /// An empty `value` removes the key. Returns the previous value.
    pub fn apply_set_vertex_property(
        &mut self,
        id: EntityId,
        list: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<String>, GraphError> {
        let vertex = self.vertex_mut(id)?;
        Ok(set_property(&mut vertex.properties, list, key, value))
    }

    pub fn apply_set_edge_property(
        &mut self,
        id: EntityId,
        list: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<String>, GraphError> {
        let edge = self.edge_mut(id)?;
        Ok(set_property(&mut edge.properties, list, key, value))
    }

    // ─── Bends ────────────────────────────────────────────────────────

    /// Splits edge line `index` with a new bend at `position`.
    pub fn apply_break_edge_line(
        &mut self,
        edge: EntityId,
        index: usize,
        position: Point3,
    ) -> Result<(), GraphError> {
        let e = self.edge_mut(edge)?;
        if index > e.bends.len() {
            return Err(GraphError::BendIndexOutOfRange {
                edge,
                index,
                len: e.bends.len(),
            });
        }
        e.bends.insert(index, Bend { position });
        Ok(())
    }

    pub fn apply_remove_bend(&mut self, edge: EntityId, index: usize) -> Result<Bend, GraphError> {
        let e = self.edge_mut(edge)?;
        if index >= e.bends.len() {
            return Err(GraphError::BendIndexOutOfRange {
                edge,
                index,
                len: e.bends.len(),
            });
        }
        Ok(e.bends.remove(index))
    }

    /// Returns the previous bend position.
    pub fn apply_move_bend(
        &mut self,
        edge: EntityId,
        index: usize,
        position: Point3,
    ) -> Result<Point3, GraphError> {
        let e = self.edge_mut(edge)?;
        let len = e.bends.len();
        let bend = e
            .bends
            .get_mut(index)
            .ok_or(GraphError::BendIndexOutOfRange { edge, index, len })?;
        Ok(std::mem::replace(&mut bend.position, position))
    }

    // ─── Camera ───────────────────────────────────────────────────────

    pub fn apply_camera_position(&mut self, position: Point3) -> Point3 {
        std::mem::replace(&mut self.camera.position, position)
    }

    pub fn apply_camera_rotation(&mut self, rotation: Point4) -> Point4 {
        std::mem::replace(&mut self.camera.rotation, rotation)
    }

    /// Drops every entity and resets the camera.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

fn set_property(lists: &mut PropertyLists, list: &str, key: &str, value: &str) -> Option<String> {
    if value.is_empty() {
        let entries = lists.get_mut(list)?;
        let previous = entries.remove(key);
        if entries.is_empty() {
            lists.remove(list);
        }
        previous
    } else {
        lists
            .entry(list.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(owner: u64, sequence: u64) -> EntityId {
        EntityId::new(owner, sequence)
    }

    fn triangle() -> GraphStore {
        let mut g = GraphStore::new();
        g.apply_insert_vertex(id(1, 1), Point3::new(0.0, 0.0, 0.0)).unwrap();
        g.apply_insert_vertex(id(1, 2), Point3::new(1.0, 0.0, 0.0)).unwrap();
        g.apply_insert_vertex(id(1, 3), Point3::new(0.0, 1.0, 0.0)).unwrap();
        g.apply_insert_edge(id(1, 10), id(1, 1), id(1, 2)).unwrap();
        g.apply_insert_edge(id(1, 11), id(1, 2), id(1, 3)).unwrap();
        g.apply_insert_edge(id(1, 12), id(1, 3), id(1, 1)).unwrap();
        g
    }

    #[test]
    fn test_insert_and_find() {
        let g = triangle();
        assert_eq!(g.vertex_count(), 3);
        assert_eq!(g.edge_count(), 3);
        let v = g.vertex(id(1, 2)).unwrap();
        assert_eq!(v.position, Point3::new(1.0, 0.0, 0.0));
        assert_eq!(v.rotation, Point4::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(v.scale, 1.0);
        assert_eq!(v.degree(), 2);
        let e = g.edge(id(1, 10)).unwrap();
        assert_eq!(e.start(), id(1, 1));
        assert_eq!(e.end(), id(1, 2));
    }

    #[test]
    fn test_duplicate_vertex_rejected() {
        let mut g = GraphStore::new();
        g.apply_insert_vertex(id(2, 1), Point3::default()).unwrap();
        assert_eq!(
            g.apply_insert_vertex(id(2, 1), Point3::new(9.0, 9.0, 9.0)),
            Err(GraphError::DuplicateEntity(id(2, 1)))
        );
        assert_eq!(g.vertex(id(2, 1)).unwrap().position, Point3::default());
    }

    #[test]
    fn test_edge_requires_endpoints() {
        let mut g = GraphStore::new();
        g.apply_insert_vertex(id(1, 1), Point3::default()).unwrap();
        assert_eq!(
            g.apply_insert_edge(id(1, 5), id(1, 1), id(1, 2)),
            Err(GraphError::VertexNotFound(id(1, 2)))
        );
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_no_parallel_edges_either_direction() {
        let mut g = triangle();
        assert_eq!(
            g.apply_insert_edge(id(1, 20), id(1, 2), id(1, 1)),
            Err(GraphError::AlreadyConnected(id(1, 2), id(1, 1)))
        );
        assert!(g.are_connected(id(1, 1), id(1, 2)));
        assert!(g.are_connected(id(1, 2), id(1, 1)));
    }

    #[test]
    fn test_remove_vertex_cascades_edges() {
        let mut g = triangle();
        g.apply_break_edge_line(id(1, 10), 0, Point3::new(0.5, 0.5, 0.0)).unwrap();

        let removed = g.apply_remove_vertex(id(1, 1)).unwrap();
        assert_eq!(removed.vertex.id(), id(1, 1));
        assert_eq!(removed.edges.len(), 2);
        assert_eq!(g.vertex_count(), 2);
        assert_eq!(g.edge_count(), 1);
        assert!(!g.contains_edge(id(1, 10)));
        assert!(!g.contains_edge(id(1, 12)));
        assert_eq!(g.vertex(id(1, 2)).unwrap().degree(), 1);
        assert_eq!(g.vertex(id(1, 3)).unwrap().degree(), 1);
    }

    #[test]
    fn test_remove_vertex_twice_is_not_found() {
        let mut g = triangle();
        g.apply_remove_vertex(id(1, 2)).unwrap();
        let before = g.snapshot();
        assert_eq!(
            g.apply_remove_vertex(id(1, 2)).unwrap_err(),
            GraphError::VertexNotFound(id(1, 2))
        );
        assert_eq!(g.snapshot(), before);
    }

    #[test]
    fn test_indices_stay_dense_after_removal() {
        let mut g = GraphStore::new();
        for seq in 1..=5 {
            g.apply_insert_vertex(id(1, seq), Point3::default()).unwrap();
        }
        g.apply_remove_vertex(id(1, 2)).unwrap();
        let order: Vec<(usize, u64)> = g.vertices().map(|v| (v.index(), v.id().sequence)).collect();
        assert_eq!(order, vec![(0, 1), (1, 3), (2, 4), (3, 5)]);
        assert_eq!(g.vertex_at(1).unwrap().id(), id(1, 3));

        // Freed slot reused, new vertex appended at the end of the order.
        g.apply_insert_vertex(id(1, 6), Point3::default()).unwrap();
        assert_eq!(g.vertex(id(1, 6)).unwrap().index(), 4);
    }

    #[test]
    fn test_bend_lifecycle() {
        let mut g = triangle();
        let e = id(1, 10);
        g.apply_break_edge_line(e, 0, Point3::new(1.0, 1.0, 1.0)).unwrap();
        g.apply_break_edge_line(e, 1, Point3::new(2.0, 2.0, 2.0)).unwrap();
        g.apply_break_edge_line(e, 0, Point3::new(3.0, 3.0, 3.0)).unwrap();
        let xs: Vec<f64> = g.edge(e).unwrap().bends.iter().map(|b| b.position.x).collect();
        assert_eq!(xs, vec![3.0, 1.0, 2.0]);
        assert_eq!(g.edge(e).unwrap().edge_line_count(), 4);

        let prev = g.apply_move_bend(e, 2, Point3::new(7.0, 7.0, 7.0)).unwrap();
        assert_eq!(prev, Point3::new(2.0, 2.0, 2.0));

        let removed = g.apply_remove_bend(e, 1).unwrap();
        assert_eq!(removed.position, Point3::new(1.0, 1.0, 1.0));
        assert_eq!(g.edge(e).unwrap().bends.len(), 2);

        assert!(matches!(
            g.apply_remove_bend(e, 2),
            Err(GraphError::BendIndexOutOfRange { index: 2, len: 2, .. })
        ));
        assert!(g.apply_break_edge_line(e, 4, Point3::default()).is_err());
    }

    #[test]
    fn test_properties_set_and_remove() {
        let mut g = triangle();
        let v = id(1, 1);
        assert_eq!(g.apply_set_vertex_property(v, "style", "color", "red").unwrap(), None);
        assert_eq!(
            g.apply_set_vertex_property(v, "style", "color", "blue").unwrap(),
            Some("red".to_string())
        );
        assert_eq!(g.vertex(v).unwrap().property("style", "color"), Some("blue"));

        assert_eq!(
            g.apply_set_vertex_property(v, "style", "color", "").unwrap(),
            Some("blue".to_string())
        );
        assert!(g.vertex(v).unwrap().properties.is_empty());

        g.apply_set_edge_property(id(1, 11), "None", "weight", "3").unwrap();
        assert_eq!(g.edge(id(1, 11)).unwrap().property("None", "weight"), Some("3"));
    }

    #[test]
    fn test_attribute_updates_return_previous() {
        let mut g = triangle();
        let v = id(1, 3);
        let prev = g.apply_move_vertex(v, Point3::new(5.0, 5.0, 5.0)).unwrap();
        assert_eq!(prev, Point3::new(0.0, 1.0, 0.0));
        let prev = g.apply_set_vertex_scale(v, 2.5).unwrap();
        assert_eq!(prev, 1.0);
        let prev = g.apply_set_vertex_rotation(v, Point4::IDENTITY).unwrap();
        assert_eq!(prev, Point4::VERTEX_DEFAULT);
        assert!(g.apply_move_vertex(id(9, 9), Point3::default()).is_err());
    }

    #[test]
    fn test_adjacency() {
        let g = triangle();
        let mut undirected = g.adjacent_vertices(id(1, 1), false);
        undirected.sort();
        assert_eq!(undirected, vec![id(1, 2), id(1, 3)]);
        assert_eq!(g.adjacent_vertices(id(1, 1), true), vec![id(1, 2)]);
    }

    #[test]
    fn test_self_loop_removed_cleanly() {
        let mut g = GraphStore::new();
        g.apply_insert_vertex(id(1, 1), Point3::default()).unwrap();
        g.apply_insert_edge(id(1, 2), id(1, 1), id(1, 1)).unwrap();
        assert_eq!(g.vertex(id(1, 1)).unwrap().degree(), 1);
        g.apply_remove_vertex(id(1, 1)).unwrap();
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_camera() {
        let mut g = GraphStore::new();
        assert_eq!(g.camera().rotation, Point4::IDENTITY);
        g.apply_camera_position(Point3::new(0.0, 0.0, 10.0));
        let prev = g.apply_camera_rotation(Point4::new(0.0, 1.0, 0.0, 0.0));
        assert_eq!(prev, Point4::IDENTITY);
        assert_eq!(g.camera().position.z, 10.0);
    }
}
