//! Local undo/redo over the replayed command stream.
//!
//! Each recorded command carries its complement, computed from the store
//! before the command ran. Moving back applies the complement of the entry
//! under the cursor; moving forward re-applies the next entry. Traversal
//! only touches the local store and never produces outgoing commands.
//!
//! A history built with [`History::with_limit`] keeps only the newest
//! entries; the oldest fall off and can no longer be undone.

use std::collections::VecDeque;

use log::debug;

use crate::applier::{self, ApplyContext};
use crate::command::{Command, CommandError};
use crate::event::GraphEvent;
use crate::graph::GraphStore;

#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<Command>,
    /// Number of entries currently applied
    cursor: usize,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_limit(usize::MAX)
    }
}

impl History {
    /// Unbounded history.
    pub fn new() -> Self {
        Self::default()
    }

    /// History that keeps at most `limit` entries.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Attaches the complement of `command` as judged against `store`.
    pub fn with_complement(store: &GraphStore, mut command: Command) -> Result<Command, CommandError> {
        let mutation = command.decode()?;
        command.complement = applier::complement_of(store, &mutation).map(|m| {
            let mut inverse = m.encode();
            inverse.client_id = inverse.client_id.or(command.client_id);
            Box::new(inverse)
        });
        Ok(command)
    }

    /// Applies a replayed command and records it. Any undone entries past
    /// the cursor are discarded.
    pub fn apply(
        &mut self,
        store: &mut GraphStore,
        command: Command,
        ctx: &ApplyContext,
    ) -> Result<Vec<GraphEvent>, CommandError> {
        let command = Self::with_complement(store, command)?;
        let events = applier::apply(store, &command, ctx)?;
        self.record(command);
        Ok(events)
    }

    /// Records a command that has already been applied.
    pub fn record(&mut self, command: Command) {
        self.entries.truncate(self.cursor);
        self.entries.push_back(command);
        if self.entries.len() > self.limit {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len();
    }

    /// Undoes the entry under the cursor. `None` at the start of history.
    pub fn move_back(&mut self, store: &mut GraphStore) -> Option<Vec<GraphEvent>> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        let entry = &self.entries[self.cursor];
        let Some(complement) = entry.complement.as_deref() else {
            debug!("History entry {} has no complement", entry.kind);
            return Some(Vec::new());
        };
        Some(replay_local(store, complement))
    }

    /// Re-applies the next undone entry. `None` at the end of history.
    pub fn move_forward(&mut self, store: &mut GraphStore) -> Option<Vec<GraphEvent>> {
        let entry = self.entries.get(self.cursor)?;
        self.cursor += 1;
        Some(replay_local(store, entry))
    }

    pub fn can_move_back(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_move_forward(&self) -> bool {
        self.cursor < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn entries(&self) -> impl Iterator<Item = &Command> {
        self.entries.iter()
    }
}

fn replay_local(store: &mut GraphStore, command: &Command) -> Vec<GraphEvent> {
    let ctx = ApplyContext {
        loading: true,
        receive_camera: true,
    };
    applier::apply(store, command, &ctx).unwrap_or_else(|e| {
        debug!("History replay of {} failed: {}", command.kind, e);
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Mutation;
    use crate::geometry::Point3;
    use crate::identity::EntityId;

    fn record_all(history: &mut History, store: &mut GraphStore, mutations: Vec<Mutation>) {
        let ctx = ApplyContext::default();
        for m in mutations {
            let mut command = m.encode();
            command.client_id.get_or_insert(1);
            history.apply(store, command, &ctx).unwrap();
        }
    }

    #[test]
    fn test_back_and_forward() {
        let mut store = GraphStore::new();
        let mut history = History::new();
        let v = EntityId::new(1, 1);
        record_all(
            &mut history,
            &mut store,
            vec![
                Mutation::InsertVertex {
                    id: v,
                    position: Point3::new(0.0, 0.0, 0.0),
                },
                Mutation::MoveVertex {
                    vertex: v,
                    position: Point3::new(3.0, 3.0, 3.0),
                },
            ],
        );
        assert_eq!(history.len(), 2);

        history.move_back(&mut store).unwrap();
        assert_eq!(store.vertex(v).unwrap().position, Point3::default());

        history.move_back(&mut store).unwrap();
        assert!(!store.contains_vertex(v));
        assert!(history.move_back(&mut store).is_none());

        history.move_forward(&mut store).unwrap();
        history.move_forward(&mut store).unwrap();
        assert_eq!(
            store.vertex(v).unwrap().position,
            Point3::new(3.0, 3.0, 3.0)
        );
        assert!(history.move_forward(&mut store).is_none());
    }

    #[test]
    fn test_record_discards_redo_tail() {
        let mut store = GraphStore::new();
        let mut history = History::new();
        record_all(
            &mut history,
            &mut store,
            vec![
                Mutation::ChangeCameraPosition {
                    position: Point3::new(1.0, 0.0, 0.0),
                },
                Mutation::ChangeCameraPosition {
                    position: Point3::new(2.0, 0.0, 0.0),
                },
            ],
        );
        history.move_back(&mut store);
        assert_eq!(store.camera().position.x, 1.0);
        assert!(history.can_move_forward());

        record_all(
            &mut history,
            &mut store,
            vec![Mutation::ChangeCameraPosition {
                position: Point3::new(5.0, 0.0, 0.0),
            }],
        );
        assert_eq!(history.len(), 2);
        assert!(!history.can_move_forward());
        history.move_back(&mut store);
        assert_eq!(store.camera().position.x, 1.0);
    }

    #[test]
    fn test_remove_vertex_undo_reinserts_with_owner() {
        let mut store = GraphStore::new();
        let mut history = History::new();
        let foreign = EntityId::new(8, 4);
        record_all(
            &mut history,
            &mut store,
            vec![Mutation::InsertVertex {
                id: foreign,
                position: Point3::new(1.0, 2.0, 3.0),
            }],
        );
        record_all(
            &mut history,
            &mut store,
            vec![Mutation::RemoveVertex { vertex: foreign }],
        );
        assert!(!store.contains_vertex(foreign));
        history.move_back(&mut store);
        assert_eq!(
            store.vertex(foreign).unwrap().position,
            Point3::new(1.0, 2.0, 3.0)
        );
    }

    #[test]
    fn test_limit_drops_oldest_entries() {
        let mut store = GraphStore::new();
        let mut history = History::with_limit(2);
        let moves = (1..=4)
            .map(|x| Mutation::ChangeCameraPosition {
                position: Point3::new(x as f64, 0.0, 0.0),
            })
            .collect();
        record_all(&mut history, &mut store, moves);
        assert_eq!(history.len(), 2);
        assert_eq!(history.cursor(), 2);

        history.move_back(&mut store).unwrap();
        history.move_back(&mut store).unwrap();
        assert_eq!(store.camera().position.x, 2.0);
        assert!(history.move_back(&mut store).is_none());
        assert_eq!(history.entries().count(), 2);
    }
}
