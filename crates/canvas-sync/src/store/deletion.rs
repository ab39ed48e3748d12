//! Hiding and deleting the current selection

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    protocol::{Dispatch, Notification, Op},
    state::OwningCall,
    GraphStore,
};
use crate::data::MutationRejected;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteMode {
    /// Hide from the canvas only; the database is untouched.
    HideOnly,
    /// Remove from the canvas and delete persisted entities from the database.
    HideAndPersistDelete,
}

impl GraphStore {
    /// Applies `mode` to every selected node and edge.
    ///
    /// Deleting a node takes its edges with it. Entities with any backend call
    /// still running are skipped, and so are nodes whose edges have one. A
    /// failed delete puts the entity back where it was.
    pub fn delete_selection(&self, mode: DeleteMode) -> Result<Vec<Dispatch>, MutationRejected> {
        match mode {
            DeleteMode::HideOnly => Ok(self.hide_selection().into_iter().collect()),
            DeleteMode::HideAndPersistDelete => self.delete_selected(),
        }
    }

    fn hide_selection(&self) -> Option<Dispatch> {
        let mut state = self.inner.state.lock();
        let selected: Vec<String> = state
            .nodes
            .values()
            .filter(|n| n.selected)
            .map(|n| n.id.clone())
            .collect();
        let any_edge = state.edges.values().any(|e| e.selected);
        if selected.is_empty() && !any_edge {
            return None;
        }

        for id in &selected {
            if let Some(node) = state.nodes.get_mut(id) {
                node.hidden = true;
                node.selected = false;
            }
        }
        for edge in state.edges.values_mut() {
            if edge.selected || selected.iter().any(|id| edge.touches(id)) {
                edge.hidden = true;
                edge.selected = false;
            }
        }
        let revision = state.touch();
        drop(state);
        self.publish(revision);
        Some(Dispatch::Local)
    }

    fn delete_selected(&self) -> Result<Vec<Dispatch>, MutationRejected> {
        let mut state = self.inner.state.lock();
        let nodes: Vec<(String, bool)> = state
            .nodes
            .values()
            .filter(|n| {
                n.selected
                    && !state.is_busy(&n.id)
                    && !state.edges.values().any(|e| e.touches(&n.id) && state.is_busy(&e.id))
            })
            .map(|n| (n.id.clone(), n.is_draft()))
            .collect();
        let edges: Vec<(String, bool)> = state
            .edges
            .values()
            .filter(|e| e.selected && !state.is_busy(&e.id))
            .map(|e| (e.id.clone(), e.is_draft()))
            .collect();
        if nodes.is_empty() && edges.is_empty() {
            return Ok(Vec::new());
        }

        let touches_backend = nodes.iter().chain(edges.iter()).any(|(_, draft)| !draft);
        if touches_backend && !self.inner.registry.is_connected() {
            self.notify(Notification::not_connected(None, "delete_selection"));
            return Err(MutationRejected::NotConnected);
        }

        let mut dispatches = Vec::new();
        let mut local = false;

        for (id, draft) in nodes {
            let Some(removed) = state.remove_node_cascade(&id) else {
                continue;
            };
            if draft {
                local = true;
                continue;
            }
            debug!("Deleting node {} with {} edges", id, removed.edges.len());
            let node_id = id.clone();
            dispatches.push(self.launch(
                &mut state,
                Op::owning("delete_node", &id, OwningCall::Delete),
                move |adapter| async move { adapter.delete_node(&node_id).await },
                |_, _: ()| {},
                move |state, _| state.restore_node(removed),
            ));
        }

        for (id, draft) in edges {
            // Already gone with one of its endpoints.
            let Some((index, _, edge)) = state.edges.shift_remove_full(&id) else {
                continue;
            };
            if draft {
                local = true;
                continue;
            }
            let edge_id = id.clone();
            dispatches.push(self.launch(
                &mut state,
                Op::owning("delete_relationship", &id, OwningCall::Delete),
                move |adapter| async move { adapter.delete_relationship(&edge_id).await },
                |_, _: ()| {},
                move |state, _| state.restore_edge(index, edge),
            ));
        }

        if local {
            dispatches.push(Dispatch::Local);
        }
        let revision = state.touch();
        drop(state);
        self.publish(revision);
        Ok(dispatches)
    }
}
