//! Arena state guarded by the store lock

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::data::{display_label, EntityPhase, GraphEdge, GraphNode, APP_ID_PROPERTY};

/// Backend calls that may only run once at a time per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OwningCall {
    Commit,
    Delete,
    Reverse,
    Migrate,
}

/// A node taken out of the arena together with the edges removed with it,
/// remembering where each sat so a restore puts them back in order.
#[derive(Debug, Clone)]
pub(crate) struct RemovedNode {
    pub index: usize,
    pub node: GraphNode,
    pub edges: Vec<(usize, GraphEdge)>,
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub nodes: IndexMap<String, GraphNode>,
    pub edges: IndexMap<String, GraphEdge>,
    owners: HashMap<String, OwningCall>,
    pending: HashMap<String, usize>,
    pub revision: u64,
    pub connected: bool,
    /// Query that produced the current canvas, saved with dashboards.
    pub last_query: Option<String>,
}

impl StoreState {
    pub fn new(connected: bool) -> Self {
        Self {
            connected,
            ..Self::default()
        }
    }

    pub fn touch(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    pub fn owner(&self, id: &str) -> Option<OwningCall> {
        self.owners.get(id).copied()
    }

    pub fn claim(&mut self, id: &str, call: OwningCall) {
        self.owners.insert(id.to_string(), call);
    }

    pub fn release(&mut self, id: &str) {
        self.owners.remove(id);
    }

    pub fn begin_write(&mut self, id: &str) {
        *self.pending.entry(id.to_string()).or_insert(0) += 1;
    }

    pub fn end_write(&mut self, id: &str) {
        if let Some(count) = self.pending.get_mut(id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending.remove(id);
            }
        }
    }

    /// Whether any backend call is running against the entity.
    pub fn is_busy(&self, id: &str) -> bool {
        self.owners.contains_key(id) || self.pending.contains_key(id)
    }

    /// Drops every edge with an endpoint missing from the node arena.
    pub fn prune_dangling_edges(&mut self) -> usize {
        let before = self.edges.len();
        let nodes = &self.nodes;
        self.edges
            .retain(|_, e| nodes.contains_key(&e.source) && nodes.contains_key(&e.target));
        before - self.edges.len()
    }

    /// Number of backend calls still running.
    pub fn in_flight(&self) -> usize {
        self.owners.len() + self.pending.values().sum::<usize>()
    }

    pub fn phase(&self, id: &str) -> Option<EntityPhase> {
        match self.owner(id) {
            Some(OwningCall::Commit) => return Some(EntityPhase::Committing),
            Some(OwningCall::Delete) => return Some(EntityPhase::PendingDelete),
            Some(OwningCall::Reverse) | Some(OwningCall::Migrate) => return Some(EntityPhase::PendingWrite),
            None => {}
        }

        let draft = match (self.nodes.get(id), self.edges.get(id)) {
            (Some(node), _) => node.is_draft(),
            (None, Some(edge)) => edge.is_draft(),
            (None, None) => return None,
        };
        Some(if draft {
            EntityPhase::Draft
        } else if self.pending.contains_key(id) {
            EntityPhase::PendingWrite
        } else {
            EntityPhase::Persisted
        })
    }

    /// Whether the node exists and can be referenced by a backend call.
    pub fn is_persisted_node(&self, id: &str) -> bool {
        self.nodes.get(id).map_or(false, |n| !n.is_draft()) && self.owner(id).is_none()
    }

    /// Removes a node and every edge touching it.
    pub fn remove_node_cascade(&mut self, id: &str) -> Option<RemovedNode> {
        let (index, _, node) = self.nodes.shift_remove_full(id)?;
        let mut edges = Vec::new();
        while let Some(edge_index) = self.edges.values().position(|e| e.touches(id)) {
            if let Some((_, edge)) = self.edges.shift_remove_index(edge_index) {
                edges.push((edge_index, edge));
            }
        }
        Some(RemovedNode { index, node, edges })
    }

    /// Puts a removed node back, unless the id was reused meanwhile.
    /// Edges whose other endpoint has since disappeared stay removed.
    pub fn restore_node(&mut self, removed: RemovedNode) {
        let RemovedNode { index, node, edges } = removed;
        if self.nodes.contains_key(&node.id) {
            return;
        }
        let at = index.min(self.nodes.len());
        self.nodes.shift_insert(at, node.id.clone(), node);

        for (edge_index, edge) in edges.into_iter().rev() {
            self.restore_edge(edge_index, edge);
        }
    }

    pub fn restore_edge(&mut self, index: usize, edge: GraphEdge) {
        if self.edges.contains_key(&edge.id)
            || !self.nodes.contains_key(&edge.source)
            || !self.nodes.contains_key(&edge.target)
        {
            return;
        }
        let at = index.min(self.edges.len());
        self.edges.shift_insert(at, edge.id.clone(), edge);
    }

    /// Replaces a placeholder node id with the permanent one, on the node and
    /// on every edge that references it. The node keeps its arena slot.
    pub fn reconcile_node(&mut self, placeholder: &str, permanent: &str) -> bool {
        let Some((index, _, mut node)) = self.nodes.shift_remove_full(placeholder) else {
            return false;
        };
        // A query may already have brought the persisted node in.
        self.nodes.shift_remove(permanent);

        node.id = permanent.to_string();
        let at = index.min(self.nodes.len());
        self.nodes.shift_insert(at, node.id.clone(), node);

        for edge in self.edges.values_mut() {
            if edge.source == placeholder {
                edge.source = permanent.to_string();
            }
            if edge.target == placeholder {
                edge.target = permanent.to_string();
            }
        }
        true
    }

    /// Replaces a placeholder edge id with the permanent one in place.
    pub fn reconcile_edge(&mut self, placeholder: &str, permanent: &str) -> bool {
        if placeholder == permanent {
            return self.edges.contains_key(placeholder);
        }
        let Some((index, _, mut edge)) = self.edges.shift_remove_full(placeholder) else {
            return false;
        };
        self.edges.shift_remove(permanent);
        edge.id = permanent.to_string();
        let at = index.min(self.edges.len());
        self.edges.shift_insert(at, edge.id.clone(), edge);
        true
    }

    /// Node ids referenced by edges but missing from the arena.
    #[cfg(test)]
    pub fn dangling_endpoints(&self) -> Vec<String> {
        self.edges
            .values()
            .flat_map(|e| [&e.source, &e.target])
            .filter(|id| !self.nodes.contains_key(*id))
            .cloned()
            .collect()
    }
}

/// Recomputes the display label after a property change on a persisted node.
pub(crate) fn refresh_label(node: &mut GraphNode) {
    if !node.is_draft() {
        node.data.label = display_label(&node.data.properties, &node.data.labels, &node.id);
    }
}

/// Marks a node as persisted under its permanent id.
pub(crate) fn mark_persisted(node: &mut GraphNode, element_id: String) {
    node.data.draft = false;
    node.data.editing = false;
    node.data.sync_error = None;
    node.data.element_id = Some(element_id);
    node.data
        .properties
        .insert(APP_ID_PROPERTY.to_string(), serde_json::Value::String(node.id.clone()));
    node.kind = crate::data::DEFAULT_NODE_KIND.to_string();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Connection, Position, Properties};

    fn state_with(nodes: &[&str], edges: &[(&str, &str, &str)]) -> StoreState {
        let mut state = StoreState::default();
        for id in nodes {
            state
                .nodes
                .insert(id.to_string(), GraphNode::persisted(*id, None, vec![], Properties::new()));
        }
        for (id, s, t) in edges {
            state
                .edges
                .insert(id.to_string(), GraphEdge::draft(*id, &Connection::new(*s, *t)));
        }
        state
    }

    #[test]
    fn test_cascade_and_restore_keep_order() {
        let mut state = state_with(&["a", "b", "c"], &[("e1", "a", "b"), ("e2", "b", "c"), ("e3", "c", "a")]);

        let removed = state.remove_node_cascade("b").unwrap();
        assert_eq!(state.edges.keys().collect::<Vec<_>>(), vec!["e3"]);
        assert!(state.dangling_endpoints().is_empty());

        state.restore_node(removed);
        assert_eq!(state.nodes.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(state.edges.keys().collect::<Vec<_>>(), vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn test_restore_skips_edges_to_vanished_nodes() {
        let mut state = state_with(&["a", "b", "c"], &[("e1", "a", "b"), ("e2", "b", "c")]);
        let removed = state.remove_node_cascade("b").unwrap();
        state.remove_node_cascade("c");

        state.restore_node(removed);
        assert_eq!(state.edges.keys().collect::<Vec<_>>(), vec!["e1"]);
        assert!(state.dangling_endpoints().is_empty());
    }

    #[test]
    fn test_reconcile_node_rewrites_edges() {
        let mut state = state_with(&["x", "draft-1"], &[("e1", "x", "draft-1"), ("e2", "draft-1", "x")]);
        state.nodes["draft-1"].position = Position::new(100.0, 100.0);

        assert!(state.reconcile_node("draft-1", "42"));
        assert_eq!(state.nodes.get_index(1).map(|(k, _)| k.as_str()), Some("42"));
        assert_eq!(state.nodes["42"].position, Position::new(100.0, 100.0));
        assert_eq!(state.edges["e1"].target, "42");
        assert_eq!(state.edges["e2"].source, "42");
        assert!(state.dangling_endpoints().is_empty());
    }

    #[test]
    fn test_phase_tracking() {
        let mut state = state_with(&["a"], &[]);
        assert_eq!(state.phase("a"), Some(EntityPhase::Persisted));
        state.begin_write("a");
        state.begin_write("a");
        state.end_write("a");
        assert_eq!(state.phase("a"), Some(EntityPhase::PendingWrite));
        state.end_write("a");
        assert_eq!(state.phase("a"), Some(EntityPhase::Persisted));

        state.claim("a", OwningCall::Delete);
        assert_eq!(state.phase("a"), Some(EntityPhase::PendingDelete));
        assert_eq!(state.in_flight(), 1);
        state.release("a");
        assert_eq!(state.phase("missing"), None);
    }
}
