//! Draft lifecycle: create locally, commit once, or discard

use serde_json::Value;
use tracing::debug;

use super::{
    protocol::{Dispatch, Op},
    state::{mark_persisted, OwningCall},
    GraphStore,
};
use crate::data::{
    identifiers::{is_valid_label, placeholder_id},
    Connection, CreatedNode, GraphEdge, GraphNode, MutationRejected, Position, APP_ID_PROPERTY,
    DISPLAY_PROPERTY,
};

impl GraphStore {
    /// Adds a local-only node and returns its placeholder id.
    pub fn create_draft_node(&self, kind: impl Into<String>, position: Position) -> String {
        let node = GraphNode::draft(placeholder_id(), kind, position);
        let id = node.id.clone();
        let revision = {
            let mut state = self.inner.state.lock();
            state.nodes.insert(id.clone(), node);
            state.touch()
        };
        self.publish(revision);
        id
    }

    /// Persists a draft node under `label`. An empty label discards the draft.
    pub fn commit_draft_node(&self, id: &str, label: &str) -> Result<Dispatch, MutationRejected> {
        let label = label.trim();
        let mut state = self.inner.state.lock();
        let node = state
            .nodes
            .get(id)
            .ok_or_else(|| MutationRejected::NodeNotFound(id.to_string()))?;
        if !node.is_draft() || state.owner(id).is_some() {
            return Ok(Dispatch::Noop);
        }

        if label.is_empty() {
            state.remove_node_cascade(id);
            let revision = state.touch();
            drop(state);
            self.publish(revision);
            return Ok(Dispatch::Local);
        }

        self.require_connection(id, "create_node")?;

        let Some(node) = state.nodes.get_mut(id) else {
            return Err(MutationRejected::NodeNotFound(id.to_string()));
        };
        node.data.label = label.to_string();
        node.data.editing = false;
        node.data.sync_error = None;
        node.data
            .properties
            .insert(DISPLAY_PROPERTY.to_string(), Value::String(label.to_string()));
        let labels = node.data.labels.clone();
        let properties = node.data.properties.clone();

        let placeholder = id.to_string();
        let dispatch = self.launch(
            &mut state,
            Op::owning("create_node", id, OwningCall::Commit),
            move |adapter| async move { adapter.create_node(&labels, properties).await },
            {
                let placeholder = placeholder.clone();
                move |state, created: CreatedNode| {
                    if state.reconcile_node(&placeholder, &created.id) {
                        if let Some(node) = state.nodes.get_mut(&created.id) {
                            mark_persisted(node, created.element_id);
                        }
                        debug!("Reconciled {} as {}", placeholder, created.id);
                    }
                }
            },
            move |state, error| {
                // Back to an editable draft so the user can retry.
                if let Some(node) = state.nodes.get_mut(&placeholder) {
                    node.data.editing = true;
                    node.data.sync_error = Some(error.to_string());
                }
            },
        );
        let revision = state.touch();
        drop(state);
        self.publish(revision);
        Ok(dispatch)
    }

    /// Removes a draft node and its edges. Anything else is left alone.
    pub fn discard_draft_node(&self, id: &str) -> Dispatch {
        let mut state = self.inner.state.lock();
        let is_draft = state.nodes.get(id).map_or(false, |n| n.is_draft());
        if !is_draft || state.owner(id).is_some() {
            return Dispatch::Noop;
        }
        state.remove_node_cascade(id);
        let revision = state.touch();
        drop(state);
        self.publish(revision);
        Dispatch::Local
    }

    /// Adds a local-only edge for a connect gesture and returns its placeholder id.
    ///
    /// The node the drag started from becomes the source.
    pub fn create_draft_edge(&self, connection: Connection) -> Result<String, MutationRejected> {
        let connection = connection.oriented();
        if connection.is_self_loop() {
            return Err(MutationRejected::SelfLoop(connection.source));
        }

        let mut state = self.inner.state.lock();
        for endpoint in [&connection.source, &connection.target] {
            if !state.nodes.contains_key(endpoint) {
                return Err(MutationRejected::MissingEndpoint(endpoint.clone()));
            }
        }

        let edge = GraphEdge::draft(placeholder_id(), &connection);
        let id = edge.id.clone();
        state.edges.insert(id.clone(), edge);
        let revision = state.touch();
        drop(state);
        self.publish(revision);
        Ok(id)
    }

    /// Persists a draft edge as a relationship of type `label`.
    /// An empty label discards the draft. Both endpoints must already be persisted.
    pub fn commit_draft_edge(&self, id: &str, label: &str) -> Result<Dispatch, MutationRejected> {
        let label = label.trim();
        let mut state = self.inner.state.lock();
        let edge = state
            .edges
            .get(id)
            .ok_or_else(|| MutationRejected::EdgeNotFound(id.to_string()))?;
        if !edge.is_draft() || state.owner(id).is_some() {
            return Ok(Dispatch::Noop);
        }

        if label.is_empty() {
            state.edges.shift_remove(id);
            let revision = state.touch();
            drop(state);
            self.publish(revision);
            return Ok(Dispatch::Local);
        }
        if !is_valid_label(label) {
            return Err(MutationRejected::InvalidLabel(label.to_string()));
        }

        let (source, target) = (edge.source.clone(), edge.target.clone());
        for endpoint in [&source, &target] {
            if !state.nodes.contains_key(endpoint) {
                return Err(MutationRejected::MissingEndpoint(endpoint.clone()));
            }
            if !state.is_persisted_node(endpoint) {
                return Err(MutationRejected::DraftEndpoint(endpoint.clone()));
            }
        }

        self.require_connection(id, "create_relationship")?;

        let Some(edge) = state.edges.get_mut(id) else {
            return Err(MutationRejected::EdgeNotFound(id.to_string()));
        };
        edge.data.label = label.to_string();
        edge.data.editing = false;
        edge.data.sync_error = None;
        let properties = edge.data.properties.clone();
        let rel_type = label.to_string();

        let placeholder = id.to_string();
        let dispatch = self.launch(
            &mut state,
            Op::owning("create_relationship", id, OwningCall::Commit),
            move |adapter| async move {
                adapter
                    .create_relationship(&source, &target, &rel_type, properties)
                    .await
            },
            {
                let placeholder = placeholder.clone();
                move |state, permanent: String| {
                    if state.reconcile_edge(&placeholder, &permanent) {
                        if let Some(edge) = state.edges.get_mut(&permanent) {
                            edge.data.draft = false;
                            edge.data.sync_error = None;
                            edge.data
                                .properties
                                .insert(APP_ID_PROPERTY.to_string(), Value::String(permanent.clone()));
                        }
                    }
                }
            },
            move |state, _error| {
                // A failed draft edge leaves no ghost behind.
                state.edges.shift_remove(&placeholder);
            },
        );
        let revision = state.touch();
        drop(state);
        self.publish(revision);
        Ok(dispatch)
    }

    /// Removes a draft edge. Anything else is left alone.
    pub fn discard_draft_edge(&self, id: &str) -> Dispatch {
        let mut state = self.inner.state.lock();
        let is_draft = state.edges.get(id).map_or(false, |e| e.is_draft());
        if !is_draft || state.owner(id).is_some() {
            return Dispatch::Noop;
        }
        state.edges.shift_remove(id);
        let revision = state.touch();
        drop(state);
        self.publish(revision);
        Dispatch::Local
    }
}
