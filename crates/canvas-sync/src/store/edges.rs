//! Re-pointing and reversing relationships

use super::{
    protocol::{Dispatch, Op},
    state::{OwningCall, StoreState},
    GraphStore,
};
use crate::data::{AdapterError, Connection, FailureKind, GraphEdge, MutationRejected};

/// Endpoints and handles of an edge, captured before a rewrite.
#[derive(Debug, Clone, PartialEq)]
struct Ends {
    source: String,
    target: String,
    source_handle: Option<String>,
    target_handle: Option<String>,
}

impl Ends {
    fn of(edge: &GraphEdge) -> Self {
        Self {
            source: edge.source.clone(),
            target: edge.target.clone(),
            source_handle: edge.source_handle.clone(),
            target_handle: edge.target_handle.clone(),
        }
    }

    fn apply(self, edge: &mut GraphEdge) {
        edge.source = self.source;
        edge.target = self.target;
        edge.source_handle = self.source_handle;
        edge.target_handle = self.target_handle;
    }

    fn reversed(&self) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
            source_handle: self.target_handle.clone(),
            target_handle: self.source_handle.clone(),
        }
    }
}

/// Failure branch shared by reverse and migrate.
///
/// A partial failure means the relationship is gone from the backend, so the
/// edge stays where the user put it as an unpersisted draft. Any other failure
/// restores the old endpoints, provided nothing moved the edge since.
fn unwind_rewrite(state: &mut StoreState, edge_id: &str, produced: &Ends, previous: Ends, error: &AdapterError) {
    if error.kind() == FailureKind::PartialFailure {
        if let Some(edge) = state.edges.get_mut(edge_id) {
            edge.data.draft = true;
            edge.data.sync_error = Some(error.to_string());
        }
        return;
    }

    let Some(edge) = state.edges.get(edge_id) else {
        return;
    };
    if Ends::of(edge) != *produced {
        return;
    }
    if state.nodes.contains_key(&previous.source) && state.nodes.contains_key(&previous.target) {
        if let Some(edge) = state.edges.get_mut(edge_id) {
            previous.apply(edge);
        }
    } else {
        state.edges.shift_remove(edge_id);
    }
}

impl GraphStore {
    /// Moves one or both ends of an edge. Moving only the handles is a local change.
    pub fn reconnect_edge(&self, edge_id: &str, connection: Connection) -> Result<Dispatch, MutationRejected> {
        let connection = connection.oriented();
        if connection.is_self_loop() {
            return Err(MutationRejected::SelfLoop(connection.source));
        }

        let mut state = self.inner.state.lock();
        let edge = state
            .edges
            .get(edge_id)
            .ok_or_else(|| MutationRejected::EdgeNotFound(edge_id.to_string()))?;
        if state.owner(edge_id).is_some() {
            return Ok(Dispatch::Noop);
        }
        for endpoint in [&connection.source, &connection.target] {
            if !state.nodes.contains_key(endpoint) {
                return Err(MutationRejected::MissingEndpoint(endpoint.clone()));
            }
        }

        let previous = Ends::of(edge);
        let produced = Ends {
            source: connection.source,
            target: connection.target,
            source_handle: connection.source_handle,
            target_handle: connection.target_handle,
        };
        let moved = previous.source != produced.source || previous.target != produced.target;

        if !moved || edge.is_draft() {
            if let Some(edge) = state.edges.get_mut(edge_id) {
                produced.apply(edge);
            }
            let revision = state.touch();
            drop(state);
            self.publish(revision);
            return Ok(Dispatch::Local);
        }

        for endpoint in [&produced.source, &produced.target] {
            if !state.is_persisted_node(endpoint) {
                return Err(MutationRejected::DraftEndpoint(endpoint.clone()));
            }
        }
        self.require_connection(edge_id, "migrate_relationship")?;

        if let Some(edge) = state.edges.get_mut(edge_id) {
            produced.clone().apply(edge);
        }

        let (id, source, target) = (edge_id.to_string(), produced.source.clone(), produced.target.clone());
        let entity = edge_id.to_string();
        let dispatch = self.launch(
            &mut state,
            Op::owning("migrate_relationship", edge_id, OwningCall::Migrate),
            move |adapter| async move { adapter.migrate_relationship(&id, &source, &target).await },
            |_, _: ()| {},
            move |state, error| unwind_rewrite(state, &entity, &produced, previous, error),
        );
        let revision = state.touch();
        drop(state);
        self.publish(revision);
        Ok(dispatch)
    }

    /// Swaps source and target, handles included.
    pub fn reverse_edge(&self, edge_id: &str) -> Result<Dispatch, MutationRejected> {
        let mut state = self.inner.state.lock();
        let edge = state
            .edges
            .get(edge_id)
            .ok_or_else(|| MutationRejected::EdgeNotFound(edge_id.to_string()))?;
        if state.owner(edge_id).is_some() {
            return Ok(Dispatch::Noop);
        }

        let previous = Ends::of(edge);
        let produced = previous.reversed();

        if edge.is_draft() {
            if let Some(edge) = state.edges.get_mut(edge_id) {
                produced.apply(edge);
            }
            let revision = state.touch();
            drop(state);
            self.publish(revision);
            return Ok(Dispatch::Local);
        }

        self.require_connection(edge_id, "reverse_relationship")?;
        if let Some(edge) = state.edges.get_mut(edge_id) {
            produced.clone().apply(edge);
        }

        let id = edge_id.to_string();
        let entity = edge_id.to_string();
        let dispatch = self.launch(
            &mut state,
            Op::owning("reverse_relationship", edge_id, OwningCall::Reverse),
            move |adapter| async move { adapter.reverse_relationship(&id).await },
            |_, _: (String, String)| {},
            move |state, error| unwind_rewrite(state, &entity, &produced, previous, error),
        );
        let revision = state.touch();
        drop(state);
        self.publish(revision);
        Ok(dispatch)
    }
}
