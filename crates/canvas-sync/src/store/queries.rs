//! Loading query results into the canvas

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{state::StoreState, GraphStore};
use crate::data::{display_label, AdapterError, EntityPhase, GraphNode, Projection};
use crate::traits::{AdapterResult, LayoutEngine};

/// How a query result combines with what is already on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryMode {
    /// Add what is new, refresh what is known, keep everything else.
    #[default]
    Merge,
    /// Drop drafts and everything the result does not contain, then merge.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub nodes_added: usize,
    pub edges_added: usize,
    pub nodes_removed: usize,
}

impl GraphStore {
    /// Runs a read query and folds its projection into the canvas.
    #[instrument(skip(self))]
    pub async fn run_query(&self, query: &str, mode: QueryMode) -> AdapterResult<MergeReport> {
        let adapter = self.adapter_for("run_query").await?;
        let projection = self.report(None, "run_query", adapter.execute_projection(query).await)?;

        let (revision, report) = {
            let mut state = self.inner.state.lock();
            state.last_query = Some(query.to_string());
            let report = merge_projection(&mut state, projection, mode, self.inner.layout.as_ref());
            (state.touch(), report)
        };
        info!(
            "Query added {} nodes and {} edges ({} removed)",
            report.nodes_added, report.edges_added, report.nodes_removed
        );
        self.publish(revision);
        Ok(report)
    }

    /// Brings the one-hop neighborhood of a persisted node onto the canvas.
    #[instrument(skip(self))]
    pub async fn expand_neighbors(&self, id: &str) -> AdapterResult<MergeReport> {
        match self.inner.state.lock().nodes.get(id) {
            None => return Err(AdapterError::NotFound(format!("node {}", id))),
            Some(node) if node.is_draft() => {
                return Err(AdapterError::InvalidInput(format!("node {} is not persisted yet", id)))
            }
            Some(_) => {}
        }

        let adapter = self.adapter_for("fetch_neighbors").await?;
        let projection = self.report(Some(id), "fetch_neighbors", adapter.fetch_neighbors(id).await)?;

        let (revision, report) = {
            let mut state = self.inner.state.lock();
            let report = merge_projection(&mut state, projection, QueryMode::Merge, self.inner.layout.as_ref());
            (state.touch(), report)
        };
        self.publish(revision);
        Ok(report)
    }

    /// Probes the live adapter and records the result as the connection flag.
    pub async fn check_health(&self) -> bool {
        let healthy = matches!(self.inner.registry.check_connection().await, Ok(true));
        self.set_connected(healthy);
        healthy
    }
}

/// Folds a projection into the arenas.
///
/// Known nodes get fresh data but keep their position, size and flags. Only
/// nodes new to the canvas go through layout. Edges whose endpoints are not on
/// the canvas are dropped. Entities with a backend call in flight are left as
/// they are.
pub(crate) fn merge_projection(
    state: &mut StoreState,
    projection: Projection,
    mode: QueryMode,
    layout: &dyn LayoutEngine,
) -> MergeReport {
    let mut report = MergeReport::default();

    if mode == QueryMode::Replace {
        let before = state.nodes.len();
        state
            .nodes
            .retain(|id, node| !node.is_draft() && projection.nodes.iter().any(|n| n.id == *id));
        report.nodes_removed = before - state.nodes.len();
        state
            .edges
            .retain(|id, edge| !edge.is_draft() && projection.edges.iter().any(|e| e.id == *id));
        // A result may name a relationship without returning its endpoints.
        state.prune_dangling_edges();
    }

    let mut fresh: Vec<GraphNode> = Vec::new();
    for incoming in projection.nodes {
        let settled = state.phase(&incoming.id) == Some(EntityPhase::Persisted);
        match state.nodes.get_mut(&incoming.id) {
            Some(existing) if settled => {
                existing.data.labels = incoming.data.labels;
                existing.data.properties = incoming.data.properties;
                existing.data.element_id = incoming.data.element_id.or(existing.data.element_id.take());
                existing.data.label = display_label(&existing.data.properties, &existing.data.labels, &existing.id);
            }
            Some(_) => {}
            None if fresh.iter().any(|n| n.id == incoming.id) => {}
            None => fresh.push(incoming),
        }
    }

    if !fresh.is_empty() {
        let existing: Vec<GraphNode> = state.nodes.values().cloned().collect();
        let edges: Vec<_> = state.edges.values().cloned().collect();
        report.nodes_added = fresh.len();
        for node in layout.layout(&existing, fresh, &edges) {
            state.nodes.insert(node.id.clone(), node);
        }
    }

    for incoming in projection.edges {
        if !state.nodes.contains_key(&incoming.source) || !state.nodes.contains_key(&incoming.target) {
            continue;
        }
        let settled = state.phase(&incoming.id) == Some(EntityPhase::Persisted);
        match state.edges.get_mut(&incoming.id) {
            Some(existing) if settled => {
                existing.data.label = incoming.data.label;
                existing.data.properties = incoming.data.properties;
                existing.source = incoming.source;
                existing.target = incoming.target;
            }
            Some(_) => {}
            None => {
                state.edges.insert(incoming.id.clone(), incoming);
                report.edges_added += 1;
            }
        }
    }

    report
}
