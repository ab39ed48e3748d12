//! Saving and restoring canvas arrangements

use tracing::{info, instrument};

use super::{queries::QueryMode, state::StoreState, GraphStore};
use crate::data::{AdapterError, Dashboard, DashboardLayout, DashboardSummary, EdgeLayout, NodeLayout};
use crate::traits::AdapterResult;

/// Layout of every persisted entity on the canvas.
fn capture_layout(state: &StoreState) -> DashboardLayout {
    let mut layout = DashboardLayout::default();
    for node in state.nodes.values().filter(|n| !n.is_draft()) {
        layout.nodes.insert(
            node.id.clone(),
            NodeLayout {
                x: node.position.x,
                y: node.position.y,
                w: node.width,
                h: node.height,
                hidden: node.hidden,
            },
        );
    }
    for edge in state.edges.values().filter(|e| !e.is_draft()) {
        layout.edges.insert(
            edge.id.clone(),
            EdgeLayout {
                source_handle: edge.source_handle.clone(),
                target_handle: edge.target_handle.clone(),
                hidden: edge.hidden,
            },
        );
    }
    layout
}

/// Applies saved geometry by id. Entities the query no longer returns are ignored.
fn overlay_layout(state: &mut StoreState, layout: &DashboardLayout) {
    for (id, saved) in &layout.nodes {
        if let Some(node) = state.nodes.get_mut(id) {
            node.position.x = saved.x;
            node.position.y = saved.y;
            node.width = saved.w;
            node.height = saved.h;
            node.hidden = saved.hidden;
        }
    }
    for (id, saved) in &layout.edges {
        if let Some(edge) = state.edges.get_mut(id) {
            edge.source_handle = saved.source_handle.clone();
            edge.target_handle = saved.target_handle.clone();
            edge.hidden = saved.hidden;
        }
    }
}

impl GraphStore {
    /// Saves the current canvas under `name`, together with the query that
    /// produced it. Passing an id overwrites that dashboard.
    #[instrument(skip(self))]
    pub async fn save_dashboard(&self, name: &str, id: Option<String>) -> AdapterResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AdapterError::InvalidInput("dashboard name must not be empty".to_string()));
        }
        let (query, layout) = {
            let state = self.inner.state.lock();
            let Some(query) = state.last_query.clone() else {
                return Err(AdapterError::InvalidInput("run a query before saving a dashboard".to_string()));
            };
            (query, capture_layout(&state))
        };

        let mut dashboard = Dashboard::new(name, query, layout);
        dashboard.id = id;

        let adapter = self.adapter_for("save_dashboard").await?;
        let saved = self.report(None, "save_dashboard", adapter.upsert_dashboard(dashboard).await)?;
        info!("Saved dashboard {} as {}", name, saved);
        Ok(saved)
    }

    /// Replays the dashboard's query in replace mode, then restores its layout.
    #[instrument(skip(self))]
    pub async fn open_dashboard(&self, id: &str) -> AdapterResult<Dashboard> {
        let adapter = self.adapter_for("open_dashboard").await?;
        let dashboard = self
            .report(Some(id), "open_dashboard", adapter.get_dashboard(id).await)?
            .ok_or_else(|| AdapterError::NotFound(format!("dashboard {}", id)))?;

        self.run_query(&dashboard.query, QueryMode::Replace).await?;

        let revision = {
            let mut state = self.inner.state.lock();
            overlay_layout(&mut state, &dashboard.layout);
            state.touch()
        };
        self.publish(revision);
        Ok(dashboard)
    }

    pub async fn list_dashboards(&self) -> AdapterResult<Vec<DashboardSummary>> {
        let adapter = self.adapter_for("list_dashboards").await?;
        self.report(None, "list_dashboards", adapter.list_dashboards().await)
    }

    pub async fn delete_dashboard(&self, id: &str) -> AdapterResult<()> {
        let adapter = self.adapter_for("delete_dashboard").await?;
        self.report(Some(id), "delete_dashboard", adapter.delete_dashboard(id).await)
    }

    pub async fn rename_dashboard(&self, id: &str, name: &str) -> AdapterResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AdapterError::InvalidInput("dashboard name must not be empty".to_string()));
        }
        let adapter = self.adapter_for("rename_dashboard").await?;
        self.report(Some(id), "rename_dashboard", adapter.rename_dashboard(id, name).await)
    }

    pub async fn reorder_dashboards(&self, ordered_ids: &[String]) -> AdapterResult<()> {
        let adapter = self.adapter_for("reorder_dashboards").await?;
        self.report(None, "reorder_dashboards", adapter.reorder_dashboards(ordered_ids).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::data::{Position, Properties};
    use crate::registry::AdapterRegistry;
    use crate::test_utils::FakeAdapter;

    async fn store() -> (GraphStore, Arc<FakeAdapter>) {
        let fake = Arc::new(FakeAdapter::new());
        fake.seed_node("a", &["Person"], Properties::new());
        fake.seed_node("b", &["Person"], Properties::new());
        fake.seed_relationship("ab", "a", "b", "KNOWS", Properties::new());
        let store = GraphStore::new(Arc::new(AdapterRegistry::new()));
        store.connect_with(fake.clone()).await.unwrap();
        (store, fake)
    }

    #[tokio::test]
    async fn test_save_and_open_restores_layout() {
        let (store, _fake) = store().await;
        assert!(matches!(
            store.save_dashboard("Team", None).await,
            Err(AdapterError::InvalidInput(_))
        ));

        store.run_query("MATCH (n)-[r]->(m) RETURN n, r, m", QueryMode::Merge).await.unwrap();
        store.move_node("a", Position::new(300.0, 40.0)).unwrap();
        store.resize_node("b", 120.0, 60.0).unwrap();
        store.create_draft_node("draft", Position::default());
        let id = store.save_dashboard("Team", None).await.unwrap();

        store.move_node("a", Position::new(0.0, 0.0)).unwrap();
        let dashboard = store.open_dashboard(&id).await.unwrap();
        assert_eq!(dashboard.name, "Team");
        assert!(!dashboard.layout.nodes.keys().any(|k| k.starts_with("draft-")));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.node("a").unwrap().position, Position::new(300.0, 40.0));
        assert_eq!(snapshot.node("b").unwrap().width, Some(120.0));
    }

    #[tokio::test]
    async fn test_list_rename_reorder_delete() {
        let (store, _fake) = store().await;
        store.run_query("MATCH (n) RETURN n", QueryMode::Merge).await.unwrap();
        let first = store.save_dashboard("First", None).await.unwrap();
        let second = store.save_dashboard("Second", None).await.unwrap();

        store.reorder_dashboards(&[second.clone(), first.clone()]).await.unwrap();
        store.rename_dashboard(&first, "Renamed").await.unwrap();
        let names: Vec<_> = store
            .list_dashboards()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["Second".to_string(), "Renamed".to_string()]);

        store.delete_dashboard(&second).await.unwrap();
        assert_eq!(store.list_dashboards().await.unwrap().len(), 1);
        assert!(matches!(store.open_dashboard(&second).await, Err(AdapterError::NotFound(_))));
    }
}
