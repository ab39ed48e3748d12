use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::config::BackendKind;
use crate::data::{
    identifiers::{application_id, is_valid_label},
    AdapterError, CreatedNode, Dashboard, DashboardSummary, GraphEdge, GraphNode, Projection, Properties, Row,
    APP_ID_PROPERTY,
};
use crate::traits::{AdapterResult, GraphAdapter};

/// One call received by a [`FakeAdapter`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub op: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone)]
struct FakeNode {
    element_id: String,
    labels: Vec<String>,
    properties: Properties,
}

#[derive(Debug, Clone)]
struct FakeRelationship {
    source: String,
    target: String,
    rel_type: String,
    properties: Properties,
}

#[derive(Debug, Default)]
struct FakeGraph {
    nodes: IndexMap<String, FakeNode>,
    relationships: IndexMap<String, FakeRelationship>,
    dashboards: Vec<Dashboard>,
}

impl FakeGraph {
    fn node_mut(&mut self, id: &str) -> AdapterResult<&mut FakeNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| AdapterError::NotFound(format!("node {}", id)))
    }

    fn relationship_mut(&mut self, id: &str) -> AdapterResult<&mut FakeRelationship> {
        self.relationships
            .get_mut(id)
            .ok_or_else(|| AdapterError::NotFound(format!("relationship {}", id)))
    }

    fn dashboard_mut(&mut self, id: &str) -> AdapterResult<&mut Dashboard> {
        self.dashboards
            .iter_mut()
            .find(|d| d.id.as_deref() == Some(id))
            .ok_or_else(|| AdapterError::NotFound(format!("dashboard {}", id)))
    }

    fn project(&self, node_ids: &[String], relationship_ids: &[String]) -> Projection {
        let nodes = node_ids
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|n| (id, n)))
            .map(|(id, n)| {
                GraphNode::persisted(id.clone(), Some(n.element_id.clone()), n.labels.clone(), n.properties.clone())
            })
            .collect();
        let edges = relationship_ids
            .iter()
            .filter_map(|id| self.relationships.get(id).map(|r| (id, r)))
            .map(|(id, r)| GraphEdge::persisted(id.clone(), &r.source, &r.target, &r.rel_type, r.properties.clone()))
            .collect();
        Projection { nodes, edges }
    }
}

struct InjectedFailure {
    op: &'static str,
    detail: Option<String>,
    error: AdapterError,
}

/// In-memory [`GraphAdapter`] for store tests.
///
/// Behaves like a small property graph. Every data call is logged, and
/// failures can be queued per operation so that rollback paths can be driven
/// deterministically. `execute_projection` ignores the query text and returns
/// the whole graph.
pub struct FakeAdapter {
    identity: String,
    probe_delay: Option<Duration>,
    graph: Mutex<FakeGraph>,
    failures: Mutex<Vec<InjectedFailure>>,
    log: Mutex<Vec<RecordedCall>>,
    element_ids: AtomicU64,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self {
            identity: "fake|memory".to_string(),
            probe_delay: None,
            graph: Mutex::new(FakeGraph::default()),
            failures: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            element_ids: AtomicU64::new(1),
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Makes connection probes sleep before answering.
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = Some(delay);
        self
    }

    fn next_element_id(&self) -> String {
        self.element_ids.fetch_add(1, Ordering::SeqCst).to_string()
    }

    pub fn seed_node(&self, id: &str, labels: &[&str], mut properties: Properties) {
        properties.insert(APP_ID_PROPERTY.to_string(), Value::String(id.to_string()));
        let node = FakeNode {
            element_id: self.next_element_id(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            properties,
        };
        self.graph.lock().nodes.insert(id.to_string(), node);
    }

    pub fn seed_relationship(&self, id: &str, source: &str, target: &str, rel_type: &str, mut properties: Properties) {
        properties.insert(APP_ID_PROPERTY.to_string(), Value::String(id.to_string()));
        let relationship = FakeRelationship {
            source: source.to_string(),
            target: target.to_string(),
            rel_type: rel_type.to_string(),
            properties,
        };
        self.graph.lock().relationships.insert(id.to_string(), relationship);
    }

    /// The next call to `op` fails with `error`.
    pub fn fail_next(&self, op: &'static str, error: AdapterError) {
        self.failures.lock().push(InjectedFailure { op, detail: None, error });
    }

    /// The next call to `op` whose detail starts with `detail` fails with `error`.
    /// Property writes log their detail as `key=value`.
    pub fn fail_next_matching(&self, op: &'static str, detail: &str, error: AdapterError) {
        self.failures.lock().push(InjectedFailure {
            op,
            detail: Some(detail.to_string()),
            error,
        });
    }

    pub fn calls(&self, op: &str) -> usize {
        self.log.lock().iter().filter(|c| c.op == op).count()
    }

    pub fn call_log(&self) -> Vec<RecordedCall> {
        self.log.lock().clone()
    }

    pub fn node_count(&self) -> usize {
        self.graph.lock().nodes.len()
    }

    pub fn node_labels(&self, id: &str) -> Option<Vec<String>> {
        self.graph.lock().nodes.get(id).map(|n| n.labels.clone())
    }

    pub fn node_properties(&self, id: &str) -> Option<Properties> {
        self.graph.lock().nodes.get(id).map(|n| n.properties.clone())
    }

    pub fn relationship_endpoints(&self, id: &str) -> Option<(String, String)> {
        self.graph
            .lock()
            .relationships
            .get(id)
            .map(|r| (r.source.clone(), r.target.clone()))
    }

    /// Logs the call and returns a queued failure, if one matches.
    fn record(&self, op: &'static str, detail: impl Into<String>) -> AdapterResult<()> {
        let detail = detail.into();
        debug!("fake adapter: {} {}", op, detail);
        self.log.lock().push(RecordedCall {
            op,
            detail: detail.clone(),
        });

        let mut failures = self.failures.lock();
        let matching = failures.iter().position(|f| {
            f.op == op && f.detail.as_ref().map_or(true, |d| detail.starts_with(d.as_str()))
        });
        match matching {
            Some(index) => Err(failures.remove(index).error),
            None => Ok(()),
        }
    }

    async fn probe_pause(&self) {
        if let Some(delay) = self.probe_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn check_label(label: &str) -> AdapterResult<()> {
    if is_valid_label(label) {
        Ok(())
    } else {
        Err(AdapterError::InvalidInput(format!("invalid label '{}'", label)))
    }
}

#[async_trait]
impl GraphAdapter for FakeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Transactional
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }

    async fn initialize(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), String> {
        self.probe_pause().await;
        Ok(())
    }

    async fn check_connection(&self) -> bool {
        self.probe_pause().await;
        true
    }

    async fn close(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn execute_projection(&self, query: &str) -> AdapterResult<Projection> {
        self.record("execute_projection", query)?;
        let graph = self.graph.lock();
        let nodes: Vec<String> = graph.nodes.keys().cloned().collect();
        let relationships: Vec<String> = graph.relationships.keys().cloned().collect();
        Ok(graph.project(&nodes, &relationships))
    }

    async fn execute_query(&self, query: &str, _params: Properties) -> AdapterResult<Vec<Row>> {
        self.record("execute_query", query)?;
        let graph = self.graph.lock();
        Ok(graph
            .nodes
            .keys()
            .map(|id| {
                let mut row = Row::new();
                row.insert(APP_ID_PROPERTY.to_string(), Value::String(id.clone()));
                row
            })
            .collect())
    }

    async fn create_node(&self, labels: &[String], mut properties: Properties) -> AdapterResult<CreatedNode> {
        self.record("create_node", labels.join(":"))?;
        for label in labels {
            check_label(label)?;
        }
        let id = application_id();
        properties.insert(APP_ID_PROPERTY.to_string(), Value::String(id.clone()));
        let element_id = self.next_element_id();
        self.graph.lock().nodes.insert(
            id.clone(),
            FakeNode {
                element_id: element_id.clone(),
                labels: labels.to_vec(),
                properties,
            },
        );
        Ok(CreatedNode { id, element_id })
    }

    async fn rename_node(&self, id: &str, name: &str) -> AdapterResult<()> {
        self.record("rename_node", format!("{}={}", id, name))?;
        let mut graph = self.graph.lock();
        graph
            .node_mut(id)?
            .properties
            .insert("name".to_string(), Value::String(name.to_string()));
        Ok(())
    }

    async fn delete_node(&self, id: &str) -> AdapterResult<()> {
        self.record("delete_node", id)?;
        let mut graph = self.graph.lock();
        if graph.nodes.shift_remove(id).is_none() {
            return Err(AdapterError::NotFound(format!("node {}", id)));
        }
        graph.relationships.retain(|_, r| r.source != id && r.target != id);
        Ok(())
    }

    async fn set_node_property(&self, id: &str, key: &str, value: Value) -> AdapterResult<()> {
        self.record("set_node_property", format!("{}={}", key, value))?;
        self.graph.lock().node_mut(id)?.properties.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_node_property(&self, id: &str, key: &str) -> AdapterResult<()> {
        self.record("delete_node_property", key)?;
        self.graph.lock().node_mut(id)?.properties.remove(key);
        Ok(())
    }

    async fn add_node_label(&self, id: &str, label: &str) -> AdapterResult<()> {
        self.record("add_node_label", label)?;
        check_label(label)?;
        let mut graph = self.graph.lock();
        let node = graph.node_mut(id)?;
        if !node.labels.iter().any(|l| l == label) {
            node.labels.push(label.to_string());
        }
        Ok(())
    }

    async fn remove_node_label(&self, id: &str, label: &str) -> AdapterResult<()> {
        self.record("remove_node_label", label)?;
        check_label(label)?;
        self.graph.lock().node_mut(id)?.labels.retain(|l| l != label);
        Ok(())
    }

    async fn fetch_neighbors(&self, id: &str) -> AdapterResult<Projection> {
        self.record("fetch_neighbors", id)?;
        let graph = self.graph.lock();
        if !graph.nodes.contains_key(id) {
            return Err(AdapterError::NotFound(format!("node {}", id)));
        }
        let mut nodes = vec![id.to_string()];
        let mut relationships = Vec::new();
        for (rel_id, r) in &graph.relationships {
            let other = if r.source == id {
                &r.target
            } else if r.target == id {
                &r.source
            } else {
                continue;
            };
            relationships.push(rel_id.clone());
            if !nodes.contains(other) {
                nodes.push(other.clone());
            }
        }
        Ok(graph.project(&nodes, &relationships))
    }

    async fn create_relationship(
        &self,
        source: &str,
        target: &str,
        label: &str,
        mut properties: Properties,
    ) -> AdapterResult<String> {
        self.record("create_relationship", format!("{}-{}->{}", source, label, target))?;
        check_label(label)?;
        let mut graph = self.graph.lock();
        for endpoint in [source, target] {
            graph.node_mut(endpoint)?;
        }
        let id = application_id();
        properties.insert(APP_ID_PROPERTY.to_string(), Value::String(id.clone()));
        graph.relationships.insert(
            id.clone(),
            FakeRelationship {
                source: source.to_string(),
                target: target.to_string(),
                rel_type: label.to_string(),
                properties,
            },
        );
        Ok(id)
    }

    async fn update_relationship_label(&self, id: &str, label: &str) -> AdapterResult<()> {
        self.record("update_relationship_label", label)?;
        check_label(label)?;
        self.graph.lock().relationship_mut(id)?.rel_type = label.to_string();
        Ok(())
    }

    async fn delete_relationship(&self, id: &str) -> AdapterResult<()> {
        self.record("delete_relationship", id)?;
        self.graph
            .lock()
            .relationships
            .shift_remove(id)
            .map(|_| ())
            .ok_or_else(|| AdapterError::NotFound(format!("relationship {}", id)))
    }

    async fn set_relationship_property(&self, id: &str, key: &str, value: Value) -> AdapterResult<()> {
        self.record("set_relationship_property", format!("{}={}", key, value))?;
        self.graph
            .lock()
            .relationship_mut(id)?
            .properties
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_relationship_property(&self, id: &str, key: &str) -> AdapterResult<()> {
        self.record("delete_relationship_property", key)?;
        self.graph.lock().relationship_mut(id)?.properties.remove(key);
        Ok(())
    }

    async fn reverse_relationship(&self, id: &str) -> AdapterResult<(String, String)> {
        self.record("reverse_relationship", id)?;
        let mut graph = self.graph.lock();
        let r = graph.relationship_mut(id)?;
        std::mem::swap(&mut r.source, &mut r.target);
        Ok((r.source.clone(), r.target.clone()))
    }

    async fn migrate_relationship(&self, id: &str, new_source: &str, new_target: &str) -> AdapterResult<()> {
        self.record("migrate_relationship", format!("{}->{}", new_source, new_target))?;
        let mut graph = self.graph.lock();
        for endpoint in [new_source, new_target] {
            graph.node_mut(endpoint)?;
        }
        let r = graph.relationship_mut(id)?;
        r.source = new_source.to_string();
        r.target = new_target.to_string();
        Ok(())
    }

    async fn list_dashboards(&self) -> AdapterResult<Vec<DashboardSummary>> {
        self.record("list_dashboards", "")?;
        let graph = self.graph.lock();
        Ok(graph
            .dashboards
            .iter()
            .enumerate()
            .filter_map(|(position, d)| {
                d.id.clone().map(|id| DashboardSummary {
                    id,
                    name: d.name.clone(),
                    position: position as i64,
                    updated_at: d.updated_at,
                })
            })
            .collect())
    }

    async fn get_dashboard(&self, id: &str) -> AdapterResult<Option<Dashboard>> {
        self.record("get_dashboard", id)?;
        let graph = self.graph.lock();
        Ok(graph.dashboards.iter().find(|d| d.id.as_deref() == Some(id)).cloned())
    }

    async fn upsert_dashboard(&self, mut dashboard: Dashboard) -> AdapterResult<String> {
        self.record("upsert_dashboard", dashboard.name.clone())?;
        let mut graph = self.graph.lock();
        let now = Utc::now();
        if let Some(id) = dashboard.id.clone() {
            if let Ok(existing) = graph.dashboard_mut(&id) {
                existing.name = dashboard.name;
                existing.query = dashboard.query;
                existing.layout = dashboard.layout;
                existing.updated_at = Some(now);
                return Ok(id);
            }
        }
        let id = dashboard.id.clone().unwrap_or_else(application_id);
        dashboard.id = Some(id.clone());
        dashboard.created_at = Some(now);
        dashboard.updated_at = Some(now);
        graph.dashboards.push(dashboard);
        Ok(id)
    }

    async fn delete_dashboard(&self, id: &str) -> AdapterResult<()> {
        self.record("delete_dashboard", id)?;
        self.graph.lock().dashboards.retain(|d| d.id.as_deref() != Some(id));
        Ok(())
    }

    async fn rename_dashboard(&self, id: &str, name: &str) -> AdapterResult<()> {
        self.record("rename_dashboard", name)?;
        let mut graph = self.graph.lock();
        let dashboard = graph.dashboard_mut(id)?;
        dashboard.name = name.to_string();
        dashboard.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn reorder_dashboards(&self, ordered_ids: &[String]) -> AdapterResult<()> {
        self.record("reorder_dashboards", ordered_ids.join(","))?;
        let mut graph = self.graph.lock();
        graph.dashboards.sort_by_key(|d| {
            d.id
                .as_ref()
                .and_then(|id| ordered_ids.iter().position(|o| o == id))
                .unwrap_or(usize::MAX)
        });
        Ok(())
    }
}
