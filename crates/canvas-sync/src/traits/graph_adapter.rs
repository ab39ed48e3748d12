//! GraphAdapter trait definition for graph database interaction

use async_trait::async_trait;
use serde_json::Value;

use crate::config::BackendKind;
use crate::data::{
    AdapterError, CreatedNode, Dashboard, DashboardSummary, Projection, Properties, Row,
};

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Represents the interface every graph database backend implements so the
/// store can stay backend-agnostic.
///
/// Nodes are addressed by application id or internal id interchangeably.
/// Relationships are addressed by their application id. Labels and
/// relationship types outside `[A-Za-z0-9_]+` must be rejected with
/// [`AdapterError::InvalidInput`] before anything is sent to the backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphAdapter: Send + Sync {
    /// Which backend family this adapter talks to.
    fn kind(&self) -> BackendKind;

    /// Stable identity of the backend connection (kind, address, user).
    /// The registry replaces the live adapter only when this changes.
    fn identity(&self) -> String;

    /// Opens the connection. Called once by the registry before first use.
    async fn initialize(&self) -> AdapterResult<()>;

    /// Probes the backend end to end, returning a human-readable diagnostic on failure.
    async fn test_connection(&self) -> Result<(), String>;

    /// Cheap bounded health probe.
    async fn check_connection(&self) -> bool;

    /// Releases connection objects. Further calls fail with `NotConnected`.
    async fn close(&self) -> AdapterResult<()>;

    /// Runs an arbitrary read query and projects its result onto nodes and edges.
    async fn execute_projection(&self, query: &str) -> AdapterResult<Projection>;

    /// Runs a parameterized query and returns its rows.
    async fn execute_query(&self, query: &str, params: Properties) -> AdapterResult<Vec<Row>>;

    /// Creates a node and returns its permanent identities.
    async fn create_node(&self, labels: &[String], properties: Properties) -> AdapterResult<CreatedNode>;

    async fn rename_node(&self, id: &str, name: &str) -> AdapterResult<()>;

    /// Deletes a node together with all of its relationships.
    async fn delete_node(&self, id: &str) -> AdapterResult<()>;

    /// Sets a property, creating it if absent.
    async fn set_node_property(&self, id: &str, key: &str, value: Value) -> AdapterResult<()>;

    async fn delete_node_property(&self, id: &str, key: &str) -> AdapterResult<()>;

    async fn add_node_label(&self, id: &str, label: &str) -> AdapterResult<()>;

    async fn remove_node_label(&self, id: &str, label: &str) -> AdapterResult<()>;

    /// One-hop neighborhood of a node, including the node itself.
    async fn fetch_neighbors(&self, id: &str) -> AdapterResult<Projection>;

    /// Creates a relationship and returns its application id.
    async fn create_relationship(
        &self,
        source: &str,
        target: &str,
        label: &str,
        properties: Properties,
    ) -> AdapterResult<String>;

    /// Changes the relationship type, keeping endpoints, properties and id.
    async fn update_relationship_label(&self, id: &str, label: &str) -> AdapterResult<()>;

    async fn delete_relationship(&self, id: &str) -> AdapterResult<()>;

    async fn set_relationship_property(&self, id: &str, key: &str, value: Value) -> AdapterResult<()>;

    async fn delete_relationship_property(&self, id: &str, key: &str) -> AdapterResult<()>;

    /// Swaps source and target, keeping type, properties and id.
    /// Returns the new `(source, target)`.
    async fn reverse_relationship(&self, id: &str) -> AdapterResult<(String, String)>;

    /// Re-points a relationship, keeping type, properties and id.
    async fn migrate_relationship(&self, id: &str, new_source: &str, new_target: &str) -> AdapterResult<()>;

    /// Dashboards ordered by position.
    async fn list_dashboards(&self) -> AdapterResult<Vec<DashboardSummary>>;

    async fn get_dashboard(&self, id: &str) -> AdapterResult<Option<Dashboard>>;

    /// Creates or updates a dashboard and returns its id.
    async fn upsert_dashboard(&self, dashboard: Dashboard) -> AdapterResult<String>;

    async fn delete_dashboard(&self, id: &str) -> AdapterResult<()>;

    async fn rename_dashboard(&self, id: &str, name: &str) -> AdapterResult<()>;

    /// Stores `ordered_ids[i]` at position `i`.
    async fn reorder_dashboards(&self, ordered_ids: &[String]) -> AdapterResult<()>;
}
