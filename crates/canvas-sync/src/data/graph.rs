//! Graph model held by the store and produced by adapters

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Property key used as the human-readable label of a node.
pub const DISPLAY_PROPERTY: &str = "name";

/// Property key holding the application id of nodes and relationships.
pub const APP_ID_PROPERTY: &str = "id";

/// Visual variant of nodes coming from the database.
pub const DEFAULT_NODE_KIND: &str = "entity";

/// Visual variant of nodes created on the canvas and not yet committed.
pub const DRAFT_NODE_KIND: &str = "draft";

/// Open property map of a node or relationship.
pub type Properties = BTreeMap<String, Value>;

/// One result row of a generic query, keyed by column name.
pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    pub label: String,
    /// Internal identity assigned by the backend, if persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    /// Backend labels of the node.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub editing: bool,
    /// Set when the last backend write for this node failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: NodeData,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub hidden: bool,
}

impl GraphNode {
    /// A local-only node awaiting its first commit.
    pub fn draft(id: impl Into<String>, kind: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            data: NodeData {
                draft: true,
                editing: true,
                ..NodeData::default()
            },
            position,
            width: None,
            height: None,
            selected: false,
            hidden: false,
        }
    }

    /// A node as read back from a backend. The label is derived from its properties.
    pub fn persisted(
        id: impl Into<String>,
        element_id: Option<String>,
        labels: Vec<String>,
        properties: Properties,
    ) -> Self {
        let id = id.into();
        let label = display_label(&properties, &labels, &id);
        Self {
            id,
            kind: DEFAULT_NODE_KIND.to_string(),
            data: NodeData {
                label,
                element_id,
                labels,
                properties,
                ..NodeData::default()
            },
            position: Position::default(),
            width: None,
            height: None,
            selected: false,
            hidden: false,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.data.draft
    }
}

/// Picks the text shown on a node: `name`, then `title`, then the first label, then the id.
pub fn display_label(properties: &Properties, labels: &[String], id: &str) -> String {
    [DISPLAY_PROPERTY, "title"]
        .iter()
        .find_map(|key| match properties.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .or_else(|| labels.first().cloned())
        .unwrap_or_else(|| id.to_string())
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeData {
    /// Relationship type.
    pub label: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub editing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    pub data: EdgeData,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub hidden: bool,
}

impl GraphEdge {
    pub fn draft(id: impl Into<String>, connection: &Connection) -> Self {
        Self {
            id: id.into(),
            source: connection.source.clone(),
            target: connection.target.clone(),
            source_handle: connection.source_handle.clone(),
            target_handle: connection.target_handle.clone(),
            data: EdgeData {
                draft: true,
                editing: true,
                ..EdgeData::default()
            },
            selected: false,
            hidden: false,
        }
    }

    pub fn persisted(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        label: impl Into<String>,
        properties: Properties,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            data: EdgeData {
                label: label.into(),
                properties,
                ..EdgeData::default()
            },
            selected: false,
            hidden: false,
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }

    pub fn is_draft(&self) -> bool {
        self.data.draft
    }
}

/// A connect gesture as reported by the canvas.
///
/// `origin` is the node the drag started from. Pointing libraries sometimes
/// report the endpoints by handle type instead of gesture direction, so the
/// store normalizes with [`Connection::oriented`] before using it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

impl Connection {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn with_handles(mut self, source_handle: Option<String>, target_handle: Option<String>) -> Self {
        self.source_handle = source_handle;
        self.target_handle = target_handle;
        self
    }

    pub fn dragged_from(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Returns the connection with the drag origin as logical source.
    pub fn oriented(mut self) -> Self {
        if self.origin.as_deref() == Some(self.target.as_str()) && self.source != self.target {
            std::mem::swap(&mut self.source, &mut self.target);
            std::mem::swap(&mut self.source_handle, &mut self.target_handle);
        }
        self
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}

/// Normalized `{nodes, edges}` view of a query result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Projection {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Projection {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Identities returned by an adapter for a freshly created node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedNode {
    /// Application id, becomes the canvas id of the node.
    pub id: String,
    /// Backend internal identity.
    pub element_id: String,
}

/// Synchronization phase of a canvas entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityPhase {
    /// Local only, never sent to the backend.
    Draft,
    /// Creation call in flight.
    Committing,
    /// In sync with the backend as far as the store knows.
    Persisted,
    /// One or more edits in flight.
    PendingWrite,
    /// Removed locally, delete call in flight.
    PendingDelete,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_oriented_by_drag_origin() {
        let c = Connection::new("a", "b")
            .with_handles(Some("right".into()), Some("left".into()))
            .dragged_from("b")
            .oriented();
        assert_eq!(c.source, "b");
        assert_eq!(c.target, "a");
        assert_eq!(c.source_handle.as_deref(), Some("left"));
        assert_eq!(c.target_handle.as_deref(), Some("right"));

        let c = Connection::new("a", "b").dragged_from("a").oriented();
        assert_eq!((c.source.as_str(), c.target.as_str()), ("a", "b"));
    }

    #[test]
    fn test_display_label_fallbacks() {
        let mut props = Properties::new();
        assert_eq!(display_label(&props, &["Person".into()], "7"), "Person");
        assert_eq!(display_label(&props, &[], "7"), "7");
        props.insert("title".into(), json!("Dr"));
        assert_eq!(display_label(&props, &[], "7"), "Dr");
        props.insert("name".into(), json!("Alice"));
        assert_eq!(display_label(&props, &[], "7"), "Alice");
    }

    #[test]
    fn test_node_serializes_camel_case() {
        let node = GraphNode::draft("draft-1", DRAFT_NODE_KIND, Position::new(1.0, 2.0));
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], json!("draft"));
        assert_eq!(value["data"]["draft"], json!(true));
        assert!(value["data"].get("elementId").is_none());
    }
}
