//! Saved dashboards: a query plus the canvas layout it was arranged into

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label of the bookkeeping nodes adapters store dashboards under.
/// Projections never surface nodes carrying it.
pub const DASHBOARD_LABEL: &str = "_CanvasDashboard";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeLayout {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeLayout {
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

/// Layout map keyed by entity id, overlaid onto a fresh projection on restore.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DashboardLayout {
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeLayout>,
    #[serde(default)]
    pub edges: BTreeMap<String, EdgeLayout>,
}

/// A dashboard as passed to `upsert_dashboard`. A `None` id creates a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub layout: DashboardLayout,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Dashboard {
    pub fn new(name: impl Into<String>, query: impl Into<String>, layout: DashboardLayout) -> Self {
        Self {
            id: None,
            name: name.into(),
            query: query.into(),
            layout,
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub id: String,
    pub name: String,
    pub position: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_layout_wire_shape() {
        let mut layout = DashboardLayout::default();
        layout.nodes.insert(
            "n1".into(),
            NodeLayout { x: 10.0, y: 20.0, w: Some(100.0), h: None, hidden: false },
        );
        layout.edges.insert(
            "e1".into(),
            EdgeLayout { source_handle: Some("top".into()), target_handle: None, hidden: true },
        );

        let value = serde_json::to_value(&layout).unwrap();
        assert_eq!(value["nodes"]["n1"], json!({"x": 10.0, "y": 20.0, "w": 100.0, "hidden": false}));
        assert_eq!(
            value["edges"]["e1"],
            json!({"sourceHandle": "top", "targetHandle": null, "hidden": true})
        );

        let back: DashboardLayout = serde_json::from_value(value).unwrap();
        assert_eq!(back, layout);
    }
}
