//! Query-text helpers shared by both adapters

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::data::{
    identifiers::is_valid_label, AdapterError, GraphEdge, GraphNode, Projection, Properties,
    APP_ID_PROPERTY, DASHBOARD_LABEL,
};
use crate::traits::AdapterResult;

/// `WHERE` fragment matching a node by application id or internal id.
pub(crate) fn match_node_by_id(var: &str, param: &str) -> String {
    format!("({var}.id = {param} OR toString(id({var})) = {param})")
}

/// Rejects labels and relationship types that cannot be safely interpolated.
pub(crate) fn ensure_label(label: &str) -> AdapterResult<()> {
    if is_valid_label(label) {
        Ok(())
    } else {
        Err(AdapterError::InvalidInput(format!(
            "'{}' is not a valid label: only letters, digits and underscores are allowed",
            label
        )))
    }
}

/// Escapes a string for a single-quoted Cypher literal.
///
/// Backslashes go first so the escapes added afterwards are not doubled again.
pub(crate) fn escape_string(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// Backtick-quotes a property key.
pub(crate) fn quote_key(key: &str) -> String {
    format!("`{}`", key.replace('`', "``"))
}

/// Renders a JSON value as a Cypher literal.
pub(crate) fn literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", escape_string(s)),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Object(map) => {
            let rendered: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", quote_key(k), literal(v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
    }
}

/// Renders a property map as a Cypher map literal.
pub(crate) fn properties_literal(properties: &Properties) -> String {
    let rendered: Vec<String> = properties
        .iter()
        .map(|(k, v)| format!("{}: {}", quote_key(k), literal(v)))
        .collect();
    format!("{{{}}}", rendered.join(", "))
}

/// Maps a backend error message onto the adapter error taxonomy.
pub(crate) fn classify_backend_message(message: &str) -> AdapterError {
    let lower = message.to_lowercase();
    if lower.contains("constraintvalidationfailed")
        || lower.contains("already exists")
        || lower.contains("unique constraint")
        || lower.contains("uniqueness")
    {
        AdapterError::ConstraintViolation(message.to_string())
    } else if lower.contains("unauthorized")
        || lower.contains("authentication")
        || lower.contains("invalid credentials")
    {
        AdapterError::Authentication(message.to_string())
    } else {
        AdapterError::QueryError(message.to_string())
    }
}

/// Renders a property value as a plain string id.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A node exactly as the backend returned it.
#[derive(Debug, Clone)]
pub(crate) struct RawNode {
    pub internal_id: String,
    pub labels: Vec<String>,
    pub properties: Properties,
}

/// A relationship exactly as the backend returned it; endpoints are internal ids.
#[derive(Debug, Clone)]
pub(crate) struct RawRelationship {
    pub internal_id: String,
    pub rel_type: String,
    pub start: String,
    pub end: String,
    pub properties: Properties,
}

/// Collects raw entities from a result set into a de-duplicated projection.
///
/// Entities are keyed by resolved id: the `id` property when present, else the
/// internal id. Dashboard bookkeeping nodes and relationships touching them are
/// dropped.
#[derive(Debug, Default)]
pub(crate) struct ProjectionBuilder {
    nodes: IndexMap<String, GraphNode>,
    resolved: HashMap<String, String>,
    bookkeeping: HashSet<String>,
    relationships: IndexMap<String, RawRelationship>,
}

impl ProjectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, raw: RawNode) {
        if raw.labels.iter().any(|l| l == DASHBOARD_LABEL) {
            self.bookkeeping.insert(raw.internal_id);
            return;
        }
        let id = raw
            .properties
            .get(APP_ID_PROPERTY)
            .and_then(id_string)
            .unwrap_or_else(|| raw.internal_id.clone());
        self.resolved.insert(raw.internal_id.clone(), id.clone());
        if !self.nodes.contains_key(&id) {
            let node = GraphNode::persisted(id.clone(), Some(raw.internal_id), raw.labels, raw.properties);
            self.nodes.insert(id, node);
        }
    }

    pub fn add_relationship(&mut self, raw: RawRelationship) {
        let id = raw
            .properties
            .get(APP_ID_PROPERTY)
            .and_then(id_string)
            .unwrap_or_else(|| raw.internal_id.clone());
        self.relationships.entry(id).or_insert(raw);
    }

    pub fn finish(self) -> Projection {
        let ProjectionBuilder {
            nodes,
            resolved,
            bookkeeping,
            relationships,
        } = self;

        let edges: Vec<GraphEdge> = relationships
            .into_iter()
            .filter(|(_, rel)| !bookkeeping.contains(&rel.start) && !bookkeeping.contains(&rel.end))
            .map(|(id, rel)| {
                let source = resolved.get(&rel.start).cloned().unwrap_or(rel.start);
                let target = resolved.get(&rel.end).cloned().unwrap_or(rel.end);
                GraphEdge::persisted(id, source, target, rel.rel_type, rel.properties)
            })
            .collect();

        debug!("Projected {} nodes and {} edges", nodes.len(), edges.len());
        Projection {
            nodes: nodes.into_values().collect(),
            edges,
        }
    }
}
