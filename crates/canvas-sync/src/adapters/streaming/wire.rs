//! Request and response payloads of the streaming HTTP backend

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::sse::SseEvent;
use crate::adapters::cypher::{classify_backend_message, id_string, ProjectionBuilder, RawNode, RawRelationship};
use crate::data::{AdapterError, Projection, Properties, Row};
use crate::traits::AdapterResult;

pub(crate) const RESULT_EVENT: &str = "result";
pub(crate) const ERROR_EVENT: &str = "err";

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct QueryRequest<'a> {
    pub query: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResultPayload {
    #[serde(default)]
    data: Vec<Value>,
}

/// Collects the rows of every `result` event. The first `err` event fails the call.
pub(crate) fn rows_from_events(events: Vec<SseEvent>) -> AdapterResult<Vec<Row>> {
    let mut rows = Vec::new();
    for event in events {
        match event.event.as_str() {
            RESULT_EVENT => {
                let payload: ResultPayload = serde_json::from_str(&event.data).map_err(|e| {
                    AdapterError::MappingError(format!("Malformed result event: {}", e))
                })?;
                for row in payload.data {
                    match row {
                        Value::Object(map) => rows.push(map.into_iter().collect()),
                        other => {
                            return Err(AdapterError::MappingError(format!(
                                "Expected a row object, got {}",
                                other
                            )))
                        }
                    }
                }
            }
            ERROR_EVENT => return Err(classify_backend_message(event.data.trim())),
            _ => {}
        }
    }
    Ok(rows)
}

/// Walks every column of every row and projects nodes and relationships.
pub(crate) fn project_rows(rows: &[Row]) -> Projection {
    let mut builder = ProjectionBuilder::new();
    for row in rows {
        for value in row.values() {
            collect_entities(&mut builder, value);
        }
    }
    builder.finish()
}

fn collect_entities(builder: &mut ProjectionBuilder, value: &Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_entities(builder, item);
            }
        }
        Value::Object(map) => {
            let id = map.get("id").and_then(id_string);
            let properties: Properties = match map.get("properties") {
                Some(Value::Object(props)) => props.clone().into_iter().collect(),
                _ => Properties::new(),
            };

            if let (Some(id), Some(rel_type)) = (id.clone(), map.get("relationshipType")) {
                let (Some(start), Some(end)) = (
                    map.get("sourceId").and_then(id_string),
                    map.get("destinationId").and_then(id_string),
                ) else {
                    return;
                };
                builder.add_relationship(RawRelationship {
                    internal_id: id,
                    rel_type: rel_type.as_str().unwrap_or_default().to_string(),
                    start,
                    end,
                    properties,
                });
            } else if let (Some(id), Some(Value::Array(labels))) = (id, map.get("labels")) {
                builder.add_node(RawNode {
                    internal_id: id,
                    labels: labels.iter().filter_map(|l| l.as_str().map(str::to_string)).collect(),
                    properties,
                });
            }
        }
        _ => {}
    }
}

/// Reads a column as a string id.
pub(crate) fn column_string(row: &Row, key: &str) -> AdapterResult<String> {
    row.get(key)
        .and_then(id_string)
        .ok_or_else(|| AdapterError::MappingError(format!("Missing column '{}'", key)))
}

/// Reads a counter column, treating absence as zero.
pub(crate) fn column_count(rows: &[Row], key: &str) -> i64 {
    rows.first()
        .and_then(|row| row.get(key))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, data: &str) -> SseEvent {
        SseEvent {
            event: name.into(),
            data: data.into(),
        }
    }

    #[test]
    fn test_rows_concatenate_across_result_events() {
        let rows = rows_from_events(vec![
            event("result", r#"{"data":[{"n":1}]}"#),
            event("result", r#"{"data":[{"n":2}]}"#),
        ])
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["n"], json!(2));
    }

    #[test]
    fn test_err_event_is_classified() {
        let result = rows_from_events(vec![event("err", "Node already exists with label Person")]);
        assert!(matches!(result, Err(AdapterError::ConstraintViolation(_))));
    }

    #[test]
    fn test_project_rows_reads_nodes_and_relationships() {
        let row: Row = serde_json::from_value(json!({
            "n": {"id": 1, "labels": ["Person"], "properties": {"id": "alice", "name": "Alice"}},
            "r": {"id": 7, "relationshipType": "KNOWS", "sourceId": 1, "destinationId": 2,
                  "properties": {"id": "rel-1"}},
            "m": {"id": 2, "labels": ["Person"], "properties": {"name": "Bob"}}
        }))
        .unwrap();

        let projection = project_rows(&[row]);
        assert_eq!(projection.nodes.len(), 2);
        assert_eq!(projection.edges.len(), 1);
        let edge = &projection.edges[0];
        assert_eq!(edge.id, "rel-1");
        assert_eq!(edge.data.label, "KNOWS");
        assert_eq!((edge.source.as_str(), edge.target.as_str()), ("alice", "2"));
    }
}
