//! Adapter for the streaming HTTP backend
//!
//! The backend has no multi-statement transactions: every call is a single
//! statement whose result comes back as a server-sent event stream.
//! Relationship rewrites are therefore emulated as read, delete and create,
//! and a failure between delete and create is reported as
//! [`AdapterError::PartialFailure`].

mod sse;
mod wire;

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

pub use sse::{SseEvent, SseParser};

use self::wire::{column_count, column_string, project_rows, rows_from_events, LoginRequest, LoginResponse, QueryRequest};
use crate::{
    adapters::cypher::{
        classify_backend_message, ensure_label, literal, match_node_by_id, properties_literal,
        quote_key,
    },
    config::{BackendConfig, BackendKind, StreamingConfig},
    data::{
        identifiers::application_id, AdapterError, CreatedNode, Dashboard, DashboardSummary,
        NetworkFailure, Projection, Properties, Row, APP_ID_PROPERTY, DASHBOARD_LABEL,
        DISPLAY_PROPERTY,
    },
    traits::{AdapterResult, GraphAdapter},
};

/// Outcome of one authenticated request.
enum Attempt {
    Rows(Vec<Row>),
    Unauthorized,
}

/// Client for a graph backend reached over HTTP with streamed results
#[derive(Debug)]
pub struct StreamingAdapter {
    config: StreamingConfig,
    client: Client,
    token: Mutex<Option<String>>,
    connected: AtomicBool,
}

impl StreamingAdapter {
    /// Creates a new adapter with the provided configuration
    pub fn new(config: StreamingConfig) -> AdapterResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AdapterError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
            connected: AtomicBool::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.service_url.trim_end_matches('/'), path)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn ensure_connected(&self) -> AdapterResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AdapterError::NotConnected)
        }
    }

    /// Maps an HTTP error to an AdapterError
    fn map_http_error(&self, error: reqwest::Error, what: &str) -> AdapterError {
        if error.is_timeout() {
            return AdapterError::timeout(what, self.timeout());
        }
        let detail = error_chain(&error);
        if error.is_connect() || error.is_request() {
            AdapterError::Network(NetworkFailure::classify(&detail), detail)
        } else {
            AdapterError::QueryError(format!("HTTP error: {}", detail))
        }
    }

    /// Obtains a fresh token and stores it for later calls
    #[instrument(skip(self), fields(user = %self.config.username))]
    async fn login(&self) -> AdapterResult<String> {
        let request = LoginRequest {
            username: &self.config.username,
            password: &self.config.password,
        };
        let response = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_http_error(e, "login"))?;

        match response.status() {
            status if status.is_success() => {
                let body: LoginResponse = response
                    .json()
                    .await
                    .map_err(|e| AdapterError::MappingError(format!("Failed to parse login response: {}", e)))?;
                *self.token.lock() = Some(body.token.clone());
                debug!("Obtained session token");
                Ok(body.token)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(AdapterError::Authentication(if body.is_empty() {
                    "invalid credentials".to_string()
                } else {
                    body
                }))
            }
            status => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("HTTP error: {}", status));
                Err(AdapterError::Authentication(format!("Login failed ({}): {}", status, body)))
            }
        }
    }

    async fn session_token(&self) -> AdapterResult<String> {
        let cached = self.token.lock().clone();
        match cached {
            Some(token) => Ok(token),
            None => self.login().await,
        }
    }

    /// Sends one statement and collects the rows of its event stream.
    async fn send_query(&self, token: &str, cypher: &str) -> AdapterResult<Attempt> {
        let url = self.url(&format!("/api/graph/{}/query", self.config.graph));
        let mut response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&QueryRequest { query: cypher })
            .send()
            .await
            .map_err(|e| self.map_http_error(e, "streaming query"))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Ok(Attempt::Unauthorized),
            status if !status.is_success() => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("HTTP error: {}", status));
                return Err(classify_backend_message(&body));
            }
            _ => {}
        }

        let mut parser = SseParser::new();
        let mut events = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.map_http_error(e, "streaming query"))?
        {
            events.extend(parser.feed(&chunk));
        }
        events.extend(parser.finish());

        rows_from_events(events).map(Attempt::Rows)
    }

    /// Runs a statement, restoring the session once if the token was rejected.
    #[instrument(skip(self, cypher))]
    async fn run_cypher(&self, cypher: &str) -> AdapterResult<Vec<Row>> {
        self.ensure_connected()?;
        debug!("Running statement: {}", cypher);

        let token = self.session_token().await?;
        if let Attempt::Rows(rows) = self.send_query(&token, cypher).await? {
            return Ok(rows);
        }

        warn!("Session token rejected, logging in again");
        self.token.lock().take();
        let token = self.login().await?;
        match self.send_query(&token, cypher).await? {
            Attempt::Rows(rows) => Ok(rows),
            Attempt::Unauthorized => Err(AdapterError::Authentication(
                "token rejected after re-authentication".to_string(),
            )),
        }
    }

    async fn write_counted(&self, cypher: &str, missing: &str) -> AdapterResult<()> {
        let rows = self.run_cypher(cypher).await?;
        if column_count(&rows, "touched") == 0 {
            return Err(AdapterError::NotFound(missing.to_string()));
        }
        Ok(())
    }

    /// Read, delete and create as three separate statements.
    async fn rewrite_relationship(
        &self,
        id: &str,
        operation: &str,
        plan: impl FnOnce(RelationshipRecord) -> AdapterResult<RelationshipRecord>,
    ) -> AdapterResult<RelationshipRecord> {
        let id_literal = literal(&json!(id));
        let matcher = format!("(r.id = {id_literal} OR toString(id(r)) = {id_literal})");

        let rows = self
            .run_cypher(&format!(
                "MATCH (a)-[r]->(b) WHERE {matcher} \
                 RETURN type(r) AS type, properties(r) AS props, \
                        coalesce(a.id, toString(id(a))) AS source, \
                        coalesce(b.id, toString(id(b))) AS target"
            ))
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| AdapterError::NotFound(format!("relationship {}", id)))?;
        let current = RelationshipRecord {
            rel_type: column_string(row, "type")?,
            properties: match row.get("props") {
                Some(Value::Object(map)) => map.clone().into_iter().collect(),
                _ => Properties::new(),
            },
            source: column_string(row, "source")?,
            target: column_string(row, "target")?,
        };
        let next = plan(current)?;
        ensure_label(&next.rel_type)?;

        self.write_counted(
            &format!("MATCH ()-[r]->() WHERE {matcher} DELETE r RETURN count(*) AS touched"),
            &format!("relationship {}", id),
        )
        .await?;

        let create = format!(
            "MATCH (a) WHERE {} MATCH (b) WHERE {} \
             CREATE (a)-[r:{} {}]->(b) RETURN count(r) AS touched",
            match_node_by_id("a", &literal(&json!(next.source))),
            match_node_by_id("b", &literal(&json!(next.target))),
            next.rel_type,
            properties_literal(&next.properties)
        );
        let created = match self.run_cypher(&create).await {
            Ok(rows) if column_count(&rows, "touched") > 0 => Ok(()),
            Ok(_) => Err(AdapterError::NotFound(format!(
                "endpoints {} -> {}",
                next.source, next.target
            ))),
            Err(e) => Err(e),
        };

        match created {
            Ok(()) => Ok(next),
            Err(e) => {
                error!(
                    relationship_id = id,
                    operation,
                    "Relationship deleted but not recreated: {}",
                    e
                );
                Err(AdapterError::PartialFailure {
                    operation: operation.to_string(),
                    relationship_id: id.to_string(),
                    detail: e.to_string(),
                })
            }
        }
    }

    async fn dashboard_count(&self) -> AdapterResult<i64> {
        let rows = self
            .run_cypher(&format!("MATCH (d:{DASHBOARD_LABEL}) RETURN count(d) AS total"))
            .await?;
        Ok(column_count(&rows, "total"))
    }
}

/// A relationship as read back before a rewrite.
#[derive(Debug, Clone)]
struct RelationshipRecord {
    rel_type: String,
    properties: Properties,
    source: String,
    target: String,
}

/// Renders an error with all of its sources.
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

fn node_matcher(id: &str) -> String {
    match_node_by_id("n", &literal(&json!(id)))
}

fn parse_timestamp(value: Option<&Value>) -> Option<chrono::DateTime<chrono::Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

#[async_trait]
impl GraphAdapter for StreamingAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Streaming
    }

    fn identity(&self) -> String {
        BackendConfig::Streaming(self.config.clone()).identity()
    }

    #[instrument(skip(self), fields(url = %self.config.service_url))]
    async fn initialize(&self) -> AdapterResult<()> {
        self.login().await?;
        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to streaming backend at {}", self.config.service_url);
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), String> {
        let token = self
            .session_token()
            .await
            .map_err(|e| format!("{} ({})", e.kind().headline(), e))?;
        let response = self
            .client
            .get(self.url("/api/status"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                let e = self.map_http_error(e, "status check");
                format!("{} ({})", e.kind().headline(), e)
            })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("Status endpoint answered {}", response.status()))
        }
    }

    async fn check_connection(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.test_connection().await.is_ok()
    }

    async fn close(&self) -> AdapterResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.token.lock().take();
        info!("Closed session with {}", self.config.service_url);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn execute_projection(&self, cypher: &str) -> AdapterResult<Projection> {
        let rows = self.run_cypher(cypher).await?;
        Ok(project_rows(&rows))
    }

    #[instrument(skip(self, params))]
    async fn execute_query(&self, cypher: &str, params: Properties) -> AdapterResult<Vec<Row>> {
        if params.is_empty() {
            return self.run_cypher(cypher).await;
        }
        for key in params.keys() {
            ensure_label(key)?;
        }
        let prefix: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, literal(v)))
            .collect();
        self.run_cypher(&format!("CYPHER {} {}", prefix.join(" "), cypher))
            .await
    }

    #[instrument(skip(self, properties))]
    async fn create_node(&self, labels: &[String], mut properties: Properties) -> AdapterResult<CreatedNode> {
        for label in labels {
            ensure_label(label)?;
        }
        properties
            .entry(APP_ID_PROPERTY.to_string())
            .or_insert_with(|| Value::String(application_id()));

        let label_part: String = labels.iter().map(|l| format!(":{}", l)).collect();
        let rows = self
            .run_cypher(&format!(
                "CREATE (n{} {}) RETURN n.id AS id, toString(id(n)) AS elementId",
                label_part,
                properties_literal(&properties)
            ))
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| AdapterError::QueryError("CREATE returned no row".to_string()))?;
        Ok(CreatedNode {
            id: column_string(row, "id")?,
            element_id: column_string(row, "elementId")?,
        })
    }

    #[instrument(skip(self))]
    async fn rename_node(&self, id: &str, name: &str) -> AdapterResult<()> {
        self.write_counted(
            &format!(
                "MATCH (n) WHERE {} SET n.{} = {} RETURN count(n) AS touched",
                node_matcher(id),
                DISPLAY_PROPERTY,
                literal(&json!(name))
            ),
            &format!("node {}", id),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn delete_node(&self, id: &str) -> AdapterResult<()> {
        self.write_counted(
            &format!("MATCH (n) WHERE {} DETACH DELETE n RETURN count(*) AS touched", node_matcher(id)),
            &format!("node {}", id),
        )
        .await
    }

    #[instrument(skip(self, value))]
    async fn set_node_property(&self, id: &str, key: &str, value: Value) -> AdapterResult<()> {
        self.write_counted(
            &format!(
                "MATCH (n) WHERE {} SET n.{} = {} RETURN count(n) AS touched",
                node_matcher(id),
                quote_key(key),
                literal(&value)
            ),
            &format!("node {}", id),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn delete_node_property(&self, id: &str, key: &str) -> AdapterResult<()> {
        self.write_counted(
            &format!(
                "MATCH (n) WHERE {} REMOVE n.{} RETURN count(n) AS touched",
                node_matcher(id),
                quote_key(key)
            ),
            &format!("node {}", id),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn add_node_label(&self, id: &str, label: &str) -> AdapterResult<()> {
        ensure_label(label)?;
        self.write_counted(
            &format!("MATCH (n) WHERE {} SET n:{} RETURN count(n) AS touched", node_matcher(id), label),
            &format!("node {}", id),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn remove_node_label(&self, id: &str, label: &str) -> AdapterResult<()> {
        ensure_label(label)?;
        self.write_counted(
            &format!("MATCH (n) WHERE {} REMOVE n:{} RETURN count(n) AS touched", node_matcher(id), label),
            &format!("node {}", id),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn fetch_neighbors(&self, id: &str) -> AdapterResult<Projection> {
        let rows = self
            .run_cypher(&format!(
                "MATCH (n) WHERE {} OPTIONAL MATCH (n)-[r]-(m) RETURN n, r, m",
                node_matcher(id)
            ))
            .await?;
        Ok(project_rows(&rows))
    }

    #[instrument(skip(self, properties))]
    async fn create_relationship(
        &self,
        source: &str,
        target: &str,
        label: &str,
        mut properties: Properties,
    ) -> AdapterResult<String> {
        ensure_label(label)?;
        let id = match properties.get(APP_ID_PROPERTY).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = application_id();
                properties.insert(APP_ID_PROPERTY.to_string(), Value::String(id.clone()));
                id
            }
        };

        let rows = self
            .run_cypher(&format!(
                "MATCH (a) WHERE {} MATCH (b) WHERE {} \
                 CREATE (a)-[r:{} {}]->(b) RETURN count(r) AS touched",
                match_node_by_id("a", &literal(&json!(source))),
                match_node_by_id("b", &literal(&json!(target))),
                label,
                properties_literal(&properties)
            ))
            .await?;
        if column_count(&rows, "touched") == 0 {
            return Err(AdapterError::NotFound(format!("endpoints {} -> {}", source, target)));
        }
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn update_relationship_label(&self, id: &str, label: &str) -> AdapterResult<()> {
        ensure_label(label)?;
        let label = label.to_string();
        self.rewrite_relationship(id, "relabel", move |mut record| {
            record.rel_type = label;
            Ok(record)
        })
        .await
        .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn delete_relationship(&self, id: &str) -> AdapterResult<()> {
        let id_literal = literal(&json!(id));
        self.write_counted(
            &format!(
                "MATCH ()-[r]->() WHERE (r.id = {id_literal} OR toString(id(r)) = {id_literal}) \
                 DELETE r RETURN count(*) AS touched"
            ),
            &format!("relationship {}", id),
        )
        .await
    }

    #[instrument(skip(self, value))]
    async fn set_relationship_property(&self, id: &str, key: &str, value: Value) -> AdapterResult<()> {
        let id_literal = literal(&json!(id));
        self.write_counted(
            &format!(
                "MATCH ()-[r]->() WHERE (r.id = {id_literal} OR toString(id(r)) = {id_literal}) \
                 SET r.{} = {} RETURN count(r) AS touched",
                quote_key(key),
                literal(&value)
            ),
            &format!("relationship {}", id),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn delete_relationship_property(&self, id: &str, key: &str) -> AdapterResult<()> {
        let id_literal = literal(&json!(id));
        self.write_counted(
            &format!(
                "MATCH ()-[r]->() WHERE (r.id = {id_literal} OR toString(id(r)) = {id_literal}) \
                 REMOVE r.{} RETURN count(r) AS touched",
                quote_key(key)
            ),
            &format!("relationship {}", id),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn reverse_relationship(&self, id: &str) -> AdapterResult<(String, String)> {
        let record = self
            .rewrite_relationship(id, "reverse", |mut record| {
                std::mem::swap(&mut record.source, &mut record.target);
                Ok(record)
            })
            .await?;
        Ok((record.source, record.target))
    }

    #[instrument(skip(self))]
    async fn migrate_relationship(&self, id: &str, new_source: &str, new_target: &str) -> AdapterResult<()> {
        let (source, target) = (new_source.to_string(), new_target.to_string());
        self.rewrite_relationship(id, "migrate", move |mut record| {
            record.source = source;
            record.target = target;
            Ok(record)
        })
        .await
        .map(|_| ())
    }

    async fn list_dashboards(&self) -> AdapterResult<Vec<DashboardSummary>> {
        let rows = self
            .run_cypher(&format!(
                "MATCH (d:{DASHBOARD_LABEL}) \
                 RETURN d.id AS id, d.name AS name, coalesce(d.position, 0) AS position, \
                        d.updatedAt AS updatedAt \
                 ORDER BY position, name"
            ))
            .await?;
        rows.iter()
            .map(|row| {
                Ok(DashboardSummary {
                    id: column_string(row, "id")?,
                    name: column_string(row, "name")?,
                    position: row.get("position").and_then(Value::as_i64).unwrap_or(0),
                    updated_at: parse_timestamp(row.get("updatedAt")),
                })
            })
            .collect()
    }

    async fn get_dashboard(&self, id: &str) -> AdapterResult<Option<Dashboard>> {
        let rows = self
            .run_cypher(&format!(
                "MATCH (d:{DASHBOARD_LABEL} {{id: {}}}) \
                 RETURN d.id AS id, d.name AS name, d.query AS query, d.layout AS layout, \
                        d.createdAt AS createdAt, d.updatedAt AS updatedAt",
                literal(&json!(id))
            ))
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let layout = match row.get("layout").and_then(Value::as_str) {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| AdapterError::MappingError(format!("Invalid dashboard layout: {}", e)))?,
            None => Default::default(),
        };
        Ok(Some(Dashboard {
            id: Some(column_string(row, "id")?),
            name: column_string(row, "name")?,
            query: column_string(row, "query")?,
            layout,
            created_at: parse_timestamp(row.get("createdAt")),
            updated_at: parse_timestamp(row.get("updatedAt")),
        }))
    }

    #[instrument(skip(self, dashboard), fields(name = %dashboard.name))]
    async fn upsert_dashboard(&self, dashboard: Dashboard) -> AdapterResult<String> {
        let id = dashboard.id.clone().unwrap_or_else(application_id);
        let position = self.dashboard_count().await?;
        let layout = serde_json::to_string(&dashboard.layout)
            .map_err(|e| AdapterError::MappingError(format!("Failed to encode layout: {}", e)))?;
        let now = literal(&json!(chrono::Utc::now().to_rfc3339()));

        self.run_cypher(&format!(
            "MERGE (d:{DASHBOARD_LABEL} {{id: {}}}) \
             ON CREATE SET d.createdAt = {now}, d.position = {position} \
             SET d.name = {}, d.query = {}, d.layout = {}, d.updatedAt = {now}",
            literal(&json!(id)),
            literal(&json!(dashboard.name)),
            literal(&json!(dashboard.query)),
            literal(&json!(layout)),
        ))
        .await?;
        Ok(id)
    }

    async fn delete_dashboard(&self, id: &str) -> AdapterResult<()> {
        self.write_counted(
            &format!(
                "MATCH (d:{DASHBOARD_LABEL} {{id: {}}}) DETACH DELETE d RETURN count(*) AS touched",
                literal(&json!(id))
            ),
            &format!("dashboard {}", id),
        )
        .await
    }

    async fn rename_dashboard(&self, id: &str, name: &str) -> AdapterResult<()> {
        self.write_counted(
            &format!(
                "MATCH (d:{DASHBOARD_LABEL} {{id: {}}}) SET d.name = {}, d.updatedAt = {} \
                 RETURN count(d) AS touched",
                literal(&json!(id)),
                literal(&json!(name)),
                literal(&json!(chrono::Utc::now().to_rfc3339()))
            ),
            &format!("dashboard {}", id),
        )
        .await
    }

    async fn reorder_dashboards(&self, ordered_ids: &[String]) -> AdapterResult<()> {
        if ordered_ids.is_empty() {
            return Ok(());
        }
        self.run_cypher(&format!(
            "WITH {} AS ids UNWIND range(0, size(ids) - 1) AS i \
             MATCH (d:{DASHBOARD_LABEL} {{id: ids[i]}}) SET d.position = i",
            literal(&json!(ordered_ids))
        ))
        .await
        .map(|_| ())
    }
}
