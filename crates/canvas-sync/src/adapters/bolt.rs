use async_trait::async_trait;
use std::{collections::HashMap, future::Future, sync::Arc};
use neo4rs::{
    query, BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType,
    ConfigBuilder, Graph, Query, Row as BoltRow, Txn,
};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    adapters::cypher::{
        classify_backend_message, ensure_label, match_node_by_id, quote_key, ProjectionBuilder,
        RawNode, RawRelationship,
    },
    config::{BackendConfig, BackendKind, BoltConfig},
    data::{
        identifiers::application_id, AdapterError, CreatedNode, Dashboard, DashboardSummary,
        NetworkFailure, Projection, Properties, Row, APP_ID_PROPERTY, DASHBOARD_LABEL,
        DISPLAY_PROPERTY,
    },
    traits::{AdapterResult, GraphAdapter},
};

const MATCH_RELATIONSHIP: &str = "(r.id = $id OR toString(id(r)) = $id)";

/// What a transactional rewrite does to a relationship.
#[derive(Debug, Clone, Copy)]
enum Rewrite<'a> {
    Relabel(&'a str),
    Reverse,
    Migrate { source: &'a str, target: &'a str },
}

impl Rewrite<'_> {
    fn operation(&self) -> &'static str {
        match self {
            Rewrite::Relabel(_) => "relabel",
            Rewrite::Reverse => "reverse",
            Rewrite::Migrate { .. } => "migrate",
        }
    }
}

/// Adapter for Bolt-speaking databases with real multi-statement transactions.
///
/// Relationship rewrites (relabel, reverse, migrate) run as read, delete and
/// recreate inside one transaction so they either fully apply or not at all.
pub struct BoltAdapter {
    config: BoltConfig,
    graph: RwLock<Option<Arc<Graph>>>,
}

impl BoltAdapter {
    pub fn new(config: BoltConfig) -> Self {
        Self {
            config,
            graph: RwLock::new(None),
        }
    }

    /// Returns the configuration used for this adapter
    pub fn get_config(&self) -> &BoltConfig {
        &self.config
    }

    fn graph(&self) -> AdapterResult<Arc<Graph>> {
        self.graph.read().clone().ok_or(AdapterError::NotConnected)
    }

    /// Connects with retries and probes the connection before accepting it
    async fn try_connect(config: &BoltConfig) -> AdapterResult<Graph> {
        let mut config_builder = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.username)
            .password(&config.password)
            .max_connections(config.pool_size);

        if let Some(db) = &config.database {
            config_builder = config_builder.db(db.as_str());
        }

        let neo4j_config = config_builder
            .build()
            .map_err(|e| AdapterError::InvalidInput(format!("Failed to build Bolt config: {}", e)))?;

        let mut last_error = None;
        for attempt in 1..=config.connection_retry_count.max(1) {
            let connect = tokio::time::timeout(config.connection_timeout, Graph::connect(neo4j_config.clone()));
            match connect.await {
                Ok(Ok(graph)) => {
                    info!("Connected to {} (attempt {})", config.uri, attempt);
                    match graph.run(query("RETURN 1 AS ok")).await {
                        Ok(()) => return Ok(graph),
                        Err(e) => {
                            error!("Connection test failed: {}", e);
                            last_error = Some(map_neo4j_error(e));
                        }
                    }
                }
                Ok(Err(e)) => {
                    error!("Failed to connect to {} (attempt {}): {}", config.uri, attempt, e);
                    last_error = Some(map_neo4j_error(e));
                }
                Err(_) => {
                    error!("Connecting to {} timed out (attempt {})", config.uri, attempt);
                    last_error = Some(AdapterError::timeout("Bolt connection", config.connection_timeout));
                }
            }

            // Bad credentials will not get better by retrying.
            if matches!(last_error, Some(AdapterError::Authentication(_))) {
                break;
            }
            if attempt < config.connection_retry_count {
                tokio::time::sleep(config.connection_retry_delay).await;
            }
        }

        Err(last_error.unwrap_or(AdapterError::NotConnected))
    }

    /// Bounds a backend call by the configured query timeout.
    async fn bounded<T, F>(&self, what: &str, fut: F) -> AdapterResult<T>
    where
        F: Future<Output = AdapterResult<T>>,
    {
        match tokio::time::timeout(self.config.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::timeout(what, self.config.query_timeout)),
        }
    }

    async fn fetch_rows(&self, q: Query) -> AdapterResult<Vec<BoltRow>> {
        let graph = self.graph()?;
        self.bounded("query", async move {
            let mut stream = graph.execute(q).await.map_err(map_neo4j_error)?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next().await.map_err(map_neo4j_error)? {
                rows.push(row);
            }
            Ok(rows)
        })
        .await
    }

    async fn run(&self, q: Query) -> AdapterResult<()> {
        let graph = self.graph()?;
        self.bounded("query", async move { graph.run(q).await.map_err(map_neo4j_error) })
            .await
    }

    /// Runs a write that reports how many entities it touched and fails with
    /// `NotFound` when it touched none.
    async fn write_counted(&self, q: Query, missing: &str) -> AdapterResult<()> {
        let rows = self.fetch_rows(q).await?;
        let touched = rows
            .first()
            .and_then(|row| row.get::<i64>("touched").ok())
            .unwrap_or(0);
        if touched == 0 {
            return Err(AdapterError::NotFound(missing.to_string()));
        }
        Ok(())
    }

    async fn project(&self, q: Query) -> AdapterResult<Projection> {
        let rows = self.fetch_rows(q).await?;
        let mut builder = ProjectionBuilder::new();
        for row in rows {
            let columns: HashMap<String, BoltType> = row
                .to()
                .map_err(|e| AdapterError::MappingError(format!("Failed to decode row: {}", e)))?;
            for value in columns.into_values() {
                collect_entities(&mut builder, value);
            }
        }
        Ok(builder.finish())
    }

    /// Read, delete and recreate a relationship inside one transaction.
    async fn rewrite_relationship(&self, id: &str, rewrite: Rewrite<'_>) -> AdapterResult<(String, String)> {
        let graph = self.graph()?;
        self.bounded(rewrite.operation(), async move {
            let mut txn = graph.start_txn().await.map_err(map_neo4j_error)?;
            match Self::rewrite_in(&mut txn, id, rewrite).await {
                Ok(endpoints) => {
                    txn.commit()
                        .await
                        .map_err(|e| AdapterError::TransactionError(e.to_string()))?;
                    Ok(endpoints)
                }
                Err(e) => {
                    if let Err(rollback_error) = txn.rollback().await {
                        warn!("Rollback of {} for {} failed: {}", rewrite.operation(), id, rollback_error);
                    }
                    Err(e)
                }
            }
        })
        .await
    }

    async fn rewrite_in(txn: &mut Txn, id: &str, rewrite: Rewrite<'_>) -> AdapterResult<(String, String)> {
        let read = query(&format!(
            "MATCH (a)-[r]->(b) WHERE {MATCH_RELATIONSHIP} \
             RETURN type(r) AS type, \
                    coalesce(a.id, toString(id(a))) AS source, \
                    coalesce(b.id, toString(id(b))) AS target"
        ))
        .param("id", id);
        let rows = txn_rows(txn, read).await?;
        let row = rows
            .first()
            .ok_or_else(|| AdapterError::NotFound(format!("relationship {}", id)))?;
        let current_type: String = row.get("type").map_err(mapping_error)?;
        let source: String = row.get("source").map_err(mapping_error)?;
        let target: String = row.get("target").map_err(mapping_error)?;

        let (rel_type, pattern, endpoints) = match rewrite {
            Rewrite::Relabel(label) => {
                ensure_label(label)?;
                (label.to_string(), "(a)-[n:{TYPE}]->(b)", (source, target))
            }
            Rewrite::Reverse => {
                ensure_label(&current_type)?;
                (current_type, "(b)-[n:{TYPE}]->(a)", (target, source))
            }
            Rewrite::Migrate { source, target } => {
                ensure_label(&current_type)?;
                (current_type, "(s)-[n:{TYPE}]->(t)", (source.to_string(), target.to_string()))
            }
        };
        let create = pattern.replace("{TYPE}", &rel_type);

        let mut write = match rewrite {
            Rewrite::Migrate { .. } => query(&format!(
                "MATCH (a)-[r]->(b) WHERE {MATCH_RELATIONSHIP} \
                 MATCH (s) WHERE {} \
                 MATCH (t) WHERE {} \
                 WITH a, b, r, s, t, properties(r) AS props \
                 DELETE r \
                 CREATE {create} SET n = props \
                 RETURN count(n) AS touched",
                match_node_by_id("s", "$source"),
                match_node_by_id("t", "$target"),
            )),
            _ => query(&format!(
                "MATCH (a)-[r]->(b) WHERE {MATCH_RELATIONSHIP} \
                 WITH a, b, r, properties(r) AS props \
                 DELETE r \
                 CREATE {create} SET n = props \
                 RETURN count(n) AS touched"
            )),
        }
        .param("id", id);
        if let Rewrite::Migrate { source, target } = rewrite {
            write = write.param("source", source).param("target", target);
        }

        let rows = txn_rows(txn, write).await?;
        let touched = rows
            .first()
            .and_then(|row| row.get::<i64>("touched").ok())
            .unwrap_or(0);
        if touched == 0 {
            return Err(AdapterError::NotFound(format!(
                "endpoints for {} of relationship {}",
                rewrite.operation(),
                id
            )));
        }

        debug!("{} of relationship {} committed as {}", rewrite.operation(), id, rel_type);
        Ok(endpoints)
    }

    async fn dashboard_count(&self) -> AdapterResult<i64> {
        let rows = self
            .fetch_rows(query(&format!("MATCH (d:{DASHBOARD_LABEL}) RETURN count(d) AS total")))
            .await?;
        Ok(rows.first().and_then(|r| r.get::<i64>("total").ok()).unwrap_or(0))
    }
}

impl From<&BoltAdapter> for BackendConfig {
    fn from(adapter: &BoltAdapter) -> Self {
        BackendConfig::Bolt(adapter.config.clone())
    }
}

#[async_trait]
impl GraphAdapter for BoltAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Transactional
    }

    fn identity(&self) -> String {
        BackendConfig::from(self).identity()
    }

    #[instrument(skip(self), fields(uri = %self.config.uri))]
    async fn initialize(&self) -> AdapterResult<()> {
        if self.graph.read().is_some() {
            return Ok(());
        }
        let graph = Self::try_connect(&self.config).await?;
        *self.graph.write() = Some(Arc::new(graph));
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), String> {
        self.run(query("RETURN 1 AS ok"))
            .await
            .map_err(|e| format!("{} ({})", e.kind().headline(), e))
    }

    async fn check_connection(&self) -> bool {
        self.test_connection().await.is_ok()
    }

    async fn close(&self) -> AdapterResult<()> {
        if self.graph.write().take().is_some() {
            info!("Closed connection to {}", self.config.uri);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn execute_projection(&self, cypher: &str) -> AdapterResult<Projection> {
        self.project(query(cypher)).await
    }

    #[instrument(skip(self, params))]
    async fn execute_query(&self, cypher: &str, params: Properties) -> AdapterResult<Vec<Row>> {
        let mut q = query(cypher);
        for (key, value) in params {
            q = q.param(&key, json_to_bolt(&value));
        }

        let rows = self.fetch_rows(q).await?;
        rows.into_iter()
            .map(|row| {
                let columns: HashMap<String, BoltType> = row
                    .to()
                    .map_err(|e| AdapterError::MappingError(format!("Failed to decode row: {}", e)))?;
                Ok(columns.into_iter().map(|(k, v)| (k, bolt_to_json(&v))).collect())
            })
            .collect()
    }

    #[instrument(skip(self, properties))]
    async fn create_node(&self, labels: &[String], mut properties: Properties) -> AdapterResult<CreatedNode> {
        for label in labels {
            ensure_label(label)?;
        }
        properties
            .entry(APP_ID_PROPERTY.to_string())
            .or_insert_with(|| Value::String(application_id()));

        let q = query(&create_node_cypher(labels)).param("props", properties_to_bolt(&properties));
        let rows = self.fetch_rows(q).await?;
        let row = rows
            .first()
            .ok_or_else(|| AdapterError::QueryError("CREATE returned no row".to_string()))?;
        Ok(CreatedNode {
            id: row.get("id").map_err(mapping_error)?,
            element_id: row.get("elementId").map_err(mapping_error)?,
        })
    }

    #[instrument(skip(self))]
    async fn rename_node(&self, id: &str, name: &str) -> AdapterResult<()> {
        let q = query(&format!(
            "MATCH (n) WHERE {} SET n.{} = $name RETURN count(n) AS touched",
            match_node_by_id("n", "$id"),
            DISPLAY_PROPERTY
        ))
        .param("id", id)
        .param("name", name);
        self.write_counted(q, &format!("node {}", id)).await
    }

    #[instrument(skip(self))]
    async fn delete_node(&self, id: &str) -> AdapterResult<()> {
        let q = query(&format!(
            "MATCH (n) WHERE {} DETACH DELETE n RETURN count(*) AS touched",
            match_node_by_id("n", "$id")
        ))
        .param("id", id);
        self.write_counted(q, &format!("node {}", id)).await
    }

    #[instrument(skip(self, value))]
    async fn set_node_property(&self, id: &str, key: &str, value: Value) -> AdapterResult<()> {
        let q = query(&format!(
            "MATCH (n) WHERE {} SET n.{} = $value RETURN count(n) AS touched",
            match_node_by_id("n", "$id"),
            quote_key(key)
        ))
        .param("id", id)
        .param("value", json_to_bolt(&value));
        self.write_counted(q, &format!("node {}", id)).await
    }

    #[instrument(skip(self))]
    async fn delete_node_property(&self, id: &str, key: &str) -> AdapterResult<()> {
        let q = query(&format!(
            "MATCH (n) WHERE {} REMOVE n.{} RETURN count(n) AS touched",
            match_node_by_id("n", "$id"),
            quote_key(key)
        ))
        .param("id", id);
        self.write_counted(q, &format!("node {}", id)).await
    }

    #[instrument(skip(self))]
    async fn add_node_label(&self, id: &str, label: &str) -> AdapterResult<()> {
        ensure_label(label)?;
        let q = query(&format!(
            "MATCH (n) WHERE {} SET n:{} RETURN count(n) AS touched",
            match_node_by_id("n", "$id"),
            label
        ))
        .param("id", id);
        self.write_counted(q, &format!("node {}", id)).await
    }

    #[instrument(skip(self))]
    async fn remove_node_label(&self, id: &str, label: &str) -> AdapterResult<()> {
        ensure_label(label)?;
        let q = query(&format!(
            "MATCH (n) WHERE {} REMOVE n:{} RETURN count(n) AS touched",
            match_node_by_id("n", "$id"),
            label
        ))
        .param("id", id);
        self.write_counted(q, &format!("node {}", id)).await
    }

    #[instrument(skip(self))]
    async fn fetch_neighbors(&self, id: &str) -> AdapterResult<Projection> {
        let q = query(&format!(
            "MATCH (n) WHERE {} OPTIONAL MATCH (n)-[r]-(m) RETURN n, r, m",
            match_node_by_id("n", "$id")
        ))
        .param("id", id);
        self.project(q).await
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
        properties
            .entry(APP_ID_PROPERTY.to_string())
            .or_insert_with(|| Value::String(application_id()));

        let q = query(&format!(
            "MATCH (a) WHERE {} MATCH (b) WHERE {} \
             CREATE (a)-[r:{}]->(b) SET r = $props \
             RETURN coalesce(r.id, toString(id(r))) AS id",
            match_node_by_id("a", "$source"),
            match_node_by_id("b", "$target"),
            label
        ))
        .param("source", source)
        .param("target", target)
        .param("props", properties_to_bolt(&properties));

        let rows = self.fetch_rows(q).await?;
        let row = rows
            .first()
            .ok_or_else(|| AdapterError::NotFound(format!("endpoints {} -> {}", source, target)))?;
        row.get("id").map_err(mapping_error)
    }

    #[instrument(skip(self))]
    async fn update_relationship_label(&self, id: &str, label: &str) -> AdapterResult<()> {
        ensure_label(label)?;
        self.rewrite_relationship(id, Rewrite::Relabel(label)).await.map(|_| ())
    }

    #[instrument(skip(self))]
    async fn delete_relationship(&self, id: &str) -> AdapterResult<()> {
        let q = query(&format!(
            "MATCH ()-[r]->() WHERE {MATCH_RELATIONSHIP} DELETE r RETURN count(*) AS touched"
        ))
        .param("id", id);
        self.write_counted(q, &format!("relationship {}", id)).await
    }

    #[instrument(skip(self, value))]
    async fn set_relationship_property(&self, id: &str, key: &str, value: Value) -> AdapterResult<()> {
        let q = query(&format!(
            "MATCH ()-[r]->() WHERE {MATCH_RELATIONSHIP} SET r.{} = $value RETURN count(r) AS touched",
            quote_key(key)
        ))
        .param("id", id)
        .param("value", json_to_bolt(&value));
        self.write_counted(q, &format!("relationship {}", id)).await
    }

    #[instrument(skip(self))]
    async fn delete_relationship_property(&self, id: &str, key: &str) -> AdapterResult<()> {
        let q = query(&format!(
            "MATCH ()-[r]->() WHERE {MATCH_RELATIONSHIP} REMOVE r.{} RETURN count(r) AS touched",
            quote_key(key)
        ))
        .param("id", id);
        self.write_counted(q, &format!("relationship {}", id)).await
    }

    #[instrument(skip(self))]
    async fn reverse_relationship(&self, id: &str) -> AdapterResult<(String, String)> {
        self.rewrite_relationship(id, Rewrite::Reverse).await
    }

    #[instrument(skip(self))]
    async fn migrate_relationship(&self, id: &str, new_source: &str, new_target: &str) -> AdapterResult<()> {
        self.rewrite_relationship(
            id,
            Rewrite::Migrate {
                source: new_source,
                target: new_target,
            },
        )
        .await
        .map(|_| ())
    }

    async fn list_dashboards(&self) -> AdapterResult<Vec<DashboardSummary>> {
        let rows = self
            .fetch_rows(query(&format!(
                "MATCH (d:{DASHBOARD_LABEL}) \
                 RETURN d.id AS id, d.name AS name, coalesce(d.position, 0) AS position, \
                        d.updatedAt AS updatedAt \
                 ORDER BY position, name"
            )))
            .await?;

        rows.iter()
            .map(|row| {
                Ok(DashboardSummary {
                    id: row.get("id").map_err(mapping_error)?,
                    name: row.get("name").map_err(mapping_error)?,
                    position: row.get("position").map_err(mapping_error)?,
                    updated_at: row.get::<String>("updatedAt").ok().and_then(|s| parse_timestamp(&s)),
                })
            })
            .collect()
    }

    async fn get_dashboard(&self, id: &str) -> AdapterResult<Option<Dashboard>> {
        let q = query(&format!(
            "MATCH (d:{DASHBOARD_LABEL} {{id: $id}}) \
             RETURN d.id AS id, d.name AS name, d.query AS query, d.layout AS layout, \
                    d.createdAt AS createdAt, d.updatedAt AS updatedAt"
        ))
        .param("id", id);
        let rows = self.fetch_rows(q).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let layout = match row.get::<String>("layout") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| AdapterError::MappingError(format!("Invalid dashboard layout: {}", e)))?,
            Err(_) => Default::default(),
        };
        Ok(Some(Dashboard {
            id: Some(row.get("id").map_err(mapping_error)?),
            name: row.get("name").map_err(mapping_error)?,
            query: row.get("query").map_err(mapping_error)?,
            layout,
            created_at: row.get::<String>("createdAt").ok().and_then(|s| parse_timestamp(&s)),
            updated_at: row.get::<String>("updatedAt").ok().and_then(|s| parse_timestamp(&s)),
        }))
    }

    #[instrument(skip(self, dashboard), fields(name = %dashboard.name))]
    async fn upsert_dashboard(&self, dashboard: Dashboard) -> AdapterResult<String> {
        let id = dashboard.id.clone().unwrap_or_else(application_id);
        let position = self.dashboard_count().await?;
        let layout = serde_json::to_string(&dashboard.layout)
            .map_err(|e| AdapterError::MappingError(format!("Failed to encode layout: {}", e)))?;
        let now = chrono::Utc::now().to_rfc3339();

        let q = query(&format!(
            "MERGE (d:{DASHBOARD_LABEL} {{id: $id}}) \
             ON CREATE SET d.createdAt = $now, d.position = $position \
             SET d.name = $name, d.query = $query, d.layout = $layout, d.updatedAt = $now"
        ))
        .param("id", id.as_str())
        .param("now", now.as_str())
        .param("position", position)
        .param("name", dashboard.name.as_str())
        .param("query", dashboard.query.as_str())
        .param("layout", layout.as_str());
        self.run(q).await?;
        Ok(id)
    }

    async fn delete_dashboard(&self, id: &str) -> AdapterResult<()> {
        let q = query(&format!(
            "MATCH (d:{DASHBOARD_LABEL} {{id: $id}}) DETACH DELETE d RETURN count(*) AS touched"
        ))
        .param("id", id);
        self.write_counted(q, &format!("dashboard {}", id)).await
    }

    async fn rename_dashboard(&self, id: &str, name: &str) -> AdapterResult<()> {
        let q = query(&format!(
            "MATCH (d:{DASHBOARD_LABEL} {{id: $id}}) SET d.name = $name, d.updatedAt = $now \
             RETURN count(d) AS touched"
        ))
        .param("id", id)
        .param("name", name)
        .param("now", chrono::Utc::now().to_rfc3339().as_str());
        self.write_counted(q, &format!("dashboard {}", id)).await
    }

    async fn reorder_dashboards(&self, ordered_ids: &[String]) -> AdapterResult<()> {
        if ordered_ids.is_empty() {
            return Ok(());
        }
        let q = query(&format!(
            "UNWIND range(0, size($ids) - 1) AS i \
             MATCH (d:{DASHBOARD_LABEL} {{id: $ids[i]}}) SET d.position = i"
        ))
        .param("ids", ordered_ids.to_vec());
        self.run(q).await
    }
}

fn create_node_cypher(labels: &[String]) -> String {
    let label_part: String = labels.iter().map(|l| format!(":{}", l)).collect();
    format!(
        "CREATE (n{}) SET n = $props RETURN n.id AS id, toString(id(n)) AS elementId",
        label_part
    )
}

async fn txn_rows(txn: &mut Txn, q: Query) -> AdapterResult<Vec<BoltRow>> {
    let mut stream = txn.execute(q).await.map_err(map_neo4j_error)?;
    let mut rows = Vec::new();
    while let Some(row) = stream.next(txn.handle()).await.map_err(map_neo4j_error)? {
        rows.push(row);
    }
    Ok(rows)
}

fn mapping_error(e: impl std::fmt::Display) -> AdapterError {
    AdapterError::MappingError(e.to_string())
}

fn parse_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Maps a driver error onto the adapter taxonomy by its message.
fn map_neo4j_error(e: neo4rs::Error) -> AdapterError {
    classify_driver_message(&e.to_string())
}

fn classify_driver_message(message: &str) -> AdapterError {
    let lower = message.to_lowercase();
    if lower.contains("unauthorized") || lower.contains("authentication") {
        AdapterError::Authentication(message.to_string())
    } else if lower.contains("io error")
        || lower.contains("connection")
        || lower.contains("dns")
        || lower.contains("certificate")
        || lower.contains("tls")
    {
        AdapterError::Network(NetworkFailure::classify(message), message.to_string())
    } else {
        classify_backend_message(message)
    }
}

/// Feeds every node and relationship reachable in a result value to the builder.
fn collect_entities(builder: &mut ProjectionBuilder, value: BoltType) {
    match value {
        BoltType::Node(node) => builder.add_node(RawNode {
            internal_id: node.id.value.to_string(),
            labels: bolt_labels(&node.labels),
            properties: bolt_properties(&node.properties),
        }),
        BoltType::Relation(rel) => builder.add_relationship(RawRelationship {
            internal_id: rel.id.value.to_string(),
            rel_type: rel.typ.value.clone(),
            start: rel.start_node_id.value.to_string(),
            end: rel.end_node_id.value.to_string(),
            properties: bolt_properties(&rel.properties),
        }),
        BoltType::Path(path) => {
            let nodes: Vec<(String, BoltType)> = path
                .nodes
                .value
                .iter()
                .map(|n| match n {
                    BoltType::Node(node) => (node.id.value.to_string(), n.clone()),
                    other => (String::new(), other.clone()),
                })
                .collect();
            let rels = &path.rels.value;
            let indices: Vec<i64> = path
                .indices
                .value
                .iter()
                .filter_map(|i| match i {
                    BoltType::Integer(int) => Some(int.value),
                    _ => None,
                })
                .collect();

            // Indices alternate (relationship, node); the sign of the
            // relationship index gives its direction along the path.
            let mut previous = 0usize;
            for pair in indices.chunks(2) {
                let [rel_index, node_index] = pair else { break };
                let next = *node_index as usize;
                let slot = (rel_index.unsigned_abs() as usize).checked_sub(1);
                let Some(BoltType::UnboundedRelation(rel)) = slot.and_then(|s| rels.get(s)) else {
                    break;
                };
                let (Some((prev_id, _)), Some((next_id, _))) = (nodes.get(previous), nodes.get(next)) else {
                    break;
                };
                let (start, end) = if *rel_index > 0 {
                    (prev_id.clone(), next_id.clone())
                } else {
                    (next_id.clone(), prev_id.clone())
                };
                builder.add_relationship(RawRelationship {
                    internal_id: rel.id.value.to_string(),
                    rel_type: rel.typ.value.clone(),
                    start,
                    end,
                    properties: bolt_properties(&rel.properties),
                });
                previous = next;
            }
            for (_, node) in nodes {
                collect_entities(builder, node);
            }
        }
        BoltType::List(list) => {
            for item in list.value {
                collect_entities(builder, item);
            }
        }
        _ => {}
    }
}

fn bolt_labels(labels: &BoltList) -> Vec<String> {
    labels
        .value
        .iter()
        .filter_map(|l| match l {
            BoltType::String(s) => Some(s.value.clone()),
            _ => None,
        })
        .collect()
}

fn bolt_properties(map: &BoltMap) -> Properties {
    map.value
        .iter()
        .map(|(k, v)| (k.value.clone(), bolt_to_json(v)))
        .collect()
}

/// Converts a driver value to JSON. Graph entities become `{id, labels, properties}` objects.
fn bolt_to_json(value: &BoltType) -> Value {
    match value {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(b) => Value::Bool(b.value),
        BoltType::Integer(i) => Value::from(i.value),
        BoltType::Float(f) => serde_json::Number::from_f64(f.value)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        BoltType::String(s) => Value::String(s.value.clone()),
        BoltType::List(list) => Value::Array(list.value.iter().map(bolt_to_json).collect()),
        BoltType::Map(map) => Value::Object(
            map.value
                .iter()
                .map(|(k, v)| (k.value.clone(), bolt_to_json(v)))
                .collect(),
        ),
        BoltType::Node(node) => {
            let mut object = Map::new();
            object.insert("id".into(), Value::String(node.id.value.to_string()));
            object.insert(
                "labels".into(),
                Value::Array(bolt_labels(&node.labels).into_iter().map(Value::String).collect()),
            );
            object.insert(
                "properties".into(),
                Value::Object(bolt_properties(&node.properties).into_iter().collect()),
            );
            Value::Object(object)
        }
        BoltType::Relation(rel) => {
            let mut object = Map::new();
            object.insert("id".into(), Value::String(rel.id.value.to_string()));
            object.insert("type".into(), Value::String(rel.typ.value.clone()));
            object.insert("start".into(), Value::String(rel.start_node_id.value.to_string()));
            object.insert("end".into(), Value::String(rel.end_node_id.value.to_string()));
            object.insert(
                "properties".into(),
                Value::Object(bolt_properties(&rel.properties).into_iter().collect()),
            );
            Value::Object(object)
        }
        other => Value::String(format!("{:?}", other)),
    }
}

/// Converts a JSON value to a driver parameter.
fn json_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::Integer(BoltInteger::new(i)),
            None => BoltType::Float(BoltFloat::new(n.as_f64().unwrap_or_default())),
        },
        Value::String(s) => BoltType::String(BoltString::new(s)),
        Value::Array(items) => BoltType::List(BoltList::from(items.iter().map(json_to_bolt).collect::<Vec<_>>())),
        Value::Object(map) => {
            let mut bolt = BoltMap::new();
            for (k, v) in map {
                bolt.put(BoltString::new(k), json_to_bolt(v));
            }
            BoltType::Map(bolt)
        }
    }
}

fn properties_to_bolt(properties: &Properties) -> BoltType {
    let mut bolt = BoltMap::new();
    for (k, v) in properties {
        bolt.put(BoltString::new(k), json_to_bolt(v));
    }
    BoltType::Map(bolt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_bolt_conversion_preserves_values() {
        let value = json!({"name": "Alice", "age": 42, "score": 1.5, "tags": ["a", "b"], "none": null});
        assert_eq!(bolt_to_json(&json_to_bolt(&value)), value);
    }

    #[test]
    fn test_create_node_cypher_puts_labels_inline() {
        assert_eq!(
            create_node_cypher(&["Person".into(), "Employee".into()]),
            "CREATE (n:Person:Employee) SET n = $props RETURN n.id AS id, toString(id(n)) AS elementId"
        );
        assert!(create_node_cypher(&[]).starts_with("CREATE (n) SET"));
    }

    #[test]
    fn test_driver_error_classification() {
        assert!(matches!(
            classify_driver_message("Neo.ClientError.Security.Unauthorized: authentication failure"),
            AdapterError::Authentication(_)
        ));
        assert!(matches!(
            classify_driver_message("IO Error: Connection refused (os error 111)"),
            AdapterError::Network(NetworkFailure::Unreachable, _)
        ));
        assert!(matches!(
            classify_driver_message("Neo.ClientError.Schema.ConstraintValidationFailed: already exists"),
            AdapterError::ConstraintViolation(_)
        ));
    }

    #[tokio::test]
    async fn test_calls_before_initialize_are_not_connected() {
        let adapter = BoltAdapter::new(BoltConfig::default());
        assert_eq!(adapter.kind(), BackendKind::Transactional);
        assert_eq!(adapter.delete_node("x").await, Err(AdapterError::NotConnected));
        assert!(!adapter.check_connection().await);
    }

    #[tokio::test]
    async fn test_invalid_label_rejected_before_connection_is_needed() {
        let adapter = BoltAdapter::new(BoltConfig::default());
        let result = adapter
            .create_relationship("a", "b", "KNOWS-WELL", Properties::new())
            .await;
        assert!(matches!(result, Err(AdapterError::InvalidInput(_))));
    }
}
