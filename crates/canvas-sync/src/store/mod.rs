//! The authoritative in-memory graph behind the canvas
//!
//! Every intent from the canvas lands on [`GraphStore`]. Mutations validate,
//! apply locally and return at once; the backend call runs on a spawned task
//! and either confirms or rolls back exactly the fields it touched. Observers
//! read [`GraphSnapshot`]s and listen for [`StoreEvent`]s.

mod dashboards;
mod deletion;
mod drafts;
mod edges;
mod edits;
mod protocol;
mod queries;
mod state;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

pub use deletion::DeleteMode;
pub use protocol::{Dispatch, Notification, PendingSync, SyncOutcome};
pub use queries::{MergeReport, QueryMode};

use self::state::StoreState;
use crate::{
    config::BackendConfig,
    data::{AdapterError, EntityPhase, FailureKind, GraphEdge, GraphNode, MutationRejected},
    registry::AdapterRegistry,
    traits::{AdapterResult, GraphAdapter, GridLayout, LayoutEngine},
};

const EVENT_CAPACITY: usize = 256;

/// Change notifications broadcast to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The graph changed; read a new snapshot.
    Changed { revision: u64 },
    /// A backend call failed and was rolled back.
    Notice(Notification),
}

/// Immutable view of the store at one revision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub revision: u64,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub connected: bool,
    pub in_flight: usize,
}

impl GraphSnapshot {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&GraphEdge> {
        self.edges.iter().find(|e| e.id == id)
    }
}

struct Inner {
    state: Mutex<StoreState>,
    registry: Arc<AdapterRegistry>,
    layout: Box<dyn LayoutEngine>,
    events: broadcast::Sender<StoreEvent>,
}

/// Cheaply cloneable handle on the graph state.
///
/// Mutation methods are synchronous and need a current tokio runtime, since
/// backend calls are spawned onto it.
#[derive(Clone)]
pub struct GraphStore {
    inner: Arc<Inner>,
}

impl GraphStore {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self::with_layout(registry, GridLayout::default())
    }

    pub fn with_layout(registry: Arc<AdapterRegistry>, layout: impl LayoutEngine + 'static) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let connected = registry.is_connected();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState::new(connected)),
                registry,
                layout: Box::new(layout),
                events,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.inner.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let state = self.inner.state.lock();
        GraphSnapshot {
            revision: state.revision,
            nodes: state.nodes.values().cloned().collect(),
            edges: state.edges.values().cloned().collect(),
            connected: state.connected,
            in_flight: state.in_flight(),
        }
    }

    pub fn node(&self, id: &str) -> Option<GraphNode> {
        self.inner.state.lock().nodes.get(id).cloned()
    }

    pub fn edge(&self, id: &str) -> Option<GraphEdge> {
        self.inner.state.lock().edges.get(id).cloned()
    }

    /// Synchronization phase of a node or edge, if the store knows it.
    pub fn phase(&self, id: &str) -> Option<EntityPhase> {
        self.inner.state.lock().phase(id)
    }

    /// Connects the registry to a backend and marks the store connected.
    pub async fn connect(&self, config: BackendConfig) -> AdapterResult<()> {
        match self.inner.registry.connect(config).await {
            Ok(adapter) => {
                info!("Store connected to {}", adapter.identity());
                self.set_connected(true);
                Ok(())
            }
            Err(e) => {
                self.set_connected(false);
                self.notify(Notification::from_error(None, "connect", &e));
                Err(e)
            }
        }
    }

    /// Installs a ready-made adapter, e.g. a test double.
    pub async fn connect_with(&self, adapter: Arc<dyn GraphAdapter>) -> AdapterResult<()> {
        let result = self.inner.registry.install(adapter).await;
        self.set_connected(result.is_ok());
        result
    }

    pub async fn disconnect(&self) {
        self.inner.registry.disconnect().await;
        self.set_connected(false);
    }

    fn set_connected(&self, connected: bool) {
        let revision = {
            let mut state = self.inner.state.lock();
            if state.connected == connected {
                return;
            }
            state.connected = connected;
            state.touch()
        };
        self.publish(revision);
    }

    pub(crate) fn publish(&self, revision: u64) {
        // No subscribers is fine.
        let _ = self.inner.events.send(StoreEvent::Changed { revision });
    }

    pub(crate) fn notify(&self, notification: Notification) {
        let _ = self.inner.events.send(StoreEvent::Notice(notification));
    }

    /// Fails fast when no adapter is live. Nothing has been changed yet when this runs.
    pub(crate) fn require_connection(&self, entity_id: &str, operation: &str) -> Result<(), MutationRejected> {
        if self.inner.registry.is_connected() {
            Ok(())
        } else {
            self.notify(Notification::not_connected(Some(entity_id), operation));
            Err(MutationRejected::NotConnected)
        }
    }

    /// Live adapter for request-style operations, reporting when there is none.
    pub(crate) async fn adapter_for(&self, operation: &str) -> AdapterResult<Arc<dyn GraphAdapter>> {
        match self.inner.registry.current().await {
            Some(adapter) => Ok(adapter),
            None => {
                self.notify(Notification::not_connected(None, operation));
                Err(AdapterError::NotConnected)
            }
        }
    }

    /// Reports a failed request-style operation and passes the error on.
    pub(crate) fn report<T>(&self, entity_id: Option<&str>, operation: &str, result: AdapterResult<T>) -> AdapterResult<T> {
        if let Err(e) = &result {
            if matches!(e.kind(), FailureKind::NotConnected | FailureKind::Network) {
                self.set_connected(false);
            }
            self.notify(Notification::from_error(entity_id, operation, e));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Position;
    use crate::test_utils::FakeAdapter;

    #[tokio::test]
    async fn test_snapshot_and_events() {
        let store = GraphStore::new(Arc::new(AdapterRegistry::new()));
        let mut events = store.subscribe();
        assert!(!store.snapshot().connected);

        store.connect_with(Arc::new(FakeAdapter::new())).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), StoreEvent::Changed { revision: 1 });

        let id = store.create_draft_node("draft", Position::new(1.0, 2.0));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.revision, 2);
        assert!(snapshot.connected);
        assert_eq!(snapshot.node(&id).unwrap().position, Position::new(1.0, 2.0));
        assert_eq!(store.phase(&id), Some(EntityPhase::Draft));
    }

    #[tokio::test]
    async fn test_mutation_without_adapter_is_rejected_with_notice() {
        let store = GraphStore::new(Arc::new(AdapterRegistry::new()));
        let id = store.create_draft_node("draft", Position::default());
        let mut events = store.subscribe();
        let before = store.snapshot();

        let result = store.commit_draft_node(&id, "Alice");
        assert_eq!(result.unwrap_err(), MutationRejected::NotConnected);
        assert_eq!(store.snapshot(), before);
        match events.recv().await.unwrap() {
            StoreEvent::Notice(n) => assert_eq!(n.kind, crate::data::FailureKind::NotConnected),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
