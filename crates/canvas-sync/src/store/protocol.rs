//! Apply, persist, then confirm or roll back.
//!
//! A mutation snapshots the fields it touches, applies them under the store
//! lock and hands the backend call to [`GraphStore::launch`]. The spawned task
//! settles exactly once: the success branch and the failure branch both clear
//! the in-flight bookkeeping before anything else runs.

use std::{future::Future, sync::Arc};

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{state::OwningCall, GraphStore, StoreState};
use crate::data::{AdapterError, FailureKind};
use crate::traits::{AdapterResult, GraphAdapter};

/// User-facing report of a backend call that did not go through.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub entity_id: Option<String>,
    pub operation: String,
    pub kind: FailureKind,
    pub message: String,
}

impl Notification {
    pub(crate) fn from_error(entity_id: Option<&str>, operation: &str, error: &AdapterError) -> Self {
        let kind = error.kind();
        Self {
            entity_id: entity_id.map(str::to_string),
            operation: operation.to_string(),
            kind,
            message: format!("{}: {}", kind.headline(), error),
        }
    }

    pub(crate) fn not_connected(entity_id: Option<&str>, operation: &str) -> Self {
        Self::from_error(entity_id, operation, &AdapterError::NotConnected)
    }

    pub fn headline(&self) -> &'static str {
        self.kind.headline()
    }
}

/// How a dispatched backend call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Confirmed,
    RolledBack(Notification),
}

impl SyncOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, SyncOutcome::Confirmed)
    }
}

/// Handle on a backend call running in the background.
#[derive(Debug)]
pub struct PendingSync {
    receiver: oneshot::Receiver<SyncOutcome>,
}

impl PendingSync {
    pub async fn settled(self) -> SyncOutcome {
        self.receiver.await.unwrap_or_else(|_| {
            SyncOutcome::RolledBack(Notification::from_error(
                None,
                "sync",
                &AdapterError::QueryError("sync task ended without reporting".to_string()),
            ))
        })
    }
}

/// What a mutation did right away.
#[derive(Debug)]
pub enum Dispatch {
    /// The entity already left the state the intent applies to.
    Noop,
    /// Applied locally with no backend involvement.
    Local,
    /// Applied locally, backend call running.
    InFlight(PendingSync),
}

impl Dispatch {
    pub fn is_noop(&self) -> bool {
        matches!(self, Dispatch::Noop)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Dispatch::InFlight(_))
    }

    /// Waits for the backend call, if any. Local and no-op dispatches are confirmed.
    pub async fn settled(self) -> SyncOutcome {
        match self {
            Dispatch::InFlight(pending) => pending.settled().await,
            Dispatch::Noop | Dispatch::Local => SyncOutcome::Confirmed,
        }
    }
}

/// Bookkeeping for one backend call.
#[derive(Debug, Clone)]
pub(crate) struct Op {
    pub name: &'static str,
    pub entity_id: String,
    pub owner: Option<OwningCall>,
}

impl Op {
    /// A call that excludes other owning calls on the entity.
    pub fn owning(name: &'static str, entity_id: &str, owner: OwningCall) -> Self {
        Self {
            name,
            entity_id: entity_id.to_string(),
            owner: Some(owner),
        }
    }

    /// A plain field write; several may overlap on one entity.
    pub fn write(name: &'static str, entity_id: &str) -> Self {
        Self {
            name,
            entity_id: entity_id.to_string(),
            owner: None,
        }
    }
}

impl GraphStore {
    /// Registers the call as in flight and spawns it.
    ///
    /// Must be called with the store lock held and after the local change has
    /// been applied, so that the snapshot is in place before anything else can
    /// touch the entity.
    pub(crate) fn launch<T, C, Fut, S, F>(
        &self,
        state: &mut StoreState,
        op: Op,
        call: C,
        on_success: S,
        on_failure: F,
    ) -> Dispatch
    where
        T: Send + 'static,
        C: FnOnce(Arc<dyn GraphAdapter>) -> Fut + Send + 'static,
        Fut: Future<Output = AdapterResult<T>> + Send + 'static,
        S: FnOnce(&mut StoreState, T) + Send + 'static,
        F: FnOnce(&mut StoreState, &AdapterError) + Send + 'static,
    {
        match op.owner {
            Some(owner) => state.claim(&op.entity_id, owner),
            None => state.begin_write(&op.entity_id),
        }

        let store = self.clone();
        let (sender, receiver) = oneshot::channel();
        tokio::spawn(async move {
            let result = match store.inner.registry.current().await {
                Some(adapter) => call(adapter).await,
                None => Err(AdapterError::NotConnected),
            };
            let outcome = store.settle(&op, result, on_success, on_failure);
            // The caller may have dropped the handle.
            let _ = sender.send(outcome);
        });

        Dispatch::InFlight(PendingSync { receiver })
    }

    fn settle<T, S, F>(&self, op: &Op, result: AdapterResult<T>, on_success: S, on_failure: F) -> SyncOutcome
    where
        S: FnOnce(&mut StoreState, T),
        F: FnOnce(&mut StoreState, &AdapterError),
    {
        let (revision, outcome) = {
            let mut state = self.inner.state.lock();
            match op.owner {
                Some(_) => state.release(&op.entity_id),
                None => state.end_write(&op.entity_id),
            }

            let outcome = match result {
                Ok(value) => {
                    debug!("{} of {} confirmed", op.name, op.entity_id);
                    on_success(&mut state, value);
                    SyncOutcome::Confirmed
                }
                Err(error) => {
                    warn!("{} of {} failed: {}", op.name, op.entity_id, error);
                    on_failure(&mut state, &error);
                    if matches!(error.kind(), FailureKind::NotConnected | FailureKind::Network) {
                        state.connected = false;
                    }
                    SyncOutcome::RolledBack(Notification::from_error(Some(&op.entity_id), op.name, &error))
                }
            };
            (state.touch(), outcome)
        };

        self.publish(revision);
        if let SyncOutcome::RolledBack(notification) = &outcome {
            self.notify(notification.clone());
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_text_distinguishes_kinds() {
        let constraint = Notification::from_error(
            Some("n1"),
            "rename_node",
            &AdapterError::ConstraintViolation("already exists".into()),
        );
        let generic = Notification::from_error(Some("n1"), "rename_node", &AdapterError::QueryError("boom".into()));
        let offline = Notification::not_connected(Some("n1"), "rename_node");

        assert!(constraint.message.starts_with("Name already taken"));
        assert_ne!(constraint.headline(), generic.headline());
        assert_ne!(offline.headline(), generic.headline());
        assert_eq!(offline.kind, FailureKind::NotConnected);
    }

    #[tokio::test]
    async fn test_local_dispatch_settles_confirmed() {
        assert!(Dispatch::Local.settled().await.is_confirmed());
        assert!(Dispatch::Noop.is_noop());
    }
}
