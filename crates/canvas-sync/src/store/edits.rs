//! Field edits on nodes and edges, plus the purely visual canvas intents

use serde_json::Value;

use super::{
    protocol::{Dispatch, Op},
    state::{refresh_label, StoreState},
    GraphStore,
};
use crate::data::{identifiers::is_valid_label, MutationRejected, Position, Properties, DISPLAY_PROPERTY};

/// Writes or removes `key`, returning what was there before.
fn put_property(properties: &mut Properties, key: &str, value: Option<Value>) -> Option<Value> {
    match value {
        Some(value) => properties.insert(key.to_string(), value),
        None => properties.remove(key),
    }
}

/// Undoes [`put_property`] unless the key has been written again since.
fn revert_property(properties: &mut Properties, key: &str, produced: &Option<Value>, previous: Option<Value>) {
    if properties.get(key) == produced.as_ref() {
        put_property(properties, key, previous);
    }
}

fn normalized_key(key: &str) -> Result<String, MutationRejected> {
    let key = key.trim();
    if key.is_empty() {
        Err(MutationRejected::EmptyKey)
    } else {
        Ok(key.to_string())
    }
}

impl GraphStore {
    fn editable_node(&self, state: &StoreState, id: &str) -> Result<bool, MutationRejected> {
        let node = state
            .nodes
            .get(id)
            .ok_or_else(|| MutationRejected::NodeNotFound(id.to_string()))?;
        if state.owner(id).is_some() {
            return Err(MutationRejected::Busy(id.to_string()));
        }
        Ok(node.is_draft())
    }

    fn editable_edge(&self, state: &StoreState, id: &str) -> Result<bool, MutationRejected> {
        let edge = state
            .edges
            .get(id)
            .ok_or_else(|| MutationRejected::EdgeNotFound(id.to_string()))?;
        if state.owner(id).is_some() {
            return Err(MutationRejected::Busy(id.to_string()));
        }
        Ok(edge.is_draft())
    }

    fn finish_local(&self, mut state: parking_lot::MutexGuard<'_, StoreState>) -> Dispatch {
        let revision = state.touch();
        drop(state);
        self.publish(revision);
        Dispatch::Local
    }

    fn finish_dispatch(&self, mut state: parking_lot::MutexGuard<'_, StoreState>, dispatch: Dispatch) -> Dispatch {
        let revision = state.touch();
        drop(state);
        self.publish(revision);
        dispatch
    }

    /// Renames a node. Drafts are renamed locally.
    pub fn update_node_label(&self, id: &str, label: &str) -> Result<Dispatch, MutationRejected> {
        let label = label.trim();
        if label.is_empty() {
            return Err(MutationRejected::EmptyLabel);
        }
        let mut state = self.inner.state.lock();
        let draft = self.editable_node(&state, id)?;
        if state.nodes[id].data.label == label {
            return Ok(Dispatch::Noop);
        }
        if draft {
            if let Some(node) = state.nodes.get_mut(id) {
                node.data.label = label.to_string();
            }
            return Ok(self.finish_local(state));
        }

        self.require_connection(id, "rename_node")?;
        let produced = Some(Value::String(label.to_string()));
        let previous = match state.nodes.get_mut(id) {
            Some(node) => {
                let previous = put_property(&mut node.data.properties, DISPLAY_PROPERTY, produced.clone());
                node.data.label = label.to_string();
                previous
            }
            None => return Err(MutationRejected::NodeNotFound(id.to_string())),
        };

        let (entity, name) = (id.to_string(), label.to_string());
        let dispatch = self.launch(
            &mut state,
            Op::write("rename_node", id),
            move |adapter| async move { adapter.rename_node(&entity, &name).await },
            |_, _: ()| {},
            {
                let entity = id.to_string();
                move |state, _| {
                    if let Some(node) = state.nodes.get_mut(&entity) {
                        revert_property(&mut node.data.properties, DISPLAY_PROPERTY, &produced, previous);
                        refresh_label(node);
                    }
                }
            },
        );
        Ok(self.finish_dispatch(state, dispatch))
    }

    /// Sets one property, creating it if absent. A failed write restores only this key.
    pub fn update_node_property(&self, id: &str, key: &str, value: Value) -> Result<Dispatch, MutationRejected> {
        self.write_node_property(id, key, Some(value))
    }

    pub fn delete_node_property(&self, id: &str, key: &str) -> Result<Dispatch, MutationRejected> {
        self.write_node_property(id, key, None)
    }

    fn write_node_property(&self, id: &str, key: &str, value: Option<Value>) -> Result<Dispatch, MutationRejected> {
        let key = normalized_key(key)?;
        let operation = if value.is_some() {
            "set_node_property"
        } else {
            "delete_node_property"
        };
        let mut state = self.inner.state.lock();
        let draft = self.editable_node(&state, id)?;
        if state.nodes[id].data.properties.get(&key) == value.as_ref() {
            return Ok(Dispatch::Noop);
        }
        if !draft {
            self.require_connection(id, operation)?;
        }

        let previous = match state.nodes.get_mut(id) {
            Some(node) => {
                let previous = put_property(&mut node.data.properties, &key, value.clone());
                refresh_label(node);
                previous
            }
            None => return Err(MutationRejected::NodeNotFound(id.to_string())),
        };
        if draft {
            return Ok(self.finish_local(state));
        }

        let entity = id.to_string();
        let (call_key, call_value) = (key.clone(), value.clone());
        let dispatch = self.launch(
            &mut state,
            Op::write(operation, id),
            move |adapter| async move {
                match call_value {
                    Some(v) => adapter.set_node_property(&entity, &call_key, v).await,
                    None => adapter.delete_node_property(&entity, &call_key).await,
                }
            },
            |_, _: ()| {},
            {
                let entity = id.to_string();
                move |state, _| {
                    if let Some(node) = state.nodes.get_mut(&entity) {
                        revert_property(&mut node.data.properties, &key, &value, previous);
                        refresh_label(node);
                    }
                }
            },
        );
        Ok(self.finish_dispatch(state, dispatch))
    }

    pub fn add_label(&self, id: &str, label: &str) -> Result<Dispatch, MutationRejected> {
        let label = label.trim();
        if !is_valid_label(label) {
            return Err(MutationRejected::InvalidLabel(label.to_string()));
        }
        let mut state = self.inner.state.lock();
        let draft = self.editable_node(&state, id)?;
        if state.nodes[id].data.labels.iter().any(|l| l == label) {
            return Ok(Dispatch::Noop);
        }
        if !draft {
            self.require_connection(id, "add_node_label")?;
        }
        if let Some(node) = state.nodes.get_mut(id) {
            node.data.labels.push(label.to_string());
            refresh_label(node);
        }
        if draft {
            return Ok(self.finish_local(state));
        }

        let (entity, added) = (id.to_string(), label.to_string());
        let dispatch = self.launch(
            &mut state,
            Op::write("add_node_label", id),
            move |adapter| async move { adapter.add_node_label(&entity, &added).await },
            |_, _: ()| {},
            {
                let (entity, added) = (id.to_string(), label.to_string());
                move |state, _| {
                    if let Some(node) = state.nodes.get_mut(&entity) {
                        node.data.labels.retain(|l| *l != added);
                        refresh_label(node);
                    }
                }
            },
        );
        Ok(self.finish_dispatch(state, dispatch))
    }

    pub fn remove_label(&self, id: &str, label: &str) -> Result<Dispatch, MutationRejected> {
        let label = label.trim();
        if !is_valid_label(label) {
            return Err(MutationRejected::InvalidLabel(label.to_string()));
        }
        let mut state = self.inner.state.lock();
        let draft = self.editable_node(&state, id)?;
        let Some(index) = state.nodes[id].data.labels.iter().position(|l| l == label) else {
            return Ok(Dispatch::Noop);
        };
        if !draft {
            self.require_connection(id, "remove_node_label")?;
        }
        if let Some(node) = state.nodes.get_mut(id) {
            node.data.labels.remove(index);
            refresh_label(node);
        }
        if draft {
            return Ok(self.finish_local(state));
        }

        let (entity, removed) = (id.to_string(), label.to_string());
        let dispatch = self.launch(
            &mut state,
            Op::write("remove_node_label", id),
            move |adapter| async move { adapter.remove_node_label(&entity, &removed).await },
            |_, _: ()| {},
            {
                let (entity, removed) = (id.to_string(), label.to_string());
                move |state, _| {
                    if let Some(node) = state.nodes.get_mut(&entity) {
                        if !node.data.labels.contains(&removed) {
                            let at = index.min(node.data.labels.len());
                            node.data.labels.insert(at, removed);
                            refresh_label(node);
                        }
                    }
                }
            },
        );
        Ok(self.finish_dispatch(state, dispatch))
    }

    /// Changes a relationship type. Draft edges change locally.
    pub fn update_edge_label(&self, id: &str, label: &str) -> Result<Dispatch, MutationRejected> {
        let label = label.trim();
        if label.is_empty() {
            return Err(MutationRejected::EmptyLabel);
        }
        if !is_valid_label(label) {
            return Err(MutationRejected::InvalidLabel(label.to_string()));
        }
        let mut state = self.inner.state.lock();
        let draft = self.editable_edge(&state, id)?;
        if state.edges[id].data.label == label {
            return Ok(Dispatch::Noop);
        }
        if !draft {
            self.require_connection(id, "update_relationship_label")?;
        }
        let previous = match state.edges.get_mut(id) {
            Some(edge) => std::mem::replace(&mut edge.data.label, label.to_string()),
            None => return Err(MutationRejected::EdgeNotFound(id.to_string())),
        };
        if draft {
            return Ok(self.finish_local(state));
        }

        let (entity, rel_type) = (id.to_string(), label.to_string());
        let dispatch = self.launch(
            &mut state,
            Op::write("update_relationship_label", id),
            move |adapter| async move { adapter.update_relationship_label(&entity, &rel_type).await },
            |_, _: ()| {},
            {
                let (entity, produced) = (id.to_string(), label.to_string());
                move |state, _| {
                    if let Some(edge) = state.edges.get_mut(&entity) {
                        if edge.data.label == produced {
                            edge.data.label = previous;
                        }
                    }
                }
            },
        );
        Ok(self.finish_dispatch(state, dispatch))
    }

    pub fn update_edge_property(&self, id: &str, key: &str, value: Value) -> Result<Dispatch, MutationRejected> {
        self.write_edge_property(id, key, Some(value))
    }

    pub fn delete_edge_property(&self, id: &str, key: &str) -> Result<Dispatch, MutationRejected> {
        self.write_edge_property(id, key, None)
    }

    fn write_edge_property(&self, id: &str, key: &str, value: Option<Value>) -> Result<Dispatch, MutationRejected> {
        let key = normalized_key(key)?;
        let operation = if value.is_some() {
            "set_relationship_property"
        } else {
            "delete_relationship_property"
        };
        let mut state = self.inner.state.lock();
        let draft = self.editable_edge(&state, id)?;
        if state.edges[id].data.properties.get(&key) == value.as_ref() {
            return Ok(Dispatch::Noop);
        }
        if !draft {
            self.require_connection(id, operation)?;
        }
        let previous = match state.edges.get_mut(id) {
            Some(edge) => put_property(&mut edge.data.properties, &key, value.clone()),
            None => return Err(MutationRejected::EdgeNotFound(id.to_string())),
        };
        if draft {
            return Ok(self.finish_local(state));
        }

        let entity = id.to_string();
        let (call_key, call_value) = (key.clone(), value.clone());
        let dispatch = self.launch(
            &mut state,
            Op::write(operation, id),
            move |adapter| async move {
                match call_value {
                    Some(v) => adapter.set_relationship_property(&entity, &call_key, v).await,
                    None => adapter.delete_relationship_property(&entity, &call_key).await,
                }
            },
            |_, _: ()| {},
            {
                let entity = id.to_string();
                move |state, _| {
                    if let Some(edge) = state.edges.get_mut(&entity) {
                        revert_property(&mut edge.data.properties, &key, &value, previous);
                    }
                }
            },
        );
        Ok(self.finish_dispatch(state, dispatch))
    }

    /// Selects a node or edge. Without `additive` everything else is deselected first.
    pub fn select(&self, id: &str, additive: bool) -> Result<(), MutationRejected> {
        let mut state = self.inner.state.lock();
        if !state.nodes.contains_key(id) && !state.edges.contains_key(id) {
            return Err(MutationRejected::NodeNotFound(id.to_string()));
        }
        if !additive {
            clear_selected(&mut state);
        }
        if let Some(node) = state.nodes.get_mut(id) {
            node.selected = true;
        } else if let Some(edge) = state.edges.get_mut(id) {
            edge.selected = true;
        }
        self.finish_local(state);
        Ok(())
    }

    pub fn clear_selection(&self) {
        let mut state = self.inner.state.lock();
        clear_selected(&mut state);
        self.finish_local(state);
    }

    pub fn move_node(&self, id: &str, position: Position) -> Result<(), MutationRejected> {
        let mut state = self.inner.state.lock();
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| MutationRejected::NodeNotFound(id.to_string()))?;
        node.position = position;
        self.finish_local(state);
        Ok(())
    }

    pub fn resize_node(&self, id: &str, width: f64, height: f64) -> Result<(), MutationRejected> {
        let mut state = self.inner.state.lock();
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| MutationRejected::NodeNotFound(id.to_string()))?;
        node.width = Some(width);
        node.height = Some(height);
        self.finish_local(state);
        Ok(())
    }

    /// Toggles the inline editor on a node or edge.
    pub fn set_editing(&self, id: &str, editing: bool) -> Result<(), MutationRejected> {
        let mut state = self.inner.state.lock();
        if let Some(node) = state.nodes.get_mut(id) {
            node.data.editing = editing;
        } else if let Some(edge) = state.edges.get_mut(id) {
            edge.data.editing = editing;
        } else {
            return Err(MutationRejected::NodeNotFound(id.to_string()));
        }
        self.finish_local(state);
        Ok(())
    }
}

fn clear_selected(state: &mut StoreState) {
    for node in state.nodes.values_mut() {
        node.selected = false;
    }
    for edge in state.edges.values_mut() {
        edge.selected = false;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::data::{AdapterError, EntityPhase};
    use crate::registry::AdapterRegistry;
    use crate::store::QueryMode;
    use crate::test_utils::FakeAdapter;

    async fn store_with_alice() -> (GraphStore, Arc<FakeAdapter>) {
        let fake = Arc::new(FakeAdapter::new());
        let mut props = Properties::new();
        props.insert("name".into(), json!("Alice"));
        props.insert("p".into(), json!(1));
        fake.seed_node("alice", &["Person"], props);
        let store = GraphStore::new(Arc::new(AdapterRegistry::new()));
        store.connect_with(fake.clone()).await.unwrap();
        store.run_query("MATCH (n) RETURN n", QueryMode::Merge).await.unwrap();
        (store, fake)
    }

    #[tokio::test]
    async fn test_rollback_restores_only_failed_key() {
        let (store, fake) = store_with_alice().await;
        fake.fail_next_matching("set_node_property", "p=", AdapterError::QueryError("boom".into()));

        let failing = store.update_node_property("alice", "p", json!(2)).unwrap();
        let other = store.update_node_property("alice", "q", json!(5)).unwrap();
        assert_eq!(store.phase("alice"), Some(EntityPhase::PendingWrite));

        assert!(!failing.settled().await.is_confirmed());
        assert!(other.settled().await.is_confirmed());

        let node = store.node("alice").unwrap();
        assert_eq!(node.data.properties["p"], json!(1));
        assert_eq!(node.data.properties["q"], json!(5));
        assert_eq!(store.phase("alice"), Some(EntityPhase::Persisted));
    }

    #[tokio::test]
    async fn test_rollback_skips_key_overwritten_meanwhile() {
        let (store, fake) = store_with_alice().await;
        fake.fail_next_matching("set_node_property", "p=2", AdapterError::QueryError("boom".into()));

        let failing = store.update_node_property("alice", "p", json!(2)).unwrap();
        let later = store.update_node_property("alice", "p", json!(3)).unwrap();
        failing.settled().await;
        later.settled().await;

        assert_eq!(store.node("alice").unwrap().data.properties["p"], json!(3));
    }

    #[tokio::test]
    async fn test_rename_rolls_back_label_on_constraint() {
        let (store, fake) = store_with_alice().await;
        fake.fail_next("rename_node", AdapterError::ConstraintViolation("already exists".into()));

        let dispatch = store.update_node_label("alice", "Bob").unwrap();
        assert_eq!(store.node("alice").unwrap().data.label, "Bob");
        assert!(!dispatch.settled().await.is_confirmed());

        let node = store.node("alice").unwrap();
        assert_eq!(node.data.label, "Alice");
        assert_eq!(node.data.properties["name"], json!("Alice"));
        assert_eq!(store.update_node_label("alice", "  ").unwrap_err(), MutationRejected::EmptyLabel);
    }

    #[tokio::test]
    async fn test_label_validation_happens_before_any_call() {
        let (store, fake) = store_with_alice().await;
        let before = store.snapshot();

        assert!(matches!(
            store.add_label("alice", "Bad Label"),
            Err(MutationRejected::InvalidLabel(_))
        ));
        assert_eq!(store.snapshot(), before);
        assert_eq!(fake.calls("add_node_label"), 0);

        store.add_label("alice", "Admin").unwrap().settled().await;
        assert!(store.add_label("alice", "Admin").unwrap().is_noop());
        assert_eq!(fake.node_labels("alice"), Some(vec!["Person".to_string(), "Admin".to_string()]));
    }

    #[tokio::test]
    async fn test_failed_remove_label_reinserts_in_place() {
        let (store, fake) = store_with_alice().await;
        store.add_label("alice", "Admin").unwrap().settled().await;
        fake.fail_next("remove_node_label", AdapterError::QueryError("boom".into()));

        store.remove_label("alice", "Person").unwrap().settled().await;
        assert_eq!(
            store.node("alice").unwrap().data.labels,
            vec!["Person".to_string(), "Admin".to_string()]
        );
    }

    #[tokio::test]
    async fn test_draft_edits_stay_local() {
        let (store, fake) = store_with_alice().await;
        let draft = store.create_draft_node("draft", Position::default());

        assert!(matches!(store.update_node_label(&draft, "Carol"), Ok(Dispatch::Local)));
        assert!(matches!(store.update_node_property(&draft, "age", json!(3)), Ok(Dispatch::Local)));
        assert_eq!(store.node(&draft).unwrap().data.label, "Carol");
        assert!(fake.call_log().iter().all(|c| c.op == "execute_projection"));
    }

    #[tokio::test]
    async fn test_selection_and_geometry() {
        let (store, _fake) = store_with_alice().await;
        let draft = store.create_draft_node("draft", Position::default());

        store.select("alice", false).unwrap();
        store.select(&draft, true).unwrap();
        assert_eq!(store.snapshot().nodes.iter().filter(|n| n.selected).count(), 2);
        store.select(&draft, false).unwrap();
        assert!(!store.node("alice").unwrap().selected);

        store.move_node("alice", Position::new(5.0, 6.0)).unwrap();
        store.resize_node("alice", 200.0, 80.0).unwrap();
        let node = store.node("alice").unwrap();
        assert_eq!(node.position, Position::new(5.0, 6.0));
        assert_eq!((node.width, node.height), (Some(200.0), Some(80.0)));

        store.clear_selection();
        assert!(store.snapshot().nodes.iter().all(|n| !n.selected));
        assert_eq!(
            store.move_node("ghost", Position::default()),
            Err(MutationRejected::NodeNotFound("ghost".into()))
        );
    }
}
