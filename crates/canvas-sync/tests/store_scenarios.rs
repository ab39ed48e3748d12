//! End-to-end store behaviour against the in-memory adapter

use std::collections::HashSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use canvas_sync::test_utils::FakeAdapter;
use canvas_sync::{
    AdapterError, AdapterRegistry, Connection, DeleteMode, Dispatch, EntityPhase, FailureKind, GraphSnapshot,
    GraphStore, MutationRejected, Position, Properties, QueryMode, StoreEvent, SyncOutcome,
};

/// Helper function to build a connected store over a seeded fake backend
async fn setup_test_store(seed: impl FnOnce(&FakeAdapter)) -> (GraphStore, Arc<FakeAdapter>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("canvas_sync=debug")
        .with_test_writer()
        .try_init();

    let fake = FakeAdapter::new();
    seed(&fake);
    let fake = Arc::new(fake);
    let store = GraphStore::new(Arc::new(AdapterRegistry::new()));
    store.connect_with(fake.clone()).await.expect("fake adapter always connects");
    store
        .run_query("MATCH (n) OPTIONAL MATCH (n)-[r]->(m) RETURN n, r, m", QueryMode::Merge)
        .await
        .expect("initial query");
    (store, fake)
}

fn named(name: &str) -> Properties {
    let mut props = Properties::new();
    props.insert("name".into(), json!(name));
    props
}

fn assert_no_dangling_edges(snapshot: &GraphSnapshot) {
    let nodes: HashSet<&str> = snapshot.nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in &snapshot.edges {
        assert!(
            nodes.contains(edge.source.as_str()) && nodes.contains(edge.target.as_str()),
            "edge {} points at a missing node ({} -> {})",
            edge.id,
            edge.source,
            edge.target
        );
    }
}

#[tokio::test]
async fn test_placeholder_is_replaced_everywhere_on_commit() {
    let (store, fake) = setup_test_store(|fake| {
        fake.seed_node("bob", &["Person"], named("Bob"));
        fake.seed_node("carol", &["Person"], named("Carol"));
    })
    .await;

    let draft = store.create_draft_node("draft", Position::new(100.0, 100.0));
    let incoming = store.create_draft_edge(Connection::new("bob", draft.clone())).unwrap();
    let outgoing = store.create_draft_edge(Connection::new(draft.clone(), "carol")).unwrap();

    let outcome = store.commit_draft_node(&draft, "Alice").unwrap().settled().await;
    assert_eq!(outcome, SyncOutcome::Confirmed);

    let snapshot = store.snapshot();
    let alice = snapshot
        .nodes
        .iter()
        .find(|n| n.data.label == "Alice")
        .expect("committed node");
    assert_ne!(alice.id, draft);
    assert_eq!(alice.position, Position::new(100.0, 100.0));
    assert_eq!(store.phase(&alice.id), Some(EntityPhase::Persisted));
    assert_eq!(snapshot.edge(&incoming).unwrap().target, alice.id);
    assert_eq!(snapshot.edge(&outgoing).unwrap().source, alice.id);
    assert!(snapshot.nodes.iter().all(|n| n.id != draft));
    assert_no_dangling_edges(&snapshot);
    assert_eq!(fake.node_properties(&alice.id).unwrap()["name"], json!("Alice"));

    // The edges can now be committed against the permanent id.
    let dispatch = store.commit_draft_edge(&incoming, "KNOWS").unwrap();
    assert!(dispatch.settled().await.is_confirmed());
    let committed = store
        .snapshot()
        .edges
        .into_iter()
        .find(|e| e.data.label == "KNOWS")
        .unwrap();
    assert_eq!(fake.relationship_endpoints(&committed.id), Some(("bob".into(), alice.id.clone())));
}

#[tokio::test]
async fn test_drag_origin_determines_source() {
    let (store, fake) = setup_test_store(|fake| {
        fake.seed_node("a", &["Person"], named("A"));
        fake.seed_node("b", &["Person"], named("B"));
    })
    .await;

    // Reported as a -> b by the canvas, but the drag started on b.
    let edge = store
        .create_draft_edge(Connection::new("a", "b").dragged_from("b"))
        .unwrap();
    let draft = store.edge(&edge).unwrap();
    assert_eq!((draft.source.as_str(), draft.target.as_str()), ("b", "a"));

    store.commit_draft_edge(&edge, "KNOWS").unwrap().settled().await;
    let created = fake
        .call_log()
        .into_iter()
        .find(|c| c.op == "create_relationship")
        .unwrap();
    assert_eq!(created.detail, "b-KNOWS->a");
}

#[tokio::test]
async fn test_merging_the_same_result_keeps_canvas_stable() {
    let (store, _fake) = setup_test_store(|fake| {
        fake.seed_node("a", &["Person"], named("A"));
        fake.seed_node("b", &["Person"], named("B"));
        fake.seed_relationship("ab", "a", "b", "KNOWS", Properties::new());
    })
    .await;
    store.move_node("a", Position::new(640.0, 480.0)).unwrap();
    store.select("b", false).unwrap();

    let report = store.run_query("MATCH (n)-[r]->(m) RETURN n, r, m", QueryMode::Merge).await.unwrap();
    assert_eq!((report.nodes_added, report.edges_added), (0, 0));

    let snapshot = store.snapshot();
    assert_eq!(snapshot.nodes.len(), 2);
    assert_eq!(snapshot.edges.len(), 1);
    assert_eq!(snapshot.node("a").unwrap().position, Position::new(640.0, 480.0));
    assert!(snapshot.node("b").unwrap().selected);
}

#[tokio::test]
async fn test_commit_and_discard_race_issues_one_call() {
    let (store, fake) = setup_test_store(|_| {}).await;
    let draft = store.create_draft_node("draft", Position::default());

    let commit = store.commit_draft_node(&draft, "Alice").unwrap();
    assert!(store.discard_draft_node(&draft).is_noop());
    assert!(store.commit_draft_node(&draft, "Alice").unwrap().is_noop());
    assert!(commit.settled().await.is_confirmed());

    assert_eq!(fake.calls("create_node"), 1);
    assert_eq!(fake.node_count(), 1);
}

#[tokio::test]
async fn test_rollback_is_limited_to_the_failed_field() {
    let (store, fake) = setup_test_store(|fake| {
        let mut props = named("N");
        props.insert("p".into(), json!(1));
        fake.seed_node("n", &["Thing"], props);
    })
    .await;
    let mut events = store.subscribe();
    fake.fail_next_matching("set_node_property", "p=", AdapterError::QueryError("rejected".into()));

    let p = store.update_node_property("n", "p", json!(2)).unwrap();
    let q = store.update_node_property("n", "q", json!(5)).unwrap();
    let (p, q) = tokio::join!(p.settled(), q.settled());
    assert!(!p.is_confirmed());
    assert!(q.is_confirmed());

    let node = store.node("n").unwrap();
    assert_eq!(node.data.properties["p"], json!(1));
    assert_eq!(node.data.properties["q"], json!(5));

    let mut notices = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let StoreEvent::Notice(n) = event {
            notices.push(n);
        }
    }
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].entity_id.as_deref(), Some("n"));
    assert_eq!(notices[0].operation, "set_node_property");
    assert_eq!(notices[0].kind, FailureKind::Backend);
}

#[tokio::test]
async fn test_random_edit_sequences_leave_no_dangling_edges() {
    let (store, _fake) = setup_test_store(|fake| {
        for i in 0..4 {
            fake.seed_node(&format!("n{}", i), &["Thing"], Properties::new());
        }
        fake.seed_relationship("r0", "n0", "n1", "LINK", Properties::new());
        fake.seed_relationship("r1", "n2", "n3", "LINK", Properties::new());
    })
    .await;

    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = move |bound: usize| {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        (seed % bound as u64) as usize
    };

    let mut pending: Vec<Dispatch> = Vec::new();
    for _ in 0..200 {
        let snapshot = store.snapshot();
        let pick = |i: usize| snapshot.nodes.get(i % snapshot.nodes.len().max(1)).map(|n| n.id.clone());
        match next(6) {
            0 => {
                store.create_draft_node("draft", Position::default());
            }
            1 => {
                if let (Some(a), Some(b)) = (pick(next(8)), pick(next(8))) {
                    let _ = store.create_draft_edge(Connection::new(a, b));
                }
            }
            2 => {
                if let Some(id) = pick(next(8)) {
                    let _ = store.discard_draft_node(&id);
                }
            }
            3 => {
                if let Some(id) = pick(next(8)) {
                    if let Ok(dispatch) = store.commit_draft_node(&id, "Committed") {
                        pending.push(dispatch);
                    }
                }
            }
            4 => {
                if let Some(id) = pick(next(8)) {
                    store.select(&id, false).unwrap();
                    if let Ok(dispatches) = store.delete_selection(DeleteMode::HideAndPersistDelete) {
                        pending.extend(dispatches);
                    }
                }
            }
            _ => {
                for dispatch in pending.drain(..) {
                    dispatch.settled().await;
                }
            }
        }
        assert_no_dangling_edges(&store.snapshot());
    }

    for dispatch in pending {
        dispatch.settled().await;
    }
    let snapshot = store.snapshot();
    assert_no_dangling_edges(&snapshot);
    assert_eq!(snapshot.in_flight, 0);
}

#[tokio::test]
async fn test_network_failure_flips_connected_flag() {
    let (store, fake) = setup_test_store(|fake| fake.seed_node("n", &["Thing"], named("N"))).await;
    fake.fail_next(
        "rename_node",
        AdapterError::Network(canvas_sync::NetworkFailure::Unreachable, "connection refused".into()),
    );

    let outcome = store.update_node_label("n", "M").unwrap().settled().await;
    let SyncOutcome::RolledBack(notice) = outcome else {
        panic!("expected rollback");
    };
    assert_eq!(notice.kind, FailureKind::Network);
    assert!(!store.snapshot().connected);
    assert_eq!(store.node("n").unwrap().data.label, "N");

    assert!(store.check_health().await);
    assert!(store.snapshot().connected);
}

#[tokio::test]
async fn test_commit_with_draft_endpoint_is_rejected() {
    let (store, fake) = setup_test_store(|fake| fake.seed_node("a", &[], Properties::new())).await;
    let draft = store.create_draft_node("draft", Position::default());
    let edge = store.create_draft_edge(Connection::new("a", draft.clone())).unwrap();

    assert_eq!(
        store.commit_draft_edge(&edge, "KNOWS").unwrap_err(),
        MutationRejected::DraftEndpoint(draft)
    );
    assert_eq!(fake.calls("create_relationship"), 0);
}
