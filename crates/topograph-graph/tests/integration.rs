//! Concurrency tests for topograph-graph.
//!
//! Run with: cargo test --package topograph-graph --test integration

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use topograph_core::{EventPayload, GraphEvent, IdentityKey, MetadataValue};
use topograph_graph::{Graph, GraphError, Node};

fn pod_key(name: &str) -> IdentityKey {
    IdentityKey::new("Pod", "k8s", "k8s", name)
}

fn get_or_create(graph: &Graph, key: IdentityKey) -> Node {
    match graph.new_node(key.clone()) {
        Ok(node) => node,
        Err(GraphError::DuplicateNode { .. }) => graph.node(&key).unwrap(),
        Err(e) => panic!("unexpected error: {e}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_new_node_creates_exactly_one() {
    let graph = Arc::new(Graph::default());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let graph = graph.clone();
        handles.push(tokio::spawn(async move {
            graph.new_node(pod_key("pod-1")).map(|n| n.id())
        }));
    }

    let mut created = Vec::new();
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(id) => created.push(id),
            Err(GraphError::DuplicateNode { .. }) => duplicates += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(created.len(), 1);
    assert_eq!(duplicates, 15);
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.node(&pod_key("pod-1")).unwrap().id(), created[0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_partial_commit() {
    let graph = Arc::new(Graph::default());
    let node = graph.new_node(pod_key("pod-1")).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let node = node.clone();
        let done = done.clone();
        tokio::task::spawn_blocking(move || {
            let mut reads = 0u64;
            while !done.load(Ordering::Acquire) {
                let md = node.metadata();
                let k1 = md.get("k1").cloned();
                let k2 = md.get("k2").cloned();
                // Both keys are always written together with the same value.
                assert_eq!(k1, k2, "observed a partially applied batch");
                reads += 1;
            }
            reads
        })
    };

    let writer = {
        let graph = graph.clone();
        let node = node.clone();
        tokio::task::spawn_blocking(move || {
            for i in 0..500i64 {
                let mut tx = graph.start_metadata_transaction(&node);
                tx.add("k1", &i).unwrap();
                tx.add("k2", &i).unwrap();
                tx.commit().unwrap();
            }
        })
    };

    writer.await.unwrap();
    done.store(true, Ordering::Release);
    assert!(reader.await.unwrap() > 0);

    assert_eq!(node.metadata().get("k1"), Some(&MetadataValue::Int(499)));
    assert_eq!(node.revision(), 501);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commits_on_one_node_are_serialized() {
    let graph = Arc::new(Graph::default());
    let node = graph.new_node(pod_key("pod-1")).unwrap();

    let revisions = Arc::new(Mutex::new(Vec::new()));
    let sink = revisions.clone();
    graph.add_listener(Arc::new(move |event: &GraphEvent| {
        if let EventPayload::NodeUpdated { revision, .. } = event.payload {
            sink.lock().unwrap().push(revision);
        }
    }));

    let mut handles = Vec::new();
    for writer in 0..8i64 {
        let graph = graph.clone();
        let node = node.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            for i in 0..50i64 {
                let mut tx = graph.start_metadata_transaction(&node);
                tx.add(format!("w{writer}"), &i).unwrap();
                tx.add("last", &writer).unwrap();
                tx.commit().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Listeners see commits in commit order, one event per commit.
    let revisions = revisions.lock().unwrap();
    assert_eq!(revisions.len(), 400);
    assert!(revisions.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(node.revision(), 401);

    let md = node.metadata();
    for writer in 0..8 {
        assert_eq!(md.get_int(&format!("w{writer}")).unwrap(), 49);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commit_on_one_node_does_not_block_another() {
    let graph = Arc::new(Graph::default());
    let slow = graph.new_node(pod_key("slow")).unwrap();
    let fast = graph.new_node(pod_key("fast")).unwrap();

    // Park the commit on `slow` inside its listener.
    let (entered_tx, entered_rx) = std::sync::mpsc::channel::<()>();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    let slow_id = slow.id();
    graph.add_listener(Arc::new(move |event: &GraphEvent| {
        if let EventPayload::NodeUpdated { node_id, .. } = event.payload {
            if node_id == slow_id {
                let _ = entered_tx.lock().unwrap().send(());
                let _ = release_rx
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(5));
            }
        }
    }));

    let blocked = {
        let graph = graph.clone();
        tokio::task::spawn_blocking(move || {
            let mut tx = graph.start_metadata_transaction(&slow);
            tx.add("k", &1).unwrap();
            tx.commit().unwrap();
        })
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let mut tx = graph.start_metadata_transaction(&fast);
    tx.add("k", &1).unwrap();
    tx.commit().unwrap();
    assert_eq!(fast.revision(), 2);

    release_tx.send(()).unwrap();
    blocked.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_task_leaves_node_untouched() {
    let graph = Arc::new(Graph::default());
    let node = graph.new_node(pod_key("pod-1")).unwrap();
    let before = node.snapshot();

    let task = {
        let graph = graph.clone();
        let node = node.clone();
        tokio::spawn(async move {
            let mut tx = graph.start_metadata_transaction(&node);
            tx.add("K8s", &json!({"half": "done"})).unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            tx.commit().unwrap();
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(node.snapshot(), before);

    // The node accepts new transactions straight away.
    let mut tx = graph.start_metadata_transaction(&node);
    tx.add("K8s", &json!({"phase": "Running"})).unwrap();
    assert!(tx.commit().unwrap().is_some());
}

#[derive(Serialize)]
struct PodStatus {
    phase: String,
    ready: bool,
}

#[derive(Serialize)]
struct Pod {
    namespace: String,
    labels: std::collections::HashMap<String, String>,
    status: PodStatus,
    restarts: u32,
}

#[tokio::test]
async fn test_probe_style_observation_end_to_end() {
    let graph = Graph::default();
    let mut rx = graph.subscribe();

    let pod = Pod {
        namespace: "default".into(),
        labels: [("app".to_string(), "web".to_string())].into(),
        status: PodStatus {
            phase: "Running".into(),
            ready: true,
        },
        restarts: 0,
    };

    let node = get_or_create(&graph, pod_key("web-0"));
    let mut tx = graph.start_metadata_transaction(&node);
    tx.add("K8s", &pod).unwrap();
    tx.commit().unwrap();

    // A second observation of the same entity lands on the same node.
    let again = get_or_create(&graph, pod_key("web-0"));
    assert_eq!(again.id(), node.id());

    let md = node.metadata();
    assert_eq!(md.get_string("K8s.status.phase").unwrap(), "Running");
    assert!(md.get_bool("K8s.status.ready").unwrap());
    assert_eq!(md.get_string("K8s.labels.app").unwrap(), "web");

    // The native struct and its JSON form produce the same metadata.
    let mut tx = graph.start_metadata_transaction(&node);
    tx.add("K8s", &serde_json::to_value(&pod).unwrap()).unwrap();
    tx.commit().unwrap();
    assert_eq!(node.metadata(), md);

    let first = rx.recv().await.unwrap();
    assert!(matches!(first.payload, EventPayload::NodeAdded { .. }));
    let second = rx.recv().await.unwrap();
    match second.payload {
        EventPayload::NodeUpdated {
            changed_keys,
            revision,
            ..
        } => {
            assert_eq!(changed_keys, vec!["K8s"]);
            assert_eq!(revision, 2);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
