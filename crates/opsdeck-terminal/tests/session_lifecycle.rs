//! End-to-end lifecycle coverage for PTY sessions and the registry, run
//! against a real pseudo-terminal with `/bin/cat` as a quiet, echoing
//! child process.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opsdeck_terminal::registry::{SessionKindResolver, SessionRegistry};
use opsdeck_terminal::session::SessionSpec;
use opsdeck_terminal::{SessionKey, ViewerHandle};
use tokio::sync::mpsc;

/// Test resolver: kind "cat" maps to a plain `/bin/cat` attached to the
/// PTY -- it stays alive until killed and echoes every input line.
struct CatKind;

impl SessionKindResolver for CatKind {
    fn resolve(&self, kind: &str, _params: &BTreeMap<String, String>) -> Option<SessionSpec> {
        (kind == "cat").then(|| SessionSpec::new("/bin/cat"))
    }
}

fn registry() -> Arc<SessionRegistry> {
    SessionRegistry::new(Arc::new(CatKind), None)
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_share_one_process() {
    let registry = registry();
    let params = BTreeMap::new();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        let params = params.clone();
        tasks.push(tokio::spawn(async move {
            registry.get_or_create("cat", &params).await.unwrap()
        }));
    }

    let mut sessions = Vec::new();
    for task in tasks {
        sessions.push(task.await.unwrap());
    }

    // Every caller observed the same session instance; exactly one
    // underlying process was created.
    for session in &sessions[1..] {
        assert!(Arc::ptr_eq(&sessions[0], session));
    }
    assert_eq!(registry.len(), 1);

    sessions[0].close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn input_bytes_reach_the_process_and_echo_back() {
    let registry = registry();
    let session = registry
        .get_or_create("cat", &BTreeMap::new())
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(256);
    session.register_viewer(ViewerHandle::new("viewer-1", tx));

    session.send_input(b"ls\n");

    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !String::from_utf8_lossy(&seen).contains("ls") {
        if Instant::now() > deadline {
            panic!("no echo received; got {:?}", String::from_utf8_lossy(&seen));
        }
        if let Ok(Some(chunk)) =
            tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
        {
            seen.extend_from_slice(&chunk);
        }
    }

    session.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_survives_zero_viewer_gap() {
    let registry = registry();
    let session = registry
        .get_or_create("cat", &BTreeMap::new())
        .await
        .unwrap();

    let (tx, _rx) = mpsc::channel(16);
    session.register_viewer(ViewerHandle::new("only-viewer", tx));
    session.unregister_viewer("only-viewer");
    assert_eq!(session.viewer_count(), 0);

    // Disconnecting the sole viewer must not terminate the process.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(session.is_alive());

    let again = registry
        .get_or_create("cat", &BTreeMap::new())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&session, &again));

    session.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_preserves_key_and_viewers() {
    let registry = registry();
    let session = registry
        .get_or_create("cat", &BTreeMap::new())
        .await
        .unwrap();
    let key = session.key().clone();

    let (tx, mut rx) = mpsc::channel(256);
    session.register_viewer(ViewerHandle::new("viewer-1", tx));
    session.append_output(b"pre-restart noise");

    assert!(registry.restart(&key));

    // The restart marker lands in the (cleared) history once the new
    // process is up.
    wait_until("restart marker in history", || {
        session
            .history_snapshot()
            .first()
            .map(|chunk| String::from_utf8_lossy(chunk).contains("Session Restarted"))
            .unwrap_or(false)
    })
    .await;

    assert!(session.is_alive());
    assert_eq!(session.key(), &key);
    assert_eq!(session.viewer_count(), 1);
    let history = session.history_snapshot();
    assert!(!String::from_utf8_lossy(&history.concat()).contains("pre-restart noise"));

    // The registered viewer saw the marker through the normal fan-out.
    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !String::from_utf8_lossy(&seen).contains("Session Restarted") {
        if Instant::now() > deadline {
            panic!("viewer never saw the restart marker");
        }
        if let Ok(Some(chunk)) =
            tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
        {
            seen.extend_from_slice(&chunk);
        }
    }

    // The registry entry still resolves to the same session.
    let again = registry
        .get_or_create("cat", &BTreeMap::new())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&session, &again));

    session.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_session_is_evicted_and_recreated() {
    let registry = registry();
    let first = registry
        .get_or_create("cat", &BTreeMap::new())
        .await
        .unwrap();
    let key = SessionKey::derive("cat", &BTreeMap::new());

    first.close();
    wait_until("session death", || !first.is_alive()).await;
    wait_until("self-eviction from the registry", || {
        registry.get(&key).is_none()
    })
    .await;

    let second = registry
        .get_or_create("cat", &BTreeMap::new())
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_alive());

    second.close();
}
