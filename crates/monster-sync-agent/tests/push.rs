//! Push pipeline timing, driven on paused time.

use monster_sync_agent::{PushConfig, PushEngine, SendFailedHook};
use monster_sync_core::{EntitySnapshot, PartState};
use monster_sync_proto::{PushSnapshots, SessionMessage};
use monster_sync_transport::{MemoryConnector, RetryPolicy, ServerConn, TransportClient, TransportError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct Harness {
    engine: PushEngine,
    server: ServerConn,
    failures: Arc<AtomicUsize>,
}

async fn harness() -> Harness {
    let (connector, mut accept) = MemoryConnector::new("mem://push");
    let (events, _events_rx) = mpsc::unbounded_channel();
    let transport = TransportClient::new(connector, RetryPolicy::default(), events).shared();

    let connected = transport
        .lock()
        .await
        .connect(&CancellationToken::new())
        .await;
    tokio_test::assert_ok!(connected);
    let server = accept.recv().await.expect("server end");

    let failures = Arc::new(AtomicUsize::new(0));
    let hook: SendFailedHook = {
        let failures = Arc::clone(&failures);
        Arc::new(move |_: &TransportError| {
            failures.fetch_add(1, Ordering::SeqCst);
        })
    };

    Harness {
        engine: PushEngine::new(transport, PushConfig::default(), hook),
        server,
        failures,
    }
}

fn monster(health: f32) -> EntitySnapshot {
    EntitySnapshot::new("em_001").with_part(0, health).with_part(1, 80.0)
}

async fn next_push(server: &mut ServerConn) -> PushSnapshots {
    match server.recv().await {
        Some(SessionMessage::PushSnapshots(push)) => push,
        other => panic!("expected a push, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn small_changes_are_suppressed_and_sends_are_throttled() {
    let Harness {
        engine,
        mut server,
        failures,
    } = harness().await;
    engine.start("s1").await;
    let started = Instant::now();

    assert!(engine.push_local(monster(100.0)));
    let first = next_push(&mut server).await;
    assert_eq!(first.session_id, "s1");
    assert_eq!(first.entities, vec![monster(100.0)]);

    assert!(!engine.push_local(monster(99.5)));
    assert!(engine.push_local(monster(97.0)));

    let second = next_push(&mut server).await;
    assert!(started.elapsed() >= Duration::from_millis(250));
    assert_eq!(second.entities.len(), 1);
    assert_eq!(second.entities[0].parts, vec![PartState::new(0, 97.0)]);
    assert!(second.entities[0].ailments.is_empty());

    let silence = tokio::time::timeout(Duration::from_secs(1), server.recv()).await;
    assert!(silence.is_err(), "unexpected frame {silence:?}");
    assert_eq!(failures.load(Ordering::SeqCst), 0);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn bursts_between_sends_are_coalesced() {
    let Harness {
        engine, mut server, ..
    } = harness().await;
    engine.start("s1").await;

    assert!(engine.push_local(monster(100.0)));
    next_push(&mut server).await;

    for health in [90.0, 80.0, 70.0] {
        assert!(engine.push_local(monster(health)));
    }
    assert!(engine.push_local(EntitySnapshot::new("em_002").with_part(0, 10.0)));
    assert_eq!(engine.pending_len(), 2);

    let batch = next_push(&mut server).await;
    let ids: Vec<&str> = batch.entities.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["em_001", "em_002"]);
    assert_eq!(batch.entities[0].parts, vec![PartState::new(0, 70.0)]);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn restart_resends_full_snapshots() {
    let Harness {
        engine, mut server, ..
    } = harness().await;
    engine.start("s1").await;

    assert!(engine.push_local(monster(100.0)));
    next_push(&mut server).await;
    assert!(engine.push_local(monster(97.0)));
    next_push(&mut server).await;

    engine.stop().await;
    assert!(!engine.is_running().await);
    assert_eq!(engine.pending_len(), 0);

    engine.start("s2").await;
    assert!(engine.is_running().await);
    assert!(engine.push_local(monster(97.0)));

    let resent = next_push(&mut server).await;
    assert_eq!(resent.session_id, "s2");
    assert_eq!(resent.entities, vec![monster(97.0)]);

    engine.stop().await;
}
