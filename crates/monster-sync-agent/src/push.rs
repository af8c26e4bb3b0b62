//! Leader-side push pipeline.
//!
//! The host hands over snapshots at scan cadence through
//! [`PushEngine::push_local`]. Snapshots that differ from the cached value
//! for their id are queued; a background loop drains the queue, diffs it
//! against what peers already have and sends one batched `Push` per wake-up,
//! pausing for the throttle interval after every send attempt.

use crate::config::PushConfig;
use monster_sync_core::{DiffEngine, EntitySnapshot};
use monster_sync_proto::{PushSnapshots, SessionMessage};
use monster_sync_transport::{SharedTransport, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Called when a batch could not be sent.
pub type SendFailedHook = Arc<dyn Fn(&TransportError) + Send + Sync>;

#[derive(Default)]
struct PushQueue {
    cache: HashMap<String, EntitySnapshot>,
    pending: Vec<String>,
}

struct Shared {
    queue: Mutex<PushQueue>,
    work: Notify,
    diff: Mutex<DiffEngine>,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Change-detecting, throttled snapshot sender.
pub struct PushEngine {
    shared: Arc<Shared>,
    transport: SharedTransport,
    config: PushConfig,
    on_send_failed: SendFailedHook,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl PushEngine {
    /// Create a stopped engine sending through `transport`.
    #[must_use]
    pub fn new(
        transport: SharedTransport,
        config: PushConfig,
        on_send_failed: SendFailedHook,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(PushQueue::default()),
                work: Notify::new(),
                diff: Mutex::new(DiffEngine::new()),
            }),
            transport,
            config,
            on_send_failed,
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// Offer a fresh snapshot.
    ///
    /// Returns `true` if it was queued, `false` if it matched the cached
    /// value within tolerance or had no id.
    pub fn push_local(&self, snapshot: EntitySnapshot) -> bool {
        if snapshot.id.is_empty() {
            tracing::trace!("Snapshot id is empty, ignoring");
            return false;
        }

        {
            let mut queue = lock(&self.shared.queue);
            if queue
                .cache
                .get(&snapshot.id)
                .is_some_and(|cached| cached.approx_eq(&snapshot))
            {
                return false;
            }

            if !queue.pending.contains(&snapshot.id) {
                queue.pending.push(snapshot.id.clone());
            }
            queue.cache.insert(snapshot.id.clone(), snapshot);
        }

        self.shared.work.notify_one();
        true
    }

    /// Ids waiting to be sent.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        lock(&self.shared.queue).pending.len()
    }

    /// Start the send loop for `session_id`, replacing a running one.
    ///
    /// Peers joining a session have nothing to diff against, so the first
    /// batch after a start carries full snapshots.
    pub async fn start(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        let mut worker = self.worker.lock().await;
        if let Some(previous) = worker.take() {
            previous.halt().await;
        }

        lock(&self.shared.diff).clear();

        let token = CancellationToken::new();
        let handle = tokio::spawn(push_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.transport),
            session_id.clone(),
            self.config.throttle(),
            Arc::clone(&self.on_send_failed),
            token.clone(),
        ));
        *worker = Some(Worker { token, handle });

        tracing::info!(session_id = %session_id, "Push loop started");
    }

    /// Stop the send loop and forget all cached and sent state.
    pub async fn stop(&self) {
        if let Some(previous) = self.worker.lock().await.take() {
            previous.halt().await;
            tracing::info!("Push loop stopped");
        }

        let mut queue = lock(&self.shared.queue);
        queue.cache.clear();
        queue.pending.clear();
        drop(queue);
        lock(&self.shared.diff).clear();
    }

    /// True while the send loop is running.
    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }
}

impl Worker {
    async fn halt(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!(error = %e, "Push loop panicked");
            }
        }
    }
}

impl Shared {
    fn drain(&self) -> Vec<EntitySnapshot> {
        let mut queue = lock(&self.queue);
        let pending = std::mem::take(&mut queue.pending);
        pending
            .iter()
            .filter_map(|id| queue.cache.get(id).cloned())
            .collect()
    }
}

async fn push_loop(
    shared: Arc<Shared>,
    transport: SharedTransport,
    session_id: String,
    throttle: Duration,
    on_send_failed: SendFailedHook,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            () = shared.work.notified() => {}
        }

        let batch = shared.drain();
        if batch.is_empty() {
            continue;
        }

        let diffs: Vec<EntitySnapshot> = lock(&shared.diff)
            .compute_diffs(&batch)
            .into_iter()
            .filter(|d| !d.is_empty())
            .collect();
        if diffs.is_empty() {
            continue;
        }

        let count = diffs.len();
        let message = SessionMessage::from(PushSnapshots {
            session_id: session_id.clone(),
            entities: diffs,
        });

        let sent = tokio::select! {
            biased;
            () = token.cancelled() => break,
            mut client = transport.lock() => client.send(&message, &token).await,
        };

        match sent {
            Ok(()) => tracing::debug!(session_id = %session_id, entities = count, "Pushed"),
            Err(TransportError::Cancelled) => break,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Push failed");
                on_send_failed(&e);
            }
        }

        tokio::select! {
            biased;
            () = token.cancelled() => break,
            () = tokio::time::sleep(throttle) => {}
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use monster_sync_transport::{MemoryConnector, RetryPolicy, TransportClient};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn engine() -> PushEngine {
        let (connector, _accept) = MemoryConnector::new("mem://push");
        let (events, _) = mpsc::unbounded_channel();
        let transport = TransportClient::new(connector, RetryPolicy::default(), events).shared();
        PushEngine::new(
            transport,
            PushConfig::default(),
            Arc::new(|_: &TransportError| {}),
        )
    }

    #[test]
    fn tolerance_equal_snapshot_is_queued_once() {
        let engine = engine();

        assert!(engine.push_local(EntitySnapshot::new("em_001").with_part(0, 100.0)));
        assert!(!engine.push_local(EntitySnapshot::new("em_001").with_part(0, 100.5)));
        assert_eq!(engine.pending_len(), 1);
    }

    #[test]
    fn repeated_changes_keep_one_pending_entry() {
        let engine = engine();

        engine.push_local(EntitySnapshot::new("em_001").with_part(0, 100.0));
        engine.push_local(EntitySnapshot::new("em_002").with_part(0, 50.0));
        engine.push_local(EntitySnapshot::new("em_001").with_part(0, 90.0));

        assert_eq!(engine.pending_len(), 2);
        let drained = engine.shared.drain();
        assert_eq!(drained[0].id, "em_001");
        assert_eq!(drained[0].part(0).map(|p| p.health), Some(90.0));
        assert_eq!(drained[1].id, "em_002");
        assert_eq!(engine.pending_len(), 0);
    }

    #[test]
    fn empty_id_is_rejected() {
        let engine = engine();
        assert!(!engine.push_local(EntitySnapshot::new("").with_part(0, 1.0)));
        assert_eq!(engine.pending_len(), 0);
    }

    #[tokio::test]
    async fn send_failure_invokes_hook_and_loop_keeps_running() {
        let (connector, _accept) = MemoryConnector::new("mem://push");
        let (events, _) = mpsc::unbounded_channel();
        // Never connected, so every send fails with NotConnected.
        let transport = TransportClient::new(connector, RetryPolicy::default(), events).shared();
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let engine = PushEngine::new(
            transport,
            PushConfig::default(),
            Arc::new(move |e: &TransportError| {
                assert!(matches!(e, TransportError::NotConnected));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        engine.start("s1").await;
        engine.push_local(EntitySnapshot::new("em_001").with_part(0, 100.0));

        for _ in 0..100 {
            if failures.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(engine.is_running().await);

        engine.stop().await;
        assert!(!engine.is_running().await);
        assert_eq!(engine.pending_len(), 0);
    }
}
