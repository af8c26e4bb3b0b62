//! Cancellable, strictly sequential action runner.
//!
//! At most one action body runs at a time. Starting an action cancels the
//! current one, waits until it has actually returned, then spawns the new body
//! with a fresh [`CancellationToken`]. Bodies report failure through
//! `anyhow::Result`; errors and panics are logged and never reach the caller.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type ActionFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type ActionBody = dyn Fn(CancellationToken) -> ActionFuture + Send + Sync;

/// Runs [`ScheduledAction`]s one at a time.
#[derive(Clone, Default)]
pub struct OperationScheduler {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    admission: tokio::sync::Mutex<()>,
    current: Mutex<Current>,
    counter: AtomicU64,
}

#[derive(Default)]
struct Current {
    id: u64,
    name: &'static str,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// A named, deferred action bound to a scheduler.
#[derive(Clone)]
pub struct ScheduledAction {
    name: &'static str,
    inner: Arc<Inner>,
    body: Arc<ActionBody>,
}

impl OperationScheduler {
    /// Create an idle scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `body` as an action run by this scheduler.
    #[must_use]
    pub fn create_action<F, Fut>(&self, name: &'static str, body: F) -> ScheduledAction
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        ScheduledAction {
            name,
            inner: Arc::clone(&self.inner),
            body: Arc::new(move |token| Box::pin(body(token)) as ActionFuture),
        }
    }

    /// Signal the running action to stop. Does not wait.
    pub fn cancel_current(&self) {
        let current = self.inner.lock_current();
        if current.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::trace!(action_id = current.id, action = current.name, "Cancellation requested");
            current.token.cancel();
        } else {
            tracing::trace!(action_id = current.id, "No cancellation, action already finished");
        }
    }

    /// Wait until the running action, if any, has returned.
    pub async fn wait_current(&self) {
        let _admission = self.inner.admission.lock().await;
        let handle = self.inner.lock_current().handle.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Inner {
    fn lock_current(&self) -> std::sync::MutexGuard<'_, Current> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ScheduledAction {
    /// Action name, for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cancel and await the current action, then start this one.
    ///
    /// Returns once the body has been spawned, not when it completes. The
    /// returned token is the one handed to the body.
    pub async fn run(&self) -> CancellationToken {
        let _admission = self.inner.admission.lock().await;
        let action_id = self.inner.counter.fetch_add(1, Ordering::AcqRel) + 1;

        let previous = {
            let mut current = self.inner.lock_current();
            current.token.cancel();
            current.handle.take()
        };
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        let token = CancellationToken::new();
        let body = (self.body)(token.clone());
        let name = self.name;
        let handle = tokio::spawn(async move {
            match AssertUnwindSafe(body).catch_unwind().await {
                Ok(Ok(())) => tracing::trace!(action_id, action = name, "Action finished"),
                Ok(Err(e)) => {
                    tracing::error!(action_id, action = name, error = %format!("{e:#}"), "Action failed");
                }
                Err(_) => tracing::error!(action_id, action = name, "Action panicked"),
            }
        });

        let mut current = self.inner.lock_current();
        current.id = action_id;
        current.name = name;
        current.token = token.clone();
        current.handle = Some(handle);
        tracing::trace!(action_id, action = name, "Action started");

        token
    }
}
