//! Session lifecycle coordinator.
//!
//! ## Tasks
//!
//! 1. **Trigger consumer**: the only place transitions happen. Triggers are
//!    queued FIFO from any thread and applied one at a time: exit actions of
//!    the old state, then entry actions of the new one.
//! 2. **Event pump**: turns transport events into triggers and routes
//!    inbound pushes to the poll mirror.
//! 3. **Scheduled actions**: asynchronous entry work (version check, connect,
//!    register, player wait, disconnect), one at a time through
//!    [`OperationScheduler`].
//!
//! Mode triggers update the observable [`SyncMode`] when they are dequeued,
//! before the transition they cause, so the mode changes even if the current
//! state ignores the trigger.

mod actions;
mod state;

pub use state::{State, SyncMode, Trigger};

use crate::config::SyncConfig;
use crate::poll::{Borrow, PollEngine};
use crate::push::{PushEngine, SendFailedHook};
use crate::scheduler::{OperationScheduler, ScheduledAction};
use anyhow::Context as _;
use monster_sync_core::{EntitySnapshot, MergePolicy};
use monster_sync_proto::{NoticeLevel, ServerNotice, SessionMessage};
use monster_sync_transport::{
    Connector, HttpVersionFetcher, SharedTransport, TransportClient, TransportError,
    TransportEvent, VersionFetcher, WsConnector,
};
use state::{transition, Context};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long [`SyncCoordinator::shutdown`] waits for an orderly disconnect.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct QueueItem {
    trigger: Trigger,
    token: Option<CancellationToken>,
}

#[derive(Clone)]
struct TriggerQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl TriggerQueue {
    fn fire(&self, trigger: Trigger) {
        self.enqueue(trigger, None);
    }

    /// Fire on behalf of an action; dropped if the action was cancelled.
    fn fire_scoped(&self, trigger: Trigger, token: &CancellationToken) {
        if token.is_cancelled() {
            tracing::trace!(trigger = %trigger, "Fire from cancelled action dropped");
            return;
        }
        self.enqueue(trigger, Some(token.clone()));
    }

    fn enqueue(&self, trigger: Trigger, token: Option<CancellationToken>) {
        tracing::trace!(trigger = %trigger, "Fire");
        if self.tx.send(QueueItem { trigger, token }).is_err() {
            tracing::debug!(trigger = %trigger, "Coordinator stopped, trigger dropped");
        }
    }
}

/// State shared by the handle, the consumer, the event pump and actions.
struct Core {
    triggers: TriggerQueue,
    mode: watch::Sender<SyncMode>,
    state: watch::Sender<State>,
    session_id: Mutex<Option<String>>,
    player_name: Mutex<Option<String>>,
    transport: SharedTransport,
    version: Arc<dyn VersionFetcher>,
    scheduler: OperationScheduler,
    push: PushEngine,
    poll: PollEngine,
    player_wait_timeout: Duration,
    shutdown: CancellationToken,
}

impl Core {
    fn mode(&self) -> SyncMode {
        *self.mode.borrow()
    }

    fn set_mode(&self, mode: SyncMode) {
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            tracing::info!(from = ?previous, to = ?mode, "Sync mode changed");
            if previous == SyncMode::Poll {
                self.poll.clear();
            }
        }
    }

    fn session_id(&self) -> Option<String> {
        lock(&self.session_id).clone()
    }

    fn player_name(&self) -> Option<String> {
        lock(&self.player_name).clone()
    }

    fn context(&self) -> Context {
        Context {
            mode: self.mode(),
            has_session: lock(&self.session_id).is_some(),
        }
    }

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => self.handle_message(message),
            TransportEvent::ConnectionError(error) => {
                let mut transport = self.transport.lock().await;
                if transport.is_connected() {
                    // The failed link was already replaced.
                    tracing::debug!(error = %error, "Stale connection error ignored");
                    return;
                }
                tracing::warn!(error = %error, "Connection error");
                transport.close().await;
                drop(transport);
                self.triggers.fire(Trigger::ConnectionFailed);
            }
        }
    }

    fn handle_message(&self, message: SessionMessage) {
        match message {
            // Accepted from registration on, not only once `Polling` is
            // entered: the leader's full snapshot can arrive right behind the
            // roster update that moves this peer there.
            SessionMessage::PushSnapshots(push) => {
                let current = self.session_id();
                if self.mode() != SyncMode::Poll || current.as_deref() != Some(push.session_id.as_str()) {
                    tracing::trace!(session_id = %push.session_id, "Push not for this peer, ignored");
                    return;
                }
                self.poll.handle_inbound(&push);
            }
            SessionMessage::SessionState(state) => {
                tracing::info!(
                    players = state.players_count,
                    leader_connected = state.leader_connected,
                    "Session update"
                );
                if state.players_count > 1 {
                    self.triggers.fire(Trigger::NotAloneInSession);
                } else {
                    // Cleared here, in frame order, so a snapshot resent
                    // after the leader rejoins is not wiped by a late exit.
                    if self.mode() == SyncMode::Poll {
                        self.poll.clear();
                    }
                    self.triggers.fire(Trigger::AloneInSession);
                }
            }
            SessionMessage::ServerNotice(notice) => log_notice(&notice),
            other => tracing::debug!(kind = other.kind(), "Unexpected message from server"),
        }
    }
}

fn log_notice(notice: &ServerNotice) {
    let text = notice.text.as_str();
    match notice.level {
        NoticeLevel::Trace => tracing::trace!(text, "Server notice"),
        NoticeLevel::Debug => tracing::debug!(text, "Server notice"),
        NoticeLevel::Info => tracing::info!(text, "Server notice"),
        NoticeLevel::Warn => tracing::warn!(text, "Server notice"),
        NoticeLevel::Error => tracing::error!(text, "Server notice"),
    }
}

struct Actions {
    version_check: ScheduledAction,
    connect: ScheduledAction,
    register: ScheduledAction,
    wait_for_players: ScheduledAction,
    reconnect: ScheduledAction,
    disconnect: ScheduledAction,
}

impl Actions {
    fn new(core: &Arc<Core>) -> Self {
        let scheduler = &core.scheduler;

        let c = Arc::clone(core);
        let version_check = scheduler.create_action("version_check", move |token| {
            actions::check_version(Arc::clone(&c), token)
        });
        let c = Arc::clone(core);
        let connect = scheduler.create_action("connect", move |token| {
            actions::connect(Arc::clone(&c), token, false)
        });
        let c = Arc::clone(core);
        let register = scheduler.create_action("register", move |token| {
            actions::register(Arc::clone(&c), token)
        });
        let c = Arc::clone(core);
        let wait_for_players = scheduler.create_action("wait_for_players", move |token| {
            actions::wait_for_players(Arc::clone(&c), token)
        });
        let c = Arc::clone(core);
        let reconnect = scheduler.create_action("reconnect", move |token| {
            actions::connect(Arc::clone(&c), token, true)
        });
        let c = Arc::clone(core);
        let disconnect = scheduler.create_action("disconnect", move |token| {
            actions::disconnect(Arc::clone(&c), token)
        });

        Self {
            version_check,
            connect,
            register,
            wait_for_players,
            reconnect,
            disconnect,
        }
    }
}

/// The trigger consumer.
struct Machine {
    core: Arc<Core>,
    state: State,
    actions: Actions,
}

impl Machine {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<QueueItem>) {
        tracing::debug!("Trigger loop started");

        loop {
            let item = tokio::select! {
                biased;
                () = self.core.shutdown.cancelled() => break,
                item = queue.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            if item.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
                tracing::trace!(trigger = %item.trigger, "Trigger from cancelled action dropped");
                continue;
            }

            self.handle(item.trigger, item.token.is_some()).await;
        }

        self.teardown().await;
        tracing::debug!("Trigger loop stopped");
    }

    /// Apply one trigger. `scoped` is true for triggers fired by actions.
    async fn handle(&mut self, trigger: Trigger, scoped: bool) {
        if let Some(mode) = trigger.mode() {
            self.core.set_mode(mode);
        }

        // While reconnecting, only the reconnect action's own outcome counts;
        // late reports about the link being replaced must not abort it.
        if self.state == State::Reconnecting && trigger == Trigger::ConnectionFailed && !scoped {
            tracing::debug!("Link failure while reconnecting ignored");
            return;
        }

        let Some(target) = transition(self.state, trigger) else {
            tracing::debug!(state = %self.state, trigger = %trigger, "Unhandled trigger");
            return;
        };

        let from = self.state;
        let to = target.resolve(from, self.core.context());
        tracing::info!(from = %from, trigger = %trigger, to = %to, "Transition");

        self.exit(from, to).await;
        self.state = to;
        self.enter(to).await;
        self.core.state.send_replace(to);
    }

    async fn enter(&mut self, state: State) {
        match state {
            State::Idle => {
                self.core.scheduler.cancel_current();
                self.core.set_mode(SyncMode::Idle);
            }
            State::VersionCheck => {
                self.actions.version_check.run().await;
            }
            State::WaitForSessionId => tracing::info!("Waiting for session id"),
            State::Connecting => {
                self.actions.connect.run().await;
            }
            State::RegisterInSession => {
                self.actions.register.run().await;
            }
            State::WaitingForPlayers => {
                self.actions.wait_for_players.run().await;
            }
            State::Polling => self.core.set_mode(SyncMode::Poll),
            State::Pushing => {
                match self.core.session_id() {
                    Some(session_id) => self.core.push.start(session_id).await,
                    None => tracing::warn!("Pushing without a session id"),
                }
                self.core.set_mode(SyncMode::Push);
            }
            State::Reconnecting => {
                self.actions.reconnect.run().await;
            }
            State::Disconnecting => {
                self.actions.disconnect.run().await;
            }
        }
    }

    async fn exit(&mut self, state: State, next: State) {
        match state {
            State::Idle | State::WaitForSessionId => {}
            State::Polling => {
                // Going alone was already handled by the event pump.
                if next != State::WaitingForPlayers {
                    self.core.poll.clear();
                }
            }
            State::Pushing => self.core.push.stop().await,
            State::VersionCheck
            | State::Connecting
            | State::RegisterInSession
            | State::WaitingForPlayers
            | State::Reconnecting
            | State::Disconnecting => self.core.scheduler.cancel_current(),
        }
    }

    async fn teardown(&mut self) {
        self.core.scheduler.cancel_current();
        self.core.scheduler.wait_current().await;
        self.core.push.stop().await;
        self.core.poll.clear();
        self.core.transport.lock().await.close().await;
    }
}

async fn pump_events(core: Arc<Core>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    loop {
        let event = tokio::select! {
            biased;
            () = core.shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        core.handle_event(event).await;
    }
    tracing::debug!("Event pump stopped");
}

/// Handle to a running coordinator.
///
/// Must be created inside a Tokio runtime. Dropping the handle stops the
/// background tasks without leaving the session; use
/// [`shutdown`](Self::shutdown) for an orderly exit.
pub struct SyncCoordinator {
    core: Arc<Core>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncCoordinator {
    /// Coordinator talking to the configured server over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns error if the server URL is invalid or the HTTP client for the
    /// version probe cannot be created.
    pub fn from_config(config: &SyncConfig) -> anyhow::Result<Self> {
        let endpoints = config.endpoints()?;
        let connector = Arc::new(WsConnector::from_endpoints(&endpoints));
        let version = HttpVersionFetcher::new(&endpoints, config.version_timeout)
            .context("Failed to create version fetcher")?;
        Ok(Self::new(config, connector, Arc::new(version)))
    }

    /// Coordinator over explicit collaborators, merging with the default policy.
    #[must_use]
    pub fn new(
        config: &SyncConfig,
        connector: Arc<dyn Connector>,
        version: Arc<dyn VersionFetcher>,
    ) -> Self {
        Self::build(config, connector, version, PollEngine::new())
    }

    /// Coordinator whose poll mirror merges with `policy`.
    #[must_use]
    pub fn with_merge_policy(
        config: &SyncConfig,
        connector: Arc<dyn Connector>,
        version: Arc<dyn VersionFetcher>,
        policy: impl MergePolicy + 'static,
    ) -> Self {
        Self::build(config, connector, version, PollEngine::with_policy(policy))
    }

    fn build(
        config: &SyncConfig,
        connector: Arc<dyn Connector>,
        version: Arc<dyn VersionFetcher>,
        poll: PollEngine,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = TransportClient::new(connector, config.connect, events_tx).shared();

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let triggers = TriggerQueue { tx: queue_tx };

        let on_send_failed: SendFailedHook = {
            let triggers = triggers.clone();
            Arc::new(move |_: &TransportError| triggers.fire(Trigger::SendingError))
        };
        let push = PushEngine::new(Arc::clone(&transport), config.push, on_send_failed);

        let core = Arc::new(Core {
            triggers,
            mode: watch::Sender::new(SyncMode::Idle),
            state: watch::Sender::new(State::Idle),
            session_id: Mutex::new(None),
            player_name: Mutex::new(config.player_name.clone()),
            transport,
            version,
            scheduler: OperationScheduler::new(),
            push,
            poll,
            player_wait_timeout: config.player_wait_timeout,
            shutdown: CancellationToken::new(),
        });

        let machine = Machine {
            actions: Actions::new(&core),
            core: Arc::clone(&core),
            state: State::Idle,
        };

        let tasks = vec![
            tokio::spawn(machine.run(queue_rx)),
            tokio::spawn(pump_events(Arc::clone(&core), events_rx)),
        ];

        Self { core, tasks }
    }

    /// Select the sync direction.
    pub fn set_mode(&self, mode: SyncMode) {
        self.core.triggers.fire(Trigger::from(mode));
    }

    /// Set the session to join. Unchanged or blank ids are ignored.
    pub fn set_session_id(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        if session_id.trim().is_empty() {
            tracing::warn!("Ignoring blank session id");
            return;
        }

        {
            let mut current = lock(&self.core.session_id);
            if current.as_deref() == Some(session_id.as_str()) {
                return;
            }
            *current = Some(session_id.clone());
        }
        self.core.poll.clear();

        tracing::debug!(session_id = %session_id, "Using session id");
        self.core.triggers.fire(Trigger::SessionIdChanged);
    }

    /// Set or clear the name announced on the next fresh connection.
    pub fn set_player_name(&self, name: Option<String>) {
        *lock(&self.core.player_name) = name.filter(|n| !n.trim().is_empty());
    }

    /// Current session id.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.core.session_id()
    }

    /// Current sync mode.
    #[must_use]
    pub fn mode(&self) -> SyncMode {
        self.core.mode()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        *self.core.state.borrow()
    }

    /// Watch sync mode changes.
    #[must_use]
    pub fn subscribe_mode(&self) -> watch::Receiver<SyncMode> {
        self.core.mode.subscribe()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<State> {
        self.core.state.subscribe()
    }

    /// Offer a local snapshot for pushing. See [`PushEngine::push_local`].
    pub fn push_local(&self, snapshot: EntitySnapshot) -> bool {
        self.core.push.push_local(snapshot)
    }

    /// Exclusive access to the mirrored entities.
    pub fn borrow(&self) -> Borrow<'_> {
        self.core.poll.borrow()
    }

    /// Leave the session, close the transport and stop background tasks.
    pub async fn shutdown(mut self) {
        self.set_mode(SyncMode::Idle);

        let mut state = self.subscribe_state();
        let settled = tokio::time::timeout(SHUTDOWN_GRACE, state.wait_for(|s| *s == State::Idle))
            .await
            .is_ok_and(|r| r.is_ok());
        if !settled {
            tracing::warn!("Coordinator did not reach Idle in time, stopping anyway");
        }

        self.core.shutdown.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Coordinator task panicked");
                }
            }
        }
        tracing::info!("Coordinator stopped");
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.core.shutdown.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
