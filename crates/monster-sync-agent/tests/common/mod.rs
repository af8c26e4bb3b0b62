//! Shared fakes for coordinator tests: a scripted version probe and an
//! in-process relay server.

#![allow(dead_code)]

use async_trait::async_trait;
use monster_sync_agent::{State, SyncConfig, SyncCoordinator};
use monster_sync_proto::{SessionMessage, SessionState, REQUIRED_VERSION};
use monster_sync_transport::{
    MemoryConnector, RetryPolicy, ServerConn, ServerSender, VersionError, VersionFetcher,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Upper bound for anything a test waits on.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Fast retries, long player wait.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        connect: RetryPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(20),
        },
        player_wait_timeout: Duration::from_secs(60),
        ..SyncConfig::default()
    }
}

enum Answer {
    Version(String),
    Unreachable,
    Hang,
}

/// Version probe with a fixed answer.
pub struct FakeVersion {
    answer: Answer,
    calls: AtomicUsize,
}

impl FakeVersion {
    fn with(answer: Answer) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::version(REQUIRED_VERSION)
    }

    pub fn version(version: &str) -> Arc<Self> {
        Self::with(Answer::Version(version.to_string()))
    }

    pub fn unreachable() -> Arc<Self> {
        Self::with(Answer::Unreachable)
    }

    pub fn hanging() -> Arc<Self> {
        Self::with(Answer::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersionFetcher for FakeVersion {
    async fn fetch_version(&self) -> Result<String, VersionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            Answer::Version(version) => Ok(version.clone()),
            Answer::Unreachable => Err(VersionError::Request("connection refused".to_string())),
            Answer::Hang => std::future::pending().await,
        }
    }
}

struct Member {
    conn: usize,
    leader: bool,
    sender: ServerSender,
}

#[derive(Default)]
struct RelayInner {
    sessions: Mutex<HashMap<String, Vec<Member>>>,
    log: Mutex<Vec<(usize, SessionMessage)>>,
    connections: AtomicUsize,
    kick: Mutex<CancellationToken>,
}

/// Minimal sync server: tracks session membership, answers every join or
/// leave with `SessionState` and forwards pushes to the other members.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl Relay {
    pub fn spawn(mut accept: mpsc::UnboundedReceiver<ServerConn>) -> Self {
        let relay = Self {
            inner: Arc::new(RelayInner::default()),
        };

        let acceptor = relay.clone();
        tokio::spawn(async move {
            while let Some(conn) = accept.recv().await {
                let id = acceptor.inner.connections.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(acceptor.clone().serve(id, conn));
            }
        });

        relay
    }

    async fn serve(self, id: usize, mut conn: ServerConn) {
        let kick = self.inner.kick.lock().unwrap().clone();
        let sender = conn.sender();

        loop {
            let message = tokio::select! {
                () = kick.cancelled() => break,
                message = conn.recv() => message,
            };
            let Some(message) = message else { break };

            self.inner.log.lock().unwrap().push((id, message.clone()));

            match message {
                SessionMessage::SetSession(set) => {
                    self.leave(id);
                    self.join(
                        &set.session_id,
                        Member {
                            conn: id,
                            leader: set.is_leader,
                            sender: sender.clone(),
                        },
                    );
                }
                SessionMessage::PushSnapshots(push) => {
                    let session_id = push.session_id.clone();
                    self.forward(id, &session_id, &SessionMessage::PushSnapshots(push));
                }
                SessionMessage::LeaveSession => self.leave(id),
                _ => {}
            }
        }

        self.leave(id);
    }

    fn join(&self, session_id: &str, member: Member) {
        let mut sessions = self.inner.sessions.lock().unwrap();
        let members = sessions.entry(session_id.to_string()).or_default();
        members.push(member);
        broadcast_state(members);
    }

    fn leave(&self, conn: usize) {
        let mut sessions = self.inner.sessions.lock().unwrap();
        for members in sessions.values_mut() {
            if let Some(pos) = members.iter().position(|m| m.conn == conn) {
                members.remove(pos);
                broadcast_state(members);
            }
        }
    }

    fn forward(&self, from: usize, session_id: &str, message: &SessionMessage) {
        let sessions = self.inner.sessions.lock().unwrap();
        if let Some(members) = sessions.get(session_id) {
            for member in members.iter().filter(|m| m.conn != from) {
                member.sender.send(message);
            }
        }
    }

    /// Drop every open connection.
    pub fn kick_all(&self) {
        let mut kick = self.inner.kick.lock().unwrap();
        kick.cancel();
        *kick = CancellationToken::new();
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    /// Every message received, with the connection it came from.
    pub fn received(&self) -> Vec<(usize, SessionMessage)> {
        self.inner.log.lock().unwrap().clone()
    }

    /// Number of received messages of the given kind.
    pub fn count(&self, kind: &str) -> usize {
        self.inner
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, m)| m.kind() == kind)
            .count()
    }
}

fn broadcast_state(members: &[Member]) {
    let state = SessionMessage::SessionState(SessionState {
        players_count: u32::try_from(members.len()).unwrap(),
        leader_connected: members.iter().any(|m| m.leader),
    });
    for member in members {
        member.sender.send(&state);
    }
}

/// Relay plus a connector dialing it.
pub fn relay() -> (Arc<MemoryConnector>, Relay) {
    let (connector, accept) = MemoryConnector::new("mem://relay");
    (connector, Relay::spawn(accept))
}

/// Wait until the coordinator publishes `expected`.
pub async fn wait_for_state(coordinator: &SyncCoordinator, expected: State) {
    let mut states = coordinator.subscribe_state();
    let reached = tokio::time::timeout(TIMEOUT, states.wait_for(|s| *s == expected))
        .await
        .is_ok_and(|r| r.is_ok());
    assert!(
        reached,
        "timed out waiting for {expected}, coordinator is in {}",
        coordinator.state()
    );
}

/// Poll `check` until it holds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
