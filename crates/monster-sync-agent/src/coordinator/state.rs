//! States, triggers and the transition table.

use std::fmt;

/// Sync direction chosen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncMode {
    /// Not syncing
    #[default]
    Idle,
    /// Mirror a leader's entities
    Poll,
    /// Stream local entities as leader
    Push,
}

/// Coordinator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    /// Disconnected, nothing running
    #[default]
    Idle,
    /// Probing the server's protocol version
    VersionCheck,
    /// Version ok, no session id yet
    WaitForSessionId,
    /// Opening the transport
    Connecting,
    /// Announcing session id and role
    RegisterInSession,
    /// Registered, alone in the session
    WaitingForPlayers,
    /// Mirroring inbound pushes
    Polling,
    /// Sending local snapshots
    Pushing,
    /// Replacing a failed link
    Reconnecting,
    /// Leaving the session and closing the transport
    Disconnecting,
}

/// Events that drive the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Host selected push mode
    SetPush,
    /// Host selected poll mode
    SetPoll,
    /// Host stopped syncing
    SetIdle,
    /// Host changed the session id
    SessionIdChanged,
    /// Server reports one participant
    AloneInSession,
    /// Server reports other participants
    NotAloneInSession,
    /// Server version matches
    VersionOk,
    /// Server version does not match
    WrongVersion,
    /// A send failed or the server was unreachable
    SendingError,
    /// The link could not be opened or was lost
    ConnectionFailed,
    /// The link is open
    Connected,
    /// Nobody joined in time
    PlayerWaitingTimeout,
    /// Transport closed after leaving
    Disconnected,
}

impl Trigger {
    /// Mode selected by a mode trigger.
    #[must_use]
    pub fn mode(self) -> Option<SyncMode> {
        match self {
            Self::SetIdle => Some(SyncMode::Idle),
            Self::SetPoll => Some(SyncMode::Poll),
            Self::SetPush => Some(SyncMode::Push),
            _ => None,
        }
    }
}

impl From<SyncMode> for Trigger {
    fn from(mode: SyncMode) -> Self {
        match mode {
            SyncMode::Idle => Self::SetIdle,
            SyncMode::Poll => Self::SetPoll,
            SyncMode::Push => Self::SetPush,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where a permitted trigger leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    To(State),
    /// Exit and enter the current state again
    Reenter,
    /// `Polling` or `Pushing` by mode
    WorkingState,
    /// `Connecting` with a session id, else `WaitForSessionId`
    SessionOrWait,
    /// `RegisterInSession` with a session id, else `WaitForSessionId`
    RegisterOrWait,
}

/// Inputs to resolver targets.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Context {
    pub mode: SyncMode,
    pub has_session: bool,
}

impl Target {
    pub(crate) fn resolve(self, current: State, ctx: Context) -> State {
        match self {
            Self::To(state) => state,
            Self::Reenter => current,
            Self::WorkingState => {
                if ctx.mode == SyncMode::Poll {
                    State::Polling
                } else {
                    State::Pushing
                }
            }
            Self::SessionOrWait => {
                if ctx.has_session {
                    State::Connecting
                } else {
                    State::WaitForSessionId
                }
            }
            Self::RegisterOrWait => {
                if ctx.has_session {
                    State::RegisterInSession
                } else {
                    State::WaitForSessionId
                }
            }
        }
    }
}

/// Transition table. `None` means the trigger is ignored in `state`.
pub(crate) fn transition(state: State, trigger: Trigger) -> Option<Target> {
    use State as S;
    use Target::{Reenter, RegisterOrWait, SessionOrWait, To, WorkingState};
    use Trigger as T;

    let target = match (state, trigger) {
        (S::Idle, T::SetPush | T::SetPoll) => To(S::VersionCheck),

        (S::VersionCheck, T::SetIdle | T::WrongVersion | T::SendingError) => To(S::Idle),
        (S::VersionCheck, T::VersionOk) => SessionOrWait,

        (S::WaitForSessionId, T::SessionIdChanged) => To(S::Connecting),
        (S::WaitForSessionId, T::SetIdle) => To(S::Idle),

        (S::Connecting, T::Connected) => To(S::RegisterInSession),
        (S::Connecting, T::ConnectionFailed) => To(S::Idle),
        (S::Connecting, T::SetIdle) => To(S::Disconnecting),

        (S::RegisterInSession, T::SessionIdChanged | T::SetPush | T::SetPoll) => Reenter,
        (S::RegisterInSession, T::AloneInSession) => To(S::WaitingForPlayers),
        (S::RegisterInSession, T::NotAloneInSession) => WorkingState,
        (S::RegisterInSession, T::SendingError | T::ConnectionFailed) => To(S::Reconnecting),
        (S::RegisterInSession, T::SetIdle) => To(S::Disconnecting),

        (S::WaitingForPlayers, T::NotAloneInSession) => WorkingState,
        (S::WaitingForPlayers, T::SessionIdChanged | T::SetPush | T::SetPoll) => {
            To(S::RegisterInSession)
        }
        (S::WaitingForPlayers, T::SendingError | T::ConnectionFailed) => To(S::Reconnecting),
        (S::WaitingForPlayers, T::SetIdle | T::PlayerWaitingTimeout) => To(S::Disconnecting),

        (S::Polling, T::SetPush) => To(S::Pushing),
        (S::Pushing, T::SetPoll) => To(S::Polling),
        (S::Polling | S::Pushing, T::SessionIdChanged) => To(S::RegisterInSession),
        (S::Polling | S::Pushing, T::SendingError | T::ConnectionFailed) => To(S::Reconnecting),
        (S::Polling | S::Pushing, T::AloneInSession) => To(S::WaitingForPlayers),
        (S::Polling | S::Pushing, T::SetIdle) => To(S::Disconnecting),

        (S::Reconnecting, T::Connected) => RegisterOrWait,
        (S::Reconnecting, T::ConnectionFailed) => To(S::Idle),
        (S::Reconnecting, T::SetIdle) => To(S::Disconnecting),

        (S::Disconnecting, T::Disconnected) => To(S::Idle),
        (S::Disconnecting, T::SetPush | T::SetPoll) => To(S::Connecting),

        _ => return None,
    };
    Some(target)
}
