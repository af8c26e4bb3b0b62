//! Entry action bodies.
//!
//! Each body runs on the scheduler with its own token. Triggers it fires are
//! scoped to that token, so a body that lost the race against a newer state
//! cannot move the machine.

use super::{Core, Trigger};
use crate::coordinator::SyncMode;
use monster_sync_proto::{SessionMessage, SetName, SetSession, REQUIRED_VERSION};
use monster_sync_transport::{is_supported, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Upper bound for the best-effort `LeaveSession`.
const LEAVE_TIMEOUT: Duration = Duration::from_secs(2);

pub(super) async fn check_version(core: Arc<Core>, token: CancellationToken) -> anyhow::Result<()> {
    let fetched = tokio::select! {
        biased;
        () = token.cancelled() => {
            tracing::trace!("Version check cancelled");
            return Ok(());
        }
        fetched = core.version.fetch_version() => fetched,
    };

    match fetched {
        Ok(version) if is_supported(&version) => {
            tracing::info!(version = %version, "Server version is supported");
            core.triggers.fire_scoped(Trigger::VersionOk, &token);
        }
        Ok(version) => {
            tracing::warn!(
                server_version = %version,
                required = REQUIRED_VERSION,
                "Server version mismatch, please update the plugin"
            );
            core.triggers.fire_scoped(Trigger::WrongVersion, &token);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Couldn't reach sync server, syncing disabled until restarted");
            core.triggers.fire_scoped(Trigger::SendingError, &token);
        }
    }
    Ok(())
}

/// Open the transport, announcing the player name on a fresh link.
///
/// With `replace_link` any existing link is closed first.
pub(super) async fn connect(
    core: Arc<Core>,
    token: CancellationToken,
    replace_link: bool,
) -> anyhow::Result<()> {
    let mut transport = tokio::select! {
        biased;
        () = token.cancelled() => return Ok(()),
        transport = core.transport.lock() => transport,
    };

    if replace_link {
        transport.close().await;
    }

    tracing::info!(endpoint = %transport.endpoint(), "Connecting");

    let result = match transport.connect(&token).await {
        Ok(true) => match core.player_name() {
            Some(name) => {
                tracing::debug!(name = %name, "Sending player name");
                transport
                    .send(&SessionMessage::from(SetName { name }), &token)
                    .await
            }
            None => Ok(()),
        },
        Ok(false) => Ok(()),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            drop(transport);
            core.triggers.fire_scoped(Trigger::Connected, &token);
        }
        Err(TransportError::Cancelled) => tracing::trace!("Connect cancelled"),
        Err(e) => {
            tracing::error!(error = %e, "Connection failed, no monster updates will be available");
            transport.close().await;
            drop(transport);
            core.triggers.fire_scoped(Trigger::ConnectionFailed, &token);
        }
    }
    Ok(())
}

pub(super) async fn register(core: Arc<Core>, token: CancellationToken) -> anyhow::Result<()> {
    let Some(session_id) = core.session_id() else {
        anyhow::bail!("no session id to register with");
    };
    let is_leader = core.mode() == SyncMode::Push;
    let message = SessionMessage::from(SetSession {
        session_id: session_id.clone(),
        is_leader,
    });

    let sent = tokio::select! {
        biased;
        () = token.cancelled() => return Ok(()),
        mut transport = core.transport.lock() => transport.send(&message, &token).await,
    };

    match sent {
        Ok(()) => tracing::info!(
            session_id = %session_id,
            role = if is_leader { "leader" } else { "peer" },
            "Registered in session"
        ),
        Err(TransportError::Cancelled) => tracing::trace!("Register cancelled"),
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to register in session");
            core.triggers.fire_scoped(Trigger::SendingError, &token);
        }
    }
    Ok(())
}

pub(super) async fn wait_for_players(core: Arc<Core>, token: CancellationToken) -> anyhow::Result<()> {
    let timeout = core.player_wait_timeout;
    tokio::select! {
        biased;
        () = token.cancelled() => {
            tracing::trace!("Player wait cancelled");
            return Ok(());
        }
        () = tokio::time::sleep(timeout) => {}
    }

    tracing::info!(timeout_secs = timeout.as_secs(), "No players joined, closing connection");
    core.triggers.fire_scoped(Trigger::PlayerWaitingTimeout, &token);
    Ok(())
}

/// Leave the session and close the transport. Not interrupted by `token`;
/// only the final `Disconnected` is scoped to it.
pub(super) async fn disconnect(core: Arc<Core>, token: CancellationToken) -> anyhow::Result<()> {
    {
        let mut transport = core.transport.lock().await;
        if transport.is_connected() {
            let leave = SessionMessage::LeaveSession;
            let uncancelled = CancellationToken::new();
            match tokio::time::timeout(LEAVE_TIMEOUT, transport.send(&leave, &uncancelled)).await {
                Ok(Ok(())) => tracing::debug!("Left session"),
                Ok(Err(e)) => tracing::debug!(error = %e, "Failed to leave session"),
                Err(_) => tracing::debug!("Leaving session timed out"),
            }
        }
        transport.close().await;
    }

    core.triggers.fire_scoped(Trigger::Disconnected, &token);
    Ok(())
}
