//! # Monster-Sync Demo Agent
//!
//! Runs one coordinator against the configured server. In push mode it
//! streams a generated monster at scan cadence; in poll mode it logs the
//! mirrored monsters once per second.
//!
//! Besides the [`SyncConfig`] variables it reads `MONSTER_SYNC_SESSION_ID`
//! (required) and `MONSTER_SYNC_MODE` (`push` or `poll`, default `poll`).

use anyhow::{bail, Context, Result};
use monster_sync_agent::{SyncConfig, SyncCoordinator, SyncMode};
use monster_sync_core::EntitySnapshot;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const MOCK_MONSTER_ID: &str = "em_001";
const MOCK_PART_COUNT: u32 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting monster-sync agent"
    );

    let config = SyncConfig::from_env()?;
    let mode = parse_mode(&std::env::var("MONSTER_SYNC_MODE").unwrap_or_else(|_| "poll".to_string()))?;
    let session_id =
        std::env::var("MONSTER_SYNC_SESSION_ID").context("MONSTER_SYNC_SESSION_ID is required")?;

    let coordinator = SyncCoordinator::from_config(&config)?;
    coordinator.set_session_id(session_id);
    coordinator.set_mode(mode);

    let period = match mode {
        SyncMode::Push => config.push.scan_interval,
        _ => Duration::from_secs(1),
    };
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tracing::info!(mode = ?mode, "Agent running, press Ctrl+C to stop");

    let mut tick: u32 = 0;
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl+C")?;
                break;
            }
            _ = ticker.tick() => {
                tick = tick.wrapping_add(1);
                match mode {
                    SyncMode::Push => {
                        coordinator.push_local(mock_monster(tick));
                    }
                    _ => log_mirror(&coordinator),
                }
            }
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

fn parse_mode(raw: &str) -> Result<SyncMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "push" => Ok(SyncMode::Push),
        "poll" => Ok(SyncMode::Poll),
        other => bail!("Invalid MONSTER_SYNC_MODE '{other}', expected push or poll"),
    }
}

/// Monster with every part's health wandering between 97 and 100.
fn mock_monster(tick: u32) -> EntitySnapshot {
    const HEALTH: [f32; 4] = [100.0, 99.0, 98.0, 97.0];

    (0..MOCK_PART_COUNT).fold(EntitySnapshot::new(MOCK_MONSTER_ID), |monster, index| {
        let wobble = tick.wrapping_mul(7).wrapping_add(index.wrapping_mul(13)) % 4;
        monster.with_part(index, HEALTH[wobble as usize])
    })
}

fn log_mirror(coordinator: &SyncCoordinator) {
    let mirror = coordinator.borrow();
    for (id, monster) in mirror.iter() {
        tracing::info!(
            id = %id,
            parts = monster.parts.len(),
            ailments = monster.ailments.len(),
            first_part_health = monster.parts.first().map(|p| p.health),
            "Mirrored monster"
        );
    }
    if mirror.is_empty() {
        tracing::debug!(state = %coordinator.state(), "Nothing mirrored yet");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names() {
        assert_eq!(parse_mode("Push").unwrap(), SyncMode::Push);
        assert_eq!(parse_mode(" poll ").unwrap(), SyncMode::Poll);
        assert!(parse_mode("idle").is_err());
    }

    #[test]
    fn mock_monster_shape() {
        let monster = mock_monster(3);
        assert_eq!(monster.id, MOCK_MONSTER_ID);
        assert_eq!(monster.parts.len(), 30);
        assert!(monster
            .parts
            .iter()
            .all(|p| (97.0..=100.0).contains(&p.health)));
    }
}
