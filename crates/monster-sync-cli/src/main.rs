//! # monster-sync CLI
//!
//! Command-line utilities for inspecting endpoints, frames and servers.

use anyhow::{Context, Result};
use monster_sync_core::EntitySnapshot;
use monster_sync_proto::{positional, Endpoints, SessionMessage, REQUIRED_VERSION};
use monster_sync_transport::{is_supported, HttpVersionFetcher, VersionFetcher};
use serde_json::json;
use std::env;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "endpoints" => {
            let url = required(&args, "endpoints <server-url>");
            let endpoints = Endpoints::from_base_url(url).context("Failed to derive endpoints")?;
            println!("base:      {}", endpoints.base());
            println!("websocket: {}", endpoints.websocket());
            println!("version:   {}", endpoints.version());
        }
        "decode" => {
            let frame = required(&args, "decode <json-frame>");
            let message = SessionMessage::from_json(frame).context("Failed to decode frame")?;
            println!("{message:#?}");
        }
        "entity" => {
            let text = required(&args, "entity <positional-json>");
            let entity = positional::from_json(text).context("Failed to decode entity")?;
            println!("{}", serde_json::to_string_pretty(&entity_summary(&entity))?);
        }
        "version" => {
            let url = required(&args, "version <server-url>");
            let endpoints = Endpoints::from_base_url(url).context("Failed to derive endpoints")?;
            let fetcher = HttpVersionFetcher::new(&endpoints, PROBE_TIMEOUT)
                .context("Failed to create HTTP client")?;
            let remote = fetcher
                .fetch_version()
                .await
                .with_context(|| format!("Failed to query {}", fetcher.url()))?;

            if is_supported(&remote) {
                println!("{remote} (supported)");
            } else {
                println!("{remote} (unsupported, client requires {REQUIRED_VERSION})");
                std::process::exit(2);
            }
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn required<'a>(args: &'a [String], usage: &str) -> &'a str {
    if let Some(arg) = args.get(2) {
        arg
    } else {
        eprintln!("Usage: monster-sync {usage}");
        std::process::exit(1);
    }
}

fn entity_summary(entity: &EntitySnapshot) -> serde_json::Value {
    let parts: Vec<_> = entity
        .parts
        .iter()
        .map(|p| json!({"index": p.index, "health": p.health}))
        .collect();
    let ailments: Vec<_> = entity
        .ailments
        .iter()
        .map(|a| json!({"index": a.index, "buildup": a.buildup}))
        .collect();

    json!({"id": entity.id, "parts": parts, "ailments": ailments})
}

fn print_help() {
    println!(
        r#"monster-sync CLI

USAGE:
    monster-sync <COMMAND> [ARGS]

COMMANDS:
    endpoints <url>     Show the WebSocket and version endpoints for a server
    decode <frame>      Decode a JSON protocol frame
    entity <json>       Decode a positionally encoded entity
    version <url>       Query a server's protocol version
    help                Show this help message

EXAMPLES:
    monster-sync endpoints https://amadare-mhw-sync.herokuapp.com
    monster-sync decode '{{"type":"SessionState","playersCount":2}}'
    monster-sync entity '["em_001",[[0,97.5]],[]]'
"#
    );
}
