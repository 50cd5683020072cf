// Examples are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Transaction Example
//!
//! Sets up the agent runtime, reports a few requests with nested spans and
//! shuts down.
//!
//! # Usage
//!
//! ```bash
//! # Offline: an in-process stand-in core agent and a local archive
//! cargo run --example transaction
//!
//! # Against a real core agent, configured from SCOUT_* variables
//! SCOUT_NAME=demo SCOUT_KEY=... SCOUT_CORE_AGENT_VERSION=v1.4.0 \
//!     cargo run --example transaction -- --live
//! ```

use std::time::Duration;

use scout_apm::prelude::*;
use scout_apm::provision::{ProvisionOptions, Provisioner};
use scout_test::{AgentArchive, MockCoreAgent};

const VERSION: &str = "v1.4.0";

async fn handle(scout: &Scout, path: &str) -> usize {
    scout
        .transaction(&format!("GET {path}"), |request| async move {
            request.tag_path(path).await;
            request.add_tag("user_id", 42).await;

            let rows = instrument("SQL/users/select", |span| async move {
                tokio::time::sleep(Duration::from_millis(15)).await;
                if let Some(span) = span {
                    span.add_tag("db.statement", "SELECT * FROM users").await;
                }
                3
            })
            .await;

            instrument_sync("Template/render", |_| {
                instrument_sync("Template/partial", |_| std::thread::sleep(Duration::from_millis(2)));
            });
            rows
        })
        .await
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let live = std::env::args().any(|a| a == "--live");

    let mut config = ScoutConfig::new(VERSION).with_env_overlay(std::env::vars())?;
    config.ignore.push("/health".into());
    scout_apm::logging::init(&config);

    // Offline mode keeps these alive until shutdown.
    let scratch = tempfile::tempdir()?;
    let mut agent = None;
    let mut scout = Scout::new(config.clone());

    if !live {
        let mock = MockCoreAgent::start().await?;
        config.core_agent_dir = scratch.path().join("cache");
        config.download_url = format!("file://{}", scratch.path().display());
        config.core_agent_launch = false;
        config.socket_path = Some(mock.socket().uri());

        let options = ProvisionOptions::from_config(&config);
        let bundle = Provisioner::new(options.clone())
            .bundle_name(&scout_apm::core::CoreAgentVersion::parse(VERSION)?)?;
        AgentArchive::new(VERSION).write(scratch.path(), &bundle)?;

        scout = Scout::new(config).with_provision_options(options);
        agent = Some(mock);
    }

    let mut events = scout.subscribe();
    scout.setup().await?;
    println!("[SETUP] core agent at {}", scout.socket_path().await.unwrap_or_default());

    for path in ["/users?password=hunter2&page=2", "/health/live", "/users/7"] {
        let rows = handle(&scout, path).await;
        println!("[REQUEST] {path} -> {rows} rows");
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = events.try_recv() {
        println!("[EVENT] {event:?}");
    }

    if let Some(agent) = &agent {
        println!("[AGENT] received {} messages", agent.received().len());
        for message in agent.received() {
            println!("[AGENT]   {:?}", message.kind());
        }
    }

    scout.shutdown().await?;
    println!("[SHUTDOWN] done");
    Ok(())
}
