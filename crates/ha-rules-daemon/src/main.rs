//! Home automation rules daemon
//!
//! Loads the configuration, starts an in-process hub seeded with the
//! configured entities, registers the bundled apps and dispatches hub events
//! until interrupted.

mod apps;

use anyhow::{Context as _, Result};
use chrono::NaiveTime;
use clap::Parser;
use ha_config::{DaemonConfig, DEFAULT_CONFIG_FILE};
use ha_core::ServiceCall;
use ha_hub::LocalHub;
use ha_rules::RulesEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ha-rules", version, about = "Home automation rules daemon", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "HA_RULES_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DaemonConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_target(true)
        .init();

    info!(config = %cli.config.display(), "Starting rules daemon");

    let hub = Arc::new(LocalHub::with_capacity(config.engine.event_buffer));
    for seed in config.hub.entities {
        hub.add_entity(seed.entity_id, seed.state, seed.attributes);
    }
    hub.register_script("notify", |call: ServiceCall| async move {
        info!(context = %call.context.id, "Script notify called");
        Ok(())
    });

    let engine = RulesEngine::connect(hub.clone(), config.engine).await?;

    let lights_off_at = NaiveTime::from_hms_opt(23, 30, 0).context("invalid lights-off time")?;
    let failures = engine.load_apps(&apps::default_apps(lights_off_at));
    if !failures.is_empty() {
        warn!(failed = failures.len(), "Some apps failed to load");
    }
    info!(rules = engine.rule_count(), "Rules daemon is running");

    let runner = engine.clone();
    let mut dispatch = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down...");
            engine.shutdown();
            (&mut dispatch).await??;
        }
        result = &mut dispatch => result??,
    }

    Ok(())
}
