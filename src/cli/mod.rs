//! Command-line interface
//!
//! Provides:
//! - `run`: a conductor against a simulated fleet loaded from an inventory
//! - `check-config`: configuration validation
//! - `default-config`: the default configuration as YAML

use crate::conductor::Conductor;
use crate::config::ConductorConfig;
use crate::error::{ConductorError, Result};
use crate::gateway::SimulatedGateway;
use crate::logging;
use crate::notify::NotificationDispatcher;
use crate::store::InMemoryStore;
use crate::types::{Node, PowerState};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a conductor against a simulated fleet until Ctrl+C
    Run {
        /// Configuration file (created with defaults if missing)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// YAML inventory of nodes and their simulated BMC state
        #[arg(short, long)]
        inventory: PathBuf,
    },
    /// Validate a configuration file
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the default configuration
    DefaultConfig,
}

/// One node in a simulation inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub id: String,
    #[serde(default)]
    pub conductor_group: String,
    /// Recorded power state the datastore starts with
    #[serde(default = "default_recorded_state")]
    pub power_state: PowerState,
    /// Actual BMC state; a node without one is unreachable
    #[serde(default)]
    pub hardware: Option<PowerState>,
}

fn default_recorded_state() -> PowerState {
    PowerState::Unknown
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub nodes: Vec<InventoryEntry>,
}

impl Inventory {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConductorError::config(format!("Failed to read inventory {:?}: {}", path, e)))?;
        let inventory: Self = serde_yaml::from_str(&content)?;
        Ok(inventory)
    }

    /// Enroll every node in `store` and register its BMC with `gateway`
    pub fn seed(&self, store: &InMemoryStore, gateway: &SimulatedGateway) {
        for entry in &self.nodes {
            store.insert_node(
                Node::new(entry.id.clone(), entry.conductor_group.clone()).with_power_state(entry.power_state),
            );
            if let Some(state) = entry.hardware {
                gateway.set_state(&entry.id, state);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct CliHandler;

impl CliHandler {
    pub fn new() -> Self {
        Self
    }

    pub async fn handle(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Run { config, inventory } => self.run(config, &inventory).await,
            Commands::CheckConfig { config } => self.check_config(&config),
            Commands::DefaultConfig => self.default_config(),
        }
    }

    async fn run(&self, config_path: Option<PathBuf>, inventory_path: &Path) -> Result<()> {
        let config_path = config_path.unwrap_or_else(ConductorConfig::default_path);
        let config = ConductorConfig::load(&config_path)?;
        logging::init(&config.logging)?;

        let inventory = Inventory::load(inventory_path)?;
        let store = InMemoryStore::new();
        let gateway = SimulatedGateway::new();
        inventory.seed(&store, &gateway);
        info!(nodes = inventory.nodes.len(), "Loaded simulated fleet from {:?}", inventory_path);

        let dispatcher = NotificationDispatcher::from_config(&config)?;
        let conductor = Conductor::new(config, Arc::new(store), Arc::new(gateway), dispatcher);

        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        ctrlc::set_handler(move || {
            let _ = tx.blocking_send(());
        })?;

        conductor.start().await?;
        info!(conductor_id = conductor.id(), "Running; press Ctrl+C to stop");
        rx.recv().await;

        info!("Shutdown requested");
        conductor.stop().await
    }

    fn check_config(&self, path: &Path) -> Result<()> {
        let config = ConductorConfig::load_from_file(path)?;
        println!(
            "{:?} is valid (conductor {}, group {:?}, policy {:?})",
            path, config.conductor_id, config.conductor_group, config.sync_policy
        );
        Ok(())
    }

    fn default_config(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&ConductorConfig::default())?;
        print!("{}", yaml);
        Ok(())
    }
}
