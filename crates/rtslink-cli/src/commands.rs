//! Command handlers for the rtslink CLI

use std::time::Duration;

use rtslink_ble::{BleConnection, BleDiscovery};
use rtslink_core::{spawn_session, FileKeyStore, KeyStore};
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::console::Console;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Scan { timeout } => Self::handle_scan_command(config, timeout).await,
            Commands::Connect { name, pin, fresh } => {
                Self::handle_connect_command(config, name, pin, fresh).await
            }
            Commands::Config => {
                print!("{}", AppConfig::example_config()?);
                Ok(())
            }
        }
    }

    /// List robots in range
    async fn handle_scan_command(mut config: AppConfig, timeout: Option<u64>) -> Result<()> {
        if let Some(secs) = timeout {
            config.ble.scan_timeout = Duration::from_secs(secs);
        }

        let mut discovery = BleDiscovery::new(config.ble.clone());
        discovery.initialize_adapter().await?;
        let robots = discovery.scan().await?;

        if robots.is_empty() {
            println!("No robots found");
        }
        for robot in robots {
            let rssi = robot
                .rssi
                .map(|rssi| format!("{} dBm", rssi))
                .unwrap_or_else(|| "-".to_string());
            println!("{:<20} {:<20} {}", robot.name, robot.address, rssi);
        }
        Ok(())
    }

    /// Connect, pair and run the operator console
    async fn handle_connect_command(
        mut config: AppConfig,
        name: String,
        pin: Option<String>,
        fresh: bool,
    ) -> Result<()> {
        if fresh {
            config.session.reuse_saved_sessions = false;
        }

        let store = Self::open_key_store(&config);

        let mut discovery = BleDiscovery::new(config.ble.clone());
        discovery.initialize_adapter().await?;
        let robot = discovery.find(&name).await?;
        info!("Connecting to {} ({})", robot.name, robot.address);

        let link = BleConnection::new(config.ble.clone()).connect(&robot).await?;
        let (client, events, task) = spawn_session(
            config.session.clone(),
            robot.name.clone(),
            link.inbound,
            link.outbound,
            store,
        );

        let console = Console::new(
            robot.name.clone(),
            client,
            events,
            config.download_dir(),
            pin,
        );
        let result = console.run().await;

        link.handle.disconnect().await;
        match task.await {
            Ok(Ok(stats)) => info!("Session ended: {:?}", stats),
            Ok(Err(e)) => warn!("Session ended with error: {}", e),
            Err(e) => warn!("Session task failed: {}", e),
        }
        result
    }

    /// Open the key store, continuing without one if it is unusable
    fn open_key_store(config: &AppConfig) -> Option<Box<dyn KeyStore>> {
        let session = &config.session;
        if !session.reuse_saved_sessions && !session.persist_sessions {
            return None;
        }
        let opened = config
            .key_store_path()
            .and_then(|path| FileKeyStore::open(path).map_err(CliError::from));
        match opened {
            Ok(store) => {
                info!("Using key store {}", store.path().display());
                Some(Box::new(store))
            }
            Err(e) => {
                warn!("Key store unavailable, sessions will not be saved: {}", e);
                None
            }
        }
    }
}
