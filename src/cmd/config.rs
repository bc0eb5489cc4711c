//! Configuration view and validation commands: `cardflow config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use cardflow::config::{CONFIG_DIR, CONFIG_FILE, CardflowConfig};

    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Cardflow Configuration");
            println!("======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No cardflow.toml found. Using defaults.");
            }
            println!();

            // Effective values, environment overrides included.
            let config = CardflowConfig::resolve(project_dir)?;

            println!("[positions]");
            println!("  min_position = {}", config.positions.min_position);
            println!("  max_position = {}", config.positions.max_position);
            println!("  default_increment = {}", config.positions.default_increment);
            println!("  rebalance_threshold = {}", config.positions.rebalance_threshold);
            println!();

            println!("[subscriptions]");
            println!("  max_per_user = {}", config.subscriptions.max_per_user);
            println!("  timeout_secs = {}", config.subscriptions.timeout_secs);
            println!("  channel_capacity = {}", config.subscriptions.channel_capacity);
            println!();

            println!("[events]");
            println!("  queue_size = {}", config.events.queue_size);
            println!("  publish_timeout_ms = {}", config.events.publish_timeout_ms);
            println!("  cleanup_interval_secs = {}", config.events.cleanup_interval_secs);
            println!();

            println!("[moves]");
            println!("  max_retries = {}", config.moves.max_retries);
            println!();

            println!("[server]");
            println!("  port = {}", config.server.port);
            println!("  db_path = \"{}\"", config.server.db_path.display());
            println!();

            if !config_path.exists() {
                println!("Run 'cardflow config init' to create a cardflow.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No cardflow.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = CardflowConfig::load(&config_path)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("cardflow.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)?;
            }

            CardflowConfig::default().save(&config_path)?;

            println!("Created cardflow.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [positions] spacing and rebalance threshold");
            println!("  - [subscriptions] per-user limit and inactivity timeout");
            println!("  - [events] queue size and cleanup interval");
            println!();
        }
    }

    Ok(())
}
