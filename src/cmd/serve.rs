//! Board server command: `cardflow serve`.

use anyhow::Result;
use std::path::{Path, PathBuf};

use cardflow::config::CardflowConfig;
use cardflow::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    project_dir: &Path,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    let board = CardflowConfig::resolve(project_dir)?;
    for warning in board.validate() {
        tracing::warn!(%warning, "Configuration warning");
    }

    let mut config = ServerConfig::from_config(board);
    if let Some(port) = port {
        config.port = port;
    }
    let db_path = db_path.unwrap_or_else(|| config.db_path.clone());
    config.db_path = super::resolve_db_path(project_dir, &db_path);
    config.dev_mode = dev;

    start_server(config).await
}
