//! Project setup command: `cardflow init`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use cardflow::board::{BoardDb, TaskStatus};
use cardflow::config::{CONFIG_DIR, CONFIG_FILE, CardflowConfig};

pub fn cmd_init(project_dir: &Path, db_path: Option<PathBuf>, demo: bool) -> Result<()> {
    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;

    let config = if config_path.exists() {
        println!("Using existing {}", config_path.display());
        CardflowConfig::load(&config_path)?
    } else {
        let config = CardflowConfig::default();
        config.save(&config_path)?;
        println!("Created {}", config_path.display());
        config
    };

    let db_path = db_path.unwrap_or_else(|| config.server.db_path.clone());
    let db_path = super::resolve_db_path(project_dir, &db_path);
    let db = BoardDb::new(&db_path)?;
    println!("Board database initialized at {}", db_path.display());

    if demo {
        seed_demo(&db, &config)?;
        println!();
        println!("Seeded demo board:");
        println!("  user    = \"demo\"");
        println!("  project = \"demo\" (private, owned by demo)");
        println!();
        println!("Try: curl -H 'x-user-id: demo' localhost:{}/api/projects/demo/columns/developing/wip", config.server.port);
    }

    Ok(())
}

fn seed_demo(db: &BoardDb, config: &CardflowConfig) -> Result<()> {
    if db.user_exists("demo")? {
        tracing::info!("Demo data already present");
        return Ok(());
    }
    db.create_user("demo", "Demo User")?;
    db.create_project("demo", "Demo Board", "demo", true)?;

    let step = config.positions.default_increment;
    let base = config.positions.min_position;
    let cards = [
        ("Sketch the board layout", TaskStatus::Backlog),
        ("Wire up drag and drop", TaskStatus::Todo),
        ("Add WIP badges", TaskStatus::Todo),
        ("Live updates over WebSocket", TaskStatus::Developing),
    ];
    let mut per_column: std::collections::HashMap<TaskStatus, i64> = Default::default();
    for (title, status) in cards {
        let slot = per_column.entry(status).or_insert(0);
        db.create_task("demo", title, status, base + *slot * step)?;
        *slot += 1;
    }
    Ok(())
}
