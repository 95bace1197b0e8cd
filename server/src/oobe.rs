//! Guided out-of-box experience.
//!
//! This performs automatic setup for people running `balloond`
//! directly without specifying any configurations. The generated
//! config uses SQLite and contains guidance for a more permanent
//! setup.
//!
//! Paths:
//! - Config: `~/.config/balloon/server.toml`
//! - SQLite: `~/.local/share/balloon/server.db`

use anyhow::{anyhow, Result};
use tokio::fs::{self, OpenOptions};

use crate::config;

const CONFIG_TEMPLATE: &str = include_str!("config-template.toml");

pub async fn run_oobe() -> Result<()> {
    let config_path = config::get_xdg_config_path()?;

    if config_path.exists() {
        return Ok(());
    }

    let data_path = config::get_xdg_data_path()?;

    let database_path = data_path.join("server.db");
    let database_path_str = database_path
        .to_str()
        .ok_or_else(|| anyhow!("The data path {:?} is not valid UTF-8", database_path))?;
    let database_url = format!("sqlite://{}", database_path_str);
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&database_path)
        .await?;

    let config_content = CONFIG_TEMPLATE
        .replace("%database_url%", &database_url)
        .replace("%chunk_size%", &config::DEFAULT_CHUNK_SIZE.to_string());

    fs::write(&config_path, config_content.as_bytes()).await?;

    eprintln!();
    eprintln!("-------------------");
    eprintln!("Welcome to Balloon!");
    eprintln!();
    eprintln!("A simple setup using SQLite has been configured for you in:");
    eprintln!();
    eprintln!("    {}", config_path.display());
    eprintln!();
    eprintln!("Switch the database to PostgreSQL before storing anything you care about.");
    eprintln!("-------------------");
    eprintln!();

    Ok(())
}
