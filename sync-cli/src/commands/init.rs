//! Initialize a data directory.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::{set_dir_permissions_0700, DeviceConfig};

const DEFAULT_DEVICE_NAME: &str = "quotes device";

/// Run the init command.
pub async fn run(data_dir: &Path, cloud_dir: &Path, name: Option<&str>) -> Result<()> {
    if DeviceConfig::exists(data_dir).await {
        anyhow::bail!(
            "Already initialized. Delete {} to reinitialize.",
            data_dir.join("config.toml").display()
        );
    }

    tokio::fs::create_dir_all(data_dir)
        .await
        .context("Failed to create data directory")?;
    set_dir_permissions_0700(data_dir).await?;

    // Stored absolute so later runs work from any working directory
    tokio::fs::create_dir_all(cloud_dir)
        .await
        .context("Failed to create cloud directory")?;
    let cloud_dir = tokio::fs::canonicalize(cloud_dir)
        .await
        .context("Failed to resolve cloud directory")?;

    let config = DeviceConfig::new(name.unwrap_or(DEFAULT_DEVICE_NAME), &cloud_dir);
    config.save(data_dir).await?;

    println!("Initialized successfully!");
    println!();
    println!("  Name:      {}", config.device_name);
    println!("  Data dir:  {}", data_dir.display());
    println!("  Cloud dir: {}", config.cloud_dir.display());
    println!();
    println!("Next steps:");
    println!("  1. Add a quote: quotes add \"...\"");
    println!("  2. Sync with the cloud: quotes sync");

    Ok(())
}
