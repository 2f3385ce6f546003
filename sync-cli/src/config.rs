//! Configuration management for the quotes CLI.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";

/// Device configuration stored in the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name shown by `status`.
    pub device_name: String,
    /// Shared directory acting as the cloud store.
    pub cloud_dir: PathBuf,
    /// When the data directory was initialized.
    #[serde(default)]
    pub created_at: u64,
}

impl DeviceConfig {
    /// Configuration for a device bound to `cloud_dir`, created now.
    pub fn new(name: &str, cloud_dir: &Path) -> Self {
        Self {
            device_name: name.to_string(),
            cloud_dir: cloud_dir.to_path_buf(),
            created_at: unix_now(),
        }
    }

    /// Read `config.toml` from the data directory.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .context("Not initialized. Run 'quotes init --cloud-dir <dir>' first.")?;
        toml::from_str(&contents)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Write `config.toml` into the data directory, owner-only.
    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(CONFIG_FILE);
        let contents = toml::to_string_pretty(self).context("Failed to encode configuration")?;
        tokio::fs::write(&path, contents)
            .await
            .context("Failed to save configuration")?;
        set_file_permissions_0600(&path).await?;
        Ok(())
    }

    /// Check if the data directory is initialized.
    pub async fn exists(data_dir: &Path) -> bool {
        tokio::fs::try_exists(data_dir.join(CONFIG_FILE))
            .await
            .unwrap_or(false)
    }
}

/// Seconds since the Unix epoch, or 0 if the clock is before it.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Restrict a file the CLI wrote to its owner.
async fn set_file_permissions_0600(path: &Path) -> Result<()> {
    restrict(path, 0o600)
        .await
        .with_context(|| format!("Failed to restrict {}", path.display()))
}

/// Restrict a directory the CLI created to its owner.
pub async fn set_dir_permissions_0700(path: &Path) -> Result<()> {
    restrict(path, 0o700)
        .await
        .with_context(|| format!("Failed to restrict {}", path.display()))
}

#[cfg(unix)]
async fn restrict(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn restrict(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
