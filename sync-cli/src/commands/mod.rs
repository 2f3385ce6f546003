//! CLI command implementations.

pub mod edit;
pub mod init;
pub mod status;
pub mod sync;

use anyhow::{Context, Result};
use quotesync_client::{FileCloud, FileKv, SyncConfig, SyncCoordinator};
use std::path::Path;
use std::sync::Arc;

use crate::config::DeviceConfig;

/// Subdirectory of the data directory holding the persisted blobs.
pub const STORE_DIR: &str = "store";

/// An initialized data directory and its coordinator.
pub struct Device {
    /// Loaded configuration.
    pub config: DeviceConfig,
    /// Coordinator over the local store and the cloud directory.
    pub coordinator: SyncCoordinator,
}

/// Open the data directory without contacting the cloud.
pub async fn open(data_dir: &Path) -> Result<Device> {
    let config = DeviceConfig::load(data_dir).await?;
    tracing::debug!(
        "Opening {} with cloud at {}",
        data_dir.display(),
        config.cloud_dir.display()
    );
    let kv = FileKv::open(data_dir.join(STORE_DIR))
        .await
        .context("Failed to open local store")?;
    let cloud = FileCloud::new(&config.cloud_dir);
    let coordinator = SyncCoordinator::new(SyncConfig::default(), Arc::new(kv), Arc::new(cloud))
        .await
        .context("Failed to load sync state")?;
    Ok(Device {
        config,
        coordinator,
    })
}

/// Open the data directory and a session with the cloud directory.
pub async fn connect(data_dir: &Path) -> Result<Device> {
    let device = open(data_dir).await?;
    device
        .coordinator
        .initialize()
        .await
        .with_context(|| format!("Failed to open cloud at {}", device.config.cloud_dir.display()))?;
    Ok(device)
}
