//! Commands that talk to the cloud directory.

use anyhow::{Context, Result};
use quotesync_client::SyncCoordinator;
use std::path::Path;

use super::connect;

/// Run the push command.
pub async fn push(data_dir: &Path) -> Result<()> {
    let device = connect(data_dir).await?;
    push_with(&device.coordinator).await
}

/// Run the pull command.
pub async fn pull(data_dir: &Path) -> Result<()> {
    let device = connect(data_dir).await?;
    pull_with(&device.coordinator).await
}

/// Run the sync command: pull, then push, over one session.
pub async fn sync(data_dir: &Path) -> Result<()> {
    let device = connect(data_dir).await?;
    pull_with(&device.coordinator).await?;
    push_with(&device.coordinator).await
}

/// Run the reupload command.
pub async fn reupload(data_dir: &Path) -> Result<()> {
    let device = connect(data_dir).await?;
    device
        .coordinator
        .reupload_everything()
        .await
        .context("Reupload failed")?;
    println!("Reuploaded {} quotes.", device.coordinator.cache().load().await.len());
    report_pending(&device.coordinator).await;
    Ok(())
}

/// Run the reset command.
pub async fn reset(data_dir: &Path) -> Result<()> {
    let device = connect(data_dir).await?;
    device
        .coordinator
        .reset_everything()
        .await
        .context("Reset failed")?;
    println!("Removed all quotes locally and in the cloud.");
    report_pending(&device.coordinator).await;
    Ok(())
}

async fn push_with(coordinator: &SyncCoordinator) -> Result<()> {
    coordinator
        .push_local_changes()
        .await
        .context("Push failed; changes stay pending")?;
    println!("Pushed local changes.");
    report_pending(coordinator).await;
    Ok(())
}

async fn pull_with(coordinator: &SyncCoordinator) -> Result<()> {
    coordinator
        .pull_remote_changes()
        .await
        .context("Pull failed")?;
    println!(
        "Pulled remote changes. {} quotes locally.",
        coordinator.cache().load().await.len()
    );
    Ok(())
}

async fn report_pending(coordinator: &SyncCoordinator) {
    let status = coordinator.status().await;
    if status.pending_records == 0 && status.pending_zones == 0 {
        return;
    }
    println!(
        "  {} record changes and {} zone changes still pending.",
        status.pending_records, status.pending_zones
    );
    for failure in &status.failures {
        println!(
            "  {} ({} attempts): {}",
            failure.id, failure.attempts, failure.error
        );
    }
    if status.pending_zones > 0 {
        println!("  Run 'quotes push' again to retry.");
    }
}
