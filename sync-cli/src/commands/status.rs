//! Show sync status.

use anyhow::Result;
use std::path::Path;

use super::open;
use crate::config::{unix_now, DeviceConfig};

/// Run the status command.
///
/// Reads only local state; the cloud directory is not contacted.
pub async fn run(data_dir: &Path) -> Result<()> {
    println!("=== quotes status ===");
    println!();

    if !DeviceConfig::exists(data_dir).await {
        println!("Device: NOT INITIALIZED");
        println!();
        println!("Run 'quotes init --cloud-dir <dir>' to initialize.");
        return Ok(());
    }

    let device = open(data_dir).await?;
    println!("Device:");
    println!("  Name:  {}", device.config.device_name);
    println!("  Cloud: {}", device.config.cloud_dir.display());
    println!("  Init:  {}", format_timestamp(device.config.created_at));
    println!();

    let quotes = device.coordinator.cache().load().await;
    let status = device.coordinator.status().await;
    println!("Sync:");
    println!("  Quotes:          {}", quotes.len());
    println!("  Pending records: {}", status.pending_records);
    println!("  Pending zones:   {}", status.pending_zones);
    println!(
        "  Cursor:          {}",
        if status.has_cursor { "saved" } else { "none (next pull is a full sync)" }
    );

    if !status.failures.is_empty() {
        println!();
        println!("Failed sends:");
        for failure in &status.failures {
            println!(
                "  {} {:?} after {} attempts: {}",
                failure.id, failure.action, failure.attempts, failure.error
            );
        }
    }

    Ok(())
}

/// Format a Unix timestamp relative to now.
fn format_timestamp(ts: u64) -> String {
    if ts == 0 {
        return "unknown".to_string();
    }
    let diff = unix_now().saturating_sub(ts);

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}
