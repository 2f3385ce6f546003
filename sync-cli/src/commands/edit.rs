//! Local quote list commands.

use anyhow::Result;
use quotesync_client::{QuoteStore, Record, RecordId};
use std::path::Path;

use super::open;

async fn quote_store(data_dir: &Path) -> Result<QuoteStore> {
    let device = open(data_dir).await?;
    Ok(QuoteStore::open(device.coordinator).await)
}

/// Run the add command.
pub async fn add(data_dir: &Path, text: &str) -> Result<()> {
    let store = quote_store(data_dir).await?;
    let record = store.save(Record::placeholder().with_text(text)).await?;
    println!("Added {}", record.id());
    Ok(())
}

/// Run the edit command.
pub async fn edit(data_dir: &Path, id: &str, text: &str) -> Result<()> {
    let store = quote_store(data_dir).await?;
    match store.edit(&RecordId::new(id), text).await? {
        Some(record) => println!("Edited {}", record.id()),
        None => anyhow::bail!("No quote with id {}", id),
    }
    Ok(())
}

/// Run the remove command.
pub async fn remove(data_dir: &Path, id: &str) -> Result<()> {
    let store = quote_store(data_dir).await?;
    let Some(record) = store.get(&RecordId::new(id)).await else {
        anyhow::bail!("No quote with id {}", id);
    };
    store.remove(&record).await?;
    println!("Removed {}", id);
    Ok(())
}

/// Run the list command.
pub async fn list(data_dir: &Path) -> Result<()> {
    let store = quote_store(data_dir).await?;
    let quotes = store.quotes().await;
    if quotes.is_empty() {
        println!("No quotes.");
        return Ok(());
    }
    for quote in quotes {
        println!("{}  {}", quote.id(), quote.text());
    }
    Ok(())
}
