use anyhow::Result;
use std::collections::{HashMap, HashSet};

use super::schema::Database;
use super::types::FeedRecord;

/// Latest record per feed, persisted as encoded values keyed by feed URL.
///
/// Cloning is cheap; clones share the same database pool.
#[derive(Clone)]
pub struct FeedStore {
    db: Database,
}

impl FeedStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Write every record in `records`, all or nothing.
    ///
    /// Keys absent from the batch are untouched. Readers see either the
    /// whole batch or none of it.
    pub async fn upsert_all(&self, records: &HashMap<String, FeedRecord>) -> Result<()> {
        let mut entries = Vec::with_capacity(records.len());
        for (feed_key, record) in records {
            entries.push((feed_key.clone(), record.to_stored_value()?));
        }
        // Stable write order so insertion-order ties do not depend on hashing
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        self.db.put_entries(&entries).await
    }

    /// All stored records, newest first.
    ///
    /// Values that fail to decode are logged and skipped. Equal timestamps
    /// keep the store's insertion order.
    pub async fn list_all(&self) -> Result<Vec<FeedRecord>> {
        let mut records: Vec<FeedRecord> = self
            .db
            .get_all_entries()
            .await?
            .into_iter()
            .filter_map(|(key, value)| decode(&key, &value))
            .collect();

        // Stable sort: ties stay in retrieval order
        records.sort_by(|a, b| b.timestamp_seconds.cmp(&a.timestamp_seconds));
        Ok(records)
    }

    /// The stored record for one feed, if present and readable.
    pub async fn get(&self, feed_key: &str) -> Result<Option<FeedRecord>> {
        Ok(self
            .db
            .get_entry(feed_key)
            .await?
            .and_then(|value| decode(feed_key, &value)))
    }

    /// Remove every stored feed whose key is not in `configured`.
    ///
    /// Returns the number of records removed.
    pub async fn cleanup(&self, configured: &HashSet<String>) -> Result<u64> {
        let stale: Vec<String> = self
            .db
            .get_all_entries()
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| !configured.contains(key))
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let removed = self.db.remove_entries(&stale).await?;
        tracing::info!(removed = removed, "Removed records of feeds no longer configured");
        Ok(removed)
    }
}

fn decode(feed_key: &str, value: &str) -> Option<FeedRecord> {
    match FeedRecord::from_stored_value(feed_key, value) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(feed = %feed_key, error = %e, "Dropping unreadable stored record");
            None
        }
    }
}
