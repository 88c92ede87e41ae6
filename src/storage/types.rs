use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has the database locked
    #[error("Another feedsnap process appears to be using the database. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Latest entry of one feed, as stored and displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRecord {
    /// URL the feed is fetched from; the store key.
    pub feed_key: String,
    /// Feed title, or `feed_key` when the document has none.
    pub display_name: String,
    /// Entry title (may be empty).
    pub title: String,
    /// Entry URL (may be empty).
    pub link: String,
    /// Entry time in epoch seconds, never in the future.
    pub timestamp_seconds: i64,
}

/// Serialized value format: exactly four named fields.
///
/// The feed key is the store key and is not repeated in the value.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    feed: String,
    title: String,
    url: String,
    timestamp: i64,
}

impl FeedRecord {
    /// Encode the value half of the record as compact JSON.
    pub fn to_stored_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&StoredRecord {
            feed: self.display_name.clone(),
            title: self.title.clone(),
            url: self.link.clone(),
            timestamp: self.timestamp_seconds,
        })
    }

    /// Decode a stored value back into a record for `feed_key`.
    ///
    /// # Errors
    ///
    /// Fails when the value is not a JSON object, a field is missing, a text
    /// field is not a string, or `timestamp` is not an integer.
    pub fn from_stored_value(feed_key: &str, value: &str) -> Result<Self, serde_json::Error> {
        let stored: StoredRecord = serde_json::from_str(value)?;
        Ok(Self {
            feed_key: feed_key.to_string(),
            display_name: stored.feed,
            title: stored.title,
            link: stored.url,
            timestamp_seconds: stored.timestamp,
        })
    }
}
