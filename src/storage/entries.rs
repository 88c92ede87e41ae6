use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;

/// Rows per multi-row statement; keeps bind counts well under SQLite's limit.
const BATCH_SIZE: usize = 100;

impl Database {
    // ========================================================================
    // Key-Value Operations
    // ========================================================================

    /// Get every stored `(key, value)` pair in insertion (rowid) order.
    pub async fn get_all_entries(&self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM feed_items ORDER BY rowid")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows)
    }

    /// Get a single value by key.
    pub async fn get_entry(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM feed_items WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Insert or overwrite many entries in one transaction.
    ///
    /// Either every pair is written or, on error, none is. An overwritten key
    /// keeps its rowid.
    pub async fn put_entries(&self, entries: &[(String, String)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in entries.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT INTO feed_items (key, value) ");

            builder.push_values(chunk, |mut b, (key, value)| {
                b.push_bind(key).push_bind(value);
            });

            builder.push(
                " ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            );

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove many keys in one transaction. Returns the number of rows removed.
    pub async fn remove_entries(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for chunk in keys.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("DELETE FROM feed_items WHERE key IN (");
            let mut separated = builder.separated(", ");
            for key in chunk {
                separated.push_bind(key);
            }
            separated.push_unseparated(")");

            removed += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }
}
