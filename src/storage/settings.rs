use super::schema::Database;
use super::types::DatabaseError;

impl Database {
    // ========================================================================
    // Server Settings
    // ========================================================================

    /// Get a single server setting by key.
    ///
    /// Keys use the dotted convention: `signups.disabled`, `crawler.timeout`.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Set a setting (UPSERT).
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(DatabaseError::Invalid("setting key cannot be empty".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO config (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        tracing::debug!(key = %key, "Updated setting");
        Ok(())
    }

    /// Remove a setting. Returns false if it was not set.
    pub async fn delete_setting(&self, key: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM config WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All settings as (key, value) pairs ordered by key.
    pub async fn list_settings(&self) -> Result<Vec<(String, String)>, DatabaseError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM config ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, DatabaseError};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_setting_missing() {
        let db = test_db().await;
        assert_eq!(db.get_setting("nonexistent.key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_setting_upsert() {
        let db = test_db().await;
        db.set_setting("signups.disabled", "false").await.unwrap();
        db.set_setting("signups.disabled", "true").await.unwrap();

        assert_eq!(
            db.get_setting("signups.disabled").await.unwrap(),
            Some("true".to_string())
        );
    }

    #[tokio::test]
    async fn test_list_and_delete_settings() {
        let db = test_db().await;
        db.set_setting("crawler.timeout", "30").await.unwrap();
        db.set_setting("assets.max_mb", "50").await.unwrap();

        let all = db.list_settings().await.unwrap();
        assert_eq!(
            all,
            vec![
                ("assets.max_mb".to_string(), "50".to_string()),
                ("crawler.timeout".to_string(), "30".to_string()),
            ]
        );

        assert!(db.delete_setting("crawler.timeout").await.unwrap());
        assert!(!db.delete_setting("crawler.timeout").await.unwrap());
        assert_eq!(db.list_settings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let db = test_db().await;
        assert!(matches!(
            db.set_setting("  ", "x").await,
            Err(DatabaseError::Invalid(_))
        ));
    }
}
