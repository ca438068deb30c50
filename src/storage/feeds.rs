use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{expect_affected, DatabaseError, FeedFetchStatus, FeedImport, RssFeed, RssFeedRow};
use crate::util::{new_id, sanitize_name, validate_feed_url};

fn checked_feed_url(url: &str) -> Result<String, DatabaseError> {
    validate_feed_url(url)
        .map(String::from)
        .map_err(|e| DatabaseError::Invalid(e.to_string()))
}

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe a user to an RSS feed.
    ///
    /// The URL must be http(s) and must not point at localhost or a private
    /// network, since the fetcher will request it server-side.
    pub async fn create_feed(&self, user_id: &str, name: &str, url: &str) -> Result<RssFeed, DatabaseError> {
        let name = sanitize_name("Feed", name).map_err(DatabaseError::Invalid)?;
        let url = checked_feed_url(url)?;

        let feed = RssFeed {
            id: new_id(),
            user_id: user_id.to_owned(),
            name,
            url,
            created_at: chrono::Utc::now().timestamp(),
            last_fetched_at: None,
            last_fetched_status: Some(FeedFetchStatus::Pending),
        };

        sqlx::query(
            r#"
            INSERT INTO rss_feeds (id, name, url, created_at, last_fetched_status, user_id)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&feed.id)
        .bind(&feed.name)
        .bind(&feed.url)
        .bind(feed.created_at)
        .bind(FeedFetchStatus::Pending.as_str())
        .bind(&feed.user_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tracing::info!(feed_id = %feed.id, url = %feed.url, "Added feed");
        Ok(feed)
    }

    pub async fn get_feed(&self, id: &str) -> Result<Option<RssFeed>, DatabaseError> {
        let sql = format!("SELECT {} FROM rss_feeds WHERE id = ?", RssFeedRow::COLUMNS);
        sqlx::query_as::<_, RssFeedRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(RssFeedRow::into_feed)
            .transpose()
    }

    pub async fn list_feeds(&self, user_id: &str) -> Result<Vec<RssFeed>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM rss_feeds WHERE user_id = ? ORDER BY name, created_at",
            RssFeedRow::COLUMNS
        );
        let rows = sqlx::query_as::<_, RssFeedRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(RssFeedRow::into_feed).collect()
    }

    /// Rename a feed and/or change its URL. `None` leaves a field unchanged.
    pub async fn update_feed(
        &self,
        id: &str,
        name: Option<&str>,
        url: Option<&str>,
    ) -> Result<(), DatabaseError> {
        if name.is_none() && url.is_none() {
            return Ok(());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE rss_feeds SET ");
        let mut separated = builder.separated(", ");
        if let Some(name) = name {
            separated.push("name = ");
            separated.push_bind_unseparated(sanitize_name("Feed", name).map_err(DatabaseError::Invalid)?);
        }
        if let Some(url) = url {
            separated.push("url = ");
            separated.push_bind_unseparated(checked_feed_url(url)?);
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);

        let result = builder.build().execute(&self.pool).await?;
        expect_affected(result, "feed", id)
    }

    /// Record the outcome of a poll.
    pub async fn record_feed_fetch(&self, id: &str, status: FeedFetchStatus) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE rss_feeds SET last_fetched_at = ?, last_fetched_status = ? WHERE id = ?",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if status == FeedFetchStatus::Failure {
            tracing::warn!(feed_id = %id, "Feed fetch failed");
        }
        expect_affected(result, "feed", id)
    }

    /// Unsubscribe. Import records go with the feed; bookmarks stay.
    pub async fn delete_feed(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM rss_feeds WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result, "feed", id)
    }

    /// Remember that a feed entry has been imported.
    ///
    /// Returns the import id, or `None` if this entry was already recorded
    /// for the feed. The fetcher uses this to skip entries it has seen.
    /// The bookmark, when given, must belong to the feed's owner.
    pub async fn record_feed_import(
        &self,
        feed_id: &str,
        entry_id: &str,
        bookmark_id: Option<&str>,
    ) -> Result<Option<String>, DatabaseError> {
        let feed = self
            .get_feed(feed_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("feed", feed_id))?;
        if let Some(bookmark_id) = bookmark_id {
            let (owner, _) = self.bookmark_owner_and_kind(bookmark_id).await?;
            if owner != feed.user_id {
                return Err(DatabaseError::Invalid(format!(
                    "bookmark {bookmark_id} belongs to another user"
                )));
            }
        }

        let id = new_id();
        let result = sqlx::query(
            r#"
            INSERT INTO rss_feed_imports (id, created_at, entry_id, rss_feed_id, bookmark_id)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(rss_feed_id, entry_id) DO NOTHING
        "#,
        )
        .bind(&id)
        .bind(chrono::Utc::now().timestamp())
        .bind(entry_id)
        .bind(feed_id)
        .bind(bookmark_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            tracing::trace!(feed_id = %feed_id, entry_id = %entry_id, "Feed entry already imported");
            return Ok(None);
        }
        Ok(Some(id))
    }

    /// Import records for a feed, newest first.
    pub async fn imports_for_feed(&self, feed_id: &str) -> Result<Vec<FeedImport>, DatabaseError> {
        let imports = sqlx::query_as::<_, FeedImport>(
            r#"
            SELECT id, rss_feed_id, entry_id, bookmark_id, created_at
            FROM rss_feed_imports
            WHERE rss_feed_id = ?
            ORDER BY created_at DESC, entry_id
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(imports)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, DatabaseError, FeedFetchStatus, NewBookmark, NewUser};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    async fn test_user(db: &Database) -> String {
        db.create_user(NewUser {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            ..NewUser::default()
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_create_and_list_feeds() {
        let db = test_db().await;
        let user = test_user(&db).await;

        let feed = db
            .create_feed(&user, "  Rust Blog ", "https://blog.rust-lang.org/feed.xml")
            .await
            .unwrap();
        assert_eq!(feed.name, "Rust Blog");
        assert_eq!(feed.last_fetched_status, Some(FeedFetchStatus::Pending));

        assert_eq!(db.get_feed(&feed.id).await.unwrap(), Some(feed.clone()));
        assert_eq!(db.list_feeds(&user).await.unwrap(), vec![feed]);
    }

    #[tokio::test]
    async fn test_create_feed_rejects_internal_urls() {
        let db = test_db().await;
        let user = test_user(&db).await;

        for url in [
            "http://localhost/feed",
            "http://127.0.0.1/feed",
            "http://192.168.1.10/rss",
            "file:///etc/passwd",
            "not a url",
        ] {
            let err = db.create_feed(&user, "Bad", url).await.unwrap_err();
            assert!(matches!(err, DatabaseError::Invalid(_)), "{url} should be rejected");
        }
        assert!(db.list_feeds(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_feed_and_record_fetch() {
        let db = test_db().await;
        let user = test_user(&db).await;
        let feed = db
            .create_feed(&user, "Old", "https://example.com/rss")
            .await
            .unwrap();

        db.update_feed(&feed.id, Some("New"), Some("https://example.org/atom"))
            .await
            .unwrap();
        db.record_feed_fetch(&feed.id, FeedFetchStatus::Success)
            .await
            .unwrap();

        let feed = db.get_feed(&feed.id).await.unwrap().unwrap();
        assert_eq!(feed.name, "New");
        assert_eq!(feed.url, "https://example.org/atom");
        assert_eq!(feed.last_fetched_status, Some(FeedFetchStatus::Success));
        assert!(feed.last_fetched_at.is_some());

        let err = db
            .update_feed(&feed.id, None, Some("http://10.0.0.1/rss"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Invalid(_)));

        let err = db
            .record_feed_fetch("missing", FeedFetchStatus::Failure)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound("feed", _)));
    }

    #[tokio::test]
    async fn test_feed_imports_dedupe_per_feed() {
        let db = test_db().await;
        let user = test_user(&db).await;
        let first = db
            .create_feed(&user, "One", "https://one.example.com/rss")
            .await
            .unwrap();
        let second = db
            .create_feed(&user, "Two", "https://two.example.com/rss")
            .await
            .unwrap();
        let bookmark = db
            .create_bookmark(&user, NewBookmark::link("https://one.example.com/post-1"))
            .await
            .unwrap()
            .bookmark;

        let import = db
            .record_feed_import(&first.id, "post-1", Some(&bookmark.id))
            .await
            .unwrap();
        assert!(import.is_some());
        assert_eq!(
            db.record_feed_import(&first.id, "post-1", None).await.unwrap(),
            None
        );
        // Same entry id under a different feed is a separate import
        assert!(db
            .record_feed_import(&second.id, "post-1", None)
            .await
            .unwrap()
            .is_some());

        let imports = db.imports_for_feed(&first.id).await.unwrap();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].bookmark_id.as_deref(), Some(bookmark.id.as_str()));

        assert!(matches!(
            db.record_feed_import("missing", "x", None).await,
            Err(DatabaseError::NotFound("feed", _))
        ));
    }

    #[tokio::test]
    async fn test_bookmark_delete_keeps_import_record() {
        let db = test_db().await;
        let user = test_user(&db).await;
        let feed = db
            .create_feed(&user, "Feed", "https://example.com/rss")
            .await
            .unwrap();
        let bookmark = db
            .create_bookmark(&user, NewBookmark::link("https://example.com/a"))
            .await
            .unwrap()
            .bookmark;
        db.record_feed_import(&feed.id, "a", Some(&bookmark.id))
            .await
            .unwrap();

        db.delete_bookmark(&bookmark.id).await.unwrap();

        let imports = db.imports_for_feed(&feed.id).await.unwrap();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].bookmark_id, None);
        // Still deduplicated after the bookmark is gone
        assert_eq!(db.record_feed_import(&feed.id, "a", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_feed_removes_imports() {
        let db = test_db().await;
        let user = test_user(&db).await;
        let feed = db
            .create_feed(&user, "Feed", "https://example.com/rss")
            .await
            .unwrap();
        db.record_feed_import(&feed.id, "a", None).await.unwrap();

        db.delete_feed(&feed.id).await.unwrap();
        assert!(db.imports_for_feed(&feed.id).await.unwrap().is_empty());
        assert!(db.get_feed(&feed.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_feed_import_requires_same_owner() {
        let db = test_db().await;
        let ada = test_user(&db).await;
        let bob = db
            .create_user(NewUser {
                name: "Bob".to_string(),
                email: "bob@example.com".to_string(),
                ..NewUser::default()
            })
            .await
            .unwrap()
            .id;
        let feed = db
            .create_feed(&ada, "Feed", "https://example.com/rss")
            .await
            .unwrap();
        let bobs = db
            .create_bookmark(&bob, NewBookmark::text("bob's note"))
            .await
            .unwrap()
            .bookmark;

        let err = db
            .record_feed_import(&feed.id, "a", Some(&bobs.id))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Invalid(_)));
        assert!(matches!(
            db.record_feed_import(&feed.id, "a", Some("missing")).await,
            Err(DatabaseError::NotFound("bookmark", _))
        ));
        assert!(db.imports_for_feed(&feed.id).await.unwrap().is_empty());
    }
}
