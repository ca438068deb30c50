use std::collections::HashMap;

use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{
    expect_affected, parse_column, Bookmark, BookmarkDbRow, BookmarkFilter, BookmarkKind,
    BookmarkTag, BookmarkUpdate, CrawlResult, CreatedBookmark, DatabaseError, NewBookmark,
    NewBookmarkContent, TaggingStatus,
};
use crate::util::{escape_like, new_id, strip_control_chars, validate_link_url};

/// Clean a free-text title: strip control characters, trim, and treat an
/// empty result as "no title".
fn clean_title(title: Option<&str>) -> Option<String> {
    title
        .map(|t| strip_control_chars(t).trim().to_owned())
        .filter(|t| !t.is_empty())
}

impl Database {
    // ========================================================================
    // Bookmark Operations
    // ========================================================================

    /// Page size used by [`list_bookmarks`](Self::list_bookmarks) when none is given
    pub const DEFAULT_PAGE_SIZE: u32 = 100;

    /// Upper bound on a single [`list_bookmarks`](Self::list_bookmarks) page
    pub const MAX_PAGE_SIZE: u32 = 1000;

    /// Create a bookmark and its extension row in one transaction.
    ///
    /// Link URLs must be http(s). A link the user has already bookmarked is
    /// not duplicated: the existing bookmark comes back with
    /// `already_exists = true`. An asset bookmark claims its asset: the asset
    /// row is re-pointed at the new bookmark.
    ///
    /// # Errors
    ///
    /// `NotFound` if the user (or, for asset bookmarks, the asset) does not
    /// exist, `Invalid` for a bad URL, empty text or an asset owned by
    /// someone else, `Conflict` for an asset already attached to a bookmark.
    pub async fn create_bookmark(
        &self,
        user_id: &str,
        new_bookmark: NewBookmark,
    ) -> Result<CreatedBookmark, DatabaseError> {
        let content = match new_bookmark.content {
            NewBookmarkContent::Link { url } => {
                let url = validate_link_url(&url)
                    .map_err(|e| DatabaseError::Invalid(e.to_string()))?;
                NewBookmarkContent::Link { url: url.into() }
            }
            NewBookmarkContent::Text { text, source_url } => {
                if text.trim().is_empty() {
                    return Err(DatabaseError::Invalid(
                        "text bookmark cannot be empty".to_string(),
                    ));
                }
                NewBookmarkContent::Text { text, source_url }
            }
            asset @ NewBookmarkContent::Asset { .. } => asset,
        };

        let mut tx = self.pool.begin().await?;

        let user: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if user.is_none() {
            return Err(DatabaseError::not_found("user", user_id));
        }

        if let NewBookmarkContent::Link { url } = &content {
            let existing: Option<(String,)> = sqlx::query_as(
                r#"
                SELECT b.id FROM bookmarks b
                JOIN bookmark_links l ON l.id = b.id
                WHERE b.user_id = ? AND l.url = ?
                LIMIT 1
            "#,
            )
            .bind(user_id)
            .bind(url)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some((existing_id,)) = existing {
                tx.rollback().await?;
                tracing::debug!(bookmark_id = %existing_id, "Link already bookmarked");
                let bookmark = self
                    .get_bookmark(&existing_id)
                    .await?
                    .ok_or_else(|| DatabaseError::not_found("bookmark", &existing_id))?;
                return Ok(CreatedBookmark {
                    bookmark,
                    already_exists: true,
                });
            }
        }

        let id = new_id();
        let now = chrono::Utc::now().timestamp();
        let kind = match &content {
            NewBookmarkContent::Link { .. } => BookmarkKind::Link,
            NewBookmarkContent::Text { .. } => BookmarkKind::Text,
            NewBookmarkContent::Asset { .. } => BookmarkKind::Asset,
        };

        sqlx::query(
            r#"
            INSERT INTO bookmarks
                (id, created_at, title, archived, favourited, user_id, tagging_status, note, kind)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&id)
        .bind(now)
        .bind(clean_title(new_bookmark.title.as_deref()))
        .bind(new_bookmark.archived)
        .bind(new_bookmark.favourited)
        .bind(user_id)
        .bind(TaggingStatus::Pending.as_str())
        .bind(&new_bookmark.note)
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await?;

        match &content {
            NewBookmarkContent::Link { url } => {
                sqlx::query(
                    "INSERT INTO bookmark_links (id, url, crawl_status) VALUES (?, ?, 'pending')",
                )
                .bind(&id)
                .bind(url)
                .execute(&mut *tx)
                .await?;
            }
            NewBookmarkContent::Text { text, source_url } => {
                sqlx::query("INSERT INTO bookmark_texts (id, text, source_url) VALUES (?, ?, ?)")
                    .bind(&id)
                    .bind(text)
                    .bind(source_url)
                    .execute(&mut *tx)
                    .await?;
            }
            NewBookmarkContent::Asset {
                asset_type,
                asset_id,
                file_name,
                source_url,
            } => {
                let asset: Option<(String, Option<String>)> =
                    sqlx::query_as("SELECT user_id, bookmark_id FROM assets WHERE id = ?")
                        .bind(asset_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                match asset {
                    None => return Err(DatabaseError::not_found("asset", asset_id)),
                    Some((owner, _)) if owner != user_id => {
                        return Err(DatabaseError::Invalid(format!(
                            "asset {asset_id} belongs to another user"
                        )))
                    }
                    // Re-pointing a claimed asset would let the other
                    // bookmark's delete cascade take it away from this one
                    Some((_, Some(claimed_by))) => {
                        return Err(DatabaseError::Conflict(format!(
                            "asset {asset_id} is already attached to bookmark {claimed_by}"
                        )))
                    }
                    Some((_, None)) => {}
                }

                sqlx::query(
                    r#"
                    INSERT INTO bookmark_assets (id, asset_type, asset_id, file_name, source_url)
                    VALUES (?, ?, ?, ?, ?)
                "#,
                )
                .bind(&id)
                .bind(asset_type.as_str())
                .bind(asset_id)
                .bind(file_name)
                .bind(source_url)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "UPDATE assets SET bookmark_id = ?, asset_type = 'bookmark_asset' WHERE id = ?",
                )
                .bind(&id)
                .bind(asset_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        tracing::debug!(bookmark_id = %id, user_id = %user_id, kind = %kind, "Created bookmark");

        let bookmark = self
            .get_bookmark(&id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("bookmark", &id))?;
        Ok(CreatedBookmark {
            bookmark,
            already_exists: false,
        })
    }

    /// Fetch one bookmark with its content and tags.
    pub async fn get_bookmark(&self, id: &str) -> Result<Option<Bookmark>, DatabaseError> {
        let sql = format!("{} WHERE b.id = ?", BookmarkDbRow::SELECT);
        let row: Option<BookmarkDbRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut bookmarks = vec![row.into_bookmark()?];
        self.load_bookmark_tags(&mut bookmarks).await?;
        Ok(bookmarks.pop())
    }

    /// List a user's bookmarks, newest first.
    pub async fn list_bookmarks(
        &self,
        user_id: &str,
        filter: &BookmarkFilter,
    ) -> Result<Vec<Bookmark>, DatabaseError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(BookmarkDbRow::SELECT);
        builder.push(" WHERE b.user_id = ");
        builder.push_bind(user_id);

        if let Some(archived) = filter.archived {
            builder.push(" AND b.archived = ");
            builder.push_bind(archived);
        }
        if let Some(favourited) = filter.favourited {
            builder.push(" AND b.favourited = ");
            builder.push_bind(favourited);
        }
        if let Some(kind) = filter.kind {
            builder.push(" AND b.kind = ");
            builder.push_bind(kind.as_str());
        }
        if let Some(tag_id) = &filter.tag_id {
            builder.push(
                " AND EXISTS (SELECT 1 FROM tags_on_bookmarks tb WHERE tb.bookmark_id = b.id AND tb.tag_id = ",
            );
            builder.push_bind(tag_id.as_str());
            builder.push(")");
        }
        if let Some(list_id) = &filter.list_id {
            builder.push(
                " AND EXISTS (SELECT 1 FROM bookmarks_in_lists bl WHERE bl.bookmark_id = b.id AND bl.list_id = ",
            );
            builder.push_bind(list_id.as_str());
            builder.push(")");
        }
        if let Some(search) = filter.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                let pattern = format!("%{}%", escape_like(search));
                builder.push(" AND (");
                let mut separated = builder.separated(" OR ");
                for column in ["b.title", "b.note", "l.title", "l.url", "t.text"] {
                    separated.push(column);
                    separated.push_unseparated(" LIKE ");
                    separated.push_bind_unseparated(pattern.clone());
                    separated.push_unseparated(" ESCAPE '\\'");
                }
                builder.push(")");
            }
        }

        let limit = filter
            .limit
            .unwrap_or(Self::DEFAULT_PAGE_SIZE)
            .clamp(1, Self::MAX_PAGE_SIZE);
        builder.push(" ORDER BY b.created_at DESC, b.id DESC LIMIT ");
        builder.push_bind(i64::from(limit));

        let rows: Vec<BookmarkDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        let mut bookmarks = rows
            .into_iter()
            .map(BookmarkDbRow::into_bookmark)
            .collect::<Result<Vec<_>, _>>()?;
        self.load_bookmark_tags(&mut bookmarks).await?;
        Ok(bookmarks)
    }

    /// Fill `tags` for each bookmark with a single query.
    async fn load_bookmark_tags(&self, bookmarks: &mut [Bookmark]) -> Result<(), DatabaseError> {
        if bookmarks.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            r#"
            SELECT tb.bookmark_id, t.id, t.name, tb.attached_by, tb.attached_at
            FROM tags_on_bookmarks tb
            JOIN bookmark_tags t ON t.id = tb.tag_id
            WHERE tb.bookmark_id IN (
        "#,
        );
        let mut separated = builder.separated(", ");
        for bookmark in bookmarks.iter() {
            separated.push_bind(bookmark.id.clone());
        }
        separated.push_unseparated(") ORDER BY t.name");

        let rows: Vec<(String, String, String, String, i64)> =
            builder.build_query_as().fetch_all(&self.pool).await?;

        let mut by_bookmark: HashMap<String, Vec<BookmarkTag>> = HashMap::new();
        for (bookmark_id, id, name, attached_by, attached_at) in rows {
            by_bookmark.entry(bookmark_id).or_default().push(BookmarkTag {
                id,
                name,
                attached_by: parse_column(&attached_by)?,
                attached_at,
            });
        }

        for bookmark in bookmarks.iter_mut() {
            bookmark.tags = by_bookmark.remove(&bookmark.id).unwrap_or_default();
        }
        Ok(())
    }

    /// Owner and kind of a bookmark, or `NotFound`.
    pub(crate) async fn bookmark_owner_and_kind(
        &self,
        id: &str,
    ) -> Result<(String, BookmarkKind), DatabaseError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT user_id, kind FROM bookmarks WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((user_id, kind)) => Ok((user_id, parse_column(&kind)?)),
            None => Err(DatabaseError::not_found("bookmark", id)),
        }
    }

    /// Apply a partial update and bump `modified_at`.
    pub async fn update_bookmark(
        &self,
        id: &str,
        update: BookmarkUpdate,
    ) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE bookmarks SET modified_at = ");
        builder.push_bind(now);

        if let Some(title) = update.title {
            builder.push(", title = ");
            builder.push_bind(clean_title(title.as_deref()));
        }
        if let Some(note) = update.note {
            builder.push(", note = ");
            builder.push_bind(note);
        }
        if let Some(summary) = update.summary {
            builder.push(", summary = ");
            builder.push_bind(summary);
        }
        if let Some(archived) = update.archived {
            builder.push(", archived = ");
            builder.push_bind(archived);
        }
        if let Some(favourited) = update.favourited {
            builder.push(", favourited = ");
            builder.push_bind(favourited);
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);

        let result = builder.build().execute(&self.pool).await?;
        expect_affected(result, "bookmark", id)
    }

    pub async fn set_tagging_status(
        &self,
        id: &str,
        status: TaggingStatus,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE bookmarks SET tagging_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result, "bookmark", id)
    }

    /// Store crawler output for a link bookmark.
    ///
    /// Metadata fields that are `None` keep their previous value, so a failed
    /// re-crawl does not wipe an earlier successful one.
    pub async fn record_crawl(&self, id: &str, crawl: CrawlResult) -> Result<(), DatabaseError> {
        let (_, kind) = self.bookmark_owner_and_kind(id).await?;
        if kind != BookmarkKind::Link {
            return Err(DatabaseError::Invalid(format!(
                "bookmark {id} is a {kind} bookmark, not a link"
            )));
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE bookmark_links SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                author = COALESCE(?, author),
                publisher = COALESCE(?, publisher),
                date_published = COALESCE(?, date_published),
                date_modified = COALESCE(?, date_modified),
                image_url = COALESCE(?, image_url),
                favicon = COALESCE(?, favicon),
                content = COALESCE(?, content),
                html_content = COALESCE(?, html_content),
                crawled_at = ?,
                crawl_status = ?
            WHERE id = ?
        "#,
        )
        .bind(&crawl.title)
        .bind(&crawl.description)
        .bind(&crawl.author)
        .bind(&crawl.publisher)
        .bind(crawl.date_published)
        .bind(crawl.date_modified)
        .bind(&crawl.image_url)
        .bind(&crawl.favicon)
        .bind(&crawl.content)
        .bind(&crawl.html_content)
        .bind(now)
        .bind(crawl.status.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE bookmarks SET modified_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(bookmark_id = %id, status = %crawl.status, "Recorded crawl");
        Ok(())
    }

    /// Replace the body of a text bookmark.
    pub async fn update_bookmark_text(&self, id: &str, text: &str) -> Result<(), DatabaseError> {
        let (_, kind) = self.bookmark_owner_and_kind(id).await?;
        if kind != BookmarkKind::Text {
            return Err(DatabaseError::Invalid(format!(
                "bookmark {id} is a {kind} bookmark, not a text"
            )));
        }
        if text.trim().is_empty() {
            return Err(DatabaseError::Invalid(
                "text bookmark cannot be empty".to_string(),
            ));
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE bookmark_texts SET text = ? WHERE id = ?")
            .bind(text)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE bookmarks SET modified_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a bookmark.
    ///
    /// Extension rows, tag and list memberships and linked assets cascade.
    /// Feed imports that produced this bookmark keep their row with
    /// `bookmark_id` set to NULL, so the entry is not imported again.
    pub async fn delete_bookmark(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM bookmarks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result, "bookmark", id)?;
        tracing::debug!(bookmark_id = %id, "Deleted bookmark");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::storage::{
        AssetType, BookmarkAssetType, BookmarkContent, BookmarkFilter, BookmarkKind,
        BookmarkUpdate, CrawlResult, CrawlStatus, Database, DatabaseError, NewAsset, NewBookmark,
        NewBookmarkContent, NewUser, TaggingStatus,
    };

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    async fn test_user(db: &Database, name: &str) -> String {
        db.create_user(NewUser {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            ..NewUser::default()
        })
        .await
        .unwrap()
        .id
    }

    async fn upload(db: &Database, user_id: &str) -> String {
        db.create_asset(NewAsset {
            id: None,
            user_id: user_id.to_string(),
            asset_type: AssetType::BookmarkAsset,
            size: 512,
            content_type: Some("application/pdf".to_string()),
            file_name: Some("paper.pdf".to_string()),
            bookmark_id: None,
        })
        .await
        .unwrap()
        .id
    }

    fn asset_bookmark(asset_id: &str) -> NewBookmark {
        NewBookmark::with_content(NewBookmarkContent::Asset {
            asset_type: BookmarkAssetType::Pdf,
            asset_id: asset_id.to_string(),
            file_name: Some("paper.pdf".to_string()),
            source_url: Some("https://example.com/paper.pdf".to_string()),
        })
    }

    #[tokio::test]
    async fn test_create_link_bookmark() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;

        let created = db
            .create_bookmark(&user, NewBookmark::link("https://example.com/post"))
            .await
            .unwrap();
        assert!(!created.already_exists);

        let bookmark = created.bookmark;
        assert_eq!(bookmark.kind(), BookmarkKind::Link);
        assert_eq!(bookmark.user_id, user);
        assert_eq!(bookmark.tagging_status, Some(TaggingStatus::Pending));
        assert!(!bookmark.archived);
        assert!(bookmark.tags.is_empty());
        match bookmark.content {
            BookmarkContent::Link(link) => {
                assert_eq!(link.url, "https://example.com/post");
                assert_eq!(link.crawl_status, Some(CrawlStatus::Pending));
            }
            other => panic!("expected link content, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_link_returns_existing() {
        let db = test_db().await;
        let ada = test_user(&db, "Ada").await;
        let bob = test_user(&db, "Bob").await;

        let first = db
            .create_bookmark(&ada, NewBookmark::link("https://example.com/a"))
            .await
            .unwrap();
        let second = db
            .create_bookmark(&ada, NewBookmark::link("https://example.com/a"))
            .await
            .unwrap();
        assert!(second.already_exists);
        assert_eq!(second.bookmark.id, first.bookmark.id);

        // Another user's copy is independent
        let other = db
            .create_bookmark(&bob, NewBookmark::link("https://example.com/a"))
            .await
            .unwrap();
        assert!(!other.already_exists);
        assert_ne!(other.bookmark.id, first.bookmark.id);
    }

    #[tokio::test]
    async fn test_create_link_rejects_bad_scheme() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;

        let err = db
            .create_bookmark(&user, NewBookmark::link("javascript:alert(1)"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_create_bookmark_unknown_user() {
        let db = test_db().await;
        let err = db
            .create_bookmark("ghost", NewBookmark::text("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound("user", _)));
    }

    #[tokio::test]
    async fn test_create_text_bookmark() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;

        let mut new = NewBookmark::with_content(NewBookmarkContent::Text {
            text: "remember the milk".to_string(),
            source_url: Some("https://notes.example.com".to_string()),
        });
        new.title = Some("  \x1b[1mGroceries\x1b[0m ".to_string());
        new.favourited = true;

        let bookmark = db.create_bookmark(&user, new).await.unwrap().bookmark;
        assert_eq!(bookmark.title.as_deref(), Some("Groceries"));
        assert!(bookmark.favourited);
        match bookmark.content {
            BookmarkContent::Text(text) => {
                assert_eq!(text.text.as_deref(), Some("remember the milk"));
                assert_eq!(text.source_url.as_deref(), Some("https://notes.example.com"));
            }
            other => panic!("expected text content, got {other:?}"),
        }

        let err = db
            .create_bookmark(&user, NewBookmark::text("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_list_bookmarks_filters() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;

        let link = db
            .create_bookmark(&user, NewBookmark::link("https://rust-lang.org"))
            .await
            .unwrap()
            .bookmark;
        let text = db
            .create_bookmark(&user, NewBookmark::text("borrow checker notes"))
            .await
            .unwrap()
            .bookmark;

        db.update_bookmark(
            &link.id,
            BookmarkUpdate {
                archived: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let all = db
            .list_bookmarks(&user, &BookmarkFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let archived = db
            .list_bookmarks(
                &user,
                &BookmarkFilter {
                    archived: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, link.id);

        let texts = db
            .list_bookmarks(
                &user,
                &BookmarkFilter {
                    kind: Some(BookmarkKind::Text),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].id, text.id);

        let found = db
            .list_bookmarks(
                &user,
                &BookmarkFilter {
                    search: Some("BORROW".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, text.id);

        let by_url = db
            .list_bookmarks(
                &user,
                &BookmarkFilter {
                    search: Some("rust-lang".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_url.len(), 1);
        assert_eq!(by_url[0].id, link.id);
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;
        db.create_bookmark(&user, NewBookmark::text("plain words"))
            .await
            .unwrap();
        db.create_bookmark(&user, NewBookmark::text("100% done"))
            .await
            .unwrap();

        let found = db
            .list_bookmarks(
                &user,
                &BookmarkFilter {
                    search: Some("%".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_list_bookmarks_limit_and_scope() {
        let db = test_db().await;
        let ada = test_user(&db, "Ada").await;
        let bob = test_user(&db, "Bob").await;

        for i in 0..5 {
            db.create_bookmark(&ada, NewBookmark::text(format!("note {i}")))
                .await
                .unwrap();
        }
        db.create_bookmark(&bob, NewBookmark::text("bob's note"))
            .await
            .unwrap();

        let page = db
            .list_bookmarks(
                &ada,
                &BookmarkFilter {
                    limit: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 3);
        assert!(page.iter().all(|b| b.user_id == ada));

        // A zero limit is clamped up to one row
        let one = db
            .list_bookmarks(
                &ada,
                &BookmarkFilter {
                    limit: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn test_update_bookmark_fields() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;
        let bookmark = db
            .create_bookmark(&user, NewBookmark::text("draft"))
            .await
            .unwrap()
            .bookmark;
        assert!(bookmark.modified_at.is_none());

        db.update_bookmark(
            &bookmark.id,
            BookmarkUpdate {
                title: Some(Some("Final".to_string())),
                note: Some(Some("a note".to_string())),
                favourited: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let updated = db.get_bookmark(&bookmark.id).await.unwrap().unwrap();
        assert_eq!(updated.title.as_deref(), Some("Final"));
        assert_eq!(updated.note.as_deref(), Some("a note"));
        assert!(updated.favourited);
        assert!(updated.modified_at.is_some());

        // Some(None) clears a nullable field
        db.update_bookmark(
            &bookmark.id,
            BookmarkUpdate {
                note: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let cleared = db.get_bookmark(&bookmark.id).await.unwrap().unwrap();
        assert_eq!(cleared.note, None);
        assert_eq!(cleared.title.as_deref(), Some("Final"));

        let err = db
            .update_bookmark("missing", BookmarkUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound("bookmark", _)));
    }

    #[tokio::test]
    async fn test_record_crawl_keeps_previous_metadata() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;
        let bookmark = db
            .create_bookmark(&user, NewBookmark::link("https://example.com/article"))
            .await
            .unwrap()
            .bookmark;

        let mut crawl = CrawlResult::failed();
        crawl.status = CrawlStatus::Success;
        crawl.title = Some("An Article".to_string());
        crawl.author = Some("Someone".to_string());
        db.record_crawl(&bookmark.id, crawl).await.unwrap();

        db.record_crawl(&bookmark.id, CrawlResult::failed())
            .await
            .unwrap();

        let bookmark = db.get_bookmark(&bookmark.id).await.unwrap().unwrap();
        let BookmarkContent::Link(link) = bookmark.content else {
            panic!("expected link content");
        };
        assert_eq!(link.title.as_deref(), Some("An Article"));
        assert_eq!(link.author.as_deref(), Some("Someone"));
        assert_eq!(link.crawl_status, Some(CrawlStatus::Failure));
        assert!(link.crawled_at.is_some());
    }

    #[tokio::test]
    async fn test_record_crawl_rejects_text_bookmark() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;
        let bookmark = db
            .create_bookmark(&user, NewBookmark::text("not a link"))
            .await
            .unwrap()
            .bookmark;

        let err = db
            .record_crawl(&bookmark.id, CrawlResult::failed())
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_update_bookmark_text() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;
        let text = db
            .create_bookmark(&user, NewBookmark::text("v1"))
            .await
            .unwrap()
            .bookmark;
        let link = db
            .create_bookmark(&user, NewBookmark::link("https://example.com"))
            .await
            .unwrap()
            .bookmark;

        db.update_bookmark_text(&text.id, "v2").await.unwrap();
        let text = db.get_bookmark(&text.id).await.unwrap().unwrap();
        assert!(matches!(
            text.content,
            BookmarkContent::Text(ref t) if t.text.as_deref() == Some("v2")
        ));

        let err = db.update_bookmark_text(&link.id, "v2").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_set_tagging_status() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;
        let bookmark = db
            .create_bookmark(&user, NewBookmark::text("tag me"))
            .await
            .unwrap()
            .bookmark;

        db.set_tagging_status(&bookmark.id, TaggingStatus::Success)
            .await
            .unwrap();
        let bookmark = db.get_bookmark(&bookmark.id).await.unwrap().unwrap();
        assert_eq!(bookmark.tagging_status, Some(TaggingStatus::Success));
    }

    #[tokio::test]
    async fn test_delete_bookmark_cascades_extension_row() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;
        let bookmark = db
            .create_bookmark(&user, NewBookmark::link("https://example.com"))
            .await
            .unwrap()
            .bookmark;

        db.delete_bookmark(&bookmark.id).await.unwrap();
        assert!(db.get_bookmark(&bookmark.id).await.unwrap().is_none());

        let (links,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bookmark_links")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(links, 0);

        let err = db.delete_bookmark(&bookmark.id).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound("bookmark", _)));
    }

    #[tokio::test]
    async fn test_create_asset_bookmark() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;
        let asset_id = upload(&db, &user).await;

        let bookmark = db
            .create_bookmark(&user, asset_bookmark(&asset_id))
            .await
            .unwrap()
            .bookmark;
        assert_eq!(bookmark.kind(), BookmarkKind::Asset);

        let read_back = db.get_bookmark(&bookmark.id).await.unwrap().unwrap();
        match read_back.content {
            BookmarkContent::Asset(content) => {
                assert_eq!(content.asset_type, BookmarkAssetType::Pdf);
                assert_eq!(content.asset_id, asset_id);
                assert_eq!(content.file_name.as_deref(), Some("paper.pdf"));
                assert_eq!(
                    content.source_url.as_deref(),
                    Some("https://example.com/paper.pdf")
                );
            }
            other => panic!("expected asset content, got {other:?}"),
        }

        let asset = db.get_asset(&asset_id).await.unwrap().unwrap();
        assert_eq!(asset.bookmark_id.as_deref(), Some(bookmark.id.as_str()));
        assert_eq!(asset.asset_type, AssetType::BookmarkAsset);

        let stats = db.user_stats(&user).await.unwrap();
        assert_eq!(stats.asset_bookmarks, 1);
        assert_eq!(stats.bookmarks, 1);
    }

    #[tokio::test]
    async fn test_asset_bookmark_rejects_missing_or_foreign_asset() {
        let db = test_db().await;
        let ada = test_user(&db, "Ada").await;
        let bob = test_user(&db, "Bob").await;
        let bobs_asset = upload(&db, &bob).await;

        let err = db
            .create_bookmark(&ada, asset_bookmark(&bobs_asset))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Invalid(_)));

        let err = db
            .create_bookmark(&ada, asset_bookmark("no-such-asset"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound("asset", _)));

        // Nothing was left behind by the failed attempts
        let stats = db.user_stats(&ada).await.unwrap();
        assert_eq!(stats.bookmarks, 0);
        let asset = db.get_asset(&bobs_asset).await.unwrap().unwrap();
        assert_eq!(asset.bookmark_id, None);
    }

    #[tokio::test]
    async fn test_asset_cannot_back_two_bookmarks() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;
        let asset_id = upload(&db, &user).await;

        let first = db
            .create_bookmark(&user, asset_bookmark(&asset_id))
            .await
            .unwrap()
            .bookmark;
        let err = db
            .create_bookmark(&user, asset_bookmark(&asset_id))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));

        // The first bookmark still owns its asset
        let asset = db.get_asset(&asset_id).await.unwrap().unwrap();
        assert_eq!(asset.bookmark_id.as_deref(), Some(first.id.as_str()));
        assert_eq!(db.user_stats(&user).await.unwrap().bookmarks, 1);
    }

    #[tokio::test]
    async fn test_asset_already_attached_elsewhere_conflicts() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;
        let link = db
            .create_bookmark(&user, NewBookmark::link("https://example.com"))
            .await
            .unwrap()
            .bookmark;
        let shot = db
            .create_asset(NewAsset {
                id: None,
                user_id: user.clone(),
                asset_type: AssetType::Screenshot,
                size: 10,
                content_type: None,
                file_name: None,
                bookmark_id: Some(link.id.clone()),
            })
            .await
            .unwrap();

        let err = db
            .create_bookmark(&user, asset_bookmark(&shot.id))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
        let shot = db.get_asset(&shot.id).await.unwrap().unwrap();
        assert_eq!(shot.bookmark_id.as_deref(), Some(link.id.as_str()));
        assert_eq!(shot.asset_type, AssetType::Screenshot);
    }

    #[tokio::test]
    async fn test_delete_asset_bookmark_removes_asset() {
        let db = test_db().await;
        let user = test_user(&db, "Ada").await;
        let asset_id = upload(&db, &user).await;
        let bookmark = db
            .create_bookmark(&user, asset_bookmark(&asset_id))
            .await
            .unwrap()
            .bookmark;

        db.delete_bookmark(&bookmark.id).await.unwrap();

        assert!(db.get_asset(&asset_id).await.unwrap().is_none());
        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bookmark_assets")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }
}
