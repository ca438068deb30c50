use std::collections::HashSet;

use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{
    expect_affected, parse_column, AttachedBy, BookmarkTag, DatabaseError, Tag, TagUsage,
};
use crate::util::{new_id, sanitize_name};

/// Map a unique violation on `(user_id, name)` to a readable conflict.
fn tag_conflict(name: &str) -> impl FnOnce(sqlx::Error) -> DatabaseError + '_ {
    move |e| match DatabaseError::from_sqlx(e) {
        DatabaseError::Conflict(_) => {
            DatabaseError::Conflict(format!("a tag named '{name}' already exists"))
        }
        other => other,
    }
}

impl Database {
    // ========================================================================
    // Tag Operations
    // ========================================================================

    /// Create a tag for a user. Names are unique per user.
    pub async fn create_tag(&self, user_id: &str, name: &str) -> Result<Tag, DatabaseError> {
        let name = sanitize_name("Tag", name).map_err(DatabaseError::Invalid)?;
        let tag = Tag {
            id: new_id(),
            user_id: user_id.to_owned(),
            name,
            created_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query("INSERT INTO bookmark_tags (id, name, created_at, user_id) VALUES (?, ?, ?, ?)")
            .bind(&tag.id)
            .bind(&tag.name)
            .bind(tag.created_at)
            .bind(&tag.user_id)
            .execute(&self.pool)
            .await
            .map_err(tag_conflict(&tag.name))?;

        Ok(tag)
    }

    pub async fn get_tag(&self, id: &str) -> Result<Option<Tag>, DatabaseError> {
        let tag = sqlx::query_as::<_, Tag>(
            "SELECT id, user_id, name, created_at FROM bookmark_tags WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tag)
    }

    /// Attach tags to a bookmark by name, creating missing tags for the
    /// bookmark's owner.
    ///
    /// Names are sanitized and de-duplicated. Re-attaching a tag that is
    /// already on the bookmark keeps the original attribution and timestamp.
    /// Returns the ids of the attached tags, in input order.
    pub async fn attach_tags<S: AsRef<str>>(
        &self,
        bookmark_id: &str,
        names: &[S],
        attached_by: AttachedBy,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut clean_names = Vec::with_capacity(names.len());
        let mut seen = HashSet::new();
        for name in names {
            let clean = sanitize_name("Tag", name.as_ref()).map_err(DatabaseError::Invalid)?;
            if seen.insert(clean.clone()) {
                clean_names.push(clean);
            }
        }

        let (user_id, _) = self.bookmark_owner_and_kind(bookmark_id).await?;
        let now = chrono::Utc::now().timestamp();
        let mut tag_ids = Vec::with_capacity(clean_names.len());
        let mut tx = self.pool.begin().await?;

        for name in &clean_names {
            sqlx::query(
                r#"
                INSERT INTO bookmark_tags (id, name, created_at, user_id)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(user_id, name) DO NOTHING
            "#,
            )
            .bind(new_id())
            .bind(name)
            .bind(now)
            .bind(&user_id)
            .execute(&mut *tx)
            .await?;

            let (tag_id,): (String,) =
                sqlx::query_as("SELECT id FROM bookmark_tags WHERE user_id = ? AND name = ?")
                    .bind(&user_id)
                    .bind(name)
                    .fetch_one(&mut *tx)
                    .await?;

            sqlx::query(
                r#"
                INSERT OR IGNORE INTO tags_on_bookmarks (bookmark_id, tag_id, attached_at, attached_by)
                VALUES (?, ?, ?, ?)
            "#,
            )
            .bind(bookmark_id)
            .bind(&tag_id)
            .bind(now)
            .bind(attached_by.as_str())
            .execute(&mut *tx)
            .await?;

            tag_ids.push(tag_id);
        }

        sqlx::query("UPDATE bookmarks SET modified_at = ? WHERE id = ?")
            .bind(now)
            .bind(bookmark_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(
            bookmark_id = %bookmark_id,
            count = tag_ids.len(),
            attached_by = %attached_by,
            "Attached tags"
        );
        Ok(tag_ids)
    }

    /// Remove tags from a bookmark. Returns how many attachments were removed.
    pub async fn detach_tags<S: AsRef<str>>(
        &self,
        bookmark_id: &str,
        tag_ids: &[S],
    ) -> Result<u64, DatabaseError> {
        if tag_ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("DELETE FROM tags_on_bookmarks WHERE bookmark_id = ");
        builder.push_bind(bookmark_id);
        builder.push(" AND tag_id IN (");
        let mut separated = builder.separated(", ");
        for tag_id in tag_ids {
            separated.push_bind(tag_id.as_ref().to_owned());
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Tags on one bookmark, ordered by name.
    pub async fn tags_for_bookmark(
        &self,
        bookmark_id: &str,
    ) -> Result<Vec<BookmarkTag>, DatabaseError> {
        let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT t.id, t.name, tb.attached_by, tb.attached_at
            FROM tags_on_bookmarks tb
            JOIN bookmark_tags t ON t.id = tb.tag_id
            WHERE tb.bookmark_id = ?
            ORDER BY t.name
        "#,
        )
        .bind(bookmark_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, name, attached_by, attached_at)| {
                Ok(BookmarkTag {
                    id,
                    name,
                    attached_by: parse_column(&attached_by)?,
                    attached_at,
                })
            })
            .collect()
    }

    /// All of a user's tags with usage counts, ordered by name.
    pub async fn list_tags(&self, user_id: &str) -> Result<Vec<TagUsage>, DatabaseError> {
        let tags = sqlx::query_as::<_, TagUsage>(
            r#"
            SELECT
                t.id, t.name,
                COUNT(CASE WHEN tb.attached_by = 'human' THEN 1 END) AS human_count,
                COUNT(CASE WHEN tb.attached_by = 'ai' THEN 1 END) AS ai_count
            FROM bookmark_tags t
            LEFT JOIN tags_on_bookmarks tb ON tb.tag_id = t.id
            WHERE t.user_id = ?
            GROUP BY t.id
            ORDER BY t.name
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }

    pub async fn rename_tag(&self, id: &str, new_name: &str) -> Result<(), DatabaseError> {
        let name = sanitize_name("Tag", new_name).map_err(DatabaseError::Invalid)?;
        let result = sqlx::query("UPDATE bookmark_tags SET name = ? WHERE id = ?")
            .bind(&name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(tag_conflict(&name))?;
        expect_affected(result, "tag", id)
    }

    /// Delete a tag; its attachments cascade.
    pub async fn delete_tag(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM bookmark_tags WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result, "tag", id)
    }

    /// Fold `from_ids` into `into_id`.
    ///
    /// Every bookmark carrying one of the source tags ends up carrying the
    /// target tag exactly once; the source tags are then deleted. All tags
    /// must belong to the same user. Returns the number of tags removed.
    pub async fn merge_tags<S: AsRef<str>>(
        &self,
        into_id: &str,
        from_ids: &[S],
    ) -> Result<u64, DatabaseError> {
        let sources: Vec<String> = from_ids
            .iter()
            .map(|s| s.as_ref().to_owned())
            .filter(|s| s != into_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if sources.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        let target_owner: Option<(String,)> =
            sqlx::query_as("SELECT user_id FROM bookmark_tags WHERE id = ?")
                .bind(into_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((owner,)) = target_owner else {
            return Err(DatabaseError::not_found("tag", into_id));
        };

        for source in &sources {
            let source_owner: Option<(String,)> =
                sqlx::query_as("SELECT user_id FROM bookmark_tags WHERE id = ?")
                    .bind(source)
                    .fetch_optional(&mut *tx)
                    .await?;
            match source_owner {
                None => return Err(DatabaseError::not_found("tag", source)),
                Some((source_owner,)) if source_owner != owner => {
                    return Err(DatabaseError::Invalid(
                        "cannot merge tags that belong to different users".to_string(),
                    ))
                }
                Some(_) => {}
            }
        }

        let mut copy: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO tags_on_bookmarks (bookmark_id, tag_id, attached_at, attached_by) SELECT bookmark_id, ",
        );
        copy.push_bind(into_id);
        copy.push(", attached_at, attached_by FROM tags_on_bookmarks WHERE tag_id IN (");
        let mut separated = copy.separated(", ");
        for source in &sources {
            separated.push_bind(source.as_str());
        }
        separated.push_unseparated(")");
        copy.build().execute(&mut *tx).await?;

        let mut delete: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("DELETE FROM bookmark_tags WHERE id IN (");
        let mut separated = delete.separated(", ");
        for source in &sources {
            separated.push_bind(source.as_str());
        }
        separated.push_unseparated(")");
        let removed = delete.build().execute(&mut *tx).await?.rows_affected();

        tx.commit().await?;
        tracing::info!(into = %into_id, removed, "Merged tags");
        Ok(removed)
    }

    /// Delete a user's tags that are attached to no bookmark.
    pub async fn delete_unused_tags(&self, user_id: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            DELETE FROM bookmark_tags
            WHERE user_id = ?
              AND NOT EXISTS (SELECT 1 FROM tags_on_bookmarks tb WHERE tb.tag_id = bookmark_tags.id)
        "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
