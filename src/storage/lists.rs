use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{expect_affected, BookmarkList, DatabaseError, ListUpdate, NewList};
use crate::util::{new_id, sanitize_name, strip_control_chars};

const LIST_COLUMNS: &str = "id, user_id, name, icon, parent_id, created_at";

impl Database {
    // ========================================================================
    // List Operations
    // ========================================================================

    /// Upper bound on the ancestor walk in [`update_list`](Self::update_list).
    /// Guards the recursive query if corrupted data already contains a cycle.
    const MAX_LIST_ANCESTORS: i64 = 100;

    fn clean_icon(&self, icon: Option<&str>) -> String {
        icon.map(|i| strip_control_chars(i).trim().to_owned())
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| self.options.default_list_icon.clone())
    }

    /// Owner of a list, or `NotFound`.
    async fn list_owner(&self, id: &str) -> Result<String, DatabaseError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT user_id FROM bookmark_lists WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(owner,)| owner)
            .ok_or_else(|| DatabaseError::not_found("list", id))
    }

    /// Create a list. A parent, if given, must belong to the same user.
    pub async fn create_list(
        &self,
        user_id: &str,
        new_list: NewList,
    ) -> Result<BookmarkList, DatabaseError> {
        let name = sanitize_name("List", &new_list.name).map_err(DatabaseError::Invalid)?;

        if let Some(parent_id) = &new_list.parent_id {
            if self.list_owner(parent_id).await? != user_id {
                return Err(DatabaseError::Invalid(
                    "parent list belongs to another user".to_string(),
                ));
            }
        }

        let list = BookmarkList {
            id: new_id(),
            user_id: user_id.to_owned(),
            name,
            icon: self.clean_icon(new_list.icon.as_deref()),
            parent_id: new_list.parent_id,
            created_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query(
            r#"
            INSERT INTO bookmark_lists (id, name, icon, created_at, user_id, parent_id)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&list.id)
        .bind(&list.name)
        .bind(&list.icon)
        .bind(list.created_at)
        .bind(&list.user_id)
        .bind(&list.parent_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tracing::debug!(list_id = %list.id, user_id = %user_id, "Created list");
        Ok(list)
    }

    pub async fn get_list(&self, id: &str) -> Result<Option<BookmarkList>, DatabaseError> {
        let sql = format!("SELECT {LIST_COLUMNS} FROM bookmark_lists WHERE id = ?");
        let list = sqlx::query_as::<_, BookmarkList>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(list)
    }

    /// All of a user's lists as a flat vector ordered by name.
    /// Callers build the tree from `parent_id`.
    pub async fn list_lists(&self, user_id: &str) -> Result<Vec<BookmarkList>, DatabaseError> {
        let sql = format!(
            "SELECT {LIST_COLUMNS} FROM bookmark_lists WHERE user_id = ? ORDER BY name, created_at"
        );
        let lists = sqlx::query_as::<_, BookmarkList>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(lists)
    }

    /// Rename, re-icon or re-parent a list.
    ///
    /// A new parent must belong to the same user and must not be the list
    /// itself or one of its descendants.
    pub async fn update_list(&self, id: &str, update: ListUpdate) -> Result<(), DatabaseError> {
        let owner = self.list_owner(id).await?;

        if let Some(Some(parent_id)) = &update.parent_id {
            if parent_id == id {
                return Err(DatabaseError::Invalid(
                    "a list cannot be its own parent".to_string(),
                ));
            }
            if self.list_owner(parent_id).await? != owner {
                return Err(DatabaseError::Invalid(
                    "parent list belongs to another user".to_string(),
                ));
            }
            if self.list_has_ancestor(parent_id, id).await? {
                return Err(DatabaseError::Invalid(
                    "moving the list there would create a cycle".to_string(),
                ));
            }
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE bookmark_lists SET ");
        let mut separated = builder.separated(", ");
        let mut changes = 0;

        if let Some(name) = &update.name {
            let name = sanitize_name("List", name).map_err(DatabaseError::Invalid)?;
            separated.push("name = ");
            separated.push_bind_unseparated(name);
            changes += 1;
        }
        if let Some(icon) = &update.icon {
            separated.push("icon = ");
            separated.push_bind_unseparated(self.clean_icon(Some(icon)));
            changes += 1;
        }
        if let Some(parent_id) = update.parent_id {
            separated.push("parent_id = ");
            separated.push_bind_unseparated(parent_id);
            changes += 1;
        }

        if changes == 0 {
            return Ok(());
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id);
        let result = builder.build().execute(&self.pool).await?;
        expect_affected(result, "list", id)
    }

    /// True if `ancestor` appears in the parent chain starting at `list_id`
    /// (inclusive).
    async fn list_has_ancestor(&self, list_id: &str, ancestor: &str) -> Result<bool, DatabaseError> {
        let (found,): (i64,) = sqlx::query_as(
            r#"
            WITH RECURSIVE chain(id, parent_id, depth) AS (
                SELECT id, parent_id, 0 FROM bookmark_lists WHERE id = ?
                UNION ALL
                SELECT l.id, l.parent_id, c.depth + 1
                FROM bookmark_lists l
                JOIN chain c ON l.id = c.parent_id
                WHERE c.depth < ?
            )
            SELECT COUNT(*) FROM chain WHERE id = ?
            "#,
        )
        .bind(list_id)
        .bind(Self::MAX_LIST_ANCESTORS)
        .bind(ancestor)
        .fetch_one(&self.pool)
        .await?;
        Ok(found > 0)
    }

    /// Delete a list. Child lists become top-level (`ON DELETE SET NULL`);
    /// memberships cascade, bookmarks stay.
    pub async fn delete_list(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM bookmark_lists WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result, "list", id)
    }

    /// Put a bookmark in a list. Returns false if it was already there.
    pub async fn add_to_list(&self, list_id: &str, bookmark_id: &str) -> Result<bool, DatabaseError> {
        let list_owner = self.list_owner(list_id).await?;
        let (bookmark_owner, _) = self.bookmark_owner_and_kind(bookmark_id).await?;
        if list_owner != bookmark_owner {
            return Err(DatabaseError::Invalid(
                "bookmark and list belong to different users".to_string(),
            ));
        }

        let result = sqlx::query(
            "INSERT OR IGNORE INTO bookmarks_in_lists (bookmark_id, list_id, added_at) VALUES (?, ?, ?)",
        )
        .bind(bookmark_id)
        .bind(list_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Take a bookmark out of a list. Returns false if it was not in it.
    pub async fn remove_from_list(
        &self,
        list_id: &str,
        bookmark_id: &str,
    ) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("DELETE FROM bookmarks_in_lists WHERE list_id = ? AND bookmark_id = ?")
                .bind(list_id)
                .bind(bookmark_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ids of the bookmarks in a list, most recently added first.
    pub async fn bookmark_ids_in_list(&self, list_id: &str) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT bookmark_id FROM bookmarks_in_lists WHERE list_id = ? ORDER BY added_at DESC, bookmark_id",
        )
        .bind(list_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Lists that contain a bookmark.
    pub async fn lists_for_bookmark(
        &self,
        bookmark_id: &str,
    ) -> Result<Vec<BookmarkList>, DatabaseError> {
        let lists = sqlx::query_as::<_, BookmarkList>(
            r#"
            SELECT l.id, l.user_id, l.name, l.icon, l.parent_id, l.created_at
            FROM bookmark_lists l
            JOIN bookmarks_in_lists bl ON bl.list_id = l.id
            WHERE bl.bookmark_id = ?
            ORDER BY l.name
        "#,
        )
        .bind(bookmark_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lists)
    }
}
