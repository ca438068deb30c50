use super::schema::Database;
use super::types::{
    expect_affected, DatabaseError, NewUser, User, UserRole, UserRow, UserStats,
};
use crate::util::{new_id, sanitize_name};

/// Lowercase and trim an email address, rejecting obviously malformed input.
fn normalize_email(email: &str) -> Result<String, DatabaseError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(DatabaseError::Invalid(format!(
            "'{email}' is not a valid email address"
        ))),
    }
}

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Create a user.
    ///
    /// When `role` is `None`, the first user in the database becomes an
    /// admin and every later one a regular user. The count and the insert
    /// run in one transaction.
    ///
    /// # Errors
    ///
    /// `Conflict` if the email is already registered, `Invalid` for an
    /// empty name or malformed email.
    pub async fn create_user(&self, new_user: NewUser) -> Result<User, DatabaseError> {
        let name = sanitize_name("User", &new_user.name).map_err(DatabaseError::Invalid)?;
        let email = normalize_email(&new_user.email)?;
        let id = new_id();
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        let role = match new_user.role {
            Some(role) => role,
            None => {
                let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
                    .fetch_one(&mut *tx)
                    .await?;
                if count == 0 {
                    UserRole::Admin
                } else {
                    UserRole::User
                }
            }
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, image, password_hash, role, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&id)
        .bind(&name)
        .bind(&email)
        .bind(&new_user.image)
        .bind(&new_user.password_hash)
        .bind(role.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DatabaseError::from_sqlx(e) {
            DatabaseError::Conflict(_) => {
                DatabaseError::Conflict(format!("a user with email {email} already exists"))
            }
            other => other,
        })?;

        tx.commit().await?;

        tracing::info!(user_id = %id, role = %role, "Created user");
        Ok(User {
            id,
            name,
            email,
            email_verified: None,
            image: new_user.image,
            role,
            created_at: now,
        })
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, DatabaseError> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", UserRow::COLUMNS);
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(UserRow::into_user).transpose()
    }

    /// Look up a user by email (case-insensitive).
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        let sql = format!("SELECT {} FROM users WHERE email = ?", UserRow::COLUMNS);
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        row.map(UserRow::into_user).transpose()
    }

    /// All users, oldest first.
    pub async fn list_users(&self) -> Result<Vec<User>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM users ORDER BY created_at, name",
            UserRow::COLUMNS
        );
        let rows: Vec<UserRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(UserRow::into_user).collect()
    }

    /// Number of registered users.
    pub async fn count_users(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Change a user's role. Demoting the last remaining admin is rejected.
    pub async fn set_user_role(&self, id: &str, role: UserRole) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String,)> = sqlx::query_as("SELECT role FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some((current,)) = current else {
            return Err(DatabaseError::not_found("user", id));
        };

        if current == UserRole::Admin.as_str() && role == UserRole::User {
            let (admins,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'admin'")
                    .fetch_one(&mut *tx)
                    .await?;
            if admins <= 1 {
                return Err(DatabaseError::Invalid(
                    "cannot demote the last admin".to_string(),
                ));
            }
        }

        sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %id, role = %role, "Changed user role");
        Ok(())
    }

    pub async fn update_user_name(&self, id: &str, name: &str) -> Result<(), DatabaseError> {
        let name = sanitize_name("User", name).map_err(DatabaseError::Invalid)?;
        let result = sqlx::query("UPDATE users SET name = ? WHERE id = ?")
            .bind(&name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result, "user", id)
    }

    /// Record that the user's email address has been verified.
    pub async fn mark_email_verified(&self, id: &str) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("UPDATE users SET email_verified = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result, "user", id)
    }

    /// Replace the stored password hash (`None` disables password login).
    pub async fn set_password_hash(
        &self,
        id: &str,
        password_hash: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result, "user", id)
    }

    /// Fetch the stored password hash for verification by the auth layer.
    pub async fn password_hash(&self, id: &str) -> Result<Option<String>, DatabaseError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT password_hash FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((hash,)) => Ok(hash),
            None => Err(DatabaseError::not_found("user", id)),
        }
    }

    /// Delete a user and, through `ON DELETE CASCADE`, everything they own.
    pub async fn delete_user(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result, "user", id)?;
        tracing::info!(user_id = %id, "Deleted user");
        Ok(())
    }

    /// Row counts for everything a user owns.
    pub async fn user_stats(&self, id: &str) -> Result<UserStats, DatabaseError> {
        if self.get_user(id).await?.is_none() {
            return Err(DatabaseError::not_found("user", id));
        }

        let row: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(CASE WHEN kind = 'link' THEN 1 END),
                COUNT(CASE WHEN kind = 'text' THEN 1 END),
                COUNT(CASE WHEN kind = 'asset' THEN 1 END),
                COUNT(CASE WHEN archived = 1 THEN 1 END),
                COUNT(CASE WHEN favourited = 1 THEN 1 END)
            FROM bookmarks
            WHERE user_id = ?
        "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        let owned: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM bookmark_tags WHERE user_id = ?1),
                (SELECT COUNT(*) FROM bookmark_lists WHERE user_id = ?1),
                (SELECT COUNT(*) FROM rss_feeds WHERE user_id = ?1),
                (SELECT COUNT(*) FROM assets WHERE user_id = ?1),
                (SELECT COALESCE(SUM(size), 0) FROM assets WHERE user_id = ?1)
        "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(UserStats {
            bookmarks: row.0,
            links: row.1,
            texts: row.2,
            asset_bookmarks: row.3,
            archived: row.4,
            favourited: row.5,
            tags: owned.0,
            lists: owned.1,
            feeds: owned.2,
            assets: owned.3,
            asset_bytes: owned.4,
        })
    }
}
