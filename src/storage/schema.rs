use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Options
// ============================================================================

/// Connection and policy settings for [`Database::open_with`].
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
    /// Largest accepted asset record, in bytes. `None` disables the check.
    pub max_asset_bytes: Option<i64>,
    /// Icon given to lists created without one
    pub default_list_icon: String,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout: Duration::from_millis(5000),
            max_asset_bytes: Some(50 * 1024 * 1024),
            default_list_icon: "📚".to_string(),
        }
    }
}

// ============================================================================
// Database
// ============================================================================

/// Handle to the bookmark store. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) options: DatabaseOptions,
}

impl Database {
    /// Open a database with default options and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database (used by tests).
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        Self::open_with(path, &DatabaseOptions::default()).await
    }

    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema could not be applied.
    pub async fn open_with(path: &str, options: &DatabaseOptions) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Create the file owner-only before SQLite does it with the default umask
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    use std::os::unix::fs::OpenOptionsExt;
                    // If creation fails, SQLite reports the error at connect time.
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok();
                }
            }
        }

        let options_sqlite = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .busy_timeout(options.busy_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options_sqlite)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self {
            pool,
            options: options.clone(),
        };
        db.migrate().await.map_err(|e| match DatabaseError::from_sqlx(e) {
            DatabaseError::InstanceLocked => DatabaseError::InstanceLocked,
            other => DatabaseError::Migration(other.to_string()),
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// Every statement uses `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op. A failure rolls back the whole schema.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for &statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Schema, in dependency order.
///
/// Ownership edges (`user_id`) cascade. Bookmark extension rows share the
/// bookmark's primary key and cascade with it. References that must survive
/// their target (`bookmark_lists.parent_id`, `rss_feed_imports.bookmark_id`)
/// are `SET NULL`.
const SCHEMA: &[&str] = &[
    // ------------------------------------------------------------------ users
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        email_verified INTEGER,
        image TEXT,
        password_hash TEXT,
        role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('admin', 'user')),
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        provider TEXT NOT NULL,
        provider_account_id TEXT NOT NULL,
        refresh_token TEXT,
        access_token TEXT,
        expires_at INTEGER,
        token_type TEXT,
        scope TEXT,
        id_token TEXT,
        session_state TEXT,
        PRIMARY KEY (provider, provider_account_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        session_token TEXT PRIMARY KEY NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires)",
    r#"
    CREATE TABLE IF NOT EXISTS verification_tokens (
        identifier TEXT NOT NULL,
        token TEXT NOT NULL,
        expires INTEGER NOT NULL,
        PRIMARY KEY (identifier, token)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS api_keys (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        key_id TEXT NOT NULL UNIQUE,
        key_hash TEXT NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        UNIQUE (name, user_id)
    )
    "#,
    // -------------------------------------------------------------- bookmarks
    r#"
    CREATE TABLE IF NOT EXISTS bookmarks (
        id TEXT PRIMARY KEY NOT NULL,
        created_at INTEGER NOT NULL,
        modified_at INTEGER,
        title TEXT,
        archived INTEGER NOT NULL DEFAULT 0,
        favourited INTEGER NOT NULL DEFAULT 0,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        tagging_status TEXT DEFAULT 'pending'
            CHECK (tagging_status IN ('pending', 'failure', 'success')),
        note TEXT,
        summary TEXT,
        kind TEXT NOT NULL CHECK (kind IN ('link', 'text', 'asset'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_bookmarks_user ON bookmarks(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_bookmarks_user_created ON bookmarks(user_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_bookmarks_archived ON bookmarks(archived)",
    "CREATE INDEX IF NOT EXISTS idx_bookmarks_favourited ON bookmarks(favourited)",
    r#"
    CREATE TABLE IF NOT EXISTS bookmark_links (
        id TEXT PRIMARY KEY NOT NULL REFERENCES bookmarks(id) ON DELETE CASCADE,
        url TEXT NOT NULL,
        title TEXT,
        description TEXT,
        author TEXT,
        publisher TEXT,
        date_published INTEGER,
        date_modified INTEGER,
        image_url TEXT,
        favicon TEXT,
        content TEXT,
        html_content TEXT,
        crawled_at INTEGER,
        crawl_status TEXT DEFAULT 'pending'
            CHECK (crawl_status IN ('pending', 'failure', 'success'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_bookmark_links_url ON bookmark_links(url)",
    r#"
    CREATE TABLE IF NOT EXISTS bookmark_texts (
        id TEXT PRIMARY KEY NOT NULL REFERENCES bookmarks(id) ON DELETE CASCADE,
        text TEXT,
        source_url TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bookmark_assets (
        id TEXT PRIMARY KEY NOT NULL REFERENCES bookmarks(id) ON DELETE CASCADE,
        asset_type TEXT NOT NULL CHECK (asset_type IN ('image', 'pdf')),
        asset_id TEXT NOT NULL,
        content TEXT,
        metadata TEXT,
        file_name TEXT,
        source_url TEXT
    )
    "#,
    // ----------------------------------------------------------------- assets
    r#"
    CREATE TABLE IF NOT EXISTS assets (
        id TEXT PRIMARY KEY NOT NULL,
        asset_type TEXT NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        content_type TEXT,
        file_name TEXT,
        bookmark_id TEXT REFERENCES bookmarks(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_assets_bookmark ON assets(bookmark_id)",
    "CREATE INDEX IF NOT EXISTS idx_assets_type ON assets(asset_type)",
    "CREATE INDEX IF NOT EXISTS idx_assets_user ON assets(user_id)",
    // ------------------------------------------------------------------- tags
    r#"
    CREATE TABLE IF NOT EXISTS bookmark_tags (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        UNIQUE (user_id, name)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_bookmark_tags_name ON bookmark_tags(name)",
    "CREATE INDEX IF NOT EXISTS idx_bookmark_tags_user ON bookmark_tags(user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS tags_on_bookmarks (
        bookmark_id TEXT NOT NULL REFERENCES bookmarks(id) ON DELETE CASCADE,
        tag_id TEXT NOT NULL REFERENCES bookmark_tags(id) ON DELETE CASCADE,
        attached_at INTEGER NOT NULL,
        attached_by TEXT NOT NULL CHECK (attached_by IN ('ai', 'human')),
        PRIMARY KEY (bookmark_id, tag_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tags_on_bookmarks_tag ON tags_on_bookmarks(tag_id)",
    // ------------------------------------------------------------------ lists
    r#"
    CREATE TABLE IF NOT EXISTS bookmark_lists (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        icon TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        parent_id TEXT REFERENCES bookmark_lists(id) ON DELETE SET NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_bookmark_lists_user ON bookmark_lists(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_bookmark_lists_parent ON bookmark_lists(parent_id)",
    r#"
    CREATE TABLE IF NOT EXISTS bookmarks_in_lists (
        bookmark_id TEXT NOT NULL REFERENCES bookmarks(id) ON DELETE CASCADE,
        list_id TEXT NOT NULL REFERENCES bookmark_lists(id) ON DELETE CASCADE,
        added_at INTEGER NOT NULL,
        PRIMARY KEY (bookmark_id, list_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_bookmarks_in_lists_list ON bookmarks_in_lists(list_id)",
    // ---------------------------------------------------------------- prompts
    r#"
    CREATE TABLE IF NOT EXISTS custom_prompts (
        id TEXT PRIMARY KEY NOT NULL,
        text TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        applies_to TEXT NOT NULL DEFAULT 'all' CHECK (applies_to IN ('all', 'images')),
        created_at INTEGER NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_custom_prompts_user ON custom_prompts(user_id)",
    // ------------------------------------------------------------------ feeds
    r#"
    CREATE TABLE IF NOT EXISTS rss_feeds (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        last_fetched_at INTEGER,
        last_fetched_status TEXT DEFAULT 'pending'
            CHECK (last_fetched_status IN ('pending', 'failure', 'success')),
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_rss_feeds_user ON rss_feeds(user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS rss_feed_imports (
        id TEXT PRIMARY KEY NOT NULL,
        created_at INTEGER NOT NULL,
        entry_id TEXT NOT NULL,
        rss_feed_id TEXT NOT NULL REFERENCES rss_feeds(id) ON DELETE CASCADE,
        bookmark_id TEXT REFERENCES bookmarks(id) ON DELETE SET NULL,
        UNIQUE (rss_feed_id, entry_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_rss_feed_imports_feed ON rss_feed_imports(rss_feed_id)",
    "CREATE INDEX IF NOT EXISTS idx_rss_feed_imports_bookmark ON rss_feed_imports(bookmark_id)",
    // ----------------------------------------------------------------- config
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    )
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_all_tables() {
        let db = Database::open(":memory:").await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();

        for expected in [
            "accounts",
            "api_keys",
            "assets",
            "bookmark_assets",
            "bookmark_links",
            "bookmark_lists",
            "bookmark_tags",
            "bookmark_texts",
            "bookmarks",
            "bookmarks_in_lists",
            "config",
            "custom_prompts",
            "rss_feed_imports",
            "rss_feeds",
            "sessions",
            "tags_on_bookmarks",
            "users",
            "verification_tokens",
        ] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let db = Database::open(":memory:").await.unwrap();
        let row: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = std::env::temp_dir().join(format!("keepsake_schema_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("keepsake.db");
        let path_str = path.to_str().unwrap();

        let db = Database::open(path_str).await.unwrap();
        db.close().await;
        // Reopen runs migrations against the existing schema
        let db = Database::open(path_str).await.unwrap();
        db.close().await;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        std::fs::remove_dir_all(&dir).ok();
    }
}
