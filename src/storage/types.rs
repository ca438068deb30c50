use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors with user-facing messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("The keepsake database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A referenced row does not exist (entity kind, id)
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    /// A uniqueness rule was violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Input rejected before or by the database
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[source] sqlx::Error),
}

/// `?` on a sqlx result goes through the same classification as
/// [`DatabaseError::from_sqlx`].
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::from_sqlx(err)
    }
}

impl DatabaseError {
    /// Classify a sqlx error: lock contention, unique and foreign key
    /// violations get their own variants, everything else is `Other`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return DatabaseError::Conflict(db_err.message().to_owned());
            }
            if db_err.is_foreign_key_violation() {
                return DatabaseError::Invalid(format!(
                    "referenced row does not exist ({})",
                    db_err.message()
                ));
            }
        }

        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
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

    pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
        DatabaseError::NotFound(kind, id.to_owned())
    }
}

/// Fail with `NotFound` when an UPDATE/DELETE touched no row.
pub(crate) fn expect_affected(
    result: sqlx::sqlite::SqliteQueryResult,
    kind: &'static str,
    id: &str,
) -> Result<(), DatabaseError> {
    if result.rows_affected() == 0 {
        Err(DatabaseError::not_found(kind, id))
    } else {
        Ok(())
    }
}

// ============================================================================
// Enumerations
// ============================================================================

/// Declare an enum persisted as a TEXT column.
///
/// Generates `as_str`, `Display`, `FromStr` and serde impls that all agree on
/// the same literal for each variant.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(DatabaseError::Invalid(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum! {
    /// Account role
    UserRole { Admin => "admin", User => "user" }
}

text_enum! {
    /// Which extension table holds a bookmark's content
    BookmarkKind { Link => "link", Text => "text", Asset => "asset" }
}

text_enum! {
    /// Progress of automatic tagging for a bookmark
    TaggingStatus { Pending => "pending", Failure => "failure", Success => "success" }
}

text_enum! {
    /// Progress of crawling a link bookmark
    CrawlStatus { Pending => "pending", Failure => "failure", Success => "success" }
}

text_enum! {
    /// Outcome of the last poll of an RSS feed
    FeedFetchStatus { Pending => "pending", Failure => "failure", Success => "success" }
}

text_enum! {
    /// Who attached a tag to a bookmark
    AttachedBy { Ai => "ai", Human => "human" }
}

text_enum! {
    /// Kind of file stored for an asset bookmark
    BookmarkAssetType { Image => "image", Pdf => "pdf" }
}

text_enum! {
    /// Role of a stored file record
    AssetType {
        LinkHtmlContent => "link_html_content",
        Screenshot => "screenshot",
        AssetScreenshot => "asset_screenshot",
        BannerImage => "banner_image",
        FullPageArchive => "full_page_archive",
        Video => "video",
        BookmarkAsset => "bookmark_asset",
        PrecrawledArchive => "precrawled_archive",
        Unknown => "unknown",
    }
}

text_enum! {
    /// Which bookmarks a custom prompt applies to
    PromptAppliesTo { All => "all", Images => "images" }
}

/// Parse a TEXT column into one of the enums above.
pub(crate) fn parse_column<T>(value: &str) -> Result<T, DatabaseError>
where
    T: std::str::FromStr<Err = DatabaseError>,
{
    value.parse()
}

fn parse_optional<T>(value: Option<String>) -> Result<Option<T>, DatabaseError>
where
    T: std::str::FromStr<Err = DatabaseError>,
{
    value.as_deref().map(parse_column).transpose()
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub email_verified: Option<i64>,
    pub image: Option<String>,
    pub role: UserRole,
    pub created_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub email_verified: Option<i64>,
    pub image: Option<String>,
    pub role: String,
    pub created_at: i64,
}

impl UserRow {
    pub(crate) const COLUMNS: &'static str =
        "id, name, email, email_verified, image, role, created_at";

    pub(crate) fn into_user(self) -> Result<User, DatabaseError> {
        Ok(User {
            role: parse_column(&self.role)?,
            id: self.id,
            name: self.name,
            email: self.email,
            email_verified: self.email_verified,
            image: self.image,
            created_at: self.created_at,
        })
    }
}

/// Input for [`Database::create_user`](super::Database::create_user)
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    /// Already-hashed password; hashing belongs to the auth layer
    pub password_hash: Option<String>,
    pub image: Option<String>,
    /// `None` makes the first user an admin and everyone after a regular user
    pub role: Option<UserRole>,
}

/// Per-user row counts, as shown on an admin overview
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub bookmarks: i64,
    pub links: i64,
    pub texts: i64,
    pub asset_bookmarks: i64,
    pub archived: i64,
    pub favourited: i64,
    pub tags: i64,
    pub lists: i64,
    pub feeds: i64,
    pub assets: i64,
    pub asset_bytes: i64,
}

// ============================================================================
// Bookmarks
// ============================================================================

/// Link-specific bookmark data (`bookmark_links` row)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkContent {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub date_published: Option<i64>,
    pub date_modified: Option<i64>,
    pub image_url: Option<String>,
    pub favicon: Option<String>,
    pub content: Option<String>,
    pub html_content: Option<String>,
    pub crawled_at: Option<i64>,
    pub crawl_status: Option<CrawlStatus>,
}

/// Text-specific bookmark data (`bookmark_texts` row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextContent {
    pub text: Option<String>,
    pub source_url: Option<String>,
}

/// Asset-specific bookmark data (`bookmark_assets` row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetContent {
    pub asset_type: BookmarkAssetType,
    pub asset_id: String,
    pub content: Option<String>,
    pub metadata: Option<String>,
    pub file_name: Option<String>,
    pub source_url: Option<String>,
}

/// The single extension row of a bookmark
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookmarkContent {
    Link(LinkContent),
    Text(TextContent),
    Asset(AssetContent),
}

impl BookmarkContent {
    pub fn kind(&self) -> BookmarkKind {
        match self {
            BookmarkContent::Link(_) => BookmarkKind::Link,
            BookmarkContent::Text(_) => BookmarkKind::Text,
            BookmarkContent::Asset(_) => BookmarkKind::Asset,
        }
    }
}

/// A tag as attached to one bookmark
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkTag {
    pub id: String,
    pub name: String,
    pub attached_by: AttachedBy,
    pub attached_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bookmark {
    pub id: String,
    pub user_id: String,
    pub created_at: i64,
    pub modified_at: Option<i64>,
    pub title: Option<String>,
    pub archived: bool,
    pub favourited: bool,
    pub tagging_status: Option<TaggingStatus>,
    pub note: Option<String>,
    pub summary: Option<String>,
    pub content: BookmarkContent,
    pub tags: Vec<BookmarkTag>,
}

impl Bookmark {
    pub fn kind(&self) -> BookmarkKind {
        self.content.kind()
    }
}

/// Joined row of `bookmarks` with all three extension tables (LEFT JOINs).
///
/// Converted to [`Bookmark`] via `into_bookmark()`; tags are loaded separately.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BookmarkDbRow {
    pub id: String,
    pub user_id: String,
    pub created_at: i64,
    pub modified_at: Option<i64>,
    pub title: Option<String>,
    pub archived: bool,
    pub favourited: bool,
    pub tagging_status: Option<String>,
    pub note: Option<String>,
    pub summary: Option<String>,
    pub kind: String,
    pub link_url: Option<String>,
    pub link_title: Option<String>,
    pub link_description: Option<String>,
    pub link_author: Option<String>,
    pub link_publisher: Option<String>,
    pub link_date_published: Option<i64>,
    pub link_date_modified: Option<i64>,
    pub link_image_url: Option<String>,
    pub link_favicon: Option<String>,
    pub link_content: Option<String>,
    pub link_html_content: Option<String>,
    pub link_crawled_at: Option<i64>,
    pub link_crawl_status: Option<String>,
    pub text_text: Option<String>,
    pub text_source_url: Option<String>,
    pub asset_asset_type: Option<String>,
    pub asset_asset_id: Option<String>,
    pub asset_content: Option<String>,
    pub asset_metadata: Option<String>,
    pub asset_file_name: Option<String>,
    pub asset_source_url: Option<String>,
}

impl BookmarkDbRow {
    /// SELECT list + FROM clause shared by every bookmark query
    pub(crate) const SELECT: &'static str = r#"
        SELECT
            b.id, b.user_id, b.created_at, b.modified_at, b.title, b.archived,
            b.favourited, b.tagging_status, b.note, b.summary, b.kind,
            l.url AS link_url, l.title AS link_title, l.description AS link_description,
            l.author AS link_author, l.publisher AS link_publisher,
            l.date_published AS link_date_published, l.date_modified AS link_date_modified,
            l.image_url AS link_image_url, l.favicon AS link_favicon,
            l.content AS link_content, l.html_content AS link_html_content,
            l.crawled_at AS link_crawled_at, l.crawl_status AS link_crawl_status,
            t.text AS text_text, t.source_url AS text_source_url,
            a.asset_type AS asset_asset_type, a.asset_id AS asset_asset_id,
            a.content AS asset_content, a.metadata AS asset_metadata,
            a.file_name AS asset_file_name, a.source_url AS asset_source_url
        FROM bookmarks b
        LEFT JOIN bookmark_links l ON l.id = b.id
        LEFT JOIN bookmark_texts t ON t.id = b.id
        LEFT JOIN bookmark_assets a ON a.id = b.id
    "#;

    pub(crate) fn into_bookmark(self) -> Result<Bookmark, DatabaseError> {
        let kind: BookmarkKind = parse_column(&self.kind)?;
        let missing = || {
            DatabaseError::Invalid(format!(
                "bookmark {} has kind '{}' but no matching content row",
                self.id, self.kind
            ))
        };

        let content = match kind {
            BookmarkKind::Link => BookmarkContent::Link(LinkContent {
                url: self.link_url.ok_or_else(missing)?,
                title: self.link_title,
                description: self.link_description,
                author: self.link_author,
                publisher: self.link_publisher,
                date_published: self.link_date_published,
                date_modified: self.link_date_modified,
                image_url: self.link_image_url,
                favicon: self.link_favicon,
                content: self.link_content,
                html_content: self.link_html_content,
                crawled_at: self.link_crawled_at,
                crawl_status: parse_optional(self.link_crawl_status)?,
            }),
            BookmarkKind::Text => BookmarkContent::Text(TextContent {
                text: self.text_text,
                source_url: self.text_source_url,
            }),
            BookmarkKind::Asset => BookmarkContent::Asset(AssetContent {
                asset_type: parse_column(self.asset_asset_type.as_deref().ok_or_else(missing)?)?,
                asset_id: self.asset_asset_id.ok_or_else(missing)?,
                content: self.asset_content,
                metadata: self.asset_metadata,
                file_name: self.asset_file_name,
                source_url: self.asset_source_url,
            }),
        };

        Ok(Bookmark {
            id: self.id,
            user_id: self.user_id,
            created_at: self.created_at,
            modified_at: self.modified_at,
            title: self.title,
            archived: self.archived,
            favourited: self.favourited,
            tagging_status: parse_optional(self.tagging_status)?,
            note: self.note,
            summary: self.summary,
            content,
            tags: Vec::new(),
        })
    }
}

/// Content of a bookmark being created
#[derive(Debug, Clone)]
pub enum NewBookmarkContent {
    Link {
        url: String,
    },
    Text {
        text: String,
        source_url: Option<String>,
    },
    Asset {
        asset_type: BookmarkAssetType,
        asset_id: String,
        file_name: Option<String>,
        source_url: Option<String>,
    },
}

/// Input for [`Database::create_bookmark`](super::Database::create_bookmark)
#[derive(Debug, Clone)]
pub struct NewBookmark {
    pub title: Option<String>,
    pub note: Option<String>,
    pub archived: bool,
    pub favourited: bool,
    pub content: NewBookmarkContent,
}

impl NewBookmark {
    pub fn link(url: impl Into<String>) -> Self {
        Self::with_content(NewBookmarkContent::Link { url: url.into() })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::with_content(NewBookmarkContent::Text {
            text: text.into(),
            source_url: None,
        })
    }

    pub fn with_content(content: NewBookmarkContent) -> Self {
        Self {
            title: None,
            note: None,
            archived: false,
            favourited: false,
            content,
        }
    }
}

/// Result of [`Database::create_bookmark`](super::Database::create_bookmark)
#[derive(Debug, Clone)]
pub struct CreatedBookmark {
    pub bookmark: Bookmark,
    /// True when a link bookmark with the same URL already existed and was
    /// returned instead of inserting a duplicate
    pub already_exists: bool,
}

/// Filters for [`Database::list_bookmarks`](super::Database::list_bookmarks)
#[derive(Debug, Clone, Default)]
pub struct BookmarkFilter {
    pub archived: Option<bool>,
    pub favourited: Option<bool>,
    pub kind: Option<BookmarkKind>,
    pub tag_id: Option<String>,
    pub list_id: Option<String>,
    /// Case-insensitive substring match on title, note, link title/url and text body
    pub search: Option<String>,
    /// Page size, clamped to `1..=MAX_PAGE_SIZE`; defaults to `DEFAULT_PAGE_SIZE`
    pub limit: Option<u32>,
}

/// Partial update for [`Database::update_bookmark`](super::Database::update_bookmark).
///
/// Outer `None` leaves a field unchanged; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default)]
pub struct BookmarkUpdate {
    pub title: Option<Option<String>>,
    pub note: Option<Option<String>>,
    pub summary: Option<Option<String>>,
    pub archived: Option<bool>,
    pub favourited: Option<bool>,
}

impl BookmarkUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.note.is_none()
            && self.summary.is_none()
            && self.archived.is_none()
            && self.favourited.is_none()
    }
}

/// Metadata produced by a crawler for a link bookmark
#[derive(Debug, Clone)]
pub struct CrawlResult {
    pub status: CrawlStatus,
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub date_published: Option<i64>,
    pub date_modified: Option<i64>,
    pub image_url: Option<String>,
    pub favicon: Option<String>,
    pub content: Option<String>,
    pub html_content: Option<String>,
}

impl CrawlResult {
    pub fn failed() -> Self {
        Self {
            status: CrawlStatus::Failure,
            title: None,
            description: None,
            author: None,
            publisher: None,
            date_published: None,
            date_modified: None,
            image_url: None,
            favicon: None,
            content: None,
            html_content: None,
        }
    }
}

// ============================================================================
// Assets
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    pub id: String,
    pub user_id: String,
    pub asset_type: AssetType,
    pub size: i64,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub bookmark_id: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AssetRow {
    pub id: String,
    pub user_id: String,
    pub asset_type: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub bookmark_id: Option<String>,
}

impl AssetRow {
    pub(crate) const COLUMNS: &'static str =
        "id, user_id, asset_type, size, content_type, file_name, bookmark_id";

    pub(crate) fn into_asset(self) -> Result<Asset, DatabaseError> {
        Ok(Asset {
            asset_type: parse_column(&self.asset_type)?,
            id: self.id,
            user_id: self.user_id,
            size: self.size,
            content_type: self.content_type,
            file_name: self.file_name,
            bookmark_id: self.bookmark_id,
        })
    }
}

/// Input for [`Database::create_asset`](super::Database::create_asset)
#[derive(Debug, Clone)]
pub struct NewAsset {
    /// Caller-chosen id, usually the key in the blob store; generated when `None`
    pub id: Option<String>,
    pub user_id: String,
    pub asset_type: AssetType,
    pub size: i64,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub bookmark_id: Option<String>,
}

// ============================================================================
// Tags
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Tag {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub created_at: i64,
}

/// A tag with how often it is attached, split by attribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TagUsage {
    pub id: String,
    pub name: String,
    pub human_count: i64,
    pub ai_count: i64,
}

impl TagUsage {
    pub fn total(&self) -> i64 {
        self.human_count + self.ai_count
    }
}

// ============================================================================
// Lists
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct BookmarkList {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub icon: String,
    pub parent_id: Option<String>,
    pub created_at: i64,
}

/// Input for [`Database::create_list`](super::Database::create_list)
#[derive(Debug, Clone, Default)]
pub struct NewList {
    pub name: String,
    /// Falls back to the configured default icon when `None`
    pub icon: Option<String>,
    pub parent_id: Option<String>,
}

/// Partial update for [`Database::update_list`](super::Database::update_list)
#[derive(Debug, Clone, Default)]
pub struct ListUpdate {
    pub name: Option<String>,
    pub icon: Option<String>,
    /// `Some(None)` moves the list to the top level
    pub parent_id: Option<Option<String>>,
}

// ============================================================================
// RSS Feeds
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RssFeed {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub url: String,
    pub created_at: i64,
    pub last_fetched_at: Option<i64>,
    pub last_fetched_status: Option<FeedFetchStatus>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RssFeedRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub url: String,
    pub created_at: i64,
    pub last_fetched_at: Option<i64>,
    pub last_fetched_status: Option<String>,
}

impl RssFeedRow {
    pub(crate) const COLUMNS: &'static str =
        "id, user_id, name, url, created_at, last_fetched_at, last_fetched_status";

    pub(crate) fn into_feed(self) -> Result<RssFeed, DatabaseError> {
        Ok(RssFeed {
            last_fetched_status: parse_optional(self.last_fetched_status)?,
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            url: self.url,
            created_at: self.created_at,
            last_fetched_at: self.last_fetched_at,
        })
    }
}

/// One feed entry that has been turned into (or skipped as) a bookmark
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct FeedImport {
    pub id: String,
    pub rss_feed_id: String,
    pub entry_id: String,
    pub bookmark_id: Option<String>,
    pub created_at: i64,
}

// ============================================================================
// API Keys
// ============================================================================

/// API key metadata; the secret itself is never stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub key_id: String,
    pub created_at: i64,
}

/// A freshly created key. `key` is the only copy of the plaintext.
pub struct GeneratedApiKey {
    pub api_key: ApiKey,
    pub key: secrecy::SecretString,
}

impl std::fmt::Debug for GeneratedApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedApiKey")
            .field("api_key", &self.api_key)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Custom Prompts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomPrompt {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub enabled: bool,
    pub applies_to: PromptAppliesTo,
    pub created_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CustomPromptRow {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub enabled: bool,
    pub applies_to: String,
    pub created_at: i64,
}

impl CustomPromptRow {
    pub(crate) const COLUMNS: &'static str = "id, user_id, text, enabled, applies_to, created_at";

    pub(crate) fn into_prompt(self) -> Result<CustomPrompt, DatabaseError> {
        Ok(CustomPrompt {
            applies_to: parse_column(&self.applies_to)?,
            id: self.id,
            user_id: self.user_id,
            text: self.text,
            enabled: self.enabled,
            created_at: self.created_at,
        })
    }
}

/// Partial update for [`Database::update_prompt`](super::Database::update_prompt)
#[derive(Debug, Clone, Default)]
pub struct PromptUpdate {
    pub text: Option<String>,
    pub enabled: Option<bool>,
    pub applies_to: Option<PromptAppliesTo>,
}

// ============================================================================
// Auth Bookkeeping
// ============================================================================

/// A linked identity-provider account
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Account {
    pub user_id: String,
    /// Account type as reported by the auth library (`oauth`, `oidc`, `email`)
    pub kind: String,
    pub provider: String,
    pub provider_account_id: String,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub expires_at: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
    pub session_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Session {
    pub session_token: String,
    pub user_id: String,
    pub expires: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VerificationToken {
    pub identifier: String,
    pub token: String,
    pub expires: i64,
}

#[cfg(test)]
mod tests {
    use super::DatabaseError;
    use crate::storage::Database;

    async fn run(db: &Database, sql: &str) -> Result<(), DatabaseError> {
        sqlx::query(sql).execute(&db.pool).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlx_errors_are_classified_through_question_mark() {
        let db = Database::open(":memory:").await.unwrap();

        run(&db, "INSERT INTO config (key, value) VALUES ('theme', 'dark')")
            .await
            .unwrap();
        assert!(matches!(
            run(&db, "INSERT INTO config (key, value) VALUES ('theme', 'light')").await,
            Err(DatabaseError::Conflict(_))
        ));
        assert!(matches!(
            run(&db, "INSERT INTO sessions (session_token, user_id, expires) VALUES ('t', 'ghost', 0)").await,
            Err(DatabaseError::Invalid(_))
        ));
        assert!(matches!(
            run(&db, "SELECT * FROM no_such_table").await,
            Err(DatabaseError::Other(_))
        ));
    }
}
