mod api_keys;
mod assets;
mod auth;
mod bookmarks;
mod feeds;
mod lists;
mod prompts;
mod schema;
mod settings;
mod tags;
mod types;
mod users;

pub use schema::{Database, DatabaseOptions};
pub use types::{
    Account, ApiKey, Asset, AssetContent, AssetType, AttachedBy, Bookmark, BookmarkAssetType,
    BookmarkContent, BookmarkFilter, BookmarkKind, BookmarkList, BookmarkTag, BookmarkUpdate,
    CrawlResult, CrawlStatus, CreatedBookmark, CustomPrompt, DatabaseError, FeedFetchStatus,
    FeedImport, GeneratedApiKey, LinkContent, ListUpdate, NewAsset, NewBookmark,
    NewBookmarkContent, NewList, NewUser, PromptAppliesTo, PromptUpdate, RssFeed, Session, Tag,
    TagUsage, TaggingStatus, TextContent, User, UserRole, UserStats, VerificationToken,
};
