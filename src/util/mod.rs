//! Small helpers shared by the storage layer and the CLI.
//!
//! - **Identifiers**: opaque, globally unique row ids and random secrets
//! - **Text**: name sanitization and LIKE-pattern escaping
//! - **URLs**: validation for bookmarked links and feed sources

mod ids;
mod text;
mod url_validator;

pub use ids::{new_id, random_token};
pub use text::{escape_like, sanitize_name, strip_control_chars};
pub use url_validator::{validate_feed_url, validate_link_url, UrlValidationError};

/// Maximum length (in characters) of a user-supplied name: tags, lists, feeds, api keys.
pub const MAX_NAME_LENGTH: usize = 256;
