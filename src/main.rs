use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::path::{Path, PathBuf};

use keepsake::config::{Config, DATABASE_ENV_VAR};
use keepsake::storage::{
    AttachedBy, BookmarkFilter, BookmarkKind, BookmarkUpdate, Database, DatabaseError, NewBookmark,
    NewList, NewUser, User, UserRole,
};

/// Get the config directory path (~/.config/keepsake)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("keepsake"))
}

/// Create the config directory if needed and restrict it to the owner.
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "keepsake", about = "Administer a keepsake bookmark database")]
struct Args {
    /// Config file (default: ~/.config/keepsake/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database file; overrides the config file and KEEPSAKE_DB
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage users
    #[command(subcommand)]
    User(UserCommand),
    /// Manage bookmarks
    #[command(subcommand)]
    Bookmark(BookmarkCommand),
    /// Manage tags
    #[command(subcommand)]
    Tag(TagCommand),
    /// Manage lists
    #[command(subcommand)]
    List(ListCommand),
    /// Manage RSS feed subscriptions
    #[command(subcommand)]
    Feed(FeedCommand),
    /// Manage API keys
    #[command(subcommand)]
    Apikey(ApiKeyCommand),
    /// Read and write server settings
    #[command(subcommand)]
    Setting(SettingCommand),
    /// Session maintenance
    #[command(subcommand)]
    Sessions(SessionsCommand),
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Create a user (the first user becomes an admin)
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        admin: bool,
    },
    List,
    /// Change a user's role
    Role {
        user: String,
        #[arg(value_parser = parse_role)]
        role: UserRole,
    },
    /// Delete a user and everything they own
    Delete { user: String },
    Stats { user: String },
}

#[derive(Subcommand, Debug)]
enum BookmarkCommand {
    AddLink {
        user: String,
        url: String,
        #[arg(long)]
        title: Option<String>,
    },
    AddText {
        user: String,
        text: String,
        #[arg(long)]
        title: Option<String>,
    },
    List {
        user: String,
        #[arg(long)]
        archived: Option<bool>,
        #[arg(long)]
        favourited: Option<bool>,
        #[arg(long, value_parser = parse_kind)]
        kind: Option<BookmarkKind>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Archive (or with --undo, unarchive) a bookmark
    Archive {
        id: String,
        #[arg(long)]
        undo: bool,
    },
    /// Favourite (or with --undo, unfavourite) a bookmark
    Favourite {
        id: String,
        #[arg(long)]
        undo: bool,
    },
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum TagCommand {
    /// Tags with usage counts
    List { user: String },
    /// Attach tags to a bookmark by name
    Attach {
        bookmark: String,
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Merge tags into the first one given
    Merge {
        into: String,
        #[arg(required = true)]
        from: Vec<String>,
    },
    /// Delete tags attached to no bookmark
    Prune { user: String },
}

#[derive(Subcommand, Debug)]
enum ListCommand {
    Add {
        user: String,
        name: String,
        #[arg(long)]
        icon: Option<String>,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Show a user's lists, or the bookmarks in one list with --list
    Show {
        user: String,
        #[arg(long)]
        list: Option<String>,
    },
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum FeedCommand {
    Add {
        user: String,
        name: String,
        url: String,
    },
    List { user: String },
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum ApiKeyCommand {
    /// Create a key; the full key is printed once
    Create { user: String, name: String },
    List { user: String },
    Revoke { id: String },
}

#[derive(Subcommand, Debug)]
enum SettingCommand {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

#[derive(Subcommand, Debug)]
enum SessionsCommand {
    /// Delete expired sessions and verification tokens
    Purge,
}

fn parse_role(s: &str) -> Result<UserRole, String> {
    s.parse().map_err(|e: DatabaseError| e.to_string())
}

fn parse_kind(s: &str) -> Result<BookmarkKind, String> {
    s.parse().map_err(|e: DatabaseError| e.to_string())
}

/// What `tag merge` reports: the number of tags actually removed, which
/// excludes repeats and the target itself.
fn merge_summary(removed: u64, into: &str) -> String {
    match removed {
        1 => format!("Merged 1 tag into {into}"),
        n => format!("Merged {n} tags into {into}"),
    }
}

/// Resolve a user given by email address or id.
async fn find_user(db: &Database, user: &str) -> Result<User> {
    let found = if user.contains('@') {
        db.get_user_by_email(user).await?
    } else {
        db.get_user(user).await?
    };
    found.with_context(|| format!("No user matches '{user}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let db_path = match args.db.clone() {
        Some(path) => path,
        None => {
            let path =
                config.resolve_database_path(&config_dir, std::env::var(DATABASE_ENV_VAR).ok());
            if path.starts_with(&config_dir) {
                ensure_config_dir(&config_dir)?;
            }
            path
        }
    };

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open_with(db_path_str, &config.database_options()).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: The database at {} is locked by another process.", db_path.display());
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let result = run(&db, &config, args.command).await;
    db.close().await;
    result
}

async fn run(db: &Database, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::User(cmd) => run_user(db, config, cmd).await,
        Command::Bookmark(cmd) => run_bookmark(db, cmd).await,
        Command::Tag(cmd) => run_tag(db, cmd).await,
        Command::List(cmd) => run_list(db, cmd).await,
        Command::Feed(cmd) => run_feed(db, cmd).await,
        Command::Apikey(cmd) => run_api_key(db, cmd).await,
        Command::Setting(cmd) => run_setting(db, cmd).await,
        Command::Sessions(SessionsCommand::Purge) => {
            let removed = db
                .purge_expired_sessions()
                .await
                .context("Failed to purge sessions")?;
            println!("Removed {removed} expired sessions");
            Ok(())
        }
    }
}

async fn run_user(db: &Database, config: &Config, cmd: UserCommand) -> Result<()> {
    match cmd {
        UserCommand::Add { name, email, admin } => {
            if config.disable_signups && db.count_users().await? > 0 {
                bail!("Signups are disabled (disable_signups = true in config)");
            }
            let user = db
                .create_user(NewUser {
                    name,
                    email,
                    role: admin.then_some(UserRole::Admin),
                    ..NewUser::default()
                })
                .await
                .context("Failed to create user")?;
            print_json(&user)
        }
        UserCommand::List => print_json(&db.list_users().await?),
        UserCommand::Role { user, role } => {
            let user = find_user(db, &user).await?;
            db.set_user_role(&user.id, role)
                .await
                .context("Failed to change role")?;
            println!("{} is now {}", user.email, role);
            Ok(())
        }
        UserCommand::Delete { user } => {
            let user = find_user(db, &user).await?;
            db.delete_user(&user.id).await.context("Failed to delete user")?;
            println!("Deleted {}", user.email);
            Ok(())
        }
        UserCommand::Stats { user } => {
            let user = find_user(db, &user).await?;
            print_json(&db.user_stats(&user.id).await?)
        }
    }
}

async fn run_bookmark(db: &Database, cmd: BookmarkCommand) -> Result<()> {
    match cmd {
        BookmarkCommand::AddLink { user, url, title } => {
            let user = find_user(db, &user).await?;
            let mut bookmark = NewBookmark::link(url);
            bookmark.title = title;
            let created = db
                .create_bookmark(&user.id, bookmark)
                .await
                .context("Failed to add link")?;
            if created.already_exists {
                eprintln!("Link already saved");
            }
            print_json(&created.bookmark)
        }
        BookmarkCommand::AddText { user, text, title } => {
            let user = find_user(db, &user).await?;
            let mut bookmark = NewBookmark::text(text);
            bookmark.title = title;
            let created = db
                .create_bookmark(&user.id, bookmark)
                .await
                .context("Failed to add note")?;
            print_json(&created.bookmark)
        }
        BookmarkCommand::List {
            user,
            archived,
            favourited,
            kind,
            search,
            limit,
        } => {
            let user = find_user(db, &user).await?;
            let filter = BookmarkFilter {
                archived,
                favourited,
                kind,
                search,
                limit,
                ..BookmarkFilter::default()
            };
            print_json(&db.list_bookmarks(&user.id, &filter).await?)
        }
        BookmarkCommand::Archive { id, undo } => {
            db.update_bookmark(
                &id,
                BookmarkUpdate {
                    archived: Some(!undo),
                    ..BookmarkUpdate::default()
                },
            )
            .await
            .context("Failed to archive bookmark")?;
            Ok(())
        }
        BookmarkCommand::Favourite { id, undo } => {
            db.update_bookmark(
                &id,
                BookmarkUpdate {
                    favourited: Some(!undo),
                    ..BookmarkUpdate::default()
                },
            )
            .await
            .context("Failed to favourite bookmark")?;
            Ok(())
        }
        BookmarkCommand::Delete { id } => {
            db.delete_bookmark(&id).await.context("Failed to delete bookmark")?;
            Ok(())
        }
    }
}

async fn run_tag(db: &Database, cmd: TagCommand) -> Result<()> {
    match cmd {
        TagCommand::List { user } => {
            let user = find_user(db, &user).await?;
            print_json(&db.list_tags(&user.id).await?)
        }
        TagCommand::Attach { bookmark, names } => {
            let ids = db
                .attach_tags(&bookmark, names.as_slice(), AttachedBy::Human)
                .await
                .context("Failed to attach tags")?;
            print_json(&ids)
        }
        TagCommand::Merge { into, from } => {
            let moved = db
                .merge_tags(&into, from.as_slice())
                .await
                .context("Failed to merge tags")?;
            println!("{}", merge_summary(moved, &into));
            Ok(())
        }
        TagCommand::Prune { user } => {
            let user = find_user(db, &user).await?;
            let removed = db.delete_unused_tags(&user.id).await?;
            println!("Removed {removed} unused tags");
            Ok(())
        }
    }
}

async fn run_list(db: &Database, cmd: ListCommand) -> Result<()> {
    match cmd {
        ListCommand::Add {
            user,
            name,
            icon,
            parent,
        } => {
            let user = find_user(db, &user).await?;
            let list = db
                .create_list(
                    &user.id,
                    NewList {
                        name,
                        icon,
                        parent_id: parent,
                    },
                )
                .await
                .context("Failed to create list")?;
            print_json(&list)
        }
        ListCommand::Show { user, list } => {
            let user = find_user(db, &user).await?;
            match list {
                Some(list_id) => {
                    let filter = BookmarkFilter {
                        list_id: Some(list_id),
                        ..BookmarkFilter::default()
                    };
                    print_json(&db.list_bookmarks(&user.id, &filter).await?)
                }
                None => print_json(&db.list_lists(&user.id).await?),
            }
        }
        ListCommand::Delete { id } => {
            db.delete_list(&id).await.context("Failed to delete list")?;
            Ok(())
        }
    }
}

async fn run_feed(db: &Database, cmd: FeedCommand) -> Result<()> {
    match cmd {
        FeedCommand::Add { user, name, url } => {
            let user = find_user(db, &user).await?;
            let feed = db
                .create_feed(&user.id, &name, &url)
                .await
                .context("Failed to add feed")?;
            print_json(&feed)
        }
        FeedCommand::List { user } => {
            let user = find_user(db, &user).await?;
            print_json(&db.list_feeds(&user.id).await?)
        }
        FeedCommand::Delete { id } => {
            db.delete_feed(&id).await.context("Failed to delete feed")?;
            Ok(())
        }
    }
}

async fn run_api_key(db: &Database, cmd: ApiKeyCommand) -> Result<()> {
    match cmd {
        ApiKeyCommand::Create { user, name } => {
            let user = find_user(db, &user).await?;
            let generated = db
                .create_api_key(&user.id, &name)
                .await
                .context("Failed to create API key")?;
            eprintln!("Store this key now; it cannot be shown again.");
            println!("{}", generated.key.expose_secret());
            Ok(())
        }
        ApiKeyCommand::List { user } => {
            let user = find_user(db, &user).await?;
            print_json(&db.list_api_keys(&user.id).await?)
        }
        ApiKeyCommand::Revoke { id } => {
            db.revoke_api_key(&id).await.context("Failed to revoke API key")?;
            Ok(())
        }
    }
}

async fn run_setting(db: &Database, cmd: SettingCommand) -> Result<()> {
    match cmd {
        SettingCommand::Get { key } => match db.get_setting(&key).await? {
            Some(value) => {
                println!("{value}");
                Ok(())
            }
            None => bail!("Setting '{key}' is not set"),
        },
        SettingCommand::Set { key, value } => {
            db.set_setting(&key, &value).await?;
            Ok(())
        }
        SettingCommand::List => {
            for (key, value) in db.list_settings().await? {
                println!("{key} = {value}");
            }
            Ok(())
        }
    }
}
