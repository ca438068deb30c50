use secrecy::SecretString;
use sha2::{Digest, Sha256};

use super::schema::Database;
use super::types::{expect_affected, ApiKey, DatabaseError, GeneratedApiKey, User};
use crate::util::{new_id, random_token, sanitize_name};

/// Version tag at the start of every key
const KEY_PREFIX: &str = "ak1";
const KEY_ID_LENGTH: usize = 10;
const SECRET_LENGTH: usize = 32;

fn hash_secret(secret: &str) -> String {
    format!("{:x}", Sha256::digest(secret.as_bytes()))
}

/// Compare two hex digests without stopping at the first difference.
fn digests_match(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// Split `ak1_<key_id>_<secret>` into its key id and secret.
fn parse_key(full_key: &str) -> Option<(&str, &str)> {
    let rest = full_key.trim().strip_prefix(KEY_PREFIX)?.strip_prefix('_')?;
    let (key_id, secret) = rest.split_once('_')?;
    if key_id.is_empty() || secret.is_empty() {
        return None;
    }
    Some((key_id, secret))
}

impl Database {
    // ========================================================================
    // API Key Operations
    // ========================================================================

    /// Issue a new API key for a user.
    ///
    /// Only the hash of the secret part is stored. The returned
    /// [`GeneratedApiKey::key`] is the only time the full key is available.
    pub async fn create_api_key(&self, user_id: &str, name: &str) -> Result<GeneratedApiKey, DatabaseError> {
        let name = sanitize_name("API key", name).map_err(DatabaseError::Invalid)?;
        let key_id = random_token(KEY_ID_LENGTH);
        let secret = random_token(SECRET_LENGTH);

        let api_key = ApiKey {
            id: new_id(),
            user_id: user_id.to_owned(),
            name,
            key_id,
            created_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query(
            r#"
            INSERT INTO api_keys (id, name, created_at, key_id, key_hash, user_id)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&api_key.id)
        .bind(&api_key.name)
        .bind(api_key.created_at)
        .bind(&api_key.key_id)
        .bind(hash_secret(&secret))
        .bind(&api_key.user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match DatabaseError::from_sqlx(e) {
            DatabaseError::Conflict(_) => {
                DatabaseError::Conflict(format!("an API key named '{}' already exists", api_key.name))
            }
            other => other,
        })?;

        tracing::info!(user_id = %user_id, key_id = %api_key.key_id, "Created API key");
        let key = SecretString::from(format!("{KEY_PREFIX}_{}_{secret}", api_key.key_id));
        Ok(GeneratedApiKey { api_key, key })
    }

    pub async fn list_api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>, DatabaseError> {
        let keys = sqlx::query_as::<_, ApiKey>(
            "SELECT id, user_id, name, key_id, created_at FROM api_keys WHERE user_id = ? ORDER BY created_at, name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    /// Resolve a full API key to its owner.
    ///
    /// Returns `None` for malformed, unknown or revoked keys and for a wrong
    /// secret; callers should not distinguish these cases to clients.
    pub async fn authenticate_api_key(&self, full_key: &str) -> Result<Option<User>, DatabaseError> {
        let Some((key_id, secret)) = parse_key(full_key) else {
            return Ok(None);
        };

        let row: Option<(String, String)> =
            sqlx::query_as("SELECT user_id, key_hash FROM api_keys WHERE key_id = ?")
                .bind(key_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some((user_id, stored_hash)) = row else {
            return Ok(None);
        };

        if !digests_match(&hash_secret(secret), &stored_hash) {
            tracing::warn!(key_id = %key_id, "API key secret mismatch");
            return Ok(None);
        }

        self.get_user(&user_id).await
    }

    pub async fn revoke_api_key(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result, "API key", id)?;
        tracing::info!(api_key_id = %id, "Revoked API key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{digests_match, parse_key};
    use crate::storage::{Database, DatabaseError, NewUser};
    use secrecy::ExposeSecret;

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

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("ak1_abc_secret"), Some(("abc", "secret")));
        assert_eq!(parse_key(" ak1_abc_secret\n"), Some(("abc", "secret")));
        assert_eq!(parse_key("ak2_abc_secret"), None);
        assert_eq!(parse_key("ak1_abc"), None);
        assert_eq!(parse_key("ak1__secret"), None);
        assert_eq!(parse_key("ak1_abc_"), None);
        assert_eq!(parse_key(""), None);
    }

    #[test]
    fn test_digests_match() {
        assert!(digests_match("abcd", "abcd"));
        assert!(!digests_match("abcd", "abce"));
        assert!(!digests_match("abcd", "abc"));
    }

    #[tokio::test]
    async fn test_create_and_authenticate() {
        let db = Database::open(":memory:").await.unwrap();
        let user = test_user(&db, "Ada").await;

        let generated = db.create_api_key(&user, "cli").await.unwrap();
        let key = generated.key.expose_secret().to_string();
        assert!(key.starts_with(&format!("ak1_{}_", generated.api_key.key_id)));
        assert!(!format!("{generated:?}").contains(&key));

        let owner = db.authenticate_api_key(&key).await.unwrap().unwrap();
        assert_eq!(owner.id, user);

        let listed = db.list_api_keys(&user).await.unwrap();
        assert_eq!(listed, vec![generated.api_key.clone()]);
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let db = Database::open(":memory:").await.unwrap();
        let user = test_user(&db, "Ada").await;
        let generated = db.create_api_key(&user, "cli").await.unwrap();

        let forged = format!("ak1_{}_notthesecret", generated.api_key.key_id);
        assert!(db.authenticate_api_key(&forged).await.unwrap().is_none());
        assert!(db.authenticate_api_key("ak1_unknown_x").await.unwrap().is_none());
        assert!(db.authenticate_api_key("garbage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_api_key() {
        let db = Database::open(":memory:").await.unwrap();
        let user = test_user(&db, "Ada").await;
        let generated = db.create_api_key(&user, "cli").await.unwrap();
        let key = generated.key.expose_secret().to_string();

        db.revoke_api_key(&generated.api_key.id).await.unwrap();
        assert!(db.authenticate_api_key(&key).await.unwrap().is_none());
        assert!(matches!(
            db.revoke_api_key(&generated.api_key.id).await,
            Err(DatabaseError::NotFound(_, _))
        ));
    }

    #[tokio::test]
    async fn test_key_names_unique_per_user() {
        let db = Database::open(":memory:").await.unwrap();
        let ada = test_user(&db, "Ada").await;
        let bob = test_user(&db, "Bob").await;

        db.create_api_key(&ada, "cli").await.unwrap();
        let err = db.create_api_key(&ada, "cli").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
        db.create_api_key(&bob, "cli").await.unwrap();
    }
}
