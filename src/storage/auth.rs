use super::schema::Database;
use super::types::{Account, DatabaseError, Session, VerificationToken};
use crate::util::random_token;

const SESSION_TOKEN_LENGTH: usize = 48;
const VERIFICATION_TOKEN_LENGTH: usize = 32;

const ACCOUNT_COLUMNS: &str = "user_id, kind, provider, provider_account_id, refresh_token, \
     access_token, expires_at, token_type, scope, id_token, session_state";

impl Database {
    // ========================================================================
    // Auth Bookkeeping
    // ========================================================================

    /// Link an identity-provider account to a user, replacing the kind and
    /// tokens if the (provider, provider_account_id) pair is already linked
    /// to the same user.
    pub async fn link_account(&self, account: &Account) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (user_id, kind, provider, provider_account_id, refresh_token,
                access_token, expires_at, token_type, scope, id_token, session_state)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider, provider_account_id) DO UPDATE SET
                kind = excluded.kind,
                refresh_token = excluded.refresh_token,
                access_token = excluded.access_token,
                expires_at = excluded.expires_at,
                token_type = excluded.token_type,
                scope = excluded.scope,
                id_token = excluded.id_token,
                session_state = excluded.session_state
            WHERE accounts.user_id = excluded.user_id
        "#,
        )
        .bind(&account.user_id)
        .bind(&account.kind)
        .bind(&account.provider)
        .bind(&account.provider_account_id)
        .bind(&account.refresh_token)
        .bind(&account.access_token)
        .bind(account.expires_at)
        .bind(&account.token_type)
        .bind(&account.scope)
        .bind(&account.id_token)
        .bind(&account.session_state)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::Conflict(format!(
                "{} account {} is linked to another user",
                account.provider, account.provider_account_id
            )));
        }
        tracing::debug!(user_id = %account.user_id, provider = %account.provider, "Linked account");
        Ok(())
    }

    pub async fn accounts_for_user(&self, user_id: &str) -> Result<Vec<Account>, DatabaseError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ? ORDER BY provider");
        let accounts = sqlx::query_as::<_, Account>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(accounts)
    }

    /// Start a session that expires at the given Unix time.
    pub async fn create_session(&self, user_id: &str, expires: i64) -> Result<Session, DatabaseError> {
        let session = Session {
            session_token: random_token(SESSION_TOKEN_LENGTH),
            user_id: user_id.to_owned(),
            expires,
        };

        sqlx::query("INSERT INTO sessions (session_token, user_id, expires) VALUES (?, ?, ?)")
            .bind(&session.session_token)
            .bind(&session.user_id)
            .bind(session.expires)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(session)
    }

    /// Look up a session; expired sessions are treated as absent.
    pub async fn get_session(&self, token: &str) -> Result<Option<Session>, DatabaseError> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT session_token, user_id, expires FROM sessions WHERE session_token = ? AND expires > ?",
        )
        .bind(token)
        .bind(chrono::Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// End a session. Returns false if it did not exist.
    pub async fn delete_session(&self, token: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete expired sessions and verification tokens.
    ///
    /// Returns the number of sessions removed.
    pub async fn purge_expired_sessions(&self) -> Result<u64, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let sessions = sqlx::query("DELETE FROM sessions WHERE expires <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let tokens = sqlx::query("DELETE FROM verification_tokens WHERE expires <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        tracing::info!(sessions, tokens, "Purged expired sessions");
        Ok(sessions)
    }

    /// Issue a one-time token for `identifier` (usually an email address).
    pub async fn create_verification_token(
        &self,
        identifier: &str,
        expires: i64,
    ) -> Result<VerificationToken, DatabaseError> {
        let token = VerificationToken {
            identifier: identifier.trim().to_lowercase(),
            token: random_token(VERIFICATION_TOKEN_LENGTH),
            expires,
        };

        sqlx::query("INSERT INTO verification_tokens (identifier, token, expires) VALUES (?, ?, ?)")
            .bind(&token.identifier)
            .bind(&token.token)
            .bind(token.expires)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(token)
    }

    /// Consume a verification token.
    ///
    /// The token is deleted whether or not it has expired; it is returned only
    /// when it was still valid.
    pub async fn use_verification_token(
        &self,
        identifier: &str,
        token: &str,
    ) -> Result<Option<VerificationToken>, DatabaseError> {
        let identifier = identifier.trim().to_lowercase();
        let mut tx = self.pool.begin().await?;

        let found = sqlx::query_as::<_, VerificationToken>(
            "SELECT identifier, token, expires FROM verification_tokens WHERE identifier = ? AND token = ?",
        )
        .bind(&identifier)
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(found) = found else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM verification_tokens WHERE identifier = ? AND token = ?")
            .bind(&identifier)
            .bind(token)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if found.expires <= chrono::Utc::now().timestamp() {
            tracing::debug!(identifier = %identifier, "Verification token expired");
            return Ok(None);
        }
        Ok(Some(found))
    }
}
