use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{
    expect_affected, CustomPrompt, CustomPromptRow, DatabaseError, PromptAppliesTo, PromptUpdate,
};
use crate::util::{new_id, strip_control_chars};

fn clean_prompt_text(text: &str) -> Result<String, DatabaseError> {
    let text = strip_control_chars(text).trim().to_owned();
    if text.is_empty() {
        return Err(DatabaseError::Invalid("prompt text cannot be empty".to_string()));
    }
    Ok(text)
}

impl Database {
    // ========================================================================
    // Custom Prompt Operations
    // ========================================================================

    /// Add an instruction appended to the tagging prompt for a user.
    pub async fn create_prompt(
        &self,
        user_id: &str,
        text: &str,
        applies_to: PromptAppliesTo,
    ) -> Result<CustomPrompt, DatabaseError> {
        let prompt = CustomPrompt {
            id: new_id(),
            user_id: user_id.to_owned(),
            text: clean_prompt_text(text)?,
            enabled: true,
            applies_to,
            created_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query(
            r#"
            INSERT INTO custom_prompts (id, text, enabled, applies_to, created_at, user_id)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&prompt.id)
        .bind(&prompt.text)
        .bind(prompt.enabled)
        .bind(prompt.applies_to.as_str())
        .bind(prompt.created_at)
        .bind(&prompt.user_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(prompt)
    }

    /// A user's prompts in creation order, optionally only the enabled ones.
    pub async fn list_prompts(
        &self,
        user_id: &str,
        only_enabled: bool,
    ) -> Result<Vec<CustomPrompt>, DatabaseError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM custom_prompts WHERE user_id = ",
            CustomPromptRow::COLUMNS
        ));
        builder.push_bind(user_id);
        if only_enabled {
            builder.push(" AND enabled = 1");
        }
        builder.push(" ORDER BY created_at, id");

        let rows: Vec<CustomPromptRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(CustomPromptRow::into_prompt).collect()
    }

    pub async fn update_prompt(&self, id: &str, update: PromptUpdate) -> Result<(), DatabaseError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE custom_prompts SET ");
        let mut separated = builder.separated(", ");
        let mut changes = 0;

        if let Some(text) = &update.text {
            separated.push("text = ");
            separated.push_bind_unseparated(clean_prompt_text(text)?);
            changes += 1;
        }
        if let Some(enabled) = update.enabled {
            separated.push("enabled = ");
            separated.push_bind_unseparated(enabled);
            changes += 1;
        }
        if let Some(applies_to) = update.applies_to {
            separated.push("applies_to = ");
            separated.push_bind_unseparated(applies_to.as_str());
            changes += 1;
        }

        if changes == 0 {
            return Ok(());
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id);
        let result = builder.build().execute(&self.pool).await?;
        expect_affected(result, "prompt", id)
    }

    pub async fn delete_prompt(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM custom_prompts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result, "prompt", id)
    }
}
