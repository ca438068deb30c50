use super::schema::Database;
use super::types::{expect_affected, Asset, AssetRow, AssetType, DatabaseError, NewAsset};
use crate::util::{new_id, strip_control_chars};

impl Database {
    // ========================================================================
    // Asset Operations
    // ========================================================================

    /// Reject a bookmark that does not belong to `user_id`.
    async fn ensure_bookmark_owner(&self, bookmark_id: &str, user_id: &str) -> Result<(), DatabaseError> {
        let (owner, _) = self.bookmark_owner_and_kind(bookmark_id).await?;
        if owner != user_id {
            return Err(DatabaseError::Invalid(format!(
                "bookmark {bookmark_id} belongs to another user"
            )));
        }
        Ok(())
    }

    /// Record an asset stored in the blob store.
    ///
    /// # Errors
    ///
    /// - `Invalid` if the size is negative or above the configured limit, or
    ///   if `bookmark_id` names another user's bookmark
    /// - `NotFound` if the bookmark does not exist
    /// - `Conflict` if a caller-chosen id is already taken
    pub async fn create_asset(&self, new_asset: NewAsset) -> Result<Asset, DatabaseError> {
        if new_asset.size < 0 {
            return Err(DatabaseError::Invalid("asset size cannot be negative".to_string()));
        }
        if let Some(max) = self.options.max_asset_bytes {
            if new_asset.size > max {
                return Err(DatabaseError::Invalid(format!(
                    "asset is {} bytes, the limit is {max}",
                    new_asset.size
                )));
            }
        }
        if let Some(bookmark_id) = &new_asset.bookmark_id {
            self.ensure_bookmark_owner(bookmark_id, &new_asset.user_id).await?;
        }

        let asset = Asset {
            id: new_asset.id.unwrap_or_else(new_id),
            user_id: new_asset.user_id,
            asset_type: new_asset.asset_type,
            size: new_asset.size,
            content_type: new_asset.content_type,
            file_name: new_asset
                .file_name
                .map(|name| strip_control_chars(&name).into_owned()),
            bookmark_id: new_asset.bookmark_id,
        };

        sqlx::query(
            r#"
            INSERT INTO assets (id, asset_type, size, content_type, file_name, bookmark_id, user_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&asset.id)
        .bind(asset.asset_type.as_str())
        .bind(asset.size)
        .bind(&asset.content_type)
        .bind(&asset.file_name)
        .bind(&asset.bookmark_id)
        .bind(&asset.user_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tracing::debug!(
            asset_id = %asset.id,
            asset_type = %asset.asset_type,
            size = asset.size,
            "Created asset"
        );
        Ok(asset)
    }

    pub async fn get_asset(&self, id: &str) -> Result<Option<Asset>, DatabaseError> {
        let sql = format!("SELECT {} FROM assets WHERE id = ?", AssetRow::COLUMNS);
        sqlx::query_as::<_, AssetRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(AssetRow::into_asset)
            .transpose()
    }

    pub async fn list_assets_for_bookmark(&self, bookmark_id: &str) -> Result<Vec<Asset>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM assets WHERE bookmark_id = ? ORDER BY asset_type, id",
            AssetRow::COLUMNS
        );
        let rows = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(bookmark_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(AssetRow::into_asset).collect()
    }

    /// Every asset a user owns, largest first.
    pub async fn list_assets_for_user(&self, user_id: &str) -> Result<Vec<Asset>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM assets WHERE user_id = ? ORDER BY size DESC, id",
            AssetRow::COLUMNS
        );
        let rows = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(AssetRow::into_asset).collect()
    }

    /// Point an asset at a bookmark of the same owner.
    pub async fn attach_asset(&self, asset_id: &str, bookmark_id: &str) -> Result<(), DatabaseError> {
        let asset = self
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("asset", asset_id))?;
        self.ensure_bookmark_owner(bookmark_id, &asset.user_id).await?;

        // The body of an asset bookmark stays with that bookmark
        if asset.asset_type == AssetType::BookmarkAsset
            && asset.bookmark_id.as_deref() != Some(bookmark_id)
        {
            return Err(DatabaseError::Conflict(format!(
                "asset {asset_id} is the content of another bookmark"
            )));
        }

        let result = sqlx::query("UPDATE assets SET bookmark_id = ? WHERE id = ?")
            .bind(bookmark_id)
            .bind(asset_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        expect_affected(result, "asset", asset_id)
    }

    /// Remove the asset record. The caller deletes the blob.
    pub async fn delete_asset(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM assets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        expect_affected(result, "asset", id)
    }
}
