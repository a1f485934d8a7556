use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use rankguard_core::domain::campaign::{
    CampaignId, CampaignMetadata, GuaranteeUnit, RefundSettings,
};
use rankguard_core::store::{CampaignDirectory, StoreError};

use super::{database_error, format_timestamp, parse_label};
use crate::DbPool;

/// Campaign metadata kept next to the workflow tables. The engine only
/// reads it; `save` exists for seeding and operator tooling.
#[derive(Clone)]
pub struct SqlCampaignDirectory {
    pool: DbPool,
}

impl SqlCampaignDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, campaign: &CampaignMetadata) -> Result<(), StoreError> {
        let settings = serde_json::to_string(&campaign.refund_settings.0)
            .map_err(|error| StoreError::Decode(format!("refund settings: {error}")))?;
        let now = format_timestamp(Utc::now());

        sqlx::query(
            "INSERT INTO campaign (id, guarantee_unit, refund_settings_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                guarantee_unit = excluded.guarantee_unit,
                refund_settings_json = excluded.refund_settings_json,
                updated_at = excluded.updated_at",
        )
        .bind(&campaign.id.0)
        .bind(campaign.guarantee_unit.as_str())
        .bind(settings)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        Ok(())
    }
}

#[async_trait]
impl CampaignDirectory for SqlCampaignDirectory {
    async fn campaign(&self, id: &CampaignId) -> Result<Option<CampaignMetadata>, StoreError> {
        let row = sqlx::query(
            "SELECT id, guarantee_unit, refund_settings_json FROM campaign WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;

        row.map(campaign_from_row).transpose()
    }
}

fn campaign_from_row(row: SqliteRow) -> Result<CampaignMetadata, StoreError> {
    let settings_raw: String = row.try_get("refund_settings_json").map_err(database_error)?;
    let settings = serde_json::from_str(&settings_raw).map_err(|error| {
        StoreError::Decode(format!("invalid `refund_settings_json`: `{settings_raw}` ({error})"))
    })?;

    Ok(CampaignMetadata {
        id: CampaignId(row.try_get("id").map_err(database_error)?),
        guarantee_unit: parse_label(
            "guarantee_unit",
            row.try_get("guarantee_unit").map_err(database_error)?,
            GuaranteeUnit::parse,
        )?,
        refund_settings: RefundSettings(settings),
    })
}
