use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteRow};
use sqlx::{QueryBuilder, Row, Transaction};

use rankguard_core::domain::actor::ActorId;
use rankguard_core::domain::campaign::{CampaignId, GuaranteeUnit};
use rankguard_core::domain::quote_request::{
    BudgetType, QuoteRequest, QuoteRequestId, QuoteRequestStatus,
};
use rankguard_core::domain::refund::{RefundOrigin, RefundRequest, RefundRequestId, RefundStatus};
use rankguard_core::domain::slot::{GuaranteeSlot, SlotId, SlotStatus};
use rankguard_core::domain::{EntityKind, EntityRef};
use rankguard_core::ledger::{LedgerDirection, LedgerEntry};
use rankguard_core::notify::{Notification, NotificationKind};
use rankguard_core::store::{
    RequestQuery, RequestScopeFilter, StoreError, WorkflowStore, WorkflowTransaction,
    LEDGER_REFERENCE_CONSTRAINT, OPEN_REFUND_CONSTRAINT, SLOT_PER_REQUEST_CONSTRAINT,
};

use super::{
    database_error, format_timestamp, is_unique_violation, parse_date, parse_decimal,
    parse_label, parse_optional_date, parse_optional_decimal, parse_optional_timestamp,
    parse_timestamp, parse_u32,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id,
    campaign_id,
    user_id,
    distributor_id,
    target_rank,
    guarantee_count,
    guarantee_unit,
    guarantee_period,
    initial_budget,
    final_daily_amount,
    final_budget_type,
    final_total_amount,
    start_date,
    end_date,
    status,
    rejection_reason,
    version,
    created_at,
    updated_at";

const SLOT_COLUMNS: &str = "id,
    request_id,
    status,
    start_date,
    end_date,
    approved_at,
    approved_by,
    rejected_at,
    rejected_by,
    rejection_reason,
    completed_at,
    completed_by,
    work_memo,
    cancelled_at,
    cancelled_by,
    version,
    created_at,
    updated_at";

const REFUND_COLUMNS: &str = "id,
    slot_id,
    status,
    origin,
    refund_reason,
    refund_amount,
    requested_by,
    request_date,
    approval_date,
    approval_notes,
    decided_by,
    version,
    updated_at";

const LEDGER_COLUMNS: &str =
    "entry_id, user_id, direction, amount, reference_kind, reference_id, recorded_at";

const OUTBOX_COLUMNS: &str =
    "id, kind, entity_kind, entity_id, recipients_json, summary, correlation_id, created_at";

/// SQLite-backed workflow store. Requests, slots, refunds, ledger entries
/// and outbox rows written through one [`SqlWorkflowTransaction`] share a
/// single SQL transaction.
#[derive(Clone)]
pub struct SqlWorkflowStore {
    pool: DbPool,
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn connection(&self) -> Result<sqlx::pool::PoolConnection<Sqlite>, StoreError> {
        self.pool.acquire().await.map_err(database_error)
    }
}

pub struct SqlWorkflowTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl WorkflowTransaction for SqlWorkflowTransaction {
    async fn load_request(
        &mut self,
        id: &QuoteRequestId,
    ) -> Result<Option<QuoteRequest>, StoreError> {
        fetch_request(&mut self.tx, id).await
    }

    async fn insert_request(&mut self, request: &QuoteRequest) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO quote_request ({REQUEST_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&request.id.0)
            .bind(&request.campaign_id.0)
            .bind(&request.user_id.0)
            .bind(request.distributor_id.as_ref().map(|id| id.0.as_str()))
            .bind(i64::from(request.target_rank))
            .bind(i64::from(request.guarantee_count))
            .bind(request.guarantee_unit.as_str())
            .bind(request.guarantee_period.map(i64::from))
            .bind(request.initial_budget.map(|amount| amount.to_string()))
            .bind(request.final_daily_amount.map(|amount| amount.to_string()))
            .bind(request.final_budget_type.map(|budget| budget.as_str()))
            .bind(request.final_total_amount.map(|amount| amount.to_string()))
            .bind(request.start_date.map(|date| date.to_string()))
            .bind(request.end_date.map(|date| date.to_string()))
            .bind(request.status.as_str())
            .bind(request.rejection_reason.as_deref())
            .bind(i64::from(request.version))
            .bind(format_timestamp(request.created_at))
            .bind(format_timestamp(request.updated_at))
            .execute(&mut *self.tx)
            .await
            .map_err(|error| {
                unique_or_database(error, "quote_request.id", Some(request.entity()))
            })?;
        Ok(())
    }

    async fn update_request(
        &mut self,
        request: &QuoteRequest,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE quote_request SET
                distributor_id = ?,
                final_daily_amount = ?,
                final_budget_type = ?,
                final_total_amount = ?,
                start_date = ?,
                end_date = ?,
                status = ?,
                rejection_reason = ?,
                version = ?,
                updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(request.distributor_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.final_daily_amount.map(|amount| amount.to_string()))
        .bind(request.final_budget_type.map(|budget| budget.as_str()))
        .bind(request.final_total_amount.map(|amount| amount.to_string()))
        .bind(request.start_date.map(|date| date.to_string()))
        .bind(request.end_date.map(|date| date.to_string()))
        .bind(request.status.as_str())
        .bind(request.rejection_reason.as_deref())
        .bind(i64::from(request.version))
        .bind(format_timestamp(request.updated_at))
        .bind(&request.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *self.tx)
        .await
        .map_err(database_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StaleWrite {
                entity: request.entity(),
                expected: expected_version,
            });
        }
        Ok(())
    }

    async fn load_slot(&mut self, id: &SlotId) -> Result<Option<GuaranteeSlot>, StoreError> {
        let sql = format!("SELECT {SLOT_COLUMNS} FROM guarantee_slot WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(&id.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(database_error)?;
        row.map(slot_from_row).transpose()
    }

    async fn find_slot_for_request(
        &mut self,
        request_id: &QuoteRequestId,
    ) -> Result<Option<GuaranteeSlot>, StoreError> {
        fetch_slot_for_request(&mut self.tx, request_id).await
    }

    async fn insert_slot(&mut self, slot: &GuaranteeSlot) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO guarantee_slot ({SLOT_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&slot.id.0)
            .bind(&slot.request_id.0)
            .bind(slot.status.as_str())
            .bind(slot.start_date.to_string())
            .bind(slot.end_date.to_string())
            .bind(slot.approved_at.map(format_timestamp))
            .bind(slot.approved_by.as_ref().map(|id| id.0.as_str()))
            .bind(slot.rejected_at.map(format_timestamp))
            .bind(slot.rejected_by.as_ref().map(|id| id.0.as_str()))
            .bind(slot.rejection_reason.as_deref())
            .bind(slot.completed_at.map(format_timestamp))
            .bind(slot.completed_by.as_ref().map(|id| id.0.as_str()))
            .bind(slot.work_memo.as_deref())
            .bind(slot.cancelled_at.map(format_timestamp))
            .bind(slot.cancelled_by.as_ref().map(|id| id.0.as_str()))
            .bind(i64::from(slot.version))
            .bind(format_timestamp(slot.created_at))
            .bind(format_timestamp(slot.updated_at))
            .execute(&mut *self.tx)
            .await
            .map_err(|error| {
                unique_or_database(error, SLOT_PER_REQUEST_CONSTRAINT, Some(slot.entity()))
            })?;
        Ok(())
    }

    async fn update_slot(
        &mut self,
        slot: &GuaranteeSlot,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE guarantee_slot SET
                status = ?,
                approved_at = ?,
                approved_by = ?,
                rejected_at = ?,
                rejected_by = ?,
                rejection_reason = ?,
                completed_at = ?,
                completed_by = ?,
                work_memo = ?,
                cancelled_at = ?,
                cancelled_by = ?,
                version = ?,
                updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(slot.status.as_str())
        .bind(slot.approved_at.map(format_timestamp))
        .bind(slot.approved_by.as_ref().map(|id| id.0.as_str()))
        .bind(slot.rejected_at.map(format_timestamp))
        .bind(slot.rejected_by.as_ref().map(|id| id.0.as_str()))
        .bind(slot.rejection_reason.as_deref())
        .bind(slot.completed_at.map(format_timestamp))
        .bind(slot.completed_by.as_ref().map(|id| id.0.as_str()))
        .bind(slot.work_memo.as_deref())
        .bind(slot.cancelled_at.map(format_timestamp))
        .bind(slot.cancelled_by.as_ref().map(|id| id.0.as_str()))
        .bind(i64::from(slot.version))
        .bind(format_timestamp(slot.updated_at))
        .bind(&slot.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *self.tx)
        .await
        .map_err(database_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StaleWrite {
                entity: slot.entity(),
                expected: expected_version,
            });
        }
        Ok(())
    }

    async fn load_refund(
        &mut self,
        id: &RefundRequestId,
    ) -> Result<Option<RefundRequest>, StoreError> {
        fetch_refund(&mut self.tx, id).await
    }

    async fn list_refunds(&mut self, slot_id: &SlotId) -> Result<Vec<RefundRequest>, StoreError> {
        fetch_refunds_for_slot(&mut self.tx, slot_id).await
    }

    async fn insert_refund(&mut self, refund: &RefundRequest) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO refund_request ({REFUND_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let outcome = sqlx::query(&sql)
            .bind(&refund.id.0)
            .bind(&refund.slot_id.0)
            .bind(refund.status.as_str())
            .bind(refund.origin.as_str())
            .bind(&refund.refund_reason)
            .bind(refund.refund_amount.to_string())
            .bind(&refund.requested_by.0)
            .bind(format_timestamp(refund.request_date))
            .bind(refund.approval_date.map(format_timestamp))
            .bind(refund.approval_notes.as_deref())
            .bind(refund.decided_by.as_ref().map(|id| id.0.as_str()))
            .bind(i64::from(refund.version))
            .bind(format_timestamp(refund.updated_at))
            .execute(&mut *self.tx)
            .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) && !error.to_string().contains(".id") => {
                Err(StoreError::Conflict {
                    constraint: OPEN_REFUND_CONSTRAINT.to_string(),
                    entity: Some(slot_entity(&refund.slot_id)),
                })
            }
            Err(error) => {
                Err(unique_or_database(error, "refund_request.id", Some(refund.entity())))
            }
        }
    }

    async fn update_refund(
        &mut self,
        refund: &RefundRequest,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE refund_request SET
                status = ?,
                refund_amount = ?,
                approval_date = ?,
                approval_notes = ?,
                decided_by = ?,
                version = ?,
                updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(refund.status.as_str())
        .bind(refund.refund_amount.to_string())
        .bind(refund.approval_date.map(format_timestamp))
        .bind(refund.approval_notes.as_deref())
        .bind(refund.decided_by.as_ref().map(|id| id.0.as_str()))
        .bind(i64::from(refund.version))
        .bind(format_timestamp(refund.updated_at))
        .bind(&refund.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *self.tx)
        .await
        .map_err(|error| {
            unique_or_database(error, OPEN_REFUND_CONSTRAINT, Some(slot_entity(&refund.slot_id)))
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StaleWrite {
                entity: refund.entity(),
                expected: expected_version,
            });
        }
        Ok(())
    }

    async fn record_ledger(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let sql =
            format!("INSERT INTO balance_ledger ({LEDGER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)");
        sqlx::query(&sql)
            .bind(&entry.entry_id)
            .bind(&entry.user_id.0)
            .bind(entry.direction.as_str())
            .bind(entry.amount.to_string())
            .bind(entry.reference.kind.as_str())
            .bind(&entry.reference.id)
            .bind(format_timestamp(entry.recorded_at))
            .execute(&mut *self.tx)
            .await
            .map_err(|error| {
                let reference = Some(entry.reference.clone());
                unique_or_database(error, LEDGER_REFERENCE_CONSTRAINT, reference)
            })?;
        Ok(())
    }

    async fn enqueue_notification(
        &mut self,
        notification: &Notification,
    ) -> Result<(), StoreError> {
        let recipients = serde_json::to_string(&notification.recipients)
            .map_err(|error| StoreError::Decode(format!("notification recipients: {error}")))?;
        let sql = format!(
            "INSERT INTO notification_outbox ({OUTBOX_COLUMNS}, dispatched_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)"
        );
        sqlx::query(&sql)
            .bind(&notification.id)
            .bind(notification.kind.as_str())
            .bind(notification.entity.kind.as_str())
            .bind(&notification.entity.id)
            .bind(recipients)
            .bind(&notification.summary)
            .bind(&notification.correlation_id)
            .bind(format_timestamp(notification.created_at))
            .execute(&mut *self.tx)
            .await
            .map_err(database_error)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(database_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(database_error)
    }
}

#[async_trait]
impl WorkflowStore for SqlWorkflowStore {
    async fn begin(&self) -> Result<Box<dyn WorkflowTransaction>, StoreError> {
        let tx = self.pool.begin().await.map_err(database_error)?;
        Ok(Box::new(SqlWorkflowTransaction { tx }))
    }

    async fn find_request(&self, id: &QuoteRequestId) -> Result<Option<QuoteRequest>, StoreError> {
        let mut conn = self.connection().await?;
        fetch_request(&mut conn, id).await
    }

    async fn list_requests(&self, query: &RequestQuery) -> Result<Vec<QuoteRequest>, StoreError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {REQUEST_COLUMNS} FROM quote_request WHERE 1 = 1"));
        match &query.scope {
            RequestScopeFilter::All => {}
            RequestScopeFilter::Buyer(buyer) => {
                builder.push(" AND user_id = ").push_bind(buyer.0.clone());
            }
            RequestScopeFilter::Distributor(distributor) => {
                builder
                    .push(" AND (distributor_id = ")
                    .push_bind(distributor.0.clone())
                    .push(" OR distributor_id IS NULL)");
            }
        }
        if !query.statuses.is_empty() {
            builder.push(" AND status IN (");
            let mut statuses = builder.separated(", ");
            for status in &query.statuses {
                statuses.push_bind(status.as_str());
            }
            statuses.push_unseparated(")");
        }
        if let Some(cutoff) = query.updated_before {
            builder.push(" AND updated_at < ").push_bind(format_timestamp(cutoff));
        }
        builder.push(" ORDER BY updated_at DESC, id ASC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let mut conn = self.connection().await?;
        let rows = builder.build().fetch_all(&mut *conn).await.map_err(database_error)?;
        rows.into_iter().map(request_from_row).collect()
    }

    async fn find_slot(&self, id: &SlotId) -> Result<Option<GuaranteeSlot>, StoreError> {
        let sql = format!("SELECT {SLOT_COLUMNS} FROM guarantee_slot WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;
        row.map(slot_from_row).transpose()
    }

    async fn find_slot_for_request(
        &self,
        request_id: &QuoteRequestId,
    ) -> Result<Option<GuaranteeSlot>, StoreError> {
        let mut conn = self.connection().await?;
        fetch_slot_for_request(&mut conn, request_id).await
    }

    async fn list_slots(&self) -> Result<Vec<GuaranteeSlot>, StoreError> {
        let sql =
            format!("SELECT {SLOT_COLUMNS} FROM guarantee_slot ORDER BY created_at ASC, id ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(database_error)?;
        rows.into_iter().map(slot_from_row).collect()
    }

    async fn find_refund(&self, id: &RefundRequestId) -> Result<Option<RefundRequest>, StoreError> {
        let mut conn = self.connection().await?;
        fetch_refund(&mut conn, id).await
    }

    async fn list_refunds_for_slot(
        &self,
        slot_id: &SlotId,
    ) -> Result<Vec<RefundRequest>, StoreError> {
        let mut conn = self.connection().await?;
        fetch_refunds_for_slot(&mut conn, slot_id).await
    }

    async fn list_refunds(&self) -> Result<Vec<RefundRequest>, StoreError> {
        let sql = format!(
            "SELECT {REFUND_COLUMNS} FROM refund_request ORDER BY request_date ASC, id ASC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(database_error)?;
        rows.into_iter().map(refund_from_row).collect()
    }

    async fn ledger_entries(
        &self,
        user_id: Option<&ActorId>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {LEDGER_COLUMNS} FROM balance_ledger"));
        if let Some(user_id) = user_id {
            builder.push(" WHERE user_id = ").push_bind(user_id.0.clone());
        }
        builder.push(" ORDER BY recorded_at ASC, entry_id ASC");

        let rows = builder.build().fetch_all(&self.pool).await.map_err(database_error)?;
        rows.into_iter().map(ledger_from_row).collect()
    }

    async fn undelivered_notifications(
        &self,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM notification_outbox
             WHERE dispatched_at IS NULL
             ORDER BY created_at ASC, id ASC
             LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;
        rows.into_iter().map(notification_from_row).collect()
    }

    async fn mark_notifications_dispatched(
        &self,
        ids: &[String],
        dispatched_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("UPDATE notification_outbox SET dispatched_at = ");
        builder.push_bind(format_timestamp(dispatched_at));
        builder.push(" WHERE dispatched_at IS NULL AND id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");

        builder.build().execute(&self.pool).await.map_err(database_error)?;
        Ok(())
    }
}

fn slot_entity(slot_id: &SlotId) -> EntityRef {
    EntityRef::new(EntityKind::GuaranteeSlot, slot_id.0.clone())
}

fn unique_or_database(
    error: sqlx::Error,
    constraint: &str,
    entity: Option<EntityRef>,
) -> StoreError {
    if is_unique_violation(&error) {
        StoreError::Conflict { constraint: constraint.to_string(), entity }
    } else {
        database_error(error)
    }
}

async fn fetch_request(
    conn: &mut SqliteConnection,
    id: &QuoteRequestId,
) -> Result<Option<QuoteRequest>, StoreError> {
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM quote_request WHERE id = ?");
    let row = sqlx::query(&sql).bind(&id.0).fetch_optional(conn).await.map_err(database_error)?;
    row.map(request_from_row).transpose()
}

async fn fetch_slot_for_request(
    conn: &mut SqliteConnection,
    request_id: &QuoteRequestId,
) -> Result<Option<GuaranteeSlot>, StoreError> {
    let sql = format!("SELECT {SLOT_COLUMNS} FROM guarantee_slot WHERE request_id = ?");
    let row = sqlx::query(&sql)
        .bind(&request_id.0)
        .fetch_optional(conn)
        .await
        .map_err(database_error)?;
    row.map(slot_from_row).transpose()
}

async fn fetch_refund(
    conn: &mut SqliteConnection,
    id: &RefundRequestId,
) -> Result<Option<RefundRequest>, StoreError> {
    let sql = format!("SELECT {REFUND_COLUMNS} FROM refund_request WHERE id = ?");
    let row = sqlx::query(&sql).bind(&id.0).fetch_optional(conn).await.map_err(database_error)?;
    row.map(refund_from_row).transpose()
}

async fn fetch_refunds_for_slot(
    conn: &mut SqliteConnection,
    slot_id: &SlotId,
) -> Result<Vec<RefundRequest>, StoreError> {
    let sql = format!(
        "SELECT {REFUND_COLUMNS} FROM refund_request
         WHERE slot_id = ?
         ORDER BY request_date ASC, id ASC"
    );
    let rows = sqlx::query(&sql).bind(&slot_id.0).fetch_all(conn).await.map_err(database_error)?;
    rows.into_iter().map(refund_from_row).collect()
}

fn actor(value: Option<String>) -> Option<ActorId> {
    value.map(ActorId)
}

fn request_from_row(row: SqliteRow) -> Result<QuoteRequest, StoreError> {
    let guarantee_period: Option<i64> = row.try_get("guarantee_period").map_err(database_error)?;
    let final_budget_type: Option<String> =
        row.try_get("final_budget_type").map_err(database_error)?;

    Ok(QuoteRequest {
        id: QuoteRequestId(get(&row, "id")?),
        campaign_id: CampaignId(get(&row, "campaign_id")?),
        user_id: ActorId(get(&row, "user_id")?),
        distributor_id: actor(get(&row, "distributor_id")?),
        target_rank: parse_u32("target_rank", get(&row, "target_rank")?)?,
        guarantee_count: parse_u32("guarantee_count", get(&row, "guarantee_count")?)?,
        guarantee_unit: parse_label(
            "guarantee_unit",
            get(&row, "guarantee_unit")?,
            GuaranteeUnit::parse,
        )?,
        guarantee_period: guarantee_period
            .map(|period| parse_u32("guarantee_period", period))
            .transpose()?,
        initial_budget: parse_optional_decimal("initial_budget", get(&row, "initial_budget")?)?,
        final_daily_amount: parse_optional_decimal(
            "final_daily_amount",
            get(&row, "final_daily_amount")?,
        )?,
        final_budget_type: final_budget_type
            .map(|value| parse_label("final_budget_type", value, BudgetType::parse))
            .transpose()?,
        final_total_amount: parse_optional_decimal(
            "final_total_amount",
            get(&row, "final_total_amount")?,
        )?,
        start_date: parse_optional_date("start_date", get(&row, "start_date")?)?,
        end_date: parse_optional_date("end_date", get(&row, "end_date")?)?,
        status: parse_label("status", get(&row, "status")?, QuoteRequestStatus::parse)?,
        rejection_reason: get(&row, "rejection_reason")?,
        version: parse_u32("version", get(&row, "version")?)?,
        created_at: parse_timestamp("created_at", get(&row, "created_at")?)?,
        updated_at: parse_timestamp("updated_at", get(&row, "updated_at")?)?,
    })
}

fn slot_from_row(row: SqliteRow) -> Result<GuaranteeSlot, StoreError> {
    Ok(GuaranteeSlot {
        id: SlotId(get(&row, "id")?),
        request_id: QuoteRequestId(get(&row, "request_id")?),
        status: parse_label("status", get(&row, "status")?, SlotStatus::parse)?,
        start_date: parse_date("start_date", get(&row, "start_date")?)?,
        end_date: parse_date("end_date", get(&row, "end_date")?)?,
        approved_at: parse_optional_timestamp("approved_at", get(&row, "approved_at")?)?,
        approved_by: actor(get(&row, "approved_by")?),
        rejected_at: parse_optional_timestamp("rejected_at", get(&row, "rejected_at")?)?,
        rejected_by: actor(get(&row, "rejected_by")?),
        rejection_reason: get(&row, "rejection_reason")?,
        completed_at: parse_optional_timestamp("completed_at", get(&row, "completed_at")?)?,
        completed_by: actor(get(&row, "completed_by")?),
        work_memo: get(&row, "work_memo")?,
        cancelled_at: parse_optional_timestamp("cancelled_at", get(&row, "cancelled_at")?)?,
        cancelled_by: actor(get(&row, "cancelled_by")?),
        version: parse_u32("version", get(&row, "version")?)?,
        created_at: parse_timestamp("created_at", get(&row, "created_at")?)?,
        updated_at: parse_timestamp("updated_at", get(&row, "updated_at")?)?,
    })
}

fn refund_from_row(row: SqliteRow) -> Result<RefundRequest, StoreError> {
    Ok(RefundRequest {
        id: RefundRequestId(get(&row, "id")?),
        slot_id: SlotId(get(&row, "slot_id")?),
        status: parse_label("status", get(&row, "status")?, RefundStatus::parse)?,
        origin: parse_label("origin", get(&row, "origin")?, RefundOrigin::parse)?,
        refund_reason: get(&row, "refund_reason")?,
        refund_amount: parse_decimal("refund_amount", get(&row, "refund_amount")?)?,
        requested_by: ActorId(get(&row, "requested_by")?),
        request_date: parse_timestamp("request_date", get(&row, "request_date")?)?,
        approval_date: parse_optional_timestamp("approval_date", get(&row, "approval_date")?)?,
        approval_notes: get(&row, "approval_notes")?,
        decided_by: actor(get(&row, "decided_by")?),
        version: parse_u32("version", get(&row, "version")?)?,
        updated_at: parse_timestamp("updated_at", get(&row, "updated_at")?)?,
    })
}

fn ledger_from_row(row: SqliteRow) -> Result<LedgerEntry, StoreError> {
    Ok(LedgerEntry {
        entry_id: get(&row, "entry_id")?,
        user_id: ActorId(get(&row, "user_id")?),
        direction: parse_label("direction", get(&row, "direction")?, LedgerDirection::parse)?,
        amount: parse_decimal("amount", get(&row, "amount")?)?,
        reference: EntityRef::new(
            parse_label("reference_kind", get(&row, "reference_kind")?, EntityKind::parse)?,
            get::<String>(&row, "reference_id")?,
        ),
        recorded_at: parse_timestamp("recorded_at", get(&row, "recorded_at")?)?,
    })
}

fn notification_from_row(row: SqliteRow) -> Result<Notification, StoreError> {
    let recipients_json: String = get(&row, "recipients_json")?;
    let recipients: Vec<ActorId> = serde_json::from_str(&recipients_json).map_err(|error| {
        StoreError::Decode(format!("invalid `recipients_json`: `{recipients_json}` ({error})"))
    })?;

    Ok(Notification {
        id: get(&row, "id")?,
        kind: parse_label("kind", get(&row, "kind")?, NotificationKind::parse)?,
        entity: EntityRef::new(
            parse_label("entity_kind", get(&row, "entity_kind")?, EntityKind::parse)?,
            get::<String>(&row, "entity_id")?,
        ),
        recipients,
        summary: get(&row, "summary")?,
        correlation_id: get(&row, "correlation_id")?,
        created_at: parse_timestamp("created_at", get(&row, "created_at")?)?,
    })
}

fn get<T>(row: &SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column).map_err(database_error)
}
