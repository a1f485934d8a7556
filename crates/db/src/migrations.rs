use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Reverts applied migrations down to (but not including) `target`.
pub async fn undo_to(pool: &DbPool, target: i64) -> Result<(), MigrateError> {
    MIGRATOR.undo(pool, target).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{run_pending, undo_to, MIGRATOR};
    use crate::{connect_with_settings, DbPool};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "campaign",
        "quote_request",
        "guarantee_slot",
        "refund_request",
        "balance_ledger",
        "notification_outbox",
        "idx_quote_request_user_id",
        "idx_quote_request_distributor_id",
        "idx_quote_request_status_updated_at",
        "idx_guarantee_slot_status",
        "idx_refund_request_slot_id",
        "idx_refund_request_open_slot",
        "idx_balance_ledger_user_id",
        "idx_balance_ledger_reference",
        "idx_notification_outbox_undelivered",
    ];

    async fn schema_object_count(pool: &DbPool, name: &str) -> i64 {
        sqlx::query("SELECT COUNT(*) AS count FROM sqlite_master WHERE name = ?")
            .bind(name)
            .fetch_one(pool)
            .await
            .expect("query sqlite_master")
            .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_workflow_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            assert_eq!(schema_object_count(&pool, object).await, 1, "missing `{object}`");
        }

        let applied = sqlx::query("SELECT COUNT(*) AS count FROM _sqlx_migrations")
            .fetch_one(&pool)
            .await
            .expect("migration table")
            .get::<i64, _>("count");
        assert_eq!(applied, 1);
        assert!(MIGRATOR.iter().all(|migration| migration.migration_type.is_reversible()));

        pool.close().await;
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        undo_to(&pool, 0).await.expect("undo migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            assert_eq!(schema_object_count(&pool, object).await, 0, "`{object}` left behind");
        }

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(schema_object_count(&pool, "refund_request").await, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn open_refund_index_only_covers_unresolved_rows() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let sql = sqlx::query("SELECT sql FROM sqlite_master WHERE name = ?")
            .bind("idx_refund_request_open_slot")
            .fetch_one(&pool)
            .await
            .expect("index sql")
            .get::<String, _>("sql");
        assert!(sql.contains("pending_user_confirmation"));

        pool.close().await;
    }
}
