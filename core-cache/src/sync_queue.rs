//! # Sync Queue
//!
//! Append-only outbox of local mutations awaiting transmission. The queue
//! never talks to the network; an external drain lists, claims and then
//! removes or fails each operation.
//!
//! ## State machine
//!
//! ```text
//! pending ──claim──▶ processing ──remove──▶ (gone)
//!    ▲                    │
//!    └──── retryable ◀── failed ── retries >= max ──▶ dead-lettered
//! ```
//!
//! Ordering is insertion order (SQLite rowid).

use crate::config::RetryPolicy;
use crate::context::CacheContext;
use crate::error::Result;
use crate::models::{
    EntityKind, NewSyncOperation, QueueStats, SyncOperation, SyncOperationStatus, SyncPayload,
    Timestamp,
};
use core_runtime::events::SyncEvent;
use sqlx::sqlite::SqliteRow;
use sqlx::{query, Row, SqliteExecutor};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument, warn};

/// Disambiguates operations enqueued for one entity within one millisecond.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct SyncQueue {
    ctx: CacheContext,
}

impl SyncQueue {
    pub fn new(ctx: CacheContext) -> Self {
        Self { ctx }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.ctx.config.retry_policy
    }

    fn max_retries(&self) -> i64 {
        i64::from(self.ctx.config.retry_policy.max_retries)
    }

    /// Append an operation as `pending` with zero retries.
    #[instrument(skip(self, op), fields(entity_type = %op.entity_type(), entity_id = %op.entity_id()))]
    pub async fn enqueue(&self, op: NewSyncOperation) -> Result<SyncOperation> {
        let op = new_operation(op, self.ctx.now_millis());

        let db = &self.ctx.db;
        db.with_deadline("sync_queue.enqueue", async {
            let pool = db.session().await?;
            insert_operation(&*pool, &op).await
        })
        .await?;

        debug!(operation_id = %op.id, operation = %op.operation, "Sync operation enqueued");
        self.ctx.emit(enqueued(&op));

        Ok(op)
    }

    /// Operations awaiting transmission, oldest first: everything `pending`
    /// plus `failed` operations that still have retries left.
    pub async fn list_pending(&self) -> Result<Vec<SyncOperation>> {
        self.fetch(
            "sync_queue.list_pending",
            "SELECT * FROM sync_queue WHERE status = 'pending' OR (status = 'failed' AND retries < ?) ORDER BY rowid",
            Some(self.max_retries()),
        )
        .await
    }

    /// Failed operations with no retries left.
    pub async fn list_dead_lettered(&self) -> Result<Vec<SyncOperation>> {
        self.fetch(
            "sync_queue.list_dead_lettered",
            "SELECT * FROM sync_queue WHERE status = 'failed' AND retries >= ? ORDER BY rowid",
            Some(self.max_retries()),
        )
        .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<SyncOperation>> {
        let db = &self.ctx.db;
        db.with_deadline("sync_queue.get", async {
            let pool = db.session().await?;
            let row = query("SELECT * FROM sync_queue WHERE id = ?")
                .bind(id)
                .fetch_optional(&*pool)
                .await?;
            row.as_ref().map(operation_from_row).transpose()
        })
        .await
    }

    /// Every queued operation targeting one entity, oldest first.
    pub async fn list_for_entity(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<SyncOperation>> {
        let db = &self.ctx.db;
        db.with_deadline("sync_queue.list_for_entity", async {
            let pool = db.session().await?;
            let rows = query(
                "SELECT * FROM sync_queue WHERE entity_type = ? AND entity_id = ? ORDER BY rowid",
            )
            .bind(entity_type.as_str())
            .bind(entity_id)
            .fetch_all(&*pool)
            .await?;
            rows.iter().map(operation_from_row).collect()
        })
        .await
    }

    /// Set `status`, optionally counting one more retry, in a single
    /// statement. Returns `false` when the operation does not exist.
    #[instrument(skip(self))]
    pub async fn mark_status(
        &self,
        id: &str,
        status: SyncOperationStatus,
        increment_retries: bool,
    ) -> Result<bool> {
        let updated = self
            .transition(
                "sync_queue.mark_status",
                id,
                status,
                increment_retries,
                None,
            )
            .await?;

        if let (Some(op), SyncOperationStatus::Failed) = (&updated, status) {
            self.emit_failure(op);
        }

        Ok(updated.is_some())
    }

    /// Record a failed transmission: `failed`, one more retry, and the error
    /// message kept on the operation.
    #[instrument(skip(self, error))]
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<Option<SyncOperation>> {
        let updated = self
            .transition(
                "sync_queue.mark_failed",
                id,
                SyncOperationStatus::Failed,
                true,
                Some(error),
            )
            .await?;

        if let Some(op) = &updated {
            self.emit_failure(op);
        }

        Ok(updated)
    }

    /// Lease an operation for transmission.
    ///
    /// Only a `pending` or retryable `failed` operation can be claimed, so
    /// concurrent drains never both win the same operation.
    #[instrument(skip(self))]
    pub async fn claim(&self, id: &str) -> Result<Option<SyncOperation>> {
        let max_retries = self.max_retries();
        let db = &self.ctx.db;
        db.with_deadline("sync_queue.claim", async {
            let pool = db.session().await?;
            let mut tx = pool.begin().await?;

            let claimed = query(
                r#"
                UPDATE sync_queue SET status = 'processing'
                WHERE id = ? AND (status = 'pending' OR (status = 'failed' AND retries < ?))
                "#,
            )
            .bind(id)
            .bind(max_retries)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if claimed == 0 {
                tx.commit().await?;
                debug!("Operation not claimable");
                return Ok(None);
            }

            let row = query("SELECT * FROM sync_queue WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;

            operation_from_row(&row).map(Some)
        })
        .await
    }

    /// Return operations left in `processing` by an interrupted drain to
    /// `pending`. Retries are not counted.
    pub async fn release_stale_leases(&self) -> Result<u64> {
        let db = &self.ctx.db;
        let released = db
            .with_deadline("sync_queue.release_stale_leases", async {
                let pool = db.session().await?;
                let result = query(
                    "UPDATE sync_queue SET status = 'pending' WHERE status = 'processing'",
                )
                .execute(&*pool)
                .await?;
                Ok(result.rows_affected())
            })
            .await?;

        if released > 0 {
            info!(released, "Released stale sync leases");
        }
        Ok(released)
    }

    /// Delete an operation the remote system has acknowledged.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let db = &self.ctx.db;
        let removed = db
            .with_deadline("sync_queue.remove", async {
                let pool = db.session().await?;
                let result = query("DELETE FROM sync_queue WHERE id = ?")
                    .bind(id)
                    .execute(&*pool)
                    .await?;
                Ok(result.rows_affected() > 0)
            })
            .await?;

        if removed {
            self.ctx.emit(SyncEvent::OperationRemoved {
                operation_id: id.to_string(),
            });
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let max_retries = self.max_retries();
        let db = &self.ctx.db;
        db.with_deadline("sync_queue.stats", async {
            let pool = db.session().await?;
            let rows = query(
                r#"
                SELECT status, retries >= ? AS exhausted, COUNT(*) AS total
                FROM sync_queue
                GROUP BY status, exhausted
                "#,
            )
            .bind(max_retries)
            .fetch_all(&*pool)
            .await?;

            let mut stats = QueueStats::default();
            for row in &rows {
                let status: String = row.try_get("status")?;
                let exhausted: i64 = row.try_get("exhausted")?;
                let total: i64 = row.try_get("total")?;
                let total = total.max(0) as u64;

                match status.parse::<SyncOperationStatus>()? {
                    SyncOperationStatus::Pending => stats.pending += total,
                    SyncOperationStatus::Processing => stats.processing += total,
                    SyncOperationStatus::Failed if exhausted != 0 => stats.dead_lettered += total,
                    SyncOperationStatus::Failed => stats.failed += total,
                }
            }
            Ok(stats)
        })
        .await
    }

    async fn fetch(
        &self,
        operation: &'static str,
        sql: &'static str,
        bound: Option<i64>,
    ) -> Result<Vec<SyncOperation>> {
        let db = &self.ctx.db;
        db.with_deadline(operation, async {
            let pool = db.session().await?;
            let mut statement = query(sql);
            if let Some(value) = bound {
                statement = statement.bind(value);
            }
            let rows = statement.fetch_all(&*pool).await?;
            rows.iter().map(operation_from_row).collect()
        })
        .await
    }

    async fn transition(
        &self,
        operation: &'static str,
        id: &str,
        status: SyncOperationStatus,
        increment_retries: bool,
        error: Option<&str>,
    ) -> Result<Option<SyncOperation>> {
        let db = &self.ctx.db;
        db.with_deadline(operation, async {
            let pool = db.session().await?;
            let mut tx = pool.begin().await?;

            let updated = query(
                r#"
                UPDATE sync_queue
                SET status = ?, retries = retries + ?, last_error = COALESCE(?, last_error)
                WHERE id = ?
                "#,
            )
            .bind(status.as_str())
            .bind(i64::from(increment_retries))
            .bind(error)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated == 0 {
                tx.commit().await?;
                debug!("Sync operation not found, status unchanged");
                return Ok(None);
            }

            let row = query("SELECT * FROM sync_queue WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;

            operation_from_row(&row).map(Some)
        })
        .await
    }

    fn emit_failure(&self, op: &SyncOperation) {
        if op.is_dead_lettered(self.retry_policy()) {
            warn!(
                operation_id = %op.id,
                retries = op.retries,
                "Sync operation exhausted its retries"
            );
        }
        self.ctx.emit(SyncEvent::OperationFailed {
            operation_id: op.id.clone(),
            retries: op.retries,
            message: op.last_error.clone(),
        });
    }
}

/// Assign identity to a new operation: `pending`, zero retries, stamped
/// with `timestamp`.
pub(crate) fn new_operation(op: NewSyncOperation, timestamp: Timestamp) -> SyncOperation {
    let (operation, entity_type, entity_id, payload) = op.into_parts();
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);

    SyncOperation {
        id: SyncOperation::derive_id(entity_type, &entity_id, timestamp, sequence),
        operation,
        entity_type,
        entity_id,
        payload,
        timestamp,
        retries: 0,
        status: SyncOperationStatus::Pending,
        last_error: None,
    }
}

pub(crate) async fn insert_operation<'e, E>(executor: E, op: &SyncOperation) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let payload = op.payload.as_ref().map(serde_json::to_string).transpose()?;

    query(
        r#"
        INSERT INTO sync_queue (id, operation, entity_type, entity_id, payload, timestamp, retries, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&op.id)
    .bind(op.operation.as_str())
    .bind(op.entity_type.as_str())
    .bind(&op.entity_id)
    .bind(&payload)
    .bind(op.timestamp)
    .bind(i64::from(op.retries))
    .bind(op.status.as_str())
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) fn enqueued(op: &SyncOperation) -> SyncEvent {
    SyncEvent::OperationEnqueued {
        operation_id: op.id.clone(),
        entity_type: op.entity_type.to_string(),
        entity_id: op.entity_id.clone(),
    }
}

pub(crate) fn operation_from_row(row: &SqliteRow) -> Result<SyncOperation> {
    let operation: String = row.try_get("operation")?;
    let entity_type: String = row.try_get("entity_type")?;
    let status: String = row.try_get("status")?;
    let payload: Option<String> = row.try_get("payload")?;
    let retries: i64 = row.try_get("retries")?;

    Ok(SyncOperation {
        id: row.try_get("id")?,
        operation: operation.parse()?,
        entity_type: entity_type.parse()?,
        entity_id: row.try_get("entity_id")?,
        payload: payload
            .map(|p| serde_json::from_str::<SyncPayload>(&p))
            .transpose()?,
        timestamp: row.try_get("timestamp")?,
        retries: u32::try_from(retries.max(0)).unwrap_or(u32::MAX),
        status: status.parse()?,
        last_error: row.try_get("last_error")?,
    })
}
