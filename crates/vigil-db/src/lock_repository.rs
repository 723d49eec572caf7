use std::time::Duration;

use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use vigil_core::error::AppError;
use vigil_core::traits::LockStore;

/// PostgreSQL-backed [`LockStore`].
///
/// The acquire is a single conditional upsert: the insert wins an absent
/// lock, the conditional update reclaims an expired one, and a live lock
/// matches neither arm so zero rows change. One statement, no races.
#[derive(Clone)]
pub struct LockRepository {
    pool: Pool<Postgres>,
}

impl LockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl LockStore for LockRepository {
    async fn acquire(&self, target_id: Uuid, ttl: Duration) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO scrape_locks (target_id, locked_until, locked_at)
            VALUES ($1, NOW() + make_interval(secs => $2), NOW())
            ON CONFLICT (target_id) DO UPDATE
            SET locked_until = EXCLUDED.locked_until, locked_at = NOW()
            WHERE scrape_locks.locked_until <= NOW()
            "#,
        )
        .bind(target_id)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, target_id: Uuid) -> Result<(), AppError> {
        sqlx::query(r#"DELETE FROM scrape_locks WHERE target_id = $1"#)
            .bind(target_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn is_locked(&self, target_id: Uuid) -> Result<bool, AppError> {
        let (locked,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM scrape_locks
                WHERE target_id = $1 AND locked_until > NOW()
            )
            "#,
        )
        .bind(target_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(locked)
    }
}
