use std::time::Duration;

use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use vigil_core::dedup::DEFAULT_SEEN_TTL;
use vigil_core::error::AppError;
use vigil_core::traits::SeenCache;

/// PostgreSQL-backed [`SeenCache`] shared by all scheduler processes.
///
/// Mirrors the in-memory semantics: one expiry for the whole per-target set,
/// rewritten on every bulk insert. Expired rows are ignored by reads and
/// dropped lazily on the next insert.
#[derive(Clone)]
pub struct SeenRepository {
    pool: Pool<Postgres>,
    ttl: Duration,
}

impl SeenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self::with_ttl(pool, DEFAULT_SEEN_TTL)
    }

    pub fn with_ttl(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }
}

impl SeenCache for SeenRepository {
    async fn contains(&self, target_id: Uuid, fp: &str) -> Result<bool, AppError> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM seen_fingerprints
                WHERE target_id = $1 AND fingerprint = $2 AND expires_at > NOW()
            )
            "#,
        )
        .bind(target_id)
        .bind(fp)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(exists)
    }

    async fn insert_bulk(&self, target_id: Uuid, fps: &[String]) -> Result<(), AppError> {
        if fps.is_empty() {
            return Ok(());
        }

        let ttl_secs = self.ttl.as_secs_f64();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query(r#"DELETE FROM seen_fingerprints WHERE target_id = $1 AND expires_at <= NOW()"#)
            .bind(target_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        // Whole-set expiry refresh: existing live rows move out with the
        // new ones.
        sqlx::query(
            r#"
            UPDATE seen_fingerprints
            SET expires_at = NOW() + make_interval(secs => $2)
            WHERE target_id = $1
            "#,
        )
        .bind(target_id)
        .bind(ttl_secs)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO seen_fingerprints (target_id, fingerprint, expires_at)
            SELECT $1, fp, NOW() + make_interval(secs => $3)
            FROM UNNEST($2::text[]) AS fp
            ON CONFLICT (target_id, fingerprint)
            DO UPDATE SET expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(target_id)
        .bind(fps)
        .bind(ttl_secs)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(%target_id, added = fps.len(), "Added fingerprints to seen set");
        Ok(())
    }

    async fn count(&self, target_id: Uuid) -> Result<usize, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM seen_fingerprints WHERE target_id = $1 AND expires_at > NOW()"#,
        )
        .bind(target_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count.max(0) as usize)
    }

    async fn clear(&self, target_id: Uuid) -> Result<(), AppError> {
        sqlx::query(r#"DELETE FROM seen_fingerprints WHERE target_id = $1"#)
            .bind(target_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}
