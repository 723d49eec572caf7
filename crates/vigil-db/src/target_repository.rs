use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use vigil_core::error::AppError;
use vigil_core::models::{JobRecord, SelectorConfig, Target, TargetStatus};
use vigil_core::traits::TargetStore;

/// The reconciler reads the active set every pass; this bounds how stale
/// that read may be. Status changes still bite immediately because each
/// task re-reads its own target by id before every cycle.
const ACTIVE_CACHE_TTL: Duration = Duration::from_secs(30);

const ACTIVE_CACHE_KEY: &str = "active";

/// PostgreSQL-backed [`TargetStore`].
#[derive(Clone)]
pub struct TargetRepository {
    pool: Pool<Postgres>,
    active_cache: Cache<&'static str, Arc<Vec<Target>>>,
}

impl TargetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            active_cache: Cache::builder()
                .max_capacity(1)
                .time_to_live(ACTIVE_CACHE_TTL)
                .build(),
        }
    }

    async fn invalidate_active(&self) {
        self.active_cache.invalidate(&ACTIVE_CACHE_KEY).await;
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct TargetRow {
    id: Uuid,
    url: String,
    owner: String,
    interval_secs: i64,
    status: String,
    selectors: serde_json::Value,
    jobs_found_total: i64,
    error_count: i32,
    last_check: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    added_at: DateTime<Utc>,
}

impl TryFrom<TargetRow> for Target {
    type Error = AppError;

    fn try_from(row: TargetRow) -> Result<Self, AppError> {
        let selectors: SelectorConfig = serde_json::from_value(row.selectors)?;
        Ok(Target {
            id: row.id,
            url: row.url,
            owner: row.owner,
            interval_secs: row.interval_secs.max(0) as u64,
            status: row.status.parse().unwrap_or(TargetStatus::Paused),
            selectors,
            jobs_found_total: row.jobs_found_total,
            error_count: row.error_count,
            last_check: row.last_check,
            last_success: row.last_success,
            added_at: row.added_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobRecordRow {
    fingerprint: String,
    target_id: Uuid,
    title: String,
    employer: String,
    url: String,
    location: Option<String>,
    first_seen: DateTime<Utc>,
}

impl From<JobRecordRow> for JobRecord {
    fn from(row: JobRecordRow) -> Self {
        JobRecord {
            fingerprint: row.fingerprint,
            target_id: row.target_id,
            title: row.title,
            employer: row.employer,
            url: row.url,
            location: row.location,
            first_seen: row.first_seen,
        }
    }
}

fn rows_to_targets(rows: Vec<TargetRow>) -> Result<Vec<Target>, AppError> {
    rows.into_iter().map(Target::try_from).collect()
}

impl TargetStore for TargetRepository {
    async fn create(&self, target: &Target) -> Result<(), AppError> {
        let selectors = serde_json::to_value(&target.selectors)?;
        sqlx::query(
            r#"
            INSERT INTO targets
                (id, url, owner, interval_secs, status, selectors,
                 jobs_found_total, error_count, last_check, last_success, added_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(target.id)
        .bind(&target.url)
        .bind(&target.owner)
        .bind(target.interval_secs as i64)
        .bind(target.status.as_str())
        .bind(selectors)
        .bind(target.jobs_found_total)
        .bind(target.error_count)
        .bind(target.last_check)
        .bind(target.last_success)
        .bind(target.added_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        self.invalidate_active().await;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Target>, AppError> {
        let row = sqlx::query_as::<_, TargetRow>(r#"SELECT * FROM targets WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(Target::try_from).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Target>, AppError> {
        if let Some(cached) = self.active_cache.get(&ACTIVE_CACHE_KEY).await {
            return Ok(cached.as_ref().clone());
        }

        let rows = sqlx::query_as::<_, TargetRow>(
            r#"SELECT * FROM targets WHERE status = 'active' ORDER BY added_at ASC"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let targets = rows_to_targets(rows)?;
        self.active_cache
            .insert(ACTIVE_CACHE_KEY, Arc::new(targets.clone()))
            .await;
        Ok(targets)
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Target>, AppError> {
        let rows = sqlx::query_as::<_, TargetRow>(
            r#"SELECT * FROM targets WHERE owner = $1 ORDER BY added_at ASC"#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows_to_targets(rows)
    }

    async fn update_selectors(&self, id: Uuid, selectors: &SelectorConfig) -> Result<(), AppError> {
        let value = serde_json::to_value(selectors)?;
        sqlx::query(r#"UPDATE targets SET selectors = $2 WHERE id = $1"#)
            .bind(id)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        self.invalidate_active().await;
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: TargetStatus) -> Result<(), AppError> {
        sqlx::query(r#"UPDATE targets SET status = $2 WHERE id = $1"#)
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        self.invalidate_active().await;
        Ok(())
    }

    async fn record_check(&self, id: Uuid, success: bool) -> Result<i32, AppError> {
        let (error_count,): (i32,) = sqlx::query_as(
            r#"
            UPDATE targets
            SET last_check = NOW(),
                last_success = CASE WHEN $2 THEN NOW() ELSE last_success END,
                error_count = CASE WHEN $2 THEN 0 ELSE error_count + 1 END
            WHERE id = $1
            RETURNING error_count
            "#,
        )
        .bind(id)
        .bind(success)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(error_count)
    }

    async fn increment_jobs_found(&self, id: Uuid, count: i64) -> Result<(), AppError> {
        sqlx::query(r#"UPDATE targets SET jobs_found_total = jobs_found_total + $2 WHERE id = $1"#)
            .bind(id)
            .bind(count)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn save_records(&self, records: &[JobRecord]) -> Result<(), AppError> {
        // Re-discovery after seen-set expiry is normal; the original
        // first_seen row wins.
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO job_history
                    (target_id, fingerprint, title, employer, url, location, first_seen)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (target_id, fingerprint) DO NOTHING
                "#,
            )
            .bind(record.target_id)
            .bind(&record.fingerprint)
            .bind(&record.title)
            .bind(&record.employer)
            .bind(&record.url)
            .bind(&record.location)
            .bind(record.first_seen)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        }

        Ok(())
    }

    async fn recent_records(&self, target_id: Uuid, limit: usize) -> Result<Vec<JobRecord>, AppError> {
        let rows = sqlx::query_as::<_, JobRecordRow>(
            r#"
            SELECT * FROM job_history
            WHERE target_id = $1
            ORDER BY first_seen DESC
            LIMIT $2
            "#,
        )
        .bind(target_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(r#"DELETE FROM targets WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        self.invalidate_active().await;
        Ok(())
    }
}
