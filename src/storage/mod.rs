//! Persistence Gateway: the only place SQL touches the rest of the crate.
//!
//! `PersistenceGateway` is the trait the Orchestrator and Job Processor
//! depend on (§4.7); `PgGateway` is the concrete Postgres implementation.
//! Keeping the trait separate lets tests swap in a `mockall` mock instead
//! of standing up a database.

use async_trait::async_trait;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::errors::JobError;
use crate::models::{EnrichmentMap, Ioc, Job, JobUpdate, NormalizedResult, Score};

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn get_job(&self, job_id: i64) -> Result<Option<Job>>;

    /// The Upload's `created_at`, used as the Job Processor's IOC selection
    /// boundary (§4.6) - `IOC.created_at >= upload.created_at`.
    async fn get_upload_created_at(&self, upload_id: i64) -> Result<Option<chrono::DateTime<Utc>>>;

    async fn list_iocs_for_upload(&self, upload_id: i64) -> Result<Vec<Ioc>>;

    async fn update_job(&self, job_id: i64, update: &JobUpdate) -> Result<()>;

    /// Delete any existing row for this (ioc_id, provider) pair. Called
    /// before insert so re-enrichment never leaves stale duplicates (§3).
    async fn delete_enrichment_results(&self, ioc_id: i64, provider: &str) -> Result<()>;

    async fn insert_enrichment_result(
        &self,
        ioc_id: i64,
        provider: &str,
        result: &NormalizedResult,
    ) -> Result<()>;

    async fn insert_ioc_score(&self, ioc_id: i64, score: &Score) -> Result<()>;
}

#[cfg(test)]
mockall::mock! {
    pub PersistenceGateway {}

    #[async_trait]
    impl PersistenceGateway for PersistenceGateway {
        async fn get_job(&self, job_id: i64) -> Result<Option<Job>>;
        async fn get_upload_created_at(&self, upload_id: i64) -> Result<Option<chrono::DateTime<Utc>>>;
        async fn list_iocs_for_upload(&self, upload_id: i64) -> Result<Vec<Ioc>>;
        async fn update_job(&self, job_id: i64, update: &JobUpdate) -> Result<()>;
        async fn delete_enrichment_results(&self, ioc_id: i64, provider: &str) -> Result<()>;
        async fn insert_enrichment_result(&self, ioc_id: i64, provider: &str, result: &NormalizedResult) -> Result<()>;
        async fn insert_ioc_score(&self, ioc_id: i64, score: &Score) -> Result<()>;
    }
}

/// Postgres-backed implementation of `PersistenceGateway`.
#[derive(Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    /// Score the full history of an IOC's enrichment results currently on
    /// file, regardless of who called for it. Used by the re-enrich-IOC
    /// API handler to recompute a score without re-running a whole job.
    pub async fn enrichment_map_for_ioc(&self, ioc_id: i64) -> Result<EnrichmentMap> {
        let rows = sqlx::query_as::<_, crate::models::EnrichmentResult>(
            "SELECT * FROM enrichment_results WHERE ioc_id = $1",
        )
        .bind(ioc_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch enrichment results")?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.provider,
                    NormalizedResult {
                        verdict: row.verdict,
                        confidence: row.confidence,
                        actor: row.actor,
                        family: row.family,
                        evidence: row.evidence,
                        http_status: row.http_status,
                        raw_json: row.raw_json,
                        first_seen: row.first_seen,
                        last_seen: row.last_seen,
                    },
                )
            })
            .collect())
    }

    pub async fn get_ioc(&self, ioc_id: i64) -> Result<Option<Ioc>> {
        sqlx::query_as::<_, Ioc>("SELECT * FROM iocs WHERE id = $1")
            .bind(ioc_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch ioc")
    }
}

#[async_trait]
impl PersistenceGateway for PgGateway {
    async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch job")
    }

    async fn get_upload_created_at(&self, upload_id: i64) -> Result<Option<chrono::DateTime<Utc>>> {
        let row: Option<(chrono::DateTime<Utc>,)> =
            sqlx::query_as("SELECT created_at FROM uploads WHERE id = $1")
                .bind(upload_id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch upload")?;
        Ok(row.map(|(created_at,)| created_at))
    }

    async fn list_iocs_for_upload(&self, upload_id: i64) -> Result<Vec<Ioc>> {
        let upload_created_at = self
            .get_upload_created_at(upload_id)
            .await?
            .ok_or(JobError::UploadNotFound)?;

        sqlx::query_as::<_, Ioc>(
            "SELECT * FROM iocs WHERE created_at >= $1 ORDER BY id",
        )
        .bind(upload_created_at)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list iocs for upload")
    }

    async fn update_job(&self, job_id: i64, update: &JobUpdate) -> Result<()> {
        let current = self
            .get_job(job_id)
            .await?
            .ok_or(JobError::JobNotFound(job_id))?;

        let status = update.status.unwrap_or(current.status);
        let started_at = update.started_at.or(current.started_at);
        let finished_at = update.finished_at.or(current.finished_at);
        let error_message = update
            .error_message
            .clone()
            .or(current.error_message);
        let total_iocs = update.total_iocs.unwrap_or(current.total_iocs);
        let processed_iocs = update.processed_iocs.unwrap_or(current.processed_iocs);
        let successful_iocs = update.successful_iocs.unwrap_or(current.successful_iocs);
        let failed_iocs = update.failed_iocs.unwrap_or(current.failed_iocs);

        sqlx::query(
            r#"
            UPDATE jobs SET
                status = $1, started_at = $2, finished_at = $3, error_message = $4,
                total_iocs = $5, processed_iocs = $6, successful_iocs = $7, failed_iocs = $8,
                updated_at = NOW()
            WHERE id = $9
            "#,
        )
        .bind(status)
        .bind(started_at)
        .bind(finished_at)
        .bind(error_message)
        .bind(total_iocs)
        .bind(processed_iocs)
        .bind(successful_iocs)
        .bind(failed_iocs)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("Failed to update job")?;

        Ok(())
    }

    async fn delete_enrichment_results(&self, ioc_id: i64, provider: &str) -> Result<()> {
        sqlx::query("DELETE FROM enrichment_results WHERE ioc_id = $1 AND provider = $2")
            .bind(ioc_id)
            .bind(provider)
            .execute(&self.pool)
            .await
            .context("Failed to delete prior enrichment result")?;
        Ok(())
    }

    async fn insert_enrichment_result(
        &self,
        ioc_id: i64,
        provider: &str,
        result: &NormalizedResult,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO enrichment_results (
                ioc_id, provider, verdict, confidence, actor, family, evidence,
                raw_json, http_status, first_seen, last_seen, queried_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            "#,
        )
        .bind(ioc_id)
        .bind(provider)
        .bind(result.verdict)
        .bind(result.confidence)
        .bind(&result.actor)
        .bind(&result.family)
        .bind(&result.evidence)
        .bind(&result.raw_json)
        .bind(result.http_status)
        .bind(result.first_seen)
        .bind(result.last_seen)
        .execute(&self.pool)
        .await
        .context("Failed to insert enrichment result")?;

        Ok(())
    }

    async fn insert_ioc_score(&self, ioc_id: i64, score: &Score) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ioc_scores (ioc_id, risk_score, attribution_score, risk_band, computed_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(ioc_id)
        .bind(score.risk_score)
        .bind(score.attribution_score)
        .bind(score.risk_band)
        .execute(&self.pool)
        .await
        .context("Failed to insert ioc score")?;

        Ok(())
    }
}
