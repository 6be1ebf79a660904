//! Job Processor: drives a Job through `queued -> running -> {done, error}`
//! (§4.6), enriching and scoring every IOC created at or after its Upload's
//! `created_at`.
//!
//! Generalizes `enrichment_pipeline.py`'s `process_job`. The
//! `created_at >= upload.created_at` selection rule is carried over
//! unchanged - it can include IOCs from other uploads that happen to
//! share or postdate the boundary timestamp, which is a known
//! imprecision in the original system, not something this port corrects.

use std::sync::Arc;

use chrono::Utc;

use crate::errors::JobError;
use crate::models::{JobStatus, JobUpdate};
use crate::orchestrator::EnrichmentOrchestrator;
use crate::scorer;
use crate::storage::PersistenceGateway;

pub struct JobProcessor {
    orchestrator: Arc<EnrichmentOrchestrator>,
    gateway: Arc<dyn PersistenceGateway>,
}

impl JobProcessor {
    pub fn new(orchestrator: Arc<EnrichmentOrchestrator>, gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { orchestrator, gateway }
    }

    pub fn orchestrator(&self) -> &EnrichmentOrchestrator {
        &self.orchestrator
    }

    /// Run one job to completion. Always leaves the job in a terminal
    /// state (`done` or `error`) even when individual IOCs fail - a
    /// per-IOC enrichment failure counts against `failed_iocs` but does
    /// not abort the run.
    pub async fn process_job(&self, job_id: i64) -> anyhow::Result<()> {
        let job = self
            .gateway
            .get_job(job_id)
            .await?
            .ok_or(JobError::JobNotFound(job_id))?;

        self.gateway
            .update_job(
                job_id,
                &JobUpdate {
                    status: Some(JobStatus::Running),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        let run_result = self.run(job_id, job.upload_id).await;

        match run_result {
            Ok((processed, successful, failed)) => {
                self.gateway
                    .update_job(
                        job_id,
                        &JobUpdate {
                            status: Some(JobStatus::Done),
                            finished_at: Some(Utc::now()),
                            processed_iocs: Some(processed),
                            successful_iocs: Some(successful),
                            failed_iocs: Some(failed),
                            ..Default::default()
                        },
                    )
                    .await?;
                metrics::counter!("job_outcomes_total", "status" => "done").increment(1);
                Ok(())
            }
            Err(e) => {
                self.gateway
                    .update_job(
                        job_id,
                        &JobUpdate {
                            status: Some(JobStatus::Error),
                            finished_at: Some(Utc::now()),
                            error_message: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await?;
                metrics::counter!("job_outcomes_total", "status" => "error").increment(1);
                Err(e)
            }
        }
    }

    /// Returns (processed, successful, failed) counts. `processed_iocs`
    /// increments unconditionally per IOC and is committed after every IOC
    /// so `GET /api/v1/jobs/:id` reflects live progress, not just the
    /// terminal state.
    async fn run(&self, job_id: i64, upload_id: i64) -> anyhow::Result<(i32, i32, i32)> {
        let upload_created_at = self
            .gateway
            .get_upload_created_at(upload_id)
            .await?
            .ok_or(JobError::UploadNotFound)?;

        let iocs: Vec<_> = self
            .gateway
            .list_iocs_for_upload(upload_id)
            .await?
            .into_iter()
            .filter(|ioc| ioc.created_at >= upload_created_at)
            .collect();

        self.gateway
            .update_job(
                job_id,
                &JobUpdate {
                    total_iocs: Some(iocs.len() as i32),
                    ..Default::default()
                },
            )
            .await?;

        let mut processed = 0;
        let mut successful = 0;
        let mut failed = 0;

        for ioc in &iocs {
            processed += 1;

            match self.orchestrator.enrich_ioc(ioc, self.gateway.as_ref()).await {
                Ok(results) => {
                    let score = scorer::score(&results);
                    match self.gateway.insert_ioc_score(ioc.id, &score).await {
                        Ok(()) => successful += 1,
                        Err(e) => {
                            tracing::error!(ioc_id = ioc.id, error = %e, "Failed to persist ioc score");
                            failed += 1;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(ioc_id = ioc.id, error = %e, "Failed to enrich ioc");
                    failed += 1;
                }
            }

            self.gateway
                .update_job(
                    job_id,
                    &JobUpdate {
                        processed_iocs: Some(processed),
                        successful_iocs: Some(successful),
                        failed_iocs: Some(failed),
                        ..Default::default()
                    },
                )
                .await?;
        }

        Ok((processed, successful, failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::models::{Classification, Ioc, IocType, NormalizedResult, Verdict};
    use crate::providers::ProviderAdapter;
    use crate::storage::MockPersistenceGateway;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    struct StubProvider;

    #[async_trait]
    impl ProviderAdapter for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn supports(&self, _ioc_type: IocType) -> bool {
            true
        }
        async fn enrich(&self, _ioc_value: &str, _ioc_type: IocType) -> anyhow::Result<NormalizedResult> {
            Ok(NormalizedResult {
                verdict: Verdict::Malicious,
                ..Default::default()
            })
        }
    }

    fn sample_ioc(id: i64, created_at: chrono::DateTime<Utc>) -> Ioc {
        Ioc {
            id,
            value: format!("ioc-{id}"),
            ioc_type: IocType::Domain,
            source_platform: "test".to_string(),
            classification: Classification::Unknown,
            campaign_id: None,
            email_id: None,
            first_seen: None,
            last_seen: None,
            user_reported: false,
            notes: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn job_completes_and_counts_every_ioc() {
        let upload_created_at = Utc::now() - Duration::hours(1);
        let job = crate::models::Job {
            id: 1,
            upload_id: 10,
            status: JobStatus::Queued,
            started_at: None,
            finished_at: None,
            error_message: None,
            total_iocs: 0,
            processed_iocs: 0,
            successful_iocs: 0,
            failed_iocs: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let iocs = vec![
            sample_ioc(1, upload_created_at + Duration::minutes(1)),
            sample_ioc(2, upload_created_at + Duration::minutes(2)),
        ];

        let mut gateway = MockPersistenceGateway::new();
        gateway.expect_get_job().returning(move |_| Ok(Some(job.clone())));
        gateway
            .expect_get_upload_created_at()
            .returning(move |_| Ok(Some(upload_created_at)));
        let iocs_clone = iocs.clone();
        gateway
            .expect_list_iocs_for_upload()
            .returning(move |_| Ok(iocs_clone.clone()));
        gateway.expect_update_job().returning(|_, _| Ok(()));
        gateway.expect_delete_enrichment_results().returning(|_, _| Ok(()));
        gateway.expect_insert_enrichment_result().returning(|_, _, _| Ok(()));
        gateway.expect_insert_ioc_score().returning(|_, _| Ok(()));

        let providers: Vec<Arc<dyn ProviderAdapter>> = vec![Arc::new(StubProvider)];
        let orchestrator = Arc::new(EnrichmentOrchestrator::new(providers, ResultCache::new()));
        let processor = JobProcessor::new(orchestrator, Arc::new(gateway));

        processor.process_job(1).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_job_errors_without_panicking() {
        let mut gateway = MockPersistenceGateway::new();
        gateway.expect_get_job().returning(|_| Ok(None));

        let providers: Vec<Arc<dyn ProviderAdapter>> = vec![Arc::new(StubProvider)];
        let orchestrator = Arc::new(EnrichmentOrchestrator::new(providers, ResultCache::new()));
        let processor = JobProcessor::new(orchestrator, Arc::new(gateway));

        let result = processor.process_job(999).await;
        assert!(result.is_err());
    }
}
