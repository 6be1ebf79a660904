//! Enrichment Orchestrator: fans an IOC out to every applicable provider,
//! consulting the cache first, persisting each provider's result as soon
//! as it lands, and building the map the scorer consumes.
//!
//! Generalizes a simple loop-over-providers engine with the cache
//! check/write and the per-provider persist-and-continue semantics the
//! original pipeline used to isolate one provider's failure from the rest.

use std::sync::Arc;

use chrono::Utc;

use crate::cache::ResultCache;
use crate::errors::AdapterError;
use crate::models::{EnrichmentMap, Ioc, IocType, NormalizedResult};
use crate::providers::ProviderAdapter;
use crate::storage::PersistenceGateway;

pub struct EnrichmentOrchestrator {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    cache: ResultCache,
}

impl EnrichmentOrchestrator {
    pub fn new(providers: Vec<Arc<dyn ProviderAdapter>>, cache: ResultCache) -> Self {
        Self { providers, cache }
    }

    /// Enrich `ioc` with every supporting provider, returning the full
    /// provider -> result map (§4.4). Persists each result to `gateway`
    /// as it completes, deleting any prior row for that (ioc, provider)
    /// pair first so re-enrichment never leaves stale duplicates.
    pub async fn enrich_ioc(
        &self,
        ioc: &Ioc,
        gateway: &dyn PersistenceGateway,
    ) -> anyhow::Result<EnrichmentMap> {
        let ioc_type = ioc.ioc_type;
        let mut results = EnrichmentMap::new();

        for provider in &self.providers {
            if !provider.supports(ioc_type) {
                continue;
            }

            let result = self.enrich_with_cache(provider.as_ref(), &ioc.value, ioc_type).await;

            if let Err(e) = gateway.delete_enrichment_results(ioc.id, provider.name()).await {
                tracing::warn!(
                    ioc_id = ioc.id,
                    provider = provider.name(),
                    error = %e,
                    "Failed to clear prior enrichment row, inserting anyway"
                );
            }

            if let Err(e) = gateway
                .insert_enrichment_result(ioc.id, provider.name(), &result)
                .await
            {
                tracing::error!(
                    ioc_id = ioc.id,
                    provider = provider.name(),
                    error = %e,
                    "Failed to persist enrichment result, continuing with other providers"
                );
            }

            results.insert(provider.name().to_string(), result);
        }

        Ok(results)
    }

    /// Cache-checked single-provider call: on a cache miss, calls the
    /// provider; on a transport/parse failure, synthesizes an `unknown`
    /// result (mirroring the original's per-provider try/except) and
    /// negative-caches it so a flaky provider doesn't get hammered.
    async fn enrich_with_cache(
        &self,
        provider: &dyn ProviderAdapter,
        ioc_value: &str,
        ioc_type: IocType,
    ) -> NormalizedResult {
        if let Some(cached) = self.cache.get(provider.name(), ioc_type, ioc_value) {
            tracing::debug!(provider = provider.name(), ioc_value, "cache hit");
            metrics::counter!("cache_lookups_total", "provider" => provider.name().to_string(), "outcome" => "hit")
                .increment(1);
            return cached;
        }
        metrics::counter!("cache_lookups_total", "provider" => provider.name().to_string(), "outcome" => "miss")
            .increment(1);

        let result = match provider.enrich(ioc_value, ioc_type).await {
            Ok(mut result) => {
                if result.http_status.is_none() {
                    result.http_status = Some(200);
                }
                metrics::counter!("enrichment_requests_total", "provider" => provider.name().to_string(), "outcome" => "ok")
                    .increment(1);
                result
            }
            Err(e) => {
                let e = AdapterError::Transport(e);
                tracing::error!(
                    provider = provider.name(),
                    ioc_value,
                    error = %e,
                    "Provider enrichment failed"
                );
                metrics::counter!("enrichment_requests_total", "provider" => provider.name().to_string(), "outcome" => "error")
                    .increment(1);
                NormalizedResult::unknown_with_status(format!("Error: {e}"), 500)
            }
        };

        self.cache.put(provider.name(), ioc_type, ioc_value, result.clone());
        result
    }
}

/// Queried-at timestamp stamped onto a result just before persistence.
pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, Verdict};
    use crate::storage::MockPersistenceGateway;
    use async_trait::async_trait;
    use chrono::Utc;
    use mockall::predicate::*;
    use std::sync::Mutex;

    struct StubProvider {
        name: &'static str,
        verdict: Verdict,
    }

    #[async_trait]
    impl ProviderAdapter for StubProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supports(&self, _ioc_type: IocType) -> bool {
            true
        }

        async fn enrich(&self, _ioc_value: &str, _ioc_type: IocType) -> anyhow::Result<NormalizedResult> {
            Ok(NormalizedResult {
                verdict: self.verdict,
                evidence: "stub".into(),
                ..Default::default()
            })
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl ProviderAdapter for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn supports(&self, _ioc_type: IocType) -> bool {
            true
        }

        async fn enrich(&self, _ioc_value: &str, _ioc_type: IocType) -> anyhow::Result<NormalizedResult> {
            anyhow::bail!("boom")
        }
    }

    fn sample_ioc() -> Ioc {
        Ioc {
            id: 1,
            value: "evil.example".to_string(),
            ioc_type: IocType::Domain,
            source_platform: "test".to_string(),
            classification: Classification::Unknown,
            campaign_id: None,
            email_id: None,
            first_seen: None,
            last_seen: None,
            user_reported: false,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enriches_with_every_supporting_provider_and_persists_each() {
        let providers: Vec<Arc<dyn ProviderAdapter>> = vec![
            Arc::new(StubProvider { name: "vt", verdict: Verdict::Malicious }),
            Arc::new(StubProvider { name: "crowdstrike", verdict: Verdict::Benign }),
        ];
        let orchestrator = EnrichmentOrchestrator::new(providers, ResultCache::new());

        let mut gateway = MockPersistenceGateway::new();
        gateway
            .expect_delete_enrichment_results()
            .times(2)
            .returning(|_, _| Ok(()));
        gateway
            .expect_insert_enrichment_result()
            .times(2)
            .returning(|_, _, _| Ok(()));

        let ioc = sample_ioc();
        let results = orchestrator.enrich_ioc(&ioc, &gateway).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results["vt"].verdict, Verdict::Malicious);
        assert_eq!(results["crowdstrike"].verdict, Verdict::Benign);
    }

    #[tokio::test]
    async fn failing_provider_yields_unknown_not_an_error() {
        let providers: Vec<Arc<dyn ProviderAdapter>> = vec![Arc::new(FailingProvider)];
        let orchestrator = EnrichmentOrchestrator::new(providers, ResultCache::new());

        let mut gateway = MockPersistenceGateway::new();
        gateway.expect_delete_enrichment_results().returning(|_, _| Ok(()));
        gateway.expect_insert_enrichment_result().returning(|_, _, _| Ok(()));

        let ioc = sample_ioc();
        let results = orchestrator.enrich_ioc(&ioc, &gateway).await.unwrap();

        assert_eq!(results["failing"].verdict, Verdict::Unknown);
        assert_eq!(results["failing"].http_status, Some(500));
    }

    #[tokio::test]
    async fn second_call_hits_cache_not_the_provider() {
        let calls = Arc::new(Mutex::new(0));

        struct CountingProvider {
            calls: Arc<Mutex<i32>>,
        }

        #[async_trait]
        impl ProviderAdapter for CountingProvider {
            fn name(&self) -> &'static str {
                "counting"
            }
            fn supports(&self, _ioc_type: IocType) -> bool {
                true
            }
            async fn enrich(&self, _ioc_value: &str, _ioc_type: IocType) -> anyhow::Result<NormalizedResult> {
                *self.calls.lock().unwrap() += 1;
                Ok(NormalizedResult {
                    verdict: Verdict::Malicious,
                    ..Default::default()
                })
            }
        }

        let providers: Vec<Arc<dyn ProviderAdapter>> = vec![Arc::new(CountingProvider { calls: calls.clone() })];
        let orchestrator = EnrichmentOrchestrator::new(providers, ResultCache::new());

        let mut gateway = MockPersistenceGateway::new();
        gateway.expect_delete_enrichment_results().returning(|_, _| Ok(()));
        gateway.expect_insert_enrichment_result().returning(|_, _, _| Ok(()));

        let ioc = sample_ioc();
        orchestrator.enrich_ioc(&ioc, &gateway).await.unwrap();
        orchestrator.enrich_ioc(&ioc, &gateway).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
