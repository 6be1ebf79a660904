//! Provider adapters: one `ProviderAdapter` implementation per threat
//! intelligence source, each normalizing its own response shape into a
//! [`NormalizedResult`].

pub mod crowdstrike;
pub mod flashpoint;
pub mod forensic;
pub mod osint;
pub mod recorded_future;
pub mod urlscan;
pub mod virustotal;

use async_trait::async_trait;

use crate::models::{IocType, NormalizedResult, Verdict};

/// Contract every enrichment source implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable, lowercase provider name used as the cache/storage key.
    fn name(&self) -> &'static str;

    /// Whether this provider has anything meaningful to say about `ioc_type`.
    fn supports(&self, ioc_type: IocType) -> bool;

    /// Query the provider and normalize its response. Errors here are
    /// transport/parse failures, not "not found" - those are represented
    /// as an `Ok(NormalizedResult::unknown(...))`.
    async fn enrich(&self, ioc_value: &str, ioc_type: IocType) -> anyhow::Result<NormalizedResult>;
}

/// Map a provider's free-form verdict text onto the canonical four-valued
/// verdict, mirroring the original `_normalize_verdict` table.
pub fn normalize_verdict_text(raw: &str) -> Verdict {
    match raw.to_lowercase().as_str() {
        "malicious" | "high" | "dangerous" | "threat" => Verdict::Malicious,
        "suspicious" | "medium" | "warning" => Verdict::Suspicious,
        "benign" | "clean" | "safe" | "low" => Verdict::Benign,
        _ => Verdict::Unknown,
    }
}

/// Map a numeric risk score onto a verdict using the Flashpoint/Recorded
/// Future threshold convention (>=80 malicious, >=40 suspicious).
pub fn verdict_from_risk_score(score: i64) -> Verdict {
    if score >= 80 {
        Verdict::Malicious
    } else if score >= 40 {
        Verdict::Suspicious
    } else {
        Verdict::Benign
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_verdict_synonyms() {
        assert_eq!(normalize_verdict_text("HIGH"), Verdict::Malicious);
        assert_eq!(normalize_verdict_text("warning"), Verdict::Suspicious);
        assert_eq!(normalize_verdict_text("safe"), Verdict::Benign);
        assert_eq!(normalize_verdict_text("mystery"), Verdict::Unknown);
    }

    #[test]
    fn risk_score_thresholds_match_spec() {
        assert_eq!(verdict_from_risk_score(79), Verdict::Suspicious);
        assert_eq!(verdict_from_risk_score(80), Verdict::Malicious);
        assert_eq!(verdict_from_risk_score(39), Verdict::Benign);
        assert_eq!(verdict_from_risk_score(40), Verdict::Suspicious);
    }
}
