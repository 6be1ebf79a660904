//! URLScan.io adapter - search only.
//!
//! Never submits new scans: submitting a new scan would tip off the
//! adversary whose URL is under analysis. If no prior scan result exists,
//! this returns a safe `unknown` verdict instead.

use async_trait::async_trait;
use serde_json::Value;

use crate::http_harness::{HttpHarness, Request};
use crate::models::{IocType, NormalizedResult, Verdict};
use crate::providers::ProviderAdapter;

const BASE_URL: &str = "https://urlscan.io/api/v1";

pub struct UrlScanAdapter {
    harness: HttpHarness,
    api_key: Option<String>,
}

impl UrlScanAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            harness: HttpHarness::new(),
            api_key,
        }
    }

    fn extract_verdict(result: &Value) -> Verdict {
        let verdicts = result.get("verdicts").cloned().unwrap_or(Value::Null);
        let is_malicious = |v: &Value| v.get("malicious").and_then(|b| b.as_bool()).unwrap_or(false);
        let is_suspicious = |v: &Value| v.get("suspicious").and_then(|b| b.as_bool()).unwrap_or(false);

        let overall = verdicts.get("overall").cloned().unwrap_or(Value::Null);
        let urls = verdicts.get("urls").cloned().unwrap_or(Value::Null);
        let domains = verdicts.get("domains").cloned().unwrap_or(Value::Null);

        if is_malicious(&overall) || is_malicious(&urls) || is_malicious(&domains) {
            return Verdict::Malicious;
        }
        if is_suspicious(&overall) || is_suspicious(&urls) || is_suspicious(&domains) {
            return Verdict::Suspicious;
        }
        Verdict::Benign
    }

    fn extract_confidence(verdict: Verdict) -> i32 {
        match verdict {
            Verdict::Malicious => 90,
            Verdict::Suspicious => 60,
            _ => 10,
        }
    }

    fn extract_evidence(result: &Value, verdict: Verdict) -> String {
        let mut parts = Vec::new();
        if let Some(title) = result.pointer("/page/title").and_then(|v| v.as_str()) {
            parts.push(format!("Page title: {title}"));
        }
        match verdict {
            Verdict::Malicious => parts.push("Overall verdict: malicious".to_string()),
            Verdict::Suspicious => parts.push("Overall verdict: suspicious".to_string()),
            _ => {}
        }
        if let Some(shot) = result.pointer("/task/screenshotURL").and_then(|v| v.as_str()) {
            parts.push(format!("Screenshot: {shot}"));
        }
        if parts.is_empty() {
            "No specific evidence".to_string()
        } else {
            parts.join("; ")
        }
    }
}

#[async_trait]
impl ProviderAdapter for UrlScanAdapter {
    fn name(&self) -> &'static str {
        "urlscan"
    }

    fn supports(&self, ioc_type: IocType) -> bool {
        matches!(ioc_type, IocType::Url | IocType::Domain)
    }

    async fn enrich(&self, ioc_value: &str, ioc_type: IocType) -> anyhow::Result<NormalizedResult> {
        let Some(api_key) = &self.api_key else {
            return Ok(NormalizedResult::unknown("API key not configured"));
        };

        let url = match ioc_type {
            IocType::Domain => format!("https://{ioc_value}"),
            _ => ioc_value.to_string(),
        };

        let search_url = format!("{BASE_URL}/search/");
        let response = self
            .harness
            .execute(
                Request::get(&search_url)
                    .header("API-Key", api_key.clone())
                    .query("q", format!("page.url:{url}"))
                    .query("size", "1"),
            )
            .await?;

        if !response.status().is_success() {
            return Ok(NormalizedResult::unknown_with_status(
                "URLScan search failed",
                response.status().as_u16() as i32,
            ));
        }

        let body: Value = response.json().await?;
        let first_result = body
            .get("results")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first());

        match first_result {
            Some(result) => {
                let verdict = Self::extract_verdict(result);
                let confidence = Self::extract_confidence(verdict);
                let evidence = Self::extract_evidence(result, verdict);
                Ok(NormalizedResult {
                    verdict,
                    confidence: Some(confidence),
                    evidence,
                    http_status: Some(200),
                    raw_json: Some(result.clone()),
                    ..Default::default()
                })
            }
            None => Ok(NormalizedResult::unknown_with_status(
                "No prior URLScan result found; submission disabled by policy",
                204,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overall_malicious_wins_over_suspicious() {
        let result = json!({"verdicts": {"overall": {"malicious": true, "suspicious": true}}});
        assert_eq!(UrlScanAdapter::extract_verdict(&result), Verdict::Malicious);
    }

    #[test]
    fn domain_verdict_alone_is_sufficient() {
        let result = json!({"verdicts": {"domains": {"malicious": true}}});
        assert_eq!(UrlScanAdapter::extract_verdict(&result), Verdict::Malicious);
    }

    #[test]
    fn confidence_tracks_verdict_strength() {
        assert_eq!(UrlScanAdapter::extract_confidence(Verdict::Malicious), 90);
        assert_eq!(UrlScanAdapter::extract_confidence(Verdict::Suspicious), 60);
        assert_eq!(UrlScanAdapter::extract_confidence(Verdict::Benign), 10);
    }
}
