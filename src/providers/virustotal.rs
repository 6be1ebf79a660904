//! VirusTotal v3 adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::http_harness::{HttpHarness, Request};
use crate::models::{IocType, NormalizedResult, Verdict};
use crate::providers::ProviderAdapter;

const BASE_URL: &str = "https://www.virustotal.com/api/v3";

pub struct VirusTotalAdapter {
    harness: HttpHarness,
    api_key: Option<String>,
}

impl VirusTotalAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            harness: HttpHarness::new(),
            api_key,
        }
    }

    fn endpoint(ioc_type: IocType) -> &'static str {
        match ioc_type {
            IocType::Url => "/urls",
            IocType::Domain => "/domains",
            IocType::Ipv4 => "/ip_addresses",
            IocType::Sha256 | IocType::Md5 => "/files",
            IocType::Email | IocType::SubjectKeyword => "/files",
        }
    }

    fn relationship_endpoint(ioc_value: &str, ioc_type: IocType) -> Option<(String, &'static str)> {
        match ioc_type {
            IocType::Sha256 | IocType::Md5 => Some((
                format!("{BASE_URL}/files/{ioc_value}/relationships/downloaded_by"),
                "downloaded_by",
            )),
            IocType::Url => Some((
                format!("{BASE_URL}/urls/{ioc_value}/relationships/downloaded_files"),
                "downloaded_files",
            )),
            IocType::Domain => Some((
                format!("{BASE_URL}/domains/{ioc_value}/relationships/downloaded_files"),
                "downloaded_files",
            )),
            IocType::Ipv4 => Some((
                format!("{BASE_URL}/ip_addresses/{ioc_value}/relationships/downloaded_files"),
                "downloaded_files",
            )),
            IocType::Email | IocType::SubjectKeyword => None,
        }
    }

    fn extract_actor_family(attributes: &Value) -> (Option<String>, Option<String>) {
        let label = attributes
            .get("popular_threat_classification")
            .and_then(|c| c.get("suggested_threat_label"))
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_str());

        match label {
            Some(label) if label.contains(':') => {
                let mut parts = label.splitn(2, ':');
                let family = parts.next().unwrap_or_default().trim().to_string();
                let actor = parts.next().unwrap_or_default().trim().to_string();
                (Some(actor).filter(|s| !s.is_empty()), Some(family).filter(|s| !s.is_empty()))
            }
            Some(label) => (None, Some(label.trim().to_string())),
            None => (None, None),
        }
    }

    fn extract_confidence(stats: &Value) -> Option<i32> {
        let malicious = stats.get("malicious").and_then(|v| v.as_i64()).unwrap_or(0);
        let suspicious = stats.get("suspicious").and_then(|v| v.as_i64()).unwrap_or(0);
        let undetected = stats.get("undetected").and_then(|v| v.as_i64()).unwrap_or(0);
        let total = malicious + suspicious + undetected;
        if total > 0 {
            Some((((malicious + suspicious) as f64 / total as f64) * 100.0).min(100.0) as i32)
        } else {
            None
        }
    }

    fn epoch_to_datetime(v: Option<&Value>) -> Option<DateTime<Utc>> {
        v.and_then(|v| v.as_i64())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

#[async_trait]
impl ProviderAdapter for VirusTotalAdapter {
    fn name(&self) -> &'static str {
        "virustotal"
    }

    fn supports(&self, ioc_type: IocType) -> bool {
        matches!(
            ioc_type,
            IocType::Url | IocType::Domain | IocType::Ipv4 | IocType::Sha256 | IocType::Md5
        )
    }

    async fn enrich(&self, ioc_value: &str, ioc_type: IocType) -> anyhow::Result<NormalizedResult> {
        let Some(api_key) = &self.api_key else {
            return Ok(NormalizedResult::unknown("API key not configured"));
        };

        let url = format!("{BASE_URL}{}/{ioc_value}", Self::endpoint(ioc_type));
        let response = self
            .harness
            .execute(Request::get(&url).header("x-apikey", api_key.clone()))
            .await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(NormalizedResult::unknown_with_status(
                "Not found in VirusTotal",
                status.as_u16() as i32,
            ));
        }
        if !status.is_success() {
            return Ok(NormalizedResult::unknown_with_status(
                format!("API error: {status}"),
                status.as_u16() as i32,
            ));
        }

        let raw: Value = response.json().await?;
        let attributes = raw.pointer("/data/attributes").cloned().unwrap_or(Value::Null);
        let stats = attributes
            .get("last_analysis_stats")
            .cloned()
            .unwrap_or(Value::Null);
        let malicious = stats.get("malicious").and_then(|v| v.as_i64()).unwrap_or(0);
        let suspicious = stats.get("suspicious").and_then(|v| v.as_i64()).unwrap_or(0);

        let verdict = if malicious > 0 {
            Verdict::Malicious
        } else if suspicious > 0 {
            Verdict::Suspicious
        } else {
            Verdict::Benign
        };

        let confidence = Self::extract_confidence(&stats);
        let (actor, family) = Self::extract_actor_family(&attributes);

        let first_seen = Self::epoch_to_datetime(
            attributes
                .get("first_submission_date")
                .or_else(|| attributes.get("creation_date")),
        );
        let last_seen = Self::epoch_to_datetime(attributes.get("last_analysis_date"));

        let mut evidence_parts = Vec::new();
        if malicious > 0 {
            evidence_parts.push(format!("{malicious} engines detected as malicious"));
        }
        if suspicious > 0 {
            evidence_parts.push(format!("{suspicious} engines detected as suspicious"));
        }

        if let Some((rel_url, label)) = Self::relationship_endpoint(ioc_value, ioc_type) {
            if let Ok(rel_response) = self
                .harness
                .execute(Request::get(&rel_url).header("x-apikey", api_key.clone()))
                .await
            {
                if rel_response.status().is_success() {
                    if let Ok(rel_json) = rel_response.json::<Value>().await {
                        let count = rel_json.get("data").and_then(|v| v.as_array()).map_or(0, |a| a.len());
                        if count > 0 {
                            evidence_parts.push(format!("Relations: {label}:{count}"));
                        }
                    }
                }
            }
        }

        let evidence = if evidence_parts.is_empty() {
            "No detections".to_string()
        } else {
            evidence_parts.join("; ")
        };

        Ok(NormalizedResult {
            verdict,
            confidence,
            actor,
            family,
            evidence,
            http_status: Some(status.as_u16() as i32),
            raw_json: Some(raw),
            first_seen,
            last_seen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_threat_label_into_family_and_actor() {
        let attrs = json!({
            "popular_threat_classification": {
                "suggested_threat_label": ["trojan:emotet"]
            }
        });
        let (actor, family) = VirusTotalAdapter::extract_actor_family(&attrs);
        assert_eq!(actor.as_deref(), Some("emotet"));
        assert_eq!(family.as_deref(), Some("trojan"));
    }

    #[test]
    fn confidence_is_detection_ratio_percent() {
        let stats = json!({"malicious": 10, "suspicious": 5, "undetected": 85});
        assert_eq!(VirusTotalAdapter::extract_confidence(&stats), Some(15));
    }

    #[test]
    fn confidence_is_none_without_engines() {
        let stats = json!({});
        assert_eq!(VirusTotalAdapter::extract_confidence(&stats), None);
    }
}
