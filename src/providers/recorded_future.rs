//! Recorded Future adapter.
//!
//! Recorded Future's risk routes vary by entity type and API generation,
//! so each IOC type tries a `.../risk` endpoint first and falls back to
//! the bare entity endpoint on any non-200.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;

use crate::http_harness::{HttpHarness, Request};
use crate::models::{IocType, NormalizedResult};
use crate::providers::{verdict_from_risk_score, ProviderAdapter};

const BASE_URL: &str = "https://api.recordedfuture.com/v2";

pub struct RecordedFutureAdapter {
    harness: HttpHarness,
    api_key: Option<String>,
}

impl RecordedFutureAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            harness: HttpHarness::new(),
            api_key,
        }
    }

    fn candidates(ioc_value: &str, ioc_type: IocType) -> Option<Vec<(String, &'static str, String)>> {
        let (segment, param) = match ioc_type {
            IocType::Ipv4 => ("ip", "ip"),
            IocType::Domain => ("domain", "domain"),
            IocType::Url => ("url", "url"),
            IocType::Sha256 | IocType::Md5 => ("hash", "hash"),
            IocType::Email => ("email", "email"),
            IocType::SubjectKeyword => return None,
        };
        Some(vec![
            (format!("{BASE_URL}/{segment}/risk"), param, ioc_value.to_string()),
            (format!("{BASE_URL}/{segment}/{ioc_value}"), "", String::new()),
        ])
    }

    fn extract_actor_family(entity: &Value, risk: &Value) -> (Option<String>, Option<String>) {
        let mut actor = None;
        let mut family = None;

        if let Some(details) = risk
            .get("evidenceDetails")
            .or_else(|| entity.get("evidenceDetails"))
            .and_then(|v| v.as_array())
        {
            for item in details {
                if actor.is_none() {
                    actor = item.get("threatActor").and_then(|v| v.as_str()).map(str::to_string);
                }
                if family.is_none() {
                    family = item.get("malware").and_then(|v| v.as_str()).map(str::to_string);
                }
                if actor.is_some() && family.is_some() {
                    break;
                }
            }
        }

        if actor.is_none() {
            actor = entity
                .get("threat_actors")
                .and_then(|v| v.as_array())
                .and_then(|arr| arr.first())
                .and_then(|v| v.get("name"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }
        if family.is_none() {
            family = entity
                .get("malware_families")
                .and_then(|v| v.as_array())
                .and_then(|arr| arr.first())
                .and_then(|v| v.get("name"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }

        (actor, family)
    }

    fn timestamp_field(entity: &Value, field: &str) -> Option<DateTime<Utc>> {
        entity
            .get("timestamps")
            .and_then(|v| v.get(field))
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[async_trait]
impl ProviderAdapter for RecordedFutureAdapter {
    fn name(&self) -> &'static str {
        "recorded_future"
    }

    fn supports(&self, ioc_type: IocType) -> bool {
        Self::candidates("x", ioc_type).is_some()
    }

    async fn enrich(&self, ioc_value: &str, ioc_type: IocType) -> anyhow::Result<NormalizedResult> {
        let Some(api_key) = &self.api_key else {
            return Ok(NormalizedResult::unknown("API key not configured"));
        };
        let Some(candidates) = Self::candidates(ioc_value, ioc_type) else {
            return Ok(NormalizedResult::unknown(format!("Unsupported IOC type: {ioc_type}")));
        };

        let mut last_status: Option<u16> = None;

        for (url, param, value) in candidates {
            let mut req = Request::get(&url).header("X-RFToken", api_key.clone());
            req.method = Method::GET;
            if !param.is_empty() {
                req = req.query(param, value);
            }

            let response = self.harness.execute(req).await?;
            let status = response.status();
            last_status = Some(status.as_u16());

            if status.is_success() {
                let raw: Value = response.json().await.unwrap_or(Value::Null);
                let entity = raw.get("data").cloned().unwrap_or_else(|| raw.clone());
                let risk = entity.get("risk").cloned().unwrap_or(Value::Null);
                let risk_score = risk.get("score").and_then(|v| v.as_i64()).unwrap_or(0);
                let verdict = verdict_from_risk_score(risk_score);
                let (actor, family) = Self::extract_actor_family(&entity, &risk);
                let first_seen = Self::timestamp_field(&entity, "firstSeen");
                let last_seen = Self::timestamp_field(&entity, "lastSeen");

                let mut evidence_parts = Vec::new();
                if risk_score != 0 {
                    evidence_parts.push(format!("Risk Score: {risk_score}"));
                }
                if let Some(rules) = risk.get("rules").and_then(|v| v.as_array()) {
                    evidence_parts.push(format!("Risk Rules: {}", rules.len()));
                }
                let evidence = if evidence_parts.is_empty() {
                    "Recorded Future intelligence available".to_string()
                } else {
                    evidence_parts.join("; ")
                };

                return Ok(NormalizedResult {
                    verdict,
                    confidence: Some(risk_score as i32),
                    actor,
                    family,
                    evidence,
                    http_status: Some(status.as_u16() as i32),
                    raw_json: Some(entity),
                    first_seen,
                    last_seen,
                });
            }
        }

        if last_status == Some(404) {
            return Ok(NormalizedResult::unknown_with_status(
                "Not found in Recorded Future intelligence",
                404,
            ));
        }
        Ok(NormalizedResult::unknown_with_status(
            format!("API error: {:?}", last_status),
            last_status.unwrap_or(0) as i32,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn actor_prefers_evidence_details_over_top_level() {
        let risk = json!({"evidenceDetails": [{"threatActor": "FIN7", "malware": "Carbanak"}]});
        let entity = json!({});
        let (actor, family) = RecordedFutureAdapter::extract_actor_family(&entity, &risk);
        assert_eq!(actor.as_deref(), Some("FIN7"));
        assert_eq!(family.as_deref(), Some("Carbanak"));
    }

    #[test]
    fn falls_back_to_top_level_arrays() {
        let entity = json!({"threat_actors": [{"name": "APT28"}]});
        let risk = json!({});
        let (actor, _family) = RecordedFutureAdapter::extract_actor_family(&entity, &risk);
        assert_eq!(actor.as_deref(), Some("APT28"));
    }

    #[test]
    fn reads_nested_timestamps_block() {
        let entity = json!({"timestamps": {"firstSeen": "2022-06-01T00:00:00Z"}});
        let parsed = RecordedFutureAdapter::timestamp_field(&entity, "firstSeen");
        assert_eq!(parsed.unwrap().to_rfc3339(), "2022-06-01T00:00:00+00:00");
    }
}
