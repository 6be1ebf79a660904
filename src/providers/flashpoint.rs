//! Flashpoint Ignite adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::http_harness::{HttpHarness, Request};
use crate::models::{IocType, NormalizedResult};
use crate::providers::{verdict_from_risk_score, ProviderAdapter};

const BASE_URL: &str = "https://fp.tools/api/v4";

pub struct FlashpointAdapter {
    harness: HttpHarness,
    api_key: Option<String>,
}

impl FlashpointAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            harness: HttpHarness::new(),
            api_key,
        }
    }

    fn indicator_type(ioc_type: IocType) -> Option<&'static str> {
        match ioc_type {
            IocType::Url => Some("url"),
            IocType::Domain => Some("domain"),
            IocType::Ipv4 => Some("ip_address"),
            IocType::Sha256 | IocType::Md5 => Some("file_hash"),
            IocType::Email => Some("email_address"),
            IocType::SubjectKeyword => None,
        }
    }

    fn extract_actor_family(indicator: &Value) -> (Option<String>, Option<String>) {
        let actor = indicator
            .get("actors")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let family = indicator
            .get("malware_families")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        (actor, family)
    }

    fn rfc3339_field(indicator: &Value, field: &str) -> Option<DateTime<Utc>> {
        indicator
            .get(field)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[async_trait]
impl ProviderAdapter for FlashpointAdapter {
    fn name(&self) -> &'static str {
        "flashpoint"
    }

    fn supports(&self, ioc_type: IocType) -> bool {
        Self::indicator_type(ioc_type).is_some()
    }

    async fn enrich(&self, ioc_value: &str, ioc_type: IocType) -> anyhow::Result<NormalizedResult> {
        let Some(api_key) = &self.api_key else {
            return Ok(NormalizedResult::unknown("API key not configured"));
        };
        let Some(fp_type) = Self::indicator_type(ioc_type) else {
            return Ok(NormalizedResult::unknown(format!("Unsupported IOC type: {ioc_type}")));
        };

        let payload = json!({
            "query": {
                "bool": {
                    "must": [
                        {"term": {"type": fp_type}},
                        {"term": {"value": ioc_value}},
                    ]
                }
            },
            "size": 1,
        });

        let response = self
            .harness
            .execute(
                Request::post(&format!("{BASE_URL}/indicators/search"))
                    .header("Authorization", format!("Bearer {api_key}"))
                    .header("Content-Type", "application/json".to_string())
                    .json(payload),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Ok(NormalizedResult::unknown_with_status(
                format!("API error: {status}"),
                status.as_u16() as i32,
            ));
        }

        let body: Value = response.json().await?;
        let hits = body.pointer("/hits/hits").and_then(|v| v.as_array());
        let Some(indicator) = hits
            .and_then(|arr| arr.first())
            .and_then(|hit| hit.get("_source"))
        else {
            return Ok(NormalizedResult::unknown_with_status(
                "Not found in Flashpoint intelligence",
                status.as_u16() as i32,
            ));
        };

        let risk_score = indicator.get("risk_score").and_then(|v| v.as_i64()).unwrap_or(0);
        let verdict = verdict_from_risk_score(risk_score);
        let (actor, family) = Self::extract_actor_family(indicator);
        let first_seen = Self::rfc3339_field(indicator, "first_seen_at");
        let last_seen = Self::rfc3339_field(indicator, "last_seen_at");

        let mut evidence_parts = Vec::new();
        if risk_score != 0 {
            evidence_parts.push(format!("Risk Score: {risk_score}"));
        }
        if let Some(sightings) = indicator.get("sightings").and_then(|v| v.as_array()) {
            evidence_parts.push(format!("Sightings: {}", sightings.len()));
        }
        if let Some(tags) = indicator.get("tags").and_then(|v| v.as_array()) {
            let names: Vec<&str> = tags
                .iter()
                .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
                .take(3)
                .collect();
            if !names.is_empty() {
                evidence_parts.push(format!("Tags: {}", names.join(", ")));
            }
        }
        let evidence = if evidence_parts.is_empty() {
            "Flashpoint intelligence available".to_string()
        } else {
            evidence_parts.join("; ")
        };

        Ok(NormalizedResult {
            verdict,
            confidence: indicator.get("confidence_score").and_then(|v| v.as_i64()).map(|v| v as i32),
            actor,
            family,
            evidence,
            http_status: Some(status.as_u16() as i32),
            raw_json: Some(indicator.clone()),
            first_seen,
            last_seen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_and_family_read_from_first_array_element() {
        let indicator = json!({
            "actors": [{"name": "APT41"}],
            "malware_families": [{"name": "Cobalt Strike"}],
        });
        let (actor, family) = FlashpointAdapter::extract_actor_family(&indicator);
        assert_eq!(actor.as_deref(), Some("APT41"));
        assert_eq!(family.as_deref(), Some("Cobalt Strike"));
    }

    #[test]
    fn parses_rfc3339_timestamp_fields() {
        let indicator = json!({"first_seen_at": "2023-01-05T12:00:00Z"});
        let parsed = FlashpointAdapter::rfc3339_field(&indicator, "first_seen_at");
        assert_eq!(parsed.unwrap().to_rfc3339(), "2023-01-05T12:00:00+00:00");
    }

    #[test]
    fn missing_timestamp_field_returns_none() {
        let indicator = json!({});
        assert!(FlashpointAdapter::rfc3339_field(&indicator, "last_seen_at").is_none());
    }
}
