//! CrowdStrike Falcon Intel adapter.
//!
//! Caches the OAuth2 access token on the adapter instance for the life of
//! the process - there is no refresh; a long-running deployment eventually
//! needs to restart to pick up a new token, same as the system this was
//! modeled on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::http_harness::{HttpHarness, Request};
use crate::models::{IocType, NormalizedResult, Verdict};
use crate::providers::ProviderAdapter;

const BASE_URL: &str = "https://api.crowdstrike.com";

pub struct CrowdStrikeAdapter {
    harness: HttpHarness,
    client_id: Option<String>,
    client_secret: Option<String>,
    access_token: RwLock<Option<String>>,
}

impl CrowdStrikeAdapter {
    pub fn new(client_id: Option<String>, client_secret: Option<String>) -> Self {
        Self {
            harness: HttpHarness::new(),
            client_id,
            client_secret,
            access_token: RwLock::new(None),
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

    async fn access_token(&self) -> Option<String> {
        if let Some(token) = self.access_token.read().await.clone() {
            return Some(token);
        }

        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return None;
        };

        let body: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", client_id)
            .append_pair("client_secret", client_secret)
            .append_pair("grant_type", "client_credentials")
            .finish();

        let response = self
            .harness
            .execute(
                Request::post(&format!("{BASE_URL}/oauth2/token"))
                    .header("Content-Type", "application/x-www-form-urlencoded".to_string())
                    .raw_body(body),
            )
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }
        let body: Value = response.json().await.ok()?;
        let token = body.get("access_token")?.as_str()?.to_string();
        *self.access_token.write().await = Some(token.clone());
        Some(token)
    }

    fn extract_verdict(indicator: &Value) -> Verdict {
        let conf = indicator
            .get("malicious_confidence")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_lowercase();
        if matches!(conf.as_str(), "high" | "very-high" | "critical") {
            return Verdict::Malicious;
        }
        if matches!(conf.as_str(), "medium" | "moderate") {
            return Verdict::Suspicious;
        }

        let labels: Vec<String> = indicator
            .get("labels")
            .or_else(|| indicator.get("tags"))
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(|s| s.to_lowercase()).collect())
            .unwrap_or_default();

        if labels.iter().any(|l| l.contains("malicious") || l.contains("malware")) {
            return Verdict::Malicious;
        }
        if labels.iter().any(|l| l.contains("suspicious")) {
            return Verdict::Suspicious;
        }
        Verdict::Benign
    }

    fn extract_actor_family(indicator: &Value) -> (Option<String>, Option<String>) {
        let actor = indicator
            .get("actors")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                indicator
                    .get("actor")
                    .and_then(|v| v.get("name").and_then(|n| n.as_str()).or_else(|| v.as_str()))
                    .map(str::to_string)
            });

        let family = indicator
            .get("malware_families")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                indicator
                    .get("malware_family")
                    .and_then(|v| v.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
            })
            .or_else(|| indicator.get("family").and_then(|v| v.as_str()).map(str::to_string));

        (actor, family)
    }

    fn epoch_to_datetime(indicator: &Value, field: &str) -> Option<DateTime<Utc>> {
        indicator
            .get(field)
            .and_then(|v| v.as_i64())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

#[async_trait]
impl ProviderAdapter for CrowdStrikeAdapter {
    fn name(&self) -> &'static str {
        "crowdstrike"
    }

    fn supports(&self, ioc_type: IocType) -> bool {
        Self::indicator_type(ioc_type).is_some()
    }

    async fn enrich(&self, ioc_value: &str, ioc_type: IocType) -> anyhow::Result<NormalizedResult> {
        if self.client_id.is_none() || self.client_secret.is_none() {
            return Ok(NormalizedResult::unknown("API credentials not configured"));
        }

        let Some(token) = self.access_token().await else {
            return Ok(NormalizedResult::unknown_with_status(
                "Failed to obtain access token",
                401,
            ));
        };

        let Some(cs_type) = Self::indicator_type(ioc_type) else {
            return Ok(NormalizedResult::unknown(format!("Unsupported IOC type: {ioc_type}")));
        };

        let filter = format!("indicator:'{ioc_value}'+type:'{cs_type}'");
        let response = self
            .harness
            .execute(
                Request::get(&format!("{BASE_URL}/intel/combined/indicators/v1"))
                    .header("Authorization", format!("Bearer {token}"))
                    .query("filter", filter)
                    .query("limit", "1"),
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
        let resources = body.get("resources").and_then(|v| v.as_array());

        let Some(indicator) = resources.and_then(|arr| arr.first()) else {
            return Ok(NormalizedResult::unknown_with_status(
                "Not found in CrowdStrike intelligence",
                status.as_u16() as i32,
            ));
        };

        let verdict = Self::extract_verdict(indicator);
        let (actor, family) = Self::extract_actor_family(indicator);
        let first_seen = Self::epoch_to_datetime(indicator, "published_date");
        let last_seen = Self::epoch_to_datetime(indicator, "last_updated");

        let mut evidence_parts = Vec::new();
        if let Some(mc) = indicator.get("malicious_confidence").and_then(|v| v.as_str()) {
            evidence_parts.push(format!("Malicious confidence: {mc}"));
        }
        if let Some(conf) = indicator.get("confidence").and_then(|v| v.as_i64()) {
            evidence_parts.push(format!("Confidence: {conf}"));
        }
        if let Some(labels) = indicator.get("labels").and_then(|v| v.as_array()) {
            if !labels.is_empty() {
                let joined = labels.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>().join(", ");
                evidence_parts.push(format!("Labels: {joined}"));
            }
        }
        let evidence = if evidence_parts.is_empty() {
            "CrowdStrike intelligence available".to_string()
        } else {
            evidence_parts.join("; ")
        };

        Ok(NormalizedResult {
            verdict,
            confidence: indicator.get("confidence").and_then(|v| v.as_i64()).map(|v| v as i32),
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
    use serde_json::json;

    #[test]
    fn high_confidence_text_maps_to_malicious() {
        let indicator = json!({"malicious_confidence": "very-high"});
        assert_eq!(CrowdStrikeAdapter::extract_verdict(&indicator), Verdict::Malicious);
    }

    #[test]
    fn falls_back_to_label_scan() {
        let indicator = json!({"labels": ["known-malware"]});
        assert_eq!(CrowdStrikeAdapter::extract_verdict(&indicator), Verdict::Malicious);
    }

    #[test]
    fn actor_and_family_tolerate_object_shapes() {
        let indicator = json!({"actor": {"name": "FIN7"}, "malware_family": {"name": "Carbanak"}});
        let (actor, family) = CrowdStrikeAdapter::extract_actor_family(&indicator);
        assert_eq!(actor.as_deref(), Some("FIN7"));
        assert_eq!(family.as_deref(), Some("Carbanak"));
    }

    #[test]
    fn epoch_field_parses_to_utc_datetime() {
        let indicator = json!({"published_date": 1_600_000_000});
        let parsed = CrowdStrikeAdapter::epoch_to_datetime(&indicator, "published_date");
        assert_eq!(parsed.unwrap().timestamp(), 1_600_000_000);
    }
}
