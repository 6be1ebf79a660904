//! Lightweight OSINT adapter: no API key, just a HEAD/GET probe of the
//! indicator's own URL plus a favicon fingerprint and a robots.txt check.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::http_harness::{HttpHarness, Request};
use crate::models::{IocType, NormalizedResult};
use crate::providers::ProviderAdapter;

pub struct OsintAdapter {
    harness: HttpHarness,
}

impl OsintAdapter {
    pub fn new() -> Self {
        Self {
            harness: HttpHarness::new(),
        }
    }

    fn favicon_hash(base_url: &str) -> Option<String> {
        let favicon_url = format!("{base_url}/favicon.ico");
        let mut hasher = Sha256::new();
        hasher.update(favicon_url.as_bytes());
        Some(hex::encode(hasher.finalize())[..16].to_string())
    }

    fn extract_title(body: &str) -> Option<String> {
        let re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
        re.captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    }
}

impl Default for OsintAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for OsintAdapter {
    fn name(&self) -> &'static str {
        "osint"
    }

    fn supports(&self, ioc_type: IocType) -> bool {
        matches!(ioc_type, IocType::Url | IocType::Domain)
    }

    async fn enrich(&self, ioc_value: &str, ioc_type: IocType) -> anyhow::Result<NormalizedResult> {
        if !self.supports(ioc_type) {
            return Ok(NormalizedResult::unknown(format!("Unsupported IOC type: {ioc_type}")));
        }

        let url = match ioc_type {
            IocType::Domain => format!("https://{ioc_value}"),
            _ => ioc_value.to_string(),
        };
        let parsed = url::Url::parse(&url).ok();
        let base_url = parsed
            .as_ref()
            .map(|u| format!("{}://{}", u.scheme(), u.host_str().unwrap_or_default()))
            .unwrap_or_else(|| url.clone());

        let head = self.harness.execute(Request::head(&url)).await.ok();
        let http_status = head.as_ref().map(|r| r.status().as_u16() as i32);

        let mut title = None;
        if http_status == Some(200) {
            if let Ok(get_response) = self.harness.execute(Request::get(&url)).await {
                if get_response.status().is_success() {
                    if let Ok(body) = get_response.text().await {
                        title = Self::extract_title(&body);
                    }
                }
            }
        }

        let favicon_hash = Self::favicon_hash(&base_url);
        let robots_url = format!("{base_url}/robots.txt");
        let robots_exists = self
            .harness
            .execute(Request::head(&robots_url))
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);

        let mut evidence_parts = Vec::new();
        if let Some(status) = http_status {
            evidence_parts.push(format!("HTTP Status: {status}"));
        }
        if let Some(t) = &title {
            evidence_parts.push(format!("Title: {t}"));
        }
        if let Some(h) = &favicon_hash {
            evidence_parts.push(format!("Favicon Hash: {h}"));
        }
        if robots_exists {
            evidence_parts.push("Robots.txt: Present".to_string());
        }
        let evidence = if evidence_parts.is_empty() {
            "No OSINT data available".to_string()
        } else {
            evidence_parts.join("; ")
        };

        let (verdict, confidence) = match http_status {
            Some(status) if status >= 400 => (crate::models::Verdict::Suspicious, 30),
            Some(200) => (crate::models::Verdict::Benign, 20),
            _ => (crate::models::Verdict::Unknown, 10),
        };

        let raw = json!({
            "url": url,
            "http_status": http_status,
            "title": title,
            "favicon_hash": favicon_hash,
            "robots_txt_exists": robots_exists,
        });

        Ok(NormalizedResult {
            verdict,
            confidence: Some(confidence),
            evidence,
            http_status,
            raw_json: Some(raw),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_case_insensitively() {
        let body = "<html><HEAD><Title> Example Page </Title></HEAD></html>";
        assert_eq!(OsintAdapter::extract_title(body).as_deref(), Some("Example Page"));
    }

    #[test]
    fn missing_title_returns_none() {
        assert_eq!(OsintAdapter::extract_title("<html></html>"), None);
    }
}
