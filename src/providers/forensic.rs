//! Forensic adapter: RDAP, GeoIP, and reverse DNS metadata. No API key,
//! evidence-only - it never returns anything but `Verdict::Unknown`.

use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use crate::http_harness::{HttpHarness, Request};
use crate::models::{IocType, NormalizedResult};
use crate::providers::ProviderAdapter;

pub struct ForensicAdapter {
    harness: HttpHarness,
}

impl ForensicAdapter {
    pub fn new() -> Self {
        Self {
            harness: HttpHarness::new(),
        }
    }

    fn registrar_from_entities(entities: &Value) -> Option<String> {
        let entities = entities.as_array()?;
        for entity in entities {
            let roles: Vec<&str> = entity
                .get("roles")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|r| r.as_str()).collect())
                .unwrap_or_default();
            if !roles.iter().any(|r| *r == "registrar" || *r == "registrant") {
                continue;
            }
            if let Some(vcard) = entity.get("vcardArray").and_then(|v| v.as_array()) {
                if let Some(fields) = vcard.get(1).and_then(|v| v.as_array()) {
                    for field in fields {
                        if let Some(arr) = field.as_array() {
                            if arr.first().and_then(|v| v.as_str()) == Some("fn") {
                                if let Some(name) = arr.get(3).and_then(|v| v.as_str()) {
                                    return Some(name.to_string());
                                }
                            }
                        }
                    }
                }
            }
        }
        None
    }

    fn registration_date(events: &Value) -> Option<DateTime<Utc>> {
        let events = events.as_array()?;
        for event in events {
            let action = event.get("eventAction").and_then(|v| v.as_str());
            if matches!(action, Some("registration") | Some("registered")) {
                if let Some(date) = event.get("eventDate").and_then(|v| v.as_str()) {
                    return DateTime::parse_from_rfc3339(date).ok().map(|d| d.with_timezone(&Utc));
                }
            }
        }
        None
    }

    async fn reverse_dns(&self, ip: &str) -> Option<String> {
        let addr = IpAddr::from_str(ip).ok()?;
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        let response = resolver.reverse_lookup(addr).await.ok()?;
        response.iter().next().map(|name| name.to_string())
    }
}

impl Default for ForensicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for ForensicAdapter {
    fn name(&self) -> &'static str {
        "forensic"
    }

    fn supports(&self, ioc_type: IocType) -> bool {
        matches!(ioc_type, IocType::Domain | IocType::Ipv4)
    }

    async fn enrich(&self, ioc_value: &str, ioc_type: IocType) -> anyhow::Result<NormalizedResult> {
        if !self.supports(ioc_type) {
            return Ok(NormalizedResult::unknown(format!("Unsupported type for forensic: {ioc_type}")));
        }

        let mut http_status: Option<i32> = None;
        let mut raw = json!({});
        let mut evidence_parts: Vec<String> = Vec::new();

        if ioc_type == IocType::Domain {
            let rdap_url = format!("https://rdap.org/domain/{ioc_value}");
            let response = self.harness.execute(Request::get(&rdap_url)).await?;
            http_status = Some(response.status().as_u16() as i32);
            if response.status().is_success() {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                let registrar = Self::registrar_from_entities(
                    body.get("entities").unwrap_or(&Value::Null),
                );
                let registered = Self::registration_date(body.get("events").unwrap_or(&Value::Null));
                let age_days = registered.map(|d| (Utc::now() - d).num_days().max(0));

                if let Some(r) = &registrar {
                    evidence_parts.push(format!("Registrar: {r}"));
                }
                if let Some(d) = registered {
                    evidence_parts.push(format!("Registered: {} ({}d)", d.date_naive(), age_days.unwrap_or(0)));
                }
                raw["rdap_domain"] = body;
                raw["registrar"] = json!(registrar);
                raw["registrar_age_days"] = json!(age_days);
            }
        }

        if ioc_type == IocType::Ipv4 {
            let rdap_url = format!("https://rdap.org/ip/{ioc_value}");
            let ip_response = self.harness.execute(Request::get(&rdap_url)).await?;
            http_status = http_status.or(Some(ip_response.status().as_u16() as i32));
            if ip_response.status().is_success() {
                let ip_json: Value = ip_response.json().await.unwrap_or(Value::Null);
                let asn = ip_json.get("asn").cloned();
                let org = ip_json
                    .get("name")
                    .or_else(|| ip_json.get("org"))
                    .cloned();
                if let Some(a) = asn.as_ref().and_then(|v| v.as_str()) {
                    evidence_parts.push(format!("ASN: {a}"));
                }
                if let Some(o) = org.as_ref().and_then(|v| v.as_str()) {
                    evidence_parts.push(format!("Org: {o}"));
                }
                raw["rdap_ip"] = ip_json;
                raw["asn"] = asn.unwrap_or(Value::Null);
                raw["org"] = org.unwrap_or(Value::Null);
            }

            let geo_url = format!("https://ipapi.co/{ioc_value}/json/");
            let geo_response = self.harness.execute(Request::get(&geo_url)).await?;
            http_status = http_status.or(Some(geo_response.status().as_u16() as i32));
            if geo_response.status().is_success() {
                let geo: Value = geo_response.json().await.unwrap_or(Value::Null);
                let country = geo
                    .get("country_name")
                    .or_else(|| geo.get("country"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let city = geo.get("city").and_then(|v| v.as_str()).map(str::to_string);
                if let Some(c) = &country {
                    let suffix = city.as_ref().map(|c| format!(", {c}")).unwrap_or_default();
                    evidence_parts.push(format!("Geo: {c}{suffix}"));
                }
                raw["geoip"] = geo;
                raw["country"] = json!(country);
                raw["city"] = json!(city);
            }

            let rdns = self.reverse_dns(ioc_value).await;
            if let Some(r) = &rdns {
                evidence_parts.push(format!("rDNS: {r}"));
            }
            raw["rdns"] = json!(rdns);
        }

        let evidence = if evidence_parts.is_empty() {
            "Forensic metadata available".to_string()
        } else {
            evidence_parts.join("; ")
        };

        Ok(NormalizedResult {
            verdict: crate::models::Verdict::Unknown,
            confidence: None,
            actor: None,
            family: None,
            evidence,
            http_status: Some(http_status.unwrap_or(200)),
            raw_json: Some(raw),
            first_seen: None,
            last_seen: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_registrar_name_from_vcard() {
        let entities = json!([
            {
                "roles": ["registrar"],
                "vcardArray": ["vcard", [["fn", {}, "text", "Example Registrar Inc"]]]
            }
        ]);
        assert_eq!(
            ForensicAdapter::registrar_from_entities(&entities).as_deref(),
            Some("Example Registrar Inc")
        );
    }

    #[test]
    fn extracts_registration_date_from_events() {
        let events = json!([{"eventAction": "registration", "eventDate": "2020-01-01T00:00:00Z"}]);
        let date = ForensicAdapter::registration_date(&events).unwrap();
        assert_eq!(date.date_naive().to_string(), "2020-01-01");
    }
}
