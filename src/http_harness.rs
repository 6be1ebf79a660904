//! Shared HTTP client used by every provider adapter: timeouts, retries
//! with exponential backoff, and a fixed identity header pair.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use governor::{Quota, RateLimiter};
use governor::state::{InMemoryState, NotKeyed};
use governor::clock::DefaultClock;
use rand::Rng;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const MAX_RETRIES: u32 = 4;
const USER_AGENT: &str = "Threat-Forge/1.0";

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A single outbound HTTP call description.
pub struct Request<'a> {
    pub method: Method,
    pub url: &'a str,
    pub headers: Vec<(&'a str, String)>,
    pub query: Vec<(&'a str, String)>,
    pub json_body: Option<Value>,
    pub raw_body: Option<String>,
}

impl<'a> Request<'a> {
    pub fn get(url: &'a str) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
            query: Vec::new(),
            json_body: None,
            raw_body: None,
        }
    }

    pub fn head(url: &'a str) -> Self {
        Self {
            method: Method::HEAD,
            url,
            headers: Vec::new(),
            query: Vec::new(),
            json_body: None,
            raw_body: None,
        }
    }

    pub fn post(url: &'a str) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: Vec::new(),
            query: Vec::new(),
            json_body: None,
            raw_body: None,
        }
    }

    pub fn header(mut self, name: &'a str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn query(mut self, name: &'a str, value: impl Into<String>) -> Self {
        self.query.push((name, value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json_body = Some(body);
        self
    }

    pub fn raw_body(mut self, body: String) -> Self {
        self.raw_body = Some(body);
        self
    }
}

/// Retrying HTTP client shared across provider adapters, with an
/// optional per-provider rate limiter layered in front of every call.
pub struct HttpHarness {
    client: Client,
    limiter: Option<Limiter>,
}

impl HttpHarness {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, limiter: None }
    }

    /// Build a harness that throttles to at most `per_second` requests/sec.
    pub fn with_rate_limit(per_second: u32) -> Self {
        let mut harness = Self::new();
        let quota = Quota::per_second(NonZeroU32::new(per_second.max(1)).unwrap());
        harness.limiter = Some(RateLimiter::direct(quota));
        harness
    }

    /// Execute `req`, retrying transport errors, timeouts, and upstream 5xx
    /// responses with exponential backoff (`2^attempt` seconds plus
    /// jitter). 4xx responses are returned to the caller immediately - only
    /// failures to get a usable response are retried.
    pub async fn execute(&self, req: Request<'_>) -> Result<Response> {
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..MAX_RETRIES {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let mut builder = self
                .client
                .request(req.method.clone(), req.url)
                .header("User-Agent", USER_AGENT)
                .header("Accept", "application/json");

            for (name, value) in &req.headers {
                builder = builder.header(*name, value);
            }
            if !req.query.is_empty() {
                builder = builder.query(&req.query);
            }
            if let Some(body) = &req.json_body {
                builder = builder.json(body);
            }
            if let Some(body) = &req.raw_body {
                builder = builder.body(body.clone());
            }

            let mut retry = false;
            match builder.send().await {
                Ok(response) if response.status().is_server_error() => {
                    tracing::warn!(
                        url = req.url,
                        attempt,
                        status = response.status().as_u16(),
                        "Upstream server error, will retry"
                    );
                    if attempt + 1 == MAX_RETRIES {
                        return Ok(response);
                    }
                    last_err = Some(anyhow::anyhow!("upstream status {}", response.status()));
                    retry = true;
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    tracing::warn!(
                        url = req.url,
                        attempt,
                        error = %e,
                        "HTTP request failed, will retry"
                    );
                    last_err = Some(anyhow::anyhow!(e));
                    retry = true;
                }
                Err(e) => return Err(e).context("HTTP request failed"),
            }

            if retry && attempt + 1 < MAX_RETRIES {
                let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
                let delay = Duration::from_secs_f64(2f64.powi(attempt as i32) + jitter);
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("request exhausted retries")))
            .context(format!("Request to {} failed after {} attempts", req.url, MAX_RETRIES))
    }

    pub async fn get_json(&self, url: &str, headers: Vec<(&str, String)>) -> Result<(StatusCode, Value)> {
        let mut req = Request::get(url);
        req.headers = headers;
        let response = self.execute(req).await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }
}

impl Default for HttpHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of per-provider base URL overrides, read from config.
pub type ProviderUrlOverrides = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn retries_5xx_responses_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let harness = HttpHarness::new();
        let response = harness.execute(Request::get(&server.uri())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn returns_last_5xx_response_after_exhausting_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let harness = HttpHarness::new();
        let response = harness.execute(Request::get(&server.uri())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
