//! Core data models for the enrichment pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

pub mod ioc_utils;

/// Types of Indicators of Compromise the pipeline can enrich
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "ioc_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IocType {
    Url,
    Domain,
    Ipv4,
    Sha256,
    Md5,
    Email,
    SubjectKeyword,
}

impl std::fmt::Display for IocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IocType::Url => "url",
            IocType::Domain => "domain",
            IocType::Ipv4 => "ipv4",
            IocType::Sha256 => "sha256",
            IocType::Md5 => "md5",
            IocType::Email => "email",
            IocType::SubjectKeyword => "subject_keyword",
        };
        write!(f, "{s}")
    }
}

/// Classification verdict carried on the IOC row itself.
///
/// Upgrades from `Unknown` toward a specific verdict but never downgrades
/// back to `Unknown` (see `models::ioc_utils::upgrade_classification`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "classification", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Malicious,
    Suspicious,
    Benign,
    Unknown,
}

/// The canonical four-valued verdict enum produced by every provider adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, sqlx::Type)]
#[sqlx(type_name = "verdict", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    Unknown,
    Benign,
    Suspicious,
    Malicious,
}

/// Categorical risk bucket derived solely from `risk_score` (§4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "risk_band", rename_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum RiskBand {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskBand {
    /// Risk band by risk score: 0-24 Low, 25-49 Medium, 50-74 High, 75-100 Critical.
    pub fn from_score(risk_score: i32) -> Self {
        match risk_score {
            0..=24 => RiskBand::Low,
            25..=49 => RiskBand::Medium,
            50..=74 => RiskBand::High,
            _ => RiskBand::Critical,
        }
    }
}

/// Job lifecycle state (§4.6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

/// Identity + attributes of a single Indicator of Compromise.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ioc {
    pub id: i64,
    pub value: String,
    pub ioc_type: IocType,
    pub source_platform: String,
    pub classification: Classification,
    pub campaign_id: Option<String>,
    pub email_id: Option<String>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub user_reported: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single provider's normalized enrichment result, persisted at rest.
///
/// Invariant: at most one row exists per (ioc_id, provider) - re-enrichment
/// replaces the prior row for that pair (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EnrichmentResult {
    pub id: i64,
    pub ioc_id: i64,
    pub provider: String,
    pub verdict: Verdict,
    pub confidence: Option<i32>,
    pub actor: Option<String>,
    pub family: Option<String>,
    pub evidence: String,
    pub raw_json: Option<serde_json::Value>,
    pub http_status: Option<i32>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub queried_at: DateTime<Utc>,
}

/// Append-only composite score row for an IOC.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IocScore {
    pub id: i64,
    pub ioc_id: i64,
    pub risk_score: i32,
    pub attribution_score: i32,
    pub risk_band: RiskBand,
    pub computed_at: DateTime<Utc>,
}

/// Minimal stand-in for the external ingestion system's Upload record -
/// just enough for the Job Processor's upload-boundary rule (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Upload {
    pub id: i64,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

/// A unit of work that enriches every IOC belonging to one Upload.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: i64,
    pub upload_id: i64,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub total_iocs: i32,
    pub processed_iocs: i32,
    pub successful_iocs: i32,
    pub failed_iocs: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields that may be partially updated on a Job row (§4.7 `update_job`).
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub total_iocs: Option<i32>,
    pub processed_iocs: Option<i32>,
    pub successful_iocs: Option<i32>,
    pub failed_iocs: Option<i32>,
}

/// Output of a single Provider Adapter call (§4.1).
///
/// `verdict` is required; everything else is best-effort and may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NormalizedResult {
    pub verdict: Verdict,
    pub confidence: Option<i32>,
    pub actor: Option<String>,
    pub family: Option<String>,
    pub evidence: String,
    pub http_status: Option<i32>,
    pub raw_json: Option<serde_json::Value>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl NormalizedResult {
    pub fn unknown(evidence: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Unknown,
            evidence: evidence.into(),
            ..Default::default()
        }
    }

    pub fn unknown_with_status(evidence: impl Into<String>, http_status: i32) -> Self {
        Self {
            verdict: Verdict::Unknown,
            evidence: evidence.into(),
            http_status: Some(http_status),
            ..Default::default()
        }
    }
}

/// Per-IOC scoring output (§4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Score {
    pub risk_score: i32,
    pub attribution_score: i32,
    pub risk_band: RiskBand,
}

/// Map of provider name -> normalized result, the unit the Scorer consumes.
pub type EnrichmentMap = HashMap<String, NormalizedResult>;
