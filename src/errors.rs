//! Typed error enums for failures the Orchestrator and Job Processor raise
//! internally. Everything still surfaces through `anyhow::Result` at the
//! call boundaries (`?` converts both variants via `std::error::Error`),
//! matching the `.context(...)` convention used elsewhere in the crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("provider request failed: {0}")]
    Transport(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job {0} not found")]
    JobNotFound(i64),
    #[error("Upload not found")]
    UploadNotFound,
}
