use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::models::{CompanyId, JobId};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),
    #[error("Resume not found: {0}")]
    ResumeNotFound(Uuid),
    #[error("Failed resume not found: {0}")]
    FailedResumeNotFound(Uuid),
    #[error("{email} already has an application for {} in company {company_id}", describe_target(.job_id))]
    AlreadyApplied {
        company_id: CompanyId,
        email: String,
        job_id: Option<JobId>,
    },
    #[error("Resume {0} has no candidate email; cannot create an application")]
    MissingCandidateEmail(Uuid),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Storage unavailable: {0}")]
    Storage(String),
}

fn describe_target(job_id: &Option<JobId>) -> String {
    match job_id {
        Some(id) => format!("job {id}"),
        None => "the general pool".to_string(),
    }
}

/// Terminal per-file failure taxonomy. Serialised by variant name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FailureReason {
    UnsupportedFormat,
    FileTooLarge,
    UnreadableContent,
    ContentTooLarge,
    RateLimited,
    UpstreamUnavailable,
    MalformedResponse,
    StorageUnavailable,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::UnsupportedFormat => "unsupported file format",
            FailureReason::FileTooLarge => "file too large",
            FailureReason::UnreadableContent => "unreadable content",
            FailureReason::ContentTooLarge => "content too large",
            FailureReason::RateLimited => "rate limited by structuring service",
            FailureReason::UpstreamUnavailable => "structuring service unavailable",
            FailureReason::MalformedResponse => "malformed structuring response",
            FailureReason::StorageUnavailable => "storage unavailable",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub reason: FailureReason,
    pub detail: String,
}

impl FileFailure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{}: {}", self.reason, self.detail)
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StructuringError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("content too large: {0}")]
    ContentTooLarge(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    /// The service refused the request itself (bad key, bad model, bad payload).
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl StructuringError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StructuringError::RateLimited(_) | StructuringError::UpstreamUnavailable(_)
        )
    }
}

impl From<StructuringError> for FileFailure {
    fn from(err: StructuringError) -> Self {
        match err {
            StructuringError::RateLimited(detail) => {
                FileFailure::new(FailureReason::RateLimited, detail)
            }
            StructuringError::ContentTooLarge(detail) => {
                FileFailure::new(FailureReason::ContentTooLarge, detail)
            }
            StructuringError::MalformedResponse(detail) => {
                FileFailure::new(FailureReason::MalformedResponse, detail)
            }
            StructuringError::UpstreamUnavailable(detail) | StructuringError::Rejected(detail) => {
                FileFailure::new(FailureReason::UpstreamUnavailable, detail)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),
    #[error("embedding response malformed: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_structuring_errors_are_retryable() {
        assert!(StructuringError::RateLimited("429".into()).is_retryable());
        assert!(StructuringError::UpstreamUnavailable("timeout".into()).is_retryable());
        assert!(!StructuringError::ContentTooLarge("ctx".into()).is_retryable());
        assert!(!StructuringError::MalformedResponse("json".into()).is_retryable());
        assert!(!StructuringError::Rejected("401".into()).is_retryable());
    }

    #[test]
    fn failure_reason_serializes_by_variant_name() {
        let json = serde_json::to_string(&FailureReason::UnreadableContent).unwrap();
        assert_eq!(json, "\"UnreadableContent\"");
        assert_eq!(
            FileFailure::new(FailureReason::ContentTooLarge, "after compaction").to_string(),
            "content too large: after compaction"
        );
    }

    #[test]
    fn already_applied_names_the_target() {
        let general = CoreError::AlreadyApplied {
            company_id: 7,
            email: "a@b.io".into(),
            job_id: None,
        };
        assert!(general.to_string().contains("general pool"));

        let job = CoreError::AlreadyApplied {
            company_id: 7,
            email: "a@b.io".into(),
            job_id: Some(42),
        };
        assert!(job.to_string().contains("job 42"));
    }
}
