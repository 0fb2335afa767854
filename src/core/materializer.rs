use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::errors::CoreError;
use super::models::{ApplicationStatus, CandidateApplication, CompanyId, JobId};
use super::resume_store::ResumeStore;

/// Promotes a parsed résumé into an application for one job, or the general
/// pool when `job_id` is `None`. The résumé itself is never modified.
pub struct CandidateMaterializer {
    store: Arc<dyn ResumeStore>,
}

impl CandidateMaterializer {
    pub fn new(store: Arc<dyn ResumeStore>) -> Self {
        Self { store }
    }

    pub async fn materialize(
        &self,
        company_id: CompanyId,
        resume_id: Uuid,
        job_id: Option<JobId>,
    ) -> anyhow::Result<CandidateApplication> {
        let resume = self
            .store
            .get_resume(resume_id)
            .await?
            .filter(|r| r.company_id == company_id)
            .ok_or(CoreError::ResumeNotFound(resume_id))?;

        let email = resume
            .profile
            .normalized_email()
            .ok_or(CoreError::MissingCandidateEmail(resume_id))?;

        let application = self
            .store
            .insert_application(CandidateApplication {
                id: Uuid::new_v4(),
                company_id,
                resume_id,
                job_id,
                candidate_email: email,
                candidate_name: resume.profile.name().map(str::to_string),
                status: ApplicationStatus::Applied,
                created_at: Utc::now(),
            })
            .await?;

        info!(
            company_id,
            resume_id = %resume_id,
            job_id = ?job_id,
            application_id = %application.id,
            "candidate application created"
        );
        Ok(application)
    }
}
