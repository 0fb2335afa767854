use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::errors::CoreError;
use super::models::{CandidateApplication, CompanyId, FailedResume, FingerprintEntry, ResumeRecord};

/// Persistence for parsed résumés, terminal failures and applications.
/// Every read is company-scoped by the caller.
#[async_trait]
pub trait ResumeStore: Send + Sync {
    async fn insert_resume(&self, record: ResumeRecord) -> anyhow::Result<()>;
    async fn get_resume(&self, id: Uuid) -> anyhow::Result<Option<ResumeRecord>>;
    async fn list_resumes(&self, company_id: CompanyId) -> anyhow::Result<Vec<ResumeRecord>>;
    /// Fingerprints of the company's unique résumés.
    async fn fingerprints(&self, company_id: CompanyId) -> anyhow::Result<Vec<FingerprintEntry>>;
    async fn set_uniqueness(&self, id: Uuid, is_unique: bool) -> anyhow::Result<ResumeRecord>;
    async fn delete_resume(&self, id: Uuid) -> anyhow::Result<Option<ResumeRecord>>;

    async fn insert_failure(&self, failure: FailedResume) -> anyhow::Result<()>;
    async fn list_failures(&self, company_id: CompanyId) -> anyhow::Result<Vec<FailedResume>>;
    async fn get_failures(
        &self,
        company_id: CompanyId,
        ids: &[Uuid],
    ) -> anyhow::Result<Vec<FailedResume>>;
    /// Returns the records that were removed.
    async fn delete_failures(
        &self,
        company_id: CompanyId,
        ids: &[Uuid],
    ) -> anyhow::Result<Vec<FailedResume>>;

    /// Fails with `CoreError::AlreadyApplied` when the (company, email, job)
    /// tuple already has an application.
    async fn insert_application(
        &self,
        application: CandidateApplication,
    ) -> anyhow::Result<CandidateApplication>;
    async fn list_applications(
        &self,
        company_id: CompanyId,
    ) -> anyhow::Result<Vec<CandidateApplication>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoreSnapshot {
    resumes: Vec<ResumeRecord>,
    failures: Vec<FailedResume>,
    applications: Vec<CandidateApplication>,
}

/// Single JSON document rewritten after each mutation. `in_memory` skips the file.
pub struct JsonResumeStore {
    file_path: Option<PathBuf>,
    state: Mutex<StoreSnapshot>,
}

impl JsonResumeStore {
    pub async fn open(root: PathBuf) -> anyhow::Result<Self> {
        let file_path = root.join("resumes.json");
        let state = if tokio::fs::try_exists(&file_path).await.unwrap_or(false) {
            let json = tokio::fs::read_to_string(&file_path)
                .await
                .with_context(|| format!("failed to read {}", file_path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("invalid JSON in {}", file_path.display()))?
        } else {
            StoreSnapshot::default()
        };

        Ok(Self {
            file_path: Some(file_path),
            state: Mutex::new(state),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            file_path: None,
            state: Mutex::new(StoreSnapshot::default()),
        }
    }

    async fn persist(&self, state: &StoreSnapshot) -> anyhow::Result<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(state)?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json)
            .await
            .with_context(|| format!("failed writing {}", staging.display()))?;
        tokio::fs::rename(&staging, path)
            .await
            .map_err(|err| CoreError::Storage(err.to_string()))?;
        Ok(())
    }
}

fn same_tuple(a: &CandidateApplication, b: &CandidateApplication) -> bool {
    a.company_id == b.company_id
        && a.job_id == b.job_id
        && a.candidate_email.eq_ignore_ascii_case(&b.candidate_email)
}

#[async_trait]
impl ResumeStore for JsonResumeStore {
    async fn insert_resume(&self, record: ResumeRecord) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.resumes.push(record);
        self.persist(&state).await
    }

    async fn get_resume(&self, id: Uuid) -> anyhow::Result<Option<ResumeRecord>> {
        let state = self.state.lock().await;
        Ok(state.resumes.iter().find(|r| r.id == id).cloned())
    }

    async fn list_resumes(&self, company_id: CompanyId) -> anyhow::Result<Vec<ResumeRecord>> {
        let state = self.state.lock().await;
        let mut resumes: Vec<ResumeRecord> = state
            .resumes
            .iter()
            .filter(|r| r.company_id == company_id)
            .cloned()
            .collect();
        resumes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(resumes)
    }

    async fn fingerprints(&self, company_id: CompanyId) -> anyhow::Result<Vec<FingerprintEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .resumes
            .iter()
            .filter(|r| r.company_id == company_id && r.is_unique)
            .map(|r| FingerprintEntry {
                resume_id: r.id,
                email: r.profile.normalized_email(),
                content_hash: r.content_hash.clone(),
                fingerprint: r.fingerprint.clone(),
            })
            .collect())
    }

    async fn set_uniqueness(&self, id: Uuid, is_unique: bool) -> anyhow::Result<ResumeRecord> {
        let mut state = self.state.lock().await;
        let record = state
            .resumes
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(CoreError::ResumeNotFound(id))?;
        record.is_unique = is_unique;
        record.updated_at = Utc::now();
        let updated = record.clone();
        self.persist(&state).await?;
        Ok(updated)
    }

    async fn delete_resume(&self, id: Uuid) -> anyhow::Result<Option<ResumeRecord>> {
        let mut state = self.state.lock().await;
        let Some(position) = state.resumes.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        let removed = state.resumes.remove(position);
        self.persist(&state).await?;
        Ok(Some(removed))
    }

    async fn insert_failure(&self, failure: FailedResume) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.failures.push(failure);
        self.persist(&state).await
    }

    async fn list_failures(&self, company_id: CompanyId) -> anyhow::Result<Vec<FailedResume>> {
        let state = self.state.lock().await;
        let mut failures: Vec<FailedResume> = state
            .failures
            .iter()
            .filter(|f| f.company_id == company_id)
            .cloned()
            .collect();
        failures.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(failures)
    }

    async fn get_failures(
        &self,
        company_id: CompanyId,
        ids: &[Uuid],
    ) -> anyhow::Result<Vec<FailedResume>> {
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        let state = self.state.lock().await;
        Ok(state
            .failures
            .iter()
            .filter(|f| f.company_id == company_id && wanted.contains(&f.id))
            .cloned()
            .collect())
    }

    async fn delete_failures(
        &self,
        company_id: CompanyId,
        ids: &[Uuid],
    ) -> anyhow::Result<Vec<FailedResume>> {
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        let mut state = self.state.lock().await;
        let (removed, kept): (Vec<FailedResume>, Vec<FailedResume>) = std::mem::take(&mut state.failures)
            .into_iter()
            .partition(|f| f.company_id == company_id && wanted.contains(&f.id));
        state.failures = kept;

        if !removed.is_empty() {
            self.persist(&state).await?;
        }
        Ok(removed)
    }

    async fn insert_application(
        &self,
        application: CandidateApplication,
    ) -> anyhow::Result<CandidateApplication> {
        let mut state = self.state.lock().await;
        if state
            .applications
            .iter()
            .any(|existing| same_tuple(existing, &application))
        {
            return Err(CoreError::AlreadyApplied {
                company_id: application.company_id,
                email: application.candidate_email,
                job_id: application.job_id,
            }
            .into());
        }

        state.applications.push(application.clone());
        self.persist(&state).await?;
        Ok(application)
    }

    async fn list_applications(
        &self,
        company_id: CompanyId,
    ) -> anyhow::Result<Vec<CandidateApplication>> {
        let state = self.state.lock().await;
        Ok(state
            .applications
            .iter()
            .filter(|a| a.company_id == company_id)
            .cloned()
            .collect())
    }
}
