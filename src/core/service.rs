use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::archive::expand_uploads;
use super::classifier::classify;
use super::converters::ExtractionChain;
use super::dedup::{DedupVerdict, DuplicateDetector, Fingerprint};
use super::embedding::{Embedder, OpenAiEmbedder};
use super::errors::{CoreError, FailureReason, FileFailure};
use super::experience::apply_total_experience;
use super::field_extractor::backfill_profile;
use super::file_storage::LocalFileStorage;
use super::job_store::{BatchSlot, BatchTracker, JsonJobStore, TaskOutcome};
use super::materializer::CandidateMaterializer;
use super::models::{
    BatchProcessingState, BatchStatus, CandidateApplication, CompanyId, DocumentFormat,
    ExtractionProvenance, FailedResume, FileStage, IngestSettings, JobId, ResumeRecord,
    UploadBatch, UploadedFile,
};
use super::resume_store::{JsonResumeStore, ResumeStore};
use super::settings_store::app_data_root;
use super::size_manager::{structure_with_compaction, InputBudget};
use super::structuring::{LlmProfileExtractor, RetryPolicy, StructuredExtractor};

/// Collaborators the service drives. Tests swap in stubs; production wiring
/// comes from `from_settings`.
pub struct IngestDependencies {
    pub store: Arc<dyn ResumeStore>,
    pub extractor: Arc<dyn StructuredExtractor>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub chain: ExtractionChain,
    pub file_storage: LocalFileStorage,
    pub job_store: JsonJobStore,
}

impl IngestDependencies {
    pub async fn from_settings(settings: &IngestSettings) -> anyhow::Result<Self> {
        let root = settings.data_dir.clone().unwrap_or_else(app_data_root);

        let client = reqwest::Client::builder()
            .user_agent("ResumeIngest/1.0")
            .build()
            .context("failed to build HTTP client")?;

        let extractor = LlmProfileExtractor::from_settings(settings, client.clone())?;
        let embedder = OpenAiEmbedder::from_settings(settings, client)?
            .map(|e| Arc::new(e) as Arc<dyn Embedder>);
        if embedder.is_none() {
            warn!("no embedding service configured; duplicates will not be detected");
        }

        Ok(Self {
            store: Arc::new(JsonResumeStore::open(root.join("store")).await?),
            extractor: Arc::new(extractor),
            embedder,
            chain: ExtractionChain::from_settings(settings),
            file_storage: LocalFileStorage::new(root.join("files")),
            job_store: JsonJobStore::new_with_root(root.join("batches"), settings.job_retention_hours),
        })
    }
}

struct BatchWorkItem {
    batch: UploadBatch,
    files: Vec<UploadedFile>,
    slot: Arc<BatchSlot>,
}

/// First infrastructure error seen in a batch. Once set, files that have not
/// started yet fail fast.
#[derive(Default)]
struct BatchHalt(std::sync::Mutex<Option<String>>);

impl BatchHalt {
    fn trip(&self, reason: String) {
        let mut halted = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if halted.is_none() {
            *halted = Some(reason);
        }
    }

    fn reason(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

enum PipelineError {
    File(FileFailure),
    Infrastructure(anyhow::Error),
}

impl From<FileFailure> for PipelineError {
    fn from(failure: FileFailure) -> Self {
        PipelineError::File(failure)
    }
}

pub struct IngestService {
    settings: IngestSettings,
    store: Arc<dyn ResumeStore>,
    extractor: Arc<dyn StructuredExtractor>,
    chain: ExtractionChain,
    detector: DuplicateDetector,
    materializer: CandidateMaterializer,
    file_storage: LocalFileStorage,
    job_store: JsonJobStore,
    tracker: BatchTracker,
    retry: RetryPolicy,
    budget: InputBudget,
    company_locks: Mutex<HashMap<CompanyId, Arc<Mutex<()>>>>,
    queue_tx: mpsc::UnboundedSender<BatchWorkItem>,
}

impl IngestService {
    /// Must be called inside a tokio runtime; the batch worker is spawned here.
    pub fn new(settings: IngestSettings, deps: IngestDependencies) -> Arc<Self> {
        let settings = settings.sanitized();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let service = Arc::new(Self {
            detector: DuplicateDetector::new(deps.embedder, settings.duplicate_similarity_threshold),
            materializer: CandidateMaterializer::new(Arc::clone(&deps.store)),
            retry: RetryPolicy::from_settings(&settings),
            budget: InputBudget::from_settings(&settings),
            store: deps.store,
            extractor: deps.extractor,
            chain: deps.chain,
            file_storage: deps.file_storage,
            job_store: deps.job_store,
            tracker: BatchTracker::new(),
            company_locks: Mutex::new(HashMap::new()),
            queue_tx,
            settings,
        });

        let worker_service = Arc::clone(&service);
        tokio::spawn(async move {
            worker_service.process_queue(queue_rx).await;
        });

        service
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// Accepts loose files and zip containers; returns as soon as the batch is queued.
    pub async fn submit_batch(
        &self,
        company_id: CompanyId,
        uploads: Vec<UploadedFile>,
    ) -> anyhow::Result<Uuid> {
        if uploads.is_empty() {
            return Err(CoreError::InvalidRequest("no files uploaded".to_string()).into());
        }

        let limit = self.settings.max_file_size_bytes;
        let files = tokio::task::spawn_blocking(move || expand_uploads(uploads, limit))
            .await
            .context("archive expansion task failed")?;
        if files.is_empty() {
            return Err(
                CoreError::InvalidRequest("uploaded archives contain no files".to_string()).into(),
            );
        }

        self.expire_old_batches().await;

        let batch = UploadBatch {
            batch_id: Uuid::new_v4(),
            company_id,
            files: files.iter().map(|f| f.file_name.clone()).collect(),
            created_at: Utc::now(),
        };
        let slot = self.tracker.register(&batch);
        let batch_id = batch.batch_id;

        info!(batch_id = %batch_id, company_id, files = files.len(), "batch queued");
        self.queue_tx
            .send(BatchWorkItem { batch, files, slot })
            .map_err(|_| anyhow::anyhow!("failed to queue batch"))?;

        Ok(batch_id)
    }

    pub async fn get_batch_status(
        &self,
        company_id: CompanyId,
        batch_id: Uuid,
    ) -> anyhow::Result<BatchStatus> {
        if let Some(slot) = self.tracker.get(&batch_id) {
            if slot.company_id() == company_id {
                return Ok(slot.snapshot());
            }
            return Err(CoreError::BatchNotFound(batch_id).into());
        }

        self.job_store
            .load_summary(&batch_id)
            .await?
            .filter(|summary| summary.company_id == company_id)
            .ok_or_else(|| CoreError::BatchNotFound(batch_id).into())
    }

    /// Live and persisted batches, newest first.
    pub async fn list_batches(&self, company_id: CompanyId) -> anyhow::Result<Vec<BatchStatus>> {
        let mut batches: Vec<BatchStatus> = self
            .tracker
            .for_company(company_id)
            .iter()
            .map(|slot| slot.snapshot())
            .collect();
        let live: HashSet<Uuid> = batches.iter().map(|b| b.batch_id).collect();

        for summary in self.job_store.list_summaries(company_id).await? {
            if !live.contains(&summary.batch_id) {
                batches.push(summary);
            }
        }

        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(batches)
    }

    pub async fn list_parsed_resumes(
        &self,
        company_id: CompanyId,
    ) -> anyhow::Result<Vec<ResumeRecord>> {
        self.store.list_resumes(company_id).await
    }

    pub async fn list_failed_resumes(
        &self,
        company_id: CompanyId,
    ) -> anyhow::Result<Vec<FailedResume>> {
        self.store.list_failures(company_id).await
    }

    pub async fn materialize_candidate(
        &self,
        company_id: CompanyId,
        resume_id: Uuid,
        job_id: Option<JobId>,
    ) -> anyhow::Result<CandidateApplication> {
        self.materializer
            .materialize(company_id, resume_id, job_id)
            .await
    }

    pub async fn delete_failed_resume(
        &self,
        company_id: CompanyId,
        failed_id: Uuid,
    ) -> anyhow::Result<()> {
        if self.delete_failed_resumes(company_id, &[failed_id]).await? == 0 {
            return Err(CoreError::FailedResumeNotFound(failed_id).into());
        }
        Ok(())
    }

    /// Unknown ids are ignored. Returns how many records were removed.
    pub async fn delete_failed_resumes(
        &self,
        company_id: CompanyId,
        failed_ids: &[Uuid],
    ) -> anyhow::Result<usize> {
        let removed = self.store.delete_failures(company_id, failed_ids).await?;
        for failure in &removed {
            if let Some(path) = &failure.storage_path {
                if let Err(err) = self.file_storage.remove(path).await {
                    warn!(failed_id = %failure.id, error = %err, "stored upload not removed");
                }
            }
        }

        info!(company_id, removed = removed.len(), "failed resumes deleted");
        Ok(removed.len())
    }

    /// Re-reads the stored uploads of the given failures and runs them again as
    /// a new batch. The old failure records are removed.
    pub async fn retry_failed_resumes(
        &self,
        company_id: CompanyId,
        failed_ids: &[Uuid],
    ) -> anyhow::Result<Uuid> {
        let failures = self.store.get_failures(company_id, failed_ids).await?;
        if failures.is_empty() {
            let missing = failed_ids.first().copied().unwrap_or_default();
            return Err(CoreError::FailedResumeNotFound(missing).into());
        }

        let mut uploads = Vec::new();
        let mut retried = Vec::new();
        for failure in &failures {
            let Some(path) = &failure.storage_path else {
                warn!(failed_id = %failure.id, "no stored upload, cannot retry");
                continue;
            };
            let bytes = self.file_storage.read(path).await?;
            uploads.push(UploadedFile::new(failure.file_name.clone(), bytes));
            retried.push(failure.id);
        }

        if uploads.is_empty() {
            return Err(CoreError::InvalidRequest(
                "none of the selected failures kept their upload".to_string(),
            )
            .into());
        }

        self.delete_failed_resumes(company_id, &retried).await?;
        self.submit_batch(company_id, uploads).await
    }

    pub async fn revise_uniqueness(
        &self,
        company_id: CompanyId,
        resume_id: Uuid,
        is_unique: bool,
    ) -> anyhow::Result<ResumeRecord> {
        self.owned_resume(company_id, resume_id).await?;
        let updated = self.store.set_uniqueness(resume_id, is_unique).await?;
        info!(company_id, resume_id = %resume_id, is_unique, "resume uniqueness revised");
        Ok(updated)
    }

    pub async fn delete_resume(
        &self,
        company_id: CompanyId,
        resume_id: Uuid,
    ) -> anyhow::Result<ResumeRecord> {
        self.owned_resume(company_id, resume_id).await?;
        let removed = self
            .store
            .delete_resume(resume_id)
            .await?
            .ok_or(CoreError::ResumeNotFound(resume_id))?;

        if let Err(err) = self.file_storage.remove(&removed.storage_path).await {
            warn!(resume_id = %resume_id, error = %err, "stored upload not removed");
        }
        info!(company_id, resume_id = %resume_id, "resume deleted");
        Ok(removed)
    }

    async fn owned_resume(
        &self,
        company_id: CompanyId,
        resume_id: Uuid,
    ) -> anyhow::Result<ResumeRecord> {
        self.store
            .get_resume(resume_id)
            .await?
            .filter(|r| r.company_id == company_id)
            .ok_or_else(|| CoreError::ResumeNotFound(resume_id).into())
    }

    async fn expire_old_batches(&self) {
        let cutoff = Utc::now() - self.job_store.retention();
        let evicted = self.tracker.evict_finished_before(cutoff);
        match self.job_store.cleanup_expired().await {
            Ok(removed) if removed + evicted > 0 => {
                info!(evicted, removed, "expired batch summaries cleaned up");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "batch summary cleanup failed"),
        }
    }

    async fn process_queue(self: Arc<Self>, mut queue_rx: mpsc::UnboundedReceiver<BatchWorkItem>) {
        while let Some(work_item) = queue_rx.recv().await {
            self.process_batch(work_item).await;
        }
    }

    async fn process_batch(&self, work_item: BatchWorkItem) {
        let BatchWorkItem { batch, files, slot } = work_item;
        slot.mark_processing();
        info!(batch_id = %batch.batch_id, files = files.len(), "batch processing started");

        let halt = BatchHalt::default();
        stream::iter(files.into_iter().enumerate())
            .map(|(index, file)| self.process_file(&batch, &slot, &halt, index, file))
            .buffer_unordered(self.settings.max_concurrent_files)
            .collect::<Vec<()>>()
            .await;

        let halted = halt.reason();
        let state = if halted.is_some() {
            BatchProcessingState::Failed
        } else {
            BatchProcessingState::Completed
        };
        slot.finish(state, halted);

        let summary = slot.snapshot();
        if let Err(err) = self.job_store.save_summary(&summary).await {
            error!(batch_id = %batch.batch_id, error = %err, "failed to persist batch summary");
        }

        info!(
            batch_id = %batch.batch_id,
            status = ?summary.status,
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            duplicate = summary.duplicate,
            duration_seconds = summary.duration_seconds,
            "batch finished"
        );
    }

    async fn process_file(
        &self,
        batch: &UploadBatch,
        slot: &Arc<BatchSlot>,
        halt: &BatchHalt,
        index: usize,
        file: UploadedFile,
    ) {
        if let Some(reason) = halt.reason() {
            slot.record_outcome(
                index,
                TaskOutcome::Failed(FileFailure::new(
                    FailureReason::StorageUnavailable,
                    format!("batch halted: {reason}"),
                )),
            );
            return;
        }

        let started = Instant::now();
        let content_hash = content_hash(&file.bytes);

        let limit = self.settings.max_file_size_bytes;
        if file.exceeds_size_limit || file.bytes.len() as u64 > limit {
            let detail = if file.exceeds_size_limit {
                format!("archive entry exceeds the {limit} byte limit")
            } else {
                format!("{} bytes exceeds the {limit} byte limit", file.bytes.len())
            };
            let failure = FileFailure::new(FailureReason::FileTooLarge, detail);
            self.record_failure(batch, slot, halt, index, &file, None, &content_hash, failure)
                .await;
            return;
        }

        let storage_path = match self
            .file_storage
            .save(batch.company_id, &file.file_name, &file.bytes)
            .await
        {
            Ok(path) => path,
            Err(err) => {
                self.halt_on(slot, halt, index, &file.file_name, err);
                return;
            }
        };

        let result = self
            .run_pipeline(batch, slot, index, &file, &storage_path, &content_hash, started)
            .await;

        match result {
            Ok(outcome) => {
                slot.record_outcome(index, outcome);
            }
            Err(PipelineError::File(failure)) => {
                self.record_failure(
                    batch,
                    slot,
                    halt,
                    index,
                    &file,
                    Some(storage_path),
                    &content_hash,
                    failure,
                )
                .await;
            }
            Err(PipelineError::Infrastructure(err)) => {
                self.halt_on(slot, halt, index, &file.file_name, err);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        &self,
        batch: &UploadBatch,
        slot: &Arc<BatchSlot>,
        index: usize,
        file: &UploadedFile,
        storage_path: &str,
        content_hash: &str,
        started: Instant,
    ) -> Result<TaskOutcome, PipelineError> {
        slot.set_stage(index, FileStage::Extracting);
        let format = classify(file);
        slot.set_format(index, format);
        if format == DocumentFormat::Unknown {
            return Err(FileFailure::new(
                FailureReason::UnsupportedFormat,
                "could not determine the document type",
            )
            .into());
        }

        let extracted = self
            .chain
            .extract(format, &file.bytes, || slot.set_stage(index, FileStage::Ocr))
            .await
            .map_err(FileFailure::from)?;
        if extracted.ocr_used {
            info!(batch_id = %batch.batch_id, file = %file.file_name, "text recovered by OCR");
        }

        slot.set_stage(index, FileStage::Structuring);
        let mut profile = structure_with_compaction(
            self.extractor.as_ref(),
            &self.retry,
            &self.budget,
            &extracted.text,
        )
        .await?;
        backfill_profile(&mut profile, &extracted.text);
        apply_total_experience(&mut profile);

        slot.set_stage(index, FileStage::DedupChecking);
        let fingerprint = self.detector.fingerprint(&profile).await;
        let email = profile.normalized_email();

        // Check and insert under one per-company lock so two copies of the
        // same résumé in flight cannot both pass as unique.
        let company_lock = self.company_lock(batch.company_id).await;
        let _guard = company_lock.lock().await;

        let (vector, dedup_unchecked) = match fingerprint {
            Fingerprint::Computed(vector) => (Some(vector), false),
            Fingerprint::Unchecked(reason) => {
                warn!(file = %file.file_name, reason = %reason, "similarity check skipped");
                (None, true)
            }
        };

        let existing = self
            .store
            .fingerprints(batch.company_id)
            .await
            .map_err(PipelineError::Infrastructure)?;
        let review_match = match self.detector.classify(
            content_hash,
            vector.as_deref(),
            email.as_deref(),
            &existing,
        ) {
            DedupVerdict::Duplicate { of, similarity } => {
                info!(
                    batch_id = %batch.batch_id,
                    file = %file.file_name,
                    duplicate_of = %of,
                    similarity,
                    "duplicate resume skipped"
                );
                if let Err(err) = self.file_storage.remove(storage_path).await {
                    warn!(file = %file.file_name, error = %err, "stored upload not removed");
                }
                return Ok(TaskOutcome::Duplicate { of });
            }
            DedupVerdict::Unique { review_match } => review_match,
        };

        let now = Utc::now();
        let record = ResumeRecord {
            id: Uuid::new_v4(),
            company_id: batch.company_id,
            source_batch_id: batch.batch_id,
            batch_total_files: slot.total(),
            original_filename: file.file_name.clone(),
            storage_path: storage_path.to_string(),
            file_type: format,
            file_size: file.bytes.len() as u64,
            content_hash: content_hash.to_string(),
            processing_duration_ms: started.elapsed().as_millis() as u64,
            extraction: ExtractionProvenance {
                converter: extracted.converter,
                ocr_used: extracted.ocr_used,
                extracted_chars: extracted.char_count,
            },
            profile,
            fingerprint: vector,
            is_unique: true,
            dedup_unchecked,
            review_match,
            created_at: now,
            updated_at: now,
        };
        let resume_id = record.id;

        self.store
            .insert_resume(record)
            .await
            .map_err(PipelineError::Infrastructure)?;

        info!(
            batch_id = %batch.batch_id,
            file = %file.file_name,
            resume_id = %resume_id,
            "resume stored"
        );
        Ok(TaskOutcome::Success {
            resume_id,
            dedup_unchecked,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_failure(
        &self,
        batch: &UploadBatch,
        slot: &Arc<BatchSlot>,
        halt: &BatchHalt,
        index: usize,
        file: &UploadedFile,
        storage_path: Option<String>,
        content_hash: &str,
        failure: FileFailure,
    ) {
        warn!(
            batch_id = %batch.batch_id,
            file = %file.file_name,
            reason = ?failure.reason,
            detail = %failure.detail,
            "file failed"
        );

        let failed = FailedResume {
            id: Uuid::new_v4(),
            company_id: batch.company_id,
            batch_id: batch.batch_id,
            file_name: file.file_name.clone(),
            storage_path,
            content_hash: content_hash.to_string(),
            reason: failure.reason,
            detail: failure.detail.clone(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.store.insert_failure(failed).await {
            error!(batch_id = %batch.batch_id, error = %err, "failed to record failure");
            halt.trip(err.to_string());
        }

        slot.record_outcome(index, TaskOutcome::Failed(failure));
    }

    fn halt_on(
        &self,
        slot: &BatchSlot,
        halt: &BatchHalt,
        index: usize,
        file_name: &str,
        err: anyhow::Error,
    ) {
        error!(
            batch_id = %slot.batch_id(),
            file = %file_name,
            error = %err,
            "storage failure, halting batch"
        );
        halt.trip(err.to_string());
        slot.record_outcome(
            index,
            TaskOutcome::Failed(FileFailure::new(
                FailureReason::StorageUnavailable,
                err.to_string(),
            )),
        );
    }

    async fn company_lock(&self, company_id: CompanyId) -> Arc<Mutex<()>> {
        let mut locks = self.company_locks.lock().await;
        Arc::clone(locks.entry(company_id).or_default())
    }
}

fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Map, Value};

    use super::*;
    use crate::core::converters::tests::{long_text, FixedConverter};
    use crate::core::converters::text::PlainTextConverter;
    use crate::core::errors::{EmbeddingError, StructuringError};
    use crate::core::models::ResumeProfile;

    const OLE_HEADER: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

    /// Reads `Key: value` lines, the way a well-behaved model would answer.
    struct LineExtractor;

    #[async_trait]
    impl StructuredExtractor for LineExtractor {
        async fn extract_profile(&self, text: &str) -> Result<ResumeProfile, StructuringError> {
            let mut map = Map::new();
            for line in text.lines() {
                if let Some((key, value)) = line.split_once(':') {
                    if matches!(key.trim(), "Name" | "Email") {
                        map.insert(key.trim().to_string(), Value::String(value.trim().to_string()));
                    }
                }
            }
            if map.is_empty() {
                return Err(StructuringError::MalformedResponse("no fields".to_string()));
            }
            Ok(ResumeProfile(map))
        }
    }

    /// Hashed bag of words; identical text gives identical vectors.
    struct BagOfWords;

    #[async_trait]
    impl Embedder for BagOfWords {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut vector = vec![0.0_f32; 64];
            for word in text.split_whitespace() {
                let mut hasher = DefaultHasher::new();
                word.to_lowercase().hash(&mut hasher);
                vector[(hasher.finish() % 64) as usize] += 1.0;
            }
            Ok(vector)
        }
    }

    /// Lets `healthy_writes` résumés through, then reports the store as down.
    struct FlakyStore {
        inner: JsonResumeStore,
        healthy_writes: AtomicUsize,
    }

    #[async_trait]
    impl ResumeStore for FlakyStore {
        async fn insert_resume(&self, record: ResumeRecord) -> anyhow::Result<()> {
            let remaining = self.healthy_writes.load(Ordering::SeqCst);
            if remaining == 0 {
                return Err(CoreError::Storage("connection reset".to_string()).into());
            }
            self.healthy_writes.store(remaining - 1, Ordering::SeqCst);
            self.inner.insert_resume(record).await
        }
        async fn get_resume(&self, id: Uuid) -> anyhow::Result<Option<ResumeRecord>> {
            self.inner.get_resume(id).await
        }
        async fn list_resumes(&self, company_id: CompanyId) -> anyhow::Result<Vec<ResumeRecord>> {
            self.inner.list_resumes(company_id).await
        }
        async fn fingerprints(
            &self,
            company_id: CompanyId,
        ) -> anyhow::Result<Vec<crate::core::models::FingerprintEntry>> {
            self.inner.fingerprints(company_id).await
        }
        async fn set_uniqueness(&self, id: Uuid, is_unique: bool) -> anyhow::Result<ResumeRecord> {
            self.inner.set_uniqueness(id, is_unique).await
        }
        async fn delete_resume(&self, id: Uuid) -> anyhow::Result<Option<ResumeRecord>> {
            self.inner.delete_resume(id).await
        }
        async fn insert_failure(&self, failure: FailedResume) -> anyhow::Result<()> {
            self.inner.insert_failure(failure).await
        }
        async fn list_failures(&self, company_id: CompanyId) -> anyhow::Result<Vec<FailedResume>> {
            self.inner.list_failures(company_id).await
        }
        async fn get_failures(
            &self,
            company_id: CompanyId,
            ids: &[Uuid],
        ) -> anyhow::Result<Vec<FailedResume>> {
            self.inner.get_failures(company_id, ids).await
        }
        async fn delete_failures(
            &self,
            company_id: CompanyId,
            ids: &[Uuid],
        ) -> anyhow::Result<Vec<FailedResume>> {
            self.inner.delete_failures(company_id, ids).await
        }
        async fn insert_application(
            &self,
            application: CandidateApplication,
        ) -> anyhow::Result<CandidateApplication> {
            self.inner.insert_application(application).await
        }
        async fn list_applications(
            &self,
            company_id: CompanyId,
        ) -> anyhow::Result<Vec<CandidateApplication>> {
            self.inner.list_applications(company_id).await
        }
    }

    fn test_settings(root: &Path) -> IngestSettings {
        IngestSettings {
            data_dir: Some(root.to_path_buf()),
            max_retries: 1,
            retry_delay_ms: 1,
            ..IngestSettings::default()
        }
    }

    fn text_chain() -> ExtractionChain {
        ExtractionChain::new(100, Duration::from_secs(5))
            .with_converter(DocumentFormat::PlainText, Arc::new(PlainTextConverter))
    }

    fn deps(
        root: &Path,
        store: Arc<dyn ResumeStore>,
        embedder: Option<Arc<dyn Embedder>>,
        chain: ExtractionChain,
    ) -> IngestDependencies {
        IngestDependencies {
            store,
            extractor: Arc::new(LineExtractor),
            embedder,
            chain,
            file_storage: LocalFileStorage::new(root.join("files")),
            job_store: JsonJobStore::new_with_root(root.join("batches"), 24),
        }
    }

    fn service_with(root: &Path, settings: IngestSettings) -> Arc<IngestService> {
        IngestService::new(
            settings,
            deps(
                root,
                Arc::new(JsonResumeStore::in_memory()),
                Some(Arc::new(BagOfWords)),
                text_chain(),
            ),
        )
    }

    fn resume(name: &str, email: &str, skill: &str) -> UploadedFile {
        let text = format!(
            "Name: {name}\nEmail: {email}\nSkills: {skill}, distributed systems, testing\n\
             Experience: Backend engineer building ingestion pipelines for {skill} teams\n\
             Education: BSc Computer Science"
        );
        UploadedFile::new(format!("{}.txt", name.replace(' ', "_")), text.into_bytes())
    }

    async fn wait_for_completion(
        service: &IngestService,
        company_id: CompanyId,
        batch_id: Uuid,
    ) -> BatchStatus {
        let mut last_processed = 0;
        for _ in 0..500 {
            let status = service.get_batch_status(company_id, batch_id).await.unwrap();
            assert!(status.processed() >= last_processed);
            last_processed = status.processed();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("batch {batch_id} did not finish");
    }

    #[tokio::test]
    async fn identical_file_in_a_batch_is_reported_as_duplicate() {
        let temp = tempfile::tempdir().unwrap();
        let service = service_with(temp.path(), test_settings(temp.path()));

        let files = vec![
            resume("Jane Roe", "jane@roe.dev", "Rust"),
            resume("John Doe", "john@doe.dev", "Go"),
            resume("Ada Byron", "ada@byron.dev", "Haskell"),
            resume("Alan Kay", "alan@kay.dev", "Smalltalk"),
            resume("Jane Roe", "jane@roe.dev", "Rust"),
        ];
        let batch_id = service.submit_batch(1, files).await.unwrap();
        let status = wait_for_completion(&service, 1, batch_id).await;

        assert_eq!(status.status, BatchProcessingState::Completed);
        assert_eq!(
            (status.total, status.successful, status.failed, status.duplicate),
            (5, 4, 0, 1)
        );
        assert_eq!(status.progress, 100);

        let duplicate = status
            .per_file
            .iter()
            .find(|t| t.stage == FileStage::Duplicate)
            .unwrap();
        let resumes = service.list_parsed_resumes(1).await.unwrap();
        assert_eq!(resumes.len(), 4);
        assert!(resumes.iter().any(|r| Some(r.id) == duplicate.duplicate_of));
        assert!(resumes.iter().all(|r| r.batch_total_files == 5 && r.fingerprint.is_some()));
    }

    #[tokio::test]
    async fn empty_file_fails_as_unreadable_without_stopping_the_batch() {
        let temp = tempfile::tempdir().unwrap();
        let service = service_with(temp.path(), test_settings(temp.path()));

        let files = vec![
            resume("Jane Roe", "jane@roe.dev", "Rust"),
            UploadedFile::new("empty.txt", Vec::new()),
            resume("John Doe", "john@doe.dev", "Go"),
        ];
        let batch_id = service.submit_batch(1, files).await.unwrap();
        let status = wait_for_completion(&service, 1, batch_id).await;

        assert_eq!(
            (status.total, status.successful, status.failed, status.duplicate),
            (3, 2, 1, 0)
        );
        assert_eq!(
            status.per_file[1].failure_reason,
            Some(FailureReason::UnreadableContent)
        );

        let failures = service.list_failed_resumes(1).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].reason, FailureReason::UnreadableContent);
        assert_eq!(failures[0].file_name, "empty.txt");
        assert!(failures[0].storage_path.is_some());
    }

    #[tokio::test]
    async fn legacy_document_falls_back_to_the_heavier_converter() {
        let temp = tempfile::tempdir().unwrap();
        let primary = FixedConverter::failing("antiword");
        let fallback = FixedConverter::ok(
            "soffice",
            &format!("Name: Jane Roe\nEmail: jane@roe.dev\n{}", long_text("legacy")),
        );
        let chain = ExtractionChain::new(100, Duration::from_secs(5))
            .with_converter(DocumentFormat::LegacyDoc, primary.clone())
            .with_converter(DocumentFormat::LegacyDoc, fallback.clone());
        let service = IngestService::new(
            test_settings(temp.path()),
            deps(
                temp.path(),
                Arc::new(JsonResumeStore::in_memory()),
                Some(Arc::new(BagOfWords)),
                chain,
            ),
        );

        let mut bytes = OLE_HEADER.to_vec();
        bytes.extend_from_slice(&[0; 512]);
        let batch_id = service
            .submit_batch(1, vec![UploadedFile::new("cv.doc", bytes)])
            .await
            .unwrap();
        let status = wait_for_completion(&service, 1, batch_id).await;

        assert_eq!(status.successful, 1);
        assert_eq!(status.per_file[0].stage, FileStage::Done);
        assert_eq!(status.per_file[0].format, Some(DocumentFormat::LegacyDoc));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);

        let resumes = service.list_parsed_resumes(1).await.unwrap();
        assert_eq!(resumes[0].extraction.converter, "soffice");
        assert!(!resumes[0].extraction.ocr_used);
    }

    #[tokio::test]
    async fn resubmitting_the_same_file_is_caught_by_dedup() {
        let temp = tempfile::tempdir().unwrap();
        let service = service_with(temp.path(), test_settings(temp.path()));

        let first = service
            .submit_batch(1, vec![resume("Jane Roe", "jane@roe.dev", "Rust")])
            .await
            .unwrap();
        wait_for_completion(&service, 1, first).await;
        let second = service
            .submit_batch(1, vec![resume("Jane Roe", "jane@roe.dev", "Rust")])
            .await
            .unwrap();
        let status = wait_for_completion(&service, 1, second).await;
        assert_eq!((status.successful, status.duplicate), (0, 1));

        // Another company has its own fingerprint index.
        let other = service
            .submit_batch(2, vec![resume("Jane Roe", "jane@roe.dev", "Rust")])
            .await
            .unwrap();
        assert_eq!(wait_for_completion(&service, 2, other).await.successful, 1);
        assert!(service.get_batch_status(2, first).await.is_err());
    }

    #[tokio::test]
    async fn without_an_embedder_resumes_are_kept_but_unchecked() {
        let temp = tempfile::tempdir().unwrap();
        let service = IngestService::new(
            test_settings(temp.path()),
            deps(
                temp.path(),
                Arc::new(JsonResumeStore::in_memory()),
                None,
                text_chain(),
            ),
        );

        let files = vec![
            resume("Jane Roe", "jane@roe.dev", "Rust"),
            resume("John Doe", "john@doe.dev", "Go"),
            resume("Jane Roe", "jane@roe.dev", "Rust"),
        ];
        let batch_id = service.submit_batch(1, files).await.unwrap();
        let status = wait_for_completion(&service, 1, batch_id).await;

        // Exact copies are still caught by content hash.
        assert_eq!((status.successful, status.duplicate), (2, 1));
        assert_eq!(
            status.per_file.iter().filter(|t| t.dedup_unchecked).count(),
            2
        );
        let resumes = service.list_parsed_resumes(1).await.unwrap();
        assert_eq!(resumes.len(), 2);
        assert!(resumes.iter().all(|r| r.dedup_unchecked && r.fingerprint.is_none()));
    }

    #[tokio::test]
    async fn identical_files_without_email_yield_one_duplicate() {
        let temp = tempfile::tempdir().unwrap();
        let service = service_with(temp.path(), test_settings(temp.path()));

        let text = format!("Name: Jane Roe\n{}", long_text("no contact details"));
        let files = vec![
            UploadedFile::new("a.txt", text.clone().into_bytes()),
            UploadedFile::new("b.txt", text.into_bytes()),
        ];
        let batch_id = service.submit_batch(1, files).await.unwrap();
        let status = wait_for_completion(&service, 1, batch_id).await;

        assert_eq!((status.successful, status.duplicate), (1, 1));
        let resumes = service.list_parsed_resumes(1).await.unwrap();
        assert_eq!(resumes.len(), 1);
        assert!(resumes[0].profile.normalized_email().is_none());
    }

    #[tokio::test]
    async fn oversized_and_unknown_files_fail_with_their_own_reasons() {
        let temp = tempfile::tempdir().unwrap();
        let settings = IngestSettings {
            max_file_size_bytes: 1024,
            ..test_settings(temp.path())
        };
        let service = service_with(temp.path(), settings);

        let files = vec![
            UploadedFile::new("huge.txt", vec![b'a'; 4096]),
            UploadedFile::new("blob.bin", vec![0, 159, 146, 150, 0, 1, 2]),
        ];
        let batch_id = service.submit_batch(1, files).await.unwrap();
        let status = wait_for_completion(&service, 1, batch_id).await;

        assert_eq!(status.failed, 2);
        assert_eq!(
            status.per_file[0].failure_reason,
            Some(FailureReason::FileTooLarge)
        );
        assert_eq!(
            status.per_file[1].failure_reason,
            Some(FailureReason::UnsupportedFormat)
        );
        let failures = service.list_failed_resumes(1).await.unwrap();
        let too_large = failures.iter().find(|f| f.file_name == "huge.txt").unwrap();
        assert!(too_large.storage_path.is_none());
    }

    #[tokio::test]
    async fn storage_outage_halts_the_rest_of_the_batch() {
        let temp = tempfile::tempdir().unwrap();
        let settings = IngestSettings {
            max_concurrent_files: 1,
            ..test_settings(temp.path())
        };
        let store = Arc::new(FlakyStore {
            inner: JsonResumeStore::in_memory(),
            healthy_writes: AtomicUsize::new(1),
        });
        let service = IngestService::new(
            settings,
            deps(temp.path(), store, Some(Arc::new(BagOfWords)), text_chain()),
        );

        let files = vec![
            resume("Jane Roe", "jane@roe.dev", "Rust"),
            resume("John Doe", "john@doe.dev", "Go"),
            resume("Ada Byron", "ada@byron.dev", "Haskell"),
        ];
        let batch_id = service.submit_batch(1, files).await.unwrap();
        let status = wait_for_completion(&service, 1, batch_id).await;

        assert_eq!(status.status, BatchProcessingState::Failed);
        assert!(status.error.is_some());
        assert_eq!(status.processed(), status.total);
        assert_eq!((status.successful, status.failed), (1, 2));
        assert_eq!(status.per_file[0].stage, FileStage::Done);
        assert!(status.per_file[1..]
            .iter()
            .all(|t| t.failure_reason == Some(FailureReason::StorageUnavailable)));
    }

    #[tokio::test]
    async fn materializing_twice_for_the_same_job_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let service = service_with(temp.path(), test_settings(temp.path()));
        let batch_id = service
            .submit_batch(1, vec![resume("Jane Roe", "Jane@Roe.dev", "Rust")])
            .await
            .unwrap();
        wait_for_completion(&service, 1, batch_id).await;
        let resume_id = service.list_parsed_resumes(1).await.unwrap()[0].id;

        let application = service
            .materialize_candidate(1, resume_id, Some(3))
            .await
            .unwrap();
        assert_eq!(application.candidate_email, "jane@roe.dev");

        let err = service
            .materialize_candidate(1, resume_id, Some(3))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::AlreadyApplied { .. })
        ));
        service
            .materialize_candidate(1, resume_id, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_resumes_can_be_retried_and_deleted() {
        let temp = tempfile::tempdir().unwrap();
        let service = service_with(temp.path(), test_settings(temp.path()));
        let first = service
            .submit_batch(
                1,
                vec![
                    UploadedFile::new("empty.txt", Vec::new()),
                    UploadedFile::new("blank.txt", b"   ".to_vec()),
                ],
            )
            .await
            .unwrap();
        wait_for_completion(&service, 1, first).await;

        let failures = service.list_failed_resumes(1).await.unwrap();
        let empty = failures.iter().find(|f| f.file_name == "empty.txt").unwrap().id;
        let blank = failures.iter().find(|f| f.file_name == "blank.txt").unwrap().id;

        let retry = service.retry_failed_resumes(1, &[empty]).await.unwrap();
        assert_ne!(retry, first);
        let status = wait_for_completion(&service, 1, retry).await;
        assert_eq!((status.total, status.failed), (1, 1));

        let failures = service.list_failed_resumes(1).await.unwrap();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.id != empty));

        service.delete_failed_resume(1, blank).await.unwrap();
        let err = service.delete_failed_resume(1, blank).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::FailedResumeNotFound(_))
        ));
        assert_eq!(service.list_batches(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn admin_updates_are_company_scoped() {
        let temp = tempfile::tempdir().unwrap();
        let service = service_with(temp.path(), test_settings(temp.path()));
        let batch_id = service
            .submit_batch(1, vec![resume("Jane Roe", "jane@roe.dev", "Rust")])
            .await
            .unwrap();
        wait_for_completion(&service, 1, batch_id).await;
        let resume_id = service.list_parsed_resumes(1).await.unwrap()[0].id;

        assert!(service.revise_uniqueness(2, resume_id, false).await.is_err());
        let revised = service.revise_uniqueness(1, resume_id, false).await.unwrap();
        assert!(!revised.is_unique);

        assert!(service.delete_resume(2, resume_id).await.is_err());
        service.delete_resume(1, resume_id).await.unwrap();
        assert!(service.list_parsed_resumes(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zip_uploads_are_counted_per_entry() {
        use std::io::{Cursor, Write};
        use zip::write::SimpleFileOptions;

        let temp = tempfile::tempdir().unwrap();
        let service = service_with(temp.path(), test_settings(temp.path()));

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for upload in [
            resume("Jane Roe", "jane@roe.dev", "Rust"),
            resume("John Doe", "john@doe.dev", "Go"),
        ] {
            writer.start_file(format!("cvs/{}", upload.file_name), options).unwrap();
            writer.write_all(&upload.bytes).unwrap();
        }
        let archive = writer.finish().unwrap().into_inner();

        let batch_id = service
            .submit_batch(
                1,
                vec![
                    UploadedFile::new("bundle.zip", archive),
                    resume("Ada Byron", "ada@byron.dev", "Haskell"),
                ],
            )
            .await
            .unwrap();
        let status = wait_for_completion(&service, 1, batch_id).await;

        assert_eq!((status.total, status.successful), (3, 3));
        let resumes = service.list_parsed_resumes(1).await.unwrap();
        assert!(resumes.iter().all(|r| r.batch_total_files == 3));
    }

    #[tokio::test]
    async fn oversized_archive_entry_fails_without_being_inflated() {
        use std::io::{Cursor, Write};
        use zip::write::SimpleFileOptions;

        let temp = tempfile::tempdir().unwrap();
        let settings = IngestSettings {
            max_file_size_bytes: 1024,
            ..test_settings(temp.path())
        };
        let service = service_with(temp.path(), settings);

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        writer.start_file("padding.txt", options).unwrap();
        writer.write_all(&vec![b'a'; 64 * 1024]).unwrap();
        let cv = resume("Jane Roe", "jane@roe.dev", "Rust");
        writer.start_file(cv.file_name.as_str(), options).unwrap();
        writer.write_all(&cv.bytes).unwrap();
        let archive = writer.finish().unwrap().into_inner();

        let batch_id = service
            .submit_batch(1, vec![UploadedFile::new("bundle.zip", archive)])
            .await
            .unwrap();
        let status = wait_for_completion(&service, 1, batch_id).await;

        assert_eq!(
            (status.total, status.successful, status.failed),
            (2, 1, 1)
        );
        assert_eq!(
            status.per_file[0].failure_reason,
            Some(FailureReason::FileTooLarge)
        );
        let failures = service.list_failed_resumes(1).await.unwrap();
        assert_eq!(failures[0].file_name, "padding.txt");
        assert!(failures[0].storage_path.is_none());
    }
}
