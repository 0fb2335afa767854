use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::errors::FileFailure;
use super::models::{
    BatchProcessingState, BatchStatus, CompanyId, DocumentFormat, FileOutcome, FileStage,
    FileTask, UploadBatch,
};

/// Terminal result for one file, recorded exactly once.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success { resume_id: Uuid, dedup_unchecked: bool },
    Failed(FileFailure),
    Duplicate { of: Uuid },
}

struct SlotState {
    status: BatchProcessingState,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    per_file: Vec<FileTask>,
}

/// Live progress for one batch. Counters are plain atomics so concurrent file
/// workers never lose an update; per-file detail sits behind a short lock.
pub struct BatchSlot {
    batch_id: Uuid,
    company_id: CompanyId,
    created_at: DateTime<Utc>,
    total: usize,
    successful: AtomicUsize,
    failed: AtomicUsize,
    duplicate: AtomicUsize,
    state: Mutex<SlotState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BatchSlot {
    fn new(batch: &UploadBatch) -> Self {
        Self {
            batch_id: batch.batch_id,
            company_id: batch.company_id,
            created_at: batch.created_at,
            total: batch.files.len(),
            successful: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            duplicate: AtomicUsize::new(0),
            state: Mutex::new(SlotState {
                status: BatchProcessingState::Queued,
                started_at: None,
                completed_at: None,
                error: None,
                per_file: batch
                    .files
                    .iter()
                    .enumerate()
                    .map(|(i, name)| FileTask::queued(i, name.clone()))
                    .collect(),
            }),
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn mark_processing(&self) {
        let mut state = lock(&self.state);
        state.status = BatchProcessingState::Processing;
        state.started_at.get_or_insert_with(Utc::now);
    }

    pub fn set_format(&self, index: usize, format: DocumentFormat) {
        if let Some(task) = lock(&self.state).per_file.get_mut(index) {
            task.format = Some(format);
        }
    }

    /// Stage changes after a terminal outcome are ignored.
    pub fn set_stage(&self, index: usize, stage: FileStage) {
        if let Some(task) = lock(&self.state).per_file.get_mut(index) {
            if task.outcome.is_none() {
                task.stage = stage;
            }
        }
    }

    /// Returns false if the file already had an outcome; counters move at most once per file.
    pub fn record_outcome(&self, index: usize, outcome: TaskOutcome) -> bool {
        let mut state = lock(&self.state);
        let Some(task) = state.per_file.get_mut(index) else {
            return false;
        };
        if task.outcome.is_some() {
            return false;
        }

        let counter = match outcome {
            TaskOutcome::Success {
                resume_id,
                dedup_unchecked,
            } => {
                task.stage = FileStage::Done;
                task.outcome = Some(FileOutcome::Success);
                task.resume_id = Some(resume_id);
                task.dedup_unchecked = dedup_unchecked;
                &self.successful
            }
            TaskOutcome::Failed(failure) => {
                task.stage = FileStage::Failed;
                task.outcome = Some(FileOutcome::Failed);
                task.failure_reason = Some(failure.reason);
                task.error = Some(failure.to_string());
                &self.failed
            }
            TaskOutcome::Duplicate { of } => {
                task.stage = FileStage::Duplicate;
                task.outcome = Some(FileOutcome::Duplicate);
                task.duplicate_of = Some(of);
                &self.duplicate
            }
        };
        counter.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn finish(&self, status: BatchProcessingState, error: Option<String>) {
        let mut state = lock(&self.state);
        state.status = status;
        state.error = error;
        state.completed_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> BatchStatus {
        let state = lock(&self.state);
        let successful = self.successful.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let duplicate = self.duplicate.load(Ordering::SeqCst);
        let processed = successful + failed + duplicate;

        let progress = match state.status {
            BatchProcessingState::Completed | BatchProcessingState::Failed => 100,
            _ if self.total == 0 => 0,
            _ => (((processed as f64) * 100.0 / self.total as f64).floor() as i32).min(99),
        };

        let duration_seconds = match (state.started_at, state.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        };

        BatchStatus {
            batch_id: self.batch_id,
            company_id: self.company_id,
            status: state.status,
            progress,
            total: self.total,
            successful,
            failed,
            duplicate,
            per_file: state.per_file.clone(),
            error: state.error.clone(),
            created_at: self.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
            duration_seconds,
        }
    }
}

#[derive(Default)]
struct Arena {
    slots: Vec<Option<Arc<BatchSlot>>>,
    index: HashMap<Uuid, usize>,
    free: Vec<usize>,
}

/// Keyed store of live batches: slots in an arena, looked up by batch id.
#[derive(Default)]
pub struct BatchTracker {
    arena: RwLock<Arena>,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, batch: &UploadBatch) -> Arc<BatchSlot> {
        let slot = Arc::new(BatchSlot::new(batch));
        let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
        let position = match arena.free.pop() {
            Some(position) => {
                arena.slots[position] = Some(Arc::clone(&slot));
                position
            }
            None => {
                arena.slots.push(Some(Arc::clone(&slot)));
                arena.slots.len() - 1
            }
        };
        arena.index.insert(batch.batch_id, position);
        slot
    }

    pub fn get(&self, batch_id: &Uuid) -> Option<Arc<BatchSlot>> {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        let position = *arena.index.get(batch_id)?;
        arena.slots.get(position).and_then(Clone::clone)
    }

    pub fn for_company(&self, company_id: CompanyId) -> Vec<Arc<BatchSlot>> {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        arena
            .slots
            .iter()
            .flatten()
            .filter(|slot| slot.company_id == company_id)
            .cloned()
            .collect()
    }

    pub fn remove(&self, batch_id: &Uuid) -> Option<Arc<BatchSlot>> {
        let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
        let position = arena.index.remove(batch_id)?;
        let slot = arena.slots.get_mut(position).and_then(Option::take);
        arena.free.push(position);
        slot
    }

    /// Drops finished batches older than the retention window; their summaries
    /// stay readable from the persisted store.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let stale: Vec<Uuid> = {
            let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
            arena
                .slots
                .iter()
                .flatten()
                .filter(|slot| {
                    let state = lock(&slot.state);
                    state.completed_at.is_some_and(|done| done < cutoff)
                })
                .map(|slot| slot.batch_id)
                .collect()
        };

        stale.iter().filter(|id| self.remove(id).is_some()).count()
    }
}

/// Final batch summaries as JSON files, one directory per batch.
pub struct JsonJobStore {
    jobs_root: PathBuf,
    retention_hours: i64,
    mutex: tokio::sync::Mutex<()>,
}

impl JsonJobStore {
    pub fn new_with_root(jobs_root: PathBuf, retention_hours: i64) -> Self {
        Self {
            jobs_root,
            retention_hours: retention_hours.max(1),
            mutex: tokio::sync::Mutex::new(()),
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::hours(self.retention_hours)
    }

    pub async fn save_summary(&self, status: &BatchStatus) -> anyhow::Result<()> {
        let _lock = self.mutex.lock().await;
        let path = self.summary_path(&status.batch_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(status)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("failed writing {}", path.display()))?;
        Ok(())
    }

    pub async fn load_summary(&self, batch_id: &Uuid) -> anyhow::Result<Option<BatchStatus>> {
        let _lock = self.mutex.lock().await;
        let path = self.summary_path(batch_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let json = tokio::fs::read_to_string(&path).await?;
        let status = serde_json::from_str::<BatchStatus>(&json)
            .with_context(|| format!("invalid batch summary {}", path.display()))?;
        Ok(Some(status))
    }

    /// Newest first.
    pub async fn list_summaries(&self, company_id: CompanyId) -> anyhow::Result<Vec<BatchStatus>> {
        self.cleanup_expired().await?;

        if !tokio::fs::try_exists(&self.jobs_root)
            .await
            .unwrap_or(false)
        {
            return Ok(Vec::new());
        }

        let _lock = self.mutex.lock().await;
        let mut dir = tokio::fs::read_dir(&self.jobs_root).await?;
        let mut summaries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let summary_path = entry.path().join("summary.json");
            let Ok(json) = tokio::fs::read_to_string(&summary_path).await else {
                continue;
            };
            if let Ok(status) = serde_json::from_str::<BatchStatus>(&json) {
                if status.company_id == company_id {
                    summaries.push(status);
                }
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    pub async fn cleanup_expired(&self) -> anyhow::Result<usize> {
        if !tokio::fs::try_exists(&self.jobs_root)
            .await
            .unwrap_or(false)
        {
            return Ok(0);
        }

        let _lock = self.mutex.lock().await;
        let now = Utc::now();
        let mut removed = 0;
        let mut dir = tokio::fs::read_dir(&self.jobs_root).await?;

        while let Some(entry) = dir.next_entry().await? {
            if !entry.metadata().await?.is_dir() {
                continue;
            }

            let summary_path = entry.path().join("summary.json");
            let reference_time = match tokio::fs::read_to_string(&summary_path).await {
                Ok(json) => serde_json::from_str::<BatchStatus>(&json)
                    .map(|s| s.completed_at.unwrap_or(s.created_at))
                    .unwrap_or(now),
                Err(_) => now,
            };

            if now.signed_duration_since(reference_time) > self.retention() {
                tokio::fs::remove_dir_all(entry.path()).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    fn summary_path(&self, batch_id: &Uuid) -> PathBuf {
        self.jobs_root
            .join(batch_id.to_string())
            .join("summary.json")
    }
}
