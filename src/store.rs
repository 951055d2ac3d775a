//! Job record storage
//!
//! The store is the only thing shared between the worker running a job and
//! the observers watching it. [`JobStore::apply`] is the atomic
//! read-modify-write every state change goes through.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::job::{JobRecord, Transition};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

const DEFAULT_MAX_JOBS: usize = 5_000;

/// How long a finished record is kept out of capacity eviction, so observers
/// polling it still get its terminal frame
const DEFAULT_EVICTION_GRACE: Duration = Duration::from_secs(5);

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a freshly accepted job
    async fn create(&self, record: JobRecord) -> StoreResult<()>;

    async fn get(&self, job_id: &str) -> StoreResult<Option<JobRecord>>;

    /// Apply one transition atomically and return the updated record
    async fn apply(&self, job_id: &str, transition: Transition) -> StoreResult<JobRecord>;

    /// All records, oldest first
    async fn list(&self) -> StoreResult<Vec<JobRecord>>;

    /// Drop terminal records that finished more than `retention` ago
    async fn purge_expired(&self, retention: Duration) -> StoreResult<usize>;
}

fn expired(record: &JobRecord, retention: Duration) -> bool {
    let Some(finished) = record.finished_at else {
        return false;
    };
    let Ok(retention) = chrono::Duration::from_std(retention) else {
        return false;
    };
    record.is_terminal() && Utc::now() - finished > retention
}

/// In-process store; records are lost on restart
pub struct InMemoryJobStore {
    jobs: RwLock<Inner>,
    max_jobs: usize,
    eviction_grace: Duration,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, JobRecord>,
    order: VecDeque<String>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_max_jobs(DEFAULT_MAX_JOBS)
    }

    pub fn with_max_jobs(max_jobs: usize) -> Self {
        Self {
            jobs: RwLock::new(Inner::default()),
            max_jobs: max_jobs.max(1),
            eviction_grace: DEFAULT_EVICTION_GRACE,
        }
    }

    /// Minimum time a finished record survives before capacity eviction
    pub fn with_eviction_grace(mut self, grace: Duration) -> Self {
        self.eviction_grace = grace;
        self
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Evict the oldest record finished more than `grace` ago; live jobs are
    /// never evicted
    fn evict_one(&mut self, grace: Duration) -> bool {
        let victim = self
            .order
            .iter()
            .position(|id| self.records.get(id).is_some_and(|r| expired(r, grace)));
        match victim.and_then(|i| self.order.remove(i)) {
            Some(id) => {
                debug!(job_id = %id, "evicting job record");
                self.records.remove(&id);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, record: JobRecord) -> StoreResult<()> {
        let mut inner = self.jobs.write().await;
        if inner.records.contains_key(&record.job_id) {
            return Err(StoreError::AlreadyExists(record.job_id));
        }
        if inner.records.len() >= self.max_jobs && !inner.evict_one(self.eviction_grace) {
            warn!(
                max_jobs = self.max_jobs,
                "job store over capacity with no evictable jobs"
            );
        }
        inner.order.push_back(record.job_id.clone());
        inner.records.insert(record.job_id.clone(), record);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> StoreResult<Option<JobRecord>> {
        Ok(self.jobs.read().await.records.get(job_id).cloned())
    }

    async fn apply(&self, job_id: &str, transition: Transition) -> StoreResult<JobRecord> {
        let mut inner = self.jobs.write().await;
        let record = inner
            .records
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        record.apply(transition)?;
        Ok(record.clone())
    }

    async fn list(&self) -> StoreResult<Vec<JobRecord>> {
        let inner = self.jobs.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect())
    }

    async fn purge_expired(&self, retention: Duration) -> StoreResult<usize> {
        let mut inner = self.jobs.write().await;
        let stale: Vec<String> = inner
            .records
            .values()
            .filter(|r| expired(r, retention))
            .map(|r| r.job_id.clone())
            .collect();
        for id in &stale {
            inner.records.remove(id);
        }
        inner.order.retain(|id| !stale.contains(id));
        Ok(stale.len())
    }
}

/// One pretty-printed JSON file per job under `{data_dir}/jobs/`
///
/// Survives restarts and lets another process inspect job state. Writes go
/// through a temp file and rename so readers never see a partial record.
pub struct FileJobStore {
    jobs_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJobStore {
    pub fn new(data_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let jobs_dir = data_dir.as_ref().join("jobs");
        std::fs::create_dir_all(&jobs_dir)?;
        Ok(Self {
            jobs_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    fn record_path(&self, job_id: &str) -> Option<PathBuf> {
        let safe = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        safe.then(|| self.jobs_dir.join(format!("{}.json", job_id)))
    }

    async fn read(&self, path: &Path) -> StoreResult<Option<JobRecord>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &Path, record: &JobRecord) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, record: JobRecord) -> StoreResult<()> {
        let path = self
            .record_path(&record.job_id)
            .ok_or_else(|| StoreError::NotFound(record.job_id.clone()))?;
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists(record.job_id));
        }
        self.write(&path, &record).await
    }

    async fn get(&self, job_id: &str) -> StoreResult<Option<JobRecord>> {
        match self.record_path(job_id) {
            Some(path) => self.read(&path).await,
            None => Ok(None),
        }
    }

    async fn apply(&self, job_id: &str, transition: Transition) -> StoreResult<JobRecord> {
        let path = self
            .record_path(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .read(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        if record.apply(transition)? {
            self.write(&path, &record).await?;
        }
        Ok(record)
    }

    async fn list(&self) -> StoreResult<Vec<JobRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.jobs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable job file {}: {}", path.display(), e),
            }
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn purge_expired(&self, retention: Duration) -> StoreResult<usize> {
        let _guard = self.write_lock.lock().await;
        let mut purged = 0;
        let mut entries = tokio::fs::read_dir(&self.jobs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Ok(Some(record)) = self.read(&path).await {
                if expired(&record, retention) {
                    tokio::fs::remove_file(&path).await?;
                    purged += 1;
                }
            }
        }
        Ok(purged)
    }
}

/// Build the configured store
pub fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn JobStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!(max_jobs = config.max_jobs, "Using in-memory job store");
            Ok(Arc::new(InMemoryJobStore::with_max_jobs(config.max_jobs)))
        }
        StoreBackend::File => {
            info!("Using file job store at {}", config.data_dir.display());
            Ok(Arc::new(FileJobStore::new(&config.data_dir)?))
        }
    }
}

/// Periodically purge expired records until the store is dropped elsewhere
pub fn spawn_retention(store: Arc<dyn JobStore>, retention: Duration) -> tokio::task::JoinHandle<()> {
    let period = (retention / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match store.purge_expired(retention).await {
                Ok(0) => {}
                Ok(n) => info!("Purged {} expired job records", n),
                Err(e) => warn!("Job retention sweep failed: {}", e),
            }
        }
    })
}
