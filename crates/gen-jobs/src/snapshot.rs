/// Durable per-domain snapshots of pending jobs
///
/// One JSON file per domain under the storage dir, written synchronously
/// on every registry mutation so the state survives a reload. Persistence
/// is best-effort: a missing, empty or malformed file reads back as an
/// empty map, never as an error.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{GenDomain, JobKey, JobStatus, PendingJob};

/// Persisted form of a job entry. Status collapses to generating/error;
/// the finer in-flight statuses are re-derived by polling after a reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedJob {
    pub started_at: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

const STATUS_GENERATING: &str = "generating";
const STATUS_ERROR: &str = "error";

impl PersistedJob {
    pub fn from_job(job: &PendingJob) -> Self {
        let status = if job.status == JobStatus::Error {
            STATUS_ERROR
        } else {
            STATUS_GENERATING
        };
        Self {
            started_at: job.started_at,
            status: status.to_string(),
            error: job.error.clone(),
            external_id: job.external_id.clone(),
        }
    }

    /// Rebuild an in-memory entry. The restored entry gets a fresh
    /// `entry_id`; only `started_at` must round-trip exactly.
    pub fn into_job(self, domain: GenDomain, key: JobKey) -> PendingJob {
        let mut job = PendingJob::new(domain, key);
        job.started_at = self.started_at;
        job.external_id = self.external_id;
        if self.status == STATUS_ERROR {
            job.status = JobStatus::Error;
            job.error = self.error;
        }
        job
    }
}

/// Reads and writes the per-domain snapshot files.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, domain: GenDomain) -> PathBuf {
        self.dir.join(format!("{}.json", domain.storage_key()))
    }

    /// Write the full snapshot for one domain. An empty registry removes
    /// the file instead of leaving an empty object behind.
    pub fn save(&self, domain: GenDomain, jobs: &HashMap<JobKey, PendingJob>) {
        let path = self.file_for(domain);
        if jobs.is_empty() {
            if path.exists() {
                if let Err(error) = fs::remove_file(&path) {
                    warn!(%domain, %error, "failed to clear job snapshot");
                }
            }
            return;
        }

        let records: HashMap<String, PersistedJob> = jobs
            .iter()
            .map(|(key, job)| (key.to_string(), PersistedJob::from_job(job)))
            .collect();

        let write = fs::create_dir_all(&self.dir).and_then(|_| {
            let json = serde_json::to_string_pretty(&records)?;
            fs::write(&path, json)
        });
        if let Err(error) = write {
            warn!(%domain, %error, "failed to persist job snapshot");
        }
    }

    /// Read the snapshot for one domain. Anything unreadable is treated
    /// as empty (and the corrupt file is dropped so it cannot keep
    /// failing on every load).
    pub fn load(&self, domain: GenDomain) -> HashMap<JobKey, PersistedJob> {
        let path = self.file_for(domain);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return HashMap::new(),
        };
        let records: HashMap<String, PersistedJob> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(error) => {
                warn!(%domain, %error, "discarding corrupt job snapshot");
                let _ = fs::remove_file(&path);
                return HashMap::new();
            }
        };
        records
            .into_iter()
            .filter_map(|(raw_key, record)| match JobKey::try_from(raw_key) {
                Ok(key) => Some((key, record)),
                Err(error) => {
                    warn!(%domain, error, "skipping unparseable job key");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_ms;

    fn store() -> (tempfile::TempDir, SnapshotStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_save_load_round_trip() {
        let (_guard, store) = store();
        let key = JobKey::scene("p-1", 3);
        let mut job = PendingJob::new(GenDomain::SceneVideo, key.clone());
        job.external_id = Some("vid-9".to_string());
        let mut jobs = HashMap::new();
        jobs.insert(key.clone(), job.clone());

        store.save(GenDomain::SceneVideo, &jobs);
        let loaded = store.load(GenDomain::SceneVideo);
        assert_eq!(loaded.len(), 1);
        let record = &loaded[&key];
        assert_eq!(record.started_at, job.started_at);
        assert_eq!(record.external_id.as_deref(), Some("vid-9"));
        assert_eq!(record.status, "generating");
    }

    #[test]
    fn test_error_status_round_trip() {
        let (_guard, store) = store();
        let key = JobKey::character("c-2");
        let mut job = PendingJob::new(GenDomain::CharacterImage, key.clone());
        job.set_error("backend rejected request");
        let mut jobs = HashMap::new();
        jobs.insert(key.clone(), job);

        store.save(GenDomain::CharacterImage, &jobs);
        let restored = store.load(GenDomain::CharacterImage)[&key]
            .clone()
            .into_job(GenDomain::CharacterImage, key);
        assert_eq!(restored.status, JobStatus::Error);
        assert_eq!(restored.error.as_deref(), Some("backend rejected request"));
    }

    #[test]
    fn test_empty_registry_removes_file() {
        let (_guard, store) = store();
        let key = JobKey::character("c-1");
        let mut jobs = HashMap::new();
        jobs.insert(
            key.clone(),
            PendingJob::new(GenDomain::CharacterImage, key.clone()),
        );
        store.save(GenDomain::CharacterImage, &jobs);
        assert!(store.file_for(GenDomain::CharacterImage).exists());

        jobs.clear();
        store.save(GenDomain::CharacterImage, &jobs);
        assert!(!store.file_for(GenDomain::CharacterImage).exists());
    }

    #[test]
    fn test_corrupt_snapshot_reads_as_empty() {
        let (_guard, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.file_for(GenDomain::CharacterImage), "{not json").unwrap();
        assert!(store.load(GenDomain::CharacterImage).is_empty());
        // The corrupt file is gone, not left to fail again.
        assert!(!store.file_for(GenDomain::CharacterImage).exists());
    }

    #[test]
    fn test_missing_snapshot_reads_as_empty() {
        let (_guard, store) = store();
        assert!(store.load(GenDomain::SceneImage).is_empty());
    }

    #[test]
    fn test_persisted_record_shape() {
        let key = JobKey::character("c-3");
        let mut job = PendingJob::new(GenDomain::CharacterImage, key);
        job.started_at = now_ms() - 5_000;
        let record = PersistedJob::from_job(&job);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "generating");
        assert_eq!(json["started_at"], job.started_at);
        assert!(json.get("error").is_none());
    }
}
