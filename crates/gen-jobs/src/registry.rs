/// Job registry: the single source of truth for "what is generating"
///
/// In-memory maps per domain plus a synchronously written snapshot, so
/// pending jobs survive a reload. Every mutation persists the full
/// domain snapshot under the same lock that produced it, so the write
/// always reflects the latest in-memory state, never a stale capture.
use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::{now_ms, GenDomain, JobKey, PendingJob, SnapshotStore};

#[derive(Default)]
struct DomainJobs {
    jobs: HashMap<JobKey, PendingJob>,
    /// Entities already announced as completed; cleared when the key is
    /// re-created so a retry can notify again.
    notified: HashSet<JobKey>,
}

pub struct JobRegistry {
    state: Mutex<HashMap<GenDomain, DomainJobs>>,
    store: SnapshotStore,
}

impl JobRegistry {
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Insert a fresh entry for `key`, overwriting any prior one (last
    /// write wins; duplicate requests are not queued). Persists before
    /// returning.
    pub fn create(&self, domain: GenDomain, key: JobKey) -> PendingJob {
        let job = PendingJob::new(domain, key.clone());
        let mut state = self.state.lock();
        let slot = state.entry(domain).or_default();
        slot.notified.remove(&key);
        slot.jobs.insert(key, job.clone());
        self.store.save(domain, &slot.jobs);
        job
    }

    /// Merge an update into the entry for `key`, but only while the entry
    /// armed with `entry_id` is still the live one: a stale timer or
    /// poll callback against a superseded entry becomes a no-op. Returns
    /// the updated entry.
    pub fn update_if(
        &self,
        domain: GenDomain,
        key: &JobKey,
        entry_id: Uuid,
        apply: impl FnOnce(&mut PendingJob),
    ) -> Option<PendingJob> {
        let mut state = self.state.lock();
        let slot = state.entry(domain).or_default();
        let job = slot.jobs.get_mut(key)?;
        if job.entry_id != entry_id {
            return None;
        }
        let started_at = job.started_at;
        apply(job);
        job.started_at = started_at;
        let updated = job.clone();
        self.store.save(domain, &slot.jobs);
        Some(updated)
    }

    /// Remove the entry for `key`, persisting the shrunken snapshot.
    pub fn remove(&self, domain: GenDomain, key: &JobKey) -> Option<PendingJob> {
        let mut state = self.state.lock();
        let slot = state.entry(domain).or_default();
        let removed = slot.jobs.remove(key)?;
        self.store.save(domain, &slot.jobs);
        Some(removed)
    }

    /// Remove only if the live entry is still the one armed with
    /// `entry_id`.
    pub fn remove_if(
        &self,
        domain: GenDomain,
        key: &JobKey,
        entry_id: Uuid,
    ) -> Option<PendingJob> {
        let mut state = self.state.lock();
        let slot = state.entry(domain).or_default();
        match slot.jobs.get(key) {
            Some(job) if job.entry_id == entry_id => {}
            _ => return None,
        }
        let removed = slot.jobs.remove(key);
        self.store.save(domain, &slot.jobs);
        removed
    }

    pub fn get(&self, domain: GenDomain, key: &JobKey) -> Option<PendingJob> {
        let state = self.state.lock();
        state.get(&domain)?.jobs.get(key).cloned()
    }

    pub fn entry_matches(&self, domain: GenDomain, key: &JobKey, entry_id: Uuid) -> bool {
        self.get(domain, key)
            .map_or(false, |job| job.entry_id == entry_id)
    }

    pub fn jobs(&self, domain: GenDomain) -> Vec<PendingJob> {
        let state = self.state.lock();
        state
            .get(&domain)
            .map(|slot| slot.jobs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys of jobs still actively generating (error entries excluded).
    pub fn active_keys(&self, domain: GenDomain) -> Vec<JobKey> {
        let state = self.state.lock();
        state
            .get(&domain)
            .map(|slot| {
                slot.jobs
                    .values()
                    .filter(|job| job.is_active())
                    .map(|job| job.key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.values().all(|slot| slot.jobs.is_empty())
    }

    /// Record that completion of `key` has been announced. Returns true
    /// the first time only, so notices never re-fire on later refreshes.
    pub fn mark_notified(&self, domain: GenDomain, key: &JobKey) -> bool {
        let mut state = self.state.lock();
        state.entry(domain).or_default().notified.insert(key.clone())
    }

    /// Seed the in-memory state for one domain from its persisted
    /// snapshot, discarding records older than the domain safety window.
    /// Returns the restored entries so timers can be re-armed.
    pub fn load_persisted(&self, domain: GenDomain) -> Vec<PendingJob> {
        let window_ms = domain.safety_window().as_millis() as i64;
        let cutoff = now_ms() - window_ms;

        let records = self.store.load(domain);
        let mut state = self.state.lock();
        let slot = state.entry(domain).or_default();
        let mut restored = Vec::new();
        for (key, record) in records {
            if record.started_at < cutoff {
                continue;
            }
            let job = record.into_job(domain, key.clone());
            slot.jobs.insert(key, job.clone());
            restored.push(job);
        }
        // Rewrite the snapshot so expired records stay gone.
        self.store.save(domain, &slot.jobs);
        restored
    }
}
