/// Tracker facade and task bookkeeping
///
/// `GenTracker` owns the registry, the per-job timers and poll tasks, and
/// the event channel. It is an explicit object handed to whatever layer
/// consumes it (no ambient module state), so it can be torn down with
/// `dispose_all` and driven entirely in-process by tests.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::DIRECT_POLL_GRACE;
use crate::{
    poller, reconcile, timeout, GenDomain, JobEvent, JobKey, JobRegistry, JobStatus, PendingJob,
    ResourceObservation, Result, SnapshotStore, StudioBackend,
};

/// Handles for everything the tracker has in flight. Timers and poll
/// loops never share handles; each job owns its own entries.
#[derive(Default)]
pub(crate) struct TaskTable {
    timeouts: HashMap<(GenDomain, JobKey), JoinHandle<()>>,
    polls: HashMap<(GenDomain, JobKey), JoinHandle<()>>,
    loops: HashMap<GenDomain, JoinHandle<()>>,
}

impl TaskTable {
    pub(crate) fn set_timeout(&mut self, domain: GenDomain, key: JobKey, handle: JoinHandle<()>) {
        if let Some(old) = self.timeouts.insert((domain, key), handle) {
            old.abort();
        }
    }

    pub(crate) fn set_poll(&mut self, domain: GenDomain, key: JobKey, handle: JoinHandle<()>) {
        if let Some(old) = self.polls.insert((domain, key), handle) {
            old.abort();
        }
    }

    fn cancel_job(&mut self, domain: GenDomain, key: &JobKey) {
        let slot = (domain, key.clone());
        if let Some(handle) = self.timeouts.remove(&slot) {
            handle.abort();
        }
        if let Some(handle) = self.polls.remove(&slot) {
            handle.abort();
        }
    }

    pub(crate) fn loop_running(&self, domain: GenDomain) -> bool {
        self.loops.contains_key(&domain)
    }

    pub(crate) fn set_loop(&mut self, domain: GenDomain, handle: JoinHandle<()>) {
        if let Some(old) = self.loops.insert(domain, handle) {
            old.abort();
        }
    }

    pub(crate) fn clear_loop(&mut self, domain: GenDomain) {
        self.loops.remove(&domain);
    }

    fn abort_all(&mut self) {
        for (_, handle) in self.timeouts.drain() {
            handle.abort();
        }
        for (_, handle) in self.polls.drain() {
            handle.abort();
        }
        for (_, handle) in self.loops.drain() {
            handle.abort();
        }
    }
}

pub(crate) struct TrackerInner {
    pub(crate) registry: JobRegistry,
    pub(crate) tasks: Mutex<TaskTable>,
    pub(crate) backend: Arc<dyn StudioBackend>,
    events: UnboundedSender<JobEvent>,
}

impl TrackerInner {
    pub(crate) fn emit(&self, event: JobEvent) {
        // Nobody listening is fine; events are advisory.
        let _ = self.events.send(event);
    }

    pub(crate) fn cancel_tasks(&self, domain: GenDomain, key: &JobKey) {
        self.tasks.lock().cancel_job(domain, key);
    }

    /// Terminal success: drop the entry, stop its timers, announce once.
    /// Guarded like every other terminal path; a completion observed for a
    /// superseded entry must not touch the key's current entry.
    pub(crate) fn complete_job(
        &self,
        domain: GenDomain,
        key: &JobKey,
        entry_id: Uuid,
        label: Option<String>,
    ) {
        if self.registry.remove_if(domain, key, entry_id).is_none() {
            return;
        }
        self.cancel_tasks(domain, key);
        if self.registry.mark_notified(domain, key) {
            self.emit(JobEvent::Completed {
                domain,
                key: key.clone(),
                label,
            });
        }
    }

    /// Terminal failure. Domains with a retry affordance keep the entry
    /// as `Error`; the rest drop it. Either way the timers stop.
    pub(crate) fn fail_job(&self, domain: GenDomain, key: &JobKey, entry_id: Uuid, message: String) {
        let applied = if domain.retains_error_entries() {
            self.registry
                .update_if(domain, key, entry_id, |job| job.set_error(message.clone()))
                .is_some()
        } else {
            self.registry.remove_if(domain, key, entry_id).is_some()
        };
        if !applied {
            return;
        }
        self.cancel_tasks(domain, key);
        self.emit(JobEvent::Failed {
            domain,
            key: key.clone(),
            message,
        });
    }

    pub(crate) fn set_status(
        &self,
        domain: GenDomain,
        key: &JobKey,
        entry_id: Uuid,
        status: JobStatus,
        progress: u8,
    ) {
        let updated = self.registry.update_if(domain, key, entry_id, |job| {
            job.status = status;
            job.progress = progress;
        });
        if let Some(job) = updated {
            self.emit(JobEvent::StatusChanged {
                domain,
                key: key.clone(),
                status: job.status,
                progress: job.progress,
            });
        }
    }
}

/// Client-side tracker for in-flight generation jobs.
#[derive(Clone)]
pub struct GenTracker {
    inner: Arc<TrackerInner>,
}

impl GenTracker {
    /// Build a tracker persisting snapshots under `storage_dir`. Returns
    /// the tracker and the event stream for the UI layer.
    pub fn new(
        backend: Arc<dyn StudioBackend>,
        storage_dir: impl Into<PathBuf>,
    ) -> (Self, UnboundedReceiver<JobEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(TrackerInner {
            registry: JobRegistry::new(SnapshotStore::new(storage_dir)),
            tasks: Mutex::new(TaskTable::default()),
            backend,
            events,
        });
        (Self { inner }, receiver)
    }

    /// Restore persisted jobs from a previous session: prune stale
    /// records, re-arm every deadline from its original `started_at`
    /// (time away still counts), and restart polling.
    pub fn resume(&self) {
        for domain in GenDomain::ALL {
            let restored = self.inner.registry.load_persisted(domain);
            if restored.is_empty() {
                continue;
            }
            info!(%domain, jobs = restored.len(), "restored pending jobs");

            let mut any_active = false;
            for job in &restored {
                if !job.is_active() {
                    continue;
                }
                any_active = true;
                timeout::arm(&self.inner, job);
                if domain.uses_direct_polling() {
                    if job.external_id.is_some() {
                        // The grace period already ran (partly or fully)
                        // before the reload.
                        let elapsed =
                            std::time::Duration::from_millis(job.elapsed_ms().max(0) as u64);
                        let delay = DIRECT_POLL_GRACE.saturating_sub(elapsed);
                        poller::spawn_video_poll(&self.inner, job, delay);
                    } else {
                        // Trigger response was lost with the old session;
                        // the re-armed deadline is all that bounds it.
                        debug!(key = %job.key, "restored video job has no video id to poll");
                    }
                }
            }
            if any_active && !domain.uses_direct_polling() {
                poller::ensure_refresh_loop(&self.inner, domain);
            }
        }
    }

    /// Track and trigger portrait generation for a pending character.
    /// Completion is detected by the character list refresh loop.
    pub async fn start_character_generation(&self, character_id: &str) -> Result<()> {
        let domain = GenDomain::CharacterImage;
        let key = JobKey::character(character_id);
        let job = self.create(domain, key.clone());

        if let Err(error) = self.inner.backend.trigger_character_image(character_id).await {
            self.inner
                .fail_job(domain, &key, job.entry_id, error.to_string());
            return Err(error.into());
        }
        Ok(())
    }

    /// Track and trigger first-frame generation for a scene. The trigger
    /// response itself signals completion.
    pub async fn start_scene_image(&self, project_id: &str, scene_id: i64) -> Result<()> {
        let domain = GenDomain::SceneImage;
        let key = JobKey::scene(project_id, scene_id);
        let job = self.create(domain, key.clone());

        match self
            .inner
            .backend
            .trigger_scene_image(project_id, scene_id)
            .await
        {
            Ok(()) => {
                self.inner.complete_job(domain, &key, job.entry_id, None);
                Ok(())
            }
            Err(error) => {
                self.inner
                    .fail_job(domain, &key, job.entry_id, error.to_string());
                Err(error.into())
            }
        }
    }

    /// Track and trigger video generation for a scene, then poll the
    /// per-video status endpoint until a terminal outcome.
    pub async fn start_scene_video(&self, project_id: &str, scene_id: i64) -> Result<()> {
        let domain = GenDomain::SceneVideo;
        let key = JobKey::scene(project_id, scene_id);
        let job = self.create(domain, key.clone());

        match self
            .inner
            .backend
            .trigger_scene_video(project_id, scene_id)
            .await
        {
            Ok(video_id) => {
                let updated = self.inner.registry.update_if(domain, &key, job.entry_id, |j| {
                    j.external_id = Some(video_id.clone());
                    j.status = JobStatus::Queued;
                });
                if let Some(updated) = updated {
                    self.inner.emit(JobEvent::StatusChanged {
                        domain,
                        key: key.clone(),
                        status: updated.status,
                        progress: updated.progress,
                    });
                    poller::spawn_video_poll(&self.inner, &updated, DIRECT_POLL_GRACE);
                }
                Ok(())
            }
            Err(error) => {
                self.inner
                    .fail_job(domain, &key, job.entry_id, error.to_string());
                Err(error.into())
            }
        }
    }

    /// Track an already-submitted virtual-cut analysis job; outcomes are
    /// read off the analysis history refresh.
    pub fn track_analysis(&self, analysis_job_id: &str) {
        let domain = GenDomain::VideoAnalysis;
        let key = JobKey::analysis(analysis_job_id);
        self.create(domain, key);
    }

    fn create(&self, domain: GenDomain, key: JobKey) -> PendingJob {
        let job = self.inner.registry.create(domain, key.clone());
        self.inner.emit(JobEvent::Created { domain, key });
        timeout::arm(&self.inner, &job);
        if !domain.uses_direct_polling() {
            poller::ensure_refresh_loop(&self.inner, domain);
        }
        job
    }

    /// Feed reconciliation with authoritative data obtained outside the
    /// tracker's own refresh loop (e.g. a page-level reload).
    pub fn notify_refresh(&self, domain: GenDomain, observations: &[ResourceObservation]) {
        reconcile::apply(&self.inner, domain, observations);
    }

    /// Drop a job and stop watching it. The backend work, if any, is not
    /// cancelled; its result simply lands via the next data refresh.
    pub fn cancel(&self, domain: GenDomain, key: &JobKey) {
        self.inner.registry.remove(domain, key);
        self.inner.cancel_tasks(domain, key);
    }

    pub fn jobs(&self, domain: GenDomain) -> Vec<PendingJob> {
        self.inner.registry.jobs(domain)
    }

    pub fn job(&self, domain: GenDomain, key: &JobKey) -> Option<PendingJob> {
        self.inner.registry.get(domain, key)
    }

    /// True when nothing is tracked in any domain.
    pub fn is_idle(&self) -> bool {
        self.inner.registry.is_idle()
    }

    /// Abort every timer, poll task and refresh loop. Persisted snapshots
    /// stay on disk for the next session to resume.
    pub fn dispose_all(&self) {
        self.inner.tasks.lock().abort_all();
    }
}
