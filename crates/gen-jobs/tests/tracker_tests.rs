/// End-to-end tracker behavior against a scripted backend, driven under
/// paused tokio time so minutes of polling run instantly.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use backend_api::{BackendError, VideoStatusResponse};
use gen_jobs::{
    now_ms, GenDomain, GenTracker, JobEvent, JobKey, JobStatus, PendingJob, ResourceObservation,
    SnapshotStore, StudioBackend,
};

#[derive(Default)]
struct MockBackend {
    char_trigger_error: Mutex<Option<BackendError>>,
    video_trigger_error: Mutex<Option<BackendError>>,
    /// Scripted video ids for successive triggers; once drained, "vid-1".
    video_trigger_ids: Mutex<VecDeque<String>>,
    /// One-shot latency applied to the next video trigger.
    video_trigger_delay: Mutex<Option<Duration>>,
    /// Scripted answers for successive video status polls; once drained,
    /// further polls report "processing".
    video_polls: Mutex<VecDeque<Result<VideoStatusResponse, BackendError>>>,
    /// Latency applied to every video status poll.
    video_poll_delay: Mutex<Duration>,
    video_poll_calls: AtomicU32,
    /// What each domain's resource refresh should report.
    observations: Mutex<HashMap<GenDomain, Vec<ResourceObservation>>>,
    observe_calls: AtomicU32,
}

impl MockBackend {
    fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set_observations(&self, domain: GenDomain, observations: Vec<ResourceObservation>) {
        self.observations.lock().insert(domain, observations);
    }

    fn push_video_poll(&self, result: Result<VideoStatusResponse, BackendError>) {
        self.video_polls.lock().push_back(result);
    }
}

fn status(raw: &str, progress: Option<u8>) -> VideoStatusResponse {
    VideoStatusResponse {
        status: raw.to_string(),
        progress,
        video_url: None,
        error: None,
    }
}

fn api_error(message: &str) -> BackendError {
    BackendError::Api {
        status: 500,
        message: message.to_string(),
    }
}

fn io_error() -> BackendError {
    BackendError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset",
    ))
}

#[async_trait]
impl StudioBackend for MockBackend {
    async fn trigger_character_image(&self, _character_id: &str) -> Result<(), BackendError> {
        match self.char_trigger_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn trigger_scene_image(
        &self,
        _project_id: &str,
        _scene_id: i64,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn trigger_scene_video(
        &self,
        _project_id: &str,
        _scene_id: i64,
    ) -> Result<String, BackendError> {
        let delay = self.video_trigger_delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.video_trigger_error.lock().take() {
            return Err(error);
        }
        let id = self.video_trigger_ids.lock().pop_front();
        Ok(id.unwrap_or_else(|| "vid-1".to_string()))
    }

    async fn video_status(
        &self,
        _project_id: &str,
        _scene_id: i64,
        _video_id: &str,
    ) -> Result<VideoStatusResponse, BackendError> {
        self.video_poll_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.video_poll_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.video_polls
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(status("processing", Some(0))))
    }

    async fn observe(
        &self,
        domain: GenDomain,
        _keys: &[JobKey],
    ) -> Result<Vec<ResourceObservation>, BackendError> {
        self.observe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .observations
            .lock()
            .get(&domain)
            .cloned()
            .unwrap_or_default())
    }
}

fn tracker(backend: Arc<MockBackend>) -> (tempfile::TempDir, GenTracker, UnboundedReceiver<JobEvent>) {
    let dir = tempfile::tempdir().unwrap();
    let (tracker, events) = GenTracker::new(backend, dir.path());
    (dir, tracker, events)
}

fn drain(events: &mut UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

async fn settle() {
    // Let spawned tasks scheduled at the current instant run.
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_character_job_completes_via_list_refresh() {
    let backend = MockBackend::arc();
    let (_dir, tracker, mut events) = tracker(backend.clone());
    let key = JobKey::character("c-1");

    tracker.start_character_generation("c-1").await.unwrap();
    assert!(!tracker.is_idle());

    // First refresh still shows no image.
    backend.set_observations(
        GenDomain::CharacterImage,
        vec![ResourceObservation::pending(key.clone())],
    );
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(tracker.job(GenDomain::CharacterImage, &key).is_some());

    // Image lands; the next refresh settles the job.
    backend.set_observations(
        GenDomain::CharacterImage,
        vec![ResourceObservation::ready(key.clone(), Some("Mira".into()))],
    );
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert!(tracker.is_idle());
    let got = drain(&mut events);
    let completed: Vec<_> = got
        .iter()
        .filter(|e| matches!(e, JobEvent::Completed { .. }))
        .collect();
    assert_eq!(completed.len(), 1);
    match completed[0] {
        JobEvent::Completed { label, .. } => assert_eq!(label.as_deref(), Some("Mira")),
        _ => unreachable!(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_completion_notice_fires_once() {
    let backend = MockBackend::arc();
    let (_dir, tracker, mut events) = tracker(backend.clone());
    let key = JobKey::character("c-1");

    tracker.start_character_generation("c-1").await.unwrap();
    backend.set_observations(
        GenDomain::CharacterImage,
        vec![ResourceObservation::ready(key.clone(), None)],
    );
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(tracker.is_idle());

    // The same observation arriving again must not re-announce.
    tracker.notify_refresh(
        GenDomain::CharacterImage,
        &[ResourceObservation::ready(key.clone(), None)],
    );
    settle().await;

    let completed = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, JobEvent::Completed { .. }))
        .count();
    assert_eq!(completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_character_trigger_failure_keeps_error_entry() {
    let backend = MockBackend::arc();
    *backend.char_trigger_error.lock() = Some(api_error("model unavailable"));
    let (_dir, tracker, mut events) = tracker(backend.clone());
    let key = JobKey::character("c-1");

    let result = tracker.start_character_generation("c-1").await;
    assert!(result.is_err());

    let job = tracker.job(GenDomain::CharacterImage, &key).unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.as_deref().unwrap().contains("model unavailable"));

    let failed = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, JobEvent::Failed { .. }))
        .count();
    assert_eq!(failed, 1);

    // The deadline timer was cancelled with the failure.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_character_timeout_retains_entry_for_retry() {
    let backend = MockBackend::arc();
    let (_dir, tracker, mut events) = tracker(backend.clone());
    let key = JobKey::character("c-1");

    tracker.start_character_generation("c-1").await.unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;

    let job = tracker.job(GenDomain::CharacterImage, &key).unwrap();
    assert_eq!(job.status, JobStatus::Error);
    let timed_out = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, JobEvent::TimedOut { .. }))
        .count();
    assert_eq!(timed_out, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_supersedes_first_entry_and_its_timer() {
    let backend = MockBackend::arc();
    let (_dir, tracker, mut events) = tracker(backend.clone());
    let key = JobKey::character("c-1");

    tracker.start_character_generation("c-1").await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    // Retry while the first attempt is still pending.
    tracker.start_character_generation("c-1").await.unwrap();

    // Past the first entry's deadline: its timer is stale and must not
    // touch the superseding entry.
    tokio::time::sleep(Duration::from_secs(35)).await;
    let job = tracker.job(GenDomain::CharacterImage, &key).unwrap();
    assert_eq!(job.status, JobStatus::Initializing);
    assert!(drain(&mut events)
        .iter()
        .all(|e| !matches!(e, JobEvent::TimedOut { .. })));

    // The second entry's own deadline still fires.
    tokio::time::sleep(Duration::from_secs(30)).await;
    let timed_out = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, JobEvent::TimedOut { .. }))
        .count();
    assert_eq!(timed_out, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scene_image_completes_on_trigger_response() {
    let backend = MockBackend::arc();
    let (_dir, tracker, mut events) = tracker(backend);
    let key = JobKey::scene("p-1", 3);

    tracker.start_scene_image("p-1", 3).await.unwrap();
    settle().await;

    assert!(tracker.job(GenDomain::SceneImage, &key).is_none());
    assert!(tracker.is_idle());
    let got = drain(&mut events);
    assert!(got.iter().any(|e| matches!(e, JobEvent::Completed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_scene_video_transient_poll_errors_then_completion() {
    let backend = MockBackend::arc();
    backend.push_video_poll(Err(io_error()));
    backend.push_video_poll(Ok(status("processing", Some(40))));
    backend.push_video_poll(Ok(status("completed", Some(100))));
    let (_dir, tracker, mut events) = tracker(backend.clone());
    let key = JobKey::scene("p-1", 3);

    tracker.start_scene_video("p-1", 3).await.unwrap();
    let job = tracker.job(GenDomain::SceneVideo, &key).unwrap();
    assert_eq!(job.external_id.as_deref(), Some("vid-1"));

    // Grace delay, then three poll attempts at 5s spacing.
    tokio::time::sleep(Duration::from_secs(75)).await;

    assert!(tracker.is_idle());
    assert_eq!(backend.video_poll_calls.load(Ordering::SeqCst), 3);
    let got = drain(&mut events);
    assert!(got
        .iter()
        .any(|e| matches!(e, JobEvent::StatusChanged { progress: 40, .. })));
    assert!(got.iter().any(|e| matches!(e, JobEvent::Completed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_scene_video_unknown_status_is_not_completion() {
    let backend = MockBackend::arc();
    backend.push_video_poll(Ok(status("almost_done", Some(99))));
    let (_dir, tracker, _events) = tracker(backend.clone());
    let key = JobKey::scene("p-1", 3);

    tracker.start_scene_video("p-1", 3).await.unwrap();
    tokio::time::sleep(Duration::from_secs(66)).await;

    // Unrecognized status strings keep the job in flight.
    let job = tracker.job(GenDomain::SceneVideo, &key).unwrap();
    assert_eq!(job.status, JobStatus::Processing);
}

#[tokio::test(start_paused = true)]
async fn test_scene_video_failure_removes_job() {
    let backend = MockBackend::arc();
    backend.push_video_poll(Ok(VideoStatusResponse {
        status: "failed".to_string(),
        progress: None,
        video_url: None,
        error: Some("render node crashed".to_string()),
    }));
    let (_dir, tracker, mut events) = tracker(backend);
    let key = JobKey::scene("p-1", 3);

    tracker.start_scene_video("p-1", 3).await.unwrap();
    tokio::time::sleep(Duration::from_secs(66)).await;

    assert!(tracker.job(GenDomain::SceneVideo, &key).is_none());
    let failed: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            JobEvent::Failed { message, .. } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec!["render node crashed".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_scene_video_deadline_bounds_endless_processing() {
    let backend = MockBackend::arc();
    let (_dir, tracker, mut events) = tracker(backend.clone());
    let key = JobKey::scene("p-1", 3);

    tracker.start_scene_video("p-1", 3).await.unwrap();
    tokio::time::sleep(Duration::from_secs(301)).await;

    // Video jobs do not linger as error entries.
    assert!(tracker.job(GenDomain::SceneVideo, &key).is_none());
    let timed_out = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, JobEvent::TimedOut { .. }))
        .count();
    assert_eq!(timed_out, 1);

    // Polling stops once the job is gone.
    let polls_at_timeout = backend.video_poll_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(backend.video_poll_calls.load(Ordering::SeqCst), polls_at_timeout);
}

#[tokio::test(start_paused = true)]
async fn test_stale_poll_completion_spares_superseding_retry() {
    let backend = MockBackend::arc();
    backend
        .video_trigger_ids
        .lock()
        .extend(["vid-1".to_string(), "vid-2".to_string()]);
    let (_dir, tracker, mut events) = tracker(backend.clone());
    let key = JobKey::scene("p-1", 3);

    tracker.start_scene_video("p-1", 3).await.unwrap();

    // The first poll attempt will be answered "completed" for vid-1, but
    // only after 5s in flight.
    *backend.video_poll_delay.lock() = Duration::from_secs(5);
    backend.push_video_poll(Ok(status("completed", Some(100))));

    // Retry lands while that response is in flight; its own trigger call
    // is slow, so the old poll task has not been replaced yet.
    let retry = tracker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(62)).await;
        *backend.video_trigger_delay.lock() = Some(Duration::from_secs(10));
        retry.start_scene_video("p-1", 3).await.unwrap();
    });

    // Past the stale completion (t=65s), before the retry trigger returns.
    tokio::time::sleep(Duration::from_secs(66)).await;
    let job = tracker.job(GenDomain::SceneVideo, &key).unwrap();
    assert_eq!(job.status, JobStatus::Initializing);
    assert!(drain(&mut events)
        .iter()
        .all(|e| !matches!(e, JobEvent::Completed { .. })));

    // The retry trigger finishes and polling moves to the new video.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let job = tracker.job(GenDomain::SceneVideo, &key).unwrap();
    assert_eq!(job.external_id.as_deref(), Some("vid-2"));
}

#[tokio::test(start_paused = true)]
async fn test_direct_poll_attempt_budget_bounds_polling() {
    let backend = MockBackend::arc();
    let dir = tempfile::tempdir().unwrap();
    let key = JobKey::scene("p-1", 3);

    // A snapshot written under a fast clock puts the restored deadline far
    // in the future, leaving the attempt budget as the operative bound.
    {
        let store = SnapshotStore::new(dir.path());
        let mut job = PendingJob::new(GenDomain::SceneVideo, key.clone());
        job.started_at = now_ms() + 250_000;
        job.external_id = Some("vid-1".to_string());
        let mut jobs = HashMap::new();
        jobs.insert(key.clone(), job);
        store.save(GenDomain::SceneVideo, &jobs);
    }

    let (tracker, mut events) = GenTracker::new(backend.clone(), dir.path());
    tracker.resume();
    assert!(tracker.job(GenDomain::SceneVideo, &key).is_some());

    // Grace delay plus sixty attempts at 5s spacing, then exhaustion.
    tokio::time::sleep(Duration::from_secs(60 + 60 * 5 + 5)).await;

    assert_eq!(backend.video_poll_calls.load(Ordering::SeqCst), 60);
    assert!(tracker.job(GenDomain::SceneVideo, &key).is_none());
    let timed_out = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, JobEvent::TimedOut { .. }))
        .count();
    assert_eq!(timed_out, 1);
}

#[tokio::test(start_paused = true)]
async fn test_analysis_failure_reported_from_history() {
    let backend = MockBackend::arc();
    let (_dir, tracker, mut events) = tracker(backend.clone());
    let key = JobKey::analysis("job-7");

    tracker.track_analysis("job-7");
    tracker.notify_refresh(
        GenDomain::VideoAnalysis,
        &[ResourceObservation::failed(key.clone(), "analysis failed")],
    );
    settle().await;

    // Analysis entries stay visible as errors for a retry.
    let job = tracker.job(GenDomain::VideoAnalysis, &key).unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, JobEvent::Failed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_timers_and_polling() {
    let backend = MockBackend::arc();
    let (_dir, tracker, mut events) = tracker(backend.clone());
    let key = JobKey::scene("p-1", 3);

    tracker.start_scene_video("p-1", 3).await.unwrap();
    tracker.cancel(GenDomain::SceneVideo, &key);
    assert!(tracker.is_idle());

    tokio::time::sleep(Duration::from_secs(400)).await;
    assert_eq!(backend.video_poll_calls.load(Ordering::SeqCst), 0);
    let got = drain(&mut events);
    assert!(got.iter().all(|e| !e.is_terminal()));
}

#[tokio::test(start_paused = true)]
async fn test_resume_restores_job_and_deadline() {
    let backend = MockBackend::arc();
    let dir = tempfile::tempdir().unwrap();
    let key = JobKey::character("c-1");

    let started_at = {
        let (tracker, _events) = GenTracker::new(backend.clone(), dir.path());
        tracker.start_character_generation("c-1").await.unwrap();
        let job = tracker.job(GenDomain::CharacterImage, &key).unwrap();
        tracker.dispose_all();
        job.started_at
    };

    let (tracker, mut events) = GenTracker::new(backend.clone(), dir.path());
    tracker.resume();
    let restored = tracker.job(GenDomain::CharacterImage, &key).unwrap();
    assert_eq!(restored.started_at, started_at);
    assert!(restored.is_active());

    // The restored deadline still enforces the original budget.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, JobEvent::TimedOut { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_resumed_job_settles_via_refresh_loop() {
    let backend = MockBackend::arc();
    let dir = tempfile::tempdir().unwrap();
    let key = JobKey::character("c-1");

    {
        let (tracker, _events) = GenTracker::new(backend.clone(), dir.path());
        tracker.start_character_generation("c-1").await.unwrap();
        tracker.dispose_all();
    }

    backend.set_observations(
        GenDomain::CharacterImage,
        vec![ResourceObservation::ready(key.clone(), None)],
    );
    let (tracker, mut events) = GenTracker::new(backend.clone(), dir.path());
    tracker.resume();
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert!(tracker.is_idle());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, JobEvent::Completed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_loop_exits_when_domain_drains() {
    let backend = MockBackend::arc();
    let (_dir, tracker, _events) = tracker(backend.clone());
    let key = JobKey::character("c-1");

    tracker.start_character_generation("c-1").await.unwrap();
    backend.set_observations(
        GenDomain::CharacterImage,
        vec![ResourceObservation::ready(key, None)],
    );
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(tracker.is_idle());

    // With nothing tracked the loop winds down instead of refreshing
    // forever.
    let calls_after_drain = backend.observe_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    let calls_later = backend.observe_calls.load(Ordering::SeqCst);
    assert!(calls_later <= calls_after_drain + 1);
}
