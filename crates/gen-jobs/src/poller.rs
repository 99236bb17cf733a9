/// Polling drivers
///
/// Two shapes of polling. Indirect domains run one shared refresh loop
/// per domain that re-fetches the authoritative resource and hands the
/// observations to reconciliation; the loop exits once the domain has no
/// active jobs. Scene videos instead get a dedicated per-job task against
/// the video status endpoint, with a grace delay before the first attempt
/// and a hard attempt budget.
use std::sync::Arc;
use std::time::Duration;

use backend_api::VideoJobStatus;
use tracing::{debug, warn};

use crate::domain::{DIRECT_POLL_INTERVAL, DIRECT_POLL_MAX_ATTEMPTS};
use crate::tracker::TrackerInner;
use crate::{reconcile, timeout, GenDomain, JobKey, JobStatus, PendingJob};

/// Start the shared refresh loop for an indirect-polling domain if it is
/// not already running. Idempotent; callers invoke it on every create.
pub(crate) fn ensure_refresh_loop(inner: &Arc<TrackerInner>, domain: GenDomain) {
    let mut tasks = inner.tasks.lock();
    if tasks.loop_running(domain) {
        return;
    }
    let loop_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        refresh_loop(loop_inner, domain).await;
    });
    tasks.set_loop(domain, handle);
}

async fn refresh_loop(inner: Arc<TrackerInner>, domain: GenDomain) {
    let interval = domain.poll_interval();
    loop {
        tokio::time::sleep(interval).await;

        let keys = inner.registry.active_keys(domain);
        if keys.is_empty() {
            // Re-check under the task lock so a create racing with this
            // exit either keeps this loop alive or starts a fresh one.
            let mut tasks = inner.tasks.lock();
            if inner.registry.active_keys(domain).is_empty() {
                tasks.clear_loop(domain);
                return;
            }
            continue;
        }

        match inner.backend.observe(domain, &keys).await {
            Ok(observations) => reconcile::apply(&inner, domain, &observations),
            // Any refresh failure is treated as transient; the deadline
            // timer bounds how long we keep retrying.
            Err(error) => warn!(%domain, %error, "resource refresh failed, will retry"),
        }
    }
}

/// Spawn the dedicated status poller for one scene video job. `job` must
/// carry the backend's video id in `external_id`.
pub(crate) fn spawn_video_poll(inner: &Arc<TrackerInner>, job: &PendingJob, initial_delay: Duration) {
    let JobKey::Scene {
        ref project_id,
        scene_id,
    } = job.key
    else {
        warn!(key = %job.key, "video poll requested for a non-scene key");
        return;
    };
    let Some(video_id) = job.external_id.clone() else {
        warn!(key = %job.key, "video poll requested without a video id");
        return;
    };

    let domain = job.domain;
    let key = job.key.clone();
    let entry_id = job.entry_id;
    let project_id = project_id.clone();

    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(initial_delay).await;

        for attempt in 1..=DIRECT_POLL_MAX_ATTEMPTS {
            if !task_inner.registry.entry_matches(domain, &key, entry_id) {
                return;
            }
            match task_inner
                .backend
                .video_status(&project_id, scene_id, &video_id)
                .await
            {
                Ok(response) => match response.classify() {
                    VideoJobStatus::Completed => {
                        task_inner.complete_job(domain, &key, entry_id, None);
                        return;
                    }
                    VideoJobStatus::Failed => {
                        let message = response
                            .error
                            .unwrap_or_else(|| "video generation failed".to_string());
                        task_inner.fail_job(domain, &key, entry_id, message);
                        return;
                    }
                    status => {
                        let mapped = match status {
                            VideoJobStatus::Queued => JobStatus::Queued,
                            _ => JobStatus::Processing,
                        };
                        let progress = response.progress.unwrap_or(0).min(100);
                        task_inner.set_status(domain, &key, entry_id, mapped, progress);
                    }
                },
                // A failed poll attempt proves nothing about the job;
                // keep going until the deadline or the attempt budget.
                Err(error) => {
                    debug!(%key, attempt, %error, "video status poll failed, will retry")
                }
            }
            tokio::time::sleep(DIRECT_POLL_INTERVAL).await;
        }

        // Attempt budget exhausted without a terminal answer.
        timeout::fire(&task_inner, domain, key, entry_id);
    });
    inner.tasks.lock().set_poll(domain, job.key.clone(), handle);
}
