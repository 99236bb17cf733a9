/// Client-side deadlines for tracked jobs
///
/// Each job gets one timer armed from its original `started_at`, so a
/// deadline keeps counting across reloads. Firing is guarded by the
/// entry id: a timer belonging to a superseded entry does nothing.
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::tracker::TrackerInner;
use crate::{now_ms, GenDomain, JobEvent, JobKey, PendingJob};

pub(crate) const TIMEOUT_MESSAGE: &str = "generation timed out, please retry";

/// Spawn the deadline timer for `job` and record its handle. The sleep
/// is the remaining time until `deadline_ms`, which is zero or negative
/// for jobs restored past their deadline; those fire immediately.
pub(crate) fn arm(inner: &Arc<TrackerInner>, job: &PendingJob) {
    let remaining = Duration::from_millis((job.deadline_ms() - now_ms()).max(0) as u64);
    let domain = job.domain;
    let key = job.key.clone();
    let entry_id = job.entry_id;

    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(remaining).await;
        fire(&task_inner, domain, key, entry_id);
    });
    inner.tasks.lock().set_timeout(domain, job.key.clone(), handle);
}

/// Apply timeout policy to the entry armed with `entry_id`, if it is
/// still live and still generating. Also invoked by the direct poller
/// when it runs out of attempts.
pub(crate) fn fire(inner: &Arc<TrackerInner>, domain: GenDomain, key: JobKey, entry_id: Uuid) {
    let Some(job) = inner.registry.get(domain, &key) else {
        return;
    };
    if job.entry_id != entry_id || !job.is_active() {
        return;
    }

    // The guarded mutation is the authoritative check; if it no-ops the
    // entry was superseded after the read above, and the new entry's
    // timers must be left alone.
    let applied = if domain.retains_error_entries() {
        inner
            .registry
            .update_if(domain, &key, entry_id, |entry| {
                entry.set_error(TIMEOUT_MESSAGE);
            })
            .is_some()
    } else {
        inner.registry.remove_if(domain, &key, entry_id).is_some()
    };
    if !applied {
        return;
    }
    warn!(%domain, %key, elapsed_ms = job.elapsed_ms(), "job deadline elapsed");
    inner.cancel_tasks(domain, &key);
    inner.emit(JobEvent::TimedOut { domain, key });
}
