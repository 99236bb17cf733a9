/// Reconciliation of tracked jobs against authoritative backend data
///
/// Observations come from the domain refresh loop or from a caller who
/// fetched the resource themselves (`GenTracker::notify_refresh`). Both
/// paths land here, so a result that arrives through either route settles
/// the job exactly once. Keys that are not tracked are ignored, and
/// `Pending` outcomes change nothing.
use std::sync::Arc;

use crate::backend::ObservedOutcome;
use crate::tracker::TrackerInner;
use crate::{GenDomain, ResourceObservation};

pub(crate) fn apply(
    inner: &Arc<TrackerInner>,
    domain: GenDomain,
    observations: &[ResourceObservation],
) {
    for observation in observations {
        let Some(job) = inner.registry.get(domain, &observation.key) else {
            continue;
        };
        if !job.is_active() {
            continue;
        }
        match &observation.outcome {
            ObservedOutcome::Ready { label } => {
                inner.complete_job(domain, &observation.key, job.entry_id, label.clone());
            }
            ObservedOutcome::Failed { message } => {
                inner.fail_job(domain, &observation.key, job.entry_id, message.clone());
            }
            ObservedOutcome::Pending => {}
        }
    }
}
