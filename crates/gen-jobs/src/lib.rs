/// Client-side tracking for asynchronous generation jobs
///
/// The studio backend runs every generation (character images, storyboard
/// first frames, scene videos, virtual-cut analysis) out of band. This
/// crate is the client's view of that work: a persisted registry of
/// in-flight jobs, pollers that watch for outcomes, per-job deadline
/// enforcement, and reconciliation against fresh resource data arriving
/// through the normal loading path.
///
/// Four job domains exist, differing in how completion is detected:
/// character-image, scene-image and video-analysis are *indirect* (the
/// authoritative resource list is refreshed and inspected), scene-video is
/// *direct* (a per-job status endpoint keyed by a backend-assigned id).
use thiserror::Error;

mod domain;
pub use domain::GenDomain;

mod job;
pub use job::{now_ms, JobKey, JobStatus, PendingJob};

mod events;
pub use events::JobEvent;

mod snapshot;
pub use snapshot::{PersistedJob, SnapshotStore};

mod registry;
pub use registry::JobRegistry;

mod backend;
pub use backend::{ObservedOutcome, ResourceObservation, StudioBackend};

mod reconcile;
mod timeout;

mod poller;

mod tracker;
pub use tracker::GenTracker;

mod sources;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Backend(#[from] backend_api::BackendError),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

/// Default snapshot directory, under the platform-local app data dir.
pub fn default_storage_dir() -> std::path::PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("studio_client").join("pending_jobs")
}
