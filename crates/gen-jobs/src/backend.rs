/// Backend seam for the tracker
///
/// The tracker never touches HTTP directly; everything it needs from the
/// studio backend goes through this trait, so tests drive the full
/// tracking pipeline with a scripted fake.
use backend_api::{BackendError, VideoStatusResponse};

use crate::{GenDomain, JobKey};

/// What a resource refresh showed for one tracked job.
#[derive(Debug, Clone)]
pub struct ResourceObservation {
    pub key: JobKey,
    pub outcome: ObservedOutcome,
}

#[derive(Debug, Clone)]
pub enum ObservedOutcome {
    /// The expected result field is populated, i.e. the job finished. `label`
    /// names the entity for the completion notice.
    Ready { label: Option<String> },
    /// The authoritative data marks the work as failed.
    Failed { message: String },
    /// Still nothing to see.
    Pending,
}

impl ResourceObservation {
    pub fn ready(key: JobKey, label: Option<String>) -> Self {
        Self {
            key,
            outcome: ObservedOutcome::Ready { label },
        }
    }

    pub fn failed(key: JobKey, message: impl Into<String>) -> Self {
        Self {
            key,
            outcome: ObservedOutcome::Failed {
                message: message.into(),
            },
        }
    }

    pub fn pending(key: JobKey) -> Self {
        Self {
            key,
            outcome: ObservedOutcome::Pending,
        }
    }
}

/// Everything the tracker asks of the studio backend.
#[async_trait::async_trait]
pub trait StudioBackend: Send + Sync {
    /// Start portrait generation for a pending character.
    async fn trigger_character_image(&self, character_id: &str) -> Result<(), BackendError>;

    /// Generate a scene's first-frame image; a 2xx response means done.
    async fn trigger_scene_image(
        &self,
        project_id: &str,
        scene_id: i64,
    ) -> Result<(), BackendError>;

    /// Start scene video generation; returns the backend's `video_id`.
    async fn trigger_scene_video(
        &self,
        project_id: &str,
        scene_id: i64,
    ) -> Result<String, BackendError>;

    /// One direct-poll attempt for an in-flight video.
    async fn video_status(
        &self,
        project_id: &str,
        scene_id: i64,
        video_id: &str,
    ) -> Result<VideoStatusResponse, BackendError>;

    /// Refresh the authoritative resource(s) behind `keys` and report
    /// what they show. Implementations fetch each underlying list or
    /// detail resource once, however many keys point at it.
    async fn observe(
        &self,
        domain: GenDomain,
        keys: &[JobKey],
    ) -> Result<Vec<ResourceObservation>, BackendError>;
}
