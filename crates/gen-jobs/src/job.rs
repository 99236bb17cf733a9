/// Job identity and state
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::GenDomain;

/// Identifies one tracked job within its domain. Serialized through its
/// string form so it can key a persisted JSON map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum JobKey {
    Character { id: String },
    Scene { project_id: String, scene_id: i64 },
    Analysis { job_id: String },
}

impl JobKey {
    pub fn character(id: impl Into<String>) -> Self {
        JobKey::Character { id: id.into() }
    }

    pub fn scene(project_id: impl Into<String>, scene_id: i64) -> Self {
        JobKey::Scene {
            project_id: project_id.into(),
            scene_id,
        }
    }

    pub fn analysis(job_id: impl Into<String>) -> Self {
        JobKey::Analysis {
            job_id: job_id.into(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKey::Character { id } => write!(f, "char:{id}"),
            JobKey::Scene {
                project_id,
                scene_id,
            } => write!(f, "scene:{project_id}:{scene_id}"),
            JobKey::Analysis { job_id } => write!(f, "analysis:{job_id}"),
        }
    }
}

impl From<JobKey> for String {
    fn from(key: JobKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for JobKey {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let (kind, rest) = raw
            .split_once(':')
            .ok_or_else(|| format!("malformed job key: {raw}"))?;
        match kind {
            "char" => Ok(JobKey::character(rest)),
            "analysis" => Ok(JobKey::analysis(rest)),
            "scene" => {
                // scene:{project}:{scene_id}; project ids contain no ':'.
                let (project_id, scene_id) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| format!("malformed scene key: {raw}"))?;
                let scene_id = scene_id
                    .parse::<i64>()
                    .map_err(|_| format!("malformed scene id in key: {raw}"))?;
                Ok(JobKey::scene(project_id, scene_id))
            }
            _ => Err(format!("unknown job key kind: {raw}")),
        }
    }
}

/// Client-side status of a tracked job. Completed jobs are never stored:
/// the registry drops them and completion is visible on the resource
/// itself, so "absent from registry" reads as "not generating".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Initializing,
    Processing,
    Error,
}

impl JobStatus {
    /// Error entries only linger for the retry affordance; everything
    /// else counts as actively generating.
    pub fn is_active(&self) -> bool {
        !matches!(self, JobStatus::Error)
    }
}

/// One in-flight generation tracked by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingJob {
    pub key: JobKey,
    pub domain: GenDomain,
    /// Fresh per-entry guard: a timer or poll task only acts if the entry
    /// it was armed for is still the one in the registry.
    pub entry_id: Uuid,
    /// Epoch milliseconds at creation; immutable for the entry lifetime.
    pub started_at: i64,
    pub status: JobStatus,
    /// Percent [0,100]; only meaningful for domains whose status endpoint
    /// reports progress (scene-video).
    pub progress: u8,
    pub error: Option<String>,
    /// Backend-assigned id needed to poll (scene-video's `video_id`).
    pub external_id: Option<String>,
}

impl PendingJob {
    pub fn new(domain: GenDomain, key: JobKey) -> Self {
        Self {
            key,
            domain,
            entry_id: Uuid::new_v4(),
            started_at: now_ms(),
            status: JobStatus::Initializing,
            progress: 0,
            error: None,
            external_id: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Absolute deadline (epoch ms) for the timeout enforcer.
    pub fn deadline_ms(&self) -> i64 {
        self.started_at + self.domain.timeout().as_millis() as i64
    }

    pub fn elapsed_ms(&self) -> i64 {
        now_ms() - self.started_at
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Error;
        self.error = Some(message.into());
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
