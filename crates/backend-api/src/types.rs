/// Wire types for the studio backend
///
/// Field names mirror the backend's JSON exactly; everything the backend
/// may omit or null out is an `Option`.
use serde::{Deserialize, Serialize};

/// A character in the shared library. `status` is 0 while the character is
/// pending (no adopted image yet) and 1 once adopted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCharacter {
    pub id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub prompt: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: i32,
    pub derived_from: Option<String>,
    pub created_at: String,
}

impl SystemCharacter {
    /// Whether generation has produced an image for this character yet.
    pub fn has_image(&self) -> bool {
        self.image_url.as_deref().map_or(false, |u| !u.is_empty())
    }
}

/// Project header row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub script: Option<String>,
    pub project_type: Option<String>,
    pub cover_image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One storyboard scene. `latest_image_url` / `latest_video_url` are the
/// authoritative "is the result there yet" fields the reconciler checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryboardScene {
    pub id: i64,
    pub project_id: String,
    pub scene_index: i32,
    pub duration: Option<f64>,
    pub first_frame_prompt: Option<String>,
    pub video_prompt: Option<String>,
    pub latest_image_url: Option<String>,
    pub latest_video_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// `GET /api/projects/{id}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectWithScenes {
    pub project: Project,
    pub scenes: Vec<StoryboardScene>,
}

/// `POST /api/characters/{id}/generate` response.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateImageResponse {
    pub image_url: Option<String>,
}

/// `POST /api/projects/{p}/scenes/{s}/generate-video` response. Completion
/// is signaled later through the video-status endpoint, not this call.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateVideoResponse {
    pub video_id: String,
}

/// Closed status for an in-flight video generation, mapped from the
/// backend's loose status strings. Unknown strings map to `Processing`:
/// completion must be an explicit allow-listed value, never a guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoJobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl VideoJobStatus {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "queued" => Self::Queued,
            "completed" => Self::Completed,
            "failed" | "error" => Self::Failed,
            _ => Self::Processing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// `GET /api/projects/{p}/scenes/{s}/video-status/{v}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoStatusResponse {
    pub status: String,
    pub progress: Option<u8>,
    pub video_url: Option<String>,
    pub error: Option<String>,
}

impl VideoStatusResponse {
    pub fn classify(&self) -> VideoJobStatus {
        VideoJobStatus::from_wire(&self.status)
    }
}

/// One row of the virtual-cut analysis history (`GET /api/jobs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: String,
    pub original_filename: String,
    pub file_size_bytes: u64,
    pub duration_seconds: Option<f64>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl AnalysisJob {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    pub fn is_failed(&self) -> bool {
        self.status == "failed" || self.status == "error"
    }
}

/// Detected scene inside a virtual-cut result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedScene {
    pub index: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub start_timestamp: String,
    pub end_timestamp: String,
    pub video_url: String,
    pub frame_count: u64,
}

/// `POST /api/video/virtual-cut` / `GET /api/result/{job_id}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualCutResponse {
    pub job_id: String,
    pub total_scenes: u32,
    pub scenes: Vec<DetectedScene>,
    pub video_url: String,
    pub original_filename: String,
}

/// Error body the backend attaches to non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
}
