/// HTTP client for the studio backend
use std::path::Path;

use reqwest::Response;
use tracing::debug;

use crate::{
    AnalysisJob, BackendError, GenerateImageResponse, GenerateVideoResponse, ProjectWithScenes,
    Result, StoryboardScene, SystemCharacter, VideoStatusResponse, VirtualCutResponse,
};

/// Client for the studio backend REST API.
///
/// The base URL is the backend host without a trailing slash, e.g.
/// `http://localhost:3001`; all endpoints live under `/api`.
#[derive(Clone)]
pub struct StudioClient {
    base_url: String,
    client: reqwest::Client,
}

impl StudioClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    /// Resolve a backend-relative media URL to an absolute one, with a
    /// cache-busting timestamp so regenerated media is not served stale.
    pub fn media_url(&self, url: &str, cache_bust: i64) -> String {
        if url.starts_with("http") {
            format!("{url}?t={cache_bust}")
        } else {
            format!("{}{url}?t={cache_bust}", self.base_url)
        }
    }

    /// Turn a non-2xx response into `BackendError::Api`, preferring the
    /// backend's `{ "error": ... }` body over the bare status text.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let fallback = status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
        let message = match response.text().await {
            Ok(body) => serde_json::from_str::<crate::ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.or(b.message))
                .unwrap_or(fallback),
            Err(_) => fallback,
        };
        Err(BackendError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.client.get(self.url(path)).send().await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.client.post(self.url(path)).send().await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    // --- characters ---

    /// Kick off image generation for a pending character. The response
    /// arrives when the backend accepts the job; the image shows up later
    /// on the character row itself.
    pub async fn generate_character_image(&self, character_id: &str) -> Result<GenerateImageResponse> {
        debug!(character_id, "trigger character image generation");
        self.post_json(&format!("characters/{character_id}/generate"))
            .await
    }

    /// Promote a pending character with a generated image into the library.
    pub async fn adopt_character(&self, character_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("characters/{character_id}/adopt")))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Characters awaiting generation or adoption.
    pub async fn pending_characters(&self) -> Result<Vec<SystemCharacter>> {
        self.get_json("characters/pending").await
    }

    /// Adopted library characters, optionally filtered by a search query.
    pub async fn system_characters(&self, query: Option<&str>) -> Result<Vec<SystemCharacter>> {
        let path = match query {
            Some(q) if !q.is_empty() => {
                format!("system-characters?query={}", urlencode(q))
            }
            _ => "system-characters".to_string(),
        };
        self.get_json(&path).await
    }

    // --- projects / scenes ---

    pub async fn project(&self, project_id: &str) -> Result<ProjectWithScenes> {
        self.get_json(&format!("projects/{project_id}")).await
    }

    /// Generate the first-frame image for a scene. Synchronous from the
    /// client's perspective: a 2xx response carries the updated scene.
    pub async fn generate_scene_image(
        &self,
        project_id: &str,
        scene_id: i64,
    ) -> Result<StoryboardScene> {
        debug!(project_id, scene_id, "trigger scene image generation");
        self.post_json(&format!(
            "projects/{project_id}/scenes/{scene_id}/generate-image"
        ))
        .await
    }

    /// Start video generation for a scene. Returns the backend-assigned
    /// video id used to poll `video_status`.
    pub async fn generate_scene_video(
        &self,
        project_id: &str,
        scene_id: i64,
    ) -> Result<GenerateVideoResponse> {
        debug!(project_id, scene_id, "trigger scene video generation");
        self.post_json(&format!(
            "projects/{project_id}/scenes/{scene_id}/generate-video"
        ))
        .await
    }

    pub async fn video_status(
        &self,
        project_id: &str,
        scene_id: i64,
        video_id: &str,
    ) -> Result<VideoStatusResponse> {
        self.get_json(&format!(
            "projects/{project_id}/scenes/{scene_id}/video-status/{video_id}"
        ))
        .await
    }

    // --- video analysis (virtual cut) ---

    /// Upload a video for scene-detection analysis. The backend responds
    /// once analysis finishes; the returned `job_id` also appears in the
    /// analysis history while processing.
    pub async fn virtual_cut(&self, video_path: &Path) -> Result<VirtualCutResponse> {
        let bytes = tokio::fs::read(video_path).await?;
        let file_name = video_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.mp4".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("video", part);

        let response = self
            .client
            .post(self.url("video/virtual-cut"))
            .multipart(form)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    pub async fn analysis_jobs(&self, limit: u32, offset: u32) -> Result<Vec<AnalysisJob>> {
        self.get_json(&format!("jobs?limit={limit}&offset={offset}"))
            .await
    }

    pub async fn analysis_result(&self, job_id: &str) -> Result<VirtualCutResponse> {
        self.get_json(&format!("result/{job_id}")).await
    }
}

/// Minimal percent-encoding for query values (space, reserved and
/// non-ASCII bytes).
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = StudioClient::new("http://localhost:3001///");
        assert_eq!(client.base_url(), "http://localhost:3001");
        assert_eq!(
            client.url("characters/pending"),
            "http://localhost:3001/api/characters/pending"
        );
    }

    #[test]
    fn test_media_url_cache_busting() {
        let client = StudioClient::new("http://localhost:3001");
        assert_eq!(
            client.media_url("/files/a.png", 42),
            "http://localhost:3001/files/a.png?t=42"
        );
        assert_eq!(
            client.media_url("https://cdn.example.com/a.png", 42),
            "https://cdn.example.com/a.png?t=42"
        );
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("hero girl"), "hero%20girl");
        assert_eq!(urlencode("a-b_c.d~e"), "a-b_c.d~e");
    }
}
