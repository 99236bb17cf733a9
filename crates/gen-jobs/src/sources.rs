/// `StudioBackend` over the real HTTP client
///
/// Maps each domain's observation onto the authoritative resource the
/// backend exposes for it: character lists, the project's scene rows, and
/// the analysis history. A key the resource does not (yet) account for
/// reads as pending; only explicit evidence settles a job.
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use backend_api::{BackendError, StudioClient, VideoStatusResponse};

use crate::{GenDomain, JobKey, ResourceObservation};

#[async_trait]
impl crate::StudioBackend for StudioClient {
    async fn trigger_character_image(&self, character_id: &str) -> Result<(), BackendError> {
        self.generate_character_image(character_id).await?;
        Ok(())
    }

    async fn trigger_scene_image(
        &self,
        project_id: &str,
        scene_id: i64,
    ) -> Result<(), BackendError> {
        self.generate_scene_image(project_id, scene_id).await?;
        Ok(())
    }

    async fn trigger_scene_video(
        &self,
        project_id: &str,
        scene_id: i64,
    ) -> Result<String, BackendError> {
        let response = self.generate_scene_video(project_id, scene_id).await?;
        Ok(response.video_id)
    }

    async fn video_status(
        &self,
        project_id: &str,
        scene_id: i64,
        video_id: &str,
    ) -> Result<VideoStatusResponse, BackendError> {
        StudioClient::video_status(self, project_id, scene_id, video_id).await
    }

    async fn observe(
        &self,
        domain: GenDomain,
        keys: &[JobKey],
    ) -> Result<Vec<ResourceObservation>, BackendError> {
        match domain {
            GenDomain::CharacterImage => self.observe_characters(keys).await,
            GenDomain::SceneImage => self.observe_scene_images(keys).await,
            // Scene videos are settled by their dedicated status poller.
            GenDomain::SceneVideo => Ok(Vec::new()),
            GenDomain::VideoAnalysis => self.observe_analysis(keys).await,
        }
    }
}

const ANALYSIS_PAGE_SIZE: u32 = 50;

#[async_trait]
trait StudioClientObservations {
    async fn observe_characters(
        &self,
        keys: &[JobKey],
    ) -> Result<Vec<ResourceObservation>, BackendError>;
    async fn observe_scene_images(
        &self,
        keys: &[JobKey],
    ) -> Result<Vec<ResourceObservation>, BackendError>;
    async fn observe_analysis(
        &self,
        keys: &[JobKey],
    ) -> Result<Vec<ResourceObservation>, BackendError>;
}

#[async_trait]
impl StudioClientObservations for StudioClient {
    /// A character job is done once its row, in either the pending or the
    /// adopted list, carries an image URL.
    async fn observe_characters(
        &self,
        keys: &[JobKey],
    ) -> Result<Vec<ResourceObservation>, BackendError> {
        let mut rows = self.pending_characters().await?;
        rows.extend(self.system_characters(None).await?);
        let by_id: HashMap<&str, &backend_api::SystemCharacter> =
            rows.iter().map(|c| (c.id.as_str(), c)).collect();

        let observations = keys
            .iter()
            .map(|key| match key {
                JobKey::Character { id } => match by_id.get(id.as_str()) {
                    Some(row) if row.has_image() => {
                        ResourceObservation::ready(key.clone(), Some(row.name.clone()))
                    }
                    _ => ResourceObservation::pending(key.clone()),
                },
                other => ResourceObservation::pending(other.clone()),
            })
            .collect();
        Ok(observations)
    }

    /// A scene image job is done once the scene row's `latest_image_url`
    /// is populated. Each project is fetched once per refresh no matter
    /// how many of its scenes are generating.
    async fn observe_scene_images(
        &self,
        keys: &[JobKey],
    ) -> Result<Vec<ResourceObservation>, BackendError> {
        let project_ids: HashSet<&str> = keys
            .iter()
            .filter_map(|key| match key {
                JobKey::Scene { project_id, .. } => Some(project_id.as_str()),
                _ => None,
            })
            .collect();

        let mut image_ready: HashSet<(String, i64)> = HashSet::new();
        for project_id in project_ids {
            let detail = self.project(project_id).await?;
            for scene in detail.scenes {
                let ready = scene
                    .latest_image_url
                    .as_deref()
                    .map_or(false, |url| !url.is_empty());
                if ready {
                    image_ready.insert((scene.project_id, scene.id));
                }
            }
        }

        let observations = keys
            .iter()
            .map(|key| match key {
                JobKey::Scene {
                    project_id,
                    scene_id,
                } if image_ready.contains(&(project_id.clone(), *scene_id)) => {
                    ResourceObservation::ready(key.clone(), None)
                }
                other => ResourceObservation::pending(other.clone()),
            })
            .collect();
        Ok(observations)
    }

    /// Analysis jobs report their own status in the history list.
    async fn observe_analysis(
        &self,
        keys: &[JobKey],
    ) -> Result<Vec<ResourceObservation>, BackendError> {
        let rows = self.analysis_jobs(ANALYSIS_PAGE_SIZE, 0).await?;
        let by_id: HashMap<&str, &backend_api::AnalysisJob> =
            rows.iter().map(|j| (j.id.as_str(), j)).collect();

        let observations = keys
            .iter()
            .map(|key| match key {
                JobKey::Analysis { job_id } => match by_id.get(job_id.as_str()) {
                    Some(row) if row.is_completed() => {
                        ResourceObservation::ready(key.clone(), Some(row.original_filename.clone()))
                    }
                    Some(row) if row.is_failed() => {
                        ResourceObservation::failed(key.clone(), "video analysis failed")
                    }
                    _ => ResourceObservation::pending(key.clone()),
                },
                other => ResourceObservation::pending(other.clone()),
            })
            .collect();
        Ok(observations)
    }
}
