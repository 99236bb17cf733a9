/// Job domains and their per-domain tracking policy
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A family of generation jobs sharing the same completion-detection
/// strategy, timeout and poll cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenDomain {
    /// Pending-character portrait generation. Indirect: completion shows
    /// up as a populated `image_url` on the refreshed character list.
    CharacterImage,
    /// Storyboard first-frame generation. The trigger call itself
    /// completes the job; the indirect loop covers jobs restored after a
    /// reload whose response was lost.
    SceneImage,
    /// Storyboard video generation. Direct: polled through the per-video
    /// status endpoint.
    SceneVideo,
    /// Virtual-cut scene analysis. Indirect via the analysis job history.
    VideoAnalysis,
}

impl GenDomain {
    pub const ALL: [GenDomain; 4] = [
        GenDomain::CharacterImage,
        GenDomain::SceneImage,
        GenDomain::SceneVideo,
        GenDomain::VideoAnalysis,
    ];

    /// Client-side deadline for a job in this domain.
    pub fn timeout(&self) -> Duration {
        match self {
            GenDomain::CharacterImage => Duration::from_secs(60),
            GenDomain::SceneImage => Duration::from_secs(180),
            GenDomain::SceneVideo => Duration::from_secs(300),
            GenDomain::VideoAnalysis => Duration::from_secs(300),
        }
    }

    /// Maximum age of a persisted record before it is discarded on load.
    /// Deadline plus one minute of grace, so a live job always survives a
    /// reload but records from long-dead sessions never resurrect.
    pub fn safety_window(&self) -> Duration {
        self.timeout() + Duration::from_secs(60)
    }

    /// Cadence of the indirect refresh loop while jobs are active.
    pub fn poll_interval(&self) -> Duration {
        match self {
            GenDomain::CharacterImage | GenDomain::SceneImage => Duration::from_secs(3),
            GenDomain::SceneVideo | GenDomain::VideoAnalysis => Duration::from_secs(5),
        }
    }

    /// Whether completion is detected through the per-job status endpoint
    /// rather than resource refreshes.
    pub fn uses_direct_polling(&self) -> bool {
        matches!(self, GenDomain::SceneVideo)
    }

    /// Whether failed jobs stay in the registry as `Error` entries (retry
    /// affordance) instead of being removed with a one-time notice.
    pub fn retains_error_entries(&self) -> bool {
        matches!(self, GenDomain::CharacterImage | GenDomain::VideoAnalysis)
    }

    /// Snapshot file stem for this domain.
    pub fn storage_key(&self) -> &'static str {
        match self {
            GenDomain::CharacterImage => "character-image",
            GenDomain::SceneImage => "scene-image",
            GenDomain::SceneVideo => "scene-video",
            GenDomain::VideoAnalysis => "video-analysis",
        }
    }
}

impl std::fmt::Display for GenDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.storage_key())
    }
}

/// Delay before the first direct-poll attempt; video generation never
/// finishes faster than this, so earlier calls are wasted.
pub(crate) const DIRECT_POLL_GRACE: Duration = Duration::from_secs(60);

/// Spacing between direct-poll attempts.
pub(crate) const DIRECT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on direct-poll attempts before the job is treated as timed
/// out, even if the backend keeps answering with non-terminal statuses.
pub(crate) const DIRECT_POLL_MAX_ATTEMPTS: u32 = 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_window_exceeds_timeout() {
        for domain in GenDomain::ALL {
            assert!(domain.safety_window() > domain.timeout());
        }
    }

    #[test]
    fn test_direct_polling_only_for_scene_video() {
        assert!(GenDomain::SceneVideo.uses_direct_polling());
        assert!(!GenDomain::CharacterImage.uses_direct_polling());
        assert!(!GenDomain::SceneImage.uses_direct_polling());
        assert!(!GenDomain::VideoAnalysis.uses_direct_polling());
    }
}
