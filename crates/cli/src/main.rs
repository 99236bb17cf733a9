use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use backend_api::StudioClient;
use clap::{Parser, Subcommand};
use gen_jobs::{GenDomain, GenTracker, JobEvent};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

#[derive(Parser)]
#[command(name = "studio-cli")]
#[command(about = "Studio CLI - Drive backend generation jobs from the terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend base URL
    #[arg(long, global = true, env = "STUDIO_BACKEND_URL", default_value = "http://localhost:3001")]
    backend_url: String,

    /// Directory for pending-job snapshots (defaults to the app data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the portrait image for a pending character
    GenerateCharacter {
        /// Character id
        character_id: String,
    },

    /// Adopt a pending character into the library
    AdoptCharacter {
        /// Character id
        character_id: String,
    },

    /// List characters
    Characters {
        /// Show only characters still awaiting adoption
        #[arg(long)]
        pending: bool,

        /// Filter adopted characters by search query
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Generate the first-frame image for a storyboard scene
    GenerateImage {
        /// Project id
        #[arg(short, long)]
        project: String,

        /// Scene id
        scene: i64,
    },

    /// Generate the video for a storyboard scene
    GenerateVideo {
        /// Project id
        #[arg(short, long)]
        project: String,

        /// Scene id
        scene: i64,
    },

    /// Upload a video for virtual-cut scene analysis
    Analyze {
        /// Video file to analyze
        file: PathBuf,
    },

    /// List virtual-cut analysis jobs
    Jobs {
        #[arg(long, default_value = "20")]
        limit: u32,

        #[arg(long, default_value = "0")]
        offset: u32,
    },

    /// Fetch the result of a finished analysis job
    AnalysisResult {
        /// Analysis job id
        job_id: String,
    },

    /// Resume jobs persisted by a previous session and watch them finish
    Resume,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let client = Arc::new(StudioClient::new(&cli.backend_url));
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(gen_jobs::default_storage_dir);

    match cli.command {
        Commands::GenerateCharacter { character_id } => {
            let (tracker, events) = GenTracker::new(client, data_dir);
            tracker.start_character_generation(&character_id).await?;
            watch(&tracker, events).await
        }
        Commands::AdoptCharacter { character_id } => {
            client.adopt_character(&character_id).await?;
            println!("adopted character {character_id}");
            Ok(())
        }
        Commands::Characters { pending, query } => characters_command(&client, pending, query).await,
        Commands::GenerateImage { project, scene } => {
            let (tracker, events) = GenTracker::new(client, data_dir);
            tracker.start_scene_image(&project, scene).await?;
            watch(&tracker, events).await
        }
        Commands::GenerateVideo { project, scene } => {
            let (tracker, events) = GenTracker::new(client, data_dir);
            tracker.start_scene_video(&project, scene).await?;
            watch(&tracker, events).await
        }
        Commands::Analyze { file } => analyze_command(&client, file).await,
        Commands::Jobs { limit, offset } => jobs_command(&client, limit, offset).await,
        Commands::AnalysisResult { job_id } => {
            let result = client.analysis_result(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Resume => {
            let (tracker, events) = GenTracker::new(client, data_dir);
            tracker.resume();
            if all_settled(&tracker) {
                println!("no pending jobs to resume");
                return Ok(());
            }
            watch(&tracker, events).await
        }
    }
}

/// Drain tracker events until every job reaches a terminal state.
async fn watch(tracker: &GenTracker, mut events: UnboundedReceiver<JobEvent>) -> Result<()> {
    while !all_settled(tracker) {
        let Some(event) = events.recv().await else {
            break;
        };
        report(&event);
    }
    // Jobs can settle with their terminal event still queued (the trigger
    // call itself may complete the job); report those too.
    for event in drain_queued(&mut events) {
        report(&event);
    }
    tracker.dispose_all();
    Ok(())
}

fn drain_queued(events: &mut UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    let mut queued = Vec::new();
    while let Ok(event) = events.try_recv() {
        queued.push(event);
    }
    queued
}

/// Error entries linger for retries, so "settled" means no job is still
/// actively generating, not an empty registry.
fn all_settled(tracker: &GenTracker) -> bool {
    GenDomain::ALL
        .iter()
        .all(|domain| tracker.jobs(*domain).iter().all(|job| !job.is_active()))
}

fn report(event: &JobEvent) {
    match event {
        JobEvent::Created { domain, key } => info!(%domain, %key, "job started"),
        JobEvent::StatusChanged {
            key,
            status,
            progress,
            ..
        } => info!(%key, ?status, progress = *progress, "job progress"),
        JobEvent::Completed { domain, key, label } => {
            let name = label.as_deref().unwrap_or("result");
            println!("{domain} {key}: {name} ready");
        }
        JobEvent::Failed { key, message, .. } => {
            println!("{key}: failed: {message}");
        }
        JobEvent::TimedOut { key, .. } => {
            println!("{key}: timed out, please retry");
        }
    }
}

async fn characters_command(
    client: &StudioClient,
    pending: bool,
    query: Option<String>,
) -> Result<()> {
    let rows = if pending {
        client.pending_characters().await?
    } else {
        client.system_characters(query.as_deref()).await?
    };
    if rows.is_empty() {
        println!("no characters");
        return Ok(());
    }
    for row in rows {
        let image = if row.has_image() { "image" } else { "no image" };
        println!("{}  {}  [{}]", row.id, row.name, image);
    }
    Ok(())
}

async fn analyze_command(client: &StudioClient, file: PathBuf) -> Result<()> {
    info!("uploading {:?} for virtual-cut analysis", file);
    let result = client.virtual_cut(&file).await?;
    println!("job {}: {} scenes detected", result.job_id, result.scenes.len());
    for scene in &result.scenes {
        println!(
            "  scene {}: {:.2}s - {:.2}s",
            scene.index, scene.start_time, scene.end_time
        );
    }
    Ok(())
}

async fn jobs_command(client: &StudioClient, limit: u32, offset: u32) -> Result<()> {
    let jobs = client.analysis_jobs(limit, offset).await?;
    if jobs.is_empty() {
        println!("no analysis jobs");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{}  {}  {}  {}",
            job.id, job.status, job.original_filename, job.created_at
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_api::{BackendError, VideoStatusResponse};
    use gen_jobs::{JobKey, ResourceObservation, StudioBackend};

    struct OkBackend;

    #[async_trait::async_trait]
    impl StudioBackend for OkBackend {
        async fn trigger_character_image(&self, _character_id: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn trigger_scene_image(
            &self,
            _project_id: &str,
            _scene_id: i64,
        ) -> Result<(), BackendError> {
            Ok(())
        }

        async fn trigger_scene_video(
            &self,
            _project_id: &str,
            _scene_id: i64,
        ) -> Result<String, BackendError> {
            Ok("vid-1".to_string())
        }

        async fn video_status(
            &self,
            _project_id: &str,
            _scene_id: i64,
            _video_id: &str,
        ) -> Result<VideoStatusResponse, BackendError> {
            Err(BackendError::Decode("not used".to_string()))
        }

        async fn observe(
            &self,
            _domain: GenDomain,
            _keys: &[JobKey],
        ) -> Result<Vec<ResourceObservation>, BackendError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_event_still_queued_after_settling() {
        let dir = tempfile::tempdir().unwrap();
        let (tracker, mut events) = GenTracker::new(Arc::new(OkBackend), dir.path());

        // Scene image settles inside the trigger call, so by the time the
        // watcher checks, the Completed event is still in the channel.
        tracker.start_scene_image("p-1", 3).await.unwrap();
        assert!(all_settled(&tracker));

        let queued = drain_queued(&mut events);
        assert!(queued
            .iter()
            .any(|event| matches!(event, JobEvent::Completed { .. })));
    }
}
