//! Binary entry point for the subtitle extractor.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use subex_core::{
    FfmpegTools, MemoryRecordStore, PipelineConfig, RecordStore, RunReport, SqliteRecordStore,
    SubtitlePipeline, TrackOutcome, Video,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command line options for the binary.
#[derive(Parser)]
struct Cli {
    /// Enable verbose debug and trace logs.
    #[arg(long)]
    debug: bool,

    /// TOML file with pipeline settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Identifier stored with each record. Defaults to the input file stem.
    #[arg(long)]
    video_id: Option<String>,

    /// Directory for the intermediate per-track SRT files.
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// SQLite database receiving the records. Without it records are only printed.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Maximum number of tracks transcoded at once.
    #[arg(long)]
    jobs: Option<usize>,

    /// Video file whose subtitle tracks we extract.
    input: PathBuf,
}

impl Cli {
    /// File settings first, then command line overrides.
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(dir) = &self.staging_dir {
            config.staging_dir = dir.clone();
        }
        if let Some(jobs) = self.jobs {
            config.max_concurrent_transcodes = jobs;
        }
        Ok(config)
    }

    fn video(&self) -> Video {
        let id = self.video_id.clone().unwrap_or_else(|| {
            self.input
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string()
        });
        Video::new(id, &self.input)
    }
}

/// Run the pipeline against `store` and log a per-track summary.
async fn extract<S: RecordStore>(config: &PipelineConfig, video: &Video, store: S) -> Result<RunReport> {
    let tools = FfmpegTools::from_config(config);
    let pipeline = SubtitlePipeline::new(tools.clone(), tools, store, config);
    let report = pipeline
        .run(video)
        .await
        .with_context(|| format!("cannot read subtitle tracks of {}", video.path.display()))?;
    for track in &report.tracks {
        match &track.outcome {
            TrackOutcome::Persisted { .. } | TrackOutcome::Skipped(_) => {
                info!("track {}: {:?}", track.track_index, track.outcome)
            }
            other => warn!("track {}: {:?}", track.track_index, other),
        }
    }
    Ok(report)
}

/// Application entry point which parses CLI args and performs actions.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.debug {
        EnvFilter::default()
            .add_directive("subex=trace".parse()?)
            .add_directive("subex_core=trace".parse()?)
            .add_directive("info".parse()?)
    } else {
        EnvFilter::default()
            .add_directive("subex=info".parse()?)
            .add_directive("subex_core=info".parse()?)
            .add_directive("warn".parse()?)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.pipeline_config()?;
    let video = cli.video();
    let report = match &cli.db {
        Some(path) => extract(&config, &video, SqliteRecordStore::open(path)?).await?,
        None => extract(&config, &video, MemoryRecordStore::new()).await?,
    };
    info!(
        "{} new records for video {}",
        report.records.len(),
        report.video_id
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
