use ai_doc_visuals::config::Config;
use ai_doc_visuals::init;
use ai_doc_visuals::pipeline::{Collaborators, PipelineRequest, run_pipeline, write_artifacts};
use ai_doc_visuals::synth::PlaceholderSynthesizer;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config.json";

/// Plan documentary visuals for a narration script.
#[derive(Parser, Debug)]
#[command(name = "doc-visuals", version)]
struct Args {
    /// Narration text file
    #[arg(short, long)]
    narration: PathBuf,

    /// Topic key used for style templates, adapters and QA thresholds
    #[arg(short, long, default_value = "default")]
    topic: String,

    /// JSON config (defaults to ./config.json when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Narration audio; its duration drives the timeline
    #[arg(short, long)]
    audio: Option<PathBuf>,

    /// Narration length in seconds, overriding audio probing
    #[arg(long)]
    duration: Option<f64>,

    /// Output directory for plan, prompts, QA report and timeline
    #[arg(short, long, default_value = "output")]
    out: PathBuf,

    /// Plan locally without calling the remote plan generator
    #[arg(long)]
    offline: bool,
}

async fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p).await,
        None if PathBuf::from(DEFAULT_CONFIG).exists() => Config::load(DEFAULT_CONFIG).await,
        None => {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = load_config(args.config.as_ref()).await?;

    init::ensure_directories(&args.out).await?;
    if args.audio.is_some() && args.duration.is_none() && !init::check_ffprobe().await {
        tracing::warn!("ffprobe not found in PATH; narration length will be estimated");
    }

    let narration = tokio::fs::read_to_string(&args.narration)
        .await
        .with_context(|| format!("Failed to read narration: {}", args.narration.display()))?;

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let synthesizer = Arc::new(PlaceholderSynthesizer::new(args.out.join(init::IMAGES_DIR)));
    let collaborators = Collaborators::from_config(&cfg, &client, synthesizer, args.offline);

    let request = PipelineRequest {
        narration,
        topic: args.topic,
        audio_path: args.audio,
        total_duration_s: args.duration,
    };

    let output = run_pipeline(&cfg, &request, &collaborators).await?;
    write_artifacts(&args.out, &output).await?;

    let summary = &output.qa.summary;
    tracing::info!(
        beats = output.plan.beats.len(),
        passed = summary.passed,
        failed = summary.failed_final,
        "done: {}",
        args.out.display()
    );
    Ok(())
}
