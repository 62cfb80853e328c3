use crate::config::GenerationConfig;
use crate::error::PlannerResult;
use crate::prompt_builder::PromptSpec;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

/// Everything an image backend needs for one render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub beat_id: String,
    pub prompt: String,
    pub negatives: String,
    pub seed: u32,
    pub steps: u32,
    pub guidance: f64,
    pub width: u32,
    pub height: u32,
}

impl SynthesisRequest {
    pub fn from_prompt(spec: &PromptSpec, generation: &GenerationConfig) -> Self {
        Self {
            beat_id: spec.beat_id.clone(),
            prompt: spec.prompt.clone(),
            negatives: spec.negative_prompt(),
            seed: spec.seed,
            steps: generation.steps,
            guidance: generation.guidance,
            width: generation.width,
            height: generation.height,
        }
    }
}

/// External pixel synthesis. Returns a reference (path or URL) to the image.
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> PlannerResult<String>;
}

/// Dry-run backend: names an image after the prompt's leading keywords
/// without rendering anything.
#[derive(Debug, Clone)]
pub struct PlaceholderSynthesizer {
    out_dir: PathBuf,
}

impl PlaceholderSynthesizer {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

const PLACEHOLDER_KEYWORDS: usize = 8;

fn prompt_slug(prompt: &str) -> String {
    prompt
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .take(PLACEHOLDER_KEYWORDS)
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

#[async_trait]
impl ImageSynthesizer for PlaceholderSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> PlannerResult<String> {
        let name = format!("{}-{}-{}.png", request.beat_id, request.seed, prompt_slug(&request.prompt));
        Ok(self.out_dir.join(name).to_string_lossy().into_owned())
    }
}
