use crate::plan::ShotType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub continuity: ContinuityConfig,
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub qa: QaConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub style_templates: HashMap<String, StyleTemplate>,
    #[serde(default)]
    pub topic_adapters: HashMap<String, TopicAdapter>,
    #[serde(default)]
    pub openai: Option<OpenAiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_beat_target")]
    pub beat_target_seconds: [f64; 2],
    #[serde(default = "default_min_beat_s")]
    pub min_beat_s: f64,
    #[serde(default = "default_max_beat_s")]
    pub max_beat_s: f64,
    #[serde(default = "default_words_per_second")]
    pub words_per_second: f64,
    #[serde(default = "default_shot_types")]
    pub shot_types: Vec<ShotType>,
    #[serde(default = "default_max_consecutive_shot")]
    pub max_consecutive_shot: usize,
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,
    #[serde(default = "default_generator_timeout_secs")]
    pub generator_timeout_secs: u64,
    #[serde(default)]
    pub normalize_render_shots: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            beat_target_seconds: default_beat_target(),
            min_beat_s: default_min_beat_s(),
            max_beat_s: default_max_beat_s(),
            words_per_second: default_words_per_second(),
            shot_types: default_shot_types(),
            max_consecutive_shot: default_max_consecutive_shot(),
            max_prompt_tokens: default_max_prompt_tokens(),
            generator_timeout_secs: default_generator_timeout_secs(),
            normalize_render_shots: false,
        }
    }
}

impl PlannerConfig {
    pub fn target_midpoint(&self) -> f64 {
        (self.beat_target_seconds[0] + self.beat_target_seconds[1]) * 0.5
    }
}

fn default_beat_target() -> [f64; 2] {
    [8.0, 12.0]
}

fn default_min_beat_s() -> f64 {
    6.0
}

fn default_max_beat_s() -> f64 {
    15.0
}

fn default_words_per_second() -> f64 {
    2.5
}

fn default_shot_types() -> Vec<ShotType> {
    ShotType::ALL.to_vec()
}

fn default_max_consecutive_shot() -> usize {
    2
}

fn default_max_prompt_tokens() -> usize {
    75
}

fn default_generator_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuityConfig {
    #[serde(default = "default_seed_namespace")]
    pub seed_namespace: String,
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            seed_namespace: default_seed_namespace(),
        }
    }
}

fn default_seed_namespace() -> String {
    "doc_longform".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignerKind {
    #[default]
    Proportional,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentConfig {
    #[serde(default)]
    pub source: AlignerKind,
}

/// Which captioner the QA loop talks to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptionerKind {
    #[default]
    Stub,
    Http { endpoint: String },
}

/// Which similarity scorer the QA loop talks to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimilarityKind {
    #[default]
    Stub,
    Http { endpoint: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaConfig {
    #[serde(default = "default_threshold")]
    pub caption_similarity_threshold: f64,
    #[serde(default = "default_topic_thresholds")]
    pub topic_thresholds: HashMap<String, f64>,
    #[serde(default = "default_fallback_order")]
    pub fallback_shot_order: Vec<ShotType>,
    #[serde(default = "default_max_retries")]
    pub max_retries_per_beat: usize,
    #[serde(default = "default_true")]
    pub deterministic_retry: bool,
    #[serde(default)]
    pub captioner: CaptionerKind,
    #[serde(default)]
    pub similarity: SimilarityKind,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            caption_similarity_threshold: default_threshold(),
            topic_thresholds: default_topic_thresholds(),
            fallback_shot_order: default_fallback_order(),
            max_retries_per_beat: default_max_retries(),
            deterministic_retry: true,
            captioner: CaptionerKind::default(),
            similarity: SimilarityKind::default(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f64 {
    0.62
}

fn default_topic_thresholds() -> HashMap<String, f64> {
    [
        ("mythology", 0.70),
        ("history", 0.68),
        ("science", 0.60),
        ("space", 0.62),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn default_fallback_order() -> Vec<ShotType> {
    vec![ShotType::Diagram, ShotType::Map, ShotType::Insert]
}

fn default_max_retries() -> usize {
    2
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_guidance")]
    pub guidance: f64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            guidance: default_guidance(),
            width: default_width(),
            height: default_height(),
        }
    }
}

fn default_steps() -> u32 {
    20
}

fn default_guidance() -> f64 {
    7.5
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleTemplate {
    pub base_style: String,
    pub colors: String,
    pub mood: String,
}

impl Default for StyleTemplate {
    fn default() -> Self {
        Self {
            base_style: "cinematic, high quality, professional".to_string(),
            colors: "balanced, natural".to_string(),
            mood: "engaging, clear, informative".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicAdapter {
    #[serde(default)]
    pub negatives: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default, rename = "open_api_key")]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;

        if let Some(openai) = config.openai.as_mut() {
            if openai.api_key.is_empty() {
                openai.api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.planner;
        let [tmin, tmax] = p.beat_target_seconds;
        if !(tmin > 0.0 && tmin <= tmax) {
            anyhow::bail!("config: planner.beat_target_seconds must satisfy 0 < min <= max");
        }
        if !(p.min_beat_s > 0.0 && p.min_beat_s <= p.max_beat_s) {
            anyhow::bail!("config: planner.min_beat_s must be positive and <= max_beat_s");
        }
        if p.words_per_second <= 0.0 {
            anyhow::bail!("config: planner.words_per_second must be positive");
        }
        if p.shot_types.is_empty() {
            anyhow::bail!("config: planner.shot_types is empty");
        }
        if p.max_consecutive_shot == 0 {
            anyhow::bail!("config: planner.max_consecutive_shot must be at least 1");
        }
        if p.max_prompt_tokens == 0 {
            anyhow::bail!("config: planner.max_prompt_tokens must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.qa.caption_similarity_threshold) {
            anyhow::bail!("config: qa.caption_similarity_threshold must be within [0, 1]");
        }
        if let Some((topic, _)) = self
            .qa
            .topic_thresholds
            .iter()
            .find(|(_, v)| !(0.0..=1.0).contains(*v))
        {
            anyhow::bail!("config: qa.topic_thresholds.{topic} must be within [0, 1]");
        }
        if self.qa.concurrency == 0 {
            anyhow::bail!("config: qa.concurrency must be at least 1");
        }
        if self.continuity.seed_namespace.is_empty() {
            anyhow::bail!("config: continuity.seed_namespace missing");
        }
        Ok(())
    }

    pub fn style_for_topic(&self, topic: &str) -> StyleTemplate {
        self.style_templates
            .get(topic)
            .or_else(|| self.style_templates.get("default"))
            .cloned()
            .unwrap_or_default()
    }

    pub fn adapter_for_topic(&self, topic: &str) -> TopicAdapter {
        self.topic_adapters
            .get(topic)
            .or_else(|| self.topic_adapters.get("default"))
            .cloned()
            .unwrap_or_default()
    }

    pub fn threshold_for_topic(&self, topic: &str) -> f64 {
        self.qa
            .topic_thresholds
            .get(topic)
            .copied()
            .unwrap_or(self.qa.caption_similarity_threshold)
    }
}
