use crate::beat_planner::diversity_ok;
use crate::config::{CaptionerKind, Config, GenerationConfig, SimilarityKind};
use crate::error::{PlannerError, PlannerResult};
use crate::plan::ShotType;
use crate::prompt_builder::PromptSpec;
use crate::seed::seed_for_image;
use crate::synth::{ImageSynthesizer, SynthesisRequest};
use crate::{logi, logw};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Caption terms that mark a render as sculpture or artifact instead of a
/// living figure. Any hit forces the similarity to zero.
pub const DENYLIST: &[&str] = &[
    "statue",
    "wax",
    "doll",
    "engraving",
    "plaster",
    "sculpture",
    "figurine",
    "mannequin",
];

const CAPTION_STOPWORDS: &[&str] = &["image", "photo", "picture", "drawing", "painting"];

const DIVERSITY_AUDIT_WINDOW: usize = 8;
const DIVERSITY_AUDIT_RATIO: f64 = 0.4;

#[async_trait]
pub trait Captioner: Send + Sync {
    fn name(&self) -> &'static str;

    async fn caption(&self, image: &str) -> PlannerResult<String>;
}

#[async_trait]
pub trait SimilarityScorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Similarity of two texts in `[0, 1]`.
    async fn similarity(&self, a: &str, b: &str) -> PlannerResult<f64>;
}

/// Derives a caption from the image file name.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubCaptioner;

#[async_trait]
impl Captioner for StubCaptioner {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn caption(&self, image: &str) -> PlannerResult<String> {
        Ok(stub_caption(image))
    }
}

pub fn stub_caption(image: &str) -> String {
    let stem = Path::new(image)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.replace(['_', '-'], " ")
        .split_whitespace()
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercases a model caption and strips generic medium words. "statue" and
/// friends stay so the denylist still sees them.
pub fn normalize_caption(raw: &str) -> String {
    raw.to_lowercase()
        .split(|c: char| c.is_whitespace() || c == ',' || c == '.')
        .filter(|w| !w.is_empty())
        .filter(|w| {
            let bare = w.trim_end_matches('s');
            !CAPTION_STOPWORDS.contains(w) && !CAPTION_STOPWORDS.contains(&bare)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Captioning model behind an HTTP endpoint: `{"image": ..}` in,
/// `{"caption": ..}` out.
#[derive(Debug, Clone)]
pub struct HttpCaptioner {
    client: Client,
    endpoint: String,
}

impl HttpCaptioner {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Deserialize)]
struct CaptionResponse {
    caption: String,
}

#[async_trait]
impl Captioner for HttpCaptioner {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn caption(&self, image: &str) -> PlannerResult<String> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "image": image }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PlannerError::Captioner(format!("HTTP {}", status.as_u16())));
        }
        let body: CaptionResponse = resp.json().await?;
        Ok(normalize_caption(&body.caption))
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// `|A ∩ B| / sqrt(|A| * |B|)` over lowercase word sets.
pub fn overlap_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (word_set(a), word_set(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count() as f64;
    (shared / ((a.len() * b.len()) as f64).sqrt()).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StubScorer;

#[async_trait]
impl SimilarityScorer for StubScorer {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn similarity(&self, a: &str, b: &str) -> PlannerResult<f64> {
        Ok(overlap_similarity(a, b))
    }
}

/// Embedding model behind an HTTP endpoint: `{"texts": [a, b]}` in,
/// `{"embeddings": [[..], [..]]}` out. Scores by cosine similarity.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingScorer {
    client: Client,
    endpoint: String,
}

impl HttpEmbeddingScorer {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f64>>,
}

pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(0.0, 1.0)
}

#[async_trait]
impl SimilarityScorer for HttpEmbeddingScorer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn similarity(&self, a: &str, b: &str) -> PlannerResult<f64> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "texts": [a, b] }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PlannerError::Similarity(format!("HTTP {}", status.as_u16())));
        }
        let body: EmbeddingResponse = resp.json().await?;
        match body.embeddings.as_slice() {
            [ea, eb, ..] => Ok(cosine(ea, eb)),
            _ => Err(PlannerError::Similarity("expected two embeddings".to_string())),
        }
    }
}

pub fn captioner_for(kind: &CaptionerKind, client: &Client) -> Arc<dyn Captioner> {
    match kind {
        CaptionerKind::Stub => Arc::new(StubCaptioner),
        CaptionerKind::Http { endpoint } => Arc::new(HttpCaptioner::new(client.clone(), endpoint.clone())),
    }
}

pub fn scorer_for(kind: &SimilarityKind, client: &Client) -> Arc<dyn SimilarityScorer> {
    match kind {
        SimilarityKind::Stub => Arc::new(StubScorer),
        SimilarityKind::Http { endpoint } => Arc::new(HttpEmbeddingScorer::new(client.clone(), endpoint.clone())),
    }
}

/// Whole-word match, plurals included: "dolls" hits, "dollar" does not.
pub fn is_denylisted(caption: &str) -> bool {
    caption
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(|w| {
            let singular = w.strip_suffix('s').unwrap_or(w);
            DENYLIST.iter().any(|t| *t == w || *t == singular)
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QaStatus {
    Passed,
    Failed,
}

impl QaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QaStatus::Passed => "passed",
            QaStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub similarity: f64,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryBlock {
    pub used_fallback: Option<ShotType>,
    pub attempts: usize,
    pub similarity: f64,
    pub image: Option<String>,
}

/// Outcome of QA for one beat. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaRecord {
    pub beat_id: String,
    pub first_try: Attempt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryBlock>,
    pub final_status: QaStatus,
    pub chosen_image: Option<String>,
}

impl QaRecord {
    /// Best similarity reached by any attempt.
    pub fn best_similarity(&self) -> f64 {
        self.retry
            .as_ref()
            .map_or(self.first_try.similarity, |r| r.similarity.max(self.first_try.similarity))
    }
}

#[derive(Debug, Clone)]
pub struct QaSettings {
    pub threshold: f64,
    pub fallback_order: Vec<ShotType>,
    pub max_retries: usize,
    pub retry_enabled: bool,
    pub seed_namespace: String,
    pub topic: String,
    pub generation: GenerationConfig,
}

impl QaSettings {
    pub fn from_config(cfg: &Config, topic: &str) -> Self {
        Self {
            threshold: cfg.threshold_for_topic(topic),
            fallback_order: cfg.qa.fallback_shot_order.clone(),
            max_retries: cfg.qa.max_retries_per_beat,
            retry_enabled: cfg.qa.deterministic_retry,
            seed_namespace: cfg.continuity.seed_namespace.clone(),
            topic: topic.to_string(),
            generation: cfg.generation.clone(),
        }
    }
}

/// Running maximum over QA attempts. The first try is the initial value; a
/// retry replaces it only with a strictly higher score.
#[derive(Debug, Clone)]
struct BestAttempt {
    similarity: f64,
    image: Option<String>,
    fallback: Option<ShotType>,
}

impl BestAttempt {
    fn offer(self, similarity: f64, image: Option<String>, fallback: ShotType) -> Self {
        if image.is_some() && (similarity > self.similarity || self.image.is_none()) {
            Self {
                similarity,
                image,
                fallback: Some(fallback),
            }
        } else {
            self
        }
    }
}

pub struct QaController {
    captioner: Arc<dyn Captioner>,
    scorer: Arc<dyn SimilarityScorer>,
    synthesizer: Arc<dyn ImageSynthesizer>,
    settings: QaSettings,
}

impl QaController {
    pub fn new(
        captioner: Arc<dyn Captioner>,
        scorer: Arc<dyn SimilarityScorer>,
        synthesizer: Arc<dyn ImageSynthesizer>,
        settings: QaSettings,
    ) -> Self {
        Self {
            captioner,
            scorer,
            synthesizer,
            settings,
        }
    }

    pub fn settings(&self) -> &QaSettings {
        &self.settings
    }

    pub fn log_settings(&self) {
        let s = &self.settings;
        let order: Vec<&str> = s.fallback_order.iter().map(|f| f.as_str()).collect();
        logi(format!(
            "QA config: threshold={:.2} captioner={} similarity={} retry={} max_retries={} fallback_order={:?}",
            s.threshold,
            self.captioner.name(),
            self.scorer.name(),
            s.retry_enabled,
            s.max_retries,
            order
        ));
    }

    async fn caption(&self, image: &str) -> String {
        match self.captioner.caption(image).await {
            Ok(text) => text,
            Err(e) => {
                logw(format!("captioner {} failed ({e}); using file-name caption", self.captioner.name()));
                stub_caption(image)
            }
        }
    }

    async fn score(&self, caption: &str, window: &str) -> f64 {
        if is_denylisted(caption) {
            return 0.0;
        }
        match self.scorer.similarity(caption, window).await {
            Ok(v) => v.clamp(0.0, 1.0),
            Err(e) => {
                logw(format!("similarity {} failed ({e}); using word overlap", self.scorer.name()));
                overlap_similarity(caption, window)
            }
        }
    }

    async fn evaluate(&self, image: &str, window: &str) -> (f64, String) {
        let caption = self.caption(image).await;
        (self.score(&caption, window).await, caption)
    }

    /// Synthesizes the first try for `spec` and reviews it.
    pub async fn run(&self, spec: &PromptSpec, window: &str) -> PlannerResult<QaRecord> {
        let request = SynthesisRequest::from_prompt(spec, &self.settings.generation);
        let first = self.synthesizer.synthesize(&request).await;
        self.review(spec, window, first).await
    }

    /// Scores a synthesized first try and walks the fallback shots when it
    /// falls short. Fails only if no attempt produced an image at all.
    pub async fn review(
        &self,
        spec: &PromptSpec,
        window: &str,
        first_image: PlannerResult<String>,
    ) -> PlannerResult<QaRecord> {
        let s = &self.settings;

        let first_try = match first_image {
            Ok(image) => {
                let (similarity, caption) = self.evaluate(&image, window).await;
                logi(format!(
                    "QA initial: beat={} sim={:.3} caption='{}'",
                    spec.beat_id,
                    similarity,
                    caption.chars().take(90).collect::<String>()
                ));
                Attempt {
                    similarity,
                    image: Some(image),
                }
            }
            Err(e) => {
                logw(format!("QA initial: beat={} synthesis failed: {e}", spec.beat_id));
                Attempt {
                    similarity: 0.0,
                    image: None,
                }
            }
        };

        if first_try.image.is_some() && (first_try.similarity >= s.threshold || !s.retry_enabled) {
            return Ok(QaRecord {
                beat_id: spec.beat_id.clone(),
                chosen_image: first_try.image.clone(),
                first_try,
                retry: None,
                final_status: QaStatus::Passed,
            });
        }
        if !s.retry_enabled {
            return Err(PlannerError::Synthesis(format!(
                "no image produced for beat {} and retries are disabled",
                spec.beat_id
            )));
        }

        let mut best = BestAttempt {
            similarity: first_try.similarity,
            image: first_try.image.clone(),
            fallback: None,
        };
        let mut attempts = 0usize;

        for (attempt, fallback) in s.fallback_order.iter().take(s.max_retries).enumerate() {
            attempts += 1;
            let mut request = SynthesisRequest::from_prompt(spec, &s.generation);
            request.prompt = format!("{} fallback: {}", fallback.as_str(), spec.prompt);
            request.seed = seed_for_image(
                &s.seed_namespace,
                &s.topic,
                &spec.seed_group,
                spec.item_index + attempt + 1,
                None,
            );

            let image = match self.synthesizer.synthesize(&request).await {
                Ok(image) => image,
                Err(e) => {
                    logw(format!("QA retry: beat={} fb={} synthesis failed: {e}", spec.beat_id, fallback));
                    continue;
                }
            };

            let (similarity, _) = self.evaluate(&image, window).await;
            logi(format!(
                "QA retry: beat={} try={} fb={} sim={:.3}",
                spec.beat_id, attempts, fallback, similarity
            ));
            best = best.offer(similarity, Some(image), *fallback);
            if similarity >= s.threshold {
                break;
            }
        }

        if best.image.is_none() {
            return Err(PlannerError::Synthesis(format!(
                "no image produced for beat {}",
                spec.beat_id
            )));
        }

        let final_status = if best.similarity >= s.threshold {
            QaStatus::Passed
        } else {
            QaStatus::Failed
        };
        logi(format!(
            "QA final: beat={} status={} best_sim={:.3} used_fallback={}",
            spec.beat_id,
            final_status.as_str(),
            best.similarity,
            best.fallback.map_or("none", |f| f.as_str())
        ));

        Ok(QaRecord {
            beat_id: spec.beat_id.clone(),
            first_try,
            retry: Some(RetryBlock {
                used_fallback: best.fallback,
                attempts,
                similarity: best.similarity,
                image: best.image.clone(),
            }),
            final_status,
            chosen_image: best.image,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaSummary {
    pub beats_total: usize,
    pub passed: usize,
    pub failed_first_try: usize,
    pub recovered_after_retry: usize,
    pub failed_final: usize,
    pub threshold: f64,
    pub diversity_ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaReport {
    pub summary: QaSummary,
    pub details: Vec<QaRecord>,
}

impl QaReport {
    pub fn from_records(records: Vec<QaRecord>, threshold: f64, shots: &[ShotType]) -> Self {
        let retried = || records.iter().filter(|r| r.retry.is_some());
        let summary = QaSummary {
            beats_total: records.len(),
            passed: records.iter().filter(|r| r.final_status == QaStatus::Passed).count(),
            failed_first_try: retried().filter(|r| r.first_try.similarity < threshold).count(),
            recovered_after_retry: retried().filter(|r| r.final_status == QaStatus::Passed).count(),
            failed_final: records.iter().filter(|r| r.final_status == QaStatus::Failed).count(),
            threshold,
            diversity_ok: diversity_ok(shots, DIVERSITY_AUDIT_WINDOW, DIVERSITY_AUDIT_RATIO),
        };
        Self {
            summary,
            details: records,
        }
    }
}
