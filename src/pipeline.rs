use crate::alignment::{Aligner, aligner_for};
use crate::api::openai::OpenAiPlanGenerator;
use crate::artifacts;
use crate::beat_planner::plan_beats;
use crate::config::Config;
use crate::ffmpeg::narration_duration_s;
use crate::normalizer::{PlanGenerator, plan_visuals};
use crate::plan::{NarrationSpan, ShotType, VisualPlan};
use crate::prompt_builder::{PromptContext, PromptSpec, build_prompts};
use crate::qa::{Captioner, QaController, QaRecord, QaReport, QaSettings, SimilarityScorer, captioner_for, scorer_for};
use crate::synth::ImageSynthesizer;
use crate::timeline::{Timeline, assemble_timeline};
use crate::{logi, logok};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    pub narration: String,
    pub topic: String,
    pub audio_path: Option<PathBuf>,
    /// Known narration length; probed or estimated when absent.
    pub total_duration_s: Option<f64>,
}

/// The external services a run talks to.
pub struct Collaborators {
    pub generator: Option<Arc<dyn PlanGenerator>>,
    pub synthesizer: Arc<dyn ImageSynthesizer>,
    pub captioner: Arc<dyn Captioner>,
    pub scorer: Arc<dyn SimilarityScorer>,
    pub aligner: Box<dyn Aligner>,
}

impl Collaborators {
    /// Providers selected by configuration. `offline` skips the remote plan
    /// generator even when one is configured.
    pub fn from_config(cfg: &Config, client: &Client, synthesizer: Arc<dyn ImageSynthesizer>, offline: bool) -> Self {
        let generator: Option<Arc<dyn PlanGenerator>> = match cfg.openai.as_ref() {
            Some(openai) if !offline && !openai.api_key.is_empty() => Some(Arc::new(OpenAiPlanGenerator::new(
                client.clone(),
                openai.clone(),
                cfg.planner.generator_timeout_secs,
            ))),
            _ => None,
        };
        Self {
            generator,
            synthesizer,
            captioner: captioner_for(&cfg.qa.captioner, client),
            scorer: scorer_for(&cfg.qa.similarity, client),
            aligner: aligner_for(cfg.alignment.source),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub plan: VisualPlan,
    pub prompts: Vec<PromptSpec>,
    pub qa: QaReport,
    pub timeline: Timeline,
}

fn narration_window(tokens: &[&str], span: Option<NarrationSpan>, narration: &str) -> String {
    let text = span
        .map(|s| {
            let st = s.start_token.min(tokens.len());
            let et = s.end_token.clamp(st, tokens.len());
            tokens[st..et].join(" ")
        })
        .unwrap_or_default();
    if text.is_empty() { narration.to_string() } else { text }
}

/// Narration in, plan + prompts + QA report + timeline out.
pub async fn run_pipeline(cfg: &Config, request: &PipelineRequest, collab: &Collaborators) -> Result<PipelineOutput> {
    let narration = request.narration.as_str();
    let topic = request.topic.as_str();
    let tokens: Vec<&str> = narration.split_whitespace().collect();

    let total_duration_s = match request.total_duration_s.filter(|d| *d > 0.0) {
        Some(d) => d,
        None => narration_duration_s(request.audio_path.as_deref(), tokens.len(), cfg.planner.words_per_second).await,
    };
    logi(format!(
        "Planning visuals: topic={} words={} duration={:.1}s",
        topic,
        tokens.len(),
        total_duration_s
    ));

    let mut plan = plan_visuals(collab.generator.as_deref(), narration, topic, cfg).await;
    collab.aligner.align(&mut plan.beats, total_duration_s);
    logi(format!("Aligned {} beats with {} aligner", plan.beats.len(), collab.aligner.name()));
    plan_beats(&mut plan, narration, topic, &cfg.planner);

    let prompts = build_prompts(&plan, &PromptContext::from_config(cfg, topic));
    logi(format!("Prompts ready: {}", prompts.len()));

    let controller = QaController::new(
        collab.captioner.clone(),
        collab.scorer.clone(),
        collab.synthesizer.clone(),
        QaSettings::from_config(cfg, topic),
    );
    controller.log_settings();

    let controller = &controller;
    let tokens = &tokens;
    let results: Vec<_> = stream::iter(prompts.iter())
        .map(|spec| async move {
            let window = narration_window(tokens, spec.narration_span, narration);
            controller.run(spec, &window).await
        })
        .buffered(cfg.qa.concurrency.max(1))
        .collect()
        .await;
    let records = results.into_iter().collect::<Result<Vec<QaRecord>, _>>()?;

    let shots: Vec<ShotType> = plan.beats.iter().map(|b| b.shot_type).collect();
    let qa = QaReport::from_records(records, controller.settings().threshold, &shots);
    logok(format!(
        "QA: {}/{} passed, {} recovered after retry, {} failed",
        qa.summary.passed, qa.summary.beats_total, qa.summary.recovered_after_retry, qa.summary.failed_final
    ));

    let audio = request.audio_path.as_ref().map(|p| p.to_string_lossy().into_owned());
    let timeline = assemble_timeline(&plan, &qa.details, audio.as_deref(), total_duration_s);

    Ok(PipelineOutput {
        plan,
        prompts,
        qa,
        timeline,
    })
}

pub async fn write_artifacts(out_dir: &Path, output: &PipelineOutput) -> Result<Vec<PathBuf>> {
    artifacts::write_artifacts(out_dir, &output.plan, &output.prompts, &output.qa, &output.timeline).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptionerKind;
    use crate::synth::PlaceholderSynthesizer;

    fn offline(cfg: &Config) -> Collaborators {
        Collaborators::from_config(cfg, &Client::new(), Arc::new(PlaceholderSynthesizer::new("images")), true)
    }

    #[test]
    fn narration_window_falls_back_to_full_text() {
        let tokens = ["a", "b", "c"];
        assert_eq!(narration_window(&tokens, Some(NarrationSpan::new(1, 3)), "a b c"), "b c");
        assert_eq!(narration_window(&tokens, Some(NarrationSpan::new(5, 9)), "a b c"), "a b c");
        assert_eq!(narration_window(&tokens, None, "a b c"), "a b c");
    }

    #[test]
    fn offline_skips_remote_generator() {
        let mut cfg = Config::default();
        cfg.openai = Some(crate::config::OpenAiConfig {
            api_key: "sk-test".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
        });
        cfg.qa.captioner = CaptionerKind::Http {
            endpoint: "http://127.0.0.1:9/caption".to_string(),
        };
        assert!(offline(&cfg).generator.is_none());
        let online = Collaborators::from_config(&cfg, &Client::new(), Arc::new(PlaceholderSynthesizer::new("i")), false);
        assert_eq!(online.generator.map(|g| g.name()), Some("openai"));
        assert_eq!(online.captioner.name(), "http");
    }

    #[tokio::test]
    async fn short_narration_runs_end_to_end() {
        let cfg = Config::default();
        let request = PipelineRequest {
            narration: "The harbor wakes before dawn as ships unload grain and amphorae of wine".to_string(),
            topic: "history".to_string(),
            audio_path: None,
            total_duration_s: Some(30.0),
        };
        let output = run_pipeline(&cfg, &request, &offline(&cfg)).await.unwrap();

        assert!(!output.plan.beats.is_empty());
        assert_eq!(output.qa.summary.beats_total, output.prompts.len());
        assert_eq!(output.timeline.beats.len(), output.plan.beats.len());
        assert!(output.timeline.beats.iter().all(|b| b.image.is_some()));
        assert_eq!(output.timeline.beats[0].start_s, 0.0);
    }
}
