use ai_doc_visuals::config::Config;
use ai_doc_visuals::error::PlannerResult;
use ai_doc_visuals::normalizer::{PlanGenerator, PlanRequest};
use ai_doc_visuals::pipeline::{Collaborators, PipelineOutput, PipelineRequest, run_pipeline, write_artifacts};
use ai_doc_visuals::seed::seed_for_image;
use ai_doc_visuals::synth::PlaceholderSynthesizer;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;

const EPS: f64 = 1e-6;

fn narration(words: usize) -> String {
    const VOCAB: &[&str] = &[
        "the", "fleet", "sailed", "from", "athens", "toward", "the", "island", "of", "sicily", "where",
        "generals", "argued", "over", "walls", "harbors", "and", "grain",
    ];
    (0..words).map(|i| VOCAB[i % VOCAB.len()]).collect::<Vec<_>>().join(" ")
}

fn collaborators(cfg: &Config, generator: Option<Arc<dyn PlanGenerator>>) -> Collaborators {
    let mut collab = Collaborators::from_config(cfg, &Client::new(), Arc::new(PlaceholderSynthesizer::new("images")), true);
    collab.generator = generator;
    collab
}

fn assert_timeline_covers(output: &PipelineOutput, total: f64) {
    let beats = &output.timeline.beats;
    assert!(beats[0].start_s.abs() < EPS);
    for pair in beats.windows(2) {
        assert!((pair[0].end_s - pair[1].start_s).abs() < EPS, "gap between {} and {}", pair[0].beat_id, pair[1].beat_id);
    }
    assert!((beats[beats.len() - 1].end_s - total).abs() < EPS);
    for b in beats {
        let d = b.end_s - b.start_s;
        assert!((6.0 - EPS..=15.0 + EPS).contains(&d), "beat {} lasts {d}s", b.beat_id);
        assert!(b.image.is_some());
    }
}

struct ScenesGenerator;

#[async_trait]
impl PlanGenerator for ScenesGenerator {
    fn name(&self) -> &'static str {
        "scenes"
    }

    async fn generate(&self, _request: &PlanRequest) -> PlannerResult<Value> {
        Ok(json!({
            "plan": {
                "scenes": [
                    {"id": "voyage", "heading": "The voyage", "duration_s": 20, "shot_type": "establishing"},
                    {"id": "siege", "heading": "The siege", "duration_s": 80, "shot_type": "reenactment"},
                    {"id": "retreat", "heading": "The retreat", "duration_s": 20, "shot_type": "map"}
                ]
            }
        }))
    }
}

struct LabelledGenerator;

#[async_trait]
impl PlanGenerator for LabelledGenerator {
    fn name(&self) -> &'static str {
        "labelled"
    }

    async fn generate(&self, _request: &PlanRequest) -> PlannerResult<Value> {
        Ok(json!({
            "global_style": {"topic": "Ancient Rome", "tone": "epic"},
            "beats": [
                {"id": "harbor", "title": "Harbor", "duration_s": 10, "shot_type": "establishing"},
                {"id": "forum", "title": "Forum", "duration_s": 10, "shot_type": "insert"}
            ]
        }))
    }
}

#[tokio::test]
async fn seeds_and_negatives_follow_request_topic() {
    let cfg = Config::default();
    let request = PipelineRequest {
        narration: narration(50),
        topic: "history".to_string(),
        audio_path: None,
        total_duration_s: Some(20.0),
    };

    let output = run_pipeline(&cfg, &request, &collaborators(&cfg, Some(Arc::new(LabelledGenerator))))
        .await
        .unwrap();

    assert_eq!(output.plan.global_style.topic, "Ancient Rome");
    assert!(!output.prompts.is_empty());
    for p in &output.prompts {
        assert_eq!(
            p.seed,
            seed_for_image(&cfg.continuity.seed_namespace, "history", &p.seed_group, p.item_index, None)
        );
        assert!(!p.negatives.iter().any(|n| n == "smartphone"), "{:?}", p.negatives);
    }
}

#[tokio::test]
async fn local_plan_covers_narration() {
    let cfg = Config::default();
    let request = PipelineRequest {
        narration: narration(300),
        topic: "history".to_string(),
        audio_path: None,
        total_duration_s: Some(120.0),
    };

    let output = run_pipeline(&cfg, &request, &collaborators(&cfg, None)).await.unwrap();

    let n = output.plan.beats.len();
    assert!((10..=15).contains(&n), "{n} beats");
    assert_timeline_covers(&output, 120.0);
    assert_eq!(output.qa.summary.beats_total, n);
    assert_eq!(output.prompts.len(), n);
}

#[tokio::test]
async fn long_generator_beats_are_split() {
    let cfg = Config::default();
    let request = PipelineRequest {
        narration: narration(300),
        topic: "history".to_string(),
        audio_path: None,
        total_duration_s: Some(120.0),
    };

    let output = run_pipeline(&cfg, &request, &collaborators(&cfg, Some(Arc::new(ScenesGenerator))))
        .await
        .unwrap();

    let ids: Vec<&str> = output.plan.beats.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids.len(), 12);
    let shots: Vec<_> = output.plan.beats.iter().map(|b| b.shot_type).collect();
    for run in shots.windows(cfg.planner.max_consecutive_shot + 1) {
        assert!(run.iter().any(|s| *s != run[0]), "{shots:?}");
    }
    assert_eq!(ids[0], "voyage_p1");
    assert!(ids.contains(&"siege_p8"));
    assert!(output.plan.beats.iter().all(|b| b.seed_group == b.id));
    assert_timeline_covers(&output, 120.0);

    let mut cursor = 0;
    for b in &output.plan.beats {
        assert_eq!(b.narration_span.start_token, cursor);
        assert!(b.narration_span.end_token > cursor);
        cursor = b.narration_span.end_token;
    }
    assert_eq!(cursor, 300);
}

#[tokio::test]
async fn artifacts_land_in_output_dir() {
    let cfg = Config::default();
    let dir = TempDir::new().unwrap();
    let request = PipelineRequest {
        narration: narration(90),
        topic: "mythology".to_string(),
        audio_path: None,
        total_duration_s: None,
    };

    let output = run_pipeline(&cfg, &request, &collaborators(&cfg, None)).await.unwrap();
    let paths = write_artifacts(dir.path(), &output).await.unwrap();

    assert_eq!(paths.len(), 5);
    assert!(paths.iter().all(|p| p.exists()));
    let timeline: Value = serde_json::from_str(&std::fs::read_to_string(dir.path().join("timeline.json")).unwrap()).unwrap();
    assert_eq!(timeline["beats"].as_array().map(Vec::len), Some(output.plan.beats.len()));
}
