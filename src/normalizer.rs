use crate::alignment::estimate_duration_s;
use crate::beat_planner::split_negatives;
use crate::config::{Config, PlannerConfig, StyleTemplate};
use crate::error::{PlannerError, PlannerResult};
use crate::plan::{
    Beat, Entity, EntityKind, GenerationItem, GlobalStyle, NarrationSpan, SCHEMA_VERSION, ShotType, VisualPlan,
};
use crate::{logi, logok, logw};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;

/// What a remote plan generator is asked to draft.
#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest {
    pub narration: String,
    pub topic: String,
    pub style: StyleTemplate,
    pub beat_target_seconds: [f64; 2],
    pub shot_types: Vec<ShotType>,
    pub adapter_negatives: Vec<String>,
}

impl PlanRequest {
    pub fn from_config(cfg: &Config, narration: &str, topic: &str) -> Self {
        Self {
            narration: narration.to_string(),
            topic: topic.to_string(),
            style: cfg.style_for_topic(topic),
            beat_target_seconds: cfg.planner.beat_target_seconds,
            shot_types: cfg.planner.shot_types.clone(),
            adapter_negatives: cfg.adapter_for_topic(topic).negatives,
        }
    }
}

/// External generative service proposing a draft plan. The result is untyped:
/// anything it returns goes through `normalize_plan`.
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &PlanRequest) -> PlannerResult<Value>;
}

/// Values used wherever the candidate plan leaves a field out.
#[derive(Debug, Clone, Copy)]
pub struct PlanDefaults {
    pub tone: &'static str,
    pub color_profile: &'static str,
    pub aspect_ratio: &'static str,
    pub entity_kind: EntityKind,
    pub beat_duration_s: f64,
    pub visual: &'static str,
    pub prompt_negatives: &'static str,
    pub prompt_max_chars: usize,
    pub max_visuals: usize,
    pub rescale_tolerance: f64,
    pub rescaled_min_s: f64,
    pub rescaled_max_s: f64,
    pub fallback_note: &'static str,
}

pub const PLAN_DEFAULTS: PlanDefaults = PlanDefaults {
    tone: "documentary",
    color_profile: "sRGB",
    aspect_ratio: "16:9",
    entity_kind: EntityKind::Concept,
    beat_duration_s: 10.0,
    visual: "establishing",
    prompt_negatives: "logos, watermarks, celebrity likeness",
    prompt_max_chars: 180,
    max_visuals: 4,
    rescale_tolerance: 0.1,
    rescaled_min_s: 6.0,
    rescaled_max_s: 180.0,
    fallback_note: "fallback auto-planned",
};

const WRAPPER_KEYS: &[&str] = &["visual_plan", "plan", "data"];
const BEATS_KEYS: &[&str] = &["beats", "scenes", "sections"];
const MAX_UNWRAP_DEPTH: usize = 4;

/// Pulls the JSON object out of generator text that may carry prose or
/// markdown fences around it.
pub fn extract_json(text: &str) -> PlannerResult<Value> {
    let text = text.trim();
    let (start, end) = match (text.find('{'), text.rfind('}')) {
        (Some(s), Some(e)) if e > s => (s, e),
        _ => return Err(PlannerError::MalformedPlan("no JSON object in generator output".to_string())),
    };
    Ok(serde_json::from_str(&text[start..=end])?)
}

fn value_str(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k).and_then(value_str))
}

fn first_f64(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn first_index(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Strings from either a list or a single comma-separated string.
fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items.iter().filter_map(value_str).collect(),
        Some(Value::String(s)) => split_negatives(s),
        _ => Vec::new(),
    }
}

fn clip_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect::<String>().trim().to_string()
}

/// Peels wrapper objects, JSON-in-a-string and bare beat arrays until an
/// object that looks like a plan remains.
fn unwrap_candidate(mut value: Value) -> Option<Map<String, Value>> {
    for _ in 0..MAX_UNWRAP_DEPTH {
        value = match value {
            Value::String(text) => extract_json(&text).ok()?,
            Value::Array(items) => {
                let mut obj = Map::new();
                obj.insert("beats".to_string(), Value::Array(items));
                return Some(obj);
            }
            Value::Object(mut obj) => {
                let looks_like_plan = BEATS_KEYS.iter().any(|k| obj.contains_key(*k));
                let wrapper = WRAPPER_KEYS
                    .iter()
                    .find(|k| matches!(obj.get(**k), Some(Value::Object(_) | Value::String(_) | Value::Array(_))));
                match wrapper {
                    Some(key) if !looks_like_plan => obj.remove(*key)?,
                    _ => return Some(obj),
                }
            }
            _ => return None,
        };
    }
    None
}

fn normalize_style(obj: &Map<String, Value>, topic: &str) -> GlobalStyle {
    let empty = Map::new();
    let gs = match obj.get("global_style") {
        Some(Value::Object(gs)) => gs,
        _ => &empty,
    };
    let d = &PLAN_DEFAULTS;
    GlobalStyle {
        topic: first_str(gs, &["topic"]).unwrap_or_else(|| topic.to_string()),
        style_template_key: first_str(gs, &["style_template_key"]).unwrap_or_else(|| topic.to_string()),
        aspect_ratio: first_str(gs, &["aspect_ratio"]).unwrap_or_else(|| d.aspect_ratio.to_string()),
        color_profile: first_str(gs, &["color_profile"]).unwrap_or_else(|| d.color_profile.to_string()),
        tone: first_str(gs, &["tone"]).unwrap_or_else(|| d.tone.to_string()),
    }
}

fn normalize_entities(obj: &Map<String, Value>) -> Vec<Entity> {
    let Some(Value::Array(items)) = obj.get("entities") else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|e| {
            let id = first_str(e, &["id", "name", "title"])?;
            if !seen.insert(id.clone()) {
                return None;
            }
            let kind = first_str(e, &["kind", "type"])
                .map(|k| EntityKind::parse_loose(&k))
                .unwrap_or(PLAN_DEFAULTS.entity_kind);
            let descriptor = first_str(e, &["descriptor", "description"]).unwrap_or_else(|| id.clone());
            let persist_across_beats = e.get("persist_across_beats").and_then(Value::as_bool).unwrap_or(true);
            Some(Entity {
                id,
                kind,
                descriptor,
                persist_across_beats,
            })
        })
        .collect()
}

/// A candidate beat with canonical keys resolved but nothing repaired yet.
#[derive(Debug, Clone)]
struct CandidateBeat {
    id: Option<String>,
    title: String,
    summary: String,
    duration_s: f64,
    shot_type: Option<ShotType>,
    span: Option<(i64, i64)>,
    prompts: Vec<GenerationItem>,
    visuals: Vec<String>,
    seed_group: Option<String>,
    overlays: Vec<Value>,
    notes: String,
}

fn generation_item(v: &Value) -> Option<GenerationItem> {
    let item = match v {
        Value::String(s) if !s.trim().is_empty() => GenerationItem::image(s.trim()),
        Value::Object(o) => {
            let prompt = first_str(o, &["prompt", "text", "description"])?;
            GenerationItem {
                kind: first_str(o, &["type"]).unwrap_or_else(|| "image".to_string()),
                prompt,
                negatives: string_list(o.get("negatives")),
                style_locks: string_list(o.get("style_locks")),
                variation: first_f64(o, &["variation"]).unwrap_or(0.0),
            }
        }
        _ => return None,
    };
    Some(item)
}

fn candidate_beat(obj: &Map<String, Value>) -> CandidateBeat {
    let d = &PLAN_DEFAULTS;
    let span = match obj.get("narration_span") {
        Some(Value::Object(s)) => first_index(s, "start_token").zip(first_index(s, "end_token")),
        _ => None,
    };
    let prompts = match obj.get("prompts") {
        Some(Value::Array(items)) => items.iter().filter_map(generation_item).collect(),
        _ => Vec::new(),
    };
    let visuals_key = if obj.contains_key("visuals") { "visuals" } else { "shots" };
    let visuals: Vec<String> = match obj.get(visuals_key) {
        Some(Value::Array(items)) => items.iter().filter_map(value_str).collect(),
        Some(v) => value_str(v).into_iter().collect(),
        None => Vec::new(),
    };
    let visuals = visuals
        .iter()
        .take(d.max_visuals)
        .map(|v| clip_chars(v, 120))
        .collect();

    CandidateBeat {
        id: first_str(obj, &["id"]),
        title: first_str(obj, &["title", "heading"]).unwrap_or_default(),
        summary: first_str(obj, &["summary", "desc", "description"]).unwrap_or_default(),
        duration_s: first_f64(obj, &["estimated_duration_s", "duration_s", "duration"])
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(d.beat_duration_s),
        shot_type: first_str(obj, &["shot_type", "shot"]).and_then(|s| ShotType::parse_loose(&s)),
        span,
        prompts,
        visuals,
        seed_group: first_str(obj, &["seed_group"]),
        overlays: match obj.get("overlays") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        },
        notes: first_str(obj, &["notes"]).unwrap_or_default(),
    }
}

fn candidate_beats(obj: &Map<String, Value>) -> Vec<CandidateBeat> {
    BEATS_KEYS
        .iter()
        .find_map(|k| match obj.get(*k) {
            Some(Value::Array(items)) if !items.is_empty() => Some(items),
            _ => None,
        })
        .map(|items| items.iter().filter_map(Value::as_object).map(candidate_beat).collect())
        .unwrap_or_default()
}

/// Scales durations so their sum lands on `target_s` when it is off by more
/// than the tolerance.
fn rescale_durations(beats: &mut [CandidateBeat], target_s: f64) {
    let d = &PLAN_DEFAULTS;
    let total: f64 = beats.iter().map(|b| b.duration_s).sum();
    if total <= 0.0 || target_s <= 0.0 {
        return;
    }
    let scale = target_s / total;
    if (scale - 1.0).abs() > d.rescale_tolerance {
        for b in beats.iter_mut() {
            b.duration_s = (b.duration_s * scale).clamp(d.rescaled_min_s, d.rescaled_max_s);
        }
    }
}

/// Candidate spans are kept only when they already partition `[0, total)`.
fn spans_partition(beats: &[CandidateBeat], total: usize) -> Option<Vec<NarrationSpan>> {
    let mut cursor = 0i64;
    let mut spans = Vec::with_capacity(beats.len());
    for b in beats {
        let (s, e) = b.span?;
        if s != cursor || e <= s {
            return None;
        }
        spans.push(NarrationSpan::new(s as usize, e as usize));
        cursor = e;
    }
    (cursor == total as i64).then_some(spans)
}

/// Allocates `total` tokens across beats in proportion to their durations,
/// at least one token each. Requires `weights.len() <= total`.
fn proportional_spans(weights: &[f64], total: usize) -> Vec<NarrationSpan> {
    let n = weights.len();
    let sum: f64 = weights.iter().sum::<f64>().max(f64::EPSILON);
    let mut spans = Vec::with_capacity(n);
    let mut cum = 0.0;
    let mut prev = 0usize;
    for (i, w) in weights.iter().enumerate() {
        cum += w;
        let ideal = if i + 1 == n {
            total
        } else {
            ((cum / sum) * total as f64).round() as usize
        };
        let lo = prev + 1;
        let hi = total - (n - 1 - i);
        let end = ideal.clamp(lo, hi);
        spans.push(NarrationSpan::new(prev, end));
        prev = end;
    }
    spans
}

fn default_item(beat: &CandidateBeat, style: &GlobalStyle) -> GenerationItem {
    let d = &PLAN_DEFAULTS;
    let hint = beat
        .visuals
        .first()
        .cloned()
        .or_else(|| (!beat.title.is_empty()).then(|| beat.title.clone()))
        .unwrap_or_else(|| d.visual.to_string());
    GenerationItem {
        kind: "image".to_string(),
        prompt: clip_chars(&hint, d.prompt_max_chars),
        negatives: split_negatives(d.prompt_negatives),
        style_locks: vec![style.tone.clone(), style.color_profile.clone()],
        variation: 0.0,
    }
}

fn shot_vocabulary(cfg: &PlannerConfig) -> &[ShotType] {
    if cfg.shot_types.is_empty() {
        &ShotType::ALL
    } else {
        &cfg.shot_types
    }
}

/// Repairs an arbitrary generator result into a valid plan. Never fails:
/// anything that cannot be repaired becomes the local fallback plan.
pub fn normalize_plan(candidate: Value, narration: &str, topic: &str, cfg: &PlannerConfig) -> VisualPlan {
    let word_count = narration.split_whitespace().count();
    let total_tokens = word_count.max(1);

    let Some(obj) = unwrap_candidate(candidate) else {
        logw("Plan candidate is not an object; using fallback plan");
        return fallback_plan(narration, topic, cfg);
    };

    let global_style = normalize_style(&obj, topic);
    let entities = normalize_entities(&obj);
    let mut raw = candidate_beats(&obj);

    if raw.is_empty() {
        logw("Plan candidate has no beats; using fallback beats");
        let mut plan = fallback_plan(narration, topic, cfg);
        plan.global_style = global_style;
        plan.entities = entities;
        return plan;
    }

    if raw.len() > total_tokens {
        logw(format!(
            "Plan candidate has {} beats for {} tokens; dropping the tail",
            raw.len(),
            total_tokens
        ));
        raw.truncate(total_tokens);
    }

    rescale_durations(&mut raw, estimate_duration_s(word_count, cfg.words_per_second));

    let spans = spans_partition(&raw, total_tokens).unwrap_or_else(|| {
        let weights: Vec<f64> = raw.iter().map(|b| b.duration_s).collect();
        proportional_spans(&weights, total_tokens)
    });

    let shots = shot_vocabulary(cfg);
    let mut ids = HashSet::new();
    let beats: Vec<Beat> = raw
        .into_iter()
        .zip(spans)
        .enumerate()
        .map(|(i, (cb, span))| {
            let mut id = cb.id.clone().unwrap_or_else(|| format!("beat_{:03}", i + 1));
            if !ids.insert(id.clone()) {
                id = format!("{id}_{}", i + 1);
                ids.insert(id.clone());
            }
            let shot_type = cb
                .shot_type
                .filter(|s| shots.contains(s))
                .unwrap_or(shots[i % shots.len()]);
            let prompts = if cb.prompts.is_empty() {
                vec![default_item(&cb, &global_style)]
            } else {
                cb.prompts.clone()
            };

            let mut beat = Beat::new(id, span, shot_type);
            if let Some(group) = cb.seed_group {
                beat.seed_group = group;
            }
            beat.title = if cb.title.is_empty() {
                format!("Beat {}", i + 1)
            } else {
                cb.title
            };
            beat.summary = cb.summary;
            beat.estimated_duration_s = cb.duration_s;
            beat.prompts = prompts;
            beat.overlays = cb.overlays;
            beat.notes = cb.notes;
            beat
        })
        .collect();

    let plan = VisualPlan {
        schema_version: SCHEMA_VERSION.to_string(),
        global_style,
        entities,
        beats,
    };

    match plan.validate(word_count) {
        Ok(()) => plan,
        Err(e) => {
            logw(format!("Normalized plan still invalid ({e}); using fallback plan"));
            fallback_plan(narration, topic, cfg)
        }
    }
}

/// Number of beats the local fallback uses for `word_count` words.
pub fn fallback_beat_count(word_count: usize, cfg: &PlannerConfig) -> usize {
    let est_s = estimate_duration_s(word_count, cfg.words_per_second);
    let beat_s = cfg.target_midpoint().clamp(6.0, 20.0);
    let mut n = ((est_s / beat_s).round() as usize).max(1);
    if word_count >= 3 {
        n = n.max(3);
    }
    n.min(word_count.max(1))
}

/// Minimal valid plan built from narration length alone: rotating shot types,
/// even token windows, default negatives.
pub fn fallback_plan(narration: &str, topic: &str, cfg: &PlannerConfig) -> VisualPlan {
    let d = &PLAN_DEFAULTS;
    let words: Vec<&str> = narration.split_whitespace().collect();
    let total_tokens = words.len().max(1);
    let n = fallback_beat_count(words.len(), cfg);
    let shots = shot_vocabulary(cfg);
    let [tmin, tmax] = cfg.beat_target_seconds;
    let beat_s = cfg.target_midpoint().clamp(tmin, tmax);
    let global_style = GlobalStyle::for_topic(topic);

    let beats = (0..n)
        .map(|i| {
            let start = i * total_tokens / n;
            let end = (i + 1) * total_tokens / n;
            let snippet = words.get(start..end.min(words.len())).map(|w| w.join(" ")).unwrap_or_default();
            let prompt = if snippet.is_empty() {
                topic.to_string()
            } else {
                clip_chars(&snippet, d.prompt_max_chars)
            };

            let mut beat = Beat::new(format!("beat_{:03}", i + 1), NarrationSpan::new(start, end), shots[i % shots.len()]);
            beat.title = format!("Beat {}", i + 1);
            beat.estimated_duration_s = beat_s;
            beat.prompts = vec![GenerationItem {
                kind: "image".to_string(),
                prompt,
                negatives: split_negatives(d.prompt_negatives),
                style_locks: vec![global_style.tone.clone(), global_style.color_profile.clone()],
                variation: 0.0,
            }];
            beat.notes = d.fallback_note.to_string();
            beat
        })
        .collect();

    logi(format!("Fallback plan: {} beats over {} tokens", n, total_tokens));
    VisualPlan {
        schema_version: SCHEMA_VERSION.to_string(),
        global_style,
        entities: Vec::new(),
        beats,
    }
}

/// Asks the generator for a draft (bounded by the configured timeout) and
/// normalizes it. Any generator failure degrades to the fallback plan.
pub async fn plan_visuals(
    generator: Option<&dyn PlanGenerator>,
    narration: &str,
    topic: &str,
    cfg: &Config,
) -> VisualPlan {
    let Some(generator) = generator else {
        logi("No plan generator configured; planning locally");
        return fallback_plan(narration, topic, &cfg.planner);
    };

    let request = PlanRequest::from_config(cfg, narration, topic);
    let limit = cfg.planner.generator_timeout_secs;
    let outcome = match tokio::time::timeout(Duration::from_secs(limit), generator.generate(&request)).await {
        Ok(result) => result,
        Err(_) => Err(PlannerError::GeneratorTimeout(limit)),
    };

    match outcome {
        Ok(candidate) => {
            let plan = normalize_plan(candidate, narration, topic, &cfg.planner);
            logok(format!("Visual plan from {}: {} beats", generator.name(), plan.beats.len()));
            plan
        }
        Err(e) => {
            logw(format!("Plan generator {} failed: {e}; using fallback plan", generator.name()));
            fallback_plan(narration, topic, &cfg.planner)
        }
    }
}
