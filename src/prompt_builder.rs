use crate::beat_planner::{default_negatives, merge_negatives, sanitize_prompt, truncate_to_tokens};
use crate::config::{Config, StyleTemplate, TopicAdapter};
use crate::plan::{NarrationSpan, ShotType, VisualPlan};
use crate::seed::seed_for_image;
use serde::{Deserialize, Serialize};

/// Final, self-contained generation request for one item of one beat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub beat_id: String,
    pub shot_type: ShotType,
    pub prompt: String,
    pub negatives: Vec<String>,
    pub seed: u32,
    pub seed_group: String,
    pub item_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_span: Option<NarrationSpan>,
}

impl PromptSpec {
    pub fn negative_prompt(&self) -> String {
        self.negatives.join(", ")
    }
}

/// Per-run inputs the builder needs besides the plan itself.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub topic: String,
    pub seed_namespace: String,
    pub style: StyleTemplate,
    pub adapter: TopicAdapter,
    pub max_prompt_tokens: usize,
    pub normalize_render_shots: bool,
}

impl PromptContext {
    pub fn from_config(cfg: &Config, topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            seed_namespace: cfg.continuity.seed_namespace.clone(),
            style: cfg.style_for_topic(topic),
            adapter: cfg.adapter_for_topic(topic),
            max_prompt_tokens: cfg.planner.max_prompt_tokens,
            normalize_render_shots: cfg.planner.normalize_render_shots,
        }
    }
}

fn style_suffix(style: &StyleTemplate, locks: &[String]) -> String {
    locks
        .iter()
        .map(String::as_str)
        .chain([style.base_style.as_str(), style.colors.as_str(), style.mood.as_str()])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Appends the style bits to `instruction` without letting them be cut off by
/// the word budget: the instruction is shortened first, never below half the
/// budget.
fn compose_prompt(instruction: &str, suffix: &str, shot: ShotType, max_tokens: usize) -> String {
    let style_words = suffix.split_whitespace().count();
    let room = max_tokens.saturating_sub(style_words).max(max_tokens / 2).max(1);
    let head = truncate_to_tokens(instruction, room);
    let joined = if suffix.is_empty() {
        head
    } else if head.is_empty() {
        suffix.to_string()
    } else {
        format!("{head}, {suffix}")
    };
    sanitize_prompt(&joined, shot, max_tokens)
}

/// Flattens a planned visual plan into one `PromptSpec` per generation item,
/// in beat order. Seeds are keyed on the run topic in `ctx`, the same key QA
/// retries use.
pub fn build_prompts(plan: &VisualPlan, ctx: &PromptContext) -> Vec<PromptSpec> {
    let topic = ctx.topic.as_str();

    plan.beats
        .iter()
        .flat_map(|beat| {
            beat.prompts.iter().enumerate().map(move |(index, item)| {
                let shot_type = if ctx.normalize_render_shots {
                    beat.shot_type.render_alias()
                } else {
                    beat.shot_type
                };
                let suffix = style_suffix(&ctx.style, &item.style_locks);
                let prompt = compose_prompt(&item.prompt, &suffix, beat.shot_type, ctx.max_prompt_tokens);
                let negatives = merge_negatives(
                    ctx.adapter
                        .negatives
                        .iter()
                        .cloned()
                        .chain(item.negatives.iter().cloned())
                        .chain(default_negatives()),
                );

                PromptSpec {
                    beat_id: beat.id.clone(),
                    shot_type,
                    prompt,
                    negatives,
                    seed: seed_for_image(&ctx.seed_namespace, topic, &beat.seed_group, index, None),
                    seed_group: beat.seed_group.clone(),
                    item_index: index,
                    start_s: beat.start_s,
                    end_s: beat.end_s,
                    narration_span: Some(beat.narration_span),
                }
            })
        })
        .collect()
}
