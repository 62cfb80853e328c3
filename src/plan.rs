use crate::error::{PlannerError, PlannerResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

pub const SCHEMA_VERSION: &str = "v1";

/// Visual framing category; selects the prompt template and style locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotType {
    Establishing,
    EstablishingWideLandscape,
    MediumDetail,
    Insert,
    HeroPropClose,
    Archival,
    Reenactment,
    Abstract,
    Map,
    Diagram,
}

impl ShotType {
    pub const ALL: [ShotType; 10] = [
        ShotType::Establishing,
        ShotType::EstablishingWideLandscape,
        ShotType::MediumDetail,
        ShotType::Insert,
        ShotType::HeroPropClose,
        ShotType::Archival,
        ShotType::Reenactment,
        ShotType::Abstract,
        ShotType::Map,
        ShotType::Diagram,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ShotType::Establishing => "establishing",
            ShotType::EstablishingWideLandscape => "establishing_wide_landscape",
            ShotType::MediumDetail => "medium_detail",
            ShotType::Insert => "insert",
            ShotType::HeroPropClose => "hero_prop_close",
            ShotType::Archival => "archival",
            ShotType::Reenactment => "reenactment",
            ShotType::Abstract => "abstract",
            ShotType::Map => "map",
            ShotType::Diagram => "diagram",
        }
    }

    /// Lenient parse used for generator output: case, spaces and hyphens are ignored.
    pub fn parse_loose(raw: &str) -> Option<ShotType> {
        let key: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        ShotType::ALL.into_iter().find(|s| s.as_str() == key)
    }

    /// Shots that depict artifacts rather than living people.
    pub fn is_artifact(self) -> bool {
        matches!(
            self,
            ShotType::Archival | ShotType::Map | ShotType::Diagram | ShotType::Abstract
        )
    }

    /// Shot name handed to renderers that only know the core framings.
    pub fn render_alias(self) -> ShotType {
        match self {
            ShotType::Map => ShotType::EstablishingWideLandscape,
            ShotType::Diagram => ShotType::HeroPropClose,
            other => other,
        }
    }
}

impl fmt::Display for ShotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShotType {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShotType::parse_loose(s).ok_or_else(|| PlannerError::Config(format!("unknown shot type: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStyle {
    pub topic: String,
    pub style_template_key: String,
    pub aspect_ratio: String,
    pub color_profile: String,
    pub tone: String,
}

impl GlobalStyle {
    pub fn for_topic(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            style_template_key: topic.to_string(),
            aspect_ratio: "16:9".to_string(),
            color_profile: "sRGB".to_string(),
            tone: "documentary".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Location,
    Object,
    Concept,
}

impl EntityKind {
    pub fn parse_loose(raw: &str) -> EntityKind {
        match raw.trim().to_ascii_lowercase().as_str() {
            "person" | "character" | "figure" | "people" => EntityKind::Person,
            "location" | "place" | "region" | "site" => EntityKind::Location,
            "object" | "artifact" | "item" | "prop" => EntityKind::Object,
            _ => EntityKind::Concept,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    pub descriptor: String,
    #[serde(default = "default_true")]
    pub persist_across_beats: bool,
}

fn default_true() -> bool {
    true
}

/// Half-open token range `[start_token, end_token)` into the narration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NarrationSpan {
    pub start_token: usize,
    pub end_token: usize,
}

impl NarrationSpan {
    pub fn new(start_token: usize, end_token: usize) -> Self {
        Self {
            start_token,
            end_token: end_token.max(start_token),
        }
    }

    pub fn len(&self) -> usize {
        self.end_token.saturating_sub(self.start_token)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One generation instruction attached to a beat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub prompt: String,
    #[serde(default)]
    pub negatives: Vec<String>,
    #[serde(default)]
    pub style_locks: Vec<String>,
    #[serde(default)]
    pub variation: f64,
}

impl GenerationItem {
    pub fn image(prompt: impl Into<String>) -> Self {
        Self {
            kind: "image".to_string(),
            prompt: prompt.into(),
            negatives: Vec::new(),
            style_locks: Vec::new(),
            variation: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub narration_span: NarrationSpan,
    pub estimated_duration_s: f64,
    pub shot_type: ShotType,
    pub seed_group: String,
    pub prompts: Vec<GenerationItem>,
    #[serde(default)]
    pub overlays: Vec<serde_json::Value>,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_s: Option<f64>,
}

impl Beat {
    pub fn new(id: impl Into<String>, span: NarrationSpan, shot_type: ShotType) -> Self {
        let id = id.into();
        Self {
            seed_group: id.clone(),
            id,
            title: String::new(),
            summary: String::new(),
            narration_span: span,
            estimated_duration_s: 0.0,
            shot_type,
            prompts: Vec::new(),
            overlays: Vec::new(),
            notes: String::new(),
            start_s: None,
            end_s: None,
        }
    }

    pub fn timing(&self) -> Option<(f64, f64)> {
        match (self.start_s, self.end_s) {
            (Some(s), Some(e)) => Some((s, e)),
            _ => None,
        }
    }

    pub fn duration_s(&self) -> Option<f64> {
        self.timing().map(|(s, e)| e - s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualPlan {
    pub schema_version: String,
    pub global_style: GlobalStyle,
    #[serde(default)]
    pub entities: Vec<Entity>,
    pub beats: Vec<Beat>,
}

impl VisualPlan {
    pub fn entity_map(&self) -> HashMap<&str, &Entity> {
        self.entities.iter().map(|e| (e.id.as_str(), e)).collect()
    }

    /// Checks the structural invariants every downstream stage relies on:
    /// unique entity ids, at least one beat, non-empty beats that partition
    /// `[0, total_tokens)` in order, and at least one generation item per beat.
    pub fn validate(&self, total_tokens: usize) -> PlannerResult<()> {
        let mut ids = HashSet::new();
        for entity in &self.entities {
            if !ids.insert(entity.id.as_str()) {
                return Err(PlannerError::InvalidPlan(format!("duplicate entity id {}", entity.id)));
            }
        }

        if self.beats.is_empty() {
            return Err(PlannerError::InvalidPlan("plan has no beats".to_string()));
        }

        let mut cursor = 0usize;
        for beat in &self.beats {
            let span = beat.narration_span;
            if span.start_token != cursor {
                return Err(PlannerError::InvalidPlan(format!(
                    "beat {} starts at token {} but previous beat ended at {}",
                    beat.id, span.start_token, cursor
                )));
            }
            if span.is_empty() {
                return Err(PlannerError::InvalidPlan(format!("beat {} has an empty span", beat.id)));
            }
            if beat.prompts.is_empty() {
                return Err(PlannerError::InvalidPlan(format!("beat {} has no prompts", beat.id)));
            }
            cursor = span.end_token;
        }

        if cursor != total_tokens.max(1) {
            return Err(PlannerError::InvalidPlan(format!(
                "beats cover {} tokens, narration has {}",
                cursor, total_tokens
            )));
        }

        Ok(())
    }
}
