use crate::config::PlannerConfig;
use crate::logi;
use crate::plan::{Beat, Entity, EntityKind, GenerationItem, GlobalStyle, NarrationSpan, ShotType, VisualPlan};
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};

pub const DEFAULT_NEGATIVES: &[&str] = &[
    "logos",
    "watermarks",
    "text",
    "subtitles",
    "frames",
    "borders",
    "lowres",
    "blurry",
    "jpeg artifacts",
    "oversaturated",
    "marble statue skin",
    "plastic skin",
    "mannequin",
    "doll",
    "wax figure",
    "engraving",
    "sketch",
    "cartoon",
    "anime",
    "deformed hands",
    "extra fingers",
    "extra limbs",
    "fused limbs",
    "distorted face",
    "duplicate face",
    "celebrity likeness",
];

const PERIOD_TOPIC_KEYS: &[&str] = &["ancient", "myth", "greece", "rome", "medieval", "renaissance"];

const PERIOD_NEGATIVES: &[&str] = &[
    "modern clothing",
    "anachronisms",
    "digital watch",
    "headphones",
    "smartphone",
    "neon signage",
    "concrete freeway",
    "skyscraper",
    "street light",
    "synthetic fabric",
];

const LIVE_FIGURE_SUFFIX: &str = "living human figures, realistic anatomy";

/// Spans shorter than this borrow surrounding narration for placeholder matching.
const CONTEXT_MIN_TOKENS: usize = 12;
const CONTEXT_WINDOW: usize = 80;

fn template(shot: ShotType) -> &'static str {
    match shot {
        ShotType::Establishing => {
            "Dawn over {PRIMARY_LOCALE} under dramatic clouds; {MAIN_SUBJECT} as a living human figure in the foreground; \
             wide vista, low-angle, rule of thirds, crisp edges; living human figures, realistic anatomy, \
             cinematic volumetric light, {STYLE_CORE}"
        }
        ShotType::EstablishingWideLandscape => {
            "Grand landscape of {REGION} beneath storm light, distant settlements and terrain tied to {MAIN_SUBJECT}; \
             atmospheric perspective, grand scale, crisp edges; living human figures, realistic anatomy, {STYLE_CORE}"
        }
        ShotType::MediumDetail => {
            "Medium portrait of {MAIN_SUBJECT}: calm, intelligent eyes, windswept hair, period-accurate clothing, \
             soft rim light, crisp edges; living human figures, realistic anatomy, cinematic volumetric light, {STYLE_CORE}"
        }
        ShotType::Insert => {
            "Insert close-up of the hands of {MAIN_SUBJECT} handling an object linked to {MOTIF}; shallow depth, \
             cinematic bokeh, tactile skin and material textures; living human figures, realistic anatomy, {STYLE_CORE}"
        }
        ShotType::HeroPropClose => {
            "Hero prop close: artifact evoking {MOTIF} resting on worn stone; engraved detail glinting, \
             extreme macro, shallow depth, crisp edges; {STYLE_CORE}"
        }
        ShotType::Archival => {
            "Archival plate: faded illustration of {SECONDARY_FIGURE} and {MOTIF}; ink wash, foxing, creases; \
             limited sienna and charcoal palette, photographed like a museum artifact under raking light; {STYLE_CORE_ARCHIVAL}"
        }
        ShotType::Reenactment => {
            "Staged reenactment: {SECONDARY_FIGURE} at night near {PRIMARY_LOCALE}, torchlight against storm clouds; \
             low-angle dynamic pose, grounded realism; living human figures, realistic anatomy, \
             cinematic volumetric light, {STYLE_CORE}"
        }
        ShotType::Abstract => {
            "Abstract metaphor for {MOTIF}: swirling light and shadow forms, macro textures, elegant and minimal, \
             controlled palette, crisp edges; {STYLE_CORE}"
        }
        ShotType::Map => {
            "Cartographic interlude: hand-painted map of {REGION} on parchment; coastlines, mountain hatching, cartouche; \
             aged paper texture lit by grazing light; {STYLE_CORE_ARCHIVAL}"
        }
        ShotType::Diagram => {
            "Explanatory diagram of events around {MAIN_SUBJECT}: painted glyphs, simple arrows, \
             subtle gold leaf accents on parchment; studio-lit artifact aesthetic; {STYLE_CORE_ARCHIVAL}"
        }
    }
}

/// Two enforced phrases that keep each framing visually consistent.
pub fn style_locks(shot: ShotType) -> [&'static str; 2] {
    match shot {
        ShotType::Establishing => ["epic, atmospheric", "wide establishing vista"],
        ShotType::EstablishingWideLandscape => ["grand scale", "atmospheric perspective"],
        ShotType::MediumDetail => ["soft rim light", "cinematic volumetric light"],
        ShotType::Insert => ["macro texture detail", "shallow depth of field"],
        ShotType::HeroPropClose => ["extreme macro", "studio-lit artifact"],
        ShotType::Archival => ["aged paper texture", "museum raking light"],
        ShotType::Reenactment => ["dynamic low-angle", "smoke and storm haze"],
        ShotType::Abstract => ["minimal, elegant", "controlled palette"],
        ShotType::Map => ["parchment cartography", "ink hatching"],
        ShotType::Diagram => ["parchment schematic", "flat ink glyphs"],
    }
}

/// Related framings substituted when a shot type has run too long.
pub fn alternates(shot: ShotType) -> &'static [ShotType] {
    match shot {
        ShotType::Establishing => &[ShotType::EstablishingWideLandscape, ShotType::MediumDetail],
        ShotType::EstablishingWideLandscape => &[ShotType::MediumDetail, ShotType::Insert],
        ShotType::MediumDetail => &[ShotType::Insert, ShotType::HeroPropClose],
        ShotType::Insert => &[ShotType::MediumDetail, ShotType::HeroPropClose],
        ShotType::HeroPropClose => &[ShotType::Insert, ShotType::MediumDetail],
        ShotType::Archival => &[ShotType::Diagram, ShotType::Map],
        ShotType::Reenactment => &[ShotType::MediumDetail, ShotType::Insert],
        ShotType::Abstract => &[ShotType::MediumDetail, ShotType::Insert],
        ShotType::Map => &[ShotType::Archival, ShotType::Diagram],
        ShotType::Diagram => &[ShotType::Archival, ShotType::Map],
    }
}

/// The last `max_run` shot types emitted, threaded through the beat fold.
#[derive(Debug, Clone)]
pub struct DiversityWindow {
    recent: VecDeque<ShotType>,
    max_run: usize,
    allowed: Vec<ShotType>,
}

impl DiversityWindow {
    /// Substitutes are drawn only from `allowed`; an empty list allows every
    /// shot type.
    pub fn new(max_run: usize, allowed: &[ShotType]) -> Self {
        let max_run = max_run.max(1);
        Self {
            recent: VecDeque::with_capacity(max_run),
            max_run,
            allowed: if allowed.is_empty() {
                ShotType::ALL.to_vec()
            } else {
                allowed.to_vec()
            },
        }
    }

    fn substitute(&self, proposed: ShotType) -> ShotType {
        alternates(proposed)
            .iter()
            .chain(self.allowed.iter())
            .copied()
            .find(|alt| *alt != proposed && self.allowed.contains(alt))
            .unwrap_or(proposed)
    }

    /// Returns the updated window and the shot type actually used.
    pub fn admit(mut self, proposed: ShotType) -> (Self, ShotType) {
        let saturated =
            self.recent.len() >= self.max_run && self.recent.iter().all(|s| *s == proposed);
        let chosen = if saturated {
            self.substitute(proposed)
        } else {
            proposed
        };

        self.recent.push_back(chosen);
        while self.recent.len() > self.max_run {
            self.recent.pop_front();
        }
        (self, chosen)
    }
}

pub fn enforce_diversity(shots: &[ShotType], max_run: usize, allowed: &[ShotType]) -> Vec<ShotType> {
    shots
        .iter()
        .fold(
            (DiversityWindow::new(max_run, allowed), Vec::with_capacity(shots.len())),
            |(window, mut out), shot| {
                let (window, chosen) = window.admit(*shot);
                out.push(chosen);
                (window, out)
            },
        )
        .1
}

/// False when one shot type dominates any full sliding window of `window` beats
/// (or the whole list, when shorter than a window).
pub fn diversity_ok(shots: &[ShotType], window: usize, max_ratio: f64) -> bool {
    if shots.is_empty() {
        return true;
    }
    let window = window.clamp(1, shots.len());
    shots.windows(window).all(|slice| {
        let mut counts: HashMap<ShotType, usize> = HashMap::new();
        for s in slice {
            *counts.entry(*s).or_default() += 1;
        }
        let top = counts.values().copied().max().unwrap_or(0);
        top as f64 / slice.len() as f64 <= max_ratio
    })
}

pub fn topic_negatives(topic: &str) -> Vec<String> {
    let t = topic.to_lowercase();
    if PERIOD_TOPIC_KEYS.iter().any(|k| t.contains(k)) {
        PERIOD_NEGATIVES.iter().map(|s| s.to_string()).collect()
    } else {
        Vec::new()
    }
}

/// Splits a comma-joined negative prompt into its terms.
pub fn split_negatives(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drops case-insensitive repeats from a chain of negative terms, keeping the
/// first spelling seen.
pub fn merge_negatives<I, S>(terms: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for term in terms {
        let term = term.as_ref().trim();
        if !term.is_empty() && seen.insert(term.to_lowercase()) {
            out.push(term.to_string());
        }
    }
    out
}

pub fn default_negatives() -> impl Iterator<Item = String> {
    DEFAULT_NEGATIVES.iter().map(|s| s.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Placeholders {
    pub main_subject: String,
    pub secondary_figure: String,
    pub primary_locale: String,
    pub motif: String,
    pub region: String,
}

fn display_name(entity: &Entity) -> String {
    entity.id.replace(['_', '-'], " ")
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(idx, _)| {
        let before = haystack[..idx].chars().next_back();
        let after = haystack[idx + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn mentioned(lower_text: &str, entity: &Entity) -> bool {
    contains_word(lower_text, &display_name(entity).to_lowercase())
}

/// Picks narrative placeholders from the entities named in `text`, falling
/// back to persistent entities and then to generic phrases.
pub fn choose_subjects_from_context(text: &str, entities: &[Entity]) -> Placeholders {
    let lower = text.to_lowercase();
    let of_kind = |kinds: &[EntityKind]| -> Vec<&Entity> {
        entities.iter().filter(|e| kinds.contains(&e.kind)).collect()
    };

    let people = of_kind(&[EntityKind::Person]);
    let places = of_kind(&[EntityKind::Location]);
    let things = of_kind(&[EntityKind::Object, EntityKind::Concept]);

    let people_here: Vec<&Entity> = people.iter().copied().filter(|e| mentioned(&lower, e)).collect();
    let places_here: Vec<&Entity> = places.iter().copied().filter(|e| mentioned(&lower, e)).collect();

    let main = people_here
        .first()
        .copied()
        .or_else(|| people.iter().copied().find(|e| e.persist_across_beats));
    let main_subject = match main {
        Some(e) if !e.descriptor.is_empty() && e.descriptor != e.id => {
            let short: Vec<&str> = e.descriptor.split_whitespace().take(8).collect();
            format!("{}, {}", display_name(e), short.join(" "))
        }
        Some(e) => display_name(e),
        None => "the central figure".to_string(),
    };

    let secondary_figure = people_here
        .iter()
        .find(|e| main.is_none_or(|m| m.id != e.id))
        .map(|e| display_name(e))
        .unwrap_or_else(|| "a key figure".to_string());

    let locale = places_here
        .first()
        .copied()
        .or_else(|| places.iter().copied().find(|e| e.persist_across_beats));
    let primary_locale = locale
        .map(display_name)
        .unwrap_or_else(|| "a grand setting".to_string());

    let motif = things
        .iter()
        .find(|e| mentioned(&lower, e))
        .map(|e| display_name(e))
        .unwrap_or_else(|| "an origin story".to_string());

    let region = places_here
        .get(1)
        .copied()
        .or(locale)
        .map(display_name)
        .unwrap_or_else(|| "the known world".to_string());

    Placeholders {
        main_subject,
        secondary_figure,
        primary_locale,
        motif,
        region,
    }
}

/// Narration substring for a span, widened when the span is too short to say much.
pub fn window_tokens(tokens: &[&str], span: NarrationSpan) -> String {
    let st = span.start_token.min(tokens.len());
    let et = span.end_token.clamp(st, tokens.len());
    if et - st >= CONTEXT_MIN_TOKENS {
        return tokens[st..et].join(" ");
    }
    let lo = st.saturating_sub(CONTEXT_WINDOW);
    let hi = (et + CONTEXT_WINDOW).min(tokens.len());
    tokens[lo..hi].join(" ")
}

pub fn style_core(style: &GlobalStyle) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in [
        style.style_template_key.as_str(),
        "rich natural palette",
        style.tone.as_str(),
    ] {
        if !part.trim().is_empty() {
            parts.push(part.trim());
        }
    }
    parts.join(", ")
}

fn style_core_archival(style: &GlobalStyle) -> String {
    format!(
        "scholarly mood, restrained palette, museum-lit artifact, {}",
        style_core(style)
    )
}

fn cached_regex(cell: &'static OnceCell<Regex>, pattern: &str) -> Result<&'static Regex> {
    cell.get_or_try_init(|| {
        Regex::new(pattern).with_context(|| format!("failed to compile regex {pattern}"))
    })
}

fn opener_regex() -> Result<&'static Regex> {
    static OPENER_RE: OnceCell<Regex> = OnceCell::new();
    let names: Vec<String> = ShotType::ALL
        .iter()
        .map(|s| s.as_str().replace('_', "[ _]"))
        .collect();
    let pattern = format!(r"(?i)^\s*(?:(?:{})\s*[,:]\s*)+", names.join("|"));
    cached_regex(&OPENER_RE, &pattern)
}

fn live_figure_regex() -> Result<&'static Regex> {
    static LIVE_RE: OnceCell<Regex> = OnceCell::new();
    cached_regex(
        &LIVE_RE,
        r"(?i)\b(?:as a living human figure|living human figures?|realistic anatomy)\b",
    )
}

/// Keeps at most `max_tokens` whitespace-separated words.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().take(max_tokens).collect();
    words
        .join(" ")
        .trim_end_matches([',', ';', ':', ' '])
        .to_string()
}

fn dedupe_descriptors(text: &str) -> String {
    let mut seen = HashSet::new();
    text.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty() && seen.insert(p.to_lowercase()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Cleans a prompt: drops leading shot-name openers and repeated comma
/// descriptors, removes live-figure language from artifact shots, and caps
/// the word count.
pub fn sanitize_prompt(text: &str, shot: ShotType, max_tokens: usize) -> String {
    let mut out = text.trim().to_string();
    if let Ok(re) = opener_regex() {
        out = re.replace(&out, "").into_owned();
    }
    if shot.is_artifact() {
        if let Ok(re) = live_figure_regex() {
            out = re.replace_all(&out, "").into_owned();
        }
    }
    out = dedupe_descriptors(&out);
    out = out.replace(" ;", ";").replace(";,", ";");
    truncate_to_tokens(&out, max_tokens)
}

pub fn build_prompt_for_shot(
    shot: ShotType,
    style: &GlobalStyle,
    placeholders: &Placeholders,
    max_tokens: usize,
) -> String {
    let mut prompt = template(shot)
        .replace("{MAIN_SUBJECT}", &placeholders.main_subject)
        .replace("{SECONDARY_FIGURE}", &placeholders.secondary_figure)
        .replace("{PRIMARY_LOCALE}", &placeholders.primary_locale)
        .replace("{MOTIF}", &placeholders.motif)
        .replace("{REGION}", &placeholders.region)
        .replace("{STYLE_CORE_ARCHIVAL}", &style_core_archival(style))
        .replace("{STYLE_CORE}", &style_core(style));

    if !shot.is_artifact() && !prompt.contains("living human figures") {
        prompt.push_str(", ");
        prompt.push_str(LIVE_FIGURE_SUFFIX);
    }
    sanitize_prompt(&prompt, shot, max_tokens)
}

/// Rewrites every beat's shot type and generation instruction in narration
/// order. Topic negatives follow the run's `topic`, not the plan's style label.
pub fn enrich_beats(plan: &mut VisualPlan, tokens: &[&str], topic: &str, cfg: &PlannerConfig) {
    let VisualPlan {
        global_style,
        entities,
        beats,
        ..
    } = plan;
    let global_style: &GlobalStyle = global_style;
    let entities: &[Entity] = entities;
    let topic_negs = topic_negatives(topic);

    beats
        .iter_mut()
        .fold(DiversityWindow::new(cfg.max_consecutive_shot, &cfg.shot_types), |window, beat| {
            let (window, shot) = window.admit(beat.shot_type);
            if shot != beat.shot_type {
                logi(format!(
                    "Shot diversity: beat {} {} -> {}",
                    beat.id, beat.shot_type, shot
                ));
            }

            let context = window_tokens(tokens, beat.narration_span);
            let placeholders = choose_subjects_from_context(&context, entities);
            let prompt = build_prompt_for_shot(shot, global_style, &placeholders, cfg.max_prompt_tokens);

            let beat_negs: Vec<String> = beat
                .prompts
                .iter()
                .flat_map(|p| p.negatives.iter().cloned())
                .collect();
            let negatives = merge_negatives(
                default_negatives()
                    .chain(topic_negs.iter().cloned())
                    .chain(beat_negs),
            );
            let variation = beat.prompts.first().map(|p| p.variation).unwrap_or(0.0);

            beat.shot_type = shot;
            beat.prompts = vec![GenerationItem {
                kind: "image".to_string(),
                prompt,
                negatives,
                style_locks: style_locks(shot).iter().map(|s| s.to_string()).collect(),
                variation,
            }];
            window
        });
}

fn token_estimate_s(span: NarrationSpan, words_per_second: f64) -> f64 {
    span.len() as f64 / words_per_second.max(1e-6)
}

/// Splits beats longer than `max_beat_s` into `_pN` children whose spans
/// partition the parent span and whose durations stay within the hard bounds.
pub fn split_beats_by_duration(beats: Vec<Beat>, cfg: &PlannerConfig) -> Vec<Beat> {
    let (hard_min, hard_max) = (cfg.min_beat_s, cfg.max_beat_s);
    let wps = cfg.words_per_second;
    let target = cfg.target_midpoint().max(0.1);
    let mut out = Vec::with_capacity(beats.len());

    for mut beat in beats {
        let span = beat.narration_span;
        let token_len = span.len();
        let timing = beat.timing().filter(|(s, e)| e > s);
        let dur = timing
            .map(|(s, e)| e - s)
            .unwrap_or_else(|| token_estimate_s(span, wps))
            .max(hard_min);

        let segments = ((dur / target).round() as usize).max(2).min(token_len);
        if dur <= hard_max || segments < 2 {
            if let Some(start) = beat.start_s {
                let end = start + dur.clamp(hard_min, hard_max);
                beat.end_s = Some(end);
                beat.estimated_duration_s = end - start;
            } else {
                beat.estimated_duration_s = dur.min(hard_max);
            }
            out.push(beat);
            continue;
        }

        let mut cursor_s = beat.start_s.unwrap_or(0.0);
        for i in 0..segments {
            let seg_st = span.start_token + (i * token_len) / segments;
            let seg_et = span.start_token + ((i + 1) * token_len) / segments;
            let seg_tokens = (seg_et - seg_st) as f64;

            let seg_dur = match timing {
                Some((s, e)) => seg_tokens / token_len as f64 * (e - s),
                None => seg_tokens / wps.max(1e-6),
            }
            .clamp(hard_min, hard_max);

            let mut child = beat.clone();
            child.id = format!("{}_p{}", beat.id, i + 1);
            child.seed_group = format!("{}_p{}", beat.seed_group, i + 1);
            child.narration_span = NarrationSpan::new(seg_st, seg_et);
            child.start_s = Some(cursor_s);
            child.end_s = Some(cursor_s + seg_dur);
            child.estimated_duration_s = seg_dur;
            cursor_s += seg_dur;
            out.push(child);
        }
    }

    out
}

/// Forces a contiguous, monotonic timeline: each beat starts where the
/// previous one ended and keeps its own length (token-estimated when unusable),
/// never less than `min_beat_s`.
pub fn chain_timeline(beats: &mut [Beat], cfg: &PlannerConfig) {
    let mut cursor: Option<f64> = None;
    for beat in beats.iter_mut() {
        let len = beat
            .duration_s()
            .filter(|d| *d > 0.0)
            .unwrap_or_else(|| token_estimate_s(beat.narration_span, cfg.words_per_second))
            .max(cfg.min_beat_s);
        let start = match cursor {
            Some(t) => t,
            None => beat.start_s.unwrap_or(0.0).max(0.0),
        };
        beat.start_s = Some(start);
        let end = start + len;
        beat.end_s = Some(end);
        beat.estimated_duration_s = end - start;
        cursor = Some(end);
    }
}

fn log_density(beats: &[Beat]) {
    let mut durs: Vec<f64> = beats.iter().filter_map(Beat::duration_s).collect();
    if durs.is_empty() {
        return;
    }
    durs.sort_by(|a, b| a.total_cmp(b));
    let total: f64 = durs.iter().sum();
    logi(format!(
        "Planner density: beats={} total_s={:.1} avg={:.2}s min={:.2}s p50={:.2}s max={:.2}s",
        durs.len(),
        total,
        total / durs.len() as f64,
        durs[0],
        durs[durs.len() / 2],
        durs[durs.len() - 1]
    ));
}

/// Full Beat Planner pass over an aligned plan: duration splitting, then
/// prompts and diversity over the split beats, then time chaining.
pub fn plan_beats(plan: &mut VisualPlan, narration: &str, topic: &str, cfg: &PlannerConfig) {
    let tokens: Vec<&str> = narration.split_whitespace().collect();

    let beats = std::mem::take(&mut plan.beats);
    plan.beats = split_beats_by_duration(beats, cfg);
    enrich_beats(plan, &tokens, topic, cfg);
    chain_timeline(&mut plan.beats, cfg);
    log_density(&plan.beats);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SCHEMA_VERSION;

    fn entity(id: &str, kind: EntityKind) -> Entity {
        Entity {
            id: id.to_string(),
            kind,
            descriptor: id.to_string(),
            persist_across_beats: true,
        }
    }

    fn timed_beat(id: &str, span: (usize, usize), times: (f64, f64), shot: ShotType) -> Beat {
        let mut b = Beat::new(id, NarrationSpan::new(span.0, span.1), shot);
        b.start_s = Some(times.0);
        b.end_s = Some(times.1);
        b.prompts.push(GenerationItem::image("placeholder"));
        b
    }

    #[test]
    fn five_establishing_shots_never_run_three_deep() {
        let shots = enforce_diversity(&[ShotType::Establishing; 5], 2, &[]);
        assert_eq!(shots.len(), 5);
        for run in shots.windows(3) {
            assert!(!(run[0] == run[1] && run[1] == run[2]), "run of three: {:?}", shots);
        }
        assert_eq!(shots[2], ShotType::EstablishingWideLandscape);
    }

    #[test]
    fn varied_shots_pass_through() {
        let input = [ShotType::Map, ShotType::Insert, ShotType::Map, ShotType::Archival];
        assert_eq!(enforce_diversity(&input, 2, &[]), input.to_vec());
    }

    #[test]
    fn substitutes_stay_within_configured_shots() {
        let allowed = [ShotType::Establishing, ShotType::Archival];
        let shots = enforce_diversity(&[ShotType::Establishing; 5], 2, &allowed);
        assert!(shots.iter().all(|s| allowed.contains(s)), "{:?}", shots);
        assert_eq!(shots[2], ShotType::Archival);

        let only = enforce_diversity(&[ShotType::Map; 3], 2, &[ShotType::Map]);
        assert_eq!(only, vec![ShotType::Map; 3]);
    }

    #[test]
    fn negatives_dedupe_case_insensitively() {
        let merged = merge_negatives(["Blurry", "text", "blurry", " Skyscraper ", "TEXT", ""]);
        assert_eq!(merged, vec!["Blurry", "text", "Skyscraper"]);
    }

    #[test]
    fn period_topics_add_anachronism_negatives() {
        assert!(topic_negatives("Ancient Rome").contains(&"smartphone".to_string()));
        assert!(topic_negatives("space").is_empty());
    }

    #[test]
    fn sanitize_drops_openers_and_duplicate_descriptors() {
        let out = sanitize_prompt(
            "establishing, establishing, foggy harbor,, foggy harbor, ships",
            ShotType::Establishing,
            75,
        );
        assert_eq!(out, "foggy harbor, ships");
    }

    #[test]
    fn artifact_shots_lose_live_figure_language() {
        let out = sanitize_prompt(
            "old map of the coast, living human figures, realistic anatomy, ink",
            ShotType::Map,
            75,
        );
        assert!(!out.to_lowercase().contains("living human"));
        assert!(!out.to_lowercase().contains("anatomy"));
        assert_eq!(out, "old map of the coast, ink");
    }

    #[test]
    fn truncation_respects_word_boundaries() {
        let text = "one two three, four five";
        assert_eq!(truncate_to_tokens(text, 3), "one two three");
        assert_eq!(truncate_to_tokens(text, 10), text);
    }

    #[test]
    fn placeholders_come_from_mentioned_entities() {
        let entities = vec![
            entity("caesar", EntityKind::Person),
            entity("brutus", EntityKind::Person),
            entity("rome", EntityKind::Location),
            entity("dagger", EntityKind::Object),
        ];
        let p = choose_subjects_from_context("Brutus raised the dagger in Rome", &entities);
        assert_eq!(p.main_subject, "brutus");
        assert_eq!(p.primary_locale, "rome");
        assert_eq!(p.motif, "dagger");
        assert_eq!(p.region, "rome");
        assert_eq!(p.secondary_figure, "a key figure");
    }

    #[test]
    fn placeholders_fall_back_to_generic_phrases() {
        let p = choose_subjects_from_context("the sky was dark", &[]);
        assert_eq!(p.main_subject, "the central figure");
        assert_eq!(p.region, "the known world");
    }

    #[test]
    fn short_spans_widen_context() {
        let tokens: Vec<&str> = "a b c d e f g h i j k l m n o p".split(' ').collect();
        let narrow = window_tokens(&tokens, NarrationSpan::new(5, 7));
        assert_eq!(narrow.split(' ').count(), tokens.len());
        let wide = window_tokens(&tokens, NarrationSpan::new(0, 14));
        assert_eq!(wide.split(' ').count(), 14);
    }

    #[test]
    fn shot_prompts_respect_figure_rules_and_budget() {
        let style = GlobalStyle::for_topic("history");
        let p = choose_subjects_from_context("", &[]);
        let medium = build_prompt_for_shot(ShotType::MediumDetail, &style, &p, 75);
        assert!(medium.contains("living human figures"));
        assert!(medium.split_whitespace().count() <= 75);

        let diagram = build_prompt_for_shot(ShotType::Diagram, &style, &p, 75);
        assert!(!diagram.contains("living human"));

        let tiny = build_prompt_for_shot(ShotType::Establishing, &style, &p, 10);
        assert!(tiny.split_whitespace().count() <= 10);
    }

    #[test]
    fn forty_second_beat_splits_within_bounds() {
        let cfg = PlannerConfig::default();
        let parent = timed_beat("beat_001", (0, 100), (0.0, 40.0), ShotType::Insert);
        let out = split_beats_by_duration(vec![parent], &cfg);

        assert!(out.len() >= 3);
        assert_eq!(out[0].narration_span.start_token, 0);
        assert_eq!(out.last().unwrap().narration_span.end_token, 100);
        for pair in out.windows(2) {
            assert_eq!(pair[0].narration_span.end_token, pair[1].narration_span.start_token);
            assert_eq!(pair[0].end_s, pair[1].start_s);
        }
        for (i, child) in out.iter().enumerate() {
            let d = child.duration_s().unwrap();
            assert!(d >= cfg.min_beat_s && d <= cfg.max_beat_s, "child {i} lasts {d}");
            assert_eq!(child.id, format!("beat_001_p{}", i + 1));
            assert_eq!(child.seed_group, format!("beat_001_p{}", i + 1));
        }
    }

    #[test]
    fn short_beats_are_stretched_to_minimum() {
        let cfg = PlannerConfig::default();
        let out = split_beats_by_duration(
            vec![timed_beat("a", (0, 5), (0.0, 2.0), ShotType::Insert)],
            &cfg,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].end_s, Some(6.0));
    }

    #[test]
    fn chaining_closes_overlaps_and_gaps() {
        let cfg = PlannerConfig::default();
        let mut beats = vec![
            timed_beat("a", (0, 10), (0.0, 8.0), ShotType::Insert),
            timed_beat("b", (10, 20), (6.0, 15.0), ShotType::Map),
            timed_beat("c", (20, 30), (20.0, 14.0), ShotType::Map),
        ];
        chain_timeline(&mut beats, &cfg);
        assert_eq!(beats[1].start_s, Some(8.0));
        assert_eq!(beats[1].end_s, Some(17.0));
        assert_eq!(beats[2].start_s, Some(17.0));
        assert!(beats[2].end_s.unwrap() >= 17.0 + cfg.min_beat_s);
    }

    #[test]
    fn chained_beats_never_drop_below_minimum() {
        let cfg = PlannerConfig::default();
        let narration = vec!["word"; 30].join(" ");
        let mut plan = VisualPlan {
            schema_version: SCHEMA_VERSION.to_string(),
            global_style: GlobalStyle::for_topic("history"),
            entities: Vec::new(),
            beats: vec![
                timed_beat("a", (0, 10), (0.0, 4.0), ShotType::Insert),
                timed_beat("b", (10, 20), (4.0, 8.0), ShotType::Map),
                timed_beat("c", (20, 30), (8.0, 12.0), ShotType::Archival),
            ],
        };

        plan_beats(&mut plan, &narration, "history", &cfg);

        for pair in plan.beats.windows(2) {
            assert_eq!(pair[0].end_s, pair[1].start_s);
        }
        for b in &plan.beats {
            let d = b.duration_s().unwrap();
            assert!(d >= cfg.min_beat_s - 1e-9, "beat {} lasts {d}", b.id);
        }
    }

    #[test]
    fn split_children_are_diversified() {
        let cfg = PlannerConfig::default();
        let narration = vec!["word"; 200].join(" ");
        let mut plan = VisualPlan {
            schema_version: SCHEMA_VERSION.to_string(),
            global_style: GlobalStyle::for_topic("history"),
            entities: Vec::new(),
            beats: vec![timed_beat("siege", (0, 200), (0.0, 80.0), ShotType::Reenactment)],
        };

        plan_beats(&mut plan, &narration, "history", &cfg);

        assert!(plan.beats.len() >= 6);
        let shots: Vec<ShotType> = plan.beats.iter().map(|b| b.shot_type).collect();
        for run in shots.windows(cfg.max_consecutive_shot + 1) {
            assert!(run.iter().any(|s| *s != run[0]), "run too long: {:?}", shots);
        }
        for b in &plan.beats {
            assert_eq!(b.prompts[0].style_locks, style_locks(b.shot_type).map(str::to_string).to_vec());
        }
    }

    #[test]
    fn topic_negatives_follow_run_topic() {
        let cfg = PlannerConfig::default();
        let narration = vec!["word"; 20].join(" ");
        let mut plan = VisualPlan {
            schema_version: SCHEMA_VERSION.to_string(),
            global_style: GlobalStyle::for_topic("Ancient Rome"),
            entities: Vec::new(),
            beats: vec![timed_beat("a", (0, 20), (0.0, 8.0), ShotType::Insert)],
        };

        plan_beats(&mut plan, &narration, "space", &cfg);

        assert!(!plan.beats[0].prompts[0].negatives.contains(&"smartphone".to_string()));
    }

    #[test]
    fn plan_beats_enriches_and_splits() {
        let cfg = PlannerConfig::default();
        let narration = vec!["word"; 100].join(" ");
        let mut plan = VisualPlan {
            schema_version: SCHEMA_VERSION.to_string(),
            global_style: GlobalStyle::for_topic("ancient greece"),
            entities: Vec::new(),
            beats: vec![timed_beat("beat_001", (0, 100), (0.0, 40.0), ShotType::Establishing)],
        };
        plan.beats[0].prompts[0].negatives = vec!["Helmets".to_string()];

        plan_beats(&mut plan, &narration, "ancient greece", &cfg);

        assert!(plan.beats.len() >= 3);
        let item = &plan.beats[0].prompts[0];
        assert_eq!(item.style_locks.len(), 2);
        assert!(item.negatives.contains(&"Helmets".to_string()));
        assert!(item.negatives.contains(&"skyscraper".to_string()));
    }

    #[test]
    fn diversity_audit_flags_dominant_shot() {
        let varied = [
            ShotType::Map,
            ShotType::Insert,
            ShotType::Archival,
            ShotType::Abstract,
            ShotType::Diagram,
        ];
        assert!(diversity_ok(&varied, 8, 0.4));
        assert!(!diversity_ok(&[ShotType::Insert; 4], 8, 0.4));
    }
}
