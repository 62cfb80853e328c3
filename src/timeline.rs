use crate::plan::{ShotType, VisualPlan};
use crate::qa::QaRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub beat_id: String,
    pub start_s: f64,
    pub end_s: f64,
    pub shot_type: ShotType,
    pub seed_group: String,
    pub image: Option<String>,
    pub transition: String,
}

/// Ordered beat to image mapping handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub audio_path: Option<String>,
    pub total_duration_s: f64,
    pub beats: Vec<TimelineEntry>,
}

const DEFAULT_TRANSITION: &str = "cut";

/// Pairs each planned beat with its QA-chosen image. Entries follow plan order
/// and start where the previous one ended.
pub fn assemble_timeline(plan: &VisualPlan, records: &[QaRecord], audio_path: Option<&str>, total_duration_s: f64) -> Timeline {
    let mut images: HashMap<&str, Option<&str>> = HashMap::new();
    for record in records {
        images
            .entry(record.beat_id.as_str())
            .or_insert(record.chosen_image.as_deref());
    }

    let mut cursor = 0.0f64;
    let beats: Vec<TimelineEntry> = plan
        .beats
        .iter()
        .map(|beat| {
            let (start, end) = beat.timing().unwrap_or((cursor, cursor + beat.estimated_duration_s));
            let start = start.max(cursor);
            let end = end.max(start);
            cursor = end;
            TimelineEntry {
                beat_id: beat.id.clone(),
                start_s: start,
                end_s: end,
                shot_type: beat.shot_type,
                seed_group: beat.seed_group.clone(),
                image: images.get(beat.id.as_str()).copied().flatten().map(str::to_string),
                transition: DEFAULT_TRANSITION.to_string(),
            }
        })
        .collect();

    Timeline {
        audio_path: audio_path.map(str::to_string),
        total_duration_s: total_duration_s.max(cursor),
        beats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Beat, GlobalStyle, NarrationSpan, SCHEMA_VERSION};
    use crate::qa::{Attempt, QaStatus};

    fn record(beat: &str, image: &str) -> QaRecord {
        QaRecord {
            beat_id: beat.to_string(),
            first_try: Attempt {
                similarity: 0.8,
                image: Some(image.to_string()),
            },
            retry: None,
            final_status: QaStatus::Passed,
            chosen_image: Some(image.to_string()),
        }
    }

    fn plan() -> VisualPlan {
        let beats = [("a", 0.0, 10.0), ("b", 10.0, 18.0), ("c", 17.0, 30.0)]
            .iter()
            .enumerate()
            .map(|(i, (id, s, e))| {
                let mut b = Beat::new(*id, NarrationSpan::new(i, i + 1), ShotType::Insert);
                b.start_s = Some(*s);
                b.end_s = Some(*e);
                b
            })
            .collect();
        VisualPlan {
            schema_version: SCHEMA_VERSION.to_string(),
            global_style: GlobalStyle::for_topic("space"),
            entities: Vec::new(),
            beats,
        }
    }

    #[test]
    fn entries_are_ordered_and_non_overlapping() {
        let records = vec![record("a", "a.png"), record("b", "b.png"), record("b", "late.png")];
        let timeline = assemble_timeline(&plan(), &records, Some("narration.mp3"), 30.0);

        assert_eq!(timeline.beats.len(), 3);
        assert_eq!(timeline.audio_path.as_deref(), Some("narration.mp3"));
        assert_eq!(timeline.beats[1].image.as_deref(), Some("b.png"));
        assert_eq!(timeline.beats[2].image, None);
        assert_eq!(timeline.beats[2].start_s, 18.0);
        for pair in timeline.beats.windows(2) {
            assert!(pair[0].end_s <= pair[1].start_s);
        }
        assert_eq!(timeline.total_duration_s, 30.0);
    }
}
