use crate::config::AlignerKind;
use crate::plan::Beat;

/// Maps beat narration spans onto wall-clock offsets.
///
/// Implementations must return contiguous windows that start at zero and end
/// exactly at `total_duration_s`; nothing downstream relies on more accuracy
/// than that.
pub trait Aligner: Send + Sync {
    fn name(&self) -> &'static str;

    fn align(&self, beats: &mut [Beat], total_duration_s: f64);
}

/// Heuristic aligner: every beat gets time in proportion to its token count.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProportionalAligner;

impl Aligner for ProportionalAligner {
    fn name(&self) -> &'static str {
        "proportional"
    }

    fn align(&self, beats: &mut [Beat], total_duration_s: f64) {
        map_beats_to_times(beats, total_duration_s);
    }
}

pub fn aligner_for(kind: AlignerKind) -> Box<dyn Aligner> {
    match kind {
        AlignerKind::Proportional => Box::new(ProportionalAligner),
    }
}

/// Assigns `start_s`/`end_s` proportionally to token length.
///
/// Degenerate spans count as one token. The last beat absorbs rounding drift.
pub fn map_beats_to_times(beats: &mut [Beat], total_duration_s: f64) {
    let total_duration_s = total_duration_s.max(0.0);
    let lengths: Vec<usize> = beats.iter().map(|b| b.narration_span.len().max(1)).collect();
    let total_tokens = lengths.iter().sum::<usize>().max(1) as f64;

    let mut cursor = 0.0;
    for (beat, len) in beats.iter_mut().zip(&lengths) {
        let share = (*len as f64 / total_tokens) * total_duration_s;
        let end = (cursor + share).min(total_duration_s);
        beat.start_s = Some(cursor);
        beat.end_s = Some(end);
        cursor = end;
    }

    if let Some(last) = beats.last_mut() {
        last.end_s = Some(total_duration_s);
    }
}

/// Narration length estimate used until the real audio duration is known.
pub fn estimate_duration_s(word_count: usize, words_per_second: f64) -> f64 {
    word_count as f64 / words_per_second.max(0.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{NarrationSpan, ShotType};

    fn beats(spans: &[(usize, usize)]) -> Vec<Beat> {
        spans
            .iter()
            .enumerate()
            .map(|(i, (s, e))| Beat::new(format!("b{i}"), NarrationSpan::new(*s, *e), ShotType::Insert))
            .collect()
    }

    #[test]
    fn coverage_is_contiguous_and_exact() {
        let mut list = beats(&[(0, 7), (7, 19), (19, 20), (20, 53)]);
        map_beats_to_times(&mut list, 97.3);

        let total: f64 = list.iter().map(|b| b.duration_s().unwrap()).sum();
        assert!((total - 97.3).abs() < 1e-9);
        assert_eq!(list[0].start_s, Some(0.0));
        for pair in list.windows(2) {
            assert_eq!(pair[0].end_s, pair[1].start_s);
        }
        assert_eq!(list.last().unwrap().end_s, Some(97.3));
    }

    #[test]
    fn shares_follow_token_lengths() {
        let mut list = beats(&[(0, 10), (10, 30)]);
        ProportionalAligner.align(&mut list, 30.0);
        assert!((list[0].duration_s().unwrap() - 10.0).abs() < 1e-9);
        assert!((list[1].duration_s().unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_spans_count_as_one_token() {
        let mut list = beats(&[(0, 0), (0, 0)]);
        map_beats_to_times(&mut list, 10.0);
        assert!((list[0].duration_s().unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(list[1].end_s, Some(10.0));
    }

    #[test]
    fn estimate_uses_words_per_second() {
        assert!((estimate_duration_s(300, 2.5) - 120.0).abs() < 1e-9);
        assert!(estimate_duration_s(10, 0.0) > 0.0);
    }

    #[test]
    fn aligner_kind_selects_provider() {
        assert_eq!(aligner_for(AlignerKind::Proportional).name(), "proportional");
    }
}
