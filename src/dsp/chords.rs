use ndarray::{Array2, Axis};

use super::chroma::A_PITCH_CLASS;
use crate::trajectory::{ChordSpan, CHORD_LABELS, NO_CHORD};

/// Frames whose best template similarity falls below this are labeled "N".
const MIN_SIMILARITY: f32 = 0.6;

/// Binary triad templates in chord-alphabet order (A..G# major, A..G# minor).
fn templates() -> Vec<[f32; 12]> {
    let mut out = Vec::with_capacity(24);
    for minor in [false, true] {
        for root_a in 0..12 {
            let p = (root_a + A_PITCH_CLASS) % 12;
            let third = if minor { 3 } else { 4 };
            let mut t = [0.0f32; 12];
            for offset in [0, third, 7] {
                t[(p + offset) % 12] = 1.0;
            }
            out.push(t);
        }
    }
    out
}

/// Best chord label for a single chroma frame.
fn classify_frame(frame: &[f32], templates: &[[f32; 12]]) -> &'static str {
    let norm = frame.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= 1e-6 {
        return NO_CHORD;
    }

    // Every template has norm sqrt(3)
    let template_norm = 3f32.sqrt();
    let mut best = (0.0f32, None);
    for (i, t) in templates.iter().enumerate() {
        let dot: f32 = frame.iter().zip(t.iter()).map(|(a, b)| a * b).sum();
        let sim = dot / (norm * template_norm);
        if sim > best.0 {
            best = (sim, Some(i));
        }
    }

    match best {
        (sim, Some(i)) if sim >= MIN_SIMILARITY => CHORD_LABELS[i],
        _ => NO_CHORD,
    }
}

/// Template-matching chord recognizer.
///
/// Labels each chroma frame, then merges runs of equal labels into spans
/// timed by `frame_rate` (frames per second).
pub fn detect_chords(chroma: &Array2<f32>, frame_rate: f64) -> Vec<ChordSpan> {
    if chroma.nrows() != 12 || chroma.ncols() == 0 || frame_rate <= 0.0 {
        return Vec::new();
    }

    let templates = templates();
    let labels: Vec<&'static str> = chroma
        .axis_iter(Axis(1))
        .map(|frame| {
            let values: Vec<f32> = frame.iter().copied().collect();
            classify_frame(&values, &templates)
        })
        .collect();

    let mut spans: Vec<ChordSpan> = Vec::new();
    let mut run_start = 0usize;
    for t in 1..=labels.len() {
        if t == labels.len() || labels[t] != labels[run_start] {
            spans.push(ChordSpan::new(
                run_start as f64 / frame_rate,
                t as f64 / frame_rate,
                labels[run_start],
            ));
            run_start = t;
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(pitch_classes: &[usize], count: usize) -> Array2<f32> {
        let mut c = Array2::zeros((12, count));
        for t in 0..count {
            for &pc in pitch_classes {
                c[[pc, t]] = 1.0;
            }
        }
        c
    }

    #[test]
    fn test_templates_follow_alphabet_order() {
        let t = templates();
        // Index 0 = A major: A, C#, E
        assert_eq!(t[0][9], 1.0);
        assert_eq!(t[0][1], 1.0);
        assert_eq!(t[0][4], 1.0);
        // Index 15 = C minor: C, D#, G
        assert_eq!(t[15][0], 1.0);
        assert_eq!(t[15][3], 1.0);
        assert_eq!(t[15][7], 1.0);
    }

    #[test]
    fn test_detects_c_major() {
        let spans = detect_chords(&frames(&[0, 4, 7], 10), 10.0);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].label, CHORD_LABELS[3]);
        assert!((spans[0].end - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_silence_is_no_chord() {
        let spans = detect_chords(&Array2::zeros((12, 4)), 2.0);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].label, NO_CHORD);
    }

    #[test]
    fn test_runs_merge_into_spans() {
        let mut c = frames(&[9, 1, 4], 6);
        for t in 3..6 {
            c.column_mut(t).fill(0.0);
            c[[9, t]] = 1.0;
            c[[0, t]] = 1.0;
            c[[4, t]] = 1.0;
        }
        let spans = detect_chords(&c, 1.0);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].label, CHORD_LABELS[0]);
        assert_eq!(spans[1].label, CHORD_LABELS[12]);
        assert_eq!((spans[1].start, spans[1].end), (3.0, 6.0));
    }
}
