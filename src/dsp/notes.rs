use ndarray::{Array2, Axis};

use super::chroma::hz_to_midi;
use crate::trajectory::{NoteOnset, MIDI_NOTE_COUNT};

/// Lowest piano key (A0).
const MIN_FREQ: f32 = 27.5;

/// Highest piano key (C8).
const MAX_FREQ: f32 = 4186.0;

/// Frames whose peak is below this fraction of the global peak are unvoiced.
const VOICING_THRESHOLD: f32 = 0.1;

/// Dominant-pitch note tracker.
///
/// Picks the strongest bin per STFT frame, refines it by parabolic
/// interpolation and emits an onset whenever the rounded MIDI pitch changes.
/// Unvoiced frames end the current note.
pub fn detect_notes(magnitude: &Array2<f32>, freqs: &[f32], frame_rate: f64) -> Vec<NoteOnset> {
    if magnitude.ncols() == 0 || frame_rate <= 0.0 || freqs.len() < 3 {
        return Vec::new();
    }

    let bin_width = freqs[1] - freqs[0];
    let lo = freqs.iter().position(|&f| f >= MIN_FREQ).unwrap_or(freqs.len());
    let hi = freqs
        .iter()
        .rposition(|&f| f <= MAX_FREQ)
        .map_or(0, |i| i + 1);
    if lo >= hi {
        return Vec::new();
    }

    let global_peak = magnitude
        .slice(ndarray::s![lo..hi, ..])
        .iter()
        .cloned()
        .fold(0.0f32, f32::max);
    if global_peak <= 0.0 {
        return Vec::new();
    }
    let floor = global_peak * VOICING_THRESHOLD;

    let mut notes = Vec::new();
    let mut current: Option<u8> = None;

    for (t, frame) in magnitude.axis_iter(Axis(1)).enumerate() {
        let (peak_bin, peak) = (lo..hi)
            .map(|k| (k, frame[k]))
            .fold((lo, f32::NEG_INFINITY), |best, c| if c.1 > best.1 { c } else { best });

        if peak < floor {
            current = None;
            continue;
        }

        let offset = if peak_bin > 0 && peak_bin + 1 < frame.len() {
            let (a, b, c) = (frame[peak_bin - 1], peak, frame[peak_bin + 1]);
            let denom = a - 2.0 * b + c;
            if denom.abs() > 1e-12 { 0.5 * (a - c) / denom } else { 0.0 }
        } else {
            0.0
        };
        let hz = freqs[peak_bin] + offset * bin_width;
        if hz <= 0.0 {
            continue;
        }

        let pitch = hz_to_midi(hz)
            .round()
            .clamp(0.0, (MIDI_NOTE_COUNT - 1) as f32) as u8;
        if current != Some(pitch) {
            notes.push(NoteOnset {
                time: t as f64 / frame_rate,
                pitch,
            });
            current = Some(pitch);
        }
    }

    notes
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spectrum with one active bin per frame.
    fn spike_frames(bins: &[usize], n_bins: usize) -> Array2<f32> {
        let mut m = Array2::zeros((n_bins, bins.len()));
        for (t, &b) in bins.iter().enumerate() {
            m[[b, t]] = 1.0;
        }
        m
    }

    #[test]
    fn test_pitch_changes_emit_onsets() {
        // 10 Hz bins: bin 44 = 440 Hz (A4), bin 88 = 880 Hz (A5)
        let freqs: Vec<f32> = (0..200).map(|k| k as f32 * 10.0).collect();
        let mag = spike_frames(&[44, 44, 88, 88, 44], 200);
        let notes = detect_notes(&mag, &freqs, 2.0);
        let pitches: Vec<u8> = notes.iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![69, 81, 69]);
        assert_eq!(notes[1].time, 1.0);
    }

    #[test]
    fn test_silence_has_no_notes() {
        let freqs: Vec<f32> = (0..64).map(|k| k as f32 * 10.0).collect();
        assert!(detect_notes(&Array2::zeros((64, 8)), &freqs, 10.0).is_empty());
    }

    #[test]
    fn test_unvoiced_gap_restarts_note() {
        let freqs: Vec<f32> = (0..200).map(|k| k as f32 * 10.0).collect();
        let mut mag = spike_frames(&[44, 44, 44], 200);
        mag.column_mut(1).fill(0.0);
        let notes = detect_notes(&mag, &freqs, 1.0);
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|n| n.pitch == 69));
    }
}
