use ndarray::{Array2, Axis};

/// Lowest frequency folded into chroma (~C1).
const MIN_FREQ: f32 = 32.7;

/// Highest frequency folded into chroma. Above this harmonics dominate.
const MAX_FREQ: f32 = 5000.0;

/// Krumhansl-Schmuckler major profile, C-rooted.
const KS_MAJOR: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Schmuckler minor profile, C-rooted.
const KS_MINOR: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Pitch class of A in C-rooted chroma.
pub const A_PITCH_CLASS: usize = 9;

/// MIDI note number for a frequency.
pub fn hz_to_midi(hz: f32) -> f32 {
    69.0 + 12.0 * (hz / 440.0).log2()
}

/// Fold STFT power into 12 C-rooted pitch classes, each frame scaled to max 1.
pub fn chroma_from_magnitude(magnitude: &Array2<f32>, freqs: &[f32]) -> Array2<f32> {
    let frames = magnitude.ncols();
    let mut chroma = Array2::zeros((12, frames));

    let classes: Vec<Option<usize>> = freqs
        .iter()
        .map(|&f| {
            if (MIN_FREQ..=MAX_FREQ).contains(&f) {
                Some((hz_to_midi(f).round() as i64).rem_euclid(12) as usize)
            } else {
                None
            }
        })
        .collect();

    for (k, class) in classes.iter().enumerate() {
        if let Some(pc) = class {
            for t in 0..frames {
                let m = magnitude[[k, t]];
                chroma[[*pc, t]] += m * m;
            }
        }
    }

    for mut frame in chroma.axis_iter_mut(Axis(1)) {
        let peak = frame.iter().cloned().fold(0.0f32, f32::max);
        if peak > 0.0 {
            frame.mapv_inplace(|v| v / peak);
        }
    }

    chroma
}

/// Best Krumhansl-Schmuckler key for mean chroma: A-rooted root, +12 for minor.
pub fn estimate_key(chroma: &Array2<f32>) -> u8 {
    if chroma.ncols() == 0 {
        return 0;
    }
    let profile: Vec<f64> = chroma
        .axis_iter(Axis(0))
        .map(|row| row.iter().map(|&v| v as f64).sum::<f64>() / row.len() as f64)
        .collect();

    let mut best = (f64::NEG_INFINITY, 0usize, false);
    for root in 0..12 {
        for (minor, template) in [(false, &KS_MAJOR), (true, &KS_MINOR)] {
            let r = pearson_rotated(&profile, template, root);
            if r > best.0 {
                best = (r, root, minor);
            }
        }
    }

    let (_, root_c, minor) = best;
    let root_a = (root_c + 12 - A_PITCH_CLASS) % 12;
    (root_a + if minor { 12 } else { 0 }) as u8
}

/// Correlation of `profile` with `template` transposed to `root`.
fn pearson_rotated(profile: &[f64], template: &[f64; 12], root: usize) -> f64 {
    let rotated: Vec<f64> = (0..12).map(|pc| template[(pc + 12 - root) % 12]).collect();
    let mean_p = profile.iter().sum::<f64>() / 12.0;
    let mean_t = rotated.iter().sum::<f64>() / 12.0;
    let mut cov = 0.0;
    let mut var_p = 0.0;
    let mut var_t = 0.0;
    for i in 0..12 {
        let dp = profile[i] - mean_p;
        let dt = rotated[i] - mean_t;
        cov += dp * dt;
        var_p += dp * dp;
        var_t += dt * dt;
    }
    let denom = (var_p * var_t).sqrt();
    if denom < 1e-12 { 0.0 } else { cov / denom }
}

/// Tonal centroid features: fifths, minor thirds, major thirds as 2-D circles.
pub fn tonnetz(chroma: &Array2<f32>) -> Array2<f32> {
    let (bins, frames) = chroma.dim();
    let scale = [7.0 / 6.0, 7.0 / 6.0, 3.0 / 2.0, 3.0 / 2.0, 2.0 / 3.0, 2.0 / 3.0];
    let radius = [1.0, 1.0, 1.0, 1.0, 0.5, 0.5];

    let mut phi = Array2::<f32>::zeros((6, bins));
    for row in 0..6 {
        for pc in 0..bins {
            let dim = 12.0 * pc as f32 / bins.max(1) as f32;
            let mut v = scale[row] * dim;
            if row % 2 == 0 {
                v -= 0.5;
            }
            phi[[row, pc]] = radius[row] * (std::f32::consts::PI * v).cos();
        }
    }

    let mut normalized = chroma.clone();
    for mut frame in normalized.axis_iter_mut(Axis(1)) {
        let l1: f32 = frame.iter().map(|v| v.abs()).sum();
        if l1 > 0.0 {
            frame.mapv_inplace(|v| v / l1);
        }
    }

    let out = phi.dot(&normalized);
    debug_assert_eq!(out.dim(), (6, frames));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chord_chroma(pitch_classes: &[usize], frames: usize) -> Array2<f32> {
        let mut c = Array2::zeros((12, frames));
        for t in 0..frames {
            for &pc in pitch_classes {
                c[[pc, t]] = 1.0;
            }
        }
        c
    }

    #[test]
    fn test_hz_to_midi() {
        assert!((hz_to_midi(440.0) - 69.0).abs() < 1e-4);
        assert!((hz_to_midi(261.63) - 60.0).abs() < 0.01);
    }

    #[test]
    fn test_chroma_folds_a440() {
        let freqs = [0.0, 220.0, 440.0, 880.0];
        let mut mag = Array2::zeros((4, 1));
        mag[[2, 0]] = 3.0;
        let chroma = chroma_from_magnitude(&mag, &freqs);
        assert_eq!(chroma[[A_PITCH_CLASS, 0]], 1.0);
        assert_eq!(chroma.sum(), 1.0);
    }

    #[test]
    fn test_key_c_major_scale() {
        // C major scale, tonic triad weighted
        let mut c = chord_chroma(&[0, 2, 4, 5, 7, 9, 11], 4);
        for t in 0..4 {
            c[[0, t]] = 2.0;
            c[[4, t]] = 1.5;
            c[[7, t]] = 1.5;
        }
        // C is three semitones above A
        assert_eq!(estimate_key(&c), 3);
    }

    #[test]
    fn test_key_a_minor() {
        let mut c = chord_chroma(&[9, 11, 0, 2, 4, 5, 7], 4);
        for t in 0..4 {
            c[[9, t]] = 2.0;
            c[[0, t]] = 1.5;
            c[[4, t]] = 1.5;
        }
        assert_eq!(estimate_key(&c), 12);
    }

    #[test]
    fn test_key_empty() {
        assert_eq!(estimate_key(&Array2::zeros((12, 0))), 0);
    }

    #[test]
    fn test_tonnetz_shape_and_silence() {
        let t = tonnetz(&Array2::zeros((12, 5)));
        assert_eq!(t.dim(), (6, 5));
        assert!(t.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_tonnetz_single_pitch_on_circle() {
        let t = tonnetz(&chord_chroma(&[0], 1));
        // Pitch class C: fifths circle point at angle -pi/2
        assert!((t[[0, 0]] - 0.0).abs() < 1e-5);
        assert!((t[[1, 0]] - 1.0).abs() < 1e-5);
    }
}
