use ndarray::{Array2, Axis};

const AMIN: f32 = 1e-10;
const TOP_DB: f32 = 80.0;
const ROLLOFF_PERCENT: f32 = 0.85;

/// `20 * log10(S / max(S))`, floored 80 dB below the peak.
pub fn amplitude_to_db(magnitude: &Array2<f32>) -> Array2<f32> {
    let peak = magnitude.iter().cloned().fold(AMIN, f32::max);
    let mut db = magnitude.mapv(|v| 20.0 * (v.max(AMIN) / peak).log10());
    let floor = db.iter().cloned().fold(f32::NEG_INFINITY, f32::max) - TOP_DB;
    db.mapv_inplace(|v| v.max(floor));
    db
}

/// `10 * log10(P / max(P))`, floored 80 dB below the peak.
pub fn power_to_db(power: &Array2<f32>) -> Array2<f32> {
    let peak = power.iter().cloned().fold(AMIN, f32::max);
    let mut db = power.mapv(|v| 10.0 * (v.max(AMIN) / peak).log10());
    let floor = db.iter().cloned().fold(f32::NEG_INFINITY, f32::max) - TOP_DB;
    db.mapv_inplace(|v| v.max(floor));
    db
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank, `(n_mels, frame_size / 2 + 1)`, area-normalized.
pub fn mel_filterbank(rate: u32, frame_size: usize, n_mels: usize) -> Array2<f32> {
    let bins = frame_size / 2 + 1;
    let fmax = rate as f32 / 2.0;
    let mel_max = hz_to_mel(fmax);
    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();
    let freqs = super::stft::bin_frequencies(rate, frame_size);

    let mut fb = Array2::zeros((n_mels, bins));
    for m in 0..n_mels {
        let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
        let norm = 2.0 / (hi - lo).max(AMIN);
        for (k, &f) in freqs.iter().enumerate() {
            let weight = if f > lo && f <= center {
                (f - lo) / (center - lo).max(AMIN)
            } else if f > center && f < hi {
                (hi - f) / (hi - center).max(AMIN)
            } else {
                0.0
            };
            fb[[m, k]] = weight * norm;
        }
    }
    fb
}

/// Mel power spectrogram from a magnitude STFT.
pub fn mel_power(magnitude: &Array2<f32>, rate: u32, frame_size: usize, n_mels: usize) -> Array2<f32> {
    let power = magnitude.mapv(|v| v * v);
    mel_filterbank(rate, frame_size, n_mels).dot(&power)
}

/// Magnitude-weighted mean frequency per frame.
pub fn centroid(magnitude: &Array2<f32>, freqs: &[f32]) -> Vec<f32> {
    magnitude
        .axis_iter(Axis(1))
        .map(|frame| {
            let total: f32 = frame.sum();
            if total <= AMIN {
                return 0.0;
            }
            frame.iter().zip(freqs).map(|(m, f)| m * f).sum::<f32>() / total
        })
        .collect()
}

/// Frequency below which 85% of each frame's magnitude lies.
pub fn rolloff(magnitude: &Array2<f32>, freqs: &[f32]) -> Vec<f32> {
    magnitude
        .axis_iter(Axis(1))
        .map(|frame| {
            let threshold = ROLLOFF_PERCENT * frame.sum();
            if threshold <= 0.0 {
                return 0.0;
            }
            let mut acc = 0.0;
            for (m, f) in frame.iter().zip(freqs) {
                acc += m;
                if acc >= threshold {
                    return *f;
                }
            }
            freqs.last().copied().unwrap_or(0.0)
        })
        .collect()
}

/// Geometric over arithmetic mean of frame power. Near 1 = noise-like.
pub fn flatness(magnitude: &Array2<f32>) -> Vec<f32> {
    magnitude
        .axis_iter(Axis(1))
        .map(|frame| {
            let n = frame.len().max(1) as f32;
            let power: Vec<f32> = frame.iter().map(|m| (m * m).max(AMIN)).collect();
            let log_mean = power.iter().map(|p| p.ln()).sum::<f32>() / n;
            let mean = power.iter().sum::<f32>() / n;
            log_mean.exp() / mean
        })
        .collect()
}

/// Onset strength: mean positive first difference of the log-mel spectrogram.
pub fn onset_strength(log_mel: &Array2<f32>) -> Vec<f32> {
    let (bands, frames) = log_mel.dim();
    let mut env = vec![0.0f32; frames];
    if bands == 0 {
        return env;
    }
    for t in 1..frames {
        let rise: f32 = (0..bands)
            .map(|b| (log_mel[[b, t]] - log_mel[[b, t - 1]]).max(0.0))
            .sum();
        env[t] = rise / bands as f32;
    }
    env
}

/// Orthonormal DCT-II along the band axis, keeping the first `n_coeffs` rows.
pub fn mfcc_from_log_mel(log_mel: &Array2<f32>, n_coeffs: usize) -> Array2<f32> {
    let (bands, frames) = log_mel.dim();
    let mut out = Array2::zeros((n_coeffs, frames));
    if bands == 0 {
        return out;
    }
    let n = bands as f32;
    for k in 0..n_coeffs {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        let basis: Vec<f32> = (0..bands)
            .map(|b| (std::f32::consts::PI * k as f32 * (2 * b + 1) as f32 / (2.0 * n)).cos())
            .collect();
        for t in 0..frames {
            let sum: f32 = (0..bands).map(|b| log_mel[[b, t]] * basis[b]).sum();
            out[[k, t]] = scale * sum;
        }
    }
    out
}

/// Per-sample sign changes; the first sample counts as a crossing.
pub fn zero_crossings(samples: &[f32]) -> Vec<bool> {
    let mut out = Vec::with_capacity(samples.len());
    let mut prev_positive = None;
    for &s in samples {
        let positive = s >= 0.0;
        out.push(prev_positive.is_none_or(|p| p != positive));
        prev_positive = Some(positive);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_amplitude_to_db_reference_is_peak() {
        let m = array![[1.0f32, 0.1], [0.01, 0.0]];
        let db = amplitude_to_db(&m);
        assert!((db[[0, 0]] - 0.0).abs() < 1e-5);
        assert!((db[[0, 1]] + 20.0).abs() < 1e-4);
        assert!((db[[1, 0]] + 40.0).abs() < 1e-4);
        // Zero floors at -80 dB
        assert!((db[[1, 1]] + 80.0).abs() < 1e-4);
    }

    #[test]
    fn test_centroid_single_bin() {
        let freqs = [0.0, 100.0, 200.0];
        let m = array![[0.0f32], [0.0], [2.0]];
        assert_eq!(centroid(&m, &freqs), vec![200.0]);
    }

    #[test]
    fn test_rolloff() {
        let freqs = [0.0, 100.0, 200.0, 300.0];
        let m = array![[1.0f32], [1.0], [1.0], [1.0]];
        // 85% of 4.0 = 3.4, reached at the fourth bin
        assert_eq!(rolloff(&m, &freqs), vec![300.0]);
    }

    #[test]
    fn test_flatness_white_vs_tonal() {
        let flat = array![[1.0f32], [1.0], [1.0], [1.0]];
        let tonal = array![[1.0f32], [0.0], [0.0], [0.0]];
        assert!((flatness(&flat)[0] - 1.0).abs() < 1e-5);
        assert!(flatness(&tonal)[0] < 0.01);
    }

    #[test]
    fn test_onset_strength_rises_only() {
        let log_mel = array![[0.0f32, 1.0, 0.0, 2.0]];
        assert_eq!(onset_strength(&log_mel), vec![0.0, 1.0, 0.0, 2.0]);
    }

    #[test]
    fn test_mfcc_constant_spectrum_is_dc_only() {
        let log_mel = Array2::from_elem((8, 3), 2.0f32);
        let c = mfcc_from_log_mel(&log_mel, 4);
        assert!((c[[0, 0]] - 2.0 * 8f32.sqrt()).abs() < 1e-4);
        for k in 1..4 {
            assert!(c[[k, 1]].abs() < 1e-4);
        }
    }

    #[test]
    fn test_zero_crossings() {
        let zc = zero_crossings(&[0.5, 0.2, -0.1, -0.3, 0.4]);
        assert_eq!(zc, vec![true, false, true, false, true]);
    }

    #[test]
    fn test_mel_filterbank_shape() {
        let fb = mel_filterbank(22050, 2048, 40);
        assert_eq!(fb.dim(), (40, 1025));
        assert!(fb.iter().all(|&w| w >= 0.0));
    }
}
