/// Slowest tempo considered (BPM).
const MIN_BPM: f64 = 30.0;

/// Fastest tempo considered (BPM).
const MAX_BPM: f64 = 300.0;

/// Center of the log-tempo prior (BPM).
const PRIOR_BPM: f64 = 120.0;

/// Penalty weight on deviation from the beat period between consecutive beats.
const TIGHTNESS: f64 = 100.0;

/// Global tempo from onset-envelope autocorrelation, weighted by a log-Gaussian prior.
///
/// Returns 0.0 when the envelope carries no periodicity.
pub fn estimate_tempo(onset_env: &[f32], frame_rate: f64) -> f64 {
    if onset_env.len() < 4 || frame_rate <= 0.0 {
        return 0.0;
    }

    let n = onset_env.len();
    let mean = onset_env.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let centered: Vec<f64> = onset_env.iter().map(|&v| v as f64 - mean).collect();

    let min_lag = ((60.0 * frame_rate / MAX_BPM).floor() as usize).max(1);
    let max_lag = ((60.0 * frame_rate / MIN_BPM).ceil() as usize).min(n - 1);
    if min_lag > max_lag {
        return 0.0;
    }

    let mut best: Option<(f64, usize)> = None;
    for lag in min_lag..=max_lag {
        let acf: f64 = (0..n - lag).map(|i| centered[i] * centered[i + lag]).sum();
        if acf <= 0.0 {
            continue;
        }
        let bpm = 60.0 * frame_rate / lag as f64;
        let weight = (-0.5 * (bpm / PRIOR_BPM).log2().powi(2)).exp();
        let score = acf * weight;
        if best.is_none_or(|(s, _)| score > s) {
            best = Some((score, lag));
        }
    }

    match best {
        Some((_, lag)) => 60.0 * frame_rate / lag as f64,
        None => 0.0,
    }
}

/// Dynamic-programming beat tracker over an onset envelope.
///
/// Each frame's cumulative score is its onset strength plus the best
/// predecessor score one beat period back, penalized by log deviation from
/// the period. Returns beat frame indices in increasing order.
pub fn track_beats(onset_env: &[f32], frame_rate: f64, tempo: f64) -> Vec<usize> {
    let n = onset_env.len();
    if n == 0 || tempo <= 0.0 {
        return Vec::new();
    }

    let period = 60.0 * frame_rate / tempo;
    if period < 1.0 {
        return Vec::new();
    }

    // Normalize by standard deviation so the transition penalty is scale free
    let mean = onset_env.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let std = (onset_env
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n as f64)
        .sqrt();
    if std < 1e-10 {
        return Vec::new();
    }
    let local: Vec<f64> = onset_env.iter().map(|&v| v as f64 / std).collect();

    let mut cumscore = vec![0.0f64; n];
    let mut backlink: Vec<Option<usize>> = vec![None; n];
    let near = (period / 2.0).round().max(1.0) as usize;
    let far = (period * 2.0).round() as usize;

    for t in 0..n {
        let mut best: Option<(f64, usize)> = None;
        if t >= near {
            let lo = t.saturating_sub(far);
            for prev in lo..=t - near {
                let ratio = (t - prev) as f64 / period;
                let score = cumscore[prev] - TIGHTNESS * ratio.ln().powi(2);
                if best.is_none_or(|(s, _)| score > s) {
                    best = Some((score, prev));
                }
            }
        }
        match best {
            Some((score, prev)) if score > 0.0 => {
                cumscore[t] = local[t] + score;
                backlink[t] = Some(prev);
            }
            _ => cumscore[t] = local[t],
        }
    }

    // Final beat: best cumulative score within the last beat period
    let tail_start = n.saturating_sub(period.round() as usize + 1);
    let mut last = tail_start;
    for t in tail_start..n {
        if cumscore[t] > cumscore[last] {
            last = t;
        }
    }

    let mut beats = vec![last];
    let mut cursor = last;
    while let Some(prev) = backlink[cursor] {
        beats.push(prev);
        cursor = prev;
    }
    beats.reverse();
    beats
}
