use ndarray::Array2;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Periodic Hann window.
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / size as f32).cos())
        .collect()
}

/// Number of centered frames for a signal of `len` samples.
pub fn frame_count(len: usize, frame_size: usize, hop: usize) -> usize {
    let padded = len + 2 * (frame_size / 2);
    if padded < frame_size || hop == 0 {
        return 0;
    }
    1 + (padded - frame_size) / hop
}

/// Centered magnitude STFT, `(frame_size / 2 + 1, frames)`.
///
/// Frame `t` is centered on sample `t * hop`; the signal is zero-padded by
/// half a frame on each side.
pub fn magnitude(samples: &[f32], frame_size: usize, hop: usize) -> Array2<f32> {
    let bins = frame_size / 2 + 1;
    let frames = frame_count(samples.len(), frame_size, hop);
    let mut out = Array2::zeros((bins, frames));
    if frames == 0 {
        return out;
    }

    let window = hann_window(frame_size);
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(frame_size);
    let pad = (frame_size / 2) as isize;
    let mut buffer = vec![Complex::new(0.0f32, 0.0); frame_size];

    for t in 0..frames {
        let start = (t * hop) as isize - pad;
        for (i, slot) in buffer.iter_mut().enumerate() {
            let idx = start + i as isize;
            let sample = if idx >= 0 && (idx as usize) < samples.len() {
                samples[idx as usize]
            } else {
                0.0
            };
            *slot = Complex::new(sample * window[i], 0.0);
        }
        fft.process(&mut buffer);
        for k in 0..bins {
            out[[k, t]] = buffer[k].norm();
        }
    }

    out
}

/// Center frequency of each STFT bin in Hz.
pub fn bin_frequencies(rate: u32, frame_size: usize) -> Vec<f32> {
    (0..=frame_size / 2)
        .map(|k| k as f32 * rate as f32 / frame_size as f32)
        .collect()
}
