use ndarray::Array2;
use std::path::Path;
use thiserror::Error;

use crate::models::Waveform;
use crate::trajectory::{ChordSpan, NoteOnset};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Decode error: {0}")]
    Decode(#[from] super::decode::DecodeError),
    #[error("{stage} failed: {message}")]
    Measurement { stage: &'static str, message: String },
}

impl ProviderError {
    pub fn measurement(stage: &'static str, message: impl Into<String>) -> Self {
        ProviderError::Measurement {
            stage,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Tempo estimate plus beat positions in analysis frames.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatTrack {
    pub tempo: f64,
    pub frames: Vec<usize>,
}

/// Low-level signal analysis consumed by the feature assembler.
///
/// Frame-indexed outputs (`frames` axis of every matrix, beat frames) all use
/// the same hop length, reported by [`AnalysisProvider::hop_length`].
/// Implementations hold no mutable state and may be shared across workers.
pub trait AnalysisProvider: Send + Sync {
    /// Hop length in samples between analysis frames.
    fn hop_length(&self) -> usize;

    fn decode_waveform(&self, path: &Path) -> Result<Waveform>;

    /// dB-scaled magnitude spectrogram, `(bins, frames)`.
    fn spectrogram(&self, samples: &[f32], rate: u32) -> Result<Array2<f32>>;

    /// dB-scaled mel spectrogram, `(n_mels, frames)`.
    fn mel_spectrogram(&self, samples: &[f32], rate: u32) -> Result<Array2<f32>>;

    fn spectral_centroid(&self, samples: &[f32], rate: u32) -> Result<Vec<f32>>;

    fn spectral_rolloff(&self, samples: &[f32], rate: u32) -> Result<Vec<f32>>;

    /// Onset strength envelope (spectral flux).
    fn spectral_flux(&self, samples: &[f32], rate: u32) -> Result<Vec<f32>>;

    fn spectral_flatness(&self, samples: &[f32], rate: u32) -> Result<Vec<f32>>;

    /// `(n_mfcc, frames)` cepstral coefficients, row 0 being the DC term.
    fn mfcc(&self, samples: &[f32], rate: u32) -> Result<Array2<f32>>;

    /// Per-sample sign-change flags.
    fn zero_crossings(&self, samples: &[f32]) -> Vec<bool>;

    fn detect_beats(&self, samples: &[f32], rate: u32) -> Result<BeatTrack>;

    /// `(12, frames)` chroma.
    fn chroma_over_time(&self, samples: &[f32], rate: u32) -> Result<Array2<f32>>;

    /// `(6, columns)` tonal centroid projection of a chroma matrix.
    fn tonnetz(&self, chroma: &Array2<f32>) -> Result<Array2<f32>>;

    /// Key class: root counted from A, +12 for minor.
    fn detect_key(&self, samples: &[f32], rate: u32) -> Result<u8>;

    fn detect_chords(&self, chroma: &Array2<f32>, frame_rate: f64) -> Result<Vec<ChordSpan>>;

    fn detect_notes(&self, samples: &[f32], rate: u32, frame_rate: f64) -> Result<Vec<NoteOnset>>;

    fn frames_to_times(&self, frames: &[usize], rate: u32) -> Vec<f64> {
        let hop = self.hop_length() as f64;
        frames
            .iter()
            .map(|&f| f as f64 * hop / rate as f64)
            .collect()
    }

    /// Aggregate columns of `matrix` between consecutive beat frames with a per-row max.
    ///
    /// Boundaries are padded with 0 and the column count, so the output has one
    /// column per segment `[b_i, b_{i+1})`.
    fn beat_synchronize(&self, matrix: &Array2<f32>, beat_frames: &[usize]) -> Array2<f32> {
        sync_max(matrix, beat_frames)
    }
}

/// Per-row maximum over each beat segment.
pub fn sync_max(matrix: &Array2<f32>, beat_frames: &[usize]) -> Array2<f32> {
    let (rows, cols) = matrix.dim();
    if cols == 0 {
        return Array2::zeros((rows, 0));
    }

    let mut bounds: Vec<usize> = Vec::with_capacity(beat_frames.len() + 2);
    bounds.push(0);
    bounds.extend(beat_frames.iter().map(|&f| f.min(cols)));
    bounds.push(cols);
    bounds.sort_unstable();
    bounds.dedup();

    let segments: Vec<(usize, usize)> = bounds.windows(2).map(|w| (w[0], w[1])).collect();
    let mut out = Array2::zeros((rows, segments.len()));

    for (j, &(start, end)) in segments.iter().enumerate() {
        for r in 0..rows {
            let max = (start..end)
                .map(|c| matrix[[r, c]])
                .fold(f32::NEG_INFINITY, f32::max);
            out[[r, j]] = max;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sync_max_segments() {
        let m = array![[1.0f32, 5.0, 2.0, 0.0, 3.0], [0.0, 0.0, 4.0, 1.0, 0.5]];
        let synced = sync_max(&m, &[2, 4]);
        // Segments [0,2), [2,4), [4,5)
        assert_eq!(synced, array![[5.0f32, 2.0, 3.0], [0.0, 4.0, 0.5]]);
    }

    #[test]
    fn test_sync_max_clamps_and_dedups() {
        let m = array![[1.0f32, 2.0, 3.0]];
        let synced = sync_max(&m, &[0, 1, 1, 10]);
        assert_eq!(synced, array![[1.0f32, 3.0]]);
    }

    #[test]
    fn test_sync_max_no_beats() {
        let m = array![[1.0f32, 7.0, 3.0]];
        assert_eq!(sync_max(&m, &[]), array![[7.0f32]]);
    }

    #[test]
    fn test_sync_max_empty_matrix() {
        let m = Array2::<f32>::zeros((12, 0));
        assert_eq!(sync_max(&m, &[3]).dim(), (12, 0));
    }
}
