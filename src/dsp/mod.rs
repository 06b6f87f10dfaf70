pub mod beats;
pub mod chords;
pub mod chroma;
pub mod notes;
pub mod spectral;
pub mod stft;

use ndarray::Array2;
use std::path::Path;

use crate::analyzer::decode;
use crate::analyzer::provider::{AnalysisProvider, BeatTrack, ProviderError, Result};
use crate::config::AnalysisSettings;
use crate::models::Waveform;
use crate::trajectory::{ChordSpan, NoteOnset};

/// Built-in analysis provider: symphonia decoding plus STFT-based measurements.
///
/// Stateless apart from its parameters, so one instance is shared by every worker.
#[derive(Debug, Clone)]
pub struct NativeProvider {
    frame_size: usize,
    hop_length: usize,
    n_mels: usize,
    n_mfcc: usize,
}

impl NativeProvider {
    pub fn new(settings: &AnalysisSettings) -> Self {
        Self {
            frame_size: settings.frame_size,
            hop_length: settings.hop_length,
            n_mels: settings.n_mels,
            n_mfcc: settings.n_mfcc,
        }
    }

    fn magnitude(&self, samples: &[f32]) -> Array2<f32> {
        stft::magnitude(samples, self.frame_size, self.hop_length)
    }

    fn log_mel(&self, samples: &[f32], rate: u32) -> Array2<f32> {
        let mag = self.magnitude(samples);
        spectral::power_to_db(&spectral::mel_power(&mag, rate, self.frame_size, self.n_mels))
    }

    fn chroma(&self, samples: &[f32], rate: u32) -> Array2<f32> {
        let mag = self.magnitude(samples);
        chroma::chroma_from_magnitude(&mag, &stft::bin_frequencies(rate, self.frame_size))
    }

    fn frame_rate(&self, rate: u32) -> f64 {
        rate as f64 / self.hop_length as f64
    }
}

fn require_rate(stage: &'static str, rate: u32) -> Result<()> {
    if rate == 0 {
        return Err(ProviderError::measurement(stage, "sample rate is zero"));
    }
    Ok(())
}

impl AnalysisProvider for NativeProvider {
    fn hop_length(&self) -> usize {
        self.hop_length
    }

    fn decode_waveform(&self, path: &Path) -> Result<Waveform> {
        Ok(decode::load_audio(path)?)
    }

    fn spectrogram(&self, samples: &[f32], _rate: u32) -> Result<Array2<f32>> {
        Ok(spectral::amplitude_to_db(&self.magnitude(samples)))
    }

    fn mel_spectrogram(&self, samples: &[f32], rate: u32) -> Result<Array2<f32>> {
        require_rate("mel spectrogram", rate)?;
        Ok(self.log_mel(samples, rate))
    }

    fn spectral_centroid(&self, samples: &[f32], rate: u32) -> Result<Vec<f32>> {
        require_rate("spectral centroid", rate)?;
        let freqs = stft::bin_frequencies(rate, self.frame_size);
        Ok(spectral::centroid(&self.magnitude(samples), &freqs))
    }

    fn spectral_rolloff(&self, samples: &[f32], rate: u32) -> Result<Vec<f32>> {
        require_rate("spectral rolloff", rate)?;
        let freqs = stft::bin_frequencies(rate, self.frame_size);
        Ok(spectral::rolloff(&self.magnitude(samples), &freqs))
    }

    fn spectral_flux(&self, samples: &[f32], rate: u32) -> Result<Vec<f32>> {
        require_rate("spectral flux", rate)?;
        Ok(spectral::onset_strength(&self.log_mel(samples, rate)))
    }

    fn spectral_flatness(&self, samples: &[f32], _rate: u32) -> Result<Vec<f32>> {
        Ok(spectral::flatness(&self.magnitude(samples)))
    }

    fn mfcc(&self, samples: &[f32], rate: u32) -> Result<Array2<f32>> {
        require_rate("mfcc", rate)?;
        Ok(spectral::mfcc_from_log_mel(&self.log_mel(samples, rate), self.n_mfcc))
    }

    fn zero_crossings(&self, samples: &[f32]) -> Vec<bool> {
        spectral::zero_crossings(samples)
    }

    fn detect_beats(&self, samples: &[f32], rate: u32) -> Result<BeatTrack> {
        require_rate("beat tracking", rate)?;
        let env = spectral::onset_strength(&self.log_mel(samples, rate));
        let frame_rate = self.frame_rate(rate);
        let tempo = beats::estimate_tempo(&env, frame_rate);
        let frames = beats::track_beats(&env, frame_rate, tempo);
        log::trace!("Tempo {:.1} BPM, {} beats", tempo, frames.len());
        Ok(BeatTrack { tempo, frames })
    }

    fn chroma_over_time(&self, samples: &[f32], rate: u32) -> Result<Array2<f32>> {
        require_rate("chroma", rate)?;
        Ok(self.chroma(samples, rate))
    }

    fn tonnetz(&self, chroma_matrix: &Array2<f32>) -> Result<Array2<f32>> {
        if chroma_matrix.nrows() != 12 {
            return Err(ProviderError::measurement(
                "tonnetz",
                format!("expected 12 chroma rows, got {}", chroma_matrix.nrows()),
            ));
        }
        Ok(chroma::tonnetz(chroma_matrix))
    }

    fn detect_key(&self, samples: &[f32], rate: u32) -> Result<u8> {
        require_rate("key detection", rate)?;
        Ok(chroma::estimate_key(&self.chroma(samples, rate)))
    }

    fn detect_chords(&self, chroma_matrix: &Array2<f32>, frame_rate: f64) -> Result<Vec<ChordSpan>> {
        Ok(chords::detect_chords(chroma_matrix, frame_rate))
    }

    fn detect_notes(&self, samples: &[f32], rate: u32, frame_rate: f64) -> Result<Vec<NoteOnset>> {
        require_rate("note detection", rate)?;
        let freqs = stft::bin_frequencies(rate, self.frame_size);
        Ok(notes::detect_notes(&self.magnitude(samples), &freqs, frame_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn provider() -> NativeProvider {
        NativeProvider::new(&AnalysisSettings {
            n_mels: 40,
            frame_size: 1024,
            hop_length: 256,
            ..Default::default()
        })
    }

    fn sine(freq: f32, rate: u32, secs: f32) -> Vec<f32> {
        (0..(rate as f32 * secs) as usize)
            .map(|n| (2.0 * PI * freq * n as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_shapes_share_frame_axis() {
        let p = provider();
        let samples = sine(440.0, 8000, 1.0);
        let frames = stft::frame_count(samples.len(), 1024, 256);

        assert_eq!(p.spectrogram(&samples, 8000).unwrap().dim(), (513, frames));
        assert_eq!(p.mel_spectrogram(&samples, 8000).unwrap().dim(), (40, frames));
        assert_eq!(p.mfcc(&samples, 8000).unwrap().dim(), (13, frames));
        assert_eq!(p.chroma_over_time(&samples, 8000).unwrap().dim(), (12, frames));
        assert_eq!(p.spectral_flux(&samples, 8000).unwrap().len(), frames);
        assert_eq!(p.zero_crossings(&samples).len(), samples.len());
    }

    #[test]
    fn test_a440_notes() {
        let p = provider();
        let notes = p.detect_notes(&sine(440.0, 8000, 1.0), 8000, 8000.0 / 256.0).unwrap();
        assert!(!notes.is_empty());
        assert!(notes.iter().all(|n| n.pitch == 69));
    }

    #[test]
    fn test_zero_rate_is_measurement_error() {
        let err = provider().detect_key(&[0.0; 16], 0).unwrap_err();
        assert!(matches!(err, ProviderError::Measurement { .. }));
    }

    #[test]
    fn test_silence_has_no_beats() {
        let beats = provider().detect_beats(&vec![0.0; 8000], 8000).unwrap();
        assert_eq!(beats.tempo, 0.0);
        assert!(beats.frames.is_empty());
    }
}
