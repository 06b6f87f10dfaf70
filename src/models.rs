use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::scanner::filename::{parse_track_name, TrackName};

/// Number of MFCC coefficients kept in a feature record (1..=10, DC excluded).
pub const MFCC_FEATURES: usize = 10;

/// Decoded mono audio.
#[derive(Debug, Clone)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// A track as loaded for analysis. The waveform is only present while analysis runs.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    /// File stem, e.g. `"Artist1, Artist2 - Title"`
    pub name: String,
    pub playlist: Option<String>,
    pub waveform: Option<Waveform>,
}

impl AudioTrack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            playlist: None,
            waveform: None,
        }
    }

    pub fn with_waveform(name: impl Into<String>, waveform: Waveform) -> Self {
        Self {
            name: name.into(),
            playlist: None,
            waveform: Some(waveform),
        }
    }

    pub fn parsed_name(&self) -> TrackName {
        parse_track_name(&self.name)
    }
}

/// Mean and population variance of a per-frame measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanVar {
    pub mean: f64,
    pub var: f64,
}

impl MeanVar {
    pub fn of<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<f64>,
    {
        let values: Vec<f64> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self { mean, var }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalFeatures {
    pub zero_crossings: MeanVar,
    pub bpm: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralFeatures {
    pub centroid: MeanVar,
    pub rolloff: MeanVar,
    pub flux: MeanVar,
    pub flatness: MeanVar,
    /// Indexed by coefficient number minus one.
    pub mfcc: [MeanVar; MFCC_FEATURES],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarmonicFeatures {
    /// Key class: root counted from A, +12 for minor.
    pub key: u8,
    pub tonnetz: Vec<f64>,
    /// Row-major flattened chord trajectory matrix.
    pub chord_trajectory: Vec<f64>,
    /// Row-major flattened note trajectory matrix.
    pub note_trajectory: Vec<f64>,
}

/// Compact, fixed-shape per-track record. One row of a playlist feature table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub name: String,
    pub song_name: String,
    pub artist: String,
    pub playlist: Option<String>,
    pub temporal: TemporalFeatures,
    pub spectral: SpectralFeatures,
    pub harmonic: HarmonicFeatures,
}

impl FeatureRecord {
    pub fn for_track(track: &AudioTrack) -> Self {
        let parsed = track.parsed_name();
        Self {
            name: track.name.clone(),
            song_name: parsed.title,
            artist: parsed.artists.into_iter().next().unwrap_or_default(),
            playlist: track.playlist.clone(),
            ..Default::default()
        }
    }

    pub fn identity(&self) -> TrackIdentity {
        TrackIdentity {
            song_name: self.song_name.clone(),
            artist: self.artist.clone(),
            playlist: self.playlist.clone(),
        }
    }
}

/// Identity columns shared by the feature and representation tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackIdentity {
    pub song_name: String,
    pub artist: String,
    pub playlist: Option<String>,
}

/// Full-resolution intermediate arrays, kept only when explicitly requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepresentationBundle {
    pub spectrogram: Option<Array2<f32>>,
    pub mel_spectrogram: Option<Array2<f32>>,
    pub chroma: Option<Array2<f32>>,
    pub chroma_sync: Option<Array2<f32>>,
    pub tonnetz: Option<Array2<f32>>,
    pub spectral_centroid: Option<Vec<f32>>,
    pub spectral_rolloff: Option<Vec<f32>>,
    pub spectral_flux: Option<Vec<f32>>,
    pub spectral_flatness: Option<Vec<f32>>,
    pub zero_crossings: Option<Vec<bool>>,
    pub mfccs: Option<Array2<f32>>,
    pub chord_trajectory: Option<Array2<f64>>,
    pub note_trajectory: Option<Array2<f64>>,
}

impl RepresentationBundle {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The per-track artifact: compact record plus optional diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTrack {
    pub record: FeatureRecord,
    pub representation: RepresentationBundle,
}

impl ProcessedTrack {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn set_playlist(&mut self, playlist: &str) {
        self.record.playlist = Some(playlist.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_var_population() {
        let mv = MeanVar::of([1.0f32, 2.0, 3.0, 4.0]);
        assert!((mv.mean - 2.5).abs() < 1e-12);
        assert!((mv.var - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_mean_var_empty() {
        let mv = MeanVar::of(Vec::<f64>::new());
        assert_eq!(mv, MeanVar::default());
    }

    #[test]
    fn test_record_identity_from_track_name() {
        let track = AudioTrack::new("A, B - Song1");
        let record = FeatureRecord::for_track(&track);
        assert_eq!(record.artist, "A");
        assert_eq!(record.song_name, "Song1");
        assert_eq!(record.playlist, None);
    }

    #[test]
    fn test_empty_bundle() {
        let mut bundle = RepresentationBundle::default();
        assert!(bundle.is_empty());
        bundle.spectral_flux = Some(vec![0.5]);
        assert!(!bundle.is_empty());
    }
}
