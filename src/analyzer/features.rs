use ndarray::{s, Array2};

use super::provider::AnalysisProvider;
use super::AnalyzeError;
use crate::config::AnalysisSettings;
use crate::models::{
    AudioTrack, FeatureRecord, HarmonicFeatures, MeanVar, ProcessedTrack, RepresentationBundle,
    SpectralFeatures, TemporalFeatures, MFCC_FEATURES,
};
use crate::trajectory::{self, Alphabet};

/// Runs every per-track measurement against a provider and assembles the results.
///
/// Holds only read-only configuration; all intermediate state lives inside a
/// single [`FeatureAssembler::assemble`] call, so one assembler can serve many
/// workers concurrently.
pub struct FeatureAssembler<'a, P: AnalysisProvider + ?Sized> {
    provider: &'a P,
    settings: &'a AnalysisSettings,
    chords: Alphabet,
    notes: Alphabet,
    save_representation: bool,
}

/// Outputs of the measurements with no ordering constraints.
struct Independent {
    spectrogram: Option<Array2<f32>>,
    mel_spectrogram: Option<Array2<f32>>,
    centroid: Vec<f32>,
    rolloff: Vec<f32>,
    flux: Vec<f32>,
    flatness: Vec<f32>,
    zero_crossings: Vec<bool>,
    mfccs: Array2<f32>,
    key: u8,
    note_trajectory: Array2<f64>,
}

/// Outputs of the beat-dependent chain.
struct BeatChain {
    tempo: f64,
    chroma: Array2<f32>,
    chroma_sync: Array2<f32>,
    tonnetz: Array2<f32>,
    chord_trajectory: Array2<f64>,
}

impl<'a, P: AnalysisProvider + ?Sized> FeatureAssembler<'a, P> {
    pub fn new(
        provider: &'a P,
        settings: &'a AnalysisSettings,
        save_representation: bool,
    ) -> Result<Self, AnalyzeError> {
        settings.validate().map_err(AnalyzeError::InvalidSettings)?;
        Ok(Self {
            provider,
            settings,
            chords: Alphabet::chords(),
            notes: Alphabet::midi_notes(),
            save_representation,
        })
    }

    /// Measure one decoded track. Any failing measurement fails the whole track.
    pub fn assemble(&self, track: &AudioTrack) -> Result<ProcessedTrack, AnalyzeError> {
        let waveform = track
            .waveform
            .as_ref()
            .ok_or_else(|| AnalyzeError::MissingWaveform(track.name.clone()))?;
        let samples = waveform.samples.as_slice();
        let rate = waveform.sample_rate;

        log::debug!("Assembling features for '{}'", track.name);

        let (independent, chain) = rayon::join(
            || self.independent(samples, rate),
            || self.beat_chain(samples, rate),
        );
        let independent = independent?;
        let chain = chain?;

        let mut record = FeatureRecord::for_track(track);
        record.temporal = TemporalFeatures {
            zero_crossings: MeanVar::of(
                independent.zero_crossings.iter().map(|&z| if z { 1.0 } else { 0.0 }),
            ),
            bpm: chain.tempo,
        };
        record.spectral = SpectralFeatures {
            centroid: MeanVar::of(independent.centroid.iter().copied()),
            rolloff: MeanVar::of(independent.rolloff.iter().copied()),
            flux: MeanVar::of(independent.flux.iter().copied()),
            flatness: MeanVar::of(independent.flatness.iter().copied()),
            mfcc: std::array::from_fn(|i| {
                MeanVar::of(independent.mfccs.row(i).iter().copied())
            }),
        };
        let tonnetz_flat: Vec<f64> = chain.tonnetz.iter().map(|&v| v as f64).collect();
        record.harmonic = HarmonicFeatures {
            key: independent.key,
            tonnetz: resample_linear(&tonnetz_flat, self.settings.tonnetz_length),
            chord_trajectory: trajectory::flatten(&chain.chord_trajectory),
            note_trajectory: trajectory::flatten(&independent.note_trajectory),
        };

        let representation = if self.save_representation {
            RepresentationBundle {
                spectrogram: independent.spectrogram,
                mel_spectrogram: independent.mel_spectrogram,
                chroma: Some(chain.chroma),
                chroma_sync: Some(chain.chroma_sync),
                tonnetz: Some(chain.tonnetz),
                spectral_centroid: Some(independent.centroid),
                spectral_rolloff: Some(independent.rolloff),
                spectral_flux: Some(independent.flux),
                spectral_flatness: Some(independent.flatness),
                zero_crossings: Some(independent.zero_crossings),
                mfccs: Some(independent.mfccs),
                chord_trajectory: Some(chain.chord_trajectory),
                note_trajectory: Some(independent.note_trajectory),
            }
        } else {
            RepresentationBundle::default()
        };

        Ok(ProcessedTrack {
            record,
            representation,
        })
    }

    fn independent(&self, samples: &[f32], rate: u32) -> Result<Independent, AnalyzeError> {
        let p = self.provider;

        // Full spectrograms are only ever stored, never summarized
        let (spectrogram, mel_spectrogram) = if self.save_representation {
            (
                Some(p.spectrogram(samples, rate)?),
                Some(p.mel_spectrogram(samples, rate)?),
            )
        } else {
            (None, None)
        };

        let mfcc_all = p.mfcc(samples, rate)?;
        if mfcc_all.nrows() <= MFCC_FEATURES {
            return Err(AnalyzeError::InvalidSettings(format!(
                "provider returned {} MFCC rows, need more than {}",
                mfcc_all.nrows(),
                MFCC_FEATURES
            )));
        }
        // Drop the DC coefficient
        let mfccs = mfcc_all.slice(s![1..=MFCC_FEATURES, ..]).to_owned();

        let frame_rate = rate as f64 / p.hop_length() as f64;
        let notes = p.detect_notes(samples, rate, frame_rate)?;
        let note_trajectory = trajectory::note_trajectory(&notes, &self.notes)?;

        Ok(Independent {
            spectrogram,
            mel_spectrogram,
            centroid: p.spectral_centroid(samples, rate)?,
            rolloff: p.spectral_rolloff(samples, rate)?,
            flux: p.spectral_flux(samples, rate)?,
            flatness: p.spectral_flatness(samples, rate)?,
            zero_crossings: p.zero_crossings(samples),
            mfccs,
            key: p.detect_key(samples, rate)?,
            note_trajectory,
        })
    }

    fn beat_chain(&self, samples: &[f32], rate: u32) -> Result<BeatChain, AnalyzeError> {
        let p = self.provider;

        let beats = p.detect_beats(samples, rate)?;
        let beat_times = p.frames_to_times(&beats.frames, rate);

        let chroma = p.chroma_over_time(samples, rate)?;
        let chroma_sync = p.beat_synchronize(&chroma, &beats.frames);
        let tonnetz = p.tonnetz(&chroma_sync)?;

        let frame_rate = rate as f64 / p.hop_length() as f64;
        let spans = p.detect_chords(&chroma, frame_rate)?;
        let chord_trajectory = trajectory::chord_trajectory(
            &beat_times,
            &spans,
            &self.chords,
            self.settings.ignore_non_chords,
        )?;

        log::trace!(
            "{} beats at {:.1} BPM, {} chord spans",
            beats.frames.len(),
            beats.tempo,
            spans.len()
        );

        Ok(BeatChain {
            tempo: beats.tempo,
            chroma,
            chroma_sync,
            tonnetz,
            chord_trajectory,
        })
    }
}

/// Linearly resample `values` onto `len` evenly spaced points spanning the input.
///
/// Endpoints map to endpoints. Empty input gives zeros; a single value is repeated.
pub fn resample_linear(values: &[f64], len: usize) -> Vec<f64> {
    match (values.len(), len) {
        (_, 0) => Vec::new(),
        (0, _) => vec![0.0; len],
        (1, _) => vec![values[0]; len],
        (_, 1) => vec![values[0]],
        (n, _) => {
            let step = (n - 1) as f64 / (len - 1) as f64;
            (0..len)
                .map(|i| {
                    let pos = i as f64 * step;
                    let lo = (pos.floor() as usize).min(n - 1);
                    let hi = (lo + 1).min(n - 1);
                    let frac = pos - lo as f64;
                    values[lo] + (values[hi] - values[lo]) * frac
                })
                .collect()
        }
    }
}
