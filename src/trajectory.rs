use ndarray::Array2;
use std::collections::HashMap;
use thiserror::Error;

/// Square transition-count matrix. Cell `[next, previous]` counts `previous -> next`.
pub type TrajectoryMatrix = Array2<f64>;

/// Chord labels in trajectory index order. The final entry is the "no chord" sentinel.
pub const CHORD_LABELS: [&str; 25] = [
    "A:maj", "A#:maj", "B:maj", "C:maj", "C#:maj", "D:maj",
    "D#:maj", "E:maj", "F:maj", "F#:maj", "G:maj", "G#:maj",
    "A:min", "A#:min", "B:min", "C:min", "C#:min", "D:min",
    "D#:min", "E:min", "F:min", "F#:min", "G:min", "G#:min",
    "N",
];

/// Label for "no chord detected".
pub const NO_CHORD: &str = "N";

/// Size of the MIDI note alphabet.
pub const MIDI_NOTE_COUNT: usize = 128;

#[derive(Error, Debug, PartialEq)]
pub enum TrajectoryError {
    #[error("Label '{0}' is not in the alphabet")]
    UnknownLabel(String),
    #[error("Label index {index} out of range for alphabet of size {size}")]
    OutOfRange { index: usize, size: usize },
    #[error("Duplicate label '{0}' in alphabet")]
    DuplicateLabel(String),
    #[error("Sentinel index {0} is outside the alphabet")]
    InvalidSentinel(usize),
}

/// An ordered, immutable label alphabet.
#[derive(Debug, Clone, PartialEq)]
pub struct Alphabet {
    labels: Vec<String>,
    index: HashMap<String, usize>,
    sentinel: Option<usize>,
}

impl Alphabet {
    pub fn new<S: Into<String>>(
        labels: impl IntoIterator<Item = S>,
        sentinel: Option<usize>,
    ) -> Result<Self, TrajectoryError> {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        let mut index = HashMap::with_capacity(labels.len());
        for (i, label) in labels.iter().enumerate() {
            if index.insert(label.clone(), i).is_some() {
                return Err(TrajectoryError::DuplicateLabel(label.clone()));
            }
        }
        if let Some(s) = sentinel {
            if s >= labels.len() {
                return Err(TrajectoryError::InvalidSentinel(s));
            }
        }
        Ok(Self { labels, index, sentinel })
    }

    /// 24 major/minor chords plus the `N` sentinel.
    pub fn chords() -> Self {
        let labels: Vec<String> = CHORD_LABELS.iter().map(|s| s.to_string()).collect();
        let index = labels.iter().cloned().enumerate().map(|(i, l)| (l, i)).collect();
        Self {
            labels,
            index,
            sentinel: Some(CHORD_LABELS.len() - 1),
        }
    }

    /// MIDI note numbers 0..128, no sentinel.
    pub fn midi_notes() -> Self {
        let labels: Vec<String> = (0..MIDI_NOTE_COUNT).map(|n| n.to_string()).collect();
        let index = labels.iter().cloned().enumerate().map(|(i, l)| (l, i)).collect();
        Self {
            labels,
            index,
            sentinel: None,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn sentinel(&self) -> Option<usize> {
        self.sentinel
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Result<usize, TrajectoryError> {
        self.index
            .get(label)
            .copied()
            .ok_or_else(|| TrajectoryError::UnknownLabel(label.to_string()))
    }

    pub fn check_index(&self, index: usize) -> Result<usize, TrajectoryError> {
        if index < self.labels.len() {
            Ok(index)
        } else {
            Err(TrajectoryError::OutOfRange {
                index,
                size: self.labels.len(),
            })
        }
    }

    pub fn zeros(&self) -> TrajectoryMatrix {
        Array2::zeros((self.len(), self.len()))
    }
}

/// A detected chord occupying `[start, end)` seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordSpan {
    pub start: f64,
    pub end: f64,
    pub label: String,
}

impl ChordSpan {
    pub fn new(start: f64, end: f64, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }
}

/// A detected note onset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteOnset {
    pub time: f64,
    pub pitch: u8,
}

/// How the sentinel label is treated while accumulating transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilencePolicy {
    /// Record every adjacent pair as-is.
    Literal,
    /// Drop sentinel->sentinel, fold sentinel edges into a self-transition on the real chord.
    Collapse { sentinel: usize },
}

impl SilencePolicy {
    pub fn for_alphabet(alphabet: &Alphabet, ignore_non_chords: bool) -> Self {
        match (ignore_non_chords, alphabet.sentinel()) {
            (true, Some(sentinel)) => SilencePolicy::Collapse { sentinel },
            _ => SilencePolicy::Literal,
        }
    }
}

/// Assign each beat the label of the span containing it.
///
/// Both inputs must be time-ordered. One forward pass: the beat cursor carries
/// over from span to span and never rewinds. Uncovered beats get `None`.
pub fn align_to_beats(
    beat_times: &[f64],
    spans: &[ChordSpan],
    alphabet: &Alphabet,
) -> Result<Vec<Option<usize>>, TrajectoryError> {
    let mut aligned = vec![None; beat_times.len()];
    let mut cursor = 0;

    for span in spans {
        let label = alphabet.index_of(&span.label)?;

        // Beats before this span starts fall in a gap
        while cursor < beat_times.len() && beat_times[cursor] < span.start {
            cursor += 1;
        }
        while cursor < beat_times.len() && beat_times[cursor] < span.end {
            aligned[cursor] = Some(label);
            cursor += 1;
        }
        if cursor == beat_times.len() {
            break;
        }
    }

    Ok(aligned)
}

/// Accumulate directed transitions between adjacent labels into a square matrix.
pub fn accumulate_transitions(
    sequence: &[usize],
    size: usize,
    policy: SilencePolicy,
) -> Result<TrajectoryMatrix, TrajectoryError> {
    let mut matrix = Array2::zeros((size, size));

    for pair in sequence.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        for idx in [prev, next] {
            if idx >= size {
                return Err(TrajectoryError::OutOfRange { index: idx, size });
            }
        }

        match policy {
            SilencePolicy::Literal => matrix[[next, prev]] += 1.0,
            SilencePolicy::Collapse { sentinel } => {
                match (prev == sentinel, next == sentinel) {
                    (true, true) => {}
                    (true, false) => matrix[[next, next]] += 1.0,
                    (false, true) => matrix[[prev, prev]] += 1.0,
                    (false, false) => matrix[[next, prev]] += 1.0,
                }
            }
        }
    }

    Ok(matrix)
}

/// Beat-aligned chord trajectory.
pub fn chord_trajectory(
    beat_times: &[f64],
    spans: &[ChordSpan],
    alphabet: &Alphabet,
    ignore_non_chords: bool,
) -> Result<TrajectoryMatrix, TrajectoryError> {
    if beat_times.is_empty() || spans.is_empty() {
        return Ok(alphabet.zeros());
    }

    let aligned = align_to_beats(beat_times, spans, alphabet)?;
    let policy = SilencePolicy::for_alphabet(alphabet, ignore_non_chords);

    // An uncovered beat breaks adjacency; only covered runs contribute pairs
    let mut matrix = alphabet.zeros();
    for run in aligned.split(|label| label.is_none()) {
        let run: Vec<usize> = run.iter().flatten().copied().collect();
        matrix += &accumulate_transitions(&run, alphabet.len(), policy)?;
    }
    Ok(matrix)
}

/// Note trajectory over raw onset order (no beat alignment).
pub fn note_trajectory(
    notes: &[NoteOnset],
    alphabet: &Alphabet,
) -> Result<TrajectoryMatrix, TrajectoryError> {
    let sequence = notes
        .iter()
        .map(|n| alphabet.check_index(n.pitch as usize))
        .collect::<Result<Vec<_>, _>>()?;

    accumulate_transitions(&sequence, alphabet.len(), SilencePolicy::Literal)
}

/// Row-major flattening used for feature records.
pub fn flatten(matrix: &TrajectoryMatrix) -> Vec<f64> {
    matrix.iter().copied().collect()
}
