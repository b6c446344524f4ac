//! Music data types flowing through the drums dataset graph.
//!
//! ```text
//! NoteSequence ──quantize──► QuantizedSequence ──extract──► DrumTrack ──encode──► SequenceExample
//! ```
//!
//! All types are serde-serializable; `NoteSequence` is the JSON-lines input
//! format and `SequenceExample` the JSON-lines output format.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tempo used when a sequence declares none.
pub const DEFAULT_QPM: f64 = 120.0;

/// A single performed note, timed in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    #[serde(default = "default_velocity")]
    pub velocity: u8,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub is_drum: bool,
    #[serde(default)]
    pub instrument: u32,
}

fn default_velocity() -> u8 {
    100
}

impl Note {
    pub fn new(pitch: u8, start_time: f64, end_time: f64) -> Self {
        Self {
            pitch,
            velocity: default_velocity(),
            start_time,
            end_time,
            is_drum: false,
            instrument: 0,
        }
    }

    /// A percussion hit.
    pub fn drum(pitch: u8, start_time: f64, end_time: f64) -> Self {
        Self {
            is_drum: true,
            instrument: 9,
            ..Self::new(pitch, start_time, end_time)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    #[serde(default)]
    pub time: f64,
    pub qpm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    #[serde(default)]
    pub time: f64,
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    pub const COMMON: TimeSignature = TimeSignature {
        time: 0.0,
        numerator: 4,
        denominator: 4,
    };

    /// Quarter notes per bar.
    pub fn quarters_per_bar(&self) -> f64 {
        self.numerator as f64 * 4.0 / self.denominator as f64
    }

    fn same_meter(&self, other: &TimeSignature) -> bool {
        self.numerator == other.numerator && self.denominator == other.denominator
    }
}

/// An unquantized performance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteSequence {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub tempos: Vec<Tempo>,
    #[serde(default)]
    pub time_signatures: Vec<TimeSignature>,
    #[serde(default)]
    pub total_time: f64,
}

impl NoteSequence {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_tempo(mut self, qpm: f64) -> Self {
        self.tempos.push(Tempo { time: 0.0, qpm });
        self
    }

    pub fn with_time_signature(mut self, numerator: u32, denominator: u32) -> Self {
        self.time_signatures.push(TimeSignature {
            time: 0.0,
            numerator,
            denominator,
        });
        self
    }

    /// Append a note and extend `total_time` to cover it.
    pub fn push_note(&mut self, note: Note) {
        self.total_time = self.total_time.max(note.end_time);
        self.notes.push(note);
    }

    /// True when tempo changes to a different qpm at some point.
    pub fn has_tempo_change(&self) -> bool {
        match self.tempos.first() {
            Some(first) => self.tempos.iter().any(|t| t.qpm != first.qpm),
            None => false,
        }
    }

    /// True when the meter changes at some point.
    pub fn has_time_signature_change(&self) -> bool {
        match self.time_signatures.first() {
            Some(first) => self.time_signatures.iter().any(|t| !t.same_meter(first)),
            None => false,
        }
    }

    pub fn qpm(&self) -> f64 {
        self.tempos.first().map(|t| t.qpm).unwrap_or(DEFAULT_QPM)
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signatures
            .first()
            .copied()
            .unwrap_or(TimeSignature::COMMON)
    }
}

/// A note snapped to the step grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizedNote {
    pub pitch: u8,
    pub velocity: u8,
    pub start_step: u64,
    pub end_step: u64,
    pub is_drum: bool,
    pub instrument: u32,
}

/// A performance on a fixed step grid with a single tempo and meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedSequence {
    pub id: String,
    pub steps_per_quarter: u32,
    pub qpm: f64,
    pub time_signature: TimeSignature,
    pub notes: Vec<QuantizedNote>,
    pub total_steps: u64,
}

impl QuantizedSequence {
    /// Steps per bar; may be fractional for unusual meters.
    pub fn steps_per_bar(&self) -> f64 {
        self.steps_per_quarter as f64 * self.time_signature.quarters_per_bar()
    }
}

/// One drum track: for every step, the set of drum pitches struck there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumTrack {
    pub events: Vec<BTreeSet<u8>>,
    pub steps_per_bar: u64,
    pub steps_per_quarter: u32,
    /// Step of the source sequence where the track begins.
    pub start_step: u64,
}

impl DrumTrack {
    pub fn num_steps(&self) -> u64 {
        self.events.len() as u64
    }

    pub fn end_step(&self) -> u64 {
        self.start_step.saturating_add(self.num_steps())
    }

    /// Length in bars, rounded up.
    pub fn num_bars(&self) -> u64 {
        if self.steps_per_bar == 0 {
            return 0;
        }
        self.num_steps().div_ceil(self.steps_per_bar)
    }

    /// Pad with silent steps or truncate to exactly `steps`.
    pub fn set_length(&mut self, steps: u64) {
        self.events.resize(steps as usize, BTreeSet::new());
    }
}

/// Model-ready training example: one-hot inputs and next-event labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceExample {
    pub inputs: Vec<Vec<f32>>,
    pub labels: Vec<u32>,
}

impl SequenceExample {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_undeclared() {
        let seq = NoteSequence::new("empty");
        assert_eq!(seq.qpm(), DEFAULT_QPM);
        assert_eq!(seq.time_signature(), TimeSignature::COMMON);
        assert!(!seq.has_tempo_change());
    }

    #[test]
    fn test_tempo_change_detection() {
        let seq = NoteSequence::new("t").with_tempo(120.0).with_tempo(120.0);
        assert!(!seq.has_tempo_change());
        let seq = seq.with_tempo(90.0);
        assert!(seq.has_tempo_change());
    }

    #[test]
    fn test_parse_minimal_json() {
        let json = r#"{"notes":[{"pitch":36,"start_time":0.0,"end_time":0.1,"is_drum":true}]}"#;
        let seq: NoteSequence = serde_json::from_str(json).unwrap();
        assert_eq!(seq.notes.len(), 1);
        assert_eq!(seq.notes[0].velocity, 100);
        assert!(seq.tempos.is_empty());
    }

    #[test]
    fn test_drum_track_bars() {
        let mut track = DrumTrack {
            events: vec![BTreeSet::new(); 17],
            steps_per_bar: 16,
            steps_per_quarter: 4,
            start_step: 0,
        };
        assert_eq!(track.num_bars(), 2);
        track.set_length(32);
        assert_eq!(track.num_steps(), 32);
        assert_eq!(track.end_step(), 32);
    }
}
