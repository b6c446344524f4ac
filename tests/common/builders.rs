//! Test data builders for note sequences

use drumdag::music::{Note, NoteSequence};

/// Builder for drum-only NoteSequences on a 4/4, 120 qpm grid.
///
/// Positions are given in sixteenth-note steps (4 steps per quarter), which
/// at 120 qpm is 0.125 s per step.
pub struct DrumSequenceBuilder {
    id: String,
    qpm: f64,
    hits: Vec<(u64, u8)>,
    extra_tempo: Option<f64>,
}

impl DrumSequenceBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            qpm: 120.0,
            hits: Vec::new(),
            extra_tempo: None,
        }
    }

    pub fn hit(mut self, step: u64, pitch: u8) -> Self {
        self.hits.push((step, pitch));
        self
    }

    /// A kick on every quarter note for `bars` bars, starting at `from_bar`.
    pub fn kicks(mut self, from_bar: u64, bars: u64) -> Self {
        for step in (from_bar * 16..(from_bar + bars) * 16).step_by(4) {
            self.hits.push((step, 36));
        }
        self
    }

    /// Add a tempo change halfway through.
    pub fn tempo_change(mut self, qpm: f64) -> Self {
        self.extra_tempo = Some(qpm);
        self
    }

    pub fn build(self) -> NoteSequence {
        let step_seconds = 60.0 / self.qpm / 4.0;
        let mut seq = NoteSequence::new(self.id).with_tempo(self.qpm);
        for (step, pitch) in self.hits {
            let start = step as f64 * step_seconds;
            seq.push_note(Note::drum(pitch, start, start + step_seconds / 2.0));
        }
        if let Some(qpm) = self.extra_tempo {
            seq.tempos.push(drumdag::music::sequence::Tempo {
                time: seq.total_time / 2.0,
                qpm,
            });
        }
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drum_sequence_builder() {
        let seq = DrumSequenceBuilder::new("s").kicks(0, 2).build();
        assert_eq!(seq.notes.len(), 8);
        assert!(seq.notes.iter().all(|n| n.is_drum && n.pitch == 36));
        assert!(!seq.has_tempo_change());
    }
}
