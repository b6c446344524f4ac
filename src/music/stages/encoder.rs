//! DrumsEncoder: turns a drum track into a training example.
//!
//! Drum pitches are folded into nine drum types. The set of types struck at
//! a step is encoded as a 9-bit mask, giving 512 event classes. Inputs are
//! one-hot vectors for events `0..n-1`; labels are the class indices of
//! events `1..n`.

use crate::music::sequence::{DrumTrack, SequenceExample};
use crate::pipeline::error::StageResult;
use crate::pipeline::stage::Transform;
use std::collections::BTreeSet;

/// MIDI pitches per drum type, in bit order.
pub const DRUM_TYPE_PITCHES: [&[u8]; 9] = [
    // bass drum
    &[36, 35],
    // snare drum
    &[38, 27, 28, 31, 32, 33, 34, 37, 39, 40, 56, 65, 66, 75, 85],
    // closed hi-hat
    &[42, 44, 54, 68, 69, 70, 71, 73, 78, 80],
    // open hi-hat
    &[46, 67, 72, 74, 79, 81],
    // low tom
    &[45, 29, 41, 61, 64, 84],
    // mid tom
    &[48, 47, 60, 63, 77, 86, 87],
    // high tom
    &[50, 30, 43, 62, 76, 83],
    // crash cymbal
    &[49, 55, 57, 58],
    // ride cymbal
    &[51, 52, 53, 59, 82],
];

pub const NUM_DRUM_TYPES: usize = DRUM_TYPE_PITCHES.len();
pub const NUM_CLASSES: usize = 1 << NUM_DRUM_TYPES;

pub struct DrumsEncoder {
    name: String,
    /// Drum type index per MIDI pitch; `None` for unmapped pitches.
    drum_type: [Option<u8>; 128],
}

impl DrumsEncoder {
    pub fn new(name: impl Into<String>) -> Self {
        let mut drum_type = [None; 128];
        for (idx, pitches) in DRUM_TYPE_PITCHES.iter().enumerate() {
            for &pitch in pitches.iter() {
                drum_type[pitch as usize] = Some(idx as u8);
            }
        }
        Self {
            name: name.into(),
            drum_type,
        }
    }

    /// Class index of one step. Unmapped pitches are ignored.
    pub fn encode_event(&self, pitches: &BTreeSet<u8>) -> u32 {
        pitches
            .iter()
            .filter_map(|&p| self.drum_type.get(p as usize).copied().flatten())
            .fold(0u32, |mask, t| mask | (1 << t))
    }

    pub fn encode(&self, track: &DrumTrack) -> SequenceExample {
        let events: Vec<u32> = track.events.iter().map(|e| self.encode_event(e)).collect();
        if events.len() < 2 {
            return SequenceExample {
                inputs: Vec::new(),
                labels: Vec::new(),
            };
        }

        let inputs = events[..events.len() - 1]
            .iter()
            .map(|&class| {
                let mut one_hot = vec![0.0f32; NUM_CLASSES];
                one_hot[class as usize] = 1.0;
                one_hot
            })
            .collect();
        let labels = events[1..].to_vec();
        SequenceExample { inputs, labels }
    }
}

impl Transform for DrumsEncoder {
    type Input = DrumTrack;
    type Output = SequenceExample;

    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&mut self, track: DrumTrack) -> StageResult<Vec<SequenceExample>> {
        Ok(vec![self.encode(&track)])
    }
}
