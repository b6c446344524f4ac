//! DrumsExtractor: cuts drum tracks out of a quantized sequence.
//!
//! Drum onsets are grouped per step. A new track starts whenever the gap
//! between consecutive onsets reaches `gap_bars` bars. Each track starts on
//! a bar boundary and is padded to a whole number of bars.

use crate::music::sequence::{DrumTrack, QuantizedSequence};
use crate::pipeline::error::{StageError, StageResult};
use crate::pipeline::stage::Transform;
use crate::pipeline::stats::StageStats;
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_MIN_BARS: u32 = 7;
pub const DEFAULT_MAX_STEPS: u64 = 512;
pub const DEFAULT_GAP_BARS: f64 = 1.0;

pub struct DrumsExtractor {
    name: String,
    min_bars: u32,
    max_steps: u64,
    gap_bars: f64,
    stats: StageStats,
}

impl DrumsExtractor {
    pub fn new(name: impl Into<String>, min_bars: u32, max_steps: u64, gap_bars: f64) -> Self {
        Self {
            name: name.into(),
            min_bars,
            max_steps,
            gap_bars,
            stats: StageStats::new(),
        }
    }

    /// Bucket lower bounds for `drum_track_lengths_in_bars`.
    fn length_bounds(&self) -> Vec<f64> {
        let min = self.min_bars as f64;
        let mut bounds = vec![0.0, 1.0, 10.0, 20.0, 30.0, 40.0, 50.0, 100.0, 200.0, 500.0];
        bounds.extend([(min / 2.0).floor(), min, min + 1.0, min - 1.0]);
        bounds
    }

    /// Split the sequence's drum onsets into raw tracks, before any length
    /// filtering.
    fn split_tracks(&self, sequence: &QuantizedSequence, steps_per_bar: u64) -> Vec<DrumTrack> {
        let mut onsets: BTreeMap<u64, BTreeSet<u8>> = BTreeMap::new();
        for note in sequence.notes.iter().filter(|n| n.is_drum) {
            onsets.entry(note.start_step).or_default().insert(note.pitch);
        }

        let gap_steps = if self.gap_bars > 0.0 {
            Some(((self.gap_bars * steps_per_bar as f64).ceil() as u64).max(1))
        } else {
            None
        };

        // Group consecutive onsets that are closer than the gap
        let mut groups: Vec<Vec<(u64, BTreeSet<u8>)>> = Vec::new();
        let mut last_step: Option<u64> = None;
        for (step, pitches) in onsets {
            let split = match (last_step, gap_steps) {
                (Some(prev), Some(gap)) => step - prev >= gap,
                (None, _) => true,
                (Some(_), None) => false,
            };
            if split {
                groups.push(Vec::new());
            }
            if let Some(group) = groups.last_mut() {
                group.push((step, pitches));
            }
            last_step = Some(step);
        }

        let mut tracks = Vec::with_capacity(groups.len());
        let mut search_start = 0u64;
        for group in groups {
            let (Some(first), Some(last)) = (group.first(), group.last()) else {
                continue;
            };
            let aligned = first.0 - first.0 % steps_per_bar;
            // A short gap can leave the previous track's padding past this
            // group's first onset
            let start_step = aligned.max(search_start).min(first.0);
            let len = last.0 - start_step + 1;
            // Pad to a bar boundary
            let mut padded = len.div_ceil(steps_per_bar) * steps_per_bar;
            if self.max_steps > 0 {
                // Anything past this is truncated anyway
                padded = padded.min(self.max_steps + steps_per_bar);
            }

            let mut events = vec![BTreeSet::new(); padded as usize];
            for (step, pitches) in group {
                if let Some(slot) = events.get_mut((step - start_step) as usize) {
                    *slot = pitches;
                }
            }
            let track = DrumTrack {
                events,
                steps_per_bar,
                steps_per_quarter: sequence.steps_per_quarter,
                start_step,
            };
            search_start = track.end_step();
            tracks.push(track);
        }
        tracks
    }
}

impl Default for DrumsExtractor {
    fn default() -> Self {
        Self::new(
            "DrumsExtractor",
            DEFAULT_MIN_BARS,
            DEFAULT_MAX_STEPS,
            DEFAULT_GAP_BARS,
        )
    }
}

impl Transform for DrumsExtractor {
    type Input = QuantizedSequence;
    type Output = DrumTrack;

    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&mut self, sequence: QuantizedSequence) -> StageResult<Vec<DrumTrack>> {
        let steps_per_bar = sequence.steps_per_bar();
        if steps_per_bar < 1.0 || steps_per_bar.fract() != 0.0 {
            return Err(StageError::failed(format!(
                "Sequence '{}' has non-integer steps per bar ({})",
                sequence.id, steps_per_bar
            )));
        }
        let steps_per_bar = steps_per_bar as u64;
        let min_steps = self.min_bars as u64 * steps_per_bar;
        let bounds = self.length_bounds();

        let mut kept = Vec::new();
        for mut track in self.split_tracks(&sequence, steps_per_bar) {
            if track.num_steps() < min_steps {
                self.stats.increment("drum_tracks_discarded_too_short", 1);
                continue;
            }
            if self.max_steps > 0 && track.num_steps() > self.max_steps {
                let mut truncated = self.max_steps - self.max_steps % steps_per_bar;
                if truncated == 0 {
                    truncated = self.max_steps;
                }
                track.set_length(truncated);
                self.stats.increment("drum_tracks_truncated_too_long", 1);
            }
            self.stats.observe(
                "drum_track_lengths_in_bars",
                &bounds,
                (track.num_steps() / steps_per_bar) as f64,
            );
            kept.push(track);
        }

        tracing::debug!(
            "{}: {} drum tracks from '{}'",
            self.name,
            kept.len(),
            sequence.id
        );
        Ok(kept)
    }

    fn stats(&self) -> StageStats {
        self.stats.clone()
    }

    fn reset_stats(&mut self) {
        self.stats.clear();
    }
}
