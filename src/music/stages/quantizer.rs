//! Quantizer: snaps note times onto a fixed step grid.
//!
//! Sequences whose tempo or meter changes part-way through cannot be put on
//! a single grid; they are discarded and counted rather than failed.

use crate::music::sequence::{NoteSequence, QuantizedNote, QuantizedSequence};
use crate::pipeline::error::{StageError, StageResult};
use crate::pipeline::stage::Transform;
use crate::pipeline::stats::StageStats;
use thiserror::Error;

pub const DEFAULT_STEPS_PER_QUARTER: u32 = 4;

/// Largest step index a note may land on.
pub const MAX_STEP: u64 = 1 << 32;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuantizeError {
    #[error("Note {pitch} has invalid time {time}")]
    InvalidNoteTime { pitch: u8, time: f64 },

    #[error("Note {pitch} at time {time} lies beyond step {max}", max = MAX_STEP)]
    StepOutOfRange { pitch: u8, time: f64 },

    #[error("Invalid tempo {0} qpm")]
    InvalidTempo(f64),

    #[error("Invalid time signature {numerator}/{denominator}")]
    InvalidTimeSignature { numerator: u32, denominator: u32 },
}

/// Quantize a sequence that has a single tempo and time signature.
pub fn quantize(
    sequence: &NoteSequence,
    steps_per_quarter: u32,
) -> Result<QuantizedSequence, QuantizeError> {
    let qpm = sequence.qpm();
    if !(qpm.is_finite() && qpm > 0.0) {
        return Err(QuantizeError::InvalidTempo(qpm));
    }
    let time_signature = sequence.time_signature();
    if time_signature.numerator == 0 || time_signature.denominator == 0 {
        return Err(QuantizeError::InvalidTimeSignature {
            numerator: time_signature.numerator,
            denominator: time_signature.denominator,
        });
    }

    let steps_per_second = steps_per_quarter as f64 * qpm / 60.0;
    let to_step = |pitch: u8, time: f64| -> Result<u64, QuantizeError> {
        if !time.is_finite() || time < 0.0 {
            return Err(QuantizeError::InvalidNoteTime { pitch, time });
        }
        let step = (time * steps_per_second).round();
        if step > MAX_STEP as f64 {
            return Err(QuantizeError::StepOutOfRange { pitch, time });
        }
        Ok(step as u64)
    };

    let mut notes = Vec::with_capacity(sequence.notes.len());
    let mut total_steps = to_step(0, sequence.total_time.max(0.0))?;
    for note in &sequence.notes {
        let start_step = to_step(note.pitch, note.start_time)?;
        let mut end_step = to_step(note.pitch, note.end_time)?;
        // Every note occupies at least one step
        if end_step <= start_step {
            end_step = start_step
                .checked_add(1)
                .ok_or(QuantizeError::StepOutOfRange {
                    pitch: note.pitch,
                    time: note.end_time,
                })?;
        }
        total_steps = total_steps.max(end_step);
        notes.push(QuantizedNote {
            pitch: note.pitch,
            velocity: note.velocity,
            start_step,
            end_step,
            is_drum: note.is_drum,
            instrument: note.instrument,
        });
    }

    Ok(QuantizedSequence {
        id: sequence.id.clone(),
        steps_per_quarter,
        qpm,
        time_signature,
        notes,
        total_steps,
    })
}

pub struct Quantizer {
    name: String,
    steps_per_quarter: u32,
    stats: StageStats,
}

impl Quantizer {
    pub fn new(steps_per_quarter: u32) -> Self {
        Self {
            name: "Quantizer".to_string(),
            steps_per_quarter,
            stats: StageStats::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for Quantizer {
    fn default() -> Self {
        Self::new(DEFAULT_STEPS_PER_QUARTER)
    }
}

impl Transform for Quantizer {
    type Input = NoteSequence;
    type Output = QuantizedSequence;

    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&mut self, sequence: NoteSequence) -> StageResult<Vec<QuantizedSequence>> {
        if sequence.has_tempo_change() {
            tracing::debug!("Discarding '{}': multiple tempos", sequence.id);
            self.stats
                .increment("sequences_discarded_because_multiple_tempos", 1);
            return Ok(Vec::new());
        }
        if sequence.has_time_signature_change() {
            tracing::debug!("Discarding '{}': multiple time signatures", sequence.id);
            self.stats
                .increment("sequences_discarded_because_multiple_time_signatures", 1);
            return Ok(Vec::new());
        }

        let quantized = quantize(&sequence, self.steps_per_quarter)
            .map_err(|e| StageError::failed(e.to_string()))?;
        Ok(vec![quantized])
    }

    fn stats(&self) -> StageStats {
        self.stats.clone()
    }

    fn reset_stats(&mut self) {
        self.stats.clear();
    }
}
