//! Drum-track domain: note sequences, the stages that turn them into training
//! examples, and the assembled dataset graph.

pub mod dataset;
pub mod sequence;
pub mod stages;

pub use dataset::{build_drums_executor, build_drums_graph, EVAL_BUCKET, TRAINING_BUCKET};
pub use sequence::{DrumTrack, Note, NoteSequence, QuantizedSequence, SequenceExample};
