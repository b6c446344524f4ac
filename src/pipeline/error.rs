//! Pipeline-specific error types.

use crate::pipeline::id::StageId;
use crate::pipeline::record::{RecordType, TypeMismatch};
use thiserror::Error;

/// Structural or type error found while compiling a graph description.
/// Always fatal and always raised before any record is processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphConstructionError {
    #[error("Graph has no Input sentinel")]
    MissingInput,

    #[error("Input sentinels declare different types: {first} and {second}")]
    ConflictingInputTypes {
        first: RecordType,
        second: RecordType,
    },

    #[error("Graph has no Output sentinel")]
    MissingOutput,

    #[error("Unknown stage {0:?} referenced in an edge")]
    UnknownStage(StageId),

    #[error("Duplicate stage name '{0}'")]
    DuplicateStageName(String),

    #[error("Duplicate Output '{0}'")]
    DuplicateOutput(String),

    #[error("Stage '{stage}' has more than one upstream edge")]
    FanIn { stage: String },

    #[error("Stage '{stage}' has no upstream edge")]
    UnconnectedStage { stage: String },

    #[error("Stage '{stage}' has no port named '{port}'")]
    UnknownPort { stage: String, port: String },

    #[error("Stage '{stage}' has ports {ports:?}; an edge must name one of them")]
    AmbiguousPort { stage: String, ports: Vec<String> },

    #[error("Type mismatch on edge {from} -> {to}: produces {produced}, expects {expected}")]
    TypeMismatch {
        from: String,
        to: String,
        produced: RecordType,
        expected: RecordType,
    },

    #[error("Cycle detected through stages {0:?}")]
    CycleDetected(Vec<String>),

    #[error("Stage '{0}' is not reachable from the Input")]
    UnreachableStage(String),

    #[error("Stage '{0}' does not lead to any Output")]
    DanglingStage(String),

    #[error("Port '{port}' of stage '{stage}' is never consumed")]
    UnconsumedPort { stage: String, port: String },
}

/// Failure inside a single `Stage::transform` call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("Unexpected record type: {0}")]
    WrongInput(TypeMismatch),

    #[error("Emitted on undeclared port '{0}'")]
    UnknownPort(String),

    #[error("{0}")]
    Failed(String),
}

impl StageError {
    pub fn failed(message: impl Into<String>) -> Self {
        StageError::Failed(message.into())
    }
}

impl From<TypeMismatch> for StageError {
    fn from(err: TypeMismatch) -> Self {
        StageError::WrongInput(err)
    }
}

pub type StageResult<T> = std::result::Result<T, StageError>;

/// A stage failed while processing one top-level input record.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Stage '{stage}' failed on input #{input_index}: {source}")]
pub struct StageTransformError {
    pub stage: String,
    /// Zero-based position of the top-level input in the run.
    pub input_index: u64,
    #[source]
    pub source: StageError,
}

/// The input sequence could not produce a well-formed record.
#[derive(Error, Debug)]
#[error("Failed to read record at position {position}: {message}")]
pub struct SourceReadError {
    /// One-based position (line number for line-oriented sources).
    pub position: u64,
    pub message: String,
    /// True when the failure is at the final position of the source,
    /// e.g. a truncated trailing record.
    pub at_end: bool,
}

/// Persisting a bucket failed.
#[derive(Error, Debug)]
pub enum DestinationWriteError {
    #[error("Bucket '{bucket}' I/O error: {source}")]
    Io {
        bucket: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Bucket '{bucket}' serialization error: {message}")]
    Serialization { bucket: String, message: String },

    #[error("Bucket '{bucket}' received a record of the wrong type: {mismatch}")]
    WrongRecordType {
        bucket: String,
        mismatch: TypeMismatch,
    },
}

/// Everything `SerialDriver::run` can fail with.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("No destination configured for bucket '{0}'")]
    MissingDestination(String),

    #[error("Destination for bucket '{0}' has no matching Output")]
    UnknownBucket(String),

    #[error("Source yields {yields}, graph expects {expects}")]
    SourceType {
        yields: RecordType,
        expects: RecordType,
    },

    #[error("Destination for bucket '{bucket}' accepts {accepts}, bucket holds {holds}")]
    DestinationType {
        bucket: String,
        accepts: RecordType,
        holds: RecordType,
    },

    #[error(transparent)]
    Source(#[from] SourceReadError),

    #[error(transparent)]
    Destination(#[from] DestinationWriteError),

    #[error(transparent)]
    Stage(#[from] StageTransformError),
}

pub type PipelineResult<T> = std::result::Result<T, GraphConstructionError>;
