//! # drumdag: typed DAG pipelines for drum training data
//!
//! Records flow from a single input through a directed acyclic graph of
//! named stages into named output buckets. The bundled graph turns
//! `NoteSequence`s into drum-track `SequenceExample`s split into training and
//! evaluation sets.
//!
//! ## Architecture
//!
//! - **Pipeline**: graph description, compiler, per-record executor and the
//!   serial driver that pumps a source into per-bucket sinks
//! - **Music**: sequence types and the quantize / partition / extract /
//!   encode stages
//! - **Config**: `DatasetConfig`, read from TOML
//!
//! ## Configuration
//!
//! The default config file lives in the platform config directory under
//! `drumdag/config.toml`:
//!
//! - **Linux**: `~/.config/drumdag/`
//! - **macOS**: `~/Library/Application Support/drumdag/`
//! - **Windows**: `%APPDATA%\drumdag\`
//!
//! ## Example
//!
//! ```ignore
//! use drumdag::{
//!     config::DatasetConfig,
//!     music::{build_drums_executor, SequenceExample, EVAL_BUCKET, TRAINING_BUCKET},
//!     pipeline::{BucketSinks, DriverOptions, JsonLinesSink, JsonLinesSource, SerialDriver},
//! };
//!
//! let config = DatasetConfig::load_or_default();
//! let executor = build_drums_executor(&config)?;
//! let sinks = BucketSinks::new()
//!     .with(TRAINING_BUCKET, JsonLinesSink::<SequenceExample>::create("out", TRAINING_BUCKET)?)
//!     .with(EVAL_BUCKET, JsonLinesSink::<SequenceExample>::create("out", EVAL_BUCKET)?);
//! let mut driver = SerialDriver::new(executor, DriverOptions::default());
//! let summary = driver.run(JsonLinesSource::open("notes.jsonl")?, sinks)?;
//! println!("{}", summary.stats);
//! ```

pub mod config;
pub mod error;
pub mod music;
pub mod pipeline;

pub use config::DatasetConfig;
pub use error::{DrumDagError, Result, ResultExt};
