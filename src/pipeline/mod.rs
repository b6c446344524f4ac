//! Typed DAG pipeline engine.
//!
//! Records flow from a single Input through named stages into named Output
//! buckets. Graphs are described as plain data, validated up front by the
//! compiler, and then executed one record at a time.
//!
//! # Architecture
//!
//! ```text
//! GraphDescription ──► GraphCompiler ──► CompiledGraph ──► DagExecutor
//!                                                              │
//!                        RecordSource ──► SerialDriver ◄───────┘
//!                                              │
//!                                              └──► BucketSinks
//! ```
//!
//! # Design
//!
//! - **Trait-object stages**: the executor only sees `dyn Stage`; typed
//!   `Transform` / `Router` implementations are wrapped by adapters.
//! - **Type-erased records**: `Record` carries its `RecordType`, so edge
//!   types are checked at compile time of the graph, not per record.
//! - **Per-record isolation**: queues exist only inside one `process` call.
//! - **Stats by instance name**: two copies of the same stage kind report
//!   separately.

pub mod compiled_plan;
pub mod compiler;
pub mod driver;
pub mod error;
pub mod executor;
pub mod graph;
pub mod id;
pub mod io;
pub mod port;
pub mod record;
pub mod stage;
pub mod stages;
pub mod stats;

pub use compiled_plan::{BucketInfo, CompiledGraph, PlanStats};
pub use compiler::GraphCompiler;
pub use driver::{
    BucketSinks, DriverEvent, DriverOptions, FailurePolicy, RecordSink, RecordSource, RunSummary,
    SerialDriver,
};
pub use error::{
    DestinationWriteError, DriverError, GraphConstructionError, PipelineResult, SourceReadError,
    StageError, StageResult, StageTransformError,
};
pub use executor::{BucketRecord, DagExecutor, ExecutionOutput};
pub use graph::{Connection, Downstream, GraphDescription, Upstream};
pub use id::{PortRef, StageId};
pub use io::{JsonLinesSink, JsonLinesSource, MemorySink, MemorySource};
pub use port::{Emission, PortDescriptor, PortName, DEFAULT_PORT};
pub use record::{Payload, Record, RecordType, TypeMismatch};
pub use stage::{Routed, Router, RouterStage, Stage, Transform, TransformStage};
pub use stages::{filter_stage, flat_map_stage, map_stage, try_stage, FnStage};
pub use stats::{Histogram, StageStats, Statistic, StatsAggregator};
