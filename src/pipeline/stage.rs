//! Stage abstraction for the pipeline.
//!
//! Two-layer design:
//! - **`Stage` trait**: object-safe, type-erased interface the compiler and
//!   executor work with. Anything implementing it can be wired into a graph.
//! - **`Transform` / `Router` traits**: typed authoring interfaces. Wrap an
//!   implementation in `TransformStage` or `RouterStage` to get a `Stage`;
//!   the wrapper derives the declared record types from the associated types
//!   and does the downcasting.

use crate::pipeline::error::{StageError, StageResult};
use crate::pipeline::port::{Emission, PortDescriptor, PortName};
use crate::pipeline::record::{Record, RecordType};
use crate::pipeline::stats::StageStats;
use std::any::Any;
use std::fmt::Debug;

/// A named, typed unit of work in the graph.
pub trait Stage: Send {
    /// Instance name. Must be unique within a graph.
    fn name(&self) -> &str;

    /// The record type this stage accepts.
    fn input_type(&self) -> RecordType;

    /// Output ports with their record types.
    fn output_ports(&self) -> Vec<PortDescriptor>;

    /// Turn one input record into zero or more emissions.
    fn transform(&mut self, input: Record) -> StageResult<Vec<Emission>>;

    /// Metrics accumulated since construction or the last `reset_stats`.
    fn stats(&self) -> StageStats {
        StageStats::default()
    }

    fn reset_stats(&mut self) {}
}

impl Debug for dyn Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name())
            .field("input", &self.input_type())
            .finish()
    }
}

/// Typed single-output transform.
pub trait Transform: Send {
    type Input: Any + Clone + Send + Debug;
    type Output: Any + Clone + Send + Debug;

    fn name(&self) -> &str;

    fn transform(&mut self, input: Self::Input) -> StageResult<Vec<Self::Output>>;

    fn stats(&self) -> StageStats {
        StageStats::default()
    }

    fn reset_stats(&mut self) {}
}

/// Adapts a `Transform` to the `Stage` interface.
pub struct TransformStage<T: Transform>(pub T);

impl<T: Transform> TransformStage<T> {
    pub fn new(inner: T) -> Self {
        Self(inner)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }
}

impl<T: Transform> Stage for TransformStage<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn input_type(&self) -> RecordType {
        RecordType::of::<T::Input>()
    }

    fn output_ports(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::default_port(RecordType::of::<T::Output>())]
    }

    fn transform(&mut self, input: Record) -> StageResult<Vec<Emission>> {
        let value = input.downcast::<T::Input>()?;
        let outputs = self.0.transform(value)?;
        Ok(outputs
            .into_iter()
            .map(|out| Emission::single(Record::new(out)))
            .collect())
    }

    fn stats(&self) -> StageStats {
        self.0.stats()
    }

    fn reset_stats(&mut self) {
        self.0.reset_stats();
    }
}

/// A value bound for a named port.
#[derive(Debug, Clone, PartialEq)]
pub struct Routed<T> {
    pub port: PortName,
    pub value: T,
}

impl<T> Routed<T> {
    pub fn new(port: impl Into<PortName>, value: T) -> Self {
        Self {
            port: port.into(),
            value,
        }
    }
}

/// Typed multi-port transform. All ports carry the same record type.
pub trait Router: Send {
    type Input: Any + Clone + Send + Debug;
    type Output: Any + Clone + Send + Debug;

    fn name(&self) -> &str;

    /// Declared output port names.
    fn ports(&self) -> &[PortName];

    fn route(&mut self, input: Self::Input) -> StageResult<Vec<Routed<Self::Output>>>;

    fn stats(&self) -> StageStats {
        StageStats::default()
    }

    fn reset_stats(&mut self) {}
}

/// Adapts a `Router` to the `Stage` interface.
pub struct RouterStage<R: Router>(pub R);

impl<R: Router> RouterStage<R> {
    pub fn new(inner: R) -> Self {
        Self(inner)
    }

    pub fn inner(&self) -> &R {
        &self.0
    }
}

impl<R: Router> Stage for RouterStage<R> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn input_type(&self) -> RecordType {
        RecordType::of::<R::Input>()
    }

    fn output_ports(&self) -> Vec<PortDescriptor> {
        let ty = RecordType::of::<R::Output>();
        self.0
            .ports()
            .iter()
            .map(|name| PortDescriptor::new(name.clone(), ty))
            .collect()
    }

    fn transform(&mut self, input: Record) -> StageResult<Vec<Emission>> {
        let value = input.downcast::<R::Input>()?;
        let routed = self.0.route(value)?;
        let mut emissions = Vec::with_capacity(routed.len());
        for Routed { port, value } in routed {
            if !self.0.ports().contains(&port) {
                return Err(StageError::UnknownPort(port));
            }
            emissions.push(Emission::new(port, Record::new(value)));
        }
        Ok(emissions)
    }

    fn stats(&self) -> StageStats {
        self.0.stats()
    }

    fn reset_stats(&mut self) {
        self.0.reset_stats();
    }
}
