//! Declarative graph description.
//!
//! A `GraphDescription` is plain data: the stages that take part and an
//! ordered list of connections between them. Nothing is validated here; the
//! description is consumed once by `GraphCompiler::compile`, which either
//! rejects it or turns it into an immutable `CompiledGraph`.
//!
//! ```ignore
//! let mut dag = GraphDescription::new();
//! let double = dag.add_stage(map_stage("Double", |x: i32| x * 2));
//! dag.connect(Upstream::input::<i32>(), double);
//! dag.connect(double, Downstream::output("doubled"));
//! let graph = GraphCompiler::compile(dag)?;
//! ```

use crate::pipeline::error::PipelineResult;
use crate::pipeline::id::{PortRef, StageId};
use crate::pipeline::record::RecordType;
use crate::pipeline::stage::Stage;

/// Where an edge starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream {
    /// The graph entry, carrying the declared input type.
    Input(RecordType),
    /// A stage output port.
    Stage(PortRef),
}

impl Upstream {
    pub fn input<T: 'static>() -> Self {
        Upstream::Input(RecordType::of::<T>())
    }
}

impl From<StageId> for Upstream {
    fn from(stage: StageId) -> Self {
        Upstream::Stage(stage.into())
    }
}

impl From<PortRef> for Upstream {
    fn from(port: PortRef) -> Self {
        Upstream::Stage(port)
    }
}

/// Where an edge ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Downstream {
    /// A stage's (single) input.
    Stage(StageId),
    /// A named terminal bucket.
    Output(String),
}

impl Downstream {
    pub fn output(name: impl Into<String>) -> Self {
        Downstream::Output(name.into())
    }
}

impl From<StageId> for Downstream {
    fn from(stage: StageId) -> Self {
        Downstream::Stage(stage)
    }
}

/// One edge declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub from: Upstream,
    pub to: Downstream,
}

/// Stages plus the ordered list of connections between them.
#[derive(Default)]
pub struct GraphDescription {
    pub(crate) stages: Vec<Box<dyn Stage>>,
    pub(crate) connections: Vec<Connection>,
}

impl GraphDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage. Returns its StageId.
    pub fn add_stage(&mut self, stage: impl Stage + 'static) -> StageId {
        self.add_boxed_stage(Box::new(stage))
    }

    pub fn add_boxed_stage(&mut self, stage: Box<dyn Stage>) -> StageId {
        let id = StageId(self.stages.len() as u32);
        self.stages.push(stage);
        id
    }

    /// Declare an edge from `from` to `to`.
    pub fn connect(&mut self, from: impl Into<Upstream>, to: impl Into<Downstream>) -> &mut Self {
        self.connections.push(Connection {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Shorthand for `connect(from, Downstream::output(name))`.
    pub fn output(&mut self, name: impl Into<String>, from: impl Into<Upstream>) -> &mut Self {
        self.connect(from, Downstream::output(name))
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Name of a stage, if the id is valid.
    pub fn stage_name(&self, id: StageId) -> Option<&str> {
        self.stages.get(id.index()).map(|s| s.name())
    }

    /// Validate and compile. See `GraphCompiler::compile`.
    pub fn build(self) -> PipelineResult<crate::pipeline::compiled_plan::CompiledGraph> {
        crate::pipeline::compiler::GraphCompiler::compile(self)
    }
}

impl std::fmt::Debug for GraphDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("GraphDescription")
            .field("stages", &names)
            .field("connections", &self.connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::map_stage;

    #[test]
    fn test_description_records_edges_in_order() {
        let mut dag = GraphDescription::new();
        let a = dag.add_stage(map_stage("A", |x: i32| x));
        let b = dag.add_stage(map_stage("B", |x: i32| x));
        dag.connect(Upstream::input::<i32>(), a)
            .connect(a, b)
            .output("out", b);

        assert_eq!(dag.stage_count(), 2);
        assert_eq!(dag.connections().len(), 3);
        assert_eq!(dag.connections()[1].from, Upstream::Stage(a.into()));
        assert_eq!(dag.connections()[2].to, Downstream::output("out"));
        assert_eq!(dag.stage_name(b), Some("B"));
        assert_eq!(dag.stage_name(StageId(9)), None);
    }
}
