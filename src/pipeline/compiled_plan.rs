use crate::pipeline::port::PortDescriptor;
use crate::pipeline::record::RecordType;
use crate::pipeline::stage::Stage;

/// Where a routed record goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Position of a stage in `CompiledGraph::slots` (topological order).
    Stage(usize),
    /// Index into `CompiledGraph::buckets`.
    Bucket(usize),
}

/// A stage together with its precomputed routing table.
pub struct StageSlot {
    pub(crate) stage: Box<dyn Stage>,
    /// Output ports, as declared at compile time.
    pub(crate) ports: Vec<PortDescriptor>,
    /// `routes[i]` lists the consumers of `ports[i]`, in declaration order.
    pub(crate) routes: Vec<Vec<Target>>,
}

impl StageSlot {
    pub fn name(&self) -> &str {
        self.stage.name()
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    /// Consumers of the named port.
    pub fn route(&self, port: &str) -> Option<&[Target]> {
        self.ports
            .iter()
            .position(|p| p.name == port)
            .map(|i| self.routes[i].as_slice())
    }
}

/// A named terminal bucket and the record type it collects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub record_type: RecordType,
}

/// Validated, immutable graph ready for execution.
pub struct CompiledGraph {
    pub(crate) input_type: RecordType,
    pub(crate) input_targets: Vec<Target>,
    /// Stages in topological order.
    pub(crate) slots: Vec<StageSlot>,
    pub(crate) buckets: Vec<BucketInfo>,
    pub(crate) stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default)]
pub struct PlanStats {
    /// Number of stages in the graph
    pub stage_count: usize,

    /// Number of edges, including Input and Output edges
    pub edge_count: usize,

    /// Number of Output buckets
    pub bucket_count: usize,

    /// Longest Input-to-Output path, counted in stages
    pub depth: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl CompiledGraph {
    pub fn input_type(&self) -> RecordType {
        self.input_type
    }

    pub fn buckets(&self) -> &[BucketInfo] {
        &self.buckets
    }

    pub fn bucket(&self, name: &str) -> Option<&BucketInfo> {
        self.buckets.iter().find(|b| b.name == name)
    }

    /// Stage names in execution order.
    pub fn execution_order(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.name()).collect()
    }

    pub fn slots(&self) -> &[StageSlot] {
        &self.slots
    }

    pub fn stats(&self) -> &PlanStats {
        &self.stats
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("input_type", &self.input_type)
            .field("execution_order", &self.execution_order())
            .field("buckets", &self.buckets)
            .field("stats", &self.stats)
            .finish()
    }
}
