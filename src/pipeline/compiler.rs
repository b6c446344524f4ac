use super::compiled_plan::{BucketInfo, CompiledGraph, PlanStats, StageSlot, Target};
use super::error::{GraphConstructionError, PipelineResult};
use super::graph::{Connection, Downstream, GraphDescription, Upstream};
use super::id::StageId;
use super::port::{PortDescriptor, DEFAULT_PORT};
use super::record::RecordType;
use super::stage::Stage;
use std::collections::{HashMap, HashSet, VecDeque};

/// Compiles a graph description into an immutable, validated graph
pub struct GraphCompiler;

/// Edge source after ids and ports have been checked.
#[derive(Debug, Clone, Copy)]
enum EdgeFrom {
    Input,
    Port { stage: usize, port: usize },
}

/// Edge destination after ids have been checked.
#[derive(Debug, Clone, Copy)]
enum EdgeTo {
    Stage(usize),
    Bucket(usize),
}

#[derive(Debug, Clone, Copy)]
struct ResolvedEdge {
    from: EdgeFrom,
    to: EdgeTo,
}

impl GraphCompiler {
    /// Validate a description and compile it.
    ///
    /// Checks, in order: the Input sentinel, stage ids and names, fan-in and
    /// Output names, port references, edge types, cycles, and finally that
    /// every stage sits on an Input-to-Output path with all of its ports
    /// consumed. The first violation found is returned.
    ///
    /// Stages come out in topological order. Ties are broken by the order
    /// the stages were added, so compiling the same description twice
    /// yields the same order.
    pub fn compile(description: GraphDescription) -> PipelineResult<CompiledGraph> {
        let start_time = std::time::Instant::now();
        let GraphDescription {
            stages,
            connections,
        } = description;
        let n = stages.len();

        let input_type = Self::resolve_input_type(&connections)?;
        Self::check_stage_refs(&stages, &connections)?;

        let ports: Vec<Vec<PortDescriptor>> = stages.iter().map(|s| s.output_ports()).collect();
        let names: Vec<String> = stages.iter().map(|s| s.name().to_string()).collect();

        let (edges, buckets) = Self::resolve_edges(&names, &ports, &connections)?;
        Self::check_single_upstream(&names, &edges)?;
        Self::check_types(&stages, &names, &ports, &edges, input_type, &buckets)?;

        let (fwd_adj, bwd_adj) = Self::build_adjacency(n, &edges);
        let order = Self::topological_sort(&names, &fwd_adj)?;

        Self::check_reachability(&names, &edges, &fwd_adj, &bwd_adj)?;
        Self::check_ports_consumed(&names, &ports, &edges)?;

        let depth = Self::longest_path(&order, &bwd_adj);

        // Stage index -> position in execution order
        let mut position = vec![0usize; n];
        for (pos, &idx) in order.iter().enumerate() {
            position[idx] = pos;
        }

        let target_of = |to: EdgeTo| match to {
            EdgeTo::Stage(idx) => Target::Stage(position[idx]),
            EdgeTo::Bucket(b) => Target::Bucket(b),
        };

        let mut input_targets = Vec::new();
        let mut routes: Vec<Vec<Vec<Target>>> =
            ports.iter().map(|p| vec![Vec::new(); p.len()]).collect();
        for edge in &edges {
            match edge.from {
                EdgeFrom::Input => input_targets.push(target_of(edge.to)),
                EdgeFrom::Port { stage, port } => routes[stage][port].push(target_of(edge.to)),
            }
        }

        let mut slots: Vec<(usize, StageSlot)> = stages
            .into_iter()
            .zip(ports)
            .zip(routes)
            .enumerate()
            .map(|(idx, ((stage, ports), routes))| {
                (
                    position[idx],
                    StageSlot {
                        stage,
                        ports,
                        routes,
                    },
                )
            })
            .collect();
        slots.sort_by_key(|(pos, _)| *pos);
        let slots: Vec<StageSlot> = slots.into_iter().map(|(_, slot)| slot).collect();

        let compile_time_us = start_time.elapsed().as_micros() as u64;
        let stats = PlanStats {
            stage_count: n,
            edge_count: edges.len(),
            bucket_count: buckets.len(),
            depth,
            compile_time_us,
        };

        tracing::info!(
            "Compiled graph: {} stages, {} edges, {} outputs in {}us",
            stats.stage_count,
            stats.edge_count,
            stats.bucket_count,
            stats.compile_time_us
        );
        tracing::debug!(
            "Execution order: {:?}",
            slots.iter().map(|s| s.name()).collect::<Vec<_>>()
        );

        Ok(CompiledGraph {
            input_type,
            input_targets,
            slots,
            buckets,
            stats,
        })
    }

    /// All Input references must agree on one record type
    fn resolve_input_type(connections: &[Connection]) -> PipelineResult<RecordType> {
        let mut input_type: Option<RecordType> = None;
        for conn in connections {
            if let Upstream::Input(ty) = &conn.from {
                match input_type {
                    None => input_type = Some(*ty),
                    Some(first) if first != *ty => {
                        return Err(GraphConstructionError::ConflictingInputTypes {
                            first,
                            second: *ty,
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        input_type.ok_or(GraphConstructionError::MissingInput)
    }

    /// Every referenced stage id exists and stage names are unique
    fn check_stage_refs(stages: &[Box<dyn Stage>], connections: &[Connection]) -> PipelineResult<()> {
        let valid = |id: StageId| id.is_valid() && id.index() < stages.len();
        for conn in connections {
            if let Upstream::Stage(port_ref) = &conn.from {
                if !valid(port_ref.stage) {
                    return Err(GraphConstructionError::UnknownStage(port_ref.stage));
                }
            }
            if let Downstream::Stage(id) = &conn.to {
                if !valid(*id) {
                    return Err(GraphConstructionError::UnknownStage(*id));
                }
            }
        }

        let mut seen = HashSet::new();
        for stage in stages {
            if !seen.insert(stage.name()) {
                return Err(GraphConstructionError::DuplicateStageName(
                    stage.name().to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Resolve port names to indices and Output names to bucket slots
    fn resolve_edges(
        names: &[String],
        ports: &[Vec<PortDescriptor>],
        connections: &[Connection],
    ) -> PipelineResult<(Vec<ResolvedEdge>, Vec<BucketInfo>)> {
        let mut edges = Vec::with_capacity(connections.len());
        let mut buckets: Vec<BucketInfo> = Vec::new();
        let mut bucket_index: HashMap<String, usize> = HashMap::new();

        for conn in connections {
            let (from, produced) = match &conn.from {
                Upstream::Input(ty) => (EdgeFrom::Input, *ty),
                Upstream::Stage(port_ref) => {
                    let stage = port_ref.stage.index();
                    let declared = &ports[stage];
                    let port = match &port_ref.port {
                        Some(name) => declared.iter().position(|p| p.name == *name).ok_or_else(|| {
                            GraphConstructionError::UnknownPort {
                                stage: names[stage].clone(),
                                port: name.clone(),
                            }
                        })?,
                        None => match declared.len() {
                            1 => 0,
                            0 => {
                                return Err(GraphConstructionError::UnknownPort {
                                    stage: names[stage].clone(),
                                    port: DEFAULT_PORT.to_string(),
                                });
                            }
                            _ => {
                                return Err(GraphConstructionError::AmbiguousPort {
                                    stage: names[stage].clone(),
                                    ports: declared.iter().map(|p| p.name.clone()).collect(),
                                });
                            }
                        },
                    };
                    (EdgeFrom::Port { stage, port }, declared[port].record_type)
                }
            };

            let to = match &conn.to {
                Downstream::Stage(id) => EdgeTo::Stage(id.index()),
                Downstream::Output(name) => {
                    if bucket_index.contains_key(name) {
                        return Err(GraphConstructionError::DuplicateOutput(name.clone()));
                    }
                    // The bucket holds whatever its single upstream produces
                    bucket_index.insert(name.clone(), buckets.len());
                    buckets.push(BucketInfo {
                        name: name.clone(),
                        record_type: produced,
                    });
                    EdgeTo::Bucket(buckets.len() - 1)
                }
            };

            edges.push(ResolvedEdge { from, to });
        }

        if buckets.is_empty() {
            return Err(GraphConstructionError::MissingOutput);
        }
        Ok((edges, buckets))
    }

    /// Each stage has exactly one upstream edge
    fn check_single_upstream(names: &[String], edges: &[ResolvedEdge]) -> PipelineResult<()> {
        let mut upstream_count = vec![0usize; names.len()];
        for edge in edges {
            if let EdgeTo::Stage(idx) = edge.to {
                upstream_count[idx] += 1;
            }
        }
        for (idx, &count) in upstream_count.iter().enumerate() {
            match count {
                0 => {
                    return Err(GraphConstructionError::UnconnectedStage {
                        stage: names[idx].clone(),
                    });
                }
                1 => {}
                _ => {
                    return Err(GraphConstructionError::FanIn {
                        stage: names[idx].clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Producer and consumer types must be identical on every edge
    fn check_types(
        stages: &[Box<dyn Stage>],
        names: &[String],
        ports: &[Vec<PortDescriptor>],
        edges: &[ResolvedEdge],
        input_type: RecordType,
        buckets: &[BucketInfo],
    ) -> PipelineResult<()> {
        for edge in edges {
            let (from_name, produced) = match edge.from {
                EdgeFrom::Input => ("Input".to_string(), input_type),
                EdgeFrom::Port { stage, port } => (
                    format!("{}.{}", names[stage], ports[stage][port].name),
                    ports[stage][port].record_type,
                ),
            };
            let (to_name, expected) = match edge.to {
                EdgeTo::Stage(idx) => (names[idx].clone(), stages[idx].input_type()),
                EdgeTo::Bucket(b) => (format!("Output({})", buckets[b].name), buckets[b].record_type),
            };
            if produced != expected {
                return Err(GraphConstructionError::TypeMismatch {
                    from: from_name,
                    to: to_name,
                    produced,
                    expected,
                });
            }
        }
        Ok(())
    }

    /// Build forward and backward adjacency lists over stage-to-stage edges
    fn build_adjacency(n: usize, edges: &[ResolvedEdge]) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        let mut fwd_adj = vec![Vec::new(); n];
        let mut bwd_adj = vec![Vec::new(); n];

        for edge in edges {
            if let (EdgeFrom::Port { stage: from, .. }, EdgeTo::Stage(to)) = (edge.from, edge.to) {
                fwd_adj[from].push(to);
                bwd_adj[to].push(from);
            }
        }

        (fwd_adj, bwd_adj)
    }

    /// Topological sort using Kahn's algorithm
    fn topological_sort(names: &[String], fwd_adj: &[Vec<usize>]) -> PipelineResult<Vec<usize>> {
        let n = names.len();
        let mut in_degree = vec![0usize; n];
        for targets in fwd_adj {
            for &to in targets {
                in_degree[to] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            result.push(node);

            for &neighbor in &fwd_adj[node] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        if result.len() < n {
            let cycle: Vec<String> = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| names[i].clone())
                .collect();
            return Err(GraphConstructionError::CycleDetected(cycle));
        }

        Ok(result)
    }

    /// Forward reachability from Input, backward reachability from Outputs
    fn check_reachability(
        names: &[String],
        edges: &[ResolvedEdge],
        fwd_adj: &[Vec<usize>],
        bwd_adj: &[Vec<usize>],
    ) -> PipelineResult<()> {
        let n = names.len();

        let sources: Vec<usize> = edges
            .iter()
            .filter_map(|e| match (e.from, e.to) {
                (EdgeFrom::Input, EdgeTo::Stage(idx)) => Some(idx),
                _ => None,
            })
            .collect();
        let sinks: Vec<usize> = edges
            .iter()
            .filter_map(|e| match (e.from, e.to) {
                (EdgeFrom::Port { stage, .. }, EdgeTo::Bucket(_)) => Some(stage),
                _ => None,
            })
            .collect();

        let fwd_reachable = Self::reachability(&sources, fwd_adj, n);
        if let Some(idx) = (0..n).find(|&i| !fwd_reachable[i]) {
            return Err(GraphConstructionError::UnreachableStage(names[idx].clone()));
        }

        let bwd_reachable = Self::reachability(&sinks, bwd_adj, n);
        if let Some(idx) = (0..n).find(|&i| !bwd_reachable[i]) {
            return Err(GraphConstructionError::DanglingStage(names[idx].clone()));
        }

        Ok(())
    }

    /// DFS over `adj` from `roots`
    fn reachability(roots: &[usize], adj: &[Vec<usize>], n: usize) -> Vec<bool> {
        let mut reachable = vec![false; n];
        let mut stack = Vec::new();

        for &root in roots {
            if !reachable[root] {
                reachable[root] = true;
                stack.push(root);
            }
        }

        while let Some(node) = stack.pop() {
            for &neighbor in &adj[node] {
                if !reachable[neighbor] {
                    reachable[neighbor] = true;
                    stack.push(neighbor);
                }
            }
        }

        reachable
    }

    /// Every declared port has at least one consumer
    fn check_ports_consumed(
        names: &[String],
        ports: &[Vec<PortDescriptor>],
        edges: &[ResolvedEdge],
    ) -> PipelineResult<()> {
        let mut consumed: Vec<Vec<bool>> = ports.iter().map(|p| vec![false; p.len()]).collect();
        for edge in edges {
            if let EdgeFrom::Port { stage, port } = edge.from {
                consumed[stage][port] = true;
            }
        }
        for (stage, flags) in consumed.iter().enumerate() {
            if let Some(port) = flags.iter().position(|&c| !c) {
                return Err(GraphConstructionError::UnconsumedPort {
                    stage: names[stage].clone(),
                    port: ports[stage][port].name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Longest Input-to-Output chain, counted in stages
    fn longest_path(order: &[usize], bwd_adj: &[Vec<usize>]) -> usize {
        let mut depth = vec![0usize; bwd_adj.len()];
        for &node in order {
            let upstream = bwd_adj[node].iter().map(|&u| depth[u]).max().unwrap_or(0);
            depth[node] = upstream + 1;
        }
        depth.into_iter().max().unwrap_or(0)
    }
}
