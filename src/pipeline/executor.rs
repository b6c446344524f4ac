//! DAG executor: pushes one top-level record through a compiled graph.
//!
//! Each call to `process`:
//! 1. Checks the record against the graph input type.
//! 2. Seeds the queues of the Input consumers.
//! 3. Walks stages in topological order, draining each queue in FIFO order.
//! 4. Routes every emission to all consumers of its port; Output targets are
//!    appended to the result in emission order.
//!
//! Queues live only for the duration of one call, so a failed record leaves
//! nothing behind for the next one.

use crate::pipeline::compiled_plan::{BucketInfo, CompiledGraph, Target};
use crate::pipeline::error::{StageError, StageTransformError};
use crate::pipeline::record::{Record, RecordType, TypeMismatch};
use crate::pipeline::stats::StatsAggregator;
use std::collections::BTreeMap;

/// Name used for failures detected before any stage runs.
pub const INPUT_STAGE: &str = "Input";

/// A record that reached an Output, tagged with its bucket name.
#[derive(Debug, Clone)]
pub struct BucketRecord {
    pub bucket: String,
    pub record: Record,
}

/// Everything one top-level record produced, in emission order.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    records: Vec<BucketRecord>,
}

impl ExecutionOutput {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BucketRecord> {
        self.records.iter()
    }

    /// Records routed to `bucket`, in emission order.
    pub fn bucket<'a>(&'a self, bucket: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.records
            .iter()
            .filter(move |r| r.bucket == bucket)
            .map(|r| &r.record)
    }

    pub fn into_records(self) -> Vec<BucketRecord> {
        self.records
    }
}

impl IntoIterator for ExecutionOutput {
    type Item = BucketRecord;
    type IntoIter = std::vec::IntoIter<BucketRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// Executor-side counters for one stage.
#[derive(Debug, Clone, Copy, Default)]
struct StageMetrics {
    records_in: u64,
    records_out: u64,
    failures: u64,
}

/// Runs a `CompiledGraph` one record at a time.
pub struct DagExecutor {
    graph: CompiledGraph,
    metrics: Vec<StageMetrics>,
    /// Number of top-level records seen so far.
    inputs_seen: u64,
}

impl DagExecutor {
    pub fn new(graph: CompiledGraph) -> Self {
        let metrics = vec![StageMetrics::default(); graph.slots.len()];
        Self {
            graph,
            metrics,
            inputs_seen: 0,
        }
    }

    pub fn input_type(&self) -> RecordType {
        self.graph.input_type()
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Bucket name to the record type it collects.
    pub fn bucket_types(&self) -> BTreeMap<String, RecordType> {
        self.graph
            .buckets
            .iter()
            .map(|b| (b.name.clone(), b.record_type))
            .collect()
    }

    /// Process one top-level record.
    pub fn process(&mut self, record: Record) -> Result<ExecutionOutput, StageTransformError> {
        let input_index = self.inputs_seen;
        self.inputs_seen += 1;

        if record.record_type() != self.graph.input_type {
            return Err(StageTransformError {
                stage: INPUT_STAGE.to_string(),
                input_index,
                source: StageError::WrongInput(TypeMismatch {
                    expected: self.graph.input_type,
                    found: record.record_type(),
                }),
            });
        }

        let mut queues: Vec<Vec<Record>> = vec![Vec::new(); self.graph.slots.len()];
        let mut output = Vec::new();

        dispatch(
            &self.graph.input_targets,
            record,
            &mut queues,
            &self.graph.buckets,
            &mut output,
        );

        for pos in 0..self.graph.slots.len() {
            let queue = std::mem::take(&mut queues[pos]);
            if queue.is_empty() {
                continue;
            }

            let slot = &mut self.graph.slots[pos];
            let metrics = &mut self.metrics[pos];

            for item in queue {
                metrics.records_in += 1;
                let emissions = match slot.stage.transform(item) {
                    Ok(emissions) => emissions,
                    Err(source) => {
                        metrics.failures += 1;
                        tracing::debug!(
                            "Stage '{}' failed on input #{}: {}",
                            slot.stage.name(),
                            input_index,
                            source
                        );
                        return Err(StageTransformError {
                            stage: slot.stage.name().to_string(),
                            input_index,
                            source,
                        });
                    }
                };

                for emission in emissions {
                    let Some(targets) = slot.route(&emission.port) else {
                        metrics.failures += 1;
                        return Err(StageTransformError {
                            stage: slot.stage.name().to_string(),
                            input_index,
                            source: StageError::UnknownPort(emission.port),
                        });
                    };
                    metrics.records_out += 1;
                    dispatch(
                        targets,
                        emission.record,
                        &mut queues,
                        &self.graph.buckets,
                        &mut output,
                    );
                }
            }
        }

        Ok(ExecutionOutput { records: output })
    }

    /// Stage-reported stats plus executor counters, keyed by stage name.
    pub fn stats(&self) -> StatsAggregator {
        let mut agg = StatsAggregator::new();
        for (slot, metrics) in self.graph.slots.iter().zip(&self.metrics) {
            let name = slot.stage.name();
            agg.merge_stage(name, &slot.stage.stats());
            agg.increment(name, "records_in", metrics.records_in);
            agg.increment(name, "records_out", metrics.records_out);
            agg.increment(name, "failures", metrics.failures);
        }
        agg
    }

    pub fn reset_stats(&mut self) {
        for slot in &mut self.graph.slots {
            slot.stage.reset_stats();
        }
        for metrics in &mut self.metrics {
            *metrics = StageMetrics::default();
        }
    }
}

impl std::fmt::Debug for DagExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagExecutor")
            .field("graph", &self.graph)
            .field("inputs_seen", &self.inputs_seen)
            .finish()
    }
}

/// Hand `record` to every target. All but the last get a clone.
fn dispatch(
    targets: &[Target],
    record: Record,
    queues: &mut [Vec<Record>],
    buckets: &[BucketInfo],
    output: &mut Vec<BucketRecord>,
) {
    let Some((last, rest)) = targets.split_last() else {
        return;
    };
    for target in rest {
        deliver(*target, record.clone(), queues, buckets, output);
    }
    deliver(*last, record, queues, buckets, output);
}

fn deliver(
    target: Target,
    record: Record,
    queues: &mut [Vec<Record>],
    buckets: &[BucketInfo],
    output: &mut Vec<BucketRecord>,
) {
    match target {
        Target::Stage(pos) => queues[pos].push(record),
        Target::Bucket(idx) => output.push(BucketRecord {
            bucket: buckets[idx].name.clone(),
            record,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::StageResult;
    use crate::pipeline::graph::{GraphDescription, Upstream};
    use crate::pipeline::stages::{filter_stage, flat_map_stage, map_stage, try_stage};

    fn ints(output: &ExecutionOutput, bucket: &str) -> Vec<i32> {
        output
            .bucket(bucket)
            .map(|r| *r.downcast_ref::<i32>().unwrap())
            .collect()
    }

    #[test]
    fn test_linear_graph() {
        // Input → [Double] → [Inc] → Output(out)
        let mut dag = GraphDescription::new();
        let double = dag.add_stage(map_stage("Double", |x: i32| x * 2));
        let inc = dag.add_stage(map_stage("Inc", |x: i32| x + 1));
        dag.connect(Upstream::input::<i32>(), double)
            .connect(double, inc)
            .output("out", inc);

        let mut exec = DagExecutor::new(dag.build().unwrap());
        let out = exec.process(Record::new(5)).unwrap();
        assert_eq!(ints(&out, "out"), vec![11]);

        let stats = exec.stats();
        assert_eq!(stats.counter("Double", "records_in"), 1);
        assert_eq!(stats.counter("Inc", "records_out"), 1);
    }

    #[test]
    fn test_diamond_fans_out_in_emission_order() {
        //          ┌→ [Neg] → Output(neg)
        // Input → [Dup]
        //          └→ Output(raw)
        let mut dag = GraphDescription::new();
        let dup = dag.add_stage(flat_map_stage("Dup", |x: i32| vec![x, x + 100]));
        let neg = dag.add_stage(map_stage("Neg", |x: i32| -x));
        dag.connect(Upstream::input::<i32>(), dup)
            .connect(dup, neg)
            .output("raw", dup)
            .output("neg", neg);

        let mut exec = DagExecutor::new(dag.build().unwrap());
        let out = exec.process(Record::new(1)).unwrap();

        assert_eq!(ints(&out, "raw"), vec![1, 101]);
        assert_eq!(ints(&out, "neg"), vec![-1, -101]);
        let order: Vec<&str> = out.iter().map(|r| r.bucket.as_str()).collect();
        assert_eq!(order, vec!["raw", "raw", "neg", "neg"]);
        assert_eq!(exec.stats().counter("Neg", "records_in"), 2);
    }

    #[test]
    fn test_wrong_input_type() {
        let mut dag = GraphDescription::new();
        let id = dag.add_stage(map_stage("Id", |x: i32| x));
        dag.connect(Upstream::input::<i32>(), id).output("out", id);

        let mut exec = DagExecutor::new(dag.build().unwrap());
        let err = exec.process(Record::new("nope".to_string())).unwrap_err();
        assert_eq!(err.stage, INPUT_STAGE);
        assert!(matches!(err.source, StageError::WrongInput(_)));
    }

    #[test]
    fn test_failure_is_isolated_to_one_record() {
        let mut dag = GraphDescription::new();
        let check = dag.add_stage(try_stage("Check", |x: i32| -> StageResult<Vec<i32>> {
            if x == 2 {
                Err(StageError::failed("two is not allowed"))
            } else {
                Ok(vec![x])
            }
        }));
        let even = dag.add_stage(filter_stage("Even", |x: &i32| x % 2 == 0));
        dag.connect(Upstream::input::<i32>(), check)
            .connect(check, even)
            .output("out", even);

        let mut exec = DagExecutor::new(dag.build().unwrap());
        assert!(exec.process(Record::new(1)).unwrap().is_empty());

        let err = exec.process(Record::new(2)).unwrap_err();
        assert_eq!(err.stage, "Check");
        assert_eq!(err.input_index, 1);

        let out = exec.process(Record::new(4)).unwrap();
        assert_eq!(ints(&out, "out"), vec![4]);

        let stats = exec.stats();
        assert_eq!(stats.counter("Check", "failures"), 1);
        assert_eq!(stats.counter("Even", "records_in"), 2);
        assert_eq!(stats.counter("Even", "records_dropped"), 1);

        exec.reset_stats();
        assert_eq!(exec.stats().counter("Check", "records_in"), 0);
    }

    #[test]
    fn test_bucket_types() {
        let mut dag = GraphDescription::new();
        let s = dag.add_stage(map_stage("ToString", |x: i32| x.to_string()));
        dag.connect(Upstream::input::<i32>(), s).output("text", s);

        let exec = DagExecutor::new(dag.build().unwrap());
        let types = exec.bucket_types();
        assert_eq!(types.get("text"), Some(&RecordType::of::<String>()));
        assert_eq!(exec.input_type(), RecordType::of::<i32>());
    }
}
