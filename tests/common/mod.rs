//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use drumdag::pipeline::{
    map_stage, try_stage, CompiledGraph, DagExecutor, FnStage, GraphCompiler, GraphDescription,
    PortName, Routed, Router, RouterStage, StageError, StageResult, TransformStage, Upstream,
};

/// Routes even values to port "A" and odd values to port "B".
pub struct EvenOdd {
    ports: Vec<PortName>,
}

impl EvenOdd {
    pub fn stage() -> RouterStage<EvenOdd> {
        RouterStage::new(EvenOdd {
            ports: vec!["A".to_string(), "B".to_string()],
        })
    }
}

impl Router for EvenOdd {
    type Input = i32;
    type Output = i32;

    fn name(&self) -> &str {
        "EvenOdd"
    }

    fn ports(&self) -> &[PortName] {
        &self.ports
    }

    fn route(&mut self, input: i32) -> StageResult<Vec<Routed<i32>>> {
        let port = if input % 2 == 0 { "A" } else { "B" };
        Ok(vec![Routed::new(port, input)])
    }
}

/// Input -> EvenOdd -> {A, B}
pub fn even_odd_graph() -> GraphDescription {
    let mut dag = GraphDescription::new();
    let split = dag.add_stage(EvenOdd::stage());
    dag.connect(Upstream::input::<i32>(), split);
    dag.output("A", split.port("A"));
    dag.output("B", split.port("B"));
    dag
}

/// Input -> Double -> Output("doubled")
pub fn doubling_graph() -> GraphDescription {
    let mut dag = GraphDescription::new();
    let double = dag.add_stage(double_stage("Double"));
    dag.connect(Upstream::input::<i32>(), double);
    dag.output("doubled", double);
    dag
}

pub fn double_stage(name: &str) -> TransformStage<FnStage<i32, i32>> {
    map_stage(name, |x: i32| x * 2)
}

/// Fails on the given value, passes everything else through.
pub fn failing_on(name: &str, bad: i32) -> TransformStage<FnStage<i32, i32>> {
    try_stage(name, move |x: i32| {
        if x == bad {
            Err(StageError::failed(format!("refusing {}", x)))
        } else {
            Ok(vec![x])
        }
    })
}

pub fn compile(dag: GraphDescription) -> CompiledGraph {
    GraphCompiler::compile(dag).expect("graph should compile")
}

pub fn executor(dag: GraphDescription) -> DagExecutor {
    DagExecutor::new(compile(dag))
}
