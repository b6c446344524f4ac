//! The drums training-set graph.
//!
//! ```text
//! Input(NoteSequence) ─► Quantizer ─► TrainEvalPartition ─┬─ training_drum_tracks ─► DrumsExtractorTrain ─► EncoderPipelineTrain ─► Output(training_drum_tracks)
//!                                                         └─ eval_drum_tracks ─────► DrumsExtractorEval ──► EncoderPipelineEval ──► Output(eval_drum_tracks)
//! ```

use crate::config::DatasetConfig;
use crate::error::Result;
use crate::music::sequence::{NoteSequence, QuantizedSequence};
use crate::music::stages::{DrumsEncoder, DrumsExtractor, Quantizer, RandomPartition};
use crate::pipeline::compiler::GraphCompiler;
use crate::pipeline::executor::DagExecutor;
use crate::pipeline::graph::{GraphDescription, Upstream};
use crate::pipeline::stage::{RouterStage, TransformStage};

pub const TRAINING_BUCKET: &str = "training_drum_tracks";
pub const EVAL_BUCKET: &str = "eval_drum_tracks";

/// Describe the drums dataset graph for `config`.
pub fn build_drums_graph(config: &DatasetConfig) -> Result<GraphDescription> {
    config.validate()?;

    let mut dag = GraphDescription::new();

    let quantizer = dag.add_stage(TransformStage::new(Quantizer::new(
        config.steps_per_quarter,
    )));
    let partition = dag.add_stage(RouterStage::new(
        RandomPartition::<QuantizedSequence>::new(
            [EVAL_BUCKET, TRAINING_BUCKET],
            &[config.eval_ratio],
            config.seed,
        )?
        .with_name("TrainEvalPartition"),
    ));

    dag.connect(Upstream::input::<NoteSequence>(), quantizer);
    dag.connect(quantizer, partition);

    for (bucket, suffix) in [(TRAINING_BUCKET, "Train"), (EVAL_BUCKET, "Eval")] {
        let extractor = dag.add_stage(TransformStage::new(DrumsExtractor::new(
            format!("DrumsExtractor{}", suffix),
            config.extractor.min_bars,
            config.extractor.max_steps,
            config.extractor.gap_bars,
        )));
        let encoder = dag.add_stage(TransformStage::new(DrumsEncoder::new(format!(
            "EncoderPipeline{}",
            suffix
        ))));
        dag.connect(partition.port(bucket), extractor);
        dag.connect(extractor, encoder);
        dag.output(bucket, encoder);
    }

    Ok(dag)
}

/// Describe, compile, and wrap the drums graph in an executor.
pub fn build_drums_executor(config: &DatasetConfig) -> Result<DagExecutor> {
    let graph = GraphCompiler::compile(build_drums_graph(config)?)?;
    Ok(DagExecutor::new(graph))
}
