//! The drums dataset graph end to end.

mod common;

use common::builders::DrumSequenceBuilder;
use drumdag::config::DatasetConfig;
use drumdag::music::{
    build_drums_executor, Note, NoteSequence, SequenceExample, EVAL_BUCKET, TRAINING_BUCKET,
};
use drumdag::pipeline::{
    BucketSinks, DriverOptions, JsonLinesSink, JsonLinesSource, MemorySink, MemorySource,
    RunSummary, SerialDriver,
};

fn run_memory(
    config: &DatasetConfig,
    sequences: Vec<NoteSequence>,
) -> (RunSummary, Vec<SequenceExample>, Vec<SequenceExample>) {
    let train = MemorySink::<SequenceExample>::new();
    let eval = MemorySink::<SequenceExample>::new();
    let mut driver = SerialDriver::new(
        build_drums_executor(config).unwrap(),
        DriverOptions::default(),
    );
    let summary = driver
        .run(
            MemorySource::new(sequences),
            BucketSinks::new()
                .with(TRAINING_BUCKET, train.clone())
                .with(EVAL_BUCKET, eval.clone()),
        )
        .unwrap();
    (summary, train.snapshot(), eval.snapshot())
}

fn training_only() -> DatasetConfig {
    DatasetConfig {
        eval_ratio: 0.0,
        ..DatasetConfig::default()
    }
}

#[test]
fn test_discards_and_keeps() {
    let sequences = vec![
        DrumSequenceBuilder::new("good-1").kicks(0, 8).build(),
        DrumSequenceBuilder::new("tempo-change")
            .kicks(0, 8)
            .tempo_change(90.0)
            .build(),
        DrumSequenceBuilder::new("too-short").kicks(0, 2).build(),
        DrumSequenceBuilder::new("good-2").kicks(0, 8).build(),
    ];

    let (summary, train, eval) = run_memory(&training_only(), sequences);

    assert_eq!(summary.records_read, 4);
    assert_eq!(summary.records_skipped, 0);
    assert_eq!(train.len(), 2);
    assert!(eval.is_empty());

    // 8 bars of 16 steps, shifted by one
    assert!(train.iter().all(|ex| ex.len() == 127));
    assert_eq!(train[0].labels[3], 1);

    let stats = &summary.stats;
    assert_eq!(
        stats.counter("Quantizer", "sequences_discarded_because_multiple_tempos"),
        1
    );
    assert_eq!(
        stats.counter("DrumsExtractorTrain", "drum_tracks_discarded_too_short"),
        1
    );
    assert_eq!(stats.counter("DrumsExtractorEval", "records_in"), 0);
    let lengths = stats
        .get("DrumsExtractorTrain", "drum_track_lengths_in_bars")
        .and_then(|s| s.as_histogram())
        .expect("length histogram");
    assert_eq!(lengths.total(), 2);
}

#[test]
fn test_out_of_range_note_time_skips_only_that_record() {
    let mut far = NoteSequence::new("far-future").with_tempo(120.0);
    far.push_note(Note::drum(36, 1e300, 1e300));
    let sequences = vec![
        far,
        DrumSequenceBuilder::new("good").kicks(0, 8).build(),
    ];

    let (summary, train, _) = run_memory(&training_only(), sequences);

    assert_eq!(summary.records_read, 2);
    assert_eq!(summary.records_skipped, 1);
    assert_eq!(summary.stats.counter("Quantizer", "failures"), 1);
    assert_eq!(train.len(), 1);
}

#[test]
fn test_long_tracks_are_truncated() {
    let sequences = vec![DrumSequenceBuilder::new("long").kicks(0, 40).build()];

    let (summary, train, _) = run_memory(&training_only(), sequences);

    assert_eq!(train.len(), 1);
    assert_eq!(train[0].len(), 511);
    assert_eq!(
        summary
            .stats
            .counter("DrumsExtractorTrain", "drum_tracks_truncated_too_long"),
        1
    );
}

#[test]
fn test_silence_splits_tracks() {
    // Two 8-bar phrases separated by 4 silent bars
    let sequences = vec![DrumSequenceBuilder::new("two-phrases")
        .kicks(0, 8)
        .kicks(12, 8)
        .build()];

    let (_, train, _) = run_memory(&training_only(), sequences);
    assert_eq!(train.len(), 2);
}

#[test]
fn test_partition_is_reproducible() {
    let sequences: Vec<NoteSequence> = (0..30)
        .map(|i| {
            DrumSequenceBuilder::new(&format!("seq-{}", i))
                .kicks(0, 8)
                .hit(i % 16, 42)
                .build()
        })
        .collect();
    let config = DatasetConfig {
        eval_ratio: 0.5,
        seed: 1234,
        ..DatasetConfig::default()
    };

    let (first, train_a, eval_a) = run_memory(&config, sequences.clone());
    let (second, train_b, eval_b) = run_memory(&config, sequences);

    assert_eq!(train_a, train_b);
    assert_eq!(eval_a, eval_b);
    assert_eq!(first.bucket_counts, second.bucket_counts);
    assert_eq!(train_a.len() + eval_a.len(), 30);
}

#[test]
fn test_jsonl_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("notes.jsonl");
    let lines: Vec<String> = (0..5)
        .map(|i| {
            let seq = DrumSequenceBuilder::new(&format!("seq-{}", i))
                .kicks(0, 8)
                .build();
            serde_json::to_string(&seq).unwrap()
        })
        .collect();
    std::fs::write(&input, lines.join("\n")).unwrap();

    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    let sinks = BucketSinks::new()
        .with(
            TRAINING_BUCKET,
            JsonLinesSink::<SequenceExample>::create(&out, TRAINING_BUCKET).unwrap(),
        )
        .with(
            EVAL_BUCKET,
            JsonLinesSink::<SequenceExample>::create(&out, EVAL_BUCKET).unwrap(),
        );

    let config = DatasetConfig {
        eval_ratio: 0.4,
        seed: 7,
        ..DatasetConfig::default()
    };
    let summary = SerialDriver::new(
        build_drums_executor(&config).unwrap(),
        DriverOptions::default(),
    )
    .run(
        JsonLinesSource::<NoteSequence>::open(&input).unwrap(),
        sinks,
    )
    .unwrap();

    assert_eq!(summary.records_read, 5);
    for bucket in [TRAINING_BUCKET, EVAL_BUCKET] {
        let content = std::fs::read_to_string(out.join(format!("{}.jsonl", bucket))).unwrap();
        let examples: Vec<SequenceExample> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(examples.len() as u64, summary.bucket_count(bucket));
    }
    assert_eq!(
        summary.bucket_count(TRAINING_BUCKET) + summary.bucket_count(EVAL_BUCKET),
        5
    );
}
