//! Serial driver: feeds a record source through a `DagExecutor` and writes
//! every bucket to its sink.
//!
//! ```text
//! RecordSource ──► DagExecutor::process ──► BucketSinks["train"] ──► .jsonl
//!                                      └──► BucketSinks["eval"]  ──► .jsonl
//! ```
//!
//! Records are processed one at a time, in source order. Sinks are flushed
//! every `flush_every` records and closed once the source is exhausted. If
//! anything on the I/O side fails, every sink is abandoned instead so that
//! partial output stays recognisable as incomplete.

use crate::pipeline::error::{DestinationWriteError, DriverError, SourceReadError};
use crate::pipeline::executor::DagExecutor;
use crate::pipeline::record::{Record, RecordType};
use crate::pipeline::stats::StatsAggregator;
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ordered stream of input records.
pub trait RecordSource: Iterator<Item = Result<Record, SourceReadError>> {
    /// Type of every record this source yields.
    fn record_type(&self) -> RecordType;
}

/// Destination for one Output bucket.
pub trait RecordSink {
    /// Type of record this sink accepts.
    fn record_type(&self) -> RecordType;

    fn append(&mut self, record: Record) -> Result<(), DestinationWriteError>;

    fn flush(&mut self) -> Result<(), DestinationWriteError>;

    /// Flush and commit. The sink is unusable afterwards.
    fn close(&mut self) -> Result<(), DestinationWriteError>;

    /// Give up without committing. Whatever was written stays marked as
    /// incomplete.
    fn abandon(&mut self);
}

/// Sinks keyed by bucket name.
#[derive(Default)]
pub struct BucketSinks {
    sinks: BTreeMap<String, Box<dyn RecordSink>>,
}

impl BucketSinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bucket: impl Into<String>, sink: impl RecordSink + 'static) -> &mut Self {
        self.sinks.insert(bucket.into(), Box::new(sink));
        self
    }

    pub fn with(mut self, bucket: impl Into<String>, sink: impl RecordSink + 'static) -> Self {
        self.insert(bucket, sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn buckets(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }

    fn flush_all(&mut self) -> Result<(), DestinationWriteError> {
        for sink in self.sinks.values_mut() {
            sink.flush()?;
        }
        Ok(())
    }

    fn close_all(&mut self) -> Result<(), DestinationWriteError> {
        let mut result = Ok(());
        for (bucket, sink) in self.sinks.iter_mut() {
            if result.is_err() {
                sink.abandon();
                continue;
            }
            if let Err(e) = sink.close() {
                tracing::error!("Failed to close sink for bucket '{}': {}", bucket, e);
                result = Err(e);
            }
        }
        result
    }

    fn abandon_all(&mut self) {
        for (bucket, sink) in self.sinks.iter_mut() {
            tracing::warn!("Abandoning output for bucket '{}'", bucket);
            sink.abandon();
        }
    }
}

/// What to do when a stage fails on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log, count, and continue with the next record.
    #[default]
    Skip,
    /// End the run with the stage error.
    Abort,
}

/// Progress notifications, sent when a channel is configured.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    Started,
    Progress {
        records_read: u64,
        records_processed: u64,
        records_skipped: u64,
    },
    RecordSkipped {
        input_index: u64,
        stage: String,
        message: String,
    },
    Finished {
        cancelled: bool,
    },
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Flush all sinks after this many records. 0 disables periodic flushes.
    pub flush_every: u64,
    pub failure_policy: FailurePolicy,
    /// Cleared by another thread to stop the run between records.
    pub running: Arc<AtomicBool>,
    pub events: Option<Sender<DriverEvent>>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            flush_every: 1000,
            failure_policy: FailurePolicy::Skip,
            running: Arc::new(AtomicBool::new(true)),
            events: None,
        }
    }
}

/// Manifest of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records_read: u64,
    pub records_processed: u64,
    pub records_skipped: u64,
    pub bucket_counts: BTreeMap<String, u64>,
    pub stats: StatsAggregator,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Number of records written to `bucket`.
    pub fn bucket_count(&self, bucket: &str) -> u64 {
        self.bucket_counts.get(bucket).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct Counters {
    read: u64,
    processed: u64,
    skipped: u64,
    buckets: BTreeMap<String, u64>,
    cancelled: bool,
}

/// Single-threaded driver over one executor.
pub struct SerialDriver {
    executor: DagExecutor,
    options: DriverOptions,
}

impl SerialDriver {
    pub fn new(executor: DagExecutor, options: DriverOptions) -> Self {
        Self { executor, options }
    }

    pub fn executor(&self) -> &DagExecutor {
        &self.executor
    }

    pub fn into_executor(self) -> DagExecutor {
        self.executor
    }

    /// A handle that stops the run when set to `false`.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.options.running)
    }

    /// Drain `source` through the graph into `sinks`.
    pub fn run<S: RecordSource>(
        &mut self,
        source: S,
        mut sinks: BucketSinks,
    ) -> Result<RunSummary, DriverError> {
        let started_at = Utc::now();

        if let Err(e) = self.check_wiring(&source, &sinks) {
            sinks.abandon_all();
            return Err(e);
        }

        tracing::info!(
            "Starting run: {} input, {} buckets",
            self.executor.input_type(),
            sinks.len()
        );
        self.emit(DriverEvent::Started);

        let mut counters = Counters::default();
        if let Err(e) = self.pump(source, &mut sinks, &mut counters) {
            tracing::error!("Run failed after {} records: {}", counters.read, e);
            sinks.abandon_all();
            return Err(e);
        }
        sinks.close_all()?;

        let stats = self.executor.stats();
        tracing::info!(
            "Run finished: {} read, {} processed, {} skipped{}",
            counters.read,
            counters.processed,
            counters.skipped,
            if counters.cancelled { " (cancelled)" } else { "" }
        );
        tracing::info!("\n{}", stats);
        self.emit(DriverEvent::Finished {
            cancelled: counters.cancelled,
        });

        Ok(RunSummary {
            started_at,
            finished_at: Utc::now(),
            records_read: counters.read,
            records_processed: counters.processed,
            records_skipped: counters.skipped,
            bucket_counts: counters.buckets,
            stats,
            cancelled: counters.cancelled,
        })
    }

    /// Source and sink types must match the graph before anything is read.
    fn check_wiring<S: RecordSource>(&self, source: &S, sinks: &BucketSinks) -> Result<(), DriverError> {
        if source.record_type() != self.executor.input_type() {
            return Err(DriverError::SourceType {
                yields: source.record_type(),
                expects: self.executor.input_type(),
            });
        }

        let buckets = self.executor.bucket_types();
        for (bucket, holds) in &buckets {
            let sink = sinks
                .sinks
                .get(bucket)
                .ok_or_else(|| DriverError::MissingDestination(bucket.clone()))?;
            if sink.record_type() != *holds {
                return Err(DriverError::DestinationType {
                    bucket: bucket.clone(),
                    accepts: sink.record_type(),
                    holds: *holds,
                });
            }
        }
        if let Some(extra) = sinks.buckets().find(|b| !buckets.contains_key(*b)) {
            return Err(DriverError::UnknownBucket(extra.to_string()));
        }
        Ok(())
    }

    fn pump<S: RecordSource>(
        &mut self,
        mut source: S,
        sinks: &mut BucketSinks,
        counters: &mut Counters,
    ) -> Result<(), DriverError> {
        loop {
            // Checked before pulling the next record
            if !self.options.running.load(Ordering::SeqCst) {
                tracing::info!("Run cancelled after {} records", counters.read);
                counters.cancelled = true;
                break;
            }
            let Some(item) = source.next() else {
                break;
            };

            let record = match item {
                Ok(record) => record,
                Err(e) if e.at_end => {
                    tracing::warn!("Ignoring truncated trailing record: {}", e);
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            counters.read += 1;

            match self.executor.process(record) {
                Ok(output) => {
                    counters.processed += 1;
                    for out in output {
                        let sink = sinks
                            .sinks
                            .get_mut(&out.bucket)
                            .ok_or_else(|| DriverError::MissingDestination(out.bucket.clone()))?;
                        sink.append(out.record)?;
                        *counters.buckets.entry(out.bucket).or_insert(0) += 1;
                    }
                }
                Err(e) => match self.options.failure_policy {
                    FailurePolicy::Skip => {
                        tracing::warn!("Skipping record: {}", e);
                        counters.skipped += 1;
                        self.emit(DriverEvent::RecordSkipped {
                            input_index: e.input_index,
                            stage: e.stage.clone(),
                            message: e.source.to_string(),
                        });
                    }
                    FailurePolicy::Abort => return Err(e.into()),
                },
            }

            if self.options.flush_every > 0 && counters.read % self.options.flush_every == 0 {
                sinks.flush_all()?;
                tracing::debug!("Flushed sinks after {} records", counters.read);
                self.emit(DriverEvent::Progress {
                    records_read: counters.read,
                    records_processed: counters.processed,
                    records_skipped: counters.skipped,
                });
            }
        }

        for bucket in self.executor.bucket_types().into_keys() {
            counters.buckets.entry(bucket).or_insert(0);
        }
        Ok(())
    }

    fn emit(&self, event: DriverEvent) {
        if let Some(tx) = &self.options.events {
            if tx.send(event).is_err() {
                tracing::debug!("Driver event receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::StageError;
    use crate::pipeline::graph::{GraphDescription, Upstream};
    use crate::pipeline::io::{MemorySink, MemorySource};
    use crate::pipeline::stages::{map_stage, try_stage};
    use std::sync::atomic::AtomicU64;

    fn doubling_executor() -> DagExecutor {
        let mut dag = GraphDescription::new();
        let double = dag.add_stage(try_stage("Double", |x: i32| {
            if x < 0 {
                Err(StageError::failed("negative"))
            } else {
                Ok(vec![x * 2])
            }
        }));
        dag.connect(Upstream::input::<i32>(), double)
            .output("doubled", double);
        DagExecutor::new(dag.build().unwrap())
    }

    #[test]
    fn test_run_skips_failures() {
        let sink = MemorySink::<i32>::new();
        let records = sink.records();
        let mut driver = SerialDriver::new(doubling_executor(), DriverOptions::default());

        let summary = driver
            .run(
                MemorySource::new(vec![1, -1, 3]),
                BucketSinks::new().with("doubled", sink.clone()),
            )
            .unwrap();

        assert_eq!(summary.records_read, 3);
        assert_eq!(summary.records_processed, 2);
        assert_eq!(summary.records_skipped, 1);
        assert_eq!(summary.bucket_count("doubled"), 2);
        assert_eq!(*records.lock().unwrap(), vec![2, 6]);
        assert!(sink.is_closed());
    }

    #[test]
    fn test_run_abort_abandons_sinks() {
        let sink = MemorySink::<i32>::new();
        let options = DriverOptions {
            failure_policy: FailurePolicy::Abort,
            ..DriverOptions::default()
        };
        let mut driver = SerialDriver::new(doubling_executor(), options);

        let err = driver
            .run(
                MemorySource::new(vec![1, -1, 3]),
                BucketSinks::new().with("doubled", sink.clone()),
            )
            .unwrap_err();

        assert!(matches!(err, DriverError::Stage(_)));
        assert!(sink.is_abandoned());
        assert!(!sink.is_closed());
    }

    #[test]
    fn test_missing_destination() {
        let mut driver = SerialDriver::new(doubling_executor(), DriverOptions::default());
        let err = driver
            .run(MemorySource::new(vec![1]), BucketSinks::new())
            .unwrap_err();
        assert!(matches!(err, DriverError::MissingDestination(b) if b == "doubled"));
    }

    #[test]
    fn test_destination_type_checked_before_reading() {
        let mut driver = SerialDriver::new(doubling_executor(), DriverOptions::default());
        let err = driver
            .run(
                MemorySource::new(vec![1]),
                BucketSinks::new().with("doubled", MemorySink::<String>::new()),
            )
            .unwrap_err();
        assert!(matches!(err, DriverError::DestinationType { .. }));
    }

    #[test]
    fn test_source_type_checked() {
        let mut driver = SerialDriver::new(doubling_executor(), DriverOptions::default());
        let err = driver
            .run(
                MemorySource::new(vec!["x".to_string()]),
                BucketSinks::new().with("doubled", MemorySink::<i32>::new()),
            )
            .unwrap_err();
        assert!(matches!(err, DriverError::SourceType { .. }));
    }

    #[test]
    fn test_cancelled_before_first_record() {
        let options = DriverOptions::default();
        options.running.store(false, Ordering::SeqCst);
        let mut driver = SerialDriver::new(doubling_executor(), options);

        let summary = driver
            .run(
                MemorySource::new(vec![1, 2]),
                BucketSinks::new().with("doubled", MemorySink::<i32>::new()),
            )
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.records_read, 0);
        assert_eq!(summary.bucket_count("doubled"), 0);
    }

    fn read_error(position: u64, at_end: bool) -> Result<Record, SourceReadError> {
        Err(SourceReadError {
            position,
            message: "bad record".to_string(),
            at_end,
        })
    }

    #[test]
    fn test_trailing_read_error_ends_stream() {
        let sink = MemorySink::<i32>::new();
        let source = MemorySource::from_results(
            RecordType::of::<i32>(),
            vec![Ok(Record::new(1)), Ok(Record::new(2)), read_error(3, true)],
        );
        let mut driver = SerialDriver::new(doubling_executor(), DriverOptions::default());

        let summary = driver
            .run(source, BucketSinks::new().with("doubled", sink.clone()))
            .unwrap();

        assert_eq!(summary.records_read, 2);
        assert_eq!(sink.snapshot(), vec![2, 4]);
        assert!(sink.is_closed());
    }

    #[test]
    fn test_read_error_mid_stream_aborts() {
        let sink = MemorySink::<i32>::new();
        let source = MemorySource::from_results(
            RecordType::of::<i32>(),
            vec![Ok(Record::new(1)), read_error(2, false), Ok(Record::new(3))],
        );
        let mut driver = SerialDriver::new(doubling_executor(), DriverOptions::default());

        let err = driver
            .run(source, BucketSinks::new().with("doubled", sink.clone()))
            .unwrap_err();

        assert!(matches!(err, DriverError::Source(e) if e.position == 2));
        assert!(sink.is_abandoned());
        assert!(!sink.is_closed());
    }

    /// Counts how many records were pulled from the inner source.
    struct CountingSource {
        inner: MemorySource,
        pulled: Arc<AtomicU64>,
    }

    impl Iterator for CountingSource {
        type Item = Result<Record, SourceReadError>;

        fn next(&mut self) -> Option<Self::Item> {
            let item = self.inner.next();
            if item.is_some() {
                self.pulled.fetch_add(1, Ordering::SeqCst);
            }
            item
        }
    }

    impl RecordSource for CountingSource {
        fn record_type(&self) -> RecordType {
            self.inner.record_type()
        }
    }

    #[test]
    fn test_cancelled_mid_run() {
        let options = DriverOptions::default();
        let running = Arc::clone(&options.running);

        let mut dag = GraphDescription::new();
        let stopper = dag.add_stage(map_stage("StopAfterTwo", move |x: i32| {
            if x == 2 {
                running.store(false, Ordering::SeqCst);
            }
            x
        }));
        dag.connect(Upstream::input::<i32>(), stopper).output("out", stopper);

        let sink = MemorySink::<i32>::new();
        let pulled = Arc::new(AtomicU64::new(0));
        let source = CountingSource {
            inner: MemorySource::new(vec![1, 2, 3, 4]),
            pulled: Arc::clone(&pulled),
        };
        let mut driver = SerialDriver::new(DagExecutor::new(dag.build().unwrap()), options);

        let summary = driver
            .run(source, BucketSinks::new().with("out", sink.clone()))
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.records_read, 2);
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
        assert_eq!(sink.snapshot(), vec![1, 2]);
        assert!(sink.is_closed());
    }

    #[test]
    fn test_progress_events() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let options = DriverOptions {
            flush_every: 2,
            events: Some(tx),
            ..DriverOptions::default()
        };
        let mut dag = GraphDescription::new();
        let id = dag.add_stage(map_stage("Id", |x: i32| x));
        dag.connect(Upstream::input::<i32>(), id).output("out", id);
        let mut driver = SerialDriver::new(DagExecutor::new(dag.build().unwrap()), options);

        driver
            .run(
                MemorySource::new(vec![1, 2, 3, 4]),
                BucketSinks::new().with("out", MemorySink::<i32>::new()),
            )
            .unwrap();

        let events: Vec<DriverEvent> = rx.try_iter().collect();
        assert_eq!(events.first(), Some(&DriverEvent::Started));
        assert_eq!(
            events.last(),
            Some(&DriverEvent::Finished { cancelled: false })
        );
        let progress = events
            .iter()
            .filter(|e| matches!(e, DriverEvent::Progress { .. }))
            .count();
        assert_eq!(progress, 2);
    }
}
