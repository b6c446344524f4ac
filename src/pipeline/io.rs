//! Record sources and sinks.
//!
//! - `JsonLinesSource<T>`: one JSON document per line.
//! - `JsonLinesSink<T>`: writes `<bucket>.jsonl.partial`, renamed to
//!   `<bucket>.jsonl` on close.
//! - `MemorySource` / `MemorySink<T>`: in-process, for tests and embedding.

use crate::pipeline::driver::{RecordSink, RecordSource};
use crate::pipeline::error::{DestinationWriteError, SourceReadError};
use crate::pipeline::record::{Payload, Record, RecordType, TypeMismatch};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

// ── JSON lines source ──

/// Reads one `T` per non-blank line.
///
/// A parse failure on the last non-blank line is taken to be a truncated
/// trailing record: it is logged and the stream ends there. Anywhere else
/// it is yielded as an error.
pub struct JsonLinesSource<T, R = BufReader<File>> {
    lines: Lines<R>,
    /// Next raw line, read ahead to decide whether a bad line is the last.
    peeked: Option<std::io::Result<String>>,
    line_no: u64,
    done: bool,
    _pd: PhantomData<fn() -> T>,
}

impl<T> JsonLinesSource<T, BufReader<File>>
where
    T: DeserializeOwned + Payload + Clone,
{
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path.as_ref())?;
        tracing::info!("Reading records from {:?}", path.as_ref());
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<T, R> JsonLinesSource<T, R>
where
    T: DeserializeOwned + Payload + Clone,
    R: BufRead,
{
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            peeked: None,
            line_no: 0,
            done: false,
            _pd: PhantomData,
        }
    }

    /// Next non-blank line with its one-based number.
    fn next_line(&mut self) -> Option<(u64, std::io::Result<String>)> {
        loop {
            let line = self.peeked.take().or_else(|| self.lines.next())?;
            self.line_no += 1;
            match line {
                Ok(l) if l.trim().is_empty() => continue,
                other => return Some((self.line_no, other)),
            }
        }
    }

    /// True when no non-blank line follows.
    fn at_end(&mut self) -> bool {
        loop {
            match self.lines.next() {
                None => return true,
                Some(Ok(l)) if l.trim().is_empty() => {
                    self.line_no += 1;
                }
                other => {
                    self.peeked = other;
                    return false;
                }
            }
        }
    }
}

impl<T, R> Iterator for JsonLinesSource<T, R>
where
    T: DeserializeOwned + Payload + Clone,
    R: BufRead,
{
    type Item = Result<Record, SourceReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some((position, line)) = self.next_line() else {
            self.done = true;
            return None;
        };

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                self.done = true;
                if self.at_end() {
                    tracing::warn!(
                        "Line {} is unreadable and last in the file; treating it as truncated: {}",
                        position,
                        e
                    );
                    return None;
                }
                return Some(Err(SourceReadError {
                    position,
                    message: e.to_string(),
                    at_end: false,
                }));
            }
        };

        match serde_json::from_str::<T>(&line) {
            Ok(value) => Some(Ok(Record::new(value))),
            Err(e) => {
                self.done = true;
                if self.at_end() {
                    tracing::warn!(
                        "Line {} is malformed and last in the file; treating it as truncated: {}",
                        position,
                        e
                    );
                    None
                } else {
                    Some(Err(SourceReadError {
                        position,
                        message: e.to_string(),
                        at_end: false,
                    }))
                }
            }
        }
    }
}

impl<T, R> RecordSource for JsonLinesSource<T, R>
where
    T: DeserializeOwned + Payload + Clone,
    R: BufRead,
{
    fn record_type(&self) -> RecordType {
        RecordType::of::<T>()
    }
}

// ── JSON lines sink ──

/// Writes one `T` per line to `<dir>/<bucket>.jsonl`.
pub struct JsonLinesSink<T> {
    bucket: String,
    partial_path: PathBuf,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
    _pd: PhantomData<fn(T)>,
}

impl<T> JsonLinesSink<T>
where
    T: Serialize + 'static,
{
    /// Create `<dir>/<bucket>.jsonl.partial`, truncating any leftover.
    pub fn create(dir: impl AsRef<Path>, bucket: impl Into<String>) -> Result<Self, DestinationWriteError> {
        let bucket = bucket.into();
        let final_path = dir.as_ref().join(format!("{}.jsonl", bucket));
        let partial_path = dir.as_ref().join(format!("{}.jsonl.partial", bucket));
        let file = File::create(&partial_path).map_err(|source| DestinationWriteError::Io {
            bucket: bucket.clone(),
            source,
        })?;
        tracing::debug!("Opened {:?} for bucket '{}'", partial_path, bucket);
        Ok(Self {
            bucket,
            partial_path,
            final_path,
            writer: Some(BufWriter::new(file)),
            written: 0,
            _pd: PhantomData,
        })
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

fn io_error(bucket: &str, source: std::io::Error) -> DestinationWriteError {
    DestinationWriteError::Io {
        bucket: bucket.to_string(),
        source,
    }
}

impl<T> RecordSink for JsonLinesSink<T>
where
    T: Serialize + Payload + Clone,
{
    fn record_type(&self) -> RecordType {
        RecordType::of::<T>()
    }

    fn append(&mut self, record: Record) -> Result<(), DestinationWriteError> {
        let value = record
            .downcast_ref::<T>()
            .ok_or_else(|| DestinationWriteError::WrongRecordType {
                bucket: self.bucket.clone(),
                mismatch: TypeMismatch {
                    expected: RecordType::of::<T>(),
                    found: record.record_type(),
                },
            })?;
        let line = serde_json::to_string(value).map_err(|e| DestinationWriteError::Serialization {
            bucket: self.bucket.clone(),
            message: e.to_string(),
        })?;
        let Some(writer) = self.writer.as_mut() else {
            return Err(io_error(&self.bucket, std::io::Error::other("sink already closed")));
        };
        writeln!(writer, "{}", line).map_err(|e| io_error(&self.bucket, e))?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DestinationWriteError> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush().map_err(|e| io_error(&self.bucket, e)),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), DestinationWriteError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.flush().map_err(|e| io_error(&self.bucket, e))?;
        drop(writer);
        std::fs::rename(&self.partial_path, &self.final_path)
            .map_err(|e| io_error(&self.bucket, e))?;
        tracing::info!("Wrote {} records to {:?}", self.written, self.final_path);
        Ok(())
    }

    fn abandon(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::warn!("Flush failed while abandoning '{}': {}", self.bucket, e);
            }
            tracing::warn!(
                "Left {} incomplete records in {:?}",
                self.written,
                self.partial_path
            );
        }
    }
}

// ── In-memory source ──

/// Yields pre-built records.
pub struct MemorySource {
    record_type: RecordType,
    items: VecDeque<Result<Record, SourceReadError>>,
}

impl MemorySource {
    pub fn new<T>(values: impl IntoIterator<Item = T>) -> Self
    where
        T: Payload + Clone,
    {
        Self {
            record_type: RecordType::of::<T>(),
            items: values.into_iter().map(|v| Ok(Record::new(v))).collect(),
        }
    }

    /// Source with explicit items, including read errors.
    pub fn from_results(
        record_type: RecordType,
        items: impl IntoIterator<Item = Result<Record, SourceReadError>>,
    ) -> Self {
        Self {
            record_type,
            items: items.into_iter().collect(),
        }
    }
}

impl Iterator for MemorySource {
    type Item = Result<Record, SourceReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.pop_front()
    }
}

impl RecordSource for MemorySource {
    fn record_type(&self) -> RecordType {
        self.record_type
    }
}

// ── In-memory sink ──

#[derive(Debug)]
struct MemoryState<T> {
    records: Arc<Mutex<Vec<T>>>,
    closed: bool,
    abandoned: bool,
}

/// Collects records into a shared `Vec`. Clones share the same storage.
#[derive(Debug)]
pub struct MemorySink<T> {
    state: Arc<Mutex<MemoryState<T>>>,
}

impl<T> Clone for MemorySink<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for MemorySink<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                records: Arc::new(Mutex::new(Vec::new())),
                closed: false,
                abandoned: false,
            })),
        }
    }
}

fn lock<V>(m: &Mutex<V>) -> MutexGuard<'_, V> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> MemorySink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the collected records.
    pub fn records(&self) -> Arc<Mutex<Vec<T>>> {
        Arc::clone(&lock(&self.state).records)
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn is_abandoned(&self) -> bool {
        lock(&self.state).abandoned
    }
}

impl<T> MemorySink<T>
where
    T: Clone,
{
    /// Copy of everything collected so far.
    pub fn snapshot(&self) -> Vec<T> {
        let records = self.records();
        let guard = lock(&records);
        guard.clone()
    }
}

impl<T> RecordSink for MemorySink<T>
where
    T: Payload + Clone,
{
    fn record_type(&self) -> RecordType {
        RecordType::of::<T>()
    }

    fn append(&mut self, record: Record) -> Result<(), DestinationWriteError> {
        let value = record
            .downcast::<T>()
            .map_err(|mismatch| DestinationWriteError::WrongRecordType {
                bucket: "memory".to_string(),
                mismatch,
            })?;
        let records = self.records();
        lock(&records).push(value);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DestinationWriteError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DestinationWriteError> {
        lock(&self.state).closed = true;
        Ok(())
    }

    fn abandon(&mut self) {
        lock(&self.state).abandoned = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(text: &str) -> Vec<Result<Record, SourceReadError>> {
        JsonLinesSource::<i32, _>::from_reader(Cursor::new(text.to_string())).collect()
    }

    #[test]
    fn test_source_reads_lines() {
        let items = read_all("1\n2\n\n3\n");
        let values: Vec<i32> = items
            .into_iter()
            .map(|r| r.unwrap().downcast::<i32>().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_source_truncated_last_line_ends_stream() {
        let items = read_all("1\n2\n{\"trunc\n\n");
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_source_bad_middle_line_is_error() {
        let items = read_all("1\noops\n3\n");
        assert_eq!(items.len(), 2);
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.position, 2);
        assert!(!err.at_end);
    }

    #[test]
    fn test_source_cut_inside_utf8_char_ends_stream() {
        let bytes: &[u8] = b"1\n2\n\"ab\xc3";
        let items: Vec<_> = JsonLinesSource::<i32, _>::from_reader(Cursor::new(bytes)).collect();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_source_invalid_utf8_in_middle_is_error() {
        let bytes: &[u8] = b"1\n\"a\xc3\"\n3\n";
        let items: Vec<_> = JsonLinesSource::<i32, _>::from_reader(Cursor::new(bytes)).collect();
        assert_eq!(items.len(), 2);
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.position, 2);
        assert!(!err.at_end);
    }

    #[test]
    fn test_memory_sink_rejects_wrong_type() {
        let mut sink = MemorySink::<i32>::new();
        assert!(sink.append(Record::new(1)).is_ok());
        let err = sink.append(Record::new("x".to_string())).unwrap_err();
        assert!(matches!(err, DestinationWriteError::WrongRecordType { .. }));
        assert_eq!(sink.snapshot(), vec![1]);
    }

    #[test]
    fn test_jsonl_sink_commit_and_abandon() {
        let dir = tempfile::tempdir().unwrap();

        let mut ok = JsonLinesSink::<i32>::create(dir.path(), "ok").unwrap();
        ok.append(Record::new(7)).unwrap();
        ok.close().unwrap();
        assert!(!ok.partial_path().exists());
        assert_eq!(std::fs::read_to_string(ok.final_path()).unwrap(), "7\n");

        let mut bad = JsonLinesSink::<i32>::create(dir.path(), "bad").unwrap();
        bad.append(Record::new(8)).unwrap();
        bad.abandon();
        assert!(bad.partial_path().exists());
        assert!(!bad.final_path().exists());
    }
}
