//! Per-stage statistics and their run-wide aggregation.
//!
//! Stages report `StageStats`; the executor folds them, together with its own
//! per-stage metrics, into a `StatsAggregator` keyed by
//! `(stage_name, metric_name)`. Keys use the stage *instance* name, so two
//! copies of the same stage kind never collide.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statistic {
    Counter(u64),
    Histogram(Histogram),
}

impl Statistic {
    pub fn as_counter(&self) -> Option<u64> {
        match self {
            Statistic::Counter(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&Histogram> {
        match self {
            Statistic::Histogram(h) => Some(h),
            _ => None,
        }
    }

    /// Merge `other` into `self`. Mismatched kinds keep `self` unchanged
    /// and return `false`.
    pub fn merge(&mut self, other: &Statistic) -> bool {
        match (self, other) {
            (Statistic::Counter(a), Statistic::Counter(b)) => {
                *a += *b;
                true
            }
            (Statistic::Histogram(a), Statistic::Histogram(b)) => a.merge(b),
            _ => false,
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::Counter(v) => write!(f, "{}", v),
            Statistic::Histogram(h) => write!(f, "{}", h),
        }
    }
}

/// Histogram over fixed bucket lower bounds.
///
/// A value lands in the bucket with the largest lower bound `<=` value;
/// values below the first bound land in the first bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    bounds: Vec<f64>,
    counts: Vec<u64>,
}

impl Histogram {
    /// `bounds` are sorted and deduplicated.
    pub fn new(bounds: impl IntoIterator<Item = f64>) -> Self {
        let mut bounds: Vec<f64> = bounds.into_iter().filter(|b| b.is_finite()).collect();
        bounds.sort_by(|a, b| a.total_cmp(b));
        bounds.dedup();
        if bounds.is_empty() {
            bounds.push(0.0);
        }
        let counts = vec![0; bounds.len()];
        Self { bounds, counts }
    }

    pub fn record(&mut self, value: f64) {
        let idx = match self.bounds.iter().rposition(|&b| b <= value) {
            Some(i) => i,
            None => 0,
        };
        self.counts[idx] += 1;
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Bucket-wise sum. Histograms with different bounds are not merged.
    pub fn merge(&mut self, other: &Histogram) -> bool {
        if self.bounds != other.bounds {
            return false;
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += *b;
        }
        true
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .bounds
            .iter()
            .zip(&self.counts)
            .filter(|(_, &c)| c > 0)
            .map(|(b, c)| format!("[{}]={}", b, c))
            .collect();
        write!(f, "total={} {}", self.total(), parts.join(" "))
    }
}

/// Named metrics reported by one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageStats {
    metrics: BTreeMap<String, Statistic>,
}

impl StageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, name: &str, by: u64) {
        match self.metrics.get_mut(name) {
            Some(Statistic::Counter(v)) => *v += by,
            Some(_) => {
                tracing::warn!("Metric '{}' is not a counter; increment ignored", name);
            }
            None => {
                self.metrics.insert(name.to_string(), Statistic::Counter(by));
            }
        }
    }

    /// Record `value` into the named histogram, creating it with `bounds`
    /// on first use.
    pub fn observe(&mut self, name: &str, bounds: &[f64], value: f64) {
        let entry = self
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| Statistic::Histogram(Histogram::new(bounds.iter().copied())));
        match entry {
            Statistic::Histogram(h) => h.record(value),
            Statistic::Counter(_) => {
                tracing::warn!("Metric '{}' is not a histogram; observation ignored", name);
            }
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, stat: Statistic) {
        self.metrics.insert(name.into(), stat);
    }

    pub fn get(&self, name: &str) -> Option<&Statistic> {
        self.metrics.get(name)
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.get(name).and_then(Statistic::as_counter).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Statistic)> {
        self.metrics.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn clear(&mut self) {
        self.metrics.clear();
    }
}

/// Run-wide statistics keyed by `(stage_name, metric_name)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsAggregator {
    entries: BTreeMap<String, StageStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one stage's stats into the aggregate.
    pub fn merge_stage(&mut self, stage_name: &str, stats: &StageStats) {
        let slot = self.entries.entry(stage_name.to_string()).or_default();
        for (metric, stat) in stats.iter() {
            match slot.metrics.get_mut(metric) {
                Some(existing) => {
                    if !existing.merge(stat) {
                        tracing::warn!(
                            "Cannot merge metric '{}' of stage '{}': incompatible kinds or bounds",
                            metric,
                            stage_name
                        );
                    }
                }
                None => {
                    slot.metrics.insert(metric.clone(), stat.clone());
                }
            }
        }
    }

    /// Fold another aggregate into this one.
    pub fn merge(&mut self, other: &StatsAggregator) {
        for (stage, stats) in &other.entries {
            self.merge_stage(stage, stats);
        }
    }

    pub fn increment(&mut self, stage_name: &str, metric: &str, by: u64) {
        self.entries
            .entry(stage_name.to_string())
            .or_default()
            .increment(metric, by);
    }

    pub fn get(&self, stage_name: &str, metric: &str) -> Option<&Statistic> {
        self.entries.get(stage_name).and_then(|s| s.get(metric))
    }

    /// Counter value, 0 when absent.
    pub fn counter(&self, stage_name: &str, metric: &str) -> u64 {
        self.get(stage_name, metric)
            .and_then(Statistic::as_counter)
            .unwrap_or(0)
    }

    pub fn stage(&self, stage_name: &str) -> Option<&StageStats> {
        self.entries.get(stage_name)
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate `(stage, metric, statistic)` in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Statistic)> {
        self.entries.iter().flat_map(|(stage, stats)| {
            stats
                .iter()
                .map(move |(metric, stat)| (stage.as_str(), metric.as_str(), stat))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(StageStats::is_empty)
    }
}

impl fmt::Display for StatsAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No statistics recorded");
        }
        writeln!(f, "=== Pipeline Statistics ===")?;
        for (stage, stats) in &self.entries {
            if stats.is_empty() {
                continue;
            }
            writeln!(f, "[{}]", stage)?;
            for (metric, stat) in stats.iter() {
                writeln!(f, "  {}: {}", metric, stat)?;
            }
        }
        Ok(())
    }
}
