//! Closure-backed generic stages.
//!
//! Handy for small glue steps and tests: wrap a closure instead of writing a
//! `Transform` impl by hand.

use crate::pipeline::error::StageResult;
use crate::pipeline::stage::{Transform, TransformStage};
use crate::pipeline::stats::StageStats;
use std::any::Any;
use std::fmt::Debug;
use std::marker::PhantomData;

type BoxedFn<I, O> = Box<dyn FnMut(I) -> StageResult<Vec<O>> + Send>;

/// A `Transform` backed by a closure returning zero or more outputs.
pub struct FnStage<I, O> {
    name: String,
    func: BoxedFn<I, O>,
    stats: StageStats,
    _pd: PhantomData<fn(I) -> O>,
}

impl<I, O> FnStage<I, O>
where
    I: Any + Clone + Send + Debug,
    O: Any + Clone + Send + Debug,
{
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: FnMut(I) -> StageResult<Vec<O>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
            stats: StageStats::new(),
            _pd: PhantomData,
        }
    }
}

impl<I, O> Transform for FnStage<I, O>
where
    I: Any + Clone + Send + Debug,
    O: Any + Clone + Send + Debug,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&mut self, input: I) -> StageResult<Vec<O>> {
        let outputs = (self.func)(input)?;
        if outputs.is_empty() {
            self.stats.increment("records_dropped", 1);
        }
        Ok(outputs)
    }

    fn stats(&self) -> StageStats {
        self.stats.clone()
    }

    fn reset_stats(&mut self) {
        self.stats.clear();
    }
}

/// One output per input.
pub fn map_stage<I, O, F>(name: impl Into<String>, mut f: F) -> TransformStage<FnStage<I, O>>
where
    I: Any + Clone + Send + Debug,
    O: Any + Clone + Send + Debug,
    F: FnMut(I) -> O + Send + 'static,
{
    TransformStage::new(FnStage::new(name, move |x| Ok(vec![f(x)])))
}

/// Zero or more outputs per input.
pub fn flat_map_stage<I, O, F>(name: impl Into<String>, mut f: F) -> TransformStage<FnStage<I, O>>
where
    I: Any + Clone + Send + Debug,
    O: Any + Clone + Send + Debug,
    F: FnMut(I) -> Vec<O> + Send + 'static,
{
    TransformStage::new(FnStage::new(name, move |x| Ok(f(x))))
}

/// Pass inputs matching `predicate` through unchanged.
pub fn filter_stage<T, F>(name: impl Into<String>, mut predicate: F) -> TransformStage<FnStage<T, T>>
where
    T: Any + Clone + Send + Debug,
    F: FnMut(&T) -> bool + Send + 'static,
{
    TransformStage::new(FnStage::new(name, move |x: T| {
        Ok(if predicate(&x) { vec![x] } else { Vec::new() })
    }))
}

/// Fallible variant of `flat_map_stage`.
pub fn try_stage<I, O, F>(name: impl Into<String>, f: F) -> TransformStage<FnStage<I, O>>
where
    I: Any + Clone + Send + Debug,
    O: Any + Clone + Send + Debug,
    F: FnMut(I) -> StageResult<Vec<O>> + Send + 'static,
{
    TransformStage::new(FnStage::new(name, f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::StageError;
    use crate::pipeline::record::Record;
    use crate::pipeline::stage::Stage;

    #[test]
    fn test_map_stage() {
        let mut stage = map_stage("Double", |x: i32| x * 2);
        let out = stage.transform(Record::new(21)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].record.downcast_ref::<i32>(), Some(&42));
    }

    #[test]
    fn test_filter_stage_counts_drops() {
        let mut stage = filter_stage("Even", |x: &i32| x % 2 == 0);
        assert!(stage.transform(Record::new(1)).unwrap().is_empty());
        assert_eq!(stage.transform(Record::new(2)).unwrap().len(), 1);
        assert_eq!(stage.stats().counter("records_dropped"), 1);

        stage.reset_stats();
        assert!(stage.stats().is_empty());
    }

    #[test]
    fn test_try_stage_propagates_error() {
        let mut stage = try_stage("Fails", |_x: i32| -> StageResult<Vec<i32>> {
            Err(StageError::failed("boom"))
        });
        assert_eq!(
            stage.transform(Record::new(1)).unwrap_err(),
            StageError::failed("boom")
        );
    }
}
