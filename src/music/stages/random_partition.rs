//! RandomPartition: routes each record to one of several named ports.
//!
//! With ports `[p0, .., pn]` and ratios `[r0, .., r(n-1)]`, a record goes to
//! `pi` with probability `ri`; the last port takes whatever is left. The
//! generator is seeded, so the same seed and input order always produce the
//! same split.

use crate::pipeline::error::StageResult;
use crate::pipeline::port::PortName;
use crate::pipeline::stage::{Routed, Router};
use crate::pipeline::stats::StageStats;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::fmt::Debug;
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PartitionError {
    #[error("A partition needs at least one port")]
    NoPorts,

    #[error("{ports} ports need {} ratios, got {ratios}", .ports - 1)]
    RatioCount { ports: usize, ratios: usize },

    #[error("Ratio {0} is outside [0, 1]")]
    InvalidRatio(f64),

    #[error("Ratios sum to {0}, which exceeds 1")]
    RatioSum(f64),
}

pub struct RandomPartition<T> {
    name: String,
    ports: Vec<PortName>,
    /// Upper bound of each port's slice of [0, 1), excluding the last port.
    cumulative: Vec<f64>,
    rng: StdRng,
    stats: StageStats,
    _pd: PhantomData<fn(T) -> T>,
}

impl<T> RandomPartition<T> {
    pub fn new<P>(
        ports: impl IntoIterator<Item = P>,
        ratios: &[f64],
        seed: u64,
    ) -> Result<Self, PartitionError>
    where
        P: Into<PortName>,
    {
        let ports: Vec<PortName> = ports.into_iter().map(Into::into).collect();
        if ports.is_empty() {
            return Err(PartitionError::NoPorts);
        }
        if ratios.len() != ports.len() - 1 {
            return Err(PartitionError::RatioCount {
                ports: ports.len(),
                ratios: ratios.len(),
            });
        }

        let mut cumulative = Vec::with_capacity(ratios.len());
        let mut sum = 0.0;
        for &ratio in ratios {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(PartitionError::InvalidRatio(ratio));
            }
            sum += ratio;
            cumulative.push(sum);
        }
        if sum > 1.0 + f64::EPSILON {
            return Err(PartitionError::RatioSum(sum));
        }

        Ok(Self {
            name: "RandomPartition".to_string(),
            ports,
            cumulative,
            rng: StdRng::seed_from_u64(seed),
            stats: StageStats::new(),
            _pd: PhantomData,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn pick(&mut self) -> usize {
        let r: f64 = self.rng.gen();
        self.cumulative
            .iter()
            .position(|&bound| r < bound)
            .unwrap_or(self.ports.len() - 1)
    }
}

impl<T> Router for RandomPartition<T>
where
    T: Any + Clone + Send + Debug,
{
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> &[PortName] {
        &self.ports
    }

    fn route(&mut self, input: T) -> StageResult<Vec<Routed<T>>> {
        let idx = self.pick();
        let port = self.ports[idx].clone();
        self.stats.increment(&format!("routed_to_{}", port), 1);
        Ok(vec![Routed::new(port, input)])
    }

    fn stats(&self) -> StageStats {
        self.stats.clone()
    }

    fn reset_stats(&mut self) {
        self.stats.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn route_all(partition: &mut RandomPartition<u32>, n: u32) -> Vec<String> {
        (0..n)
            .map(|i| partition.route(i).unwrap().remove(0).port)
            .collect()
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            RandomPartition::<u32>::new(Vec::<String>::new(), &[], 0).err(),
            Some(PartitionError::NoPorts)
        );
        assert_eq!(
            RandomPartition::<u32>::new(["a", "b"], &[], 0).err(),
            Some(PartitionError::RatioCount { ports: 2, ratios: 0 })
        );
        assert_eq!(
            RandomPartition::<u32>::new(["a", "b"], &[1.5], 0).err(),
            Some(PartitionError::InvalidRatio(1.5))
        );
        assert!(matches!(
            RandomPartition::<u32>::new(["a", "b", "c"], &[0.7, 0.7], 0),
            Err(PartitionError::RatioSum(_))
        ));
    }

    #[test]
    fn test_extreme_ratios() {
        let mut all_first = RandomPartition::<u32>::new(["a", "b"], &[1.0], 7).unwrap();
        assert!(route_all(&mut all_first, 50).iter().all(|p| p == "a"));

        let mut all_last = RandomPartition::<u32>::new(["a", "b"], &[0.0], 7).unwrap();
        assert!(route_all(&mut all_last, 50).iter().all(|p| p == "b"));
        assert_eq!(all_last.stats().counter("routed_to_b"), 50);
    }

    #[test]
    fn test_single_port_takes_everything() {
        let mut only = RandomPartition::<u32>::new(["only"], &[], 1).unwrap();
        assert!(route_all(&mut only, 10).iter().all(|p| p == "only"));
    }

    proptest! {
        #[test]
        fn prop_same_seed_same_split(seed in any::<u64>(), ratio in 0.0f64..=1.0) {
            let mut a = RandomPartition::<u32>::new(["eval", "train"], &[ratio], seed).unwrap();
            let mut b = RandomPartition::<u32>::new(["eval", "train"], &[ratio], seed).unwrap();
            prop_assert_eq!(route_all(&mut a, 64), route_all(&mut b, 64));
        }
    }
}
