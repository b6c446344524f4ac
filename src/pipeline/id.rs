//! Identity types for the pipeline graph.
//!
//! `StageId` is a newtype over `u32` that serves as a direct index into the
//! stage list of a `GraphDescription`, providing O(1) lookup.

use crate::pipeline::port::PortName;
use std::fmt;

/// Index into `GraphDescription::stages`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StageId(pub u32);

impl StageId {
    pub const INVALID: StageId = StageId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Reference a named output port of this stage.
    pub fn port(self, name: impl Into<PortName>) -> PortRef {
        PortRef {
            stage: self,
            port: Some(name.into()),
        }
    }
}

impl fmt::Debug for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "StageId(INVALID)")
        } else {
            write!(f, "StageId({})", self.0)
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A stage output reference. `port: None` means the stage's only port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub stage: StageId,
    pub port: Option<PortName>,
}

impl From<StageId> for PortRef {
    fn from(stage: StageId) -> Self {
        Self { stage, port: None }
    }
}
