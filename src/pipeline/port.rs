//! Port descriptors for the stage system.
//!
//! Each stage declares its output ports with the record type flowing through
//! them. The compiler uses these to validate edge connections.

use crate::pipeline::record::{Record, RecordType};

/// Name of an output port.
pub type PortName = String;

/// Port name used by stages with a single output.
pub const DEFAULT_PORT: &str = "out";

/// Descriptor for a stage output port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: PortName,
    pub record_type: RecordType,
}

impl PortDescriptor {
    pub fn new(name: impl Into<PortName>, record_type: RecordType) -> Self {
        Self {
            name: name.into(),
            record_type,
        }
    }

    /// The implicit port of a single-output stage.
    pub fn default_port(record_type: RecordType) -> Self {
        Self::new(DEFAULT_PORT, record_type)
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_PORT
    }
}

/// One output of a stage invocation, tagged with its destination port.
#[derive(Debug, Clone)]
pub struct Emission {
    pub port: PortName,
    pub record: Record,
}

impl Emission {
    pub fn new(port: impl Into<PortName>, record: Record) -> Self {
        Self {
            port: port.into(),
            record,
        }
    }

    /// Emit on the default port.
    pub fn single(record: Record) -> Self {
        Self::new(DEFAULT_PORT, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port() {
        let port = PortDescriptor::default_port(RecordType::of::<u8>());
        assert!(port.is_default());
        assert_eq!(port.name, "out");
    }
}
