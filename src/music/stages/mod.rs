//! Built-in stages for the drums dataset graph.

pub mod drums_extractor;
pub mod encoder;
pub mod quantizer;
pub mod random_partition;

pub use drums_extractor::DrumsExtractor;
pub use encoder::DrumsEncoder;
pub use quantizer::{quantize, QuantizeError, Quantizer};
pub use random_partition::{PartitionError, RandomPartition};
