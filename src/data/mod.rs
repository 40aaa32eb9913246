//! Data structures for the differential expression pipeline

mod count_matrix;
mod dataset;
mod metadata;
mod sample;

pub use count_matrix::CountMatrix;
pub use dataset::DESeqDataSet;
pub use metadata::{SampleMetadata, CONDITION_COLUMN};
pub use sample::{assign_condition, discover_samples, ConditionRule, DiscoveryConfig, Sample, DEFAULT_SUFFIX};
