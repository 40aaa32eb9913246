//! Transformations of count data for sample-level visualization

mod vst;

pub use vst::{vst, vst_value, VstResult};
