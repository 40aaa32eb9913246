//! Statistical testing for differential expression

mod fdr;
mod pvalue;
mod wald;

pub use fdr::benjamini_hochberg;
pub use pvalue::calculate_pvalue;
pub use wald::{contrast_estimate, wald_test};

use crate::data::DESeqDataSet;
use crate::error::Result;
use crate::filter::independent_filtering;
use crate::glm::DesignInfo;
use crate::io::{Contrast, DESeqResults};

/// Wald test for `contrast`, then BH adjustment with optional independent
/// filtering on the base mean at level `alpha`
pub fn results(
    dds: &DESeqDataSet,
    design_info: &DesignInfo,
    contrast: Contrast,
    alpha: f64,
    filter: bool,
) -> Result<DESeqResults> {
    let mut res = wald_test(dds, design_info, contrast)?;
    if filter {
        independent_filtering(&mut res, alpha);
    }
    Ok(res)
}
