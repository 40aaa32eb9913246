//! Input/Output: count files, sample sheets, count matrices and model results

mod csv;
mod htseq;
mod results;

pub use self::csv::{read_count_matrix, read_sample_sheet, write_count_matrix};
pub use htseq::{assemble_count_matrix, read_htseq_counts, HtseqCounters, HtseqCounts, COUNTER_PREFIX};
pub use results::{Contrast, DESeqResults};
