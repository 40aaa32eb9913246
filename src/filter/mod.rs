//! Filtering of results before multiple testing adjustment

mod independent;

pub use independent::{independent_filtering, lowess};
