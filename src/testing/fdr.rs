//! Multiple testing correction

/// Benjamini-Hochberg adjusted p-values
///
/// NaN p-values stay NaN and do not count towards the number of tests.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let mut padj = vec![f64::NAN; n];

    let mut tested: Vec<usize> = (0..n).filter(|&i| !pvalues[i].is_nan()).collect();
    let m = tested.len();
    if m == 0 {
        return padj;
    }

    tested.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    // Walk from the largest p-value down, carrying the running minimum
    let mut cummin = f64::INFINITY;
    for (rank0, &i) in tested.iter().enumerate().rev() {
        let rank = (rank0 + 1) as f64;
        let adj = (pvalues[i] * m as f64 / rank).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }

    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_known_values() {
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.02]);
        for adj in &padj {
            assert!((adj - 0.04).abs() < 1e-12);
        }

        let padj = benjamini_hochberg(&[0.001, 0.01, 0.05, 0.5]);
        let expected = [0.004, 0.02, 0.0666666666666667, 0.5];
        for (a, e) in padj.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-12, "{} vs {}", a, e);
        }
    }

    #[test]
    fn test_bh_with_nan() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.03, 0.02]);
        assert!(padj[1].is_nan());
        // m = 3 tests, not 4
        assert!((padj[0] - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_bh_monotone_and_bounded() {
        let p = [0.9, 0.001, 0.3, 0.02, 0.7];
        let padj = benjamini_hochberg(&p);
        let mut order: Vec<usize> = (0..p.len()).collect();
        order.sort_by(|&a, &b| p[a].total_cmp(&p[b]));
        for w in order.windows(2) {
            assert!(padj[w[0]] <= padj[w[1]]);
        }
        for (adj, raw) in padj.iter().zip(p.iter()) {
            assert!(*adj >= *raw && *adj <= 1.0);
        }
    }

    #[test]
    fn test_bh_empty() {
        assert!(benjamini_hochberg(&[]).is_empty());
        assert!(benjamini_hochberg(&[f64::NAN])[0].is_nan());
    }
}
