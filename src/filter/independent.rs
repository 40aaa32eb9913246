//! Independent filtering on the mean of normalized counts

use crate::io::DESeqResults;
use crate::stats::quantile;
use crate::testing::benjamini_hochberg;

const N_THETA: usize = 50;

/// Choose a base-mean threshold that maximizes discoveries and re-adjust
///
/// For 50 quantiles of the base mean (from the fraction of all-zero genes up
/// to 0.95), p-values of genes below the cutoff are set aside and the rest
/// are BH-adjusted. The number of rejections at `alpha` is smoothed with
/// lowess over the quantiles; the first quantile whose rejection count
/// exceeds the smoothed maximum minus the residual RMSE wins. With ten or
/// fewer rejections anywhere no genes are filtered.
///
/// Genes below the chosen threshold get NaN `padj`; the threshold is stored
/// in `filter_threshold`.
pub fn independent_filtering(results: &mut DESeqResults, alpha: f64) {
    let n = results.n_genes();
    if n == 0 {
        return;
    }

    let base_means = &results.base_means;
    let n_zero = base_means.iter().filter(|&&m| !(m > 0.0)).count();
    let lower = n_zero as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };

    let thetas: Vec<f64> = (0..N_THETA)
        .map(|i| lower + (upper - lower) * i as f64 / (N_THETA - 1) as f64)
        .collect();
    let cutoffs: Vec<f64> = thetas.iter().map(|&t| quantile(base_means, t)).collect();

    let adjusted: Vec<Vec<f64>> = cutoffs
        .iter()
        .map(|&cutoff| {
            let kept: Vec<f64> = results
                .pvalues
                .iter()
                .zip(base_means.iter())
                .map(|(&p, &m)| if m >= cutoff { p } else { f64::NAN })
                .collect();
            benjamini_hochberg(&kept)
        })
        .collect();
    let num_rej: Vec<f64> = adjusted
        .iter()
        .map(|padj| padj.iter().filter(|&&p| p < alpha).count() as f64)
        .collect();

    let best = select_theta(&thetas, &num_rej);
    log::debug!(
        "Independent filtering: rejections {:?}",
        num_rej.iter().step_by(5).collect::<Vec<_>>()
    );
    log::info!(
        "Independent filtering: baseMean threshold {:.3} (quantile {:.3}), {} rejections at alpha {}",
        cutoffs[best],
        thetas[best],
        num_rej[best],
        alpha
    );

    results.filter_threshold = Some(cutoffs[best]);
    if let Some(padj) = adjusted.into_iter().nth(best) {
        results.padj = padj;
    }
}

fn select_theta(thetas: &[f64], num_rej: &[f64]) -> usize {
    let max_rej = num_rej.iter().cloned().fold(0.0, f64::max);
    if max_rej <= 10.0 {
        return 0;
    }

    let fit = lowess(thetas, num_rej, 0.2, 3);
    let residuals: Vec<f64> = num_rej
        .iter()
        .zip(fit.iter())
        .filter(|(&r, _)| r > 0.0)
        .map(|(&r, &f)| r - f)
        .collect();
    let rmse = if residuals.is_empty() {
        0.0
    } else {
        (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
    };
    let max_fit = fit.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let thresh = max_fit - rmse;

    num_rej.iter().position(|&r| r > thresh).unwrap_or_else(|| {
        // Smoothed maximum above every observed count: take the first peak
        num_rej
            .iter()
            .position(|&r| r >= max_rej)
            .unwrap_or(0)
    })
}

/// Locally linear regression with tricube weights and bisquare robustness
/// iterations, evaluated at each `x` (which must be sorted)
pub fn lowess(x: &[f64], y: &[f64], f: f64, iterations: usize) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return y.to_vec();
    }
    let span = ((f * n as f64).ceil() as usize).clamp(2, n);
    let scale = y.iter().map(|v| v.abs()).sum::<f64>() / n as f64;
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for step in 0..=iterations {
        for i in 0..n {
            // Window of the `span` nearest neighbours of x[i]
            let mut left = i.saturating_sub(span - 1);
            let mut right = left + span - 1;
            if right >= n {
                right = n - 1;
                left = n - span;
            }
            while left < i && right + 1 < n && x[i] - x[left] > x[right + 1] - x[i] {
                left += 1;
                right += 1;
            }
            let h = (x[i] - x[left]).max(x[right] - x[i]);

            let (mut sw, mut swx, mut swy, mut swxx, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for j in left..=right {
                let u = if h > 0.0 { (x[j] - x[i]).abs() / h } else { 0.0 };
                let w = if u < 1.0 { (1.0 - u.powi(3)).powi(3) } else { 0.0 } * robustness[j];
                sw += w;
                swx += w * x[j];
                swy += w * y[j];
                swxx += w * x[j] * x[j];
                swxy += w * x[j] * y[j];
            }
            fitted[i] = if sw <= 0.0 {
                y[i]
            } else {
                let mx = swx / sw;
                let my = swy / sw;
                let var = swxx / sw - mx * mx;
                if var > 1e-12 {
                    let slope = (swxy / sw - mx * my) / var;
                    my + slope * (x[i] - mx)
                } else {
                    my
                }
            };
        }

        if step == iterations {
            break;
        }
        let abs_res: Vec<f64> = y.iter().zip(fitted.iter()).map(|(a, b)| (a - b).abs()).collect();
        let s = crate::stats::median(&abs_res) * 6.0;
        // Residuals at rounding level: the fit is already exact
        if !(s > 1e-7 * scale) {
            break;
        }
        for (r, res) in robustness.iter_mut().zip(abs_res.iter()) {
            let u = res / s;
            *r = if u < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }
    fitted
}
