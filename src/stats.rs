//! Small statistical helpers shared across modules

use std::cmp::Ordering;

/// Consistency constant making the MAD estimate sigma for normal data
const MAD_CONSTANT: f64 = 1.4826;

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

/// Median of the non-NaN values; NaN when there are none
pub fn median(values: &[f64]) -> f64 {
    let v = sorted(values);
    let n = v.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 0 {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    } else {
        v[n / 2]
    }
}

/// Squared median absolute deviation, scaled to estimate the variance
pub fn mad_squared(values: &[f64]) -> f64 {
    let center = median(values);
    if center.is_nan() {
        return f64::NAN;
    }
    let deviations: Vec<f64> = values
        .iter()
        .filter(|x| !x.is_nan())
        .map(|&x| (x - center).abs())
        .collect();
    let mad = median(&deviations) * MAD_CONSTANT;
    mad * mad
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1 denominator)
pub fn variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Linear-interpolation quantile (the usual "type 7" definition)
pub fn quantile(values: &[f64], prob: f64) -> f64 {
    let v = sorted(values);
    if v.is_empty() {
        return f64::NAN;
    }
    let h = (v.len() - 1) as f64 * prob.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    v[lo] + (h - lo as f64) * (v[hi] - v[lo])
}

/// Mean after dropping the `trim` fraction from each tail
pub fn trimmed_mean(values: &[f64], trim: f64) -> f64 {
    let v = sorted(values);
    if v.is_empty() {
        return f64::NAN;
    }
    let k = (v.len() as f64 * trim.clamp(0.0, 0.5)).floor() as usize;
    let kept = &v[k..v.len() - k];
    if kept.is_empty() {
        median(&v)
    } else {
        mean(kept)
    }
}

/// Trigamma function (derivative of digamma)
pub fn trigamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).powi(2) - trigamma(1.0 - x);
    }

    // Recurrence up to the range where the asymptotic series is accurate
    let mut acc = 0.0;
    let mut z = x;
    while z < 8.0 {
        acc += 1.0 / (z * z);
        z += 1.0;
    }
    let z2 = z * z;
    acc + 1.0 / z + 0.5 / z2 + 1.0 / (6.0 * z2 * z) - 1.0 / (30.0 * z2 * z2 * z)
        + 1.0 / (42.0 * z2 * z2 * z2 * z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&[]).is_nan());
        assert_eq!(median(&[f64::NAN, 5.0]), 5.0);
    }

    #[test]
    fn test_mad_squared() {
        // deviations from 3: 2, 1, 0, 1, 2 -> median 1
        let m = mad_squared(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((m - 1.4826_f64.powi(2)).abs() < 1e-12);
    }

    #[test]
    fn test_quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&v, 0.0), 1.0);
        assert_eq!(quantile(&v, 1.0), 4.0);
        assert!((quantile(&v, 0.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_trimmed_mean_ignores_tails() {
        let v = [1.0, 2.0, 3.0, 4.0, 100.0, -100.0, 2.5, 3.5, 1.5, 2.0];
        let t = trimmed_mean(&v, 0.1);
        assert!(t > 1.0 && t < 4.0);
    }

    #[test]
    fn test_trigamma_known_values() {
        // trigamma(1) = pi^2 / 6
        let pi2_6 = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - pi2_6).abs() < 1e-8);
        // trigamma(0.5) = pi^2 / 2
        assert!((trigamma(0.5) - 3.0 * pi2_6).abs() < 1e-8);
        assert!((variance(&[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-12);
    }
}
