//! Dense symmetric positive-definite helpers for the small (p x p) systems
//! that appear in IRLS and the Cox-Reid adjustment

use ndarray::{Array1, Array2};

/// Lower Cholesky factor; non-positive pivots are floored at 1e-12
fn cholesky(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                l[[i, j]] = sum.max(1e-12).sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    l
}

/// Solve `a x = b` for symmetric positive-definite `a`
pub fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = a.nrows();
    let l = cholesky(a);

    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[[i, j]] * y[j];
        }
        y[i] = sum / l[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[[j, i]] * x[j];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

pub fn invert_spd(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut inv = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[i] = 1.0;
        inv.column_mut(i).assign(&solve_spd(a, &e));
    }
    inv
}

/// log |a| from the Cholesky diagonal
pub fn log_det_spd(a: &Array2<f64>) -> f64 {
    let l = cholesky(a);
    2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>()
}

/// X' diag(w) X
pub fn weighted_gram(x: &Array2<f64>, w: &[f64]) -> Array2<f64> {
    let p = x.ncols();
    let mut out = Array2::<f64>::zeros((p, p));
    for (i, row) in x.rows().into_iter().enumerate() {
        for j in 0..p {
            let wx = w[i] * row[j];
            for k in 0..p {
                out[[j, k]] += wx * row[k];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_solve_and_invert() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let x = solve_spd(&a, &array![2.0, 1.0]);
        assert!((x[0] - 0.5).abs() < 1e-12);
        assert!(x[1].abs() < 1e-12);

        let inv = invert_spd(&a);
        let id = a.dot(&inv);
        assert!((id[[0, 0]] - 1.0).abs() < 1e-12);
        assert!(id[[0, 1]].abs() < 1e-12);
        assert!((log_det_spd(&a) - 8.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_gram() {
        let x = array![[1.0, 0.0], [1.0, 1.0]];
        let g = weighted_gram(&x, &[2.0, 3.0]);
        assert_eq!(g, array![[5.0, 3.0], [3.0, 3.0]]);
    }
}
