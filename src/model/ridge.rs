//! Penalised least squares on small dense designs.

/// Solves `(XᵀX + diag(penalty)) β = Xᵀy` for the rows of `x`.
///
/// Returns `None` when the system is not positive definite.
pub fn solve_ridge(x: &[Vec<f64>], y: &[f64], penalty: &[f64]) -> Option<Vec<f64>> {
    let p = penalty.len();
    if p == 0 || x.len() != y.len() || x.iter().any(|row| row.len() != p) {
        return None;
    }

    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];

    for (row, &target) in x.iter().zip(y) {
        for i in 0..p {
            xty[i] += row[i] * target;
            for j in 0..=i {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..p {
        for j in 0..i {
            xtx[j][i] = xtx[i][j];
        }
        xtx[i][i] += penalty[i];
    }

    cholesky_solve(&xtx, &xty)
}

/// Solves `A x = b` for symmetric positive definite `A`.
fn cholesky_solve(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    let mut l = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }

            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    // L y = b
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i][j] * y[j];
        }
        y[i] = sum / l[i][i];
    }

    // Lᵀ x = y
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j][i] * x[j];
        }
        x[i] = sum / l[i][i];
    }

    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_recovers_exact_line() {
        let x: Vec<Vec<f64>> = (0..5).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..5).map(|i| 3.0 + 2.0 * i as f64).collect();

        let beta = solve_ridge(&x, &y, &[1e-10, 1e-10]).unwrap();
        assert_relative_eq!(beta[0], 3.0, epsilon = 1e-6);
        assert_relative_eq!(beta[1], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_penalty_shrinks_coefficient() {
        let x: Vec<Vec<f64>> = (0..4).map(|i| vec![1.0, i as f64]).collect();
        let y = vec![0.0, 1.0, 2.0, 3.0];

        let loose = solve_ridge(&x, &y, &[1e-10, 1e-10]).unwrap();
        let tight = solve_ridge(&x, &y, &[1e-10, 100.0]).unwrap();
        assert!(tight[1].abs() < loose[1].abs());
    }

    #[test]
    fn test_singular_without_penalty() {
        // All-zero second column
        let x: Vec<Vec<f64>> = (0..4).map(|i| vec![i as f64, 0.0]).collect();
        let y = vec![0.0, 1.0, 2.0, 3.0];
        assert!(solve_ridge(&x, &y, &[0.0, 0.0]).is_none());
    }

    #[test]
    fn test_dimension_mismatch() {
        let x = vec![vec![1.0, 2.0]];
        assert!(solve_ridge(&x, &[1.0, 2.0], &[0.0, 0.0]).is_none());
    }
}
