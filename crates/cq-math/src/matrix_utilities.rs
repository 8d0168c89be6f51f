//! Matrix factorization utilities.
//!
//! Wraps nalgebra's decompositions into the small set of operations the
//! interpolation machinery relies on: a direct solver for symmetric
//! indefinite systems that refuses to answer when the factorization looks
//! too ill-conditioned to trust, and an SVD-based least-squares fallback
//! that thresholds small singular values.

use crate::array::Array;
use crate::matrix::Matrix;
use cq_core::Real;

/// Singular value decomposition.
///
/// Returns `(U, S, Vᵀ)` where `U * diag(S) * Vᵀ = A`.
pub struct SVD {
    /// Left singular vectors (column unitary matrix).
    pub u: Matrix,
    /// Singular values (as an array, in descending order).
    pub singular_values: Array,
    /// Right singular vectors transposed.
    pub v_t: Matrix,
}

impl SVD {
    /// Compute the SVD of `m`.
    pub fn new(m: &Matrix) -> Self {
        let svd = m.inner().clone().svd(true, true);
        let u = svd.u.expect("U computed");
        let v_t = svd.v_t.expect("Vt computed");
        let sv = svd.singular_values;
        Self {
            u: Matrix::from(u),
            singular_values: Array::from(sv.clone_owned()),
            v_t: Matrix::from(v_t),
        }
    }
}

/// Solve the square system `A x = b` for a symmetric indefinite `A`.
///
/// Uses an LU factorization with partial pivoting (the symmetry is not
/// exploited).  Returns `None` when the factorization is singular, when
/// the diagonal-growth estimate flags the system as too ill-conditioned
/// for the solution to be trusted, or when the solution contains
/// non-finite entries.  Callers are expected to fall back to [`lstsq`].
pub fn solve_symmetric(a: &Matrix, b: &Array) -> Option<Array> {
    let n = a.rows();
    if n != a.cols() || b.size() != n {
        return None;
    }
    if n == 0 {
        return Some(Array::zeros(0));
    }

    let lu = a.inner().clone().lu();
    let u = lu.u();
    let mut max_diag: Real = 0.0;
    let mut min_diag = Real::INFINITY;
    for i in 0..n {
        let d = u[(i, i)].abs();
        max_diag = max_diag.max(d);
        min_diag = min_diag.min(d);
    }
    // Rank-deficiency test on the pivots.
    if !(min_diag > n as Real * Real::EPSILON * max_diag) {
        return None;
    }

    let x = lu.solve(b.inner())?;
    if x.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(Array::from(x))
}

/// Minimum-norm least-squares solution of `A x ≈ b` via SVD.
///
/// Singular values below `max(rows, cols) · ε · σ_max` are treated as
/// zero, so the result is well-defined for rank-deficient systems.
pub fn lstsq(a: &Matrix, b: &Array) -> Array {
    let rows = a.rows();
    let cols = a.cols();
    if rows == 0 || cols == 0 {
        return Array::zeros(cols);
    }

    let svd = SVD::new(a);
    let sv = &svd.singular_values;
    let sv_max = sv.iter().copied().fold(0.0_f64, f64::max);
    let threshold = rows.max(cols) as Real * Real::EPSILON * sv_max;

    // x = V * diag(1/sᵢ) * Uᵀ * b for sᵢ above the threshold.
    let ut_b = svd.u.tr_mul_vec(b);
    let mut x = Array::zeros(cols);
    for k in 0..sv.size() {
        let s = sv[k];
        if s > threshold {
            let ratio = ut_b[k] / s;
            for j in 0..cols {
                x[j] += ratio * svd.v_t[(k, j)];
            }
        }
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn solve_symmetric_indefinite() {
        // Symmetric indefinite 3x3 system with known solution [1, -2, 3].
        let a = Matrix::from_row_slice(
            3,
            3,
            &[2.0, 1.0, 0.0, 1.0, -3.0, 1.0, 0.0, 1.0, 1.0],
        );
        let x_true = Array::from_slice(&[1.0, -2.0, 3.0]);
        let b = a.mul_vec(&x_true);
        let x = solve_symmetric(&a, &b).expect("well-conditioned system");
        for i in 0..3 {
            assert_abs_diff_eq!(x[i], x_true[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn solve_symmetric_rejects_singular() {
        let a = Matrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let b = Array::from_slice(&[1.0, 1.0]);
        assert!(solve_symmetric(&a, &b).is_none());
    }

    #[test]
    fn lstsq_full_rank_matches_direct() {
        let a = Matrix::from_row_slice(2, 2, &[3.0, 1.0, 1.0, 2.0]);
        let x_true = Array::from_slice(&[0.5, -1.5]);
        let b = a.mul_vec(&x_true);
        let x = lstsq(&a, &b);
        for i in 0..2 {
            assert_abs_diff_eq!(x[i], x_true[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn lstsq_singular_returns_min_norm() {
        // Rank-one system: both equations say x0 + x1 = 2.
        let a = Matrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let b = Array::from_slice(&[2.0, 2.0]);
        let x = lstsq(&a, &b);
        // Minimum-norm solution is [1, 1].
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn lstsq_overdetermined() {
        // y = 1 + 2 t fitted through three exact points.
        let a = Matrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let b = Array::from_slice(&[1.0, 3.0, 5.0]);
        let x = lstsq(&a, &b);
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(x[1], 2.0, epsilon = 1e-10);
    }
}
