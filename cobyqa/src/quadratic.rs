//! Quadratic models with Powell's implicit/explicit split Hessian.
//!
//! The Hessian of a model is stored as a dense symmetric `n × n` part
//! plus one scalar coefficient per interpolation point, following the
//! representation designed by Powell for NEWUOA [1].  Models are built
//! and updated by solving the symmetric interpolation system, with a
//! least-squares fallback when the system is too ill-conditioned.
//!
//! [1] M. J. D. Powell. The NEWUOA software for unconstrained
//!     optimization without derivatives. In *Large-Scale Nonlinear
//!     Optimization*, pages 255–297. Springer, Boston, MA, USA, 2006.

use cq_core::Real;
use cq_math::matrix_utilities::{lstsq, solve_symmetric};
use cq_math::{Array, Matrix};

use crate::interpolation::Interpolation;

/// Solve the interpolation system for the given right-hand side.
///
/// The system matrix is the `(npt + n + 1) × (npt + n + 1)` symmetric
/// matrix encoding the interpolation conditions.  The directions from the
/// base point are rescaled by their largest norm, and the system is
/// balanced by diagonal scalings, to avoid numerical difficulties.
///
/// Returns the solution together with a flag telling whether the direct
/// solver gave up and the least-squares fallback was used.
pub(crate) fn solve_interpolation_system(
    interpolation: &Interpolation,
    rhs: &Array,
) -> (Array, bool) {
    let n = interpolation.n();
    let npt = interpolation.npt();
    debug_assert_eq!(rhs.size(), npt + n + 1);
    let xpt = interpolation.xpt();

    // Scale the directions to the interpolation points.
    let mut scale = Real::EPSILON;
    for k in 0..npt {
        scale = scale.max(xpt.column(k).norm());
    }
    let xpt_scale = xpt.scale(1.0 / scale);

    // Build the scaled left-hand side matrix diag(s) * W * diag(s).
    let gram = &xpt_scale.transpose() * &xpt_scale;
    let mut a = Matrix::zeros(npt + n + 1, npt + n + 1);
    for i in 0..npt {
        for j in 0..npt {
            a[(i, j)] = 0.5 * gram[(i, j)] * gram[(i, j)];
        }
        a[(i, npt)] = 1.0;
        a[(npt, i)] = 1.0;
        for r in 0..n {
            a[(i, npt + 1 + r)] = xpt_scale[(r, i)];
            a[(npt + 1 + r, i)] = xpt_scale[(r, i)];
        }
    }

    // Diagonal scalings keeping the system well-balanced.
    let mut scaling = Array::zeros(npt + n + 1);
    for i in 0..npt {
        scaling[i] = 1.0 / (scale * scale);
    }
    scaling[npt] = scale * scale;
    for r in 0..n {
        scaling[npt + 1 + r] = scale;
    }
    let rhs_scaled = scaling.component_mul(rhs);

    match solve_symmetric(&a, &rhs_scaled) {
        Some(x) => (scaling.component_mul(&x), false),
        None => (scaling.component_mul(&lstsq(&a, &rhs_scaled)), true),
    }
}

/// Quadratic model of a scalar function.
pub(crate) struct Quadratic {
    constant: Real,
    grad: Array,
    i_hess: Array,
    e_hess: Matrix,
}

impl Quadratic {
    /// Build the quadratic model interpolating `values` at the
    /// interpolation points, with the minimum-Frobenius-norm Hessian.
    pub fn new(interpolation: &Interpolation, values: &Array) -> Self {
        let (constant, grad, i_hess) = Self::get_model(interpolation, values);
        let n = interpolation.n();
        Self {
            constant,
            grad,
            i_hess,
            e_hess: Matrix::zeros(n, n),
        }
    }

    /// Model assembled from raw interpolation-system coefficients, with a
    /// zero explicit Hessian.  Used for Lagrange polynomials.
    pub fn from_coefficients(constant: Real, grad: Array, i_hess: Array) -> Self {
        let n = grad.size();
        Self {
            constant,
            grad,
            i_hess,
            e_hess: Matrix::zeros(n, n),
        }
    }

    /// Number of variables.
    pub fn n(&self) -> usize {
        self.grad.size()
    }

    /// Number of interpolation points defining the model.
    pub fn npt(&self) -> usize {
        self.i_hess.size()
    }

    /// Value of the model at `x` (relative to the origin).
    pub fn value(&self, x: &Array, interpolation: &Interpolation) -> Real {
        let d = x - interpolation.x_base();
        let t = interpolation.xpt().tr_mul_vec(&d);
        let implicit: Real = (0..self.npt()).map(|k| self.i_hess[k] * t[k] * t[k]).sum();
        self.constant + self.grad.dot(&d) + 0.5 * (implicit + d.dot(&self.e_hess.mul_vec(&d)))
    }

    /// Gradient of the model at `x`.
    pub fn grad(&self, x: &Array, interpolation: &Interpolation) -> Array {
        let d = x - interpolation.x_base();
        &self.grad + &self.hess_prod(&d, interpolation)
    }

    /// Hessian matrix of the model.
    pub fn hess(&self, interpolation: &Interpolation) -> Matrix {
        let xpt = interpolation.xpt();
        let mut h = self.e_hess.clone();
        for k in 0..self.npt() {
            let col = xpt.column(k);
            let hk = self.i_hess[k];
            if hk != 0.0 {
                let update = Matrix::outer(&col, &col);
                h = &h + &update.scale(hk);
            }
        }
        h
    }

    /// Right product of the Hessian matrix of the model with `v`.
    pub fn hess_prod(&self, v: &Array, interpolation: &Interpolation) -> Array {
        let xpt = interpolation.xpt();
        let t = xpt.tr_mul_vec(v).component_mul(&self.i_hess);
        self.e_hess.mul_vec(v) + &xpt.mul_vec(&t)
    }

    /// Curvature of the model along `v`.
    pub fn curv(&self, v: &Array, interpolation: &Interpolation) -> Real {
        let t = interpolation.xpt().tr_mul_vec(v);
        let implicit: Real = (0..self.npt()).map(|k| self.i_hess[k] * t[k] * t[k]).sum();
        v.dot(&self.e_hess.mul_vec(v)) + implicit
    }

    /// Apply the derivative-free symmetric Broyden update after the
    /// `k_new`-th interpolation point changed from displacement `dir_old`
    /// to its current value.
    ///
    /// `values_diff` holds the differences between the interpolated
    /// function and the previous model at the updated interpolation
    /// points.  Returns whether the interpolation system was too
    /// ill-conditioned for the direct solver.
    pub fn update(
        &mut self,
        interpolation: &Interpolation,
        k_new: usize,
        dir_old: &Array,
        values_diff: &Array,
    ) -> bool {
        // Forward the k_new-th element of the implicit Hessian to the
        // explicit part; the implicit coefficients are tied to the
        // interpolation points and the k_new-th point just moved.
        let hk = self.i_hess[k_new];
        if hk != 0.0 {
            let update = Matrix::outer(dir_old, dir_old);
            self.e_hess = &self.e_hess + &update.scale(hk);
        }
        self.i_hess[k_new] = 0.0;

        let n = interpolation.n();
        let npt = interpolation.npt();
        let mut rhs = Array::zeros(npt + n + 1);
        for k in 0..npt {
            rhs[k] = values_diff[k];
        }
        let (x, ill_conditioned) = solve_interpolation_system(interpolation, &rhs);
        self.constant += x[npt];
        for r in 0..n {
            self.grad[r] += x[npt + 1 + r];
        }
        for k in 0..npt {
            self.i_hess[k] += x[k];
        }
        ill_conditioned
    }

    /// Re-express the model around `new_x_base`.
    ///
    /// Must be called before the interpolation set itself is translated.
    pub fn shift_x_base(&mut self, interpolation: &Interpolation, new_x_base: &Array) {
        self.constant = self.value(new_x_base, interpolation);
        self.grad = self.grad(new_x_base, interpolation);
        let shift = new_x_base - interpolation.x_base();
        // w = (X - shift/2 · 1ᵀ) h_i
        let xpt = interpolation.xpt();
        let mut w = Array::zeros(self.n());
        for k in 0..self.npt() {
            let hk = self.i_hess[k];
            if hk != 0.0 {
                for r in 0..self.n() {
                    w[r] += hk * (xpt[(r, k)] - 0.5 * shift[r]);
                }
            }
        }
        let update = Matrix::outer(&shift, &w);
        self.e_hess = &(&self.e_hess + &update) + &update.transpose();
    }

    fn get_model(interpolation: &Interpolation, values: &Array) -> (Real, Array, Array) {
        let n = interpolation.n();
        let npt = interpolation.npt();
        let mut rhs = Array::zeros(npt + n + 1);
        for k in 0..npt {
            rhs[k] = values[k];
        }
        let (x, _) = solve_interpolation_system(interpolation, &rhs);
        let mut grad = Array::zeros(n);
        for r in 0..n {
            grad[r] = x[npt + 1 + r];
        }
        let mut i_hess = Array::zeros(npt);
        for k in 0..npt {
            i_hess[k] = x[k];
        }
        (x[npt], grad, i_hess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    /// Interpolation set at ±1 along the coordinate axes of R².
    fn coordinate_interpolation() -> Interpolation {
        let mut xpt = Matrix::zeros(2, 5);
        xpt[(0, 1)] = 1.0;
        xpt[(1, 2)] = 1.0;
        xpt[(0, 3)] = -1.0;
        xpt[(1, 4)] = -1.0;
        Interpolation::from_parts(Array::from_slice(&[0.5, -0.5]), xpt)
    }

    fn sample(interp: &Interpolation, f: impl Fn(&Array) -> Real) -> Array {
        Array::from_vec((0..interp.npt()).map(|k| f(&interp.point(k))).collect())
    }

    #[test]
    fn interpolates_sampled_values() {
        let interp = coordinate_interpolation();
        let f = |x: &Array| (x[0] - 1.0).powi(2) + 2.0 * (x[1] + 0.5).powi(2) + x[0] * x[1];
        let values = sample(&interp, f);
        let model = Quadratic::new(&interp, &values);
        for k in 0..interp.npt() {
            assert_abs_diff_eq!(
                model.value(&interp.point(k), &interp),
                values[k],
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let interp = coordinate_interpolation();
        let f = |x: &Array| x[0] * x[0] + 3.0 * x[1] + 1.0;
        let values = sample(&interp, f);
        let model = Quadratic::new(&interp, &values);

        let x = Array::from_slice(&[0.25, -0.75]);
        let g = model.grad(&x, &interp);
        let h = 1e-6;
        for i in 0..2 {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[i] += h;
            xm[i] -= h;
            let fd = (model.value(&xp, &interp) - model.value(&xm, &interp)) / (2.0 * h);
            assert_abs_diff_eq!(g[i], fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn hess_prod_consistent_with_hess() {
        let interp = coordinate_interpolation();
        let f = |x: &Array| x[0] * x[0] - x[0] * x[1] + 0.5 * x[1] * x[1];
        let values = sample(&interp, f);
        let model = Quadratic::new(&interp, &values);

        let v = Array::from_slice(&[0.3, -1.2]);
        let hv = model.hess_prod(&v, &interp);
        let hv_dense = model.hess(&interp).mul_vec(&v);
        for i in 0..2 {
            assert_abs_diff_eq!(hv[i], hv_dense[i], epsilon = 1e-10);
        }
        assert_abs_diff_eq!(model.curv(&v, &interp), v.dot(&hv), epsilon = 1e-10);
    }

    #[test]
    fn update_restores_interpolation() {
        let mut interp = coordinate_interpolation();
        let f = |x: &Array| x[0] * x[0] + x[1] * x[1];
        let mut values = sample(&interp, f);
        let mut model = Quadratic::new(&interp, &values);

        // Move the third point and update the model.
        let k_new = 3;
        let x_new = Array::from_slice(&[0.9, 0.1]);
        let f_new = f(&x_new);
        let dir_old = interp.xpt().column(k_new);
        let mut values_diff = Array::zeros(interp.npt());
        values_diff[k_new] = f_new - model.value(&x_new, &interp);
        interp.set_displacement(k_new, &(&x_new - interp.x_base()));
        values[k_new] = f_new;
        model.update(&interp, k_new, &dir_old, &values_diff);

        for k in 0..interp.npt() {
            assert_abs_diff_eq!(
                model.value(&interp.point(k), &interp),
                values[k],
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn base_shift_preserves_values() {
        let mut interp = coordinate_interpolation();
        let f = |x: &Array| 2.0 * x[0] * x[0] + x[0] * x[1] - x[1] + 3.0;
        let values = sample(&interp, f);
        let mut model = Quadratic::new(&interp, &values);

        let probe = Array::from_slice(&[1.3, 0.7]);
        let before = model.value(&probe, &interp);

        let new_base = Array::from_slice(&[-0.2, 0.4]);
        model.shift_x_base(&interp, &new_base);
        let shift = &new_base - interp.x_base();
        interp.translate(&shift);

        assert_abs_diff_eq!(model.value(&probe, &interp), before, epsilon = 1e-9);
    }

    proptest! {
        #[test]
        fn interpolation_identity(values in prop::collection::vec(-10.0f64..10.0, 5)) {
            let interp = coordinate_interpolation();
            let values = Array::from_vec(values);
            let model = Quadratic::new(&interp, &values);
            for k in 0..interp.npt() {
                let v = model.value(&interp.point(k), &interp);
                prop_assert!((v - values[k]).abs() < 1e-8);
            }
        }
    }
}
