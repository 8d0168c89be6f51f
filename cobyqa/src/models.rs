//! Quadratic models of the objective and constraint functions, sharing a
//! single interpolation set.

use cq_core::Real;
use cq_math::{Array, Matrix};

use crate::interpolation::Interpolation;
use crate::problem::Problem;
use crate::quadratic::{solve_interpolation_system, Quadratic};
use crate::settings::ResolvedOptions;

/// Models for a nonlinear optimization problem: one quadratic for the
/// objective function and one per nonlinear constraint component, all
/// interpolating on the same set of points.
pub(crate) struct Models {
    interpolation: Interpolation,
    fun: Quadratic,
    cub: Vec<Quadratic>,
    ceq: Vec<Quadratic>,
    fun_val: Array,
    cub_val: Matrix,
    ceq_val: Matrix,
    debug: bool,
}

impl Models {
    /// Build the initial interpolation set and models, evaluating the
    /// objective and constraint functions at all the interpolation
    /// points.
    ///
    /// Returns `None` when an initial interpolation point is nearly
    /// feasible with an objective function value below the target; the
    /// models are not built in that case.
    pub fn new(pb: &mut Problem<'_>, options: &mut ResolvedOptions) -> Option<Self> {
        let interpolation = Interpolation::new(pb, options);
        let npt = options.npt;

        let mut fun_val = Array::from_element(npt, Real::NAN);
        let mut cub_rows: Vec<Array> = Vec::with_capacity(npt);
        let mut ceq_rows: Vec<Array> = Vec::with_capacity(npt);
        for k in 0..npt {
            let x_eval = interpolation.point(k);
            let (f, cub_k, ceq_k) = pb.eval(&x_eval);
            fun_val[k] = f;
            cub_rows.push(cub_k);
            ceq_rows.push(ceq_k);

            // Stop if this interpolation point is nearly feasible with an
            // objective function value below the target.
            if f < options.target {
                let r = pb.maxcv(&x_eval, &cub_rows[k], &ceq_rows[k]);
                if r <= options.feasibility_tol {
                    return None;
                }
            }
        }
        let m_ub = pb.m_nonlinear_ub();
        let m_eq = pb.m_nonlinear_eq();
        let cub_val = Matrix::from_rows(&cub_rows, m_ub);
        let ceq_val = Matrix::from_rows(&ceq_rows, m_eq);

        let fun = Quadratic::new(&interpolation, &fun_val);
        let cub = (0..m_ub)
            .map(|i| Quadratic::new(&interpolation, &cub_val.column(i)))
            .collect();
        let ceq = (0..m_eq)
            .map(|i| Quadratic::new(&interpolation, &ceq_val.column(i)))
            .collect();
        let models = Self {
            interpolation,
            fun,
            cub,
            ceq,
            fun_val,
            cub_val,
            ceq_val,
            debug: options.debug,
        };
        if models.debug {
            models.check_interpolation_conditions();
        }
        Some(models)
    }

    pub fn n(&self) -> usize {
        self.interpolation.n()
    }

    pub fn npt(&self) -> usize {
        self.interpolation.npt()
    }

    pub fn m_nonlinear_ub(&self) -> usize {
        self.cub.len()
    }

    pub fn m_nonlinear_eq(&self) -> usize {
        self.ceq.len()
    }

    pub fn interpolation(&self) -> &Interpolation {
        &self.interpolation
    }

    /// Values of the objective function at the interpolation points.
    pub fn fun_val(&self) -> &Array {
        &self.fun_val
    }

    /// Values of the nonlinear inequality constraints at the
    /// interpolation points (one row per point).
    pub fn cub_val(&self) -> &Matrix {
        &self.cub_val
    }

    /// Values of the nonlinear equality constraints at the interpolation
    /// points (one row per point).
    pub fn ceq_val(&self) -> &Matrix {
        &self.ceq_val
    }

    // ── Objective model ───────────────────────────────────────────────────

    pub fn fun(&self, x: &Array) -> Real {
        self.fun.value(x, &self.interpolation)
    }

    pub fn fun_grad(&self, x: &Array) -> Array {
        self.fun.grad(x, &self.interpolation)
    }

    pub fn fun_hess(&self) -> Matrix {
        self.fun.hess(&self.interpolation)
    }

    pub fn fun_hess_prod(&self, v: &Array) -> Array {
        self.fun.hess_prod(v, &self.interpolation)
    }

    pub fn fun_curv(&self, v: &Array) -> Real {
        self.fun.curv(v, &self.interpolation)
    }

    /// Gradient of the alternative model of the objective function, the
    /// minimum-Frobenius-norm interpolant of the current values.
    pub fn fun_alt_grad(&self, x: &Array) -> Array {
        let model = Quadratic::new(&self.interpolation, &self.fun_val);
        model.grad(x, &self.interpolation)
    }

    // ── Constraint models ─────────────────────────────────────────────────

    /// Values of the inequality constraint models at `x`.
    pub fn cub(&self, x: &Array) -> Array {
        Array::from_vec(
            self.cub
                .iter()
                .map(|m| m.value(x, &self.interpolation))
                .collect(),
        )
    }

    /// Gradients of the inequality constraint models at `x`, one per row.
    pub fn cub_grad(&self, x: &Array) -> Matrix {
        let rows: Vec<Array> = self
            .cub
            .iter()
            .map(|m| m.grad(x, &self.interpolation))
            .collect();
        Matrix::from_rows(&rows, self.n())
    }

    /// Hessian matrix of the `i`-th inequality constraint model.
    pub fn cub_hess(&self, i: usize) -> Matrix {
        self.cub[i].hess(&self.interpolation)
    }

    /// Hessian products of the inequality constraint models, one per row.
    pub fn cub_hess_prod(&self, v: &Array) -> Matrix {
        let rows: Vec<Array> = self
            .cub
            .iter()
            .map(|m| m.hess_prod(v, &self.interpolation))
            .collect();
        Matrix::from_rows(&rows, self.n())
    }

    /// Values of the equality constraint models at `x`.
    pub fn ceq(&self, x: &Array) -> Array {
        Array::from_vec(
            self.ceq
                .iter()
                .map(|m| m.value(x, &self.interpolation))
                .collect(),
        )
    }

    /// Gradients of the equality constraint models at `x`, one per row.
    pub fn ceq_grad(&self, x: &Array) -> Matrix {
        let rows: Vec<Array> = self
            .ceq
            .iter()
            .map(|m| m.grad(x, &self.interpolation))
            .collect();
        Matrix::from_rows(&rows, self.n())
    }

    /// Hessian matrix of the `i`-th equality constraint model.
    pub fn ceq_hess(&self, i: usize) -> Matrix {
        self.ceq[i].hess(&self.interpolation)
    }

    /// Hessian products of the equality constraint models, one per row.
    pub fn ceq_hess_prod(&self, v: &Array) -> Matrix {
        let rows: Vec<Array> = self
            .ceq
            .iter()
            .map(|m| m.hess_prod(v, &self.interpolation))
            .collect();
        Matrix::from_rows(&rows, self.n())
    }

    // ── Updates ───────────────────────────────────────────────────────────

    /// Replace the quadratic models by the alternative models, the
    /// minimum-Frobenius-norm interpolants of the current values.
    pub fn reset_models(&mut self) {
        self.fun = Quadratic::new(&self.interpolation, &self.fun_val);
        for i in 0..self.cub.len() {
            self.cub[i] = Quadratic::new(&self.interpolation, &self.cub_val.column(i));
        }
        for i in 0..self.ceq.len() {
            self.ceq[i] = Quadratic::new(&self.interpolation, &self.ceq_val.column(i));
        }
        if self.debug {
            self.check_interpolation_conditions();
        }
    }

    /// Replace the `k_new`-th interpolation point with `x_new` (given
    /// relative to the origin) and update every model through the
    /// symmetric Broyden update.
    ///
    /// Returns whether any of the underlying solves reported an
    /// ill-conditioned interpolation system.
    pub fn update_interpolation(
        &mut self,
        k_new: usize,
        x_new: &Array,
        fun_val: Real,
        cub_val: &Array,
        ceq_val: &Array,
    ) -> bool {
        let npt = self.npt();

        // Differences between the new values and the current models.
        let mut fun_diff = Array::zeros(npt);
        fun_diff[k_new] = fun_val - self.fun(x_new);
        let cub_model = self.cub(x_new);
        let ceq_model = self.ceq(x_new);

        // Record the new values.
        self.fun_val[k_new] = fun_val;
        for i in 0..self.cub.len() {
            self.cub_val[(k_new, i)] = cub_val[i];
        }
        for i in 0..self.ceq.len() {
            self.ceq_val[(k_new, i)] = ceq_val[i];
        }

        // Install the new interpolation point.
        let dir_old = self.interpolation.xpt().column(k_new);
        let dir_new = x_new - self.interpolation.x_base();
        self.interpolation.set_displacement(k_new, &dir_new);

        // Update the quadratic models.
        let mut ill_conditioned =
            self.fun
                .update(&self.interpolation, k_new, &dir_old, &fun_diff);
        let mut diff = Array::zeros(npt);
        for i in 0..self.cub.len() {
            diff[k_new] = cub_val[i] - cub_model[i];
            ill_conditioned |= self.cub[i].update(&self.interpolation, k_new, &dir_old, &diff);
        }
        for i in 0..self.ceq.len() {
            diff[k_new] = ceq_val[i] - ceq_model[i];
            ill_conditioned |= self.ceq[i].update(&self.interpolation, k_new, &dir_old, &diff);
        }
        if self.debug {
            self.check_interpolation_conditions();
        }
        ill_conditioned
    }

    /// Denominators of the symmetric Broyden update for replacing each
    /// interpolation point with `x_new` (relative to the origin).
    ///
    /// Follows the denominator in Equation (2.12) of Powell, *On updating
    /// the inverse of a KKT matrix* (2004).
    pub fn denominators(&self, x_new: &Array) -> Array {
        let n = self.n();
        let npt = self.npt();
        let shift = x_new - self.interpolation.x_base();

        let t = self.interpolation.xpt().tr_mul_vec(&shift);
        let mut new_col = Array::zeros(npt + n + 1);
        for k in 0..npt {
            new_col[k] = 0.5 * t[k] * t[k];
        }
        new_col[npt] = 1.0;
        for r in 0..n {
            new_col[npt + 1 + r] = shift[r];
        }
        let (inv_new_col, _) = solve_interpolation_system(&self.interpolation, &new_col);
        let shift_sq = shift.norm_squared();
        let beta = 0.5 * shift_sq * shift_sq - new_col.dot(&inv_new_col);

        let mut den = Array::zeros(npt);
        for k in 0..npt {
            let mut coord = Array::zeros(npt + n + 1);
            coord[k] = 1.0;
            let (inv_coord, _) = solve_interpolation_system(&self.interpolation, &coord);
            let alpha = inv_coord[k];
            let tau = inv_new_col[k];
            den[k] = alpha * beta + tau * tau;
        }
        den
    }

    /// Shift the base point without changing the interpolation points.
    pub fn shift_x_base(&mut self, new_x_base: &Array) {
        self.fun.shift_x_base(&self.interpolation, new_x_base);
        for model in &mut self.cub {
            model.shift_x_base(&self.interpolation, new_x_base);
        }
        for model in &mut self.ceq {
            model.shift_x_base(&self.interpolation, new_x_base);
        }
        let shift = new_x_base - self.interpolation.x_base();
        self.interpolation.translate(&shift);
        if self.debug {
            self.check_interpolation_conditions();
        }
    }

    /// Check that every model still reproduces the stored values at the
    /// interpolation points, warning on standard error otherwise.
    fn check_interpolation_conditions(&self) {
        let mut error_fun: Real = 0.0;
        let mut error_cub: Real = 0.0;
        let mut error_ceq: Real = 0.0;
        for k in 0..self.npt() {
            let x = self.interpolation.point(k);
            error_fun = error_fun.max((self.fun(&x) - self.fun_val[k]).abs());
            let cub = self.cub(&x);
            for i in 0..cub.size() {
                error_cub = error_cub.max((cub[i] - self.cub_val[(k, i)]).abs());
            }
            let ceq = self.ceq(&x);
            for i in 0..ceq.size() {
                error_ceq = error_ceq.max((ceq[i] - self.ceq_val[(k, i)]).abs());
            }
        }
        let tol = 10.0 * Real::EPSILON.sqrt() * self.n().max(self.npt()) as Real;
        if error_fun > tol * self.fun_val.max_abs().max(1.0) {
            eprintln!("warning: the interpolation conditions for the objective function are not satisfied");
        }
        if error_cub > tol * matrix_max_abs(&self.cub_val).max(1.0) {
            eprintln!("warning: the interpolation conditions for the inequality constraint functions are not satisfied");
        }
        if error_ceq > tol * matrix_max_abs(&self.ceq_val).max(1.0) {
            eprintln!("warning: the interpolation conditions for the equality constraint functions are not satisfied");
        }
    }
}

fn matrix_max_abs(m: &Matrix) -> Real {
    let mut v: Real = 0.0;
    for i in 0..m.rows() {
        for j in 0..m.cols() {
            v = v.max(m[(i, j)].abs());
        }
    }
    v
}
