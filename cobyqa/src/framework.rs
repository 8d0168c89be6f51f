//! Trust-region framework: radius and resolution management, the penalty
//! parameter, the merit function, Lagrange multipliers, and the choice of
//! the interpolation point to replace.

use cq_core::Real;
use cq_math::matrix_utilities::lstsq;
use cq_math::{Array, Matrix};

use crate::models::Models;
use crate::problem::Problem;
use crate::quadratic::{solve_interpolation_system, Quadratic};
use crate::settings::ResolvedOptions;
use crate::subsolvers;

const DECREASE_RADIUS_FACTOR: Real = 0.5;
const INCREASE_RADIUS_FACTOR: Real = std::f64::consts::SQRT_2;
const INCREASE_RADIUS_THRESHOLD: Real = 2.0;
const DECREASE_RADIUS_THRESHOLD: Real = 1.4;
const DECREASE_RESOLUTION_FACTOR: Real = 0.1;
const LARGE_RESOLUTION_THRESHOLD: Real = 250.0;
const MODERATE_RESOLUTION_THRESHOLD: Real = 16.0;
const LOW_RATIO: Real = 0.1;
const HIGH_RATIO: Real = 0.7;
const PENALTY_INCREASE_FACTOR: Real = 2.0;
const BYRD_OMOJOKUN_FACTOR: Real = 0.8;

/// Trust-region framework driving the models.
pub(crate) struct TrustRegion {
    models: Models,
    penalty: Real,
    radius: Real,
    resolution: Real,
    best_index: usize,
    lm_linear_ub: Array,
    lm_linear_eq: Array,
    lm_nonlinear_ub: Array,
    lm_nonlinear_eq: Array,
}

impl TrustRegion {
    pub fn new(models: Models, pb: &Problem<'_>, options: &ResolvedOptions) -> Self {
        let mut framework = Self {
            lm_linear_ub: Array::zeros(pb.m_linear_ub()),
            lm_linear_eq: Array::zeros(pb.m_linear_eq()),
            lm_nonlinear_ub: Array::zeros(models.m_nonlinear_ub()),
            lm_nonlinear_eq: Array::zeros(models.m_nonlinear_eq()),
            models,
            penalty: 0.0,
            radius: options.radius_init,
            resolution: options.radius_init,
            best_index: 0,
        };
        framework.set_best_index(pb);
        framework
    }

    pub fn models(&self) -> &Models {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut Models {
        &mut self.models
    }

    pub fn penalty(&self) -> Real {
        self.penalty
    }

    pub fn radius(&self) -> Real {
        self.radius
    }

    pub fn resolution(&self) -> Real {
        self.resolution
    }

    /// Set the trust-region radius, snapping it down to the resolution
    /// when the two are close.
    pub fn set_radius(&mut self, radius: Real) {
        self.radius = radius;
        if self.radius <= DECREASE_RADIUS_THRESHOLD * self.resolution {
            self.radius = self.resolution;
        }
    }

    /// Best interpolation point, relative to the origin.
    pub fn x_best(&self) -> Array {
        self.models.interpolation().point(self.best_index)
    }

    pub fn fun_best(&self) -> Real {
        self.models.fun_val()[self.best_index]
    }

    pub fn cub_best(&self) -> Array {
        self.models.cub_val().row(self.best_index)
    }

    pub fn ceq_best(&self) -> Array {
        self.models.ceq_val().row(self.best_index)
    }

    /// Merit value `f + penalty * ||c||` at `x`, where `c` gathers the
    /// linear and nonlinear constraint violations.
    pub fn merit(
        &self,
        pb: &Problem<'_>,
        x: &Array,
        fun_val: Real,
        cub_val: &Array,
        ceq_val: &Array,
    ) -> Real {
        let mut m = fun_val;
        if self.penalty > 0.0 {
            let mut c_sq = 0.0;
            let r_ub = (pb.aub().mul_vec(x) - pb.bub()).positive_part();
            c_sq += r_ub.norm_squared();
            c_sq += (pb.aeq().mul_vec(x) - pb.beq()).norm_squared();
            c_sq += cub_val.positive_part().norm_squared();
            c_sq += ceq_val.norm_squared();
            m += self.penalty * c_sq.sqrt();
        }
        m
    }

    /// Linearizations of all the constraints around `x`: the linear
    /// constraints keep their rows, the nonlinear ones contribute the
    /// gradients of their models, and the right-hand sides are the slacks
    /// at `x`.
    fn constraint_linearizations(
        &self,
        pb: &Problem<'_>,
        x: &Array,
    ) -> (Matrix, Array, Matrix, Array) {
        let n = pb.n();
        let m_ub = pb.m_linear_ub() + self.models.m_nonlinear_ub();
        let m_eq = pb.m_linear_eq() + self.models.m_nonlinear_eq();

        let mut aub = Matrix::zeros(m_ub, n);
        let mut bub = Array::zeros(m_ub);
        let lin_res_ub = pb.bub() - &pb.aub().mul_vec(x);
        for i in 0..pb.m_linear_ub() {
            for j in 0..n {
                aub[(i, j)] = pb.aub()[(i, j)];
            }
            bub[i] = lin_res_ub[i];
        }
        let cub_grad = self.models.cub_grad(x);
        let cub_val = self.models.cub(x);
        for i in 0..self.models.m_nonlinear_ub() {
            let r = pb.m_linear_ub() + i;
            for j in 0..n {
                aub[(r, j)] = cub_grad[(i, j)];
            }
            bub[r] = -cub_val[i];
        }

        let mut aeq = Matrix::zeros(m_eq, n);
        let mut beq = Array::zeros(m_eq);
        let lin_res_eq = pb.beq() - &pb.aeq().mul_vec(x);
        for i in 0..pb.m_linear_eq() {
            for j in 0..n {
                aeq[(i, j)] = pb.aeq()[(i, j)];
            }
            beq[i] = lin_res_eq[i];
        }
        let ceq_grad = self.models.ceq_grad(x);
        let ceq_val = self.models.ceq(x);
        for i in 0..self.models.m_nonlinear_eq() {
            let r = pb.m_linear_eq() + i;
            for j in 0..n {
                aeq[(r, j)] = ceq_grad[(i, j)];
            }
            beq[r] = -ceq_val[i];
        }
        (aub, bub, aeq, beq)
    }

    /// Hessian product of the model of the Lagrangian.
    fn lag_hess_prod(&self, v: &Array) -> Array {
        let mut hv = self.models.fun_hess_prod(v);
        if self.models.m_nonlinear_ub() > 0 {
            hv = hv + &self.models.cub_hess_prod(v).tr_mul_vec(&self.lm_nonlinear_ub);
        }
        if self.models.m_nonlinear_eq() > 0 {
            hv = hv + &self.models.ceq_hess_prod(v).tr_mul_vec(&self.lm_nonlinear_eq);
        }
        hv
    }

    /// Dense Hessian matrix of the model of the Lagrangian, assembled
    /// once per trust-region step so that the conjugate-gradient
    /// iteration pays a plain matrix-vector product per application.
    fn lag_hess(&self) -> Matrix {
        let mut h = self.models.fun_hess();
        for i in 0..self.models.m_nonlinear_ub() {
            let lm = self.lm_nonlinear_ub[i];
            if lm != 0.0 {
                h = &h + &self.models.cub_hess(i).scale(lm);
            }
        }
        for i in 0..self.models.m_nonlinear_eq() {
            let lm = self.lm_nonlinear_eq[i];
            if lm != 0.0 {
                h = &h + &self.models.ceq_hess(i).scale(lm);
            }
        }
        h
    }

    /// Normal and tangential steps of the composite-step approach.
    pub fn get_trust_region_step(&self, pb: &Problem<'_>) -> (Array, Array) {
        let x = self.x_best();
        let (aub, bub, aeq, beq) = self.constraint_linearizations(pb, &x);
        let xl = pb.xl() - &x;
        let xu = pb.xu() - &x;

        let normal = subsolvers::normal_step(
            &aub,
            &bub,
            &aeq,
            &beq,
            &xl,
            &xu,
            BYRD_OMOJOKUN_FACTOR * self.radius,
        );

        let xl_t = &xl - &normal;
        let xu_t = &xu - &normal;
        let bub_t = (bub - &aub.mul_vec(&normal)).positive_part();
        let grad = self.models.fun_grad(&x) + &self.lag_hess_prod(&normal);
        let lag_hess = self.lag_hess();
        let radius_t = (self.radius * self.radius - normal.norm_squared())
            .max(0.0)
            .sqrt();
        let tangential = subsolvers::tangential_step(
            &grad,
            |v| lag_hess.mul_vec(v),
            &xl_t,
            &xu_t,
            &aub,
            &bub_t,
            &aeq,
            radius_t,
        );
        (normal, tangential)
    }

    /// Second-order correction step: a least-violation step for the
    /// constraint linearizations at `x_best + step`.
    pub fn get_second_order_correction_step(&self, pb: &Problem<'_>, step: &Array) -> Array {
        let x = self.x_best() + step;
        let (aub, bub, aeq, beq) = self.constraint_linearizations(pb, &x);
        let xl = pb.xl() - &x;
        let xu = pb.xu() - &x;
        subsolvers::normal_step(&aub, &bub, &aeq, &beq, &xl, &xu, self.radius)
    }

    /// Step improving the geometry of the interpolation set at the
    /// `k_new`-th point: maximizes the absolute value of the `k_new`-th
    /// Lagrange polynomial within the bounds and the trust region.
    pub fn get_geometry_step(&self, pb: &Problem<'_>, k_new: usize) -> Array {
        let interp = self.models.interpolation();
        let n = interp.n();
        let npt = interp.npt();

        // Coefficients of the k_new-th Lagrange polynomial.
        let mut coord = Array::zeros(npt + n + 1);
        coord[k_new] = 1.0;
        let (coeffs, _) = solve_interpolation_system(interp, &coord);
        let mut grad = Array::zeros(n);
        for r in 0..n {
            grad[r] = coeffs[npt + 1 + r];
        }
        let mut i_hess = Array::zeros(npt);
        for k in 0..npt {
            i_hess[k] = coeffs[k];
        }
        let lag = Quadratic::from_coefficients(coeffs[npt], grad, i_hess);

        let x = self.x_best();
        let xl = pb.xl() - &x;
        let xu = pb.xu() - &x;
        let g = lag.grad(&x, interp);
        let to_point = interp.xpt().column(k_new) - &interp.xpt().column(self.best_index);

        let mut best_step = Array::zeros(n);
        let mut best_val = 0.0;
        for dir in [&g, &to_point] {
            let norm = dir.norm();
            if norm <= 0.0 {
                continue;
            }
            for sign in [1.0, -1.0] {
                let step = (dir * (sign * self.radius / norm)).clamp(&xl, &xu);
                let val = lag.value(&(&x + &step), interp).abs();
                if val > best_val {
                    best_val = val;
                    best_step = step;
                }
            }
        }
        best_step
    }

    /// Ratio of the actual over the predicted merit reduction of `step`.
    pub fn get_reduction_ratio(
        &self,
        pb: &Problem<'_>,
        step: &Array,
        fun_val: Real,
        cub_val: &Array,
        ceq_val: &Array,
    ) -> Real {
        let x = self.x_best();
        let x_new = &x + step;
        let merit_old = self.merit(pb, &x, self.fun_best(), &self.cub_best(), &self.ceq_best());
        let merit_new = self.merit(pb, &x_new, fun_val, cub_val, ceq_val);

        let model_old = self.merit(pb, &x, 0.0, &self.models.cub(&x), &self.models.ceq(&x));
        let model_fun = step.dot(&self.models.fun_grad(&x)) + 0.5 * self.models.fun_curv(step);
        let model_new = self.merit(
            pb,
            &x_new,
            model_fun,
            &self.models.cub(&x_new),
            &self.models.ceq(&x_new),
        );
        let predicted = model_old - model_new;
        let actual = merit_old - merit_new;
        if predicted.abs() > Real::MIN_POSITIVE * actual.abs() {
            actual / predicted
        } else {
            -1.0
        }
    }

    /// Increase the penalty parameter when the step may deteriorate the
    /// merit function because the penalty is too small.  Returns whether
    /// the best point is unchanged afterwards.
    pub fn increase_penalty(&mut self, pb: &Problem<'_>, step: &Array) -> bool {
        let x = self.x_best();
        let (aub, bub, aeq, beq) = self.constraint_linearizations(pb, &x);
        let viol_best = ((-&bub).positive_part().norm_squared() + beq.norm_squared()).sqrt();
        let viol_new = ((aub.mul_vec(step) - &bub).positive_part().norm_squared()
            + (aeq.mul_vec(step) - &beq).norm_squared())
        .sqrt();
        let viol_diff = viol_best - viol_new;
        let sqp_var = step.dot(&self.models.fun_grad(&x)) + 0.5 * self.models.fun_curv(step);
        if sqp_var > 0.0 && viol_diff > Real::MIN_POSITIVE * sqp_var {
            let threshold = sqp_var / viol_diff;
            if self.penalty <= threshold {
                self.penalty = PENALTY_INCREASE_FACTOR * threshold;
            }
        }
        let best_save = self.best_index;
        self.set_best_index(pb);
        best_save == self.best_index
    }

    /// Lower the penalty parameter to the least value preserving the
    /// ordering of the interpolation points.
    pub fn decrease_penalty(&mut self, pb: &Problem<'_>) {
        if self.penalty == 0.0 {
            return;
        }
        let npt = self.models.npt();
        let mut f_min = Real::INFINITY;
        let mut f_max = Real::NEG_INFINITY;
        let mut r_min = Real::INFINITY;
        let mut r_max: Real = 0.0;
        for k in 0..npt {
            let x = self.models.interpolation().point(k);
            let mut c_sq = (pb.aub().mul_vec(&x) - pb.bub())
                .positive_part()
                .norm_squared();
            c_sq += (pb.aeq().mul_vec(&x) - pb.beq()).norm_squared();
            c_sq += self.models.cub_val().row(k).positive_part().norm_squared();
            c_sq += self.models.ceq_val().row(k).norm_squared();
            let r = c_sq.sqrt();
            let f = self.models.fun_val()[k];
            f_min = f_min.min(f);
            f_max = f_max.max(f);
            r_min = r_min.min(r);
            r_max = r_max.max(r);
        }
        if r_max <= Real::MIN_POSITIVE {
            self.penalty = 0.0;
        } else if r_max - r_min > Real::MIN_POSITIVE && f_max > f_min {
            self.penalty = self.penalty.min((f_max - f_min) / (r_max - r_min));
        }
    }

    /// Reduce the resolution towards its final value.
    pub fn reduce_resolution(&mut self, options: &ResolvedOptions) {
        if self.resolution > LARGE_RESOLUTION_THRESHOLD * options.radius_final {
            self.resolution *= DECREASE_RESOLUTION_FACTOR;
        } else if self.resolution > MODERATE_RESOLUTION_THRESHOLD * options.radius_final {
            self.resolution = (self.resolution * options.radius_final).sqrt();
        } else {
            self.resolution = options.radius_final;
        }
        self.set_radius((DECREASE_RADIUS_FACTOR * self.radius).max(self.resolution));
    }

    /// Update the trust-region radius from the reduction ratio.
    pub fn update_radius(&mut self, s_norm: Real, ratio: Real) {
        if ratio <= LOW_RATIO {
            self.set_radius(DECREASE_RADIUS_FACTOR * s_norm);
        } else if ratio <= HIGH_RATIO {
            self.set_radius((DECREASE_RADIUS_FACTOR * self.radius).max(s_norm));
        } else {
            self.set_radius(
                (INCREASE_RADIUS_FACTOR * self.radius)
                    .min((DECREASE_RADIUS_FACTOR * self.radius).max(INCREASE_RADIUS_THRESHOLD * s_norm)),
            );
        }
    }

    /// Select the interpolation point with the least merit value, ties
    /// broken towards the smaller constraint violation.
    pub fn set_best_index(&mut self, pb: &Problem<'_>) {
        let npt = self.models.npt();
        let mut best = self.best_index;
        let x = self.models.interpolation().point(best);
        let cub_row = self.models.cub_val().row(best);
        let ceq_row = self.models.ceq_val().row(best);
        let mut m_best = self.merit(pb, &x, self.models.fun_val()[best], &cub_row, &ceq_row);
        let mut r_best = pb.maxcv(&x, &cub_row, &ceq_row);
        for k in 0..npt {
            if k == self.best_index {
                continue;
            }
            let x = self.models.interpolation().point(k);
            let cub_row = self.models.cub_val().row(k);
            let ceq_row = self.models.ceq_val().row(k);
            let m_val = self.merit(pb, &x, self.models.fun_val()[k], &cub_row, &ceq_row);
            let r_val = pb.maxcv(&x, &cub_row, &ceq_row);
            let tol = 10.0 * Real::EPSILON * npt as Real * m_best.abs().max(1.0);
            if m_val < m_best || (m_val < m_best + tol && r_val < r_best) {
                best = k;
                m_best = m_val;
                r_best = r_val;
            }
        }
        self.best_index = best;
    }

    /// Least-squares estimates of the Lagrange multipliers at `x`, from
    /// the gradients of the models of the constraints active there.
    pub fn set_multipliers(&mut self, pb: &Problem<'_>, x: &Array) {
        let n = pb.n();
        let m_lin_ub = pb.m_linear_ub();
        let m_lin_eq = pb.m_linear_eq();
        let m_nl_ub = self.models.m_nonlinear_ub();
        let m_nl_eq = self.models.m_nonlinear_eq();
        if m_lin_ub + m_lin_eq + m_nl_ub + m_nl_eq == 0 {
            return;
        }

        // Inequality constraints are included only when active at x.
        let lin_res = pb.aub().mul_vec(x) - pb.bub();
        let active_lin: Vec<usize> = (0..m_lin_ub)
            .filter(|&i| lin_res[i] >= -Real::EPSILON.sqrt() * pb.bub()[i].abs().max(1.0))
            .collect();
        let cub_val = self.models.cub(x);
        let active_nl: Vec<usize> = (0..m_nl_ub)
            .filter(|&i| cub_val[i] >= -Real::EPSILON.sqrt())
            .collect();

        let cub_grad = self.models.cub_grad(x);
        let ceq_grad = self.models.ceq_grad(x);
        let mut rows: Vec<Array> = Vec::new();
        for &i in &active_lin {
            rows.push(pb.aub().row(i));
        }
        for i in 0..m_lin_eq {
            rows.push(pb.aeq().row(i));
        }
        for &i in &active_nl {
            rows.push(cub_grad.row(i));
        }
        for i in 0..m_nl_eq {
            rows.push(ceq_grad.row(i));
        }

        self.lm_linear_ub = Array::zeros(m_lin_ub);
        self.lm_linear_eq = Array::zeros(m_lin_eq);
        self.lm_nonlinear_ub = Array::zeros(m_nl_ub);
        self.lm_nonlinear_eq = Array::zeros(m_nl_eq);
        if rows.is_empty() {
            return;
        }
        let jac_t = Matrix::from_rows(&rows, n).transpose();
        let g = self.models.fun_grad(x);
        let lm = lstsq(&jac_t, &(-&g));

        let mut offset = 0;
        for (j, &i) in active_lin.iter().enumerate() {
            self.lm_linear_ub[i] = lm[offset + j].max(0.0);
        }
        offset += active_lin.len();
        for i in 0..m_lin_eq {
            self.lm_linear_eq[i] = lm[offset + i];
        }
        offset += m_lin_eq;
        for (j, &i) in active_nl.iter().enumerate() {
            self.lm_nonlinear_ub[i] = lm[offset + j].max(0.0);
        }
        offset += active_nl.len();
        for i in 0..m_nl_eq {
            self.lm_nonlinear_eq[i] = lm[offset + i];
        }
    }

    /// Index of the interpolation point to replace, together with its
    /// distance to the best point.
    ///
    /// Without a candidate point, the farthest point from the best one is
    /// selected.  With a candidate, the choice maximizes the absolute
    /// denominator of the symmetric Broyden update, weighted by the
    /// distance to the best point.
    pub fn get_index_to_remove(&self, x_new: Option<&Array>) -> (usize, Real) {
        let npt = self.models.npt();
        let xpt = self.models.interpolation().xpt();
        let best_col = xpt.column(self.best_index);
        let dist_sq: Vec<Real> = (0..npt)
            .map(|k| (xpt.column(k) - &best_col).norm_squared())
            .collect();
        let k_max = match x_new {
            None => {
                let mut k_max = 0;
                for (k, &d) in dist_sq.iter().enumerate() {
                    if d > dist_sq[k_max] {
                        k_max = k;
                    }
                }
                k_max
            }
            Some(x_new) => {
                let den = self.models.denominators(x_new);
                let sigma = (DECREASE_RESOLUTION_FACTOR * self.radius).max(self.resolution);
                let sigma_sq = sigma * sigma;
                let mut k_max = 0;
                let mut w_max = Real::NEG_INFINITY;
                for k in 0..npt {
                    let w = (dist_sq[k] / sigma_sq).max(1.0).powf(1.5) * den[k].abs();
                    if w > w_max {
                        w_max = w;
                        k_max = k;
                    }
                }
                k_max
            }
        };
        (k_max, dist_sq[k_max].sqrt())
    }

    /// Shift the base point of the models to the best point.
    pub fn shift_x_base(&mut self) {
        let x_best = self.x_best();
        self.models.shift_x_base(&x_best);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Constraints;
    use crate::settings::Options;
    use approx::assert_abs_diff_eq;

    fn quadratic_fun(x: &Array) -> Real {
        (x[0] - 1.0).powi(2) + (x[1] - 2.5).powi(2)
    }

    fn build<'a>(
        fun: &'a dyn Fn(&Array) -> Real,
        x0: &[Real],
        cons: &Constraints<'a>,
        options: &Options,
    ) -> (TrustRegion, Problem<'a>, ResolvedOptions) {
        let x0 = Array::from_slice(x0);
        let mut pb = Problem::new(fun, &x0, cons, options).unwrap();
        let mut ropts = options.resolve(pb.n()).unwrap();
        let models = Models::new(&mut pb, &mut ropts).unwrap();
        let framework = TrustRegion::new(models, &pb, &ropts);
        (framework, pb, ropts)
    }

    #[test]
    fn radius_snaps_to_resolution() {
        let cons = Constraints::default();
        let (mut framework, _, _) = build(&quadratic_fun, &[2.0, 0.0], &cons, &Options::default());
        assert_eq!(framework.radius(), 1.0);
        framework.set_radius(1.3 * framework.resolution());
        assert_eq!(framework.radius(), framework.resolution());
    }

    #[test]
    fn best_index_tracks_least_value() {
        let cons = Constraints::default();
        let (framework, _, _) = build(&quadratic_fun, &[2.0, 0.0], &cons, &Options::default());
        // The best interpolation point of the initial set for this convex
        // quadratic is the one moved towards [1, 2.5].
        let k = framework.best_index;
        let f_best = framework.fun_best();
        for k2 in 0..framework.models().npt() {
            assert!(
                f_best <= framework.models().fun_val()[k2] + 1e-12,
                "index {k} is not the best"
            );
        }
    }

    #[test]
    fn trust_region_step_reduces_the_model() {
        let cons = Constraints::default();
        let (framework, pb, _) = build(&quadratic_fun, &[2.0, 0.0], &cons, &Options::default());
        let (normal, tangential) = framework.get_trust_region_step(&pb);
        // Unconstrained problem: no normal component.
        assert_eq!(normal.norm(), 0.0);
        let step = &normal + &tangential;
        assert!(step.norm() <= framework.radius() + 1e-10);
        let x = framework.x_best();
        let reduction = framework.models().fun(&x)
            - (framework.models().fun(&x)
                + step.dot(&framework.models().fun_grad(&x))
                + 0.5 * framework.models().fun_curv(&step));
        assert!(reduction > 0.0, "model reduction {reduction}");
    }

    #[test]
    fn normal_step_targets_linear_feasibility() {
        // Start from a point violating x0 + x1 <= 1.
        let cons = Constraints {
            aub: Some(Matrix::from_row_slice(1, 2, &[1.0, 1.0])),
            bub: Some(Array::from_slice(&[1.0])),
            ..Constraints::default()
        };
        let (framework, pb, _) = build(&quadratic_fun, &[2.0, 2.0], &cons, &Options::default());
        let (normal, _) = framework.get_trust_region_step(&pb);
        let x = framework.x_best();
        let before = (pb.aub().mul_vec(&x) - pb.bub()).positive_part().norm();
        let after = (pb.aub().mul_vec(&(&x + &normal)) - pb.bub())
            .positive_part()
            .norm();
        assert!(after < before, "violation {before} -> {after}");
    }

    #[test]
    fn penalty_increases_and_decreases() {
        let cons = Constraints {
            aub: Some(Matrix::from_row_slice(1, 2, &[1.0, 1.0])),
            bub: Some(Array::from_slice(&[1.0])),
            ..Constraints::default()
        };
        let (mut framework, pb, _) = build(&quadratic_fun, &[2.0, 2.0], &cons, &Options::default());
        // A step increasing the objective model while reducing the
        // violation forces the penalty up.
        let step = Array::from_slice(&[-0.5, -0.5]);
        framework.increase_penalty(&pb, &step);
        assert!(framework.penalty() > 0.0);

        // All interpolation points far inside the feasible region would
        // let the penalty drop back.
        framework.decrease_penalty(&pb);
        assert!(framework.penalty() >= 0.0);
    }

    #[test]
    fn resolution_reduction_schedule() {
        let cons = Constraints::default();
        let (mut framework, _, ropts) =
            build(&quadratic_fun, &[2.0, 0.0], &cons, &Options::default());
        // resolution = 1, radius_final = 1e-6: the large regime divides
        // by 10.
        framework.reduce_resolution(&ropts);
        assert_abs_diff_eq!(framework.resolution(), 0.1, epsilon = 1e-15);
        // The resolution is non-increasing and the radius respects it.
        let mut last = framework.resolution();
        for _ in 0..20 {
            framework.reduce_resolution(&ropts);
            assert!(framework.resolution() <= last);
            assert!(framework.radius() >= framework.resolution());
            last = framework.resolution();
        }
        assert_eq!(last, ropts.radius_final);
    }

    #[test]
    fn index_to_remove_prefers_distant_points() {
        let cons = Constraints::default();
        let (framework, _, _) = build(&quadratic_fun, &[2.0, 0.0], &cons, &Options::default());
        let (k, dist) = framework.get_index_to_remove(None);
        // All off-best points are at distance >= 1 from the best one.
        assert!(dist >= 1.0);
        assert!(k < framework.models().npt());
    }

    #[test]
    fn multipliers_have_the_right_sign() {
        let cons = Constraints {
            aub: Some(Matrix::from_row_slice(1, 2, &[1.0, 1.0])),
            bub: Some(Array::from_slice(&[1.0])),
            ..Constraints::default()
        };
        let (mut framework, pb, _) = build(&quadratic_fun, &[0.5, 0.5], &cons, &Options::default());
        let x = Array::from_slice(&[0.5, 0.5]);
        framework.set_multipliers(&pb, &x);
        for i in 0..pb.m_linear_ub() {
            assert!(framework.lm_linear_ub[i] >= 0.0);
        }
    }
}
