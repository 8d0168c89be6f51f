//! Trust-region subproblem solvers.
//!
//! The steps are computed by projected-gradient and truncated
//! conjugate-gradient iterations; the feasible sets are intersections of
//! a box (which always contains the origin, since the current iterate is
//! within the bounds), a Euclidean ball centered at the origin, and
//! linearized constraints.

use cq_core::Real;
use cq_math::matrix_utilities::lstsq;
use cq_math::{Array, Matrix};

const MAX_PROJECTED_GRADIENT_ITER: usize = 50;
const CG_TOLERANCE: Real = 0.01;

/// Clip `d` into the box `[xl, xu]`, then scale it back into the ball of
/// radius `delta`.  The box contains the origin, so the scaling cannot
/// leave it.
fn clip_box_ball(mut d: Array, xl: &Array, xu: &Array, delta: Real) -> Array {
    d = d.clamp(xl, xu);
    let norm = d.norm();
    if norm > delta && norm > 0.0 {
        d = d * (delta / norm);
    }
    d
}

/// Minimize the Euclidean violation of the linearized constraints
/// `aub d <= bub` and `aeq d == beq` within the box `[xl, xu]` and the
/// ball of radius `delta` (the normal step of the Byrd–Omojokun
/// composite-step approach).
pub(crate) fn normal_step(
    aub: &Matrix,
    bub: &Array,
    aeq: &Matrix,
    beq: &Array,
    xl: &Array,
    xu: &Array,
    delta: Real,
) -> Array {
    let n = xl.size();
    let mut d = Array::zeros(n);
    if (aub.rows() == 0 && aeq.rows() == 0) || delta <= 0.0 {
        return d;
    }

    for _ in 0..MAX_PROJECTED_GRADIENT_ITER {
        // Gradient of 0.5 ||(aub d - bub)_+||^2 + 0.5 ||aeq d - beq||^2.
        let r_ub = (aub.mul_vec(&d) - bub).positive_part();
        let r_eq = aeq.mul_vec(&d) - beq;
        let g = aub.tr_mul_vec(&r_ub) + &aeq.tr_mul_vec(&r_eq);
        let g_sq = g.norm_squared();
        if g_sq <= Real::EPSILON * Real::EPSILON {
            break;
        }

        // Exact minimizer along -g of the locally smooth piece.
        let ag_ub = aub.mul_vec(&g);
        let mut curv = aeq.mul_vec(&g).norm_squared();
        for i in 0..r_ub.size() {
            if r_ub[i] > 0.0 {
                curv += ag_ub[i] * ag_ub[i];
            }
        }
        if curv <= 0.0 {
            break;
        }
        let alpha = g_sq / curv;
        let d_new = clip_box_ball(&d - &(g * alpha), xl, xu, delta);
        if (&d_new - &d).norm() <= 1e-12 * delta.max(1.0) {
            d = d_new;
            break;
        }
        d = d_new;
    }
    d
}

/// Reduce the quadratic model `g·d + d·H d / 2` within the box
/// `[xl, xu]`, the ball of radius `delta`, the linearized inequality
/// slacks `aub d <= bub` (with `bub >= 0`), and the null space of `aeq`
/// (the tangential step of the Byrd–Omojokun composite-step approach).
///
/// Uses a truncated conjugate-gradient iteration with ratio tests on
/// every boundary; the iteration stops at the first boundary hit or when
/// the residual has dropped enough.
pub(crate) fn tangential_step<H>(
    grad: &Array,
    hess_prod: H,
    xl: &Array,
    xu: &Array,
    aub: &Matrix,
    bub: &Array,
    aeq: &Matrix,
    delta: Real,
) -> Array
where
    H: Fn(&Array) -> Array,
{
    let n = grad.size();
    let mut d = Array::zeros(n);
    if delta <= 0.0 {
        return d;
    }
    let aeq_t = aeq.transpose();
    let project = |v: &Array| -> Array {
        if aeq.rows() == 0 {
            v.clone()
        } else {
            v - &aeq_t.mul_vec(&lstsq(&aeq_t, v))
        }
    };

    let mut r = project(grad);
    let g0_norm = r.norm();
    if g0_norm <= 0.0 {
        return d;
    }
    let mut p = -&r;

    for _ in 0..2 * n {
        let hp = project(&hess_prod(&p));
        let curv = p.dot(&hp);
        let r_sq = r.norm_squared();
        let alpha_model = if curv > 0.0 {
            r_sq / curv
        } else {
            Real::INFINITY
        };

        // Distance to the trust-region boundary along p.
        let p_sq = p.norm_squared();
        if p_sq <= 0.0 {
            break;
        }
        let dp = d.dot(&p);
        let disc = dp * dp + p_sq * (delta * delta - d.norm_squared());
        let alpha_ball = if disc >= 0.0 {
            (-dp + disc.sqrt()) / p_sq
        } else {
            0.0
        };

        // Distance to the bounds along p.
        let mut alpha_box = Real::INFINITY;
        for i in 0..n {
            if p[i] > 0.0 {
                alpha_box = alpha_box.min((xu[i] - d[i]) / p[i]);
            } else if p[i] < 0.0 {
                alpha_box = alpha_box.min((xl[i] - d[i]) / p[i]);
            }
        }

        // Distance to the linearized inequality constraints along p.
        let mut alpha_lin = Real::INFINITY;
        let ap = aub.mul_vec(&p);
        let ad = aub.mul_vec(&d);
        for i in 0..ap.size() {
            if ap[i] > 0.0 {
                alpha_lin = alpha_lin.min((bub[i] - ad[i]) / ap[i]);
            }
        }

        let alpha_bound = alpha_ball.min(alpha_box).min(alpha_lin).max(0.0);
        let alpha = alpha_model.min(alpha_bound);
        if !alpha.is_finite() || alpha <= 0.0 {
            break;
        }
        d = d + &(&p * alpha);
        if alpha_model >= alpha_bound {
            break;
        }

        let r_new = project(&(&r + &(&hp * alpha)));
        let r_new_sq = r_new.norm_squared();
        if r_new_sq.sqrt() <= CG_TOLERANCE * g0_norm {
            break;
        }
        let beta = r_new_sq / r_sq;
        p = -&r_new + &(&p * beta);
        r = r_new;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn box_of(n: usize, half_width: Real) -> (Array, Array) {
        (
            Array::from_element(n, -half_width),
            Array::from_element(n, half_width),
        )
    }

    #[test]
    fn normal_step_without_constraints_is_zero() {
        let (xl, xu) = box_of(2, 1.0);
        let d = normal_step(
            &Matrix::zeros(0, 2),
            &Array::zeros(0),
            &Matrix::zeros(0, 2),
            &Array::zeros(0),
            &xl,
            &xu,
            1.0,
        );
        assert_eq!(d.norm(), 0.0);
    }

    #[test]
    fn normal_step_restores_linearized_feasibility() {
        // Single violated inequality d_0 <= -0.5 (slack -0.5 at d = 0).
        let aub = Matrix::from_row_slice(1, 2, &[1.0, 0.0]);
        let bub = Array::from_slice(&[-0.5]);
        let (xl, xu) = box_of(2, 2.0);
        let d = normal_step(
            &aub,
            &bub,
            &Matrix::zeros(0, 2),
            &Array::zeros(0),
            &xl,
            &xu,
            1.0,
        );
        let violation = (aub.mul_vec(&d) - &bub).positive_part().norm();
        assert!(violation < 1e-6, "residual violation {violation}");
        assert!(d.norm() <= 1.0 + 1e-12);
    }

    #[test]
    fn normal_step_reduces_equality_residual() {
        let aeq = Matrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let beq = Array::from_slice(&[0.8]);
        let (xl, xu) = box_of(2, 2.0);
        let d = normal_step(
            &Matrix::zeros(0, 2),
            &Array::zeros(0),
            &aeq,
            &beq,
            &xl,
            &xu,
            2.0,
        );
        let res = (aeq.mul_vec(&d) - &beq).norm();
        assert!(res < 1e-6, "equality residual {res}");
    }

    #[test]
    fn normal_step_respects_the_ball() {
        // Feasibility would require a step of norm 10; the ball wins.
        let aeq = Matrix::from_row_slice(1, 1, &[1.0]);
        let beq = Array::from_slice(&[10.0]);
        let (xl, xu) = box_of(1, 100.0);
        let d = normal_step(
            &Matrix::zeros(0, 1),
            &Array::zeros(0),
            &aeq,
            &beq,
            &xl,
            &xu,
            1.0,
        );
        assert!(d.norm() <= 1.0 + 1e-12);
        assert_abs_diff_eq!(d[0], 1.0, epsilon = 1e-8);
    }

    #[test]
    fn tangential_step_minimizes_convex_quadratic() {
        // Minimize 0.5 (d - [1, -2])ᵀ (d - [1, -2]) shifted so the
        // gradient at 0 is [-1, 2]; the unconstrained minimizer [1, -2]
        // is inside all regions.
        let grad = Array::from_slice(&[-1.0, 2.0]);
        let hess = |v: &Array| v.clone();
        let (xl, xu) = box_of(2, 5.0);
        let d = tangential_step(
            &grad,
            hess,
            &xl,
            &xu,
            &Matrix::zeros(0, 2),
            &Array::zeros(0),
            &Matrix::zeros(0, 2),
            10.0,
        );
        assert_abs_diff_eq!(d[0], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(d[1], -2.0, epsilon = 1e-8);
    }

    #[test]
    fn tangential_step_stops_at_the_ball() {
        let grad = Array::from_slice(&[-1.0, 0.0]);
        let hess = |_: &Array| Array::zeros(2);
        let (xl, xu) = box_of(2, 5.0);
        let d = tangential_step(
            &grad,
            hess,
            &xl,
            &xu,
            &Matrix::zeros(0, 2),
            &Array::zeros(0),
            &Matrix::zeros(0, 2),
            1.5,
        );
        assert_abs_diff_eq!(d[0], 1.5, epsilon = 1e-10);
        assert_abs_diff_eq!(d.norm(), 1.5, epsilon = 1e-10);
    }

    #[test]
    fn tangential_step_respects_bounds_and_slacks() {
        let grad = Array::from_slice(&[-1.0, -1.0]);
        let hess = |_: &Array| Array::zeros(2);
        let (xl, mut xu) = box_of(2, 5.0);
        xu[0] = 0.25;
        let aub = Matrix::from_row_slice(1, 2, &[0.0, 1.0]);
        let bub = Array::from_slice(&[0.5]);
        let d = tangential_step(
            &grad,
            hess,
            &xl,
            &xu,
            &aub,
            &bub,
            &Matrix::zeros(0, 2),
            10.0,
        );
        assert!(d[0] <= 0.25 + 1e-10);
        assert!(d[1] <= 0.5 + 1e-10);
        assert!(d.norm() > 0.0);
    }

    #[test]
    fn tangential_step_stays_in_equality_null_space() {
        let grad = Array::from_slice(&[-1.0, -1.0]);
        let hess = |v: &Array| v.clone();
        let (xl, xu) = box_of(2, 5.0);
        let aeq = Matrix::from_row_slice(1, 2, &[1.0, -1.0]);
        let d = tangential_step(
            &grad,
            hess,
            &xl,
            &xu,
            &Matrix::zeros(0, 2),
            &Array::zeros(0),
            &aeq,
            10.0,
        );
        assert_abs_diff_eq!(d[0] - d[1], 0.0, epsilon = 1e-8);
        assert!(d[0] > 0.0);
    }
}
