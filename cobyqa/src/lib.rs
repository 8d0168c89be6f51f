//! # cobyqa
//!
//! Derivative-free solver for constrained nonlinear optimization problems
//! of the form
//!
//! ```text
//!   min  f(x)
//!   s.t. xl <= x <= xu
//!        aub x <= bub,  aeq x == beq
//!        cub(x) <= 0,   ceq(x) == 0
//! ```
//!
//! using only function values of `f`, `cub`, and `ceq`.  The method
//! maintains quadratic interpolation models of the objective and
//! constraint functions, minimizes a trust-region step subject to the
//! linearized constraints, and updates the interpolation set with each
//! sample, following the COBYQA method of Ragonneau [1] built on Powell's
//! derivative-free model machinery [2].
//!
//! ## Quick start
//!
//! ```rust
//! use cobyqa::{minimize, Array, Constraints, Options};
//!
//! let fun = |x: &Array| (x[0] - 1.0).powi(2) + (x[1] - 2.5).powi(2);
//! let x0 = Array::from_slice(&[2.0, 0.0]);
//! let result = minimize(&fun, &x0, &Constraints::default(), &Options::default()).unwrap();
//! assert!(result.success);
//! assert!((result.x[0] - 1.0).abs() < 1e-3);
//! assert!((result.x[1] - 2.5).abs() < 1e-3);
//! ```
//!
//! [1] T. M. Ragonneau. *Model-Based Derivative-Free Optimization Methods
//!     and Software*. PhD thesis, The Hong Kong Polytechnic University,
//!     Hong Kong, China, 2022.
//! [2] M. J. D. Powell. The NEWUOA software for unconstrained
//!     optimization without derivatives. In *Large-Scale Nonlinear
//!     Optimization*, pages 255–297. Springer, Boston, MA, USA, 2006.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod framework;
mod interpolation;
mod models;
mod problem;
mod quadratic;
mod settings;
mod subsolvers;

pub use cq_core::{Error, Real, Result};
pub use cq_math::{Array, Matrix};
pub use problem::Constraints;
pub use settings::{ExitStatus, Options};

use framework::TrustRegion;
use models::Models;
use problem::{arrays_tol, Problem};
use settings::ResolvedOptions;

/// Result of the optimization procedure.
#[derive(Debug, Clone)]
pub struct OptimizeResult {
    /// Solution point.
    pub x: Array,
    /// Objective function value at the solution point.
    pub fun: Real,
    /// Nonlinear inequality constraint values at the solution point.
    pub cub: Array,
    /// Nonlinear equality constraint values at the solution point.
    pub ceq: Array,
    /// Maximum constraint violation at the solution point.
    pub maxcv: Real,
    /// Number of function evaluations.
    pub nfev: usize,
    /// Number of iterations.
    pub nit: usize,
    /// Termination status of the optimization procedure.
    pub status: ExitStatus,
    /// Whether the optimization procedure terminated successfully.
    pub success: bool,
    /// Description of the cause of the termination.
    pub message: String,
    /// History of the objective function values (when requested).
    pub fun_history: Option<Vec<Real>>,
    /// History of the nonlinear inequality constraint values (when
    /// requested).
    pub cub_history: Option<Vec<Array>>,
    /// History of the nonlinear equality constraint values (when
    /// requested).
    pub ceq_history: Option<Vec<Array>>,
}

/// Outcome of evaluating the objective and constraint functions at a
/// trial point.
enum EvalOutcome {
    /// The evaluation budget is exhausted; the trial point was not
    /// evaluated.
    BudgetExhausted,
    /// The evaluation met the target on the objective function value.
    TargetReached,
    /// Values of the objective and constraint functions.
    Values(Real, Array, Array),
}

/// Minimize a scalar function using the COBYQA method.
///
/// The objective and the nonlinear constraint callables receive points of
/// the full space (including the variables fixed by the bounds).  Only
/// configuration errors and dimension mismatches are reported through
/// `Err`; infeasible bounds and exhausted budgets terminate with the
/// corresponding [`ExitStatus`] in the returned record.
pub fn minimize(
    fun: &dyn Fn(&Array) -> Real,
    x0: &Array,
    constraints: &Constraints<'_>,
    options: &Options,
) -> Result<OptimizeResult> {
    let mut pb = Problem::new(fun, x0, constraints, options)?;

    // Skip the computations whenever possible.
    if !pb.bounds_feasible() {
        return Ok(build_result(
            &pb,
            0.0,
            false,
            ExitStatus::InfeasibleError,
            0,
            options,
        ));
    }
    if pb.n() == 0 {
        return Ok(build_result(
            &pb,
            0.0,
            true,
            ExitStatus::FixedSuccess,
            0,
            options,
        ));
    }
    let mut opts = options.resolve(pb.n())?;
    if opts.verbose {
        println!("Starting the optimization procedure.");
        println!("Initial trust-region radius: {}.", opts.radius_init);
        println!("Final trust-region radius: {}.", opts.radius_final);
        println!("Maximum number of function evaluations: {}.", opts.max_eval);
        println!("Maximum number of iterations: {}.", opts.max_iter);
        println!();
    }

    // Build the initial models; this evaluates all the interpolation
    // points and may already meet the target.
    let Some(models) = Models::new(&mut pb, &mut opts) else {
        return Ok(build_result(
            &pb,
            0.0,
            true,
            ExitStatus::TargetSuccess,
            0,
            options,
        ));
    };
    if pb.n_eval() >= opts.max_eval {
        return Ok(build_result(
            &pb,
            0.0,
            false,
            ExitStatus::MaxEvalWarning,
            0,
            options,
        ));
    }
    let mut framework = TrustRegion::new(models, &pb, &opts);

    // Start the optimization procedure.
    let mut success = false;
    let status: ExitStatus;
    let mut n_iter = 0;
    let mut n_short_steps = 0;
    let mut n_very_short_steps = 0;
    let mut n_alt_models = 0;
    let mut k_new = 0;
    loop {
        if n_iter >= opts.max_iter {
            status = ExitStatus::MaxIterWarning;
            break;
        }
        n_iter += 1;

        // Update the point around which the quadratic models are built.
        let x_base_dist =
            (framework.x_best() - framework.models().interpolation().x_base()).norm();
        if x_base_dist >= 10.0 * framework.radius() {
            framework.shift_x_base();
        }

        // Evaluate the trial step.
        let radius_save = framework.radius();
        let (normal_step, tangential_step) = framework.get_trust_region_step(&pb);
        let mut step = &normal_step + &tangential_step;
        let s_norm = step.norm();

        // When the trial step is too short, the objective and constraint
        // functions are not evaluated; the trust-region radius shrinks and
        // the iteration decides between reducing the resolution and
        // improving the geometry of the interpolation set.
        let reduce_resolution;
        let mut improve_geometry = false;
        if s_norm <= 0.5 * framework.resolution() {
            framework.set_radius(0.1 * framework.radius());
            if radius_save > framework.resolution() {
                n_short_steps = 0;
                n_very_short_steps = 0;
            } else {
                n_short_steps += 1;
                n_very_short_steps += 1;
                if s_norm > 0.1 * framework.resolution() {
                    n_very_short_steps = 0;
                }
            }
            reduce_resolution = n_short_steps >= 5 || n_very_short_steps >= 3;
            if reduce_resolution {
                n_short_steps = 0;
                n_very_short_steps = 0;
            } else {
                let (k, dist_new) = framework.get_index_to_remove(None);
                k_new = k;
                improve_geometry =
                    dist_new > framework.radius().max(2.0 * framework.resolution());
            }
        } else {
            // Increase the penalty parameter if necessary; the best point
            // may move in the process, in which case the iteration
            // restarts.
            let same_best_point = framework.increase_penalty(&pb, &step);
            if same_best_point {
                let (mut fun_val, mut cub_val, mut ceq_val) =
                    match eval_trial(&mut pb, &framework, &step, &opts) {
                        EvalOutcome::BudgetExhausted => {
                            status = ExitStatus::MaxEvalWarning;
                            break;
                        }
                        EvalOutcome::TargetReached => {
                            return Ok(build_result(
                                &pb,
                                framework.penalty(),
                                true,
                                ExitStatus::TargetSuccess,
                                n_iter,
                                options,
                            ));
                        }
                        EvalOutcome::Values(f, cub, ceq) => (f, cub, ceq),
                    };

                // Second-order correction after a merit increase caused by
                // a mostly-normal step.
                let x_best = framework.x_best();
                let merit_old = framework.merit(
                    &pb,
                    &x_best,
                    framework.fun_best(),
                    &framework.cub_best(),
                    &framework.ceq_best(),
                );
                let merit_new =
                    framework.merit(&pb, &(&x_best + &step), fun_val, &cub_val, &ceq_val);
                if pb.is_nonlinearly_constrained()
                    && merit_new > merit_old
                    && normal_step.norm() > 0.8 * 0.8 * framework.radius()
                {
                    let soc_step = framework.get_second_order_correction_step(&pb, &step);
                    if soc_step.norm() > 0.0 {
                        step = step + &soc_step;
                        match eval_trial(&mut pb, &framework, &step, &opts) {
                            EvalOutcome::BudgetExhausted => {
                                status = ExitStatus::MaxEvalWarning;
                                break;
                            }
                            EvalOutcome::TargetReached => {
                                return Ok(build_result(
                                    &pb,
                                    framework.penalty(),
                                    true,
                                    ExitStatus::TargetSuccess,
                                    n_iter,
                                    options,
                                ));
                            }
                            EvalOutcome::Values(f, cub, ceq) => {
                                fun_val = f;
                                cub_val = cub;
                                ceq_val = ceq;
                            }
                        }
                    }
                }

                // Calculate the reduction ratio and update the
                // interpolation set with the trial point.
                let ratio =
                    framework.get_reduction_ratio(&pb, &step, fun_val, &cub_val, &ceq_val);
                let x_new = framework.x_best() + &step;
                k_new = framework.get_index_to_remove(Some(&x_new)).0;
                let ill_conditioned = framework.models_mut().update_interpolation(
                    k_new, &x_new, fun_val, &cub_val, &ceq_val,
                );
                framework.set_best_index(&pb);
                framework.update_radius(step.norm(), ratio);

                // Attempt to replace the models by the alternative ones.
                if framework.radius() <= framework.resolution() {
                    if ratio >= 0.01 {
                        n_alt_models = 0;
                    } else {
                        n_alt_models += 1;
                        let x_best = framework.x_best();
                        let grad = framework.models().fun_grad(&x_best);
                        let grad_alt = framework.models().fun_alt_grad(&x_best);
                        if grad.norm() < 10.0 * grad_alt.norm() {
                            n_alt_models = 0;
                        }
                        if n_alt_models >= 3 {
                            framework.models_mut().reset_models();
                            n_alt_models = 0;
                        }
                    }
                }

                // Update the Lagrange multipliers.
                let x_mult = framework.x_best() + &step;
                framework.set_multipliers(&pb, &x_mult);

                // Decide between improving the geometry and reducing the
                // resolution.
                let (k, dist_new) = framework.get_index_to_remove(None);
                k_new = k;
                improve_geometry = ill_conditioned
                    || (ratio <= 0.1
                        && dist_new > framework.radius().max(2.0 * framework.resolution()));
                reduce_resolution =
                    radius_save <= framework.resolution() && ratio <= 0.1 && !improve_geometry;
            } else {
                reduce_resolution = false;
            }
        }

        // Reduce the resolution if necessary.
        if reduce_resolution {
            if framework.resolution() <= opts.radius_final {
                success = true;
                status = ExitStatus::RadiusSuccess;
                break;
            }
            framework.reduce_resolution(&opts);
            framework.decrease_penalty(&pb);
            if opts.verbose {
                let x_best = framework.x_best();
                let maxcv_val =
                    pb.maxcv(&x_best, &framework.cub_best(), &framework.ceq_best());
                println!(
                    "New trust-region radius: {}.",
                    framework.resolution()
                );
                print_state(
                    &pb,
                    &pb.build_x(&x_best),
                    framework.fun_best(),
                    maxcv_val,
                    n_iter,
                );
                println!();
            }
        }

        // Improve the geometry of the interpolation set if necessary.
        if improve_geometry {
            let step = framework.get_geometry_step(&pb, k_new);
            match eval_trial(&mut pb, &framework, &step, &opts) {
                EvalOutcome::BudgetExhausted => {
                    status = ExitStatus::MaxEvalWarning;
                    break;
                }
                EvalOutcome::TargetReached => {
                    return Ok(build_result(
                        &pb,
                        framework.penalty(),
                        true,
                        ExitStatus::TargetSuccess,
                        n_iter,
                        options,
                    ));
                }
                EvalOutcome::Values(f, cub, ceq) => {
                    let x_new = framework.x_best() + &step;
                    framework
                        .models_mut()
                        .update_interpolation(k_new, &x_new, f, &cub, &ceq);
                    framework.set_best_index(&pb);
                }
            }
        }
    }
    Ok(build_result(
        &pb,
        framework.penalty(),
        success,
        status,
        n_iter,
        options,
    ))
}

/// Evaluate the objective and constraint functions at `x_best + step`,
/// guarding the evaluation budget and the target.
fn eval_trial(
    pb: &mut Problem<'_>,
    framework: &TrustRegion,
    step: &Array,
    opts: &ResolvedOptions,
) -> EvalOutcome {
    if pb.n_eval() >= opts.max_eval {
        return EvalOutcome::BudgetExhausted;
    }
    let x_eval = framework.x_best() + step;
    let (fun_val, cub_val, ceq_val) = pb.eval(&x_eval);
    let r_val = pb.maxcv(&x_eval, &cub_val, &ceq_val);
    let tol_bounds = arrays_tol(&[pb.xl(), pb.xu()]);
    if fun_val <= opts.target && r_val < tol_bounds {
        EvalOutcome::TargetReached
    } else {
        EvalOutcome::Values(fun_val, cub_val, ceq_val)
    }
}

/// Build the result of the optimization procedure from the best stored
/// evaluation under the final penalty.
fn build_result(
    pb: &Problem<'_>,
    penalty: Real,
    success: bool,
    status: ExitStatus,
    n_iter: usize,
    options: &Options,
) -> OptimizeResult {
    let (x_red, fun, cub, ceq) = pb.best_eval(penalty);
    let maxcv = pb.maxcv(&x_red, &cub, &ceq);
    let x = pb.build_x(&x_red);

    let mut success = success;
    if status != ExitStatus::TargetSuccess {
        let m_max = pb
            .n()
            .max(pb.m_linear_ub())
            .max(pb.m_linear_eq())
            .max(pb.m_nonlinear_ub())
            .max(pb.m_nonlinear_eq())
            .max(1);
        success = success && maxcv < 10.0 * Real::EPSILON * m_max as Real * x.max_abs().max(1.0);
    }

    let result = OptimizeResult {
        x,
        fun,
        cub,
        ceq,
        maxcv,
        nfev: pb.n_eval(),
        nit: n_iter,
        status,
        success,
        message: status.message().to_string(),
        fun_history: options
            .store_history
            .then(|| pb.fun_history().to_vec()),
        cub_history: options
            .store_history
            .then(|| pb.cub_history().to_vec()),
        ceq_history: options
            .store_history
            .then(|| pb.ceq_history().to_vec()),
    };
    if options.verbose {
        println!();
        println!("{}.", result.message);
        print_state(pb, &result.x, result.fun, result.maxcv, result.nit);
    }
    result
}

fn print_state(pb: &Problem<'_>, x: &Array, fun_val: Real, maxcv_val: Real, n_iter: usize) {
    println!("Number of function evaluations: {}.", pb.n_eval());
    println!("Number of iterations: {n_iter}.");
    println!("Least value of the objective function: {fun_val}.");
    println!("Maximum constraint violation: {maxcv_val}.");
    println!("Corresponding point: {x}.");
}
