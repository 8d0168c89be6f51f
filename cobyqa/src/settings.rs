//! Solver options and exit statuses.

use cq_core::{Error, Real, Result};

/// Reason the optimization procedure terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The lower bound for the trust-region radius has been reached.
    RadiusSuccess,
    /// The target objective function value has been reached.
    TargetSuccess,
    /// All variables are fixed by the bound constraints.
    FixedSuccess,
    /// The maximum number of function evaluations has been exceeded.
    MaxEvalWarning,
    /// The maximum number of iterations has been exceeded.
    MaxIterWarning,
    /// The bound constraints are infeasible.
    InfeasibleError,
}

impl ExitStatus {
    /// Numeric status code (warnings are positive, errors negative).
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::RadiusSuccess => 0,
            ExitStatus::TargetSuccess => 1,
            ExitStatus::FixedSuccess => 2,
            ExitStatus::MaxEvalWarning => 3,
            ExitStatus::MaxIterWarning => 4,
            ExitStatus::InfeasibleError => -1,
        }
    }

    /// Human-readable description of the termination cause.
    pub fn message(&self) -> &'static str {
        match self {
            ExitStatus::RadiusSuccess => {
                "The lower bound for the trust-region radius has been reached"
            }
            ExitStatus::TargetSuccess => {
                "The target objective function value has been reached"
            }
            ExitStatus::FixedSuccess => {
                "All variables are fixed by the bound constraints"
            }
            ExitStatus::MaxEvalWarning => {
                "The maximum number of function evaluations has been exceeded"
            }
            ExitStatus::MaxIterWarning => {
                "The maximum number of iterations has been exceeded"
            }
            ExitStatus::InfeasibleError => "The bound constraints are infeasible",
        }
    }

    /// Whether the status denotes a successful termination.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ExitStatus::RadiusSuccess | ExitStatus::TargetSuccess | ExitStatus::FixedSuccess
        )
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Options of the solver.
///
/// Fields set to `None` are resolved against the problem dimension `n`
/// when the optimization starts.
#[derive(Debug, Clone)]
pub struct Options {
    /// Whether to print information about the optimization procedure.
    pub verbose: bool,
    /// Whether to perform additional interpolation checks. Intended for
    /// debugging purposes only.
    pub debug: bool,
    /// Maximum number of function evaluations (default `500 n`).
    pub max_eval: Option<usize>,
    /// Maximum number of iterations (default `1000 n`).
    pub max_iter: Option<usize>,
    /// Number of interpolation points (default `2 n + 1`).
    pub npt: Option<usize>,
    /// Initial trust-region radius.
    pub radius_init: Real,
    /// Final trust-region radius.
    pub radius_final: Real,
    /// Target on the objective function value. The optimization procedure
    /// is terminated when the objective function value of a nearly
    /// feasible point is below this target.
    pub target: Real,
    /// Tolerance on the constraint violation.
    pub feasibility_tol: Real,
    /// Maximum number of points in the filter used to select the best
    /// point returned by the optimization procedure.
    pub filter_size: usize,
    /// Whether to store the history of the function evaluations.
    pub store_history: bool,
    /// Maximum number of function evaluations to store in the history.
    pub history_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbose: false,
            debug: false,
            max_eval: None,
            max_iter: None,
            npt: None,
            radius_init: 1.0,
            radius_final: 1e-6,
            target: Real::NEG_INFINITY,
            feasibility_tol: Real::EPSILON.sqrt(),
            filter_size: usize::MAX,
            store_history: false,
            history_size: usize::MAX,
        }
    }
}

/// Options with all defaults resolved against the problem dimension.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedOptions {
    pub verbose: bool,
    pub debug: bool,
    pub max_eval: usize,
    pub max_iter: usize,
    pub npt: usize,
    pub radius_init: Real,
    pub radius_final: Real,
    pub target: Real,
    pub feasibility_tol: Real,
}

impl Options {
    /// Validate the options and resolve the dimension-dependent defaults.
    pub(crate) fn resolve(&self, n: usize) -> Result<ResolvedOptions> {
        if !(self.radius_init > 0.0) {
            return Err(Error::InvalidOption(
                "the initial trust-region radius must be positive".into(),
            ));
        }
        if !(self.radius_final >= 0.0) {
            return Err(Error::InvalidOption(
                "the final trust-region radius must be nonnegative".into(),
            ));
        }
        if self.radius_final > self.radius_init {
            return Err(Error::InvalidOption(
                "the initial trust-region radius must be greater than or equal \
                 to the final trust-region radius"
                    .into(),
            ));
        }
        let npt_max = (n + 1) * (n + 2) / 2;
        let npt = self.npt.unwrap_or(2 * n + 1).min(npt_max);
        if let Some(user_npt) = self.npt {
            if user_npt < n + 1 || user_npt > npt_max {
                return Err(Error::InvalidOption(format!(
                    "the number of interpolation points must be in [{}, {npt_max}]",
                    n + 1
                )));
            }
        }
        let max_eval = self.max_eval.unwrap_or_else(|| (500 * n).max(npt + 1));
        if max_eval <= npt {
            return Err(Error::InvalidOption(
                "the maximum number of function evaluations must exceed the \
                 number of interpolation points"
                    .into(),
            ));
        }
        let max_iter = self.max_iter.unwrap_or_else(|| (1000 * n).max(1));
        if max_iter == 0 {
            return Err(Error::InvalidOption(
                "the maximum number of iterations must be positive".into(),
            ));
        }
        if self.filter_size == 0 {
            return Err(Error::InvalidOption(
                "the size of the filter must be positive".into(),
            ));
        }
        if self.history_size == 0 {
            return Err(Error::InvalidOption(
                "the size of the history must be positive".into(),
            ));
        }
        if !(self.feasibility_tol >= 0.0) {
            return Err(Error::InvalidOption(
                "the feasibility tolerance must be nonnegative".into(),
            ));
        }
        Ok(ResolvedOptions {
            verbose: self.verbose,
            debug: self.debug,
            max_eval,
            max_iter,
            npt,
            radius_init: self.radius_init,
            radius_final: self.radius_final,
            target: self.target,
            feasibility_tol: self.feasibility_tol,
        })
    }
}
