//! Problem adapter: objective and constraint wrappers, fixed-variable
//! elimination, the evaluation filter, and the evaluation history.

use cq_core::{ensure, Error, Real, Result};
use cq_math::{Array, Matrix};

use crate::settings::Options;

/// Tolerance scaled to the magnitude and size of the given arrays.
pub(crate) fn arrays_tol(arrays: &[&Array]) -> Real {
    let size = arrays.iter().map(|a| a.size()).max().unwrap_or(1).max(1);
    let mut weight: Real = 1.0;
    for a in arrays {
        for &v in a.iter() {
            if v.is_finite() {
                weight = weight.max(v.abs());
            }
        }
    }
    10.0 * Real::EPSILON * size as Real * weight
}

/// Constraints of a nonlinear optimization problem.
///
/// All fields are optional; a field left to `None` means the
/// corresponding constraint is absent.  The nonlinear constraint
/// callables must return vectors of a fixed length, probed on their
/// first evaluation: `cub(x) <= 0` component-wise and `ceq(x) == 0`.
#[derive(Default)]
pub struct Constraints<'a> {
    /// Lower bounds on the variables.
    pub xl: Option<Array>,
    /// Upper bounds on the variables.
    pub xu: Option<Array>,
    /// Left-hand side matrix of the linear inequality constraints
    /// `aub x <= bub`.
    pub aub: Option<Matrix>,
    /// Right-hand side vector of the linear inequality constraints.
    pub bub: Option<Array>,
    /// Left-hand side matrix of the linear equality constraints
    /// `aeq x == beq`.
    pub aeq: Option<Matrix>,
    /// Right-hand side vector of the linear equality constraints.
    pub beq: Option<Array>,
    /// Nonlinear inequality constraint function `cub(x) <= 0`.
    pub cub: Option<&'a dyn Fn(&Array) -> Array>,
    /// Nonlinear equality constraint function `ceq(x) == 0`.
    pub ceq: Option<&'a dyn Fn(&Array) -> Array>,
}

/// Bound constraints `xl <= x <= xu`.
pub(crate) struct BoundConstraints {
    xl: Array,
    xu: Array,
}

impl BoundConstraints {
    fn new(xl: Array, xu: Array) -> Self {
        Self { xl, xu }
    }

    /// Whether the bounds admit at least one point.
    pub fn is_feasible(&self) -> bool {
        (0..self.xl.size()).all(|i| {
            let (l, u) = (self.xl[i], self.xu[i]);
            l <= u && !l.is_nan() && !u.is_nan() && l < Real::INFINITY && u > Real::NEG_INFINITY
        })
    }

    /// Maximum bound violation at `x`.
    pub fn violation(&self, x: &Array) -> Real {
        let mut v: Real = 0.0;
        for i in 0..x.size() {
            v = v.max(self.xl[i] - x[i]).max(x[i] - self.xu[i]);
        }
        v
    }

    pub fn xl(&self) -> &Array {
        &self.xl
    }

    pub fn xu(&self) -> &Array {
        &self.xu
    }
}

/// Linear constraints `a x <= b` or `a x == b`.
pub(crate) struct LinearConstraints {
    a: Matrix,
    b: Array,
    is_equality: bool,
}

impl LinearConstraints {
    fn new(a: Matrix, b: Array, is_equality: bool) -> Result<Self> {
        if a.rows() != b.size() {
            return Err(Error::DimensionMismatch {
                expected: a.rows(),
                actual: b.size(),
            });
        }
        Ok(Self { a, b, is_equality })
    }

    /// Number of constraints.
    pub fn m(&self) -> usize {
        self.b.size()
    }

    /// Residuals `a x - b`.
    pub fn residual(&self, x: &Array) -> Array {
        self.a.mul_vec(x) - &self.b
    }

    /// Maximum violation at `x`.
    pub fn violation(&self, x: &Array) -> Real {
        let r = self.residual(x);
        if self.is_equality {
            r.max_abs()
        } else {
            r.iter().fold(0.0, |acc, &v| acc.max(v))
        }
    }

    pub fn a(&self) -> &Matrix {
        &self.a
    }

    pub fn b(&self) -> &Array {
        &self.b
    }
}

// ── Filter ────────────────────────────────────────────────────────────────────

struct FilterEntry {
    x: Array,
    fun: Real,
    cub: Array,
    ceq: Array,
    maxcv: Real,
}

/// Filter of nondominated evaluations, used to select the point returned
/// by the optimization procedure.
struct Filter {
    entries: Vec<FilterEntry>,
    capacity: usize,
}

impl Filter {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    fn push(&mut self, entry: FilterEntry) {
        // Drop the stored evaluations dominated by the newcomer, then skip
        // the newcomer if a survivor dominates it.
        self.entries
            .retain(|e| e.fun < entry.fun || e.maxcv < entry.maxcv);
        if self
            .entries
            .iter()
            .any(|e| e.fun <= entry.fun && e.maxcv <= entry.maxcv)
        {
            return;
        }
        self.entries.push(entry);
        if self.entries.len() > self.capacity {
            let mut worst = 0;
            for (i, e) in self.entries.iter().enumerate() {
                let w = &self.entries[worst];
                if e.maxcv > w.maxcv || (e.maxcv == w.maxcv && e.fun > w.fun) {
                    worst = i;
                }
            }
            self.entries.remove(worst);
        }
    }

    /// Entry minimizing `fun + penalty * maxcv`, ties broken towards the
    /// smaller violation.
    fn best(&self, penalty: Real) -> Option<&FilterEntry> {
        let mut best: Option<&FilterEntry> = None;
        for e in &self.entries {
            let merit = e.fun + penalty * e.maxcv;
            match best {
                Some(b) => {
                    let merit_b = b.fun + penalty * b.maxcv;
                    if merit < merit_b || (merit == merit_b && e.maxcv < b.maxcv) {
                        best = Some(e);
                    }
                }
                None => best = Some(e),
            }
        }
        best
    }
}

// ── Problem ───────────────────────────────────────────────────────────────────

/// Problem to be solved, after fixed-variable elimination.
///
/// Wraps the user callables, counts the evaluations, and keeps the filter
/// (and optionally the history) of the evaluations performed so far.
pub(crate) struct Problem<'a> {
    fun: &'a dyn Fn(&Array) -> Real,
    cub_fn: Option<&'a dyn Fn(&Array) -> Array>,
    ceq_fn: Option<&'a dyn Fn(&Array) -> Array>,

    n_orig: usize,
    fixed: Vec<bool>,
    fixed_values: Array,
    bounds_feasible: bool,

    x0: Array,
    bounds: BoundConstraints,
    linear_ub: LinearConstraints,
    linear_eq: LinearConstraints,

    m_nonlinear_ub: Option<usize>,
    m_nonlinear_eq: Option<usize>,

    n_eval: usize,
    filter: Filter,
    store_history: bool,
    history_size: usize,
    fun_history: Vec<Real>,
    cub_history: Vec<Array>,
    ceq_history: Vec<Array>,
}

impl<'a> Problem<'a> {
    pub fn new(
        fun: &'a dyn Fn(&Array) -> Real,
        x0: &Array,
        constraints: &Constraints<'a>,
        options: &Options,
    ) -> Result<Self> {
        let n_orig = x0.size();
        ensure!(n_orig > 0, "the initial guess must not be empty");
        let xl = match &constraints.xl {
            Some(xl) => {
                check_len(xl.size(), n_orig)?;
                xl.clone()
            }
            None => Array::from_element(n_orig, Real::NEG_INFINITY),
        };
        let xu = match &constraints.xu {
            Some(xu) => {
                check_len(xu.size(), n_orig)?;
                xu.clone()
            }
            None => Array::from_element(n_orig, Real::INFINITY),
        };
        let (aub, bub) = linear_parts(&constraints.aub, &constraints.bub, n_orig)?;
        let (aeq, beq) = linear_parts(&constraints.aeq, &constraints.beq, n_orig)?;

        let bounds_feasible = BoundConstraints::new(xl.clone(), xu.clone()).is_feasible();

        // Remove the variables fixed by the bound constraints.
        let tol = arrays_tol(&[&xl, &xu]);
        let mut fixed = vec![false; n_orig];
        let mut fixed_values = Array::zeros(n_orig);
        if bounds_feasible {
            for i in 0..n_orig {
                if xu[i] - xl[i] <= tol {
                    fixed[i] = true;
                    fixed_values[i] = (0.5 * (xl[i] + xu[i])).max(xl[i]).min(xu[i]);
                }
            }
        }
        let free: Vec<usize> = (0..n_orig).filter(|&i| !fixed[i]).collect();
        let n = free.len();

        let gather = |a: &Array| Array::from_vec(free.iter().map(|&i| a[i]).collect());
        let xl_red = gather(&xl);
        let xu_red = gather(&xu);
        let x0_red = gather(x0).clamp(&xl_red, &xu_red);

        // Fold the fixed columns of the linear constraints into the
        // right-hand sides.
        let reduce_linear = |a: &Matrix, b: &Array| -> (Matrix, Array) {
            let m = a.rows();
            let mut a_red = Matrix::zeros(m, n);
            let mut b_red = b.clone();
            for r in 0..m {
                for (jc, &j) in free.iter().enumerate() {
                    a_red[(r, jc)] = a[(r, j)];
                }
                for i in 0..n_orig {
                    if fixed[i] {
                        b_red[r] -= a[(r, i)] * fixed_values[i];
                    }
                }
            }
            (a_red, b_red)
        };
        let (aub_red, bub_red) = reduce_linear(&aub, &bub);
        let (aeq_red, beq_red) = reduce_linear(&aeq, &beq);

        Ok(Self {
            fun,
            cub_fn: constraints.cub,
            ceq_fn: constraints.ceq,
            n_orig,
            fixed,
            fixed_values,
            bounds_feasible,
            x0: x0_red,
            bounds: BoundConstraints::new(xl_red, xu_red),
            linear_ub: LinearConstraints::new(aub_red, bub_red, false)?,
            linear_eq: LinearConstraints::new(aeq_red, beq_red, true)?,
            m_nonlinear_ub: None,
            m_nonlinear_eq: None,
            n_eval: 0,
            filter: Filter::new(options.filter_size),
            store_history: options.store_history,
            history_size: options.history_size,
            fun_history: Vec::new(),
            cub_history: Vec::new(),
            ceq_history: Vec::new(),
        })
    }

    /// Number of free variables.
    pub fn n(&self) -> usize {
        self.x0.size()
    }

    pub fn x0(&self) -> &Array {
        &self.x0
    }

    pub fn xl(&self) -> &Array {
        self.bounds.xl()
    }

    pub fn xu(&self) -> &Array {
        self.bounds.xu()
    }

    pub fn aub(&self) -> &Matrix {
        self.linear_ub.a()
    }

    pub fn bub(&self) -> &Array {
        self.linear_ub.b()
    }

    pub fn aeq(&self) -> &Matrix {
        self.linear_eq.a()
    }

    pub fn beq(&self) -> &Array {
        self.linear_eq.b()
    }

    pub fn m_linear_ub(&self) -> usize {
        self.linear_ub.m()
    }

    pub fn m_linear_eq(&self) -> usize {
        self.linear_eq.m()
    }

    /// Number of nonlinear inequality constraints (0 before the first
    /// evaluation probes it).
    pub fn m_nonlinear_ub(&self) -> usize {
        self.m_nonlinear_ub.unwrap_or(0)
    }

    /// Number of nonlinear equality constraints (0 before the first
    /// evaluation probes it).
    pub fn m_nonlinear_eq(&self) -> usize {
        self.m_nonlinear_eq.unwrap_or(0)
    }

    pub fn bounds_feasible(&self) -> bool {
        self.bounds_feasible
    }

    pub fn is_nonlinearly_constrained(&self) -> bool {
        self.m_nonlinear_ub() + self.m_nonlinear_eq() > 0
    }

    pub fn n_eval(&self) -> usize {
        self.n_eval
    }

    /// Evaluate the objective and constraint functions at `x` (given in
    /// the reduced space).  NaN values returned by the user callables are
    /// replaced by `+inf`; a vector of the wrong length is padded the same
    /// way rather than raising.
    pub fn eval(&mut self, x: &Array) -> (Real, Array, Array) {
        let x_full = self.build_x(x);
        let mut fun_val = (self.fun)(&x_full);
        if fun_val.is_nan() {
            fun_val = Real::INFINITY;
        }
        let cub_val = eval_vector(self.cub_fn, &x_full, &mut self.m_nonlinear_ub);
        let ceq_val = eval_vector(self.ceq_fn, &x_full, &mut self.m_nonlinear_eq);
        self.n_eval += 1;

        let maxcv = self.maxcv(x, &cub_val, &ceq_val);
        self.filter.push(FilterEntry {
            x: x.clone(),
            fun: fun_val,
            cub: cub_val.clone(),
            ceq: ceq_val.clone(),
            maxcv,
        });
        if self.store_history {
            if self.fun_history.len() == self.history_size {
                self.fun_history.remove(0);
                self.cub_history.remove(0);
                self.ceq_history.remove(0);
            }
            self.fun_history.push(fun_val);
            self.cub_history.push(cub_val.clone());
            self.ceq_history.push(ceq_val.clone());
        }
        (fun_val, cub_val, ceq_val)
    }

    /// Maximum constraint violation at `x` (reduced space), given the
    /// nonlinear constraint values at `x`.
    pub fn maxcv(&self, x: &Array, cub_val: &Array, ceq_val: &Array) -> Real {
        let mut v = self.bounds.violation(x);
        v = v.max(self.linear_ub.violation(x));
        v = v.max(self.linear_eq.violation(x));
        v = v.max(cub_val.iter().fold(0.0, |acc, &c| acc.max(c)));
        v = v.max(ceq_val.max_abs());
        v.max(0.0)
    }

    /// Best evaluation stored in the filter under the given penalty.
    pub fn best_eval(&self, penalty: Real) -> (Array, Real, Array, Array) {
        match self.filter.best(penalty) {
            Some(e) => (e.x.clone(), e.fun, e.cub.clone(), e.ceq.clone()),
            None => (
                self.x0.clone(),
                Real::NAN,
                Array::zeros(self.m_nonlinear_ub()),
                Array::zeros(self.m_nonlinear_eq()),
            ),
        }
    }

    /// Rebuild a point of the original space from a reduced one.
    pub fn build_x(&self, x: &Array) -> Array {
        let mut out = Array::zeros(self.n_orig);
        let mut jc = 0;
        for i in 0..self.n_orig {
            if self.fixed[i] {
                out[i] = self.fixed_values[i];
            } else {
                out[i] = x[jc];
                jc += 1;
            }
        }
        out
    }

    pub fn fun_history(&self) -> &[Real] {
        &self.fun_history
    }

    pub fn cub_history(&self) -> &[Array] {
        &self.cub_history
    }

    pub fn ceq_history(&self) -> &[Array] {
        &self.ceq_history
    }
}

fn check_len(actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(Error::DimensionMismatch { expected, actual });
    }
    Ok(())
}

fn linear_parts(a: &Option<Matrix>, b: &Option<Array>, n: usize) -> Result<(Matrix, Array)> {
    match (a, b) {
        (Some(a), Some(b)) => {
            if a.cols() != n {
                return Err(Error::DimensionMismatch {
                    expected: n,
                    actual: a.cols(),
                });
            }
            if a.rows() != b.size() {
                return Err(Error::DimensionMismatch {
                    expected: a.rows(),
                    actual: b.size(),
                });
            }
            Ok((a.clone(), b.clone()))
        }
        (None, None) => Ok((Matrix::zeros(0, n), Array::zeros(0))),
        _ => Err(Error::InvalidArgument(
            "a linear constraint needs both its matrix and its right-hand side".into(),
        )),
    }
}

/// Evaluate an optional vector-valued callable, replacing NaN components
/// by `+inf` and reconciling the length with the probed one.
fn eval_vector(
    f: Option<&dyn Fn(&Array) -> Array>,
    x: &Array,
    probed: &mut Option<usize>,
) -> Array {
    let Some(f) = f else {
        *probed = Some(0);
        return Array::zeros(0);
    };
    let raw = f(x).map(|v| if v.is_nan() { Real::INFINITY } else { v });
    let m = *probed.get_or_insert(raw.size());
    if raw.size() == m {
        raw
    } else {
        let mut out = Array::from_element(m, Real::INFINITY);
        for i in 0..m.min(raw.size()) {
            out[i] = raw[i];
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere(x: &Array) -> Real {
        x.norm_squared()
    }

    #[test]
    fn counts_evaluations() {
        let cons = Constraints::default();
        let x0 = Array::from_slice(&[1.0, 2.0]);
        let mut pb = Problem::new(&sphere, &x0, &cons, &Options::default()).unwrap();
        assert_eq!(pb.n_eval(), 0);
        let (f, cub, ceq) = pb.eval(&x0);
        assert_eq!(f, 5.0);
        assert!(cub.is_empty());
        assert!(ceq.is_empty());
        assert_eq!(pb.n_eval(), 1);
    }

    #[test]
    fn nan_is_extreme() {
        let nan_fun = |_: &Array| Real::NAN;
        let cons = Constraints::default();
        let x0 = Array::from_slice(&[0.0]);
        let mut pb = Problem::new(&nan_fun, &x0, &cons, &Options::default()).unwrap();
        let (f, _, _) = pb.eval(&x0);
        assert_eq!(f, Real::INFINITY);
    }

    #[test]
    fn fixed_variables_are_removed() {
        let cons = Constraints {
            xl: Some(Array::from_slice(&[0.0, -1.0])),
            xu: Some(Array::from_slice(&[0.0, 1.0])),
            ..Constraints::default()
        };
        let x0 = Array::from_slice(&[0.5, 0.5]);
        let pb = Problem::new(&sphere, &x0, &cons, &Options::default()).unwrap();
        assert_eq!(pb.n(), 1);
        let full = pb.build_x(&Array::from_slice(&[0.25]));
        assert_eq!(full.size(), 2);
        assert_eq!(full[0], 0.0);
        assert_eq!(full[1], 0.25);
    }

    #[test]
    fn infeasible_bounds_detected() {
        let cons = Constraints {
            xl: Some(Array::from_slice(&[1.0])),
            xu: Some(Array::from_slice(&[-1.0])),
            ..Constraints::default()
        };
        let x0 = Array::from_slice(&[0.0]);
        let pb = Problem::new(&sphere, &x0, &cons, &Options::default()).unwrap();
        assert!(!pb.bounds_feasible());
    }

    #[test]
    fn maxcv_combines_all_violations() {
        let cons = Constraints {
            xl: Some(Array::from_slice(&[0.0, 0.0])),
            aub: Some(Matrix::from_row_slice(1, 2, &[1.0, 1.0])),
            bub: Some(Array::from_slice(&[1.0])),
            ..Constraints::default()
        };
        let x0 = Array::from_slice(&[2.0, 2.0]);
        let pb = Problem::new(&sphere, &x0, &cons, &Options::default()).unwrap();
        // x = [2, 2]: bounds satisfied, aub violation = 3.
        let v = pb.maxcv(&x0, &Array::zeros(0), &Array::zeros(0));
        assert_eq!(v, 3.0);
        // Nonlinear values dominate when larger.
        let v = pb.maxcv(&x0, &Array::from_slice(&[7.0]), &Array::zeros(0));
        assert_eq!(v, 7.0);
        let v = pb.maxcv(&x0, &Array::zeros(0), &Array::from_slice(&[-9.0]));
        assert_eq!(v, 9.0);
    }

    #[test]
    fn filter_keeps_nondominated_points() {
        let mut filter = Filter::new(usize::MAX);
        let entry = |fun: Real, maxcv: Real| FilterEntry {
            x: Array::zeros(1),
            fun,
            cub: Array::zeros(0),
            ceq: Array::zeros(0),
            maxcv,
        };
        filter.push(entry(1.0, 1.0));
        filter.push(entry(2.0, 0.0));
        // Dominated by the first entry.
        filter.push(entry(3.0, 2.0));
        assert_eq!(filter.entries.len(), 2);
        // Dominates the first entry.
        filter.push(entry(0.5, 0.5));
        assert_eq!(filter.entries.len(), 2);

        let best = filter.best(0.0).unwrap();
        assert_eq!(best.fun, 0.5);
        let best = filter.best(100.0).unwrap();
        assert_eq!(best.fun, 2.0);
    }

    #[test]
    fn probes_constraint_dimension_once() {
        let cub = |x: &Array| Array::from_slice(&[x[0] - 1.0, x[1] - 2.0]);
        let cons = Constraints {
            cub: Some(&cub),
            ..Constraints::default()
        };
        let x0 = Array::from_slice(&[0.0, 0.0]);
        let mut pb = Problem::new(&sphere, &x0, &cons, &Options::default()).unwrap();
        assert_eq!(pb.m_nonlinear_ub(), 0);
        pb.eval(&x0);
        assert_eq!(pb.m_nonlinear_ub(), 2);
        assert!(pb.is_nonlinearly_constrained());
    }
}
